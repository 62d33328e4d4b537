//! Authoritative state for planning poker sessions.
//!
//! [`SessionMachine`] owns the session/story/vote lifecycle, host
//! authorization and vote redaction. [`CredentialService`] runs the
//! magic-link exchange and issues identity tokens.

pub mod credentials;
pub mod error;
mod locks;
pub mod machine;

pub use credentials::{CredentialService, Identity};
pub use error::PokerError;
pub use machine::{Revealed, SessionMachine, StoryRef, VoteReceipt};
