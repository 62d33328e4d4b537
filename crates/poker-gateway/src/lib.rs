//! Real-time side of the service.
//!
//! * [`dispatcher`]: session rooms and event fan-out.
//! * [`sync`]: the single command applier both entry paths go through.
//! * [`connection`]: the WebSocket driver feeding push commands into it.

pub mod connection;
pub mod dispatcher;
pub mod sync;

pub use dispatcher::{ConnectionHandle, Dispatcher};
pub use sync::{Applied, Command, SyncGateway};
