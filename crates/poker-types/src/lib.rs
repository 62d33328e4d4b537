//! Shared data model for the planning poker service.
//!
//! Entities (`models`), request/response bodies (`api`) and the WebSocket
//! wire format (`events`) live here so that every other crate agrees on
//! field names and JSON shapes.

pub mod api;
pub mod events;
pub mod models;
