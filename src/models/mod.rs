//! Core data models for the chunked upload service.
//!
//! Sessions serialize as JSON so any `SessionStore` backend can persist them
//! as an opaque document; the protocol types are the wire bodies exchanged
//! with clients.

pub mod protocol;
pub mod session;
pub mod upload;
