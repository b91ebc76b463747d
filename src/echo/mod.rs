//! Echo service.
//!
//! Byte-transparent echo with no framing:
//! - Client sends any bytes, in any chunking
//! - Server writes back exactly the bytes of each read, in order
//!
//! The connection ends when the client closes its side or a read fails.
//! Plain TCP and TLS streams share the same handler.

pub mod handler;

pub use handler::{handle_connection, Summary, Termination};
