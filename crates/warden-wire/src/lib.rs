//! Framing for the private front-end/back-end link.
//!
//! Every message is a 4-byte big-endian length followed by that many bytes of
//! JSON. One connection carries an unbounded sequence of frames.

pub mod connection;
pub mod error;

pub use connection::{Connection, LEN_PREFIX, MAX_FRAME_SIZE};
pub use error::{ErrorKind, TransportError};
