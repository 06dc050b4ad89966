//! Wire layer for rowsync
//!
//! - `envelope`: checksummed delta batch encoding
//! - `message`: session message framing
//! - `transport`: the `Transport` trait and an in-memory pair
//! - `tcp`: length-prefixed TCP transport

mod cbor;
pub mod envelope;
pub mod error;
pub mod message;
pub mod tcp;
pub mod transport;

pub use envelope::{decode_batch, encode_batch, ENVELOPE_VERSION};
pub use error::WireError;
pub use message::{decode_message, encode_message, Ack, Hello, SessionMessage, PROTOCOL_VERSION};
pub use tcp::TcpTransport;
pub use transport::{MemoryTransport, Transport};
