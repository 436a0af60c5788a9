//! DNS wire format support
//!
//! Messages are represented with `hickory-proto`'s [`Message`]; this module
//! adds the conversions the listeners need between wire bytes and messages,
//! plus the UDP response size policy (EDNS0 payload negotiation and
//! truncation).
//!
//! # Example
//!
//! ```rust
//! use dnslisten::dns::{Message, Name, Query, RecordType, wire};
//! use std::str::FromStr;
//!
//! let mut query = Message::new();
//! query.add_query(Query::query(Name::from_str("example.com.").unwrap(), RecordType::A));
//!
//! let bytes = wire::serialize_message(&query).unwrap();
//! let parsed = wire::parse_message(&bytes).unwrap();
//! assert_eq!(parsed.queries()[0].name().to_utf8(), "example.com.");
//! ```

pub mod wire;

// Re-export the message model used across the crate
pub use hickory_proto::op::{Edns, Message, MessageType, Query, ResponseCode};
pub use hickory_proto::rr::{Name, RecordType};
pub use wire::{parse_message, serialize_message};
