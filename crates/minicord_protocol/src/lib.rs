//! # Minicord Protocol
//!
//! Wire types and JSON codecs shared by the minicord chat client.
//!
//! This crate provides:
//! - Identifier newtypes (`MessageId`, `ChannelId`, `ServerId`, `UserId`)
//! - The `Message` record delivered by both history pages and live frames
//! - Inbound/outbound push-channel frame codecs
//! - History page queries
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod frame;
mod ids;
mod message;
mod query;

pub use error::{ProtocolError, ProtocolResult};
pub use frame::{decode_inbound, encode_inbound, OutboundFrame};
pub use ids::{ChannelId, MessageId, ServerId, UserId};
pub use message::{Message, SortKey};
pub use query::{HistoryQuery, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
