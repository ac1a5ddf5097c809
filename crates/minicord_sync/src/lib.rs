//! # Minicord Sync
//!
//! Message-stream synchronization core for the minicord chat client.
//!
//! This crate provides:
//! - Push-connection lifecycle with reconnect and event handlers
//! - Cursor-based history pagination over HTTP
//! - An ordered, duplicate-free message store
//! - Scroll anchoring for head insertions
//! - The coordinator that ties them together per active channel
//!
//! ## Architecture
//!
//! The client sees one channel at a time. Its messages come from two
//! independent sources:
//! 1. A persistent push connection delivering newly created messages
//! 2. An on-demand history endpoint returning older pages, newest first
//!
//! The [`SyncCoordinator`] merges both into a single [`MessageStore`] and
//! discards any asynchronous result that outlives the session it was
//! requested for.
//!
//! ## Key Invariants
//!
//! - The store is strictly ascending by `(created_at, id)`
//! - No two stored messages share an id
//! - Delivering the same message twice changes nothing
//! - `has_more` never turns back to true within a session
//! - At most one history page request is in flight per session

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod anchor;
mod config;
mod connection;
mod coordinator;
mod error;
mod history;
mod store;

pub use anchor::{
    capture as capture_anchor, restore as restore_anchor, ContainerMetrics, DetachedViewport,
    FixedRowViewport, ScrollAnchorRecord, ScrollRestore, Viewport,
};
pub use config::{ClientConfig, Credentials, ReconnectConfig};
pub use connection::{
    connection_url, redact_credentials, ConnectionEvent, ConnectionHandle, ConnectionManager,
    ConnectionState, EventKind, FrameSink, FrameStream, MockAcceptor, MockConnector, MockPeer,
    PushConnector, Subscription, WsConnector,
};
pub use coordinator::{ChannelRef, PageOutcome, SkipReason, SyncCoordinator, SyncEvent, SyncPhase};
pub use error::{SyncError, SyncResult};
pub use history::{
    into_ascending, HistoryFetcher, HttpHistoryFetcher, MemoryHistory, PaginationCursor,
};
pub use store::MessageStore;
