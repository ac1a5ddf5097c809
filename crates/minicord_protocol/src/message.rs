//! The chat message record.

use crate::ids::{ChannelId, MessageId, ServerId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ordering key of a message: creation time, then id.
pub type SortKey<'a> = (DateTime<Utc>, &'a MessageId);

/// A chat message, as delivered by history pages and live frames.
///
/// Both sources share the same JSON shape. History records omit
/// `server_id`, and the server may attach fields this client ignores
/// (such as `type`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Server-assigned identifier.
    pub id: MessageId,
    /// Channel the message belongs to.
    pub channel_id: ChannelId,
    /// Server owning the channel, when the source reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<ServerId>,
    /// Author.
    pub user_id: UserId,
    /// Author display name.
    #[serde(default)]
    pub user_name: String,
    /// Message body.
    pub content: String,
    /// Server-assigned creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Returns the key messages are ordered by.
    pub fn sort_key(&self) -> SortKey<'_> {
        (self.created_at, &self.id)
    }
}
