//! Push-channel frame codecs.
//!
//! Inbound frames are JSON-encoded [`Message`] records. Outbound frames carry
//! only the content and its destination; the server assigns id, author and
//! timestamp and echoes the stored message back as an inbound frame.

use crate::error::{ProtocolError, ProtocolResult};
use crate::ids::{ChannelId, ServerId};
use crate::message::Message;
use serde::{Deserialize, Serialize};

/// Decodes an inbound text frame.
pub fn decode_inbound(text: &str) -> ProtocolResult<Message> {
    Ok(serde_json::from_str(text)?)
}

/// Encodes a message the way the server pushes it.
pub fn encode_inbound(message: &Message) -> ProtocolResult<String> {
    Ok(serde_json::to_string(message)?)
}

/// A message submitted by this client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundFrame {
    /// Message body.
    pub content: String,
    /// Destination channel.
    pub channel_id: ChannelId,
    /// Server owning the destination channel.
    pub server_id: ServerId,
}

impl OutboundFrame {
    /// Creates an outbound frame. Content is trimmed and must not be empty.
    pub fn new(
        content: impl AsRef<str>,
        channel_id: ChannelId,
        server_id: ServerId,
    ) -> ProtocolResult<Self> {
        let content = content.as_ref().trim();
        if content.is_empty() {
            return Err(ProtocolError::EmptyContent);
        }
        Ok(Self {
            content: content.to_string(),
            channel_id,
            server_id,
        })
    }

    /// Encodes to a JSON text frame.
    pub fn encode(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{MessageId, UserId};

    #[test]
    fn decodes_live_frame() {
        let text = r#"{"id":"951","channel_id":7,"server_id":3,"user_id":2,
            "user_name":"ana","content":"hello","type":"text",
            "created_at":"2025-03-01T10:00:00.123456789Z"}"#;
        let msg = decode_inbound(text).unwrap();
        assert_eq!(msg.id, MessageId::from(951));
        assert_eq!(msg.server_id, Some(ServerId(3)));
        assert_eq!(msg.user_id, UserId(2));
    }

    #[test]
    fn rejects_malformed_frames() {
        assert!(matches!(
            decode_inbound("not json"),
            Err(ProtocolError::Json(_))
        ));
        assert!(decode_inbound(r#"{"content":"missing fields"}"#).is_err());
    }

    #[test]
    fn outbound_frame_shape() {
        let frame = OutboundFrame::new("  hi there \n", ChannelId(7), ServerId(3)).unwrap();
        let json: serde_json::Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"content": "hi there", "channel_id": 7, "server_id": 3})
        );
    }

    #[test]
    fn outbound_frame_rejects_blank_content() {
        assert!(matches!(
            OutboundFrame::new("   ", ChannelId(7), ServerId(3)),
            Err(ProtocolError::EmptyContent)
        ));
    }
}
