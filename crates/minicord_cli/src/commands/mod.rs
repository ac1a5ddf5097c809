//! CLI command implementations.

pub mod history;
pub mod tail;

use minicord_protocol::Message;

/// Renders one message as a terminal line.
pub fn format_message(message: &Message) -> String {
    let author = if message.user_name.is_empty() {
        format!("user {}", message.user_id)
    } else {
        message.user_name.clone()
    };
    format!(
        "[{}] {}: {}",
        message.created_at.format("%Y-%m-%d %H:%M:%S"),
        author,
        message.content
    )
}
