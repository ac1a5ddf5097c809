//! History page queries.

use crate::ids::{ChannelId, MessageId};

/// Page size used when the caller does not pick one.
pub const DEFAULT_PAGE_LIMIT: u32 = 50;

/// Largest page the server will return.
pub const MAX_PAGE_LIMIT: u32 = 100;

/// A request for one page of channel history.
///
/// The server answers with at most `limit` messages older than `before`
/// (or the most recent ones when `before` is absent), newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    /// Channel to read.
    pub channel_id: ChannelId,
    /// Exclusive upper bound; `None` requests the most recent page.
    pub before: Option<MessageId>,
    /// Page size, within `1..=MAX_PAGE_LIMIT`.
    pub limit: u32,
}

impl HistoryQuery {
    /// Creates a query for the most recent page.
    pub fn latest(channel_id: ChannelId) -> Self {
        Self {
            channel_id,
            before: None,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }

    /// Sets the cursor.
    pub fn with_before(mut self, before: Option<MessageId>) -> Self {
        self.before = before;
        self
    }

    /// Sets the page size, clamped to the server's bounds.
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit.clamp(1, MAX_PAGE_LIMIT);
        self
    }

    /// Returns the request path relative to the API base.
    pub fn path(&self) -> String {
        format!("messages/{}", self.channel_id)
    }

    /// Returns the query-string parameters.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("limit", self.limit.to_string())];
        if let Some(before) = &self.before {
            pairs.push(("before", before.to_string()));
        }
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_page_query() {
        let query = HistoryQuery::latest(ChannelId(7));
        assert_eq!(query.path(), "messages/7");
        assert_eq!(query.query_pairs(), vec![("limit", "50".to_string())]);
    }

    #[test]
    fn cursor_and_limit() {
        let query = HistoryQuery::latest(ChannelId(7))
            .with_before(Some(MessageId::from(901)))
            .with_limit(500);
        assert_eq!(query.limit, MAX_PAGE_LIMIT);
        assert_eq!(
            query.query_pairs(),
            vec![("limit", "100".to_string()), ("before", "901".to_string())]
        );
        assert_eq!(HistoryQuery::latest(ChannelId(1)).with_limit(0).limit, 1);
    }
}
