//! Cursor-based history retrieval.
//!
//! The server returns at most `limit` messages older than the cursor, newest
//! first. Fetchers hand pages to the caller oldest first.

use crate::config::{ClientConfig, Credentials};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use minicord_protocol::{ChannelId, HistoryQuery, Message, MessageId, MAX_PAGE_LIMIT};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use tracing::{debug, warn};
use url::Url;

/// Paginated access to a channel's message archive.
#[async_trait]
pub trait HistoryFetcher: Send + Sync {
    /// Fetches up to `limit` messages older than `before` (or the most recent
    /// ones when `before` is `None`), ascending.
    ///
    /// Returns an empty page when no further history exists.
    async fn fetch_page(
        &self,
        channel_id: ChannelId,
        before: Option<&MessageId>,
        limit: u32,
    ) -> SyncResult<Vec<Message>>;
}

/// Pagination state of one channel session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationCursor {
    /// Channel being paged.
    pub channel_id: ChannelId,
    /// Oldest message loaded so far; the next page is requested before it.
    pub oldest_loaded_id: Option<MessageId>,
    /// Whether older history may exist. Once false it stays false.
    pub has_more: bool,
}

impl PaginationCursor {
    /// Creates a cursor positioned at the newest message.
    pub fn new(channel_id: ChannelId) -> Self {
        Self {
            channel_id,
            oldest_loaded_id: None,
            has_more: true,
        }
    }

    /// Records the size of a completed page.
    ///
    /// A page shorter than `limit` means the start of history was reached.
    pub fn record_page(&mut self, returned: usize, limit: u32) {
        if returned < limit as usize {
            self.has_more = false;
        }
    }
}

/// Converts a newest-first server page into ascending order.
pub fn into_ascending(mut page: Vec<Message>) -> Vec<Message> {
    page.reverse();
    let sorted = page
        .windows(2)
        .all(|pair| pair[0].sort_key() <= pair[1].sort_key());
    if !sorted {
        warn!(len = page.len(), "history page was not in descending order");
        page.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    }
    page
}

/// History fetcher backed by the HTTP API (`GET /messages/{channel_id}`).
///
/// The bearer token travels in the `Authorization` header.
#[derive(Debug, Clone)]
pub struct HttpHistoryFetcher {
    client: reqwest::Client,
    base_url: Url,
    credentials: Credentials,
}

impl HttpHistoryFetcher {
    /// Creates a fetcher for the API at `config.api_base_url`.
    pub fn new(config: &ClientConfig, credentials: Credentials) -> SyncResult<Self> {
        let mut base_url = Url::parse(&config.api_base_url).map_err(|e| {
            SyncError::transport_fatal(format!(
                "invalid API base URL {:?}: {e}",
                config.api_base_url
            ))
        })?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SyncError::transport_fatal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            credentials,
        })
    }

    /// Returns the API base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

#[async_trait]
impl HistoryFetcher for HttpHistoryFetcher {
    async fn fetch_page(
        &self,
        channel_id: ChannelId,
        before: Option<&MessageId>,
        limit: u32,
    ) -> SyncResult<Vec<Message>> {
        let query = HistoryQuery::latest(channel_id)
            .with_before(before.cloned())
            .with_limit(limit);
        let url = self
            .base_url
            .join(&query.path())
            .map_err(|e| SyncError::transport_fatal(format!("invalid history URL: {e}")))?;

        let response = self
            .client
            .get(url)
            .header(reqwest::header::AUTHORIZATION, self.credentials.token())
            .query(&query.query_pairs())
            .send()
            .await
            .map_err(map_request_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Http {
                status: status.as_u16(),
                message: body.trim().to_string(),
            });
        }

        let page: Vec<Message> = response
            .json()
            .await
            .map_err(|e| SyncError::Protocol(format!("failed to decode history page: {e}")))?;

        debug!(%channel_id, before = ?query.before, returned = page.len(), "fetched history page");
        Ok(into_ascending(page))
    }
}

fn map_request_error(err: reqwest::Error) -> SyncError {
    if err.is_timeout() {
        SyncError::Timeout
    } else {
        SyncError::transport_retryable(format!("history request failed: {err}"))
    }
}

/// An in-memory message archive that answers like the history endpoint.
///
/// Useful for tests and offline demos. Failures can be injected with
/// [`MemoryHistory::fail_next`].
#[derive(Debug, Default)]
pub struct MemoryHistory {
    channels: RwLock<HashMap<ChannelId, Vec<Message>>>,
    failures: Mutex<u32>,
    requests: Mutex<Vec<HistoryQuery>>,
}

impl MemoryHistory {
    /// Creates an empty archive.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a message.
    pub fn insert(&self, message: Message) {
        let mut channels = self.channels.write();
        let messages = channels.entry(message.channel_id).or_default();
        messages.retain(|m| m.id != message.id);
        let key = message.sort_key();
        let at = messages.partition_point(|m| m.sort_key() < key);
        messages.insert(at, message);
    }

    /// Stores several messages.
    pub fn extend(&self, messages: impl IntoIterator<Item = Message>) {
        for message in messages {
            self.insert(message);
        }
    }

    /// Makes the next `count` requests fail with a retryable transport error.
    pub fn fail_next(&self, count: u32) {
        *self.failures.lock() = count;
    }

    /// Returns every query served so far, in order.
    pub fn requests(&self) -> Vec<HistoryQuery> {
        self.requests.lock().clone()
    }

    /// Returns the full history of a channel, ascending.
    pub fn channel(&self, channel_id: ChannelId) -> Vec<Message> {
        self.channels
            .read()
            .get(&channel_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Builds a newest-first page, as the server would.
    fn server_page(&self, query: &HistoryQuery) -> Vec<Message> {
        let channels = self.channels.read();
        let Some(messages) = channels.get(&query.channel_id) else {
            return Vec::new();
        };
        messages
            .iter()
            .rev()
            .filter(|m| query.before.as_ref().map_or(true, |before| &m.id < before))
            .take(query.limit as usize)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl HistoryFetcher for MemoryHistory {
    async fn fetch_page(
        &self,
        channel_id: ChannelId,
        before: Option<&MessageId>,
        limit: u32,
    ) -> SyncResult<Vec<Message>> {
        let query = HistoryQuery::latest(channel_id)
            .with_before(before.cloned())
            .with_limit(limit.min(MAX_PAGE_LIMIT));
        self.requests.lock().push(query.clone());

        {
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(SyncError::transport_retryable("injected failure"));
            }
        }

        Ok(into_ascending(self.server_page(&query)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use minicord_protocol::UserId;

    fn msg(channel: u64, id: u64) -> Message {
        Message {
            id: MessageId::from(id),
            channel_id: ChannelId(channel),
            server_id: None,
            user_id: UserId(1),
            user_name: String::new(),
            content: format!("#{id}"),
            created_at: Utc.timestamp_opt(1_700_000_000 + id as i64, 0).unwrap(),
        }
    }

    fn ids(page: &[Message]) -> Vec<u64> {
        page.iter().map(|m| m.id.as_str().parse().unwrap()).collect()
    }

    #[test]
    fn cursor_has_more_is_sticky() {
        let mut cursor = PaginationCursor::new(ChannelId(7));
        assert!(cursor.has_more);

        cursor.record_page(50, 50);
        assert!(cursor.has_more);

        cursor.record_page(49, 50);
        assert!(!cursor.has_more);

        cursor.record_page(50, 50);
        assert!(!cursor.has_more);
    }

    #[test]
    fn into_ascending_reverses_server_order() {
        let page = vec![msg(7, 3), msg(7, 2), msg(7, 1)];
        assert_eq!(ids(&into_ascending(page)), vec![1, 2, 3]);

        let shuffled = vec![msg(7, 2), msg(7, 3), msg(7, 1)];
        assert_eq!(ids(&into_ascending(shuffled)), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn memory_history_pages_backwards() {
        let history = MemoryHistory::new();
        history.extend((1..=5).map(|id| msg(7, id)));
        history.insert(msg(8, 100));

        let latest = history.fetch_page(ChannelId(7), None, 2).await.unwrap();
        assert_eq!(ids(&latest), vec![4, 5]);

        let older = history
            .fetch_page(ChannelId(7), Some(&MessageId::from(4)), 2)
            .await
            .unwrap();
        assert_eq!(ids(&older), vec![2, 3]);

        let rest = history
            .fetch_page(ChannelId(7), Some(&MessageId::from(2)), 2)
            .await
            .unwrap();
        assert_eq!(ids(&rest), vec![1]);

        assert!(history
            .fetch_page(ChannelId(9), None, 2)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(history.requests().len(), 4);
    }

    #[tokio::test]
    async fn memory_history_injected_failures() {
        let history = MemoryHistory::new();
        history.insert(msg(7, 1));
        history.fail_next(1);

        let err = history.fetch_page(ChannelId(7), None, 10).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(history.fetch_page(ChannelId(7), None, 10).await.unwrap().len(), 1);
    }

    #[test]
    fn http_fetcher_normalizes_base_url() {
        let config = ClientConfig::default().with_page_limit(10);
        let config = ClientConfig {
            api_base_url: "http://localhost:8080/api".into(),
            ..config
        };
        let fetcher = HttpHistoryFetcher::new(&config, Credentials::new("t")).unwrap();
        assert_eq!(fetcher.base_url().as_str(), "http://localhost:8080/api/");

        let bad = ClientConfig {
            api_base_url: "not a url".into(),
            ..ClientConfig::default()
        };
        assert!(HttpHistoryFetcher::new(&bad, Credentials::new("t")).is_err());
    }
}
