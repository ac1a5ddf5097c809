//! Channel synchronization coordinator.
//!
//! The coordinator owns the session of the active channel and is the only
//! writer of its [`MessageStore`]. Two independent sources feed the store:
//!
//! - live frames from the push connection, appended at the tail
//! - history pages fetched on demand, merged at the head
//!
//! # Session lifecycle
//!
//! ```text
//! Idle ──activate──► Loading ──initial page──► Ready ──load_older──► Ready
//!   ▲                   │                        │
//!   └────deactivate─────┴────────────────────────┘
//! ```
//!
//! Frames that arrive while `Loading` are buffered and applied right after the
//! initial page seeds the store, so nothing received during the first fetch
//! is lost. The buffer holds at most 1000 frames; past that the oldest are
//! dropped and left for backward paging to recover.
//!
//! # Stale results
//!
//! Every session carries an epoch. A fetch records `(channel, epoch)` when it
//! starts and re-checks it when it completes; if the active session changed in
//! between, the result is discarded without touching the store or the cursor.

use crate::anchor::{self, Viewport};
use crate::config::ClientConfig;
use crate::connection::{ConnectionEvent, ConnectionHandle, EventKind, Subscription};
use crate::error::{SyncError, SyncResult};
use crate::history::{HistoryFetcher, PaginationCursor};
use crate::store::MessageStore;
use minicord_protocol::{
    decode_inbound, ChannelId, Message, OutboundFrame, ServerId, MAX_PAGE_LIMIT,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

/// Phase of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// No channel is active.
    Idle,
    /// A channel is active and its initial page has not been applied yet.
    Loading,
    /// The store is seeded; live frames and older pages are applied.
    Ready,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Loading => "loading",
            SyncPhase::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// The channel a session is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelRef {
    /// Server owning the channel.
    pub server_id: ServerId,
    /// The channel.
    pub channel_id: ChannelId,
}

impl ChannelRef {
    /// Creates a channel reference.
    pub fn new(server_id: ServerId, channel_id: ChannelId) -> Self {
        Self {
            server_id,
            channel_id,
        }
    }
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.server_id, self.channel_id)
    }
}

/// Why a page request did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No channel is active.
    Idle,
    /// The initial page has not been applied yet.
    NotReady,
    /// The initial page is already applied.
    AlreadyLoaded,
    /// The start of history was reached.
    Exhausted,
    /// Another page request is outstanding.
    InFlight,
}

/// Result of a page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    /// A page was applied.
    Loaded {
        /// Messages returned by the server.
        count: usize,
        /// Whether older history may exist.
        has_more: bool,
    },
    /// No request was issued.
    Skipped(SkipReason),
    /// The result arrived after the session changed and was dropped.
    Discarded,
}

/// Change notifications for the active session.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The initial page was applied.
    Seeded {
        /// Active channel.
        channel_id: ChannelId,
        /// Messages in the store afterwards.
        count: usize,
    },
    /// A live message was inserted.
    Appended {
        /// Active channel.
        channel_id: ChannelId,
        /// The inserted message.
        message: Message,
    },
    /// An older page was merged at the head.
    MergedOlder {
        /// Active channel.
        channel_id: ChannelId,
        /// Messages inserted.
        inserted: usize,
    },
    /// The start of history was reached.
    Exhausted {
        /// Active channel.
        channel_id: ChannelId,
    },
    /// The session ended.
    Deactivated {
        /// Channel that was active.
        channel_id: ChannelId,
    },
}

/// Live frames kept while the initial page is outstanding.
const PENDING_LIVE_LIMIT: usize = 1_000;

struct Session {
    channel: ChannelRef,
    epoch: u64,
    ready: bool,
    store: MessageStore,
    cursor: PaginationCursor,
    page_request_in_flight: bool,
    pending_live: VecDeque<Message>,
    _frames: Option<Subscription>,
}

impl Session {
    fn new(channel: ChannelRef, epoch: u64, frames: Option<Subscription>) -> Self {
        Self {
            channel,
            epoch,
            ready: false,
            store: MessageStore::new(),
            cursor: PaginationCursor::new(channel.channel_id),
            page_request_in_flight: false,
            pending_live: VecDeque::new(),
            _frames: frames,
        }
    }

    fn is_current(&self, channel_id: ChannelId, epoch: u64) -> bool {
        self.channel.channel_id == channel_id && self.epoch == epoch
    }
}

fn current_session(
    slot: &mut Option<Session>,
    channel_id: ChannelId,
    epoch: u64,
) -> SyncResult<&mut Session> {
    match slot {
        Some(session) if session.is_current(channel_id, epoch) => Ok(session),
        _ => Err(SyncError::StaleResult { channel_id }),
    }
}

struct Inner {
    config: ClientConfig,
    fetcher: Arc<dyn HistoryFetcher>,
    connection: Option<ConnectionHandle>,
    session: Mutex<Option<Session>>,
    epochs: AtomicU64,
    events: broadcast::Sender<SyncEvent>,
}

impl Inner {
    /// Page size within the server's bounds, even for hand-built configs.
    fn page_limit(&self) -> u32 {
        self.config.page_limit.clamp(1, MAX_PAGE_LIMIT)
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Applies a decoded live frame.
    fn ingest(&self, message: Message) {
        let mut slot = self.session.lock();
        let Some(session) = slot.as_mut() else {
            trace!(id = %message.id, "no active channel; dropping frame");
            return;
        };
        if message.channel_id != session.channel.channel_id {
            trace!(
                id = %message.id,
                channel_id = %message.channel_id,
                "frame for inactive channel"
            );
            return;
        }

        if !session.ready {
            if session.pending_live.len() >= PENDING_LIVE_LIMIT {
                // The oldest frames stay reachable through backward paging.
                if let Some(dropped) = session.pending_live.pop_front() {
                    debug!(id = %dropped.id, "live buffer full; dropping oldest frame");
                }
            }
            session.pending_live.push_back(message);
            return;
        }
        if session.store.append(message.clone()) {
            self.emit(SyncEvent::Appended {
                channel_id: session.channel.channel_id,
                message,
            });
        } else {
            trace!(id = %message.id, "duplicate frame ignored");
        }
    }

    fn retire(&self, session: Session) {
        let channel_id = session.channel.channel_id;
        info!(%channel_id, "channel deactivated");
        self.emit(SyncEvent::Deactivated { channel_id });
        // Drops the frame subscription.
        drop(session);
    }
}

/// Clears the in-flight flag if a fetch future is dropped mid-request.
struct InFlightGuard<'a> {
    inner: &'a Inner,
    channel_id: ChannelId,
    epoch: u64,
    armed: bool,
}

impl<'a> InFlightGuard<'a> {
    fn new(inner: &'a Inner, channel_id: ChannelId, epoch: u64) -> Self {
        Self {
            inner,
            channel_id,
            epoch,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut slot = self.inner.session.lock();
        if let Ok(session) = current_session(&mut slot, self.channel_id, self.epoch) {
            session.page_request_in_flight = false;
        }
    }
}

/// Keeps the active channel's message list consistent across live frames,
/// history pages and channel switches.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<Inner>,
}

impl fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("phase", &self.phase())
            .field("channel", &self.active_channel())
            .finish_non_exhaustive()
    }
}

impl SyncCoordinator {
    /// Creates a coordinator fed by `connection` and `fetcher`.
    pub fn new(
        config: ClientConfig,
        fetcher: Arc<dyn HistoryFetcher>,
        connection: ConnectionHandle,
    ) -> Self {
        Self::build(config, fetcher, Some(connection))
    }

    /// Creates a coordinator without a push connection.
    ///
    /// Live messages can still be applied with [`ingest_frame`](Self::ingest_frame).
    pub fn detached(config: ClientConfig, fetcher: Arc<dyn HistoryFetcher>) -> Self {
        Self::build(config, fetcher, None)
    }

    fn build(
        config: ClientConfig,
        fetcher: Arc<dyn HistoryFetcher>,
        connection: Option<ConnectionHandle>,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                config,
                fetcher,
                connection,
                session: Mutex::new(None),
                epochs: AtomicU64::new(0),
                events,
            }),
        }
    }

    /// Subscribes to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// Returns the push connection, if any.
    pub fn connection(&self) -> Option<&ConnectionHandle> {
        self.inner.connection.as_ref()
    }

    /// Makes `channel` the active channel and loads its most recent page.
    ///
    /// Any previous session ends first; its outstanding requests become stale.
    /// On failure the session stays in [`SyncPhase::Loading`] and
    /// [`reload`](Self::reload) retries.
    pub async fn activate(&self, channel: ChannelRef) -> SyncResult<PageOutcome> {
        let epoch = self.inner.epochs.fetch_add(1, Ordering::SeqCst) + 1;
        let frames = self.subscribe_frames();
        let previous = self
            .inner
            .session
            .lock()
            .replace(Session::new(channel, epoch, frames));
        if let Some(previous) = previous {
            self.inner.retire(previous);
        }

        info!(%channel, epoch, "channel activated");
        self.load_initial(channel.channel_id, epoch).await
    }

    /// Retries the initial page of a session whose first load failed.
    pub async fn reload(&self) -> SyncResult<PageOutcome> {
        let (channel_id, epoch) = {
            let mut slot = self.inner.session.lock();
            let Some(session) = slot.as_mut() else {
                return Ok(PageOutcome::Skipped(SkipReason::Idle));
            };
            if session.ready {
                return Ok(PageOutcome::Skipped(SkipReason::AlreadyLoaded));
            }
            if session.page_request_in_flight {
                return Ok(PageOutcome::Skipped(SkipReason::InFlight));
            }
            (session.channel.channel_id, session.epoch)
        };
        self.load_initial(channel_id, epoch).await
    }

    /// Ends the active session, if any.
    pub fn deactivate(&self) {
        let previous = self.inner.session.lock().take();
        if let Some(previous) = previous {
            self.inner.retire(previous);
        }
    }

    async fn load_initial(&self, channel_id: ChannelId, epoch: u64) -> SyncResult<PageOutcome> {
        let limit = self.inner.page_limit();
        {
            let mut slot = self.inner.session.lock();
            match current_session(&mut slot, channel_id, epoch) {
                Ok(session) => session.page_request_in_flight = true,
                Err(_) => return Ok(PageOutcome::Discarded),
            }
        }

        let mut guard = InFlightGuard::new(&self.inner, channel_id, epoch);
        debug!(%channel_id, limit, "requesting initial page");
        let fetched = self.inner.fetcher.fetch_page(channel_id, None, limit).await;
        guard.disarm();

        let mut slot = self.inner.session.lock();
        let session = match current_session(&mut slot, channel_id, epoch) {
            Ok(session) => session,
            Err(err) => {
                debug!(error = %err, "discarding initial page");
                return Ok(PageOutcome::Discarded);
            }
        };
        session.page_request_in_flight = false;

        let page = match fetched {
            Ok(page) => page,
            Err(err) => {
                warn!(%channel_id, error = %err, "initial page request failed");
                return Err(err);
            }
        };

        let count = page.len();
        session.cursor.record_page(count, limit);
        session.store.seed(page);
        let buffered = std::mem::take(&mut session.pending_live);
        let buffered_count = buffered.len();
        for message in buffered {
            session.store.append(message);
        }
        session.cursor.oldest_loaded_id = session.store.oldest().map(|m| m.id.clone());
        session.ready = true;

        let has_more = session.cursor.has_more;
        info!(%channel_id, count, buffered = buffered_count, has_more, "channel seeded");
        self.inner.emit(SyncEvent::Seeded {
            channel_id,
            count: session.store.len(),
        });
        if !has_more {
            self.inner.emit(SyncEvent::Exhausted { channel_id });
        }
        Ok(PageOutcome::Loaded { count, has_more })
    }

    /// Loads the page of messages older than the oldest loaded one and merges
    /// it at the head, keeping `viewport` anchored on what the reader sees.
    ///
    /// At most one page request is in flight per session; extra triggers are
    /// skipped, as are triggers before the initial page or after the start of
    /// history. A failed request leaves the cursor unchanged so the next
    /// trigger retries it.
    pub async fn load_older<V>(&self, viewport: &mut V) -> SyncResult<PageOutcome>
    where
        V: Viewport + ?Sized,
    {
        let limit = self.inner.page_limit();
        let (channel_id, epoch, before) = {
            let mut slot = self.inner.session.lock();
            let Some(session) = slot.as_mut() else {
                return Ok(PageOutcome::Skipped(SkipReason::Idle));
            };
            if !session.ready {
                return Ok(PageOutcome::Skipped(SkipReason::NotReady));
            }
            if !session.cursor.has_more {
                return Ok(PageOutcome::Skipped(SkipReason::Exhausted));
            }
            if session.page_request_in_flight {
                return Ok(PageOutcome::Skipped(SkipReason::InFlight));
            }
            session.page_request_in_flight = true;
            (
                session.channel.channel_id,
                session.epoch,
                session.cursor.oldest_loaded_id.clone(),
            )
        };

        let mut guard = InFlightGuard::new(&self.inner, channel_id, epoch);
        debug!(%channel_id, before = ?before, limit, "requesting older page");
        let fetched = self
            .inner
            .fetcher
            .fetch_page(channel_id, before.as_ref(), limit)
            .await;
        guard.disarm();

        // Captured immediately before the merge, so scrolling during the
        // request is honored.
        let anchor = viewport
            .topmost_visible()
            .map(|id| anchor::capture(id, viewport.metrics()));

        let (count, has_more, snapshot) = {
            let mut slot = self.inner.session.lock();
            let session = match current_session(&mut slot, channel_id, epoch) {
                Ok(session) => session,
                Err(err) => {
                    debug!(error = %err, "discarding older page");
                    return Ok(PageOutcome::Discarded);
                }
            };
            session.page_request_in_flight = false;

            let page = match fetched {
                Ok(page) => page,
                Err(err) => {
                    warn!(%channel_id, error = %err, "older page request failed");
                    return Err(err);
                }
            };

            let count = page.len();
            session.cursor.record_page(count, limit);
            let has_more = session.cursor.has_more;

            let snapshot = if count > 0 {
                let inserted = session.store.merge_older(page);
                session.cursor.oldest_loaded_id = session.store.oldest().map(|m| m.id.clone());
                debug!(%channel_id, count, inserted, has_more, "merged older page");
                self.inner.emit(SyncEvent::MergedOlder {
                    channel_id,
                    inserted,
                });
                Some(session.store.all().to_vec())
            } else {
                None
            };
            if !has_more {
                info!(%channel_id, "reached start of channel history");
                self.inner.emit(SyncEvent::Exhausted { channel_id });
            }
            (count, has_more, snapshot)
        };

        if let Some(messages) = snapshot {
            let metrics = viewport.relayout(&messages);
            if let Some(record) = anchor {
                viewport.scroll_to(&anchor::restore(&record, metrics));
            }
        }

        Ok(PageOutcome::Loaded { count, has_more })
    }

    /// Decodes a push frame and applies it to the active session.
    ///
    /// Malformed frames are dropped with a warning.
    pub fn ingest_frame(&self, text: &str) {
        match decode_inbound(text) {
            Ok(message) => self.inner.ingest(message),
            Err(err) => warn!(error = %err, len = text.len(), "dropping unparseable frame"),
        }
    }

    /// Applies an already decoded live message.
    pub fn ingest(&self, message: Message) {
        self.inner.ingest(message);
    }

    fn subscribe_frames(&self) -> Option<Subscription> {
        let connection = self.inner.connection.as_ref()?;
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        Some(connection.on(EventKind::Message, move |event| {
            let ConnectionEvent::Message(text) = event else {
                return Ok(());
            };
            let Some(inner) = inner.upgrade() else {
                return Ok(());
            };
            match decode_inbound(text) {
                Ok(message) => inner.ingest(message),
                Err(err) => warn!(error = %err, len = text.len(), "dropping unparseable frame"),
            }
            Ok(())
        }))
    }

    /// Sends `content` to the active channel.
    pub async fn send(&self, content: &str) -> SyncResult<()> {
        let channel = self
            .active_channel()
            .ok_or_else(|| SyncError::InvalidStateTransition {
                from: SyncPhase::Idle.to_string(),
                to: "send".into(),
            })?;
        let connection = self.inner.connection.as_ref().ok_or(SyncError::NotConnected)?;
        let frame = OutboundFrame::new(content, channel.channel_id, channel.server_id)?;
        connection.send_frame(&frame).await
    }

    /// Returns the current phase.
    pub fn phase(&self) -> SyncPhase {
        match self.inner.session.lock().as_ref() {
            None => SyncPhase::Idle,
            Some(session) if session.ready => SyncPhase::Ready,
            Some(_) => SyncPhase::Loading,
        }
    }

    /// Returns the active channel.
    pub fn active_channel(&self) -> Option<ChannelRef> {
        self.inner.session.lock().as_ref().map(|s| s.channel)
    }

    /// Returns a snapshot of the active channel's messages, ascending.
    pub fn messages(&self) -> Vec<Message> {
        self.inner
            .session
            .lock()
            .as_ref()
            .map(|s| s.store.all().to_vec())
            .unwrap_or_default()
    }

    /// Returns the number of loaded messages.
    pub fn len(&self) -> usize {
        self.inner
            .session
            .lock()
            .as_ref()
            .map_or(0, |s| s.store.len())
    }

    /// Returns true if no messages are loaded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the pagination cursor of the active session.
    pub fn cursor(&self) -> Option<PaginationCursor> {
        self.inner.session.lock().as_ref().map(|s| s.cursor.clone())
    }

    /// Returns whether older history may exist for the active channel.
    pub fn has_more(&self) -> bool {
        self.inner
            .session
            .lock()
            .as_ref()
            .is_some_and(|s| s.cursor.has_more)
    }

    /// Returns whether a page request is outstanding.
    pub fn is_page_request_in_flight(&self) -> bool {
        self.inner
            .session
            .lock()
            .as_ref()
            .is_some_and(|s| s.page_request_in_flight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::DetachedViewport;
    use crate::history::MemoryHistory;
    use chrono::{TimeZone, Utc};
    use minicord_protocol::{encode_inbound, MessageId, UserId};

    fn msg(channel: u64, id: u64) -> Message {
        Message {
            id: MessageId::from(id),
            channel_id: ChannelId(channel),
            server_id: Some(ServerId(1)),
            user_id: UserId(2),
            user_name: "ana".into(),
            content: format!("#{id}"),
            created_at: Utc.timestamp_opt(1_700_000_000 + id as i64, 0).unwrap(),
        }
    }

    fn channel(id: u64) -> ChannelRef {
        ChannelRef::new(ServerId(1), ChannelId(id))
    }

    fn coordinator(history: &Arc<MemoryHistory>, limit: u32) -> SyncCoordinator {
        let config = ClientConfig::default().with_page_limit(limit);
        SyncCoordinator::detached(config, history.clone())
    }

    fn ids(coordinator: &SyncCoordinator) -> Vec<u64> {
        coordinator
            .messages()
            .iter()
            .map(|m| m.id.as_str().parse().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn activate_seeds_latest_page() {
        let history = Arc::new(MemoryHistory::new());
        history.extend((1..=120).map(|id| msg(7, id)));
        let sync = coordinator(&history, 50);
        assert_eq!(sync.phase(), SyncPhase::Idle);

        let outcome = sync.activate(channel(7)).await.unwrap();
        assert_eq!(outcome, PageOutcome::Loaded { count: 50, has_more: true });
        assert_eq!(sync.phase(), SyncPhase::Ready);
        assert_eq!(ids(&sync), (71..=120).collect::<Vec<_>>());
        assert_eq!(
            sync.cursor().unwrap().oldest_loaded_id,
            Some(MessageId::from(71))
        );
    }

    #[tokio::test]
    async fn short_initial_page_exhausts_history() {
        let history = Arc::new(MemoryHistory::new());
        history.extend((1..=10).map(|id| msg(7, id)));
        let sync = coordinator(&history, 50);

        sync.activate(channel(7)).await.unwrap();
        assert!(!sync.has_more());
        assert_eq!(
            sync.load_older(&mut DetachedViewport).await.unwrap(),
            PageOutcome::Skipped(SkipReason::Exhausted)
        );
        assert_eq!(history.requests().len(), 1);
    }

    #[tokio::test]
    async fn load_older_before_activation_is_skipped() {
        let history = Arc::new(MemoryHistory::new());
        let sync = coordinator(&history, 50);
        assert_eq!(
            sync.load_older(&mut DetachedViewport).await.unwrap(),
            PageOutcome::Skipped(SkipReason::Idle)
        );
        assert!(history.requests().is_empty());
    }

    #[tokio::test]
    async fn frames_for_other_channels_are_ignored() {
        let history = Arc::new(MemoryHistory::new());
        history.extend((1..=3).map(|id| msg(7, id)));
        let sync = coordinator(&history, 50);
        sync.activate(channel(7)).await.unwrap();

        sync.ingest(msg(8, 4));
        sync.ingest_frame("{not json");
        sync.ingest_frame(&encode_inbound(&msg(7, 5)).unwrap());
        assert_eq!(ids(&sync), vec![1, 2, 3, 5]);
    }

    #[tokio::test]
    async fn failed_initial_load_can_be_retried() {
        let history = Arc::new(MemoryHistory::new());
        history.extend((1..=3).map(|id| msg(7, id)));
        history.fail_next(1);
        let sync = coordinator(&history, 50);

        assert!(sync.activate(channel(7)).await.is_err());
        assert_eq!(sync.phase(), SyncPhase::Loading);
        assert!(!sync.is_page_request_in_flight());

        sync.ingest(msg(7, 4));
        assert!(sync.is_empty());

        let outcome = sync.reload().await.unwrap();
        assert_eq!(outcome, PageOutcome::Loaded { count: 3, has_more: false });
        assert_eq!(ids(&sync), vec![1, 2, 3, 4]);
        assert_eq!(
            sync.reload().await.unwrap(),
            PageOutcome::Skipped(SkipReason::AlreadyLoaded)
        );
    }

    #[tokio::test]
    async fn failed_older_page_keeps_cursor() {
        let history = Arc::new(MemoryHistory::new());
        history.extend((1..=20).map(|id| msg(7, id)));
        let sync = coordinator(&history, 10);
        sync.activate(channel(7)).await.unwrap();

        history.fail_next(1);
        assert!(sync.load_older(&mut DetachedViewport).await.is_err());
        assert!(sync.has_more());
        assert!(!sync.is_page_request_in_flight());
        assert_eq!(
            sync.cursor().unwrap().oldest_loaded_id,
            Some(MessageId::from(11))
        );

        let outcome = sync.load_older(&mut DetachedViewport).await.unwrap();
        assert_eq!(outcome, PageOutcome::Loaded { count: 10, has_more: true });
        assert_eq!(ids(&sync), (1..=20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn events_follow_session_changes() {
        let history = Arc::new(MemoryHistory::new());
        history.extend((1..=2).map(|id| msg(7, id)));
        let sync = coordinator(&history, 50);
        let mut events = sync.subscribe();

        sync.activate(channel(7)).await.unwrap();
        sync.ingest(msg(7, 3));
        sync.ingest(msg(7, 3));
        sync.deactivate();

        assert_eq!(
            events.recv().await.unwrap(),
            SyncEvent::Seeded { channel_id: ChannelId(7), count: 2 }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            SyncEvent::Exhausted { channel_id: ChannelId(7) }
        );
        assert!(matches!(
            events.recv().await.unwrap(),
            SyncEvent::Appended { message, .. } if message.id == MessageId::from(3)
        ));
        assert_eq!(
            events.recv().await.unwrap(),
            SyncEvent::Deactivated { channel_id: ChannelId(7) }
        );
        assert_eq!(sync.phase(), SyncPhase::Idle);
        assert!(sync.messages().is_empty());
    }

    #[tokio::test]
    async fn live_buffer_is_bounded_while_loading() {
        let history = Arc::new(MemoryHistory::new());
        history.fail_next(1);
        let sync = coordinator(&history, 50);
        assert!(sync.activate(channel(7)).await.is_err());

        let total = PENDING_LIVE_LIMIT as u64 + 5;
        for id in 1..=total {
            sync.ingest(msg(7, id));
        }
        let buffered = sync
            .inner
            .session
            .lock()
            .as_ref()
            .map(|s| s.pending_live.len());
        assert_eq!(buffered, Some(PENDING_LIVE_LIMIT));

        sync.reload().await.unwrap();
        assert_eq!(sync.len(), PENDING_LIVE_LIMIT);
        assert_eq!(ids(&sync).first(), Some(&6));
        assert_eq!(ids(&sync).last(), Some(&total));
    }

    #[tokio::test]
    async fn hand_built_config_page_limit_is_clamped() {
        let history = Arc::new(MemoryHistory::new());
        history.extend((1..=250).map(|id| msg(7, id)));
        let config = ClientConfig {
            page_limit: 500,
            ..ClientConfig::default()
        };
        let sync = SyncCoordinator::detached(config, history.clone());

        let outcome = sync.activate(channel(7)).await.unwrap();
        assert_eq!(outcome, PageOutcome::Loaded { count: 100, has_more: true });
        assert_eq!(history.requests()[0].limit, MAX_PAGE_LIMIT);

        let outcome = sync.load_older(&mut DetachedViewport).await.unwrap();
        assert_eq!(outcome, PageOutcome::Loaded { count: 100, has_more: true });
    }

    #[tokio::test]
    async fn send_requires_active_channel() {
        let history = Arc::new(MemoryHistory::new());
        let sync = coordinator(&history, 50);
        assert!(matches!(
            sync.send("hi").await,
            Err(SyncError::InvalidStateTransition { .. })
        ));

        sync.activate(channel(7)).await.unwrap();
        assert!(matches!(sync.send("hi").await, Err(SyncError::NotConnected)));
    }
}
