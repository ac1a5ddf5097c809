//! Scroll anchoring around head insertions.
//!
//! Prepending an older page grows the content above the viewer. Capture
//! records where the viewer is before the merge; restore shifts the scroll
//! offset by the height the merge added, so the anchor message stays at the
//! same visual position:
//!
//! ```text
//! new_scroll_top = new_content_height - old_content_height + original_offset
//! ```
//!
//! Capture must run before `merge_older` and restore right after it.

use minicord_protocol::{Message, MessageId};

/// Geometry of the scrollable message container.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ContainerMetrics {
    /// Distance scrolled from the top of the content.
    pub scroll_top: f64,
    /// Total height of the rendered content.
    pub content_height: f64,
    /// Height of the visible area.
    pub viewport_height: f64,
}

impl ContainerMetrics {
    /// Largest valid scroll offset.
    pub fn max_scroll_top(&self) -> f64 {
        (self.content_height - self.viewport_height).max(0.0)
    }
}

/// Viewer position captured before a head insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrollAnchorRecord {
    /// Topmost visible message at capture time.
    pub anchor_message_id: MessageId,
    /// Scroll offset at capture time.
    pub original_offset: f64,
    /// Content height at capture time.
    pub content_height: f64,
}

/// Scroll position to apply after a head insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrollRestore {
    /// Message that must stay in place.
    pub anchor_message_id: MessageId,
    /// New scroll offset.
    pub scroll_top: f64,
}

/// Records the viewer position before `merge_older`.
pub fn capture(topmost_visible: MessageId, metrics: ContainerMetrics) -> ScrollAnchorRecord {
    ScrollAnchorRecord {
        anchor_message_id: topmost_visible,
        original_offset: metrics.scroll_top,
        content_height: metrics.content_height,
    }
}

/// Computes the scroll offset that keeps the anchor in place.
pub fn restore(record: &ScrollAnchorRecord, metrics: ContainerMetrics) -> ScrollRestore {
    let grown = metrics.content_height - record.content_height;
    let scroll_top = (grown + record.original_offset).clamp(0.0, metrics.max_scroll_top());
    ScrollRestore {
        anchor_message_id: record.anchor_message_id.clone(),
        scroll_top,
    }
}

/// The host's rendered message list.
///
/// Implementations must not call back into the coordinator; they are invoked
/// while a page is being applied.
pub trait Viewport: Send {
    /// Returns the topmost message currently visible, if any.
    fn topmost_visible(&self) -> Option<MessageId>;

    /// Returns the current container geometry.
    fn metrics(&self) -> ContainerMetrics;

    /// Re-renders `messages` and returns the resulting geometry.
    fn relayout(&mut self, messages: &[Message]) -> ContainerMetrics;

    /// Applies a restored scroll position.
    fn scroll_to(&mut self, restore: &ScrollRestore);
}

/// A viewport for headless hosts. Nothing is visible, so nothing is anchored.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedViewport;

impl Viewport for DetachedViewport {
    fn topmost_visible(&self) -> Option<MessageId> {
        None
    }

    fn metrics(&self) -> ContainerMetrics {
        ContainerMetrics::default()
    }

    fn relayout(&mut self, _messages: &[Message]) -> ContainerMetrics {
        ContainerMetrics::default()
    }

    fn scroll_to(&mut self, _restore: &ScrollRestore) {}
}

/// A viewport whose rows all have the same height, as in a terminal list.
#[derive(Debug, Clone)]
pub struct FixedRowViewport {
    rows: Vec<MessageId>,
    row_height: f64,
    viewport_height: f64,
    scroll_top: f64,
}

impl FixedRowViewport {
    /// Creates an empty viewport.
    pub fn new(row_height: f64, viewport_height: f64) -> Self {
        Self {
            rows: Vec::new(),
            row_height: row_height.max(1.0),
            viewport_height,
            scroll_top: 0.0,
        }
    }

    /// Scrolls to an absolute offset, clamped to the content.
    pub fn set_scroll_top(&mut self, scroll_top: f64) {
        self.scroll_top = scroll_top.clamp(0.0, self.metrics().max_scroll_top());
    }

    /// Scrolls so that the last row is visible.
    pub fn scroll_to_bottom(&mut self) {
        self.scroll_top = self.metrics().max_scroll_top();
    }

    /// Returns the current scroll offset.
    pub fn scroll_top(&self) -> f64 {
        self.scroll_top
    }
}

impl Viewport for FixedRowViewport {
    fn topmost_visible(&self) -> Option<MessageId> {
        let row = (self.scroll_top / self.row_height).floor() as usize;
        self.rows.get(row).cloned()
    }

    fn metrics(&self) -> ContainerMetrics {
        ContainerMetrics {
            scroll_top: self.scroll_top,
            content_height: self.rows.len() as f64 * self.row_height,
            viewport_height: self.viewport_height,
        }
    }

    fn relayout(&mut self, messages: &[Message]) -> ContainerMetrics {
        self.rows = messages.iter().map(|m| m.id.clone()).collect();
        self.metrics()
    }

    fn scroll_to(&mut self, restore: &ScrollRestore) {
        self.set_scroll_top(restore.scroll_top);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(scroll_top: f64, content_height: f64) -> ContainerMetrics {
        ContainerMetrics {
            scroll_top,
            content_height,
            viewport_height: 400.0,
        }
    }

    #[test]
    fn restore_shifts_by_added_height() {
        let record = capture(MessageId::from(901), metrics(12.0, 1000.0));
        let restored = restore(&record, metrics(12.0, 2000.0));
        assert_eq!(restored.anchor_message_id, MessageId::from(901));
        assert_eq!(restored.scroll_top, 1012.0);
    }

    #[test]
    fn restore_clamps_to_content() {
        let record = capture(MessageId::from(1), metrics(900.0, 1000.0));
        let restored = restore(&record, metrics(0.0, 1000.0));
        assert_eq!(restored.scroll_top, 600.0);
    }

    #[test]
    fn fixed_rows_report_topmost_message() {
        let mut viewport = FixedRowViewport::new(20.0, 100.0);
        assert_eq!(viewport.topmost_visible(), None);

        let messages: Vec<Message> = Vec::new();
        assert_eq!(viewport.relayout(&messages).content_height, 0.0);

        viewport.rows = (1..=10).map(MessageId::from).collect();
        viewport.set_scroll_top(45.0);
        assert_eq!(viewport.topmost_visible(), Some(MessageId::from(3)));

        viewport.scroll_to_bottom();
        assert_eq!(viewport.scroll_top(), 100.0);
    }

    #[test]
    fn detached_viewport_never_anchors() {
        let mut viewport = DetachedViewport;
        assert_eq!(viewport.topmost_visible(), None);
        assert_eq!(viewport.relayout(&[]), ContainerMetrics::default());
    }
}
