//! Ordered, duplicate-free message store for the active channel.
//!
//! The live push channel and the paginated history fetch are independent
//! sources with no ordering relationship to each other, so every mutation
//! path re-establishes the store invariants instead of trusting the caller:
//!
//! - messages are strictly ascending by `(created_at, id)`
//! - no two messages share an id

use minicord_protocol::{Message, MessageId};
use std::collections::HashSet;

/// The materialized messages of one channel session.
#[derive(Debug, Default, Clone)]
pub struct MessageStore {
    messages: Vec<Message>,
    ids: HashSet<MessageId>,
}

impl MessageStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the contents with `messages`.
    ///
    /// Duplicate ids keep their first occurrence.
    pub fn seed(&mut self, messages: Vec<Message>) {
        self.messages.clear();
        self.ids.clear();
        self.messages.reserve(messages.len());
        for message in messages {
            if self.ids.insert(message.id.clone()) {
                self.messages.push(message);
            }
        }
        self.sort();
    }

    /// Prepends a page of older messages.
    ///
    /// Pages are expected to be ascending and strictly older than the current
    /// head; anything else (overlap with loaded messages, unsorted input)
    /// falls back to a full merge. Returns the number of messages inserted.
    pub fn merge_older(&mut self, messages: Vec<Message>) -> usize {
        let mut fresh = Vec::with_capacity(messages.len());
        for message in messages {
            if self.ids.insert(message.id.clone()) {
                fresh.push(message);
            }
        }
        let inserted = fresh.len();
        if inserted == 0 {
            return 0;
        }

        let ascending = fresh
            .windows(2)
            .all(|pair| pair[0].sort_key() < pair[1].sort_key());
        let strictly_older = match (fresh.last(), self.messages.first()) {
            (Some(last), Some(head)) => last.sort_key() < head.sort_key(),
            _ => true,
        };

        if ascending && strictly_older {
            fresh.append(&mut self.messages);
            self.messages = fresh;
        } else {
            self.messages.extend(fresh);
            self.sort();
        }
        inserted
    }

    /// Inserts a live message at its ordered position.
    ///
    /// A message whose id is already present is ignored, so re-delivery is
    /// harmless. Returns whether the message was inserted.
    pub fn append(&mut self, message: Message) -> bool {
        if self.ids.contains(&message.id) {
            return false;
        }
        self.ids.insert(message.id.clone());

        let in_order = self
            .messages
            .last()
            .map_or(true, |last| last.sort_key() < message.sort_key());
        if in_order {
            self.messages.push(message);
        } else {
            let key = message.sort_key();
            let at = self.messages.partition_point(|m| m.sort_key() < key);
            self.messages.insert(at, message);
        }
        true
    }

    /// Returns the ordered messages.
    pub fn all(&self) -> &[Message] {
        &self.messages
    }

    /// Returns whether a message with `id` is present.
    pub fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }

    /// Returns the oldest loaded message.
    pub fn oldest(&self) -> Option<&Message> {
        self.messages.first()
    }

    /// Returns the newest loaded message.
    pub fn newest(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Returns the number of messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn sort(&mut self) {
        self.messages
            .sort_unstable_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use minicord_protocol::{ChannelId, UserId};
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn msg(id: u64) -> Message {
        // Timestamps follow ids, like server-assigned values do.
        msg_at(id, id as i64)
    }

    fn msg_at(id: u64, secs: i64) -> Message {
        Message {
            id: MessageId::from(id),
            channel_id: ChannelId(7),
            server_id: None,
            user_id: UserId(1),
            user_name: "ana".into(),
            content: format!("message {id}"),
            created_at: at(secs),
        }
    }

    fn ids(store: &MessageStore) -> Vec<u64> {
        store
            .all()
            .iter()
            .map(|m| m.id.as_str().parse().unwrap())
            .collect()
    }

    #[test]
    fn seed_sorts_and_dedupes() {
        let mut store = MessageStore::new();
        store.seed(vec![msg(3), msg(1), msg(2), msg(1)]);
        assert_eq!(ids(&store), vec![1, 2, 3]);

        store.seed(vec![msg(10)]);
        assert_eq!(ids(&store), vec![10]);
        assert!(!store.contains(&MessageId::from(1)));
    }

    #[test]
    fn merge_older_prepends() {
        let mut store = MessageStore::new();
        store.seed((901..=950).map(msg).collect());
        let inserted = store.merge_older((851..=900).map(msg).collect());
        assert_eq!(inserted, 50);
        assert_eq!(ids(&store), (851..=950).collect::<Vec<_>>());
    }

    #[test]
    fn merge_older_tolerates_overlap() {
        let mut store = MessageStore::new();
        store.seed((5..=8).map(msg).collect());
        let inserted = store.merge_older(vec![msg(6), msg(3), msg(4), msg(5)]);
        assert_eq!(inserted, 2);
        assert_eq!(ids(&store), vec![3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn append_is_idempotent() {
        let mut store = MessageStore::new();
        store.seed(vec![msg(1), msg(2)]);
        assert!(store.append(msg(3)));
        assert!(!store.append(msg(3)));
        assert_eq!(ids(&store), vec![1, 2, 3]);
    }

    #[test]
    fn append_places_late_arrivals_in_order() {
        let mut store = MessageStore::new();
        store.append(msg(5));
        store.append(msg(2));
        store.append(msg(9));
        store.append(msg(4));
        assert_eq!(ids(&store), vec![2, 4, 5, 9]);
        assert_eq!(store.oldest().unwrap().id, MessageId::from(2));
        assert_eq!(store.newest().unwrap().id, MessageId::from(9));
    }

    #[test]
    fn equal_timestamps_order_by_id() {
        let mut store = MessageStore::new();
        store.append(msg_at(12, 0));
        store.append(msg_at(11, 0));
        store.append(msg_at(10, 5));
        assert_eq!(ids(&store), vec![11, 12, 10]);
    }

    #[derive(Debug, Clone)]
    enum Op {
        MergeOlder(Vec<u64>),
        Append(u64),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            prop::collection::vec(0u64..200, 0..20).prop_map(|mut ids| {
                ids.sort_unstable();
                Op::MergeOlder(ids)
            }),
            (0u64..200).prop_map(Op::Append),
        ]
    }

    proptest! {
        #[test]
        fn any_interleaving_yields_sorted_union(
            seed in prop::collection::vec(0u64..200, 0..30),
            ops in prop::collection::vec(op_strategy(), 0..40),
        ) {
            let mut store = MessageStore::new();
            let mut expected = BTreeSet::new();

            store.seed(seed.iter().copied().map(msg).collect());
            expected.extend(seed.iter().copied());

            for op in ops {
                match op {
                    Op::MergeOlder(batch) => {
                        expected.extend(batch.iter().copied());
                        store.merge_older(batch.into_iter().map(msg).collect());
                    }
                    Op::Append(id) => {
                        expected.insert(id);
                        store.append(msg(id));
                    }
                }
            }

            prop_assert_eq!(ids(&store), expected.iter().copied().collect::<Vec<_>>());
            prop_assert_eq!(store.len(), expected.len());
        }

        #[test]
        fn duplicate_delivery_changes_nothing(
            seed in prop::collection::vec(0u64..100, 0..20),
            frame in 0u64..100,
        ) {
            let mut once = MessageStore::new();
            once.seed(seed.iter().copied().map(msg).collect());
            once.append(msg(frame));

            let mut twice = once.clone();
            twice.append(msg(frame));

            prop_assert_eq!(once.all(), twice.all());
        }
    }
}
