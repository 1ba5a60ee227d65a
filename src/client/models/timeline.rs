use std::collections::HashSet;

use crate::common::{Message, MessageId};

/// Messages of one conversation, ordered by `created_at` and unique by id.
///
/// Two sources feed it: the REST history snapshot (`replace`) and live
/// deliveries (`insert`). A live message that arrives while a history request
/// is in flight survives the snapshot even if the server did not include it.
#[derive(Debug, Default, Clone)]
pub struct Timeline {
    messages: Vec<Message>,
    ids: HashSet<MessageId>,
    // ids delivered live since the last snapshot
    live: HashSet<MessageId>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a live message. Returns false if the id is already present.
    pub fn insert(&mut self, message: Message) -> bool {
        if !self.ids.insert(message.id) {
            return false;
        }
        self.live.insert(message.id);
        self.place(message);
        true
    }

    /// Replaces the content with a server snapshot.
    pub fn replace(&mut self, mut snapshot: Vec<Message>) {
        snapshot.sort_by_key(|m| m.created_at);
        let live = std::mem::take(&mut self.live);
        let carried: Vec<Message> = self.messages.drain(..).filter(|m| live.contains(&m.id)).collect();
        self.ids.clear();
        for message in snapshot {
            if self.ids.insert(message.id) {
                self.messages.push(message);
            }
        }
        for message in carried {
            if self.ids.insert(message.id) {
                self.place(message);
            }
        }
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.ids.clear();
        self.live.clear();
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.ids.contains(&id)
    }

    // after every message with an equal or earlier timestamp
    fn place(&mut self, message: Message) {
        let at = self.messages.partition_point(|m| m.created_at <= message.created_at);
        self.messages.insert(at, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Role;
    use chrono::{Duration, TimeZone, Utc};

    fn msg(id: MessageId, minute: i64) -> Message {
        Message {
            id,
            teacher_id: 3,
            student_id: 7,
            sent_by: if id % 2 == 0 { Role::Teacher } else { Role::Student },
            content: format!("message {}", id),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap() + Duration::minutes(minute),
        }
    }

    fn ids(timeline: &Timeline) -> Vec<MessageId> {
        timeline.messages().iter().map(|m| m.id).collect()
    }

    #[test]
    fn replace_sorts_snapshot() {
        let mut timeline = Timeline::new();
        timeline.replace(vec![msg(3, 30), msg(1, 10), msg(2, 20)]);
        assert_eq!(ids(&timeline), vec![1, 2, 3]);
    }

    #[test]
    fn live_messages_append_in_time_order() {
        let mut timeline = Timeline::new();
        timeline.replace(vec![msg(1, 10), msg(2, 20)]);
        for (id, minute) in [(3, 30), (4, 40), (5, 40), (6, 50)] {
            assert!(timeline.insert(msg(id, minute)));
        }
        assert_eq!(ids(&timeline), vec![1, 2, 3, 4, 5, 6]);
        assert!(timeline
            .messages()
            .windows(2)
            .all(|w| w[0].created_at <= w[1].created_at));
    }

    #[test]
    fn late_delivery_is_placed_by_timestamp() {
        let mut timeline = Timeline::new();
        timeline.insert(msg(1, 10));
        timeline.insert(msg(3, 30));
        timeline.insert(msg(2, 20));
        assert_eq!(ids(&timeline), vec![1, 2, 3]);
    }

    #[test]
    fn duplicates_are_dropped() {
        let mut timeline = Timeline::new();
        timeline.replace(vec![msg(1, 10), msg(1, 10)]);
        assert!(!timeline.insert(msg(1, 10)));
        assert_eq!(timeline.len(), 1);
    }

    #[test]
    fn live_message_survives_snapshot_that_missed_it() {
        let mut timeline = Timeline::new();
        timeline.insert(msg(5, 50));
        timeline.replace(vec![msg(1, 10), msg(2, 20)]);
        assert_eq!(ids(&timeline), vec![1, 2, 5]);

        // the next snapshot no longer carries it over
        timeline.replace(vec![msg(1, 10)]);
        assert_eq!(ids(&timeline), vec![1]);
    }

    #[test]
    fn only_deliveries_since_last_snapshot_are_carried() {
        let mut timeline = Timeline::new();
        timeline.insert(msg(2, 20));
        timeline.replace(vec![msg(1, 10), msg(2, 20)]);
        assert!(timeline.live.is_empty());

        timeline.insert(msg(3, 30));
        timeline.insert(msg(4, 40));
        assert_eq!(timeline.live.len(), 2);
        assert_eq!(timeline.len(), 4);

        timeline.replace(vec![msg(1, 10), msg(2, 20), msg(3, 30)]);
        assert_eq!(ids(&timeline), vec![1, 2, 3, 4]);
        assert!(timeline.live.is_empty());
    }

    #[test]
    fn snapshot_containing_live_message_keeps_one_copy() {
        let mut timeline = Timeline::new();
        timeline.insert(msg(2, 20));
        timeline.replace(vec![msg(1, 10), msg(2, 20)]);
        assert_eq!(ids(&timeline), vec![1, 2]);
    }
}
