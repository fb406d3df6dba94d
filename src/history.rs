//! Bounded in-memory notification history.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::core::{CircularBuffer, NotificationMessage};
use crate::dispatch::EventSink;

pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// Keeps the most recent notifications, evicting the oldest once full.
///
/// Attach it to an [`EventDispatcher`](crate::dispatch::EventDispatcher) to record every
/// delivered message. Persistence is left to the owner; `snapshot` hands out copies.
#[derive(Debug)]
pub struct MessageLog {
    entries: Mutex<CircularBuffer<NotificationMessage>>,
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl MessageLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(CircularBuffer::new(capacity)),
        }
    }

    pub fn record(&self, message: NotificationMessage) {
        self.entries().push(message);
    }

    /// Newest first.
    pub fn snapshot(&self) -> Vec<NotificationMessage> {
        self.entries().iter().rev().cloned().collect()
    }

    pub fn latest(&self) -> Option<NotificationMessage> {
        self.entries().back().cloned()
    }

    pub fn clear(&self) {
        self.entries().clear();
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries().capacity()
    }

    fn entries(&self) -> MutexGuard<'_, CircularBuffer<NotificationMessage>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventSink for MessageLog {
    fn on_message(&self, message: &NotificationMessage) {
        self.record(message.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn message(id: i64) -> NotificationMessage {
        NotificationMessage::new(id, 1, format!("t{id}"), "", 0, Utc::now())
    }

    #[test]
    fn keeps_newest_first_and_evicts_oldest() {
        let log = MessageLog::new(3);
        for id in 1..=5 {
            log.record(message(id));
        }
        let ids: Vec<i64> = log.snapshot().iter().map(NotificationMessage::id).collect();
        assert_eq!(ids, vec![5, 4, 3]);
        assert_eq!(log.len(), 3);
        assert_eq!(log.latest().map(|m| m.id()), Some(5));
    }

    #[test]
    fn clear_empties_the_log() {
        let log = MessageLog::default();
        assert_eq!(log.capacity(), DEFAULT_HISTORY_CAPACITY);
        log.on_message(&message(1));
        assert!(!log.is_empty());
        log.clear();
        assert!(log.is_empty());
        assert!(log.snapshot().is_empty());
    }
}
