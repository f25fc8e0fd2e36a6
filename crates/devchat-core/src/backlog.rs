//! Bounded event history.
//!
//! Used both for the dispatcher's shared backlog and for each session's
//! private backlog. Oldest entries are evicted first once `capacity` is
//! reached.

use std::collections::VecDeque;

use crate::event::StampedEvent;

/// Capped, oldest-evicted-first history of accepted events.
#[derive(Debug, Clone)]
pub struct Backlog {
    entries: VecDeque<StampedEvent>,
    capacity: usize,
}

impl Backlog {
    /// Create an empty backlog holding at most `capacity` events.
    ///
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { entries: VecDeque::with_capacity(capacity), capacity }
    }

    /// Append an event, evicting the oldest one if full.
    pub fn push(&mut self, event: StampedEvent) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(event);
    }

    /// Events oldest first.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &StampedEvent> + '_ {
        self.entries.iter()
    }

    /// Number of stored events.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no events are stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every stored event.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use proptest::prelude::*;

    use super::*;
    use crate::event::Event;

    fn chat(text: &str) -> StampedEvent {
        Event::Chat { sender: "alice".to_string(), text: text.to_string() }.stamp(Utc::now())
    }

    #[test]
    fn evicts_oldest_first() {
        let mut backlog = Backlog::new(2);

        backlog.push(chat("a"));
        backlog.push(chat("b"));
        assert_eq!(backlog.len(), 2);
        backlog.push(chat("c"));

        let texts: Vec<String> = backlog.iter().map(StampedEvent::message).collect();
        assert_eq!(texts, vec!["b", "c"]);
    }

    #[test]
    fn zero_capacity_keeps_latest() {
        let mut backlog = Backlog::new(0);
        backlog.push(chat("a"));
        backlog.push(chat("b"));

        assert_eq!(backlog.len(), 1);
        assert_eq!(backlog.iter().next().map(StampedEvent::message), Some("b".to_string()));
    }

    proptest! {
        /// Property: length never exceeds capacity and the tail is preserved
        #[test]
        fn prop_bounded_fifo(capacity in 1usize..32, count in 0usize..128) {
            let mut backlog = Backlog::new(capacity);
            for i in 0..count {
                backlog.push(chat(&i.to_string()));
                prop_assert!(backlog.len() <= capacity);
            }

            let expected: Vec<String> =
                (count.saturating_sub(capacity)..count).map(|i| i.to_string()).collect();
            let actual: Vec<String> = backlog.iter().map(StampedEvent::message).collect();
            prop_assert_eq!(actual, expected);
        }
    }
}
