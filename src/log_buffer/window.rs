//! In-memory window over the log file.

use crate::event::{Event, Timestamp};
use std::collections::VecDeque;

/// Events read from the file, in file order, with a delivery cursor.
///
/// Invariant: `cursor <= len()`. Everything before the cursor has been
/// handed to the consumer; it stays around as lookback for cheap seeks.
#[derive(Debug, Default)]
pub struct EventWindow {
    events: VecDeque<Event>,
    cursor: usize,
}

impl EventWindow {
    /// Empty window.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events held.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether nothing is held.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Index of the next event to deliver.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Move the cursor, clamped to the window.
    pub fn set_cursor(&mut self, cursor: usize) {
        self.cursor = cursor.min(self.events.len());
    }

    /// Timestamp of the oldest event held.
    pub fn first_timestamp(&self) -> Option<Timestamp> {
        self.events.front().map(|e| e.time)
    }

    /// Timestamp of the newest event held.
    pub fn last_timestamp(&self) -> Option<Timestamp> {
        self.events.back().map(|e| e.time)
    }

    /// Event at `index`.
    pub fn get(&self, index: usize) -> Option<&Event> {
        self.events.get(index)
    }

    /// Append an event read from the file.
    pub fn push(&mut self, event: Event) {
        self.events.push_back(event);
    }

    /// Next event to deliver, without advancing.
    pub fn peek(&self) -> Option<&Event> {
        self.events.get(self.cursor)
    }

    /// Advance past the event returned by [`peek`](Self::peek).
    pub fn advance(&mut self) {
        if self.cursor < self.events.len() {
            self.cursor += 1;
        }
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.events.clear();
        self.cursor = 0;
    }

    /// Whether `t` lies within the held timestamp range.
    pub fn covers(&self, t: Timestamp) -> bool {
        match (self.first_timestamp(), self.last_timestamp()) {
            (Some(first), Some(last)) => first <= t && t <= last,
            _ => false,
        }
    }

    /// Point the cursor at the first event with `time >= t`.
    ///
    /// Returns false, leaving the cursor alone, if no such event is held.
    pub fn seek_within(&mut self, t: Timestamp) -> bool {
        match self.events.iter().position(|e| e.time >= t) {
            Some(index) => {
                self.cursor = index;
                true
            }
            None => false,
        }
    }

    /// Timestamp `threshold` positions from the end, or the last one when
    /// the window is smaller than that.
    pub fn threshold_timestamp(&self, threshold: usize) -> Option<Timestamp> {
        if threshold > 0 && threshold < self.events.len() {
            self.events.get(self.events.len() - threshold).map(|e| e.time)
        } else {
            self.last_timestamp()
        }
    }

    /// Remove the leading events with `time <= t`; returns how many.
    ///
    /// The cursor moves down by the same count, floored at zero.
    pub fn remove_until(&mut self, t: Timestamp) -> usize {
        let count = self.events.iter().take_while(|e| e.time <= t).count();
        self.events.drain(..count);
        self.cursor = self.cursor.saturating_sub(count);
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Value;

    fn window(times: &[Timestamp]) -> EventWindow {
        let mut w = EventWindow::new();
        for &t in times {
            w.push(Event::new(Value::Long(t), "", "x", t));
        }
        w
    }

    #[test]
    fn first_and_last_follow_the_source() {
        let w = window(&[10, 20, 30, 40]);
        assert_eq!(w.first_timestamp(), Some(10));
        assert_eq!(w.last_timestamp(), Some(40));
        assert_eq!(EventWindow::new().first_timestamp(), None);
    }

    #[test]
    fn remove_until_counts_leading_items() {
        let mut w = window(&[10, 20, 30, 40, 50]);
        w.set_cursor(3);
        assert_eq!(w.remove_until(30), 3);
        assert_eq!(w.len(), 2);
        assert_eq!(w.cursor(), 0);
        assert_eq!(w.first_timestamp(), Some(40));
        assert_eq!(w.remove_until(5), 0);
    }

    #[test]
    fn remove_until_keeps_cursor_on_same_event() {
        let mut w = window(&[1, 2, 3, 4, 5, 6]);
        w.set_cursor(4);
        let before = w.peek().map(|e| e.time);
        w.remove_until(2);
        assert_eq!(w.cursor(), 2);
        assert_eq!(w.peek().map(|e| e.time), before);
    }

    #[test]
    fn seek_within_finds_first_at_or_after() {
        let mut w = window(&[100, 200, 200, 300]);
        assert!(w.covers(250));
        assert!(w.seek_within(150));
        assert_eq!(w.cursor(), 1);
        assert!(w.seek_within(300));
        assert_eq!(w.cursor(), 3);
        assert!(!w.seek_within(301));
        assert_eq!(w.cursor(), 3);
        assert!(!w.covers(99));
    }

    #[test]
    fn threshold_timestamp_counts_from_the_end() {
        let w = window(&[1, 2, 3, 4, 5]);
        assert_eq!(w.threshold_timestamp(2), Some(4));
        assert_eq!(w.threshold_timestamp(10), Some(5));
    }

    #[test]
    fn peek_and_advance_deliver_in_order() {
        let mut w = window(&[1, 2]);
        assert_eq!(w.peek().map(|e| e.time), Some(1));
        w.advance();
        assert_eq!(w.peek().map(|e| e.time), Some(2));
        w.advance();
        assert!(w.peek().is_none());
        w.advance();
        assert_eq!(w.cursor(), 2);
    }
}
