//! User-facing status messages.
//!
//! Everything the operator should see (seek progress, "replay completed",
//! protocol diagnostics) goes through one [`Messenger`]. Printing can be
//! switched off at runtime; the most recent messages are always retained so
//! they can be inspected later.

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

const MAX_MESSAGES: usize = 1000;

/// A single recorded message.
#[derive(Debug, Clone)]
pub struct MessageEntry {
    /// Local time the message was emitted.
    pub timestamp: DateTime<Local>,
    /// Message text.
    pub text: String,
}

/// Silenceable plain-text message sink.
#[derive(Debug)]
pub struct Messenger {
    enabled: AtomicBool,
    history: Mutex<VecDeque<MessageEntry>>,
}

impl Default for Messenger {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Messenger {
    /// Create a sink; `enabled` controls printing to stdout.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            history: Mutex::new(VecDeque::with_capacity(64)),
        }
    }

    /// Emit a message.
    pub fn message(&self, text: impl Into<String>) {
        let text = text.into();
        tracing::debug!(target: "replay_hub::message", "{text}");
        if self.is_enabled() {
            println!("{text}");
        }
        self.record(text);
    }

    /// Emit a message even when printing is disabled.
    ///
    /// Used for direct answers to console queries.
    pub fn reply(&self, text: impl Into<String>) {
        let text = text.into();
        println!("{text}");
        self.record(text);
    }

    fn record(&self, text: String) {
        let mut history = self.history.lock();
        if history.len() >= MAX_MESSAGES {
            history.pop_front();
        }
        history.push_back(MessageEntry {
            timestamp: Local::now(),
            text,
        });
    }

    /// Whether printing is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Enable or disable printing.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Flip printing; returns the new state.
    pub fn toggle(&self) -> bool {
        !self.enabled.fetch_xor(true, Ordering::Relaxed)
    }

    /// Copy of the retained messages, oldest first.
    pub fn recent(&self) -> Vec<MessageEntry> {
        self.history.lock().iter().cloned().collect()
    }

    /// Whether any retained message contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.history.lock().iter().any(|m| m.text.contains(needle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silenced_messages_are_still_recorded() {
        let messenger = Messenger::new(false);
        messenger.message("replay completed");
        assert!(messenger.contains("replay completed"));
        assert_eq!(messenger.recent().len(), 1);
    }

    #[test]
    fn toggle_flips_printing() {
        let messenger = Messenger::new(true);
        assert!(!messenger.toggle());
        assert!(!messenger.is_enabled());
        assert!(messenger.toggle());
        assert!(messenger.is_enabled());
    }

    #[test]
    fn history_is_bounded() {
        let messenger = Messenger::new(false);
        for i in 0..(MAX_MESSAGES + 10) {
            messenger.message(format!("m{i}"));
        }
        let recent = messenger.recent();
        assert_eq!(recent.len(), MAX_MESSAGES);
        assert_eq!(recent[0].text, "m10");
    }
}
