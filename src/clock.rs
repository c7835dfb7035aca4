//! Replay time bookkeeping shared by all hub components.
//!
//! The replay delay maps recorded timestamps onto wall-clock release times:
//! an event recorded at `t` is due at `t + delay`. Pausing and seeking only
//! ever change the delay, so every component keeps reading one number.

use crate::event::Timestamp;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

const UNSET: i64 = i64::MIN;

/// Current wall-clock time in milliseconds.
pub fn now_millis() -> Timestamp {
    Utc::now().timestamp_millis()
}

/// Render a millisecond duration as `1h 2m 3.456s`.
pub fn nice_time(ms: i64) -> String {
    let sign = if ms < 0 { "-" } else { "" };
    let ms = ms.unsigned_abs();
    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let seconds = (ms % 60_000) as f64 / 1000.0;
    format!("{sign}{hours}h {minutes}m {seconds:.3}s")
}

fn load(cell: &AtomicI64) -> Option<Timestamp> {
    match cell.load(Ordering::Acquire) {
        UNSET => None,
        v => Some(v),
    }
}

/// Shared replay timing state.
#[derive(Debug)]
pub struct ReplayClock {
    replay_delay: AtomicI64,
    replay_offset: AtomicI64,
    first_line: AtomicI64,
    last_line: AtomicI64,
    last_pushed: AtomicI64,
    last_activity: AtomicI64,
    pause_started: Mutex<Option<Timestamp>>,
}

impl Default for ReplayClock {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ReplayClock {
    /// Create a clock with the given replay offset and no delay.
    pub fn new(offset: i64) -> Self {
        Self {
            replay_delay: AtomicI64::new(0),
            replay_offset: AtomicI64::new(offset),
            first_line: AtomicI64::new(UNSET),
            last_line: AtomicI64::new(UNSET),
            last_pushed: AtomicI64::new(UNSET),
            last_activity: AtomicI64::new(UNSET),
            pause_started: Mutex::new(None),
        }
    }

    /// Milliseconds added to recorded timestamps.
    pub fn replay_delay(&self) -> i64 {
        self.replay_delay.load(Ordering::Acquire)
    }

    /// Replace the replay delay.
    pub fn set_replay_delay(&self, delay: i64) {
        self.replay_delay.store(delay, Ordering::Release);
    }

    /// Shift the replay delay.
    pub fn add_replay_delay(&self, delta: i64) {
        self.replay_delay.fetch_add(delta, Ordering::AcqRel);
    }

    /// Make recorded time `t` play back at the current instant.
    pub fn align_to(&self, t: Timestamp) {
        self.set_replay_delay(now_millis() - t);
    }

    /// Wall-clock release time of an event recorded at `t`.
    pub fn release_time(&self, t: Timestamp) -> Timestamp {
        t.saturating_add(self.replay_delay())
    }

    /// User synchronization offset.
    pub fn replay_offset(&self) -> i64 {
        self.replay_offset.load(Ordering::Acquire)
    }

    /// Replace the synchronization offset.
    pub fn set_replay_offset(&self, offset: i64) {
        self.replay_offset.store(offset, Ordering::Release);
    }

    /// Recorded time currently being played.
    pub fn replay_position(&self) -> Timestamp {
        match *self.pause_started.lock() {
            Some(paused_at) => paused_at - self.replay_delay(),
            None => now_millis() - self.replay_delay(),
        }
    }

    /// Timestamp of the first event line in the source file.
    pub fn first_line(&self) -> Option<Timestamp> {
        load(&self.first_line)
    }

    /// Record the first line timestamp; only the first call wins.
    pub fn set_first_line_once(&self, t: Timestamp) -> bool {
        self.first_line
            .compare_exchange(UNSET, t, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// First line shifted by the offset; relative seeks count from here.
    pub fn shifted_first_line(&self) -> Option<Timestamp> {
        self.first_line().map(|t| t - self.replay_offset())
    }

    /// Timestamp of the last event line, known once the file was read to the end.
    pub fn last_line(&self) -> Option<Timestamp> {
        load(&self.last_line)
    }

    /// Record the last line timestamp.
    pub fn set_last_line(&self, t: Timestamp) {
        self.last_line.store(t, Ordering::Release);
    }

    /// Timestamp of the most recently written event.
    pub fn last_pushed(&self) -> Option<Timestamp> {
        load(&self.last_pushed)
    }

    /// Record a written event; this also counts as activity.
    pub fn set_last_pushed(&self, t: Timestamp) {
        self.last_pushed.store(t, Ordering::Release);
        self.touch();
    }

    /// Forget the last written event, used after seeking.
    pub fn clear_last_pushed(&self) {
        self.last_pushed.store(UNSET, Ordering::Release);
    }

    /// Wall-clock time of the last activity.
    pub fn last_activity(&self) -> Option<Timestamp> {
        load(&self.last_activity)
    }

    /// Mark activity now.
    pub fn touch(&self) {
        self.last_activity.store(now_millis(), Ordering::Release);
    }

    /// Whether a pause is in progress.
    pub fn is_paused(&self) -> bool {
        self.pause_started.lock().is_some()
    }

    /// Record the pause instant. Returns false if already paused.
    pub fn begin_pause(&self) -> bool {
        let mut guard = self.pause_started.lock();
        if guard.is_some() {
            return false;
        }
        *guard = Some(now_millis());
        true
    }

    /// Restart the pause interval at the current instant.
    ///
    /// Used after a seek while paused so the seek target stays in place.
    pub fn restart_pause(&self) {
        let mut guard = self.pause_started.lock();
        if guard.is_some() {
            *guard = Some(now_millis());
        }
    }

    /// End a pause, adding its duration to the delay. Returns the duration.
    pub fn end_pause(&self) -> Option<i64> {
        let started = self.pause_started.lock().take()?;
        let elapsed = now_millis() - started;
        self.add_replay_delay(elapsed);
        Some(elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn pause_resume_adds_pause_duration_to_delay() {
        let clock = ReplayClock::new(0);
        clock.set_replay_delay(1_000);
        assert!(clock.begin_pause());
        assert!(!clock.begin_pause());
        thread::sleep(Duration::from_millis(120));
        let elapsed = clock.end_pause().unwrap();
        assert!(elapsed >= 120, "elapsed {elapsed}");
        assert!(elapsed < 400, "elapsed {elapsed}");
        assert_eq!(clock.replay_delay(), 1_000 + elapsed);
        assert!(clock.end_pause().is_none());
    }

    #[test]
    fn replay_position_freezes_while_paused() {
        let clock = ReplayClock::new(0);
        clock.align_to(5_000);
        clock.begin_pause();
        let before = clock.replay_position();
        thread::sleep(Duration::from_millis(60));
        assert_eq!(clock.replay_position(), before);
        clock.end_pause();
        let after = clock.replay_position();
        assert!((after - before).abs() < 30, "{before} vs {after}");
    }

    #[test]
    fn first_line_is_set_once() {
        let clock = ReplayClock::new(250);
        assert!(clock.first_line().is_none());
        assert!(clock.set_first_line_once(1_000));
        assert!(!clock.set_first_line_once(2_000));
        assert_eq!(clock.first_line(), Some(1_000));
        assert_eq!(clock.shifted_first_line(), Some(750));
    }

    #[test]
    fn last_pushed_counts_as_activity() {
        let clock = ReplayClock::default();
        assert!(clock.last_activity().is_none());
        clock.set_last_pushed(42);
        assert_eq!(clock.last_pushed(), Some(42));
        assert!(clock.last_activity().is_some());
        clock.clear_last_pushed();
        assert!(clock.last_pushed().is_none());
    }

    #[test]
    fn nice_time_formats_hours_minutes_seconds() {
        assert_eq!(nice_time(3_723_456), "1h 2m 3.456s");
        assert_eq!(nice_time(0), "0h 0m 0.000s");
        assert_eq!(nice_time(-1_500), "-0h 0m 1.500s");
    }
}
