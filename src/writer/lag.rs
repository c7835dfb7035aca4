//! Lag between scheduled and actual write times.

use crate::event::Timestamp;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

const HEADER: &str = "# lag history; format: timestamp[ms] lag[ms]";

/// One measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LagPoint {
    /// Recorded timestamp of the measured event.
    pub timestamp: Timestamp,
    /// Milliseconds the write happened after its release time.
    pub lag: i64,
}

/// Samples every Nth write and optionally keeps the samples.
#[derive(Debug, Clone)]
pub struct LagRecorder {
    every: u64,
    keep_history: bool,
    counter: u64,
    last: Option<i64>,
    history: Vec<LagPoint>,
}

impl LagRecorder {
    /// Sample every `every`th write (at least every write).
    pub fn new(every: u64, keep_history: bool) -> Self {
        Self {
            every: every.max(1),
            keep_history,
            counter: 0,
            last: None,
            history: Vec::new(),
        }
    }

    /// Account for one write of an event recorded at `time`, written at
    /// wall-clock `written_at`. Returns the lag if this write was sampled.
    pub fn record(&mut self, time: Timestamp, replay_delay: i64, written_at: Timestamp) -> Option<i64> {
        self.counter += 1;
        if self.counter < self.every {
            return None;
        }
        self.counter = 0;
        let lag = written_at - (time + replay_delay);
        self.last = Some(lag);
        if self.keep_history {
            self.history.push(LagPoint {
                timestamp: time,
                lag,
            });
        }
        Some(lag)
    }

    /// Most recent sample.
    pub fn last_lag(&self) -> Option<i64> {
        self.last
    }

    /// Whether samples are kept.
    pub fn keeps_history(&self) -> bool {
        self.keep_history
    }

    /// Kept samples.
    pub fn history(&self) -> &[LagPoint] {
        &self.history
    }

    /// Write the history as `timestamp - origin<TAB>lag` lines.
    pub fn save(&self, path: &Path, origin: Option<Timestamp>) -> io::Result<usize> {
        let origin = origin
            .or_else(|| self.history.first().map(|p| p.timestamp))
            .unwrap_or(0);
        let mut out = BufWriter::new(File::create(path)?);
        writeln!(out, "{HEADER}")?;
        for point in &self.history {
            writeln!(out, "{}\t{}", point.timestamp - origin, point.lag)?;
        }
        out.flush()?;
        Ok(self.history.len())
    }
}
