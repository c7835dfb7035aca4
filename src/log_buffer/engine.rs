//! Fill/seek loop of the streaming log buffer.
//!
//! The engine owns the file handle and the in-memory window. It runs on its
//! own thread and alternates between reading lines and offering the event at
//! the window cursor to the consumer over a rendezvous channel. Seek requests
//! arrive through a single shared slot and are handled between steps.

use super::stream::LogStream;
use super::window::EventWindow;
use crate::clock::ReplayClock;
use crate::config::HubConfig;
use crate::event::{Event, Timestamp};
use crate::messages::Messenger;
use crate::parser::LineParser;
use crate::worker::WorkerControl;
use crossbeam_channel::{SendTimeoutError, Sender};
use parking_lot::Mutex;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Bounded wait for the consumer to accept an event.
pub const HANDOFF_TIMEOUT: Duration = Duration::from_millis(500);

const IDLE_NAP: Duration = Duration::from_millis(1);

/// Tuning of the window and of seeking.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferSettings {
    /// Events held before the window is shifted.
    pub capacity: usize,
    /// Lookback kept when shifting.
    pub threshold: usize,
    /// Smallest byte skip worth doing during a fast seek.
    pub minimum_skip: u64,
    /// Lines sampled for the byte-rate estimate.
    pub lines_to_estimate: usize,
    /// Lower clamp for local progress.
    pub to_small_progress: f64,
    /// Local progress at which the estimate is left alone.
    pub big_enough_progress: f64,
    /// Fast-seek iterations before scanning linearly.
    pub max_fast_seek_iterations: u32,
    /// Leading non-event lines.
    pub header_lines: usize,
}

impl BufferSettings {
    /// Settings taken from the hub configuration.
    pub fn from_config(config: &HubConfig) -> Self {
        Self {
            capacity: config.buffer_capacity,
            threshold: config.buffer_threshold,
            minimum_skip: config.buffer_minimum_skip,
            lines_to_estimate: config.num_lines_to_est_bps,
            to_small_progress: config.to_small_progress,
            big_enough_progress: config.big_enough_progress,
            max_fast_seek_iterations: config.max_fast_seek_iterations,
            header_lines: config.header_lines,
        }
    }
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self::from_config(&HubConfig::default())
    }
}

/// An event handed to the consumer, tagged with the seek epoch it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// The event.
    pub event: Event,
    /// Epoch of the seek that produced it.
    pub epoch: u64,
}

/// Pending seek.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekRequest {
    /// Recorded timestamp to seek to.
    pub target: Timestamp,
    /// Delay queue epoch started for this seek.
    pub epoch: u64,
}

/// Snapshot of the window for the `buffer` command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BufferStats {
    /// Events held.
    pub size: usize,
    /// Configured capacity.
    pub capacity: usize,
    /// Configured lookback.
    pub threshold: usize,
    /// Delivery cursor.
    pub cursor: usize,
    /// Oldest held timestamp.
    pub first: Option<Timestamp>,
    /// Newest held timestamp.
    pub last: Option<Timestamp>,
    /// Timestamp that must be written before the window shifts.
    pub threshold_timestamp: Option<Timestamp>,
    /// Current byte-rate estimate.
    pub bytes_per_second: f64,
    /// Whether fast seeking is available.
    pub fast_seek: bool,
    /// Whether a linear seek scan is running.
    pub scanning: bool,
}

#[derive(Debug, Default)]
pub(crate) struct SharedState {
    pub(crate) seek: Mutex<Option<SeekRequest>>,
    pub(crate) stats: Mutex<BufferStats>,
    pub(crate) seeking: AtomicBool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Fill,
    Seek(Timestamp),
}

enum LineRead {
    Eof,
    Skipped,
    Event(Event),
}

#[derive(Debug, PartialEq, Eq)]
enum Handoff {
    Delivered,
    Pending,
    Idle,
    Closed,
}

/// The fill/seek state machine.
pub struct LogBufferEngine {
    stream: LogStream,
    window: EventWindow,
    mode: Mode,
    settings: BufferSettings,
    parser: Arc<dyn LineParser>,
    clock: Arc<ReplayClock>,
    messages: Arc<Messenger>,
    shared: Arc<SharedState>,
    bytes_per_second: f64,
    fast_seek: bool,
    epoch: u64,
    eof: bool,
    closed: bool,
}

impl LogBufferEngine {
    /// Open the log, estimate its byte rate and rewind to the start.
    pub fn open(
        path: &Path,
        settings: BufferSettings,
        parser: Arc<dyn LineParser>,
        clock: Arc<ReplayClock>,
        messages: Arc<Messenger>,
    ) -> io::Result<Self> {
        let stream = LogStream::open(path, settings.header_lines)?;
        let mut engine = Self {
            stream,
            window: EventWindow::new(),
            mode: Mode::Fill,
            settings,
            parser,
            clock,
            messages,
            shared: Arc::new(SharedState::default()),
            bytes_per_second: 1.0,
            fast_seek: false,
            epoch: 0,
            eof: false,
            closed: false,
        };
        engine.estimate_bytes_per_second()?;
        engine.publish_stats();
        Ok(engine)
    }

    pub(crate) fn shared(&self) -> Arc<SharedState> {
        Arc::clone(&self.shared)
    }

    fn estimate_bytes_per_second(&mut self) -> io::Result<()> {
        let mut bytes = 0u64;
        let mut first = None;
        let mut last = None;
        let mut lines = 0;
        while lines < self.settings.lines_to_estimate {
            let Some(line) = self.stream.next_line()? else {
                break;
            };
            if line.header || line.text.trim().is_empty() {
                continue;
            }
            lines += 1;
            if let Some(t) = self.parser.quick_parse_timestamp(&line.text) {
                first.get_or_insert(t);
                last = Some(t);
                bytes += line.len as u64;
            }
        }

        if let Some(first) = first {
            self.clock.set_first_line_once(first);
            if self.clock.replay_delay() == 0 {
                self.clock.align_to(first);
            }
        }
        match (first, last) {
            (Some(first), Some(last)) if last > first => {
                self.bytes_per_second = bytes as f64 * 1000.0 / (last - first) as f64;
                self.fast_seek = true;
            }
            _ => {
                self.bytes_per_second = 1.0;
                self.fast_seek = false;
                self.messages
                    .message("log timestamps do not advance; fast seeking disabled");
            }
        }
        info!(
            path = %self.stream.path().display(),
            gzip = self.stream.is_gzip(),
            bytes_per_second = self.bytes_per_second,
            fast_seek = self.fast_seek,
            "estimated log byte rate"
        );
        self.stream.rewind()
    }

    /// Drive the engine until stopped or the consumer goes away.
    pub fn run(mut self, control: &WorkerControl, tx: &Sender<Delivery>) {
        control.mark_initialized();
        while control.is_active() && !self.closed {
            self.eof = false;
            while !self.eof && control.is_active() && !self.closed {
                let step = match self.mode {
                    Mode::Fill => self.fill_step(tx),
                    Mode::Seek(target) => self.seek_step(target),
                };
                if let Err(e) = step {
                    warn!(error = %e, "reading log failed; treating as end of file");
                    self.eof = true;
                }
                if let Some(request) = self.take_seek_request() {
                    self.process_seek(request);
                }
                self.publish_stats();
            }
            if !control.is_active() || self.closed {
                break;
            }

            if self.mode == Mode::Fill {
                if let Some(last) = self.window.last_timestamp() {
                    self.clock.set_last_line(last);
                }
            }
            debug!(last_line = ?self.clock.last_line(), "end of log reached");

            // Keep delivering what is left until someone seeks.
            loop {
                if !control.is_active() || self.closed {
                    break;
                }
                if let Some(request) = self.take_seek_request() {
                    self.process_seek(request);
                    self.publish_stats();
                    break;
                }
                if self.offer(tx, HANDOFF_TIMEOUT) == Handoff::Idle {
                    control.nap(IDLE_NAP);
                }
                self.publish_stats();
            }
        }
        debug!("log buffer engine stopped");
    }

    fn fill_step(&mut self, tx: &Sender<Delivery>) -> io::Result<()> {
        let handoff = self.offer(tx, HANDOFF_TIMEOUT);
        if self.window.len() < self.settings.capacity {
            match self.read_event_line()? {
                LineRead::Eof => self.eof = true,
                LineRead::Skipped => {}
                LineRead::Event(event) => self.window.push(event),
            }
        } else if !self.shift_if_consumed() && handoff == Handoff::Idle {
            thread::sleep(IDLE_NAP);
        }
        Ok(())
    }

    fn seek_step(&mut self, target: Timestamp) -> io::Result<()> {
        let Some(line) = self.stream.next_line()? else {
            self.eof = true;
            self.messages
                .message(format!("seek target {target} lies beyond the end of the log"));
            return Ok(());
        };
        if line.header {
            return Ok(());
        }
        match self.parser.quick_parse_timestamp(&line.text) {
            Some(t) if t >= target => {
                match self.parser.parse(&line.text) {
                    Ok(event) => self.window.push(event),
                    Err(e) => debug!(error = %e, "dropping unparseable seek target line"),
                }
                self.mode = Mode::Fill;
                debug!(target_ts = target, reached = t, "linear seek done");
            }
            _ => {}
        }
        Ok(())
    }

    fn read_event_line(&mut self) -> io::Result<LineRead> {
        let Some(line) = self.stream.next_line()? else {
            return Ok(LineRead::Eof);
        };
        if line.header || line.text.trim().is_empty() {
            return Ok(LineRead::Skipped);
        }
        match self.parser.parse(&line.text) {
            Ok(event) if event.time >= 0 => Ok(LineRead::Event(event)),
            Ok(event) => {
                debug!(time = event.time, "dropping event with negative timestamp");
                Ok(LineRead::Skipped)
            }
            Err(e) => {
                debug!(error = %e, "dropping unparseable line");
                Ok(LineRead::Skipped)
            }
        }
    }

    fn offer(&mut self, tx: &Sender<Delivery>, timeout: Duration) -> Handoff {
        let Some(event) = self.window.peek() else {
            return Handoff::Idle;
        };
        let delivery = Delivery {
            event: event.clone(),
            epoch: self.epoch,
        };
        match tx.send_timeout(delivery, timeout) {
            Ok(()) => {
                self.window.advance();
                Handoff::Delivered
            }
            Err(SendTimeoutError::Timeout(_)) => Handoff::Pending,
            Err(SendTimeoutError::Disconnected(_)) => {
                debug!("log consumer went away");
                self.closed = true;
                Handoff::Closed
            }
        }
    }

    // Drop lookback once the writer has passed the threshold timestamp.
    fn shift_if_consumed(&mut self) -> bool {
        let (Some(last_pushed), Some(threshold_ts)) = (
            self.clock.last_pushed(),
            self.window.threshold_timestamp(self.settings.threshold),
        ) else {
            return false;
        };
        if last_pushed < threshold_ts {
            return false;
        }
        let removed = self.window.remove_until(last_pushed);
        if removed > 0 {
            debug!(removed, until = last_pushed, "shifted log window");
        }
        removed > 0
    }

    fn take_seek_request(&self) -> Option<SeekRequest> {
        let request = self.shared.seek.lock().take();
        if request.is_some() {
            self.shared.seeking.store(true, Ordering::Release);
        }
        request
    }

    fn process_seek(&mut self, request: SeekRequest) {
        let target = request.target;
        self.epoch = request.epoch;
        self.mode = Mode::Fill;
        info!(target_ts = target, epoch = request.epoch, "processing seek");

        if self.window.covers(target) {
            self.window.seek_within(target);
            debug!(cursor = self.window.cursor(), "seek served from window");
        } else {
            let result = if self.clock.first_line().map_or(true, |first| target <= first) {
                self.restart()
            } else if self.fast_seek {
                self.fast_seek(target)
            } else {
                self.start_linear_seek(target)
            };
            if let Err(e) = result {
                warn!(error = %e, "seek failed; scanning from the start");
                let fallback = self.restart().map(|_| self.mode = Mode::Seek(target));
                if let Err(e) = fallback {
                    warn!(error = %e, "cannot rewind log");
                    self.eof = true;
                }
            }
        }
        self.shared.seeking.store(false, Ordering::Release);
    }

    fn restart(&mut self) -> io::Result<()> {
        self.stream.rewind()?;
        self.window.clear();
        self.eof = false;
        Ok(())
    }

    fn start_linear_seek(&mut self, target: Timestamp) -> io::Result<()> {
        match self.window.last_timestamp() {
            // The file position is just past the window; keep scanning forward.
            Some(last) if target > last => self.window.clear(),
            _ => self.restart()?,
        }
        self.mode = Mode::Seek(target);
        Ok(())
    }

    fn fast_seek(&mut self, target: Timestamp) -> io::Result<()> {
        let mut position_ts = match self.window.last_timestamp() {
            Some(last) if last < target => last,
            _ => {
                self.stream.rewind()?;
                self.clock.first_line().unwrap_or(0)
            }
        };
        self.window.clear();
        self.eof = false;
        let start_ts = position_ts;

        for iteration in 0..self.settings.max_fast_seek_iterations {
            let distance = (target - position_ts) as f64;
            let skip = (self.bytes_per_second * distance / 1000.0).max(0.0) as u64;
            if skip < self.settings.minimum_skip {
                debug!(skip, iteration, "remaining distance below minimum skip; scanning");
                self.mode = Mode::Seek(target);
                return Ok(());
            }

            // Line boundary with everything before it older than the target.
            let boundary = self.stream.position();
            // One byte short, so a line starting right at the jump is kept whole.
            self.stream.skip(skip - 1)?;
            let Some(reached) = self.resync()? else {
                debug!(skip, "fast seek jumped past the end of the log");
                self.stream.seek_to(boundary)?;
                self.bytes_per_second /= 2.0;
                continue;
            };

            if reached >= target {
                // The skipped bytes may hold the target line; jump shorter.
                self.stream.seek_to(boundary)?;
                let overshoot = (reached - position_ts) as f64 / distance;
                self.bytes_per_second /= overshoot.max(2.0);
                debug!(reached, target_ts = target, "fast seek overshot");
                continue;
            }

            let global = (reached - start_ts) as f64 / (target - start_ts) as f64;
            let mut local = (reached - position_ts) as f64 / distance;
            self.messages
                .message(format!("seeking: {:.1}%", (global * 100.0).clamp(0.0, 100.0)));
            if local < self.settings.to_small_progress {
                local = self.settings.to_small_progress;
            }
            if local < self.settings.big_enough_progress {
                self.bytes_per_second /= local;
            }
            position_ts = reached;
        }

        warn!(
            target_ts = target,
            iterations = self.settings.max_fast_seek_iterations,
            "fast seek did not converge; scanning"
        );
        self.mode = Mode::Seek(target);
        Ok(())
    }

    // Drop the rest of the line a skip landed in, then read up to the next
    // timestamped line. `None` at end of file.
    fn resync(&mut self) -> io::Result<Option<Timestamp>> {
        if self.stream.next_line()?.is_none() {
            return Ok(None);
        }
        while let Some(line) = self.stream.next_line()? {
            if let Some(t) = self.parser.quick_parse_timestamp(&line.text) {
                return Ok(Some(t));
            }
        }
        Ok(None)
    }

    fn publish_stats(&self) {
        let mut stats = self.shared.stats.lock();
        stats.size = self.window.len();
        stats.capacity = self.settings.capacity;
        stats.threshold = self.settings.threshold;
        stats.cursor = self.window.cursor();
        stats.first = self.window.first_timestamp();
        stats.last = self.window.last_timestamp();
        stats.threshold_timestamp = self.window.threshold_timestamp(self.settings.threshold);
        stats.bytes_per_second = self.bytes_per_second;
        stats.fast_seek = self.fast_seek;
        stats.scanning = matches!(self.mode, Mode::Seek(_));
    }
}

impl std::fmt::Debug for LogBufferEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogBufferEngine")
            .field("stream", &self.stream)
            .field("window_len", &self.window.len())
            .field("mode", &self.mode)
            .field("epoch", &self.epoch)
            .finish()
    }
}
