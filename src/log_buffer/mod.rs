//! Streaming buffered reader over a (possibly huge, possibly gzipped) log file.
//!
//! The buffer holds a sliding window of parsed events and keeps some lookback
//! behind the delivery cursor, so that short backward seeks need no file I/O.
//! Long seeks use byte-rate estimation to jump close to the target.
//!
//! - [`stream`]: raw line access with gzip detection, rewind and byte skipping.
//! - [`window`]: the in-memory event window and its cursor.
//! - [`engine`]: the fill/seek loop that runs on the buffer's own thread.

pub mod engine;
pub mod stream;
pub mod window;

pub use engine::{BufferSettings, BufferStats, Delivery, SeekRequest};

use crate::context::HubContext;
use crate::error::HubResult;
use crate::event::Timestamp;
use crate::worker::{WorkerControl, WorkerThread};
use crossbeam_channel::Receiver;
use engine::{LogBufferEngine, SharedState};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::debug;

/// Handle to a running log buffer.
///
/// Events come out of the paired [`Receiver`] in file order, each tagged
/// with the epoch of the seek that produced it.
#[derive(Debug)]
pub struct StreamingLogBuffer {
    worker: WorkerThread,
    shared: Arc<SharedState>,
}

impl StreamingLogBuffer {
    /// Open `path` and start the buffer thread.
    pub fn open(
        path: &Path,
        settings: BufferSettings,
        ctx: &HubContext,
    ) -> HubResult<(Self, Receiver<Delivery>)> {
        let engine = LogBufferEngine::open(
            path,
            settings,
            Arc::clone(&ctx.parser),
            Arc::clone(&ctx.clock),
            Arc::clone(&ctx.messages),
        )?;
        let shared = engine.shared();
        let (tx, rx) = crossbeam_channel::bounded(0);
        let worker = WorkerThread::spawn(
            WorkerControl::new("log-buffer"),
            ctx.config.maxprio,
            move |control| engine.run(&control, &tx),
        )?;
        Ok((Self { worker, shared }, rx))
    }

    /// Request a seek; the latest request wins if several are pending.
    pub fn seek(&self, target: Timestamp, epoch: u64) {
        if self.shared.seeking.load(Ordering::Acquire) {
            debug!(target_ts = target, "seek deferred until the running one completes");
        }
        *self.shared.seek.lock() = Some(SeekRequest { target, epoch });
    }

    /// Latest window statistics.
    pub fn stats(&self) -> BufferStats {
        self.shared.stats.lock().clone()
    }

    /// Ask the buffer thread to stop.
    pub fn stop(&self) {
        self.worker.stop();
    }

    /// Whether the buffer thread has exited.
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Join the thread if it has exited.
    pub fn join_if_finished(&self) -> bool {
        self.worker.join_if_finished()
    }
}
