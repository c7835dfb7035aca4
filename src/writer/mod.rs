//! Sink writers: everything that drains the delay queue.
//!
//! A [`SinkWriter`] only knows how to open its target, write one event and
//! close. The [`WriterHandle`] runs it on its own thread and takes care of
//! readiness, pause/stop, lag sampling, idle quit and completion detection.

pub mod disk;
pub mod lag;
pub mod network;

pub use disk::DiskWriter;
pub use lag::{LagPoint, LagRecorder};
pub use network::NetworkWriter;

use crate::clock::now_millis;
use crate::config::Connection;
use crate::context::HubContext;
use crate::error::{HubError, HubResult};
use crate::event::{Event, Timestamp};
use crate::worker::{WorkerControl, WorkerThread};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Queue poll interval; also the granularity of idle and completion checks.
pub const QUEUE_POLL: Duration = Duration::from_millis(100);

/// A target for events.
pub trait SinkWriter: Send {
    /// Connection type this writer serves.
    fn kind(&self) -> Connection;

    /// Open the target. Runs on the writer thread before it reports ready.
    fn initialize(&mut self) -> HubResult<()>;

    /// Write one event; returns the wall-clock write time, or `None` if the
    /// event was not written (for example an undeclared slot).
    fn write(&mut self, event: &Event) -> HubResult<Option<Timestamp>>;

    /// Flush and release the target.
    fn close(&mut self) -> HubResult<()>;
}

/// A writer running on its own thread.
#[derive(Debug)]
pub struct WriterHandle {
    worker: WorkerThread,
    kind: Connection,
    lag: Arc<Mutex<LagRecorder>>,
}

struct WriterLoop {
    ctx: Arc<HubContext>,
    lag: Arc<Mutex<LagRecorder>>,
    started: Timestamp,
    completed: bool,
}

impl WriterLoop {
    fn on_event(&mut self, writer: &mut dyn SinkWriter, event: &Event) {
        match writer.write(event) {
            Ok(Some(written_at)) => {
                self.ctx.clock.set_last_pushed(event.time);
                self.completed = false;
                self.lag
                    .lock()
                    .record(event.time, self.ctx.clock.replay_delay(), written_at);
            }
            Ok(None) => debug!(scope = %event.scope(), "event not written"),
            Err(e) => {
                warn!(scope = %event.scope(), error = %e, "write failed");
                self.ctx.messages.message(format!("cannot write {}: {e}", event.scope()));
            }
        }
    }

    fn on_idle(&mut self) {
        let quit_after = self.ctx.config.quit_if_idle;
        if quit_after > 0 {
            let last = self.ctx.clock.last_activity().unwrap_or(self.started);
            let idle = now_millis() - last;
            if idle > i64::try_from(quit_after).unwrap_or(i64::MAX) {
                info!(idle_ms = idle, "quitting because of exceeding maximum idle time");
                self.ctx.request_shutdown("idle timeout");
            }
        }
        if !self.completed {
            if let (Some(pushed), Some(last_line)) =
                (self.ctx.clock.last_pushed(), self.ctx.clock.last_line())
            {
                if pushed == last_line {
                    self.ctx.messages.message("replay completed");
                    self.completed = true;
                }
            }
        }
    }
}

impl WriterHandle {
    /// Start `writer` and block until it has initialized.
    ///
    /// Initialization failures are returned here, so the hub never starts a
    /// reader for a sink that cannot accept events.
    pub fn spawn(mut writer: Box<dyn SinkWriter>, ctx: &Arc<HubContext>) -> HubResult<Self> {
        let kind = writer.kind();
        let name = format!("{}-writer", kind.to_string().to_lowercase());
        let lag = Arc::new(Mutex::new(LagRecorder::new(
            ctx.config.lag_log_n,
            ctx.config.lag_history,
        )));
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<HubResult<()>>(1);

        let mut state = WriterLoop {
            ctx: Arc::clone(ctx),
            lag: Arc::clone(&lag),
            started: now_millis(),
            completed: false,
        };
        let worker = WorkerThread::spawn(WorkerControl::new(name.clone()), ctx.config.maxprio, move |control| {
            if let Err(e) = writer.initialize() {
                let _ = ready_tx.send(Err(e));
                return;
            }
            control.mark_initialized();
            let _ = ready_tx.send(Ok(()));
            drop(ready_tx);

            while control.wait_while_paused(QUEUE_POLL) {
                match state.ctx.queue.poll(QUEUE_POLL) {
                    Some(event) => state.on_event(writer.as_mut(), &event),
                    None => state.on_idle(),
                }
            }
            if let Err(e) = writer.close() {
                error!(writer = %kind, error = %e, "closing writer failed");
            }
            debug!(writer = %kind, "writer thread exiting");
        })
        .map_err(|e| HubError::Startup(name.clone(), e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!(writer = %kind, "writer ready");
                Ok(Self { worker, kind, lag })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(HubError::Startup(name, "writer exited during initialization".into())),
        }
    }

    /// Connection type.
    pub fn kind(&self) -> Connection {
        self.kind
    }

    /// Thread name.
    pub fn name(&self) -> &str {
        self.worker.control().name()
    }

    /// Park the writer.
    pub fn pause(&self) -> bool {
        self.worker.control().pause()
    }

    /// Resume the writer.
    pub fn proceed(&self) -> bool {
        self.worker.control().proceed()
    }

    /// Request termination; the target is closed on the writer thread.
    pub fn stop(&self) {
        self.worker.stop();
    }

    /// Whether the thread exited.
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Join the thread once it exited.
    pub fn join_if_finished(&self) -> bool {
        self.worker.join_if_finished()
    }

    /// Most recent lag sample.
    pub fn last_lag(&self) -> Option<i64> {
        self.lag.lock().last_lag()
    }

    /// Save the lag history; `Unavailable` when history is disabled.
    pub fn save_lag(&self, path: &Path, origin: Option<Timestamp>) -> HubResult<usize> {
        let lag = self.lag.lock();
        if !lag.keeps_history() {
            return Err(HubError::Unavailable("savelag without lag history".into()));
        }
        Ok(lag.save(path, origin)?)
    }
}
