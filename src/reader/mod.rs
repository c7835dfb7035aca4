//! Source readers: everything that feeds events into the delay queue.
//!
//! Each reader implements [`SourceReader`] and runs on its own thread under a
//! [`ReaderHandle`]. The handle owns the pause/stop protocol; a reader only
//! has to make bounded progress in [`SourceReader::step`].

pub mod disk;
pub mod network;
pub mod socket;

pub use disk::{DiskControl, DiskReader};
pub use network::NetworkReader;
pub use socket::SocketReader;

use crate::config::Connection;
use crate::context::HubContext;
use crate::error::{HubError, HubResult};
use crate::worker::{WorkerControl, WorkerThread};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Interval at which a paused reader re-checks for stop.
pub const PAUSE_POLL: Duration = Duration::from_millis(100);

/// Outcome of one reader step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStep {
    /// More may come.
    Continue,
    /// The source is done; the reader thread ends.
    Exhausted,
}

/// A source of events.
pub trait SourceReader: Send {
    /// Connection type this reader serves.
    fn kind(&self) -> Connection;

    /// Make bounded progress; must return within about a second.
    fn step(&mut self, control: &WorkerControl) -> HubResult<ReadStep>;

    /// Release resources when the thread ends.
    fn shutdown(&mut self) {}
}

/// A reader running on its own thread.
#[derive(Debug)]
pub struct ReaderHandle {
    worker: WorkerThread,
    kind: Connection,
}

impl ReaderHandle {
    /// Start `reader` on a new thread.
    pub fn spawn(mut reader: Box<dyn SourceReader>, ctx: &Arc<HubContext>) -> HubResult<Self> {
        let kind = reader.kind();
        let name = format!("{}-reader", kind.to_string().to_lowercase());
        let thread_ctx = Arc::clone(ctx);
        let worker = WorkerThread::spawn(WorkerControl::new(name.clone()), ctx.config.maxprio, move |control| {
            control.mark_initialized();
            while control.wait_while_paused(PAUSE_POLL) {
                match reader.step(&control) {
                    Ok(ReadStep::Continue) => {}
                    Ok(ReadStep::Exhausted) => {
                        thread_ctx.messages.message(format!("{kind} reader finished"));
                        break;
                    }
                    Err(e) if e.is_recoverable() => {
                        warn!(reader = %kind, error = %e, "skipping input");
                    }
                    Err(e) => {
                        error!(reader = %kind, error = %e, "reader failed");
                        thread_ctx.messages.message(format!("{kind} reader stopped: {e}"));
                        break;
                    }
                }
            }
            reader.shutdown();
            debug!(reader = %kind, "reader thread exiting");
        })
        .map_err(|e| HubError::Startup(name, e.to_string()))?;
        Ok(Self { worker, kind })
    }

    /// Connection type.
    pub fn kind(&self) -> Connection {
        self.kind
    }

    /// Thread name.
    pub fn name(&self) -> &str {
        self.worker.control().name()
    }

    /// Park the reader.
    pub fn pause(&self) -> bool {
        self.worker.control().pause()
    }

    /// Resume the reader.
    pub fn proceed(&self) -> bool {
        self.worker.control().proceed()
    }

    /// Request termination.
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
}
