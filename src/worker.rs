//! Lifecycle of the hub's long-lived threads.
//!
//! Every role (source reader, sink writer, log buffer engine, control
//! surfaces) runs on its own OS thread and is steered through a shared
//! [`WorkerControl`]. The thread body checks the control after every bounded
//! wait, so pause and stop requests are observed within one wait interval.

use crate::priority;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error};

/// Observable state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Created, not yet initialized.
    Starting,
    /// Doing work.
    Running,
    /// Parked between iterations.
    Paused,
    /// Asked to terminate.
    Stopping,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Starting => "starting",
            RunState::Running => "running",
            RunState::Paused => "paused",
            RunState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// Shared state between a worker thread and whoever steers it.
#[derive(Debug)]
pub struct WorkerControl {
    name: String,
    state: Mutex<RunState>,
    changed: Condvar,
    initialized: AtomicBool,
    finished: AtomicBool,
}

impl WorkerControl {
    /// New control in the `Starting` state.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            state: Mutex::new(RunState::Starting),
            changed: Condvar::new(),
            initialized: AtomicBool::new(false),
            finished: AtomicBool::new(false),
        })
    }

    /// Worker name, used in progress messages.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state.
    pub fn state(&self) -> RunState {
        *self.state.lock()
    }

    fn transition(&self, from: &[RunState], to: RunState) -> bool {
        let mut state = self.state.lock();
        if from.contains(&state) {
            *state = to;
            self.changed.notify_all();
            true
        } else {
            false
        }
    }

    /// Mark setup as complete and start running.
    pub fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::Release);
        self.transition(&[RunState::Starting], RunState::Running);
    }

    /// Whether setup completed.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Park the worker after its current iteration.
    pub fn pause(&self) -> bool {
        self.transition(&[RunState::Running, RunState::Starting], RunState::Paused)
    }

    /// Resume a paused worker.
    pub fn proceed(&self) -> bool {
        self.transition(&[RunState::Paused], RunState::Running)
    }

    /// Request termination.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        *state = RunState::Stopping;
        self.changed.notify_all();
    }

    /// False once stop was requested.
    pub fn is_active(&self) -> bool {
        self.state() != RunState::Stopping
    }

    /// Whether the worker is parked.
    pub fn is_paused(&self) -> bool {
        self.state() == RunState::Paused
    }

    /// Record that the thread body returned.
    pub fn mark_finished(&self) {
        self.finished.store(true, Ordering::Release);
    }

    /// Whether the thread body returned.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Block while paused, re-checking at least every `interval`.
    ///
    /// Returns `false` when the worker should terminate.
    pub fn wait_while_paused(&self, interval: Duration) -> bool {
        let mut state = self.state.lock();
        loop {
            match *state {
                RunState::Stopping => return false,
                RunState::Paused => {
                    self.changed.wait_for(&mut state, interval);
                }
                RunState::Starting | RunState::Running => return true,
            }
        }
    }

    /// Sleep up to `duration`, waking early on stop.
    ///
    /// Returns `false` when the worker should terminate.
    pub fn nap(&self, duration: Duration) -> bool {
        let mut state = self.state.lock();
        if *state == RunState::Stopping {
            return false;
        }
        self.changed.wait_for(&mut state, duration);
        *state != RunState::Stopping
    }
}

struct FinishGuard(Arc<WorkerControl>);

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.0.mark_finished();
        debug!(worker = self.0.name(), "worker finished");
    }
}

/// A running worker thread and its control.
#[derive(Debug)]
pub struct WorkerThread {
    control: Arc<WorkerControl>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerThread {
    /// Spawn `body` on a named thread.
    ///
    /// The control is marked finished when `body` returns or unwinds.
    pub fn spawn<F>(control: Arc<WorkerControl>, raise_priority: bool, body: F) -> std::io::Result<Self>
    where
        F: FnOnce(Arc<WorkerControl>) + Send + 'static,
    {
        let thread_control = Arc::clone(&control);
        let handle = thread::Builder::new()
            .name(control.name().to_string())
            .spawn(move || {
                if raise_priority {
                    priority::raise_current_thread();
                }
                let guard = FinishGuard(Arc::clone(&thread_control));
                body(thread_control);
                drop(guard);
            })?;
        Ok(Self {
            control,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// The shared control.
    pub fn control(&self) -> &Arc<WorkerControl> {
        &self.control
    }

    /// Request termination without waiting.
    pub fn stop(&self) {
        self.control.stop();
    }

    /// Whether the thread body returned.
    pub fn is_finished(&self) -> bool {
        self.control.is_finished()
    }

    /// Join the thread if it has finished. Returns true once joined.
    pub fn join_if_finished(&self) -> bool {
        if !self.control.is_finished() {
            return false;
        }
        if let Some(handle) = self.handle.lock().take() {
            if let Err(e) = handle.join() {
                error!(worker = self.control.name(), "worker thread panicked: {:?}", e);
            }
        }
        true
    }
}

impl Drop for WorkerThread {
    fn drop(&mut self) {
        if self.control.is_active() {
            self.control.stop();
        }
    }
}
