//! Replay from a log file through the streaming log buffer.

use super::{ReadStep, SourceReader};
use crate::config::Connection;
use crate::context::HubContext;
use crate::error::HubResult;
use crate::event::Timestamp;
use crate::log_buffer::{BufferSettings, BufferStats, Delivery, StreamingLogBuffer};
use crate::queue::Offer;
use crate::worker::WorkerControl;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Bounded wait on the buffer hand-off and on queue space.
const HANDOFF_WAIT: Duration = Duration::from_millis(500);

/// Moves events from the log buffer into the delay queue.
#[derive(Debug)]
pub struct DiskReader {
    ctx: Arc<HubContext>,
    buffer: Arc<StreamingLogBuffer>,
    deliveries: Receiver<Delivery>,
    pending: Option<Delivery>,
}

/// Seek and inspection handle for a running [`DiskReader`].
#[derive(Debug, Clone)]
pub struct DiskControl {
    buffer: Arc<StreamingLogBuffer>,
}

impl DiskControl {
    /// Reposition the buffer; `epoch` is the queue epoch started for this seek.
    pub fn seek(&self, target: Timestamp, epoch: u64) {
        self.buffer.seek(target, epoch);
    }

    /// Window statistics.
    pub fn stats(&self) -> BufferStats {
        self.buffer.stats()
    }
}

impl DiskReader {
    /// Open the configured log file and start its buffer thread.
    pub fn open(ctx: &Arc<HubContext>) -> HubResult<(Self, DiskControl)> {
        let settings = BufferSettings::from_config(&ctx.config);
        let (buffer, deliveries) = StreamingLogBuffer::open(&ctx.config.file, settings, ctx)?;
        let buffer = Arc::new(buffer);
        info!(path = %ctx.config.file.display(), "replaying from disk");
        let control = DiskControl {
            buffer: Arc::clone(&buffer),
        };
        Ok((
            Self {
                ctx: Arc::clone(ctx),
                buffer,
                deliveries,
                pending: None,
            },
            control,
        ))
    }
}

impl SourceReader for DiskReader {
    fn kind(&self) -> Connection {
        Connection::Disk
    }

    fn step(&mut self, _control: &WorkerControl) -> HubResult<ReadStep> {
        let delivery = match self.pending.take() {
            Some(delivery) => delivery,
            None => match self.deliveries.recv_timeout(HANDOFF_WAIT) {
                Ok(delivery) => delivery,
                Err(RecvTimeoutError::Timeout) => return Ok(ReadStep::Continue),
                Err(RecvTimeoutError::Disconnected) => return Ok(ReadStep::Exhausted),
            },
        };
        let epoch = delivery.epoch;
        match self.ctx.queue.offer_in_epoch(delivery.event, epoch, HANDOFF_WAIT) {
            Offer::Accepted => {}
            Offer::Stale => debug!(epoch, "dropped event from before the last seek"),
            Offer::Full(event) => self.pending = Some(Delivery { event, epoch }),
        }
        Ok(ReadStep::Continue)
    }

    fn shutdown(&mut self) {
        self.buffer.stop();
        self.buffer.join_if_finished();
    }
}
