//! Explicitly constructed state shared by all hub components.

use crate::clock::ReplayClock;
use crate::config::HubConfig;
use crate::messages::Messenger;
use crate::parser::{LineParser, XioParser};
use crate::queue::DelayQueue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Everything a reader, writer or control surface needs to reach.
///
/// One context exists per hub; tests build as many independent ones as
/// they like.
pub struct HubContext {
    /// Read-only configuration.
    pub config: Arc<HubConfig>,
    /// Replay timing.
    pub clock: Arc<ReplayClock>,
    /// Queue between reader and writer.
    pub queue: Arc<DelayQueue>,
    /// Operator-facing messages.
    pub messages: Arc<Messenger>,
    /// Log line encoding.
    pub parser: Arc<dyn LineParser>,
    shutdown: AtomicBool,
}

impl HubContext {
    /// Build a context with the default line parser.
    pub fn new(config: HubConfig) -> Arc<Self> {
        Self::with_parser(config, Arc::new(XioParser::new()))
    }

    /// Build a context around a custom line parser.
    pub fn with_parser(config: HubConfig, parser: Arc<dyn LineParser>) -> Arc<Self> {
        let clock = Arc::new(ReplayClock::new(config.offset));
        let queue = Arc::new(DelayQueue::bounded(clock.clone(), config.queue_capacity));
        let messages = Arc::new(Messenger::new(!config.silent));
        Arc::new(Self {
            config: Arc::new(config),
            clock,
            queue,
            messages,
            parser,
            shutdown: AtomicBool::new(false),
        })
    }

    /// Ask the hub to shut down; used by idle detection and control surfaces.
    pub fn request_shutdown(&self, reason: &str) {
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            tracing::info!(reason, "shutdown requested");
        }
    }

    /// Whether shutdown was requested.
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for HubContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubContext")
            .field("input", &self.config.input)
            .field("output", &self.config.output)
            .field("queue_len", &self.queue.len())
            .field("shutdown", &self.shutdown_requested())
            .finish()
    }
}
