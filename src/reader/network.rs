//! Live relay from a network bus.

use super::{ReadStep, SourceReader, PAUSE_POLL};
use crate::bus::{Bus, EventCallback, Subscription, SubscriptionFilter};
use crate::clock::now_millis;
use crate::config::Connection;
use crate::context::HubContext;
use crate::error::HubResult;
use crate::schema::SlotSchema;
use crate::worker::WorkerControl;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Subscribes to the bus and stamps incoming events with the arrival time.
///
/// Events arrive on the transport's own thread. When the delay queue is
/// full they are dropped, since a live source cannot be back-pressured.
#[derive(Debug)]
pub struct NetworkReader {
    kind: Connection,
    subscription: Option<Subscription>,
    dropped: Arc<AtomicU64>,
}

impl NetworkReader {
    /// Subscribe to `bus`, restricted to the predefined slots when a slot file is configured.
    pub fn subscribe(ctx: &Arc<HubContext>, bus: &dyn Bus, kind: Connection) -> HubResult<Self> {
        let filter = match &ctx.config.slot_file {
            Some(path) => SubscriptionFilter::for_slots(SlotSchema::load(path)?.slots()),
            None => SubscriptionFilter::All,
        };
        let dropped = Arc::new(AtomicU64::new(0));
        let callback: EventCallback = {
            let queue = Arc::clone(&ctx.queue);
            let dropped = Arc::clone(&dropped);
            Arc::new(move |mut event| {
                event.time = now_millis();
                if queue.try_put(event).is_err() {
                    let n = dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    if n == 1 || n % 1000 == 0 {
                        warn!(dropped = n, "delay queue full; dropping live events");
                    }
                }
            })
        };
        let subscription = bus.subscribe(filter, callback)?;
        info!(connection = %kind, "subscribed to network bus");
        Ok(Self {
            kind,
            subscription: Some(subscription),
            dropped,
        })
    }

    /// Events dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl SourceReader for NetworkReader {
    fn kind(&self) -> Connection {
        self.kind
    }

    fn step(&mut self, control: &WorkerControl) -> HubResult<ReadStep> {
        control.nap(PAUSE_POLL);
        Ok(ReadStep::Continue)
    }

    fn shutdown(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.cancel();
        }
        if self.dropped() > 0 {
            info!(dropped = self.dropped(), "network reader dropped events");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;
    use crate::config::HubConfig;
    use crate::event::{Event, Value};
    use tracing_test::traced_test;

    #[test]
    fn restamps_and_queues_bus_events() {
        let ctx = HubContext::new(HubConfig {
            input: Connection::NetworkBus,
            silent: true,
            ..HubConfig::default()
        });
        let bus = LocalBus::new();
        let mut reader = NetworkReader::subscribe(&ctx, &bus, Connection::NetworkBus).unwrap();
        let before = now_millis();
        bus.publish(&Event::new(Value::Int(3), "a", "b", 5));
        let queued = ctx.queue.peek().unwrap();
        assert!(queued.time >= before);
        assert_eq!(queued.value, Value::Int(3));
        reader.shutdown();
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    #[traced_test]
    fn drops_when_queue_is_full() {
        let ctx = HubContext::new(HubConfig {
            input: Connection::NetworkBus,
            queue_capacity: 2,
            silent: true,
            ..HubConfig::default()
        });
        let bus = LocalBus::new();
        let reader = NetworkReader::subscribe(&ctx, &bus, Connection::RSBus).unwrap();
        for i in 0..5 {
            bus.publish(&Event::new(Value::Int(i), "", "x", 0));
        }
        assert_eq!(ctx.queue.len(), 2);
        assert_eq!(reader.dropped(), 3);
        assert!(logs_contain("delay queue full; dropping live events"));
    }
}
