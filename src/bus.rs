//! Network bus abstraction used by the NetworkBus and RSBus connections.
//!
//! A bus publishes events through named outlets and delivers incoming events
//! to subscribers. Two transports ship with the crate:
//!
//! - [`LocalBus`]: in-process fan-out, used by tests and embedders.
//! - [`UdpBus`]: one formatted log line per UDP datagram, multicast by
//!   default or unicast when a unicast address is configured.

use crate::config::HubConfig;
use crate::error::{HubError, HubResult};
use crate::event::Event;
use crate::parser::LineParser;
use crate::schema::SlotDef;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Receive callback for subscribed events.
pub type EventCallback = Arc<dyn Fn(Event) + Send + Sync>;

/// Largest datagram the UDP transport reads.
const MAX_DATAGRAM: usize = 64 * 1024;

/// How long a UDP receiver blocks before re-checking its stop flag.
const RECEIVE_POLL: Duration = Duration::from_millis(100);

/// Which incoming events a subscriber wants.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SubscriptionFilter {
    /// Everything on the bus.
    #[default]
    All,
    /// Only the listed scopes.
    Scopes(HashSet<String>),
}

impl SubscriptionFilter {
    /// Filter for a set of predefined slots.
    pub fn for_slots(slots: &[SlotDef]) -> Self {
        Self::Scopes(slots.iter().map(SlotDef::scope).collect())
    }

    /// Whether `event` passes.
    pub fn matches(&self, event: &Event) -> bool {
        match self {
            Self::All => true,
            Self::Scopes(scopes) => scopes.contains(&event.scope()),
        }
    }
}

/// Publishing end of one slot.
pub trait Outlet: Send {
    /// Publish one event.
    fn push(&mut self, event: &Event) -> HubResult<()>;
}

/// A publish/subscribe transport.
pub trait Bus: Send + Sync {
    /// Create the outlet for `slot`.
    fn open_outlet(&self, slot: &SlotDef) -> HubResult<Box<dyn Outlet>>;

    /// Deliver matching incoming events to `callback` until the returned
    /// subscription is dropped.
    fn subscribe(&self, filter: SubscriptionFilter, callback: EventCallback) -> HubResult<Subscription>;
}

/// Active subscription; dropping it unsubscribes.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Wrap the teardown of a subscription.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Unsubscribe now.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// LocalBus
// ---------------------------------------------------------------------------

struct LocalSubscriber {
    id: u64,
    filter: SubscriptionFilter,
    callback: EventCallback,
}

#[derive(Default)]
struct LocalInner {
    subscribers: RwLock<Vec<LocalSubscriber>>,
    next_id: AtomicU64,
    outlets: Mutex<Vec<String>>,
}

impl LocalInner {
    fn publish(&self, event: &Event) {
        let targets: Vec<EventCallback> = self
            .subscribers
            .read()
            .iter()
            .filter(|s| s.filter.matches(event))
            .map(|s| Arc::clone(&s.callback))
            .collect();
        for callback in targets {
            callback(event.clone());
        }
    }
}

/// In-process bus. Clones share the same subscribers.
#[derive(Clone, Default)]
pub struct LocalBus {
    inner: Arc<LocalInner>,
}

impl LocalBus {
    /// Empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish directly, as if from another participant.
    pub fn publish(&self, event: &Event) {
        self.inner.publish(event);
    }

    /// Scopes of all outlets opened so far, in order.
    pub fn opened_outlets(&self) -> Vec<String> {
        self.inner.outlets.lock().clone()
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }
}

impl std::fmt::Debug for LocalBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

struct LocalOutlet {
    inner: Arc<LocalInner>,
}

impl Outlet for LocalOutlet {
    fn push(&mut self, event: &Event) -> HubResult<()> {
        self.inner.publish(event);
        Ok(())
    }
}

impl Bus for LocalBus {
    fn open_outlet(&self, slot: &SlotDef) -> HubResult<Box<dyn Outlet>> {
        self.inner.outlets.lock().push(slot.scope());
        Ok(Box::new(LocalOutlet {
            inner: Arc::clone(&self.inner),
        }))
    }

    fn subscribe(&self, filter: SubscriptionFilter, callback: EventCallback) -> HubResult<Subscription> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.write().push(LocalSubscriber {
            id,
            filter,
            callback,
        });
        let inner = Arc::clone(&self.inner);
        Ok(Subscription::new(move || {
            inner.subscribers.write().retain(|s| s.id != id);
        }))
    }
}

// ---------------------------------------------------------------------------
// UdpBus
// ---------------------------------------------------------------------------

/// Addressing of the UDP transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpBusSettings {
    /// Multicast group.
    pub group: Ipv4Addr,
    /// Port used for sending and receiving.
    pub port: u16,
    /// Multicast time-to-live.
    pub ttl: u32,
    /// Send to this host instead of the group.
    pub unicast: Option<String>,
    /// Name of this participant, used in logs and thread names.
    pub participant: String,
}

impl UdpBusSettings {
    /// Settings from the hub configuration.
    pub fn from_config(config: &HubConfig) -> HubResult<Self> {
        let group = config.multicast_address.parse().map_err(|_| {
            HubError::Configuration(format!(
                "multicast address '{}' is not an IPv4 address",
                config.multicast_address
            ))
        })?;
        Ok(Self {
            group,
            port: config.multicast_port,
            ttl: config.multicast_ttl,
            unicast: config.unicast_address.clone(),
            participant: config.namespace_label.clone(),
        })
    }

    fn destination(&self) -> HubResult<SocketAddr> {
        match &self.unicast {
            Some(host) => (host.as_str(), self.port)
                .to_socket_addrs()?
                .next()
                .ok_or_else(|| HubError::Configuration(format!("cannot resolve '{host}'"))),
            None => Ok(SocketAddr::from((self.group, self.port))),
        }
    }
}

/// UDP transport carrying one formatted line per datagram.
pub struct UdpBus {
    settings: UdpBusSettings,
    parser: Arc<dyn LineParser>,
}

impl UdpBus {
    /// Transport using `parser` to encode and decode datagrams.
    pub fn new(settings: UdpBusSettings, parser: Arc<dyn LineParser>) -> Self {
        info!(
            participant = %settings.participant,
            group = %settings.group,
            port = settings.port,
            unicast = ?settings.unicast,
            "network bus configured"
        );
        Self { settings, parser }
    }
}

impl std::fmt::Debug for UdpBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpBus")
            .field("settings", &self.settings)
            .finish()
    }
}

struct UdpOutlet {
    socket: UdpSocket,
    destination: SocketAddr,
    parser: Arc<dyn LineParser>,
}

impl Outlet for UdpOutlet {
    fn push(&mut self, event: &Event) -> HubResult<()> {
        let line = self.parser.format(event);
        self.socket.send_to(line.as_bytes(), self.destination)?;
        Ok(())
    }
}

impl Bus for UdpBus {
    fn open_outlet(&self, slot: &SlotDef) -> HubResult<Box<dyn Outlet>> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.set_multicast_ttl_v4(self.settings.ttl)?;
        let destination = self.settings.destination()?;
        debug!(scope = %slot.scope(), %destination, "opened UDP outlet");
        Ok(Box::new(UdpOutlet {
            socket,
            destination,
            parser: Arc::clone(&self.parser),
        }))
    }

    fn subscribe(&self, filter: SubscriptionFilter, callback: EventCallback) -> HubResult<Subscription> {
        let address = format!("0.0.0.0:{}", self.settings.port);
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, self.settings.port))
            .map_err(|source| HubError::Bind { address, source })?;
        if self.settings.unicast.is_none() {
            socket.join_multicast_v4(&self.settings.group, &Ipv4Addr::UNSPECIFIED)?;
        }
        socket.set_read_timeout(Some(RECEIVE_POLL))?;

        let running = Arc::new(AtomicBool::new(true));
        let parser = Arc::clone(&self.parser);
        let flag = Arc::clone(&running);
        let handle: JoinHandle<()> = thread::Builder::new()
            .name(format!("{}-bus-rx", self.settings.participant))
            .spawn(move || receive_loop(&socket, &flag, parser.as_ref(), &filter, &callback))?;

        Ok(Subscription::new(move || {
            running.store(false, Ordering::Release);
            if handle.join().is_err() {
                warn!("bus receiver panicked");
            }
        }))
    }
}

fn receive_loop(
    socket: &UdpSocket,
    running: &AtomicBool,
    parser: &dyn LineParser,
    filter: &SubscriptionFilter,
    callback: &EventCallback,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    while running.load(Ordering::Acquire) {
        let len = match socket.recv_from(&mut buf) {
            Ok((len, _)) => len,
            Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
                continue
            }
            Err(e) => {
                warn!(error = %e, "bus receive failed");
                continue;
            }
        };
        let text = String::from_utf8_lossy(&buf[..len]);
        match parser.parse(text.trim_end()) {
            Ok(event) if filter.matches(&event) => callback(event),
            Ok(_) => {}
            Err(e) => debug!(error = %e, "ignoring undecodable datagram"),
        }
    }
    debug!("bus receiver stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{TypeTag, Value};
    use crate::parser::XioParser;

    fn collector() -> (EventCallback, Arc<Mutex<Vec<Event>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (Arc::new(move |e: Event| sink.lock().push(e)), seen)
    }

    #[test]
    fn local_bus_fans_out_with_filters() {
        let bus = LocalBus::new();
        let (all, seen_all) = collector();
        let (some, seen_some) = collector();
        let _a = bus.subscribe(SubscriptionFilter::All, all).unwrap();
        let _b = bus
            .subscribe(
                SubscriptionFilter::for_slots(&[SlotDef::new("hand", "x", TypeTag::SfFloat)]),
                some,
            )
            .unwrap();

        let mut outlet = bus
            .open_outlet(&SlotDef::new("hand", "x", TypeTag::SfFloat))
            .unwrap();
        outlet.push(&Event::new(Value::Float(1.0), "hand", "x", 1)).unwrap();
        bus.publish(&Event::new(Value::Float(2.0), "hand", "y", 2));

        assert_eq!(seen_all.lock().len(), 2);
        assert_eq!(seen_some.lock().len(), 1);
        assert_eq!(bus.opened_outlets(), vec!["hand/x".to_string()]);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let bus = LocalBus::new();
        let (cb, seen) = collector();
        let sub = bus.subscribe(SubscriptionFilter::All, cb).unwrap();
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(&Event::new(Value::Bool(true), "", "b", 0));
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn udp_unicast_round_trip() {
        let port = {
            let probe = UdpSocket::bind("127.0.0.1:0").unwrap();
            probe.local_addr().unwrap().port()
        };
        let settings = UdpBusSettings {
            group: Ipv4Addr::new(224, 21, 12, 68),
            port,
            ttl: 1,
            unicast: Some("127.0.0.1".into()),
            participant: "test".into(),
        };
        let bus = UdpBus::new(settings, Arc::new(XioParser::new()));
        let (cb, seen) = collector();
        let sub = bus.subscribe(SubscriptionFilter::All, cb).unwrap();
        let slot = SlotDef::new("glove", "bend", TypeTag::SfInt32);
        let mut outlet = bus.open_outlet(&slot).unwrap();
        let event = Event::new(Value::Int(7), "glove", "bend", 1234);
        for _ in 0..20 {
            outlet.push(&event).unwrap();
            thread::sleep(Duration::from_millis(50));
            if !seen.lock().is_empty() {
                break;
            }
        }
        sub.cancel();
        assert_eq!(seen.lock().first(), Some(&event));
    }
}
