//! Time-release queue between the source reader and the sink writer.
//!
//! Events are ordered by recorded timestamp and become available once
//! `event.time + replay_delay <= now`. The delay is read from the shared
//! [`ReplayClock`] on every check, so pausing or seeking takes effect without
//! touching queued items.
//!
//! `reset()` swaps the whole heap for an empty one and starts a new epoch.
//! Producers that tag their items with the epoch they were produced in get
//! stale items discarded atomically, which is how a seek guarantees that
//! nothing from before the seek shows up after it.

use crate::clock::{now_millis, ReplayClock};
use crate::event::{Event, Timestamp};
use parking_lot::{Condvar, Mutex};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Upper bound for a single condvar wait while the head is not yet due.
const MAX_WAIT_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug)]
struct Entry {
    event: Event,
    seq: u64,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.event
            .time
            .cmp(&other.event.time)
            .then(self.seq.cmp(&other.seq))
    }
}

#[derive(Debug, Default)]
struct Inner {
    heap: BinaryHeap<Reverse<Entry>>,
    seq: u64,
    epoch: u64,
}

/// Result of an epoch-tagged offer.
#[derive(Debug, PartialEq)]
pub enum Offer {
    /// The event was queued.
    Accepted,
    /// The event belongs to an epoch that was reset away; it was dropped.
    Stale,
    /// The queue stayed full for the whole timeout; the event is handed back.
    Full(Event),
}

/// Snapshot used by the `queue` console command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSummary {
    /// Number of queued events.
    pub size: usize,
    /// Smallest queued timestamp.
    pub first: Option<Timestamp>,
    /// Largest queued timestamp.
    pub last: Option<Timestamp>,
}

/// Priority queue releasing events at their replay time.
#[derive(Debug)]
pub struct DelayQueue {
    clock: Arc<ReplayClock>,
    capacity: Option<usize>,
    inner: Mutex<Inner>,
    available: Condvar,
    space: Condvar,
}

impl DelayQueue {
    /// Queue without a size limit.
    pub fn unbounded(clock: Arc<ReplayClock>) -> Self {
        Self::with_capacity(clock, None)
    }

    /// Queue holding at most `capacity` events.
    pub fn bounded(clock: Arc<ReplayClock>, capacity: usize) -> Self {
        Self::with_capacity(clock, Some(capacity.max(1)))
    }

    fn with_capacity(clock: Arc<ReplayClock>, capacity: Option<usize>) -> Self {
        Self {
            clock,
            capacity,
            inner: Mutex::new(Inner::default()),
            available: Condvar::new(),
            space: Condvar::new(),
        }
    }

    /// Configured capacity, if bounded.
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    fn is_full(&self, inner: &Inner) -> bool {
        self.capacity.is_some_and(|cap| inner.heap.len() >= cap)
    }

    fn push(&self, inner: &mut Inner, event: Event) {
        inner.seq += 1;
        let seq = inner.seq;
        inner.heap.push(Reverse(Entry { event, seq }));
        self.available.notify_one();
    }

    /// Insert, blocking while a bounded queue is full.
    pub fn put(&self, event: Event) {
        let mut inner = self.inner.lock();
        while self.is_full(&inner) {
            self.space.wait(&mut inner);
        }
        self.push(&mut inner, event);
    }

    /// Insert without blocking; hands the event back if the queue is full.
    pub fn try_put(&self, event: Event) -> Result<(), Event> {
        let mut inner = self.inner.lock();
        if self.is_full(&inner) {
            return Err(event);
        }
        self.push(&mut inner, event);
        Ok(())
    }

    /// Insert, waiting at most `timeout` for space.
    pub fn offer(&self, event: Event, timeout: Duration) -> Result<(), Event> {
        let epoch = self.epoch();
        match self.offer_in_epoch(event, epoch, timeout) {
            Offer::Full(event) => Err(event),
            Offer::Accepted | Offer::Stale => Ok(()),
        }
    }

    /// Insert an event produced during `epoch`.
    ///
    /// The epoch check and the insertion happen under one lock, so an event
    /// can never slip in after the reset that made it stale.
    pub fn offer_in_epoch(&self, event: Event, epoch: u64, timeout: Duration) -> Offer {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if inner.epoch != epoch {
                return Offer::Stale;
            }
            if !self.is_full(&inner) {
                self.push(&mut inner, event);
                return Offer::Accepted;
            }
            if self.space.wait_until(&mut inner, deadline).timed_out() {
                if inner.epoch != epoch {
                    return Offer::Stale;
                }
                if self.is_full(&inner) {
                    return Offer::Full(event);
                }
            }
        }
    }

    /// Block until the earliest event is due and remove it.
    pub fn take(&self) -> Event {
        loop {
            if let Some(event) = self.poll(Duration::from_secs(3600)) {
                return event;
            }
        }
    }

    /// Like [`take`](Self::take), giving up after `timeout`.
    pub fn poll(&self, timeout: Duration) -> Option<Event> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            let wait = match inner.heap.peek() {
                Some(Reverse(head)) => {
                    let remaining = self.clock.release_time(head.event.time) - now_millis();
                    if remaining <= 0 {
                        let Reverse(entry) = inner.heap.pop()?;
                        self.space.notify_one();
                        return Some(entry.event);
                    }
                    Duration::from_millis(remaining.unsigned_abs()).min(MAX_WAIT_SLICE)
                }
                None => MAX_WAIT_SLICE,
            };
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let wait = wait.min(deadline - now);
            self.available.wait_for(&mut inner, wait);
        }
    }

    /// Earliest queued event, due or not.
    pub fn peek(&self) -> Option<Event> {
        self.inner
            .lock()
            .heap
            .peek()
            .map(|Reverse(entry)| entry.event.clone())
    }

    /// Number of queued events.
    pub fn len(&self) -> usize {
        self.inner.lock().heap.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current epoch.
    pub fn epoch(&self) -> u64 {
        self.inner.lock().epoch
    }

    /// Discard everything and start a new epoch, which is returned.
    pub fn reset(&self) -> u64 {
        let (old, epoch) = {
            let mut inner = self.inner.lock();
            inner.epoch += 1;
            (std::mem::take(&mut inner.heap), inner.epoch)
        };
        self.space.notify_all();
        self.available.notify_all();
        tracing::debug!(discarded = old.len(), epoch, "delay queue reset");
        epoch
    }

    /// Wake waiting consumers so they re-read the replay delay.
    pub fn wake(&self) {
        self.available.notify_all();
    }

    /// Size and timestamp range of the queued events.
    pub fn summary(&self) -> QueueSummary {
        let inner = self.inner.lock();
        QueueSummary {
            size: inner.heap.len(),
            first: inner.heap.peek().map(|Reverse(e)| e.event.time),
            last: inner.heap.iter().map(|Reverse(e)| e.event.time).max(),
        }
    }
}
