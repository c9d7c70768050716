//! Fan-out of snapshots and one-shot events to every connected subscriber.
//!
//! The subscriber set sits behind a lock; `publish` copies it, delivers outside the
//! lock, then removes whoever failed. A failing subscriber never blocks the rest.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::DeliveryError;
use crate::types::{HubMessage, Snapshot};

pub type SubscriberId = u64;

pub const OPTIMIZATION_COMPLETE: &str = "optimizationComplete";

/// Where a subscriber's messages go. The transport behind it belongs to the caller.
///
/// Implementations report a failed delivery by returning `Err`, which removes the
/// subscriber. A panic is contained only when the build unwinds; release builds
/// abort on panic.
pub trait Deliver: Send + Sync {
    fn deliver(&self, msg: &HubMessage) -> Result<(), DeliveryError>;
}

impl Deliver for mpsc::Sender<HubMessage> {
    fn deliver(&self, msg: &HubMessage) -> Result<(), DeliveryError> {
        match self.try_send(msg.clone()) {
            Ok(()) => Ok(()),
            // lagging, not gone: this one message is dropped for this subscriber
            Err(TrySendError::Full(_)) => {
                debug!("subscriber queue full, dropping {}", msg.event_name());
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(DeliveryError::Closed),
        }
    }
}

pub struct BroadcastHub {
    subscribers: RwLock<HashMap<SubscriberId, Arc<dyn Deliver>>>,
    next_id: AtomicU64,
    count_tx: watch::Sender<usize>,
    latest: RwLock<Option<(Instant, Arc<Snapshot>)>>,
    queue_depth: usize,
}

impl BroadcastHub {
    pub fn new(queue_depth: usize) -> Self {
        let (count_tx, _) = watch::channel(0);
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            count_tx,
            latest: RwLock::new(None),
            queue_depth: queue_depth.max(1),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<SubscriberId, Arc<dyn Deliver>>> {
        self.subscribers.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<SubscriberId, Arc<dyn Deliver>>> {
        self.subscribers.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn subscribe(&self, sink: Arc<dyn Deliver>) -> SubscriberId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subs = self.write();
        subs.insert(id, sink);
        self.count_tx.send_replace(subs.len());
        debug!(id, total = subs.len(), "subscriber added");
        id
    }

    /// Subscribe with a bounded channel; the receiver yields every future message.
    pub fn subscribe_channel(&self) -> (SubscriberId, mpsc::Receiver<HubMessage>) {
        let (tx, rx) = mpsc::channel(self.queue_depth);
        (self.subscribe(Arc::new(tx)), rx)
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subs = self.write();
        let removed = subs.remove(&id).is_some();
        if removed {
            self.count_tx.send_replace(subs.len());
            debug!(id, total = subs.len(), "subscriber removed");
        }
        removed
    }

    /// Deliver a snapshot to every subscriber; returns how many accepted it.
    pub fn publish(&self, snapshot: Arc<Snapshot>) -> usize {
        *self.latest.write().unwrap_or_else(|e| e.into_inner()) =
            Some((Instant::now(), Arc::clone(&snapshot)));
        self.fan_out(&HubMessage::Snapshot(snapshot))
    }

    /// Deliver a one-shot named event to every subscriber.
    pub fn notify(&self, event: &str, payload: serde_json::Value) -> usize {
        self.fan_out(&HubMessage::Event {
            event: event.to_string(),
            payload,
        })
    }

    // A sink that returns Err is dropped and the rest still receive the message.
    // catch_unwind only helps in unwinding builds.
    fn fan_out(&self, msg: &HubMessage) -> usize {
        let targets: Vec<(SubscriberId, Arc<dyn Deliver>)> = self
            .read()
            .iter()
            .map(|(id, s)| (*id, Arc::clone(s)))
            .collect();

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, sink) in targets {
            let res = catch_unwind(AssertUnwindSafe(|| sink.deliver(msg)))
                .unwrap_or_else(|_| Err(DeliveryError::Transport("subscriber panicked".into())));
            match res {
                Ok(()) => delivered += 1,
                Err(e) => {
                    info!(id, "dropping subscriber: {e}");
                    dead.push(id);
                }
            }
        }
        for id in dead {
            self.unsubscribe(id);
        }
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.read().len()
    }

    /// Observe the subscriber count (the scheduler idles at zero).
    pub fn watch_count(&self) -> watch::Receiver<usize> {
        self.count_tx.subscribe()
    }

    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.latest
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|(_, snap)| Arc::clone(snap))
    }

    /// The latest snapshot, if it was published less than `max_age` ago.
    pub fn latest_within(&self, max_age: Duration) -> Option<Arc<Snapshot>> {
        self.latest
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .filter(|(at, _)| at.elapsed() < max_age)
            .map(|(_, snap)| Arc::clone(snap))
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(16)
    }
}
