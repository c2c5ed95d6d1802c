//! Connectivity gate.
//!
//! # Design
//! The gate does not detect reachability itself. The host's platform monitor
//! pushes status changes in with `set_reachable`, and the coordinator reads
//! the current value with `is_reachable`, a single atomic load.
//!
//! Observers are notified on transitions only. `subscribe` returns a
//! `Subscription` that holds a weak reference back to the gate; dropping or
//! cancelling it removes the observer. A subscription never keeps the gate
//! alive.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::info;

/// Network status reported to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    Online,
    Offline,
}

impl NetworkStatus {
    pub fn is_online(self) -> bool {
        self == NetworkStatus::Online
    }
}

type Observer = Arc<dyn Fn(NetworkStatus) + Send + Sync>;

struct GateInner {
    reachable: AtomicBool,
    next_id: AtomicU64,
    observers: Mutex<BTreeMap<u64, Observer>>,
}

/// Point-in-time reachability plus transition notifications. Cheap to clone.
#[derive(Clone)]
pub struct ConnectivityGate {
    inner: Arc<GateInner>,
}

impl ConnectivityGate {
    pub fn new(initially_reachable: bool) -> Self {
        Self {
            inner: Arc::new(GateInner {
                reachable: AtomicBool::new(initially_reachable),
                next_id: AtomicU64::new(0),
                observers: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    pub fn online() -> Self {
        Self::new(true)
    }

    pub fn offline() -> Self {
        Self::new(false)
    }

    pub fn is_reachable(&self) -> bool {
        self.inner.reachable.load(Ordering::Acquire)
    }

    pub fn status(&self) -> NetworkStatus {
        if self.is_reachable() {
            NetworkStatus::Online
        } else {
            NetworkStatus::Offline
        }
    }

    /// Record the latest reachability. Observers run on the calling thread,
    /// and only when the value actually changed.
    pub fn set_reachable(&self, reachable: bool) {
        let previous = self.inner.reachable.swap(reachable, Ordering::AcqRel);
        if previous == reachable {
            return;
        }
        let status = if reachable {
            NetworkStatus::Online
        } else {
            NetworkStatus::Offline
        };
        info!(?status, "reachability changed");

        let observers: Vec<Observer> = self
            .inner
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for observer in observers {
            observer(status);
        }
    }

    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(NetworkStatus) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(observer));
        Subscription {
            gate: Arc::downgrade(&self.inner),
            id,
        }
    }

    pub fn observer_count(&self) -> usize {
        self.inner
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for ConnectivityGate {
    fn default() -> Self {
        Self::online()
    }
}

impl std::fmt::Debug for ConnectivityGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityGate")
            .field("reachable", &self.is_reachable())
            .field("observers", &self.observer_count())
            .finish()
    }
}

/// Handle for one observer. Unsubscribes on `cancel` or drop.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    gate: Weak<GateInner>,
    id: u64,
}

impl Subscription {
    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(gate) = self.gate.upgrade() {
            gate.observers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn reports_current_state() {
        let gate = ConnectivityGate::offline();
        assert!(!gate.is_reachable());
        gate.set_reachable(true);
        assert!(gate.is_reachable());
        assert_eq!(gate.status(), NetworkStatus::Online);
    }

    #[test]
    fn observers_fire_on_transitions_only() {
        let gate = ConnectivityGate::online();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = gate.subscribe(move |status| sink.lock().unwrap().push(status));

        gate.set_reachable(true);
        gate.set_reachable(false);
        gate.set_reachable(false);
        gate.set_reachable(true);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![NetworkStatus::Offline, NetworkStatus::Online]
        );
    }

    #[test]
    fn cancelled_subscription_stops_notifications() {
        let gate = ConnectivityGate::online();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let sub = gate.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(gate.observer_count(), 1);

        gate.set_reachable(false);
        sub.cancel();
        gate.set_reachable(true);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(gate.observer_count(), 0);
    }

    #[test]
    fn subscription_outliving_gate_is_harmless() {
        let gate = ConnectivityGate::online();
        let sub = gate.subscribe(|_| {});
        drop(gate);
        drop(sub);
    }

    #[test]
    fn clones_share_state() {
        let gate = ConnectivityGate::online();
        let clone = gate.clone();
        clone.set_reachable(false);
        assert!(!gate.is_reachable());
    }
}
