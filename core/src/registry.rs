//! Fingerprint registry: who is waiting on which in-flight request.
//!
//! # Design
//! One coarse mutex guards a map from fingerprint to waiters. `register` and
//! `drain` are both a single critical section, so the check-and-insert that
//! decides whether to dispatch cannot interleave with a fan-out, and every
//! waiter is handed out by exactly one `drain`.
//!
//! A waiter's completion is either a oneshot channel (the `Pending` future
//! owns the receiving end) or a boxed callback. Dropping a waiter undelivered
//! closes its channel, which the receiving side reports as `Cancelled`.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use crate::error::ApiError;
use crate::fingerprint::Fingerprint;
use crate::types::Payload;

/// What one exchange (or cache read) resolved to, shared by every waiter.
pub type Outcome = Result<Payload, ApiError>;

/// How a waiter wants its outcome.
pub enum Completion {
    Channel(oneshot::Sender<Outcome>),
    Callback(Box<dyn FnOnce(Outcome) + Send>),
}

impl Completion {
    pub fn channel() -> (Self, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        (Completion::Channel(tx), rx)
    }

    pub fn callback<F>(f: F) -> Self
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        Completion::Callback(Box::new(f))
    }

    fn deliver(self, outcome: Outcome) {
        match self {
            // The receiver may have been dropped by a caller that lost interest.
            Completion::Channel(tx) => {
                let _ = tx.send(outcome);
            }
            Completion::Callback(f) => f(outcome),
        }
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Completion::Channel(_) => f.write_str("Completion::Channel"),
            Completion::Callback(_) => f.write_str("Completion::Callback"),
        }
    }
}

/// A registered completion.
#[derive(Debug)]
pub struct Waiter {
    completion: Completion,
    registered_at: Instant,
}

impl Waiter {
    pub fn new(completion: Completion) -> Self {
        Self {
            completion,
            registered_at: Instant::now(),
        }
    }

    pub fn waited(&self) -> Duration {
        self.registered_at.elapsed()
    }

    pub fn deliver(self, outcome: Outcome) {
        self.completion.deliver(outcome);
    }
}

/// Waiting completions keyed by fingerprint.
#[derive(Debug, Default)]
pub struct Registry {
    entries: Mutex<HashMap<Fingerprint, Vec<Waiter>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `waiter` under `fingerprint`. Returns `true` when other waiters
    /// were already registered, i.e. an exchange is already in flight.
    pub fn register(&self, fingerprint: &Fingerprint, waiter: Waiter) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let waiters = entries.entry(fingerprint.clone()).or_default();
        let already_in_flight = !waiters.is_empty();
        waiters.push(waiter);
        already_in_flight
    }

    /// Remove and return every waiter for `fingerprint`.
    pub fn drain(&self, fingerprint: &Fingerprint) -> Vec<Waiter> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(fingerprint)
            .unwrap_or_default()
    }

    pub fn is_in_flight(&self, fingerprint: &Fingerprint) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(fingerprint)
    }

    /// Number of waiters registered under `fingerprint`.
    pub fn waiting(&self, fingerprint: &Fingerprint) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(fingerprint)
            .map_or(0, Vec::len)
    }
}
