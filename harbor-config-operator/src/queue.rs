//! Scheduling bookkeeping for the dispatcher.
//!
//! Decides which objects need a pass: spec or deletion changes, due retries
//! and periodic resyncs. Keeps at most one pass in flight per object.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use tokio::time::Instant;

use crate::config::ControllerConfig;
use crate::resource::{HarborConfiguration, ObjectKey};

/// Hash of the parts of an object that call for a new pass.
///
/// Finalizers and status are left out: the controller writes those itself.
pub fn fingerprint(obj: &HarborConfiguration) -> u64 {
    let mut hasher = DefaultHasher::new();
    // Spec serialization cannot fail: it holds only strings, numbers and JSON values.
    serde_json::to_string(&obj.spec)
        .unwrap_or_default()
        .hash(&mut hasher);
    obj.metadata.deletion_timestamp.hash(&mut hasher);
    hasher.finish()
}

/// How a pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Retry with backoff.
    Retry,
    /// Wait until the object changes.
    Park,
    /// Interrupted by shutdown; run again on the next start.
    Cancelled,
}

#[derive(Debug, Default)]
struct Entry {
    fingerprint: Option<u64>,
    failures: u32,
    next_attempt: Option<Instant>,
    in_flight: bool,
}

#[derive(Debug)]
pub struct WorkQueue {
    entries: HashMap<ObjectKey, Entry>,
    backoff_base: Duration,
    backoff_max: Duration,
    resync_interval: Duration,
}

impl WorkQueue {
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            entries: HashMap::new(),
            backoff_base: config.backoff_base,
            backoff_max: config.backoff_max,
            resync_interval: config.resync_interval,
        }
    }

    /// Pick the objects that need a pass now and mark them in flight.
    pub fn due(&mut self, objects: &[HarborConfiguration], now: Instant) -> Vec<ObjectKey> {
        // Forget objects that left the store, unless a pass still runs.
        self.entries
            .retain(|key, e| e.in_flight || objects.iter().any(|o| &o.key() == key));

        let mut ready = Vec::new();
        for obj in objects {
            let key = obj.key();
            let fp = fingerprint(obj);
            let entry = self.entries.entry(key.clone()).or_default();
            if entry.in_flight {
                continue;
            }

            let changed = entry.fingerprint != Some(fp);
            let scheduled = entry.next_attempt.is_some_and(|at| now >= at);
            if changed || scheduled {
                if changed {
                    entry.failures = 0;
                }
                entry.fingerprint = Some(fp);
                entry.next_attempt = None;
                entry.in_flight = true;
                ready.push(key);
            }
        }
        ready
    }

    /// Record the end of a pass.
    pub fn complete(&mut self, key: &ObjectKey, outcome: Outcome, now: Instant) {
        let Some(entry) = self.entries.get_mut(key) else {
            return;
        };
        entry.in_flight = false;
        match outcome {
            Outcome::Success => {
                entry.failures = 0;
                entry.next_attempt = Some(now + self.resync_interval);
            }
            Outcome::Retry => {
                entry.failures = entry.failures.saturating_add(1);
                entry.next_attempt = Some(now + backoff(self.backoff_base, self.backoff_max, entry.failures));
            }
            Outcome::Park => {
                entry.failures = entry.failures.saturating_add(1);
                entry.next_attempt = None;
            }
            Outcome::Cancelled => {
                entry.fingerprint = None;
                entry.next_attempt = None;
            }
        }
    }

    /// When the next attempt is scheduled, if at all.
    pub fn next_attempt(&self, key: &ObjectKey) -> Option<Instant> {
        self.entries.get(key).and_then(|e| e.next_attempt)
    }

    pub fn failures(&self, key: &ObjectKey) -> u32 {
        self.entries.get(key).map(|e| e.failures).unwrap_or(0)
    }

    pub fn in_flight(&self) -> usize {
        self.entries.values().filter(|e| e.in_flight).count()
    }
}

/// Exponential backoff: `base * 2^(failures-1)`, capped at `max`.
pub fn backoff(base: Duration, max: Duration, failures: u32) -> Duration {
    let exp = failures.saturating_sub(1).min(20);
    base.saturating_mul(1u32 << exp).min(max)
}
