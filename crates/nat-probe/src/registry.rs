//! Correlation registry.
//!
//! Process-wide store of received callbacks keyed by correlation id. The
//! callback handler writes into it, round-trip coordinators read from it
//! with a bounded wait.
//!
//! # Waiting
//!
//! ```text
//!   await_record(id, wait)
//!        │
//!        ├── get(id) ── hit ───────────────► Received(record)
//!        │
//!        ├── deadline passed ──────────────► TimedOut { waited }
//!        │
//!        └── sleep(min(poll, remaining)) ─┐
//!              or woken early by put()    │
//!        ▲────────────────────────────────┘
//! ```
//!
//! Records are never removed unless [`CorrelationRegistry::prune_older_than`]
//! is called explicitly.

use crate::types::CorrelationId;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

/// Default interval between registry polls while awaiting a callback.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A callback as seen by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackRecord {
    pub correlation_id: CorrelationId,
    /// Wall-clock arrival time
    pub received_at: DateTime<Utc>,
    /// Peer address observed on the callback connection
    pub source_ip: Option<String>,
    /// Payload exactly as received
    pub data: Value,
}

impl CallbackRecord {
    pub fn new(correlation_id: CorrelationId, source_ip: Option<String>, data: Value) -> Self {
        Self {
            correlation_id,
            received_at: Utc::now(),
            source_ip,
            data,
        }
    }
}

/// Outcome of [`CorrelationRegistry::await_record`].
#[derive(Debug, Clone, PartialEq)]
pub enum AwaitOutcome {
    Received(CallbackRecord),
    TimedOut { waited: Duration },
}

impl AwaitOutcome {
    pub fn is_received(&self) -> bool {
        matches!(self, AwaitOutcome::Received(_))
    }
}

/// Concurrent map of correlation id to the last callback received for it.
#[derive(Debug)]
pub struct CorrelationRegistry {
    records: DashMap<CorrelationId, CallbackRecord>,
    arrivals: Notify,
    poll_interval: Duration,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::with_poll_interval(DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        Self {
            records: DashMap::new(),
            arrivals: Notify::new(),
            poll_interval,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Insert or overwrite the record for `id`. Last write wins.
    pub fn put(&self, id: CorrelationId, record: CallbackRecord) {
        if let Some(previous) = self.records.insert(id.clone(), record) {
            debug!(
                correlation_id = %id,
                previous_received_at = %previous.received_at,
                "Overwrote existing callback record"
            );
        }
        self.arrivals.notify_waiters();
    }

    /// Non-blocking point lookup.
    pub fn get(&self, id: &CorrelationId) -> Option<CallbackRecord> {
        self.records.get(id).map(|entry| entry.value().clone())
    }

    /// Wait up to `wait` for a record to appear under `id`.
    ///
    /// Returns no earlier than the deadline on timeout and never more than
    /// one poll interval after it.
    pub async fn await_record(&self, id: &CorrelationId, wait: Duration) -> AwaitOutcome {
        let started = Instant::now();
        let deadline = started + wait;

        loop {
            // Register interest before checking so a put() racing with the
            // lookup still wakes us.
            let arrival = self.arrivals.notified();
            tokio::pin!(arrival);
            arrival.as_mut().enable();

            if let Some(record) = self.get(id) {
                return AwaitOutcome::Received(record);
            }

            let now = Instant::now();
            if now >= deadline {
                return AwaitOutcome::TimedOut {
                    waited: now - started,
                };
            }

            let nap = self.poll_interval.min(deadline - now);
            tokio::select! {
                _ = &mut arrival => {}
                _ = tokio::time::sleep(nap) => {}
            }
        }
    }

    /// Copy of every record currently held.
    pub fn snapshot(&self) -> HashMap<CorrelationId, CallbackRecord> {
        self.records
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop records received more than `max_age` ago. Returns how many went.
    pub fn prune_older_than(&self, max_age: Duration) -> usize {
        let Ok(max_age) = chrono::Duration::from_std(max_age) else {
            return 0;
        };
        let cutoff = Utc::now() - max_age;
        let before = self.records.len();
        self.records.retain(|_, record| record.received_at >= cutoff);
        before.saturating_sub(self.records.len())
    }
}

impl Default for CorrelationRegistry {
    fn default() -> Self {
        Self::new()
    }
}
