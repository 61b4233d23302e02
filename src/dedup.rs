//! Resolved-event tracking.
//!
//! [`DedupStore`] remembers which event identifiers already produced a
//! delivered (or deliberately abandoned) notification, so that events
//! spanning several polls are fetched and sent once.
//!
//! The in-memory window is authoritative; every resolution is also written
//! through to the [`StateStore`]. An entry stays queued until its write
//! succeeds, so a failed write or a write abandoned mid-flight is retried
//! by the next resolution or [`DedupStore::flush_pending`].
//!
//! The window is bounded by `capacity` (oldest evicted first) and by age.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use frigate_relay_core::models::{DedupEntry, DeliveryOutcome};
use frigate_relay_core::store::StateStore;

struct Window {
    entries: HashMap<String, DedupEntry>,
    /// Identifiers in resolution order, oldest first.
    order: VecDeque<String>,
    unflushed: Vec<DedupEntry>,
    send_failures: HashMap<String, u32>,
}

pub struct DedupStore {
    store: Arc<dyn StateStore>,
    window: Mutex<Window>,
    capacity: usize,
    max_age_secs: i64,
}

impl DedupStore {
    /// Rebuild the window from the store. A read failure starts empty.
    pub async fn load(store: Arc<dyn StateStore>, capacity: usize, max_age_secs: i64) -> Self {
        let loaded = match store.load_dedup().await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "could not load dedup window; starting empty");
                Vec::new()
            }
        };

        let mut window = Window {
            entries: HashMap::new(),
            order: VecDeque::new(),
            unflushed: Vec::new(),
            send_failures: HashMap::new(),
        };
        for entry in loaded {
            if window.entries.contains_key(&entry.event_id) {
                continue;
            }
            window.order.push_back(entry.event_id.clone());
            window.entries.insert(entry.event_id.clone(), entry);
        }
        evict_overflow(&mut window, capacity);

        tracing::debug!(entries = window.entries.len(), "dedup window loaded");

        Self {
            store,
            window: Mutex::new(window),
            capacity,
            max_age_secs,
        }
    }

    pub fn has(&self, event_id: &str) -> bool {
        self.lock().entries.contains_key(event_id)
    }

    pub fn outcome(&self, event_id: &str) -> Option<DeliveryOutcome> {
        self.lock().entries.get(event_id).map(|e| e.outcome)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn mark_delivered(&self, event_id: &str) -> bool {
        self.resolve(event_id, DeliveryOutcome::Delivered).await
    }

    pub async fn mark_abandoned(&self, event_id: &str) -> bool {
        self.resolve(event_id, DeliveryOutcome::Abandoned).await
    }

    /// Record a final outcome. Returns `false` if the identifier was
    /// already resolved, in which case the first outcome is kept.
    pub async fn resolve(&self, event_id: &str, outcome: DeliveryOutcome) -> bool {
        let pending = {
            let mut window = self.lock();
            if window.entries.contains_key(event_id) {
                return false;
            }
            let entry = DedupEntry {
                event_id: event_id.to_string(),
                outcome,
                resolved_at: chrono::Utc::now().timestamp(),
            };
            window.order.push_back(entry.event_id.clone());
            window.entries.insert(entry.event_id.clone(), entry.clone());
            window.send_failures.remove(event_id);
            window.unflushed.push(entry);
            evict_overflow(&mut window, self.capacity);
            window.unflushed.clone()
        };

        self.flush(pending).await;
        true
    }

    /// Count a failed send for an unresolved event. Returns the total
    /// number of failures so far.
    pub fn note_send_failure(&self, event_id: &str) -> u32 {
        let mut window = self.lock();
        let count = window.send_failures.entry(event_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn send_failures(&self, event_id: &str) -> u32 {
        self.lock().send_failures.get(event_id).copied().unwrap_or(0)
    }

    /// Writes that have not been confirmed by the store yet.
    pub fn unflushed(&self) -> usize {
        self.lock().unflushed.len()
    }

    /// Retry every queued write.
    pub async fn flush_pending(&self) {
        let pending = self.lock().unflushed.clone();
        if !pending.is_empty() {
            self.flush(pending).await;
        }
    }

    /// Drop entries past the age bound, in memory and in the store.
    pub async fn prune(&self) {
        let cutoff = chrono::Utc::now().timestamp() - self.max_age_secs;
        {
            let mut window = self.lock();
            while let Some(oldest) = window.order.front().cloned() {
                match window.entries.get(&oldest) {
                    Some(e) if e.resolved_at >= cutoff => break,
                    _ => {
                        window.order.pop_front();
                        window.entries.remove(&oldest);
                    }
                }
            }
        }

        match self.store.prune_dedup(self.capacity, cutoff).await {
            Ok(0) => {}
            Ok(removed) => tracing::debug!(removed, "pruned dedup window"),
            Err(e) => tracing::warn!(error = %e, "failed to prune persisted dedup window"),
        }
    }

    /// Write `pending` through. Each entry leaves the queue only once its
    /// write returned `Ok`; dropping this future mid-write keeps the rest.
    async fn flush(&self, pending: Vec<DedupEntry>) {
        for entry in pending {
            match self.store.record_outcome(&entry).await {
                Ok(()) => self
                    .lock()
                    .unflushed
                    .retain(|queued| queued.event_id != entry.event_id),
                Err(e) => tracing::warn!(
                    event_id = %entry.event_id,
                    error = %e,
                    "failed to persist dedup entry; will retry on next resolution"
                ),
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Window> {
        self.window.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn evict_overflow(window: &mut Window, capacity: usize) {
    while window.order.len() > capacity {
        if let Some(oldest) = window.order.pop_front() {
            window.entries.remove(&oldest);
        }
    }
}
