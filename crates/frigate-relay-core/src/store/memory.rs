//! In-memory [`StateStore`] implementation.
//!
//! Used as the fallback when the database cannot be opened and as the
//! backing store in tests. Uses `std::sync::RwLock` for thread safety.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{DedupEntry, ToggleState};

use super::StateStore;

/// Volatile store: state is lost when the process exits.
pub struct InMemoryStore {
    toggle: RwLock<Option<ToggleState>>,
    dedup: RwLock<Vec<DedupEntry>>,
    cursors: RwLock<HashMap<String, f64>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            toggle: RwLock::new(None),
            dedup: RwLock::new(Vec::new()),
            cursors: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for InMemoryStore {
    async fn load_toggle(&self) -> Result<Option<ToggleState>> {
        Ok(*self.toggle.read().unwrap())
    }

    async fn save_toggle(&self, state: &ToggleState) -> Result<()> {
        *self.toggle.write().unwrap() = Some(*state);
        Ok(())
    }

    async fn load_dedup(&self) -> Result<Vec<DedupEntry>> {
        let mut entries = self.dedup.read().unwrap().clone();
        entries.sort_by_key(|e| e.resolved_at);
        Ok(entries)
    }

    async fn record_outcome(&self, entry: &DedupEntry) -> Result<()> {
        let mut dedup = self.dedup.write().unwrap();
        if !dedup.iter().any(|e| e.event_id == entry.event_id) {
            dedup.push(entry.clone());
        }
        Ok(())
    }

    async fn prune_dedup(&self, capacity: usize, older_than: i64) -> Result<u64> {
        let mut dedup = self.dedup.write().unwrap();
        let before = dedup.len();
        dedup.retain(|e| e.resolved_at >= older_than);
        dedup.sort_by_key(|e| e.resolved_at);
        if dedup.len() > capacity {
            let excess = dedup.len() - capacity;
            dedup.drain(..excess);
        }
        Ok((before - dedup.len()) as u64)
    }

    async fn load_cursor(&self, source: &str) -> Result<Option<f64>> {
        Ok(self.cursors.read().unwrap().get(source).copied())
    }

    async fn save_cursor(&self, source: &str, cursor: f64) -> Result<()> {
        self.cursors
            .write()
            .unwrap()
            .insert(source.to_string(), cursor);
        Ok(())
    }
}
