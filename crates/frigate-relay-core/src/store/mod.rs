//! Storage abstraction for relay state.
//!
//! The [`StateStore`] trait covers everything the relay persists across
//! restarts: the notifications toggle, the dedup window, and the poll
//! cursor. Backends must keep the previously committed value intact when
//! a write is interrupted.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{DedupEntry, ToggleState};

/// Abstract durable store for relay state.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`load_toggle`](StateStore::load_toggle) | Read the persisted toggle, if any |
/// | [`save_toggle`](StateStore::save_toggle) | Replace the persisted toggle |
/// | [`load_dedup`](StateStore::load_dedup) | Read the dedup window, oldest first |
/// | [`record_outcome`](StateStore::record_outcome) | Insert a resolution; first outcome wins |
/// | [`prune_dedup`](StateStore::prune_dedup) | Enforce capacity and age bounds |
/// | [`load_cursor`](StateStore::load_cursor) / [`save_cursor`](StateStore::save_cursor) | Poll cursor per source |
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load_toggle(&self) -> Result<Option<ToggleState>>;

    async fn save_toggle(&self, state: &ToggleState) -> Result<()>;

    /// All dedup entries ordered by `resolved_at` ascending.
    async fn load_dedup(&self) -> Result<Vec<DedupEntry>>;

    /// Record a resolution. An identifier that already has an entry is
    /// left untouched.
    async fn record_outcome(&self, entry: &DedupEntry) -> Result<()>;

    /// Drop entries resolved before `older_than` (epoch seconds), then the
    /// oldest entries beyond `capacity`. Returns the number removed.
    async fn prune_dedup(&self, capacity: usize, older_than: i64) -> Result<u64>;

    async fn load_cursor(&self, source: &str) -> Result<Option<f64>>;

    async fn save_cursor(&self, source: &str, cursor: f64) -> Result<()>;
}
