//! The runtime notifications on/off switch.
//!
//! Readers (the dispatcher) take a cheap snapshot under a `RwLock`; writers
//! (the command handler) are serialized by an async mutex so that the
//! in-memory value and the persisted row change in the same order.
//!
//! A failed write does not roll back the in-memory value. The state is
//! flagged dirty and written again on the next call to
//! [`ToggleStateStore::set_enabled`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use frigate_relay_core::models::ToggleState;
use frigate_relay_core::store::StateStore;

/// Result of a toggle request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleChange {
    /// `false` when the flag already had the requested value.
    pub changed: bool,
    /// `false` when the durable write failed and is pending a retry.
    pub persisted: bool,
    pub state: ToggleState,
}

pub struct ToggleStateStore {
    store: Arc<dyn StateStore>,
    state: RwLock<ToggleState>,
    writer: tokio::sync::Mutex<()>,
    dirty: AtomicBool,
}

impl ToggleStateStore {
    /// Read the persisted flag. Missing or unreadable state means enabled.
    pub async fn load(store: Arc<dyn StateStore>) -> Self {
        let state = match store.load_toggle().await {
            Ok(Some(state)) => state,
            Ok(None) => ToggleState::default(),
            Err(e) => {
                tracing::warn!(error = %e, "could not load toggle state; defaulting to enabled");
                ToggleState::default()
            }
        };

        tracing::info!(
            enabled = state.enabled,
            revision = state.revision,
            "notifications toggle loaded"
        );

        Self {
            store,
            state: RwLock::new(state),
            writer: tokio::sync::Mutex::new(()),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.snapshot().enabled
    }

    pub fn snapshot(&self) -> ToggleState {
        *self.state.read().unwrap_or_else(|p| p.into_inner())
    }

    /// Whether the in-memory value differs from what is persisted.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Set the flag. Idempotent: requesting the current value bumps nothing,
    /// but still retries a pending write.
    pub async fn set_enabled(&self, enabled: bool) -> ToggleChange {
        let _guard = self.writer.lock().await;

        let current = self.snapshot();
        let changed = current.enabled != enabled;

        let next = if changed {
            let next = ToggleState {
                enabled,
                revision: current.revision + 1,
                updated_at: chrono::Utc::now().timestamp(),
            };
            *self.state.write().unwrap_or_else(|p| p.into_inner()) = next;
            next
        } else {
            current
        };

        let persisted = if changed || self.is_dirty() {
            self.persist(&next).await
        } else {
            true
        };

        if changed {
            tracing::info!(enabled, revision = next.revision, persisted, "notifications toggled");
        }

        ToggleChange {
            changed,
            persisted,
            state: next,
        }
    }

    async fn persist(&self, state: &ToggleState) -> bool {
        match self.store.save_toggle(state).await {
            Ok(()) => {
                self.dirty.store(false, Ordering::SeqCst);
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to persist toggle state; will retry on next change");
                self.dirty.store(true, Ordering::SeqCst);
                false
            }
        }
    }
}
