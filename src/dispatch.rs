//! Toggle-gated delivery and resolution bookkeeping.

use std::sync::Arc;

use frigate_relay_core::compose::ComposedMessage;
use frigate_relay_core::models::EventDescriptor;

use crate::dedup::DedupStore;
use crate::telegram::ChatTransport;
use crate::toggle::ToggleStateStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Delivered and marked.
    Sent,
    /// Notifications were off; marked abandoned without sending.
    Suppressed,
    /// Send failed; left unresolved for a later tick.
    Deferred { failures: u32 },
    /// Send failed for the last allowed time; marked abandoned.
    Abandoned,
}

impl DispatchOutcome {
    /// Whether the event now has a final resolution.
    pub fn is_resolved(&self) -> bool {
        !matches!(self, DispatchOutcome::Deferred { .. })
    }
}

pub struct NotificationDispatcher {
    transport: Arc<dyn ChatTransport>,
    toggle: Arc<ToggleStateStore>,
    dedup: Arc<DedupStore>,
    max_send_attempts: u32,
}

impl NotificationDispatcher {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        toggle: Arc<ToggleStateStore>,
        dedup: Arc<DedupStore>,
        max_send_attempts: u32,
    ) -> Self {
        Self {
            transport,
            toggle,
            dedup,
            max_send_attempts: max_send_attempts.max(1),
        }
    }

    /// Resolve an event as abandoned-by-policy without sending.
    pub async fn suppress(&self, event: &EventDescriptor) -> DispatchOutcome {
        self.dedup.mark_abandoned(&event.id).await;
        tracing::info!(event_id = %event.id, camera = %event.camera, "notifications disabled; event suppressed");
        DispatchOutcome::Suppressed
    }

    pub async fn dispatch(
        &self,
        event: &EventDescriptor,
        message: &ComposedMessage,
    ) -> DispatchOutcome {
        // The toggle may have flipped while media was being fetched.
        if !self.toggle.is_enabled() {
            return self.suppress(event).await;
        }

        let media = message.media.kind().map(|k| k.as_str()).unwrap_or("text");

        match self.transport.send(message).await {
            Ok(()) => {
                self.dedup.mark_delivered(&event.id).await;
                tracing::info!(event_id = %event.id, camera = %event.camera, media, "notification sent");
                DispatchOutcome::Sent
            }
            Err(e) => {
                let failures = self.dedup.note_send_failure(&event.id);
                if failures >= self.max_send_attempts {
                    self.dedup.mark_abandoned(&event.id).await;
                    tracing::error!(
                        event_id = %event.id,
                        failures,
                        error = %e,
                        "notification failed; giving up on event"
                    );
                    DispatchOutcome::Abandoned
                } else {
                    tracing::warn!(
                        event_id = %event.id,
                        failures,
                        max = self.max_send_attempts,
                        error = %e,
                        "notification failed; will retry next tick"
                    );
                    DispatchOutcome::Deferred { failures }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use frigate_relay_core::models::{DeliveryOutcome, MediaPayload, MediaResult};
    use frigate_relay_core::store::memory::InMemoryStore;
    use frigate_relay_core::store::StateStore;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingTransport {
        fail: AtomicBool,
        sent: AtomicUsize,
    }

    #[async_trait]
    impl ChatTransport for CountingTransport {
        async fn send(&self, _message: &ComposedMessage) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                bail!("502 Bad Gateway");
            }
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn send_text(&self, _text: &str) -> Result<()> {
            Ok(())
        }
        async fn send_photo(&self, _photo: &MediaPayload, _caption: &str) -> Result<()> {
            Ok(())
        }

        async fn send_video(&self, _video: &MediaPayload, _caption: &str) -> Result<()> {
            Ok(())
        }
    }

    fn event(id: &str) -> EventDescriptor {
        EventDescriptor {
            id: id.to_string(),
            camera: "front_door".to_string(),
            zones: Vec::new(),
            label: "person".to_string(),
            sub_label: None,
            confidence: None,
            start_time: 1_700_000_000.0,
            end_time: None,
            has_clip: false,
            has_snapshot: false,
        }
    }

    fn message() -> ComposedMessage {
        ComposedMessage {
            text: "alert".to_string(),
            media: MediaResult::None,
        }
    }

    async fn setup(
        max_attempts: u32,
    ) -> (
        NotificationDispatcher,
        Arc<CountingTransport>,
        Arc<ToggleStateStore>,
        Arc<DedupStore>,
    ) {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::new());
        let transport = Arc::new(CountingTransport::default());
        let toggle = Arc::new(ToggleStateStore::load(store.clone()).await);
        let dedup = Arc::new(DedupStore::load(store, 100, 3600).await);
        let dispatcher =
            NotificationDispatcher::new(transport.clone(), toggle.clone(), dedup.clone(), max_attempts);
        (dispatcher, transport, toggle, dedup)
    }

    #[tokio::test]
    async fn test_success_marks_delivered() {
        let (dispatcher, transport, _, dedup) = setup(3).await;
        let outcome = dispatcher.dispatch(&event("a"), &message()).await;
        assert_eq!(outcome, DispatchOutcome::Sent);
        assert_eq!(transport.sent.load(Ordering::SeqCst), 1);
        assert_eq!(dedup.outcome("a"), Some(DeliveryOutcome::Delivered));
    }

    #[tokio::test]
    async fn test_disabled_marks_abandoned_without_sending() {
        let (dispatcher, transport, toggle, dedup) = setup(3).await;
        toggle.set_enabled(false).await;
        let outcome = dispatcher.dispatch(&event("a"), &message()).await;
        assert_eq!(outcome, DispatchOutcome::Suppressed);
        assert_eq!(transport.sent.load(Ordering::SeqCst), 0);
        assert_eq!(dedup.outcome("a"), Some(DeliveryOutcome::Abandoned));
    }

    #[tokio::test]
    async fn test_failure_defers_then_abandons() {
        let (dispatcher, transport, _, dedup) = setup(2).await;
        transport.fail.store(true, Ordering::SeqCst);

        let first = dispatcher.dispatch(&event("a"), &message()).await;
        assert_eq!(first, DispatchOutcome::Deferred { failures: 1 });
        assert!(!first.is_resolved());
        assert!(!dedup.has("a"));

        let second = dispatcher.dispatch(&event("a"), &message()).await;
        assert_eq!(second, DispatchOutcome::Abandoned);
        assert_eq!(dedup.outcome("a"), Some(DeliveryOutcome::Abandoned));
    }
}
