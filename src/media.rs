//! Media acquisition with bounded retries and fallback.
//!
//! The fallback chain is data: an ordered list of [`MediaTier`]s, each a
//! media kind plus the number of attempts it gets. Tiers are tried in
//! order and the first success wins. When every tier is exhausted the
//! result is [`MediaResult::None`] and the notification goes out as text.
//!
//! Default chain: `[clip (only with media.send_clip)] → animation → snapshot → thumbnail`.
//!
//! Tiers the event says it has nothing for (`has_clip`, `has_snapshot`)
//! are skipped without a request.

use std::sync::Arc;
use std::time::Duration;

use frigate_relay_core::models::{EventDescriptor, MediaKind, MediaResult};

use crate::config::Config;
use crate::frigate::{MediaFetch, Nvr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaTier {
    pub kind: MediaKind,
    pub max_attempts: u32,
}

/// What a fetch produced and how many NVR requests it took.
#[derive(Debug, Clone)]
pub struct FetchReport {
    pub media: MediaResult,
    pub attempts: u32,
}

pub struct MediaFetcher {
    nvr: Arc<dyn Nvr>,
    tiers: Vec<MediaTier>,
    grace: Duration,
    retry_delay: Duration,
    attempt_timeout: Duration,
}

impl MediaFetcher {
    pub fn new(nvr: Arc<dyn Nvr>, config: &Config) -> Self {
        Self {
            nvr,
            tiers: default_tiers(config.media.send_clip, config.media.max_retries),
            grace: Duration::from_secs(config.media.grace_secs),
            retry_delay: Duration::from_secs(config.media.retry_delay_secs),
            attempt_timeout: Duration::from_secs(config.media.fetch_timeout_secs),
        }
    }

    pub fn with_tiers(
        nvr: Arc<dyn Nvr>,
        tiers: Vec<MediaTier>,
        grace: Duration,
        retry_delay: Duration,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            nvr,
            tiers,
            grace,
            retry_delay,
            attempt_timeout,
        }
    }

    pub fn tiers(&self) -> &[MediaTier] {
        &self.tiers
    }

    /// Wait out the grace period, then walk the chain.
    pub async fn fetch(&self, event: &EventDescriptor) -> FetchReport {
        if !self.grace.is_zero() {
            tracing::debug!(
                event_id = %event.id,
                grace_secs = self.grace.as_secs(),
                "waiting for NVR to generate media"
            );
            tokio::time::sleep(self.grace).await;
        }

        let mut attempts = 0;
        for tier in &self.tiers {
            if !offers(event, tier.kind) {
                tracing::debug!(
                    event_id = %event.id,
                    media = tier.kind.as_str(),
                    "event has no such media; skipping tier"
                );
                continue;
            }
            for attempt in 1..=tier.max_attempts {
                if attempt > 1 {
                    tokio::time::sleep(self.retry_delay).await;
                }
                attempts += 1;

                let outcome = tokio::time::timeout(
                    self.attempt_timeout,
                    self.nvr.fetch_media(&event.id, tier.kind),
                )
                .await;

                match outcome {
                    Ok(Ok(MediaFetch::Ready(payload))) => {
                        tracing::debug!(
                            event_id = %event.id,
                            media = tier.kind.as_str(),
                            attempt,
                            bytes = payload.bytes.len(),
                            "media ready"
                        );
                        return FetchReport {
                            media: MediaResult::from_kind(tier.kind, payload.bytes),
                            attempts,
                        };
                    }
                    Ok(Ok(MediaFetch::NotReady)) => {
                        tracing::debug!(
                            event_id = %event.id,
                            media = tier.kind.as_str(),
                            attempt,
                            max = tier.max_attempts,
                            "media not ready"
                        );
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(
                            event_id = %event.id,
                            media = tier.kind.as_str(),
                            attempt,
                            error = %e,
                            "media fetch failed"
                        );
                    }
                    Err(_) => {
                        tracing::warn!(
                            event_id = %event.id,
                            media = tier.kind.as_str(),
                            attempt,
                            timeout_secs = self.attempt_timeout.as_secs(),
                            "media fetch timed out"
                        );
                    }
                }
            }
        }

        tracing::info!(event_id = %event.id, attempts, "no media available; sending text only");
        FetchReport {
            media: MediaResult::None,
            attempts,
        }
    }
}

/// Whether `event` can have media of `kind` at all.
fn offers(event: &EventDescriptor, kind: MediaKind) -> bool {
    match kind {
        MediaKind::Clip => event.has_clip,
        MediaKind::Snapshot => event.has_snapshot,
        MediaKind::Animation | MediaKind::Thumbnail => true,
    }
}

pub fn default_tiers(send_clip: bool, max_attempts: u32) -> Vec<MediaTier> {
    let mut kinds = Vec::with_capacity(4);
    if send_clip {
        kinds.push(MediaKind::Clip);
    }
    kinds.extend([MediaKind::Animation, MediaKind::Snapshot, MediaKind::Thumbnail]);
    kinds
        .into_iter()
        .map(|kind| MediaTier { kind, max_attempts })
        .collect()
}
