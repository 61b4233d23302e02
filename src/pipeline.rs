//! The poll → filter → dedup → media → compose → dispatch pipeline.
//!
//! [`EventPoller`] owns the poll cursor. [`Pipeline::tick`] runs one poll
//! and processes its events sequentially. [`run_pipeline`] drives ticks on
//! the configured interval until shutdown.
//!
//! # Cursor
//!
//! The cursor is the `after` timestamp of the next query. It only moves
//! past events that reached a final state (excluded, duplicate, delivered,
//! abandoned). If any event is left unresolved (a deferred send, or one
//! postponed by the tick deadline), the cursor stops just before the
//! earliest such event so the next tick sees it again; dedup keeps the
//! resolved ones from being resent.
//!
//! With no persisted cursor the first query starts `startup_lookback_secs`
//! in the past.
//!
//! # Paging
//!
//! Frigate answers newest first and caps each answer at `limit`. A full
//! page is followed by another one ending (`before`) at its oldest start
//! time. After `max_pages` full pages the poll is truncated: the cursor
//! stays put and the next tick resumes paging below the oldest event
//! already seen, until the backlog reaches the cursor.

use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use frigate_relay_core::compose::MessageComposer;
use frigate_relay_core::filter::EventFilter;
use frigate_relay_core::models::EventDescriptor;
use frigate_relay_core::monitor::MonitorConfig;
use frigate_relay_core::store::StateStore;

use crate::config::Config;
use crate::dedup::DedupStore;
use crate::dispatch::{DispatchOutcome, NotificationDispatcher};
use crate::frigate::{EventQuery, Nvr};
use crate::media::MediaFetcher;
use crate::telegram::ChatTransport;
use crate::toggle::ToggleStateStore;

/// Checkpoint key of the event cursor.
pub const CURSOR_SOURCE: &str = "frigate:events";

/// Gap kept below an unresolved event's start time.
const CURSOR_EPSILON: f64 = 0.001;

/// Query shape of [`EventPoller`].
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub lookback_secs: u64,
    pub page_size: usize,
    pub max_pages: usize,
}

impl PollSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            lookback_secs: config.polling.startup_lookback_secs,
            page_size: config.polling.page_size,
            max_pages: config.polling.max_pages,
        }
    }
}

pub struct EventPoller {
    nvr: Arc<dyn Nvr>,
    store: Arc<dyn StateStore>,
    monitor: Arc<MonitorConfig>,
    cursor: Option<f64>,
    settings: PollSettings,
    /// Per camera (empty key when unfiltered): `before` of the next page
    /// when the last poll stopped at `max_pages`.
    resume: HashMap<String, f64>,
}

impl EventPoller {
    pub async fn load(
        nvr: Arc<dyn Nvr>,
        store: Arc<dyn StateStore>,
        monitor: Arc<MonitorConfig>,
        settings: PollSettings,
    ) -> Self {
        let cursor = match store.load_cursor(CURSOR_SOURCE).await {
            Ok(cursor) => cursor,
            Err(e) => {
                tracing::warn!(error = %e, "could not load poll cursor; re-scanning recent window");
                None
            }
        };
        if let Some(cursor) = cursor {
            tracing::info!(cursor, "resuming from persisted poll cursor");
        }

        Self {
            nvr,
            store,
            monitor,
            cursor,
            settings: PollSettings {
                page_size: settings.page_size.max(1),
                max_pages: settings.max_pages.max(1),
                ..settings
            },
            resume: HashMap::new(),
        }
    }

    pub fn cursor(&self) -> Option<f64> {
        self.cursor
    }

    /// The `after` value of the next query.
    pub fn next_after(&self) -> f64 {
        self.cursor
            .unwrap_or_else(|| now_epoch() - self.settings.lookback_secs as f64)
    }

    /// Whether the last poll left older events behind.
    pub fn is_truncated(&self) -> bool {
        !self.resume.is_empty()
    }

    /// Fetch events newer than the cursor, ordered by start time.
    ///
    /// With a camera filter each monitored camera is queried separately and
    /// the results merged. Any failed query fails the whole poll and leaves
    /// the paging state untouched.
    pub async fn poll_once(&mut self) -> Result<Vec<EventDescriptor>> {
        let after = self.next_after();
        // Pin the start of the first window so `commit` measures from it.
        self.cursor.get_or_insert(after);

        let cameras: Vec<Option<String>> = if self.monitor.is_match_all() {
            vec![None]
        } else {
            self.monitor.cameras().into_iter().map(Some).collect()
        };

        let mut events = Vec::new();
        let mut seen = HashSet::new();
        let mut resume = HashMap::new();
        for camera in cameras {
            let key = camera.clone().unwrap_or_default();
            let before = self.resume.get(&key).copied();
            let (page, truncated_at) = self.fetch_pages(after, before, camera).await?;
            if let Some(point) = truncated_at {
                resume.insert(key, point);
            }
            for event in page {
                if seen.insert(event.id.clone()) {
                    events.push(event);
                }
            }
        }
        self.resume = resume;

        events.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
        tracing::debug!(
            after,
            count = events.len(),
            truncated = self.is_truncated(),
            "polled events"
        );
        Ok(events)
    }

    /// Page backwards from `before` (or now) towards `after`. Returns the
    /// events and, when `max_pages` ran out first, where to resume.
    async fn fetch_pages(
        &self,
        after: f64,
        mut before: Option<f64>,
        camera: Option<String>,
    ) -> Result<(Vec<EventDescriptor>, Option<f64>)> {
        let mut events = Vec::new();
        for _ in 0..self.settings.max_pages {
            let query = EventQuery {
                after,
                before,
                camera: camera.clone(),
                limit: self.settings.page_size,
            };
            let page = self.nvr.fetch_events(&query).await?;
            let full = page.len() >= self.settings.page_size;
            let oldest = page.iter().map(|e| e.start_time).reduce(f64::min);
            events.extend(page);

            match oldest {
                Some(oldest) if full => {
                    if before.is_some_and(|b| oldest >= b) {
                        tracing::warn!(
                            camera = camera.as_deref().unwrap_or("*"),
                            "NVR ignored the page bound; older events may be missed"
                        );
                        return Ok((events, None));
                    }
                    before = Some(oldest);
                }
                _ => return Ok((events, None)),
            }
        }

        tracing::warn!(
            camera = camera.as_deref().unwrap_or("*"),
            pages = self.settings.max_pages,
            "event backlog exceeds one tick; continuing next tick"
        );
        Ok((events, before))
    }

    /// Advance past `seen`, stopping before the earliest start time in
    /// `unresolved`. A truncated poll does not advance at all. Persists the
    /// result; a write failure is logged and the in-memory cursor still
    /// advances.
    pub async fn commit(&mut self, seen: &[EventDescriptor], unresolved: &[f64]) {
        let floor = self.next_after();
        let next = if self.is_truncated() {
            floor
        } else if let Some(earliest) = unresolved.iter().copied().reduce(f64::min) {
            (earliest - CURSOR_EPSILON).max(floor)
        } else {
            seen.iter()
                .map(|e| e.start_time)
                .fold(floor, f64::max)
        };

        self.cursor = Some(next);

        if let Err(e) = self.store.save_cursor(CURSOR_SOURCE, next).await {
            tracing::warn!(error = %e, cursor = next, "failed to persist poll cursor");
        }
    }
}

/// Per-tick counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub fetched: usize,
    pub excluded: usize,
    pub duplicates: usize,
    pub sent: usize,
    pub suppressed: usize,
    pub deferred: usize,
    pub abandoned: usize,
    /// Left for the next tick because the deadline passed.
    pub postponed: usize,
}

pub struct Pipeline {
    poller: EventPoller,
    filter: EventFilter,
    dedup: Arc<DedupStore>,
    toggle: Arc<ToggleStateStore>,
    media: MediaFetcher,
    composer: MessageComposer,
    dispatcher: NotificationDispatcher,
}

impl Pipeline {
    pub fn new(
        poller: EventPoller,
        filter: EventFilter,
        dedup: Arc<DedupStore>,
        toggle: Arc<ToggleStateStore>,
        media: MediaFetcher,
        composer: MessageComposer,
        dispatcher: NotificationDispatcher,
    ) -> Self {
        Self {
            poller,
            filter,
            dedup,
            toggle,
            media,
            composer,
            dispatcher,
        }
    }

    /// Wire a pipeline from configuration and already-loaded shared state.
    pub async fn from_config(
        config: &Config,
        monitor: Arc<MonitorConfig>,
        nvr: Arc<dyn Nvr>,
        transport: Arc<dyn ChatTransport>,
        store: Arc<dyn StateStore>,
        toggle: Arc<ToggleStateStore>,
        dedup: Arc<DedupStore>,
    ) -> Result<Self> {
        let timezone = frigate_relay_core::compose::parse_timezone(&config.display.timezone)?;
        let composer = MessageComposer::new(
            config.nvr.base_url(),
            config.nvr.external_base_url(),
            timezone,
            &config.display.locale,
        );
        let poller = EventPoller::load(
            nvr.clone(),
            store,
            monitor.clone(),
            PollSettings::from_config(config),
        )
        .await;
        let dispatcher = NotificationDispatcher::new(
            transport,
            toggle.clone(),
            dedup.clone(),
            config.state.max_send_attempts,
        );

        Ok(Self::new(
            poller,
            EventFilter::new(monitor),
            dedup,
            toggle,
            MediaFetcher::new(nvr, config),
            composer,
            dispatcher,
        ))
    }

    pub fn poller(&self) -> &EventPoller {
        &self.poller
    }

    /// Poll once and process every returned event. `Err` only when the
    /// poll itself failed; per-event problems are logged and counted.
    pub async fn tick(&mut self) -> Result<TickReport> {
        self.tick_until(None).await
    }

    /// Like [`tick`](Self::tick), but events not yet started when `deadline`
    /// passes are postponed to the next tick. The event in progress always
    /// finishes, so its outcome and dedup write are never cut off.
    pub async fn tick_until(&mut self, deadline: Option<Instant>) -> Result<TickReport> {
        let events = self.poller.poll_once().await?;

        let mut report = TickReport {
            fetched: events.len(),
            ..TickReport::default()
        };
        let mut unresolved = Vec::new();

        for event in &events {
            if !self.filter.include(event) {
                tracing::debug!(
                    event_id = %event.id,
                    camera = %event.camera,
                    zones = ?event.zones,
                    "event excluded by monitor config"
                );
                report.excluded += 1;
                continue;
            }
            if self.dedup.has(&event.id) {
                report.duplicates += 1;
                continue;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                report.postponed += 1;
                unresolved.push(event.start_time);
                continue;
            }

            let outcome = self.process(event).await;
            match outcome {
                DispatchOutcome::Sent => report.sent += 1,
                DispatchOutcome::Suppressed => report.suppressed += 1,
                DispatchOutcome::Abandoned => report.abandoned += 1,
                DispatchOutcome::Deferred { .. } => {
                    report.deferred += 1;
                    unresolved.push(event.start_time);
                }
            }
        }

        if report.postponed > 0 {
            tracing::warn!(
                postponed = report.postponed,
                "tick deadline passed; remaining events retried next tick"
            );
        }

        self.poller.commit(&events, &unresolved).await;
        self.dedup.flush_pending().await;
        self.dedup.prune().await;

        Ok(report)
    }

    async fn process(&self, event: &EventDescriptor) -> DispatchOutcome {
        if !self.toggle.is_enabled() {
            return self.dispatcher.suppress(event).await;
        }

        tracing::info!(
            event_id = %event.id,
            camera = %event.camera,
            label = %event.label,
            finished = event.is_finished(),
            "processing event"
        );

        let fetched = self.media.fetch(event).await;
        let had_media = !fetched.media.is_none();
        let message = self.composer.compose(event, fetched.media);
        if had_media && message.media.is_none() {
            tracing::warn!(event_id = %event.id, "caption too long for media; sending text only");
        }
        self.dispatcher.dispatch(event, &message).await
    }
}

/// Loop settings for [`run_pipeline`].
#[derive(Debug, Clone, Copy)]
pub struct LoopTiming {
    pub interval: Duration,
    pub max_backoff: Duration,
    /// Budget for starting new events within one tick.
    pub tick_timeout: Duration,
}

impl LoopTiming {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: config.poll_interval(),
            max_backoff: Duration::from_secs(config.polling.max_backoff_secs),
            tick_timeout: Duration::from_secs(config.polling.tick_timeout_secs),
        }
    }
}

/// Delay before the next tick after a failed poll.
pub fn backoff_delay(current: Duration, timing: &LoopTiming) -> Duration {
    (current + timing.interval).min(timing.max_backoff.max(timing.interval))
}

/// Run ticks until `shutdown` flips to `true`.
pub async fn run_pipeline(
    mut pipeline: Pipeline,
    timing: LoopTiming,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut delay = timing.interval;
    let mut online = true;

    tracing::info!(
        interval_secs = timing.interval.as_secs(),
        "event pipeline started"
    );

    while !*shutdown.borrow() {
        let deadline = Instant::now() + timing.tick_timeout;
        match pipeline.tick_until(Some(deadline)).await {
            Ok(report) => {
                if !online {
                    tracing::info!("NVR reachable again; resuming normal polling");
                    online = true;
                }
                delay = timing.interval;
                if report.fetched > 0 {
                    tracing::info!(
                        fetched = report.fetched,
                        sent = report.sent,
                        excluded = report.excluded,
                        duplicates = report.duplicates,
                        suppressed = report.suppressed,
                        deferred = report.deferred,
                        abandoned = report.abandoned,
                        postponed = report.postponed,
                        "tick complete"
                    );
                }
            }
            Err(e) => {
                if online {
                    tracing::error!(error = %e, "poll failed; entering back-off");
                    online = false;
                } else {
                    tracing::warn!(error = %e, "poll failed");
                }
                delay = backoff_delay(delay, &timing);
                tracing::debug!(retry_in_secs = delay.as_secs(), "NVR unreachable");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => {}
        }
    }

    tracing::info!("event pipeline stopped");
}

fn now_epoch() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_by_interval_and_caps() {
        let timing = LoopTiming {
            interval: Duration::from_secs(60),
            max_backoff: Duration::from_secs(300),
            tick_timeout: Duration::from_secs(900),
        };
        let mut delay = timing.interval;
        let mut seen = Vec::new();
        for _ in 0..6 {
            delay = backoff_delay(delay, &timing);
            seen.push(delay.as_secs());
        }
        assert_eq!(seen, vec![120, 180, 240, 300, 300, 300]);
    }
}
