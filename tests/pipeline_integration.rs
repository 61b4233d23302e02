//! End-to-end tests of the event pipeline against in-memory fakes of the
//! NVR and the chat transport, with both the in-memory and the SQLite
//! state stores.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use frigate_relay::config::{parse_config, Config};
use frigate_relay::db;
use frigate_relay::dedup::DedupStore;
use frigate_relay::frigate::{EventQuery, MediaFetch, Nvr};
use frigate_relay::migrate::apply_schema;
use frigate_relay::pipeline::{Pipeline, CURSOR_SOURCE};
use frigate_relay::sqlite_store::SqliteStore;
use frigate_relay::telegram::ChatTransport;
use frigate_relay::toggle::ToggleStateStore;
use frigate_relay_core::compose::ComposedMessage;
use frigate_relay_core::models::{
    DeliveryOutcome, EventDescriptor, MediaKind, MediaPayload, MediaResult,
};
use frigate_relay_core::store::memory::InMemoryStore;
use frigate_relay_core::store::StateStore;

// ─── Fakes ──────────────────────────────────────────────────────────

/// Returns the same event list on every poll, regardless of `after` and
/// camera, like an NVR whose window still covers those events. Honors
/// `before` and `limit`, newest first.
#[derive(Default)]
struct FakeNvr {
    events: Mutex<Vec<EventDescriptor>>,
    available: Mutex<HashSet<MediaKind>>,
    offline: AtomicBool,
    queries: Mutex<Vec<EventQuery>>,
    media_requests: Mutex<Vec<MediaKind>>,
}

impl FakeNvr {
    fn set_events(&self, events: Vec<EventDescriptor>) {
        *self.events.lock().unwrap() = events;
    }

    fn make_available(&self, kind: MediaKind) {
        self.available.lock().unwrap().insert(kind);
    }
}

#[async_trait]
impl Nvr for FakeNvr {
    async fn fetch_events(&self, query: &EventQuery) -> Result<Vec<EventDescriptor>> {
        self.queries.lock().unwrap().push(query.clone());
        if self.offline.load(Ordering::SeqCst) {
            bail!("connection refused");
        }
        let mut page: Vec<EventDescriptor> = self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| query.before.map_or(true, |b| e.start_time < b))
            .cloned()
            .collect();
        page.sort_by(|a, b| b.start_time.total_cmp(&a.start_time));
        page.truncate(query.limit);
        Ok(page)
    }

    async fn fetch_media(&self, _event_id: &str, kind: MediaKind) -> Result<MediaFetch> {
        self.media_requests.lock().unwrap().push(kind);
        if self.available.lock().unwrap().contains(&kind) {
            Ok(MediaFetch::Ready(MediaPayload::new(kind, vec![1u8; 512])))
        } else {
            Ok(MediaFetch::NotReady)
        }
    }

    async fn latest_snapshot(&self, _camera: &str) -> Result<MediaFetch> {
        Ok(MediaFetch::NotReady)
    }

    async fn recording_clip(&self, _camera: &str, _start: i64, _end: i64) -> Result<MediaFetch> {
        Ok(MediaFetch::NotReady)
    }

    async fn cameras(&self) -> Result<Vec<String>> {
        Ok(vec!["front_door".to_string()])
    }

    async fn version(&self) -> Result<String> {
        Ok("0.14.1".to_string())
    }
}

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<ComposedMessage>>,
    failing: AtomicBool,
}

impl RecordingTransport {
    fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send(&self, message: &ComposedMessage) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("Telegram sendAnimation error 502");
        }
        self.sent.lock().unwrap().push(message.clone());
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

// ─── Helpers ────────────────────────────────────────────────────────

fn config(monitor: &str) -> Config {
    config_with(monitor, "")
}

/// `extra` is appended verbatim, e.g. a `[polling]` section.
fn config_with(monitor: &str, extra: &str) -> Config {
    let text = format!(
        r#"
[nvr]
url = "http://frigate:5000"
external_url = "https://nvr.example.com"

[telegram]
bot_token = "TEST"
chat_id = "42"

[monitor]
cameras = "{}"

[media]
grace_secs = 0
retry_delay_secs = 0
max_retries = 2

[state]
max_send_attempts = 3
{}
"#,
        monitor, extra
    );
    parse_config(&text).unwrap()
}

fn evt1() -> EventDescriptor {
    EventDescriptor {
        id: "evt1".to_string(),
        camera: "front_door".to_string(),
        zones: vec!["yard".to_string()],
        label: "person".to_string(),
        sub_label: None,
        confidence: Some(92),
        start_time: chrono::Utc::now().timestamp() as f64 - 10.0,
        end_time: None,
        has_clip: true,
        has_snapshot: true,
    }
}

struct Harness {
    pipeline: Pipeline,
    nvr: Arc<FakeNvr>,
    transport: Arc<RecordingTransport>,
    toggle: Arc<ToggleStateStore>,
    dedup: Arc<DedupStore>,
}

async fn harness_with(
    config: &Config,
    store: Arc<dyn StateStore>,
    nvr: Arc<FakeNvr>,
    transport: Arc<RecordingTransport>,
) -> Harness {
    let monitor = Arc::new(config.monitor.parse().unwrap().config);
    let toggle = Arc::new(ToggleStateStore::load(store.clone()).await);
    let dedup = Arc::new(DedupStore::load(store.clone(), 100, 3600).await);
    let pipeline = Pipeline::from_config(
        config,
        monitor,
        nvr.clone(),
        transport.clone(),
        store,
        toggle.clone(),
        dedup.clone(),
    )
    .await
    .unwrap();

    Harness {
        pipeline,
        nvr,
        transport,
        toggle,
        dedup,
    }
}

async fn harness(monitor: &str) -> Harness {
    harness_with(
        &config(monitor),
        Arc::new(InMemoryStore::new()),
        Arc::new(FakeNvr::default()),
        Arc::new(RecordingTransport::default()),
    )
    .await
}

async fn sqlite_store(tmp: &TempDir) -> Arc<SqliteStore> {
    let pool = db::connect_path(&tmp.path().join("relay.sqlite"))
        .await
        .unwrap();
    apply_schema(&pool).await.unwrap();
    Arc::new(SqliteStore::new(pool))
}

// ─── Scenarios ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_matching_event_is_delivered_once() {
    let mut h = harness("front_door:yard,driveway").await;
    h.nvr.set_events(vec![evt1()]);
    h.nvr.make_available(MediaKind::Animation);

    let report = h.pipeline.tick().await.unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(h.transport.count(), 1);

    let sent = h.transport.sent.lock().unwrap()[0].clone();
    assert!(sent.text.contains("person (92%)"));
    assert!(sent.text.contains("front_door"));
    assert!(sent.text.contains("yard"));
    assert!(matches!(sent.media, MediaResult::Animation(_)));
    assert!(h.dedup.has("evt1"));

    // The same event on the next poll is a duplicate.
    let report = h.pipeline.tick().await.unwrap();
    assert_eq!(report.duplicates, 1);
    assert_eq!(report.sent, 0);
    assert_eq!(h.transport.count(), 1);

    // One query per monitored camera.
    let queries = h.nvr.queries.lock().unwrap().clone();
    assert_eq!(queries[0].camera.as_deref(), Some("front_door"));
    assert_eq!(queries[0].limit, 100);
    assert_eq!(queries[0].before, None);
}

#[tokio::test]
async fn test_unmonitored_camera_is_never_recorded() {
    let mut h = harness("back_camera:all").await;
    h.nvr.set_events(vec![evt1()]);
    h.nvr.make_available(MediaKind::Animation);

    let report = h.pipeline.tick().await.unwrap();
    assert_eq!(report.excluded, 1);
    assert_eq!(h.transport.count(), 0);
    assert!(!h.dedup.has("evt1"));
    assert!(h.nvr.media_requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_zone_restricted_rule_skips_zoneless_event() {
    let mut h = harness("front_door:driveway").await;
    let mut event = evt1();
    event.zones.clear();
    h.nvr.set_events(vec![event]);

    h.pipeline.tick().await.unwrap();
    assert_eq!(h.transport.count(), 0);
    assert!(!h.dedup.has("evt1"));
}

#[tokio::test]
async fn test_disabled_suppresses_without_backlog() {
    let mut h = harness("").await;
    h.toggle.set_enabled(false).await;
    h.nvr.set_events(vec![evt1()]);

    let report = h.pipeline.tick().await.unwrap();
    assert_eq!(report.suppressed, 1);
    assert_eq!(h.transport.count(), 0);
    assert_eq!(h.dedup.outcome("evt1"), Some(DeliveryOutcome::Abandoned));
    // No media is fetched for a suppressed event.
    assert!(h.nvr.media_requests.lock().unwrap().is_empty());

    // Re-enabling does not replay what was suppressed.
    h.toggle.set_enabled(true).await;
    h.pipeline.tick().await.unwrap();
    assert_eq!(h.transport.count(), 0);
}

#[tokio::test]
async fn test_text_only_when_no_media() {
    let mut h = harness("").await;
    h.nvr.set_events(vec![evt1()]);

    h.pipeline.tick().await.unwrap();
    let sent = h.transport.sent.lock().unwrap()[0].clone();
    assert!(sent.media.is_none());
    assert!(sent.text.contains("Download Clip"));
    // Two attempts for each of the three default tiers.
    assert_eq!(h.nvr.media_requests.lock().unwrap().len(), 6);
}

#[tokio::test]
async fn test_failed_send_is_retried_then_abandoned() {
    let mut h = harness("").await;
    let event = evt1();
    h.nvr.set_events(vec![event.clone()]);
    h.transport.failing.store(true, Ordering::SeqCst);

    let report = h.pipeline.tick().await.unwrap();
    assert_eq!(report.deferred, 1);
    assert!(!h.dedup.has("evt1"));
    // The cursor must not pass an unresolved event.
    assert!(h.pipeline.poller().cursor().unwrap() < event.start_time);

    h.pipeline.tick().await.unwrap();
    let report = h.pipeline.tick().await.unwrap();
    assert_eq!(report.abandoned, 1);
    assert_eq!(h.dedup.outcome("evt1"), Some(DeliveryOutcome::Abandoned));

    h.transport.failing.store(false, Ordering::SeqCst);
    h.pipeline.tick().await.unwrap();
    assert_eq!(h.transport.count(), 0);
}

#[tokio::test]
async fn test_transient_send_failure_recovers() {
    let mut h = harness("").await;
    h.nvr.set_events(vec![evt1()]);
    h.transport.failing.store(true, Ordering::SeqCst);
    h.pipeline.tick().await.unwrap();

    h.transport.failing.store(false, Ordering::SeqCst);
    let report = h.pipeline.tick().await.unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(h.dedup.outcome("evt1"), Some(DeliveryOutcome::Delivered));
}

#[tokio::test]
async fn test_ongoing_event_is_not_resent_when_it_ends() {
    let mut h = harness("").await;
    let ongoing = evt1();
    h.nvr.set_events(vec![ongoing.clone()]);
    h.pipeline.tick().await.unwrap();
    assert_eq!(h.transport.count(), 1);

    let mut finished = ongoing;
    finished.end_time = Some(finished.start_time + 8.0);
    h.nvr.set_events(vec![finished]);
    h.pipeline.tick().await.unwrap();
    assert_eq!(h.transport.count(), 1);
}

#[tokio::test]
async fn test_failed_poll_is_an_error_and_keeps_cursor() {
    let mut h = harness("").await;
    h.nvr.offline.store(true, Ordering::SeqCst);
    assert!(h.pipeline.tick().await.is_err());
    let pinned = h.pipeline.poller().cursor();

    h.nvr.offline.store(false, Ordering::SeqCst);
    h.nvr.set_events(vec![evt1()]);
    h.pipeline.tick().await.unwrap();
    assert_eq!(h.transport.count(), 1);

    // Both polls asked for the same window start.
    let queries = h.nvr.queries.lock().unwrap().clone();
    assert_eq!(Some(queries[0].after), pinned);
    assert_eq!(queries[0].after, queries[1].after);
}

fn burst(count: usize) -> Vec<EventDescriptor> {
    let base = chrono::Utc::now().timestamp() as f64 - 100.0;
    (0..count)
        .map(|i| EventDescriptor {
            id: format!("evt{}", i),
            start_time: base + i as f64,
            ..evt1()
        })
        .collect()
}

#[tokio::test]
async fn test_backlog_larger_than_a_page_is_fully_delivered() {
    let cfg = config_with("", "[polling]\npage_size = 10\n");
    let mut h = harness_with(
        &cfg,
        Arc::new(InMemoryStore::new()),
        Arc::new(FakeNvr::default()),
        Arc::new(RecordingTransport::default()),
    )
    .await;
    h.nvr.set_events(burst(25));

    let report = h.pipeline.tick().await.unwrap();
    assert_eq!(report.fetched, 25);
    assert_eq!(report.sent, 25);

    let queries = h.nvr.queries.lock().unwrap().clone();
    assert_eq!(queries.len(), 3);
    assert_eq!(queries[0].before, None);
    // Each following page ends at the oldest event of the previous one.
    assert_eq!(queries[1].before, Some(burst_start(&h, "evt15")));
    assert_eq!(queries[2].before, Some(burst_start(&h, "evt5")));

    // Delivered oldest first.
    let sent = h.transport.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 25);
    assert!(sent[0].text.contains("/events/evt0/"));
    assert!(sent[24].text.contains("/events/evt24/"));
}

fn burst_start(h: &Harness, id: &str) -> f64 {
    h.nvr
        .events
        .lock()
        .unwrap()
        .iter()
        .find(|e| e.id == id)
        .map(|e| e.start_time)
        .unwrap()
}

#[tokio::test]
async fn test_page_cap_holds_cursor_and_resumes_below_seen_events() {
    let cfg = config_with("", "[polling]\npage_size = 10\nmax_pages = 2\n");
    let mut h = harness_with(
        &cfg,
        Arc::new(InMemoryStore::new()),
        Arc::new(FakeNvr::default()),
        Arc::new(RecordingTransport::default()),
    )
    .await;
    let events = burst(25);
    let oldest = events[0].start_time;
    h.nvr.set_events(events);

    let report = h.pipeline.tick().await.unwrap();
    assert_eq!(report.sent, 20);
    assert!(h.pipeline.poller().is_truncated());
    assert!(h.pipeline.poller().cursor().unwrap() < oldest);
    assert!(!h.dedup.has("evt4"));

    let report = h.pipeline.tick().await.unwrap();
    assert_eq!(report.sent, 5);
    assert!(!h.pipeline.poller().is_truncated());
    assert_eq!(h.transport.count(), 25);
    assert!(h.dedup.has("evt0"));

    let queries = h.nvr.queries.lock().unwrap().clone();
    assert_eq!(queries[2].before, Some(burst_start(&h, "evt5")));
}

#[tokio::test]
async fn test_deadline_postpones_unstarted_events() {
    let mut h = harness("").await;
    let event = evt1();
    h.nvr.set_events(vec![event.clone()]);

    let report = h
        .pipeline
        .tick_until(Some(tokio::time::Instant::now()))
        .await
        .unwrap();
    assert_eq!(report.postponed, 1);
    assert_eq!(h.transport.count(), 0);
    assert!(!h.dedup.has("evt1"));
    assert!(h.pipeline.poller().cursor().unwrap() < event.start_time);

    let report = h.pipeline.tick().await.unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(h.transport.count(), 1);
}

#[tokio::test]
async fn test_state_survives_restart_with_sqlite() {
    let tmp = TempDir::new().unwrap();
    let cfg = config("front_door:yard");
    let nvr = Arc::new(FakeNvr::default());
    nvr.set_events(vec![evt1()]);
    let transport = Arc::new(RecordingTransport::default());

    {
        let sqlite = sqlite_store(&tmp).await;
        let mut h = harness_with(&cfg, sqlite.clone(), nvr.clone(), transport.clone()).await;
        h.pipeline.tick().await.unwrap();
        assert_eq!(transport.count(), 1);
        sqlite.pool().close().await;
    }

    let sqlite = sqlite_store(&tmp).await;
    assert!(sqlite.load_cursor(CURSOR_SOURCE).await.unwrap().is_some());
    let mut h = harness_with(&cfg, sqlite, nvr, transport.clone()).await;
    assert!(h.dedup.has("evt1"));
    h.pipeline.tick().await.unwrap();
    assert_eq!(transport.count(), 1);
}

#[tokio::test]
async fn test_toggle_survives_restart_with_sqlite() {
    let tmp = TempDir::new().unwrap();

    {
        let sqlite = sqlite_store(&tmp).await;
        let toggle = ToggleStateStore::load(sqlite.clone()).await;
        toggle.set_enabled(false).await;
        sqlite.pool().close().await;
    }
    {
        let sqlite = sqlite_store(&tmp).await;
        let toggle = ToggleStateStore::load(sqlite.clone()).await;
        assert!(!toggle.is_enabled());
        toggle.set_enabled(true).await;
        sqlite.pool().close().await;
    }

    let sqlite = sqlite_store(&tmp).await;
    let toggle = ToggleStateStore::load(sqlite).await;
    assert!(toggle.is_enabled());
    assert_eq!(toggle.snapshot().revision, 2);
}
