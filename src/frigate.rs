//! Frigate NVR HTTP client.
//!
//! The [`Nvr`] trait is the seam the pipeline and the command handler
//! depend on; [`FrigateClient`] implements it over `reqwest`. Tests use
//! in-memory fakes.
//!
//! # Endpoints
//!
//! | Call | Request |
//! |------|---------|
//! | [`fetch_events`](Nvr::fetch_events) | `GET /api/events?after=<ts>&limit=<n>[&before=<ts>][&camera=<name>]` |
//! | [`fetch_media`](Nvr::fetch_media) | `GET /api/events/<id>/{clip.mp4,preview.gif,snapshot.jpg,thumbnail.jpg}` |
//! | [`latest_snapshot`](Nvr::latest_snapshot) | `GET /api/<camera>/latest.jpg?bbox=1` |
//! | [`recording_clip`](Nvr::recording_clip) | `GET /api/<camera>/recordings/start/<s>/end/<e>/clip.mp4` |
//! | [`cameras`](Nvr::cameras) | `GET /api/config` (keys of `cameras`) |
//! | [`version`](Nvr::version) | `GET /api/version` |
//!
//! Media that is still being generated comes back as 404 or as a tiny
//! body; both are reported as [`MediaFetch::NotReady`] so the caller can
//! retry. Everything else that is not a 2xx is an error.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use frigate_relay_core::models::{
    score_to_percent, EventDescriptor, MediaKind, MediaPayload, SubLabel,
};

use crate::config::Config;

/// One page of the event list.
///
/// Frigate returns the newest events first and at most `limit` of them;
/// `before` (exclusive) pages towards older events.
#[derive(Debug, Clone, PartialEq)]
pub struct EventQuery {
    pub after: f64,
    pub before: Option<f64>,
    pub camera: Option<String>,
    pub limit: usize,
}

/// Outcome of a single media request.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaFetch {
    Ready(MediaPayload),
    /// Not generated yet (404, or body below the size floor).
    NotReady,
}

/// Read access to the NVR.
#[async_trait]
pub trait Nvr: Send + Sync {
    /// One page of events, newest first.
    async fn fetch_events(&self, query: &EventQuery) -> Result<Vec<EventDescriptor>>;

    async fn fetch_media(&self, event_id: &str, kind: MediaKind) -> Result<MediaFetch>;

    /// Current frame of a camera, with bounding boxes drawn.
    async fn latest_snapshot(&self, camera: &str) -> Result<MediaFetch>;

    /// A clip cut from the continuous recording of a camera.
    async fn recording_clip(&self, camera: &str, start: i64, end: i64) -> Result<MediaFetch>;

    /// Camera names known to the NVR, sorted.
    async fn cameras(&self) -> Result<Vec<String>>;

    async fn version(&self) -> Result<String>;
}

/// [`Nvr`] implementation for the Frigate HTTP API.
pub struct FrigateClient {
    client: reqwest::Client,
    base_url: String,
    credentials: Option<(String, String)>,
    api_timeout: Duration,
    media_timeout: Duration,
    min_bytes: usize,
}

impl FrigateClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.nvr_timeout())
            .build()
            .context("Failed to build NVR HTTP client")?;

        Ok(Self {
            client,
            base_url: config.nvr.base_url().to_string(),
            credentials: config
                .nvr
                .credentials()
                .map(|(u, p)| (u.to_string(), p.to_string())),
            api_timeout: config.nvr_timeout(),
            media_timeout: Duration::from_secs(config.media.fetch_timeout_secs),
            min_bytes: config.media.min_bytes,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get(&self, path: &str, timeout: Duration) -> reqwest::RequestBuilder {
        let url = format!("{}/api/{}", self.base_url, path);
        let req = self.client.get(url).timeout(timeout);
        match &self.credentials {
            Some((user, pass)) => req.basic_auth(user, Some(pass)),
            None => req,
        }
    }

    async fn fetch_binary(
        &self,
        req: reqwest::RequestBuilder,
        label: &str,
        filename: String,
        expected_type: &str,
    ) -> Result<MediaFetch> {
        let resp = req
            .send()
            .await
            .with_context(|| format!("{}: request failed", label))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            tracing::debug!(media = label, "media not ready (404)");
            return Ok(MediaFetch::NotReady);
        }
        if !status.is_success() {
            bail!("{}: HTTP {}", label, status);
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        let bytes = resp
            .bytes()
            .await
            .with_context(|| format!("{}: failed to read body", label))?;

        if bytes.len() < self.min_bytes {
            tracing::debug!(media = label, bytes = bytes.len(), "media body too small");
            return Ok(MediaFetch::NotReady);
        }
        if !content_type.contains(expected_type) {
            tracing::debug!(
                media = label,
                expected = expected_type,
                got = %content_type,
                "unexpected content type"
            );
        }

        tracing::debug!(media = label, bytes = bytes.len(), "media fetched");
        Ok(MediaFetch::Ready(MediaPayload {
            bytes: bytes.to_vec(),
            filename,
            content_type: expected_type.to_string(),
        }))
    }
}

#[async_trait]
impl Nvr for FrigateClient {
    async fn fetch_events(&self, query: &EventQuery) -> Result<Vec<EventDescriptor>> {
        let mut params: Vec<(&str, String)> = vec![
            ("after", query.after.to_string()),
            ("limit", query.limit.to_string()),
        ];
        if let Some(before) = query.before {
            params.push(("before", before.to_string()));
        }
        if let Some(camera) = &query.camera {
            params.push(("camera", camera.clone()));
        }

        let raw: Vec<serde_json::Value> = self
            .get("events", self.api_timeout)
            .query(&params)
            .send()
            .await
            .context("Event query failed")?
            .error_for_status()
            .context("Event query rejected")?
            .json()
            .await
            .context("Malformed event list")?;

        Ok(parse_events(raw))
    }

    async fn fetch_media(&self, event_id: &str, kind: MediaKind) -> Result<MediaFetch> {
        let path = format!("events/{}/{}", event_id, kind.filename());
        let label = format!("{} for {}", kind.filename(), event_id);
        self.fetch_binary(
            self.get(&path, self.media_timeout),
            &label,
            kind.filename().to_string(),
            kind.content_type(),
        )
        .await
    }

    async fn latest_snapshot(&self, camera: &str) -> Result<MediaFetch> {
        let path = format!("{}/latest.jpg", camera);
        let req = self
            .get(&path, self.media_timeout)
            .query(&[("bbox", "1")]);
        self.fetch_binary(
            req,
            &format!("latest.jpg for {}", camera),
            format!("{}.jpg", camera),
            "image/jpeg",
        )
        .await
    }

    async fn recording_clip(&self, camera: &str, start: i64, end: i64) -> Result<MediaFetch> {
        let path = format!("{}/recordings/start/{}/end/{}/clip.mp4", camera, start, end);
        self.fetch_binary(
            self.get(&path, self.media_timeout),
            &format!("clip.mp4 for {} ({}-{})", camera, start, end),
            format!("{}.mp4", camera),
            "video/mp4",
        )
        .await
    }

    async fn cameras(&self) -> Result<Vec<String>> {
        let config: serde_json::Value = self
            .get("config", self.api_timeout)
            .send()
            .await
            .context("Config query failed")?
            .error_for_status()
            .context("Config query rejected")?
            .json()
            .await
            .context("Malformed NVR config")?;

        let mut cameras: Vec<String> = config
            .get("cameras")
            .and_then(|c| c.as_object())
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default();
        cameras.sort();
        Ok(cameras)
    }

    async fn version(&self) -> Result<String> {
        let text = self
            .get("version", self.api_timeout)
            .send()
            .await
            .context("Version query failed")?
            .error_for_status()
            .context("Version query rejected")?
            .text()
            .await?;
        Ok(text.trim().trim_matches('"').to_string())
    }
}

// ============ Wire format ============

/// One element of the `/api/events` response. Only the fields the relay
/// reads are declared; nulls are tolerated everywhere except `id`.
#[derive(Debug, Deserialize)]
struct FrigateEvent {
    id: String,
    #[serde(default)]
    camera: Option<String>,
    #[serde(default)]
    label: Option<String>,
    /// `["name", score]` or `"name"`.
    #[serde(default)]
    sub_label: serde_json::Value,
    #[serde(default)]
    top_score: Option<f64>,
    #[serde(default)]
    data: Option<FrigateEventData>,
    #[serde(default)]
    zones: Option<Vec<String>>,
    #[serde(default)]
    start_time: Option<f64>,
    #[serde(default)]
    end_time: Option<f64>,
    #[serde(default)]
    has_clip: Option<bool>,
    #[serde(default)]
    has_snapshot: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct FrigateEventData {
    #[serde(default)]
    top_score: Option<f64>,
    #[serde(default)]
    score: Option<f64>,
}

impl FrigateEvent {
    fn into_descriptor(self) -> EventDescriptor {
        let data = self.data.unwrap_or_default();
        let score = self.top_score.or(data.top_score).or(data.score);

        EventDescriptor {
            sub_label: parse_sub_label(&self.sub_label),
            id: self.id,
            camera: self.camera.unwrap_or_else(|| "unknown".to_string()),
            zones: self.zones.unwrap_or_default(),
            label: self.label.unwrap_or_else(|| "object".to_string()),
            confidence: score.filter(|s| *s > 0.0).map(score_to_percent),
            start_time: self.start_time.unwrap_or(0.0),
            end_time: self.end_time.filter(|t| *t > 0.0),
            has_clip: self.has_clip.unwrap_or(false),
            has_snapshot: self.has_snapshot.unwrap_or(false),
        }
    }
}

fn parse_sub_label(raw: &serde_json::Value) -> Option<SubLabel> {
    match raw {
        serde_json::Value::String(name) if !name.is_empty() => Some(SubLabel {
            name: name.clone(),
            score: None,
        }),
        serde_json::Value::Array(items) => {
            let name = match items.first()? {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            if name.is_empty() {
                return None;
            }
            let score = items.get(1).and_then(|s| s.as_f64());
            Some(SubLabel { name, score })
        }
        _ => None,
    }
}

/// Decode an event list. Elements that do not decode are skipped.
pub fn parse_events(raw: Vec<serde_json::Value>) -> Vec<EventDescriptor> {
    let mut events = Vec::with_capacity(raw.len());
    for value in raw {
        match serde_json::from_value::<FrigateEvent>(value) {
            Ok(ev) if !ev.id.is_empty() => events.push(ev.into_descriptor()),
            Ok(_) => tracing::warn!("skipping event without id"),
            Err(e) => tracing::warn!(error = %e, "skipping undecodable event"),
        }
    }
    events
}
