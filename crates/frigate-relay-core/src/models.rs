//! Core data models used throughout Frigate Relay.
//!
//! These types describe the detections read from the NVR, the media
//! attached to a notification, and the small amount of state the relay
//! persists between restarts.

use serde::{Deserialize, Serialize};

/// A recognized subject attached to an event (face or plate recognition).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubLabel {
    pub name: String,
    /// Recognition score in `0.0..=1.0`, when the NVR reports one.
    pub score: Option<f64>,
}

/// A single detection reported by the NVR.
///
/// Immutable once read, except that `end_time` may be filled in by a
/// later poll of the same identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDescriptor {
    pub id: String,
    pub camera: String,
    /// Zones the object entered, in the order the NVR reports them.
    pub zones: Vec<String>,
    pub label: String,
    pub sub_label: Option<SubLabel>,
    /// Confidence as a percentage (0–100).
    pub confidence: Option<u8>,
    /// Unix epoch seconds (fractional, as reported by Frigate).
    pub start_time: f64,
    /// Absent while the event is still in progress.
    pub end_time: Option<f64>,
    pub has_clip: bool,
    pub has_snapshot: bool,
}

impl EventDescriptor {
    /// Whether the NVR has closed this event.
    pub fn is_finished(&self) -> bool {
        self.end_time.is_some()
    }
}

/// Converts a `0.0..=1.0` score into a clamped percentage.
pub fn score_to_percent(score: f64) -> u8 {
    if !score.is_finite() {
        return 0;
    }
    (score * 100.0).round().clamp(0.0, 100.0) as u8
}

/// The kinds of media the relay knows how to fetch, in no particular order.
///
/// The preference order is owned by the fetch chain, not by this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// Full-quality `clip.mp4`.
    Clip,
    /// Animated `preview.gif`.
    Animation,
    /// Event snapshot JPEG.
    Snapshot,
    /// Small event thumbnail JPEG.
    Thumbnail,
}

impl MediaKind {
    pub fn filename(&self) -> &'static str {
        match self {
            MediaKind::Clip => "clip.mp4",
            MediaKind::Animation => "preview.gif",
            MediaKind::Snapshot => "snapshot.jpg",
            MediaKind::Thumbnail => "thumbnail.jpg",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            MediaKind::Clip => "video/mp4",
            MediaKind::Animation => "image/gif",
            MediaKind::Snapshot | MediaKind::Thumbnail => "image/jpeg",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Clip => "clip",
            MediaKind::Animation => "animation",
            MediaKind::Snapshot => "snapshot",
            MediaKind::Thumbnail => "thumbnail",
        }
    }
}

/// Raw media bytes together with the name and type they are uploaded under.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaPayload {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub content_type: String,
}

impl MediaPayload {
    pub fn new(kind: MediaKind, bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            filename: kind.filename().to_string(),
            content_type: kind.content_type().to_string(),
        }
    }
}

/// The single piece of media carried by a notification.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum MediaResult {
    Video(MediaPayload),
    Animation(MediaPayload),
    Snapshot(MediaPayload),
    Thumbnail(MediaPayload),
    /// Text-only notification. A degraded but successful outcome.
    #[default]
    None,
}

impl MediaResult {
    pub fn from_kind(kind: MediaKind, bytes: Vec<u8>) -> Self {
        let payload = MediaPayload::new(kind, bytes);
        match kind {
            MediaKind::Clip => MediaResult::Video(payload),
            MediaKind::Animation => MediaResult::Animation(payload),
            MediaKind::Snapshot => MediaResult::Snapshot(payload),
            MediaKind::Thumbnail => MediaResult::Thumbnail(payload),
        }
    }

    pub fn kind(&self) -> Option<MediaKind> {
        match self {
            MediaResult::Video(_) => Some(MediaKind::Clip),
            MediaResult::Animation(_) => Some(MediaKind::Animation),
            MediaResult::Snapshot(_) => Some(MediaKind::Snapshot),
            MediaResult::Thumbnail(_) => Some(MediaKind::Thumbnail),
            MediaResult::None => None,
        }
    }

    pub fn payload(&self) -> Option<&MediaPayload> {
        match self {
            MediaResult::Video(p)
            | MediaResult::Animation(p)
            | MediaResult::Snapshot(p)
            | MediaResult::Thumbnail(p) => Some(p),
            MediaResult::None => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, MediaResult::None)
    }
}

/// How an event identifier was resolved. Resolved events are never
/// processed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered,
    /// Deliberately not sent: notifications were disabled, or every send
    /// attempt failed.
    Abandoned,
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryOutcome::Delivered => "delivered",
            DeliveryOutcome::Abandoned => "abandoned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "delivered" => Some(DeliveryOutcome::Delivered),
            "abandoned" => Some(DeliveryOutcome::Abandoned),
            _ => None,
        }
    }
}

/// A persisted dedup entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupEntry {
    pub event_id: String,
    pub outcome: DeliveryOutcome,
    /// Unix epoch seconds.
    pub resolved_at: i64,
}

/// The runtime notifications on/off flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleState {
    pub enabled: bool,
    /// Incremented on every effective change.
    pub revision: u64,
    /// Unix epoch seconds of the last effective change (0 = never changed).
    pub updated_at: i64,
}

impl Default for ToggleState {
    fn default() -> Self {
        Self {
            enabled: true,
            revision: 0,
            updated_at: 0,
        }
    }
}
