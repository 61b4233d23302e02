//! Notification message composition.
//!
//! Turns an [`EventDescriptor`] plus whatever media was obtained into the
//! HTML body sent to the chat. Composition never fails: optional fields
//! that are missing are left out of the message.
//!
//! ```text
//! 🚨 Detection Alert
//!
//! 📷 Camera: front_door
//! 🏷️ Label: person (92%)        ← or 👤 Recognized: Alice (81%)
//! 📍 Zone(s): yard, driveway
//! 📅 Time: 2024-05-01 12:00:00 UTC
//! 🕑 End: 2024-05-01 12:00:09 UTC
//!
//! 🔗 View Event in Frigate       ← only with an external URL
//! 🎬 Download Clip               ← always, internal NVR URL
//! ```
//!
//! Telegram caps captions at [`CAPTION_LIMIT`] and messages at
//! [`TEXT_LIMIT`]. Names are shortened to [`NAME_LIMIT`] characters; a body
//! that is still too long lists fewer zones, and one that cannot fit as a
//! caption at all goes out as text without its media.

use anyhow::{anyhow, Result};
use chrono::DateTime;
use chrono_tz::Tz;

use crate::models::{EventDescriptor, MediaResult};

/// Longest caption Telegram accepts on a media message.
pub const CAPTION_LIMIT: usize = 1024;

/// Longest text message Telegram accepts.
pub const TEXT_LIMIT: usize = 4096;

/// Camera, label and sub-label names are cut to this many characters.
pub const NAME_LIMIT: usize = 128;

/// A message ready for the chat transport.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedMessage {
    /// Telegram-flavoured HTML.
    pub text: String,
    pub media: MediaResult,
}

/// Builds notification bodies. Holds only display configuration.
#[derive(Debug, Clone)]
pub struct MessageComposer {
    nvr_url: String,
    external_url: Option<String>,
    timezone: Tz,
    time_format: &'static str,
}

impl MessageComposer {
    pub fn new(nvr_url: &str, external_url: Option<&str>, timezone: Tz, locale: &str) -> Self {
        Self {
            nvr_url: nvr_url.trim_end_matches('/').to_string(),
            external_url: external_url
                .map(|u| u.trim_end_matches('/').to_string())
                .filter(|u| !u.is_empty()),
            timezone,
            time_format: time_format_for_locale(locale),
        }
    }

    /// Pair a body with `media`, keeping within Telegram's limits. The
    /// media is dropped only when no shortened body fits a caption.
    pub fn compose(&self, event: &EventDescriptor, media: MediaResult) -> ComposedMessage {
        if !media.is_none() {
            if let Some(text) = self.body_within(event, CAPTION_LIMIT) {
                return ComposedMessage { text, media };
            }
        }
        ComposedMessage {
            text: self
                .body_within(event, TEXT_LIMIT)
                .unwrap_or_else(|| self.render(event, 0)),
            media: MediaResult::None,
        }
    }

    /// The HTML body for an event, listing every zone.
    pub fn body(&self, event: &EventDescriptor) -> String {
        self.render(event, event.zones.len())
    }

    /// The longest rendering within `limit`, dropping zones from the end.
    fn body_within(&self, event: &EventDescriptor, limit: usize) -> Option<String> {
        (0..=event.zones.len())
            .rev()
            .map(|shown| self.render(event, shown))
            .find(|body| telegram_len(body) <= limit)
    }

    /// Render with only the first `shown` zones named.
    fn render(&self, event: &EventDescriptor, shown: usize) -> String {
        let mut lines = vec![
            "🚨 <b>Detection Alert</b>".to_string(),
            String::new(),
            format!("📷 <b>Camera:</b> {}", escape_html(&ellipsize(&event.camera))),
        ];

        match &event.sub_label {
            Some(sub) => lines.push(format!(
                "👤 <b>Recognized:</b> {}",
                with_percent(&sub.name, sub.score.map(crate::models::score_to_percent))
            )),
            None => lines.push(format!(
                "🏷️ <b>Label:</b> {}",
                with_percent(&event.label, event.confidence)
            )),
        }

        if !event.zones.is_empty() {
            let hidden = event.zones.len().saturating_sub(shown);
            let zones = match (shown.min(event.zones.len()), hidden) {
                (_, 0) => escape_html(&event.zones.join(", ")),
                (0, hidden) => format!("{} zones", hidden),
                (shown, hidden) => format!(
                    "{} (+{} more)",
                    escape_html(&event.zones[..shown].join(", ")),
                    hidden
                ),
            };
            lines.push(format!("📍 <b>Zone(s):</b> {}", zones));
        }

        if let Some(start) = self.format_time(event.start_time) {
            lines.push(format!("📅 <b>Time:</b> {}", start));
        }
        if let Some(end) = event.end_time.and_then(|t| self.format_time(t)) {
            lines.push(format!("🕑 <b>End:</b> {}", end));
        }

        lines.push(String::new());

        if let Some(external) = &self.external_url {
            let url = format!("{}/events/{}", external, event.id);
            lines.push(format!(
                "🔗 <a href=\"{}\">View Event in Frigate</a>",
                escape_html(&url)
            ));
        }
        lines.push(format!(
            "🎬 <a href=\"{}\">Download Clip</a>",
            escape_html(&self.clip_url(&event.id))
        ));

        lines.join("\n")
    }

    /// Direct clip download link on the internal NVR.
    pub fn clip_url(&self, event_id: &str) -> String {
        format!("{}/api/events/{}/clip.mp4", self.nvr_url, event_id)
    }

    /// Format an epoch timestamp in the configured zone. `None` for
    /// zero, negative, or out-of-range values.
    pub fn format_time(&self, epoch: f64) -> Option<String> {
        if !epoch.is_finite() || epoch <= 0.0 {
            return None;
        }
        let secs = epoch.trunc() as i64;
        let nanos = ((epoch - epoch.trunc()) * 1e9) as u32;
        let dt = DateTime::from_timestamp(secs, nanos)?;
        Some(
            dt.with_timezone(&self.timezone)
                .format(self.time_format)
                .to_string(),
        )
    }
}

fn with_percent(name: &str, percent: Option<u8>) -> String {
    let name = escape_html(&ellipsize(name));
    match percent {
        Some(p) => format!("{} ({}%)", name, p),
        None => name,
    }
}

/// Cut `name` to [`NAME_LIMIT`] characters, marking the cut with `…`.
fn ellipsize(name: &str) -> String {
    if name.chars().count() <= NAME_LIMIT {
        return name.to_string();
    }
    let mut cut: String = name.chars().take(NAME_LIMIT - 1).collect();
    cut.push('…');
    cut
}

/// Length as Telegram counts it (UTF-16 code units). Markup is counted
/// too, which only errs on the short side.
fn telegram_len(text: &str) -> usize {
    text.encode_utf16().count()
}

/// Parse an IANA timezone name such as `Europe/Berlin`.
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.trim()
        .parse::<Tz>()
        .map_err(|e| anyhow!("Unknown timezone '{}': {}", name, e))
}

/// Pick a date/time pattern for a BCP-47-ish locale tag (`en-US`, `de_DE`).
pub fn time_format_for_locale(locale: &str) -> &'static str {
    let mut parts = locale.trim().split(['-', '_']);
    let lang = parts.next().unwrap_or("").to_ascii_lowercase();
    let region = parts.next().unwrap_or("").to_ascii_uppercase();

    match (lang.as_str(), region.as_str()) {
        ("en", "US") | ("en", "") => "%m/%d/%Y %I:%M:%S %p %Z",
        ("en", _) | ("fr", _) | ("es", _) | ("it", _) | ("pt", _) | ("nl", _) => {
            "%d/%m/%Y %H:%M:%S %Z"
        }
        ("de", _) | ("ru", _) | ("pl", _) | ("cs", _) | ("fi", _) | ("nb", _) | ("uk", _) => {
            "%d.%m.%Y %H:%M:%S %Z"
        }
        _ => "%Y-%m-%d %H:%M:%S %Z",
    }
}

/// Escape text for Telegram's HTML parse mode (also safe inside quoted
/// attribute values).
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}
