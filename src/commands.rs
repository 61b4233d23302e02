//! Operator commands received through the chat bot.
//!
//! | Command | Aliases | Effect |
//! |---------|---------|--------|
//! | `/start` | | Welcome text |
//! | `/help` | | Command list |
//! | `/enable` | `/enable_notifications` | Turn notifications on |
//! | `/disable` | `/disable_notifications` | Turn notifications off |
//! | `/status` | | Toggle, polling interval, camera/zone matrix, NVR settings |
//! | `/cameras` | | Cameras known to the NVR |
//! | `/photo <camera>` | | Latest frame of a camera |
//! | `/photo_all` | | Latest frame of every camera |
//! | `/video <camera>` | | Short clip recorded from now |
//! | `/video_all` | | Short clip of every camera |
//!
//! Only the configured chat may issue commands; anything else is logged
//! and ignored. Every command is idempotent.
//!
//! The video commands announce the recording, wait until the NVR has
//! written it, then fetch it from the camera's continuous recording.
//! Commands are answered one at a time, so a video command holds the
//! listener for that wait.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use frigate_relay_core::compose::escape_html;
use frigate_relay_core::models::MediaPayload;
use frigate_relay_core::monitor::MonitorConfig;

use crate::config::Config;
use crate::frigate::{MediaFetch, Nvr};
use crate::telegram::{ChatTransport, IncomingMessage, UpdateSource};
use crate::toggle::ToggleStateStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Enable,
    Disable,
    Status,
    Cameras,
    /// Camera name, if one was given.
    Photo(Option<String>),
    PhotoAll,
    Video(Option<String>),
    VideoAll,
    Unknown(String),
}

impl Command {
    /// Parse a message. `None` when the text is not a command.
    pub fn parse(text: &str) -> Option<Command> {
        let text = text.trim();
        let rest = text.strip_prefix('/')?;

        let (head, args) = match rest.split_once(char::is_whitespace) {
            Some((head, args)) => (head, args.trim()),
            None => (rest, ""),
        };
        // `/status@my_bot` in group chats
        let name = head.split('@').next().unwrap_or("").to_ascii_lowercase();

        let command = match name.as_str() {
            "start" => Command::Start,
            "help" => Command::Help,
            "enable" | "enable_notifications" => Command::Enable,
            "disable" | "disable_notifications" => Command::Disable,
            "status" => Command::Status,
            "cameras" => Command::Cameras,
            "photo" => Command::Photo(argument(args)),
            "photo_all" => Command::PhotoAll,
            "video" => Command::Video(argument(args)),
            "video_all" => Command::VideoAll,
            _ => Command::Unknown(name),
        };
        Some(command)
    }
}

fn argument(args: &str) -> Option<String> {
    Some(args.to_string()).filter(|a| !a.is_empty())
}

/// One message sent back for a command.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Text(String),
    Photo { photo: MediaPayload, caption: String },
    Video { video: MediaPayload, caption: String },
}

impl Reply {
    pub fn text(&self) -> &str {
        match self {
            Reply::Text(t) => t,
            Reply::Photo { caption, .. } | Reply::Video { caption, .. } => caption,
        }
    }
}

/// Timing of the video commands.
#[derive(Debug, Clone, Copy)]
pub struct LiveClip {
    /// Length of the requested recording.
    pub length: Duration,
    /// Wait before fetching it; a little longer than `length` so the NVR
    /// has flushed the segment.
    pub wait: Duration,
}

impl Default for LiveClip {
    fn default() -> Self {
        Self {
            length: Duration::from_secs(15),
            wait: Duration::from_secs(17),
        }
    }
}

/// Settings shown by `/status`.
#[derive(Debug, Clone)]
pub struct StatusInfo {
    pub interval_secs: u64,
    pub nvr_url: String,
    pub external_url: Option<String>,
    pub nvr_timeout_secs: u64,
    pub upload_timeout_secs: u64,
}

impl StatusInfo {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval_secs: config.polling.interval_secs,
            nvr_url: config.nvr.base_url().to_string(),
            external_url: config.nvr.external_base_url().map(str::to_string),
            nvr_timeout_secs: config.nvr.timeout_secs,
            upload_timeout_secs: config.telegram.upload_timeout_secs,
        }
    }
}

pub struct CommandHandler {
    toggle: Arc<ToggleStateStore>,
    monitor: Arc<MonitorConfig>,
    nvr: Arc<dyn Nvr>,
    transport: Arc<dyn ChatTransport>,
    authorized_chat: String,
    status: StatusInfo,
    live_clip: LiveClip,
}

impl CommandHandler {
    pub fn new(
        toggle: Arc<ToggleStateStore>,
        monitor: Arc<MonitorConfig>,
        nvr: Arc<dyn Nvr>,
        transport: Arc<dyn ChatTransport>,
        authorized_chat: &str,
        status: StatusInfo,
    ) -> Self {
        Self {
            toggle,
            monitor,
            nvr,
            transport,
            authorized_chat: authorized_chat.trim().to_string(),
            status,
            live_clip: LiveClip::default(),
        }
    }

    pub fn with_live_clip(mut self, live_clip: LiveClip) -> Self {
        self.live_clip = live_clip;
        self
    }

    /// Answer a message. Non-commands and messages from chats other than
    /// the configured one are ignored. `Err` when a reply could not be sent.
    pub async fn respond(&self, message: &IncomingMessage) -> Result<()> {
        let Some(command) = Command::parse(&message.text) else {
            return Ok(());
        };

        if message.chat_id.trim() != self.authorized_chat {
            tracing::warn!(chat_id = %message.chat_id, ?command, "unauthorized command attempt");
            return Ok(());
        }

        tracing::debug!(?command, "command received");

        match command {
            Command::Start => self.send(Reply::Text(welcome_text())).await,
            Command::Help => self.send(Reply::Text(help_text())).await,
            Command::Enable => self.send(Reply::Text(self.set_enabled(true).await)).await,
            Command::Disable => self.send(Reply::Text(self.set_enabled(false).await)).await,
            Command::Status => self.send(Reply::Text(self.status_text())).await,
            Command::Cameras => self.send(Reply::Text(self.cameras_text().await)).await,
            Command::Photo(None) => {
                self.send(Reply::Text("Usage: /photo &lt;camera_name&gt;".to_string()))
                    .await
            }
            Command::Photo(Some(camera)) => self.send(self.photo(&camera).await).await,
            Command::PhotoAll => self.photo_all().await,
            Command::Video(None) => {
                self.send(Reply::Text("Usage: /video &lt;camera_name&gt;".to_string()))
                    .await
            }
            Command::Video(Some(camera)) => self.video(&camera).await,
            Command::VideoAll => self.video_all().await,
            Command::Unknown(name) => {
                self.send(Reply::Text(format!(
                    "Unknown command /{}. Use /help to see available commands.",
                    escape_html(&name)
                )))
                .await
            }
        }
    }

    async fn send(&self, reply: Reply) -> Result<()> {
        match reply {
            Reply::Text(text) => self.transport.send_text(&text).await,
            Reply::Photo { photo, caption } => self.transport.send_photo(&photo, &caption).await,
            Reply::Video { video, caption } => self.transport.send_video(&video, &caption).await,
        }
    }

    /// Send one of several replies; a failure is logged so the rest still go out.
    async fn send_each(&self, reply: Reply) {
        if let Err(e) = self.send(reply).await {
            tracing::warn!(error = %e, "failed to send command reply");
        }
    }

    async fn set_enabled(&self, enabled: bool) -> String {
        let change = self.toggle.set_enabled(enabled).await;
        let word = if enabled { "enabled" } else { "disabled" };
        let icon = if enabled { "✅" } else { "🔕" };

        if !change.persisted {
            return format!(
                "⚠️ Notifications {} for now, but the setting could not be saved and may not survive a restart. Try again.",
                word
            );
        }
        if change.changed {
            format!("{} Notifications {}.", icon, word)
        } else {
            format!("{} Notifications are already {}.", icon, word)
        }
    }

    pub fn status_text(&self) -> String {
        let enabled = self.toggle.is_enabled();
        let (icon, state) = if enabled {
            ("🔔", "Enabled")
        } else {
            ("🔕", "Disabled")
        };

        let mut lines = vec![
            "📊 <b>Bot Status</b>".to_string(),
            String::new(),
            format!("<b>Notifications:</b> {} {}", icon, state),
            format!("<b>Polling Interval:</b> ⏱ {}s", self.status.interval_secs),
            "<b>Monitored Cameras:</b> 🎥".to_string(),
        ];
        for line in self.monitor.describe() {
            lines.push(format!("• {}", escape_html(&line)));
        }
        lines.extend([
            String::new(),
            "🛠 <b>Configuration</b>".to_string(),
            format!("<b>Frigate URL:</b> 🔗 {}", escape_html(&self.status.nvr_url)),
            format!(
                "<b>External URL:</b> 🌐 {}",
                self.status
                    .external_url
                    .as_deref()
                    .map(escape_html)
                    .unwrap_or_else(|| "Not configured".to_string())
            ),
            format!("<b>Frigate Timeout:</b> ⏳ {}s", self.status.nvr_timeout_secs),
            format!("<b>Upload Timeout:</b> 📤 {}s", self.status.upload_timeout_secs),
        ]);
        lines.join("\n")
    }

    /// Camera names, or `None` when the NVR gave none.
    async fn camera_list(&self) -> Option<Vec<String>> {
        match self.nvr.cameras().await {
            Ok(cameras) if !cameras.is_empty() => Some(cameras),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "camera list request failed");
                None
            }
        }
    }

    async fn cameras_text(&self) -> String {
        match self.camera_list().await {
            Some(cameras) => {
                let mut lines = vec!["<b>Registered Cameras:</b>".to_string(), String::new()];
                for camera in cameras {
                    lines.push(format!("• <code>{}</code>", escape_html(&camera)));
                }
                lines.join("\n")
            }
            None => NO_CAMERAS.to_string(),
        }
    }

    async fn snapshot(&self, camera: &str) -> Option<MediaPayload> {
        match self.nvr.latest_snapshot(camera).await {
            Ok(MediaFetch::Ready(photo)) => Some(photo),
            Ok(MediaFetch::NotReady) => None,
            Err(e) => {
                tracing::warn!(camera, error = %e, "snapshot request failed");
                None
            }
        }
    }

    async fn photo(&self, camera: &str) -> Reply {
        match self.snapshot(camera).await {
            Some(photo) => snapshot_reply(camera, photo),
            None => Reply::Text(format!(
                "Could not fetch snapshot for camera: {}",
                escape_html(camera)
            )),
        }
    }

    async fn photo_all(&self) -> Result<()> {
        let Some(cameras) = self.camera_list().await else {
            return self.send(Reply::Text(NO_CAMERAS.to_string())).await;
        };
        for camera in cameras {
            let reply = match self.snapshot(&camera).await {
                Some(photo) => snapshot_reply(&camera, photo),
                None => Reply::Text(format!(
                    "❌ Failed to fetch snapshot for {}",
                    escape_html(&camera)
                )),
            };
            self.send_each(reply).await;
        }
        Ok(())
    }

    /// Wait out the recording that starts now. Returns its `(start, end)`
    /// in epoch seconds.
    async fn record(&self) -> (i64, i64) {
        let start = chrono::Utc::now().timestamp();
        tokio::time::sleep(self.live_clip.wait).await;
        (start, start + self.live_clip.length.as_secs() as i64)
    }

    async fn clip(&self, camera: &str, start: i64, end: i64) -> Option<MediaPayload> {
        match self.nvr.recording_clip(camera, start, end).await {
            Ok(MediaFetch::Ready(video)) => Some(video),
            Ok(MediaFetch::NotReady) => None,
            Err(e) => {
                tracing::warn!(camera, error = %e, "recording clip request failed");
                None
            }
        }
    }

    async fn video(&self, camera: &str) -> Result<()> {
        self.send(Reply::Text(format!(
            "🎬 Recording {}s clip for <code>{}</code>...",
            self.live_clip.length.as_secs(),
            escape_html(camera)
        )))
        .await?;

        let (start, end) = self.record().await;
        let reply = match self.clip(camera, start, end).await {
            Some(video) => clip_reply(camera, video),
            None => Reply::Text(format!(
                "❌ Could not fetch video clip for {}",
                escape_html(camera)
            )),
        };
        self.send(reply).await
    }

    async fn video_all(&self) -> Result<()> {
        let Some(cameras) = self.camera_list().await else {
            return self.send(Reply::Text(NO_CAMERAS.to_string())).await;
        };
        self.send(Reply::Text(format!(
            "🎬 Recording {}s clips for {} cameras...",
            self.live_clip.length.as_secs(),
            cameras.len()
        )))
        .await?;

        let (start, end) = self.record().await;
        for camera in cameras {
            let reply = match self.clip(&camera, start, end).await {
                Some(video) => clip_reply(&camera, video),
                None => Reply::Text(format!(
                    "❌ Failed to fetch video clip for {}",
                    escape_html(&camera)
                )),
            };
            self.send_each(reply).await;
        }
        Ok(())
    }
}

const NO_CAMERAS: &str = "Could not retrieve camera list from Frigate.";

fn snapshot_reply(camera: &str, photo: MediaPayload) -> Reply {
    Reply::Photo {
        photo,
        caption: format!("📷 Snapshot: {}", escape_html(camera)),
    }
}

fn clip_reply(camera: &str, video: MediaPayload) -> Reply {
    Reply::Video {
        video,
        caption: format!("🎬 Clip: {}", escape_html(camera)),
    }
}

fn welcome_text() -> String {
    "👋 <b>Welcome to Frigate Relay!</b>\n\n\
     I'll send you rich notifications for Frigate detection events.\n\n\
     Use /help to see available commands."
        .to_string()
}

fn help_text() -> String {
    [
        "<b>Frigate Relay Help</b>",
        "",
        "🔔 <b>Notifications</b>",
        "/enable - Turn on alerts",
        "/disable - Turn off alerts",
        "",
        "📷 <b>Cameras</b>",
        "/cameras - List cameras",
        "/photo &lt;camera&gt; - Latest snapshot",
        "/photo_all - Snapshots from all cameras",
        "/video &lt;camera&gt; - Record a 15s clip",
        "/video_all - Record clips from all cameras",
        "",
        "📊 <b>Information</b>",
        "/status - Show bot status and configuration",
        "/help - Show this help message",
    ]
    .join("\n")
}

/// Skip updates queued while the process was down. Returns the offset to
/// continue from.
pub async fn drop_pending(source: &dyn UpdateSource) -> Option<i64> {
    match source.get_updates(Some(-1), Duration::ZERO).await {
        Ok(updates) => {
            let next = updates.last().map(|u| u.update_id + 1);
            if next.is_some() {
                tracing::info!("dropped pending bot updates");
            }
            next
        }
        Err(e) => {
            tracing::warn!(error = %e, "could not drop pending bot updates");
            None
        }
    }
}

/// Long-poll for commands until `shutdown` flips to `true`.
pub async fn run_command_listener(
    handler: CommandHandler,
    source: Arc<dyn UpdateSource>,
    long_poll: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut offset = drop_pending(source.as_ref()).await;
    tracing::info!("command listener started");

    while !*shutdown.borrow() {
        let updates = tokio::select! {
            res = source.get_updates(offset, long_poll) => res,
            _ = shutdown.changed() => break,
        };

        match updates {
            Ok(updates) => {
                for update in updates {
                    offset = Some(update.update_id + 1);
                    let Some(message) = update.message else {
                        continue;
                    };
                    if let Err(e) = handler.respond(&message).await {
                        tracing::warn!(error = %e, "failed to reply to command");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "getUpdates failed");
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
    }

    tracing::info!("command listener stopped");
}
