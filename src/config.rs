//! TOML configuration parsing and validation.
//!
//! # Example
//!
//! ```toml
//! [nvr]
//! url = "http://frigate:5000"
//! external_url = "https://nvr.example.com"
//!
//! [telegram]
//! chat_id = "123456789"
//! # bot_token comes from TELEGRAM_BOT_TOKEN when omitted
//!
//! [monitor]
//! cameras = "front_door:yard,driveway;back"
//!
//! [state]
//! path = "./data/relay.sqlite"
//! ```
//!
//! # Environment Variables
//!
//! Secrets may be kept out of the file. When set, these override it:
//! - `TELEGRAM_BOT_TOKEN`
//! - `FRIGATE_USERNAME`
//! - `FRIGATE_PASSWORD`

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use frigate_relay_core::compose::parse_timezone;
use frigate_relay_core::monitor::{MonitorConfig, ParsedMonitor};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub nvr: NvrConfig,
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub monitor: MonitorSection,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NvrConfig {
    pub url: String,
    #[serde(default)]
    pub external_url: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_nvr_timeout")]
    pub timeout_secs: u64,
}

fn default_nvr_timeout() -> u64 {
    15
}

impl NvrConfig {
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }

    pub fn external_base_url(&self) -> Option<&str> {
        self.external_url
            .as_deref()
            .map(|u| u.trim_end_matches('/'))
            .filter(|u| !u.is_empty())
    }

    /// Basic-auth credentials, only when both halves are configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => Some((u, p)),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    pub chat_id: String,
    #[serde(default = "default_telegram_api")]
    pub api_url: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_upload_timeout")]
    pub upload_timeout_secs: u64,
    #[serde(default = "default_long_poll")]
    pub long_poll_secs: u64,
}

fn default_telegram_api() -> String {
    "https://api.telegram.org".to_string()
}
fn default_connect_timeout() -> u64 {
    15
}
fn default_upload_timeout() -> u64 {
    60
}
fn default_long_poll() -> u64 {
    30
}

/// The camera/zone filter, in either accepted syntax.
#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
pub enum MonitorSpec {
    /// Legacy `camera:zone,zone;camera` string, or a JSON object string.
    Text(String),
    /// TOML table of camera → zone list.
    Table(BTreeMap<String, Vec<String>>),
}

impl Default for MonitorSpec {
    fn default() -> Self {
        MonitorSpec::Text(String::new())
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct MonitorSection {
    #[serde(default)]
    pub cameras: MonitorSpec,
}

impl MonitorSection {
    /// Normalize the configured filter. Structured syntax errors are fatal.
    pub fn parse(&self) -> Result<ParsedMonitor> {
        let parsed = match &self.cameras {
            MonitorSpec::Text(raw) => MonitorConfig::parse(raw),
            MonitorSpec::Table(table) => {
                MonitorConfig::from_map(table.clone()).map(|config| ParsedMonitor {
                    config,
                    skipped: Vec::new(),
                })
            }
        };
        parsed.context("Invalid [monitor].cameras")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollingConfig {
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
    #[serde(default = "default_lookback")]
    pub startup_lookback_secs: u64,
    #[serde(default = "default_tick_timeout")]
    pub tick_timeout_secs: u64,
    /// `limit` of each events request.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Pages fetched per camera and tick before the rest waits for the next tick.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            max_backoff_secs: default_max_backoff(),
            startup_lookback_secs: default_lookback(),
            tick_timeout_secs: default_tick_timeout(),
            page_size: default_page_size(),
            max_pages: default_max_pages(),
        }
    }
}

fn default_interval() -> u64 {
    60
}
fn default_max_backoff() -> u64 {
    300
}
fn default_lookback() -> u64 {
    300
}
fn default_tick_timeout() -> u64 {
    900
}
fn default_page_size() -> usize {
    100
}
fn default_max_pages() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct MediaConfig {
    #[serde(default = "default_grace")]
    pub grace_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_min_bytes")]
    pub min_bytes: usize,
    #[serde(default)]
    pub send_clip: bool,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            grace_secs: default_grace(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay(),
            fetch_timeout_secs: default_fetch_timeout(),
            min_bytes: default_min_bytes(),
            send_clip: false,
        }
    }
}

fn default_grace() -> u64 {
    5
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay() -> u64 {
    2
}
fn default_fetch_timeout() -> u64 {
    60
}
fn default_min_bytes() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct StateConfig {
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
    #[serde(default = "default_dedup_max_age")]
    pub dedup_max_age_hours: u64,
    #[serde(default = "default_max_send_attempts")]
    pub max_send_attempts: u32,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
            dedup_capacity: default_dedup_capacity(),
            dedup_max_age_hours: default_dedup_max_age(),
            max_send_attempts: default_max_send_attempts(),
        }
    }
}

fn default_state_path() -> PathBuf {
    PathBuf::from("./data/relay.sqlite")
}
fn default_dedup_capacity() -> usize {
    2000
}
fn default_dedup_max_age() -> u64 {
    72
}
fn default_max_send_attempts() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct DisplayConfig {
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_locale")]
    pub locale: String,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            locale: default_locale(),
        }
    }
}

fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_locale() -> String {
    "en-US".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub verbose: bool,
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.polling.interval_secs)
    }

    pub fn nvr_timeout(&self) -> Duration {
        Duration::from_secs(self.nvr.timeout_secs)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.telegram.upload_timeout_secs)
    }
}

/// Read, overlay environment secrets, and validate.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    apply_env_overrides(&mut config);
    validate(&config)?;
    Ok(config)
}

/// Parse and validate config text without consulting the environment.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config")?;
    validate(&config)?;
    Ok(config)
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
        if !token.is_empty() {
            config.telegram.bot_token = token;
        }
    }
    if let Ok(user) = std::env::var("FRIGATE_USERNAME") {
        config.nvr.username = Some(user);
    }
    if let Ok(password) = std::env::var("FRIGATE_PASSWORD") {
        config.nvr.password = Some(password);
    }
}

fn validate(config: &Config) -> Result<()> {
    // NVR
    if config.nvr.base_url().is_empty() {
        bail!("nvr.url must not be empty");
    }
    if !config.nvr.base_url().starts_with("http://") && !config.nvr.base_url().starts_with("https://")
    {
        bail!("nvr.url must start with http:// or https://");
    }

    // Telegram
    if config.telegram.bot_token.trim().is_empty() {
        bail!("telegram.bot_token must be set (or TELEGRAM_BOT_TOKEN)");
    }
    if config.telegram.chat_id.trim().is_empty() {
        bail!("telegram.chat_id must not be empty");
    }

    // Polling
    if config.polling.interval_secs == 0 {
        bail!("polling.interval_secs must be > 0");
    }
    if config.polling.max_backoff_secs < config.polling.interval_secs {
        bail!("polling.max_backoff_secs must be >= polling.interval_secs");
    }
    if config.polling.tick_timeout_secs == 0 {
        bail!("polling.tick_timeout_secs must be > 0");
    }
    if config.polling.page_size == 0 || config.polling.max_pages == 0 {
        bail!("polling.page_size and polling.max_pages must be > 0");
    }

    // Media
    if config.media.max_retries == 0 {
        bail!("media.max_retries must be >= 1");
    }
    if config.media.fetch_timeout_secs == 0 {
        bail!("media.fetch_timeout_secs must be > 0");
    }

    // State
    if config.state.dedup_capacity == 0 {
        bail!("state.dedup_capacity must be > 0");
    }
    if config.state.max_send_attempts == 0 {
        bail!("state.max_send_attempts must be >= 1");
    }

    // Display
    parse_timezone(&config.display.timezone).context("Invalid display.timezone")?;

    // Monitor: structured syntax errors stop startup here.
    config.monitor.parse()?;

    Ok(())
}
