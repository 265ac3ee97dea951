use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::connection_manager::BackoffConfig;
use crate::notification::Permission;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub keepalive: KeepAliveConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub token: TokenConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
    #[serde(default)]
    pub quotes: QuotesConfig,
    #[serde(default)]
    pub otel: OtelConfig,
    /// Capacity of the per-session inbound message channel
    #[serde(default = "default_channel_buffer")]
    pub channel_buffer: usize,
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Output format of the console log layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_path")]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeepAliveConfig {
    /// Ping interval in seconds while the connection is open
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    /// Close an open connection after this many seconds without inbound
    /// frames (0 disables)
    #[serde(default)]
    pub idle_timeout: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
    /// Give up after this many consecutive failed attempts (0 = never)
    #[serde(default)]
    pub max_attempts: u32,
    /// Handshake timeout in seconds (0 waits indefinitely)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    /// JSON file holding the persisted client storage
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
    #[serde(default = "default_token_key")]
    pub key: String,
    /// How often the binary re-reads the token, in seconds (0 disables)
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Initial permission: "default", "granted" or "denied"
    #[serde(default)]
    pub permission: Permission,
    /// Whether a permission request from the "default" state is granted
    #[serde(default = "default_true")]
    pub grant_on_request: bool,
    #[serde(default = "default_title")]
    pub default_title: String,
    /// Application name shown by the host notification service
    #[serde(default = "default_app_name")]
    pub app_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuotesConfig {
    /// Status filter the quotes cache is keyed by
    #[serde(default = "default_quote_status")]
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

fn default_true() -> bool {
    true
}

fn default_channel_buffer() -> usize {
    32
}

fn default_scheme() -> String {
    "wss".to_string()
}

fn default_host() -> String {
    "dev.meridian.ociuzerp.in".to_string()
}

fn default_path() -> String {
    "/ws/notifications/".to_string()
}

fn default_ping_interval() -> u64 {
    30 // 30 seconds
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000 // 30 seconds
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter_factor() -> f64 {
    0.1 // 10% jitter
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_store_path() -> PathBuf {
    PathBuf::from(".meridian/storage.json")
}

fn default_token_key() -> String {
    "ACS_TKN".to_string()
}

fn default_poll_interval() -> u64 {
    5
}

fn default_title() -> String {
    "New Update".to_string()
}

fn default_app_name() -> String {
    "Meridian".to_string()
}

fn default_quote_status() -> String {
    "SE".to_string()
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "meridian-notification-client".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("endpoint.scheme", default_scheme())?
            .set_default("endpoint.host", default_host())?
            .set_default("endpoint.path", default_path())?
            .set_default("keepalive.ping_interval", default_ping_interval())?
            .set_default("reconnect.enabled", true)?
            .set_default("reconnect.connect_timeout", default_connect_timeout())?
            .set_default("token.key", default_token_key())?
            .set_default("quotes.status", default_quote_status())?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // MERIDIAN_ENDPOINT__HOST, MERIDIAN_KEEPALIVE__PING_INTERVAL, etc.
            .add_source(
                Environment::with_prefix("MERIDIAN")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(","),
            );

        builder.build()?.try_deserialize()
    }
}

impl EndpointConfig {
    /// Endpoint without the token query, e.g. `wss://host/ws/notifications/`
    pub fn base_url(&self) -> String {
        format!("{}://{}{}", self.scheme, self.host, self.path)
    }
}

/// Upper bound for keep-alive and idle durations, in seconds (one day)
pub const MAX_KEEPALIVE_SECS: u64 = 24 * 60 * 60;

impl KeepAliveConfig {
    pub fn ping_period(&self) -> Duration {
        Duration::from_secs(self.ping_interval.clamp(1, MAX_KEEPALIVE_SECS))
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout > 0)
            .then(|| Duration::from_secs(self.idle_timeout.min(MAX_KEEPALIVE_SECS)))
    }
}

impl ReconnectConfig {
    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            initial_delay_ms: self.initial_delay_ms,
            max_delay_ms: self.max_delay_ms,
            multiplier: self.multiplier,
            jitter_factor: self.jitter_factor,
        }
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout > 0).then(|| Duration::from_secs(self.connect_timeout))
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            keepalive: KeepAliveConfig::default(),
            reconnect: ReconnectConfig::default(),
            token: TokenConfig::default(),
            notification: NotificationConfig::default(),
            quotes: QuotesConfig::default(),
            otel: OtelConfig::default(),
            channel_buffer: default_channel_buffer(),
            log_format: LogFormat::default(),
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            host: default_host(),
            path: default_path(),
        }
    }
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            ping_interval: default_ping_interval(),
            idle_timeout: 0,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter_factor: default_jitter_factor(),
            max_attempts: 0,
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            key: default_token_key(),
            poll_interval: default_poll_interval(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            permission: Permission::Default,
            grant_on_request: true,
            default_title: default_title(),
            app_name: default_app_name(),
        }
    }
}

impl Default for QuotesConfig {
    fn default() -> Self {
        Self {
            status: default_quote_status(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}
