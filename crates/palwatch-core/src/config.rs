//! palwatch.toml configuration parser.
//!
//! One `[[servers]]` table per monitored game server. Durations are written
//! as strings (`"15s"`, `"500ms"`, `"5m"`) and resolved through the accessor
//! methods, which fall back to the documented defaults.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

const DEFAULT_API_PORT: u16 = 8212;
const DEFAULT_SFTP_PORT: u16 = 2022;
const DEFAULT_LOG_PATH: &str = "Pal/Binaries/Win64/PalDefender/Logs";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PalwatchConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub servers: Vec<ServerTarget>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl")]
    pub ttl: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: default_cache_ttl(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        parse_duration(&self.ttl).unwrap_or(Duration::from_secs(25))
    }
}

/// A password or other credential. Never printed by `Debug`.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Identity and connection descriptor of one monitored server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerTarget {
    pub name: String,
    /// Tenant (chat guild) that owns this server.
    #[serde(default)]
    pub guild_id: u64,
    pub host: String,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    #[serde(default = "default_api_user")]
    pub api_user: String,
    pub api_password: Secret,
    pub sftp: Option<SftpConfig>,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub save: SaveConfig,
    #[serde(default)]
    pub status: StatusConfig,
}

impl ServerTarget {
    /// Cache key identifying the physical API endpoint.
    pub fn endpoint_key(&self) -> String {
        format!("{}:{}", self.host, self.api_port)
    }

    /// Base URL of the REST control API.
    pub fn api_base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.api_port)
    }

    /// Whether the chat log relay should run for this server.
    pub fn chat_enabled(&self) -> bool {
        self.chat.enabled && self.sftp.is_some()
    }

    /// Remote path of the save file watched for stalls, when configured.
    pub fn level_save_path(&self) -> Option<String> {
        let root = self.sftp.as_ref()?.save_path.as_deref()?;
        let root = root.trim_end_matches(['/', '\\']);
        Some(format!("{root}/Level.sav"))
    }

    pub fn save_check_enabled(&self) -> bool {
        self.save.enabled && self.level_save_path().is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SftpConfig {
    #[serde(default = "default_sftp_port")]
    pub port: u16,
    pub username: String,
    pub password: Secret,
    /// Directory containing the server's chat logs.
    #[serde(default = "default_log_path")]
    pub log_path: String,
    /// World save directory (the one holding `Level.sav`).
    pub save_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_chat_interval")]
    pub interval: String,
    /// Pause between two relayed lines.
    #[serde(default = "default_relay_delay")]
    pub relay_delay: String,
    /// Webhook receiving relayed chat lines.
    pub webhook: Option<String>,
    /// Messages containing any of these substrings are never relayed.
    #[serde(default = "default_blocked_phrases")]
    pub blocked_phrases: Vec<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: default_chat_interval(),
            relay_delay: default_relay_delay(),
            webhook: None,
            blocked_phrases: default_blocked_phrases(),
        }
    }
}

impl ChatConfig {
    pub fn interval(&self) -> Duration {
        parse_duration(&self.interval).unwrap_or(Duration::from_secs(15))
    }

    pub fn relay_delay(&self) -> Duration {
        parse_duration(&self.relay_delay).unwrap_or(Duration::from_secs(1))
    }
}

/// How failed save-file stat calls feed the stall escalation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnreachablePolicy {
    /// A failed stat counts as one stall observation.
    #[default]
    Shared,
    /// Failed stats use their own counter and escalation.
    Separate,
    /// Failed stats are only logged.
    Ignore,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_save_interval")]
    pub interval: String,
    /// Consecutive stall observations before the server is restarted.
    #[serde(default = "default_threshold")]
    pub threshold: u32,
    /// Observation period after startup or a restart before stalls count.
    #[serde(default = "default_five_minutes")]
    pub grace: String,
    /// Age the save file must exceed to count as stale.
    #[serde(default = "default_five_minutes")]
    pub quiet: String,
    #[serde(default = "default_shutdown_delay")]
    pub shutdown_delay_secs: u32,
    #[serde(default)]
    pub unreachable: UnreachablePolicy,
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: default_save_interval(),
            threshold: default_threshold(),
            grace: default_five_minutes(),
            quiet: default_five_minutes(),
            shutdown_delay_secs: default_shutdown_delay(),
            unreachable: UnreachablePolicy::default(),
        }
    }
}

impl SaveConfig {
    pub fn interval(&self) -> Duration {
        parse_duration(&self.interval).unwrap_or(Duration::from_secs(60))
    }

    pub fn grace(&self) -> Duration {
        parse_duration(&self.grace).unwrap_or(Duration::from_secs(300))
    }

    pub fn quiet(&self) -> Duration {
        parse_duration(&self.quiet).unwrap_or(Duration::from_secs(300))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_status_interval")]
    pub interval: String,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: default_status_interval(),
        }
    }
}

impl StatusConfig {
    pub fn interval(&self) -> Duration {
        parse_duration(&self.interval).unwrap_or(Duration::from_secs(180))
    }
}

impl PalwatchConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        let config: PalwatchConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the workers cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        check_duration("cache.ttl", &self.cache.ttl)?;

        let mut names = std::collections::HashSet::new();
        for server in &self.servers {
            let name = &server.name;
            if name.trim().is_empty() {
                return Err(ConfigError::Invalid("server name must not be empty".into()));
            }
            if !names.insert(name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate server name: {name}")));
            }
            if server.host.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{name}: host must not be empty")));
            }
            if server.save.threshold == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{name}: save.threshold must be at least 1"
                )));
            }
            check_interval(name, "chat.interval", &server.chat.interval)?;
            check_duration(&format!("{name}: chat.relay_delay"), &server.chat.relay_delay)?;
            check_interval(name, "save.interval", &server.save.interval)?;
            check_duration(&format!("{name}: save.grace"), &server.save.grace)?;
            check_duration(&format!("{name}: save.quiet"), &server.save.quiet)?;
            check_interval(name, "status.interval", &server.status.interval)?;
        }
        Ok(())
    }
}

fn check_duration(field: &str, value: &str) -> ConfigResult<Duration> {
    parse_duration(value)
        .ok_or_else(|| ConfigError::Invalid(format!("{field}: invalid duration {value:?}")))
}

fn check_interval(server: &str, field: &str, value: &str) -> ConfigResult<()> {
    let d = check_duration(&format!("{server}: {field}"), value)?;
    if d.is_zero() {
        return Err(ConfigError::Invalid(format!("{server}: {field} must be non-zero")));
    }
    Ok(())
}

/// Parse a duration string like "5s", "500ms", "1m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok()?.checked_mul(60).map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

fn default_cache_ttl() -> String {
    "25s".to_string()
}

fn default_api_port() -> u16 {
    DEFAULT_API_PORT
}

fn default_api_user() -> String {
    "admin".to_string()
}

fn default_sftp_port() -> u16 {
    DEFAULT_SFTP_PORT
}

fn default_log_path() -> String {
    DEFAULT_LOG_PATH.to_string()
}

fn default_true() -> bool {
    true
}

fn default_chat_interval() -> String {
    "15s".to_string()
}

fn default_relay_delay() -> String {
    "1s".to_string()
}

fn default_blocked_phrases() -> Vec<String> {
    ["/adminpassword", "/creativemenu", "/", "!"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_save_interval() -> String {
    "60s".to_string()
}

fn default_threshold() -> u32 {
    3
}

fn default_five_minutes() -> String {
    "300s".to_string()
}

fn default_shutdown_delay() -> u32 {
    30
}

fn default_status_interval() -> String {
    "180s".to_string()
}
