//! Configuration system for Gattlink.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $GATTLINK_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/gattlink/config.toml
//!   3. ~/.config/gattlink/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::wire::{check_packet_size, WireError, DEFAULT_PACKET_SIZE};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GattlinkConfig {
    pub link: LinkConfig,
    pub transfer: TransferConfig,
    pub queue: QueueConfig,
    pub loopback: LoopbackConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Bytes per characteristic write, tag included.
    pub packet_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Rolled-back retries allowed across one whole payload.
    pub max_submit_retries: u32,
    /// Pause after a refused write before retrying.
    pub retry_backoff_ms: u64,
    /// How long to wait for the write-complete signal per packet.
    pub ack_timeout_ms: u64,
    /// What to do with refused writes once the retry budget is spent.
    pub exhausted_retries: ExhaustedRetryPolicy,
    /// Whether a zero-length payload goes out as one empty packet.
    pub empty_payload: EmptyPayloadPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Bound on waiting requests, applied twice: to the link channel and to
    /// the worker's parked backlog. Once both are full `request_send` refuses.
    pub request_capacity: usize,
    /// Gap between the end of one payload and the start of the next queued one.
    pub backlog_gap_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopbackConfig {
    /// Delay before the loopback peripheral signals write completion.
    pub ack_latency_ms: u64,
    /// Probability in [0, 1] that the loopback peripheral refuses a write.
    pub reject_probability: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExhaustedRetryPolicy {
    /// Treat further refused writes as sent and carry on.
    Proceed,
    /// Stop the payload at the first refused write past the budget.
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyPayloadPolicy {
    Send,
    Reject,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            packet_size: DEFAULT_PACKET_SIZE,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_submit_retries: 3,
            retry_backoff_ms: 50,
            ack_timeout_ms: 5,
            exhausted_retries: ExhaustedRetryPolicy::Proceed,
            empty_payload: EmptyPayloadPolicy::Send,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            request_capacity: 64,
            backlog_gap_ms: 0,
        }
    }
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            ack_latency_ms: 1,
            reject_probability: 0.0,
        }
    }
}

impl TransferConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

impl QueueConfig {
    pub fn backlog_gap(&self) -> Duration {
        Duration::from_millis(self.backlog_gap_ms)
    }
}

impl LoopbackConfig {
    pub fn ack_latency(&self) -> Duration {
        Duration::from_millis(self.ack_latency_ms)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("gattlink")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid link settings: {0}")]
    InvalidLink(#[from] WireError),
    #[error("loopback reject_probability {0} outside [0, 1]")]
    InvalidRejectProbability(f64),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl GattlinkConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            Self::from_toml(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            GattlinkConfig::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("GATTLINK_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&GattlinkConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Reject settings the transfer engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_packet_size(self.link.packet_size)?;
        let p = self.loopback.reject_probability;
        if !(0.0..=1.0).contains(&p) {
            return Err(ConfigError::InvalidRejectProbability(p));
        }
        Ok(())
    }

    /// Apply GATTLINK_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse("GATTLINK_LINK__PACKET_SIZE") {
            self.link.packet_size = v;
        }
        if let Some(v) = env_parse("GATTLINK_TRANSFER__MAX_SUBMIT_RETRIES") {
            self.transfer.max_submit_retries = v;
        }
        if let Some(v) = env_parse("GATTLINK_TRANSFER__RETRY_BACKOFF_MS") {
            self.transfer.retry_backoff_ms = v;
        }
        if let Some(v) = env_parse("GATTLINK_TRANSFER__ACK_TIMEOUT_MS") {
            self.transfer.ack_timeout_ms = v;
        }
        if let Ok(v) = std::env::var("GATTLINK_TRANSFER__EXHAUSTED_RETRIES") {
            match v.as_str() {
                "proceed" => self.transfer.exhausted_retries = ExhaustedRetryPolicy::Proceed,
                "abort" => self.transfer.exhausted_retries = ExhaustedRetryPolicy::Abort,
                _ => {}
            }
        }
        if let Ok(v) = std::env::var("GATTLINK_TRANSFER__EMPTY_PAYLOAD") {
            match v.as_str() {
                "send" => self.transfer.empty_payload = EmptyPayloadPolicy::Send,
                "reject" => self.transfer.empty_payload = EmptyPayloadPolicy::Reject,
                _ => {}
            }
        }
        if let Some(v) = env_parse("GATTLINK_QUEUE__REQUEST_CAPACITY") {
            self.queue.request_capacity = v;
        }
        if let Some(v) = env_parse("GATTLINK_QUEUE__BACKLOG_GAP_MS") {
            self.queue.backlog_gap_ms = v;
        }
        if let Some(v) = env_parse("GATTLINK_LOOPBACK__ACK_LATENCY_MS") {
            self.loopback.ack_latency_ms = v;
        }
        if let Some(v) = env_parse("GATTLINK_LOOPBACK__REJECT_PROBABILITY") {
            self.loopback.reject_probability = v;
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
