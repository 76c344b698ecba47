//! Configuration and routing policy
//!
//! Raw settings are layered from optional config files and the environment,
//! then validated once into an immutable [`RoutingPolicy`].

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default cap on extracted frame width in pixels.
pub const DEFAULT_MAX_FRAME_WIDTH: u32 = 1024;
/// Default cap on fetched media size (Bot API download ceiling, 20 MiB).
pub const DEFAULT_MAX_INPUT_BYTES: u64 = 20 * 1024 * 1024;
/// Default decoder executable.
pub const DEFAULT_DECODER: &str = "ffmpeg";

/// Errors raised while loading or validating configuration.
///
/// All of them are fatal: the relay refuses to start half-configured.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config sources could not be read or deserialized.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    /// `TELEGRAM_BOT_TOKEN` is missing or blank.
    #[error("missing TELEGRAM_BOT_TOKEN")]
    MissingToken,
    /// `RELAY_CHAT_ID` is missing, blank or zero.
    #[error("missing RELAY_CHAT_ID")]
    MissingDestination,
    /// A numeric key holds something that is not a valid number.
    #[error("invalid value for {key}: {value:?}")]
    InvalidNumber {
        /// Environment key name.
        key: &'static str,
        /// Offending raw value.
        value: String,
    },
}

/// Application settings loaded from environment variables and config files
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Settings {
    /// Telegram Bot API token
    pub telegram_bot_token: Option<String>,
    /// Destination chat id for extracted stills
    pub relay_chat_id: Option<String>,
    /// Maximum width of extracted frames
    pub max_frame_width: Option<String>,
    /// Comma-separated list of source chat ids; empty allows every chat
    #[serde(rename = "allowed_source_chat_ids")]
    pub allowed_source_chat_ids_str: Option<String>,
    /// Decoder executable used for frame extraction
    pub ffmpeg_bin: Option<String>,
    /// Size cap for fetched media, `0` disables it
    pub max_input_bytes: Option<String>,
    /// Per-stage timeout in seconds, unset means no timeout
    pub step_timeout_secs: Option<String>,
}

/// Build the layered configuration source.
///
/// # Errors
///
/// Returns a `config::ConfigError` if a present source cannot be parsed.
pub fn build_config() -> Result<Config, config::ConfigError> {
    let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

    Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
        // Local overrides, not checked into git
        .add_source(File::with_name("config/local").required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        // Plain UPPER_SNAKE_CASE variables map onto snake_case keys
        .add_source(Environment::default().ignore_empty(true))
        .build()
}

impl Settings {
    /// Load settings from files and the environment.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_config(build_config()?)
    }

    /// Deserialize settings from an already built configuration.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if deserialization fails.
    pub fn from_config(config: Config) -> Result<Self, ConfigError> {
        Ok(config.try_deserialize()?)
    }

    /// Returns the bot token, rejecting a missing or blank value.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingToken` when no usable token is configured.
    pub fn bot_token(&self) -> Result<String, ConfigError> {
        self.telegram_bot_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(str::to_string)
            .ok_or(ConfigError::MissingToken)
    }

    /// Returns the parsed allowlist of source chat ids.
    ///
    /// Accepts commas, semicolons and whitespace as separators.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidNumber` if any token is not an integer.
    pub fn allowed_source_chat_ids(&self) -> Result<HashSet<i64>, ConfigError> {
        let Some(raw) = self.allowed_source_chat_ids_str.as_deref() else {
            return Ok(HashSet::new());
        };
        raw.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
            .filter(|token| !token.is_empty())
            .map(|token| {
                token.parse::<i64>().map_err(|_| ConfigError::InvalidNumber {
                    key: "ALLOWED_SOURCE_CHAT_IDS",
                    value: token.to_string(),
                })
            })
            .collect()
    }

    /// Validate the raw settings into the process-wide routing policy.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` for a missing destination or any malformed
    /// numeric value.
    pub fn routing_policy(&self) -> Result<RoutingPolicy, ConfigError> {
        let destination = match non_blank(self.relay_chat_id.as_deref()) {
            None => return Err(ConfigError::MissingDestination),
            Some(raw) => parse_number::<i64>("RELAY_CHAT_ID", raw)?,
        };
        if destination == 0 {
            return Err(ConfigError::MissingDestination);
        }

        let max_frame_width = match non_blank(self.max_frame_width.as_deref()) {
            None => DEFAULT_MAX_FRAME_WIDTH,
            Some(raw) => {
                let width = parse_number::<u32>("MAX_FRAME_WIDTH", raw)?;
                if width == 0 {
                    return Err(ConfigError::InvalidNumber {
                        key: "MAX_FRAME_WIDTH",
                        value: raw.to_string(),
                    });
                }
                width
            }
        };

        let max_input_bytes = match non_blank(self.max_input_bytes.as_deref()) {
            None => Some(DEFAULT_MAX_INPUT_BYTES),
            Some(raw) => Some(parse_number::<u64>("MAX_INPUT_BYTES", raw)?).filter(|&cap| cap > 0),
        };

        let step_timeout = non_blank(self.step_timeout_secs.as_deref())
            .map(|raw| parse_number::<u64>("STEP_TIMEOUT_SECS", raw))
            .transpose()?
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs);

        let decoder = non_blank(self.ffmpeg_bin.as_deref())
            .unwrap_or(DEFAULT_DECODER)
            .into();

        Ok(RoutingPolicy {
            destination,
            allowlist: self.allowed_source_chat_ids()?,
            max_frame_width,
            max_input_bytes,
            step_timeout,
            decoder,
        })
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn parse_number<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.parse::<T>().map_err(|_| ConfigError::InvalidNumber {
        key,
        value: raw.to_string(),
    })
}

/// Immutable routing configuration shared by every relay job.
#[derive(Debug, Clone)]
pub struct RoutingPolicy {
    /// Chat that receives every extracted still.
    pub destination: i64,
    /// Source chats allowed to feed the relay; empty allows all.
    pub allowlist: HashSet<i64>,
    /// Maximum width of extracted frames in pixels.
    pub max_frame_width: u32,
    /// Size cap for fetched media, `None` when disabled.
    pub max_input_bytes: Option<u64>,
    /// Timeout applied to each fetch, convert and dispatch step.
    pub step_timeout: Option<Duration>,
    /// Decoder executable for frame extraction.
    pub decoder: PathBuf,
}

impl RoutingPolicy {
    /// Policy with defaults for everything but the destination.
    #[must_use]
    pub fn new(destination: i64) -> Self {
        Self {
            destination,
            allowlist: HashSet::new(),
            max_frame_width: DEFAULT_MAX_FRAME_WIDTH,
            max_input_bytes: Some(DEFAULT_MAX_INPUT_BYTES),
            step_timeout: None,
            decoder: PathBuf::from(DEFAULT_DECODER),
        }
    }

    /// Restrict processing to the given source chats.
    #[must_use]
    pub fn with_allowlist(mut self, chats: impl IntoIterator<Item = i64>) -> Self {
        self.allowlist = chats.into_iter().collect();
        self
    }

    /// Whether messages from `chat_id` may be relayed.
    #[must_use]
    pub fn allows(&self, chat_id: i64) -> bool {
        self.allowlist.is_empty() || self.allowlist.contains(&chat_id)
    }
}
