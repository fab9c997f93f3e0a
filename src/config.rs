//! Configuration loading and validation.

use crate::error::{ConfigError, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Bridge configuration, loaded from a TOML file with environment-variable
/// fallbacks for secrets.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    pub slack: SlackConfig,
    pub mattermost: MattermostConfig,

    /// Session timing knobs.
    #[serde(default)]
    pub bridge: RelaySettings,
}

/// Slack connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SlackConfig {
    /// Bot token. Falls back to `CHATBRIDGE_SLACK_TOKEN`.
    #[serde(default)]
    pub token: String,

    /// Web API base URL. Only overridden in tests.
    #[serde(default = "default_slack_api_base")]
    pub api_base: String,
}

/// Mattermost connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MattermostConfig {
    /// Server host, without scheme (e.g. `chat.example.com`).
    pub server: String,

    /// Team name the bridge operates in.
    pub team: String,

    /// Bot account login email.
    pub email: String,

    /// Bot account password. Falls back to `CHATBRIDGE_MM_PASSWORD`.
    #[serde(default)]
    pub password: String,
}

/// Session timing settings shared by both platforms.
#[derive(Debug, Clone, Deserialize)]
pub struct RelaySettings {
    /// Interval between liveness probes, and the window within which each
    /// ack must arrive.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Fixed delay between reconnect attempts after the event stream is
    /// lost.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
}

fn default_slack_api_base() -> String {
    "https://slack.com/api".to_string()
}

fn default_heartbeat_interval() -> u64 {
    10
}

fn default_reconnect_delay() -> u64 {
    2
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval(),
            reconnect_delay_secs: default_reconnect_delay(),
        }
    }
}

impl RelaySettings {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

impl BridgeConfig {
    /// Load configuration from a TOML file, apply environment fallbacks and
    /// validate.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::parse(&raw, &path.display().to_string())?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn parse(raw: &str, path: &str) -> Result<Self> {
        toml::from_str(raw)
            .map_err(|source| {
                ConfigError::Parse {
                    path: path.to_string(),
                    source,
                }
                .into()
            })
    }

    fn apply_env(&mut self) {
        if self.slack.token.is_empty() {
            if let Ok(token) = std::env::var("CHATBRIDGE_SLACK_TOKEN") {
                self.slack.token = token;
            }
        }
        if self.mattermost.password.is_empty() {
            if let Ok(password) = std::env::var("CHATBRIDGE_MM_PASSWORD") {
                self.mattermost.password = password;
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.slack.token.is_empty() {
            return Err(ConfigError::MissingKey("slack.token".into()).into());
        }
        if self.mattermost.server.is_empty() {
            return Err(ConfigError::MissingKey("mattermost.server".into()).into());
        }
        if self.mattermost.server.contains("://") {
            return Err(ConfigError::Invalid(
                "mattermost.server is a host name, not a URL".into(),
            )
            .into());
        }
        if self.mattermost.team.is_empty() {
            return Err(ConfigError::MissingKey("mattermost.team".into()).into());
        }
        if self.mattermost.email.is_empty() {
            return Err(ConfigError::MissingKey("mattermost.email".into()).into());
        }
        if self.mattermost.password.is_empty() {
            return Err(ConfigError::MissingKey("mattermost.password".into()).into());
        }
        if self.bridge.heartbeat_interval_secs == 0 {
            return Err(ConfigError::Invalid("bridge.heartbeat_interval_secs must be positive".into()).into());
        }
        if self.bridge.reconnect_delay_secs == 0 {
            return Err(ConfigError::Invalid("bridge.reconnect_delay_secs must be positive".into()).into());
        }
        Ok(())
    }
}
