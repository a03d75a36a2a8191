use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Port used when neither the config file nor `PORT` names one.
pub const DEFAULT_PORT: u16 = 8080;
/// Number of client connections opened when not configured.
pub const DEFAULT_CONNECTIONS: usize = 2000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid PORT value {value:?}: {source}")]
    InvalidPort {
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("invalid rounds value {0:?}: expected an integer or \"infinite\"")]
    InvalidRounds(String),
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub target: TargetConfig,
    pub load: LoadConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Applies overrides from the process environment (`PORT`).
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides using `lookup` to resolve variable names.
    ///
    /// An empty `PORT` counts as unset.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("PORT").filter(|v| !v.trim().is_empty()) {
            self.target.port = value
                .trim()
                .parse()
                .map_err(|source| ConfigError::InvalidPort { value, source })?;
        }
        Ok(())
    }

    pub fn target_url(&self) -> String {
        format!(
            "ws://{}:{}{}",
            self.target.host, self.target.port, self.target.path
        )
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TargetConfig {
    pub host: String,
    pub port: u16,
    pub path: String,
    /// Upper bound for a single connection attempt. `None` waits for the OS.
    pub connect_timeout_ms: Option<u64>,
}

impl TargetConfig {
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            path: "/echo".to_string(),
            connect_timeout_ms: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoadConfig {
    pub connections: usize,
    pub rounds: Rounds,
    pub round_timeout_ms: Option<u64>,
    /// Text sent on the first live connection at the start of every round.
    /// Against a broadcasting server this makes each round self-driving.
    pub trigger_message: Option<String>,
}

impl LoadConfig {
    pub fn round_timeout(&self) -> Option<Duration> {
        self.round_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            connections: DEFAULT_CONNECTIONS,
            rounds: Rounds::Infinite,
            round_timeout_ms: None,
            trigger_message: None,
        }
    }
}

/// How many rounds a run lasts. Written in YAML as an integer or `infinite`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "RoundsRepr")]
pub enum Rounds {
    #[default]
    Infinite,
    Limited(u64),
}

impl Rounds {
    pub fn is_reached(&self, completed: u64) -> bool {
        match self {
            Rounds::Infinite => false,
            Rounds::Limited(max) => completed >= *max,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RoundsRepr {
    Count(u64),
    Word(String),
}

impl TryFrom<RoundsRepr> for Rounds {
    type Error = ConfigError;

    fn try_from(repr: RoundsRepr) -> Result<Self, Self::Error> {
        match repr {
            RoundsRepr::Count(n) => Ok(Rounds::Limited(n)),
            RoundsRepr::Word(word) if word.eq_ignore_ascii_case("infinite") => {
                Ok(Rounds::Infinite)
            }
            RoundsRepr::Word(word) => Err(ConfigError::InvalidRounds(word)),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9464,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// Fallback filter directive when `RUST_LOG` is unset.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
