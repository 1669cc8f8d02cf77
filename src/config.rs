use std::str::FromStr;
use std::time::Duration;

use crate::domain::errors::SyncError;
use crate::persistence::DatabaseConfig;

pub const DEFAULT_URL: &str = "ws://127.0.0.1:8080/ws";

/// Connection endpoint and timing.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    pub url: String,
    /// Fixed delay before each reconnect attempt.
    pub reconnect_interval: Duration,
    pub max_reconnect_attempts: u32,
    pub heartbeat_interval: Duration,
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            reconnect_interval: Duration::from_millis(3_000),
            max_reconnect_attempts: 5,
            heartbeat_interval: Duration::from_millis(30_000),
            connect_timeout: Duration::from_millis(10_000),
        }
    }
}

impl ConnectionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Simulation engine settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub tick_interval: Duration,
    /// Used when no preference has been persisted yet.
    pub enabled_by_default: bool,
    /// Statistic value marking a metric as driven by the server; such values are never simulated.
    pub authoritative_sentinel: String,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(3_000),
            enabled_by_default: true,
            authoritative_sentinel: "LIVE".to_string(),
        }
    }
}

/// Top-level configuration of the sync core.
#[derive(Debug, Clone, Default)]
pub struct SyncConfig {
    pub connection: ConnectionConfig,
    pub simulation: SimulationConfig,
    pub database: DatabaseConfig,
}

impl SyncConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> SyncConfig {
        let mut config = SyncConfig {
            database: DatabaseConfig::from_env(),
            ..SyncConfig::default()
        };

        if let Ok(url) = std::env::var("TELEMETRY_WS_URL") {
            if !url.trim().is_empty() {
                config.connection.url = url;
            }
        }

        if let Some(ms) = parse_env::<u64>("RECONNECT_INTERVAL_MS", |v| *v > 0) {
            config.connection.reconnect_interval = Duration::from_millis(ms);
        }

        if let Some(attempts) = parse_env::<u32>("MAX_RECONNECT_ATTEMPTS", |v| *v <= 1_000) {
            config.connection.max_reconnect_attempts = attempts;
        }

        if let Some(ms) = parse_env::<u64>("HEARTBEAT_INTERVAL_MS", |v| *v >= 100) {
            config.connection.heartbeat_interval = Duration::from_millis(ms);
        }

        if let Some(ms) = parse_env::<u64>("CONNECT_TIMEOUT_MS", |v| *v > 0) {
            config.connection.connect_timeout = Duration::from_millis(ms);
        }

        if let Some(ms) = parse_env::<u64>("SIMULATION_TICK_MS", |v| *v >= 50) {
            config.simulation.tick_interval = Duration::from_millis(ms);
        }

        if let Ok(enabled) = std::env::var("SIMULATION_ENABLED") {
            config.simulation.enabled_by_default = enabled.to_lowercase() == "true" || enabled == "1";
        }

        if let Ok(sentinel) = std::env::var("SIMULATION_SENTINEL") {
            if !sentinel.is_empty() {
                config.simulation.authoritative_sentinel = sentinel;
            }
        }

        config
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        let url = url::Url::parse(&self.connection.url)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(SyncError::InvalidUrl(format!(
                "unsupported scheme '{}' in {}",
                url.scheme(),
                self.connection.url
            )));
        }

        let intervals = [
            ("reconnect_interval", self.connection.reconnect_interval),
            ("heartbeat_interval", self.connection.heartbeat_interval),
            ("connect_timeout", self.connection.connect_timeout),
            ("tick_interval", self.simulation.tick_interval),
        ];
        for (name, value) in intervals {
            if value.is_zero() {
                return Err(SyncError::InvalidConfiguration(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }

        Ok(())
    }
}

/// `period`, or `fallback` with a warning when `period` is zero. Timers never run with a zero period.
pub(crate) fn timer_period(name: &str, period: Duration, fallback: Duration) -> Duration {
    if period.is_zero() {
        tracing::warn!("{} must be greater than zero, using {:?}", name, fallback);
        fallback
    } else {
        period
    }
}

fn parse_env<T>(name: &str, valid: impl Fn(&T) -> bool) -> Option<T>
where
    T: FromStr + std::fmt::Display,
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(name).ok()?;
    match raw.parse::<T>() {
        Ok(value) if valid(&value) => Some(value),
        Ok(value) => {
            tracing::warn!("Invalid {} value: {}, using default", name, value);
            None
        }
        Err(e) => {
            tracing::warn!("Failed to parse {} '{}': {}, using default", name, raw, e);
            None
        }
    }
}
