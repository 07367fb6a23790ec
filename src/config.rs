//! Configuration management for Turnstile.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{Result, TurnstileError};
use crate::http::KeyPolicy;

/// Main configuration for the Turnstile gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Admission limits
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl Default for TurnstileConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the gateway listens on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    "127.0.0.1:8080".parse().unwrap()
}

/// Admission limits applied to every caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Requests one caller may issue within a window
    #[serde(default = "default_capacity")]
    pub capacity: u64,

    /// Window length in seconds; doubles as the idle lifetime of a caller's
    /// quota entry
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// What to do with requests whose caller cannot be identified
    #[serde(default)]
    pub unknown_callers: KeyPolicy,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            window_secs: default_window_secs(),
            unknown_callers: KeyPolicy::default(),
        }
    }
}

fn default_capacity() -> u64 {
    1000
}

fn default_window_secs() -> u64 {
    60
}

impl LimitsConfig {
    /// The window as a duration.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Derive the interval at which one token returns to a caller's bucket,
/// `window / capacity` truncated to whole nanoseconds.
///
/// Fails on a zero capacity or window, and on a capacity too large for the
/// window to refill at all; a zero-width interval would leave the quota
/// unbounded.
pub fn refill_interval(capacity: u64, window: Duration) -> Result<Duration> {
    if capacity == 0 {
        return Err(TurnstileError::Config(
            "capacity must be greater than zero".to_string(),
        ));
    }
    if window.is_zero() {
        return Err(TurnstileError::Config(
            "window must be greater than zero".to_string(),
        ));
    }

    let nanos = window.as_nanos() / u128::from(capacity);
    let nanos = u64::try_from(nanos).map_err(|_| {
        TurnstileError::Config(format!("window of {}s is too large", window.as_secs()))
    })?;
    if nanos == 0 {
        return Err(TurnstileError::Config(format!(
            "capacity {} cannot refill within a {:?} window",
            capacity, window
        )));
    }

    Ok(Duration::from_nanos(nanos))
}

impl TurnstileConfig {
    /// Load configuration from a file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&contents).map_err(|e| TurnstileError::Config(e.to_string()))
    }
}
