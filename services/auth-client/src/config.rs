//! Client configuration
//!
//! Defaults are compiled in and can be overridden with `ATTENDANCE_*`
//! environment variables, e.g. `ATTENDANCE_API_URL` or
//! `ATTENDANCE_MONITOR_INTERVAL_SECS`.

use std::time::Duration;

use config::{Config, ConfigError, Environment};
use serde::Deserialize;

const ENV_PREFIX: &str = "ATTENDANCE";

/// Auth client configuration
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    /// Backend API base URL
    pub api_url: String,
    /// General request timeout in seconds (default: 30)
    pub request_timeout_secs: u64,
    /// Face-recognition check-in timeout in seconds (default: 60)
    pub face_recognition_timeout_secs: u64,
    /// Window before expiry in which a token counts as expiring soon (default: 300)
    pub refresh_threshold_secs: i64,
    /// Period of the expiry monitor in seconds (default: 15)
    pub monitor_interval_secs: u64,
    /// Delay between session restoration and monitor start (default: 500)
    pub monitor_start_delay_ms: u64,
    /// Window in which repeated redirects to login collapse into one (default: 100)
    pub redirect_guard_ms: u64,
    /// File backing the persisted session
    pub storage_path: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000/api".to_string(),
            request_timeout_secs: 30,
            face_recognition_timeout_secs: 60,
            refresh_threshold_secs: 300,
            monitor_interval_secs: 15,
            monitor_start_delay_ms: 500,
            redirect_guard_ms: 100,
            storage_path: ".attendance/session.json".to_string(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from defaults and environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let loaded: Self = Config::builder()
            .set_default("api_url", defaults.api_url)?
            .set_default("request_timeout_secs", defaults.request_timeout_secs as i64)?
            .set_default(
                "face_recognition_timeout_secs",
                defaults.face_recognition_timeout_secs as i64,
            )?
            .set_default("refresh_threshold_secs", defaults.refresh_threshold_secs)?
            .set_default("monitor_interval_secs", defaults.monitor_interval_secs as i64)?
            .set_default("monitor_start_delay_ms", defaults.monitor_start_delay_ms as i64)?
            .set_default("redirect_guard_ms", defaults.redirect_guard_ms as i64)?
            .set_default("storage_path", defaults.storage_path)?
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject settings under which the monitor could miss the refresh window
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.monitor_interval_secs == 0 {
            return Err(ConfigError::Message(
                "monitor_interval_secs must be greater than zero".to_string(),
            ));
        }

        if self.refresh_threshold_secs <= self.monitor_interval_secs as i64 {
            return Err(ConfigError::Message(format!(
                "refresh_threshold_secs ({}) must exceed monitor_interval_secs ({})",
                self.refresh_threshold_secs, self.monitor_interval_secs
            )));
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn face_recognition_timeout(&self) -> Duration {
        Duration::from_secs(self.face_recognition_timeout_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }

    pub fn monitor_start_delay(&self) -> Duration {
        Duration::from_millis(self.monitor_start_delay_ms)
    }

    pub fn redirect_guard(&self) -> Duration {
        Duration::from_millis(self.redirect_guard_ms)
    }
}
