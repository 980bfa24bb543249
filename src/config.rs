//! Configuration management for the triage engine
//!
//! Loads backend, polling and lifecycle settings from environment variables
//! (with `.env` support) and validates them before any component starts.

use crate::engine::event_view::PAGE_SIZES;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "http://localhost:5000";

/// Backend connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the triage API (no trailing slash required)
    pub base_url: String,

    /// Per-request timeout in seconds. Bounds how long a hung commit can hold its guard.
    pub request_timeout_seconds: u64,
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(Error::config(format!(
                "TRIAGE_API_BASE_URL must be an http(s) URL, got {}",
                self.base_url
            )));
        }

        if self.request_timeout_seconds == 0 {
            return Err(Error::config("TRIAGE_REQUEST_TIMEOUT_SECS must be positive"));
        }

        Ok(())
    }
}

/// Poll cadences in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    pub event_interval_ms: u64,
    pub group_interval_ms: u64,
    pub analytics_interval_ms: u64,
}

impl PollingConfig {
    pub fn event_interval(&self) -> Duration {
        Duration::from_millis(self.event_interval_ms)
    }

    pub fn group_interval(&self) -> Duration {
        Duration::from_millis(self.group_interval_ms)
    }

    pub fn analytics_interval(&self) -> Duration {
        Duration::from_millis(self.analytics_interval_ms)
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("TRIAGE_EVENT_POLL_MS", self.event_interval_ms),
            ("TRIAGE_GROUP_POLL_MS", self.group_interval_ms),
            ("TRIAGE_ANALYTICS_POLL_MS", self.analytics_interval_ms),
        ] {
            if value == 0 {
                return Err(Error::config(format!("{name} must be positive")));
            }
        }
        Ok(())
    }
}

/// Lifecycle controller and view settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// How long a committed group stays marked as leaving (presentation only)
    pub departure_ms: u64,

    /// Initial page size of the raw event table
    pub default_page_size: usize,
}

impl LifecycleConfig {
    pub fn departure_window(&self) -> Duration {
        Duration::from_millis(self.departure_ms)
    }

    fn validate(&self) -> Result<()> {
        if !PAGE_SIZES.contains(&self.default_page_size) {
            return Err(Error::config(format!(
                "TRIAGE_DEFAULT_PAGE_SIZE must be one of {:?}",
                PAGE_SIZES
            )));
        }
        Ok(())
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            departure_ms: 300,
            default_page_size: 20,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub backend: BackendConfig,
    pub polling: PollingConfig,
    pub lifecycle: LifecycleConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from environment
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse = |key: &str, default: u64| -> Result<u64> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .map_err(|_| Error::config(format!("Invalid {key}: {raw}"))),
                None => Ok(default),
            }
        };

        let backend = BackendConfig {
            base_url: lookup("TRIAGE_API_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            request_timeout_seconds: parse("TRIAGE_REQUEST_TIMEOUT_SECS", 30)?,
        };

        let polling = PollingConfig {
            event_interval_ms: parse("TRIAGE_EVENT_POLL_MS", 2000)?,
            group_interval_ms: parse("TRIAGE_GROUP_POLL_MS", 3000)?,
            analytics_interval_ms: parse("TRIAGE_ANALYTICS_POLL_MS", 5000)?,
        };

        let lifecycle = LifecycleConfig {
            departure_ms: parse("TRIAGE_DEPARTURE_MS", 300)?,
            default_page_size: parse("TRIAGE_DEFAULT_PAGE_SIZE", 20)? as usize,
        };

        let logging = LoggingConfig {
            level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            format: lookup("LOG_FORMAT").unwrap_or_else(|| "json".to_string()),
        };

        let config = Self {
            backend,
            polling,
            lifecycle,
            logging,
        };
        config.validate()?;
        Ok(config)
    }

    /// Create configuration for testing
    pub fn for_testing() -> Self {
        Self {
            backend: BackendConfig {
                base_url: DEFAULT_BASE_URL.to_string(),
                request_timeout_seconds: 5,
            },
            polling: PollingConfig {
                event_interval_ms: 20,  // fast ticks for tests
                group_interval_ms: 30,
                analytics_interval_ms: 50,
            },
            lifecycle: LifecycleConfig {
                departure_ms: 0, // no departure cue in tests
                default_page_size: 20,
            },
            logging: LoggingConfig {
                level: "debug".to_string(),
                format: "pretty".to_string(),
            },
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.backend.validate()?;
        self.polling.validate()?;
        self.lifecycle.validate()
    }
}
