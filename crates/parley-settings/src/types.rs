//! Settings type definitions.
//!
//! Field names are camelCase on disk. Every section is `#[serde(default)]`, so a
//! settings file only needs the keys it wants to change.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Smallest and largest accepted roster poll interval.
pub const POLL_INTERVAL_RANGE_MS: (u64, u64) = (100, 600_000);

/// Root settings type for the chat client.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParleySettings {
    pub backend: BackendSettings,
    pub roster: RosterSettings,
    pub channel: ChannelSettings,
    pub logging: LoggingSettings,
}

impl ParleySettings {
    /// Reject values the client cannot run with.
    pub fn validate(&self) -> Result<()> {
        for (field, raw) in [
            ("backend.apiUrl", &self.backend.api_url),
            ("backend.wsUrl", &self.backend.ws_url),
        ] {
            if raw.trim().is_empty() {
                return Err(SettingsError::invalid(field, "must not be empty"));
            }
            url::Url::parse(raw).map_err(|e| SettingsError::invalid(field, format!("{raw:?}: {e}")))?;
        }

        let (min, max) = POLL_INTERVAL_RANGE_MS;
        let interval = self.roster.poll_interval_ms;
        if !(min..=max).contains(&interval) {
            return Err(SettingsError::invalid(
                "roster.pollIntervalMs",
                format!("{interval} outside {min}..={max}"),
            ));
        }
        if self.channel.outbound_queue == 0 {
            return Err(SettingsError::invalid("channel.outboundQueue", "must be at least 1"));
        }
        Ok(())
    }
}

/// Where the backend lives.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackendSettings {
    /// Base URL of the data API.
    pub api_url: String,
    /// Base URL of the push channel; the identity id is appended as a path segment.
    pub ws_url: String,
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000".to_string(),
            ws_url: "ws://localhost:8000/ws".to_string(),
            request_timeout_ms: 10_000,
            connect_timeout_ms: 5_000,
        }
    }
}

impl BackendSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RosterSettings {
    pub poll_interval_ms: u64,
}

impl Default for RosterSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
        }
    }
}

impl RosterSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelSettings {
    /// Capacity of the outbound frame queue.
    pub outbound_queue: usize,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self { outbound_queue: 64 }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
    /// Per-module overrides, e.g. `{"parley_client": "debug"}`.
    pub modules: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            modules: BTreeMap::new(),
        }
    }
}
