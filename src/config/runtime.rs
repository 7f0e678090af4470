//! Trigger and event sink configuration types.

use std::time::Duration;

use serde::Deserialize;

use super::ConfigError;

/// Interval scheduler configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 3600,
        }
    }
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// Manual trigger marker watcher configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub enabled: bool,
    pub poll_interval_secs: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: 30,
        }
    }
}

impl WatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

/// Event sink implementation selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSinkKind {
    #[default]
    Tracing,
    Http,
}

/// Upstream call event notifications.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub enabled: bool,
    pub kind: EventSinkKind,
    /// Webhook URL for the `http` kind.
    pub endpoint: Option<String>,
}

impl EventsConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        let missing_endpoint = self.endpoint.as_deref().map_or(true, str::is_empty);
        if self.enabled && self.kind == EventSinkKind::Http && missing_endpoint {
            return Err(ConfigError::Invalid(
                "events.endpoint is required for the http sink".into(),
            ));
        }
        Ok(())
    }
}
