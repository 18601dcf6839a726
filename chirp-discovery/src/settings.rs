use std::time::Duration;

use crate::log_level::LogLevel;

pub const DEFAULT_START_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_RESTORE_AGE: Duration = Duration::from_secs(4);

/// Slack added to every timer so the window never closes on the exact edge.
pub const TIMER_SLACK: Duration = Duration::from_millis(100);

/// Engine options; the daemon maps its config file onto this.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeSettings {
    pub application_id: String,
    pub discovery_prefix: String,
    pub bridge_unique_id: String,
    pub version: String,
    /// How long to wait for the Home Assistant online announcement.
    pub start_delay: Duration,
    /// How long the catch-up window stays open.
    pub restore_age: Duration,
    pub log_level: LogLevel,
    /// Per-device online polling; `None` keeps a single bridge-wide availability.
    pub live_check_interval: Option<Duration>,
    pub expire_after: bool,
}

impl BridgeSettings {
    pub fn new(application_id: &str, discovery_prefix: &str, bridge_unique_id: &str) -> Self {
        Self {
            application_id: application_id.to_string(),
            discovery_prefix: discovery_prefix.to_string(),
            bridge_unique_id: bridge_unique_id.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_delay: DEFAULT_START_DELAY,
            restore_age: DEFAULT_RESTORE_AGE,
            log_level: LogLevel::Info,
            live_check_interval: None,
            expire_after: false,
        }
    }

    pub fn per_device_online(&self) -> bool {
        self.live_check_interval.is_some()
    }

    pub fn ha_wait(&self) -> Duration {
        self.start_delay + TIMER_SLACK
    }

    pub fn catchup_window(&self) -> Duration {
        self.restore_age + TIMER_SLACK
    }

    pub fn live_check_period(&self) -> Option<Duration> {
        self.live_check_interval.map(|interval| interval + TIMER_SLACK)
    }
}
