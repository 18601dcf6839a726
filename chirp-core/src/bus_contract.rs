use serde::{Deserialize, Serialize};

pub const MARKER_INITIALIZE: &str = "initialize";
pub const MARKER_CONFIGURE: &str = "configure";
pub const MARKER_LIVE_START: &str = "start";

pub const HA_ONLINE: &str = "online";
pub const HA_OFFLINE: &str = "offline";

pub const EVENT_UP: &str = "up";
pub const EVENT_CURRENT: &str = "cur";
pub const EVENT_STATUS: &str = "status";

/// Topic layout for one ChirpStack application and one discovery prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    application_id: String,
    discovery_prefix: String,
}

impl Topics {
    pub fn new(application_id: impl Into<String>, discovery_prefix: impl Into<String>) -> Self {
        Self { application_id: application_id.into(), discovery_prefix: discovery_prefix.into() }
    }

    pub fn application_id(&self) -> &str {
        &self.application_id
    }

    pub fn discovery_prefix(&self) -> &str {
        &self.discovery_prefix
    }

    fn application(&self) -> String {
        format!("application/{}", self.application_id)
    }

    /// Lifecycle marker topic (`initialize` / `configure`).
    pub fn initialize(&self) -> String {
        format!("{}/status", self.application())
    }

    pub fn bridge_state(&self) -> String {
        format!("{}/bridge/status", self.application())
    }

    pub fn bridge_restart(&self) -> String {
        format!("{}/bridge/restart", self.application())
    }

    pub fn bridge_live(&self) -> String {
        format!("{}/bridge/live", self.application())
    }

    pub fn ha_status(&self) -> String {
        format!("{}/status", self.discovery_prefix)
    }

    pub fn device_event(&self, dev_eui: &str, event: &str) -> String {
        format!("{}/device/{dev_eui}/event/{event}", self.application())
    }

    pub fn device_command(&self, dev_eui: &str) -> String {
        format!("{}/device/{dev_eui}/command/down", self.application())
    }

    pub fn all_device_events(&self, event: &str) -> String {
        self.device_event("+", event)
    }

    pub fn discovery(&self, integration: &str, node_id: &str, entity: &str) -> String {
        format!("{}/{integration}/{node_id}/{entity}/config", self.discovery_prefix)
    }

    pub fn all_discovery_configs(&self) -> String {
        format!("{}/+/+/+/config", self.discovery_prefix)
    }

    /// Sorts an inbound topic into the kinds the bridge reacts to.
    pub fn classify<'a>(&self, topic: &'a str) -> TopicKind<'a> {
        if let Some(rest) = topic
            .strip_prefix(self.discovery_prefix.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            && let [_integration, _node, _entity, "config"] =
                rest.split('/').collect::<Vec<_>>().as_slice()
        {
            return TopicKind::DiscoveryConfig;
        }
        let levels: Vec<&str> = topic.split('/').collect();
        if let ["application", app, "device", dev_eui, "event", event] = levels.as_slice()
            && *app == self.application_id
        {
            return TopicKind::DeviceEvent { dev_eui: *dev_eui, event: *event };
        }
        if topic == self.initialize() {
            TopicKind::Lifecycle
        } else if topic == self.ha_status() {
            TopicKind::HaStatus
        } else if topic == self.bridge_state() {
            TopicKind::BridgeState
        } else if topic == self.bridge_restart() {
            TopicKind::BridgeRestart
        } else if topic == self.bridge_live() {
            TopicKind::BridgeLive
        } else {
            TopicKind::Other
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind<'a> {
    Lifecycle,
    HaStatus,
    BridgeState,
    BridgeRestart,
    BridgeLive,
    DiscoveryConfig,
    DeviceEvent { dev_eui: &'a str, event: &'a str },
    Other,
}

/// Retained payload on the bridge state topic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

impl BridgeStatus {
    pub fn online(log_level: &str) -> Self {
        Self { state: Some(HA_ONLINE.to_string()), log_level: Some(log_level.to_string()) }
    }
}
