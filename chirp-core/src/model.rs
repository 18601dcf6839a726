use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

/// Output of a profile's `getHaDeviceInfo` script.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DeviceProfileDescriptor {
    #[serde(default)]
    pub device: Map<String, Value>,
    #[serde(default)]
    pub entities: BTreeMap<String, EntityDescription>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EntityDescription {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integration: Option<String>,
    #[serde(default)]
    pub entity_conf: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_event: Option<String>,
}

impl EntityDescription {
    pub fn value_template(&self) -> Option<&str> {
        self.entity_conf.get("value_template").and_then(Value::as_str)
    }

    pub fn data_event(&self) -> &str {
        self.data_event.as_deref().unwrap_or("up")
    }
}

/// Registry facts attached to a device after its descriptor is evaluated.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeviceContext {
    pub dev_eui: String,
    pub dev_name: String,
    pub sw_version: Option<String>,
    pub measurement_names: BTreeMap<String, String>,
    /// Values replayed to the status topic once discovery settles.
    pub prev_value: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NormalizedDevice {
    pub descriptor: DeviceProfileDescriptor,
    pub context: DeviceContext,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Integration {
    Sensor,
    BinarySensor,
    Button,
    Select,
    Switch,
    Climate,
    Other(String),
}

impl Integration {
    pub fn from_name(name: &str) -> Self {
        match name {
            "sensor" => Self::Sensor,
            "binary_sensor" => Self::BinarySensor,
            "button" => Self::Button,
            "select" => Self::Select,
            "switch" => Self::Switch,
            "climate" => Self::Climate,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Sensor => "sensor",
            Self::BinarySensor => "binary_sensor",
            Self::Button => "button",
            Self::Select => "select",
            Self::Switch => "switch",
            Self::Climate => "climate",
            Self::Other(name) => name,
        }
    }
}

/// Device block of a discovery config. Descriptor values are passed
/// through as given, so Home Assistant decides what it accepts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DeviceBlock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifiers: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sw_version: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub via_device: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Availability {
    pub topic: String,
    pub value_template: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Origin {
    pub name: String,
    pub sw_version: String,
}

/// Retained Home Assistant discovery payload.
///
/// Fields shared by every integration are typed here; the integration
/// specific part lives in [`Component`]. Anything not modelled is kept in
/// the component's `extra` map so descriptors can pass arbitrary options.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DiscoveryConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    pub device: DeviceBlock,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability: Option<Vec<Availability>>,
    pub origin: Origin,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled_by_default: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expire_after: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_stamp: Option<f64>,
    #[serde(flatten)]
    pub component: Component,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum Component {
    Sensor(SensorFields),
    BinarySensor(BinarySensorFields),
    Button(ButtonFields),
    Select(SelectFields),
    Switch(SwitchFields),
    Climate(ClimateFields),
    Other(OtherFields),
}

#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct SensorFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_class: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct BinarySensorFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_on: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_off: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct ButtonFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_press: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct SelectFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_template: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct SwitchFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_on: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_off: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct ClimateFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature_command_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_temperature_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode_state_topic: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct OtherFields {
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Removes `key` from `map` when it holds a string. Values of any other
/// type stay in the map and are published untouched.
pub fn take_string(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    match map.remove(key) {
        Some(Value::String(s)) => Some(s),
        Some(other) => {
            map.insert(key.to_string(), other);
            None
        }
        None => None,
    }
}

fn take_string_list(map: &mut Map<String, Value>, key: &str) -> Vec<String> {
    let all_strings = matches!(map.get(key), Some(Value::Array(items)) if items.iter().all(Value::is_string));
    if !all_strings {
        return Vec::new();
    }
    match map.remove(key) {
        Some(Value::Array(items)) => {
            items.into_iter().filter_map(|v| v.as_str().map(str::to_string)).collect()
        }
        _ => Vec::new(),
    }
}

impl Component {
    /// Splits the integration-specific fields out of the remaining config.
    pub fn from_fields(integration: &Integration, mut rest: Map<String, Value>) -> Self {
        match integration {
            Integration::Sensor => Self::Sensor(SensorFields {
                unit_of_measurement: take_string(&mut rest, "unit_of_measurement"),
                state_class: take_string(&mut rest, "state_class"),
                extra: rest,
            }),
            Integration::BinarySensor => Self::BinarySensor(BinarySensorFields {
                payload_on: take_string(&mut rest, "payload_on"),
                payload_off: take_string(&mut rest, "payload_off"),
                extra: rest,
            }),
            Integration::Button => Self::Button(ButtonFields {
                command_topic: take_string(&mut rest, "command_topic"),
                payload_press: take_string(&mut rest, "payload_press"),
                extra: rest,
            }),
            Integration::Select => Self::Select(SelectFields {
                command_topic: take_string(&mut rest, "command_topic"),
                command_template: take_string(&mut rest, "command_template"),
                options: take_string_list(&mut rest, "options"),
                extra: rest,
            }),
            Integration::Switch => Self::Switch(SwitchFields {
                command_topic: take_string(&mut rest, "command_topic"),
                payload_on: take_string(&mut rest, "payload_on"),
                payload_off: take_string(&mut rest, "payload_off"),
                extra: rest,
            }),
            Integration::Climate => Self::Climate(ClimateFields {
                temperature_command_topic: take_string(&mut rest, "temperature_command_topic"),
                current_temperature_topic: take_string(&mut rest, "current_temperature_topic"),
                mode_state_topic: take_string(&mut rest, "mode_state_topic"),
                extra: rest,
            }),
            Integration::Other(_) => Self::Other(OtherFields { extra: rest }),
        }
    }
}

/// Fields read back from discovery configs echoed by the broker.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct EchoedConfig {
    #[serde(default)]
    pub device: Option<EchoedDevice>,
    #[serde(default)]
    pub time_stamp: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct EchoedDevice {
    #[serde(default)]
    pub via_device: Option<Value>,
}

impl EchoedConfig {
    pub fn via_device(&self) -> Option<&str> {
        self.device.as_ref().and_then(|d| d.via_device.as_ref()).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacVersion {
    Lorawan100,
    Lorawan101,
    Lorawan102,
    Lorawan103,
    Lorawan104,
    Lorawan110,
}

impl MacVersion {
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => Self::Lorawan100,
            1 => Self::Lorawan101,
            2 => Self::Lorawan102,
            3 => Self::Lorawan103,
            4 => Self::Lorawan104,
            5 => Self::Lorawan110,
            _ => return None,
        })
    }

    pub fn code_name(&self) -> &'static str {
        match self {
            Self::Lorawan100 => "LORAWAN_1_0_0",
            Self::Lorawan101 => "LORAWAN_1_0_1",
            Self::Lorawan102 => "LORAWAN_1_0_2",
            Self::Lorawan103 => "LORAWAN_1_0_3",
            Self::Lorawan104 => "LORAWAN_1_0_4",
            Self::Lorawan110 => "LORAWAN_1_1_0",
        }
    }
}

/// Human form of a MAC version code name: the first `_` becomes a space,
/// the rest become dots (`LORAWAN_1_0_3` -> `LORAWAN 1.0.3`).
pub fn mac_version_label(code_name: &str) -> String {
    match code_name.split_once('_') {
        Some((head, tail)) => format!("{head} {}", tail.replace('_', ".")),
        None => code_name.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub id: String,
    pub name: String,
    pub tenant_id: String,
}

/// Device row as returned by an application listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DeviceSummary {
    pub dev_eui: String,
    pub name: String,
    pub device_profile_id: String,
    #[serde(default)]
    pub battery_level: Option<f32>,
    #[serde(default)]
    pub external_power_source: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DeviceDetails {
    pub dev_eui: String,
    pub name: String,
    pub device_profile_id: String,
    #[serde(default)]
    pub is_disabled: bool,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DeviceProfile {
    pub id: String,
    pub name: String,
    /// Enum code name such as `LORAWAN_1_0_3`.
    #[serde(default)]
    pub mac_version: Option<String>,
    #[serde(default)]
    pub payload_codec_script: String,
    /// Expected uplink interval in seconds.
    #[serde(default)]
    pub uplink_interval: u32,
    /// Measurement key to display name.
    #[serde(default)]
    pub measurements: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Visibility {
    pub last_seen: Option<DateTime<Utc>>,
    pub uplink_interval: Option<Duration>,
}

impl Visibility {
    pub fn is_online(&self, now: DateTime<Utc>) -> bool {
        match (self.last_seen, self.uplink_interval) {
            (Some(seen), Some(interval)) => match (now - seen).to_std() {
                Ok(elapsed) => elapsed <= interval,
                Err(_) => true,
            },
            _ => false,
        }
    }
}

/// Wall clock as float seconds, the format carried in `time_stamp` fields.
pub fn unix_now() -> f64 {
    to_unix_seconds(Utc::now())
}

pub fn to_unix_seconds(ts: DateTime<Utc>) -> f64 {
    ts.timestamp_micros() as f64 / 1_000_000.0
}
