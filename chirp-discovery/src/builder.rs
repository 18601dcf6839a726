use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use chirp_core::bus_contract::{EVENT_CURRENT, Topics};
use chirp_core::model::{
    Availability, Component, DeviceBlock, DeviceContext, DiscoveryConfig, EntityDescription,
    Integration, Origin, take_string,
};
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::classes::ClassTable;
use crate::normalize::EntityRecord;

pub const BRIDGE_VENDOR: &str = "Chirp2MQTT";
pub const BRIDGE_NAME: &str = "Chirp2MQTT Bridge";
pub const BRIDGE_MODEL: &str = "Bridge";

pub const BRIDGE_STATE_ID: &str = "state";
pub const BRIDGE_RESTART_ID: &str = "restart";
pub const BRIDGE_LOG_LEVEL_ID: &str = "log_level";

pub const LOG_LEVEL_OPTIONS: [&str; 5] = ["error", "warning", "info", "debug", "detail"];

const PLACEHOLDER_NONE: &str = "{None}";
const PLACEHOLDER_COMMAND_TOPIC: &str = "{command_topic}";
const PLACEHOLDER_STATUS_TOPIC: &str = "{status_topic}";
const PLACEHOLDER_DEV_EUI: &str = "{dev_eui}";
const OVERRIDE_PREFIX: &str = "dev_eui";

pub fn lower_no_blanks(name: &str) -> String {
    name.to_lowercase().replace(' ', "_")
}

/// Everything about the bridge that shapes discovery payloads.
#[derive(Debug, Clone)]
pub struct NamingContext {
    pub topics: Topics,
    pub bridge_unique_id: String,
    pub bridge_identifier: String,
    pub origin: Origin,
    pub classes: Arc<ClassTable>,
    pub expire_after: bool,
    pub per_device_online: bool,
}

impl NamingContext {
    pub fn new(
        topics: Topics,
        bridge_unique_id: &str,
        version: &str,
        classes: Arc<ClassTable>,
        expire_after: bool,
        per_device_online: bool,
    ) -> Self {
        Self {
            topics,
            bridge_unique_id: bridge_unique_id.to_string(),
            bridge_identifier: lower_no_blanks(&format!(
                "{BRIDGE_VENDOR} {BRIDGE_MODEL} {bridge_unique_id}"
            )),
            origin: Origin { name: BRIDGE_VENDOR.to_string(), sw_version: version.to_string() },
            classes,
            expire_after,
            per_device_online,
        }
    }

    fn availability(&self, dev_eui: &str) -> Vec<Availability> {
        if self.per_device_online {
            vec![Availability {
                topic: self.topics.device_event(dev_eui, EVENT_CURRENT),
                value_template: "{{ value_json.status }}".to_string(),
            }]
        } else {
            vec![Availability {
                topic: self.topics.bridge_state(),
                value_template: "{{ value_json.state }}".to_string(),
            }]
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryRecord {
    pub integration: Integration,
    pub discovery_topic: String,
    pub config: DiscoveryConfig,
    pub status_topic: String,
    pub command_topic: String,
}

impl DiscoveryRecord {
    pub fn payload(&self) -> Result<Bytes> {
        let bytes = serde_json::to_vec(&self.config)
            .with_context(|| format!("serialise discovery config {}", self.discovery_topic))?;
        Ok(Bytes::from(bytes))
    }

    /// Values of every top-level `*_template` field of the published config.
    pub fn templates(&self) -> Vec<String> {
        match serde_json::to_value(&self.config) {
            Ok(Value::Object(fields)) => fields
                .into_iter()
                .filter(|(key, _)| key.ends_with("_template"))
                .filter_map(|(_, value)| match value {
                    Value::String(s) => Some(s),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Python-style truthiness, used for "is this field already provided".
fn is_set(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(fields)) => !fields.is_empty(),
    }
}

/// Folds a `dev_eui<EUI>` block for this device into `block` and drops
/// every other `dev_eui*` key.
fn apply_device_overrides(block: &mut Map<String, Value>, dev_eui: &str) {
    let own = format!("{OVERRIDE_PREFIX}{dev_eui}");
    let keys: Vec<String> =
        block.keys().filter(|k| k.starts_with(OVERRIDE_PREFIX)).cloned().collect();
    for key in keys {
        if let Some(Value::Object(fields)) = block.remove(&key)
            && key == own
        {
            block.extend(fields);
        }
    }
}

fn resolve_placeholders(conf: &mut Map<String, Value>, status_topic: &str, command_topic: &str, dev_eui: &str) {
    let keys: Vec<String> = conf.keys().cloned().collect();
    for key in keys {
        let Some(Value::String(text)) = conf.get(&key) else {
            continue;
        };
        let replacement = match text.as_str() {
            PLACEHOLDER_NONE => None,
            PLACEHOLDER_COMMAND_TOPIC => Some(command_topic.to_string()),
            PLACEHOLDER_STATUS_TOPIC => Some(status_topic.to_string()),
            other if other.contains(PLACEHOLDER_DEV_EUI) => {
                Some(other.replace(PLACEHOLDER_DEV_EUI, dev_eui))
            }
            _ => continue,
        };
        match replacement {
            Some(text) => {
                conf.insert(key, Value::String(text));
            }
            None => {
                conf.remove(&key);
            }
        }
    }
}

fn resolve_integration(
    ctx: &NamingContext,
    record: &EntityRecord<'_>,
    conf: &mut Map<String, Value>,
) -> Integration {
    if let Some(explicit) = record.entity.integration.as_deref().filter(|s| !s.is_empty()) {
        return Integration::from_name(explicit);
    }
    let dev_eui = &record.context.dev_eui;
    let device_class = conf.get("device_class").and_then(Value::as_str).map(str::to_string);
    match device_class {
        Some(class) => match ctx.classes.integration_for(&class) {
            Some(found) => Integration::from_name(found),
            None => {
                warn!(
                    "Could not detect integration by device class {class} for device {dev_eui}, integration set to 'sensor', device class removed"
                );
                conf.remove("device_class");
                Integration::Sensor
            }
        },
        None => {
            info!(
                "No device class set for {dev_eui}/{} and no integration specified, set to 'sensor'",
                record.key
            );
            Integration::Sensor
        }
    }
}

/// Builds the discovery record for one entity. `pass_started` is stamped
/// into the config so echoes can be attributed to a reconciliation pass.
pub fn build_record(
    ctx: &NamingContext,
    record: &EntityRecord<'_>,
    pass_started: Option<f64>,
) -> Result<DiscoveryRecord> {
    let dev_eui = record.context.dev_eui.as_str();
    let key = record.key;
    let mut conf = record.entity.entity_conf.clone();

    let integration = resolve_integration(ctx, record, &mut conf);
    let discovery_topic = ctx.topics.discovery(integration.as_str(), dev_eui, key);
    let status_topic = ctx.topics.device_event(dev_eui, record.entity.data_event());
    let command_topic = ctx.topics.device_command(dev_eui);

    let mut device = record.device.clone();
    apply_device_overrides(&mut device, dev_eui);
    if !is_set(device.get("name")) {
        let name = if record.context.dev_name.is_empty() {
            format!("0x{dev_eui}")
        } else {
            record.context.dev_name.clone()
        };
        device.insert("name".into(), Value::String(name));
    }
    if !is_set(device.get("identifiers")) {
        device.insert(
            "identifiers".into(),
            json!([lower_no_blanks(&format!("{BRIDGE_VENDOR}_{dev_eui}"))]),
        );
        device.insert("via_device".into(), Value::String(ctx.bridge_identifier.clone()));
        conf.insert("availability".into(), serde_json::to_value(ctx.availability(dev_eui))?);
    }
    if !is_set(device.get("sw_version"))
        && let Some(version) = &record.context.sw_version
    {
        device.insert("sw_version".into(), Value::String(version.clone()));
    }

    if !is_set(conf.get("state_topic")) {
        conf.insert("state_topic".into(), Value::String(status_topic.clone()));
    }
    if !is_set(conf.get("name")) {
        let name = record.context.measurement_names.get(key).cloned().unwrap_or_else(|| key.to_string());
        conf.insert("name".into(), Value::String(name));
    }
    if !is_set(conf.get("unique_id")) {
        let unique_id = lower_no_blanks(&format!("{BRIDGE_VENDOR}_{dev_eui}_{key}"));
        conf.insert("unique_id".into(), Value::String(unique_id));
    }
    if !is_set(conf.get("object_id")) {
        conf.insert("object_id".into(), Value::String(lower_no_blanks(&format!("{dev_eui}_{key}"))));
    }
    if ctx.expire_after && is_set(conf.get("uplink_interval")) && !is_set(conf.get("expire_after")) {
        if let Some(interval) = conf.get("uplink_interval").cloned() {
            conf.insert("expire_after".into(), interval);
        }
    }
    apply_device_overrides(&mut conf, dev_eui);
    resolve_placeholders(&mut conf, &status_topic, &command_topic, dev_eui);

    let config = assemble(conf, device, &integration, ctx.origin.clone(), pass_started)
        .with_context(|| format!("entity {key} of device {dev_eui}"))?;

    Ok(DiscoveryRecord { integration, discovery_topic, config, status_topic, command_topic })
}

fn assemble(
    mut conf: Map<String, Value>,
    device: Map<String, Value>,
    integration: &Integration,
    origin: Origin,
    pass_started: Option<f64>,
) -> Result<DiscoveryConfig> {
    let device: DeviceBlock =
        serde_json::from_value(Value::Object(device)).context("device block")?;

    let availability = match conf.remove("availability") {
        Some(value) => match serde_json::from_value::<Vec<Availability>>(value.clone()) {
            Ok(list) => Some(list),
            Err(_) => {
                conf.insert("availability".into(), value);
                None
            }
        },
        None => None,
    };
    let enabled_by_default = match conf.remove("enabled_by_default") {
        None | Some(Value::Null) => Some(true),
        Some(Value::Bool(flag)) => Some(flag),
        Some(other) => {
            conf.insert("enabled_by_default".into(), other);
            None
        }
    };
    let expire_after = conf.remove("expire_after");
    for reserved in ["device", "origin", "time_stamp"] {
        conf.remove(reserved);
    }

    Ok(DiscoveryConfig {
        name: take_string(&mut conf, "name"),
        unique_id: take_string(&mut conf, "unique_id"),
        object_id: take_string(&mut conf, "object_id"),
        state_topic: take_string(&mut conf, "state_topic"),
        value_template: take_string(&mut conf, "value_template"),
        device_class: take_string(&mut conf, "device_class"),
        entity_category: take_string(&mut conf, "entity_category"),
        icon: take_string(&mut conf, "icon"),
        device,
        availability,
        origin,
        enabled_by_default,
        expire_after,
        time_stamp: pass_started,
        component: Component::from_fields(integration, conf),
    })
}

struct BridgeEntity {
    key: &'static str,
    name: &'static str,
    integration: &'static str,
    conf: Value,
}

/// Discovery records for the bridge's own device: connectivity state,
/// restart button and log level select.
pub fn bridge_records(ctx: &NamingContext) -> Result<Vec<DiscoveryRecord>> {
    let uid = &ctx.bridge_unique_id;
    let state_topic = ctx.topics.bridge_state();
    let entities = [
        BridgeEntity {
            key: BRIDGE_STATE_ID,
            name: "Connection state",
            integration: "binary_sensor",
            conf: json!({
                "state_topic": state_topic,
                "value_template": "{{ value_json.state }}",
                "object_id": lower_no_blanks(&format!("{BRIDGE_VENDOR} {BRIDGE_MODEL} Connection state")),
                "unique_id": lower_no_blanks(&format!("{BRIDGE_MODEL} {uid} Connection state {BRIDGE_VENDOR}")),
                "device_class": "connectivity",
                "entity_category": "diagnostic",
                "payload_on": "online",
                "payload_off": "offline",
            }),
        },
        BridgeEntity {
            key: BRIDGE_RESTART_ID,
            name: "Reload devices",
            integration: "button",
            conf: json!({
                "availability_mode": "all",
                "state_topic": PLACEHOLDER_NONE,
                "command_topic": ctx.topics.bridge_restart(),
                "object_id": lower_no_blanks(&format!("{BRIDGE_VENDOR} {BRIDGE_MODEL} {BRIDGE_RESTART_ID}")),
                "unique_id": lower_no_blanks(&format!("{BRIDGE_MODEL} {uid} Reload devices {BRIDGE_VENDOR}")),
                "device_class": "restart",
                "payload_press": "",
            }),
        },
        BridgeEntity {
            key: BRIDGE_LOG_LEVEL_ID,
            name: "Log level",
            integration: "select",
            conf: json!({
                "availability_mode": "all",
                "state_topic": state_topic,
                "value_template": "{{ value_json.log_level | lower }}",
                "command_topic": state_topic,
                "command_template": r#"{"state": "online", "log_level": "{{ value }}"}"#,
                "object_id": lower_no_blanks(&format!("{BRIDGE_VENDOR} {BRIDGE_MODEL} {BRIDGE_LOG_LEVEL_ID}")),
                "unique_id": lower_no_blanks(&format!("{BRIDGE_MODEL} {uid} Log level {BRIDGE_VENDOR}")),
                "options": LOG_LEVEL_OPTIONS,
                "retain": true,
            }),
        },
    ];

    let device: Map<String, Value> = match json!({
        "manufacturer": BRIDGE_VENDOR,
        "model": BRIDGE_MODEL,
        "identifiers": [ctx.bridge_identifier],
    }) {
        Value::Object(fields) => fields,
        _ => Map::new(),
    };

    entities
        .into_iter()
        .map(|bridge| {
            let entity = EntityDescription {
                integration: Some(bridge.integration.to_string()),
                entity_conf: match bridge.conf {
                    Value::Object(fields) => fields,
                    _ => Map::new(),
                },
                data_event: None,
            };
            let context = DeviceContext {
                dev_eui: uid.clone(),
                dev_name: BRIDGE_NAME.to_string(),
                measurement_names: [(bridge.key.to_string(), bridge.name.to_string())].into(),
                ..Default::default()
            };
            let record =
                EntityRecord { key: bridge.key, entity: &entity, device: &device, context: &context };
            build_record(ctx, &record, None)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chirp_core::model::{DeviceProfileDescriptor, NormalizedDevice};
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::io;
    use std::sync::Mutex;
    use tracing::Level;
    use tracing_subscriber::fmt::MakeWriter;

    const EUI: &str = "0102030405060708";

    fn ctx(per_device_online: bool, expire_after: bool) -> NamingContext {
        NamingContext::new(
            Topics::new("app-1", "homeassistant"),
            "abc123",
            "1.2.0",
            Arc::new(ClassTable::builtin().unwrap()),
            expire_after,
            per_device_online,
        )
    }

    fn device(device: Value, entities: Value) -> NormalizedDevice {
        let descriptor: DeviceProfileDescriptor =
            serde_json::from_value(json!({"device": device, "entities": entities})).unwrap();
        NormalizedDevice {
            descriptor,
            context: DeviceContext {
                dev_eui: EUI.into(),
                dev_name: "meter".into(),
                sw_version: Some("LORAWAN 1.0.3".into()),
                measurement_names: BTreeMap::from([("counter".into(), "Gas meter".into())]),
                prev_value: Map::new(),
            },
        }
    }

    fn build_one(ctx: &NamingContext, dev: &NormalizedDevice, key: &str) -> (DiscoveryRecord, Value) {
        let record = crate::normalize::entity_records(dev).find(|r| r.key == key).unwrap();
        let built = build_record(ctx, &record, Some(1700000000.5)).unwrap();
        let json = serde_json::to_value(&built.config).unwrap();
        (built, json)
    }

    #[test]
    fn fills_defaults_for_a_plain_sensor() {
        let dev = device(
            json!({"manufacturer": "vendor0", "model": "model1"}),
            json!({"counter": {"entity_conf": {"value_template": "{{ value_json.object.counter }}", "device_class": "gas", "unit_of_measurement": "m³"}}}),
        );
        let (record, json) = build_one(&ctx(false, false), &dev, "counter");

        assert_eq!(record.discovery_topic, format!("homeassistant/sensor/{EUI}/counter/config"));
        assert_eq!(record.status_topic, format!("application/app-1/device/{EUI}/event/up"));
        assert_eq!(json["state_topic"], json!(record.status_topic));
        assert_eq!(json["name"], json!("Gas meter"));
        assert_eq!(json["unique_id"], json!(format!("chirp2mqtt_{EUI}_counter")));
        assert_eq!(json["object_id"], json!(format!("{EUI}_counter")));
        assert_eq!(json["enabled_by_default"], json!(true));
        assert_eq!(json["time_stamp"], json!(1700000000.5));
        assert_eq!(json["unit_of_measurement"], json!("m³"));
        assert_eq!(json["origin"], json!({"name": "Chirp2MQTT", "sw_version": "1.2.0"}));
        assert_eq!(json["device"]["name"], json!("meter"));
        assert_eq!(json["device"]["identifiers"], json!([format!("chirp2mqtt_{EUI}")]));
        assert_eq!(json["device"]["via_device"], json!("chirp2mqtt_bridge_abc123"));
        assert_eq!(json["device"]["sw_version"], json!("LORAWAN 1.0.3"));
        assert_eq!(
            json["availability"],
            json!([{"topic": "application/app-1/bridge/status", "value_template": "{{ value_json.state }}"}])
        );
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn unknown_device_class_falls_back_to_sensor() {
        let dev = device(json!({}), json!({"counter": {"entity_conf": {"device_class": "unknown_class"}}}));
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .with_max_level(Level::WARN)
            .finish();
        let (record, json) =
            tracing::subscriber::with_default(subscriber, || build_one(&ctx(false, false), &dev, "counter"));

        assert_eq!(record.integration, Integration::Sensor);
        assert!(record.discovery_topic.starts_with("homeassistant/sensor/"));
        assert!(json.get("device_class").is_none());
        let text = logs.text();
        assert!(text.contains("WARN"), "{text}");
        assert!(text.contains("device class unknown_class"), "{text}");
        assert!(text.contains(EUI), "{text}");
    }

    #[test]
    fn known_device_class_logs_no_warning() {
        let dev = device(json!({}), json!({"counter": {"entity_conf": {"device_class": "gas"}}}));
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .with_max_level(Level::WARN)
            .finish();
        tracing::subscriber::with_default(subscriber, || build_one(&ctx(false, false), &dev, "counter"));
        assert!(logs.text().is_empty());
    }

    #[test]
    fn descriptor_identifiers_keep_the_device_off_the_bridge() {
        let dev = device(
            json!({"manufacturer": "vendor0", "identifiers": ["custom-id", 7]}),
            json!({"counter": {"entity_conf": {"device_class": "gas"}}}),
        );
        let (_, json) = build_one(&ctx(false, false), &dev, "counter");
        assert_eq!(json["device"]["identifiers"], json!(["custom-id", 7]));
        assert!(json["device"].get("via_device").is_none());
        assert!(json.get("availability").is_none());
    }

    #[test]
    fn device_class_selects_integration_and_explicit_integration_wins() {
        let dev = device(
            json!({}),
            json!({
                "door": {"entity_conf": {"device_class": "door"}},
                "counter": {"integration": "climate", "entity_conf": {"device_class": "gas"}}
            }),
        );
        let (door, _) = build_one(&ctx(false, false), &dev, "door");
        assert_eq!(door.integration, Integration::BinarySensor);
        let (counter, json) = build_one(&ctx(false, false), &dev, "counter");
        assert_eq!(counter.integration, Integration::Climate);
        assert_eq!(json["device_class"], json!("gas"));
    }

    #[test]
    fn placeholders_are_resolved() {
        let dev = device(
            json!({}),
            json!({"counter": {"integration": "climate", "entity_conf": {
                "value_template": "{None}",
                "current_temperature_topic": "{status_topic}",
                "temperature_command_topic": "{command_topic}",
                "temperature_command_template": "{ \"devEui\": \"{dev_eui}\" }",
                "min_temp": 6
            }}}),
        );
        let (record, json) = build_one(&ctx(false, false), &dev, "counter");
        assert!(json.get("value_template").is_none());
        assert_eq!(json["current_temperature_topic"], json!(record.status_topic));
        assert_eq!(json["temperature_command_topic"], json!(record.command_topic));
        assert_eq!(json["temperature_command_template"], json!(format!("{{ \"devEui\": \"{EUI}\" }}")));
        assert_eq!(json["min_temp"], json!(6));
        assert_eq!(
            record.templates(),
            vec![format!("{{ \"devEui\": \"{EUI}\" }}")]
        );
    }

    #[test]
    fn per_device_overrides_apply_only_to_their_device() {
        let dev = device(
            json!({"model": "generic", format!("dev_eui{EUI}"): {"model": "special"}, "dev_euiffff": {"model": "other"}}),
            json!({"counter": {"entity_conf": {format!("dev_eui{EUI}"): {"icon": "mdi:fire"}}}}),
        );
        let (_, json) = build_one(&ctx(false, false), &dev, "counter");
        assert_eq!(json["device"]["model"], json!("special"));
        assert!(json["device"].get("dev_euiffff").is_none());
        assert_eq!(json["icon"], json!("mdi:fire"));
    }

    #[test]
    fn per_device_online_and_expire_after_options() {
        let dev = device(
            json!({}),
            json!({"counter": {"entity_conf": {"uplink_interval": 600}}}),
        );
        let (_, json) = build_one(&ctx(true, true), &dev, "counter");
        assert_eq!(json["expire_after"], json!(600));
        assert_eq!(
            json["availability"][0]["topic"],
            json!(format!("application/app-1/device/{EUI}/event/cur"))
        );
        let (_, json) = build_one(&ctx(false, false), &dev, "counter");
        assert!(json.get("expire_after").is_none());
    }

    #[test]
    fn unnamed_device_uses_hex_eui() {
        let mut dev = device(json!({}), json!({"other": {"entity_conf": {}}}));
        dev.context.dev_name.clear();
        let (_, json) = build_one(&ctx(false, false), &dev, "other");
        assert_eq!(json["device"]["name"], json!(format!("0x{EUI}")));
        assert_eq!(json["name"], json!("other"));
    }

    #[test]
    fn builder_output_is_deterministic() {
        let dev = device(
            json!({"manufacturer": "vendor0"}),
            json!({"counter": {"entity_conf": {"device_class": "gas", "state_class": "total_increasing"}}}),
        );
        let (first, _) = build_one(&ctx(false, false), &dev, "counter");
        let (second, _) = build_one(&ctx(false, false), &dev, "counter");
        assert_eq!(first.payload().unwrap(), second.payload().unwrap());
    }

    #[test]
    fn bridge_device_has_three_entities_without_via_device() {
        let records = bridge_records(&ctx(false, false)).unwrap();
        let topics: Vec<&str> = records.iter().map(|r| r.discovery_topic.as_str()).collect();
        assert_eq!(
            topics,
            vec![
                "homeassistant/binary_sensor/abc123/state/config",
                "homeassistant/button/abc123/restart/config",
                "homeassistant/select/abc123/log_level/config",
            ]
        );
        for record in &records {
            let json = serde_json::to_value(&record.config).unwrap();
            assert!(json["device"].get("via_device").is_none());
            assert!(json.get("availability").is_none());
            assert_eq!(json["device"]["name"], json!(BRIDGE_NAME));
            assert!(json.get("time_stamp").is_none());
        }
        let button = serde_json::to_value(&records[1].config).unwrap();
        assert!(button.get("state_topic").is_none());
        assert_eq!(button["command_topic"], json!("application/app-1/bridge/restart"));
        let select = serde_json::to_value(&records[2].config).unwrap();
        assert_eq!(select["options"], json!(LOG_LEVEL_OPTIONS));
        assert_eq!(select["unique_id"], json!("bridge_abc123_log_level_chirp2mqtt"));
    }
}
