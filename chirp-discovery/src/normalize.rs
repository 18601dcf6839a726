use chirp_core::model::{
    DeviceContext, DeviceProfile, DeviceProfileDescriptor, DeviceSummary, EntityDescription,
    NormalizedDevice, mac_version_label,
};
use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::script::{ScriptError, ScriptEvaluator};

pub const BATTERY_LEVEL_KEY: &str = "batteryLevel";

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error("descriptor does not match the expected shape: {0}")]
    Shape(#[from] serde_json::Error),
}

/// One entity together with the device it belongs to.
#[derive(Debug, Clone, Copy)]
pub struct EntityRecord<'a> {
    pub key: &'a str,
    pub entity: &'a EntityDescription,
    pub device: &'a Map<String, Value>,
    pub context: &'a DeviceContext,
}

pub fn entity_records(device: &NormalizedDevice) -> impl Iterator<Item = EntityRecord<'_>> {
    device.descriptor.entities.iter().map(move |(key, entity)| EntityRecord {
        key,
        entity,
        device: &device.descriptor.device,
        context: &device.context,
    })
}

pub fn default_value_template(entity_key: &str) -> String {
    format!("{{{{ value_json.object.{entity_key} }}}}")
}

/// Evaluates the profile's descriptor script and attaches registry facts.
pub fn normalize(
    evaluator: &dyn ScriptEvaluator,
    device: &DeviceSummary,
    profile: &DeviceProfile,
) -> Result<NormalizedDevice, NormalizeError> {
    let raw = evaluator.evaluate(&profile.payload_codec_script)?;
    let mut descriptor: DeviceProfileDescriptor = serde_json::from_value(raw)?;

    for (key, entity) in descriptor.entities.iter_mut() {
        let has_template = match entity.entity_conf.get("value_template") {
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Null) | None => false,
            Some(_) => true,
        };
        if !has_template {
            entity
                .entity_conf
                .insert("value_template".to_string(), Value::String(default_value_template(key)));
        }
    }

    let measurement_names = descriptor
        .entities
        .keys()
        .filter_map(|key| profile.measurements.get(key).map(|name| (key.clone(), name.clone())))
        .collect();

    let mut prev_value = Map::new();
    if let Some(level) = device.battery_level
        && !device.external_power_source
    {
        prev_value.insert(BATTERY_LEVEL_KEY.to_string(), json!(level));
    }

    Ok(NormalizedDevice {
        descriptor,
        context: DeviceContext {
            dev_eui: device.dev_eui.clone(),
            dev_name: device.name.clone(),
            sw_version: profile.mac_version.as_deref().map(mac_version_label),
            measurement_names,
            prev_value,
        },
    })
}
