use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use chirp_core::model::{DeviceProfile, NormalizedDevice};
use chirp_core::registry::Registry;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::builder::{DiscoveryRecord, NamingContext, build_record};
use crate::filter::FieldFilter;
use crate::normalize::{entity_records, normalize};
use crate::script::ScriptEvaluator;

/// Last known value replayed to an entity's status topic after discovery.
#[derive(Debug, Clone, PartialEq)]
pub struct RestoreMessage {
    pub topic: String,
    pub payload: Bytes,
}

/// Everything one reconciliation pass publishes and tracks.
#[derive(Debug, Clone)]
pub struct PassPlan {
    pub started_at: f64,
    pub records: Vec<DiscoveryRecord>,
    pub restore: Vec<RestoreMessage>,
    pub filter: FieldFilter,
    pub devices: Vec<String>,
}

impl PassPlan {
    pub fn discovery_topics(&self) -> BTreeSet<String> {
        self.records.iter().map(|r| r.discovery_topic.clone()).collect()
    }
}

/// Turns the registry's view of the application into discovery records.
#[derive(Clone)]
pub struct Reconciler {
    registry: Arc<dyn Registry>,
    evaluator: Arc<dyn ScriptEvaluator>,
    naming: Arc<NamingContext>,
}

impl Reconciler {
    pub fn new(
        registry: Arc<dyn Registry>,
        evaluator: Arc<dyn ScriptEvaluator>,
        naming: Arc<NamingContext>,
    ) -> Self {
        Self { registry, evaluator, naming }
    }

    pub fn naming(&self) -> &NamingContext {
        &self.naming
    }

    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    /// Enabled devices of the application with their evaluated descriptors.
    /// A device whose registry entry or codec script is faulty is skipped.
    pub async fn collect_devices(&self) -> Result<Vec<NormalizedDevice>> {
        let application_id = self.naming.topics.application_id();
        let summaries = self
            .registry
            .list_devices(application_id)
            .await
            .with_context(|| format!("list devices of application {application_id}"))?;

        let mut profiles: HashMap<String, DeviceProfile> = HashMap::new();
        let mut devices = Vec::with_capacity(summaries.len());
        for summary in summaries {
            let dev_eui = summary.dev_eui.as_str();
            let details = match self.registry.get_device(dev_eui).await {
                Ok(details) => details,
                Err(e) => {
                    warn!(dev_eui, "device lookup failed, device ignored: {e}");
                    continue;
                }
            };
            if details.is_disabled {
                info!(dev_eui, "device is disabled, skipped");
                continue;
            }
            if !profiles.contains_key(&summary.device_profile_id) {
                match self.registry.get_device_profile(&summary.device_profile_id).await {
                    Ok(profile) => {
                        profiles.insert(summary.device_profile_id.clone(), profile);
                    }
                    Err(e) => {
                        warn!(dev_eui, "device profile {} lookup failed, device ignored: {e}", summary.device_profile_id);
                        continue;
                    }
                }
            }
            let Some(profile) = profiles.get(&summary.device_profile_id) else {
                continue;
            };
            match normalize(self.evaluator.as_ref(), &summary, profile) {
                Ok(device) => devices.push(device),
                Err(e) => {
                    debug!("Profile {} discovery codec script error {e}", profile.name);
                    error!(
                        "Discovery codec missing or faulty for device {dev_eui} with profile {}, device ignored",
                        profile.name
                    );
                }
            }
        }
        Ok(devices)
    }

    /// Builds the discovery records, value restore queue and field filter
    /// for one pass started at `started_at`.
    pub fn plan_pass(&self, devices: &[NormalizedDevice], started_at: f64, now: f64) -> PassPlan {
        let mut records = Vec::new();
        let mut restore = Vec::new();
        let mut templates = Vec::new();

        for device in devices {
            for entity in entity_records(device) {
                let record = match build_record(&self.naming, &entity, Some(started_at)) {
                    Ok(record) => record,
                    Err(e) => {
                        warn!(dev_eui = %device.context.dev_eui, "entity {} skipped: {e:#}", entity.key);
                        continue;
                    }
                };
                templates.extend(record.templates());

                let value_template = entity.entity.value_template().unwrap_or_default();
                for (key, value) in &device.context.prev_value {
                    if value_template.contains(key.as_str()) {
                        restore.push(restore_message(&record.status_topic, key, value, now));
                    }
                }
                records.push(record);
            }
        }

        let filter = FieldFilter::from_templates(templates.iter().map(String::as_str));
        debug!(?filter, "value filter");
        info!("{} value(s) restore request(s) queued", restore.len());
        info!(
            "Devices reloaded, {} device(s) and {} sensor(s) found",
            devices.len(),
            records.len()
        );

        PassPlan {
            started_at,
            records,
            restore,
            filter,
            devices: devices.iter().map(|d| d.context.dev_eui.clone()).collect(),
        }
    }
}

fn restore_message(topic: &str, key: &str, value: &Value, now: f64) -> RestoreMessage {
    let mut payload = Map::new();
    payload.insert(key.to_string(), value.clone());
    payload.insert("time_stamp".into(), Value::from(now));
    RestoreMessage {
        topic: topic.to_string(),
        payload: Bytes::from(Value::Object(payload).to_string()),
    }
}

/// Discovery topics of this pass versus those the broker has echoed back.
#[derive(Debug, Default, Clone)]
pub struct TopicSet {
    current: BTreeSet<String>,
    previous: BTreeSet<String>,
    echoed: BTreeSet<String>,
    pass_started: f64,
    completed: bool,
}

impl TopicSet {
    pub fn begin_pass(&mut self, current: BTreeSet<String>, started_at: f64) {
        self.current = current;
        self.echoed.clear();
        self.pass_started = started_at;
        self.completed = false;
    }

    pub fn in_current_pass(&self, topic: &str) -> bool {
        self.current.contains(topic)
    }

    /// Counts an echo of a topic published in this pass, whoever the
    /// config names as its parent device.
    pub fn record_echo(&mut self, topic: &str, time_stamp: Option<f64>) {
        if time_stamp.is_some_and(|ts| ts >= self.pass_started) && self.current.contains(topic) {
            self.echoed.insert(topic.to_string());
        }
    }

    /// Records a config routed via this bridge. Only these are retracted
    /// when a later pass no longer publishes them.
    pub fn record_own_echo(&mut self, topic: &str, time_stamp: Option<f64>) {
        self.previous.insert(topic.to_string());
        self.record_echo(topic, time_stamp);
    }

    pub fn echoed(&self) -> usize {
        self.echoed.len()
    }

    pub fn current(&self) -> usize {
        self.current.len()
    }

    /// True once every topic of an unfinished pass has been echoed.
    pub fn is_complete(&self) -> bool {
        !self.completed && self.echoed.len() >= self.current.len()
    }

    pub fn is_finished(&self) -> bool {
        self.completed
    }

    /// Ends the pass and returns the topics to retract.
    pub fn finish(&mut self) -> Vec<String> {
        let stale = self.previous.difference(&self.current).cloned().collect();
        self.previous = self.current.clone();
        self.completed = true;
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classes::ClassTable;
    use crate::script::ObjectLiteralEvaluator;
    use chirp_core::bus_contract::Topics;
    use chirp_core::model::{DeviceDetails, DeviceSummary};
    use chirp_core::registry::InMemoryRegistry;
    use std::collections::BTreeMap;

    const SCRIPT: &str = r#"function getHaDeviceInfo() {return {device: {manufacturer: "vendor0"}, entities: {battery: {entity_conf: {value_template: "{{ value_json.batteryLevel }}", device_class: "battery"}}, counter: {entity_conf: {device_class: "gas"}}}};}"#;

    fn registry() -> InMemoryRegistry {
        let registry = InMemoryRegistry::default();
        registry.add_application("t1", "app-1", "App").unwrap();
        registry
            .upsert_profile(DeviceProfile {
                id: "good".into(),
                name: "Good".into(),
                payload_codec_script: SCRIPT.into(),
                measurements: BTreeMap::new(),
                ..Default::default()
            })
            .unwrap();
        registry
            .upsert_profile(DeviceProfile {
                id: "bad".into(),
                name: "Bad".into(),
                payload_codec_script: "function decodeUplink() {}".into(),
                ..Default::default()
            })
            .unwrap();
        registry
    }

    fn add_device(registry: &InMemoryRegistry, eui: &str, profile: &str, disabled: bool) {
        registry
            .upsert_device(
                "app-1",
                DeviceSummary {
                    dev_eui: eui.into(),
                    name: format!("dev {eui}"),
                    device_profile_id: profile.into(),
                    battery_level: Some(55.0),
                    external_power_source: false,
                },
                DeviceDetails {
                    dev_eui: eui.into(),
                    name: format!("dev {eui}"),
                    device_profile_id: profile.into(),
                    is_disabled: disabled,
                    last_seen: None,
                },
            )
            .unwrap();
    }

    fn reconciler(registry: InMemoryRegistry) -> Reconciler {
        let naming = NamingContext::new(
            Topics::new("app-1", "homeassistant"),
            "uid",
            "0.1.0",
            Arc::new(ClassTable::builtin().unwrap()),
            false,
            false,
        );
        Reconciler::new(Arc::new(registry), Arc::new(ObjectLiteralEvaluator), Arc::new(naming))
    }

    #[tokio::test]
    async fn faulty_and_disabled_devices_are_skipped() {
        let registry = registry();
        add_device(&registry, "aa01", "good", false);
        add_device(&registry, "aa02", "bad", false);
        add_device(&registry, "aa03", "good", true);
        add_device(&registry, "aa04", "missing", false);

        let devices = reconciler(registry).collect_devices().await.unwrap();
        let euis: Vec<&str> = devices.iter().map(|d| d.context.dev_eui.as_str()).collect();
        assert_eq!(euis, vec!["aa01"]);
    }

    #[tokio::test]
    async fn plan_queues_restores_for_referenced_previous_values() {
        let registry = registry();
        add_device(&registry, "aa01", "good", false);
        let reconciler = reconciler(registry);
        let devices = reconciler.collect_devices().await.unwrap();

        let plan = reconciler.plan_pass(&devices, 100.0, 101.5);
        assert_eq!(plan.records.len(), 2);
        assert_eq!(plan.devices, vec!["aa01".to_string()]);
        assert_eq!(plan.restore.len(), 1);
        assert_eq!(plan.restore[0].topic, "application/app-1/device/aa01/event/up");
        let payload: Value = serde_json::from_slice(&plan.restore[0].payload).unwrap();
        assert_eq!(payload["batteryLevel"].as_f64(), Some(55.0));
        assert_eq!(payload["time_stamp"].as_f64(), Some(101.5));

        let expected = FieldFilter::from_templates([
            "{{ value_json.batteryLevel }}",
            "{{ value_json.object.counter }}",
        ]);
        assert_eq!(plan.filter, expected);
        assert!(plan.discovery_topics().contains("homeassistant/sensor/aa01/counter/config"));
    }

    #[test]
    fn topic_set_retracts_what_the_new_pass_lacks() {
        let mut set = TopicSet::default();
        let pass_one: BTreeSet<String> = ["t/a", "t/b"].map(String::from).into();
        set.begin_pass(pass_one, 10.0);
        set.record_own_echo("t/old", Some(1.0));
        assert!(!set.is_complete());
        set.record_own_echo("t/a", Some(10.0));
        set.record_own_echo("t/b", Some(5.0));
        assert!(!set.is_complete());
        set.record_own_echo("t/b", Some(10.5));
        assert!(set.is_complete());
        assert_eq!(set.finish(), vec!["t/old".to_string()]);
        assert!(!set.is_complete());

        set.begin_pass(["t/a"].map(String::from).into(), 20.0);
        set.record_own_echo("t/a", Some(20.0));
        assert!(set.is_complete());
        assert_eq!(set.finish(), vec!["t/b".to_string()]);

        set.begin_pass(["t/a"].map(String::from).into(), 30.0);
        set.record_own_echo("t/a", Some(30.0));
        assert!(set.finish().is_empty());
    }

    #[test]
    fn foreign_echoes_complete_the_pass_but_are_never_retracted() {
        let mut set = TopicSet::default();
        set.begin_pass(["t/custom"].map(String::from).into(), 10.0);
        set.record_echo("t/someone-else", Some(11.0));
        assert!(!set.is_complete());
        set.record_echo("t/custom", Some(10.0));
        assert!(set.is_complete());
        assert!(set.finish().is_empty());
    }

    #[test]
    fn empty_pass_completes_at_once() {
        let mut set = TopicSet::default();
        set.begin_pass(BTreeSet::new(), 1.0);
        assert!(set.is_complete());
    }
}
