use std::sync::Arc;

use adapter_mqtt::MqttBus;
use anyhow::Result;
use chirp_core::{
    bus::Bus,
    registry::{Registry, resolve_application},
};
use chirp_discovery::{
    BridgeDeps, BridgeSettings, LogLevelControl, classes::ClassTable,
    script::ObjectLiteralEvaluator,
};
use tracing::info;

use crate::{config::Config, grpc::ChirpstackRegistry};

/// Connects the registry first, then the broker, so a bad registry setup
/// never leaves a broker session behind.
pub async fn connect(
    cfg: &Config,
    log_control: Arc<dyn LogLevelControl>,
) -> Result<(BridgeDeps, BridgeSettings)> {
    let registry: Arc<dyn Registry> =
        Arc::new(ChirpstackRegistry::connect(&cfg.api_endpoint(), &cfg.api_connection_key).await?);
    let application_id = resolve_application(registry.as_ref(), cfg.application_id.as_deref()).await?;
    let bus: Arc<dyn Bus> = Arc::new(MqttBus::connect(&cfg.mqtt_settings()).await?);
    build_deps(cfg, &application_id, bus, registry, log_control)
}

pub fn build_deps(
    cfg: &Config,
    application_id: &str,
    bus: Arc<dyn Bus>,
    registry: Arc<dyn Registry>,
    log_control: Arc<dyn LogLevelControl>,
) -> Result<(BridgeDeps, BridgeSettings)> {
    let classes = match &cfg.classes_file {
        Some(path) => ClassTable::load(path)?,
        None => ClassTable::builtin()?,
    };
    let settings = cfg.bridge_settings(application_id)?;
    info!("ChirpStack application ID {application_id}");

    let deps = BridgeDeps {
        bus,
        registry,
        evaluator: Arc::new(ObjectLiteralEvaluator),
        log_control,
        classes: Arc::new(classes),
    };
    Ok((deps, settings))
}
