use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chirp_core::{
    bus::{Bus, InMemoryBus, Message},
    registry::{InMemoryRegistry, resolve_application},
};
use chirp_discovery::{BridgeHandle, LogLevel, LogLevelControl};
use chirpd::{config::Config, wiring::build_deps};
use serde_json::json;

struct NoopLevels;

impl LogLevelControl for NoopLevels {
    fn set_level(&self, _: LogLevel) -> anyhow::Result<()> {
        Ok(())
    }
}

fn write_options(dir: &std::path::Path) -> std::path::PathBuf {
    let classes = dir.join("classes.json");
    std::fs::write(&classes, r#"{"integrations": ["sensor", "binary_sensor"], "sensor": ["gas"], "binary_sensor": ["connectivity"]}"#)
        .unwrap();
    let options = dir.join("options.json");
    let body = json!({
        "application_id": "gone",
        "discovery_prefix": "ha",
        "options_start_delay": 1,
        "options_log_level": "debug",
        "classes_file": classes,
    });
    std::fs::write(&options, body.to_string()).unwrap();
    options
}

#[tokio::test(start_paused = true)]
async fn options_file_drives_a_running_bridge() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = Config::load(&write_options(dir.path())).unwrap();
    assert_eq!(cfg.log_level().unwrap(), LogLevel::Debug);

    let registry = InMemoryRegistry::default();
    registry.add_application("t1", "app-1", "HA integration").unwrap();
    let app = resolve_application(&registry, cfg.application_id.as_deref()).await.unwrap();
    assert_eq!(app, "app-1");

    let bus = InMemoryBus::default();
    let (deps, settings) =
        build_deps(&cfg, &app, Arc::new(bus.clone()), Arc::new(registry), Arc::new(NoopLevels))
            .unwrap();
    assert_eq!(settings.application_id, "app-1");
    assert_eq!(settings.bridge_unique_id, cfg.bridge_unique_id());
    assert_eq!(settings.start_delay, Duration::from_secs(1));

    let handle = BridgeHandle::spawn(deps, settings);

    // No Home Assistant announcement: the bridge configures after the start delay.
    let state_topic = "application/app-1/bridge/status";
    let mut log: Vec<Message> = Vec::new();
    for _ in 0..300 {
        log.extend(bus.take_published());
        if log.iter().any(|m| m.topic == state_topic) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(log.first().map(|m| m.topic.as_str()), Some("application/app-1/status"));
    assert_eq!(log.first().map(|m| m.payload.clone()), Some(Bytes::from("initialize")));
    assert!(log.iter().any(|m| m.topic == state_topic), "bridge never went online");
    assert!(
        log.iter().any(|m| m.topic.starts_with("ha/binary_sensor/") && m.topic.ends_with("/state/config") && m.retain),
        "bridge connectivity entity not announced"
    );

    handle.stop().await.unwrap();
    assert!(bus.publish("x", Bytes::from("y"), false).await.is_err());
}

#[test]
fn missing_options_file_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::load(&dir.path().join("absent.json")).unwrap_err();
    assert!(format!("{err:#}").contains("read config file"));
}

#[test]
fn unknown_class_file_fails_wiring() {
    let cfg = Config { classes_file: Some("/nonexistent/classes.json".into()), ..Config::default() };
    let built = build_deps(
        &cfg,
        "app-1",
        Arc::new(InMemoryBus::default()),
        Arc::new(InMemoryRegistry::default()),
        Arc::new(NoopLevels),
    );
    assert!(built.is_err());
}
