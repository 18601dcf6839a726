use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use chirp_core::bus::{Bus, Message};
use chirp_core::bus_contract::{
    BridgeStatus, EVENT_CURRENT, EVENT_UP, HA_OFFLINE, HA_ONLINE, MARKER_CONFIGURE,
    MARKER_INITIALIZE, MARKER_LIVE_START, TopicKind, Topics,
};
use chirp_core::model::{EchoedConfig, unix_now};
use chrono::Utc;
use metrics::counter;
use serde_json::Value;
use tracing::{debug, error, info, trace, warn};

use crate::builder::bridge_records;
use crate::catchup::{CatchupWindow, Opening};
use crate::filter::ValueCache;
use crate::log_level::{LogLevel, LogLevelControl};
use crate::reconcile::{Reconciler, RestoreMessage, TopicSet};
use crate::runtime::Event;
use crate::settings::BridgeSettings;
use crate::timers::{TimerKind, Timers};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Initializing,
    WaitHaOnline,
    Configuring,
    Running,
}

/// The reconciliation engine. Owned by one event loop; every mutation
/// happens in [`Bridge::handle`].
pub struct Bridge {
    bus: Arc<dyn Bus>,
    reconciler: Reconciler,
    log_control: Arc<dyn LogLevelControl>,
    settings: BridgeSettings,
    topics: Topics,
    timers: Timers,
    phase: Phase,
    ha_online: bool,
    bridge_state_received: bool,
    pass_started: f64,
    topic_set: TopicSet,
    cache: ValueCache,
    window: CatchupWindow,
    restore_queue: Vec<RestoreMessage>,
}

impl Bridge {
    pub fn new(
        bus: Arc<dyn Bus>,
        reconciler: Reconciler,
        log_control: Arc<dyn LogLevelControl>,
        settings: BridgeSettings,
        timers: Timers,
    ) -> Self {
        let topics = reconciler.naming().topics.clone();
        Self {
            bus,
            reconciler,
            log_control,
            settings,
            topics,
            timers,
            phase: Phase::Initializing,
            ha_online: false,
            bridge_state_received: false,
            pass_started: 0.0,
            topic_set: TopicSet::default(),
            cache: ValueCache::default(),
            window: CatchupWindow::default(),
            restore_queue: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Subscribes to the control topics and announces the bridge.
    pub async fn start(&mut self) -> Result<()> {
        for topic in [self.topics.initialize(), self.topics.ha_status(), self.topics.bridge_live()] {
            self.subscribe(&topic).await?;
        }
        self.publish(&self.topics.initialize(), Bytes::from_static(MARKER_INITIALIZE.as_bytes()), false)
            .await?;
        info!("Bridge setup '{MARKER_INITIALIZE}' message published");
        Ok(())
    }

    pub async fn handle(&mut self, event: Event) -> Result<()> {
        match event {
            Event::Message(msg) => self.on_message(msg).await,
            Event::HaWaitExpired => {
                if self.ha_online {
                    return Ok(());
                }
                self.ha_online = true;
                debug!(
                    "{:?} timeout expired, but no HA online message received, bridge setup '{MARKER_CONFIGURE}' message published",
                    self.settings.start_delay
                );
                self.publish_marker(MARKER_CONFIGURE).await
            }
            Event::LiveCheckDue => {
                let topic = self.topics.bridge_live();
                self.publish(&topic, Bytes::from_static(MARKER_LIVE_START.as_bytes()), false).await
            }
            Event::CatchupExpired(generation) => {
                if self.window.expire(generation) {
                    debug!("Time to stop cur message watch");
                    self.after_window_closed().await?;
                }
                Ok(())
            }
            Event::Disconnected => Ok(()),
        }
    }

    /// Cancels timers and closes the broker session.
    pub async fn shutdown(&mut self) {
        self.timers.cancel_all();
        if let Err(e) = self.bus.close().await {
            warn!("closing broker session failed: {e}");
        }
    }

    async fn on_message(&mut self, msg: Message) -> Result<()> {
        let Some(payload) = msg.payload_str() else {
            warn!(topic = %msg.topic, "payload is not valid utf-8, ignored");
            counter!("bridge.message.decode_error").increment(1);
            return Ok(());
        };
        trace!("MQTT message received: topic {}, payload {payload}, retain={}", msg.topic, msg.retain);

        let topics = self.topics.clone();
        match topics.classify(&msg.topic) {
            TopicKind::BridgeState => {
                self.on_bridge_state(payload);
                Ok(())
            }
            TopicKind::BridgeRestart => {
                if self.phase < Phase::Configuring {
                    return Ok(());
                }
                info!("Bridge restart requested");
                self.run_pass().await
            }
            TopicKind::BridgeLive => {
                debug!("Bridge device live status update requested");
                if payload == MARKER_LIVE_START {
                    self.open_window(true).await?;
                }
                Ok(())
            }
            TopicKind::HaStatus => match payload {
                HA_ONLINE => {
                    self.ha_online = true;
                    self.timers.cancel(TimerKind::HaWait);
                    self.publish_marker(MARKER_CONFIGURE).await?;
                    info!("HA online, continuing configuration");
                    Ok(())
                }
                HA_OFFLINE => {
                    info!("HA offline message received");
                    Ok(())
                }
                other => {
                    debug!("unexpected HA status '{other}' ignored");
                    Ok(())
                }
            },
            TopicKind::Lifecycle => {
                info!("Bridge setup '{payload}' message received");
                match payload {
                    MARKER_INITIALIZE => {
                        if self.phase == Phase::Initializing {
                            self.phase = Phase::WaitHaOnline;
                        }
                        if !self.ha_online {
                            let wait = self.settings.ha_wait();
                            self.timers.start_once(TimerKind::HaWait, wait, Event::HaWaitExpired);
                        }
                        Ok(())
                    }
                    MARKER_CONFIGURE => self.configure().await,
                    _ => Ok(()),
                }
            }
            TopicKind::DiscoveryConfig | TopicKind::DeviceEvent { .. } => {
                self.on_data(&msg.topic, payload).await
            }
            TopicKind::Other => {
                debug!(topic = %msg.topic, "message on unexpected topic ignored");
                Ok(())
            }
        }
    }

    fn on_bridge_state(&mut self, payload: &str) {
        self.bridge_state_received = true;
        info!("Bridge state message received");
        let level = serde_json::from_str::<BridgeStatus>(payload)
            .context("decode bridge state")
            .and_then(|status| status.log_level.context("no log level in bridge state"))
            .and_then(|word| word.parse::<LogLevel>().map_err(Into::into))
            .and_then(|level| self.log_control.set_level(level).map(|_| level));
        match level {
            Ok(level) => debug!("log level set to {level}"),
            Err(e) => error!("Bridge state message processing failed: {e:#}"),
        }
    }

    async fn configure(&mut self) -> Result<()> {
        self.phase = Phase::Configuring;
        let topics = [
            self.topics.bridge_state(),
            self.topics.bridge_restart(),
            self.topics.all_device_events(EVENT_UP),
            self.topics.all_discovery_configs(),
        ];
        for topic in &topics {
            self.subscribe(topic).await?;
        }
        for record in bridge_records(self.reconciler.naming())? {
            self.publish(&record.discovery_topic, record.payload()?, true).await?;
        }
        info!("Bridge discovery messages published");
        self.run_pass().await
    }

    /// Queries the registry and publishes discovery for every entity.
    async fn run_pass(&mut self) -> Result<()> {
        let started = unix_now();
        self.pass_started = started;
        self.phase = Phase::Configuring;
        info!("Bridge initialization time stamp {started}");

        let devices = self.reconciler.collect_devices().await?;
        let plan = self.reconciler.plan_pass(&devices, started, unix_now());

        self.topic_set.begin_pass(plan.discovery_topics(), started);
        self.cache.reset(plan.filter.clone(), plan.devices.iter().cloned());
        self.restore_queue = plan.restore;

        for record in &plan.records {
            self.publish(&record.discovery_topic, record.payload()?, true).await?;
            counter!("bridge.discovery.published").increment(1);
            info!("Discovery message published: {}", record.discovery_topic);
        }
        self.complete_pass_if_echoed().await
    }

    async fn complete_pass_if_echoed(&mut self) -> Result<()> {
        if self.phase != Phase::Configuring || !self.topic_set.is_complete() {
            return Ok(());
        }
        let stale = self.topic_set.finish();
        info!(
            "{} of {} configuration messages received, {} disappeared devices",
            self.topic_set.echoed(),
            self.topic_set.current(),
            stale.len()
        );
        for topic in stale {
            self.publish(&topic, Bytes::new(), true).await?;
            counter!("bridge.discovery.retracted").increment(1);
            info!("Removing retained topic {topic}");
        }

        if !self.bridge_state_received {
            let level = self.settings.log_level;
            let status = serde_json::to_vec(&BridgeStatus::online(level.as_str()))?;
            self.publish(&self.topics.bridge_state(), Bytes::from(status), true).await?;
            info!("Bridge state turned on, log level {level}");
        }

        self.open_window(false).await?;
        for restore in std::mem::take(&mut self.restore_queue) {
            self.publish(&restore.topic, restore.payload, false).await?;
            counter!("bridge.values.restored").increment(1);
            info!("Previous sensor values restored: {}", restore.topic);
        }

        self.phase = Phase::Running;
        if let Some(period) = self.settings.live_check_period()
            && !self.timers.is_running(TimerKind::LiveCheck)
        {
            self.timers.start_interval(TimerKind::LiveCheck, period, || Event::LiveCheckDue);
            info!("Periodic device check task started for {period:?} interval");
        }
        Ok(())
    }

    async fn open_window(&mut self, live_check: bool) -> Result<()> {
        let now = unix_now();
        let opening = self.window.open(now, live_check);
        if let Opening::Opened(_) = opening {
            self.subscribe(&self.topics.all_device_events(EVENT_CURRENT)).await?;
            info!("Subscribed to retained values topic at {now}");
        }
        self.timers.start_once(
            TimerKind::Catchup,
            self.settings.catchup_window(),
            Event::CatchupExpired(opening.generation()),
        );
        Ok(())
    }

    async fn close_window(&mut self) -> Result<()> {
        if self.window.close() {
            self.timers.cancel(TimerKind::Catchup);
            self.after_window_closed().await?;
        }
        Ok(())
    }

    async fn after_window_closed(&mut self) -> Result<()> {
        self.bus
            .unsubscribe(&self.topics.all_device_events(EVENT_CURRENT))
            .await
            .context("unsubscribe from retained values topic")?;
        info!("Unsubscribed from retained values topic");
        debug!(
            "Not processed retained devices {}, processing age {:.1}(s)",
            self.cache.pending(),
            unix_now() - self.window.opened_at()
        );
        Ok(())
    }

    async fn on_data(&mut self, topic: &str, payload: &str) -> Result<()> {
        if payload.len() <= 2 {
            info!("Ignoring topic {topic} with payload {payload}");
            counter!("bridge.message.ignored").increment(1);
            return Ok(());
        }
        let value: Value = match serde_json::from_str(payload) {
            Ok(value @ Value::Object(_)) => value,
            Ok(_) => {
                info!("Ignoring topic {topic} with payload {payload}");
                counter!("bridge.message.ignored").increment(1);
                return Ok(());
            }
            Err(e) => {
                warn!(topic, "payload is not JSON, ignored: {e}");
                counter!("bridge.message.decode_error").increment(1);
                return Ok(());
            }
        };
        let time_stamp = value.get("time_stamp").and_then(time_stamp_of);

        match self.topics.classify(topic) {
            TopicKind::DiscoveryConfig => self.on_discovery_echo(topic, value, time_stamp).await,
            TopicKind::DeviceEvent { dev_eui, event: EVENT_CURRENT } => {
                self.on_snapshot(topic, dev_eui, &value, time_stamp).await
            }
            TopicKind::DeviceEvent { dev_eui, event: EVENT_UP } => {
                if time_stamp.is_none() && self.cache.contains(dev_eui) {
                    self.publish_cached(dev_eui, EVENT_CURRENT, &value, true).await?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn on_discovery_echo(&mut self, topic: &str, value: Value, time_stamp: Option<f64>) -> Result<()> {
        let echo: EchoedConfig = match serde_json::from_value(value) {
            Ok(echo) => echo,
            Err(e) => {
                debug!(topic, "discovery config not readable, ignored: {e}");
                return Ok(());
            }
        };
        let own = echo.via_device() == Some(self.reconciler.naming().bridge_identifier.as_str());
        if !own && !self.topic_set.in_current_pass(topic) {
            return Ok(());
        }
        info!("Registration message with time stamp {time_stamp:?} received: {topic}");
        if own {
            self.topic_set.record_own_echo(topic, time_stamp);
        } else {
            self.topic_set.record_echo(topic, time_stamp);
        }
        self.complete_pass_if_echoed().await
    }

    async fn on_snapshot(&mut self, topic: &str, dev_eui: &str, value: &Value, time_stamp: Option<f64>) -> Result<()> {
        if !self.window.is_open() {
            return Ok(());
        }
        info!("Cached values received for device {dev_eui}");
        let action = self.window.snapshot_action(&self.cache, self.pass_started, dev_eui, time_stamp);
        if action.retract {
            self.publish(topic, Bytes::new(), true).await?;
            debug!("Value cache removal topic {topic} published");
        }
        if action.replay_uplink {
            self.publish_cached(dev_eui, EVENT_UP, value, false).await?;
        }
        if action.refresh_live {
            self.publish_cached(dev_eui, EVENT_CURRENT, value, false).await?;
        }
        debug!("{} device(s) cached values not processed", self.cache.pending());
        if self.window.can_close_early(&self.cache) {
            self.close_window().await?;
        }
        Ok(())
    }

    /// Merges `payload` into the device cache and publishes the result on
    /// the device's `event` topic.
    async fn publish_cached(&mut self, dev_eui: &str, event: &str, payload: &Value, retain: bool) -> Result<()> {
        let Some(merged) = self.cache.merge(dev_eui, payload) else {
            return Ok(());
        };
        if merged.is_empty() && event != EVENT_CURRENT {
            return Ok(());
        }
        let Some(mut snapshot) = self.cache.snapshot(dev_eui, unix_now()) else {
            return Ok(());
        };
        if event == EVENT_CURRENT && self.settings.per_device_online() {
            let status = self.device_status(dev_eui).await;
            snapshot.insert("status".into(), Value::String(status.to_string()));
        }
        let topic = self.topics.device_event(dev_eui, event);
        self.publish(&topic, Bytes::from(Value::Object(snapshot).to_string()), retain).await?;
        debug!("Cached values published for device {dev_eui} and topic {event} {topic}");
        Ok(())
    }

    async fn device_status(&self, dev_eui: &str) -> &'static str {
        match self.reconciler.registry().visibility(dev_eui).await {
            Ok(visibility) => {
                let status = if visibility.is_online(Utc::now()) { HA_ONLINE } else { HA_OFFLINE };
                debug!("Device {dev_eui} status now is {status} ({visibility:?})");
                status
            }
            Err(e) => {
                warn!(dev_eui, "device visibility lookup failed: {e}");
                HA_OFFLINE
            }
        }
    }

    async fn publish_marker(&self, marker: &'static str) -> Result<()> {
        self.publish(&self.topics.initialize(), Bytes::from_static(marker.as_bytes()), false).await
    }

    async fn publish(&self, topic: &str, payload: Bytes, retain: bool) -> Result<()> {
        trace!("MQTT message published: topic {topic}, payload {:?}, retain={retain}", payload);
        self.bus
            .publish(topic, payload, retain)
            .await
            .with_context(|| format!("publish to {topic}"))
    }

    async fn subscribe(&self, filter: &str) -> Result<()> {
        self.bus.subscribe(filter).await.with_context(|| format!("subscribe to {filter}"))?;
        trace!("MQTT subscribed to topic {filter}");
        Ok(())
    }
}

/// `time_stamp` as float seconds; numeric strings are accepted too.
fn time_stamp_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
