use std::sync::Arc;

use anyhow::{Result, bail};
use chirp_core::bus::{Bus, Message};
use chirp_core::bus_contract::Topics;
use chirp_core::registry::Registry;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::bridge::Bridge;
use crate::builder::NamingContext;
use crate::classes::ClassTable;
use crate::log_level::LogLevelControl;
use crate::reconcile::Reconciler;
use crate::script::ScriptEvaluator;
use crate::settings::BridgeSettings;
use crate::timers::Timers;

/// Input of the bridge event loop. Broker deliveries and timer expiries
/// share one channel so the engine state has a single writer.
#[derive(Debug)]
pub enum Event {
    Message(Message),
    HaWaitExpired,
    LiveCheckDue,
    CatchupExpired(u64),
    /// The broker stream ended.
    Disconnected,
}

/// Collaborators the engine runs against.
#[derive(Clone)]
pub struct BridgeDeps {
    pub bus: Arc<dyn Bus>,
    pub registry: Arc<dyn Registry>,
    pub evaluator: Arc<dyn ScriptEvaluator>,
    pub log_control: Arc<dyn LogLevelControl>,
    pub classes: Arc<ClassTable>,
}

/// Runs the bridge until `shutdown` is cancelled or the broker goes away.
/// Timers are cancelled and the broker session closed on every exit path.
pub async fn run(deps: BridgeDeps, settings: BridgeSettings, shutdown: CancellationToken) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut incoming = deps.bus.incoming()?;
    let forward_tx = tx.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(msg) = incoming.next().await {
            if forward_tx.send(Event::Message(msg)).is_err() {
                return;
            }
        }
        let _ = forward_tx.send(Event::Disconnected);
    });

    let naming = NamingContext::new(
        Topics::new(&settings.application_id, &settings.discovery_prefix),
        &settings.bridge_unique_id,
        &settings.version,
        deps.classes,
        settings.expire_after,
        settings.per_device_online(),
    );
    let reconciler = Reconciler::new(deps.registry, deps.evaluator, Arc::new(naming));
    let mut bridge = Bridge::new(deps.bus, reconciler, deps.log_control, settings, Timers::new(tx));

    let result: Result<()> = async {
        bridge.start().await?;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("shutdown requested");
                    return Ok(());
                }
                event = rx.recv() => match event {
                    Some(Event::Disconnected) | None => bail!("broker connection lost"),
                    Some(event) => bridge.handle(event).await?,
                },
            }
        }
    }
    .await;

    forwarder.abort();
    bridge.shutdown().await;
    debug!("bridge stopped");
    result
}

/// A bridge running on its own task.
pub struct BridgeHandle {
    shutdown: CancellationToken,
    task: JoinHandle<Result<()>>,
}

impl BridgeHandle {
    pub fn spawn(deps: BridgeDeps, settings: BridgeSettings) -> Self {
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run(deps, settings, shutdown.clone()));
        Self { shutdown, task }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Requests shutdown and waits for the loop to finish.
    pub async fn stop(self) -> Result<()> {
        self.shutdown.cancel();
        self.task.await?
    }
}
