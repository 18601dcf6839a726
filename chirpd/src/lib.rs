pub mod cli;
pub mod config;
pub mod grpc;
pub mod shutdown;
pub mod telemetry;
pub mod wiring;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{config::Config, shutdown::cancel_on_signal, telemetry::init_tracing};

pub async fn run(cfg: Config) -> anyhow::Result<()> {
    let log_control = Arc::new(init_tracing(cfg.log_level()?)?);
    info!("Version {}", env!("CARGO_PKG_VERSION"));

    let result = serve(&cfg, log_control).await;
    if let Err(e) = &result {
        error!("chirpd failed: {e}");
        debug!("{e:?}");
    }
    result
}

async fn serve(cfg: &Config, log_control: Arc<telemetry::TracingLevelControl>) -> anyhow::Result<()> {
    let (deps, settings) = wiring::connect(cfg, log_control).await?;
    let shutdown = CancellationToken::new();
    let signals = tokio::spawn(cancel_on_signal(shutdown.clone()));
    let result = chirp_discovery::run(deps, settings, shutdown).await;
    signals.abort();
    result
}
