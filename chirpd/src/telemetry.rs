use anyhow::{Context, Result};
use chirp_discovery::{LogLevel, LogLevelControl};
use tracing_subscriber::{Registry, filter::EnvFilter, fmt, prelude::*, reload};

/// Swaps the global filter when the bridge's log level select changes.
pub struct TracingLevelControl {
    handle: reload::Handle<EnvFilter, Registry>,
}

/// Installs the global subscriber. `RUST_LOG` wins over `level` at startup.
pub fn init_tracing(level: LogLevel) -> Result<TracingLevelControl> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.directive()));
    let (filter, handle) = reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init()
        .context("install tracing subscriber")?;
    Ok(TracingLevelControl { handle })
}

impl LogLevelControl for TracingLevelControl {
    fn set_level(&self, level: LogLevel) -> Result<()> {
        self.handle
            .reload(EnvFilter::new(level.directive()))
            .context("reload log filter")?;
        tracing::info!("log level set to {level}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_changes_replace_the_filter() {
        let (layer, handle) = reload::Layer::<EnvFilter, Registry>::new(EnvFilter::new("info"));
        let control = TracingLevelControl { handle: handle.clone() };

        control.set_level(LogLevel::Detail).unwrap();
        let current = handle.with_current(|f| f.to_string()).unwrap();
        assert_eq!(current, EnvFilter::new("trace").to_string());

        control.set_level(LogLevel::Warning).unwrap();
        let current = handle.with_current(|f| f.to_string()).unwrap();
        assert_eq!(current, EnvFilter::new("warn").to_string());
        drop(layer);
    }

    #[test]
    fn reload_fails_once_the_layer_is_gone() {
        let (layer, handle) = reload::Layer::<EnvFilter, Registry>::new(EnvFilter::new("info"));
        drop(layer);
        let control = TracingLevelControl { handle };
        assert!(control.set_level(LogLevel::Debug).is_err());
    }
}
