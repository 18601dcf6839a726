use std::path::PathBuf;

use clap::Parser;

use crate::config::DEFAULT_CONFIG_PATH;

/// ChirpStack to Home Assistant MQTT discovery bridge.
#[derive(Debug, Parser)]
#[command(version)]
pub struct Args {
    /// Path to the options file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Override log level (error, warning, info, debug, detail).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_addon_options_file() {
        let args = Args::parse_from(["chirpd"]);
        assert_eq!(args.config, PathBuf::from("/data/options.json"));
        assert_eq!(args.log_level, None);

        let args = Args::parse_from(["chirpd", "-c", "opts.json", "--log-level", "debug"]);
        assert_eq!(args.config, PathBuf::from("opts.json"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
    }
}
