use std::process::ExitCode;

use chirpd::{cli::Args, config::Config, run};
use clap::Parser;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let cfg = match Config::load(&args.config).and_then(|c| c.with_log_level(args.log_level.as_deref())) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("chirpd: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    match run(cfg).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}
