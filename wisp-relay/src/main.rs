#![forbid(unsafe_code)]

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use wisp_relay_lib::{load_from_path, server};

#[derive(Parser, Debug)]
#[command(author, version, about = "Wisp multiplexing relay server")]
struct Cli {
    /// Path to configuration TOML file
    #[arg(short, long, value_name = "FILE", default_value = "wisp-relay.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    match load_from_path(&cli.config) {
        Ok(cfg) => {
            info!(listen = %cfg.listen, version = cfg.wisp.version, "configuration loaded");
            if let Err(err) = server::run(Arc::new(cfg)).await {
                error!(%err, "relay exited with error");
                std::process::exit(1);
            }
        }
        Err(err) => {
            error!(%err, "failed to load configuration");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}
