use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use eyre::Result;
use propagation_server::config::{load_config, Config};
use propagation_server::external::{Ed25519SignatureVerifier, LocalTreeValidator, NullMetadataClient};
use propagation_server::server::{build_state, shutdown_signal, start_server};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Content propagation server for a decentralized datastore network.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file.
    #[clap(short, long, value_parser)]
    config: Option<PathBuf>,

    /// Bind address for the server, overriding the config file.
    #[clap(short, long, value_parser)]
    bind: Option<String>,

    /// Enable verbose logging (can be specified multiple times).
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "propagation_server=info,tower_http=info".into()),
        1 => tracing_subscriber::EnvFilter::new("debug"),
        _ => tracing_subscriber::EnvFilter::new("trace"),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = if let Some(config_path) = &cli.config {
        info!("loading configuration from {}", config_path.display());
        match load_config(config_path) {
            Ok(config) => config,
            Err(err) => {
                warn!("failed to load configuration: {err}");
                warn!("using default configuration instead");
                Config::development_default()
            }
        }
    } else {
        info!("using default configuration");
        Config::development_default()
    };

    if let Some(bind) = cli.bind {
        config.listen_addr = bind.parse()?;
    }

    info!("starting propagation server on {}", config.listen_addr);

    // The datastore metadata module is a genuinely external system; operators
    // integrating with a real network should provide their own MetadataClient
    // in place of this stand-in.
    let state = build_state(
        config,
        Arc::new(Ed25519SignatureVerifier),
        Arc::new(NullMetadataClient),
        Arc::new(LocalTreeValidator),
    )
    .await?;

    tokio::select! {
        result = start_server(state) => {
            if let Err(err) = result {
                tracing::error!("server error: {err}");
            }
        }
        _ = shutdown_signal() => {}
    }

    Ok(())
}
