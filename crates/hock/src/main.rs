//! Hock stub server CLI
//!
//! Serves the expectations declared in a config file until Ctrl-C, then
//! reports whether every expectation was satisfied.
//!
//! Usage:
//!   hock --config expectations.yaml [--port 8080] [--host 0.0.0.0] [--soft-fail]

use anyhow::Context;
use clap::Parser;
use hock::{metrics, Hock, HockConfig, UnmatchedPolicy};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, error, info};

/// Hock - programmable HTTP stub server
#[derive(Parser, Debug)]
#[command(name = "hock")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML or JSON file with server settings and expectations
    #[arg(short, long, env = "HOCK_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides the config file; 0 picks one)
    #[arg(short, long, env = "HOCK_PORT")]
    port: Option<u16>,

    /// Host to bind (overrides the config file)
    #[arg(long, env = "HOCK_HOST")]
    host: Option<String>,

    /// Reply 500 to unmatched requests instead of dropping the connection
    #[arg(long)]
    soft_fail: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    match run(Args::parse()).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    let mut config = match args.config {
        Some(ref path) => HockConfig::from_file(path)?,
        None => HockConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(host) = args.host {
        config.host = host;
    }
    if args.soft_fail {
        config.unmatched = UnmatchedPolicy::SoftFail;
    }

    let hock = Hock::with_config(&config).context("Failed to register expectations")?;
    let addr = hock.listen().await.context("Failed to start listener")?;
    info!(
        "Hock serving {} expectation(s) on http://{}",
        hock.pending().len(),
        addr
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");

    let outcome = hock.done();
    hock.close().await;
    debug!("Final metrics:\n{}", metrics::encode_metrics());

    match outcome {
        Ok(()) => {
            info!("All expectations satisfied");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!("{}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}
