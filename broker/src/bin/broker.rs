//! `broker <config.yaml> <cert.pem> <key.pem>`
//!
//! Ground: `examples/original_source/server/cmd/main.go` for the
//! positional-args invocation and the signal-driven graceful shutdown;
//! `roslibrust`'s examples (`ros1_listener.rs`, `ros1_talker.rs`) for the
//! `env_logger::init()` + `tokio::select!` on `ctrl_c()` idiom this
//! extends with a SIGTERM handler.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use broker::config::Config;
use broker::server::BrokerServer;
use broker::tls;
use clap::Parser;

#[derive(Parser)]
#[command(name = "broker", about = "Text message broker over QUIC")]
struct Args {
    /// Path to the YAML config file.
    config: PathBuf,
    /// Path to the broker's PEM certificate.
    cert: PathBuf,
    /// Path to the broker's PEM private key.
    key: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    match run(Args::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = Config::load(&args.config)
        .with_context(|| format!("loading config from {}", args.config.display()))?;
    let tls_config =
        tls::load_server_config(&args.cert, &args.key).context("loading TLS certificate/key")?;

    let server = BrokerServer::new(config, tls_config);
    server.start().await.context("starting broker")?;
    log::info!(
        "broker started: publisher port {}, subscriber port {}",
        config.publisher_port,
        config.subscriber_port
    );

    wait_for_shutdown_signal().await;

    log::info!("shutdown signal received");
    server.shutdown().await.context("shutting down broker")?;
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("installing SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
