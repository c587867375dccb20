//! `subscriber <port>`
//!
//! Logs every message the broker pushes until the broker closes the
//! connection or the process receives a termination signal.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use broker::client::subscriber::SubscriberClient;
use clap::Parser;

#[derive(Parser)]
#[command(name = "subscriber", about = "Log messages the broker publishes")]
struct Args {
    /// Broker subscriber port.
    port: u16,
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
    let mut client = SubscriberClient::connect(args.port, Duration::from_secs(30))
        .await
        .map_err(anyhow::Error::from)?;

    client
        .set_message_receiver(Arc::new(|message| {
            log::info!("{}", message.text);
        }))
        .await;

    tokio::select! {
        _ = client.connection_closed() => {
            log::info!("broker closed the connection");
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("interrupted");
        }
    }

    client.close().await;
    Ok(())
}
