//! `publisher <port>`
//!
//! Reads lines from stdin and publishes each as a message, logging the
//! broker's acknowledgement for each one. A reduced stand-in for the
//! original's interactive console (excluded as a Non-goal feature), but
//! still the stdin-relay loop a complete CLI needs.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use broker::client::publisher::PublisherClient;
use broker_common::Message;
use clap::Parser;
use tokio::io::AsyncBufReadExt;

#[derive(Parser)]
#[command(name = "publisher", about = "Publish lines from stdin to the broker")]
struct Args {
    /// Broker publisher port.
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
    let mut client = PublisherClient::connect(args.port, Duration::from_secs(30), Duration::ZERO)
        .await
        .map_err(anyhow::Error::from)?;

    client
        .set_message_receiver(Arc::new(|message| {
            log::info!("broker: {}", message.text);
        }))
        .await;

    let stdin = tokio::io::stdin();
    let mut lines = tokio::io::BufReader::new(stdin).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(text) => {
                        if let Err(err) = client.publish(Message::new(text)).await {
                            log::warn!("publish failed: {err}");
                        }
                    }
                    None => break,
                }
            }
            _ = client.connection_closed() => {
                log::info!("broker closed the connection");
                break;
            }
        }
    }

    client.close().await;
    Ok(())
}
