//! Subscriber client core: accepts the unidirectional stream the broker
//! opens after the connection is established, and reads messages off it
//! until the broker closes it.

use std::sync::Arc;
use std::time::Duration;

use broker_common::{Error, MessageReceiver};
use tokio::sync::{oneshot, Mutex};

use crate::transport::{ReadStream, Transport, DEFAULT_READ_BUFFER_SIZE};

use super::{client_endpoint, loopback_addr};

pub struct SubscriberClient {
    transport: Transport,
    read_stream: Arc<ReadStream>,
    connection_closed: oneshot::Receiver<()>,
}

impl SubscriberClient {
    pub async fn connect(port: u16, open_timeout: Duration) -> Result<Self, Error> {
        let endpoint = client_endpoint()?;
        let transport = Transport::connect(&endpoint, loopback_addr(port), "localhost", open_timeout)
            .await?;
        let read_stream = Arc::new(transport.accept_read_stream(DEFAULT_READ_BUFFER_SIZE).await?);

        let (tx, rx) = oneshot::channel();
        let tx = Arc::new(Mutex::new(Some(tx)));
        read_stream
            .set_conn_closed_callback(Arc::new(move || {
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Some(tx) = tx.lock().await.take() {
                        let _ = tx.send(());
                    }
                });
            }))
            .await;

        Ok(Self {
            transport,
            read_stream,
            connection_closed: rx,
        })
    }

    pub async fn set_message_receiver(&self, receiver: MessageReceiver) {
        self.read_stream.set_message_receiver(receiver).await;
    }

    pub fn connection_closed(&mut self) -> &mut oneshot::Receiver<()> {
        &mut self.connection_closed
    }

    pub async fn close(&self) {
        self.read_stream.close();
        self.transport.close();
    }
}
