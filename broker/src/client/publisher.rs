//! Publisher client core: opens a bidirectional stream to the broker,
//! sends messages on it, and reads back the broker's per-message
//! acknowledgements.

use std::sync::Arc;
use std::time::Duration;

use broker_common::{Error, Message, MessageReceiver};
use tokio::sync::{oneshot, Mutex};

use crate::transport::{ReadStream, Transport, WriteStream, DEFAULT_READ_BUFFER_SIZE};

use super::{client_endpoint, loopback_addr};

pub struct PublisherClient {
    transport: Transport,
    write_stream: Arc<WriteStream>,
    read_stream: Arc<ReadStream>,
    connection_closed: oneshot::Receiver<()>,
}

impl PublisherClient {
    pub async fn connect(
        port: u16,
        open_timeout: Duration,
        send_timeout: Duration,
    ) -> Result<Self, Error> {
        let endpoint = client_endpoint()?;
        let transport = Transport::connect(&endpoint, loopback_addr(port), "localhost", open_timeout)
            .await?;
        let (write_stream, read_stream) = transport
            .open_read_write_stream(open_timeout, send_timeout, DEFAULT_READ_BUFFER_SIZE)
            .await?;
        let write_stream = Arc::new(write_stream);
        let read_stream = Arc::new(read_stream);

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
            write_stream,
            read_stream,
            connection_closed: rx,
        })
    }

    /// Installs a callback for messages the broker writes back on this
    /// stream (acknowledgements such as "No subscribers are currently
    /// connected").
    pub async fn set_message_receiver(&self, receiver: MessageReceiver) {
        self.read_stream.set_message_receiver(receiver).await;
    }

    pub async fn publish(&self, message: Message) -> Result<(), Error> {
        self.write_stream.send_message(&message).await
    }

    /// Resolves once the broker closes this connection.
    pub fn connection_closed(&mut self) -> &mut oneshot::Receiver<()> {
        &mut self.connection_closed
    }

    pub async fn close(&self) {
        self.write_stream.close_stream().await;
        self.read_stream.close();
        self.transport.close();
    }
}
