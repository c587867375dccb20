//! The broker: two QUIC listeners (one for publishers, one for
//! subscribers) feeding a single [`CommsController`].
//!
//! Ground: `examples/original_source/server/server/server.go` for the
//! `start`/`shutdown` shape and the two-listener split. The rollback
//! behaviour in [`BrokerServer::start`] is a deliberate departure from the
//! original (REDESIGN FLAG, spec section 9): the original leaves the
//! publisher listener running if the subscriber listener fails to start,
//! relying on a later `Shutdown` call to clean it up.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use broker_common::Error;

use crate::config::Config;
use crate::controller::CommsController;
use crate::listener::Listener;
use crate::transport::{Transport, DEFAULT_READ_BUFFER_SIZE};

pub struct BrokerServer {
    config: Config,
    tls_config: Arc<rustls::ServerConfig>,
    controller: Arc<CommsController>,
    publisher_listener: Listener,
    subscriber_listener: Listener,
    publisher_addr: Mutex<Option<SocketAddr>>,
    subscriber_addr: Mutex<Option<SocketAddr>>,
}

impl BrokerServer {
    pub fn new(config: Config, tls_config: Arc<rustls::ServerConfig>) -> Self {
        Self {
            config,
            tls_config,
            controller: CommsController::new(),
            publisher_listener: Listener::new(),
            subscriber_listener: Listener::new(),
            publisher_addr: Mutex::new(None),
            subscriber_addr: Mutex::new(None),
        }
    }

    /// The publisher listener's bound address, available once `start`
    /// has returned successfully. `publisherPort: 0` in the config binds
    /// an OS-assigned ephemeral port, which is why this isn't just
    /// `config.publisher_port` — tests rely on reading the real one back.
    pub fn publisher_addr(&self) -> Option<SocketAddr> {
        *self.publisher_addr.lock().unwrap()
    }

    pub fn subscriber_addr(&self) -> Option<SocketAddr> {
        *self.subscriber_addr.lock().unwrap()
    }

    /// Starts both listeners. If the subscriber listener fails to start
    /// after the publisher one already succeeded, the publisher listener
    /// is shut back down before this returns, so a failed `start()` never
    /// leaves half the broker running.
    pub async fn start(&self) -> Result<(), Error> {
        let publisher_bind_addr: SocketAddr = ([0, 0, 0, 0], self.config.publisher_port).into();
        let subscriber_bind_addr: SocketAddr = ([0, 0, 0, 0], self.config.subscriber_port).into();

        let publisher_endpoint = self.bind(publisher_bind_addr, "publisher")?;
        let publisher_addr = publisher_endpoint
            .local_addr()
            .map_err(|err| Error::TransportSetup(format!("reading publisher local addr: {err}")))?;
        *self.publisher_addr.lock().unwrap() = Some(publisher_addr);

        let controller = self.controller.clone();
        let open_stream_timeout = self.config.open_stream_timeout;
        let send_message_timeout = self.config.send_message_timeout;
        self.publisher_listener
            .start(publisher_endpoint, move |incoming| {
                let controller = controller.clone();
                async move {
                    if let Err(err) = handle_publisher_connection(
                        controller,
                        incoming,
                        send_message_timeout,
                    )
                    .await
                    {
                        log::warn!("publisher connection setup failed: {err}");
                    }
                }
            })
            .await?;

        let subscriber_endpoint = match self.bind(subscriber_bind_addr, "subscriber") {
            Ok(endpoint) => endpoint,
            Err(err) => {
                self.publisher_listener.shutdown().await;
                return Err(err);
            }
        };
        let subscriber_addr = match subscriber_endpoint.local_addr() {
            Ok(addr) => addr,
            Err(err) => {
                self.publisher_listener.shutdown().await;
                return Err(Error::TransportSetup(format!(
                    "reading subscriber local addr: {err}"
                )));
            }
        };
        *self.subscriber_addr.lock().unwrap() = Some(subscriber_addr);

        let controller = self.controller.clone();
        let start_result = self
            .subscriber_listener
            .start(subscriber_endpoint, move |incoming| {
                let controller = controller.clone();
                async move {
                    if let Err(err) = handle_subscriber_connection(
                        controller,
                        incoming,
                        open_stream_timeout,
                        send_message_timeout,
                    )
                    .await
                    {
                        log::warn!("subscriber connection setup failed: {err}");
                    }
                }
            })
            .await;

        if let Err(err) = start_result {
            self.publisher_listener.shutdown().await;
            return Err(err);
        }

        log::info!(
            "broker listening: publishers on {publisher_addr}, subscribers on {subscriber_addr}"
        );
        Ok(())
    }

    /// Stops both listeners, then closes the controller (every publisher
    /// ack stream, every subscriber notifier), bounded by
    /// `gracefulShutdownTimeout`.
    pub async fn shutdown(&self) -> Result<(), Error> {
        self.publisher_listener.shutdown().await;
        self.subscriber_listener.shutdown().await;

        let timeout = self.config.graceful_shutdown_timeout;
        match tokio::time::timeout(timeout, self.controller.close()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "graceful shutdown exceeded {timeout:?}"
            ))),
        }
    }

    fn bind(&self, addr: SocketAddr, label: &str) -> Result<quinn::Endpoint, Error> {
        let quic_crypto = quinn::crypto::rustls::QuicServerConfig::try_from(self.tls_config.clone())
            .map_err(|err| Error::TransportSetup(format!("{label} TLS config: {err}")))?;
        let mut server_config = quinn::ServerConfig::with_crypto(Arc::new(quic_crypto));
        let mut transport = quinn::TransportConfig::default();
        transport.max_idle_timeout(Some(
            Duration::from_secs(60 * 60)
                .try_into()
                .expect("one hour fits in a VarInt"),
        ));
        server_config.transport_config(Arc::new(transport));

        quinn::Endpoint::server(server_config, addr)
            .map_err(|err| Error::TransportSetup(format!("binding {label} port {addr}: {err}")))
    }
}

async fn handle_publisher_connection(
    controller: Arc<CommsController>,
    incoming: quinn::Incoming,
    send_message_timeout: Duration,
) -> Result<(), Error> {
    let transport = Arc::new(
        Transport::accept(incoming)
            .await
            .map_err(Error::StreamOpen)?,
    );
    let (ack, read_stream) = transport
        .accept_read_write_stream(send_message_timeout, DEFAULT_READ_BUFFER_SIZE)
        .await?;
    controller
        .add_publisher(transport, Arc::new(ack), Arc::new(read_stream))
        .await;
    Ok(())
}

async fn handle_subscriber_connection(
    controller: Arc<CommsController>,
    incoming: quinn::Incoming,
    open_stream_timeout: Duration,
    send_message_timeout: Duration,
) -> Result<(), Error> {
    let transport = Arc::new(
        Transport::accept(incoming)
            .await
            .map_err(Error::StreamOpen)?,
    );
    let write_stream = transport
        .open_write_stream(open_stream_timeout, send_message_timeout)
        .await?;
    controller.add_subscriber(transport, Arc::new(write_stream)).await;
    Ok(())
}
