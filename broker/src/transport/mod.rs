//! QUIC transport adapter. Wraps a single `quinn::Connection` and exposes
//! the stream-open/accept operations the rest of the crate needs, without
//! leaking `quinn` types past this module's boundary.
//!
//! Ground: `quinn::Connection`'s `open_bi`/`accept_bi`/`open_uni`/
//! `accept_uni` shape, and deriving a stable per-connection id from
//! `remote_address()` + `stable_id()`, both follow the connection wrapper
//! in the retrieval pack's `maidsafe-safe_network` example.

pub mod read_stream;
pub mod write_stream;

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use broker_common::{Error, TransportError};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};

pub use read_stream::{ConnClosedCallback, ReadStream, DEFAULT_READ_BUFFER_SIZE};
pub use write_stream::WriteStream;

/// Opaque identity for one QUIC connection, used as the key into the
/// publisher/subscriber registries. Not stable across reconnects: a peer
/// that disconnects and reconnects gets a new id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerId(String);

impl PeerId {
    fn from_connection(connection: &quinn::Connection) -> Self {
        PeerId(format!(
            "{}#{}",
            connection.remote_address(),
            connection.stable_id()
        ))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One QUIC connection, already past the handshake.
pub struct Transport {
    connection: quinn::Connection,
    peer_id: PeerId,
}

impl Transport {
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Completes the handshake for an inbound connection accepted by a
    /// [`crate::listener::Listener`].
    pub async fn accept(incoming: quinn::Incoming) -> Result<Self, TransportError> {
        let connection = incoming.await?;
        let peer_id = PeerId::from_connection(&connection);
        Ok(Self { connection, peer_id })
    }

    /// Dials `addr`, bounding the whole connect (UDP socket creation through
    /// handshake completion) by `deadline`.
    pub async fn connect(
        endpoint: &quinn::Endpoint,
        addr: SocketAddr,
        server_name: &str,
        deadline: Duration,
    ) -> Result<Self, Error> {
        let connecting = endpoint
            .connect(addr, server_name)
            .map_err(|err| Error::TransportSetup(err.to_string()))?;
        let connection = with_timeout(deadline, connecting).await?;
        let peer_id = PeerId::from_connection(&connection);
        Ok(Self { connection, peer_id })
    }

    /// Opens a unidirectional stream this side writes to. Used by the
    /// broker to push messages to a subscriber, and by publisher clients
    /// for a transport that doesn't need a reply channel.
    pub async fn open_write_stream(
        &self,
        open_timeout: Duration,
        send_timeout: Duration,
    ) -> Result<WriteStream, Error> {
        let send = with_timeout(open_timeout, self.connection.open_uni()).await?;
        Ok(WriteStream::new(send, send_timeout))
    }

    /// Accepts a unidirectional stream the peer opened, spawning a reader
    /// task that decodes messages off it until the peer closes it.
    pub async fn accept_read_stream(
        &self,
        read_buffer_size: usize,
    ) -> Result<ReadStream, Error> {
        let recv = self
            .connection
            .accept_uni()
            .await
            .map_err(TransportError::from)
            .map_err(Error::StreamOpen)?;
        Ok(ReadStream::spawn(recv, read_buffer_size))
    }

    /// Opens a bidirectional stream: used by publisher clients, who both
    /// send messages and read broker acknowledgements on the same stream.
    pub async fn open_read_write_stream(
        &self,
        open_timeout: Duration,
        send_timeout: Duration,
        read_buffer_size: usize,
    ) -> Result<(WriteStream, ReadStream), Error> {
        let (send, recv) = with_timeout(open_timeout, self.connection.open_bi()).await?;
        Ok((
            WriteStream::new(send, send_timeout),
            ReadStream::spawn(recv, read_buffer_size),
        ))
    }

    /// Accepts a bidirectional stream the peer opened: the broker side of
    /// a publisher connection.
    pub async fn accept_read_write_stream(
        &self,
        send_timeout: Duration,
        read_buffer_size: usize,
    ) -> Result<(WriteStream, ReadStream), Error> {
        let (send, recv) = self
            .connection
            .accept_bi()
            .await
            .map_err(TransportError::from)
            .map_err(Error::StreamOpen)?;
        Ok((
            WriteStream::new(send, send_timeout),
            ReadStream::spawn(recv, read_buffer_size),
        ))
    }

    /// Closes the underlying connection with the shared closed-by-client
    /// code. Best-effort: nothing downstream treats a double-close as an
    /// error, `quinn` included.
    pub fn close(&self) {
        self.connection
            .close(broker_common::CLOSED_BY_CLIENT, b"closed by peer");
    }
}

/// Every connect/open-stream operation on a `quinn::Connection` fails with
/// `ConnectionError`, so one helper covers all of them: apply `duration`,
/// and fold both the timeout and the underlying connection error into
/// `broker_common::Error`.
async fn with_timeout<F, T>(duration: Duration, future: F) -> Result<T, Error>
where
    F: std::future::Future<Output = std::result::Result<T, quinn::ConnectionError>>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(Error::StreamOpen(TransportError::from(err))),
        Err(_) => Err(Error::Timeout(format!("no response within {duration:?}"))),
    }
}

/// Builds the client-side QUIC endpoint used by `connect`, with
/// certificate verification disabled.
///
/// This is the Open Question flagged in spec section 9: the broker never
/// asks clients to authenticate, and clients never validate the broker's
/// certificate beyond "a TLS handshake completed". Isolated here so a
/// future mTLS/pinned-CA rewrite has exactly one call site to change.
pub fn insecure_client_config() -> Result<quinn::ClientConfig, Error> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut tls_config = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|err| Error::TransportSetup(err.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(InsecureServerCertVerifier(provider)))
        .with_no_client_auth();
    tls_config.enable_early_data = false;
    let quic_crypto = quinn::crypto::rustls::QuicClientConfig::try_from(tls_config)
        .map_err(|err| Error::TransportSetup(err.to_string()))?;
    let mut client_config = quinn::ClientConfig::new(Arc::new(quic_crypto));
    let mut transport = quinn::TransportConfig::default();
    transport.max_idle_timeout(Some(
        Duration::from_secs(60 * 60)
            .try_into()
            .expect("one hour fits in a VarInt"),
    ));
    client_config.transport_config(Arc::new(transport));
    Ok(client_config)
}

/// Accepts any server certificate without validating it. See
/// [`insecure_client_config`]'s doc comment: not suitable for a
/// deployment that needs to authenticate the broker.
#[derive(Debug)]
struct InsecureServerCertVerifier(Arc<rustls::crypto::CryptoProvider>);

impl rustls::client::danger::ServerCertVerifier for InsecureServerCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
