//! Shared error type, message model, and peer-closed classification used
//! throughout the broker crate family.
//!
//! Mirrors the role `roslibrust_common` plays for `roslibrust`: backends
//! (here, the single QUIC transport) coerce their failures into one
//! [`Error`] type so the rest of the crate family only has to handle a
//! single error surface.

use quinn::{ConnectionError, ReadError as QuinnReadError, WriteError as QuinnWriteError};

/// Application-level error code used for every locally-initiated stream
/// cancellation and connection close. There is exactly one such code; the
/// broker and its clients never distinguish *why* a peer closed, only
/// *that* it was closed by a local decision rather than the network.
pub const CLOSED_BY_CLIENT: quinn::VarInt = quinn::VarInt::from_u32(0);

/// A single text message relayed between a publisher and the subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    pub text: String,
}

impl Message {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Maps a [`Message`] to the raw bytes sent on the wire.
///
/// There is no framing: the returned buffer is exactly the UTF-8 bytes of
/// `message.text`.
pub fn encode(message: &Message) -> Vec<u8> {
    message.text.clone().into_bytes()
}

/// Maps raw bytes read off the wire back to a [`Message`].
///
/// No validation is performed; invalid UTF-8 is replaced rather than
/// rejected, and an empty buffer decodes to an empty message.
pub fn decode(bytes: &[u8]) -> Message {
    Message {
        text: String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Callback invoked once per message read off a publisher's stream.
///
/// Boxed rather than generic because it crosses task boundaries (the read
/// stream invokes it on a freshly spawned task per message, see
/// `broker::transport::read_stream`).
pub type MessageReceiver = std::sync::Arc<dyn Fn(Message) + Send + Sync>;

/// Errors surfaced directly by the QUIC transport layer.
///
/// Kept distinct from [`Error`] so the peer-closed classifier can match on
/// the concrete `quinn` variants before falling back to the textual quirk
/// described in spec section 9; `Error::Transport` is the form the rest of
/// the crate actually handles.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),
    #[error("write error: {0}")]
    Write(#[from] QuinnWriteError),
    #[error("read error: {0}")]
    Read(#[from] QuinnReadError),
    #[error("connect error: {0}")]
    Connect(#[from] quinn::ConnectError),
    #[error("closed stream: {0}")]
    Closed(#[from] quinn::ClosedStream),
}

/// Returns true iff `err` is the result of the *other* end initiating
/// shutdown, per spec section 4.I.
///
/// Checked in order: a stream error carrying [`CLOSED_BY_CLIENT`], an
/// application-level connection close carrying the same code, and finally
/// a substring match against a known `quinn`/transport-library quirk where
/// a canceled-stream close surfaces with no typed alternative.
pub fn is_peer_closed(err: &TransportError) -> bool {
    match err {
        TransportError::Connection(ConnectionError::ApplicationClosed(close)) => {
            close.error_code == CLOSED_BY_CLIENT
        }
        TransportError::Write(QuinnWriteError::Stopped(code)) => *code == CLOSED_BY_CLIENT,
        TransportError::Write(QuinnWriteError::ConnectionLost(inner)) => {
            is_application_close(inner)
        }
        TransportError::Read(QuinnReadError::Reset(code)) => *code == CLOSED_BY_CLIENT,
        TransportError::Read(QuinnReadError::ConnectionLost(inner)) => is_application_close(inner),
        _ => err.to_string().contains("close called for canceled stream"),
    }
}

fn is_application_close(err: &ConnectionError) -> bool {
    matches!(err, ConnectionError::ApplicationClosed(close) if close.error_code == CLOSED_BY_CLIENT)
}

/// The error taxonomy from spec section 7, flattened into one enum so
/// every public operation in the crate can return `broker_common::Result`.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// UDP bind, QUIC endpoint construction, or TLS config failure.
    #[error("transport setup failed: {0}")]
    TransportSetup(String),
    /// Stream open/accept timed out or was refused.
    #[error("stream open failed: {0}")]
    StreamOpen(#[source] TransportError),
    /// A non-peer-closed read failure.
    #[error("read failed: {0}")]
    Read(#[source] TransportError),
    /// A send failed.
    #[error("write failed: {0}")]
    Write(#[source] TransportError),
    /// A lifecycle operation was attempted twice (e.g. starting a running listener).
    #[error("already started")]
    AlreadyStarted,
    /// A connect, stream-open, or send deadline elapsed.
    #[error("operation timed out: {0}")]
    Timeout(String),
    /// `close()` on the comms controller collected one error per peer that
    /// failed to close cleanly; none of them prevented the others from
    /// being attempted.
    #[error("{} error(s) while shutting down: {}", .0.len(), summarize(.0))]
    ShutdownAggregate(Vec<Error>),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(String),
}

fn summarize(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_of_encode_round_trips() {
        for text in ["", "hello", "unicode: héllo wörld 🚀", "with\nnewlines\t"] {
            let message = Message::new(text);
            assert_eq!(decode(&encode(&message)), message);
        }
    }

    #[test]
    fn decode_empty_buffer_yields_empty_text() {
        assert_eq!(decode(&[]), Message::new(""));
    }

    #[test]
    fn decode_does_not_reject_invalid_utf8() {
        let message = decode(&[0xff, 0xfe, 0x00]);
        assert!(message.text.contains('\u{fffd}'));
    }
}
