//! The write half of a stream: serializes sends behind a mutex (QUIC
//! streams are exclusively owned, but several call sites — notifier
//! worker, ack path, `closeStream` — all reach the same stream) and
//! applies an optional per-send deadline.

use std::time::Duration;

use broker_common::{encode, is_peer_closed, Error, Message, TransportError};
use tokio::sync::{Mutex, RwLock};

pub struct WriteStream {
    send: Mutex<quinn::SendStream>,
    send_timeout: RwLock<Duration>,
}

impl WriteStream {
    pub fn new(send: quinn::SendStream, send_timeout: Duration) -> Self {
        Self {
            send: Mutex::new(send),
            send_timeout: RwLock::new(send_timeout),
        }
    }

    pub async fn set_send_message_timeout(&self, timeout: Duration) {
        *self.send_timeout.write().await = timeout;
    }

    /// Applies the configured deadline only when it's non-zero, per spec
    /// section 4.D: a zero timeout means "wait as long as it takes".
    pub async fn send_message(&self, message: &Message) -> Result<(), Error> {
        let bytes = encode(message);
        let timeout = *self.send_timeout.read().await;
        let mut send = self.send.lock().await;

        let write = async {
            send.write_all(&bytes)
                .await
                .map_err(|err| Error::Write(TransportError::from(err)))
        };

        if timeout > Duration::ZERO {
            tokio::time::timeout(timeout, write)
                .await
                .map_err(|_| Error::Timeout(format!("send did not complete within {timeout:?}")))?
        } else {
            write.await
        }
    }

    /// Cancels the stream with the shared closed-by-client code. A
    /// cancel against a stream the peer already reset is not treated as a
    /// failure. Logs and swallows any other error.
    pub async fn close_stream(&self) {
        if let Err(err) = self.close_stream_checked().await {
            log::warn!("close stream: {err}");
        }
    }

    /// Same as [`Self::close_stream`], but surfaces a non-peer-closed
    /// failure to the caller instead of only logging it. Used where the
    /// caller aggregates close failures, e.g. the comms controller's
    /// `close()`.
    pub async fn close_stream_checked(&self) -> Result<(), Error> {
        let mut send = self.send.lock().await;
        match send.reset(broker_common::CLOSED_BY_CLIENT) {
            Ok(()) => Ok(()),
            Err(err) => {
                let transport_err = TransportError::from(err);
                if is_peer_closed(&transport_err) {
                    Ok(())
                } else {
                    Err(Error::Write(transport_err))
                }
            }
        }
    }
}
