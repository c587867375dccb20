//! The read half of a stream: one reader task decodes messages off a
//! `quinn::RecvStream` until the peer closes it, dispatching each to a
//! settable receiver.
//!
//! Ground: the original `readStream` guards its `MessageReceiver`,
//! `ConnClosedCallback`, and read buffer size behind a `sync.RWMutex` so
//! they can be changed after the stream is already running; this is the
//! same shape with `tokio::sync::RwLock`.

use std::sync::Arc;

use broker_common::{decode, is_peer_closed, Message, MessageReceiver, TransportError};
use tokio::sync::RwLock;

/// Fired exactly once, the first time the stream observes the peer closed
/// it (either a clean end-of-stream or a reset carrying the shared
/// closed-by-client code).
pub type ConnClosedCallback = Arc<dyn Fn() + Send + Sync>;

/// 1 MiB, matching the original's `DefaultReadBufferSize`.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024 * 1024;

struct State {
    message_receiver: Option<MessageReceiver>,
    conn_closed_callback: Option<ConnClosedCallback>,
    read_buffer_size: usize,
}

pub struct ReadStream {
    state: Arc<RwLock<State>>,
    reader_task: abort_on_drop::ChildTask<()>,
}

impl ReadStream {
    pub fn spawn(recv: quinn::RecvStream, read_buffer_size: usize) -> Self {
        let state = Arc::new(RwLock::new(State {
            message_receiver: None,
            conn_closed_callback: None,
            read_buffer_size,
        }));
        let task_state = state.clone();
        let reader_task = tokio::spawn(Self::run(recv, task_state)).into();
        Self { state, reader_task }
    }

    pub async fn set_message_receiver(&self, receiver: MessageReceiver) {
        self.state.write().await.message_receiver = Some(receiver);
    }

    pub async fn set_conn_closed_callback(&self, callback: ConnClosedCallback) {
        self.state.write().await.conn_closed_callback = Some(callback);
    }

    pub async fn set_read_buffer_size(&self, size: usize) {
        self.state.write().await.read_buffer_size = size;
    }

    /// Stops the reader task without waiting for the peer. Does not itself
    /// fire the conn-closed callback; the caller already knows why it's
    /// closing.
    pub fn close(&self) {
        self.reader_task.abort();
    }

    async fn run(mut recv: quinn::RecvStream, state: Arc<RwLock<State>>) {
        loop {
            let buffer_size = state.read().await.read_buffer_size;
            let mut buffer = vec![0u8; buffer_size];
            match recv.read(&mut buffer).await {
                Ok(Some(n)) => Self::dispatch(&state, decode(&buffer[..n])).await,
                Ok(None) => {
                    Self::fire_closed(&state).await;
                    return;
                }
                Err(err) => {
                    let transport_err = TransportError::from(err);
                    if is_peer_closed(&transport_err) {
                        Self::fire_closed(&state).await;
                    } else {
                        // Per spec: a non-peer-closed read error just logs
                        // and terminates this reader. The controller learns
                        // the peer is gone lazily, the next time a send to
                        // it fails — it does not get an immediate callback
                        // here the way a clean peer close does.
                        log::warn!("read stream error: {transport_err}");
                    }
                    return;
                }
            }
        }
    }

    async fn dispatch(state: &Arc<RwLock<State>>, message: Message) {
        let receiver = state.read().await.message_receiver.clone();
        if let Some(receiver) = receiver {
            tokio::spawn(async move { receiver(message) });
        }
    }

    async fn fire_closed(state: &Arc<RwLock<State>>) {
        let callback = state.read().await.conn_closed_callback.clone();
        if let Some(callback) = callback {
            tokio::spawn(async move { callback() });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::DEFAULT_READ_BUFFER_SIZE;

    #[test]
    fn default_read_buffer_size_is_one_mebibyte() {
        assert_eq!(DEFAULT_READ_BUFFER_SIZE, 1024 * 1024);
    }
}
