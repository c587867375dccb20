//! Idle/Running state machine around a `quinn::Endpoint`'s accept loop.
//!
//! Ground: the original `listener.Listener` is explicitly a two-state
//! machine (`Idle`/`Running`) with an idempotent `Shutdown` — calling it
//! on an already-idle listener returns `nil` rather than erroring, and
//! `Start` on an already-running one returns `ErrAlreadyStarted`.

use std::future::Future;
use std::sync::Arc;

use broker_common::Error;
use tokio::sync::Mutex;

enum State {
    Idle,
    Running {
        acceptor: abort_on_drop::ChildTask<()>,
    },
}

pub struct Listener {
    state: Mutex<State>,
}

impl Listener {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::Idle),
        }
    }

    /// Spawns the accept loop. `on_connection` is invoked, un-awaited, for
    /// every inbound handshake attempt; it's responsible for its own error
    /// handling and cleanup.
    pub async fn start<F, Fut>(&self, endpoint: quinn::Endpoint, on_connection: F) -> Result<(), Error>
    where
        F: Fn(quinn::Incoming) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut state = self.state.lock().await;
        if matches!(*state, State::Running { .. }) {
            return Err(Error::AlreadyStarted);
        }
        let on_connection = Arc::new(on_connection);
        let acceptor = tokio::spawn(async move {
            while let Some(incoming) = endpoint.accept().await {
                let on_connection = on_connection.clone();
                tokio::spawn(on_connection(incoming));
            }
        })
        .into();
        *state = State::Running { acceptor };
        Ok(())
    }

    /// Idempotent: shutting down an idle listener is a no-op, matching the
    /// original's behaviour so callers never need to track whether
    /// `start` actually succeeded before calling this.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        if let State::Running { acceptor } = std::mem::replace(&mut *state, State::Idle) {
            acceptor.abort();
        }
    }

    pub async fn is_running(&self) -> bool {
        matches!(*self.state.lock().await, State::Running { .. })
    }
}

impl Default for Listener {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shutdown_before_start_is_a_no_op() {
        let listener = Listener::new();
        listener.shutdown().await;
        assert!(!listener.is_running().await);
    }
}
