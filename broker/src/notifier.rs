//! Per-subscriber delivery queue and worker.
//!
//! Ground: the original `notifier.go` holds a buffered channel (capacity
//! `DefaultMessageBufferSize` = 100) and a goroutine that drains it onto
//! the subscriber's connection, non-blockingly dropping a message (with a
//! warning log) when the channel is full rather than applying back
//! pressure to the publisher.

use std::sync::Arc;

use broker_common::{Error, Message};
use deadqueue::limited::Queue;

use crate::transport::WriteStream;

const NOTIFIER_QUEUE_CAPACITY: usize = 100;

/// Invoked once, from a fresh task, the first time a send to the
/// subscriber fails. Not present in the original; added so the comms
/// controller can evict the subscriber's registry entry as soon as the
/// connection is known dead instead of only on the next publish.
pub type ConnLostCallback = Arc<dyn Fn() + Send + Sync>;

enum Item {
    Message(Message),
    Stop,
}

pub struct Notifier {
    queue: Arc<Queue<Item>>,
    write_stream: Arc<WriteStream>,
    worker: abort_on_drop::ChildTask<()>,
}

impl Notifier {
    pub fn spawn(write_stream: Arc<WriteStream>, conn_lost_callback: ConnLostCallback) -> Self {
        let queue = Arc::new(Queue::new(NOTIFIER_QUEUE_CAPACITY));
        let worker_queue = queue.clone();
        let worker_stream = write_stream.clone();
        let worker = tokio::spawn(async move {
            loop {
                match worker_queue.pop().await {
                    Item::Stop => return,
                    Item::Message(message) => {
                        if let Err(err) = worker_stream.send_message(&message).await {
                            log::warn!("notifier: dropping subscriber after send failure: {err}");
                            let callback = conn_lost_callback.clone();
                            tokio::spawn(async move { callback() });
                            return;
                        }
                    }
                }
            }
        })
        .into();
        Self { queue, write_stream, worker }
    }

    /// Non-blocking: drops the message and logs a warning if the queue is
    /// already full, rather than applying back pressure to the publisher
    /// dispatching it.
    pub fn queue_message(&self, message: Message) {
        if self.queue.try_push(Item::Message(message)).is_err() {
            log::warn!("notifier queue full ({NOTIFIER_QUEUE_CAPACITY}), dropping message");
        }
    }

    /// Asks the worker to stop after draining whatever's already queued.
    /// Best-effort: if the queue happens to be full of undelivered
    /// messages the stop sentinel is dropped along with them and the
    /// worker is aborted instead once this returns.
    pub fn stop(&self) {
        if self.queue.try_push(Item::Stop).is_err() {
            self.worker.abort();
        }
    }

    /// Stops the worker and closes the underlying stream, surfacing any
    /// non-peer-closed close failure to the caller. Used by the comms
    /// controller's `close()`, which aggregates close errors across every
    /// peer instead of only logging them.
    pub async fn close(&self) -> Result<(), Error> {
        self.stop();
        self.write_stream.close_stream_checked().await
    }
}
