//! Ties publishers and subscribers together: every publisher and every
//! subscriber gets its own [`Notifier`]; publisher notifiers carry only
//! the three population-change notices, subscriber notifiers carry the
//! greeting plus every message a publisher sends in. A single dispatcher
//! task drains the plain message inbox into every connected subscriber's
//! notifier.
//!
//! Ground: `examples/original_source/server/server/controller/
//! comms_controller.go` for the registries, the inbox, and the literal
//! strings below; `abort-on-drop` task ownership follows `roslibrust`'s
//! `Publication` (`ros1/publisher.rs`).

use std::collections::HashMap;
use std::sync::Arc;

use broker_common::{Error, Message};
use deadqueue::limited::Queue;
use tokio::sync::RwLock;

use crate::notifier::Notifier;
use crate::transport::{PeerId, ReadStream, Transport, WriteStream};

const INBOX_CAPACITY: usize = 100;

const MESSAGE_NO_SUBSCRIBERS: &str = "No subscribers are currently connected";
const MESSAGE_NEW_SUBSCRIBER: &str = "New subscriber connected";
const MESSAGE_GREETING: &str = "Hello from server! You're all set.";

enum InboxItem {
    Message(Message),
    Stop,
}

struct PublisherEntry {
    notifier: Arc<Notifier>,
    transport: Arc<Transport>,
}

struct SubscriberEntry {
    notifier: Arc<Notifier>,
    transport: Arc<Transport>,
}

pub struct CommsController {
    publishers: Arc<RwLock<HashMap<PeerId, PublisherEntry>>>,
    subscribers: Arc<RwLock<HashMap<PeerId, SubscriberEntry>>>,
    inbox: Arc<Queue<InboxItem>>,
    dispatcher: abort_on_drop::ChildTask<()>,
}

impl CommsController {
    pub fn new() -> Arc<Self> {
        let inbox = Arc::new(Queue::new(INBOX_CAPACITY));
        let subscribers: Arc<RwLock<HashMap<PeerId, SubscriberEntry>>> =
            Arc::new(RwLock::new(HashMap::new()));
        let publishers: Arc<RwLock<HashMap<PeerId, PublisherEntry>>> =
            Arc::new(RwLock::new(HashMap::new()));

        let dispatcher_inbox = inbox.clone();
        let dispatcher_subscribers = subscribers.clone();
        let dispatcher = tokio::spawn(Self::dispatch(dispatcher_inbox, dispatcher_subscribers)).into();

        Arc::new(Self {
            publishers,
            subscribers,
            inbox,
            dispatcher,
        })
    }

    /// Registers a publisher's bidirectional stream: `write_stream` backs
    /// a notifier carrying only population-change notices (no
    /// `connLostCallback` — a publisher's liveness is driven by its read
    /// side, below); messages read off `read_stream` are queued for the
    /// dispatcher; `read_stream` closing deregisters the publisher.
    pub async fn add_publisher(
        self: &Arc<Self>,
        transport: Arc<Transport>,
        write_stream: Arc<WriteStream>,
        read_stream: Arc<ReadStream>,
    ) {
        let peer_id = transport.peer_id().clone();
        let notifier = Arc::new(Notifier::spawn(write_stream, Arc::new(|| {})));

        let controller = self.clone();
        read_stream
            .set_message_receiver(Arc::new(move |message| {
                controller.publish(message);
            }))
            .await;

        let controller = self.clone();
        let closed_peer_id = peer_id.clone();
        read_stream
            .set_conn_closed_callback(Arc::new(move || {
                let controller = controller.clone();
                let peer_id = closed_peer_id.clone();
                tokio::spawn(async move { controller.remove_publisher(&peer_id).await });
            }))
            .await;

        self.publishers.write().await.insert(
            peer_id.clone(),
            PublisherEntry { notifier: notifier.clone(), transport },
        );

        let subscriber_count = self.subscribers.read().await.len();
        notifier.queue_message(Message::new(population_notice(subscriber_count)));

        log::info!("publisher connected: {peer_id}");
    }

    /// Called by a publisher's read-stream `MessageReceiver`: pushes the
    /// message onto the shared inbox. Non-blocking, matching the
    /// original's buffered-channel overflow behaviour.
    fn publish(&self, message: Message) {
        if self.inbox.try_push(InboxItem::Message(message)).is_err() {
            log::warn!("comms controller inbox full ({INBOX_CAPACITY}), dropping message");
        }
    }

    /// Registers a subscriber's write-only stream behind a fresh
    /// [`Notifier`], greets it, and tells every connected publisher a new
    /// subscriber joined. The notifier deregisters the subscriber itself
    /// the first time a send to it fails.
    pub async fn add_subscriber(self: &Arc<Self>, transport: Arc<Transport>, write_stream: Arc<WriteStream>) {
        let peer_id = transport.peer_id().clone();

        let controller = self.clone();
        let lost_peer_id = peer_id.clone();
        let conn_lost_callback: crate::notifier::ConnLostCallback = Arc::new(move || {
            let controller = controller.clone();
            let peer_id = lost_peer_id.clone();
            tokio::spawn(async move { controller.remove_subscriber(&peer_id).await });
        });

        let notifier = Arc::new(Notifier::spawn(write_stream, conn_lost_callback));
        notifier.queue_message(Message::new(MESSAGE_GREETING));

        {
            let publishers = self.publishers.read().await;
            for entry in publishers.values() {
                entry.notifier.queue_message(Message::new(MESSAGE_NEW_SUBSCRIBER));
            }
        }

        self.subscribers.write().await.insert(
            peer_id.clone(),
            SubscriberEntry { notifier, transport },
        );
        log::info!("subscriber connected: {peer_id}");
    }

    pub async fn remove_publisher(&self, peer_id: &PeerId) {
        if let Some(entry) = self.publishers.write().await.remove(peer_id) {
            entry.notifier.stop();
            entry.transport.close();
            log::info!("publisher disconnected: {peer_id}");
        }
    }

    /// Removes the subscriber and, if that empties the subscriber set,
    /// tells every publisher there are no subscribers left. The
    /// emptiness check happens under the same write-lock acquisition
    /// that performs the removal, then the lock is released before
    /// fanning out to publishers.
    pub async fn remove_subscriber(&self, peer_id: &PeerId) {
        let (removed, now_empty) = {
            let mut subscribers = self.subscribers.write().await;
            let removed = subscribers.remove(peer_id);
            (removed, subscribers.is_empty())
        };

        let Some(entry) = removed else { return };
        entry.notifier.stop();
        entry.transport.close();
        log::info!("subscriber disconnected: {peer_id}");

        if now_empty {
            let publishers = self.publishers.read().await;
            for entry in publishers.values() {
                entry.notifier.queue_message(Message::new(MESSAGE_NO_SUBSCRIBERS));
            }
        }
    }

    /// Snapshots the subscriber registry under a read lock, releases the
    /// lock, then fans the message out — so a slow or stuck subscriber
    /// send can never hold the registry lock and stall new
    /// connections/disconnections. Publishers never receive the messages
    /// dispatched here, only the population-change notices queued
    /// directly on their own notifier by `add_publisher`/`add_subscriber`/
    /// `remove_subscriber`.
    async fn dispatch(
        inbox: Arc<Queue<InboxItem>>,
        subscribers: Arc<RwLock<HashMap<PeerId, SubscriberEntry>>>,
    ) {
        loop {
            let message = match inbox.pop().await {
                InboxItem::Stop => return,
                InboxItem::Message(message) => message,
            };

            let notifiers: Vec<Arc<Notifier>> = {
                let guard = subscribers.read().await;
                guard.values().map(|entry| entry.notifier.clone()).collect()
            };

            for notifier in &notifiers {
                notifier.queue_message(message.clone());
            }
        }
    }

    /// Stops the dispatcher, then every notifier, subscribers first and
    /// publishers second so no further fan-out send is attempted into an
    /// already-closed peer. Collects (rather than short-circuits on)
    /// individual close failures so one stuck peer can't prevent the rest
    /// from being torn down cleanly.
    pub async fn close(&self) -> Result<(), Error> {
        if self.inbox.try_push(InboxItem::Stop).is_err() {
            self.dispatcher.abort();
        }

        let mut errors = Vec::new();

        for (peer_id, entry) in self.subscribers.write().await.drain() {
            if let Err(err) = entry.notifier.close().await {
                errors.push(err);
            }
            entry.transport.close();
            log::debug!("closed subscriber {peer_id}");
        }

        for (peer_id, entry) in self.publishers.write().await.drain() {
            if let Err(err) = entry.notifier.close().await {
                errors.push(err);
            }
            entry.transport.close();
            log::debug!("closed publisher {peer_id}");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::ShutdownAggregate(errors))
        }
    }
}

fn population_notice(subscriber_count: usize) -> String {
    if subscriber_count == 0 {
        MESSAGE_NO_SUBSCRIBERS.to_string()
    } else {
        format!("{subscriber_count} subscriber(s) currently connected")
    }
}
