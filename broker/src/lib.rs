//! A text message broker over QUIC: publishers fan text messages out to
//! every connected subscriber.
//!
//! Mirrors the shape of `roslibrust`: a thin `broker-common` crate carries
//! the shared `Error`/`Message` types, and this crate holds the transport,
//! the dispatch logic, and the binaries that wire them together.

pub mod client;
pub mod config;
pub mod controller;
pub mod listener;
pub mod notifier;
pub mod server;
pub mod tls;
pub mod transport;

pub use broker_common::{decode, encode, Error, Message, MessageReceiver, Result};
