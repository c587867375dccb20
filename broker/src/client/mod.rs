//! Minimal publisher/subscriber client cores, used by the `publisher` and
//! `subscriber` binaries and by the integration tests.
//!
//! Ground: `examples/original_source/client/publisher/client/client.go`
//! and `client/subscriber/client/client.go` for the `Start`/
//! `SetMessageReceiver`/`Close` shape, with the original's
//! `connectionClosed chan struct{}` replaced by a `tokio::sync::oneshot`
//! latch that can only fire once.

pub mod publisher;
pub mod subscriber;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use broker_common::Error;

pub(crate) fn loopback_addr(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

pub(crate) fn client_endpoint() -> Result<quinn::Endpoint, Error> {
    let client_config = crate::transport::insecure_client_config()?;
    let mut endpoint =
        quinn::Endpoint::client(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0))
            .map_err(|err| Error::TransportSetup(format!("binding client socket: {err}")))?;
    endpoint.set_default_client_config(client_config);
    Ok(endpoint)
}
