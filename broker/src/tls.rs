//! Loads the broker's PEM certificate/key pair into a `rustls::ServerConfig`.
//!
//! Ground: `examples/original_source/lib/certificate/certificate.go`'s
//! `LoadTLSConfig`, which wraps Go's `tls.LoadX509KeyPair`; this is the
//! `rustls`-native equivalent, reading through `rustls-pemfile` instead.

use std::path::Path;
use std::sync::Arc;

use broker_common::Error;

/// Reads a PEM certificate chain and private key from disk and builds a
/// `rustls::ServerConfig` with no client authentication and no ALPN
/// requirement (the broker speaks one thing over QUIC; there's nothing to
/// negotiate).
pub fn load_server_config(
    cert_path: impl AsRef<Path>,
    key_path: impl AsRef<Path>,
) -> Result<Arc<rustls::ServerConfig>, Error> {
    let cert_path = cert_path.as_ref();
    let key_path = key_path.as_ref();

    let cert_bytes = std::fs::read(cert_path)
        .map_err(|err| Error::TransportSetup(format!("reading {}: {err}", cert_path.display())))?;
    let key_bytes = std::fs::read(key_path)
        .map_err(|err| Error::TransportSetup(format!("reading {}: {err}", key_path.display())))?;

    let certs = rustls_pemfile::certs(&mut cert_bytes.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|err| Error::TransportSetup(format!("parsing {}: {err}", cert_path.display())))?;
    if certs.is_empty() {
        return Err(Error::TransportSetup(format!(
            "{} contains no certificates",
            cert_path.display()
        )));
    }

    let key = rustls_pemfile::private_key(&mut key_bytes.as_slice())
        .map_err(|err| Error::TransportSetup(format!("parsing {}: {err}", key_path.display())))?
        .ok_or_else(|| {
            Error::TransportSetup(format!("{} contains no private key", key_path.display()))
        })?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|err| Error::TransportSetup(format!("building TLS config: {err}")))?;

    Ok(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_cert_file_is_a_transport_setup_error() {
        let err = load_server_config("/nonexistent/cert.pem", "/nonexistent/key.pem")
            .expect_err("missing files must error");
        assert!(matches!(err, Error::TransportSetup(_)));
    }

    #[test]
    fn self_signed_pair_loads() {
        let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
            .expect("self-signed cert generation");
        let cert_pem = generated.cert.pem();
        let key_pem = generated.signing_key.serialize_pem();

        let dir = tempfile::tempdir().expect("tempdir");
        let cert_path = dir.path().join("cert.pem");
        let key_path = dir.path().join("key.pem");
        std::fs::write(&cert_path, cert_pem).unwrap();
        std::fs::write(&key_path, key_pem).unwrap();

        load_server_config(&cert_path, &key_path).expect("loading a freshly generated pair");
    }
}
