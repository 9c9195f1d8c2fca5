//! TLS over TCP (spec §3/§4.C7).
//!
//! Grounded in the teacher crate's mio/`socket2` non-blocking-socket style
//! (kept from `tcp.rs`) plus the standard `rustls` "BIO pump" pattern: the
//! connection object only produces/consumes plaintext and opaque
//! ciphertext buffers, and something else is responsible for shuttling the
//! ciphertext to/from the wire. Here that something else is the already
//! non-blocking [`TcpSocket`] — every read notifier pumps the socket's
//! buffered ciphertext into `rustls::ClientConnection::read_tls`, and every
//! write notifier drains whatever `write_tls` has queued back out.
//!
//! `rustls` substitutes for the original's OpenSSL dependency (spec §9);
//! `VerificationMode::None` is implemented via a custom
//! `rustls::client::ServerCertVerifier` rather than OpenSSL's
//! `SSL_VERIFY_NONE` flag. `PeerIfPresent` collapses onto `Peer`: a TLS
//! client handshake always receives and must validate a server
//! certificate, so "accept if absent" (meaningful for a server verifying
//! an optional client cert) has no distinct behavior to implement here.
//! Separately, this client can itself *present* a certificate for mutual
//! TLS when `TlsConfig::client_cert_pem_path`/`client_key_pem_path` are
//! set, via `with_client_auth_cert`.

use crate::config::{TlsConfig, VerificationMode};
use crate::error::{Error, Result, TlsErrorKind};
use crate::net::tcp::{SocketState, TcpSocket};
use crate::reactor::Reactor;
use crate::signal::Signal;
use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{ClientConfig, ClientConnection, RootCertStore, ServerName};
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use tracing::{trace, warn};

struct NoVerification;

impl ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::Certificate,
        _intermediates: &[rustls::Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}

/// Load a PEM client certificate chain and private key, for mutual TLS
/// (spec §4.C7 step 1 "client cert"; original `ssl_socket.h`'s
/// `setClientCertificate`).
fn load_client_auth_cert(cert_path: &str, key_path: &str) -> Result<(Vec<rustls::Certificate>, rustls::PrivateKey)> {
    let cert_pem = std::fs::read(cert_path)
        .map_err(|e| Error::tls(TlsErrorKind::HandshakeFailed, format!("reading client cert {cert_path}: {e}")))?;
    let mut cert_reader = std::io::BufReader::new(cert_pem.as_slice());
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .map_err(|e| Error::tls(TlsErrorKind::HandshakeFailed, format!("parsing client cert {cert_path}: {e}")))?
        .into_iter()
        .map(rustls::Certificate)
        .collect();

    let key_pem = std::fs::read(key_path)
        .map_err(|e| Error::tls(TlsErrorKind::HandshakeFailed, format!("reading client key {key_path}: {e}")))?;
    let mut key_reader = std::io::BufReader::new(key_pem.as_slice());
    let mut keys = rustls_pemfile::pkcs8_private_keys(&mut key_reader)
        .map_err(|e| Error::tls(TlsErrorKind::HandshakeFailed, format!("parsing client key {key_path}: {e}")))?;
    if keys.is_empty() {
        key_reader = std::io::BufReader::new(key_pem.as_slice());
        keys = rustls_pemfile::rsa_private_keys(&mut key_reader)
            .map_err(|e| Error::tls(TlsErrorKind::HandshakeFailed, format!("parsing client key {key_path}: {e}")))?;
    }
    let key = keys
        .into_iter()
        .next()
        .map(rustls::PrivateKey)
        .ok_or_else(|| Error::tls(TlsErrorKind::HandshakeFailed, format!("no private key found in {key_path}")))?;

    Ok((certs, key))
}

fn build_client_config(config: &TlsConfig) -> Result<Arc<ClientConfig>> {
    let builder = ClientConfig::builder().with_safe_defaults();
    let client_auth = match (&config.client_cert_pem_path, &config.client_key_pem_path) {
        (Some(cert_path), Some(key_path)) => Some(load_client_auth_cert(cert_path, key_path)?),
        _ => None,
    };

    if config.verification == VerificationMode::None {
        let builder = builder.with_custom_certificate_verifier(Arc::new(NoVerification));
        let mut client_config = match client_auth {
            Some((certs, key)) => builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| Error::tls(TlsErrorKind::HandshakeFailed, format!("client auth cert: {e}")))?,
            None => builder.with_no_client_auth(),
        };
        client_config.enable_sni = true;
        return Ok(Arc::new(client_config));
    }

    let mut roots = RootCertStore::empty();
    roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
        rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(ta.subject, ta.spki, ta.name_constraints)
    }));

    for path in &config.extra_ca_pem_paths {
        let pem = std::fs::read(path)
            .map_err(|e| Error::tls(TlsErrorKind::HandshakeFailed, format!("reading CA file {path}: {e}")))?;
        let mut reader = std::io::BufReader::new(pem.as_slice());
        let certs = rustls_pemfile::certs(&mut reader)
            .map_err(|e| Error::tls(TlsErrorKind::HandshakeFailed, format!("parsing CA file {path}: {e}")))?;
        for cert in certs {
            roots
                .add(&rustls::Certificate(cert))
                .map_err(|e| Error::tls(TlsErrorKind::HandshakeFailed, format!("adding CA from {path}: {e}")))?;
        }
    }

    let builder = builder.with_root_certificates(roots);
    let client_config = match client_auth {
        Some((certs, key)) => builder
            .with_client_auth_cert(certs, key)
            .map_err(|e| Error::tls(TlsErrorKind::HandshakeFailed, format!("client auth cert: {e}")))?,
        None => builder.with_no_client_auth(),
    };

    Ok(Arc::new(client_config))
}

struct Inner {
    conn: ClientConnection,
    tcp: TcpSocket,
    plaintext_in: Vec<u8>,
    handshake_done: bool,
    handshake_completed: Signal<()>,
    handshake_error: Signal<String>,
    data_received: Signal<usize>,
}

/// A TLS client connection layered over a [`TcpSocket`]. Created once the
/// underlying socket reaches `SocketState::Connected`; driven by the same
/// notifiers via `pump`, which the caller invokes after every
/// `TcpSocket::on_bytes_received`/`on_bytes_written` signal.
#[derive(Clone)]
pub struct TlsSocket {
    inner: Arc<Mutex<Inner>>,
}

impl TlsSocket {
    /// Wrap an already-connected `tcp` socket and begin the TLS
    /// handshake, using `server_name` for SNI and certificate verification.
    pub fn connect(tcp: TcpSocket, server_name: &str, config: &TlsConfig) -> Result<Self> {
        if tcp.state() != SocketState::Connected {
            return Err(Error::tls(TlsErrorKind::HandshakeFailed, "tls requires an already-connected tcp socket"));
        }
        let client_config = build_client_config(config)?;
        let name = ServerName::try_from(server_name)
            .map_err(|e| Error::tls(TlsErrorKind::HandshakeFailed, format!("invalid server name {server_name}: {e}")))?;
        let conn = ClientConnection::new(client_config, name)
            .map_err(|e| Error::tls(TlsErrorKind::HandshakeFailed, format!("{e}")))?;

        let socket = Self {
            inner: Arc::new(Mutex::new(Inner {
                conn,
                tcp,
                plaintext_in: Vec::new(),
                handshake_done: false,
                handshake_completed: Signal::new(),
                handshake_error: Signal::new(),
                data_received: Signal::new(),
            })),
        };
        socket.pump(None)?;
        Ok(socket)
    }

    /// Drive the TLS state machine one step: feed any newly-arrived
    /// ciphertext from the TCP socket into `rustls`, extract plaintext, and
    /// flush any outgoing ciphertext `rustls` has queued back to the
    /// socket. Call after every TCP readiness notification and after
    /// `write`.
    pub fn pump(&self, reactor: Option<&mut Reactor>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let incoming = inner.tcp.read_all();
        if !incoming.is_empty() {
            let mut cursor = incoming.as_slice();
            match inner.conn.read_tls(&mut cursor) {
                Ok(0) => {}
                Ok(_) => {
                    if let Err(e) = inner.conn.process_new_packets() {
                        let message = format!("tls record processing failed: {e}");
                        warn!(%message);
                        inner.handshake_error.emit(message.clone());
                        return Err(Error::tls(TlsErrorKind::HandshakeFailed, message));
                    }
                    let mut plaintext = Vec::new();
                    match inner.conn.reader().read_to_end(&mut plaintext) {
                        Ok(_) | Err(_) if !plaintext.is_empty() => {
                            inner.plaintext_in.extend_from_slice(&plaintext);
                            let len = inner.plaintext_in.len();
                            inner.data_received.emit(len);
                        }
                        _ => {}
                    }
                }
                Err(e) => {
                    let message = format!("tls read failed: {e}");
                    warn!(%message);
                    inner.handshake_error.emit(message.clone());
                    return Err(Error::tls(TlsErrorKind::Io, message));
                }
            }
        }

        if !inner.handshake_done && !inner.conn.is_handshaking() {
            inner.handshake_done = true;
            trace!("tls handshake completed");
            inner.handshake_completed.emit(());
        }

        let mut outgoing = Vec::new();
        while inner.conn.wants_write() {
            match inner.conn.write_tls(&mut outgoing) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    let message = format!("tls write serialization failed: {e}");
                    warn!(%message);
                    return Err(Error::tls(TlsErrorKind::Io, message));
                }
            }
        }
        if !outgoing.is_empty() {
            if let Some(reactor) = reactor {
                inner.tcp.write(reactor, &outgoing);
            } else {
                warn!("tls has outgoing ciphertext to send but no reactor handle was supplied to pump()");
            }
        }
        Ok(())
    }

    /// Encrypt and queue `data` for transmission. Call `pump` afterward
    /// (with a reactor reference) to actually flush it to the socket.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .conn
            .writer()
            .write_all(data)
            .map_err(|e| Error::tls(TlsErrorKind::Io, format!("tls plaintext buffering failed: {e}")))
    }

    /// Remove and return every decrypted byte received so far.
    pub fn read_all(&self) -> Vec<u8> {
        let mut inner = self.inner.lock().unwrap();
        std::mem::take(&mut inner.plaintext_in)
    }

    /// Whether the handshake has completed.
    pub fn is_handshake_complete(&self) -> bool {
        self.inner.lock().unwrap().handshake_done
    }

    /// The underlying TCP socket this TLS session is layered over. Cheap
    /// clone (shares the same `Arc<Mutex<_>>`); used by
    /// [`crate::net::Transport`] to expose connect state/signals uniformly
    /// across plain and TLS transports.
    pub fn tcp(&self) -> TcpSocket {
        self.inner.lock().unwrap().tcp.clone()
    }

    /// The negotiated ALPN protocol, if any (used by the HTTP layer to
    /// detect an `h2` downgrade it doesn't support, spec §9 Non-goals).
    pub fn alpn_protocol(&self) -> Option<Vec<u8>> {
        self.inner.lock().unwrap().conn.alpn_protocol().map(|p| p.to_vec())
    }

    pub fn on_handshake_completed(&self) -> Signal<()> {
        self.inner.lock().unwrap().handshake_completed.clone()
    }

    pub fn on_handshake_error(&self) -> Signal<String> {
        self.inner.lock().unwrap().handshake_error.clone()
    }

    pub fn on_data_received(&self) -> Signal<usize> {
        self.inner.lock().unwrap().data_received.clone()
    }

    /// Initiate a TLS-level close (`close_notify`); the caller still needs
    /// to close the underlying `TcpSocket` afterward.
    pub fn close(&self, reactor: &mut Reactor) {
        let mut inner = self.inner.lock().unwrap();
        inner.conn.send_close_notify();
        drop(inner);
        let _ = self.pump(Some(reactor));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TcpConfig;

    #[test]
    fn none_verification_builds_a_config_without_erroring() {
        let config = TlsConfig {
            verification: VerificationMode::None,
            extra_ca_pem_paths: Vec::new(),
            client_cert_pem_path: None,
            client_key_pem_path: None,
        };
        assert!(build_client_config(&config).is_ok());
    }

    #[test]
    fn peer_verification_loads_webpki_roots() {
        let config = TlsConfig::default();
        assert!(build_client_config(&config).is_ok());
    }

    #[test]
    fn connect_rejects_socket_not_yet_connected() {
        let tcp = TcpSocket::new(TcpConfig::default());
        let config = TlsConfig {
            verification: VerificationMode::None,
            extra_ca_pem_paths: Vec::new(),
            client_cert_pem_path: None,
            client_key_pem_path: None,
        };
        let result = TlsSocket::connect(tcp, "example.com", &config);
        assert!(result.is_err());
    }
}
