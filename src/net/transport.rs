//! A transport-agnostic handle over a [`TcpSocket`] or a [`TlsSocket`],
//! used by the HTTP and WebSocket layers so connection pooling and request
//! dispatch don't need to branch on `secure` at every call site.

use crate::net::tcp::{SocketState, TcpSocket};
use crate::net::tls::TlsSocket;
use crate::reactor::Reactor;
use crate::error::Result;

/// Either a plain TCP socket or a TLS session layered over one.
#[derive(Clone)]
pub enum Transport {
    Plain(TcpSocket),
    Tls(TlsSocket),
}

impl Transport {
    /// The underlying TCP socket, whichever variant this is.
    pub fn tcp(&self) -> TcpSocket {
        match self {
            Transport::Plain(t) => t.clone(),
            Transport::Tls(t) => t.tcp(),
        }
    }

    pub fn is_secure(&self) -> bool {
        matches!(self, Transport::Tls(_))
    }

    /// Whether the transport is usable for a new request: TCP connected and,
    /// for TLS, the handshake has completed.
    pub fn is_ready(&self) -> bool {
        match self {
            Transport::Plain(t) => t.state() == SocketState::Connected,
            Transport::Tls(t) => t.tcp().state() == SocketState::Connected && t.is_handshake_complete(),
        }
    }

    pub fn state(&self) -> SocketState {
        self.tcp().state()
    }

    pub fn saw_eof(&self) -> bool {
        self.tcp().saw_eof()
    }

    /// Queue `data` for transmission, flushing immediately where the
    /// transport needs a reactor reference to do so (TLS ciphertext framing).
    pub fn write(&self, reactor: &mut Reactor, data: &[u8]) -> Result<()> {
        match self {
            Transport::Plain(t) => {
                t.write(reactor, data);
                Ok(())
            }
            Transport::Tls(t) => {
                t.write(data)?;
                t.pump(Some(reactor))
            }
        }
    }

    /// Remove and return every byte received so far, already decrypted for
    /// TLS.
    pub fn read_all(&self) -> Vec<u8> {
        match self {
            Transport::Plain(t) => t.read_all(),
            Transport::Tls(t) => t.read_all(),
        }
    }

    /// Drive the TLS BIO pump (a no-op for plain TCP). Call after every
    /// underlying TCP readiness notification so handshake progress and
    /// decrypted bytes stay current.
    pub fn pump(&self, reactor: &mut Reactor) -> Result<()> {
        if let Transport::Tls(t) = self {
            t.pump(Some(reactor))?;
        }
        Ok(())
    }

    pub fn disconnect(&self, reactor: &mut Reactor) {
        if let Transport::Tls(t) = self {
            t.close(reactor);
        }
        self.tcp().disconnect_from_host(reactor);
    }
}
