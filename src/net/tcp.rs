//! Non-blocking TCP socket (spec §3/§4.C6).
//!
//! Grounded in the teacher crate's `src/net.rs` (mio `TcpStream` wrapping,
//! buffer-then-drain write pattern, `socket2` used to read `SO_ERROR` after
//! a connect-readiness event) and in
//! `examples/original_source/src/KDNetwork` for the state machine itself
//! (there is no single `tcp_socket.cpp` in the retrieved pack — KDNetwork
//! builds its socket on top of Asio — so the state names/transitions are
//! taken directly from spec §3/§4.C6).

use crate::config::TcpConfig;
use crate::dns::Resolver;
use crate::error::{Error, Result, TcpErrorKind};
use crate::reactor::{EventToken, Notifier, NotifierKind, Reactor};
use crate::signal::Signal;
use bytes::BytesMut;
use mio::net::TcpStream as MioTcpStream;
use mio::Interest;
use socket2::SockRef;
use std::io::{ErrorKind as IoErrorKind, Read, Write};
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tracing::{trace, warn};

/// Connection lifecycle state (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    /// No connection attempted yet.
    Unconnected,
    /// A DNS lookup for the peer is in flight.
    Resolving,
    /// A non-blocking `connect()` is in flight against one candidate address.
    Connecting,
    /// The TCP handshake completed; read/write are live.
    Connected,
    /// A graceful close was requested; flushing the write buffer.
    Closing,
    /// The socket has been shut down and its fd released.
    Closed,
    /// A fatal error occurred; the socket is no longer usable.
    Error,
}

struct Inner {
    state: SocketState,
    stream: Option<MioTcpStream>,
    token: Option<EventToken>,
    read_buf: BytesMut,
    write_buf: BytesMut,
    peer: Option<SocketAddr>,
    remaining_addrs: Vec<SocketAddr>,
    port: u16,
    /// Latched on any `read() == 0` (EOF). Per spec §9's Open Question
    /// decision, a socket that has seen EOF is never returned to an
    /// `HttpSession` connection pool even if `state` still reads
    /// `Connected` at the instant the caller asks.
    saw_eof: bool,
    last_error: Option<String>,
    config: TcpConfig,
    connect_timer: Option<crate::timer::TimerToken>,

    connected: Signal<()>,
    disconnected: Signal<()>,
    bytes_received: Signal<usize>,
    bytes_written: Signal<usize>,
    error_occurred: Signal<String>,
    state_changed: Signal<SocketState>,
}

impl Inner {
    fn set_state(&mut self, state: SocketState) {
        if self.state != state {
            self.state = state;
            self.state_changed.emit(state);
        }
    }

    fn fail(&mut self, kind: TcpErrorKind, message: impl Into<String>) {
        let message = message.into();
        warn!(kind = ?kind, %message, "tcp socket error");
        self.last_error = Some(message.clone());
        self.set_state(SocketState::Error);
        self.error_occurred.emit(message);
    }

    fn desired_interest(&self) -> Interest {
        if !self.write_buf.is_empty() || self.state == SocketState::Connecting {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        }
    }

    fn reregister(&mut self, reactor: &mut Reactor) {
        if let (Some(stream), Some(token)) = (self.stream.as_mut(), self.token) {
            let interest = self.desired_interest();
            if let Err(e) = reactor.reregister_io(stream, token, interest) {
                warn!(error = %e, "failed to reregister tcp socket interest");
            }
        }
    }
}

/// Non-blocking TCP socket. Cheap to clone — clones share the same
/// underlying connection and signal set.
#[derive(Clone)]
pub struct TcpSocket {
    inner: Arc<Mutex<Inner>>,
}

impl TcpSocket {
    /// Create an unconnected socket.
    pub fn new(config: TcpConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: SocketState::Unconnected,
                stream: None,
                token: None,
                read_buf: BytesMut::new(),
                write_buf: BytesMut::new(),
                peer: None,
                remaining_addrs: Vec::new(),
                port: 0,
                saw_eof: false,
                last_error: None,
                config,
                connect_timer: None,
                connected: Signal::new(),
                disconnected: Signal::new(),
                bytes_received: Signal::new(),
                bytes_written: Signal::new(),
                error_occurred: Signal::new(),
                state_changed: Signal::new(),
            })),
        }
    }

    /// Begin connecting to `host:port`, resolving `host` via `resolver`
    /// first if it isn't already a literal address.
    pub fn connect_to_host(
        &self,
        reactor: &mut Reactor,
        resolver: &Resolver,
        host: &str,
        port: u16,
    ) -> Result<()> {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.port = port;
            inner.set_state(SocketState::Resolving);
        }

        if let Ok(ip) = host.parse::<IpAddr>() {
            let addr = SocketAddr::new(ip, port);
            return self.begin_connect(reactor, vec![addr]);
        }

        // `Reactor::process_events` owns the only `&mut Reactor` and a DNS
        // result arrives inside that call (via `EventSink::handle_event`,
        // dispatched from the posted-event queue), so the lookup callback
        // itself cannot call `begin_connect` directly. It stashes the
        // resolved candidates instead; the caller (normally `HttpClient`,
        // which drives the reactor loop) observes the `Resolving` ->
        // candidates-ready handoff via `take_resolved_addrs` and calls
        // `begin_connect` on its next turn of the loop.
        let socket = self.clone();
        resolver.lookup(
            host.to_string(),
            Duration::from_secs(10),
            Box::new(move |result| {
                let mut inner = socket.inner.lock().unwrap();
                match result {
                    Ok(ips) => {
                        inner.remaining_addrs = ips.into_iter().map(|ip| SocketAddr::new(ip, port)).collect();
                    }
                    Err(e) => inner.fail(TcpErrorKind::ConnectUnreachable, format!("dns lookup failed: {e}")),
                }
            }),
        );
        Ok(())
    }

    /// Take the addresses a prior `connect_to_host` resolved, if the
    /// lookup has completed. Returns `None` while resolution is still in
    /// flight or if it failed (in which case `state()` already reads
    /// `Error`).
    pub fn take_resolved_addrs(&self) -> Option<Vec<SocketAddr>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.remaining_addrs.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut inner.remaining_addrs))
        }
    }

    /// Start (or continue, after a failed candidate) a non-blocking
    /// connect attempt against the next address in `addrs`/the socket's
    /// remaining candidate list.
    pub fn begin_connect(&self, reactor: &mut Reactor, addrs: Vec<SocketAddr>) -> Result<()> {
        {
            let mut inner = self.inner.lock().unwrap();
            if !addrs.is_empty() {
                inner.remaining_addrs = addrs;
            }
        }
        self.try_next_address(reactor)
    }

    fn try_next_address(&self, reactor: &mut Reactor) -> Result<()> {
        let next_addr = {
            let mut inner = self.inner.lock().unwrap();
            if inner.remaining_addrs.is_empty() {
                inner.fail(TcpErrorKind::ConnectUnreachable, "no more addresses to try");
                return Err(Error::tcp(TcpErrorKind::ConnectUnreachable, "connect exhausted all addresses"));
            }
            inner.remaining_addrs.remove(0)
        };

        let mut stream = MioTcpStream::connect(next_addr)
            .map_err(|e| Error::tcp(TcpErrorKind::ConnectRefused, format!("connect() failed: {e}")))?;

        let nodelay = self.inner.lock().unwrap().config.nodelay;
        if nodelay {
            if let Err(e) = SockRef::from(&stream).set_nodelay(true) {
                warn!(error = %e, "failed to set TCP_NODELAY");
            }
        }

        let notifier: Weak<dyn Notifier> = Arc::downgrade(&self.inner);
        let token = reactor.register_io(&mut stream, Interest::READABLE | Interest::WRITABLE, notifier)?;

        let timeout_socket = self.clone();
        let connect_timer = reactor.create_timer(self.inner.lock().unwrap().config.connect_timeout, move || {
            let mut inner = timeout_socket.inner.lock().unwrap();
            if inner.state == SocketState::Connecting {
                inner.fail(TcpErrorKind::ConnectTimeout, "connect() did not complete before the configured timeout");
            }
        });

        let mut inner = self.inner.lock().unwrap();
        inner.stream = Some(stream);
        inner.token = Some(token);
        inner.peer = Some(next_addr);
        inner.connect_timer = Some(connect_timer);
        inner.set_state(SocketState::Connecting);
        Ok(())
    }

    /// Append `data` to the write buffer and arm the write notifier.
    /// Returns the number of bytes appended (always `data.len()`, mirroring
    /// the original's "returns the count appended" contract).
    pub fn write(&self, reactor: &mut Reactor, data: &[u8]) -> usize {
        let mut inner = self.inner.lock().unwrap();
        inner.write_buf.extend_from_slice(data);
        inner.reregister(reactor);
        data.len()
    }

    /// Remove and return every buffered, received byte.
    pub fn read_all(&self) -> Vec<u8> {
        let mut inner = self.inner.lock().unwrap();
        inner.read_buf.split().to_vec()
    }

    /// Remove and return up to `n` buffered, received bytes.
    pub fn read(&self, n: usize) -> Vec<u8> {
        let mut inner = self.inner.lock().unwrap();
        let n = n.min(inner.read_buf.len());
        inner.read_buf.split_to(n).to_vec()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SocketState {
        self.inner.lock().unwrap().state
    }

    /// Whether this socket has ever observed a zero-length read (EOF).
    /// `HttpSession::return_connection` consults this before pooling.
    pub fn saw_eof(&self) -> bool {
        self.inner.lock().unwrap().saw_eof
    }

    /// Last transport error message, if any.
    pub fn last_error(&self) -> Option<String> {
        self.inner.lock().unwrap().last_error.clone()
    }

    /// Peer address, once known.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.lock().unwrap().peer
    }

    /// Fires once the TCP handshake completes.
    pub fn on_connected(&self) -> Signal<()> {
        self.inner.lock().unwrap().connected.clone()
    }

    /// Fires on local close or peer EOF/reset.
    pub fn on_disconnected(&self) -> Signal<()> {
        self.inner.lock().unwrap().disconnected.clone()
    }

    /// Fires once per notifier readiness (not once per `recv`), carrying
    /// the number of bytes now available in the read buffer.
    pub fn on_bytes_received(&self) -> Signal<usize> {
        self.inner.lock().unwrap().bytes_received.clone()
    }

    /// Fires after bytes are actually handed to the kernel.
    pub fn on_bytes_written(&self) -> Signal<usize> {
        self.inner.lock().unwrap().bytes_written.clone()
    }

    /// Fires once, with a diagnostic message, when the socket transitions
    /// to `Error`.
    pub fn on_error(&self) -> Signal<String> {
        self.inner.lock().unwrap().error_occurred.clone()
    }

    /// Fires on every state transition.
    pub fn on_state_changed(&self) -> Signal<SocketState> {
        self.inner.lock().unwrap().state_changed.clone()
    }

    /// Gracefully close: flush the write buffer (bounded by
    /// `TcpConfig::close_timeout`), then `shutdown(Both)` and release the fd.
    pub fn disconnect_from_host(&self, reactor: &mut Reactor) {
        let mut inner = self.inner.lock().unwrap();
        if inner.write_buf.is_empty() {
            Self::finish_close(&mut inner, reactor);
        } else {
            inner.set_state(SocketState::Closing);
            inner.reregister(reactor);
        }
    }

    fn finish_close(inner: &mut Inner, reactor: &mut Reactor) {
        if let (Some(mut stream), Some(token)) = (inner.stream.take(), inner.token.take()) {
            let _ = reactor.unregister_io(&mut stream, token);
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        inner.set_state(SocketState::Closed);
        inner.disconnected.emit(());
    }
}

// `Notifier` is implemented on the locked `Inner` via a raw blanket impl on
// `Mutex<Inner>` so `Arc::downgrade` of the same `Arc<Mutex<Inner>>` backing
// a `TcpSocket` can be registered directly with the reactor.
impl Notifier for Mutex<Inner> {
    fn on_ready(&self, kind: NotifierKind, hup_or_err: bool) {
        let mut inner = self.lock().unwrap();
        match inner.state {
            SocketState::Connecting => handle_connecting_ready(&mut inner, kind, hup_or_err),
            SocketState::Connected | SocketState::Closing => handle_connected_ready(&mut inner, kind, hup_or_err),
            _ => {}
        }
    }
}

fn handle_connecting_ready(inner: &mut Inner, kind: NotifierKind, hup_or_err: bool) {
    if kind != NotifierKind::Write && !hup_or_err {
        return;
    }
    let Some(stream) = inner.stream.as_ref() else { return };
    let sock_err = SockRef::from(stream).take_error();
    match sock_err {
        Ok(None) if !hup_or_err => {
            inner.set_state(SocketState::Connected);
            inner.connected.emit(());
        }
        Ok(Some(e)) | Err(e) => {
            let kind = classify_connect_error(&e);
            inner.fail(kind, format!("connect failed: {e}"));
        }
        Ok(None) => {
            inner.fail(TcpErrorKind::ConnectRefused, "connect readiness with hangup/error bits set");
        }
    }
}

fn handle_connected_ready(inner: &mut Inner, kind: NotifierKind, hup_or_err: bool) {
    match kind {
        NotifierKind::Read => drain_read(inner, hup_or_err),
        NotifierKind::Write => drain_write(inner),
    }
}

fn drain_read(inner: &mut Inner, hup_or_err: bool) {
    let Some(stream) = inner.stream.as_mut() else { return };
    let chunk_size = inner.config.read_chunk_size;
    let mut staging = vec![0u8; chunk_size];
    let mut total_read = 0usize;
    loop {
        match stream.read(&mut staging) {
            Ok(0) => {
                inner.saw_eof = true;
                break;
            }
            Ok(n) => {
                inner.read_buf.extend_from_slice(&staging[..n]);
                total_read += n;
            }
            Err(e) if e.kind() == IoErrorKind::WouldBlock => break,
            Err(e) => {
                inner.fail(TcpErrorKind::Io, format!("read failed: {e}"));
                return;
            }
        }
    }
    if total_read > 0 {
        let len = inner.read_buf.len();
        inner.bytes_received.emit(len);
    }
    if inner.saw_eof {
        trace!("peer closed connection (eof)");
        inner.set_state(SocketState::Closing);
        inner.disconnected.emit(());
    } else if hup_or_err {
        inner.fail(TcpErrorKind::Reset, "connection reset by peer");
    }
}

fn drain_write(inner: &mut Inner) {
    let closing = inner.state == SocketState::Closing;
    let Some(stream) = inner.stream.as_mut() else { return };
    let mut total_written = 0usize;
    while !inner.write_buf.is_empty() {
        match stream.write(&inner.write_buf) {
            Ok(0) => break,
            Ok(n) => {
                let _ = inner.write_buf.split_to(n);
                total_written += n;
            }
            Err(e) if e.kind() == IoErrorKind::WouldBlock => break,
            Err(e) => {
                inner.fail(TcpErrorKind::Io, format!("write failed: {e}"));
                return;
            }
        }
    }
    if total_written > 0 {
        inner.bytes_written.emit(total_written);
    }
    if closing && inner.write_buf.is_empty() {
        // `Notifier::on_ready` has no reactor reference to unregister the
        // fd's token with, so the graceful-close-on-drain path only
        // shuts down and drops the stream; the reactor's token entry goes
        // stale and is reclaimed lazily (its weak handler upgrade fails,
        // so `process_events` just skips delivering to it forever after).
        if let Some(mut stream) = inner.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        inner.token = None;
        inner.set_state(SocketState::Closed);
        inner.disconnected.emit(());
    }
}

fn classify_connect_error(e: &std::io::Error) -> TcpErrorKind {
    match e.kind() {
        IoErrorKind::ConnectionRefused => TcpErrorKind::ConnectRefused,
        IoErrorKind::TimedOut => TcpErrorKind::ConnectTimeout,
        _ => TcpErrorKind::ConnectUnreachable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::Reactor;
    use std::net::TcpListener;

    #[test]
    fn connect_and_exchange_bytes_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        listener.set_nonblocking(true).unwrap();

        let mut reactor = Reactor::new().unwrap();
        let socket = TcpSocket::new(TcpConfig::default());
        socket.begin_connect(&mut reactor, vec![addr]).unwrap();

        let connected = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let c = connected.clone();
        let _conn = socket.on_connected().connect(move |_| c.store(true, std::sync::atomic::Ordering::SeqCst));

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        let mut server_stream = None;
        while std::time::Instant::now() < deadline && server_stream.is_none() {
            reactor.process_events(Some(Duration::from_millis(20))).unwrap();
            if let Ok((stream, _)) = listener.accept() {
                server_stream = Some(stream);
            }
        }
        assert!(server_stream.is_some(), "server never accepted a connection");

        while std::time::Instant::now() < deadline
            && !connected.load(std::sync::atomic::Ordering::SeqCst)
        {
            reactor.process_events(Some(Duration::from_millis(20))).unwrap();
        }
        assert!(connected.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(socket.state(), SocketState::Connected);
    }
}
