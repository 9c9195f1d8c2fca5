//! WebSocket client connection state machine (spec §4.C14).
//!
//! Grounded in
//! `examples/original_source/src/KDNetwork/websocket_client.h` for the
//! public surface (`connectToUrl`/`disconnect`/`sendTextMessage`/
//! `sendBinaryMessage`/`sendPing`/the reconnect settings/the signal set)
//! and `websocket_common.h` for the handshake GUID and the default ping
//! interval/close timeout/max payload size. Connection establishment
//! (TCP → optional TLS → ready) reuses
//! [`crate::http::client`]'s `TransportPhase` state-stepping pattern
//! rather than going through a full `HttpClient`, since the handshake
//! response must never be redirect-followed and the bytes the parser
//! consumes past the header block become the first frame's data (spec
//! §4.C14 step 4) — something `HttpClient::send` has no way to hand
//! back.

use crate::config::Config;
use crate::dns::Resolver;
use crate::error::{Error, Result, TcpErrorKind, WsErrorKind};
use crate::http::message::{HttpMethod, HttpRequest};
use crate::http::parser::{HttpParser, ParserEvent, ParserType};
use crate::net::tcp::{SocketState, TcpSocket};
use crate::net::tls::TlsSocket;
use crate::net::Transport;
use crate::reactor::Reactor;
use crate::signal::Signal;
use crate::timer::TimerToken;
use crate::uri::Uri;
use crate::ws::frame::{Frame, OpCode};
use base64::Engine;
use rand::RngCore;
use sha1::{Digest, Sha1};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

const HANDSHAKE_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Connection state, matching spec §3's `WebSocket client (C14)` data
/// model exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsState {
    Closed,
    Connecting,
    Connected,
    Closing,
}

/// Standard WebSocket close status codes (RFC 6455 §7.4,
/// `WebSocket::CloseCode` in `websocket_common.h`), offered as named
/// constants for callers of [`WsClient::disconnect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CloseCode {
    Normal = 1000,
    GoingAway = 1001,
    ProtocolError = 1002,
    UnsupportedData = 1003,
    NoStatusReceived = 1005,
    AbnormalClosure = 1006,
    InvalidPayload = 1007,
    PolicyViolation = 1008,
    MessageTooBig = 1009,
    MissingExtension = 1010,
    InternalError = 1011,
}

/// Signals emitted by [`WsClient`], mirroring
/// `WebSocketClient`'s public `KDBindings::Signal` members.
#[derive(Default)]
pub struct WsClientSignals {
    pub connected: Signal<()>,
    pub disconnected: Signal<(u16, String)>,
    pub text_message_received: Signal<String>,
    pub binary_message_received: Signal<Vec<u8>>,
    pub pong_received: Signal<Vec<u8>>,
    pub error_occurred: Signal<String>,
    pub about_to_reconnect: Signal<()>,
}

enum Phase {
    Connecting(TcpSocket),
    TlsHandshaking(TlsSocket),
    Handshaking { transport: Transport, parser: HttpParser, expected_accept: String },
    Ready(Transport),
}

fn disconnect_phase(phase: &Phase, reactor: &mut Reactor) {
    match phase {
        Phase::Connecting(tcp) => tcp.disconnect_from_host(reactor),
        Phase::TlsHandshaking(tls) => {
            tls.close(reactor);
            tls.tcp().disconnect_from_host(reactor);
        }
        Phase::Handshaking { transport, .. } | Phase::Ready(transport) => transport.disconnect(reactor),
    }
}

/// A WebSocket client (RFC 6455), driven by repeatedly calling
/// [`WsClient::poll`] — there is no background thread.
pub struct WsClient {
    reactor: Reactor,
    resolver: Resolver,
    config: Config,
    url: Uri,
    state: WsState,
    phase: Option<Phase>,
    frame_buffer: Vec<u8>,
    fragment_op: Option<OpCode>,
    fragment_buf: Vec<u8>,
    last_pong: Instant,
    ping_timer: Option<TimerToken>,
    ping_due: Arc<AtomicBool>,
    closing_locally: bool,
    close_timer: Option<TimerToken>,
    close_due: Arc<AtomicBool>,
    auto_reconnect: bool,
    max_reconnect_attempts: u32,
    reconnect_attempts: u32,
    reconnect_interval: Duration,
    reconnect_timer: Option<TimerToken>,
    reconnect_due: Arc<AtomicBool>,
    signals: Arc<WsClientSignals>,
}

impl WsClient {
    pub fn new(config: Config) -> Result<Self> {
        let mut reactor = Reactor::with_config(config.reactor.clone())?;
        let resolver = Resolver::new(reactor.handle(), config.dns.worker_threads)?;
        Ok(Self {
            reactor,
            resolver,
            config,
            url: Uri::parse("ws://localhost/").unwrap(),
            state: WsState::Closed,
            phase: None,
            frame_buffer: Vec::new(),
            fragment_op: None,
            fragment_buf: Vec::new(),
            last_pong: Instant::now(),
            ping_timer: None,
            ping_due: Arc::new(AtomicBool::new(false)),
            closing_locally: false,
            close_timer: None,
            close_due: Arc::new(AtomicBool::new(false)),
            auto_reconnect: false,
            max_reconnect_attempts: 3,
            reconnect_attempts: 0,
            reconnect_interval: Duration::from_secs(3),
            reconnect_timer: None,
            reconnect_due: Arc::new(AtomicBool::new(false)),
            signals: Arc::new(WsClientSignals::default()),
        })
    }

    pub fn signals(&self) -> &WsClientSignals {
        &self.signals
    }

    pub fn state(&self) -> WsState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == WsState::Connected
    }

    pub fn set_auto_reconnect(&mut self, enabled: bool) {
        self.auto_reconnect = enabled;
    }

    pub fn set_max_reconnect_attempts(&mut self, max_attempts: u32) {
        self.max_reconnect_attempts = max_attempts;
    }

    pub fn set_reconnect_interval(&mut self, interval: Duration) {
        self.reconnect_interval = interval;
    }

    /// Connect to a `ws://`/`wss://` URL (spec §4.C14 step 1).
    pub fn connect_to_url(&mut self, url: Uri) -> Result<()> {
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::ws(WsErrorKind::ProtocolError, format!("unsupported scheme: {}", url.scheme())));
        }
        self.url = url;
        self.reconnect_attempts = 0;
        self.begin_connect()
    }

    fn begin_connect(&mut self) -> Result<()> {
        if let Some(phase) = self.phase.take() {
            disconnect_phase(&phase, &mut self.reactor);
        }
        self.cancel_timers();
        self.frame_buffer.clear();
        self.fragment_op = None;
        self.fragment_buf.clear();
        self.closing_locally = false;
        self.state = WsState::Connecting;

        let tcp = TcpSocket::new(self.config.tcp.clone());
        tcp.connect_to_host(&mut self.reactor, &self.resolver, self.url.host(), self.url.port_or_default())?;
        self.phase = Some(Phase::Connecting(tcp));
        Ok(())
    }

    fn cancel_timers(&mut self) {
        if let Some(token) = self.ping_timer.take() {
            self.reactor.cancel_timer(token);
        }
        if let Some(token) = self.close_timer.take() {
            self.reactor.cancel_timer(token);
        }
        if let Some(token) = self.reconnect_timer.take() {
            self.reactor.cancel_timer(token);
        }
        self.ping_due.store(false, Ordering::SeqCst);
        self.close_due.store(false, Ordering::SeqCst);
        self.reconnect_due.store(false, Ordering::SeqCst);
    }

    fn start_handshake(&mut self, transport: Transport) -> Result<()> {
        let mut key_bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut key_bytes);
        let key = base64::engine::general_purpose::STANDARD.encode(key_bytes);

        let mut hasher = Sha1::new();
        hasher.update(key.as_bytes());
        hasher.update(HANDSHAKE_GUID.as_bytes());
        let expected_accept = base64::engine::general_purpose::STANDARD.encode(hasher.finalize());

        let request = HttpRequest::new(HttpMethod::Get, self.url.clone())
            .with_header("upgrade", "websocket")
            .with_header("connection", "Upgrade")
            .with_header("sec-websocket-key", key)
            .with_header("sec-websocket-version", "13");
        let bytes = request.serialize(&self.url.authority());
        transport.write(&mut self.reactor, &bytes)?;

        self.phase = Some(Phase::Handshaking { transport, parser: HttpParser::new(ParserType::Response), expected_accept });
        Ok(())
    }

    /// Drive one reactor tick: I/O readiness, timers, connection
    /// state-stepping, and the frame receive loop.
    pub fn poll(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.reactor.process_events(timeout)?;
        self.handle_due_timers();
        if let Err(e) = self.step() {
            self.fail_connection(WsErrorKind::ProtocolError, &format!("{e}"));
        }
        Ok(())
    }

    fn handle_due_timers(&mut self) {
        if self.ping_due.swap(false, Ordering::SeqCst) && self.state == WsState::Connected {
            if self.last_pong.elapsed() > self.config.websocket.ping_interval * 2 {
                self.finalize_close(1006, "ping timeout", true);
            } else if let Some(Phase::Ready(transport)) = &self.phase {
                let transport = transport.clone();
                let _ = transport.write(&mut self.reactor, &Frame::ping(Vec::new()).encode(true));
            }
        }
        if self.close_due.swap(false, Ordering::SeqCst) && self.state == WsState::Closing {
            self.finalize_close(1006, "close timeout", false);
        }
        if self.reconnect_due.swap(false, Ordering::SeqCst) && self.state == WsState::Closed {
            self.signals.about_to_reconnect.emit(());
            self.reconnect_attempts += 1;
            if let Err(e) = self.begin_connect() {
                warn!(error = %e, "reconnect attempt failed to start");
            }
        }
    }

    fn step(&mut self) -> Result<()> {
        let Some(phase) = self.phase.take() else { return Ok(()) };
        match phase {
            Phase::Connecting(tcp) => match tcp.state() {
                SocketState::Resolving => {
                    if let Some(addrs) = tcp.take_resolved_addrs() {
                        tcp.begin_connect(&mut self.reactor, addrs)?;
                    }
                    self.phase = Some(Phase::Connecting(tcp));
                }
                SocketState::Connecting => self.phase = Some(Phase::Connecting(tcp)),
                SocketState::Connected => {
                    if self.url.is_secure() {
                        let tls = TlsSocket::connect(tcp, self.url.host(), &self.config.tls)?;
                        self.phase = Some(Phase::TlsHandshaking(tls));
                    } else {
                        self.start_handshake(Transport::Plain(tcp))?;
                    }
                }
                SocketState::Error => {
                    let message = tcp.last_error().unwrap_or_else(|| "connect failed".to_string());
                    return Err(Error::tcp(TcpErrorKind::ConnectUnreachable, message));
                }
                SocketState::Closed => return Err(Error::tcp(TcpErrorKind::Closed, "connection closed before handshake")),
                SocketState::Unconnected | SocketState::Closing => self.phase = Some(Phase::Connecting(tcp)),
            },
            Phase::TlsHandshaking(tls) => {
                tls.pump(Some(&mut self.reactor))?;
                if tls.is_handshake_complete() {
                    self.start_handshake(Transport::Tls(tls))?;
                } else {
                    self.phase = Some(Phase::TlsHandshaking(tls));
                }
            }
            Phase::Handshaking { transport, mut parser, expected_accept } => {
                transport.pump(&mut self.reactor)?;
                let data = transport.read_all();
                let mut excess = Vec::new();
                let mut accepted = false;
                if !data.is_empty() {
                    for event in parser.feed(&data)? {
                        match event {
                            ParserEvent::HeadersComplete { status_code, headers, .. } => {
                                self.validate_handshake(status_code, &headers, &expected_accept)?;
                                accepted = true;
                            }
                            ParserEvent::Body(chunk) => excess.extend_from_slice(&chunk),
                            ParserEvent::MessageComplete => {}
                        }
                    }
                }
                if accepted {
                    self.state = WsState::Connected;
                    self.last_pong = Instant::now();
                    let ping_due = self.ping_due.clone();
                    self.ping_timer = Some(self.reactor.create_periodic_timer(self.config.websocket.ping_interval, move || {
                        ping_due.store(true, Ordering::SeqCst);
                    }));
                    self.phase = Some(Phase::Ready(transport));
                    self.frame_buffer.extend_from_slice(&excess);
                    self.signals.connected.emit(());
                    self.process_frame_buffer()?;
                } else if transport.saw_eof() {
                    return Err(Error::ws(WsErrorKind::HandshakeRejected(0), "connection closed during handshake"));
                } else {
                    self.phase = Some(Phase::Handshaking { transport, parser, expected_accept });
                }
            }
            Phase::Ready(transport) => {
                transport.pump(&mut self.reactor)?;
                let data = transport.read_all();
                if !data.is_empty() {
                    self.frame_buffer.extend_from_slice(&data);
                }
                let saw_eof = transport.saw_eof();
                self.phase = Some(Phase::Ready(transport));
                self.process_frame_buffer()?;
                if saw_eof && self.state != WsState::Closed {
                    self.finalize_close(1006, "connection closed abnormally", true);
                }
            }
        }
        Ok(())
    }

    fn validate_handshake(&self, status_code: Option<u16>, headers: &[(String, String)], expected_accept: &str) -> Result<()> {
        let status = status_code.unwrap_or(0);
        if status != 101 {
            return Err(Error::ws(WsErrorKind::HandshakeRejected(status), format!("server returned {status}")));
        }
        let header = |name: &str| headers.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str());
        let upgrade_ok = header("upgrade").map(|v| v.eq_ignore_ascii_case("websocket")).unwrap_or(false);
        let connection_ok = header("connection").map(|v| v.to_ascii_lowercase().contains("upgrade")).unwrap_or(false);
        if !upgrade_ok || !connection_ok {
            return Err(Error::ws(WsErrorKind::HandshakeRejected(status), "missing Upgrade/Connection headers"));
        }
        let accept = header("sec-websocket-accept").unwrap_or("");
        if accept != expected_accept {
            return Err(Error::ws(WsErrorKind::BadAccept, "Sec-WebSocket-Accept mismatch"));
        }
        Ok(())
    }

    fn process_frame_buffer(&mut self) -> Result<()> {
        loop {
            if let Some(true) = Frame::peek_masked(&self.frame_buffer) {
                self.fail_connection(WsErrorKind::ProtocolError, "received a masked frame from the server");
                return Ok(());
            }
            let mut consumed = 0;
            let frame = match Frame::decode(&self.frame_buffer, &mut consumed) {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(()),
                Err(e) => {
                    self.fail_connection(WsErrorKind::ProtocolError, &format!("{e}"));
                    return Ok(());
                }
            };
            self.frame_buffer.drain(..consumed);
            self.handle_frame(frame)?;
            if self.state != WsState::Connected && self.state != WsState::Closing {
                return Ok(());
            }
        }
    }

    fn handle_frame(&mut self, frame: Frame) -> Result<()> {
        match frame.op_code() {
            OpCode::Ping => {
                if let Some(Phase::Ready(transport)) = &self.phase {
                    let transport = transport.clone();
                    transport.write(&mut self.reactor, &Frame::pong(frame.payload().to_vec()).encode(true))?;
                }
            }
            OpCode::Pong => {
                self.last_pong = Instant::now();
                self.signals.pong_received.emit(frame.payload().to_vec());
            }
            OpCode::Close => self.handle_close_frame(&frame)?,
            OpCode::Text | OpCode::Binary | OpCode::Continuation => self.handle_data_frame(frame)?,
        }
        Ok(())
    }

    fn handle_data_frame(&mut self, frame: Frame) -> Result<()> {
        if frame.op_code() == OpCode::Continuation {
            if self.fragment_op.is_none() {
                self.fail_connection(WsErrorKind::ProtocolError, "continuation frame without a preceding start frame");
                return Ok(());
            }
            self.fragment_buf.extend_from_slice(frame.payload());
        } else {
            if self.fragment_op.is_some() {
                self.fail_connection(WsErrorKind::ProtocolError, "new message started before previous fragment finished");
                return Ok(());
            }
            self.fragment_op = Some(frame.op_code());
            self.fragment_buf = frame.payload().to_vec();
        }

        if frame.is_final() {
            let op = self.fragment_op.take().unwrap();
            let payload = std::mem::take(&mut self.fragment_buf);
            match op {
                OpCode::Text => match String::from_utf8(payload) {
                    Ok(text) => self.signals.text_message_received.emit(text),
                    Err(_) => self.initiate_close(1007, "invalid utf-8 in text message"),
                },
                OpCode::Binary => self.signals.binary_message_received.emit(payload),
                _ => unreachable!("fragment_op is only ever set to Text or Binary"),
            }
        }
        Ok(())
    }

    fn handle_close_frame(&mut self, frame: &Frame) -> Result<()> {
        let (code, reason) = frame.close_code_and_reason().unwrap_or((1005, String::new()));
        if self.state == WsState::Closing {
            self.finalize_close(code, &reason, false);
            return Ok(());
        }
        if let Some(Phase::Ready(transport)) = &self.phase {
            let transport = transport.clone();
            let _ = transport.write(&mut self.reactor, &Frame::close(code, &reason).encode(true));
        }
        self.finalize_close(code, &reason, false);
        Ok(())
    }

    /// Send a text message, fragmenting it over `max_payload_size` if
    /// necessary (spec §4.C14 "Send").
    pub fn send_text_message(&mut self, message: &str) -> Result<()> {
        self.send_fragmented(OpCode::Text, message.as_bytes())
    }

    /// Send a binary message, fragmenting it over `max_payload_size` if
    /// necessary.
    pub fn send_binary_message(&mut self, message: &[u8]) -> Result<()> {
        self.send_fragmented(OpCode::Binary, message)
    }

    pub fn send_ping(&mut self, payload: Vec<u8>) -> Result<()> {
        self.send_frame(Frame::ping(payload))
    }

    fn send_fragmented(&mut self, op: OpCode, data: &[u8]) -> Result<()> {
        let max = self.config.websocket.max_payload_size.max(1);
        if data.len() <= max {
            let frame = match op {
                OpCode::Text => Frame::text_bytes(data.to_vec(), true),
                _ => Frame::binary(data.to_vec(), true),
            };
            return self.send_frame(frame);
        }
        let mut offset = 0;
        let mut first = true;
        while offset < data.len() {
            let end = (offset + max).min(data.len());
            let is_final = end == data.len();
            let chunk = data[offset..end].to_vec();
            let frame = if first {
                match op {
                    OpCode::Text => Frame::text_bytes(chunk, is_final),
                    _ => Frame::binary(chunk, is_final),
                }
            } else {
                Frame::continuation(chunk, is_final)
            };
            self.send_frame(frame)?;
            first = false;
            offset = end;
        }
        Ok(())
    }

    fn send_frame(&mut self, frame: Frame) -> Result<()> {
        let Some(Phase::Ready(transport)) = &self.phase else {
            return Err(Error::ws(WsErrorKind::ProtocolError, "not connected"));
        };
        let transport = transport.clone();
        transport.write(&mut self.reactor, &frame.encode(true))
    }

    /// Gracefully close the connection (spec §4.C14 "Close").
    pub fn disconnect(&mut self, code: u16, reason: &str) {
        if self.state != WsState::Connected {
            return;
        }
        self.closing_locally = true;
        self.initiate_close(code, reason);
    }

    fn initiate_close(&mut self, code: u16, reason: &str) {
        let _ = self.send_frame(Frame::close(code, reason));
        self.state = WsState::Closing;
        let close_due = self.close_due.clone();
        self.close_timer = Some(self.reactor.create_timer(self.config.websocket.close_timeout, move || {
            close_due.store(true, Ordering::SeqCst);
        }));
    }

    fn finalize_close(&mut self, code: u16, reason: &str, abnormal: bool) {
        if let Some(phase) = self.phase.take() {
            disconnect_phase(&phase, &mut self.reactor);
        }
        self.cancel_timers();
        self.state = WsState::Closed;
        self.fragment_op = None;
        self.fragment_buf.clear();
        self.frame_buffer.clear();
        self.signals.disconnected.emit((code, reason.to_string()));

        let abnormal = abnormal && !self.closing_locally;
        if abnormal && self.auto_reconnect && (self.max_reconnect_attempts == 0 || self.reconnect_attempts < self.max_reconnect_attempts) {
            trace!(attempts = self.reconnect_attempts, "scheduling websocket reconnect");
            let reconnect_due = self.reconnect_due.clone();
            self.reconnect_timer = Some(self.reactor.create_timer(self.reconnect_interval, move || {
                reconnect_due.store(true, Ordering::SeqCst);
            }));
        } else {
            self.reconnect_attempts = 0;
        }
    }

    fn fail_connection(&mut self, kind: WsErrorKind, message: &str) {
        warn!(error = message, "websocket connection failed");
        self.signals.error_occurred.emit(message.to_string());
        let abnormal = !matches!(self.state, WsState::Closing) || !self.closing_locally;
        let code = match kind {
            WsErrorKind::MessageTooBig => 1009,
            WsErrorKind::ProtocolError => 1002,
            _ => 1006,
        };
        self.finalize_close(code, message, abnormal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_to_url_rejects_non_ws_scheme() {
        let mut client = WsClient::new(Config::default()).unwrap();
        let err = client.connect_to_url(Uri::parse("http://example.com/").unwrap()).unwrap_err();
        assert!(matches!(err, Error::Ws { .. }));
    }

    #[test]
    fn validate_handshake_accepts_matching_response() {
        let client = WsClient::new(Config::default()).unwrap();
        let headers = vec![
            ("upgrade".to_string(), "websocket".to_string()),
            ("connection".to_string(), "Upgrade".to_string()),
            ("sec-websocket-accept".to_string(), "abc".to_string()),
        ];
        assert!(client.validate_handshake(Some(101), &headers, "abc").is_ok());
    }

    #[test]
    fn validate_handshake_rejects_non_101_status() {
        let client = WsClient::new(Config::default()).unwrap();
        let err = client.validate_handshake(Some(400), &[], "abc").unwrap_err();
        assert!(matches!(err, Error::Ws { kind: WsErrorKind::HandshakeRejected(400), .. }));
    }

    #[test]
    fn validate_handshake_rejects_accept_mismatch() {
        let client = WsClient::new(Config::default()).unwrap();
        let headers = vec![
            ("upgrade".to_string(), "websocket".to_string()),
            ("connection".to_string(), "Upgrade".to_string()),
            ("sec-websocket-accept".to_string(), "wrong".to_string()),
        ];
        let err = client.validate_handshake(Some(101), &headers, "abc").unwrap_err();
        assert!(matches!(err, Error::Ws { kind: WsErrorKind::BadAccept, .. }));
    }
}
