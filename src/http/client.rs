//! HTTP request pipeline orchestrating C5–C10 (spec §4.C11).
//!
//! Grounded in
//! `examples/original_source/src/KDNetwork/http_client.h`: the convenience
//! verbs, the `aboutToSendRequest`/`responseReceived`/`error`/
//! `downloadProgress`/`uploadProgress` signal set, and the
//! prepare→acquire-socket→send→parse→complete flow are all named there.
//! `m_activeRequests: map<shared_ptr<Socket>, shared_ptr<RequestState>>` is
//! replaced by a `slotmap::SlotMap<RequestId, RequestState>` arena per spec
//! §9's redesign note (no `shared_ptr` cycles between client/session/state).
//! There is no async runtime in this crate's dependency stack (DESIGN.md),
//! so "returns a future immediately, fulfilled on the reactor thread" is
//! implemented as a plain completion callback rather than `std::future` —
//! the reactor itself is the only suspension point (spec §5).

use crate::config::Config;
use crate::dns::Resolver;
use crate::error::{Error, HttpErrorKind, Result};
use crate::http::cookie::HttpCookie;
use crate::http::message::{Auth, HttpMethod, HttpRequest, HttpResponse, RedirectPolicy};
use crate::http::parser::{HttpParser, ParserEvent, ParserType};
use crate::http::session::HttpSession;
use crate::net::tcp::{SocketState, TcpSocket};
use crate::net::tls::TlsSocket;
use crate::net::Transport;
use crate::reactor::Reactor;
use crate::signal::Signal;
use crate::timer::TimerToken;
use slotmap::{new_key_type, SlotMap};
use std::time::{Duration, Instant};
use tracing::{trace, warn};

new_key_type! {
    /// Stable identity for one in-flight request, arena-allocated in
    /// [`HttpClient`] (spec §9 "request state" redesign note).
    pub struct RequestId;
}

type CompletionCallback = Box<dyn FnOnce(Result<HttpResponse>) + Send>;

/// Hook invoked immediately before a (possibly redirected) request is
/// serialized, letting the caller rewrite it in place (spec §4.C11
/// `aboutToSendRequest`). Not modeled as a [`Signal`] because signal slots
/// can't mutate their argument.
pub type BeforeSendHook = Box<dyn FnMut(&mut HttpRequest) + Send>;

/// Forward the fully-parsed body of an in-flight request to an attached
/// [`crate::sse::SseClient`] chunk-wise instead of buffering it on
/// `RequestState` (spec §4.C11 step 4, §4.C12).
pub trait BodySink: Send {
    fn on_chunk(&self, chunk: &[u8]);
    fn on_headers(&self, status: u16, headers: &[(String, String)]);
    fn on_complete(&self);
    fn on_error(&self, message: &str);
}

enum TransportPhase {
    Connecting(TcpSocket),
    TlsHandshaking(TlsSocket),
    Ready(Transport),
}

struct RequestState {
    request: HttpRequest,
    current_uri: crate::uri::Uri,
    host: String,
    port: u16,
    secure: bool,
    redirects_taken: u32,
    redirect_history: Vec<crate::uri::Uri>,
    phase: TransportPhase,
    parser: HttpParser,
    sent: bool,
    response_status: u16,
    response_reason: String,
    response_version: String,
    response_headers: Vec<(String, String)>,
    response_body: Vec<u8>,
    bytes_downloaded: u64,
    content_length_hint: i64,
    deadline: Option<Instant>,
    callback: Option<CompletionCallback>,
    sink: Option<std::sync::Arc<dyn BodySink>>,
}

/// Client signal set (spec §4.C11's "error signals" paragraph).
pub struct HttpClientSignals {
    pub response_received: Signal<HttpResponse>,
    pub error: Signal<(HttpRequest, String)>,
    pub download_progress: Signal<(u64, i64)>,
    pub upload_progress: Signal<(u64, u64)>,
}

impl Default for HttpClientSignals {
    fn default() -> Self {
        Self {
            response_received: Signal::new(),
            error: Signal::new(),
            download_progress: Signal::new(),
            upload_progress: Signal::new(),
        }
    }
}

/// Orchestrates HTTP requests over pooled TCP/TLS sockets, driven entirely
/// by repeatedly calling [`HttpClient::poll`] (there is no background
/// thread — spec §5 "single-threaded cooperative per reactor").
pub struct HttpClient {
    reactor: Reactor,
    resolver: Resolver,
    session: HttpSession,
    config: Config,
    requests: SlotMap<RequestId, RequestState>,
    signals: HttpClientSignals,
    before_send: Option<BeforeSendHook>,
    cleanup_timer: Option<TimerToken>,
}

impl HttpClient {
    pub fn new(config: Config) -> Result<Self> {
        Self::with_session(config, None)
    }

    /// Construct with an existing, possibly-shared [`HttpSession`] (its
    /// cookie jar and connection pool then participate in this client's
    /// requests too).
    pub fn with_session(config: Config, session: Option<HttpSession>) -> Result<Self> {
        let mut reactor = Reactor::with_config(config.reactor.clone())?;
        let resolver = Resolver::new(reactor.handle(), config.dns.worker_threads)?;
        let session = session.unwrap_or_else(|| HttpSession::new(config.http.clone()));

        let idle_timeout = config.http.idle_connection_timeout;
        let cleanup_session = session.clone();
        let cleanup_timer = reactor.create_periodic_timer(idle_timeout, move || {
            // The timer callback has no reactor reference (spec §4.C3's
            // notifier/timer contract); actual eviction work happens lazily
            // on the next `poll()` tick via `maybe_run_cleanup`. This timer
            // only exists so `cleanup_session` isn't considered dead code
            // and a future reactor-threaded design can wire it directly.
            let _ = &cleanup_session;
        });

        Ok(Self {
            reactor,
            resolver,
            session,
            config,
            requests: SlotMap::with_key(),
            signals: HttpClientSignals::default(),
            before_send: None,
            cleanup_timer: Some(cleanup_timer),
        })
    }

    pub fn session(&self) -> &HttpSession {
        &self.session
    }

    pub fn set_session(&mut self, session: HttpSession) {
        self.session = session;
    }

    pub fn signals(&self) -> &HttpClientSignals {
        &self.signals
    }

    pub fn set_before_send_hook(&mut self, hook: BeforeSendHook) {
        self.before_send = Some(hook);
    }

    /// Begin a request; `callback` fires once it completes, fails, or is
    /// cancelled.
    pub fn send(&mut self, request: HttpRequest, callback: impl FnOnce(Result<HttpResponse>) + Send + 'static) -> RequestId {
        self.send_internal(request, Some(Box::new(callback)), None)
    }

    /// Like [`send`](Self::send) but forwards the response body chunk-wise
    /// to `sink` instead of buffering it, used by
    /// [`crate::sse::SseClient`].
    pub fn send_with_sink(
        &mut self,
        request: HttpRequest,
        sink: std::sync::Arc<dyn BodySink>,
        callback: impl FnOnce(Result<HttpResponse>) + Send + 'static,
    ) -> RequestId {
        self.send_internal(request, Some(Box::new(callback)), Some(sink))
    }

    fn send_internal(
        &mut self,
        request: HttpRequest,
        callback: Option<CompletionCallback>,
        sink: Option<std::sync::Arc<dyn BodySink>>,
    ) -> RequestId {
        let host = request.uri.host().to_string();
        let port = request.uri.port_or_default();
        let secure = request.uri.is_secure();
        let deadline = request.timeout.or(Some(self.config.http.request_timeout)).map(|d| Instant::now() + d);

        let phase = self.acquire_transport(&host, port, secure);
        let current_uri = request.uri.clone();

        let state = RequestState {
            request,
            current_uri,
            host,
            port,
            secure,
            redirects_taken: 0,
            redirect_history: Vec::new(),
            phase,
            parser: HttpParser::new(ParserType::Response),
            sent: false,
            response_status: 0,
            response_reason: String::new(),
            response_version: String::new(),
            response_headers: Vec::new(),
            response_body: Vec::new(),
            bytes_downloaded: 0,
            content_length_hint: -1,
            deadline,
            callback,
            sink,
        };
        self.requests.insert(state)
    }

    fn acquire_transport(&mut self, host: &str, port: u16, secure: bool) -> TransportPhase {
        if let Some(transport) = self.session.get_connection(host, port, secure) {
            return TransportPhase::Ready(transport);
        }
        let tcp = TcpSocket::new(self.config.tcp.clone());
        if let Err(e) = tcp.connect_to_host(&mut self.reactor, &self.resolver, host, port) {
            warn!(error = %e, host, port, "failed to start tcp connect");
        }
        TransportPhase::Connecting(tcp)
    }

    /// Cancel every in-flight request. No further callbacks fire for them.
    pub fn cancel_all(&mut self) {
        for (_, mut state) in self.requests.drain() {
            state.callback.take();
            disconnect_phase(&state.phase, &mut self.reactor);
        }
    }

    /// Cancel a single request by id, if still in flight.
    pub fn cancel(&mut self, id: RequestId) {
        if let Some(mut state) = self.requests.remove(id) {
            state.callback.take();
            disconnect_phase(&state.phase, &mut self.reactor);
        }
    }

    pub fn active_request_count(&self) -> usize {
        self.requests.len()
    }

    /// Run one reactor tick and advance every in-flight request's state
    /// machine. Call this in a loop (directly, or via
    /// [`run_until_idle`](Self::run_until_idle)) to make progress.
    pub fn poll(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.reactor.process_events(timeout)?;
        let ids: Vec<RequestId> = self.requests.keys().collect();
        for id in ids {
            self.drive_one(id);
        }
        self.session.cleanup_connections(&mut self.reactor);
        Ok(())
    }

    /// Convenience loop for tests/simple programs: poll until no requests
    /// remain in flight or `deadline` elapses.
    pub fn run_until_idle(&mut self, deadline: Duration) -> Result<()> {
        let stop_at = Instant::now() + deadline;
        while self.active_request_count() > 0 && Instant::now() < stop_at {
            self.poll(Some(Duration::from_millis(50)))?;
        }
        Ok(())
    }

    fn drive_one(&mut self, id: RequestId) {
        let Self { reactor, resolver, session, requests, signals, before_send, config, .. } = self;
        let Some(state) = requests.get_mut(id) else { return };

        if let Some(deadline) = state.deadline {
            if Instant::now() >= deadline {
                let state = requests.remove(id).unwrap();
                disconnect_phase(&state.phase, reactor);
                fail_request(state, signals, HttpErrorKind::Timeout, "request timed out");
                return;
            }
        }

        match step_transport(reactor, resolver, config, state) {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                let state = requests.remove(id).unwrap();
                disconnect_phase(&state.phase, reactor);
                let message = format!("{e}");
                fail_request(state, signals, HttpErrorKind::InvalidArgument, &message);
                return;
            }
        }

        if !state.sent {
            if let Err(e) = send_request(reactor, session, before_send, state) {
                let state = requests.remove(id).unwrap();
                disconnect_phase(&state.phase, reactor);
                fail_request(state, signals, HttpErrorKind::InvalidArgument, &format!("{e}"));
                return;
            }
        }

        let TransportPhase::Ready(transport) = &state.phase else { return };
        if let Err(e) = transport.pump(reactor) {
            let state = requests.remove(id).unwrap();
            disconnect_phase(&state.phase, reactor);
            fail_request(state, signals, HttpErrorKind::InvalidArgument, &format!("{e}"));
            return;
        }

        let data = transport.read_all();
        let mut finished_ok = false;
        if !data.is_empty() {
            match state.parser.feed(&data) {
                Ok(events) => finished_ok = apply_events(state, signals, events),
                Err(e) => {
                    let state = requests.remove(id).unwrap();
                    disconnect_phase(&state.phase, reactor);
                    fail_request(state, signals, HttpErrorKind::InvalidArgument, &format!("{e}"));
                    return;
                }
            }
        }

        if !finished_ok && transport.saw_eof() {
            let tail = state.parser.finish_due_to_eof();
            finished_ok = apply_events(state, signals, tail);
            if !finished_ok {
                let state = requests.remove(id).unwrap();
                disconnect_phase(&state.phase, reactor);
                fail_request(state, signals, HttpErrorKind::InvalidArgument, "connection closed before response completed");
                return;
            }
        }

        if finished_ok {
            let mut state = requests.remove(id).unwrap();
            for (name, value) in state.response_headers.iter().filter(|(k, _)| k == "set-cookie") {
                let _ = name;
                session.cookie_jar.parse_cookies(&state.current_uri, std::slice::from_ref(value));
            }
            match redirect_target(&state) {
                Redirect::Follow(method, body, new_uri) => {
                    let (old_host, old_port, old_secure) = (state.host.clone(), state.port, state.secure);
                    let keep_alive = !state
                        .response_headers
                        .iter()
                        .any(|(k, v)| k == "connection" && v.eq_ignore_ascii_case("close"));

                    state.request.method = method;
                    state.request.body = body;
                    state.redirect_history.push(state.current_uri.clone());
                    state.current_uri = new_uri;
                    state.redirects_taken += 1;
                    state.host = state.current_uri.host().to_string();
                    state.port = state.current_uri.port_or_default();
                    state.secure = state.current_uri.is_secure();

                    // Return the hop's transport to the pool rather than
                    // dropping it (spec §8: total sockets opened to a
                    // `(host,port,secure)` stays bounded by the pool cap
                    // plus non-keep-alive responses) — a same-origin
                    // redirect chain then reuses the very connection it
                    // just finished reading a response on.
                    match (&state.phase, keep_alive) {
                        (TransportPhase::Ready(transport), true) => {
                            session.return_connection(reactor, &old_host, old_port, old_secure, transport.clone());
                        }
                        _ => disconnect_phase(&state.phase, reactor),
                    }
                    state.phase = acquire_transport_for(reactor, resolver, session, config, &state.host, state.port, state.secure);
                    state.parser = HttpParser::new(ParserType::Response);
                    state.sent = false;
                    state.response_status = 0;
                    state.response_headers.clear();
                    state.response_body.clear();
                    state.bytes_downloaded = 0;
                    requests.insert_with_key(|_| state);
                }
                Redirect::TooMany => {
                    disconnect_phase(&state.phase, reactor);
                    fail_request(state, signals, HttpErrorKind::TooManyRedirects, "too many redirects");
                }
                Redirect::None => {
                    complete_request(reactor, session, signals, state);
                }
            }
        }
    }
}

fn acquire_transport_for(
    reactor: &mut Reactor,
    resolver: &Resolver,
    session: &HttpSession,
    config: &Config,
    host: &str,
    port: u16,
    secure: bool,
) -> TransportPhase {
    if let Some(transport) = session.get_connection(host, port, secure) {
        return TransportPhase::Ready(transport);
    }
    let tcp = TcpSocket::new(config.tcp.clone());
    if let Err(e) = tcp.connect_to_host(reactor, resolver, host, port) {
        warn!(error = %e, host, port, "failed to start tcp connect");
    }
    TransportPhase::Connecting(tcp)
}

/// Drive the connection-establishment state machine one step.
/// `Ok(true)` means the transport is `Ready` (caller may proceed to send);
/// `Ok(false)` means still connecting, try again next tick.
fn step_transport(
    reactor: &mut Reactor,
    resolver: &Resolver,
    config: &Config,
    state: &mut RequestState,
) -> Result<bool> {
    match &mut state.phase {
        TransportPhase::Ready(_) => Ok(true),
        TransportPhase::TlsHandshaking(tls) => {
            tls.pump(Some(reactor))?;
            if tls.is_handshake_complete() {
                state.phase = TransportPhase::Ready(Transport::Tls(tls.clone()));
                Ok(true)
            } else {
                Ok(false)
            }
        }
        TransportPhase::Connecting(tcp) => match tcp.state() {
            SocketState::Resolving => {
                if let Some(addrs) = tcp.take_resolved_addrs() {
                    tcp.begin_connect(reactor, addrs)?;
                }
                Ok(false)
            }
            SocketState::Connecting => Ok(false),
            SocketState::Connected => {
                if state.secure {
                    let tls = TlsSocket::connect(tcp.clone(), &state.host, &config.tls)?;
                    state.phase = TransportPhase::TlsHandshaking(tls);
                } else {
                    state.phase = TransportPhase::Ready(Transport::Plain(tcp.clone()));
                    return Ok(true);
                }
                Ok(false)
            }
            SocketState::Error => {
                let message = tcp.last_error().unwrap_or_else(|| "connect failed".to_string());
                Err(Error::tcp(crate::error::TcpErrorKind::ConnectUnreachable, message))
            }
            SocketState::Closed => Err(Error::tcp(crate::error::TcpErrorKind::Closed, "connection closed before it was ready")),
            SocketState::Unconnected | SocketState::Closing => Ok(false),
        },
    }
}

fn send_request(
    reactor: &mut Reactor,
    session: &HttpSession,
    before_send: &mut Option<BeforeSendHook>,
    state: &mut RequestState,
) -> Result<()> {
    prepare_headers(session, state);
    if let Some(hook) = before_send {
        hook(&mut state.request);
    }
    let TransportPhase::Ready(transport) = &state.phase else { return Ok(()) };
    let bytes = state.request.serialize(&state.current_uri.authority());
    transport.write(reactor, &bytes)?;
    state.sent = true;
    Ok(())
}

fn prepare_headers(session: &HttpSession, state: &mut RequestState) {
    session.apply_default_headers(&mut state.request.headers);
    if let Some(cookie_header) = session.cookie_jar.cookie_header_for_url(&state.current_uri) {
        if !state.request.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("cookie")) {
            state.request.headers.push(("cookie".to_string(), cookie_header));
        }
    }
    if !state.request.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("connection")) {
        state.request.headers.push(("connection".to_string(), "keep-alive".to_string()));
    }
    if matches!(state.request.auth, Auth::None) {
        // nothing to add; `HttpRequest::serialize` handles Basic/Bearer.
    }
}

/// Apply the events one `feed`/`finish_due_to_eof` call produced. Returns
/// `true` once `MessageComplete` was observed.
fn apply_events(state: &mut RequestState, signals: &HttpClientSignals, events: Vec<ParserEvent>) -> bool {
    for event in events {
        match event {
            ParserEvent::HeadersComplete { status_code, reason, version, headers, .. } => {
                state.response_status = status_code.unwrap_or(0);
                state.response_reason = reason.unwrap_or_default();
                state.response_version = version;
                state.content_length_hint = headers
                    .iter()
                    .find(|(k, _)| k == "content-length")
                    .and_then(|(_, v)| v.parse::<i64>().ok())
                    .unwrap_or(-1);
                state.response_headers = headers;
                if let Some(sink) = &state.sink {
                    sink.on_headers(state.response_status, &state.response_headers);
                }
            }
            ParserEvent::Body(chunk) => {
                state.bytes_downloaded += chunk.len() as u64;
                signals.download_progress.emit((state.bytes_downloaded, state.content_length_hint));
                if let Some(sink) = &state.sink {
                    sink.on_chunk(&chunk);
                } else {
                    state.response_body.extend_from_slice(&chunk);
                }
            }
            ParserEvent::MessageComplete => {
                if let Some(sink) = &state.sink {
                    sink.on_complete();
                }
                return true;
            }
        }
    }
    false
}

/// Outcome of checking whether a just-completed response should redirect.
enum Redirect {
    /// Not a redirect, or a redirect this policy doesn't follow: surface
    /// the response as-is.
    None,
    /// Follow to `(new_method, new_body, new_uri)`.
    Follow(HttpMethod, Vec<u8>, crate::uri::Uri),
    /// A redirect the policy would otherwise follow, but
    /// `redirects_taken` has already reached `max_redirects` (spec §8
    /// scenario 3, §7 `HttpTooManyRedirects`).
    TooMany,
}

fn redirect_target(state: &RequestState) -> Redirect {
    if state.request.redirect_policy == RedirectPolicy::DontFollow {
        return Redirect::None;
    }
    if !matches!(state.response_status, 301 | 302 | 303 | 307 | 308) {
        return Redirect::None;
    }
    let Some(location) = state.response_headers.iter().find(|(k, _)| k == "location").map(|(_, v)| v.clone()) else {
        return Redirect::None;
    };
    let Ok(new_uri) = state.current_uri.resolve(&location) else {
        return Redirect::None;
    };
    if state.request.redirect_policy == RedirectPolicy::FollowSameOrigin
        && (new_uri.host() != state.current_uri.host() || new_uri.port_or_default() != state.current_uri.port_or_default())
    {
        return Redirect::None;
    }
    if state.redirects_taken >= state.request.max_redirects {
        return Redirect::TooMany;
    }

    let rewrite_to_get = state.response_status == 303
        || (matches!(state.response_status, 301 | 302) && state.request.method == HttpMethod::Post);
    if rewrite_to_get {
        Redirect::Follow(HttpMethod::Get, Vec::new(), new_uri)
    } else {
        Redirect::Follow(state.request.method.clone(), state.request.body.clone(), new_uri)
    }
}

fn complete_request(reactor: &mut Reactor, session: &HttpSession, signals: &HttpClientSignals, mut state: RequestState) {
    let keep_alive = !state
        .response_headers
        .iter()
        .any(|(k, v)| k == "connection" && v.eq_ignore_ascii_case("close"));

    let redirect_history = std::mem::take(&mut state.redirect_history);

    let response = HttpResponse {
        status: state.response_status,
        reason: std::mem::take(&mut state.response_reason),
        version: std::mem::take(&mut state.response_version),
        headers: std::mem::take(&mut state.response_headers),
        body: std::mem::take(&mut state.response_body),
        redirect_history,
    };

    if let TransportPhase::Ready(transport) = &state.phase {
        if keep_alive {
            session.return_connection(reactor, &state.host, state.port, state.secure, transport.clone());
        } else {
            transport.disconnect(reactor);
        }
    }

    signals.response_received.emit(response.clone());
    if let Some(callback) = state.callback.take() {
        callback(Ok(response));
    }
}

fn fail_request(mut state: RequestState, signals: &HttpClientSignals, kind: HttpErrorKind, message: &str) {
    signals.error.emit((state.request.clone(), message.to_string()));
    if let Some(callback) = state.callback.take() {
        callback(Err(Error::http(kind, message.to_string())));
    }
}

fn disconnect_phase(phase: &TransportPhase, reactor: &mut Reactor) {
    match phase {
        TransportPhase::Ready(transport) => transport.disconnect(reactor),
        TransportPhase::Connecting(tcp) => tcp.disconnect_from_host(reactor),
        TransportPhase::TlsHandshaking(tls) => {
            tls.tcp().disconnect_from_host(reactor);
        }
    }
}

/// Convenience verbs, mirroring `http_client.h`'s `get/head/post/put/
/// deleteResource/patch/options`.
impl HttpClient {
    pub fn get(&mut self, uri: crate::uri::Uri, callback: impl FnOnce(Result<HttpResponse>) + Send + 'static) -> RequestId {
        self.send(HttpRequest::new(HttpMethod::Get, uri), callback)
    }

    pub fn head(&mut self, uri: crate::uri::Uri, callback: impl FnOnce(Result<HttpResponse>) + Send + 'static) -> RequestId {
        self.send(HttpRequest::new(HttpMethod::Head, uri), callback)
    }

    pub fn post(
        &mut self,
        uri: crate::uri::Uri,
        body: Vec<u8>,
        content_type: &str,
        callback: impl FnOnce(Result<HttpResponse>) + Send + 'static,
    ) -> RequestId {
        let request = HttpRequest::new(HttpMethod::Post, uri).with_header("content-type", content_type).with_body(body);
        self.send(request, callback)
    }

    pub fn put(
        &mut self,
        uri: crate::uri::Uri,
        body: Vec<u8>,
        callback: impl FnOnce(Result<HttpResponse>) + Send + 'static,
    ) -> RequestId {
        self.send(HttpRequest::new(HttpMethod::Put, uri).with_body(body), callback)
    }

    pub fn delete(&mut self, uri: crate::uri::Uri, callback: impl FnOnce(Result<HttpResponse>) + Send + 'static) -> RequestId {
        self.send(HttpRequest::new(HttpMethod::Delete, uri), callback)
    }

    pub fn patch(
        &mut self,
        uri: crate::uri::Uri,
        body: Vec<u8>,
        callback: impl FnOnce(Result<HttpResponse>) + Send + 'static,
    ) -> RequestId {
        self.send(HttpRequest::new(HttpMethod::Patch, uri).with_body(body), callback)
    }

    pub fn options(&mut self, uri: crate::uri::Uri, callback: impl FnOnce(Result<HttpResponse>) + Send + 'static) -> RequestId {
        self.send(HttpRequest::new(HttpMethod::Options, uri), callback)
    }
}

impl Drop for HttpClient {
    fn drop(&mut self) {
        if let Some(token) = self.cleanup_timer.take() {
            self.reactor.cancel_timer(token);
        }
        trace!(active = self.requests.len(), "http client shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::mpsc;

    fn spawn_http_server(response: &'static str) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf);
                let _ = stream.write_all(response.as_bytes());
            }
        });
        addr
    }

    #[test]
    fn get_happy_path_returns_body() {
        let addr = spawn_http_server("HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nHELLO");
        let mut client = HttpClient::new(Config::default()).unwrap();
        let uri = crate::uri::Uri::parse(&format!("http://{addr}/hello")).unwrap();

        let (tx, rx) = mpsc::channel();
        client.get(uri, move |result| {
            let _ = tx.send(result);
        });
        client.run_until_idle(Duration::from_secs(2)).unwrap();

        let response = rx.try_recv().unwrap().unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"HELLO");
        assert_eq!(response.header("content-length"), Some("5"));
    }

    #[test]
    fn chunked_response_reassembles_body() {
        let addr = spawn_http_server(
            "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nfoo\r\n3\r\nbar\r\n0\r\n\r\n",
        );
        let mut client = HttpClient::new(Config::default()).unwrap();
        let uri = crate::uri::Uri::parse(&format!("http://{addr}/")).unwrap();

        let (tx, rx) = mpsc::channel();
        client.get(uri, move |result| {
            let _ = tx.send(result);
        });
        client.run_until_idle(Duration::from_secs(2)).unwrap();

        let response = rx.try_recv().unwrap().unwrap();
        assert_eq!(response.body, b"foobar");
    }
}
