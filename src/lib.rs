//! Vortex: a reactor-driven client networking stack.
//!
//! Vortex is a single-threaded, cooperatively-scheduled foundation for
//! client network I/O: a reactor event loop with a deadline-ordered timer
//! set, cross-thread signal delivery, asynchronous DNS resolution,
//! non-blocking TCP and TLS transports, and an HTTP/1.1 client with
//! cookie jar, connection pooling, redirects, and streaming bodies for
//! Server-Sent Events and WebSocket on top.
//!
//! Nothing here spawns a background thread to drive I/O. A [`Reactor`]
//! (or, for the higher-level clients, their owning struct's `poll`
//! method) must be ticked by the caller — typically from a dedicated
//! thread running a tight `loop { client.poll(timeout) }`, the way the
//! original KDAB `KDFoundation`/`KDNetwork` event loop is driven from an
//! application's main loop.
//!
//! ## Modules
//!
//! - [`reactor`] — the event loop: I/O readiness, timers, posted events,
//!   and deferred cross-thread slot delivery.
//! - [`timer`] — the min-heap timer set backing [`reactor`].
//! - [`signal`] — a multi-subscriber signal/slot channel used throughout
//!   the rest of the crate for notifications.
//! - [`dns`] — asynchronous hostname resolution on a worker pool.
//! - [`net`] — non-blocking TCP and TLS-over-TCP transports.
//! - [`uri`] — an RFC 3986 URI parser.
//! - [`buffer`] — a growable byte buffer with base64 helpers.
//! - [`http`] — the HTTP/1.1 request pipeline: parser, cookie jar,
//!   session, and client.
//! - [`sse`] — a Server-Sent Events client layered on [`http`].
//! - [`ws`] — a WebSocket client: frame codec and connection state
//!   machine.
//! - [`config`] — typed, TOML-loadable configuration for every layer.
//! - [`error`] — the crate's unified error type.
//! - [`metrics`] — counters/gauges/histograms for the reactor and
//!   network layers.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all)]
#![allow(clippy::type_complexity)]

pub mod buffer;
pub mod config;
pub mod dns;
pub mod error;
pub mod http;
pub mod metrics;
pub mod net;
pub mod reactor;
pub mod signal;
pub mod sse;
pub mod timer;
pub mod uri;
pub mod ws;

pub use config::Config;
pub use error::{Error, Result};
pub use http::client::HttpClient;
pub use reactor::Reactor;
pub use sse::SseClient;
pub use uri::Uri;
pub use ws::client::WsClient;
