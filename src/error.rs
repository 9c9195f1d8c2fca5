//! Error taxonomy for the vortex networking stack.
//!
//! One enum covers every component (reactor, DNS, TCP, TLS, HTTP, SSE,
//! WebSocket) so callers can match on [`Error::category`] without caring
//! which layer raised it, while each variant still carries enough context
//! to reconstruct the fine-grained kinds in spec §7.

/// Result type alias used throughout vortex.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by any part of the vortex stack.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Low-level I/O failure (syscalls, file descriptors).
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Malformed or unsupported URI.
    #[error("invalid URI: {message}")]
    InvalidUri {
        /// Descriptive error message.
        message: String,
    },

    /// DNS resolution failure.
    #[error("DNS error ({kind:?}): {message}")]
    Dns {
        /// Which DNS failure this is.
        kind: DnsErrorKind,
        /// Descriptive error message.
        message: String,
    },

    /// TCP connect/read/write failure.
    #[error("TCP error ({kind:?}): {message}")]
    Tcp {
        /// Which TCP failure this is.
        kind: TcpErrorKind,
        /// Descriptive error message.
        message: String,
    },

    /// TLS handshake or record-layer failure.
    #[error("TLS error ({kind:?}): {message}")]
    Tls {
        /// Which TLS failure this is.
        kind: TlsErrorKind,
        /// Descriptive error message.
        message: String,
    },

    /// Incremental HTTP parser rejected the input.
    #[error("HTTP parse error: {message}")]
    HttpParse {
        /// Descriptive error message.
        message: String,
    },

    /// HTTP client-level failure (redirects, timeouts).
    #[error("HTTP error ({kind:?}): {message}")]
    Http {
        /// Which HTTP client failure this is.
        kind: HttpErrorKind,
        /// Descriptive error message.
        message: String,
    },

    /// Server-Sent Events transport failure.
    #[error("SSE error ({kind:?}): {message}")]
    Sse {
        /// Which SSE failure this is.
        kind: SseErrorKind,
        /// Descriptive error message.
        message: String,
    },

    /// WebSocket handshake or protocol failure.
    #[error("WebSocket error ({kind:?}): {message}")]
    Ws {
        /// Which WebSocket failure this is.
        kind: WsErrorKind,
        /// Descriptive error message.
        message: String,
    },

    /// Reactor internal failure (poll/wake channel).
    #[error("reactor error: {message}")]
    Reactor {
        /// Descriptive error message.
        message: String,
    },

    /// Configuration load/validation failure.
    #[error("configuration error: {message}")]
    Config {
        /// Descriptive error message.
        message: String,
    },

    /// An in-flight operation was explicitly cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// Catch-all for conditions not worth a dedicated variant.
    #[error("{message}")]
    Other {
        /// Descriptive error message.
        message: String,
    },
}

/// DNS-specific error kinds (spec §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsErrorKind {
    /// The host name did not resolve to any address.
    NotFound,
    /// The lookup exceeded its deadline.
    Timeout,
    /// The lookup was cancelled before completing.
    Cancelled,
    /// The resolver's background worker pool failed to start.
    ResolverInitFailed,
    /// Platform resolver returned an error this crate doesn't classify.
    Other,
}

/// TCP-specific error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpErrorKind {
    /// Peer actively refused the connection.
    ConnectRefused,
    /// The connect attempt exceeded its deadline.
    ConnectTimeout,
    /// No route to the peer.
    ConnectUnreachable,
    /// Peer reset the connection.
    Reset,
    /// Peer closed the connection (clean EOF).
    Closed,
    /// Other I/O failure during an established connection.
    Io,
}

/// TLS-specific error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsErrorKind {
    /// The handshake failed before a session was established.
    HandshakeFailed,
    /// The peer certificate failed verification.
    CertificateInvalid,
    /// I/O failure on an already-established TLS session.
    Io,
}

/// HTTP client-level error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpErrorKind {
    /// Redirects formed a cycle.
    RedirectLoop,
    /// The redirect chain exceeded the configured maximum.
    TooManyRedirects,
    /// The request exceeded its configured timeout.
    Timeout,
    /// Request construction was invalid (bad method/header/scheme).
    InvalidArgument,
}

/// SSE-specific error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SseErrorKind {
    /// Response `Content-Type` was not `text/event-stream`.
    BadContentType,
    /// Response status code was outside `200..300`.
    HttpStatus(u16),
}

/// WebSocket-specific error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsErrorKind {
    /// The server declined the Upgrade handshake.
    HandshakeRejected(u16),
    /// `Sec-WebSocket-Accept` did not match the expected hash.
    BadAccept,
    /// A frame or fragmentation-sequence violation.
    ProtocolError,
    /// A frame announced a payload larger than the configured maximum.
    MessageTooBig,
    /// The connection dropped without a clean close handshake.
    AbnormalClosure,
}

impl Error {
    /// Construct an [`Error::InvalidUri`].
    pub fn invalid_uri(message: impl Into<String>) -> Self {
        Self::InvalidUri { message: message.into() }
    }

    /// Construct an [`Error::Dns`].
    pub fn dns(kind: DnsErrorKind, message: impl Into<String>) -> Self {
        Self::Dns { kind, message: message.into() }
    }

    /// Construct an [`Error::Tcp`].
    pub fn tcp(kind: TcpErrorKind, message: impl Into<String>) -> Self {
        Self::Tcp { kind, message: message.into() }
    }

    /// Construct an [`Error::Tls`].
    pub fn tls(kind: TlsErrorKind, message: impl Into<String>) -> Self {
        Self::Tls { kind, message: message.into() }
    }

    /// Construct an [`Error::HttpParse`].
    pub fn http_parse(message: impl Into<String>) -> Self {
        Self::HttpParse { message: message.into() }
    }

    /// Construct an [`Error::Http`].
    pub fn http(kind: HttpErrorKind, message: impl Into<String>) -> Self {
        Self::Http { kind, message: message.into() }
    }

    /// Construct an [`Error::Sse`].
    pub fn sse(kind: SseErrorKind, message: impl Into<String>) -> Self {
        Self::Sse { kind, message: message.into() }
    }

    /// Construct an [`Error::Ws`].
    pub fn ws(kind: WsErrorKind, message: impl Into<String>) -> Self {
        Self::Ws { kind, message: message.into() }
    }

    /// Construct an [`Error::Reactor`].
    pub fn reactor(message: impl Into<String>) -> Self {
        Self::Reactor { message: message.into() }
    }

    /// Construct an [`Error::Config`].
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// Construct an [`Error::Other`].
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other { message: message.into() }
    }

    /// Coarse category name, stable across variant detail changes — useful
    /// for metrics labels and log fields.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Io { .. } => "io",
            Self::InvalidUri { .. } => "uri",
            Self::Dns { .. } => "dns",
            Self::Tcp { .. } => "tcp",
            Self::Tls { .. } => "tls",
            Self::HttpParse { .. } => "http_parse",
            Self::Http { .. } => "http",
            Self::Sse { .. } => "sse",
            Self::Ws { .. } => "ws",
            Self::Reactor { .. } => "reactor",
            Self::Config { .. } => "config",
            Self::Cancelled => "cancelled",
            Self::Other { .. } => "other",
        }
    }
}
