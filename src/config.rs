//! Configuration for the reactor and the networking components layered on
//! top of it. Follows the teacher crate's `serde` + `toml` + builder
//! pattern, scoped down to what a client stack needs (no bind address / no
//! hot-reload machinery — this isn't a server).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration tree for a [`crate::reactor::Reactor`] and the
/// networking components it drives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Reactor tuning.
    pub reactor: ReactorConfig,
    /// DNS resolver tuning.
    pub dns: DnsConfig,
    /// TCP socket tuning.
    pub tcp: TcpConfig,
    /// TLS defaults.
    pub tls: TlsConfig,
    /// HTTP client/session defaults.
    pub http: HttpConfig,
    /// WebSocket client defaults.
    pub websocket: WebSocketConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reactor: ReactorConfig::default(),
            dns: DnsConfig::default(),
            tcp: TcpConfig::default(),
            tls: TlsConfig::default(),
            http: HttpConfig::default(),
            websocket: WebSocketConfig::default(),
        }
    }
}

/// Reactor wait-loop tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactorConfig {
    /// Maximum number of readiness events drained from one `poll` call.
    pub max_events_per_poll: usize,
    /// Upper bound on how long a single `processEvents` wait blocks when the
    /// caller didn't ask for a shorter timeout and no timer is pending.
    #[serde(with = "duration_ms")]
    pub max_poll_wait: Duration,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            max_events_per_poll: 1024,
            max_poll_wait: Duration::from_secs(1),
        }
    }
}

/// DNS resolver tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Number of background worker threads performing blocking resolution.
    pub worker_threads: usize,
    /// Per-lookup timeout.
    #[serde(with = "duration_ms")]
    pub lookup_timeout: Duration,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            worker_threads: 2,
            lookup_timeout: Duration::from_secs(10),
        }
    }
}

/// TCP socket tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpConfig {
    /// Size of the staging buffer used to drain readiness-triggered reads.
    pub read_chunk_size: usize,
    /// How long a graceful close waits for the write buffer to flush before
    /// forcing `shutdown(RDWR)`.
    #[serde(with = "duration_ms")]
    pub close_timeout: Duration,
    /// Disable Nagle's algorithm on new sockets.
    pub nodelay: bool,
    /// How long a non-blocking `connect()` may stay unresolved before the
    /// socket fails with `TcpErrorKind::ConnectTimeout`.
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            read_chunk_size: 16 * 1024,
            close_timeout: Duration::from_secs(3),
            nodelay: true,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Default TLS posture for new TLS sockets (overridable per connection).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Certificate verification mode.
    pub verification: VerificationMode,
    /// Extra PEM-encoded CA certificates to trust, beyond the bundled
    /// webpki-roots trust store.
    pub extra_ca_pem_paths: Vec<String>,
    /// PEM-encoded client certificate chain for mutual TLS, paired with
    /// `client_key_pem_path`. Both must be set together; neither set means
    /// no client certificate is presented during the handshake.
    pub client_cert_pem_path: Option<String>,
    /// PEM-encoded private key for `client_cert_pem_path`.
    pub client_key_pem_path: Option<String>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            verification: VerificationMode::Peer,
            extra_ca_pem_paths: Vec::new(),
            client_cert_pem_path: None,
            client_key_pem_path: None,
        }
    }
}

/// Certificate verification posture (spec §3 C7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationMode {
    /// Do not verify the peer certificate at all.
    None,
    /// Require and verify a peer certificate.
    Peer,
    /// Verify the peer certificate if one is presented; accept its absence.
    PeerIfPresent,
}

/// HTTP client/session defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// `User-Agent` header value applied when the request doesn't set one.
    pub user_agent: String,
    /// Maximum sockets kept idle per `(host, port, secure)` pool key.
    pub max_connections_per_host: usize,
    /// How long an idle pooled connection survives before eviction.
    #[serde(with = "duration_ms")]
    pub idle_connection_timeout: Duration,
    /// Default per-request timeout.
    #[serde(with = "duration_ms")]
    pub request_timeout: Duration,
    /// Default maximum redirect hops.
    pub max_redirects: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("vortex/", env!("CARGO_PKG_VERSION")).to_string(),
            max_connections_per_host: 6,
            idle_connection_timeout: Duration::from_secs(90),
            request_timeout: Duration::from_secs(30),
            max_redirects: 10,
        }
    }
}

/// WebSocket client defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    /// Maximum single-frame/message payload before it is rejected or
    /// fragmented on send.
    pub max_payload_size: usize,
    /// Idle-ping interval.
    #[serde(with = "duration_ms")]
    pub ping_interval: Duration,
    /// Bound on how long a local close waits for the peer's close frame.
    #[serde(with = "duration_ms")]
    pub close_timeout: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_payload_size: 1024 * 1024,
            ping_interval: Duration::from_secs(30),
            close_timeout: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Load and validate configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::config(format!("failed to read {:?}: {e}", path.as_ref())))?;
        let config: Self = toml::from_str(&text)
            .map_err(|e| Error::config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Sanity-check cross-field invariants that serde can't express.
    pub fn validate(&self) -> Result<()> {
        if self.http.max_connections_per_host == 0 {
            return Err(Error::config("http.max_connections_per_host must be > 0"));
        }
        if self.websocket.max_payload_size == 0 {
            return Err(Error::config("websocket.max_payload_size must be > 0"));
        }
        if self.reactor.max_events_per_poll == 0 {
            return Err(Error::config("reactor.max_events_per_poll must be > 0"));
        }
        Ok(())
    }
}

/// Builder for programmatic configuration, mirroring the fluent style used
/// elsewhere in this crate for request/URI construction.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Start from the default configuration.
    pub fn new() -> Self {
        Self { config: Config::default() }
    }

    /// Override HTTP settings.
    pub fn http(mut self, http: HttpConfig) -> Self {
        self.config.http = http;
        self
    }

    /// Override TLS settings.
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.config.tls = tls;
        self
    }

    /// Override WebSocket settings.
    pub fn websocket(mut self, ws: WebSocketConfig) -> Self {
        self.config.websocket = ws;
        self
    }

    /// Finish building.
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn builder_produces_valid_config() {
        let config = ConfigBuilder::new()
            .http(HttpConfig { max_connections_per_host: 2, ..HttpConfig::default() })
            .build()
            .unwrap();
        assert_eq!(config.http.max_connections_per_host, 2);
    }

    #[test]
    fn rejects_zero_pool_size() {
        let mut config = Config::default();
        config.http.max_connections_per_host = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn roundtrips_through_toml() {
        let config = Config::default();
        let text = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.http.max_redirects, config.http.max_redirects);
    }
}
