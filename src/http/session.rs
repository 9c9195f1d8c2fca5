//! Shared HTTP session state: cookies, default headers, and a pooled-
//! connection cache (spec §4.C10).
//!
//! Grounded in
//! `examples/original_source/src/KDNetwork/http_session.{h,cpp}`: the pool
//! is keyed by `(host, port, secure)` exactly as `ConnectionKey` is, popped
//! LIFO (`getConnection` takes `.back()`), capped at
//! `maxConnectionsPerHost` (`returnConnection` closes the excess socket
//! rather than growing the pool), and `cleanupConnections` evicts anything
//! disconnected or idle past `idleConnectionTimeout`. `std::map` ordering
//! has no Rust equivalent need — this uses `dashmap::DashMap` (the teacher
//! crate's choice for its connection registry) instead.

use crate::config::HttpConfig;
use crate::http::cookie::CookieJar;
use crate::net::Transport;
use crate::reactor::Reactor;
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

type PoolKey = (String, u16, bool);

struct PooledConn {
    transport: Transport,
    last_used: Instant,
}

/// Shared, cloneable HTTP session: cookie jar, default headers, and idle
/// connection pool. An [`super::client::HttpClient`] owns one; multiple
/// clients may share a session the way the original lets a caller pass an
/// existing `HttpSession` into a new `HttpClient` — every field here is
/// reference-counted so clones observe each other's mutations.
#[derive(Clone)]
pub struct HttpSession {
    pub cookie_jar: CookieJar,
    default_headers: Arc<Mutex<Vec<(String, String)>>>,
    pool: Arc<DashMap<PoolKey, Vec<PooledConn>>>,
    pub config: HttpConfig,
}

impl HttpSession {
    pub fn new(config: HttpConfig) -> Self {
        let default_headers = vec![
            ("user-agent".to_string(), config.user_agent.clone()),
            ("accept".to_string(), "*/*".to_string()),
        ];
        Self {
            cookie_jar: CookieJar::new(),
            default_headers: Arc::new(Mutex::new(default_headers)),
            pool: Arc::new(DashMap::new()),
            config,
        }
    }

    /// Header names are matched case-insensitively; always normalized and
    /// stored lowercase.
    pub fn set_default_header(&self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into().to_ascii_lowercase();
        let mut headers = self.default_headers.lock().unwrap();
        if let Some(existing) = headers.iter_mut().find(|(k, _)| *k == name) {
            existing.1 = value.into();
        } else {
            headers.push((name, value.into()));
        }
    }

    pub fn default_headers(&self) -> Vec<(String, String)> {
        self.default_headers.lock().unwrap().clone()
    }

    /// Apply a default header to `headers` only if the request didn't
    /// already set one with the same name (`applyDefaultHeaders`).
    pub fn apply_default_headers(&self, headers: &mut Vec<(String, String)>) {
        for (name, value) in self.default_headers.lock().unwrap().iter() {
            if !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name)) {
                headers.push((name.clone(), value.clone()));
            }
        }
    }

    /// Pop the most recently returned live connection for `(host, port,
    /// secure)`, if any.
    pub fn get_connection(&self, host: &str, port: u16, secure: bool) -> Option<Transport> {
        let key = (host.to_string(), port, secure);
        let mut entry = self.pool.get_mut(&key)?;
        while let Some(pooled) = entry.pop() {
            if pooled.transport.state() == crate::net::SocketState::Connected && !pooled.transport.saw_eof() {
                if entry.is_empty() {
                    drop(entry);
                    self.pool.remove(&key);
                }
                return Some(pooled.transport);
            }
        }
        drop(entry);
        self.pool.remove(&key);
        None
    }

    /// Return a connection to the pool for reuse, unless it's already dead,
    /// has seen EOF (spec §9 Open Question: never pool a socket that's seen
    /// EOF even if momentarily still `Connected`), or the pool for this key
    /// is already at `max_connections_per_host` (in which case it is closed
    /// instead).
    pub fn return_connection(&self, reactor: &mut Reactor, host: &str, port: u16, secure: bool, transport: Transport) {
        if transport.state() != crate::net::SocketState::Connected || transport.saw_eof() {
            transport.disconnect(reactor);
            return;
        }
        let key = (host.to_string(), port, secure);
        let mut entry = self.pool.entry(key).or_default();
        if entry.len() >= self.config.max_connections_per_host {
            drop(entry);
            transport.disconnect(reactor);
            return;
        }
        entry.push(PooledConn { transport, last_used: Instant::now() });
    }

    /// Evict dead or idle-too-long pooled connections. Intended to be
    /// driven by a periodic reactor timer (spec §3 supplemented feature).
    pub fn cleanup_connections(&self, reactor: &mut Reactor) {
        let idle_timeout = self.config.idle_connection_timeout;
        let keys: Vec<PoolKey> = self.pool.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some(mut entry) = self.pool.get_mut(&key) {
                let mut keep = Vec::new();
                for pooled in entry.drain(..) {
                    let dead = pooled.transport.state() != crate::net::SocketState::Connected
                        || pooled.transport.saw_eof();
                    let idle = pooled.last_used.elapsed() > idle_timeout;
                    if dead || idle {
                        pooled.transport.disconnect(reactor);
                    } else {
                        keep.push(pooled);
                    }
                }
                *entry = keep;
            }
            if self.pool.get(&key).map(|e| e.is_empty()).unwrap_or(false) {
                self.pool.remove(&key);
            }
        }
    }

    /// Total pooled (idle) connections across every host, for diagnostics.
    pub fn pooled_connection_count(&self) -> usize {
        self.pool.iter().map(|e| e.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_headers_include_user_agent_and_accept() {
        let session = HttpSession::new(HttpConfig::default());
        let mut headers = Vec::new();
        session.apply_default_headers(&mut headers);
        assert!(headers.iter().any(|(k, _)| k == "user-agent"));
        assert!(headers.iter().any(|(k, _)| k == "accept"));
    }

    #[test]
    fn apply_default_headers_does_not_override_existing() {
        let session = HttpSession::new(HttpConfig::default());
        let mut headers = vec![("accept".to_string(), "application/json".to_string())];
        session.apply_default_headers(&mut headers);
        let accept: Vec<_> = headers.iter().filter(|(k, _)| k == "accept").collect();
        assert_eq!(accept.len(), 1);
        assert_eq!(accept[0].1, "application/json");
    }

    #[test]
    fn empty_pool_returns_none() {
        let session = HttpSession::new(HttpConfig::default());
        assert!(session.get_connection("example.com", 443, true).is_none());
    }

    #[test]
    fn clone_shares_default_headers_and_cookie_jar() {
        let session = HttpSession::new(HttpConfig::default());
        let clone = session.clone();
        clone.set_default_header("x-custom", "1");
        assert!(session.default_headers().iter().any(|(k, _)| k == "x-custom"));
    }
}
