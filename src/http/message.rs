//! Request/response value types (spec §4.C11).
//!
//! There is no single original header for these (KDNetwork's
//! `http_request.h`/`http_response.h` weren't part of the retrieved
//! pack) — shaped directly from spec §4.C11's field list and from how
//! `http_client.h`'s convenience verbs (`get/head/post/put/deleteResource/
//! patch/options`) and `http_session.cpp`'s `applyDefaultHeaders` use them.

use crate::uri::Uri;
use std::time::Duration;

/// HTTP request method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Patch,
    Options,
    Other(String),
}

impl HttpMethod {
    pub fn as_str(&self) -> &str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Other(s) => s,
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How many, if any, redirect responses a request follows (spec §4.C11).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectPolicy {
    DontFollow,
    FollowSameOrigin,
    FollowAll,
}

/// Request-level authentication, applied as an `Authorization` header.
#[derive(Debug, Clone)]
pub enum Auth {
    None,
    Basic { username: String, password: String },
    Bearer(String),
}

/// An outbound HTTP request. Built fluently, mirroring [`Uri`]'s
/// `with_*` style.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub uri: Uri,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub timeout: Option<Duration>,
    pub redirect_policy: RedirectPolicy,
    pub max_redirects: u32,
    pub auth: Auth,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: Vec::new(),
            body: Vec::new(),
            timeout: None,
            redirect_policy: RedirectPolicy::FollowSameOrigin,
            max_redirects: 10,
            auth: Auth::None,
        }
    }

    pub fn get(uri: Uri) -> Self {
        Self::new(HttpMethod::Get, uri)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_redirect_policy(mut self, policy: RedirectPolicy, max_redirects: u32) -> Self {
        self.redirect_policy = policy;
        self.max_redirects = max_redirects;
        self
    }

    pub fn with_auth(mut self, auth: Auth) -> Self {
        self.auth = auth;
        self
    }

    /// Serialize the request line + headers + body into wire bytes, given
    /// the `Host` header value to use (the authority of whichever URI the
    /// request currently targets — may differ from `self.uri` after a
    /// redirect).
    pub fn serialize(&self, host_header: &str) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(format!("{} {} HTTP/1.1\r\n", self.method, self.uri.request_target()).as_bytes());
        out.extend_from_slice(format!("host: {host_header}\r\n").as_bytes());
        for (name, value) in &self.headers {
            out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        if !self.body.is_empty() && self.header("content-length").is_none() {
            out.extend_from_slice(format!("content-length: {}\r\n", self.body.len()).as_bytes());
        }
        match &self.auth {
            Auth::None => {}
            Auth::Basic { username, password } => {
                let token = crate::buffer::ByteBuffer::from(format!("{username}:{password}").as_bytes()).to_base64();
                out.extend_from_slice(format!("authorization: Basic {token}\r\n").as_bytes());
            }
            Auth::Bearer(token) => {
                out.extend_from_slice(format!("authorization: Bearer {token}\r\n").as_bytes());
            }
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

/// An inbound HTTP response.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// URIs visited before this response, oldest first, if redirects were
    /// followed.
    pub redirect_history: Vec<Uri>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }

    pub fn headers_named(&self, name: &str) -> Vec<&str> {
        self.headers.iter().filter(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str()).collect()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_request_line_and_headers() {
        let req = HttpRequest::get(Uri::parse("http://example.com/path?x=1").unwrap())
            .with_header("accept", "text/plain");
        let bytes = req.serialize("example.com");
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("GET /path?x=1 HTTP/1.1\r\n"));
        assert!(text.contains("host: example.com\r\n"));
        assert!(text.contains("accept: text/plain\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn serializes_body_with_content_length() {
        let req = HttpRequest::new(HttpMethod::Post, Uri::parse("http://example.com/submit").unwrap())
            .with_body(b"a=1".to_vec());
        let text = String::from_utf8(req.serialize("example.com")).unwrap();
        assert!(text.contains("content-length: 3\r\n"));
        assert!(text.ends_with("a=1"));
    }

    #[test]
    fn basic_auth_encodes_credentials() {
        let req = HttpRequest::get(Uri::parse("http://example.com/").unwrap())
            .with_auth(Auth::Basic { username: "alice".into(), password: "secret".into() });
        let text = String::from_utf8(req.serialize("example.com")).unwrap();
        assert!(text.contains("authorization: Basic"));
    }

    #[test]
    fn response_status_classification() {
        let mut response = HttpResponse { status: 301, ..Default::default() };
        assert!(response.is_redirect());
        response.status = 200;
        assert!(response.is_success());
    }
}
