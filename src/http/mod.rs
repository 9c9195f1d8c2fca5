//! HTTP/1.1 client stack (spec §4.C8–C11): a hand-rolled incremental
//! parser, an RFC 6265 cookie jar, a shared session (defaults + pooled
//! connections), and the request-orchestrating client built on top.

pub mod client;
pub mod cookie;
pub mod message;
pub mod parser;
pub mod session;

pub use client::{BodySink, HttpClient, HttpClientSignals, RequestId};
pub use cookie::{CookieJar, HttpCookie};
pub use message::{Auth, HttpMethod, HttpRequest, HttpResponse, RedirectPolicy};
pub use parser::{Header, HttpParser, ParserEvent, ParserType};
pub use session::HttpSession;
