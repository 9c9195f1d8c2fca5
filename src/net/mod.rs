//! Non-blocking transport sockets: TCP (§4.C6) and TLS-over-TCP (§4.C7).

pub mod ip;
pub mod tcp;
pub mod tls;
pub mod transport;

pub use ip::is_ip_literal;
pub use tcp::{SocketState, TcpSocket};
pub use tls::TlsSocket;
pub use transport::Transport;
