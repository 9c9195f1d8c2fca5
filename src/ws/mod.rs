//! WebSocket client (spec §4.C13–C14): a frame codec (RFC 6455 §5) and a
//! connection state machine built on top of it.

pub mod client;
pub mod frame;

pub use client::{CloseCode, WsClient, WsClientSignals, WsState};
pub use frame::{Frame, OpCode};
