//! WebSocket frame codec (spec §4.C13, RFC 6455 §5).
//!
//! Grounded in
//! `examples/original_source/src/KDNetwork/websocket_frame.{h,cpp}`:
//! the header-size computation in `decode` (2 bytes + 2/8 for extended
//! length + 4 for a masking key), the synthetic `Close(1009, "Message
//! too large")` frame returned instead of an error when a declared
//! payload length exceeds `MAX_PAYLOAD_SIZE`, and the
//! `createCloseFrame`/`createPingFrame`/`createPongFrame` constructors
//! (including their silent truncation of oversized control-frame
//! payloads to `MAX_CONTROL_FRAME_PAYLOAD` bytes and forcing `fin =
//! true`) are all reproduced as-is. Masking key generation uses the
//! `rand` crate (already in this corpus's dependency stack, spec §9) in
//! place of the original's `std::random_device`/`std::mt19937`.

use crate::error::{Error, Result, WsErrorKind};
use rand::RngCore;

/// Maximum payload size this codec will decode without rejecting the
/// frame (spec §4.C13, `WebSocket::MAX_PAYLOAD_SIZE`).
pub const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;
/// Maximum payload a control frame (Close/Ping/Pong) may carry
/// (`WebSocket::MAX_CONTROL_FRAME_PAYLOAD`); longer payloads are
/// silently truncated.
pub const MAX_CONTROL_FRAME_PAYLOAD: usize = 125;

/// WebSocket frame opcodes (RFC 6455 §5.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x0 => Some(OpCode::Continuation),
            0x1 => Some(OpCode::Text),
            0x2 => Some(OpCode::Binary),
            0x8 => Some(OpCode::Close),
            0x9 => Some(OpCode::Ping),
            0xA => Some(OpCode::Pong),
            _ => None,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }

    pub fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

/// A single WebSocket frame: one fragment of a message, or a complete
/// control frame.
#[derive(Debug, Clone)]
pub struct Frame {
    op_code: OpCode,
    is_final: bool,
    payload: Vec<u8>,
}

impl Frame {
    fn new(op_code: OpCode, is_final: bool, mut payload: Vec<u8>) -> Self {
        let mut is_final = is_final;
        if op_code.is_control() {
            payload.truncate(MAX_CONTROL_FRAME_PAYLOAD);
            is_final = true;
        }
        Self { op_code, is_final, payload }
    }

    pub fn text(text: &str, is_final_fragment: bool) -> Self {
        Self::new(OpCode::Text, is_final_fragment, text.as_bytes().to_vec())
    }

    /// A `Text`-opcode frame carrying raw bytes without requiring them to
    /// be valid UTF-8 on their own — used when fragmenting a message at a
    /// byte offset that may fall inside a multi-byte UTF-8 sequence; the
    /// full sequence is only required to be valid once all fragments are
    /// reassembled (spec §4.C14 fragmentation).
    pub fn text_bytes(data: Vec<u8>, is_final_fragment: bool) -> Self {
        Self::new(OpCode::Text, is_final_fragment, data)
    }

    pub fn binary(data: Vec<u8>, is_final_fragment: bool) -> Self {
        Self::new(OpCode::Binary, is_final_fragment, data)
    }

    pub fn continuation(data: Vec<u8>, is_final_fragment: bool) -> Self {
        Self::new(OpCode::Continuation, is_final_fragment, data)
    }

    /// A close frame. `code == 0` omits the status-code/reason payload
    /// entirely (used for a bare close with no code to report).
    pub fn close(code: u16, reason: &str) -> Self {
        let mut payload = Vec::new();
        if code != 0 {
            payload.extend_from_slice(&code.to_be_bytes());
            payload.extend_from_slice(reason.as_bytes());
        }
        Self::new(OpCode::Close, true, payload)
    }

    pub fn ping(payload: Vec<u8>) -> Self {
        Self::new(OpCode::Ping, true, payload)
    }

    pub fn pong(payload: Vec<u8>) -> Self {
        Self::new(OpCode::Pong, true, payload)
    }

    pub fn op_code(&self) -> OpCode {
        self.op_code
    }

    pub fn is_final(&self) -> bool {
        self.is_final
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The close code and reason carried by a [`OpCode::Close`] frame's
    /// payload, if it carried one (the first two bytes, big-endian).
    pub fn close_code_and_reason(&self) -> Option<(u16, String)> {
        if self.payload.len() < 2 {
            return None;
        }
        let code = u16::from_be_bytes([self.payload[0], self.payload[1]]);
        let reason = String::from_utf8_lossy(&self.payload[2..]).into_owned();
        Some((code, reason))
    }

    /// Serialize this frame for transmission. `mask_frame` must be
    /// `true` for every client-to-server frame (RFC 6455 §5.1) and
    /// `false` for server-to-client ones.
    pub fn encode(&self, mask_frame: bool) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.payload.len() + 14);

        let mut first_byte = self.op_code.as_u8() & 0x0F;
        if self.is_final {
            first_byte |= 0x80;
        }
        out.push(first_byte);

        let payload_len = self.payload.len();
        let mut second_byte: u8 = if mask_frame { 0x80 } else { 0 };
        if payload_len <= 125 {
            second_byte |= payload_len as u8;
            out.push(second_byte);
        } else if payload_len <= 65535 {
            second_byte |= 126;
            out.push(second_byte);
            out.extend_from_slice(&(payload_len as u16).to_be_bytes());
        } else {
            second_byte |= 127;
            out.push(second_byte);
            out.extend_from_slice(&(payload_len as u64).to_be_bytes());
        }

        if mask_frame {
            let mut masking_key = [0u8; 4];
            rand::thread_rng().fill_bytes(&mut masking_key);
            out.extend_from_slice(&masking_key);
            for (i, byte) in self.payload.iter().enumerate() {
                out.push(byte ^ masking_key[i % 4]);
            }
        } else {
            out.extend_from_slice(&self.payload);
        }

        out
    }

    /// Decode one frame from the front of `data`. Returns `Ok(None)` if
    /// `data` doesn't yet hold a complete frame. `bytes_consumed` is set
    /// to the number of bytes the frame (header + payload) occupied,
    /// whether or not a frame was produced.
    ///
    /// A masked frame is decoded and unmasked unconditionally — callers
    /// enforce the RFC 6455 §5.1 masking direction (server frames
    /// unmasked, client frames masked) by inspecting the mask bit
    /// themselves via [`Frame::peek_masked`].
    pub fn decode(data: &[u8], bytes_consumed: &mut usize) -> Result<Option<Self>> {
        *bytes_consumed = 0;
        if data.len() < 2 {
            return Ok(None);
        }

        let first_byte = data[0];
        let fin = (first_byte & 0x80) != 0;
        let op_code = OpCode::from_u8(first_byte & 0x0F)
            .ok_or_else(|| Error::ws(WsErrorKind::ProtocolError, format!("unknown opcode {:#x}", first_byte & 0x0F)))?;

        let second_byte = data[1];
        let masked = (second_byte & 0x80) != 0;
        let len_indicator = second_byte & 0x7F;

        let mut header_size = 2usize;
        if len_indicator == 126 {
            header_size += 2;
        } else if len_indicator == 127 {
            header_size += 8;
        }
        if masked {
            header_size += 4;
        }
        if data.len() < header_size {
            return Ok(None);
        }

        let payload_len: u64 = match len_indicator {
            126 => u16::from_be_bytes([data[2], data[3]]) as u64,
            127 => u64::from_be_bytes(data[2..10].try_into().unwrap()),
            n => n as u64,
        };

        if payload_len as usize > MAX_PAYLOAD_SIZE {
            // Not enough is known to say how many bytes this oversized
            // frame actually occupies on the wire if it never finishes
            // arriving, but the header itself is complete, so report it
            // consumed and hand back a synthetic close instructing the
            // caller to tear the connection down.
            *bytes_consumed = header_size;
            return Ok(Some(Frame::close(1009, "Message too large")));
        }
        let payload_len = payload_len as usize;

        if data.len() < header_size + payload_len {
            return Ok(None);
        }

        let mut payload = data[header_size..header_size + payload_len].to_vec();
        if masked {
            let masking_key = [
                data[header_size - 4],
                data[header_size - 3],
                data[header_size - 2],
                data[header_size - 1],
            ];
            for (i, byte) in payload.iter_mut().enumerate() {
                *byte ^= masking_key[i % 4];
            }
        }

        *bytes_consumed = header_size + payload_len;
        Ok(Some(Frame { op_code, is_final: fin, payload }))
    }

    /// Whether the raw frame at the front of `data` (if a full header is
    /// present) carries the mask bit. Used by the client to reject
    /// server frames that are masked (spec §9 Open Question: strict
    /// rejection) before bothering to fully decode them.
    pub fn peek_masked(data: &[u8]) -> Option<bool> {
        data.get(1).map(|b| (b & 0x80) != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_small_text_frame() {
        let frame = Frame::text("hello", true);
        let encoded = frame.encode(true);
        let mut consumed = 0;
        let decoded = Frame::decode(&encoded, &mut consumed).unwrap().unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(decoded.op_code(), OpCode::Text);
        assert!(decoded.is_final());
        assert_eq!(decoded.payload(), b"hello");
    }

    #[test]
    fn round_trips_with_16_bit_extended_length() {
        let frame = Frame::binary(vec![1u8; 1000], true);
        let encoded = frame.encode(true);
        assert_eq!(encoded[1] & 0x7F, 126);
        let mut consumed = 0;
        let decoded = Frame::decode(&encoded, &mut consumed).unwrap().unwrap();
        assert_eq!(decoded.payload().len(), 1000);
    }

    #[test]
    fn incomplete_frame_returns_none() {
        let frame = Frame::text("hello world", true);
        let encoded = frame.encode(true);
        let mut consumed = 0;
        let result = Frame::decode(&encoded[..encoded.len() - 1], &mut consumed).unwrap();
        assert!(result.is_none());
        assert_eq!(consumed, 0);
    }

    #[test]
    fn control_frame_payload_is_truncated_and_forced_final() {
        let oversized = vec![9u8; 200];
        let frame = Frame::ping(oversized);
        assert_eq!(frame.payload().len(), MAX_CONTROL_FRAME_PAYLOAD);
        assert!(frame.is_final());
    }

    #[test]
    fn oversized_payload_decodes_to_synthetic_close() {
        // Hand-build a header declaring a too-large 64-bit length with no
        // payload bytes actually present.
        let mut data = vec![0x82u8, 0xFF]; // FIN + binary, len indicator 127 (unmasked)
        data.extend_from_slice(&((MAX_PAYLOAD_SIZE as u64) + 1).to_be_bytes());
        let mut consumed = 0;
        let decoded = Frame::decode(&data, &mut consumed).unwrap().unwrap();
        assert_eq!(decoded.op_code(), OpCode::Close);
        assert_eq!(decoded.close_code_and_reason().unwrap().0, 1009);
    }

    #[test]
    fn masked_frame_unmasks_payload() {
        let frame = Frame::text("secret", true);
        let encoded = frame.encode(true);
        assert_eq!(Frame::peek_masked(&encoded), Some(true));
        let mut consumed = 0;
        let decoded = Frame::decode(&encoded, &mut consumed).unwrap().unwrap();
        assert_eq!(decoded.payload(), b"secret");
    }

    #[test]
    fn close_frame_carries_code_and_reason() {
        let frame = Frame::close(1000, "bye");
        let mut consumed = 0;
        let decoded = Frame::decode(&frame.encode(false), &mut consumed).unwrap().unwrap();
        let (code, reason) = decoded.close_code_and_reason().unwrap();
        assert_eq!(code, 1000);
        assert_eq!(reason, "bye");
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        // spec §8: decode(encode(f)) == f and bytes_consumed == encode(f).len()
        // for every (opcode, fin, payload) valid per §4.C13.
        #[test]
        fn binary_frame_round_trips(payload in prop::collection::vec(any::<u8>(), 0..4096), mask in any::<bool>()) {
            let frame = Frame::binary(payload.clone(), true);
            let encoded = frame.encode(mask);
            let mut consumed = 0;
            let decoded = Frame::decode(&encoded, &mut consumed).unwrap().unwrap();
            prop_assert_eq!(consumed, encoded.len());
            prop_assert_eq!(decoded.op_code(), OpCode::Binary);
            prop_assert!(decoded.is_final());
            prop_assert_eq!(decoded.payload(), payload.as_slice());
        }

        // spec §8: decoding needs strictly less data than a frame always
        // returns None without advancing.
        #[test]
        fn truncated_frame_never_consumes(payload in prop::collection::vec(any::<u8>(), 1..512), cut in 1usize..=512) {
            let frame = Frame::binary(payload, true);
            let encoded = frame.encode(true);
            let cut = cut.min(encoded.len() - 1);
            let mut consumed = 0;
            let result = Frame::decode(&encoded[..cut], &mut consumed).unwrap();
            prop_assert!(result.is_none());
            prop_assert_eq!(consumed, 0);
        }
    }
}
