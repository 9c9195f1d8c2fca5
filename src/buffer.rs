//! Growable byte buffer with base64 and UTF-8 interop, used as the common
//! currency between the TCP/TLS sockets, the HTTP parser, and the
//! WebSocket frame codec.

use base64::Engine;
use bytes::{Buf, BytesMut};

/// A growable byte buffer. Thin wrapper over [`bytes::BytesMut`] adding the
/// indexing/searching/encoding operations the networking stack needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteBuffer {
    inner: BytesMut,
}

impl ByteBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self { inner: BytesMut::new() }
    }

    /// Create an empty buffer with room for at least `capacity` bytes
    /// before it needs to reallocate.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { inner: BytesMut::with_capacity(capacity) }
    }

    /// Number of bytes currently stored.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Borrow the full contents.
    pub fn as_slice(&self) -> &[u8] {
        &self.inner
    }

    /// Append bytes to the end of the buffer.
    pub fn append(&mut self, data: &[u8]) {
        self.inner.extend_from_slice(data);
    }

    /// Return a new buffer holding the bytes from `start` to the end.
    pub fn mid(&self, start: usize) -> Self {
        self.mid_len(start, self.len().saturating_sub(start))
    }

    /// Return a new buffer holding `len` bytes starting at `start`.
    ///
    /// Clamps to the available length rather than panicking, matching the
    /// forgiving slicing semantics of `KDUtils::ByteArray::mid`.
    pub fn mid_len(&self, start: usize, len: usize) -> Self {
        if start >= self.inner.len() {
            return Self::new();
        }
        let end = (start + len).min(self.inner.len());
        Self { inner: BytesMut::from(&self.inner[start..end]) }
    }

    /// The leftmost `len` bytes.
    pub fn left(&self, len: usize) -> Self {
        self.mid_len(0, len)
    }

    /// Discard the leftmost `count` bytes, shifting the rest down.
    ///
    /// Used after a parser consumes a complete frame/message prefix from an
    /// accumulation buffer.
    pub fn consume(&mut self, count: usize) {
        let count = count.min(self.inner.len());
        self.inner.advance(count);
    }

    /// Remove `len` bytes starting at `start`, shifting trailing bytes down.
    pub fn remove(&mut self, start: usize, len: usize) {
        if start >= self.inner.len() {
            return;
        }
        let end = (start + len).min(self.inner.len());
        let rest = self.inner.split_off(end);
        self.inner.truncate(start);
        self.inner.extend_from_slice(&rest);
    }

    /// Index of the first occurrence of `needle`, if any.
    pub fn index_of(&self, needle: &[u8]) -> Option<usize> {
        if needle.is_empty() || needle.len() > self.inner.len() {
            return None;
        }
        self.inner
            .windows(needle.len())
            .position(|window| window == needle)
    }

    /// Clear the buffer without releasing its allocation.
    pub fn clear(&mut self) {
        self.inner.clear();
    }

    /// Encode the contents as standard base64 (with padding).
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.inner)
    }

    /// Decode a standard base64 string into a new buffer.
    pub fn from_base64(encoded: &str) -> crate::error::Result<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| crate::error::Error::other(format!("invalid base64: {e}")))?;
        Ok(Self { inner: BytesMut::from(&bytes[..]) })
    }

    /// Lossily decode the contents as UTF-8, substituting U+FFFD for
    /// invalid sequences.
    pub fn to_utf8_lossy(&self) -> String {
        String::from_utf8_lossy(&self.inner).into_owned()
    }
}

impl From<Vec<u8>> for ByteBuffer {
    fn from(data: Vec<u8>) -> Self {
        Self { inner: BytesMut::from(&data[..]) }
    }
}

impl From<&[u8]> for ByteBuffer {
    fn from(data: &[u8]) -> Self {
        Self { inner: BytesMut::from(data) }
    }
}

impl From<&str> for ByteBuffer {
    fn from(data: &str) -> Self {
        Self { inner: BytesMut::from(data.as_bytes()) }
    }
}

impl std::ops::Deref for ByteBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_len() {
        let mut buf = ByteBuffer::new();
        buf.append(b"hello");
        buf.append(b" world");
        assert_eq!(buf.as_slice(), b"hello world");
    }

    #[test]
    fn mid_and_left() {
        let buf = ByteBuffer::from(&b"hello world"[..]);
        assert_eq!(buf.mid(6).as_slice(), b"world");
        assert_eq!(buf.left(5).as_slice(), b"hello");
    }

    #[test]
    fn mid_clamps_out_of_range() {
        let buf = ByteBuffer::from(&b"hi"[..]);
        assert_eq!(buf.mid(10).as_slice(), b"");
        assert_eq!(buf.mid_len(0, 100).as_slice(), b"hi");
    }

    #[test]
    fn index_of_finds_needle() {
        let buf = ByteBuffer::from(&b"GET / HTTP/1.1\r\n\r\n"[..]);
        assert_eq!(buf.index_of(b"\r\n\r\n"), Some(14));
        assert_eq!(buf.index_of(b"not present"), None);
    }

    #[test]
    fn consume_shifts_remainder() {
        let mut buf = ByteBuffer::from(&b"abcdef"[..]);
        buf.consume(3);
        assert_eq!(buf.as_slice(), b"def");
    }

    #[test]
    fn remove_middle_range() {
        let mut buf = ByteBuffer::from(&b"abcdef"[..]);
        buf.remove(1, 2);
        assert_eq!(buf.as_slice(), b"adef");
    }

    #[test]
    fn base64_round_trip() {
        let buf = ByteBuffer::from(&b"hello world"[..]);
        let encoded = buf.to_base64();
        let decoded = ByteBuffer::from_base64(&encoded).unwrap();
        assert_eq!(buf, decoded);
    }

    #[test]
    fn from_base64_rejects_garbage() {
        assert!(ByteBuffer::from_base64("not valid base64!!!").is_err());
    }

    #[test]
    fn utf8_lossy_substitutes_invalid_bytes() {
        let buf = ByteBuffer::from(&[0xff, 0xfe][..]);
        assert!(buf.to_utf8_lossy().contains('\u{fffd}'));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        // spec §8: fromBase64(toBase64(b)) == b for all b up to some
        // bounded length.
        #[test]
        fn base64_round_trip(bytes in prop::collection::vec(any::<u8>(), 0..4096)) {
            let buf = ByteBuffer::from(bytes.as_slice());
            let decoded = ByteBuffer::from_base64(&buf.to_base64()).unwrap();
            prop_assert_eq!(decoded, buf);
        }
    }
}
