//! Append-only byte buffer with an independent read cursor.
//!
//! The write side is append-only apart from `write_at`, which patches a
//! region previously obtained from `reserve` (length back-patching for
//! size-prefixed terms). The read side is a cursor that the codec and
//! the generic bridge advance; offsets stay stable while the buffer is
//! not mutated, so a consumer may record a position and `seek` back to
//! it.

use crate::tags;
use crate::DecodeError;

/// An ETF byte buffer.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct EtfBuffer {
    bytes: Vec<u8>,
    read: usize,
}

impl EtfBuffer {
    /// An empty buffer with no version byte.
    pub fn new() -> EtfBuffer {
        EtfBuffer {
            bytes: Vec::new(),
            read: 0,
        }
    }

    /// A buffer opened with the ETF version byte (`131`).
    pub fn versioned() -> EtfBuffer {
        EtfBuffer {
            bytes: vec![tags::VERSION],
            read: 0,
        }
    }

    /// Wrap existing bytes; the read cursor starts at offset 0.
    pub fn from_vec(bytes: Vec<u8>) -> EtfBuffer {
        EtfBuffer { bytes, read: 0 }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }

    // ------------------------------------------------------------------
    // Write side
    // ------------------------------------------------------------------

    pub fn append_byte(&mut self, byte: u8) {
        self.bytes.push(byte);
    }

    pub fn append_bytes(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    pub fn append_u16(&mut self, value: u16) {
        self.bytes.extend_from_slice(&value.to_be_bytes());
    }

    pub fn append_u32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_be_bytes());
    }

    pub fn append_u64(&mut self, value: u64) {
        self.bytes.extend_from_slice(&value.to_be_bytes());
    }

    /// Append `len` zero bytes and return their offset, to be patched
    /// later with `write_at`.
    pub fn reserve(&mut self, len: usize) -> usize {
        let at = self.bytes.len();
        self.bytes.resize(at + len, 0);
        at
    }

    /// Overwrite previously written (or reserved) bytes. The region must
    /// lie inside the buffer.
    pub fn write_at(&mut self, at: usize, bytes: &[u8]) {
        self.bytes[at..at + bytes.len()].copy_from_slice(bytes);
    }

    /// Append another buffer's payload, without its version byte.
    pub fn append_buffer(&mut self, other: &EtfBuffer) {
        let payload = match other.bytes.first() {
            Some(&tags::VERSION) => &other.bytes[1..],
            _ => &other.bytes[..],
        };
        self.bytes.extend_from_slice(payload);
    }

    // ------------------------------------------------------------------
    // Read side
    // ------------------------------------------------------------------

    /// Current read cursor.
    pub fn position(&self) -> usize {
        self.read
    }

    /// Move the read cursor to an absolute offset recorded earlier.
    pub fn seek(&mut self, at: usize) {
        self.read = at.min(self.bytes.len());
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.read
    }

    /// Consume a leading version byte if the cursor sits on one.
    pub fn consume_version(&mut self) {
        if self.read == 0 && self.bytes.first() == Some(&tags::VERSION) {
            self.read = 1;
        }
    }

    /// Peek the next tag byte without advancing.
    pub fn read_tag(&self) -> Result<u8, DecodeError> {
        self.bytes
            .get(self.read)
            .copied()
            .ok_or(DecodeError::ShortInput)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let byte = self.read_tag()?;
        self.read += 1;
        Ok(byte)
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_be_bytes(self.read_array()?))
    }

    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        Ok(f64::from_be_bytes(self.read_array()?))
    }

    /// Read exactly `len` bytes, advancing the cursor.
    pub fn read_exact(&mut self, len: usize) -> Result<&[u8], DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::ShortInput);
        }
        let slice = &self.bytes[self.read..self.read + len];
        self.read += len;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_exact(N)?);
        Ok(out)
    }

    fn advance(&mut self, len: usize) -> Result<(), DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::ShortInput);
        }
        self.read += len;
        Ok(())
    }

    /// Advance the read cursor over exactly one well-formed term.
    ///
    /// O(size of term), allocation-free. On error the cursor is restored
    /// to where it was.
    pub fn skip_term(&mut self) -> Result<(), DecodeError> {
        let start = self.read;
        let result = self.skip_term_inner();
        if result.is_err() {
            self.read = start;
        }
        result
    }

    fn skip_term_inner(&mut self) -> Result<(), DecodeError> {
        let tag = self.read_u8()?;
        match tag {
            tags::SMALL_INTEGER_EXT => self.advance(1),
            tags::INTEGER_EXT => self.advance(4),
            tags::FLOAT_EXT => self.advance(31),
            tags::NEW_FLOAT_EXT => self.advance(8),
            tags::ATOM_EXT | tags::ATOM_UTF8_EXT => {
                let len = self.read_u16()? as usize;
                self.advance(len)
            }
            tags::SMALL_ATOM_EXT | tags::SMALL_ATOM_UTF8_EXT => {
                let len = self.read_u8()? as usize;
                self.advance(len)
            }
            tags::NIL_EXT => Ok(()),
            tags::STRING_EXT => {
                let len = self.read_u16()? as usize;
                self.advance(len)
            }
            tags::BINARY_EXT => {
                let len = self.read_u32()? as usize;
                self.advance(len)
            }
            tags::BIT_BINARY_EXT => {
                let len = self.read_u32()? as usize;
                self.advance(1 + len)
            }
            tags::SMALL_BIG_EXT => {
                let len = self.read_u8()? as usize;
                self.advance(1 + len)
            }
            tags::LARGE_BIG_EXT => {
                let len = self.read_u32()? as usize;
                self.advance(1 + len)
            }
            tags::SMALL_TUPLE_EXT => {
                let arity = self.read_u8()? as usize;
                self.skip_terms(arity)
            }
            tags::LARGE_TUPLE_EXT => {
                let arity = self.read_u32()? as usize;
                self.skip_terms(arity)
            }
            tags::LIST_EXT => {
                let len = self.read_u32()? as usize;
                // Elements plus the tail term.
                self.skip_terms(len + 1)
            }
            tags::MAP_EXT => {
                let arity = self.read_u32()? as usize;
                self.skip_terms(arity.checked_mul(2).ok_or(DecodeError::BadTerm)?)
            }
            tags::PID_EXT => {
                self.skip_term_inner()?;
                self.advance(4 + 4 + 1)
            }
            tags::NEW_PID_EXT => {
                self.skip_term_inner()?;
                self.advance(4 + 4 + 4)
            }
            tags::PORT_EXT => {
                self.skip_term_inner()?;
                self.advance(4 + 1)
            }
            tags::NEW_PORT_EXT => {
                self.skip_term_inner()?;
                self.advance(4 + 4)
            }
            tags::V4_PORT_EXT => {
                self.skip_term_inner()?;
                self.advance(8 + 4)
            }
            tags::REFERENCE_EXT => {
                self.skip_term_inner()?;
                self.advance(4 + 1)
            }
            tags::NEW_REFERENCE_EXT => {
                let len = self.read_u16()? as usize;
                self.skip_term_inner()?;
                self.advance(1 + 4 * len)
            }
            tags::NEWER_REFERENCE_EXT => {
                let len = self.read_u16()? as usize;
                self.skip_term_inner()?;
                self.advance(4 + 4 * len)
            }
            tags::EXPORT_EXT => self.skip_terms(3),
            tags::NEW_FUN_EXT => {
                let size = self.read_u32()? as usize;
                // Size counts everything after the tag, itself included.
                self.advance(size.checked_sub(4).ok_or(DecodeError::BadTerm)?)
            }
            tags::FUN_EXT => {
                let num_free = self.read_u32()? as usize;
                self.skip_terms(4 + num_free)
            }
            other => Err(DecodeError::UnknownTag(other)),
        }
    }

    fn skip_terms(&mut self, count: usize) -> Result<(), DecodeError> {
        for _ in 0..count {
            self.skip_term_inner()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for EtfBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EtfBuffer(len={}, read={})", self.bytes.len(), self.read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_cursor_tracks_emitted_length() {
        let mut buf = EtfBuffer::new();
        buf.append_byte(1);
        buf.append_bytes(&[2, 3]);
        buf.append_u32(7);
        assert_eq!(buf.len(), 7);
    }

    #[test]
    fn reserve_and_write_at_backpatch() {
        let mut buf = EtfBuffer::new();
        buf.append_byte(0xaa);
        let at = buf.reserve(4);
        buf.append_byte(0xbb);
        buf.write_at(at, &42u32.to_be_bytes());
        assert_eq!(buf.as_slice(), &[0xaa, 0, 0, 0, 42, 0xbb]);
    }

    #[test]
    fn append_buffer_strips_version_byte() {
        let mut inner = EtfBuffer::versioned();
        inner.append_byte(tags::NIL_EXT);

        let mut outer = EtfBuffer::versioned();
        outer.append_buffer(&inner);
        assert_eq!(outer.as_slice(), &[tags::VERSION, tags::NIL_EXT]);
    }

    #[test]
    fn skip_term_advances_over_nested_terms() {
        // {ok, [1, 2]} followed by the atom tail.
        let bytes = vec![
            tags::SMALL_TUPLE_EXT,
            2,
            tags::SMALL_ATOM_UTF8_EXT,
            2,
            b'o',
            b'k',
            tags::LIST_EXT,
            0,
            0,
            0,
            2,
            tags::SMALL_INTEGER_EXT,
            1,
            tags::SMALL_INTEGER_EXT,
            2,
            tags::NIL_EXT,
            tags::SMALL_ATOM_UTF8_EXT,
            4,
            b'n',
            b'e',
            b'x',
            b't',
        ];
        let mut buf = EtfBuffer::from_vec(bytes);
        buf.skip_term().unwrap();
        assert_eq!(buf.read_tag().unwrap(), tags::SMALL_ATOM_UTF8_EXT);
    }

    #[test]
    fn skip_term_restores_cursor_on_error() {
        let mut buf = EtfBuffer::from_vec(vec![tags::BINARY_EXT, 0, 0, 0, 9, 1, 2]);
        assert_eq!(buf.skip_term(), Err(DecodeError::ShortInput));
        assert_eq!(buf.position(), 0);
    }

    #[test]
    fn consume_version_only_at_offset_zero() {
        let mut buf = EtfBuffer::from_vec(vec![tags::VERSION, tags::NIL_EXT]);
        buf.consume_version();
        assert_eq!(buf.position(), 1);
        buf.consume_version();
        assert_eq!(buf.position(), 1);
    }
}
