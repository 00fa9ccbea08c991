#![deny(unsafe_code)]

//! External Term Format support: the [`Term`] sum type, the append/read
//! [`EtfBuffer`], and the term codec.
//!
//! Terms follow ETF version 1 (leading byte `131`). The decoder accepts
//! every tag family listed in `tags`; the encoder always emits the
//! canonical narrow forms (SMALL_ATOM_UTF8, NEW_FLOAT, the smallest
//! integer encoding that fits).

mod buffer;
mod codec;
mod term;

pub mod tags;

pub use buffer::EtfBuffer;
pub use codec::{
    decode, decode_atom, decode_binary, decode_f64, decode_int, decode_int_parts, encode,
    emit_atom, emit_binary, emit_charlist, emit_f64, emit_i64, emit_list_header, emit_map_header,
    emit_nil, emit_tuple_header, emit_u64,
};
pub use term::{Closure, Fun, LegacyClosure, Pid, Port, Reference, Term};

/// Error raised while encoding a term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Atom name exceeds the 255-character / 65535-byte limits.
    AtomTooLong(usize),
    /// Bitstring trailing-bit count outside `1..=8` (or nonzero for an
    /// empty payload).
    InvalidBitstring(u8),
    /// Fun subform the codec cannot re-emit.
    UnsupportedFun,
}

impl std::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncodeError::AtomTooLong(len) => write!(f, "atom of {len} bytes exceeds ETF limits"),
            EncodeError::InvalidBitstring(bits) => {
                write!(f, "bitstring trailing bit count {bits} outside 1..=8")
            }
            EncodeError::UnsupportedFun => write!(f, "fun subform cannot be encoded"),
        }
    }
}

impl std::error::Error for EncodeError {}

/// Error raised while decoding a term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Malformed tag payload: bad length, bad digits, out-of-range value.
    BadTerm,
    /// Tag byte outside the supported ETF tag space.
    UnknownTag(u8),
    /// A LIST whose tail is not NIL (improper lists are unsupported).
    MissingListEnd,
    /// A BIT_BINARY whose bits header implies a nonzero leading offset.
    UnsupportedBitOffset(u8),
    /// Input ended inside a term.
    ShortInput,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::BadTerm => write!(f, "malformed term"),
            DecodeError::UnknownTag(tag) => write!(f, "unknown term tag {tag}"),
            DecodeError::MissingListEnd => write!(f, "list not terminated by nil"),
            DecodeError::UnsupportedBitOffset(bits) => {
                write!(f, "bitstring with unsupported bit offset {bits}")
            }
            DecodeError::ShortInput => write!(f, "input ended inside a term"),
        }
    }
}

impl std::error::Error for DecodeError {}
