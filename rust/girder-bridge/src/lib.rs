#![deny(unsafe_code)]

//! serde data format for the External Term Format.
//!
//! The bridge walks user aggregate types directly (no intermediate
//! [`Term`]): [`to_buffer`] drives `serde::Serialize` into ETF bytes,
//! [`from_buffer`] drives `serde::Deserialize` off a buffer's read
//! cursor. Which ETF shape a value becomes is selected by [`Policy`]
//! (how text, ordered groups, and keyed groups are emitted), with
//! per-subtree overrides expressed by the wrapper types in [`wrap`].
//!
//! The decoder is deliberately permissive: keyed targets accept maps or
//! keyword lists, ordered targets accept tuples or lists, text targets
//! accept atoms, charlists, or binaries. Unknown map keys are skipped
//! without materialising them.

mod de;
mod policy;
mod ser;
pub mod wrap;

pub use de::{from_buffer, from_slice, from_term, Deserializer};
pub use policy::{KeyedPolicy, Policy, StringPolicy, UnkeyedPolicy};
pub use ser::{append_to, to_buffer, to_term, to_vec, Serializer};

use girder_etf::{DecodeError, EncodeError};

/// Error raised by the generic bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// The term at the cursor cannot serve the requested target shape.
    TypeMismatch {
        expected: &'static str,
        actual_tag: u8,
    },
    /// A keyed target required a key the term does not carry.
    KeyNotFound(String),
    /// A value was representable on the wire but not in the target.
    InvalidArgument(String),
    /// A shape the format does not express (128-bit integers, maps with
    /// non-serde keys, ...).
    Unsupported(&'static str),
    /// Propagated term-codec decode error.
    Codec(DecodeError),
    /// Propagated term-codec encode error.
    Encode(EncodeError),
    /// Input continued past the decoded value.
    TrailingBytes,
    /// Error reported by a `Serialize`/`Deserialize` implementation.
    Message(String),
}

impl std::fmt::Display for BridgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeError::TypeMismatch {
                expected,
                actual_tag,
            } => write!(f, "expected {expected}, found term tag {actual_tag}"),
            BridgeError::KeyNotFound(key) => write!(f, "key not found: {key}"),
            BridgeError::InvalidArgument(message) => write!(f, "invalid argument: {message}"),
            BridgeError::Unsupported(what) => write!(f, "unsupported: {what}"),
            BridgeError::Codec(error) => write!(f, "{error}"),
            BridgeError::Encode(error) => write!(f, "{error}"),
            BridgeError::TrailingBytes => write!(f, "trailing bytes after value"),
            BridgeError::Message(message) => f.write_str(message),
        }
    }
}

impl std::error::Error for BridgeError {}

impl From<DecodeError> for BridgeError {
    fn from(error: DecodeError) -> Self {
        BridgeError::Codec(error)
    }
}

impl From<EncodeError> for BridgeError {
    fn from(error: EncodeError) -> Self {
        BridgeError::Encode(error)
    }
}

impl serde::ser::Error for BridgeError {
    fn custom<T: std::fmt::Display>(message: T) -> Self {
        BridgeError::Message(message.to_string())
    }
}

impl serde::de::Error for BridgeError {
    fn custom<T: std::fmt::Display>(message: T) -> Self {
        BridgeError::Message(message.to_string())
    }

    fn missing_field(field: &'static str) -> Self {
        BridgeError::KeyNotFound(field.to_string())
    }
}
