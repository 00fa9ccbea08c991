//! Generic decoder: ETF bytes → `serde::Deserialize`.
//!
//! Dispatch is by the tag at the buffer's read cursor. Targets are
//! served permissively: keyed targets from MAP or keyword lists,
//! ordered targets from tuples or lists (or STRING for byte
//! sequences), text from the atom family, STRING, or BINARY. Skipped
//! content (unknown map keys, ignored values) advances through
//! `skip_term` without materialising anything.

use serde::de::value::{StrDeserializer, StringDeserializer, U8Deserializer};
use serde::de::{self, IntoDeserializer, Visitor};

use girder_etf::{decode_atom, decode_binary, decode_f64, decode_int_parts, tags, EtfBuffer, Term};

use crate::BridgeError;

/// Deserialize a value at the buffer's read cursor, consuming a leading
/// version byte when the cursor is at offset 0.
pub fn from_buffer<T: de::DeserializeOwned>(buf: &mut EtfBuffer) -> Result<T, BridgeError> {
    buf.consume_version();
    let mut deserializer = Deserializer { buf };
    T::deserialize(&mut deserializer)
}

/// Deserialize a value from a standalone byte slice; the whole input
/// must be consumed.
pub fn from_slice<T: de::DeserializeOwned>(bytes: &[u8]) -> Result<T, BridgeError> {
    let mut buf = EtfBuffer::from_vec(bytes.to_vec());
    let value = from_buffer(&mut buf)?;
    if buf.remaining() != 0 {
        return Err(BridgeError::TrailingBytes);
    }
    Ok(value)
}

/// Deserialize a value out of an already-decoded [`Term`].
pub fn from_term<T: de::DeserializeOwned>(term: &Term) -> Result<T, BridgeError> {
    let mut buf = EtfBuffer::versioned();
    girder_etf::encode(term, &mut buf)?;
    from_buffer(&mut buf)
}

/// The ETF deserializer.
pub struct Deserializer<'b> {
    buf: &'b mut EtfBuffer,
}

impl<'b> Deserializer<'b> {
    pub fn new(buf: &'b mut EtfBuffer) -> Deserializer<'b> {
        Deserializer { buf }
    }

    fn peek(&self) -> Result<u8, BridgeError> {
        self.buf.read_tag().map_err(Into::into)
    }

    fn mismatch(&self, expected: &'static str) -> BridgeError {
        match self.buf.read_tag() {
            Ok(actual_tag) => BridgeError::TypeMismatch {
                expected,
                actual_tag,
            },
            Err(error) => BridgeError::Codec(error),
        }
    }

    fn int_parts(&mut self, expected: &'static str) -> Result<(bool, u64), BridgeError> {
        if !is_int_tag(self.peek()?) {
            return Err(self.mismatch(expected));
        }
        decode_int_parts(self.buf).map_err(Into::into)
    }

    fn signed(&mut self) -> Result<i64, BridgeError> {
        let (negative, magnitude) = self.int_parts("integer")?;
        if negative {
            if magnitude > i64::MIN.unsigned_abs() {
                return Err(BridgeError::InvalidArgument(format!(
                    "-{magnitude} is below the 64-bit range"
                )));
            }
            Ok((magnitude as i128).wrapping_neg() as i64)
        } else {
            i64::try_from(magnitude).map_err(|_| {
                BridgeError::InvalidArgument(format!("{magnitude} is above the i64 range"))
            })
        }
    }

    fn unsigned(&mut self) -> Result<u64, BridgeError> {
        let (negative, magnitude) = self.int_parts("unsigned integer")?;
        if negative {
            return Err(BridgeError::InvalidArgument(format!(
                "-{magnitude} is negative for an unsigned target"
            )));
        }
        Ok(magnitude)
    }

    /// Read any text-bearing term: atoms, charlists, binaries.
    fn read_text(&mut self) -> Result<String, BridgeError> {
        let tag = self.peek()?;
        match tag {
            t if is_atom_tag(t) => decode_atom(self.buf).map_err(Into::into),
            tags::STRING_EXT => self.read_charlist_text(),
            tags::BINARY_EXT => {
                let bytes = decode_binary(self.buf)?;
                String::from_utf8(bytes)
                    .map_err(|_| BridgeError::InvalidArgument("binary is not UTF-8".into()))
            }
            _ => Err(self.mismatch("text")),
        }
    }

    fn read_charlist_text(&mut self) -> Result<String, BridgeError> {
        self.buf.read_u8()?;
        let len = self.buf.read_u16()? as usize;
        let bytes = self.buf.read_exact(len)?;
        Ok(bytes.iter().map(|&b| b as char).collect())
    }

    fn read_charlist_bytes(&mut self) -> Result<Vec<u8>, BridgeError> {
        self.buf.read_u8()?;
        let len = self.buf.read_u16()? as usize;
        Ok(self.buf.read_exact(len)?.to_vec())
    }

    /// Consume a NIL tag.
    fn expect_nil(&mut self) -> Result<(), BridgeError> {
        if self.buf.read_u8()? != tags::NIL_EXT {
            return Err(girder_etf::DecodeError::MissingListEnd.into());
        }
        Ok(())
    }

    /// Read an ordered-group header: `(element_count, list_tail)`.
    fn ordered_header(&mut self, expected: &'static str) -> Result<(usize, bool), BridgeError> {
        let tag = self.peek()?;
        match tag {
            tags::NIL_EXT => {
                self.buf.read_u8()?;
                Ok((0, false))
            }
            tags::LIST_EXT => {
                self.buf.read_u8()?;
                Ok((self.buf.read_u32()? as usize, true))
            }
            tags::SMALL_TUPLE_EXT => {
                self.buf.read_u8()?;
                Ok((self.buf.read_u8()? as usize, false))
            }
            tags::LARGE_TUPLE_EXT => {
                self.buf.read_u8()?;
                Ok((self.buf.read_u32()? as usize, false))
            }
            _ => Err(self.mismatch(expected)),
        }
    }
}

fn is_int_tag(tag: u8) -> bool {
    matches!(
        tag,
        tags::SMALL_INTEGER_EXT | tags::INTEGER_EXT | tags::SMALL_BIG_EXT | tags::LARGE_BIG_EXT
    )
}

fn is_float_tag(tag: u8) -> bool {
    matches!(tag, tags::NEW_FLOAT_EXT | tags::FLOAT_EXT)
}

fn is_atom_tag(tag: u8) -> bool {
    matches!(
        tag,
        tags::ATOM_EXT | tags::SMALL_ATOM_EXT | tags::ATOM_UTF8_EXT | tags::SMALL_ATOM_UTF8_EXT
    )
}

macro_rules! deserialize_signed {
    ($method:ident, $visit:ident, $ty:ty) => {
        fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, BridgeError> {
            let value = self.signed()?;
            let narrowed = <$ty>::try_from(value).map_err(|_| {
                BridgeError::InvalidArgument(format!(
                    "{value} is out of range for {}",
                    stringify!($ty)
                ))
            })?;
            visitor.$visit(narrowed)
        }
    };
}

macro_rules! deserialize_unsigned {
    ($method:ident, $visit:ident, $ty:ty) => {
        fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, BridgeError> {
            let value = self.unsigned()?;
            let narrowed = <$ty>::try_from(value).map_err(|_| {
                BridgeError::InvalidArgument(format!(
                    "{value} is out of range for {}",
                    stringify!($ty)
                ))
            })?;
            visitor.$visit(narrowed)
        }
    };
}

impl<'de, 'a, 'b> de::Deserializer<'de> for &'a mut Deserializer<'b> {
    type Error = BridgeError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, BridgeError> {
        let tag = self.peek()?;
        match tag {
            t if is_int_tag(t) => {
                let (negative, magnitude) = self.int_parts("integer")?;
                if negative {
                    let value = self.checked_negative(magnitude)?;
                    visitor.visit_i64(value)
                } else if magnitude > i64::MAX as u64 {
                    visitor.visit_u64(magnitude)
                } else {
                    visitor.visit_i64(magnitude as i64)
                }
            }
            t if is_float_tag(t) => visitor.visit_f64(decode_f64(self.buf)?),
            t if is_atom_tag(t) => {
                let name = decode_atom(self.buf)?;
                match name.as_str() {
                    "true" => visitor.visit_bool(true),
                    "false" => visitor.visit_bool(false),
                    _ => visitor.visit_string(name),
                }
            }
            tags::STRING_EXT => visitor.visit_string(self.read_charlist_text()?),
            tags::BINARY_EXT => {
                let bytes = decode_binary(self.buf)?;
                match String::from_utf8(bytes) {
                    Ok(text) => visitor.visit_string(text),
                    Err(error) => visitor.visit_byte_buf(error.into_bytes()),
                }
            }
            tags::NIL_EXT | tags::LIST_EXT | tags::SMALL_TUPLE_EXT | tags::LARGE_TUPLE_EXT => {
                let (remaining, need_tail) = self.ordered_header("sequence")?;
                visitor.visit_seq(ElementsAccess {
                    de: self,
                    remaining,
                    need_tail,
                })
            }
            tags::MAP_EXT => {
                self.buf.read_u8()?;
                let remaining = self.buf.read_u32()? as usize;
                visitor.visit_map(MapEntries {
                    de: self,
                    remaining,
                })
            }
            _ => Err(self.mismatch("a bridgeable term")),
        }
    }

    fn deserialize_bool<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, BridgeError> {
        if !is_atom_tag(self.peek()?) {
            return Err(self.mismatch("boolean atom"));
        }
        match decode_atom(self.buf)?.as_str() {
            "true" => visitor.visit_bool(true),
            "false" => visitor.visit_bool(false),
            other => Err(BridgeError::InvalidArgument(format!(
                "atom :{other} is not a boolean"
            ))),
        }
    }

    deserialize_signed!(deserialize_i8, visit_i8, i8);
    deserialize_signed!(deserialize_i16, visit_i16, i16);
    deserialize_signed!(deserialize_i32, visit_i32, i32);

    fn deserialize_i64<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, BridgeError> {
        let value = self.signed()?;
        visitor.visit_i64(value)
    }

    fn deserialize_i128<V: Visitor<'de>>(self, _visitor: V) -> Result<V::Value, BridgeError> {
        Err(BridgeError::Unsupported("128-bit integers"))
    }

    deserialize_unsigned!(deserialize_u8, visit_u8, u8);
    deserialize_unsigned!(deserialize_u16, visit_u16, u16);
    deserialize_unsigned!(deserialize_u32, visit_u32, u32);

    fn deserialize_u64<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, BridgeError> {
        let value = self.unsigned()?;
        visitor.visit_u64(value)
    }

    fn deserialize_u128<V: Visitor<'de>>(self, _visitor: V) -> Result<V::Value, BridgeError> {
        Err(BridgeError::Unsupported("128-bit integers"))
    }

    fn deserialize_f32<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, BridgeError> {
        if !is_float_tag(self.peek()?) {
            return Err(self.mismatch("float"));
        }
        visitor.visit_f32(decode_f64(self.buf)? as f32)
    }

    fn deserialize_f64<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, BridgeError> {
        if !is_float_tag(self.peek()?) {
            return Err(self.mismatch("float"));
        }
        visitor.visit_f64(decode_f64(self.buf)?)
    }

    fn deserialize_char<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, BridgeError> {
        let text = self.read_text()?;
        let mut chars = text.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => visitor.visit_char(c),
            _ => Err(BridgeError::InvalidArgument(format!(
                "expected a single character, got {text:?}"
            ))),
        }
    }

    fn deserialize_str<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, BridgeError> {
        visitor.visit_string(self.read_text()?)
    }

    fn deserialize_string<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, BridgeError> {
        visitor.visit_string(self.read_text()?)
    }

    fn deserialize_bytes<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, BridgeError> {
        match self.peek()? {
            tags::BINARY_EXT => visitor.visit_byte_buf(decode_binary(self.buf)?),
            tags::STRING_EXT => visitor.visit_byte_buf(self.read_charlist_bytes()?),
            _ => Err(self.mismatch("binary")),
        }
    }

    fn deserialize_byte_buf<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, BridgeError> {
        self.deserialize_bytes(visitor)
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, BridgeError> {
        if self.peek()? == tags::NIL_EXT {
            self.buf.read_u8()?;
            visitor.visit_none()
        } else {
            visitor.visit_some(self)
        }
    }

    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, BridgeError> {
        if self.peek()? != tags::NIL_EXT {
            return Err(self.mismatch("nil"));
        }
        self.buf.read_u8()?;
        visitor.visit_unit()
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, BridgeError> {
        self.deserialize_unit(visitor)
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, BridgeError> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, BridgeError> {
        if self.peek()? == tags::STRING_EXT {
            // A charlist is a compact list of small integers.
            let bytes = self.read_charlist_bytes()?;
            return visitor.visit_seq(CharlistElements { bytes, at: 0 });
        }
        let (remaining, need_tail) = self.ordered_header("list or tuple")?;
        visitor.visit_seq(ElementsAccess {
            de: self,
            remaining,
            need_tail,
        })
    }

    fn deserialize_tuple<V: Visitor<'de>>(
        self,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, BridgeError> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, BridgeError> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_map<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, BridgeError> {
        match self.peek()? {
            tags::MAP_EXT => {
                self.buf.read_u8()?;
                let remaining = self.buf.read_u32()? as usize;
                visitor.visit_map(MapEntries {
                    de: self,
                    remaining,
                })
            }
            tags::NIL_EXT => {
                self.buf.read_u8()?;
                visitor.visit_map(MapEntries {
                    de: self,
                    remaining: 0,
                })
            }
            tags::LIST_EXT => {
                self.buf.read_u8()?;
                let remaining = self.buf.read_u32()? as usize;
                visitor.visit_map(KeywordEntries {
                    de: self,
                    remaining,
                    need_tail: true,
                })
            }
            _ => Err(self.mismatch("map or keyword list")),
        }
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, BridgeError> {
        self.deserialize_map(visitor)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, BridgeError> {
        let tag = self.peek()?;
        if is_atom_tag(tag) {
            let name = decode_atom(self.buf)?;
            return visitor.visit_enum(UnitEnum { name });
        }
        if tag == tags::SMALL_TUPLE_EXT || tag == tags::LARGE_TUPLE_EXT {
            let (arity, _) = self.ordered_header("variant tuple")?;
            if arity == 0 {
                return Err(BridgeError::InvalidArgument(
                    "empty tuple cannot carry an enum variant".into(),
                ));
            }
            if !is_atom_tag(self.peek()?) {
                return Err(self.mismatch("variant atom"));
            }
            let name = decode_atom(self.buf)?;
            return visitor.visit_enum(TaggedTupleEnum {
                de: self,
                name,
                payload: arity - 1,
            });
        }
        Err(self.mismatch("atom or tagged tuple"))
    }

    fn deserialize_identifier<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, BridgeError> {
        self.deserialize_str(visitor)
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, BridgeError> {
        self.buf.skip_term()?;
        visitor.visit_unit()
    }

    fn is_human_readable(&self) -> bool {
        false
    }
}

impl Deserializer<'_> {
    fn checked_negative(&self, magnitude: u64) -> Result<i64, BridgeError> {
        if magnitude > i64::MIN.unsigned_abs() {
            return Err(BridgeError::InvalidArgument(format!(
                "-{magnitude} is below the 64-bit range"
            )));
        }
        Ok((magnitude as i128).wrapping_neg() as i64)
    }
}

/// Elements of a list or tuple. For lists, the NIL tail is consumed
/// right after the last element so fixed-arity consumers (which never
/// ask for the trailing `None`) leave the cursor in the right place.
struct ElementsAccess<'a, 'b> {
    de: &'a mut Deserializer<'b>,
    remaining: usize,
    need_tail: bool,
}

impl ElementsAccess<'_, '_> {
    fn consume_tail(&mut self) -> Result<(), BridgeError> {
        if self.need_tail {
            self.need_tail = false;
            self.de.expect_nil()?;
        }
        Ok(())
    }
}

impl<'de> de::SeqAccess<'de> for ElementsAccess<'_, '_> {
    type Error = BridgeError;

    fn next_element_seed<T: de::DeserializeSeed<'de>>(
        &mut self,
        seed: T,
    ) -> Result<Option<T::Value>, BridgeError> {
        if self.remaining == 0 {
            self.consume_tail()?;
            return Ok(None);
        }
        self.remaining -= 1;
        let value = seed.deserialize(&mut *self.de)?;
        if self.remaining == 0 {
            self.consume_tail()?;
        }
        Ok(Some(value))
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.remaining)
    }
}

/// Elements of a compact charlist, served as integers.
struct CharlistElements {
    bytes: Vec<u8>,
    at: usize,
}

impl<'de> de::SeqAccess<'de> for CharlistElements {
    type Error = BridgeError;

    fn next_element_seed<T: de::DeserializeSeed<'de>>(
        &mut self,
        seed: T,
    ) -> Result<Option<T::Value>, BridgeError> {
        let Some(&byte) = self.bytes.get(self.at) else {
            return Ok(None);
        };
        self.at += 1;
        let deserializer: U8Deserializer<BridgeError> = byte.into_deserializer();
        seed.deserialize(deserializer).map(Some)
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.bytes.len() - self.at)
    }
}

/// Entries of a MAP, streamed in wire order.
struct MapEntries<'a, 'b> {
    de: &'a mut Deserializer<'b>,
    remaining: usize,
}

impl<'de> de::MapAccess<'de> for MapEntries<'_, '_> {
    type Error = BridgeError;

    fn next_key_seed<K: de::DeserializeSeed<'de>>(
        &mut self,
        seed: K,
    ) -> Result<Option<K::Value>, BridgeError> {
        if self.remaining == 0 {
            return Ok(None);
        }
        seed.deserialize(&mut *self.de).map(Some)
    }

    fn next_value_seed<V: de::DeserializeSeed<'de>>(
        &mut self,
        seed: V,
    ) -> Result<V::Value, BridgeError> {
        self.remaining -= 1;
        seed.deserialize(&mut *self.de)
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.remaining)
    }
}

/// Entries of a keyword list: `[{key, value} | ...]`.
struct KeywordEntries<'a, 'b> {
    de: &'a mut Deserializer<'b>,
    remaining: usize,
    need_tail: bool,
}

impl<'de> de::MapAccess<'de> for KeywordEntries<'_, '_> {
    type Error = BridgeError;

    fn next_key_seed<K: de::DeserializeSeed<'de>>(
        &mut self,
        seed: K,
    ) -> Result<Option<K::Value>, BridgeError> {
        if self.remaining == 0 {
            if self.need_tail {
                self.need_tail = false;
                self.de.expect_nil()?;
            }
            return Ok(None);
        }
        let pair_tag = self.de.peek()?;
        if pair_tag != tags::SMALL_TUPLE_EXT && pair_tag != tags::LARGE_TUPLE_EXT {
            return Err(self.de.mismatch("keyword pair"));
        }
        let (arity, _) = self.de.ordered_header("keyword pair")?;
        if arity != 2 {
            return Err(BridgeError::InvalidArgument(format!(
                "keyword entry has arity {arity}, expected 2"
            )));
        }
        seed.deserialize(&mut *self.de).map(Some)
    }

    fn next_value_seed<V: de::DeserializeSeed<'de>>(
        &mut self,
        seed: V,
    ) -> Result<V::Value, BridgeError> {
        self.remaining -= 1;
        seed.deserialize(&mut *self.de)
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.remaining)
    }
}

/// A unit variant carried by a bare atom.
struct UnitEnum {
    name: String,
}

impl<'de> de::EnumAccess<'de> for UnitEnum {
    type Error = BridgeError;
    type Variant = UnitOnly;

    fn variant_seed<V: de::DeserializeSeed<'de>>(
        self,
        seed: V,
    ) -> Result<(V::Value, UnitOnly), BridgeError> {
        let deserializer: StringDeserializer<BridgeError> = self.name.into_deserializer();
        Ok((seed.deserialize(deserializer)?, UnitOnly))
    }
}

struct UnitOnly;

impl<'de> de::VariantAccess<'de> for UnitOnly {
    type Error = BridgeError;

    fn unit_variant(self) -> Result<(), BridgeError> {
        Ok(())
    }

    fn newtype_variant_seed<T: de::DeserializeSeed<'de>>(
        self,
        _seed: T,
    ) -> Result<T::Value, BridgeError> {
        Err(BridgeError::InvalidArgument(
            "bare atom cannot carry variant data".into(),
        ))
    }

    fn tuple_variant<V: Visitor<'de>>(
        self,
        _len: usize,
        _visitor: V,
    ) -> Result<V::Value, BridgeError> {
        Err(BridgeError::InvalidArgument(
            "bare atom cannot carry variant data".into(),
        ))
    }

    fn struct_variant<V: Visitor<'de>>(
        self,
        _fields: &'static [&'static str],
        _visitor: V,
    ) -> Result<V::Value, BridgeError> {
        Err(BridgeError::InvalidArgument(
            "bare atom cannot carry variant data".into(),
        ))
    }
}

/// A data variant carried by a `{tag, payload...}` tuple.
struct TaggedTupleEnum<'a, 'b> {
    de: &'a mut Deserializer<'b>,
    name: String,
    payload: usize,
}

impl<'de, 'a, 'b> de::EnumAccess<'de> for TaggedTupleEnum<'a, 'b> {
    type Error = BridgeError;
    type Variant = TuplePayload<'a, 'b>;

    fn variant_seed<V: de::DeserializeSeed<'de>>(
        self,
        seed: V,
    ) -> Result<(V::Value, TuplePayload<'a, 'b>), BridgeError> {
        let name: StrDeserializer<BridgeError> = self.name.as_str().into_deserializer();
        let value = seed.deserialize(name)?;
        Ok((
            value,
            TuplePayload {
                de: self.de,
                payload: self.payload,
            },
        ))
    }
}

struct TuplePayload<'a, 'b> {
    de: &'a mut Deserializer<'b>,
    payload: usize,
}

impl<'de> de::VariantAccess<'de> for TuplePayload<'_, '_> {
    type Error = BridgeError;

    fn unit_variant(self) -> Result<(), BridgeError> {
        if self.payload != 0 {
            return Err(BridgeError::InvalidArgument(format!(
                "unit variant carries {} extra elements",
                self.payload
            )));
        }
        Ok(())
    }

    fn newtype_variant_seed<T: de::DeserializeSeed<'de>>(
        self,
        seed: T,
    ) -> Result<T::Value, BridgeError> {
        if self.payload != 1 {
            return Err(BridgeError::InvalidArgument(format!(
                "newtype variant expects 1 payload element, tuple has {}",
                self.payload
            )));
        }
        seed.deserialize(&mut *self.de)
    }

    fn tuple_variant<V: Visitor<'de>>(
        self,
        len: usize,
        visitor: V,
    ) -> Result<V::Value, BridgeError> {
        if self.payload != len {
            return Err(BridgeError::InvalidArgument(format!(
                "tuple variant expects {len} elements, tuple has {}",
                self.payload
            )));
        }
        visitor.visit_seq(ElementsAccess {
            de: self.de,
            remaining: len,
            need_tail: false,
        })
    }

    fn struct_variant<V: Visitor<'de>>(
        self,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, BridgeError> {
        if self.payload != 1 {
            return Err(BridgeError::InvalidArgument(format!(
                "struct variant expects a single keyed payload, tuple has {}",
                self.payload
            )));
        }
        de::Deserializer::deserialize_map(self.de, visitor)
    }
}
