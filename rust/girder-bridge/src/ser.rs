//! Generic encoder: `serde::Serialize` → ETF bytes.
//!
//! Values stream straight into the buffer through the codec's emit
//! primitives; no intermediate `Term` is built. List and map arities
//! are back-patched through `reserve`/`write_at` so length hints from
//! `Serialize` impls are never trusted for wire correctness.

use serde::{ser, Serialize};

use girder_etf::{
    emit_atom, emit_binary, emit_charlist, emit_f64, emit_i64, emit_nil, emit_tuple_header,
    emit_u64, tags, EtfBuffer, Term,
};

use crate::policy::{KeyedPolicy, Policy, StringPolicy, UnkeyedPolicy};
use crate::wrap;
use crate::BridgeError;

/// Serialize a value into a fresh version-tagged buffer.
pub fn to_buffer<T: Serialize + ?Sized>(value: &T, policy: Policy) -> Result<EtfBuffer, BridgeError> {
    let mut buf = EtfBuffer::versioned();
    append_to(value, policy, &mut buf)?;
    Ok(buf)
}

/// Serialize a value into a byte vector (version byte included).
pub fn to_vec<T: Serialize + ?Sized>(value: &T, policy: Policy) -> Result<Vec<u8>, BridgeError> {
    to_buffer(value, policy).map(EtfBuffer::into_vec)
}

/// Serialize a value onto an existing buffer, without a version byte.
pub fn append_to<T: Serialize + ?Sized>(
    value: &T,
    policy: Policy,
    buf: &mut EtfBuffer,
) -> Result<(), BridgeError> {
    let mut serializer = Serializer { buf, policy };
    value.serialize(&mut serializer)
}

/// Serialize a value and decode the result into a [`Term`]. Used where
/// an API wants terms but the caller has typed values (the RPC DSL's
/// mixed-argument path).
pub fn to_term<T: Serialize + ?Sized>(value: &T, policy: Policy) -> Result<Term, BridgeError> {
    let mut buf = to_buffer(value, policy)?;
    girder_etf::decode(&mut buf).map_err(Into::into)
}

/// The ETF serializer. Policy is ambient state; marker newtype structs
/// from [`crate::wrap`] switch it for exactly one subtree.
pub struct Serializer<'b> {
    buf: &'b mut EtfBuffer,
    policy: Policy,
}

impl<'b> Serializer<'b> {
    pub fn new(buf: &'b mut EtfBuffer, policy: Policy) -> Serializer<'b> {
        Serializer { buf, policy }
    }

    fn emit_text(&mut self, text: &str) -> Result<(), BridgeError> {
        match self.policy.string {
            StringPolicy::Binary => {
                emit_binary(text.as_bytes(), self.buf);
                Ok(())
            }
            StringPolicy::Atom => emit_atom(text, self.buf).map_err(Into::into),
            StringPolicy::Charlist => {
                emit_charlist(text, self.buf);
                Ok(())
            }
        }
    }

    fn emit_key_text(&mut self, key: &str, keys: StringPolicy) -> Result<(), BridgeError> {
        match keys {
            StringPolicy::Binary => {
                emit_binary(key.as_bytes(), self.buf);
                Ok(())
            }
            StringPolicy::Atom => emit_atom(key, self.buf).map_err(Into::into),
            StringPolicy::Charlist => {
                emit_charlist(key, self.buf);
                Ok(())
            }
        }
    }

    fn policy_override(name: &'static str) -> Option<fn(&mut Policy)> {
        match name {
            wrap::MARKER_ATOM => Some(|p| p.string = StringPolicy::Atom),
            wrap::MARKER_BINARY => Some(|p| p.string = StringPolicy::Binary),
            wrap::MARKER_CHARLIST => Some(|p| p.string = StringPolicy::Charlist),
            wrap::MARKER_TUPLE => Some(|p| p.unkeyed = UnkeyedPolicy::Tuple),
            wrap::MARKER_LIST => Some(|p| p.unkeyed = UnkeyedPolicy::List),
            wrap::MARKER_KEYWORD_LIST => Some(|p| p.keyed = KeyedPolicy::KeywordList),
            wrap::MARKER_MAP => Some(|p| {
                p.keyed = KeyedPolicy::Map {
                    keys: StringPolicy::Atom,
                }
            }),
            _ => None,
        }
    }
}

impl<'a, 'b> ser::Serializer for &'a mut Serializer<'b> {
    type Ok = ();
    type Error = BridgeError;

    type SerializeSeq = SeqEmitter<'a, 'b>;
    type SerializeTuple = SeqEmitter<'a, 'b>;
    type SerializeTupleStruct = SeqEmitter<'a, 'b>;
    type SerializeTupleVariant = SeqEmitter<'a, 'b>;
    type SerializeMap = MapEmitter<'a, 'b>;
    type SerializeStruct = MapEmitter<'a, 'b>;
    type SerializeStructVariant = MapEmitter<'a, 'b>;

    fn serialize_bool(self, value: bool) -> Result<(), BridgeError> {
        emit_atom(if value { "true" } else { "false" }, self.buf).map_err(Into::into)
    }

    fn serialize_i8(self, value: i8) -> Result<(), BridgeError> {
        emit_i64(value as i64, self.buf);
        Ok(())
    }

    fn serialize_i16(self, value: i16) -> Result<(), BridgeError> {
        emit_i64(value as i64, self.buf);
        Ok(())
    }

    fn serialize_i32(self, value: i32) -> Result<(), BridgeError> {
        emit_i64(value as i64, self.buf);
        Ok(())
    }

    fn serialize_i64(self, value: i64) -> Result<(), BridgeError> {
        emit_i64(value, self.buf);
        Ok(())
    }

    fn serialize_i128(self, _value: i128) -> Result<(), BridgeError> {
        Err(BridgeError::Unsupported("128-bit integers"))
    }

    fn serialize_u8(self, value: u8) -> Result<(), BridgeError> {
        emit_u64(value as u64, self.buf);
        Ok(())
    }

    fn serialize_u16(self, value: u16) -> Result<(), BridgeError> {
        emit_u64(value as u64, self.buf);
        Ok(())
    }

    fn serialize_u32(self, value: u32) -> Result<(), BridgeError> {
        emit_u64(value as u64, self.buf);
        Ok(())
    }

    fn serialize_u64(self, value: u64) -> Result<(), BridgeError> {
        emit_u64(value, self.buf);
        Ok(())
    }

    fn serialize_u128(self, _value: u128) -> Result<(), BridgeError> {
        Err(BridgeError::Unsupported("128-bit integers"))
    }

    fn serialize_f32(self, value: f32) -> Result<(), BridgeError> {
        emit_f64(value as f64, self.buf);
        Ok(())
    }

    fn serialize_f64(self, value: f64) -> Result<(), BridgeError> {
        emit_f64(value, self.buf);
        Ok(())
    }

    fn serialize_char(self, value: char) -> Result<(), BridgeError> {
        let mut tmp = [0u8; 4];
        let text = value.encode_utf8(&mut tmp);
        self.emit_text(text)
    }

    fn serialize_str(self, value: &str) -> Result<(), BridgeError> {
        self.emit_text(value)
    }

    fn serialize_bytes(self, value: &[u8]) -> Result<(), BridgeError> {
        emit_binary(value, self.buf);
        Ok(())
    }

    fn serialize_none(self) -> Result<(), BridgeError> {
        emit_nil(self.buf);
        Ok(())
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Result<(), BridgeError> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<(), BridgeError> {
        emit_nil(self.buf);
        Ok(())
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<(), BridgeError> {
        emit_nil(self.buf);
        Ok(())
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
    ) -> Result<(), BridgeError> {
        emit_atom(variant, self.buf).map_err(Into::into)
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        name: &'static str,
        value: &T,
    ) -> Result<(), BridgeError> {
        match Serializer::policy_override(name) {
            Some(apply) => {
                let saved = self.policy;
                apply(&mut self.policy);
                let result = value.serialize(&mut *self);
                // Restored on success and on error alike.
                self.policy = saved;
                result
            }
            None => value.serialize(self),
        }
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<(), BridgeError> {
        emit_tuple_header(2, self.buf);
        emit_atom(variant, self.buf)?;
        value.serialize(self)
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<SeqEmitter<'a, 'b>, BridgeError> {
        let as_tuple = self.policy.unkeyed == UnkeyedPolicy::Tuple;
        if as_tuple {
            SeqEmitter::tuple(self, len)
        } else {
            SeqEmitter::list(self, len)
        }
    }

    fn serialize_tuple(self, len: usize) -> Result<SeqEmitter<'a, 'b>, BridgeError> {
        if self.policy.unkeyed == UnkeyedPolicy::List {
            SeqEmitter::list(self, Some(len))
        } else {
            SeqEmitter::tuple(self, Some(len))
        }
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<SeqEmitter<'a, 'b>, BridgeError> {
        self.serialize_tuple(len)
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<SeqEmitter<'a, 'b>, BridgeError> {
        emit_tuple_header(len + 1, self.buf);
        emit_atom(variant, self.buf)?;
        Ok(SeqEmitter::bare_tuple(self))
    }

    fn serialize_map(self, len: Option<usize>) -> Result<MapEmitter<'a, 'b>, BridgeError> {
        MapEmitter::new(self, len)
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<MapEmitter<'a, 'b>, BridgeError> {
        MapEmitter::new(self, Some(len))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<MapEmitter<'a, 'b>, BridgeError> {
        emit_tuple_header(2, self.buf);
        emit_atom(variant, self.buf)?;
        MapEmitter::new(self, Some(len))
    }

    fn is_human_readable(&self) -> bool {
        false
    }
}

/// In-progress ordered group. `count_at` points at a reserved arity
/// word when the final count is back-patched.
pub struct SeqEmitter<'a, 'b> {
    ser: &'a mut Serializer<'b>,
    tuple: bool,
    count_at: Option<usize>,
    count: u32,
    done: bool,
}

impl<'a, 'b> SeqEmitter<'a, 'b> {
    fn list(ser: &'a mut Serializer<'b>, len: Option<usize>) -> Result<Self, BridgeError> {
        let (count_at, done) = match len {
            Some(0) => {
                emit_nil(ser.buf);
                (None, true)
            }
            _ => {
                ser.buf.append_byte(tags::LIST_EXT);
                (Some(ser.buf.reserve(4)), false)
            }
        };
        Ok(SeqEmitter {
            ser,
            tuple: false,
            count_at,
            count: 0,
            done,
        })
    }

    fn tuple(ser: &'a mut Serializer<'b>, len: Option<usize>) -> Result<Self, BridgeError> {
        let count_at = match len {
            Some(len) => {
                emit_tuple_header(len, ser.buf);
                None
            }
            None => {
                ser.buf.append_byte(tags::LARGE_TUPLE_EXT);
                Some(ser.buf.reserve(4))
            }
        };
        Ok(SeqEmitter {
            ser,
            tuple: true,
            count_at,
            count: 0,
            done: false,
        })
    }

    /// For variants whose header (arity + tag atom) is already emitted.
    fn bare_tuple(ser: &'a mut Serializer<'b>) -> Self {
        SeqEmitter {
            ser,
            tuple: true,
            count_at: None,
            count: 0,
            done: false,
        }
    }

    fn element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), BridgeError> {
        value.serialize(&mut *self.ser)?;
        self.count += 1;
        Ok(())
    }

    fn finish(self) -> Result<(), BridgeError> {
        if let Some(at) = self.count_at {
            self.ser.buf.write_at(at, &self.count.to_be_bytes());
        }
        if !self.tuple && !self.done {
            emit_nil(self.ser.buf);
        }
        Ok(())
    }
}

impl ser::SerializeSeq for SeqEmitter<'_, '_> {
    type Ok = ();
    type Error = BridgeError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), BridgeError> {
        self.element(value)
    }

    fn end(self) -> Result<(), BridgeError> {
        self.finish()
    }
}

impl ser::SerializeTuple for SeqEmitter<'_, '_> {
    type Ok = ();
    type Error = BridgeError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), BridgeError> {
        self.element(value)
    }

    fn end(self) -> Result<(), BridgeError> {
        self.finish()
    }
}

impl ser::SerializeTupleStruct for SeqEmitter<'_, '_> {
    type Ok = ();
    type Error = BridgeError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), BridgeError> {
        self.element(value)
    }

    fn end(self) -> Result<(), BridgeError> {
        self.finish()
    }
}

impl ser::SerializeTupleVariant for SeqEmitter<'_, '_> {
    type Ok = ();
    type Error = BridgeError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), BridgeError> {
        self.element(value)
    }

    fn end(self) -> Result<(), BridgeError> {
        self.finish()
    }
}

/// In-progress keyed group: a MAP or a keyword list, per the keyed
/// policy captured at entry.
pub struct MapEmitter<'a, 'b> {
    ser: &'a mut Serializer<'b>,
    keyword: bool,
    keys: StringPolicy,
    count_at: Option<usize>,
    count: u32,
    done: bool,
}

impl<'a, 'b> MapEmitter<'a, 'b> {
    fn new(ser: &'a mut Serializer<'b>, len: Option<usize>) -> Result<Self, BridgeError> {
        match ser.policy.keyed {
            KeyedPolicy::Map { keys } => {
                ser.buf.append_byte(tags::MAP_EXT);
                let count_at = Some(ser.buf.reserve(4));
                Ok(MapEmitter {
                    ser,
                    keyword: false,
                    keys,
                    count_at,
                    count: 0,
                    done: false,
                })
            }
            KeyedPolicy::KeywordList => {
                let (count_at, done) = match len {
                    Some(0) => {
                        emit_nil(ser.buf);
                        (None, true)
                    }
                    _ => {
                        ser.buf.append_byte(tags::LIST_EXT);
                        (Some(ser.buf.reserve(4)), false)
                    }
                };
                Ok(MapEmitter {
                    ser,
                    keyword: true,
                    keys: StringPolicy::Atom,
                    count_at,
                    count: 0,
                    done,
                })
            }
        }
    }

    fn key<T: Serialize + ?Sized>(&mut self, key: &T) -> Result<(), BridgeError> {
        if self.keyword {
            emit_tuple_header(2, self.ser.buf);
        }
        // Route string keys through the key policy; restore on every
        // exit path.
        let saved = self.ser.policy.string;
        self.ser.policy.string = self.keys;
        let result = key.serialize(&mut *self.ser);
        self.ser.policy.string = saved;
        result
    }

    fn text_key(&mut self, key: &str) -> Result<(), BridgeError> {
        if self.keyword {
            emit_tuple_header(2, self.ser.buf);
        }
        self.ser.emit_key_text(key, self.keys)
    }

    fn value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), BridgeError> {
        value.serialize(&mut *self.ser)?;
        self.count += 1;
        Ok(())
    }

    fn finish(self) -> Result<(), BridgeError> {
        if let Some(at) = self.count_at {
            self.ser.buf.write_at(at, &self.count.to_be_bytes());
        }
        if self.keyword && !self.done {
            emit_nil(self.ser.buf);
        }
        Ok(())
    }
}

impl ser::SerializeMap for MapEmitter<'_, '_> {
    type Ok = ();
    type Error = BridgeError;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> Result<(), BridgeError> {
        self.key(key)
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), BridgeError> {
        self.value(value)
    }

    fn end(self) -> Result<(), BridgeError> {
        self.finish()
    }
}

impl ser::SerializeStruct for MapEmitter<'_, '_> {
    type Ok = ();
    type Error = BridgeError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), BridgeError> {
        self.text_key(key)?;
        self.value(value)
    }

    fn end(self) -> Result<(), BridgeError> {
        self.finish()
    }
}

impl ser::SerializeStructVariant for MapEmitter<'_, '_> {
    type Ok = ();
    type Error = BridgeError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), BridgeError> {
        self.text_key(key)?;
        self.value(value)
    }

    fn end(self) -> Result<(), BridgeError> {
        self.finish()
    }
}
