//! Term codec: encode/decode between [`Term`] and ETF bytes.
//!
//! Tag dispatch is by the leading tag byte. The decoder accepts every
//! tag family in [`crate::tags`] and canonicalises (all integer forms
//! become `Int`, all atom forms become `Atom`, and so on); the encoder
//! emits the narrowest legal encoding: SMALL_INTEGER for 0..=255,
//! INTEGER for the i32 range, SMALL_BIG beyond, NEW_FLOAT for floats,
//! SMALL_ATOM_UTF8/ATOM_UTF8 for atoms.
//!
//! The `emit_*` / `decode_*` helpers are the shared write/read
//! primitives; the generic bridge uses them to stream values without
//! materialising a `Term`.

use crate::tags;
use crate::{Closure, DecodeError, EncodeError, EtfBuffer, Fun, LegacyClosure, Pid, Port, Reference, Term};

// ----------------------------------------------------------------------
// Encoding
// ----------------------------------------------------------------------

/// Encode one term at the buffer's write position.
pub fn encode(term: &Term, buf: &mut EtfBuffer) -> Result<(), EncodeError> {
    match term {
        Term::Int(n) => {
            emit_i64(*n, buf);
            Ok(())
        }
        Term::Float(x) => {
            emit_f64(*x, buf);
            Ok(())
        }
        Term::Atom(name) => emit_atom(name, buf),
        Term::String(s) => {
            emit_charlist(s, buf);
            Ok(())
        }
        Term::Binary(bytes) => {
            emit_binary(bytes, buf);
            Ok(())
        }
        Term::Bitstring(bytes, bits) => encode_bitstring(bytes, *bits, buf),
        Term::Tuple(elements) => {
            emit_tuple_header(elements.len(), buf);
            for element in elements {
                encode(element, buf)?;
            }
            Ok(())
        }
        Term::List(elements) => {
            if elements.is_empty() {
                emit_nil(buf);
                return Ok(());
            }
            emit_list_header(elements.len(), buf);
            for element in elements {
                encode(element, buf)?;
            }
            emit_nil(buf);
            Ok(())
        }
        Term::Map(pairs) => {
            emit_map_header(pairs.len(), buf);
            for (key, value) in pairs {
                encode(key, buf)?;
                encode(value, buf)?;
            }
            Ok(())
        }
        Term::Pid(pid) => encode_pid(pid, buf),
        Term::Port(port) => encode_port(port, buf),
        Term::Reference(reference) => encode_reference(reference, buf),
        Term::Fun(fun) => encode_fun(fun, buf),
    }
}

/// Emit a signed integer in its narrowest encoding.
pub fn emit_i64(value: i64, buf: &mut EtfBuffer) {
    if (0..=255).contains(&value) {
        buf.append_byte(tags::SMALL_INTEGER_EXT);
        buf.append_byte(value as u8);
    } else if let Ok(small) = i32::try_from(value) {
        buf.append_byte(tags::INTEGER_EXT);
        buf.append_bytes(&small.to_be_bytes());
    } else {
        emit_big(value < 0, value.unsigned_abs(), buf);
    }
}

/// Emit an unsigned integer in its narrowest encoding. Values beyond
/// `i64::MAX` become SMALL_BIG, which `Term` itself cannot hold but the
/// generic bridge round-trips for `u64` targets.
pub fn emit_u64(value: u64, buf: &mut EtfBuffer) {
    if value <= 255 {
        buf.append_byte(tags::SMALL_INTEGER_EXT);
        buf.append_byte(value as u8);
    } else if value <= i32::MAX as u64 {
        buf.append_byte(tags::INTEGER_EXT);
        buf.append_bytes(&(value as i32).to_be_bytes());
    } else {
        emit_big(false, value, buf);
    }
}

fn emit_big(negative: bool, magnitude: u64, buf: &mut EtfBuffer) {
    let le = magnitude.to_le_bytes();
    let len = (8 - magnitude.leading_zeros() as usize / 8).max(1);
    buf.append_byte(tags::SMALL_BIG_EXT);
    buf.append_byte(len as u8);
    buf.append_byte(u8::from(negative));
    buf.append_bytes(&le[..len]);
}

/// Emit a float as NEW_FLOAT (big-endian IEEE-754 double).
pub fn emit_f64(value: f64, buf: &mut EtfBuffer) {
    buf.append_byte(tags::NEW_FLOAT_EXT);
    buf.append_bytes(&value.to_be_bytes());
}

/// Emit an atom as SMALL_ATOM_UTF8 or ATOM_UTF8.
pub fn emit_atom(name: &str, buf: &mut EtfBuffer) -> Result<(), EncodeError> {
    let bytes = name.as_bytes();
    if name.chars().count() > 255 || bytes.len() > u16::MAX as usize {
        return Err(EncodeError::AtomTooLong(bytes.len()));
    }
    if bytes.len() <= 255 {
        buf.append_byte(tags::SMALL_ATOM_UTF8_EXT);
        buf.append_byte(bytes.len() as u8);
    } else {
        buf.append_byte(tags::ATOM_UTF8_EXT);
        buf.append_u16(bytes.len() as u16);
    }
    buf.append_bytes(bytes);
    Ok(())
}

/// Emit a byte-aligned binary.
pub fn emit_binary(bytes: &[u8], buf: &mut EtfBuffer) {
    buf.append_byte(tags::BINARY_EXT);
    buf.append_u32(bytes.len() as u32);
    buf.append_bytes(bytes);
}

/// Emit text in the charlist form: STRING when every code point fits a
/// byte and the length fits u16, otherwise a proper list of integers.
pub fn emit_charlist(text: &str, buf: &mut EtfBuffer) {
    let count = text.chars().count();
    let compact = count <= u16::MAX as usize && text.chars().all(|c| (c as u32) <= 0xff);
    if compact {
        buf.append_byte(tags::STRING_EXT);
        buf.append_u16(count as u16);
        for c in text.chars() {
            buf.append_byte(c as u32 as u8);
        }
    } else {
        emit_list_header(count, buf);
        for c in text.chars() {
            emit_i64(c as u32 as i64, buf);
        }
        emit_nil(buf);
    }
}

/// Emit the empty list.
pub fn emit_nil(buf: &mut EtfBuffer) {
    buf.append_byte(tags::NIL_EXT);
}

/// Emit a tuple header; the caller emits `arity` terms after it.
pub fn emit_tuple_header(arity: usize, buf: &mut EtfBuffer) {
    if arity <= 255 {
        buf.append_byte(tags::SMALL_TUPLE_EXT);
        buf.append_byte(arity as u8);
    } else {
        buf.append_byte(tags::LARGE_TUPLE_EXT);
        buf.append_u32(arity as u32);
    }
}

/// Emit a list header; the caller emits `len` terms and a NIL tail.
pub fn emit_list_header(len: usize, buf: &mut EtfBuffer) {
    buf.append_byte(tags::LIST_EXT);
    buf.append_u32(len as u32);
}

/// Emit a map header; the caller emits `arity` key/value term pairs.
pub fn emit_map_header(arity: usize, buf: &mut EtfBuffer) {
    buf.append_byte(tags::MAP_EXT);
    buf.append_u32(arity as u32);
}

fn encode_bitstring(bytes: &[u8], bits: u8, buf: &mut EtfBuffer) -> Result<(), EncodeError> {
    let valid = if bytes.is_empty() {
        bits == 0
    } else {
        (1..=8).contains(&bits)
    };
    if !valid {
        return Err(EncodeError::InvalidBitstring(bits));
    }
    buf.append_byte(tags::BIT_BINARY_EXT);
    buf.append_u32(bytes.len() as u32);
    buf.append_byte(bits);
    buf.append_bytes(bytes);
    Ok(())
}

fn encode_pid(pid: &Pid, buf: &mut EtfBuffer) -> Result<(), EncodeError> {
    buf.append_byte(tags::NEW_PID_EXT);
    emit_atom(&pid.node, buf)?;
    buf.append_u32(pid.num);
    buf.append_u32(pid.serial);
    buf.append_u32(pid.creation);
    Ok(())
}

fn encode_port(port: &Port, buf: &mut EtfBuffer) -> Result<(), EncodeError> {
    if let Ok(id) = u32::try_from(port.id) {
        buf.append_byte(tags::NEW_PORT_EXT);
        emit_atom(&port.node, buf)?;
        buf.append_u32(id);
    } else {
        buf.append_byte(tags::V4_PORT_EXT);
        emit_atom(&port.node, buf)?;
        buf.append_u64(port.id);
    }
    buf.append_u32(port.creation);
    Ok(())
}

fn encode_reference(reference: &Reference, buf: &mut EtfBuffer) -> Result<(), EncodeError> {
    buf.append_byte(tags::NEWER_REFERENCE_EXT);
    buf.append_u16(reference.ids.len() as u16);
    emit_atom(&reference.node, buf)?;
    buf.append_u32(reference.creation);
    for id in &reference.ids {
        buf.append_u32(*id);
    }
    Ok(())
}

fn encode_fun(fun: &Fun, buf: &mut EtfBuffer) -> Result<(), EncodeError> {
    match fun {
        Fun::Export {
            module,
            function,
            arity,
        } => {
            buf.append_byte(tags::EXPORT_EXT);
            emit_atom(module, buf)?;
            emit_atom(function, buf)?;
            emit_i64(*arity as i64, buf);
            Ok(())
        }
        Fun::Closure(closure) => {
            buf.append_byte(tags::NEW_FUN_EXT);
            let size_at = buf.reserve(4);
            buf.append_byte(closure.arity);
            buf.append_bytes(&closure.uniq);
            buf.append_u32(closure.index);
            buf.append_u32(closure.free.len() as u32);
            emit_atom(&closure.module, buf)?;
            emit_i64(closure.old_index, buf);
            emit_i64(closure.old_uniq, buf);
            encode_pid(&closure.pid, buf)?;
            for free in &closure.free {
                encode(free, buf)?;
            }
            // Size spans everything after the tag, itself included.
            let size = (buf.len() - size_at) as u32;
            buf.write_at(size_at, &size.to_be_bytes());
            Ok(())
        }
        Fun::Legacy(closure) => {
            buf.append_byte(tags::FUN_EXT);
            buf.append_u32(closure.free.len() as u32);
            encode_pid(&closure.pid, buf)?;
            emit_atom(&closure.module, buf)?;
            emit_i64(closure.index, buf);
            emit_i64(closure.uniq, buf);
            for free in &closure.free {
                encode(free, buf)?;
            }
            Ok(())
        }
    }
}

// ----------------------------------------------------------------------
// Decoding
// ----------------------------------------------------------------------

/// Decode one term at the buffer's read cursor, consuming a leading
/// version byte when the cursor is at offset 0.
pub fn decode(buf: &mut EtfBuffer) -> Result<Term, DecodeError> {
    buf.consume_version();
    decode_term(buf)
}

fn decode_term(buf: &mut EtfBuffer) -> Result<Term, DecodeError> {
    let tag = buf.read_u8()?;
    match tag {
        tags::SMALL_INTEGER_EXT => Ok(Term::Int(buf.read_u8()? as i64)),
        tags::INTEGER_EXT => Ok(Term::Int(buf.read_i32()? as i64)),
        tags::SMALL_BIG_EXT | tags::LARGE_BIG_EXT => {
            let (negative, magnitude) = decode_big(tag, buf)?;
            big_to_i64(negative, magnitude).map(Term::Int)
        }
        tags::NEW_FLOAT_EXT => Ok(Term::Float(buf.read_f64()?)),
        tags::FLOAT_EXT => Ok(Term::Float(decode_float_string(buf)?)),
        tags::ATOM_EXT | tags::SMALL_ATOM_EXT | tags::ATOM_UTF8_EXT | tags::SMALL_ATOM_UTF8_EXT => {
            Ok(Term::Atom(decode_atom_body(tag, buf)?))
        }
        tags::NIL_EXT => Ok(Term::List(Vec::new())),
        tags::STRING_EXT => {
            let len = buf.read_u16()? as usize;
            let bytes = buf.read_exact(len)?;
            Ok(Term::String(latin1_to_string(bytes)))
        }
        tags::LIST_EXT => {
            let len = buf.read_u32()? as usize;
            let mut elements = Vec::with_capacity(len.min(4096));
            for _ in 0..len {
                elements.push(decode_term(buf)?);
            }
            if buf.read_u8()? != tags::NIL_EXT {
                return Err(DecodeError::MissingListEnd);
            }
            Ok(Term::List(elements))
        }
        tags::SMALL_TUPLE_EXT => {
            let arity = buf.read_u8()? as usize;
            decode_tuple(arity, buf)
        }
        tags::LARGE_TUPLE_EXT => {
            let arity = buf.read_u32()? as usize;
            decode_tuple(arity, buf)
        }
        tags::MAP_EXT => {
            let arity = buf.read_u32()? as usize;
            let mut pairs = Vec::with_capacity(arity.min(4096));
            for _ in 0..arity {
                let key = decode_term(buf)?;
                let value = decode_term(buf)?;
                pairs.push((key, value));
            }
            Ok(Term::Map(pairs))
        }
        tags::BINARY_EXT => {
            let len = buf.read_u32()? as usize;
            Ok(Term::Binary(buf.read_exact(len)?.to_vec()))
        }
        tags::BIT_BINARY_EXT => {
            let len = buf.read_u32()? as usize;
            let bits = buf.read_u8()?;
            if bits > 8 {
                return Err(DecodeError::UnsupportedBitOffset(bits));
            }
            if (bits == 0) != (len == 0) {
                return Err(DecodeError::BadTerm);
            }
            Ok(Term::Bitstring(buf.read_exact(len)?.to_vec(), bits))
        }
        tags::PID_EXT | tags::NEW_PID_EXT => Ok(Term::Pid(decode_pid_body(tag, buf)?)),
        tags::PORT_EXT => {
            let node = decode_atom(buf)?;
            let id = buf.read_u32()? as u64;
            let creation = buf.read_u8()? as u32;
            Ok(Term::Port(Port { node, id, creation }))
        }
        tags::NEW_PORT_EXT => {
            let node = decode_atom(buf)?;
            let id = buf.read_u32()? as u64;
            let creation = buf.read_u32()?;
            Ok(Term::Port(Port { node, id, creation }))
        }
        tags::V4_PORT_EXT => {
            let node = decode_atom(buf)?;
            let id = buf.read_u64()?;
            let creation = buf.read_u32()?;
            Ok(Term::Port(Port { node, id, creation }))
        }
        tags::REFERENCE_EXT => {
            let node = decode_atom(buf)?;
            let id = buf.read_u32()?;
            let creation = buf.read_u8()? as u32;
            Ok(Term::Reference(Reference {
                node,
                creation,
                ids: vec![id],
            }))
        }
        tags::NEW_REFERENCE_EXT | tags::NEWER_REFERENCE_EXT => {
            let len = buf.read_u16()? as usize;
            let node = decode_atom(buf)?;
            let creation = if tag == tags::NEW_REFERENCE_EXT {
                buf.read_u8()? as u32
            } else {
                buf.read_u32()?
            };
            let mut ids = Vec::with_capacity(len.min(16));
            for _ in 0..len {
                ids.push(buf.read_u32()?);
            }
            Ok(Term::Reference(Reference {
                node,
                creation,
                ids,
            }))
        }
        tags::EXPORT_EXT => {
            let module = decode_atom(buf)?;
            let function = decode_atom(buf)?;
            let arity = decode_int(buf)?;
            let arity = u8::try_from(arity).map_err(|_| DecodeError::BadTerm)?;
            Ok(Term::Fun(Fun::Export {
                module,
                function,
                arity,
            }))
        }
        tags::NEW_FUN_EXT => {
            let _size = buf.read_u32()?;
            let arity = buf.read_u8()?;
            let mut uniq = [0u8; 16];
            uniq.copy_from_slice(buf.read_exact(16)?);
            let index = buf.read_u32()?;
            let num_free = buf.read_u32()? as usize;
            let module = decode_atom(buf)?;
            let old_index = decode_int(buf)?;
            let old_uniq = decode_int(buf)?;
            let pid = decode_pid_term(buf)?;
            let mut free = Vec::with_capacity(num_free.min(256));
            for _ in 0..num_free {
                free.push(decode_term(buf)?);
            }
            Ok(Term::Fun(Fun::Closure(Box::new(Closure {
                arity,
                uniq,
                index,
                module,
                old_index,
                old_uniq,
                pid,
                free,
            }))))
        }
        tags::FUN_EXT => {
            let num_free = buf.read_u32()? as usize;
            let pid = decode_pid_term(buf)?;
            let module = decode_atom(buf)?;
            let index = decode_int(buf)?;
            let uniq = decode_int(buf)?;
            let mut free = Vec::with_capacity(num_free.min(256));
            for _ in 0..num_free {
                free.push(decode_term(buf)?);
            }
            Ok(Term::Fun(Fun::Legacy(Box::new(LegacyClosure {
                pid,
                module,
                index,
                uniq,
                free,
            }))))
        }
        other => Err(DecodeError::UnknownTag(other)),
    }
}

fn decode_tuple(arity: usize, buf: &mut EtfBuffer) -> Result<Term, DecodeError> {
    let mut elements = Vec::with_capacity(arity.min(4096));
    for _ in 0..arity {
        elements.push(decode_term(buf)?);
    }
    Ok(Term::Tuple(elements))
}

/// Decode any atom-family term (reads the tag itself).
pub fn decode_atom(buf: &mut EtfBuffer) -> Result<String, DecodeError> {
    let tag = buf.read_u8()?;
    decode_atom_body(tag, buf)
}

fn decode_atom_body(tag: u8, buf: &mut EtfBuffer) -> Result<String, DecodeError> {
    let len = match tag {
        tags::ATOM_EXT | tags::ATOM_UTF8_EXT => buf.read_u16()? as usize,
        tags::SMALL_ATOM_EXT | tags::SMALL_ATOM_UTF8_EXT => buf.read_u8()? as usize,
        _ => return Err(DecodeError::BadTerm),
    };
    let bytes = buf.read_exact(len)?;
    match tag {
        tags::ATOM_UTF8_EXT | tags::SMALL_ATOM_UTF8_EXT => std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| DecodeError::BadTerm),
        _ => Ok(latin1_to_string(bytes)),
    }
}

/// Decode any integer-family term to `i64` (reads the tag itself).
pub fn decode_int(buf: &mut EtfBuffer) -> Result<i64, DecodeError> {
    let (negative, magnitude) = decode_int_parts(buf)?;
    big_to_i64(negative, magnitude)
}

/// Decode any integer-family term to sign + magnitude. Lets the bridge
/// round-trip `u64` values above `i64::MAX`.
pub fn decode_int_parts(buf: &mut EtfBuffer) -> Result<(bool, u64), DecodeError> {
    let tag = buf.read_u8()?;
    match tag {
        tags::SMALL_INTEGER_EXT => Ok((false, buf.read_u8()? as u64)),
        tags::INTEGER_EXT => {
            let value = buf.read_i32()? as i64;
            Ok((value < 0, value.unsigned_abs()))
        }
        tags::SMALL_BIG_EXT | tags::LARGE_BIG_EXT => decode_big(tag, buf),
        _ => Err(DecodeError::BadTerm),
    }
}

fn decode_big(tag: u8, buf: &mut EtfBuffer) -> Result<(bool, u64), DecodeError> {
    let len = if tag == tags::SMALL_BIG_EXT {
        buf.read_u8()? as usize
    } else {
        buf.read_u32()? as usize
    };
    let negative = match buf.read_u8()? {
        0 => false,
        1 => true,
        _ => return Err(DecodeError::BadTerm),
    };
    let bytes = buf.read_exact(len)?;
    // Little-endian magnitude; 64-bit model, wider values are rejected.
    let mut magnitude: u64 = 0;
    for (i, &byte) in bytes.iter().enumerate() {
        if i >= 8 {
            if byte != 0 {
                return Err(DecodeError::BadTerm);
            }
            continue;
        }
        magnitude |= (byte as u64) << (8 * i);
    }
    Ok((negative, magnitude))
}

fn big_to_i64(negative: bool, magnitude: u64) -> Result<i64, DecodeError> {
    if negative {
        if magnitude > i64::MIN.unsigned_abs() {
            return Err(DecodeError::BadTerm);
        }
        Ok((magnitude as i128).wrapping_neg() as i64)
    } else {
        i64::try_from(magnitude).map_err(|_| DecodeError::BadTerm)
    }
}

/// Decode a float-family term (reads the tag itself).
pub fn decode_f64(buf: &mut EtfBuffer) -> Result<f64, DecodeError> {
    match buf.read_u8()? {
        tags::NEW_FLOAT_EXT => buf.read_f64(),
        tags::FLOAT_EXT => decode_float_string(buf),
        _ => Err(DecodeError::BadTerm),
    }
}

/// Decode a BINARY term (reads the tag itself).
pub fn decode_binary(buf: &mut EtfBuffer) -> Result<Vec<u8>, DecodeError> {
    if buf.read_u8()? != tags::BINARY_EXT {
        return Err(DecodeError::BadTerm);
    }
    let len = buf.read_u32()? as usize;
    Ok(buf.read_exact(len)?.to_vec())
}

fn decode_float_string(buf: &mut EtfBuffer) -> Result<f64, DecodeError> {
    let bytes = buf.read_exact(31)?;
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    let text = std::str::from_utf8(&bytes[..end]).map_err(|_| DecodeError::BadTerm)?;
    text.trim().parse().map_err(|_| DecodeError::BadTerm)
}

fn decode_pid_term(buf: &mut EtfBuffer) -> Result<Pid, DecodeError> {
    let tag = buf.read_u8()?;
    decode_pid_body(tag, buf)
}

fn decode_pid_body(tag: u8, buf: &mut EtfBuffer) -> Result<Pid, DecodeError> {
    if tag != tags::PID_EXT && tag != tags::NEW_PID_EXT {
        return Err(DecodeError::BadTerm);
    }
    let node = decode_atom(buf)?;
    let num = buf.read_u32()?;
    let serial = buf.read_u32()?;
    let creation = if tag == tags::PID_EXT {
        buf.read_u8()? as u32
    } else {
        buf.read_u32()?
    };
    Ok(Pid {
        node,
        num,
        serial,
        creation,
    })
}

fn latin1_to_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(term: &Term) -> Term {
        let mut buf = EtfBuffer::versioned();
        encode(term, &mut buf).unwrap();
        decode(&mut buf).unwrap()
    }

    fn encoded(term: &Term) -> Vec<u8> {
        let mut buf = EtfBuffer::versioned();
        encode(term, &mut buf).unwrap();
        buf.into_vec()
    }

    #[test]
    fn ok_42_tuple_bytes() {
        let term = Term::tuple(vec![Term::atom("ok"), Term::Int(42)]);
        assert_eq!(
            encoded(&term),
            vec![131, 104, 2, 119, 2, b'o', b'k', 97, 42]
        );
    }

    #[test]
    fn map_with_binary_value_decodes() {
        let mut bytes = vec![131, 116, 0, 0, 0, 1, 119, 4];
        bytes.extend_from_slice(b"name");
        bytes.extend_from_slice(&[109, 0, 0, 0, 3]);
        bytes.extend_from_slice(b"bob");
        let mut buf = EtfBuffer::from_vec(bytes);
        let term = decode(&mut buf).unwrap();
        assert_eq!(
            term,
            Term::map(vec![(Term::atom("name"), Term::binary(*b"bob"))])
        );
    }

    #[test]
    fn integer_canonicalisation_boundaries() {
        assert_eq!(encoded(&Term::Int(0))[1], tags::SMALL_INTEGER_EXT);
        assert_eq!(encoded(&Term::Int(255))[1], tags::SMALL_INTEGER_EXT);
        assert_eq!(encoded(&Term::Int(256))[1], tags::INTEGER_EXT);
        assert_eq!(encoded(&Term::Int(-1))[1], tags::INTEGER_EXT);
        assert_eq!(encoded(&Term::Int(i32::MIN as i64))[1], tags::INTEGER_EXT);
        assert_eq!(
            encoded(&Term::Int(i32::MAX as i64 + 1))[1],
            tags::SMALL_BIG_EXT
        );
        assert_eq!(encoded(&Term::Int(i64::MIN))[1], tags::SMALL_BIG_EXT);

        for value in [
            0,
            255,
            256,
            -1,
            i32::MIN as i64,
            i32::MAX as i64 + 1,
            i64::MAX,
            i64::MIN,
        ] {
            assert_eq!(roundtrip(&Term::Int(value)), Term::Int(value), "{value}");
        }
    }

    #[test]
    fn atom_forms_are_equivalent_on_input() {
        // ATOM_EXT (latin1) and SMALL_ATOM_UTF8 of the same name.
        let mut latin = EtfBuffer::from_vec(vec![131, 100, 0, 2, b'o', b'k']);
        let mut utf8 = EtfBuffer::from_vec(vec![131, 119, 2, b'o', b'k']);
        assert_eq!(decode(&mut latin).unwrap(), Term::atom("ok"));
        assert_eq!(decode(&mut utf8).unwrap(), Term::atom("ok"));

        // Canonical re-encode is SMALL_ATOM_UTF8.
        assert_eq!(encoded(&Term::atom("ok"))[1], tags::SMALL_ATOM_UTF8_EXT);
    }

    #[test]
    fn latin1_atoms_map_to_chars() {
        let mut buf = EtfBuffer::from_vec(vec![131, 115, 1, 0xe9]);
        assert_eq!(decode(&mut buf).unwrap(), Term::atom("é"));
    }

    #[test]
    fn oversize_atom_is_an_encode_error() {
        let name = "x".repeat(256);
        let mut buf = EtfBuffer::versioned();
        assert_eq!(
            encode(&Term::atom(name), &mut buf),
            Err(EncodeError::AtomTooLong(256))
        );
    }

    #[test]
    fn float_forms_are_equivalent_on_input() {
        let mut new_form = EtfBuffer::versioned();
        emit_f64(2.5, &mut new_form);

        let mut old_form = EtfBuffer::versioned();
        old_form.append_byte(tags::FLOAT_EXT);
        let mut text = format!("{:.20e}", 2.5).into_bytes();
        text.resize(31, 0);
        old_form.append_bytes(&text);

        assert_eq!(decode(&mut new_form).unwrap(), Term::Float(2.5));
        assert_eq!(decode(&mut old_form).unwrap(), Term::Float(2.5));
    }

    #[test]
    fn charlist_compact_and_wide_forms() {
        assert_eq!(encoded(&Term::String("hej".into()))[1], tags::STRING_EXT);
        assert_eq!(
            roundtrip(&Term::String("hej".into())),
            Term::String("hej".into())
        );

        // Code points beyond 255 fall back to a list of ints.
        let wide = Term::String("héj→".into());
        let bytes = encoded(&wide);
        assert_eq!(bytes[1], tags::LIST_EXT);
        assert_eq!(
            roundtrip(&wide),
            Term::list(vec![
                Term::Int('h' as i64),
                Term::Int('é' as i64),
                Term::Int('j' as i64),
                Term::Int('→' as i64),
            ])
        );
    }

    #[test]
    fn list_requires_nil_tail() {
        let bytes = vec![131, 108, 0, 0, 0, 1, 97, 1, 97, 2];
        let mut buf = EtfBuffer::from_vec(bytes);
        assert_eq!(decode(&mut buf), Err(DecodeError::MissingListEnd));
    }

    #[test]
    fn unknown_tag_is_reported() {
        let mut buf = EtfBuffer::from_vec(vec![131, 200]);
        assert_eq!(decode(&mut buf), Err(DecodeError::UnknownTag(200)));
    }

    #[test]
    fn bitstring_round_trip_and_offset_rejection() {
        let term = Term::Bitstring(vec![0b1010_0000], 3);
        assert_eq!(roundtrip(&term), term);

        let mut offset = EtfBuffer::from_vec(vec![131, 77, 0, 0, 0, 1, 9, 0xff]);
        assert_eq!(decode(&mut offset), Err(DecodeError::UnsupportedBitOffset(9)));

        let mut zero_bits = EtfBuffer::from_vec(vec![131, 77, 0, 0, 0, 1, 0, 0xff]);
        assert_eq!(decode(&mut zero_bits), Err(DecodeError::BadTerm));

        let mut buf = EtfBuffer::new();
        assert_eq!(
            encode(&Term::Bitstring(vec![1], 9), &mut buf),
            Err(EncodeError::InvalidBitstring(9))
        );
    }

    #[test]
    fn pid_forms_are_equivalent_on_input() {
        let pid = Pid {
            node: "n@h".into(),
            num: 11,
            serial: 3,
            creation: 2,
        };
        assert_eq!(roundtrip(&Term::Pid(pid.clone())), Term::Pid(pid.clone()));

        // Legacy PID_EXT with one-byte creation.
        let mut legacy = EtfBuffer::versioned();
        legacy.append_byte(tags::PID_EXT);
        emit_atom("n@h", &mut legacy).unwrap();
        legacy.append_u32(11);
        legacy.append_u32(3);
        legacy.append_byte(2);
        assert_eq!(decode(&mut legacy).unwrap(), Term::Pid(pid));
    }

    #[test]
    fn reference_forms_are_equivalent_on_input() {
        let reference = Reference {
            node: "n@h".into(),
            creation: 1,
            ids: vec![42, 43, 44],
        };
        assert_eq!(
            roundtrip(&Term::Reference(reference.clone())),
            Term::Reference(reference.clone())
        );

        // NEW_REFERENCE_EXT with one-byte creation.
        let mut legacy = EtfBuffer::versioned();
        legacy.append_byte(tags::NEW_REFERENCE_EXT);
        legacy.append_u16(3);
        emit_atom("n@h", &mut legacy).unwrap();
        legacy.append_byte(1);
        for id in [42, 43, 44] {
            legacy.append_u32(id);
        }
        assert_eq!(decode(&mut legacy).unwrap(), Term::Reference(reference));
    }

    #[test]
    fn export_fun_round_trips() {
        let fun = Term::Fun(Fun::Export {
            module: "lists".into(),
            function: "map".into(),
            arity: 2,
        });
        assert_eq!(roundtrip(&fun), fun);
    }

    #[test]
    fn closure_fun_round_trips_with_size_backpatch() {
        let pid = Pid {
            node: "n@h".into(),
            num: 1,
            serial: 0,
            creation: 4,
        };
        let fun = Term::Fun(Fun::Closure(Box::new(Closure {
            arity: 1,
            uniq: [7; 16],
            index: 3,
            module: "Elixir.Demo".into(),
            old_index: 3,
            old_uniq: 981_112,
            pid,
            free: vec![Term::Int(10), Term::atom("x")],
        })));
        assert_eq!(roundtrip(&fun), fun);

        // skip_term must agree with the back-patched size.
        let mut buf = EtfBuffer::from_vec(encoded(&fun));
        buf.consume_version();
        buf.skip_term().unwrap();
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn map_preserves_wire_order() {
        let term = Term::map(vec![
            (Term::atom("z"), Term::Int(1)),
            (Term::atom("a"), Term::Int(2)),
        ]);
        let bytes = encoded(&term);
        assert_eq!(roundtrip(&term), term);
        // Byte-for-byte stable re-encode.
        let mut buf = EtfBuffer::from_vec(bytes.clone());
        let decoded = decode(&mut buf).unwrap();
        assert_eq!(encoded(&decoded), bytes);
    }

    #[test]
    fn u64_beyond_i64_is_big_on_wire() {
        let mut buf = EtfBuffer::new();
        emit_u64(u64::MAX, &mut buf);
        assert_eq!(buf.as_slice()[0], tags::SMALL_BIG_EXT);
        let mut read = EtfBuffer::from_vec(buf.into_vec());
        assert_eq!(decode_int_parts(&mut read).unwrap(), (false, u64::MAX));
    }
}
