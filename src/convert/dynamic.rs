//! The untyped converter: any msgpack value into a primitive-dominated
//! object graph.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::string::String;
use std::sync::Arc;
use std::vec::Vec;

use crate::error::{DecodeError, WriteError};
use crate::format;
use crate::reader::{PackReader, ReadResult};
use crate::shape::{Shape, Shaped};
use crate::timestamp::Timestamp;
use crate::writer::PackWriter;

use super::{Context, Converter};

/// A dynamically-typed msgpack value.
///
/// Integers keep their wire sign: non-negative values become `UInt`,
/// negative ones `Int`. `F32` is preserved separately from `F64` so a
/// float32 token round-trips bit-exactly.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    UInt(u64),
    F32(f32),
    F64(f64),
    Str(String),
    Bin(Vec<u8>),
    Array(Vec<Value>),
    Map(ValueMap),
    Ext(i8, Vec<u8>),
    Timestamp(Timestamp),
}

/// A map key. Nil keys are rejected at decode time; float and composite
/// keys are not representable.
#[derive(Clone, Debug)]
pub enum Key {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Str(String),
    Bin(Vec<u8>),
}

// Msgpack does not preserve the signed/unsigned distinction for
// non-negative integers, so `Int(1)` and `UInt(1)` must land in the same
// map slot: both hash and equality normalize non-negative `Int`s to the
// unsigned representation.
impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Key::Bool(a), Key::Bool(b)) => a == b,
            (Key::Str(a), Key::Str(b)) => a == b,
            (Key::Bin(a), Key::Bin(b)) => a == b,
            (Key::Int(a), Key::Int(b)) => a == b,
            (Key::UInt(a), Key::UInt(b)) => a == b,
            (Key::Int(a), Key::UInt(b)) | (Key::UInt(b), Key::Int(a)) => {
                *a >= 0 && *a as u64 == *b
            }
            _ => false,
        }
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Key::Bool(value) => {
                state.write_u8(0);
                value.hash(state);
            }
            Key::Int(value) if *value >= 0 => {
                state.write_u8(1);
                (*value as u64).hash(state);
            }
            Key::UInt(value) => {
                state.write_u8(1);
                value.hash(state);
            }
            Key::Int(value) => {
                state.write_u8(2);
                value.hash(state);
            }
            Key::Str(value) => {
                state.write_u8(3);
                value.hash(state);
            }
            Key::Bin(value) => {
                state.write_u8(4);
                value.hash(state);
            }
        }
    }
}

/// A decoded msgpack map with normalized integer keys.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValueMap {
    entries: HashMap<Key, Value>,
}

impl ValueMap {
    pub fn new() -> Self {
        ValueMap::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, key: Key, value: Value) -> Option<Value> {
        self.entries.insert(key, value)
    }

    pub fn get(&self, key: &Key) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Lookup by signed integer; finds unsigned-encoded keys of the same
    /// value.
    pub fn get_int(&self, key: i64) -> Option<&Value> {
        self.entries.get(&Key::Int(key))
    }

    pub fn get_uint(&self, key: u64) -> Option<&Value> {
        self.entries.get(&Key::UInt(key))
    }

    pub fn get_str(&self, key: &str) -> Option<&Value> {
        self.entries.get(&Key::Str(String::from(key)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Value)> {
        self.entries.iter()
    }
}

struct DynamicConverter;

impl DynamicConverter {
    fn read_key(&self, reader: &mut PackReader<'_>, ctx: &mut Context) -> Result<Key, DecodeError> {
        let code = reader.peek_code()?;
        if code.0 == format::NIL {
            return Err(DecodeError::NullKey);
        }
        match self.read_value(reader, ctx)? {
            Value::Bool(value) => Ok(Key::Bool(value)),
            Value::Int(value) => Ok(Key::Int(value)),
            Value::UInt(value) => Ok(Key::UInt(value)),
            Value::Str(value) => Ok(Key::Str(value)),
            Value::Bin(value) => Ok(Key::Bin(value)),
            _ => Err(DecodeError::TokenMismatch { code, expected: "a hashable map key" }),
        }
    }

    fn read_value(
        &self,
        reader: &mut PackReader<'_>,
        ctx: &mut Context,
    ) -> Result<Value, DecodeError> {
        let code = reader.peek_code()?;
        if code.0 == format::NIL {
            reader.read_nil()?;
            return Ok(Value::Nil);
        }
        if code.0 == format::TRUE || code.0 == format::FALSE {
            return reader.read_bool().map(Value::Bool);
        }
        if code.is_int_family() {
            return match reader.streaming().try_read_raw_int() {
                ReadResult::Success(crate::reader::RawInt::Pos(value)) => Ok(Value::UInt(value)),
                ReadResult::Success(crate::reader::RawInt::Neg(value)) => {
                    if value >= 0 {
                        Ok(Value::UInt(value as u64))
                    } else {
                        Ok(Value::Int(value))
                    }
                }
                _ => Err(DecodeError::EndOfStream),
            };
        }
        if code.0 == format::FLOAT32 {
            return reader.read_f32().map(Value::F32);
        }
        if code.0 == format::FLOAT64 {
            return reader.read_f64().map(Value::F64);
        }
        if code.is_str_family() {
            return reader.read_string().map(Value::Str);
        }
        if code.is_bin_family() {
            return reader.read_bin().map(|slice| Value::Bin(slice.to_vec()));
        }
        if code.is_array_family() {
            ctx.descend()?;
            let count = reader.read_array_header()?;
            let mut items = Vec::with_capacity(count as usize);
            for _ in 0..count {
                ctx.check_cancelled()?;
                items.push(self.read_value(reader, ctx)?);
            }
            ctx.ascend();
            return Ok(Value::Array(items));
        }
        if code.is_map_family() {
            ctx.descend()?;
            let count = reader.read_map_header()?;
            let mut map = ValueMap::new();
            for _ in 0..count {
                ctx.check_cancelled()?;
                let key = self.read_key(reader, ctx)?;
                let value = self.read_value(reader, ctx)?;
                map.insert(key, value);
            }
            ctx.ascend();
            return Ok(Value::Map(map));
        }
        if code.is_ext_family() {
            let header = reader.read_ext_header()?;
            let payload = reader.read_raw(header.len as usize)?;
            if header.type_code == format::EXT_TIMESTAMP {
                let mut raw = [0u8; 12];
                if payload.len() > 12 {
                    return Err(DecodeError::InvalidExt {
                        type_code: header.type_code,
                        len: header.len,
                    });
                }
                payload.copy_to(&mut raw[..payload.len()]);
                return Timestamp::decode_payload(&raw[..payload.len()]).map(Value::Timestamp);
            }
            return Ok(Value::Ext(header.type_code, payload.to_vec()));
        }
        Err(DecodeError::TokenMismatch { code, expected: "any value" })
    }

    fn write_key(&self, writer: &mut PackWriter<'_>, key: &Key) {
        match key {
            Key::Bool(value) => writer.write_bool(*value),
            Key::Int(value) => writer.write_i64(*value),
            Key::UInt(value) => writer.write_u64(*value),
            Key::Str(value) => writer.write_str(value),
            Key::Bin(value) => writer.write_bin(value),
        }
    }

    fn write_value(
        &self,
        writer: &mut PackWriter<'_>,
        value: &Value,
        ctx: &mut Context,
    ) -> Result<(), WriteError> {
        match value {
            Value::Nil => writer.write_nil(),
            Value::Bool(value) => writer.write_bool(*value),
            Value::Int(value) => writer.write_i64(*value),
            Value::UInt(value) => writer.write_u64(*value),
            Value::F32(value) => writer.write_f32(*value),
            Value::F64(value) => writer.write_f64(*value),
            Value::Str(value) => writer.write_str(value),
            Value::Bin(value) => writer.write_bin(value),
            Value::Array(items) => {
                ctx.descend_write()?;
                writer.write_array_header(items.len() as u32);
                for item in items {
                    ctx.check_cancelled_write()?;
                    self.write_value(writer, item, ctx)?;
                }
                ctx.ascend();
            }
            Value::Map(map) => {
                ctx.descend_write()?;
                writer.write_map_header(map.len() as u32);
                for (key, value) in map.iter() {
                    ctx.check_cancelled_write()?;
                    self.write_key(writer, key);
                    self.write_value(writer, value, ctx)?;
                }
                ctx.ascend();
            }
            Value::Ext(type_code, payload) => {
                writer.write_ext_header(*type_code, payload.len() as u32);
                writer.write_raw(payload);
            }
            Value::Timestamp(value) => writer.write_timestamp(*value),
        }
        Ok(())
    }
}

impl Converter<Value> for DynamicConverter {
    fn read(&self, reader: &mut PackReader<'_>, ctx: &mut Context) -> Result<Value, DecodeError> {
        self.read_value(reader, ctx)
    }

    fn write(
        &self,
        writer: &mut PackWriter<'_>,
        value: &Value,
        ctx: &mut Context,
    ) -> Result<(), WriteError> {
        self.write_value(writer, value, ctx)
    }
}

impl Shaped for Value {
    fn shape() -> Shape<Self> {
        Shape::Leaf(Arc::new(DynamicConverter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::Registry;

    fn setup() -> (Arc<dyn Converter<Value>>, Context) {
        let registry = Arc::new(Registry::new());
        (registry.get::<Value>(), Context::new(registry))
    }

    fn decode(bytes: &[u8]) -> Value {
        let (converter, mut ctx) = setup();
        let mut reader = PackReader::new(bytes);
        converter.read(&mut reader, &mut ctx).unwrap()
    }

    fn roundtrip(value: Value) {
        let (converter, mut ctx) = setup();
        let mut bytes = Vec::new();
        {
            let mut writer = PackWriter::new(&mut bytes);
            converter.write(&mut writer, &value, &mut ctx).unwrap();
        }
        let mut reader = PackReader::new(&bytes[..]);
        assert_eq!(converter.read(&mut reader, &mut ctx).unwrap(), value);
    }

    #[test]
    fn unsigned_key_found_by_signed_lookup() {
        // {uint64 1: 42}, written deliberately wide.
        let bytes = [0x81u8, 0xcf, 0, 0, 0, 0, 0, 0, 0, 1, 0x2a];
        match decode(&bytes) {
            Value::Map(map) => {
                assert_eq!(map.get_int(1), Some(&Value::UInt(42)));
                assert_eq!(map.get_uint(1), Some(&Value::UInt(42)));
            }
            other => panic!("expected a map, got {:?}", other),
        }
    }

    #[test]
    fn float32_is_preserved() {
        let bytes = [0xcau8, 0x3f, 0xc0, 0x00, 0x00];
        assert_eq!(decode(&bytes), Value::F32(1.5));
        roundtrip(Value::F32(1.5));
        roundtrip(Value::F64(1.5));
    }

    #[test]
    fn negative_and_positive_ints_split_by_sign() {
        assert_eq!(decode(&[0x2a]), Value::UInt(42));
        assert_eq!(decode(&[0xd0, 0xdf]), Value::Int(-33));
        // A non-negative value in a signed encoding is still unsigned.
        assert_eq!(decode(&[0xd0, 0x05]), Value::UInt(5));
    }

    #[test]
    fn nested_graph_roundtrips() {
        let mut map = ValueMap::new();
        map.insert(Key::Str("list".into()), Value::Array(alloc::vec![
            Value::Nil,
            Value::Bool(true),
            Value::UInt(7),
        ]));
        map.insert(Key::Int(-1), Value::Str("neg".into()));
        roundtrip(Value::Map(map));
    }

    #[test]
    fn nil_key_is_fatal() {
        let bytes = [0x81u8, 0xc0, 0x01];
        let (converter, mut ctx) = setup();
        let mut reader = PackReader::new(&bytes[..]);
        assert!(matches!(
            converter.read(&mut reader, &mut ctx),
            Err(DecodeError::NullKey)
        ));
    }

    #[test]
    fn ext_and_timestamp() {
        roundtrip(Value::Ext(7, alloc::vec![1, 2, 3]));
        roundtrip(Value::Timestamp(Timestamp::from_secs(99)));
    }

    #[test]
    fn depth_guard_on_nesting() {
        let (converter, _) = setup();
        let registry = Arc::new(Registry::new());
        let mut ctx = Context::new(registry).with_max_depth(2);
        // [[[1]]]
        let bytes = [0x91u8, 0x91, 0x91, 0x01];
        let mut reader = PackReader::new(&bytes[..]);
        assert!(matches!(
            converter.read(&mut reader, &mut ctx),
            Err(DecodeError::DepthExceeded { .. })
        ));
    }
}
