//! Converters for primitives and the standard collections' shapes.

use std::boxed::Box;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::string::String;
use std::sync::Arc;
use std::vec::Vec;

use crate::error::{DecodeError, WriteError};
use crate::reader::PackReader;
use crate::shape::{DictionaryShape, EnumerableShape, OptionalShape, Shape, Shaped};
use crate::timestamp::Timestamp;
use crate::writer::PackWriter;

use super::{Context, Converter};

macro_rules! leaf_converter {
    ($($name:ident, $ty:ty, $read:ident, $write:ident);+ $(;)?) => {$(
        struct $name;

        impl Converter<$ty> for $name {
            fn read(&self, reader: &mut PackReader<'_>, _ctx: &mut Context) -> Result<$ty, DecodeError> {
                reader.$read()
            }

            fn write(
                &self,
                writer: &mut PackWriter<'_>,
                value: &$ty,
                _ctx: &mut Context,
            ) -> Result<(), WriteError> {
                writer.$write(*value);
                Ok(())
            }
        }

        impl Shaped for $ty {
            fn shape() -> Shape<Self> {
                Shape::Leaf(Arc::new($name))
            }
        }
    )+};
}

leaf_converter! {
    BoolConverter, bool, read_bool, write_bool;
    U8Converter, u8, read_u8, write_u8;
    U16Converter, u16, read_u16, write_u16;
    U32Converter, u32, read_u32, write_u32;
    U64Converter, u64, read_u64, write_u64;
    I8Converter, i8, read_i8, write_i8;
    I16Converter, i16, read_i16, write_i16;
    I32Converter, i32, read_i32, write_i32;
    I64Converter, i64, read_i64, write_i64;
    F32Converter, f32, read_f32, write_f32;
    F64Converter, f64, read_f64, write_f64;
    TimestampConverter, Timestamp, read_timestamp, write_timestamp;
}

struct UnitConverter;

impl Converter<()> for UnitConverter {
    fn read(&self, reader: &mut PackReader<'_>, _ctx: &mut Context) -> Result<(), DecodeError> {
        reader.read_nil()
    }

    fn write(
        &self,
        writer: &mut PackWriter<'_>,
        _value: &(),
        _ctx: &mut Context,
    ) -> Result<(), WriteError> {
        writer.write_nil();
        Ok(())
    }
}

impl Shaped for () {
    fn shape() -> Shape<Self> {
        Shape::Leaf(Arc::new(UnitConverter))
    }
}

struct StringConverter;

impl Converter<String> for StringConverter {
    fn read(&self, reader: &mut PackReader<'_>, _ctx: &mut Context) -> Result<String, DecodeError> {
        reader.read_string()
    }

    fn write(
        &self,
        writer: &mut PackWriter<'_>,
        value: &String,
        _ctx: &mut Context,
    ) -> Result<(), WriteError> {
        writer.write_str(value);
        Ok(())
    }
}

impl Shaped for String {
    fn shape() -> Shape<Self> {
        Shape::Leaf(Arc::new(StringConverter))
    }
}

struct CharConverter;

impl Converter<char> for CharConverter {
    fn read(&self, reader: &mut PackReader<'_>, _ctx: &mut Context) -> Result<char, DecodeError> {
        let text = reader.read_string()?;
        let mut chars = text.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(c),
            _ => Err(DecodeError::InvalidUtf8),
        }
    }

    fn write(
        &self,
        writer: &mut PackWriter<'_>,
        value: &char,
        _ctx: &mut Context,
    ) -> Result<(), WriteError> {
        let mut buf = [0u8; 4];
        writer.write_str(value.encode_utf8(&mut buf));
        Ok(())
    }
}

impl Shaped for char {
    fn shape() -> Shape<Self> {
        Shape::Leaf(Arc::new(CharConverter))
    }
}

/// Opaque bytes, written as a msgpack `bin` token.
///
/// `Vec<u8>` itself is an enumerable and encodes as an array of integers;
/// wrap it in `Binary` for the length-prefixed binary form.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Binary(pub Vec<u8>);

impl From<Vec<u8>> for Binary {
    fn from(bytes: Vec<u8>) -> Self {
        Binary(bytes)
    }
}

struct BinaryConverter;

impl Converter<Binary> for BinaryConverter {
    fn read(&self, reader: &mut PackReader<'_>, _ctx: &mut Context) -> Result<Binary, DecodeError> {
        reader.read_bin().map(|slice| Binary(slice.to_vec()))
    }

    fn write(
        &self,
        writer: &mut PackWriter<'_>,
        value: &Binary,
        _ctx: &mut Context,
    ) -> Result<(), WriteError> {
        writer.write_bin(&value.0);
        Ok(())
    }
}

impl Shaped for Binary {
    fn shape() -> Shape<Self> {
        Shape::Leaf(Arc::new(BinaryConverter))
    }
}

/// Nil ⇄ `None`; anything else is read through the inner converter.
pub(crate) struct OptionConverter<P: 'static> {
    inner: Arc<dyn Converter<P>>,
}

impl<P: 'static> OptionConverter<P> {
    pub(crate) fn new(inner: Arc<dyn Converter<P>>) -> Self {
        OptionConverter { inner }
    }
}

impl<P: Send + Sync + 'static> Converter<Option<P>> for OptionConverter<P> {
    fn read(
        &self,
        reader: &mut PackReader<'_>,
        ctx: &mut Context,
    ) -> Result<Option<P>, DecodeError> {
        if reader.read_nil_opt()? {
            Ok(None)
        } else {
            self.inner.read(reader, ctx).map(Some)
        }
    }

    fn write(
        &self,
        writer: &mut PackWriter<'_>,
        value: &Option<P>,
        ctx: &mut Context,
    ) -> Result<(), WriteError> {
        match value {
            None => {
                writer.write_nil();
                Ok(())
            }
            Some(inner) => self.inner.write(writer, inner, ctx),
        }
    }

    fn prefers_async(&self) -> bool {
        self.inner.prefers_async()
    }
}

impl<P: Shaped> Shaped for Option<P> {
    fn shape() -> Shape<Self> {
        Shape::Optional(OptionalShape::of())
    }
}

impl<P: Shaped> Shaped for Vec<P> {
    fn shape() -> Shape<Self> {
        Shape::Enumerable(EnumerableShape::of_vec())
    }
}

fn iter_deque<P>(deque: &VecDeque<P>) -> Box<dyn Iterator<Item = &P> + '_> {
    Box::new(deque.iter())
}

impl<P: Shaped> Shaped for VecDeque<P> {
    fn shape() -> Shape<Self> {
        Shape::Enumerable(EnumerableShape::with_initializer(
            iter_deque::<P>,
            Some(VecDeque::<P>::len),
            |elements| elements.into_iter().collect(),
        ))
    }
}

fn iter_hash_set<P>(set: &HashSet<P>) -> Box<dyn Iterator<Item = &P> + '_> {
    Box::new(set.iter())
}

impl<P: Shaped + Eq + Hash> Shaped for HashSet<P> {
    fn shape() -> Shape<Self> {
        Shape::Enumerable(EnumerableShape::with_initializer(
            iter_hash_set::<P>,
            Some(HashSet::<P>::len),
            |elements| elements.into_iter().collect(),
        ))
    }
}

fn iter_btree_set<P>(set: &BTreeSet<P>) -> Box<dyn Iterator<Item = &P> + '_> {
    Box::new(set.iter())
}

impl<P: Shaped + Ord> Shaped for BTreeSet<P> {
    fn shape() -> Shape<Self> {
        Shape::Enumerable(EnumerableShape::with_initializer(
            iter_btree_set::<P>,
            Some(BTreeSet::<P>::len),
            |elements| elements.into_iter().collect(),
        ))
    }
}

fn iter_hash_map<K, V>(map: &HashMap<K, V>) -> Box<dyn Iterator<Item = (&K, &V)> + '_> {
    Box::new(map.iter())
}

impl<K: Shaped + Eq + Hash, V: Shaped> Shaped for HashMap<K, V> {
    fn shape() -> Shape<Self> {
        Shape::Dictionary(DictionaryShape::with_initializer(
            iter_hash_map::<K, V>,
            HashMap::<K, V>::len,
            |pairs| pairs.into_iter().collect(),
        ))
    }
}

fn iter_btree_map<K, V>(map: &BTreeMap<K, V>) -> Box<dyn Iterator<Item = (&K, &V)> + '_> {
    Box::new(map.iter())
}

impl<K: Shaped + Ord, V: Shaped> Shaped for BTreeMap<K, V> {
    fn shape() -> Shape<Self> {
        Shape::Dictionary(DictionaryShape::with_initializer(
            iter_btree_map::<K, V>,
            BTreeMap::<K, V>::len,
            |pairs| pairs.into_iter().collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::Registry;

    fn roundtrip<T: Shaped + PartialEq + core::fmt::Debug>(value: T) {
        let registry = Arc::new(Registry::new());
        let converter = registry.get::<T>();
        let mut ctx = Context::new(registry);
        let mut bytes = Vec::new();
        {
            let mut writer = PackWriter::new(&mut bytes);
            converter.write(&mut writer, &value, &mut ctx).unwrap();
        }
        let mut reader = PackReader::new(&bytes[..]);
        let back = converter.read(&mut reader, &mut ctx).unwrap();
        assert_eq!(back, value);
        assert_eq!(reader.remaining(), 0, "trailing bytes after {:?}", back);
    }

    #[test]
    fn primitive_roundtrips() {
        roundtrip(true);
        roundtrip(0u8);
        roundtrip(1234u16);
        roundtrip(u64::MAX);
        roundtrip(-1234i16);
        roundtrip(i64::MIN);
        roundtrip(1.5f32);
        roundtrip(-2.75f64);
        roundtrip(String::from("héllo"));
        roundtrip(String::from("日本語"));
        roundtrip('x');
        roundtrip(());
        roundtrip(Timestamp::new(77, 88).unwrap());
        roundtrip(Binary(alloc::vec![1, 2, 3]));
    }

    #[test]
    fn option_roundtrips() {
        roundtrip(Option::<u32>::None);
        roundtrip(Some(42u32));
        roundtrip(Some(String::from("inner")));
    }

    #[test]
    fn collection_roundtrips() {
        roundtrip(alloc::vec![1u32, 2, 3]);
        roundtrip(Vec::<String>::new());
        let mut map = HashMap::new();
        map.insert(String::from("a"), 1u32);
        map.insert(String::from("b"), 2u32);
        roundtrip(map);
        let mut map = BTreeMap::new();
        map.insert(1u8, String::from("one"));
        roundtrip(map);
        let deque: VecDeque<u8> = [1, 2, 3].into_iter().collect();
        roundtrip(deque);
        let set: BTreeSet<i32> = [-1, 0, 5].into_iter().collect();
        roundtrip(set);
    }

    #[test]
    fn none_is_nil_byte() {
        let registry = Arc::new(Registry::new());
        let converter = registry.get::<Option<u8>>();
        let mut ctx = Context::new(registry);
        let mut bytes = Vec::new();
        {
            let mut writer = PackWriter::new(&mut bytes);
            converter.write(&mut writer, &None, &mut ctx).unwrap();
        }
        assert_eq!(bytes, [0xc0]);
    }
}
