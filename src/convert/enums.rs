//! Enum-as-string conversion.

use std::any::type_name;
use std::boxed::Box;
use std::collections::HashMap;
use std::string::String;
use std::sync::Arc;
use std::vec::Vec;

use crate::error::{DecodeError, WriteError};
use crate::reader::PackReader;
use crate::shape::EnumShape;
use crate::writer::PackWriter;

use super::{Context, Converter};

pub(crate) fn build<T: Send + Sync + 'static>(shape: EnumShape<T>) -> Arc<dyn Converter<T>> {
    let EnumShape { to_raw, from_raw, members } = shape;
    // Names fold to a case-insensitive table unless folding collides, in
    // which case lookups stay case-sensitive.
    let mut insensitive = HashMap::new();
    let mut collided = false;
    for (i, (name, _)) in members.iter().enumerate() {
        if insensitive.insert(name.to_ascii_lowercase(), i).is_some() {
            collided = true;
            break;
        }
    }
    let insensitive = if collided { None } else { Some(insensitive) };
    let sensitive: HashMap<&'static str, usize> =
        members.iter().enumerate().map(|(i, (name, _))| (*name, i)).collect();
    let by_value: HashMap<i64, usize> =
        members.iter().enumerate().map(|(i, (_, value))| (*value, i)).collect();
    let encoded: Vec<Box<[u8]>> = members
        .iter()
        .map(|(name, _)| {
            let mut bytes = Vec::new();
            {
                let mut writer = PackWriter::new(&mut bytes);
                writer.write_str(name);
            }
            bytes.into_boxed_slice()
        })
        .collect();
    Arc::new(EnumConverter { to_raw, from_raw, members, insensitive, sensitive, by_value, encoded })
}

struct EnumConverter<T: 'static> {
    to_raw: fn(&T) -> i64,
    from_raw: fn(i64) -> Option<T>,
    members: Vec<(&'static str, i64)>,
    /// Folded name → member, absent when folding would collide.
    insensitive: Option<HashMap<String, usize>>,
    sensitive: HashMap<&'static str, usize>,
    by_value: HashMap<i64, usize>,
    /// Pre-encoded msgpack name per member.
    encoded: Vec<Box<[u8]>>,
}

impl<T: Send + Sync + 'static> EnumConverter<T> {
    fn member_by_name(&self, name: &str) -> Option<usize> {
        match &self.insensitive {
            Some(table) => table.get(&name.to_ascii_lowercase()).copied(),
            None => self.sensitive.get(name).copied(),
        }
    }
}

impl<T: Send + Sync + 'static> Converter<T> for EnumConverter<T> {
    fn read(&self, reader: &mut PackReader<'_>, _ctx: &mut Context) -> Result<T, DecodeError> {
        let code = reader.peek_code()?;
        let raw = if code.is_str_family() {
            let name = reader.read_string()?;
            match self.member_by_name(&name) {
                Some(i) => self.members[i].1,
                None => return Err(DecodeError::OutOfRange { code, target: type_name::<T>() }),
            }
        } else {
            reader.read_i64()?
        };
        (self.from_raw)(raw).ok_or(DecodeError::OutOfRange { code, target: type_name::<T>() })
    }

    fn write(
        &self,
        writer: &mut PackWriter<'_>,
        value: &T,
        _ctx: &mut Context,
    ) -> Result<(), WriteError> {
        let raw = (self.to_raw)(value);
        match self.by_value.get(&raw) {
            Some(&i) => writer.write_raw(&self.encoded[i]),
            None => writer.write_i64(raw),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::Registry;
    use crate::shape::{Shape, Shaped};

    #[derive(Clone, Copy, Debug, PartialEq)]
    enum Color {
        Red,
        Green,
        Blue,
    }

    impl Shaped for Color {
        fn shape() -> Shape<Self> {
            Shape::Enum(
                EnumShape::new(
                    |c: &Color| *c as i64,
                    |raw| match raw {
                        0 => Some(Color::Red),
                        1 => Some(Color::Green),
                        2 => Some(Color::Blue),
                        _ => None,
                    },
                )
                .member("Red", 0)
                .member("Green", 1)
                .member("Blue", 2),
            )
        }
    }

    fn converter() -> (Arc<dyn Converter<Color>>, Context) {
        let registry = Arc::new(Registry::new());
        (registry.get::<Color>(), Context::new(registry))
    }

    #[test]
    fn writes_name_reads_back() {
        let (converter, mut ctx) = converter();
        let mut bytes = Vec::new();
        {
            let mut writer = PackWriter::new(&mut bytes);
            converter.write(&mut writer, &Color::Green, &mut ctx).unwrap();
        }
        assert_eq!(bytes, [0xa5, b'G', b'r', b'e', b'e', b'n']);
        let mut reader = PackReader::new(&bytes[..]);
        assert_eq!(converter.read(&mut reader, &mut ctx).unwrap(), Color::Green);
    }

    #[test]
    fn name_lookup_is_case_insensitive() {
        let (converter, mut ctx) = converter();
        let bytes = [0xa4, b'b', b'l', b'u', b'e'];
        let mut reader = PackReader::new(&bytes[..]);
        assert_eq!(converter.read(&mut reader, &mut ctx).unwrap(), Color::Blue);
    }

    #[test]
    fn integer_fallback_on_read() {
        let (converter, mut ctx) = converter();
        let bytes = [0x02];
        let mut reader = PackReader::new(&bytes[..]);
        assert_eq!(converter.read(&mut reader, &mut ctx).unwrap(), Color::Blue);
    }

    #[test]
    fn unknown_name_fails() {
        let (converter, mut ctx) = converter();
        let bytes = [0xa4, b'p', b'i', b'n', b'k'];
        let mut reader = PackReader::new(&bytes[..]);
        assert!(matches!(
            converter.read(&mut reader, &mut ctx),
            Err(DecodeError::OutOfRange { .. })
        ));
    }

    #[test]
    fn unknown_integer_fails() {
        let (converter, mut ctx) = converter();
        let bytes = [0x63];
        let mut reader = PackReader::new(&bytes[..]);
        assert!(matches!(
            converter.read(&mut reader, &mut ctx),
            Err(DecodeError::OutOfRange { .. })
        ));
    }

    #[allow(non_camel_case_types)]
    #[derive(Clone, Copy, Debug, PartialEq)]
    enum Cased {
        Value,
        VALUE,
    }

    impl Shaped for Cased {
        fn shape() -> Shape<Self> {
            Shape::Enum(
                EnumShape::new(
                    |c: &Cased| *c as i64,
                    |raw| match raw {
                        0 => Some(Cased::Value),
                        1 => Some(Cased::VALUE),
                        _ => None,
                    },
                )
                .member("Value", 0)
                .member("VALUE", 1),
            )
        }
    }

    #[test]
    fn colliding_names_fall_back_to_case_sensitive() {
        let registry = Arc::new(Registry::new());
        let converter = registry.get::<Cased>();
        let mut ctx = Context::new(registry);
        let bytes = [0xa5, b'V', b'A', b'L', b'U', b'E'];
        let mut reader = PackReader::new(&bytes[..]);
        assert_eq!(converter.read(&mut reader, &mut ctx).unwrap(), Cased::VALUE);
        // A casing matching neither member exactly no longer resolves.
        let bytes = [0xa5, b'v', b'a', b'l', b'u', b'e'];
        let mut reader = PackReader::new(&bytes[..]);
        assert!(converter.read(&mut reader, &mut ctx).is_err());
    }
}
