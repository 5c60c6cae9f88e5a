//! Union (polymorphic) conversion.
//!
//! Alias-tagged cases are written as a two-element array `[alias, value]`
//! where the alias is a small integer or a string. Structural cases are
//! written bare; on read they are recognized by probing the upcoming map's
//! key set against each case's declared signature.

use std::collections::HashMap;
use std::sync::Arc;
use std::vec::Vec;

use crate::error::{DecodeError, WriteError};
use crate::reader::{PackReader, ReadResult};
use crate::shape::{BoundCase, CaseAlias, UnionShape};
use crate::writer::PackWriter;

use super::{Context, Converter};

pub(crate) fn build<T: Send + Sync + 'static>(
    shape: UnionShape<T>,
    registry: &super::Registry,
) -> Arc<dyn Converter<T>> {
    let mut cases = Vec::new();
    let mut by_int = HashMap::new();
    let mut by_str = HashMap::new();
    for case_shape in shape.cases {
        let index = cases.len();
        match case_shape.alias {
            Some(CaseAlias::Int(alias)) => {
                by_int.insert(alias, index);
            }
            Some(CaseAlias::Str(alias)) => {
                by_str.insert(alias, index);
            }
            None => {}
        }
        cases.push(BoundUnionCase {
            alias: case_shape.alias,
            key_signature: case_shape.key_signature,
            case: case_shape.def.bind(registry),
        });
    }
    Arc::new(UnionConverter { cases, by_int, by_str })
}

struct BoundUnionCase<T> {
    alias: Option<CaseAlias>,
    key_signature: Option<&'static [&'static str]>,
    case: BoundCase<T>,
}

struct UnionConverter<T: 'static> {
    cases: Vec<BoundUnionCase<T>>,
    by_int: HashMap<u32, usize>,
    by_str: HashMap<&'static str, usize>,
}

impl<T: Send + Sync + 'static> UnionConverter<T> {
    /// Collects the key strings of the upcoming map without consuming it.
    fn probe_keys(&self, reader: &mut PackReader<'_>, ctx: &Context) -> Result<Vec<Vec<u8>>, DecodeError> {
        let mut probe = *reader.streaming();
        let count = match probe.try_read_map_header() {
            ReadResult::Success(count) => count,
            ReadResult::TokenMismatch(code) => {
                return Err(DecodeError::TokenMismatch { code, expected: "a union payload" })
            }
            _ => return Err(DecodeError::EndOfStream),
        };
        let mut keys = Vec::with_capacity((count as usize).min(probe.remaining()));
        for _ in 0..count {
            ctx.check_cancelled()?;
            match probe.try_read_str() {
                ReadResult::Success(key) => keys.push(key.to_vec()),
                ReadResult::TokenMismatch(_) => {
                    // Non-string key: skip it, it cannot discriminate.
                    match probe.try_skip(ctx.remaining_depth())? {
                        ReadResult::Success(()) => {}
                        _ => return Err(DecodeError::EndOfStream),
                    }
                }
                _ => return Err(DecodeError::EndOfStream),
            }
            match probe.try_skip(ctx.remaining_depth())? {
                ReadResult::Success(()) => {}
                _ => return Err(DecodeError::EndOfStream),
            }
        }
        Ok(keys)
    }
}

impl<T: Send + Sync + 'static> Converter<T> for UnionConverter<T> {
    fn read(&self, reader: &mut PackReader<'_>, ctx: &mut Context) -> Result<T, DecodeError> {
        ctx.descend()?;
        let code = reader.peek_code()?;
        let result = if code.is_array_family() {
            let pair_code = code;
            if reader.read_array_header()? != 2 {
                return Err(DecodeError::TokenMismatch {
                    code: pair_code,
                    expected: "a [alias, value] pair",
                });
            }
            let alias_code = reader.peek_code()?;
            let index = if alias_code.is_str_family() {
                let alias = reader.read_string()?;
                self.by_str.get(alias.as_str()).copied()
            } else {
                let alias = reader.read_u32()?;
                self.by_int.get(&alias).copied()
            };
            match index {
                Some(index) => (self.cases[index].case.read)(reader, ctx),
                None => Err(DecodeError::UnknownUnionAlias),
            }
        } else {
            // Structural: match the payload's keys against case signatures.
            let keys = self.probe_keys(reader, ctx)?;
            let matched = self.cases.iter().find(|case| match case.key_signature {
                Some(signature) => signature
                    .iter()
                    .all(|want| keys.iter().any(|key| key == want.as_bytes())),
                None => false,
            });
            match matched {
                Some(case) => (case.case.read)(reader, ctx),
                None => Err(DecodeError::UnknownUnionAlias),
            }
        };
        ctx.ascend();
        result
    }

    fn write(
        &self,
        writer: &mut PackWriter<'_>,
        value: &T,
        ctx: &mut Context,
    ) -> Result<(), WriteError> {
        ctx.descend_write()?;
        let case = self
            .cases
            .iter()
            .find(|case| (case.case.matches)(value))
            .ok_or(WriteError::Unrepresentable("no union case matches the value"))?;
        match case.alias {
            Some(CaseAlias::Int(alias)) => {
                writer.write_array_header(2);
                writer.write_u32(alias);
                (case.case.write)(writer, value, ctx)?;
            }
            Some(CaseAlias::Str(alias)) => {
                writer.write_array_header(2);
                writer.write_str(alias);
                (case.case.write)(writer, value, ctx)?;
            }
            None => (case.case.write)(writer, value, ctx)?,
        }
        ctx.ascend();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::Registry;
    use crate::shape::{ObjectShape, Property, Shape, Shaped};

    #[derive(Clone, Debug, PartialEq)]
    enum Number {
        Small(u8),
        Big(u64),
    }

    impl Shaped for Number {
        fn shape() -> Shape<Self> {
            Shape::Union(
                UnionShape::new()
                    .case(
                        CaseAlias::Int(0),
                        |n: &Number| match n {
                            Number::Small(v) => Some(v),
                            _ => None,
                        },
                        Number::Small,
                    )
                    .case(
                        CaseAlias::Str("big"),
                        |n: &Number| match n {
                            Number::Big(v) => Some(v),
                            _ => None,
                        },
                        Number::Big,
                    ),
            )
        }
    }

    fn setup<T: Shaped>() -> (Arc<dyn Converter<T>>, Context) {
        let registry = Arc::new(Registry::new());
        (registry.get::<T>(), Context::new(registry))
    }

    fn encode<T: Shaped>(value: &T) -> Vec<u8> {
        let (converter, mut ctx) = setup::<T>();
        let mut bytes = Vec::new();
        {
            let mut writer = PackWriter::new(&mut bytes);
            converter.write(&mut writer, value, &mut ctx).unwrap();
        }
        bytes
    }

    #[test]
    fn int_alias_layout() {
        let bytes = encode(&Number::Small(5));
        assert_eq!(bytes, [0x92, 0x00, 0x05]);
        let (converter, mut ctx) = setup::<Number>();
        let mut reader = PackReader::new(&bytes[..]);
        assert_eq!(converter.read(&mut reader, &mut ctx).unwrap(), Number::Small(5));
    }

    #[test]
    fn str_alias_layout() {
        let bytes = encode(&Number::Big(1_000_000));
        assert_eq!(&bytes[..5], [0x92, 0xa3, b'b', b'i', b'g']);
        let (converter, mut ctx) = setup::<Number>();
        let mut reader = PackReader::new(&bytes[..]);
        assert_eq!(converter.read(&mut reader, &mut ctx).unwrap(), Number::Big(1_000_000));
    }

    #[test]
    fn unknown_alias_fails() {
        let (converter, mut ctx) = setup::<Number>();
        let bytes = [0x92, 0x07, 0x01];
        let mut reader = PackReader::new(&bytes[..]);
        assert!(matches!(
            converter.read(&mut reader, &mut ctx),
            Err(DecodeError::UnknownUnionAlias)
        ));
    }

    #[derive(Clone, Debug, Default, PartialEq)]
    struct Cat {
        meow: u8,
    }

    impl Shaped for Cat {
        fn shape() -> Shape<Self> {
            Shape::Object(
                ObjectShape::map(Cat::default)
                    .property(Property::new("meow", |c: &Cat| &c.meow).setter(|c, v| c.meow = v)),
            )
        }
    }

    #[derive(Clone, Debug, Default, PartialEq)]
    struct Dog {
        bark: u8,
    }

    impl Shaped for Dog {
        fn shape() -> Shape<Self> {
            Shape::Object(
                ObjectShape::map(Dog::default)
                    .property(Property::new("bark", |d: &Dog| &d.bark).setter(|d, v| d.bark = v)),
            )
        }
    }

    #[derive(Clone, Debug, PartialEq)]
    enum Pet {
        Cat(Cat),
        Dog(Dog),
    }

    impl Shaped for Pet {
        fn shape() -> Shape<Self> {
            Shape::Union(
                UnionShape::new()
                    .case_by_keys(
                        &["meow"],
                        |p: &Pet| match p {
                            Pet::Cat(c) => Some(c),
                            _ => None,
                        },
                        Pet::Cat,
                    )
                    .case_by_keys(
                        &["bark"],
                        |p: &Pet| match p {
                            Pet::Dog(d) => Some(d),
                            _ => None,
                        },
                        Pet::Dog,
                    ),
            )
        }
    }

    #[test]
    fn structural_union_discriminates_on_keys() {
        let bytes = encode(&Pet::Dog(Dog { bark: 3 }));
        // Bare map, no alias wrapper.
        assert_eq!(bytes[0], 0x81);
        let (converter, mut ctx) = setup::<Pet>();
        let mut reader = PackReader::new(&bytes[..]);
        assert_eq!(converter.read(&mut reader, &mut ctx).unwrap(), Pet::Dog(Dog { bark: 3 }));

        let bytes = encode(&Pet::Cat(Cat { meow: 9 }));
        let mut reader = PackReader::new(&bytes[..]);
        assert_eq!(converter.read(&mut reader, &mut ctx).unwrap(), Pet::Cat(Cat { meow: 9 }));
    }
}
