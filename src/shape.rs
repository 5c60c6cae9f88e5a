//! Shapes: data descriptions of user types.
//!
//! The converter framework never inspects a Rust type directly. Everything
//! it needs (properties and their accessors, constructor, element types,
//! enum members, union cases) arrives as a [`Shape`], supplied by the
//! type's [`Shaped`] impl. Shapes are consulted exactly once, when the
//! [`Registry`](crate::convert::Registry) binds a converter; the typed
//! accessors recorded here are erased into the bound converter and the shape
//! is dropped.

use std::boxed::Box;
use std::marker::PhantomData;
use std::sync::Arc;
use std::vec::Vec;

use crate::aio::{AsyncPackReader, AsyncPackWriter};
use crate::convert::{BoxFut, Context, Converter, Registry, UnusedData};
use crate::error::{DecodeError, ReadError, WriteError};
use crate::reader::PackReader;
use crate::writer::PackWriter;

/// Types that can describe themselves to the converter framework.
///
/// This is the shape-provider boundary: the framework calls `shape()` during
/// converter construction only.
pub trait Shaped: Send + Sync + Sized + 'static {
    fn shape() -> Shape<Self>;
}

/// What kind of thing a type is, and everything needed to build its
/// converter.
pub enum Shape<T: 'static> {
    /// A type with a hand-written converter.
    Leaf(Arc<dyn Converter<T>>),
    /// A record with named/positioned properties.
    Object(ObjectShape<T>),
    /// A homogeneous sequence.
    Enumerable(EnumerableShape<T>),
    /// A key-value collection.
    Dictionary(DictionaryShape<T>),
    /// A closed set of named integer values.
    Enum(EnumShape<T>),
    /// One of several case types, discriminated on the wire.
    Union(UnionShape<T>),
    /// A type encoded through an intermediate representation.
    Surrogate(SurrogateShape<T>),
    /// `Option`-like: nil or the inner value.
    Optional(OptionalShape<T>),
}

/// Bind-time hook: turns a shape fragment plus a registry into a converter.
pub(crate) trait BindConverter<T: 'static>: Send + Sync {
    fn bind(&self, registry: &Registry) -> Arc<dyn Converter<T>>;
}

// ---- objects ---------------------------------------------------------------

/// How a record is laid out on the wire.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ObjectMode {
    /// A msgpack map keyed by property name.
    Map,
    /// A msgpack array indexed by property position (with the runtime
    /// map/array optimization when defaults are suppressed).
    Positional,
}

pub struct ObjectShape<T: 'static> {
    pub(crate) mode: ObjectMode,
    pub(crate) create: fn() -> T,
    pub(crate) suppress_defaults: bool,
    pub(crate) properties: Vec<PropertyShape<T>>,
    pub(crate) unused_data: Option<UnusedSlot<T>>,
}

pub(crate) struct UnusedSlot<T> {
    pub(crate) get: fn(&T) -> &UnusedData,
    pub(crate) get_mut: fn(&mut T) -> &mut UnusedData,
}

impl<T: Send + Sync + 'static> ObjectShape<T> {
    /// A map-encoded object; `create` is the constructor deserialization
    /// starts from.
    pub fn map(create: fn() -> T) -> Self {
        ObjectShape {
            mode: ObjectMode::Map,
            create,
            suppress_defaults: false,
            properties: Vec::new(),
            unused_data: None,
        }
    }

    /// An array-encoded (positional) object.
    pub fn positional(create: fn() -> T) -> Self {
        ObjectShape { mode: ObjectMode::Positional, ..Self::map(create) }
    }

    /// Only serialize properties whose `serialize_if` predicate passes, and
    /// let the writer pick the smaller of the integer-keyed map and the
    /// nil-padded array form per value.
    pub fn suppress_defaults(mut self) -> Self {
        self.suppress_defaults = true;
        self
    }

    /// Declares the property that buffers unrecognized map keys so they
    /// survive a round trip. The first declaration wins; later ones are
    /// ignored.
    pub fn unused_data(
        mut self,
        get: fn(&T) -> &UnusedData,
        get_mut: fn(&mut T) -> &mut UnusedData,
    ) -> Self {
        if self.unused_data.is_none() {
            self.unused_data = Some(UnusedSlot { get, get_mut });
        }
        self
    }

    pub fn property<P: Shaped>(mut self, property: Property<T, P>) -> Self {
        let index = property.index.unwrap_or(self.properties.len() as u32);
        self.properties.push(PropertyShape {
            name: property.name,
            index,
            required: property.required,
            def: Box::new(TypedProperty {
                get: property.get,
                set: property.set,
                should_serialize: property.should_serialize,
            }),
        });
        self
    }
}

pub(crate) struct PropertyShape<T: 'static> {
    pub(crate) name: &'static str,
    pub(crate) index: u32,
    pub(crate) required: bool,
    pub(crate) def: Box<dyn PropertyDef<T>>,
}

/// One property of an object shape, under construction.
pub struct Property<T, P> {
    name: &'static str,
    index: Option<u32>,
    required: bool,
    get: fn(&T) -> &P,
    set: Option<fn(&mut T, P)>,
    should_serialize: Option<fn(&T) -> bool>,
}

impl<T: Send + Sync + 'static, P: Shaped> Property<T, P> {
    pub fn new(name: &'static str, get: fn(&T) -> &P) -> Self {
        Property {
            name,
            index: None,
            required: false,
            get,
            set: None,
            should_serialize: None,
        }
    }

    pub fn setter(mut self, set: fn(&mut T, P)) -> Self {
        self.set = Some(set);
        self
    }

    /// Marks the property as bound to a required constructor parameter: a
    /// payload that completes without it fails.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Serialize only when the predicate passes (typically "is not the
    /// default value").
    pub fn serialize_if(mut self, pred: fn(&T) -> bool) -> Self {
        self.should_serialize = Some(pred);
        self
    }

    /// Overrides the wire position; defaults to declaration order.
    pub fn at(mut self, index: u32) -> Self {
        self.index = Some(index);
        self
    }
}

/// Bind-time view of a property: everything the object converters need,
/// with the property's value type erased.
pub(crate) trait PropertyOps<T>: Send + Sync {
    fn prefers_async(&self) -> bool;
    fn has_setter(&self) -> bool;
    fn should_serialize(&self, owner: &T) -> bool;
    fn write_value(
        &self,
        writer: &mut PackWriter<'_>,
        owner: &T,
        ctx: &mut Context,
    ) -> Result<(), WriteError>;
    fn read_value_into(
        &self,
        reader: &mut PackReader<'_>,
        owner: &mut T,
        ctx: &mut Context,
    ) -> Result<(), DecodeError>;
    fn write_value_async<'a>(
        &'a self,
        writer: &'a mut AsyncPackWriter,
        owner: &'a T,
        ctx: &'a mut Context,
    ) -> BoxFut<'a, Result<(), WriteError>>;
    fn read_value_into_async<'a>(
        &'a self,
        reader: &'a mut AsyncPackReader,
        owner: &'a mut T,
        ctx: &'a mut Context,
    ) -> BoxFut<'a, Result<(), ReadError>>;
}

pub(crate) trait PropertyDef<T>: Send + Sync {
    fn bind(&self, registry: &Registry) -> Box<dyn PropertyOps<T>>;
}

struct TypedProperty<T, P: 'static> {
    get: fn(&T) -> &P,
    set: Option<fn(&mut T, P)>,
    should_serialize: Option<fn(&T) -> bool>,
}

impl<T: Send + Sync + 'static, P: Shaped> PropertyDef<T> for TypedProperty<T, P> {
    fn bind(&self, registry: &Registry) -> Box<dyn PropertyOps<T>> {
        Box::new(TypedPropertyOps {
            converter: registry.get::<P>(),
            get: self.get,
            set: self.set,
            should_serialize: self.should_serialize,
        })
    }
}

struct TypedPropertyOps<T, P: 'static> {
    converter: Arc<dyn Converter<P>>,
    get: fn(&T) -> &P,
    set: Option<fn(&mut T, P)>,
    should_serialize: Option<fn(&T) -> bool>,
}

impl<T: Send + Sync + 'static, P: Shaped> PropertyOps<T> for TypedPropertyOps<T, P> {
    fn prefers_async(&self) -> bool {
        self.converter.prefers_async()
    }

    fn has_setter(&self) -> bool {
        self.set.is_some()
    }

    fn should_serialize(&self, owner: &T) -> bool {
        match self.should_serialize {
            Some(pred) => pred(owner),
            None => true,
        }
    }

    fn write_value(
        &self,
        writer: &mut PackWriter<'_>,
        owner: &T,
        ctx: &mut Context,
    ) -> Result<(), WriteError> {
        self.converter.write(writer, (self.get)(owner), ctx)
    }

    fn read_value_into(
        &self,
        reader: &mut PackReader<'_>,
        owner: &mut T,
        ctx: &mut Context,
    ) -> Result<(), DecodeError> {
        let value = self.converter.read(reader, ctx)?;
        if let Some(set) = self.set {
            set(owner, value);
        }
        Ok(())
    }

    fn write_value_async<'a>(
        &'a self,
        writer: &'a mut AsyncPackWriter,
        owner: &'a T,
        ctx: &'a mut Context,
    ) -> BoxFut<'a, Result<(), WriteError>> {
        self.converter.write_async(writer, (self.get)(owner), ctx)
    }

    fn read_value_into_async<'a>(
        &'a self,
        reader: &'a mut AsyncPackReader,
        owner: &'a mut T,
        ctx: &'a mut Context,
    ) -> BoxFut<'a, Result<(), ReadError>> {
        Box::pin(async move {
            let value = self.converter.read_async(reader, ctx).await?;
            if let Some(set) = self.set {
                set(owner, value);
            }
            Ok(())
        })
    }
}

// ---- enumerables and dictionaries ------------------------------------------

pub struct EnumerableShape<T: 'static> {
    pub(crate) def: Box<dyn BindConverter<T>>,
}

impl<P: Shaped> EnumerableShape<Vec<P>> {
    /// The shape of `Vec<P>`. Primitive element types take the bulk codec.
    pub fn of_vec() -> Self {
        EnumerableShape { def: Box::new(VecDef::<P>(PhantomData)) }
    }
}

impl<T: Send + Sync + 'static> EnumerableShape<T> {
    /// An enumerable represented by any other collection: `iter` walks it
    /// for writing, `len` (when cheap) sizes the header without
    /// materializing, and `build` constructs it from the decoded elements.
    pub fn with_initializer<P: Shaped>(
        iter: for<'x> fn(&'x T) -> Box<dyn Iterator<Item = &'x P> + 'x>,
        len: Option<fn(&T) -> usize>,
        build: fn(Vec<P>) -> T,
    ) -> Self {
        EnumerableShape { def: Box::new(IterableDef { iter, len, build }) }
    }
}

struct VecDef<P: 'static>(PhantomData<fn() -> P>);

impl<P: Shaped> BindConverter<Vec<P>> for VecDef<P> {
    fn bind(&self, registry: &Registry) -> Arc<dyn Converter<Vec<P>>> {
        if let Some(bulk) = crate::convert::bulk_vec_converter::<P>() {
            return bulk;
        }
        Arc::new(crate::convert::VecConverter::new(registry.get::<P>()))
    }
}

struct IterableDef<T: 'static, P: 'static> {
    iter: for<'x> fn(&'x T) -> Box<dyn Iterator<Item = &'x P> + 'x>,
    len: Option<fn(&T) -> usize>,
    build: fn(Vec<P>) -> T,
}

impl<T: Send + Sync + 'static, P: Shaped> BindConverter<T> for IterableDef<T, P> {
    fn bind(&self, registry: &Registry) -> Arc<dyn Converter<T>> {
        Arc::new(crate::convert::IterEnumerableConverter::new(
            registry.get::<P>(),
            self.iter,
            self.len,
            self.build,
        ))
    }
}

pub struct DictionaryShape<T: 'static> {
    pub(crate) def: Box<dyn BindConverter<T>>,
}

impl<T: Send + Sync + 'static> DictionaryShape<T> {
    pub fn with_initializer<K: Shaped, V: Shaped>(
        iter: for<'x> fn(&'x T) -> Box<dyn Iterator<Item = (&'x K, &'x V)> + 'x>,
        len: fn(&T) -> usize,
        build: fn(Vec<(K, V)>) -> T,
    ) -> Self {
        DictionaryShape { def: Box::new(DictDef { iter, len, build }) }
    }
}

struct DictDef<T: 'static, K: 'static, V: 'static> {
    iter: for<'x> fn(&'x T) -> Box<dyn Iterator<Item = (&'x K, &'x V)> + 'x>,
    len: fn(&T) -> usize,
    build: fn(Vec<(K, V)>) -> T,
}

impl<T: Send + Sync + 'static, K: Shaped, V: Shaped> BindConverter<T> for DictDef<T, K, V> {
    fn bind(&self, registry: &Registry) -> Arc<dyn Converter<T>> {
        Arc::new(crate::convert::DictionaryConverter::new(
            registry.get::<K>(),
            registry.get::<V>(),
            self.iter,
            self.len,
            self.build,
        ))
    }
}

// ---- enums -----------------------------------------------------------------

pub struct EnumShape<T: 'static> {
    pub(crate) to_raw: fn(&T) -> i64,
    pub(crate) from_raw: fn(i64) -> Option<T>,
    pub(crate) members: Vec<(&'static str, i64)>,
}

impl<T: Send + Sync + 'static> EnumShape<T> {
    /// `to_raw` maps a value to its underlying integer; `from_raw` is the
    /// inverse, `None` for integers naming no member.
    pub fn new(to_raw: fn(&T) -> i64, from_raw: fn(i64) -> Option<T>) -> Self {
        EnumShape { to_raw, from_raw, members: Vec::new() }
    }

    pub fn member(mut self, name: &'static str, value: i64) -> Self {
        self.members.push((name, value));
        self
    }
}

// ---- unions ----------------------------------------------------------------

/// Wire discriminator of a union case.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CaseAlias {
    Int(u32),
    Str(&'static str),
}

pub struct UnionShape<T: 'static> {
    pub(crate) cases: Vec<UnionCaseShape<T>>,
}

pub(crate) struct UnionCaseShape<T: 'static> {
    pub(crate) alias: Option<CaseAlias>,
    pub(crate) key_signature: Option<&'static [&'static str]>,
    pub(crate) def: Box<dyn CaseDef<T>>,
}

impl<T: Send + Sync + 'static> UnionShape<T> {
    pub fn new() -> Self {
        UnionShape { cases: Vec::new() }
    }

    /// An alias-tagged case: written as `[alias, value]`.
    pub fn case<C: Shaped>(
        mut self,
        alias: CaseAlias,
        project: for<'x> fn(&'x T) -> Option<&'x C>,
        inject: fn(C) -> T,
    ) -> Self {
        self.cases.push(UnionCaseShape {
            alias: Some(alias),
            key_signature: None,
            def: Box::new(TypedCase { project, inject }),
        });
        self
    }

    /// A structurally-discriminated case: written bare, recognized on read
    /// by the presence of `keys` among the payload map's keys.
    pub fn case_by_keys<C: Shaped>(
        mut self,
        keys: &'static [&'static str],
        project: for<'x> fn(&'x T) -> Option<&'x C>,
        inject: fn(C) -> T,
    ) -> Self {
        self.cases.push(UnionCaseShape {
            alias: None,
            key_signature: Some(keys),
            def: Box::new(TypedCase { project, inject }),
        });
        self
    }
}

impl<T: Send + Sync + 'static> Default for UnionShape<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) struct BoundCase<T> {
    pub(crate) matches: Box<dyn Fn(&T) -> bool + Send + Sync>,
    pub(crate) write: Box<dyn Fn(&mut PackWriter<'_>, &T, &mut Context) -> Result<(), WriteError> + Send + Sync>,
    pub(crate) read: Box<dyn Fn(&mut PackReader<'_>, &mut Context) -> Result<T, DecodeError> + Send + Sync>,
}

pub(crate) trait CaseDef<T>: Send + Sync {
    fn bind(&self, registry: &Registry) -> BoundCase<T>;
}

struct TypedCase<T: 'static, C: 'static> {
    project: for<'x> fn(&'x T) -> Option<&'x C>,
    inject: fn(C) -> T,
}

impl<T: Send + Sync + 'static, C: Shaped> CaseDef<T> for TypedCase<T, C> {
    fn bind(&self, registry: &Registry) -> BoundCase<T> {
        let converter = registry.get::<C>();
        let project = self.project;
        let inject = self.inject;
        let write_converter = converter.clone();
        BoundCase {
            matches: Box::new(move |value: &T| project(value).is_some()),
            write: Box::new(move |writer: &mut PackWriter<'_>, value: &T, ctx: &mut Context| {
                match project(value) {
                    Some(inner) => write_converter.write(writer, inner, ctx),
                    None => Err(WriteError::Unrepresentable("value does not match the union case")),
                }
            }),
            read: Box::new(move |reader: &mut PackReader<'_>, ctx: &mut Context| {
                converter.read(reader, ctx).map(inject)
            }),
        }
    }
}

// ---- surrogates and optionals ----------------------------------------------

pub struct SurrogateShape<T: 'static> {
    pub(crate) def: Box<dyn BindConverter<T>>,
}

impl<T: Send + Sync + 'static> SurrogateShape<T> {
    /// Encode `T` by marshalling through `S`.
    pub fn via<S: Shaped>(to: fn(&T) -> S, from: fn(S) -> T) -> Self {
        SurrogateShape { def: Box::new(SurrogateDef { to, from }) }
    }
}

struct SurrogateDef<T: 'static, S: 'static> {
    to: fn(&T) -> S,
    from: fn(S) -> T,
}

impl<T: Send + Sync + 'static, S: Shaped> BindConverter<T> for SurrogateDef<T, S> {
    fn bind(&self, registry: &Registry) -> Arc<dyn Converter<T>> {
        Arc::new(crate::convert::SurrogateConverter::new(registry.get::<S>(), self.to, self.from))
    }
}

pub struct OptionalShape<T: 'static> {
    pub(crate) def: Box<dyn BindConverter<T>>,
}

impl<P: Shaped> OptionalShape<Option<P>> {
    pub fn of() -> Self {
        OptionalShape { def: Box::new(OptionDef::<P>(PhantomData)) }
    }
}

struct OptionDef<P: 'static>(PhantomData<fn() -> P>);

impl<P: Shaped> BindConverter<Option<P>> for OptionDef<P> {
    fn bind(&self, registry: &Registry) -> Arc<dyn Converter<Option<P>>> {
        Arc::new(crate::convert::OptionConverter::new(registry.get::<P>()))
    }
}
