//! The converter registry.
//!
//! A process-wide (or caller-owned) cache of one converter per type.
//! Converter graphs for self-referential types are resolved by inserting a
//! placeholder before recursing: the placeholder forwards every operation to
//! the converter it eventually points at, so a cycle terminates without the
//! graph being complete at insertion time. Once binding finishes, the slot
//! is swapped to the resolved converter, so only references captured while
//! breaking a cycle keep the forwarding indirection; every later lookup gets
//! the converter directly.

use std::any::{Any, TypeId};
use std::boxed::Box;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::aio::{AsyncPackReader, AsyncPackWriter};
use crate::error::{DecodeError, ReadError, WriteError};
use crate::reader::PackReader;
use crate::shape::{Shape, Shaped};
use crate::writer::PackWriter;

use super::{trace_log, Context, Converter};

type Slot = Arc<dyn Any + Send + Sync>;

pub struct Registry {
    slots: RwLock<HashMap<TypeId, Slot>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry { slots: RwLock::new(HashMap::new()) }
    }

    /// The shared process-wide registry.
    pub fn global() -> Arc<Registry> {
        static GLOBAL: OnceLock<Arc<Registry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(Registry::new())).clone()
    }

    fn read_slots(&self) -> RwLockReadGuard<'_, HashMap<TypeId, Slot>> {
        match self.slots.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_slots(&self) -> RwLockWriteGuard<'_, HashMap<TypeId, Slot>> {
        match self.slots.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// The converter for `T`, building (and caching) it on first use.
    pub fn get<T: Shaped>(&self) -> Arc<dyn Converter<T>> {
        let key = TypeId::of::<T>();
        if let Some(slot) = self.read_slots().get(&key) {
            return downcast::<T>(slot.clone());
        }
        let placeholder = Arc::new(Delayed::<T>::new());
        {
            let mut slots = self.write_slots();
            match slots.entry(key) {
                Entry::Occupied(entry) => return downcast::<T>(entry.get().clone()),
                Entry::Vacant(vacant) => {
                    vacant.insert(placeholder.clone());
                }
            }
        }
        trace_log!("binding converter for {}", std::any::type_name::<T>());
        // Built outside the lock: binding recurses into `get` for element
        // types, possibly including T itself.
        let built = build::<T>(self);
        placeholder.resolve(built.clone());
        // Swap the slot so only converters captured during the recursion
        // keep going through the placeholder.
        self.write_slots()
            .insert(key, Arc::new(Resolved { converter: built.clone() }));
        built
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}

fn downcast<T: Shaped>(slot: Slot) -> Arc<dyn Converter<T>> {
    if let Ok(resolved) = slot.clone().downcast::<Resolved<T>>() {
        return resolved.converter.clone();
    }
    match slot.downcast::<Delayed<T>>() {
        Ok(delayed) => delayed,
        Err(_) => unreachable!("registry slot holds a converter for another type"),
    }
}

/// Slot contents once a converter is fully bound. A sized wrapper so the
/// trait object can round-trip through `Any`.
struct Resolved<T: 'static> {
    converter: Arc<dyn Converter<T>>,
}

fn build<T: Shaped>(registry: &Registry) -> Arc<dyn Converter<T>> {
    match T::shape() {
        Shape::Leaf(converter) => converter,
        Shape::Object(shape) => super::object::build(shape, registry),
        Shape::Enumerable(shape) => shape.def.bind(registry),
        Shape::Dictionary(shape) => shape.def.bind(registry),
        Shape::Enum(shape) => super::enums::build(shape),
        Shape::Union(shape) => super::union::build(shape, registry),
        Shape::Surrogate(shape) => shape.def.bind(registry),
        Shape::Optional(shape) => shape.def.bind(registry),
    }
}

/// The in-flight placeholder handed out while a converter graph is still
/// being bound. Lookups that land during the recursion capture this wrapper
/// and forward through it; everyone else gets the resolved converter from
/// the swapped slot.
struct Delayed<T: 'static> {
    inner: OnceLock<Arc<dyn Converter<T>>>,
}

impl<T: 'static> Delayed<T> {
    fn new() -> Self {
        Delayed { inner: OnceLock::new() }
    }

    fn resolve(&self, converter: Arc<dyn Converter<T>>) {
        let _ = self.inner.set(converter);
    }

    fn get(&self) -> &Arc<dyn Converter<T>> {
        // Only reachable by serializing a value while its converter graph is
        // still being bound, which is a caller bug rather than a data error.
        self.inner
            .get()
            .expect("converter used while its type graph is still being bound")
    }
}

#[async_trait::async_trait(?Send)]
impl<T: 'static> Converter<T> for Delayed<T> {
    fn read(&self, reader: &mut PackReader<'_>, ctx: &mut Context) -> Result<T, DecodeError> {
        self.get().read(reader, ctx)
    }

    fn write(
        &self,
        writer: &mut PackWriter<'_>,
        value: &T,
        ctx: &mut Context,
    ) -> Result<(), WriteError> {
        self.get().write(writer, value, ctx)
    }

    fn prefers_async(&self) -> bool {
        self.get().prefers_async()
    }

    async fn read_async(
        &self,
        reader: &mut AsyncPackReader,
        ctx: &mut Context,
    ) -> Result<T, ReadError> {
        self.get().read_async(reader, ctx).await
    }

    async fn write_async(
        &self,
        writer: &mut AsyncPackWriter,
        value: &T,
        ctx: &mut Context,
    ) -> Result<(), WriteError> {
        self.get().write_async(writer, value, ctx).await
    }

    async fn skip_to_index_value(
        &self,
        reader: &mut AsyncPackReader,
        index: u32,
        ctx: &mut Context,
    ) -> Result<bool, ReadError> {
        self.get().skip_to_index_value(reader, index, ctx).await
    }

    async fn skip_to_property_value(
        &self,
        reader: &mut AsyncPackReader,
        name: &str,
        ctx: &mut Context,
    ) -> Result<bool, ReadError> {
        self.get().skip_to_property_value(reader, name, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::{ObjectShape, Property};
    use std::vec::Vec;

    #[test]
    fn repeated_lookups_share_one_converter() {
        let registry = Registry::new();
        let first = registry.get::<u32>();
        let second = registry.get::<u32>();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn slot_resolves_past_the_placeholder() {
        // After binding, lookups must not be routed through the placeholder:
        // the first call returns the built converter itself, and later calls
        // return the same allocation from the resolved slot.
        let registry = Registry::new();
        let built = registry.get::<Vec<u8>>();
        for _ in 0..3 {
            assert!(Arc::ptr_eq(&built, &registry.get::<Vec<u8>>()));
        }
    }

    #[derive(Debug, PartialEq, Default)]
    struct Node {
        label: u32,
        children: Vec<Node>,
    }

    impl Shaped for Node {
        fn shape() -> Shape<Self> {
            Shape::Object(
                ObjectShape::map(Node::default)
                    .property(
                        Property::new("label", |n: &Node| &n.label)
                            .setter(|n, v| n.label = v),
                    )
                    .property(
                        Property::new("children", |n: &Node| &n.children)
                            .setter(|n, v| n.children = v),
                    ),
            )
        }
    }

    #[test]
    fn cyclic_type_binds_and_roundtrips() {
        let registry = Arc::new(Registry::new());
        let converter = registry.get::<Node>();
        let tree = Node {
            label: 1,
            children: alloc::vec![
                Node { label: 2, children: Vec::new() },
                Node { label: 3, children: alloc::vec![Node { label: 4, children: Vec::new() }] },
            ],
        };
        let mut ctx = Context::new(registry.clone());
        let mut bytes = Vec::new();
        {
            let mut writer = PackWriter::new(&mut bytes);
            converter.write(&mut writer, &tree, &mut ctx).unwrap();
        }
        let mut reader = PackReader::new(&bytes[..]);
        let back = converter.read(&mut reader, &mut ctx).unwrap();
        assert_eq!(back, tree);
        assert_eq!(reader.remaining(), 0);
    }
}
