//! Object-as-map and object-as-array converters.
//!
//! A map-mode object is written as `{name: value, …}` with property names
//! pre-encoded at bind time. A positional object is written as an array
//! indexed by property position. With default suppression on, each value
//! instead picks whichever of two forms costs fewer bytes: a truncated array
//! padded with nil at absent positions, or a map keyed by the *integer*
//! positions of the present properties. Values cost the same in both forms,
//! so only the overhead (nil padding vs. integer keys plus headers) is
//! compared.

use std::boxed::Box;
use std::collections::HashMap;
use std::sync::Arc;
use std::vec;
use std::vec::Vec;

use either::Either;

use crate::aio::{AsyncPackReader, AsyncPackWriter};
use crate::error::{DecodeError, ReadError, WriteError};
use crate::format;
use crate::reader::PackReader;
use crate::shape::{ObjectMode, ObjectShape, PropertyOps, UnusedSlot};
use crate::writer::PackWriter;

use super::{trace_log, Context, Converter, Registry};

/// Unrecognized map keys captured during deserialization so they survive a
/// round trip through an out-of-date schema.
///
/// Entries hold the key's UTF-8 payload and the value's raw msgpack bytes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UnusedData {
    entries: Vec<(Box<[u8]>, Box<[u8]>)>,
}

impl UnusedData {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The captured keys, for diagnostics.
    pub fn keys(&self) -> impl Iterator<Item = &[u8]> {
        self.entries.iter().map(|(key, _)| &key[..])
    }

    fn push(&mut self, key: Box<[u8]>, value: Box<[u8]>) {
        self.entries.push((key, value));
    }

    fn write_entries(&self, writer: &mut PackWriter<'_>) {
        for (key, value) in &self.entries {
            writer.write_str_raw(key);
            writer.write_raw(value);
        }
    }
}

/// Assignment tracking for required-property detection.
struct PropertySet {
    words: Vec<u64>,
}

impl PropertySet {
    fn new(len: usize) -> Self {
        PropertySet { words: vec![0; (len + 63) / 64] }
    }

    fn set(&mut self, index: usize) {
        self.words[index / 64] |= 1 << (index % 64);
    }

    fn get(&self, index: usize) -> bool {
        self.words[index / 64] & (1 << (index % 64)) != 0
    }
}

struct BoundProperty<T> {
    name: &'static str,
    index: u32,
    required: bool,
    /// The property name as a complete msgpack str token.
    encoded_name: Box<[u8]>,
    ops: Box<dyn PropertyOps<T>>,
}

fn encode_name(name: &str) -> Box<[u8]> {
    let mut bytes = Vec::new();
    {
        let mut writer = PackWriter::new(&mut bytes);
        writer.write_str(name);
    }
    bytes.into_boxed_slice()
}

pub(crate) fn build<T: Send + Sync + 'static>(
    shape: ObjectShape<T>,
    registry: &Registry,
) -> Arc<dyn Converter<T>> {
    let ObjectShape { mode, create, suppress_defaults, properties, unused_data } = shape;
    let mut bound: Vec<BoundProperty<T>> = properties
        .into_iter()
        .map(|property| BoundProperty {
            name: property.name,
            index: property.index,
            required: property.required,
            encoded_name: encode_name(property.name),
            ops: property.def.bind(registry),
        })
        .collect();
    match mode {
        ObjectMode::Map => {
            let by_name = bound
                .iter()
                .enumerate()
                .map(|(i, property)| (Box::from(property.name.as_bytes()), i))
                .collect();
            Arc::new(ObjectMapConverter { properties: bound, by_name, create, unused: unused_data })
        }
        ObjectMode::Positional => {
            bound.sort_by_key(|property| property.index);
            let positions = bound.last().map(|p| p.index as usize + 1).unwrap_or(0);
            let mut by_position = vec![None; positions];
            for (i, property) in bound.iter().enumerate() {
                by_position[property.index as usize] = Some(i);
            }
            Arc::new(ObjectArrayConverter {
                properties: bound,
                by_position,
                create,
                suppress_defaults,
            })
        }
    }
}

// ---- map-encoded objects ---------------------------------------------------

struct ObjectMapConverter<T: 'static> {
    properties: Vec<BoundProperty<T>>,
    /// Property-name payload bytes → index into `properties`.
    by_name: HashMap<Box<[u8]>, usize>,
    create: fn() -> T,
    unused: Option<UnusedSlot<T>>,
}

impl<T: Send + Sync + 'static> ObjectMapConverter<T> {
    fn property_for_key(&self, key: &crate::buffer::SeqSlice<'_>) -> Option<usize> {
        match key.as_contiguous() {
            Some(bytes) => self.by_name.get(bytes).copied(),
            None => {
                let stitched = key.to_vec();
                self.by_name.get(&stitched[..]).copied()
            }
        }
    }

    fn present_set(&self, value: &T) -> (Vec<bool>, u32) {
        let mut present = Vec::with_capacity(self.properties.len());
        let mut count = 0;
        for property in &self.properties {
            let keep = property.ops.should_serialize(value);
            present.push(keep);
            count += keep as u32;
        }
        (present, count)
    }

    fn check_required(&self, assigned: &PropertySet) -> Result<(), DecodeError> {
        for (i, property) in self.properties.iter().enumerate() {
            if property.required && !assigned.get(i) {
                return Err(DecodeError::MissingProperty { name: property.name });
            }
        }
        Ok(())
    }

    /// Decodes one key and resolves it: a known property index, or the key's
    /// payload bytes for the unknown-key path.
    fn read_key(
        &self,
        reader: &mut PackReader<'_>,
    ) -> Result<Either<usize, Vec<u8>>, DecodeError> {
        if reader.peek_code()?.0 == format::NIL {
            return Err(DecodeError::NullKey);
        }
        let key = reader.read_str_bytes()?;
        match self.property_for_key(&key) {
            Some(index) => Ok(Either::Left(index)),
            None => Ok(Either::Right(key.to_vec())),
        }
    }

    fn read_unknown_value(
        &self,
        reader: &mut PackReader<'_>,
        key: Vec<u8>,
        value: &mut T,
        ctx: &mut Context,
    ) -> Result<(), DecodeError> {
        match &self.unused {
            Some(slot) => {
                let raw = reader.read_raw_structure(ctx.remaining_depth())?;
                (slot.get_mut)(value).push(key.into_boxed_slice(), raw.to_vec().into_boxed_slice());
                Ok(())
            }
            None => reader.skip(ctx.remaining_depth()),
        }
    }
}

#[async_trait::async_trait(?Send)]
impl<T: Send + Sync + 'static> Converter<T> for ObjectMapConverter<T> {
    fn read(&self, reader: &mut PackReader<'_>, ctx: &mut Context) -> Result<T, DecodeError> {
        ctx.descend()?;
        let count = reader.read_map_header()?;
        let mut value = (self.create)();
        let mut assigned = PropertySet::new(self.properties.len());
        for _ in 0..count {
            ctx.check_cancelled()?;
            match self.read_key(reader)? {
                Either::Left(index) => {
                    self.properties[index].ops.read_value_into(reader, &mut value, ctx)?;
                    assigned.set(index);
                }
                Either::Right(key) => {
                    self.read_unknown_value(reader, key, &mut value, ctx)?;
                }
            }
        }
        self.check_required(&assigned)?;
        ctx.ascend();
        Ok(value)
    }

    fn write(
        &self,
        writer: &mut PackWriter<'_>,
        value: &T,
        ctx: &mut Context,
    ) -> Result<(), WriteError> {
        ctx.descend_write()?;
        let (present, mut count) = self.present_set(value);
        if let Some(slot) = &self.unused {
            count += (slot.get)(value).len() as u32;
        }
        writer.write_map_header(count);
        for (i, property) in self.properties.iter().enumerate() {
            if !present[i] {
                continue;
            }
            ctx.check_cancelled_write()?;
            writer.write_raw(&property.encoded_name);
            property.ops.write_value(writer, value, ctx)?;
        }
        if let Some(slot) = &self.unused {
            (slot.get)(value).write_entries(writer);
        }
        ctx.ascend();
        Ok(())
    }

    fn prefers_async(&self) -> bool {
        self.properties.iter().any(|property| property.ops.prefers_async())
    }

    /// Properties are emitted in shape order; consecutive sync-preferring
    /// properties share one checked-out writer, with a flush opportunity
    /// between batches.
    async fn write_async(
        &self,
        writer: &mut AsyncPackWriter,
        value: &T,
        ctx: &mut Context,
    ) -> Result<(), WriteError> {
        ctx.descend_write()?;
        let (present, mut count) = self.present_set(value);
        if let Some(slot) = &self.unused {
            count += (slot.get)(value).len() as u32;
        }
        writer.with_writer(|w| w.write_map_header(count));
        let mut i = 0;
        while i < self.properties.len() {
            if present[i] && self.properties[i].ops.prefers_async() {
                let property = &self.properties[i];
                writer.with_writer(|w| w.write_raw(&property.encoded_name));
                property.ops.write_value_async(writer, value, ctx).await?;
                writer.flush_if_appropriate(ctx).await?;
                i += 1;
                continue;
            }
            let mut end = i;
            while end < self.properties.len()
                && !(present[end] && self.properties[end].ops.prefers_async())
            {
                end += 1;
            }
            writer.with_writer(|w| -> Result<(), WriteError> {
                for j in i..end {
                    if !present[j] {
                        continue;
                    }
                    ctx.check_cancelled_write()?;
                    w.write_raw(&self.properties[j].encoded_name);
                    self.properties[j].ops.write_value(w, value, ctx)?;
                }
                Ok(())
            })?;
            writer.flush_if_appropriate(ctx).await?;
            i = end;
        }
        if let Some(slot) = &self.unused {
            writer.with_writer(|w| (slot.get)(value).write_entries(w));
        }
        ctx.ascend();
        Ok(())
    }

    async fn read_async(
        &self,
        reader: &mut AsyncPackReader,
        ctx: &mut Context,
    ) -> Result<T, ReadError> {
        ctx.descend()?;
        let count = reader
            .read_header(ctx, "a map", |sr| sr.try_read_map_header())
            .await?;
        let mut value = (self.create)();
        let mut assigned = PropertySet::new(self.properties.len());
        for _ in 0..count {
            ctx.check_cancelled()?;
            reader.buffer_next_structure(ctx).await?;
            let key = reader.with_reader(|r| self.read_key(r))?;
            match key {
                Either::Left(index) => {
                    let property = &self.properties[index];
                    if property.ops.prefers_async() {
                        property.ops.read_value_into_async(reader, &mut value, ctx).await?;
                    } else {
                        reader.buffer_next_structure(ctx).await?;
                        reader.with_reader(|r| property.ops.read_value_into(r, &mut value, ctx))?;
                    }
                    assigned.set(index);
                }
                Either::Right(key) => {
                    reader.buffer_next_structure(ctx).await?;
                    reader.with_reader(|r| self.read_unknown_value(r, key, &mut value, ctx))?;
                }
            }
        }
        self.check_required(&assigned)?;
        ctx.ascend();
        Ok(value)
    }

    async fn skip_to_property_value(
        &self,
        reader: &mut AsyncPackReader,
        name: &str,
        ctx: &mut Context,
    ) -> Result<bool, ReadError> {
        let count = reader
            .read_header(ctx, "a map", |sr| sr.try_read_map_header())
            .await?;
        for _ in 0..count {
            ctx.check_cancelled()?;
            reader.buffer_next_structure(ctx).await?;
            let matched = reader.with_reader(|r| {
                let key = r.read_str_bytes()?;
                Ok(key.eq_bytes(name.as_bytes()))
            })?;
            if matched {
                return Ok(true);
            }
            reader.buffer_next_structure(ctx).await?;
            reader.with_reader(|r| r.skip(ctx.remaining_depth()))?;
        }
        Ok(false)
    }
}

// ---- array-encoded objects -------------------------------------------------

struct ObjectArrayConverter<T: 'static> {
    /// Sorted by index.
    properties: Vec<BoundProperty<T>>,
    /// Wire position → index into `properties`.
    by_position: Vec<Option<usize>>,
    create: fn() -> T,
    suppress_defaults: bool,
}

/// The form the hybrid optimizer settled on for one value.
enum WirePlan {
    /// Truncated array covering positions `0..len`.
    Array { len: usize, present: Vec<bool> },
    /// Integer-keyed map of the present positions.
    IntMap { count: u32, present: Vec<bool> },
}

impl<T: Send + Sync + 'static> ObjectArrayConverter<T> {
    fn plan(&self, value: &T) -> WirePlan {
        if !self.suppress_defaults {
            let present: Vec<bool> =
                self.by_position.iter().map(|slot| slot.is_some()).collect();
            return WirePlan::Array { len: self.by_position.len(), present };
        }
        let mut present = vec![false; self.by_position.len()];
        let mut num_present: u32 = 0;
        let mut last = None;
        for (position, slot) in self.by_position.iter().enumerate() {
            if let Some(index) = slot {
                if self.properties[*index].ops.should_serialize(value) {
                    present[position] = true;
                    num_present += 1;
                    last = Some(position);
                }
            }
        }
        let last = match last {
            Some(last) => last,
            None => return WirePlan::Array { len: 0, present },
        };
        let array_len = last + 1;
        // Values cost the same either way; compare only the overhead.
        let array_cost =
            format::array_header_len(array_len as u32) + (array_len - num_present as usize);
        let map_cost = format::map_header_len(num_present)
            + present
                .iter()
                .enumerate()
                .filter(|(_, &p)| p)
                .map(|(position, _)| format::uint_encoded_len(position as u64))
                .sum::<usize>();
        if map_cost < array_cost {
            trace_log!(
                "object form: map ({} bytes overhead vs {} for array)",
                map_cost,
                array_cost
            );
            WirePlan::IntMap { count: num_present, present }
        } else {
            trace_log!(
                "object form: array ({} bytes overhead vs {} for map)",
                array_cost,
                map_cost
            );
            WirePlan::Array { len: array_len, present }
        }
    }

    fn write_plan_header(&self, writer: &mut PackWriter<'_>, plan: &WirePlan) {
        match plan {
            WirePlan::Array { len, .. } => writer.write_array_header(*len as u32),
            WirePlan::IntMap { count, .. } => writer.write_map_header(*count),
        }
    }

    /// Emits position `position` of the plan into a sync writer.
    fn write_position(
        &self,
        writer: &mut PackWriter<'_>,
        plan: &WirePlan,
        position: usize,
        value: &T,
        ctx: &mut Context,
    ) -> Result<(), WriteError> {
        match plan {
            WirePlan::Array { present, .. } => match self.by_position[position] {
                Some(index) if present[position] => {
                    self.properties[index].ops.write_value(writer, value, ctx)
                }
                _ => {
                    writer.write_nil();
                    Ok(())
                }
            },
            WirePlan::IntMap { present, .. } => match self.by_position[position] {
                Some(index) if present[position] => {
                    writer.write_u32(position as u32);
                    self.properties[index].ops.write_value(writer, value, ctx)
                }
                _ => Ok(()),
            },
        }
    }

    fn plan_positions(&self, plan: &WirePlan) -> usize {
        match plan {
            WirePlan::Array { len, .. } => *len,
            WirePlan::IntMap { present, .. } => present.len(),
        }
    }

    /// Whether the unit of work at `position` must go through the async
    /// property path.
    fn position_is_async(&self, plan: &WirePlan, position: usize) -> bool {
        let present = match plan {
            WirePlan::Array { present, .. } => present,
            WirePlan::IntMap { present, .. } => present,
        };
        match self.by_position[position] {
            Some(index) if present[position] => self.properties[index].ops.prefers_async(),
            _ => false,
        }
    }

    fn check_required(&self, assigned: &PropertySet) -> Result<(), DecodeError> {
        for (i, property) in self.properties.iter().enumerate() {
            if property.required && !assigned.get(i) {
                return Err(DecodeError::MissingProperty { name: property.name });
            }
        }
        Ok(())
    }

    fn read_position(
        &self,
        reader: &mut PackReader<'_>,
        position: usize,
        value: &mut T,
        assigned: &mut PropertySet,
        ctx: &mut Context,
    ) -> Result<(), DecodeError> {
        match self.by_position.get(position).copied().flatten() {
            Some(index) => {
                // nil at a position leaves the constructor default in place.
                if reader.read_nil_opt()? {
                    return Ok(());
                }
                self.properties[index].ops.read_value_into(reader, value, ctx)?;
                assigned.set(index);
                Ok(())
            }
            None => reader.skip(ctx.remaining_depth()),
        }
    }
}

#[async_trait::async_trait(?Send)]
impl<T: Send + Sync + 'static> Converter<T> for ObjectArrayConverter<T> {
    fn read(&self, reader: &mut PackReader<'_>, ctx: &mut Context) -> Result<T, DecodeError> {
        ctx.descend()?;
        let mut value = (self.create)();
        let mut assigned = PropertySet::new(self.properties.len());
        let code = reader.peek_code()?;
        if code.is_map_family() {
            let count = reader.read_map_header()?;
            for _ in 0..count {
                ctx.check_cancelled()?;
                if reader.peek_code()?.0 == format::NIL {
                    return Err(DecodeError::NullKey);
                }
                let position = reader.read_u32()? as usize;
                match self.by_position.get(position).copied().flatten() {
                    Some(index) => {
                        self.properties[index].ops.read_value_into(reader, &mut value, ctx)?;
                        assigned.set(index);
                    }
                    None => reader.skip(ctx.remaining_depth())?,
                }
            }
        } else {
            let count = reader.read_array_header()?;
            for position in 0..count as usize {
                ctx.check_cancelled()?;
                self.read_position(reader, position, &mut value, &mut assigned, ctx)?;
            }
        }
        self.check_required(&assigned)?;
        ctx.ascend();
        Ok(value)
    }

    fn write(
        &self,
        writer: &mut PackWriter<'_>,
        value: &T,
        ctx: &mut Context,
    ) -> Result<(), WriteError> {
        ctx.descend_write()?;
        let plan = self.plan(value);
        self.write_plan_header(writer, &plan);
        for position in 0..self.plan_positions(&plan) {
            ctx.check_cancelled_write()?;
            self.write_position(writer, &plan, position, value, ctx)?;
        }
        ctx.ascend();
        Ok(())
    }

    fn prefers_async(&self) -> bool {
        self.properties.iter().any(|property| property.ops.prefers_async())
    }

    async fn write_async(
        &self,
        writer: &mut AsyncPackWriter,
        value: &T,
        ctx: &mut Context,
    ) -> Result<(), WriteError> {
        ctx.descend_write()?;
        let plan = self.plan(value);
        writer.with_writer(|w| self.write_plan_header(w, &plan));
        let positions = self.plan_positions(&plan);
        let mut position = 0;
        while position < positions {
            if self.position_is_async(&plan, position) {
                let index = self.by_position[position]
                    .expect("async position always maps to a property");
                if let WirePlan::IntMap { .. } = plan {
                    writer.with_writer(|w| w.write_u32(position as u32));
                }
                self.properties[index].ops.write_value_async(writer, value, ctx).await?;
                writer.flush_if_appropriate(ctx).await?;
                position += 1;
                continue;
            }
            let mut end = position;
            while end < positions && !self.position_is_async(&plan, end) {
                end += 1;
            }
            writer.with_writer(|w| -> Result<(), WriteError> {
                for p in position..end {
                    ctx.check_cancelled_write()?;
                    self.write_position(w, &plan, p, value, ctx)?;
                }
                Ok(())
            })?;
            writer.flush_if_appropriate(ctx).await?;
            position = end;
        }
        ctx.ascend();
        Ok(())
    }

    async fn read_async(
        &self,
        reader: &mut AsyncPackReader,
        ctx: &mut Context,
    ) -> Result<T, ReadError> {
        ctx.descend()?;
        let header = reader
            .read_header(ctx, "a positional object", |sr| {
                match sr.try_peek_code() {
                    crate::reader::ReadResult::Success(code) if code.is_map_family() => {
                        sr.try_read_map_header().map(|count| (true, count))
                    }
                    crate::reader::ReadResult::Success(_) => {
                        sr.try_read_array_header().map(|count| (false, count))
                    }
                    other => other.forward(),
                }
            })
            .await?;
        let (is_map, count) = header;
        let mut value = (self.create)();
        let mut assigned = PropertySet::new(self.properties.len());
        if is_map {
            for _ in 0..count {
                ctx.check_cancelled()?;
                reader.buffer_next_structure(ctx).await?;
                let position = reader.with_reader(|r| {
                    if r.peek_code()?.0 == format::NIL {
                        return Err(DecodeError::NullKey);
                    }
                    r.read_u32()
                })? as usize;
                match self.by_position.get(position).copied().flatten() {
                    Some(index) if self.properties[index].ops.prefers_async() => {
                        reader.buffer_next_structure(ctx).await?;
                        let was_nil = reader.with_reader(|r| r.read_nil_opt())?;
                        if !was_nil {
                            self.properties[index]
                                .ops
                                .read_value_into_async(reader, &mut value, ctx)
                                .await?;
                            assigned.set(index);
                        }
                    }
                    Some(index) => {
                        reader.buffer_next_structure(ctx).await?;
                        reader.with_reader(|r| {
                            self.properties[index].ops.read_value_into(r, &mut value, ctx)
                        })?;
                        assigned.set(index);
                    }
                    None => {
                        reader.buffer_next_structure(ctx).await?;
                        reader.with_reader(|r| r.skip(ctx.remaining_depth()))?;
                    }
                }
            }
        } else {
            for position in 0..count as usize {
                ctx.check_cancelled()?;
                reader.buffer_next_structure(ctx).await?;
                match self.by_position.get(position).copied().flatten() {
                    Some(index) if self.properties[index].ops.prefers_async() => {
                        let was_nil = reader.with_reader(|r| r.read_nil_opt())?;
                        if !was_nil {
                            self.properties[index]
                                .ops
                                .read_value_into_async(reader, &mut value, ctx)
                                .await?;
                            assigned.set(index);
                        }
                    }
                    _ => {
                        reader.with_reader(|r| {
                            self.read_position(r, position, &mut value, &mut assigned, ctx)
                        })?;
                    }
                }
            }
        }
        self.check_required(&assigned)?;
        ctx.ascend();
        Ok(value)
    }

    async fn skip_to_index_value(
        &self,
        reader: &mut AsyncPackReader,
        index: u32,
        ctx: &mut Context,
    ) -> Result<bool, ReadError> {
        let header = reader
            .read_header(ctx, "a positional object", |sr| {
                match sr.try_peek_code() {
                    crate::reader::ReadResult::Success(code) if code.is_map_family() => {
                        sr.try_read_map_header().map(|count| (true, count))
                    }
                    crate::reader::ReadResult::Success(_) => {
                        sr.try_read_array_header().map(|count| (false, count))
                    }
                    other => other.forward(),
                }
            })
            .await?;
        let (is_map, count) = header;
        if is_map {
            for _ in 0..count {
                ctx.check_cancelled()?;
                reader.buffer_next_structure(ctx).await?;
                let position = reader.with_reader(|r| r.read_u32())?;
                if position == index {
                    return Ok(true);
                }
                reader.buffer_next_structure(ctx).await?;
                reader.with_reader(|r| r.skip(ctx.remaining_depth()))?;
            }
            Ok(false)
        } else {
            if index >= count {
                return Ok(false);
            }
            for _ in 0..index {
                ctx.check_cancelled()?;
                reader.buffer_next_structure(ctx).await?;
                reader.with_reader(|r| r.skip(ctx.remaining_depth()))?;
            }
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::{Property, Shape, Shaped};
    use std::string::String;

    fn encode<T: Shaped>(value: &T) -> Vec<u8> {
        let registry = Arc::new(Registry::new());
        let converter = registry.get::<T>();
        let mut ctx = Context::new(registry);
        let mut bytes = Vec::new();
        {
            let mut writer = PackWriter::new(&mut bytes);
            converter.write(&mut writer, value, &mut ctx).unwrap();
        }
        bytes
    }

    fn decode<T: Shaped>(bytes: &[u8]) -> Result<T, DecodeError> {
        let registry = Arc::new(Registry::new());
        let converter = registry.get::<T>();
        let mut ctx = Context::new(registry);
        let mut reader = PackReader::new(bytes);
        converter.read(&mut reader, &mut ctx)
    }

    #[derive(Debug, Default, PartialEq)]
    struct Person {
        name: String,
        age: u32,
        nickname: Option<String>,
    }

    impl Shaped for Person {
        fn shape() -> Shape<Self> {
            Shape::Object(
                ObjectShape::map(Person::default)
                    .property(
                        Property::new("name", |p: &Person| &p.name)
                            .setter(|p, v| p.name = v)
                            .required(),
                    )
                    .property(
                        Property::new("age", |p: &Person| &p.age).setter(|p, v| p.age = v),
                    )
                    .property(
                        Property::new("nickname", |p: &Person| &p.nickname)
                            .setter(|p, v| p.nickname = v),
                    ),
            )
        }
    }

    #[test]
    fn map_object_roundtrip() {
        let person = Person { name: "ada".into(), age: 36, nickname: Some("al".into()) };
        let bytes = encode(&person);
        assert_eq!(bytes[0], 0x83);
        assert_eq!(decode::<Person>(&bytes).unwrap(), person);
    }

    #[test]
    fn unknown_keys_skipped() {
        // {"name": "x", "zzz": [1, 2], "age": 7}
        let bytes = [
            0x83, 0xa4, b'n', b'a', b'm', b'e', 0xa1, b'x', 0xa3, b'z', b'z', b'z', 0x92, 0x01,
            0x02, 0xa3, b'a', b'g', b'e', 0x07,
        ];
        let person = decode::<Person>(&bytes).unwrap();
        assert_eq!(person.name, "x");
        assert_eq!(person.age, 7);
    }

    #[test]
    fn missing_required_property_fails_by_name() {
        // {"age": 7}
        let bytes = [0x81, 0xa3, b'a', b'g', b'e', 0x07];
        match decode::<Person>(&bytes) {
            Err(DecodeError::MissingProperty { name }) => assert_eq!(name, "name"),
            other => panic!("expected missing-property, got {:?}", other),
        }
    }

    #[derive(Debug, Default, PartialEq)]
    struct Versioned {
        id: u32,
        rest: UnusedData,
    }

    impl Shaped for Versioned {
        fn shape() -> Shape<Self> {
            Shape::Object(
                ObjectShape::map(Versioned::default)
                    .property(Property::new("id", |v: &Versioned| &v.id).setter(|v, x| v.id = x))
                    .unused_data(|v| &v.rest, |v| &mut v.rest),
            )
        }
    }

    #[test]
    fn unknown_keys_survive_roundtrip() {
        // {"id": 1, "future": "field"}
        let original = [
            0x82, 0xa2, b'i', b'd', 0x01, 0xa6, b'f', b'u', b't', b'u', b'r', b'e', 0xa5, b'f',
            b'i', b'e', b'l', b'd',
        ];
        let versioned = decode::<Versioned>(&original).unwrap();
        assert_eq!(versioned.id, 1);
        assert_eq!(versioned.rest.len(), 1);
        let rewritten = encode(&versioned);
        assert_eq!(rewritten, original);
    }

    #[derive(Debug, Default, PartialEq)]
    struct Ten {
        vals: [u32; 10],
    }

    impl Shaped for Ten {
        fn shape() -> Shape<Self> {
            let mut shape = ObjectShape::positional(Ten::default).suppress_defaults();
            macro_rules! prop {
                ($($i:literal => $name:literal),+) => {$(
                    shape = shape.property(
                        Property::new($name, |t: &Ten| &t.vals[$i])
                            .setter(|t, v| t.vals[$i] = v)
                            .serialize_if(|t| t.vals[$i] != 0),
                    );
                )+};
            }
            prop!(0 => "p0", 1 => "p1", 2 => "p2", 3 => "p3", 4 => "p4",
                  5 => "p5", 6 => "p6", 7 => "p7", 8 => "p8", 9 => "p9");
            Shape::Object(shape)
        }
    }

    #[test]
    fn sparse_values_choose_map_form() {
        // Only positions 0 and 9 present: 8 nils beat 2 integer keys, so the
        // writer must emit a map.
        let mut ten = Ten::default();
        ten.vals[0] = 1;
        ten.vals[9] = 2;
        let bytes = encode(&ten);
        assert_eq!(bytes[0], 0x82, "expected fixmap of 2, got {:#04x}", bytes[0]);
        assert_eq!(bytes, [0x82, 0x00, 0x01, 0x09, 0x02]);
        assert_eq!(decode::<Ten>(&bytes).unwrap(), ten);
    }

    #[test]
    fn dense_values_choose_array_form() {
        // Nine of ten present: one nil is cheaper than nine keys.
        let mut ten = Ten::default();
        for i in 0..10 {
            ten.vals[i] = (i + 1) as u32;
        }
        ten.vals[5] = 0;
        let bytes = encode(&ten);
        assert_eq!(bytes[0], 0x9a, "expected fixarray of 10, got {:#04x}", bytes[0]);
        assert_eq!(bytes[6], 0xc0, "absent position is nil");
        assert_eq!(decode::<Ten>(&bytes).unwrap(), ten);
    }

    #[test]
    fn all_defaults_write_empty_array() {
        let bytes = encode(&Ten::default());
        assert_eq!(bytes, [0x90]);
        assert_eq!(decode::<Ten>(&bytes).unwrap(), Ten::default());
    }

    #[test]
    fn optimizer_tie_goes_to_array() {
        // Two of three present at positions 0 and 2: array = header + 1 nil
        // = 2 bytes overhead; map = header + 2 keys = 3. Array wins. With
        // positions {2} only: array = 1 + 2 nils = 3, map = 1 + 1 key = 2,
        // map wins. Equal costs must pick the array.
        #[derive(Debug, Default, PartialEq)]
        struct Two {
            vals: [u32; 2],
        }
        impl Shaped for Two {
            fn shape() -> Shape<Self> {
                Shape::Object(
                    ObjectShape::positional(Two::default)
                        .suppress_defaults()
                        .property(
                            Property::new("a", |t: &Two| &t.vals[0])
                                .setter(|t, v| t.vals[0] = v)
                                .serialize_if(|t| t.vals[0] != 0),
                        )
                        .property(
                            Property::new("b", |t: &Two| &t.vals[1])
                                .setter(|t, v| t.vals[1] = v)
                                .serialize_if(|t| t.vals[1] != 0),
                        ),
                )
            }
        }
        // Only position 1 present: array cost = 1 header + 1 nil = 2,
        // map cost = 1 header + 1 key = 2. Tie → array.
        let mut two = Two::default();
        two.vals[1] = 9;
        let bytes = encode(&two);
        assert_eq!(bytes, [0x92, 0xc0, 0x09]);
        assert_eq!(decode::<Two>(&bytes).unwrap(), two);
    }

    #[test]
    fn positional_dense_mode_roundtrip() {
        #[derive(Debug, Default, PartialEq)]
        struct Pair {
            x: u32,
            y: String,
        }
        impl Shaped for Pair {
            fn shape() -> Shape<Self> {
                Shape::Object(
                    ObjectShape::positional(Pair::default)
                        .property(Property::new("x", |p: &Pair| &p.x).setter(|p, v| p.x = v))
                        .property(Property::new("y", |p: &Pair| &p.y).setter(|p, v| p.y = v)),
                )
            }
        }
        let pair = Pair { x: 5, y: "hi".into() };
        let bytes = encode(&pair);
        assert_eq!(bytes, [0x92, 0x05, 0xa2, b'h', b'i']);
        assert_eq!(decode::<Pair>(&bytes).unwrap(), pair);
    }

    #[test]
    fn surplus_positions_are_skipped() {
        #[derive(Debug, Default, PartialEq)]
        struct One {
            x: u32,
        }
        impl Shaped for One {
            fn shape() -> Shape<Self> {
                Shape::Object(
                    ObjectShape::positional(One::default)
                        .property(Property::new("x", |o: &One| &o.x).setter(|o, v| o.x = v)),
                )
            }
        }
        // [7, "extra", [1]]
        let bytes = [0x93, 0x07, 0xa5, b'e', b'x', b't', b'r', b'a', 0x91, 0x01];
        assert_eq!(decode::<One>(&bytes).unwrap(), One { x: 7 });
    }
}
