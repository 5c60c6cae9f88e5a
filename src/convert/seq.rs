//! Enumerable, dictionary and multi-dimensional array converters.

use std::any::{Any, TypeId};
use std::boxed::Box;
use std::marker::PhantomData;
use std::sync::Arc;
use std::vec::Vec;

use crate::bulk::BulkElement;
use crate::error::{DecodeError, ReadError, WriteError};
use crate::format;
use crate::reader::PackReader;
use crate::shape::{BindConverter, EnumerableShape, Shape, Shaped};
use crate::writer::PackWriter;

use super::{trace_log, Context, Converter};

/// Elements written synchronously per async batch.
const WRITE_BATCH: usize = 64;

/// Element-wise converter for `Vec<P>`.
pub(crate) struct VecConverter<P: 'static> {
    element: Arc<dyn Converter<P>>,
}

impl<P: 'static> VecConverter<P> {
    pub(crate) fn new(element: Arc<dyn Converter<P>>) -> Self {
        VecConverter { element }
    }
}

#[async_trait::async_trait(?Send)]
impl<P: Send + Sync + 'static> Converter<Vec<P>> for VecConverter<P> {
    fn read(&self, reader: &mut PackReader<'_>, ctx: &mut Context) -> Result<Vec<P>, DecodeError> {
        ctx.descend()?;
        let count = reader.read_array_header()?;
        let mut out = Vec::with_capacity(count as usize);
        for _ in 0..count {
            ctx.check_cancelled()?;
            out.push(self.element.read(reader, ctx)?);
        }
        ctx.ascend();
        Ok(out)
    }

    fn write(
        &self,
        writer: &mut PackWriter<'_>,
        value: &Vec<P>,
        ctx: &mut Context,
    ) -> Result<(), WriteError> {
        ctx.descend_write()?;
        writer.write_array_header(value.len() as u32);
        for item in value {
            ctx.check_cancelled_write()?;
            self.element.write(writer, item, ctx)?;
        }
        ctx.ascend();
        Ok(())
    }

    fn prefers_async(&self) -> bool {
        self.element.prefers_async()
    }

    /// Batches synchronous element reads between buffer refills instead of
    /// buffering the whole array up front.
    async fn read_async(
        &self,
        reader: &mut crate::aio::AsyncPackReader,
        ctx: &mut Context,
    ) -> Result<Vec<P>, ReadError> {
        ctx.descend()?;
        let count = reader
            .read_header(ctx, "an array", |sr| sr.try_read_array_header())
            .await?;
        let mut out = Vec::new();
        let mut remaining = count;
        if self.element.prefers_async() {
            while remaining > 0 {
                ctx.check_cancelled()?;
                out.push(self.element.read_async(reader, ctx).await?);
                remaining -= 1;
            }
        } else {
            while remaining > 0 {
                let batch = reader.buffer_next_structures(1, remaining, ctx).await?;
                reader.with_reader(|r| {
                    for _ in 0..batch {
                        ctx.check_cancelled()?;
                        out.push(self.element.read(r, ctx)?);
                    }
                    Ok(())
                })?;
                remaining -= batch;
            }
        }
        ctx.ascend();
        Ok(out)
    }

    async fn write_async(
        &self,
        writer: &mut crate::aio::AsyncPackWriter,
        value: &Vec<P>,
        ctx: &mut Context,
    ) -> Result<(), WriteError> {
        ctx.descend_write()?;
        writer.with_writer(|w| w.write_array_header(value.len() as u32));
        if self.element.prefers_async() {
            for item in value {
                ctx.check_cancelled_write()?;
                self.element.write_async(writer, item, ctx).await?;
                writer.flush_if_appropriate(ctx).await?;
            }
        } else {
            for chunk in value.chunks(WRITE_BATCH) {
                ctx.check_cancelled_write()?;
                writer.with_writer(|w| -> Result<(), WriteError> {
                    for item in chunk {
                        self.element.write(w, item, ctx)?;
                    }
                    Ok(())
                })?;
                writer.flush_if_appropriate(ctx).await?;
            }
        }
        ctx.ascend();
        Ok(())
    }

    async fn skip_to_index_value(
        &self,
        reader: &mut crate::aio::AsyncPackReader,
        index: u32,
        ctx: &mut Context,
    ) -> Result<bool, ReadError> {
        let count = reader
            .read_header(ctx, "an array", |sr| sr.try_read_array_header())
            .await?;
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

/// Bulk converter for `Vec<P>` where `P` has contiguous primitive storage.
///
/// The span is fed to the bulk codec one batch at a time so a wire-declared
/// element count, however large, cannot run past a cancellation signal by
/// more than one batch.
struct BulkVecConverter<P: 'static> {
    _marker: PhantomData<fn() -> P>,
}

/// Elements per bulk batch between cancellation checks.
const BULK_BATCH: usize = 4096;

impl<P: BulkElement> Converter<Vec<P>> for BulkVecConverter<P> {
    fn read(&self, reader: &mut PackReader<'_>, ctx: &mut Context) -> Result<Vec<P>, DecodeError> {
        ctx.descend()?;
        let mut left = reader.read_array_header()? as usize;
        let mut out = Vec::with_capacity(left);
        while left > 0 {
            ctx.check_cancelled()?;
            let take = left.min(BULK_BATCH);
            P::read_bulk(reader, take, &mut out)?;
            left -= take;
        }
        ctx.ascend();
        Ok(out)
    }

    fn write(
        &self,
        writer: &mut PackWriter<'_>,
        value: &Vec<P>,
        ctx: &mut Context,
    ) -> Result<(), WriteError> {
        ctx.descend_write()?;
        writer.write_array_header(value.len() as u32);
        for chunk in value.chunks(BULK_BATCH) {
            ctx.check_cancelled_write()?;
            P::write_bulk(writer, chunk);
        }
        ctx.ascend();
        Ok(())
    }
}

/// The bulk converter for `Vec<P>`, when `P` is one of the bulk primitives.
///
/// Selection is by type identity: without specialization, the generic
/// `Vec<P>` shape cannot name a `BulkElement` bound, so the concrete
/// converter is built for the matching primitive and converted back through
/// `Any`.
pub(crate) fn bulk_vec_converter<P: 'static>() -> Option<Arc<dyn Converter<Vec<P>>>> {
    macro_rules! try_bulk {
        ($($prim:ty),+) => {$(
            if TypeId::of::<P>() == TypeId::of::<$prim>() {
                let converter: Arc<dyn Converter<Vec<$prim>>> =
                    Arc::new(BulkVecConverter::<$prim> { _marker: PhantomData });
                let any: Box<dyn Any> = Box::new(converter);
                if let Ok(typed) = any.downcast::<Arc<dyn Converter<Vec<P>>>>() {
                    trace_log!("bulk codec selected for Vec<{}>", std::any::type_name::<$prim>());
                    return Some(*typed);
                }
            }
        )+};
    }
    try_bulk!(bool, u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);
    None
}

/// Converter for enumerables backed by an arbitrary collection.
pub(crate) struct IterEnumerableConverter<T: 'static, P: 'static> {
    element: Arc<dyn Converter<P>>,
    iter: for<'x> fn(&'x T) -> Box<dyn Iterator<Item = &'x P> + 'x>,
    len: Option<fn(&T) -> usize>,
    build: fn(Vec<P>) -> T,
}

impl<T: 'static, P: 'static> IterEnumerableConverter<T, P> {
    pub(crate) fn new(
        element: Arc<dyn Converter<P>>,
        iter: for<'x> fn(&'x T) -> Box<dyn Iterator<Item = &'x P> + 'x>,
        len: Option<fn(&T) -> usize>,
        build: fn(Vec<P>) -> T,
    ) -> Self {
        IterEnumerableConverter { element, iter, len, build }
    }
}

impl<T: Send + Sync + 'static, P: Send + Sync + 'static> Converter<T>
    for IterEnumerableConverter<T, P>
{
    fn read(&self, reader: &mut PackReader<'_>, ctx: &mut Context) -> Result<T, DecodeError> {
        ctx.descend()?;
        let count = reader.read_array_header()?;
        let mut elements = Vec::with_capacity(count as usize);
        for _ in 0..count {
            ctx.check_cancelled()?;
            elements.push(self.element.read(reader, ctx)?);
        }
        ctx.ascend();
        Ok((self.build)(elements))
    }

    fn write(
        &self,
        writer: &mut PackWriter<'_>,
        value: &T,
        ctx: &mut Context,
    ) -> Result<(), WriteError> {
        ctx.descend_write()?;
        match self.len {
            // The count is cheap: write the header and stream.
            Some(len) => {
                writer.write_array_header(len(value) as u32);
                for item in (self.iter)(value) {
                    ctx.check_cancelled_write()?;
                    self.element.write(writer, item, ctx)?;
                }
            }
            // Unknown count: materialize first, then write.
            None => {
                let items: Vec<&P> = (self.iter)(value).collect();
                writer.write_array_header(items.len() as u32);
                for item in items {
                    ctx.check_cancelled_write()?;
                    self.element.write(writer, item, ctx)?;
                }
            }
        }
        ctx.ascend();
        Ok(())
    }

    fn prefers_async(&self) -> bool {
        self.element.prefers_async()
    }
}

/// Converter for key-value collections.
pub(crate) struct DictionaryConverter<T: 'static, K: 'static, V: 'static> {
    key: Arc<dyn Converter<K>>,
    value: Arc<dyn Converter<V>>,
    iter: for<'x> fn(&'x T) -> Box<dyn Iterator<Item = (&'x K, &'x V)> + 'x>,
    len: fn(&T) -> usize,
    build: fn(Vec<(K, V)>) -> T,
}

impl<T: 'static, K: 'static, V: 'static> DictionaryConverter<T, K, V> {
    pub(crate) fn new(
        key: Arc<dyn Converter<K>>,
        value: Arc<dyn Converter<V>>,
        iter: for<'x> fn(&'x T) -> Box<dyn Iterator<Item = (&'x K, &'x V)> + 'x>,
        len: fn(&T) -> usize,
        build: fn(Vec<(K, V)>) -> T,
    ) -> Self {
        DictionaryConverter { key, value, iter, len, build }
    }
}

impl<T, K, V> Converter<T> for DictionaryConverter<T, K, V>
where
    T: Send + Sync + 'static,
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn read(&self, reader: &mut PackReader<'_>, ctx: &mut Context) -> Result<T, DecodeError> {
        ctx.descend()?;
        let count = reader.read_map_header()?;
        let mut pairs = Vec::with_capacity(count as usize);
        for _ in 0..count {
            ctx.check_cancelled()?;
            if reader.peek_code()?.0 == format::NIL {
                return Err(DecodeError::NullKey);
            }
            let key = self.key.read(reader, ctx)?;
            let value = self.value.read(reader, ctx)?;
            pairs.push((key, value));
        }
        ctx.ascend();
        Ok((self.build)(pairs))
    }

    fn write(
        &self,
        writer: &mut PackWriter<'_>,
        value: &T,
        ctx: &mut Context,
    ) -> Result<(), WriteError> {
        ctx.descend_write()?;
        writer.write_map_header((self.len)(value) as u32);
        for (k, v) in (self.iter)(value) {
            ctx.check_cancelled_write()?;
            self.key.write(writer, k, ctx)?;
            self.value.write(writer, v, ctx)?;
        }
        ctx.ascend();
        Ok(())
    }
}

/// A rank-`R` rectangular array, stored flat in row-major order.
///
/// On the wire: `[[dim0, dim1, …], [elements…]]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MultiDim<P, const R: usize> {
    dims: [u32; R],
    elements: Vec<P>,
}

impl<P, const R: usize> MultiDim<P, R> {
    /// `None` unless the element count equals the product of `dims`.
    pub fn new(dims: [u32; R], elements: Vec<P>) -> Option<Self> {
        let expected = dims.iter().map(|&d| d as usize).product::<usize>();
        if elements.len() == expected {
            Some(MultiDim { dims, elements })
        } else {
            None
        }
    }

    pub fn dims(&self) -> [u32; R] {
        self.dims
    }

    pub fn elements(&self) -> &[P] {
        &self.elements
    }

    pub fn into_elements(self) -> Vec<P> {
        self.elements
    }
}

struct MultiDimConverter<P: 'static, const R: usize> {
    element: Arc<dyn Converter<P>>,
}

impl<P: Send + Sync + 'static, const R: usize> Converter<MultiDim<P, R>>
    for MultiDimConverter<P, R>
{
    fn read(
        &self,
        reader: &mut PackReader<'_>,
        ctx: &mut Context,
    ) -> Result<MultiDim<P, R>, DecodeError> {
        ctx.descend()?;
        let code = reader.peek_code()?;
        if reader.read_array_header()? != 2 {
            return Err(DecodeError::TokenMismatch { code, expected: "a [dims, elements] pair" });
        }
        let rank_code = reader.peek_code()?;
        if reader.read_array_header()? != R as u32 {
            return Err(DecodeError::TokenMismatch {
                code: rank_code,
                expected: "a dimension list of the converter's rank",
            });
        }
        let mut dims = [0u32; R];
        for dim in dims.iter_mut() {
            *dim = reader.read_u32()?;
        }
        let expected = dims.iter().map(|&d| d as usize).product::<usize>();
        let elements_code = reader.peek_code()?;
        let count = reader.read_array_header()? as usize;
        if count != expected {
            return Err(DecodeError::TokenMismatch {
                code: elements_code,
                expected: "an element count matching the dimensions",
            });
        }
        let mut elements = Vec::with_capacity(count);
        for _ in 0..count {
            ctx.check_cancelled()?;
            elements.push(self.element.read(reader, ctx)?);
        }
        ctx.ascend();
        Ok(MultiDim { dims, elements })
    }

    fn write(
        &self,
        writer: &mut PackWriter<'_>,
        value: &MultiDim<P, R>,
        ctx: &mut Context,
    ) -> Result<(), WriteError> {
        ctx.descend_write()?;
        writer.write_array_header(2);
        writer.write_array_header(R as u32);
        for &dim in &value.dims {
            writer.write_u32(dim);
        }
        writer.write_array_header(value.elements.len() as u32);
        for item in &value.elements {
            ctx.check_cancelled_write()?;
            self.element.write(writer, item, ctx)?;
        }
        ctx.ascend();
        Ok(())
    }
}

struct MultiDimDef<P: 'static, const R: usize>(PhantomData<fn() -> P>);

impl<P: Shaped, const R: usize> BindConverter<MultiDim<P, R>> for MultiDimDef<P, R> {
    fn bind(&self, registry: &crate::convert::Registry) -> Arc<dyn Converter<MultiDim<P, R>>> {
        Arc::new(MultiDimConverter::<P, R> { element: registry.get::<P>() })
    }
}

impl<P: Shaped, const R: usize> Shaped for MultiDim<P, R> {
    fn shape() -> Shape<Self> {
        Shape::Enumerable(EnumerableShape { def: Box::new(MultiDimDef::<P, R>(PhantomData)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::Registry;
    use alloc::string::String;

    fn roundtrip<T: Shaped + PartialEq + core::fmt::Debug>(value: T) -> Vec<u8> {
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
        bytes
    }

    #[test]
    fn bool_vec_takes_bulk_path() {
        let bytes = roundtrip(alloc::vec![true, false, true, true, false]);
        assert_eq!(bytes, [0x95, 0xc3, 0xc2, 0xc3, 0xc3, 0xc2]);
    }

    #[test]
    fn i32_vec_bulk_roundtrip() {
        let mut values = Vec::new();
        for i in -50i32..50 {
            values.push(i * 1000);
        }
        roundtrip(values);
    }

    #[test]
    fn nested_vec_respects_depth() {
        let registry = Arc::new(Registry::new());
        let converter = registry.get::<Vec<Vec<u8>>>();
        let mut ctx = Context::new(registry).with_max_depth(1);
        let value = alloc::vec![alloc::vec![1u8]];
        let mut bytes = Vec::new();
        let mut writer = PackWriter::new(&mut bytes);
        let result = converter.write(&mut writer, &value, &mut ctx);
        assert!(matches!(result, Err(WriteError::DepthExceeded { max: 1 })));
    }

    #[test]
    fn dictionary_null_key_is_fatal() {
        let registry = Arc::new(Registry::new());
        let converter = registry.get::<std::collections::HashMap<String, u8>>();
        let mut ctx = Context::new(registry);
        // {nil: 1}
        let bytes = [0x81u8, 0xc0, 0x01];
        let mut reader = PackReader::new(&bytes[..]);
        assert!(matches!(
            converter.read(&mut reader, &mut ctx),
            Err(DecodeError::NullKey)
        ));
    }

    #[test]
    fn multidim_layout() {
        let grid = MultiDim::<u8, 2>::new([2, 3], alloc::vec![1, 2, 3, 4, 5, 6]).unwrap();
        let bytes = roundtrip(grid);
        // [[2, 3], [1, 2, 3, 4, 5, 6]]
        assert_eq!(bytes, [0x92, 0x92, 0x02, 0x03, 0x96, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn multidim_rejects_wrong_element_count() {
        assert!(MultiDim::<u8, 1>::new([3], alloc::vec![1, 2]).is_none());
    }

    #[test]
    fn cancellation_observed_on_bulk_write() {
        let registry = Arc::new(Registry::new());
        let converter = registry.get::<Vec<bool>>();
        let mut ctx = Context::new(registry);
        ctx.cancel_token().cancel();
        let value = alloc::vec![true; 100];
        let mut bytes = Vec::new();
        let mut writer = PackWriter::new(&mut bytes);
        assert!(matches!(
            converter.write(&mut writer, &value, &mut ctx),
            Err(WriteError::Cancelled)
        ));
    }

    #[test]
    fn cancellation_observed_on_bulk_read() {
        let registry = Arc::new(Registry::new());
        let converter = registry.get::<Vec<bool>>();
        let mut ctx = Context::new(registry.clone());
        let bytes = {
            let mut bytes = Vec::new();
            let mut writer = PackWriter::new(&mut bytes);
            converter
                .write(&mut writer, &alloc::vec![false; 50], &mut ctx)
                .unwrap();
            drop(writer);
            bytes
        };
        ctx.cancel_token().cancel();
        let mut reader = PackReader::new(&bytes[..]);
        assert!(matches!(
            converter.read(&mut reader, &mut ctx),
            Err(DecodeError::Cancelled)
        ));
    }

    #[test]
    fn bulk_batching_spans_batch_boundary() {
        // More elements than one cancellation batch; output must be
        // identical to the unbatched element-wise encoding.
        let mut values = Vec::new();
        for i in 0..(super::BULK_BATCH + 37) {
            values.push(i as u32 % 300);
        }
        roundtrip(values);
    }

    #[test]
    fn cancellation_stops_element_loop() {
        let registry = Arc::new(Registry::new());
        let converter = registry.get::<Vec<String>>();
        let mut ctx = Context::new(registry);
        ctx.cancel_token().cancel();
        let value = alloc::vec![String::from("a")];
        let mut bytes = Vec::new();
        let mut writer = PackWriter::new(&mut bytes);
        assert!(matches!(
            converter.write(&mut writer, &value, &mut ctx),
            Err(WriteError::Cancelled)
        ));
    }
}
