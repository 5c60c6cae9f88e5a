//! # Shape-directed MessagePack
//!
//! This crate serializes values to and from the msgpack wire format, driven
//! by *shapes*: data descriptions of a type's structure supplied through the
//! [`Shaped`](shape::Shaped) trait rather than hand-written per-type code.
//!
//! The layers, leaves first:
//!
//! * [`format`] - the msgpack format codes.
//! * [`buffer`] - segmented read views and the scratch/spill write buffer.
//! * [`reader`] - a **non-throwing streaming decoder** returning a tagged
//!   [`ReadResult`](reader::ReadResult) so incomplete input is a retryable
//!   status, not an error, plus a throwing facade for complete buffers.
//! * [`writer`] - token encoding, integers always in their narrowest form.
//! * [`bulk`] - vectorized encode/decode for contiguous primitive spans.
//! * [`convert`] - the converter framework: per-type strategies, a
//!   type-keyed registry with cyclic-type support, object/collection/enum/
//!   union/surrogate/dynamic converters.
//! * [`shape`] - the shape data model consumed when converters are built.
//! * [`aio`] / [`future`] - pump-driven async reading and writing, with
//!   adapters for Tokio, async-std and futures 0.3.
//!
//! # Features
//!
//! * `alloc` - the write path and owned decoding
//! * `std` - converters, shapes, registry, async core
//! * `tokio` / `async-std` / `futures_0_3` - runtime pumps
//! * `log` - trace logging of converter binding and form decisions

#![no_std]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![cfg_attr(docsrs, feature(doc_cfg))]

#[cfg(feature = "std")]
extern crate std;

#[cfg(feature = "alloc")]
#[cfg_attr(test, macro_use)]
extern crate alloc;

pub mod buffer;
pub mod error;
pub mod format;
pub mod reader;
pub mod timestamp;

#[cfg(feature = "alloc")]
pub mod bulk;
#[cfg(feature = "alloc")]
pub mod writer;

#[cfg(feature = "std")]
pub mod aio;
#[cfg(feature = "std")]
pub mod convert;
#[cfg(feature = "std")]
mod pool;
#[cfg(feature = "std")]
pub mod shape;

#[cfg(any(feature = "tokio", feature = "async-std", feature = "futures_0_3"))]
pub mod future;

pub use buffer::{ByteSeq, ByteSink, SeqSlice};
pub use error::DecodeError;
pub use error::WriteError;
pub use format::Code;
pub use reader::{ExtHeader, PackReader, ReadResult, StreamingReader};
pub use timestamp::Timestamp;

#[cfg(feature = "alloc")]
pub use buffer::WriteBuffer;
#[cfg(feature = "alloc")]
pub use writer::PackWriter;

#[cfg(feature = "std")]
pub use aio::{AsyncPackReader, AsyncPackWriter, FetchBytes, FlushBytes};
#[cfg(feature = "std")]
pub use convert::{
    Binary, CancelToken, Context, Converter, Key, MultiDim, Registry, UnusedData, Value, ValueMap,
    DEFAULT_MAX_DEPTH,
};
#[cfg(feature = "std")]
pub use error::ReadError;
#[cfg(feature = "std")]
pub use shape::{
    CaseAlias, DictionaryShape, EnumShape, EnumerableShape, ObjectMode, ObjectShape,
    OptionalShape, Property, Shape, Shaped, SurrogateShape, UnionShape,
};

#[cfg(feature = "std")]
pub(crate) fn rent_spill() -> alloc::vec::Vec<u8> {
    pool::rent()
}

#[cfg(all(feature = "alloc", not(feature = "std")))]
pub(crate) fn rent_spill() -> alloc::vec::Vec<u8> {
    alloc::vec::Vec::new()
}

#[cfg(feature = "std")]
pub(crate) fn return_spill(buf: alloc::vec::Vec<u8>) {
    pool::give_back(buf);
}

#[cfg(all(feature = "alloc", not(feature = "std")))]
pub(crate) fn return_spill(buf: alloc::vec::Vec<u8>) {
    drop(buf);
}

/// Serializes `value` into a fresh byte vector through its shape-bound
/// converter.
#[cfg(feature = "std")]
pub fn to_vec<T: Shaped>(value: &T) -> Result<alloc::vec::Vec<u8>, WriteError> {
    let registry = Registry::global();
    let converter = registry.get::<T>();
    let mut ctx = Context::new(registry);
    let mut out = alloc::vec::Vec::new();
    {
        let mut writer = PackWriter::new(&mut out);
        converter.write(&mut writer, value, &mut ctx)?;
    }
    Ok(out)
}

/// Deserializes one value from a complete buffer.
#[cfg(feature = "std")]
pub fn from_slice<T: Shaped>(bytes: &[u8]) -> Result<T, DecodeError> {
    let registry = Registry::global();
    let converter = registry.get::<T>();
    let mut ctx = Context::new(registry);
    let mut reader = PackReader::new(bytes);
    converter.read(&mut reader, &mut ctx)
}

/// Deserializes one value from a buffered reader, pulling bytes until a
/// complete structure is available.
#[cfg(feature = "std")]
pub fn read_from<T, R>(source: &mut R) -> Result<T, ReadError>
where
    T: Shaped,
    R: std::io::BufRead + ?Sized,
{
    let mut window: alloc::vec::Vec<u8> = alloc::vec::Vec::new();
    loop {
        {
            let mut probe = StreamingReader::resumable(&window[..], false);
            if let ReadResult::Success(()) = probe.try_skip(DEFAULT_MAX_DEPTH)? {
                break;
            }
        }
        let buf = match source.fill_buf() {
            Ok(buf) => buf,
            Err(error) if error.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(error) => return Err(ReadError::Source(error)),
        };
        if buf.is_empty() {
            return Err(ReadError::Decode(DecodeError::EndOfStream));
        }
        let len = buf.len();
        window.extend_from_slice(buf);
        source.consume(len);
    }
    from_slice(&window).map_err(ReadError::Decode)
}

/// Deserializes one value through the async reader.
#[cfg(feature = "std")]
pub async fn read_async<T: Shaped>(reader: &mut AsyncPackReader) -> Result<T, ReadError> {
    let registry = Registry::global();
    let converter = registry.get::<T>();
    let mut ctx = Context::new(registry);
    converter.read_async(reader, &mut ctx).await
}

/// Serializes one value through the async writer and flushes it.
#[cfg(feature = "std")]
pub async fn write_async<T: Shaped>(
    writer: &mut AsyncPackWriter,
    value: &T,
) -> Result<(), WriteError> {
    let registry = Registry::global();
    let converter = registry.get::<T>();
    let mut ctx = Context::new(registry);
    converter.write_async(writer, value, &mut ctx).await?;
    writer.flush(&mut ctx).await
}
