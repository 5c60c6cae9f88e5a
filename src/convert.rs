//! The converter framework.
//!
//! A [`Converter<T>`] is a stateless, shareable strategy for one user type:
//! synchronous read/write against the primitive codec, asynchronous
//! counterparts that cooperate with the pump-driven adapters in
//! [`crate::aio`], and a couple of optional capabilities (async preference,
//! partial-deserialization skips). Converters for composite types are built
//! from [shapes](crate::shape) by the [`Registry`] and hold their element
//! converters directly, so a bound converter never consults the shape again.

mod dynamic;
mod enums;
mod object;
mod primitives;
mod registry;
mod seq;
mod surrogate;
mod union;

pub use dynamic::{Key, Value, ValueMap};
pub use object::UnusedData;
pub use primitives::Binary;
pub use registry::Registry;
pub use seq::MultiDim;

pub(crate) use primitives::OptionConverter;
pub(crate) use seq::{bulk_vec_converter, DictionaryConverter, IterEnumerableConverter, VecConverter};
pub(crate) use surrogate::SurrogateConverter;

use std::boxed::Box;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::aio::{AsyncPackReader, AsyncPackWriter};
use crate::error::{DecodeError, ReadError, WriteError};
use crate::reader::PackReader;
use crate::writer::PackWriter;

pub(crate) type BoxFut<'a, T> = Pin<Box<dyn core::future::Future<Output = T> + 'a>>;

/// Trace-logs through the `log` crate when the feature is on.
macro_rules! trace_log {
    ($($arg:tt)*) => {
        #[cfg(feature = "log")]
        log::trace!($($arg)*);
    };
}
pub(crate) use trace_log;

/// Default maximum nesting depth.
pub const DEFAULT_MAX_DEPTH: u32 = 64;

/// A cooperative cancellation flag shared between the caller and a running
/// (de)serialization.
#[derive(Clone, Default, Debug)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// State threaded through one (de)serialization: depth accounting against a
/// configurable budget, the cancellation token, and access to the registry
/// for converters that dispatch on runtime types.
pub struct Context {
    registry: Arc<Registry>,
    cancel: CancelToken,
    max_depth: u32,
    depth: u32,
}

impl Context {
    pub fn new(registry: Arc<Registry>) -> Self {
        Context {
            registry,
            cancel: CancelToken::new(),
            max_depth: DEFAULT_MAX_DEPTH,
            depth: 0,
        }
    }

    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// Depth budget left for streaming skips at the current nesting level.
    pub fn remaining_depth(&self) -> u32 {
        self.max_depth - self.depth
    }

    /// Enters one nesting level; composite converters call this before
    /// descending into children and [`ascend`](Context::ascend) after.
    pub fn descend(&mut self) -> Result<(), DecodeError> {
        if self.depth >= self.max_depth {
            Err(DecodeError::DepthExceeded { max: self.max_depth })
        } else {
            self.depth += 1;
            Ok(())
        }
    }

    pub(crate) fn descend_write(&mut self) -> Result<(), WriteError> {
        if self.depth >= self.max_depth {
            Err(WriteError::DepthExceeded { max: self.max_depth })
        } else {
            self.depth += 1;
            Ok(())
        }
    }

    pub fn ascend(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub fn check_cancelled(&self) -> Result<(), DecodeError> {
        if self.cancel.is_cancelled() {
            Err(DecodeError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub(crate) fn check_cancelled_write(&self) -> Result<(), WriteError> {
        if self.cancel.is_cancelled() {
            Err(WriteError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::new(Registry::global())
    }
}

/// Strategy for (de)serializing values of type `T`.
///
/// The async methods default to buffering one whole structure and running
/// the synchronous path over it; converters for large or async-preferring
/// shapes override them to interleave work between suspensions.
#[async_trait::async_trait(?Send)]
pub trait Converter<T: 'static>: Send + Sync {
    /// Reads exactly one msgpack value.
    fn read(&self, reader: &mut PackReader<'_>, ctx: &mut Context) -> Result<T, DecodeError>;

    /// Writes exactly one msgpack value.
    fn write(&self, writer: &mut PackWriter<'_>, value: &T, ctx: &mut Context)
        -> Result<(), WriteError>;

    /// Hints that the async path is worth taking for this type, e.g. because
    /// payloads tend to be large or an element type is async-only.
    fn prefers_async(&self) -> bool {
        false
    }

    async fn read_async(
        &self,
        reader: &mut AsyncPackReader,
        ctx: &mut Context,
    ) -> Result<T, ReadError> {
        reader.read_structure(ctx, |r, ctx| self.read(r, ctx)).await
    }

    async fn write_async(
        &self,
        writer: &mut AsyncPackWriter,
        value: &T,
        ctx: &mut Context,
    ) -> Result<(), WriteError> {
        writer.with_writer(|w| self.write(w, value, ctx))?;
        writer.flush_if_appropriate(ctx).await
    }

    /// Positions the reader at element `index` of an array-encoded value,
    /// skipping everything before it. `Ok(false)` when unsupported for this
    /// shape or the index is absent.
    async fn skip_to_index_value(
        &self,
        _reader: &mut AsyncPackReader,
        _index: u32,
        _ctx: &mut Context,
    ) -> Result<bool, ReadError> {
        Ok(false)
    }

    /// Positions the reader at the value of property `name` of a map- or
    /// array-encoded object. `Ok(false)` when unsupported or absent.
    async fn skip_to_property_value(
        &self,
        _reader: &mut AsyncPackReader,
        _name: &str,
        _ctx: &mut Context,
    ) -> Result<bool, ReadError> {
        Ok(false)
    }

    /// Hook for a reference-preserving wrapper; the identity by default.
    fn wrap_with_reference_preservation(self: Arc<Self>) -> Arc<dyn Converter<T>>
    where
        Self: Sized + 'static,
    {
        self
    }
}
