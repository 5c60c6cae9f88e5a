//! Surrogate conversion: encode a type through an intermediate
//! representation whose wire form is fundamentally different.

use std::sync::Arc;

use crate::error::{DecodeError, WriteError};
use crate::reader::PackReader;
use crate::writer::PackWriter;

use super::{Context, Converter};

pub(crate) struct SurrogateConverter<T: 'static, S: 'static> {
    inner: Arc<dyn Converter<S>>,
    to: fn(&T) -> S,
    from: fn(S) -> T,
}

impl<T: 'static, S: 'static> SurrogateConverter<T, S> {
    pub(crate) fn new(inner: Arc<dyn Converter<S>>, to: fn(&T) -> S, from: fn(S) -> T) -> Self {
        SurrogateConverter { inner, to, from }
    }
}

impl<T, S> Converter<T> for SurrogateConverter<T, S>
where
    T: Send + Sync + 'static,
    S: Send + Sync + 'static,
{
    fn read(&self, reader: &mut PackReader<'_>, ctx: &mut Context) -> Result<T, DecodeError> {
        self.inner.read(reader, ctx).map(self.from)
    }

    fn write(
        &self,
        writer: &mut PackWriter<'_>,
        value: &T,
        ctx: &mut Context,
    ) -> Result<(), WriteError> {
        let surrogate = (self.to)(value);
        self.inner.write(writer, &surrogate, ctx)
    }

    fn prefers_async(&self) -> bool {
        self.inner.prefers_async()
    }
}
