//! Runtime adapters connecting buffered async IO to the codec's pumps.
//!
//! Each supported runtime gets a pair of thin wrappers: a [`FetchBytes`]
//! impl over its buffered reader and a [`FlushBytes`] impl over its writer.
//! The wrappers are stamped from one macro since the three runtimes expose
//! the same `poll_fill_buf`/`consume`/`poll_write` surface.

use std::io;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};
use std::vec::Vec;

use crate::aio::{AsyncPackReader, AsyncPackWriter, FetchBytes, FlushBytes};

#[cfg(feature = "async-std")]
use actual_async_std as async_std;
#[cfg(feature = "tokio")]
use actual_tokio as tokio;

macro_rules! impl_pump {
    (
        $source:ident, $read_trait:path,
        $sink:ident, $write_trait:path,
        $from_reader:ident, $from_writer:ident
    ) => {
        /// Pumps bytes out of a buffered runtime reader.
        pub struct $source<R> {
            reader: R,
        }

        impl<R> $source<R> {
            pub fn new(reader: R) -> Self {
                $source { reader }
            }

            pub fn into_inner(self) -> R {
                self.reader
            }
        }

        impl<R: $read_trait + Unpin + Send> FetchBytes for $source<R> {
            fn poll_fetch(
                &mut self,
                cx: &mut TaskContext<'_>,
                window: &mut Vec<u8>,
            ) -> Poll<io::Result<usize>> {
                let fetched = match Pin::new(&mut self.reader).poll_fill_buf(cx) {
                    Poll::Ready(Ok(buf)) => {
                        if buf.is_empty() {
                            return Poll::Ready(Ok(0));
                        }
                        window.extend_from_slice(buf);
                        buf.len()
                    }
                    Poll::Ready(Err(error)) => return Poll::Ready(Err(error)),
                    Poll::Pending => return Poll::Pending,
                };
                Pin::new(&mut self.reader).consume(fetched);
                Poll::Ready(Ok(fetched))
            }
        }

        /// Flushes buffered bytes into a runtime writer.
        pub struct $sink<W> {
            writer: W,
        }

        impl<W> $sink<W> {
            pub fn new(writer: W) -> Self {
                $sink { writer }
            }

            pub fn into_inner(self) -> W {
                self.writer
            }
        }

        impl<W: $write_trait + Unpin + Send> FlushBytes for $sink<W> {
            fn poll_write(
                &mut self,
                cx: &mut TaskContext<'_>,
                bytes: &[u8],
            ) -> Poll<io::Result<usize>> {
                Pin::new(&mut self.writer).poll_write(cx, bytes)
            }
        }

        impl AsyncPackReader {
            pub fn $from_reader<R: $read_trait + Unpin + Send + 'static>(reader: R) -> Self {
                AsyncPackReader::new($source::new(reader))
            }
        }

        impl AsyncPackWriter {
            pub fn $from_writer<W: $write_trait + Unpin + Send + 'static>(writer: W) -> Self {
                AsyncPackWriter::new($sink::new(writer))
            }
        }
    };
}

#[cfg(feature = "tokio")]
impl_pump!(
    TokioSource,
    tokio::io::AsyncBufRead,
    TokioSink,
    tokio::io::AsyncWrite,
    from_tokio,
    into_tokio
);

#[cfg(feature = "async-std")]
impl_pump!(
    AsyncStdSource,
    async_std::io::BufRead,
    AsyncStdSink,
    async_std::io::Write,
    from_async_std,
    into_async_std
);

#[cfg(feature = "futures_0_3")]
impl_pump!(
    Futures0Dot3Source,
    futures_io_0_3::AsyncBufRead,
    Futures0Dot3Sink,
    futures_io_0_3::AsyncWrite,
    from_futures_0_3,
    into_futures_0_3
);
