//! Async reading and writing.
//!
//! The codec itself never suspends: the streaming reader works over whatever
//! window of bytes is currently buffered, and reports `InsufficientBuffer`
//! when it runs out. The types here own that window and pump it full from an
//! asynchronous byte source between retries.
//!
//! A converter checks a synchronous [`PackReader`]/[`PackWriter`] out of the
//! async wrapper for a bounded run of tokens and hands it back before the
//! next suspension. The check-out is a closure scope, so the "at most one
//! checked-out sub-reader, returned before another is obtained" rule is
//! enforced by the borrow checker rather than at runtime; returning commits
//! the sub-reader's cursor into the cached window.

use std::boxed::Box;
use std::future::poll_fn;
use std::io;
use std::task::{Context as TaskContext, Poll};
use std::vec::Vec;

use crate::convert::Context;
use crate::error::{DecodeError, ReadError, WriteError};
use crate::reader::{PackReader, ReadResult, StreamingReader};
use crate::writer::PackWriter;

/// Pulls more bytes from an asynchronous source into a window.
///
/// `Ok(0)` means the source is exhausted. Implementations for the supported
/// runtimes live in [`crate::future`].
pub trait FetchBytes: Send {
    fn poll_fetch(
        &mut self,
        cx: &mut TaskContext<'_>,
        window: &mut Vec<u8>,
    ) -> Poll<io::Result<usize>>;
}

/// Writes buffered bytes to an asynchronous sink.
pub trait FlushBytes: Send {
    fn poll_write(&mut self, cx: &mut TaskContext<'_>, bytes: &[u8]) -> Poll<io::Result<usize>>;
}

/// Async adapter on the read side: a byte source, a cached window and a
/// cursor into it.
pub struct AsyncPackReader {
    source: Box<dyn FetchBytes>,
    window: Vec<u8>,
    pos: usize,
    eof: bool,
}

/// Consumed prefixes beyond this size are dropped from the window.
const COMPACT_THRESHOLD: usize = 8 * 1024;

impl AsyncPackReader {
    pub fn new(source: impl FetchBytes + 'static) -> Self {
        AsyncPackReader {
            source: Box::new(source),
            window: Vec::new(),
            pos: 0,
            eof: false,
        }
    }

    /// Bytes buffered but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.window.len() - self.pos
    }

    async fn fetch(&mut self) -> Result<usize, ReadError> {
        let AsyncPackReader { source, window, .. } = self;
        let fetched = poll_fn(|cx| source.poll_fetch(cx, window)).await?;
        if fetched == 0 {
            self.eof = true;
        }
        Ok(fetched)
    }

    fn compact(&mut self) {
        if self.pos >= COMPACT_THRESHOLD {
            self.window.drain(..self.pos);
            self.pos = 0;
        }
    }

    /// Fetches until the window holds at least one complete top-level
    /// structure.
    pub async fn buffer_next_structure(&mut self, ctx: &mut Context) -> Result<(), ReadError> {
        self.buffer_next_structures(1, 1, ctx).await.map(|_| ())
    }

    /// Fetches until the window holds between `min` and `max` complete
    /// structures (or the stream ends past `min`). Returns how many are
    /// buffered; bytes past `max` structures stay for the next batch.
    pub async fn buffer_next_structures(
        &mut self,
        min: u32,
        max: u32,
        ctx: &mut Context,
    ) -> Result<u32, ReadError> {
        loop {
            let mut counted = 0;
            {
                let mut probe = StreamingReader::resumable(&self.window[self.pos..], self.eof);
                while counted < max {
                    match probe.try_skip(ctx.max_depth())? {
                        ReadResult::Success(()) => counted += 1,
                        ReadResult::TokenMismatch(code) => {
                            return Err(ReadError::Decode(DecodeError::TokenMismatch {
                                code,
                                expected: "a complete structure",
                            }))
                        }
                        _ => break,
                    }
                }
            }
            if counted >= min {
                return Ok(counted);
            }
            if self.eof {
                return Err(ReadError::Decode(DecodeError::EndOfStream));
            }
            // Every suspension observes cancellation first.
            ctx.check_cancelled()?;
            self.fetch().await?;
        }
    }

    /// Checks a synchronous reader out over the buffered window, runs `f`,
    /// and commits the reader's cursor back on return.
    pub fn with_reader<R>(
        &mut self,
        f: impl FnOnce(&mut PackReader<'_>) -> Result<R, DecodeError>,
    ) -> Result<R, ReadError> {
        let mut reader =
            PackReader::from_streaming(StreamingReader::resumable(&self.window[self.pos..], self.eof));
        let result = f(&mut reader);
        // Commit even on error: decode failures are fatal to the operation,
        // and the cursor then marks how far decoding got.
        self.pos += reader.position();
        self.compact();
        result.map_err(ReadError::Decode)
    }

    /// Buffers the next structure and reads it with `f` in one step.
    pub async fn read_structure<R>(
        &mut self,
        ctx: &mut Context,
        f: impl FnOnce(&mut PackReader<'_>, &mut Context) -> Result<R, DecodeError>,
    ) -> Result<R, ReadError> {
        self.buffer_next_structure(ctx).await?;
        let mut reader =
            PackReader::from_streaming(StreamingReader::resumable(&self.window[self.pos..], self.eof));
        let result = f(&mut reader, ctx);
        self.pos += reader.position();
        self.compact();
        result.map_err(ReadError::Decode)
    }

    /// Buffers enough bytes to decode one token header with `f`. Unlike
    /// [`read_structure`](Self::read_structure) this does not require the
    /// token's children to be buffered, so it is what composite converters
    /// use to read array/map headers before streaming the elements.
    pub async fn read_header<R>(
        &mut self,
        ctx: &mut Context,
        expected: &'static str,
        f: impl Fn(&mut StreamingReader<'_>) -> ReadResult<R>,
    ) -> Result<R, ReadError> {
        loop {
            {
                let mut probe = StreamingReader::resumable(&self.window[self.pos..], self.eof);
                match f(&mut probe) {
                    ReadResult::Success(value) => {
                        self.pos += probe.position();
                        return Ok(value);
                    }
                    ReadResult::TokenMismatch(code) => {
                        return Err(ReadError::Decode(DecodeError::TokenMismatch {
                            code,
                            expected,
                        }))
                    }
                    _ if self.eof => {
                        return Err(ReadError::Decode(DecodeError::EndOfStream))
                    }
                    _ => {}
                }
            }
            ctx.check_cancelled()?;
            self.fetch().await?;
        }
    }
}

/// Async adapter on the write side: converters write synchronously into a
/// cached buffer and yield at explicit flush points.
pub struct AsyncPackWriter {
    sink: Box<dyn FlushBytes>,
    buf: Vec<u8>,
    threshold: usize,
}

/// Default soft limit before `flush_if_appropriate` actually flushes.
const DEFAULT_FLUSH_THRESHOLD: usize = 4 * 1024;

impl AsyncPackWriter {
    pub fn new(sink: impl FlushBytes + 'static) -> Self {
        AsyncPackWriter {
            sink: Box::new(sink),
            buf: Vec::new(),
            threshold: DEFAULT_FLUSH_THRESHOLD,
        }
    }

    pub fn with_flush_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold.max(1);
        self
    }

    /// Bytes accumulated but not yet flushed to the sink.
    pub fn uncommitted_bytes(&self) -> usize {
        self.buf.len()
    }

    /// Checks a synchronous writer out over the cached buffer, runs `f`, and
    /// absorbs the writer's bytes on return.
    pub fn with_writer<R>(&mut self, f: impl FnOnce(&mut PackWriter<'_>) -> R) -> R {
        let mut writer = PackWriter::new(&mut self.buf);
        let result = f(&mut writer);
        drop(writer);
        result
    }

    /// Flushes when the soft limit has been crossed; a cheap no-op otherwise.
    pub async fn flush_if_appropriate(&mut self, ctx: &mut Context) -> Result<(), WriteError> {
        if self.buf.len() >= self.threshold {
            self.flush(ctx).await
        } else {
            Ok(())
        }
    }

    /// Writes everything buffered to the sink.
    pub async fn flush(&mut self, ctx: &mut Context) -> Result<(), WriteError> {
        ctx.check_cancelled_write()?;
        let AsyncPackWriter { sink, buf, .. } = self;
        let mut at = 0;
        while at < buf.len() {
            let written = poll_fn(|cx| sink.poll_write(cx, &buf[at..])).await?;
            if written == 0 {
                return Err(WriteError::Io(io::ErrorKind::WriteZero.into()));
            }
            at += written;
        }
        self.buf.clear();
        Ok(())
    }
}
