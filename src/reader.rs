//! Streaming msgpack decoding.
//!
//! The decoder comes in two layers. [`StreamingReader`] never fails on
//! incomplete input: every operation returns a [`ReadResult`] and leaves the
//! cursor untouched unless it returns `Success`, so a caller holding a
//! partial buffer can fetch more bytes and retry the identical call.
//! [`PackReader`] is the thin facade for buffers known to be complete; it
//! turns the retryable statuses into errors.

use crate::buffer::{ByteSeq, SeqCursor, SeqSlice};
use crate::error::DecodeError;
use crate::format::{self, Code};
use crate::timestamp::Timestamp;

/// Outcome of one streaming decode operation.
///
/// `EmptyBuffer` and `InsufficientBuffer` both mean "feed me more bytes and
/// retry"; they are distinguished so that pumps can tell a clean boundary
/// between values from a token cut in half.
#[must_use]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReadResult<T> {
    /// Token decoded; the cursor advanced past it.
    Success(T),
    /// Zero bytes were available at the cursor.
    EmptyBuffer,
    /// The token is longer than the bytes available; cursor unchanged.
    InsufficientBuffer,
    /// The format code cannot satisfy the requested decode; cursor unchanged.
    TokenMismatch(Code),
}

use ReadResult::{EmptyBuffer, InsufficientBuffer, Success, TokenMismatch};

impl<T> ReadResult<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Success(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ReadResult<U> {
        match self {
            Success(value) => Success(f(value)),
            EmptyBuffer => EmptyBuffer,
            InsufficientBuffer => InsufficientBuffer,
            TokenMismatch(code) => TokenMismatch(code),
        }
    }

    /// Re-tags a non-success status with another value type.
    pub(crate) fn forward<U>(self) -> ReadResult<U> {
        match self {
            Success(_) => unreachable!("forwarding a successful read"),
            EmptyBuffer => EmptyBuffer,
            InsufficientBuffer => InsufficientBuffer,
            TokenMismatch(code) => TokenMismatch(code),
        }
    }
}

/// Early-returns the non-success branches of a [`ReadResult`] expression.
macro_rules! try_read {
    ($expr:expr) => {
        match $expr {
            ReadResult::Success(value) => value,
            other => return other.forward(),
        }
    };
}

/// An integer token as it appeared on the wire, before widening.
#[derive(Copy, Clone, Debug)]
pub(crate) enum RawInt {
    Pos(u64),
    Neg(i64),
}

/// Header of an extension token.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ExtHeader {
    pub type_code: i8,
    pub len: u32,
}

/// Non-throwing decoder over a (possibly segmented, possibly incomplete)
/// buffer.
///
/// The reader is `Copy`: multi-byte operations decode on a probe copy and
/// commit it back only on success, which is what makes retries idempotent.
#[derive(Copy, Clone, Debug)]
pub struct StreamingReader<'a> {
    cursor: SeqCursor<'a>,
    end_of_stream: bool,
}

impl<'a> StreamingReader<'a> {
    /// Reader over a complete buffer.
    pub fn new(bytes: impl Into<ByteSeq<'a>>) -> Self {
        StreamingReader {
            cursor: SeqCursor::new(bytes.into()),
            end_of_stream: true,
        }
    }

    /// Reader over a window that may grow: `end_of_stream` says whether the
    /// byte source can produce more after this buffer.
    pub fn resumable(bytes: impl Into<ByteSeq<'a>>, end_of_stream: bool) -> Self {
        StreamingReader {
            cursor: SeqCursor::new(bytes.into()),
            end_of_stream,
        }
    }

    pub fn remaining(&self) -> usize {
        self.cursor.remaining()
    }

    /// Bytes consumed since construction.
    pub fn position(&self) -> usize {
        self.cursor.position()
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    /// The next `len` bytes as one slice, when contiguous in the underlying
    /// storage. Bulk decoders use this to process a whole run in place.
    pub(crate) fn peek_contiguous(&self, len: usize) -> Option<&'a [u8]> {
        self.cursor.peek_contiguous(len)
    }

    /// Advances past bytes a bulk decoder consumed out-of-band.
    pub(crate) fn advance_bytes(&mut self, n: usize) {
        self.cursor.advance(n);
    }

    /// `EmptyBuffer` or `InsufficientBuffer` depending on whether any bytes
    /// remain at the (unmoved) cursor.
    fn shortfall<T>(&self) -> ReadResult<T> {
        if self.cursor.remaining() == 0 {
            EmptyBuffer
        } else {
            InsufficientBuffer
        }
    }

    pub fn try_peek_code(&self) -> ReadResult<Code> {
        match self.cursor.peek_byte() {
            Some(byte) => Success(Code(byte)),
            None => EmptyBuffer,
        }
    }

    /// Consumes a format code plus its fixed-size big-endian payload. The
    /// caller has already peeked the code; the cursor moves only when the
    /// payload is fully present.
    fn take_be<const N: usize>(&mut self) -> ReadResult<[u8; N]> {
        let mut probe = self.cursor;
        probe.advance(1);
        match probe.peek_array::<N>() {
            Some(bytes) => {
                probe.advance(N);
                self.cursor = probe;
                Success(bytes)
            }
            None => self.shortfall(),
        }
    }

    pub fn try_read_nil(&mut self) -> ReadResult<()> {
        let code = try_read!(self.try_peek_code());
        if code.0 == format::NIL {
            self.cursor.advance(1);
            Success(())
        } else {
            TokenMismatch(code)
        }
    }

    pub fn try_read_bool(&mut self) -> ReadResult<bool> {
        let code = try_read!(self.try_peek_code());
        match code.0 {
            format::TRUE => {
                self.cursor.advance(1);
                Success(true)
            }
            format::FALSE => {
                self.cursor.advance(1);
                Success(false)
            }
            _ => TokenMismatch(code),
        }
    }

    pub fn try_read_array_header(&mut self) -> ReadResult<u32> {
        let code = try_read!(self.try_peek_code());
        if code.is_fixarray() {
            self.cursor.advance(1);
            return Success(code.fix_len());
        }
        match code.0 {
            format::ARRAY16 => self.take_be::<2>().map(|raw| u16::from_be_bytes(raw) as u32),
            format::ARRAY32 => self.take_be::<4>().map(u32::from_be_bytes),
            _ => TokenMismatch(code),
        }
    }

    pub fn try_read_map_header(&mut self) -> ReadResult<u32> {
        let code = try_read!(self.try_peek_code());
        if code.is_fixmap() {
            self.cursor.advance(1);
            return Success(code.fix_len());
        }
        match code.0 {
            format::MAP16 => self.take_be::<2>().map(|raw| u16::from_be_bytes(raw) as u32),
            format::MAP32 => self.take_be::<4>().map(u32::from_be_bytes),
            _ => TokenMismatch(code),
        }
    }

    pub(crate) fn try_read_raw_int(&mut self) -> ReadResult<RawInt> {
        let code = try_read!(self.try_peek_code());
        match code.0 {
            0x00..=0x7f => {
                self.cursor.advance(1);
                Success(RawInt::Pos(code.0 as u64))
            }
            0xe0..=0xff => {
                self.cursor.advance(1);
                Success(RawInt::Neg(code.0 as i8 as i64))
            }
            format::UINT8 => self.take_be::<1>().map(|raw| RawInt::Pos(raw[0] as u64)),
            format::UINT16 => self
                .take_be::<2>()
                .map(|raw| RawInt::Pos(u16::from_be_bytes(raw) as u64)),
            format::UINT32 => self
                .take_be::<4>()
                .map(|raw| RawInt::Pos(u32::from_be_bytes(raw) as u64)),
            format::UINT64 => self.take_be::<8>().map(|raw| RawInt::Pos(u64::from_be_bytes(raw))),
            format::INT8 => self.take_be::<1>().map(|raw| RawInt::Neg(raw[0] as i8 as i64)),
            format::INT16 => self
                .take_be::<2>()
                .map(|raw| RawInt::Neg(i16::from_be_bytes(raw) as i64)),
            format::INT32 => self
                .take_be::<4>()
                .map(|raw| RawInt::Neg(i32::from_be_bytes(raw) as i64)),
            format::INT64 => self.take_be::<8>().map(|raw| RawInt::Neg(i64::from_be_bytes(raw))),
            _ => TokenMismatch(code),
        }
    }

    pub fn try_read_f32(&mut self) -> ReadResult<f32> {
        let code = try_read!(self.try_peek_code());
        match code.0 {
            format::FLOAT32 => self.take_be::<4>().map(f32::from_be_bytes),
            _ => TokenMismatch(code),
        }
    }

    /// Reads a float64, widening float32 and integer encodings.
    pub fn try_read_f64(&mut self) -> ReadResult<f64> {
        let code = try_read!(self.try_peek_code());
        match code.0 {
            format::FLOAT32 => self.take_be::<4>().map(|raw| f32::from_be_bytes(raw) as f64),
            format::FLOAT64 => self.take_be::<8>().map(f64::from_be_bytes),
            _ if code.is_int_family() => self.try_read_raw_int().map(|raw| match raw {
                RawInt::Pos(value) => value as f64,
                RawInt::Neg(value) => value as f64,
            }),
            _ => TokenMismatch(code),
        }
    }

    fn try_read_len_prefixed(&mut self, kind: LenKind) -> ReadResult<SeqSlice<'a>> {
        let mut probe = *self;
        let code = try_read!(probe.try_peek_code());
        let len = match kind.header_len(code) {
            Some(HeaderLen::Fix(len)) => {
                probe.cursor.advance(1);
                len as usize
            }
            Some(HeaderLen::Len8) => try_read!(probe.take_be::<1>().map(|raw| raw[0] as usize)),
            Some(HeaderLen::Len16) => {
                try_read!(probe.take_be::<2>().map(|raw| u16::from_be_bytes(raw) as usize))
            }
            Some(HeaderLen::Len32) => {
                try_read!(probe.take_be::<4>().map(|raw| u32::from_be_bytes(raw) as usize))
            }
            None => return TokenMismatch(code),
        };
        match probe.cursor.take(len) {
            Some(slice) => {
                *self = probe;
                Success(slice)
            }
            None => self.shortfall(),
        }
    }

    /// Reads a string token, returning its UTF-8 payload bytes.
    pub fn try_read_str(&mut self) -> ReadResult<SeqSlice<'a>> {
        self.try_read_len_prefixed(LenKind::Str)
    }

    /// Reads a binary token, returning its payload bytes.
    pub fn try_read_bin(&mut self) -> ReadResult<SeqSlice<'a>> {
        self.try_read_len_prefixed(LenKind::Bin)
    }

    /// Takes `len` bytes with no framing. Used to re-copy payloads whose
    /// length is already known.
    pub fn try_read_raw(&mut self, len: usize) -> ReadResult<SeqSlice<'a>> {
        match self.cursor.take(len) {
            Some(slice) => Success(slice),
            None => self.shortfall(),
        }
    }

    pub fn try_read_ext_header(&mut self) -> ReadResult<ExtHeader> {
        let mut probe = *self;
        let code = try_read!(probe.try_peek_code());
        let len = match code.0 {
            format::FIXEXT1 => 1,
            format::FIXEXT2 => 2,
            format::FIXEXT4 => 4,
            format::FIXEXT8 => 8,
            format::FIXEXT16 => 16,
            format::EXT8 => try_read!(probe.take_be::<1>().map(|raw| raw[0] as u32)),
            format::EXT16 => {
                try_read!(probe.take_be::<2>().map(|raw| u16::from_be_bytes(raw) as u32))
            }
            format::EXT32 => try_read!(probe.take_be::<4>().map(u32::from_be_bytes)),
            _ => return TokenMismatch(code),
        };
        if matches!(code.0, format::FIXEXT1..=format::FIXEXT16) {
            probe.cursor.advance(1);
        }
        // The type code byte follows the length.
        match probe.cursor.peek_byte() {
            Some(byte) => {
                probe.cursor.advance(1);
                *self = probe;
                Success(ExtHeader { type_code: byte as i8, len })
            }
            None => self.shortfall(),
        }
    }

    /// Reads a timestamp extension token.
    ///
    /// The `Err` branch carries layout violations, which no amount of extra
    /// bytes can repair.
    pub fn try_read_timestamp(&mut self) -> Result<ReadResult<Timestamp>, DecodeError> {
        let mut probe = *self;
        let header = match probe.try_read_ext_header() {
            Success(header) => header,
            other => return Ok(other.forward()),
        };
        if header.type_code != format::EXT_TIMESTAMP {
            return Err(DecodeError::InvalidExt {
                type_code: header.type_code,
                len: header.len,
            });
        }
        let payload = match probe.try_read_raw(header.len as usize) {
            Success(payload) => payload,
            other => return Ok(other.forward()),
        };
        let mut raw = [0u8; 12];
        if payload.len() > 12 {
            return Err(DecodeError::InvalidExt {
                type_code: header.type_code,
                len: header.len,
            });
        }
        payload.copy_to(&mut raw[..payload.len()]);
        let ts = Timestamp::decode_payload(&raw[..payload.len()])?;
        *self = probe;
        Ok(Success(ts))
    }

    /// Skips the next value, descending through composites up to
    /// `depth_budget` levels. The cursor moves only when the whole structure
    /// was present.
    pub fn try_skip(&mut self, depth_budget: u32) -> Result<ReadResult<()>, DecodeError> {
        let mut probe = *self;
        match probe.skip_token(depth_budget)? {
            Success(()) => {
                *self = probe;
                Ok(Success(()))
            }
            TokenMismatch(code) => Ok(TokenMismatch(code)),
            _ => Ok(self.shortfall()),
        }
    }

    fn skip_token(&mut self, depth_left: u32) -> Result<ReadResult<()>, DecodeError> {
        let code = match self.try_peek_code() {
            Success(code) => code,
            other => return Ok(other.forward()),
        };
        let fixed_skip = |reader: &mut Self, payload: usize| -> ReadResult<()> {
            let mut probe = reader.cursor;
            if probe.remaining() < 1 + payload {
                return reader.shortfall();
            }
            probe.advance(1 + payload);
            reader.cursor = probe;
            Success(())
        };
        match code.0 {
            0x00..=0x7f | 0xe0..=0xff | format::NIL | format::FALSE | format::TRUE => {
                Ok(fixed_skip(self, 0))
            }
            format::UINT8 | format::INT8 => Ok(fixed_skip(self, 1)),
            format::UINT16 | format::INT16 => Ok(fixed_skip(self, 2)),
            format::UINT32 | format::INT32 | format::FLOAT32 => Ok(fixed_skip(self, 4)),
            format::UINT64 | format::INT64 | format::FLOAT64 => Ok(fixed_skip(self, 8)),
            _ if code.is_str_family() => Ok(self.try_read_str().map(|_| ())),
            _ if code.is_bin_family() => Ok(self.try_read_bin().map(|_| ())),
            _ if code.is_ext_family() => {
                let mut probe = *self;
                let header = match probe.try_read_ext_header() {
                    Success(header) => header,
                    other => return Ok(other.forward()),
                };
                match probe.try_read_raw(header.len as usize) {
                    Success(_) => {
                        *self = probe;
                        Ok(Success(()))
                    }
                    other => Ok(other.forward()),
                }
            }
            _ if code.is_array_family() => {
                let count = match self.try_read_array_header() {
                    Success(count) => count,
                    other => return Ok(other.forward()),
                };
                self.skip_children(count as u64, depth_left)
            }
            _ if code.is_map_family() => {
                let count = match self.try_read_map_header() {
                    Success(count) => count,
                    other => return Ok(other.forward()),
                };
                self.skip_children(2 * count as u64, depth_left)
            }
            _ => Ok(TokenMismatch(code)),
        }
    }

    fn skip_children(&mut self, count: u64, depth_left: u32) -> Result<ReadResult<()>, DecodeError> {
        if depth_left == 0 {
            return Err(DecodeError::DepthExceeded { max: 0 });
        }
        for _ in 0..count {
            match self.skip_token(depth_left - 1)? {
                Success(()) => {}
                other => return Ok(other.forward()),
            }
        }
        Ok(Success(()))
    }

    /// Reads the next whole structure as raw bytes, header included.
    pub fn try_read_raw_structure(
        &mut self,
        depth_budget: u32,
    ) -> Result<ReadResult<SeqSlice<'a>>, DecodeError> {
        let mut probe = *self;
        match probe.try_skip(depth_budget)? {
            Success(()) => {
                let len = probe.position() - self.position();
                let slice = self
                    .cursor
                    .take(len)
                    .expect("skip consumed more bytes than remain");
                Ok(Success(slice))
            }
            other => Ok(other.forward()),
        }
    }
}

#[derive(Copy, Clone)]
enum LenKind {
    Str,
    Bin,
}

enum HeaderLen {
    Fix(u32),
    Len8,
    Len16,
    Len32,
}

impl LenKind {
    fn header_len(self, code: Code) -> Option<HeaderLen> {
        match self {
            LenKind::Str => {
                if code.is_fixstr() {
                    Some(HeaderLen::Fix(code.fix_len()))
                } else {
                    match code.0 {
                        format::STR8 => Some(HeaderLen::Len8),
                        format::STR16 => Some(HeaderLen::Len16),
                        format::STR32 => Some(HeaderLen::Len32),
                        _ => None,
                    }
                }
            }
            LenKind::Bin => match code.0 {
                format::BIN8 => Some(HeaderLen::Len8),
                format::BIN16 => Some(HeaderLen::Len16),
                format::BIN32 => Some(HeaderLen::Len32),
                _ => None,
            },
        }
    }
}

macro_rules! impl_try_read_int {
    ($($fn_name:ident => $ty:ty),+ $(,)?) => {$(
        impl<'a> StreamingReader<'a> {
            /// Reads an integer encoded in any form and converts it, failing
            /// with a mismatch when the value does not fit.
            pub fn $fn_name(&mut self) -> ReadResult<$ty> {
                let mut probe = *self;
                let code = try_read!(probe.try_peek_code());
                let raw = try_read!(probe.try_read_raw_int());
                let converted = match raw {
                    RawInt::Pos(value) => <$ty>::try_from(value).ok(),
                    RawInt::Neg(value) => <$ty>::try_from(value).ok(),
                };
                match converted {
                    Some(value) => {
                        *self = probe;
                        Success(value)
                    }
                    None => TokenMismatch(code),
                }
            }
        }
    )+};
}

impl_try_read_int! {
    try_read_u8 => u8,
    try_read_u16 => u16,
    try_read_u32 => u32,
    try_read_u64 => u64,
    try_read_i8 => i8,
    try_read_i16 => i16,
    try_read_i32 => i32,
    try_read_i64 => i64,
}

/// Throwing facade over [`StreamingReader`] for known-complete buffers.
#[derive(Debug)]
pub struct PackReader<'a> {
    inner: StreamingReader<'a>,
}

fn require<T>(result: ReadResult<T>, expected: &'static str) -> Result<T, DecodeError> {
    match result {
        Success(value) => Ok(value),
        EmptyBuffer | InsufficientBuffer => Err(DecodeError::EndOfStream),
        TokenMismatch(code) => Err(DecodeError::TokenMismatch { code, expected }),
    }
}

/// Integer reads report a mismatch on an integer-family code as a range
/// failure: the token kind was right, the value did not fit.
fn require_int<T>(result: ReadResult<T>, target: &'static str) -> Result<T, DecodeError> {
    match result {
        Success(value) => Ok(value),
        EmptyBuffer | InsufficientBuffer => Err(DecodeError::EndOfStream),
        TokenMismatch(code) if code.is_int_family() => Err(DecodeError::OutOfRange { code, target }),
        TokenMismatch(code) => Err(DecodeError::TokenMismatch { code, expected: "an integer" }),
    }
}

macro_rules! impl_read_int {
    ($($fn_name:ident, $try_name:ident => $ty:ty),+ $(,)?) => {$(
        impl<'a> PackReader<'a> {
            pub fn $fn_name(&mut self) -> Result<$ty, DecodeError> {
                require_int(self.inner.$try_name(), stringify!($ty))
            }
        }
    )+};
}

impl_read_int! {
    read_u8, try_read_u8 => u8,
    read_u16, try_read_u16 => u16,
    read_u32, try_read_u32 => u32,
    read_u64, try_read_u64 => u64,
    read_i8, try_read_i8 => i8,
    read_i16, try_read_i16 => i16,
    read_i32, try_read_i32 => i32,
    read_i64, try_read_i64 => i64,
}

impl<'a> PackReader<'a> {
    pub fn new(bytes: impl Into<ByteSeq<'a>>) -> Self {
        PackReader { inner: StreamingReader::new(bytes) }
    }

    pub fn from_streaming(inner: StreamingReader<'a>) -> Self {
        PackReader { inner }
    }

    /// The underlying streaming reader, for callers that mix layers.
    pub fn streaming(&mut self) -> &mut StreamingReader<'a> {
        &mut self.inner
    }

    pub fn position(&self) -> usize {
        self.inner.position()
    }

    pub fn remaining(&self) -> usize {
        self.inner.remaining()
    }

    pub fn peek_code(&self) -> Result<Code, DecodeError> {
        require(self.inner.try_peek_code(), "any token")
    }

    pub fn read_nil(&mut self) -> Result<(), DecodeError> {
        require(self.inner.try_read_nil(), "nil")
    }

    /// Consumes a nil token if one is next. Used for optional values.
    pub fn read_nil_opt(&mut self) -> Result<bool, DecodeError> {
        match self.inner.try_read_nil() {
            Success(()) => Ok(true),
            TokenMismatch(_) => Ok(false),
            _ => Err(DecodeError::EndOfStream),
        }
    }

    pub fn read_bool(&mut self) -> Result<bool, DecodeError> {
        require(self.inner.try_read_bool(), "a boolean")
    }

    pub fn read_f32(&mut self) -> Result<f32, DecodeError> {
        require(self.inner.try_read_f32(), "a float32")
    }

    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        require(self.inner.try_read_f64(), "a float")
    }

    /// Reads an array header and sanity-checks the count against the bytes
    /// actually remaining, so a corrupt header cannot trigger a huge
    /// allocation downstream: every element costs at least one byte.
    pub fn read_array_header(&mut self) -> Result<u32, DecodeError> {
        let count = require(self.inner.try_read_array_header(), "an array")?;
        if count as usize > self.inner.remaining() {
            return Err(DecodeError::HeaderTooLarge { count, remaining: self.inner.remaining() });
        }
        Ok(count)
    }

    /// Reads a map header; a map of `count` pairs needs at least `2 * count`
    /// bytes.
    pub fn read_map_header(&mut self) -> Result<u32, DecodeError> {
        let count = require(self.inner.try_read_map_header(), "a map")?;
        if (count as usize).saturating_mul(2) > self.inner.remaining() {
            return Err(DecodeError::HeaderTooLarge { count, remaining: self.inner.remaining() });
        }
        Ok(count)
    }

    /// Reads a string token, returning its (unvalidated) UTF-8 bytes.
    pub fn read_str_bytes(&mut self) -> Result<SeqSlice<'a>, DecodeError> {
        require(self.inner.try_read_str(), "a string")
    }

    /// Reads a string token as validated UTF-8.
    #[cfg(feature = "alloc")]
    pub fn read_string(&mut self) -> Result<alloc::string::String, DecodeError> {
        let slice = self.read_str_bytes()?;
        match slice.bytes() {
            either::Either::Left(contiguous) => core::str::from_utf8(contiguous)
                .map(alloc::borrow::ToOwned::to_owned)
                .map_err(|_| DecodeError::InvalidUtf8),
            either::Either::Right(stitched) => alloc::string::String::from_utf8(stitched)
                .map_err(|_| DecodeError::InvalidUtf8),
        }
    }

    pub fn read_bin(&mut self) -> Result<SeqSlice<'a>, DecodeError> {
        require(self.inner.try_read_bin(), "binary")
    }

    pub fn read_raw(&mut self, len: usize) -> Result<SeqSlice<'a>, DecodeError> {
        require(self.inner.try_read_raw(len), "raw bytes")
    }

    pub fn read_ext_header(&mut self) -> Result<ExtHeader, DecodeError> {
        require(self.inner.try_read_ext_header(), "an extension")
    }

    pub fn read_timestamp(&mut self) -> Result<Timestamp, DecodeError> {
        require(self.inner.try_read_timestamp()?, "a timestamp")
    }

    /// Skips the next value whole.
    pub fn skip(&mut self, depth_budget: u32) -> Result<(), DecodeError> {
        require(self.inner.try_skip(depth_budget)?, "any token")
    }

    /// Reads the next whole structure as raw bytes, header included.
    pub fn read_raw_structure(&mut self, depth_budget: u32) -> Result<SeqSlice<'a>, DecodeError> {
        require(self.inner.try_read_raw_structure(depth_budget)?, "any token")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixnum_one_byte() {
        // A u64 of 1 must be the single byte 0x01 and read back at any width.
        let bytes = [0x01u8];
        let mut reader = StreamingReader::new(&bytes[..]);
        assert_eq!(reader.try_read_u8(), Success(1));
        let mut reader = StreamingReader::new(&bytes[..]);
        assert_eq!(reader.try_read_i64(), Success(1));
        let mut reader = StreamingReader::new(&bytes[..]);
        assert_eq!(reader.try_read_u64(), Success(1));
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn negative_int8_widens_everywhere() {
        let bytes = [0xd0u8, 0xdf]; // int8 -33
        let mut reader = StreamingReader::new(&bytes[..]);
        assert_eq!(reader.try_read_i8(), Success(-33i8));
        let mut reader = StreamingReader::new(&bytes[..]);
        assert_eq!(reader.try_read_i16(), Success(-33i16));
        let mut reader = StreamingReader::new(&bytes[..]);
        assert_eq!(reader.try_read_i32(), Success(-33i32));
        let mut reader = StreamingReader::new(&bytes[..]);
        assert_eq!(reader.try_read_i64(), Success(-33i64));
    }

    #[test]
    fn negative_into_unsigned_is_out_of_range() {
        let bytes = [0xd0u8, 0xdf];
        let mut reader = PackReader::new(&bytes[..]);
        match reader.read_u8() {
            Err(DecodeError::OutOfRange { target, .. }) => assert_eq!(target, "u8"),
            other => panic!("expected out-of-range, got {:?}", other),
        }
    }

    #[test]
    fn mismatch_names_offending_code() {
        let bytes = [0xa1u8, b'x'];
        let mut reader = PackReader::new(&bytes[..]);
        match reader.read_u8() {
            Err(DecodeError::TokenMismatch { code, .. }) => assert_eq!(code.name(), "fixstr"),
            other => panic!("expected mismatch, got {:?}", other),
        }
    }

    #[test]
    fn string_straddles_segments() {
        // fixstr "hello!\n" split at byte 3 across two segments.
        let whole = [0xa7, b'h', b'e', b'l', b'l', b'o', b'!', b'\n'];
        let (first, second) = whole.split_at(3);

        let mut reader = StreamingReader::resumable(first, false);
        assert_eq!(reader.try_read_str().map(|_| ()), InsufficientBuffer);
        assert_eq!(reader.position(), 0);

        let segments: &[&[u8]] = &[first, second];
        let mut reader = StreamingReader::resumable(segments, true);
        let payload = match reader.try_read_str() {
            Success(slice) => slice,
            other => panic!("expected success, got {:?}", other.map(|_| ())),
        };
        assert_eq!(payload.len(), 7);
        assert!(payload.eq_bytes(b"hello!\n"));
        assert_eq!(reader.position(), 8);
    }

    #[test]
    fn every_prefix_is_insufficient_then_success() {
        // str8 header + payload; every proper prefix must leave the cursor
        // at zero and the full buffer must decode identically afterwards.
        let bytes = [0xd9u8, 5, b'a', b'b', b'c', b'd', b'e'];
        for cut in 0..bytes.len() {
            let mut reader = StreamingReader::resumable(&bytes[..cut], false);
            let result = reader.try_read_str().map(|_| ());
            assert!(
                result == EmptyBuffer || result == InsufficientBuffer,
                "prefix {} decoded: {:?}",
                cut,
                result
            );
            assert_eq!(reader.position(), 0);
        }
        let mut reader = StreamingReader::new(&bytes[..]);
        assert!(reader.try_read_str().is_success());
    }

    #[test]
    fn skip_consumes_same_bytes_as_read() {
        let payloads: &[&[u8]] = &[
            &[0x01],
            &[0xc0],
            &[0xc3],
            &[0xd0, 0xdf],
            &[0xcb, 0, 0, 0, 0, 0, 0, 0, 0],
            &[0xa3, b'a', b'b', b'c'],
            &[0x92, 0x01, 0x02],
            &[0x81, 0xa1, b'k', 0x2a],
            &[0xd6, 0xff, 0, 0, 0, 1],
        ];
        for payload in payloads {
            let mut reader = StreamingReader::new(*payload);
            assert_eq!(reader.try_skip(8).unwrap(), Success(()));
            assert_eq!(reader.position(), payload.len(), "payload {:?}", payload);
        }
    }

    #[test]
    fn skip_depth_budget_enforced() {
        // [[[[]]]] nested four deep.
        let bytes = [0x91u8, 0x91, 0x91, 0x90];
        let mut reader = StreamingReader::new(&bytes[..]);
        assert_eq!(reader.try_skip(8).unwrap(), Success(()));
        let mut reader = StreamingReader::new(&bytes[..]);
        assert!(matches!(
            reader.try_skip(3),
            Err(DecodeError::DepthExceeded { .. })
        ));
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn array_header_sanity_check() {
        // array32 announcing u32::MAX elements with only a few bytes behind.
        let bytes = [0xddu8, 0xff, 0xff, 0xff, 0xff, 0x01];
        let mut reader = PackReader::new(&bytes[..]);
        assert!(matches!(
            reader.read_array_header(),
            Err(DecodeError::HeaderTooLarge { .. })
        ));
    }

    #[test]
    fn map_header_sanity_check() {
        let bytes = [0xdeu8, 0xff, 0xff];
        let mut reader = PackReader::new(&bytes[..]);
        assert!(matches!(
            reader.read_map_header(),
            Err(DecodeError::HeaderTooLarge { .. })
        ));
    }

    #[test]
    fn ext_header_roundtrip() {
        let bytes = [0xd5u8, 0x07, 0xaa, 0xbb];
        let mut reader = StreamingReader::new(&bytes[..]);
        assert_eq!(
            reader.try_read_ext_header(),
            Success(ExtHeader { type_code: 7, len: 2 })
        );
        assert_eq!(reader.position(), 2);
    }

    #[test]
    fn timestamp_fixext4() {
        let bytes = [0xd6u8, 0xff, 0x00, 0x00, 0x00, 0x2a];
        let mut reader = StreamingReader::new(&bytes[..]);
        let ts = match reader.try_read_timestamp().unwrap() {
            Success(ts) => ts,
            other => panic!("{:?}", other.map(|_| ())),
        };
        assert_eq!(ts.secs(), 42);
        assert_eq!(ts.nanos(), 0);
    }

    #[test]
    fn raw_structure_captures_whole_token() {
        let bytes = [0x82u8, 0x01, 0xa1, b'a', 0x02, 0xc0];
        let mut reader = StreamingReader::new(&bytes[..]);
        let raw = match reader.try_read_raw_structure(8).unwrap() {
            Success(raw) => raw,
            other => panic!("{:?}", other.map(|_| ())),
        };
        assert_eq!(raw.len(), 6);
        assert!(raw.eq_bytes(&bytes));
    }

    #[test]
    fn f32_not_widened_from_f64() {
        let bytes = [0xcbu8, 0, 0, 0, 0, 0, 0, 0, 0];
        let mut reader = StreamingReader::new(&bytes[..]);
        assert!(matches!(reader.try_read_f32(), TokenMismatch(_)));
        assert_eq!(reader.try_read_f64(), Success(0.0));
    }
}
