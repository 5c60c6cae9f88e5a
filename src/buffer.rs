//! Buffer primitives the codec is built on.
//!
//! The read side works over [`ByteSeq`], a borrowed sequence of byte
//! segments: decoders never require the input to be contiguous, and a token
//! whose payload straddles a segment boundary is either stitched into a
//! small temporary or handed out as a [`SeqSlice`]. The write side is
//! [`WriteBuffer`], an append buffer that keeps short writes in an inline
//! scratch array and spills to a heap buffer only when a value outgrows it.

#[cfg(feature = "alloc")]
use alloc::vec::Vec;

/// A borrowed, possibly segmented, byte source.
#[derive(Copy, Clone, Debug)]
pub enum ByteSeq<'a> {
    /// The whole input in one piece.
    Single(&'a [u8]),
    /// The input split into ordered segments.
    Segmented(&'a [&'a [u8]]),
}

impl<'a> ByteSeq<'a> {
    pub fn len(&self) -> usize {
        match self {
            ByteSeq::Single(bytes) => bytes.len(),
            ByteSeq::Segmented(segments) => segments.iter().map(|s| s.len()).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn num_segments(&self) -> usize {
        match self {
            ByteSeq::Single(_) => 1,
            ByteSeq::Segmented(segments) => segments.len(),
        }
    }

    fn segment(&self, index: usize) -> &'a [u8] {
        match self {
            ByteSeq::Single(bytes) => {
                debug_assert_eq!(index, 0);
                bytes
            }
            ByteSeq::Segmented(segments) => segments[index],
        }
    }
}

impl<'a> From<&'a [u8]> for ByteSeq<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        ByteSeq::Single(bytes)
    }
}

impl<'a> From<&'a [&'a [u8]]> for ByteSeq<'a> {
    fn from(segments: &'a [&'a [u8]]) -> Self {
        ByteSeq::Segmented(segments)
    }
}

/// Cursor into a [`ByteSeq`].
///
/// Cheap to copy; the streaming reader clones it to probe ahead and commits
/// the probe back only when the whole token decoded.
#[derive(Copy, Clone, Debug)]
pub(crate) struct SeqCursor<'a> {
    seq: ByteSeq<'a>,
    seg: usize,
    off: usize,
    consumed: usize,
    total: usize,
}

impl<'a> SeqCursor<'a> {
    pub fn new(seq: ByteSeq<'a>) -> Self {
        let total = seq.len();
        let mut cursor = SeqCursor { seq, seg: 0, off: 0, consumed: 0, total };
        cursor.skip_exhausted_segments();
        cursor
    }

    pub fn remaining(&self) -> usize {
        self.total - self.consumed
    }

    pub fn position(&self) -> usize {
        self.consumed
    }

    fn skip_exhausted_segments(&mut self) {
        while self.seg < self.seq.num_segments() && self.off == self.seq.segment(self.seg).len() {
            self.seg += 1;
            self.off = 0;
        }
    }

    pub fn peek_byte(&self) -> Option<u8> {
        if self.remaining() == 0 {
            None
        } else {
            Some(self.seq.segment(self.seg)[self.off])
        }
    }

    /// Copies the next `N` bytes without advancing, stitching across
    /// segment boundaries. `None` if fewer than `N` bytes remain.
    pub fn peek_array<const N: usize>(&self) -> Option<[u8; N]> {
        if self.remaining() < N {
            return None;
        }
        let mut out = [0u8; N];
        let mut copied = 0;
        let mut seg = self.seg;
        let mut off = self.off;
        while copied < N {
            let segment = self.seq.segment(seg);
            let take = (segment.len() - off).min(N - copied);
            out[copied..copied + take].copy_from_slice(&segment[off..off + take]);
            copied += take;
            seg += 1;
            off = 0;
        }
        Some(out)
    }

    /// The next `len` bytes as a single borrowed slice, if they happen to be
    /// contiguous in the underlying storage.
    pub fn peek_contiguous(&self, len: usize) -> Option<&'a [u8]> {
        if self.remaining() < len {
            return None;
        }
        if len == 0 {
            return Some(&[]);
        }
        let segment = self.seq.segment(self.seg);
        if segment.len() - self.off >= len {
            Some(&segment[self.off..self.off + len])
        } else {
            None
        }
    }

    /// Advances past `n` bytes. Panics if fewer remain; callers check first.
    pub fn advance(&mut self, n: usize) {
        assert!(n <= self.remaining(), "advanced past the end of the buffer");
        let mut left = n;
        while left > 0 {
            let segment = self.seq.segment(self.seg);
            let take = (segment.len() - self.off).min(left);
            self.off += take;
            left -= take;
            self.skip_exhausted_segments();
        }
        self.consumed += n;
        self.skip_exhausted_segments();
    }

    /// Takes the next `len` bytes as a [`SeqSlice`] and advances past them.
    pub fn take(&mut self, len: usize) -> Option<SeqSlice<'a>> {
        if self.remaining() < len {
            return None;
        }
        let slice = SeqSlice { seq: self.seq, seg: self.seg, off: self.off, len };
        self.advance(len);
        Some(slice)
    }

    /// Copies exactly `dst.len()` bytes out and advances, or returns false
    /// leaving the cursor unchanged.
    pub fn try_copy_to(&mut self, dst: &mut [u8]) -> bool {
        if self.remaining() < dst.len() {
            return false;
        }
        let mut copied = 0;
        while copied < dst.len() {
            let segment = self.seq.segment(self.seg);
            let take = (segment.len() - self.off).min(dst.len() - copied);
            dst[copied..copied + take].copy_from_slice(&segment[self.off..self.off + take]);
            self.off += take;
            copied += take;
            self.skip_exhausted_segments();
        }
        self.consumed += dst.len();
        true
    }
}

/// A window into a [`ByteSeq`], as returned for string, binary and raw
/// payloads. The bytes may span segment boundaries; [`SeqSlice::as_contiguous`]
/// reports whether they do not.
#[derive(Copy, Clone, Debug)]
pub struct SeqSlice<'a> {
    seq: ByteSeq<'a>,
    seg: usize,
    off: usize,
    len: usize,
}

impl<'a> SeqSlice<'a> {
    pub(crate) fn empty() -> Self {
        SeqSlice { seq: ByteSeq::Single(&[]), seg: 0, off: 0, len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The payload as one borrowed slice, when it does not straddle a
    /// segment boundary.
    pub fn as_contiguous(&self) -> Option<&'a [u8]> {
        if self.len == 0 {
            return Some(&[]);
        }
        let segment = self.seq.segment(self.seg);
        if segment.len() - self.off >= self.len {
            Some(&segment[self.off..self.off + self.len])
        } else {
            None
        }
    }

    /// Iterates the payload segment by segment.
    pub fn chunks(&self) -> SeqChunks<'a> {
        SeqChunks { seq: self.seq, seg: self.seg, off: self.off, left: self.len }
    }

    /// Copies the payload into `dst`. Panics unless `dst.len() == self.len()`.
    pub fn copy_to(&self, dst: &mut [u8]) {
        assert_eq!(dst.len(), self.len);
        let mut copied = 0;
        for chunk in self.chunks() {
            dst[copied..copied + chunk.len()].copy_from_slice(chunk);
            copied += chunk.len();
        }
    }

    /// Compares the payload against `other` without allocating.
    pub fn eq_bytes(&self, other: &[u8]) -> bool {
        if self.len != other.len() {
            return false;
        }
        let mut at = 0;
        for chunk in self.chunks() {
            if chunk != &other[at..at + chunk.len()] {
                return false;
            }
            at += chunk.len();
        }
        true
    }

    #[cfg(feature = "alloc")]
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len);
        for chunk in self.chunks() {
            out.extend_from_slice(chunk);
        }
        out
    }

    /// The payload bytes: borrowed when contiguous, stitched otherwise.
    #[cfg(feature = "alloc")]
    pub fn bytes(&self) -> either::Either<&'a [u8], Vec<u8>> {
        match self.as_contiguous() {
            Some(slice) => either::Either::Left(slice),
            None => either::Either::Right(self.to_vec()),
        }
    }
}

pub struct SeqChunks<'a> {
    seq: ByteSeq<'a>,
    seg: usize,
    off: usize,
    left: usize,
}

impl<'a> Iterator for SeqChunks<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        while self.left > 0 {
            let segment = self.seq.segment(self.seg);
            let take = (segment.len() - self.off).min(self.left);
            let off = self.off;
            self.seg += 1;
            self.off = 0;
            self.left -= take;
            if take > 0 {
                return Some(&segment[off..off + take]);
            }
        }
        None
    }
}

/// An append-only destination for encoded bytes.
///
/// The codec does not own its output; anything that can accept byte slices
/// in order can be a sink.
pub trait ByteSink {
    fn put(&mut self, bytes: &[u8]);
}

#[cfg(feature = "alloc")]
impl ByteSink for Vec<u8> {
    fn put(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

impl<S: ByteSink + ?Sized> ByteSink for &mut S {
    fn put(&mut self, bytes: &[u8]) {
        (**self).put(bytes)
    }
}

#[cfg(feature = "alloc")]
const SCRATCH_LEN: usize = 64;

/// Append buffer in front of a [`ByteSink`].
///
/// Writes accumulate in an inline scratch array; once a write does not fit,
/// everything migrates to a pooled spill vector. Nothing reaches the sink
/// until [`flush`](WriteBuffer::flush) (or drop), so a sink sees each
/// buffered run as a single `put`.
#[cfg(feature = "alloc")]
pub struct WriteBuffer<'a> {
    sink: &'a mut dyn ByteSink,
    scratch: [u8; SCRATCH_LEN],
    scratch_len: usize,
    spill: Vec<u8>,
    spilled: bool,
    span: SpanState,
}

#[cfg(feature = "alloc")]
#[derive(Copy, Clone, PartialEq, Eq)]
enum SpanState {
    None,
    Scratch,
    /// Reservation starting at the recorded spill length.
    Spill(usize),
}

#[cfg(feature = "alloc")]
impl<'a> WriteBuffer<'a> {
    pub fn new(sink: &'a mut dyn ByteSink) -> Self {
        WriteBuffer {
            sink,
            scratch: [0; SCRATCH_LEN],
            scratch_len: 0,
            spill: crate::rent_spill(),
            spilled: false,
            span: SpanState::None,
        }
    }

    /// Bytes written but not yet flushed to the sink.
    pub fn uncommitted_bytes(&self) -> usize {
        self.scratch_len + self.spill.len()
    }

    fn cancel_reservation(&mut self) {
        if let SpanState::Spill(base) = self.span {
            self.spill.truncate(base);
        }
        self.span = SpanState::None;
    }

    fn migrate_to_spill(&mut self) {
        if !self.spilled {
            self.spill.extend_from_slice(&self.scratch[..self.scratch_len]);
            self.scratch_len = 0;
            self.spilled = true;
        }
    }

    /// Returns a mutable span of at least `min` bytes. Bytes written into it
    /// are committed by the following [`advance`](WriteBuffer::advance); an
    /// un-advanced reservation is discarded.
    pub fn get_span(&mut self, min: usize) -> &mut [u8] {
        self.cancel_reservation();
        if !self.spilled && self.scratch_len + min <= SCRATCH_LEN {
            self.span = SpanState::Scratch;
            &mut self.scratch[self.scratch_len..]
        } else {
            self.migrate_to_spill();
            let base = self.spill.len();
            self.spill.resize(base + min, 0);
            self.span = SpanState::Spill(base);
            &mut self.spill[base..]
        }
    }

    /// Commits `n` bytes of the span returned by the last
    /// [`get_span`](WriteBuffer::get_span). Panics without one, or past its
    /// length.
    pub fn advance(&mut self, n: usize) {
        match self.span {
            SpanState::Scratch => {
                assert!(self.scratch_len + n <= SCRATCH_LEN, "advanced past the reserved span");
                self.scratch_len += n;
            }
            SpanState::Spill(base) => {
                assert!(base + n <= self.spill.len(), "advanced past the reserved span");
                self.spill.truncate(base + n);
            }
            SpanState::None => panic!("advance without a reserved span"),
        }
        self.span = SpanState::None;
    }

    /// Appends `bytes` in one call.
    pub fn write(&mut self, bytes: &[u8]) {
        self.cancel_reservation();
        if !self.spilled && self.scratch_len + bytes.len() <= SCRATCH_LEN {
            self.scratch[self.scratch_len..self.scratch_len + bytes.len()].copy_from_slice(bytes);
            self.scratch_len += bytes.len();
        } else {
            self.migrate_to_spill();
            self.spill.extend_from_slice(bytes);
        }
    }

    /// Pushes everything buffered so far to the sink.
    pub fn flush(&mut self) {
        self.cancel_reservation();
        if self.spilled {
            self.sink.put(&self.spill);
            self.spill.clear();
            self.spilled = false;
        } else if self.scratch_len > 0 {
            self.sink.put(&self.scratch[..self.scratch_len]);
        }
        self.scratch_len = 0;
    }
}

#[cfg(feature = "alloc")]
impl Drop for WriteBuffer<'_> {
    fn drop(&mut self) {
        self.flush();
        crate::return_spill(core::mem::take(&mut self.spill));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_stitches_across_segments() {
        let segments: &[&[u8]] = &[&[1, 2], &[], &[3, 4, 5]];
        let cursor = SeqCursor::new(ByteSeq::from(segments));
        assert_eq!(cursor.remaining(), 5);
        assert_eq!(cursor.peek_array::<4>(), Some([1, 2, 3, 4]));
        assert_eq!(cursor.peek_array::<6>(), None);
    }

    #[test]
    fn cursor_advance_and_position() {
        let segments: &[&[u8]] = &[&[1, 2], &[3]];
        let mut cursor = SeqCursor::new(ByteSeq::from(segments));
        cursor.advance(2);
        assert_eq!(cursor.position(), 2);
        assert_eq!(cursor.peek_byte(), Some(3));
        cursor.advance(1);
        assert_eq!(cursor.remaining(), 0);
        assert_eq!(cursor.peek_byte(), None);
    }

    #[test]
    fn take_reports_contiguity() {
        let segments: &[&[u8]] = &[&[1, 2, 3], &[4]];
        let mut cursor = SeqCursor::new(ByteSeq::from(segments));
        let head = cursor.take(2).unwrap();
        assert_eq!(head.as_contiguous(), Some(&[1u8, 2][..]));
        let tail = cursor.take(2).unwrap();
        assert_eq!(tail.as_contiguous(), None);
        let mut copy = [0u8; 2];
        tail.copy_to(&mut copy);
        assert_eq!(copy, [3, 4]);
    }

    #[test]
    fn slice_eq_bytes() {
        let segments: &[&[u8]] = &[b"he", b"llo"];
        let mut cursor = SeqCursor::new(ByteSeq::from(segments));
        let slice = cursor.take(5).unwrap();
        assert!(slice.eq_bytes(b"hello"));
        assert!(!slice.eq_bytes(b"hella"));
        assert!(!slice.eq_bytes(b"hell"));
    }

    #[test]
    fn try_copy_leaves_cursor_on_shortfall() {
        let mut cursor = SeqCursor::new(ByteSeq::from(&[1u8, 2][..]));
        let mut dst = [0u8; 3];
        assert!(!cursor.try_copy_to(&mut dst));
        assert_eq!(cursor.position(), 0);
        let mut dst = [0u8; 2];
        assert!(cursor.try_copy_to(&mut dst));
        assert_eq!(dst, [1, 2]);
    }

    #[cfg(feature = "alloc")]
    #[test]
    fn write_buffer_scratch_then_spill() {
        let mut out = alloc::vec::Vec::new();
        {
            let mut buf = WriteBuffer::new(&mut out);
            buf.write(&[1, 2, 3]);
            assert_eq!(buf.uncommitted_bytes(), 3);
            buf.write(&[0u8; 100]);
            assert_eq!(buf.uncommitted_bytes(), 103);
            buf.flush();
            assert_eq!(buf.uncommitted_bytes(), 0);
        }
        assert_eq!(out.len(), 103);
        assert_eq!(&out[..3], &[1, 2, 3]);
    }

    #[cfg(feature = "alloc")]
    #[test]
    fn write_buffer_span_commit() {
        let mut out = alloc::vec::Vec::new();
        {
            let mut buf = WriteBuffer::new(&mut out);
            let span = buf.get_span(5);
            span[0] = 0xaa;
            span[1] = 0xbb;
            buf.advance(2);
            assert_eq!(buf.uncommitted_bytes(), 2);
        }
        assert_eq!(out, [0xaa, 0xbb]);
    }

    #[cfg(feature = "alloc")]
    #[test]
    fn write_buffer_unadvanced_span_discarded() {
        let mut out = alloc::vec::Vec::new();
        {
            let mut buf = WriteBuffer::new(&mut out);
            buf.write(&[0u8; 70]);
            let _ = buf.get_span(8);
            buf.write(&[1]);
        }
        assert_eq!(out.len(), 71);
        assert_eq!(out[70], 1);
    }

    #[cfg(feature = "alloc")]
    #[test]
    fn write_buffer_drop_flushes() {
        let mut out = alloc::vec::Vec::new();
        {
            let mut buf = WriteBuffer::new(&mut out);
            buf.write(b"xy");
        }
        assert_eq!(out, b"xy");
    }
}
