//! Primitive msgpack encoding.
//!
//! [`PackWriter`] writes single tokens through a [`WriteBuffer`]. Integers
//! always go out in the narrowest form that preserves the value; readers
//! accept any wider form back, so the pair is lossless.

use crate::buffer::{ByteSink, WriteBuffer};
use crate::format;
use crate::timestamp::Timestamp;

pub struct PackWriter<'a> {
    buf: WriteBuffer<'a>,
}

impl<'a> PackWriter<'a> {
    pub fn new(sink: &'a mut dyn ByteSink) -> Self {
        PackWriter { buf: WriteBuffer::new(sink) }
    }

    /// Bytes written but not yet flushed to the sink.
    pub fn uncommitted_bytes(&self) -> usize {
        self.buf.uncommitted_bytes()
    }

    /// Pushes everything buffered so far to the sink. Also happens on drop.
    pub fn flush(&mut self) {
        self.buf.flush();
    }

    /// Reserves a raw span for bulk encoders.
    pub(crate) fn span(&mut self, min: usize) -> &mut [u8] {
        self.buf.get_span(min)
    }

    /// Commits `n` bytes of the last reserved span.
    pub(crate) fn advance(&mut self, n: usize) {
        self.buf.advance(n);
    }

    pub fn write_nil(&mut self) {
        self.buf.write(&[format::NIL]);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.write(&[if value { format::TRUE } else { format::FALSE }]);
    }

    pub fn write_u64(&mut self, value: u64) {
        if value <= format::FIXINT_MAX as u64 {
            self.buf.write(&[value as u8]);
        } else if value <= u8::MAX as u64 {
            self.buf.write(&[format::UINT8, value as u8]);
        } else if value <= u16::MAX as u64 {
            let mut out = [format::UINT16, 0, 0];
            out[1..].copy_from_slice(&(value as u16).to_be_bytes());
            self.buf.write(&out);
        } else if value <= u32::MAX as u64 {
            let mut out = [format::UINT32, 0, 0, 0, 0];
            out[1..].copy_from_slice(&(value as u32).to_be_bytes());
            self.buf.write(&out);
        } else {
            let mut out = [format::UINT64, 0, 0, 0, 0, 0, 0, 0, 0];
            out[1..].copy_from_slice(&value.to_be_bytes());
            self.buf.write(&out);
        }
    }

    pub fn write_i64(&mut self, value: i64) {
        if value >= 0 {
            self.write_u64(value as u64);
        } else if value >= format::FIXINT_MIN {
            self.buf.write(&[value as u8]);
        } else if value >= i8::MIN as i64 {
            self.buf.write(&[format::INT8, value as u8]);
        } else if value >= i16::MIN as i64 {
            let mut out = [format::INT16, 0, 0];
            out[1..].copy_from_slice(&(value as i16).to_be_bytes());
            self.buf.write(&out);
        } else if value >= i32::MIN as i64 {
            let mut out = [format::INT32, 0, 0, 0, 0];
            out[1..].copy_from_slice(&(value as i32).to_be_bytes());
            self.buf.write(&out);
        } else {
            let mut out = [format::INT64, 0, 0, 0, 0, 0, 0, 0, 0];
            out[1..].copy_from_slice(&value.to_be_bytes());
            self.buf.write(&out);
        }
    }

    pub fn write_f32(&mut self, value: f32) {
        let mut out = [format::FLOAT32, 0, 0, 0, 0];
        out[1..].copy_from_slice(&value.to_be_bytes());
        self.buf.write(&out);
    }

    pub fn write_f64(&mut self, value: f64) {
        let mut out = [format::FLOAT64, 0, 0, 0, 0, 0, 0, 0, 0];
        out[1..].copy_from_slice(&value.to_be_bytes());
        self.buf.write(&out);
    }

    pub fn write_str(&mut self, value: &str) {
        self.write_str_raw(value.as_bytes());
    }

    /// Writes a str token from payload bytes that skipped UTF-8 validation,
    /// e.g. unrecognized keys being round-tripped.
    pub(crate) fn write_str_raw(&mut self, bytes: &[u8]) {
        self.write_str_header(bytes.len());
        self.buf.write(bytes);
    }

    fn write_str_header(&mut self, len: usize) {
        if len <= format::FIXSTR_MAX_LEN {
            self.buf.write(&[0xa0 | len as u8]);
        } else if len <= u8::MAX as usize {
            self.buf.write(&[format::STR8, len as u8]);
        } else if len <= u16::MAX as usize {
            let mut out = [format::STR16, 0, 0];
            out[1..].copy_from_slice(&(len as u16).to_be_bytes());
            self.buf.write(&out);
        } else {
            let mut out = [format::STR32, 0, 0, 0, 0];
            out[1..].copy_from_slice(&(len as u32).to_be_bytes());
            self.buf.write(&out);
        }
    }

    pub fn write_bin(&mut self, value: &[u8]) {
        if value.len() <= u8::MAX as usize {
            self.buf.write(&[format::BIN8, value.len() as u8]);
        } else if value.len() <= u16::MAX as usize {
            let mut out = [format::BIN16, 0, 0];
            out[1..].copy_from_slice(&(value.len() as u16).to_be_bytes());
            self.buf.write(&out);
        } else {
            let mut out = [format::BIN32, 0, 0, 0, 0];
            out[1..].copy_from_slice(&(value.len() as u32).to_be_bytes());
            self.buf.write(&out);
        }
        self.buf.write(value);
    }

    pub fn write_array_header(&mut self, count: u32) {
        if count <= format::FIXARRAY_MAX_LEN {
            self.buf.write(&[0x90 | count as u8]);
        } else if count <= u16::MAX as u32 {
            let mut out = [format::ARRAY16, 0, 0];
            out[1..].copy_from_slice(&(count as u16).to_be_bytes());
            self.buf.write(&out);
        } else {
            let mut out = [format::ARRAY32, 0, 0, 0, 0];
            out[1..].copy_from_slice(&count.to_be_bytes());
            self.buf.write(&out);
        }
    }

    pub fn write_map_header(&mut self, count: u32) {
        if count <= format::FIXMAP_MAX_LEN {
            self.buf.write(&[0x80 | count as u8]);
        } else if count <= u16::MAX as u32 {
            let mut out = [format::MAP16, 0, 0];
            out[1..].copy_from_slice(&(count as u16).to_be_bytes());
            self.buf.write(&out);
        } else {
            let mut out = [format::MAP32, 0, 0, 0, 0];
            out[1..].copy_from_slice(&count.to_be_bytes());
            self.buf.write(&out);
        }
    }

    pub fn write_ext_header(&mut self, type_code: i8, len: u32) {
        match len {
            1 => self.buf.write(&[format::FIXEXT1, type_code as u8]),
            2 => self.buf.write(&[format::FIXEXT2, type_code as u8]),
            4 => self.buf.write(&[format::FIXEXT4, type_code as u8]),
            8 => self.buf.write(&[format::FIXEXT8, type_code as u8]),
            16 => self.buf.write(&[format::FIXEXT16, type_code as u8]),
            _ if len <= u8::MAX as u32 => {
                self.buf.write(&[format::EXT8, len as u8, type_code as u8]);
            }
            _ if len <= u16::MAX as u32 => {
                let mut out = [format::EXT16, 0, 0, 0];
                out[1..3].copy_from_slice(&(len as u16).to_be_bytes());
                out[3] = type_code as u8;
                self.buf.write(&out);
            }
            _ => {
                let mut out = [format::EXT32, 0, 0, 0, 0, 0];
                out[1..5].copy_from_slice(&len.to_be_bytes());
                out[5] = type_code as u8;
                self.buf.write(&out);
            }
        }
    }

    pub fn write_timestamp(&mut self, value: Timestamp) {
        let mut scratch = [0u8; 12];
        let payload = value.encode_payload(&mut scratch);
        self.write_ext_header(format::EXT_TIMESTAMP, payload.len() as u32);
        self.buf.write(payload);
    }

    /// Copies already-encoded msgpack straight through.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.write(bytes);
    }
}

macro_rules! impl_write_int {
    ($($fn_name:ident => $ty:ty, $via:ident, $wide:ty);+ $(;)?) => {$(
        impl<'a> PackWriter<'a> {
            pub fn $fn_name(&mut self, value: $ty) {
                self.$via(value as $wide);
            }
        }
    )+};
}

impl_write_int! {
    write_u8 => u8, write_u64, u64;
    write_u16 => u16, write_u64, u64;
    write_u32 => u32, write_u64, u64;
    write_i8 => i8, write_i64, i64;
    write_i16 => i16, write_i64, i64;
    write_i32 => i32, write_i64, i64;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::{PackReader, ReadResult, StreamingReader};
    use alloc::vec::Vec;

    fn encode(f: impl FnOnce(&mut PackWriter)) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut writer = PackWriter::new(&mut out);
            f(&mut writer);
        }
        out
    }

    #[test]
    fn one_is_one_byte() {
        assert_eq!(encode(|w| w.write_u64(1)), [0x01]);
    }

    #[test]
    fn minus_33_is_int8() {
        assert_eq!(encode(|w| w.write_i64(-33)), [0xd0, 0xdf]);
    }

    #[test]
    fn fixstr_hello() {
        let bytes = encode(|w| w.write_str("hello!\n"));
        assert_eq!(bytes.len(), 8);
        assert_eq!(bytes[0], 0xa7);
        assert_eq!(&bytes[1..], b"hello!\n");
    }

    #[test]
    fn unsigned_boundaries() {
        let cases: &[(u64, usize)] = &[
            (0, 1),
            (127, 1),
            (128, 2),
            (255, 2),
            (256, 3),
            (65535, 3),
            (65536, 5),
            (u32::MAX as u64, 5),
            (u32::MAX as u64 + 1, 9),
            (u64::MAX, 9),
        ];
        for &(value, len) in cases {
            let bytes = encode(|w| w.write_u64(value));
            assert_eq!(bytes.len(), len, "length for {}", value);
            let mut reader = StreamingReader::new(&bytes[..]);
            assert_eq!(reader.try_read_u64(), ReadResult::Success(value));
        }
    }

    #[test]
    fn signed_boundaries() {
        let cases: &[(i64, usize)] = &[
            (-1, 1),
            (-32, 1),
            (-33, 2),
            (-128, 2),
            (-129, 3),
            (-32768, 3),
            (-32769, 5),
            (i32::MIN as i64, 5),
            (i32::MIN as i64 - 1, 9),
            (i64::MIN, 9),
        ];
        for &(value, len) in cases {
            let bytes = encode(|w| w.write_i64(value));
            assert_eq!(bytes.len(), len, "length for {}", value);
            let mut reader = StreamingReader::new(&bytes[..]);
            assert_eq!(reader.try_read_i64(), ReadResult::Success(value));
        }
    }

    #[test]
    fn nonnegative_signed_uses_unsigned_forms() {
        assert_eq!(encode(|w| w.write_i64(200)), encode(|w| w.write_u64(200)));
    }

    #[test]
    fn float_roundtrip() {
        let bytes = encode(|w| w.write_f32(1.5));
        assert_eq!(bytes, [0xca, 0x3f, 0xc0, 0x00, 0x00]);
        let bytes = encode(|w| w.write_f64(-2.0));
        let mut reader = StreamingReader::new(&bytes[..]);
        assert_eq!(reader.try_read_f64(), ReadResult::Success(-2.0));
    }

    #[test]
    fn header_forms() {
        assert_eq!(encode(|w| w.write_array_header(5)), [0x95]);
        assert_eq!(encode(|w| w.write_array_header(16)), [0xdc, 0x00, 0x10]);
        assert_eq!(encode(|w| w.write_map_header(2)), [0x82]);
        assert_eq!(encode(|w| w.write_map_header(70000)), [0xdf, 0x00, 0x01, 0x11, 0x70]);
    }

    #[test]
    fn bin_roundtrip() {
        let payload = [7u8; 300];
        let bytes = encode(|w| w.write_bin(&payload));
        assert_eq!(bytes[0], 0xc5);
        let mut reader = PackReader::new(&bytes[..]);
        let read = reader.read_bin().unwrap();
        assert_eq!(read.len(), 300);
    }

    #[test]
    fn ext_header_prefers_fixext() {
        assert_eq!(encode(|w| w.write_ext_header(5, 4)), [0xd6, 0x05]);
        assert_eq!(encode(|w| w.write_ext_header(5, 3)), [0xc7, 0x03, 0x05]);
    }

    #[test]
    fn timestamp_roundtrip() {
        let ts = Timestamp::new(1234, 567).unwrap();
        let bytes = encode(|w| w.write_timestamp(ts));
        let mut reader = PackReader::new(&bytes[..]);
        assert_eq!(reader.read_timestamp().unwrap(), ts);
    }

    #[test]
    fn integer_matrix_roundtrips_through_every_destination() {
        // Every writer form read back into every destination wide enough.
        let values: &[i64] = &[0, 1, 127, 128, 255, 256, 65535, 65536, -1, -32, -33, -128];
        for &value in values {
            let bytes = encode(|w| w.write_i64(value));
            let mut reader = StreamingReader::new(&bytes[..]);
            assert_eq!(reader.try_read_i64(), ReadResult::Success(value));
            if (0..=i32::MAX as i64).contains(&value) || (i32::MIN as i64..0).contains(&value) {
                let mut reader = StreamingReader::new(&bytes[..]);
                assert_eq!(reader.try_read_i32(), ReadResult::Success(value as i32));
            }
            if (0..=u16::MAX as i64).contains(&value) {
                let mut reader = StreamingReader::new(&bytes[..]);
                assert_eq!(reader.try_read_u16(), ReadResult::Success(value as u16));
            }
        }
    }
}
