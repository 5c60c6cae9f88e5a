//! The msgpack timestamp extension (type code −1).

use core::fmt;
use crate::error::DecodeError;
use crate::format;

/// Seconds and nanoseconds since the Unix epoch.
///
/// Construction validates the nanosecond field so every `Timestamp` is
/// encodable; the encoder picks the shortest of the three wire layouts.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    secs: i64,
    nanos: u32,
}

impl Timestamp {
    /// Creates a timestamp. `None` if `nanos` is not below one billion.
    pub fn new(secs: i64, nanos: u32) -> Option<Self> {
        if nanos < 1_000_000_000 {
            Some(Timestamp { secs, nanos })
        } else {
            None
        }
    }

    pub fn from_secs(secs: i64) -> Self {
        Timestamp { secs, nanos: 0 }
    }

    pub fn secs(&self) -> i64 {
        self.secs
    }

    pub fn nanos(&self) -> u32 {
        self.nanos
    }

    /// Encoded payload length: 4, 8 or 12 bytes.
    pub(crate) fn payload_len(&self) -> u32 {
        if self.secs >> 34 == 0 {
            if self.nanos == 0 && self.secs >> 32 == 0 {
                4
            } else {
                8
            }
        } else {
            12
        }
    }

    /// Writes the payload (sans ext header) into `out`, returning the used
    /// prefix.
    pub(crate) fn encode_payload<'a>(&self, out: &'a mut [u8; 12]) -> &'a [u8] {
        match self.payload_len() {
            4 => {
                out[..4].copy_from_slice(&(self.secs as u32).to_be_bytes());
                &out[..4]
            }
            8 => {
                let packed = ((self.nanos as u64) << 34) | (self.secs as u64 & 0x3_ffff_ffff);
                out[..8].copy_from_slice(&packed.to_be_bytes());
                &out[..8]
            }
            _ => {
                out[..4].copy_from_slice(&self.nanos.to_be_bytes());
                out[4..12].copy_from_slice(&self.secs.to_be_bytes());
                &out[..12]
            }
        }
    }

    /// Decodes a timestamp payload of the given length.
    pub(crate) fn decode_payload(payload: &[u8]) -> Result<Self, DecodeError> {
        match payload.len() {
            4 => {
                let secs = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
                Ok(Timestamp { secs: secs as i64, nanos: 0 })
            }
            8 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(payload);
                let packed = u64::from_be_bytes(raw);
                let nanos = (packed >> 34) as u32;
                let secs = (packed & 0x3_ffff_ffff) as i64;
                Timestamp::new(secs, nanos).ok_or(DecodeError::InvalidExt {
                    type_code: format::EXT_TIMESTAMP,
                    len: 8,
                })
            }
            12 => {
                let nanos = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&payload[4..]);
                let secs = i64::from_be_bytes(raw);
                Timestamp::new(secs, nanos).ok_or(DecodeError::InvalidExt {
                    type_code: format::EXT_TIMESTAMP,
                    len: 12,
                })
            }
            other => Err(DecodeError::InvalidExt {
                type_code: format::EXT_TIMESTAMP,
                len: other as u32,
            }),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.nanos == 0 {
            write!(f, "{}s", self.secs)
        } else {
            write!(f, "{}s +{}ns", self.secs, self.nanos)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_overflowing_nanos() {
        assert!(Timestamp::new(0, 1_000_000_000).is_none());
        assert!(Timestamp::new(0, 999_999_999).is_some());
    }

    #[test]
    fn four_byte_layout() {
        let ts = Timestamp::from_secs(1);
        let mut buf = [0u8; 12];
        let payload = ts.encode_payload(&mut buf);
        assert_eq!(payload, &[0, 0, 0, 1]);
        assert_eq!(Timestamp::decode_payload(payload).unwrap(), ts);
    }

    #[test]
    fn eight_byte_layout() {
        let ts = Timestamp::new(1, 500).unwrap();
        let mut buf = [0u8; 12];
        let payload = ts.encode_payload(&mut buf);
        assert_eq!(payload.len(), 8);
        assert_eq!(Timestamp::decode_payload(payload).unwrap(), ts);
    }

    #[test]
    fn twelve_byte_layout() {
        let ts = Timestamp::new(-1, 42).unwrap();
        let mut buf = [0u8; 12];
        let payload = ts.encode_payload(&mut buf);
        assert_eq!(payload.len(), 12);
        assert_eq!(Timestamp::decode_payload(payload).unwrap(), ts);
        let far = Timestamp::from_secs(1 << 40);
        let payload = far.encode_payload(&mut buf);
        assert_eq!(payload.len(), 12);
        assert_eq!(Timestamp::decode_payload(payload).unwrap(), far);
    }

    #[test]
    fn bogus_length_rejected() {
        assert!(Timestamp::decode_payload(&[0u8; 5]).is_err());
    }
}
