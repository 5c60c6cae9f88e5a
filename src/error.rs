use core::fmt;
use crate::format::Code;

/// Fatal failure while decoding msgpack.
///
/// Everything here ends the current deserialization; the streaming layer
/// reports retryable conditions through
/// [`ReadResult`](crate::reader::ReadResult) instead.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DecodeError {
    /// A complete token was required but the buffer ended first.
    EndOfStream,
    /// The format code at the cursor cannot satisfy the requested decode.
    TokenMismatch {
        code: Code,
        expected: &'static str,
    },
    /// The token decoded but its value does not fit the destination type.
    OutOfRange {
        code: Code,
        target: &'static str,
    },
    /// A collection header claims more elements than the buffer could hold.
    HeaderTooLarge {
        count: u32,
        remaining: usize,
    },
    /// String payload is not valid UTF-8.
    InvalidUtf8,
    /// Nesting went past the configured maximum depth.
    DepthExceeded {
        max: u32,
    },
    /// A map key decoded to nil where the target cannot represent it.
    NullKey,
    /// An extension payload violated its declared layout.
    InvalidExt {
        type_code: i8,
        len: u32,
    },
    /// The payload completed without assigning a required property.
    MissingProperty {
        name: &'static str,
    },
    /// No union case is registered for the alias read off the wire.
    UnknownUnionAlias,
    /// Cancellation was requested.
    Cancelled,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DecodeError::EndOfStream => write!(f, "end of stream reached before the token completed"),
            DecodeError::TokenMismatch { code, expected } => {
                write!(f, "unexpected msgpack code {}, expected {}", code, expected)
            }
            DecodeError::OutOfRange { code, target } => {
                write!(f, "value encoded as {} does not fit in {}", code, target)
            }
            DecodeError::HeaderTooLarge { count, remaining } => {
                write!(f, "header announces {} elements but only {} bytes remain", count, remaining)
            }
            DecodeError::InvalidUtf8 => write!(f, "string payload is not valid UTF-8"),
            DecodeError::DepthExceeded { max } => {
                write!(f, "nesting exceeds the configured maximum depth of {}", max)
            }
            DecodeError::NullKey => write!(f, "map key is nil"),
            DecodeError::InvalidExt { type_code, len } => {
                write!(f, "extension type {} has invalid payload length {}", type_code, len)
            }
            DecodeError::MissingProperty { name } => {
                write!(f, "required property `{}` is missing from the payload", name)
            }
            DecodeError::UnknownUnionAlias => write!(f, "no union case matches the alias"),
            DecodeError::Cancelled => write!(f, "operation was cancelled"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DecodeError {}

/// Fatal failure while encoding msgpack.
#[derive(Debug)]
#[non_exhaustive]
pub enum WriteError {
    /// Nesting went past the configured maximum depth.
    DepthExceeded {
        max: u32,
    },
    /// Cancellation was requested.
    Cancelled,
    /// The value cannot be represented on the wire.
    Unrepresentable(&'static str),
    /// Flushing buffered bytes to the sink failed.
    #[cfg(feature = "std")]
    Io(std::io::Error),
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            WriteError::DepthExceeded { max } => {
                write!(f, "nesting exceeds the configured maximum depth of {}", max)
            }
            WriteError::Cancelled => write!(f, "operation was cancelled"),
            WriteError::Unrepresentable(what) => write!(f, "value is not representable: {}", what),
            #[cfg(feature = "std")]
            WriteError::Io(_) => write!(f, "writing to the sink failed"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for WriteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WriteError::Io(error) => Some(error),
            _ => None,
        }
    }
}

#[cfg(feature = "std")]
impl From<std::io::Error> for WriteError {
    fn from(error: std::io::Error) -> Self {
        WriteError::Io(error)
    }
}

/// Returned when either pulling bytes from a source or decoding them fails.
#[cfg(feature = "std")]
#[derive(Debug)]
pub enum ReadError {
    /// Reading from the byte source failed.
    Source(std::io::Error),
    /// Decoding the fetched bytes failed.
    Decode(DecodeError),
}

#[cfg(feature = "std")]
impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReadError::Source(_) => write!(f, "reading from the byte source failed"),
            ReadError::Decode(_) => write!(f, "decoding failed"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ReadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReadError::Source(error) => Some(error),
            ReadError::Decode(error) => Some(error),
        }
    }
}

#[cfg(feature = "std")]
impl From<DecodeError> for ReadError {
    fn from(error: DecodeError) -> Self {
        ReadError::Decode(error)
    }
}

#[cfg(feature = "std")]
impl From<std::io::Error> for ReadError {
    fn from(error: std::io::Error) -> Self {
        ReadError::Source(error)
    }
}
