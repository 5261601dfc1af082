//! Error types for riffcodec operations.

use alloc::string::String;
use core::fmt;
use enough::StopReason;

/// Result type for riffcodec operations.
///
/// Errors are wrapped in [`whereat::At`] so the source location that raised
/// them travels with the error.
pub type Result<T> = core::result::Result<T, whereat::At<Error>>;

/// Error type for riffcodec operations.
///
/// Decoder variants carry the bit offset (inside a frame bitstream) or the
/// byte offset (inside a container) where the failure was detected.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Fewer bits remained in the stream than a read required.
    TruncatedStream {
        /// Bit position of the failed read.
        bit_offset: u64,
    },
    /// A Huffman code was malformed, or no symbol was reached within the
    /// maximum code length.
    InvalidHuffmanCode {
        /// Bit position where the code was being read.
        bit_offset: u64,
    },
    /// A frame bitstream contained a structurally invalid symbol sequence.
    CorruptFrameData {
        /// Bit position inside the frame bitstream.
        bit_offset: u64,
        /// What was wrong.
        reason: &'static str,
    },
    /// The data does not start with a recognized container signature, or
    /// lacks a mandatory chunk.
    UnsupportedContainer {
        /// Byte offset of the problem.
        offset: usize,
        /// What was wrong.
        reason: &'static str,
    },
    /// A chunk declared more payload than the container holds.
    TruncatedChunk {
        /// Chunk tag.
        tag: [u8; 4],
        /// Byte offset of the chunk header.
        offset: usize,
        /// Declared payload length.
        declared: usize,
        /// Bytes actually available for the payload.
        available: usize,
    },
    /// A known chunk had an invalid payload.
    InvalidChunk {
        /// Chunk tag.
        tag: [u8; 4],
        /// Byte offset of the chunk header.
        offset: usize,
        /// What was wrong.
        reason: &'static str,
    },
    /// A bit write was asked for a width or value it cannot represent.
    InvalidWidth {
        /// Requested width in bits.
        width: u32,
    },
    /// Invalid input parameters (dimensions, buffer size, etc.)
    InvalidInput(String),
    /// Configuration validation failed
    InvalidConfig(String),
    /// Animation operation failed
    AnimationError(String),
    /// Decoded image would exceed the configured pixel limit.
    LimitExceeded {
        /// Pixels the image would need.
        pixels: u64,
        /// Configured limit.
        limit: u64,
    },
    /// Streaming operation requires more data
    NeedMoreData,
    /// The operation was cancelled through its stop token.
    Cancelled(StopReason),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::TruncatedStream { bit_offset } => {
                write!(f, "truncated bitstream at bit {}", bit_offset)
            }
            Error::InvalidHuffmanCode { bit_offset } => {
                write!(f, "invalid Huffman code at bit {}", bit_offset)
            }
            Error::CorruptFrameData { bit_offset, reason } => {
                write!(f, "corrupt frame data at bit {}: {}", bit_offset, reason)
            }
            Error::UnsupportedContainer { offset, reason } => {
                write!(f, "unsupported container at byte {}: {}", offset, reason)
            }
            Error::TruncatedChunk {
                tag,
                offset,
                declared,
                available,
            } => write!(
                f,
                "chunk {} at byte {} declares {} bytes but only {} are available",
                TagDisplay(tag),
                offset,
                declared,
                available
            ),
            Error::InvalidChunk {
                tag,
                offset,
                reason,
            } => write!(
                f,
                "invalid chunk {} at byte {}: {}",
                TagDisplay(tag),
                offset,
                reason
            ),
            Error::InvalidWidth { width } => write!(f, "invalid bit width {}", width),
            Error::InvalidInput(msg) => write!(f, "invalid input: {}", msg),
            Error::InvalidConfig(msg) => write!(f, "invalid config: {}", msg),
            Error::AnimationError(msg) => write!(f, "animation error: {}", msg),
            Error::LimitExceeded { pixels, limit } => {
                write!(f, "image has {} pixels, limit is {}", pixels, limit)
            }
            Error::NeedMoreData => write!(f, "need more data"),
            Error::Cancelled(reason) => write!(f, "cancelled: {}", reason),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

impl From<StopReason> for Error {
    fn from(reason: StopReason) -> Self {
        Error::Cancelled(reason)
    }
}

/// Poll a stop token, mapping a stop request to [`Error::Cancelled`].
#[inline]
pub(crate) fn check_stop(stop: &dyn enough::Stop) -> Result<()> {
    stop.check()
        .map_err(|reason| whereat::at!(Error::Cancelled(reason)))
}

struct TagDisplay<'a>(&'a [u8; 4]);

impl fmt::Display for TagDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("'")?;
        for &b in self.0 {
            if b.is_ascii_graphic() || b == b' ' {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{:02x}", b)?;
            }
        }
        f.write_str("'")
    }
}
