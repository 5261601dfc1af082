//! Bit-level cursors over byte buffers.
//!
//! Both directions use LSB-first packing: the first bit written lands in the
//! lowest bit of the first byte. Reads and writes never assume byte
//! alignment.

use crate::error::{Error, Result};
use alloc::vec::Vec;
use whereat::*;

/// Writes bits LSB-first into a growable buffer.
#[derive(Debug, Default)]
pub struct BitWriter {
    buffer: Vec<u8>,
    /// Pending bits not yet flushed to `buffer`.
    bits: u64,
    /// Number of valid bits in `bits` (always < 8 between calls).
    used: u8,
}

impl BitWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a writer with pre-allocated capacity in bytes.
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(cap),
            bits: 0,
            used: 0,
        }
    }

    /// Append the low `n` bits of `value`.
    ///
    /// Fails with [`Error::InvalidWidth`] if `n > 32` or `value` has bits set
    /// at or above position `n`.
    #[inline]
    pub fn write_bits(&mut self, value: u32, n: u8) -> Result<()> {
        if n > 32 || (n < 32 && (value >> n) != 0) {
            return Err(at!(Error::InvalidWidth { width: n as u32 }));
        }
        self.bits |= (value as u64) << self.used;
        self.used += n;
        while self.used >= 8 {
            self.buffer.push(self.bits as u8);
            self.bits >>= 8;
            self.used -= 8;
        }
        Ok(())
    }

    /// Append a single bit.
    #[inline]
    pub fn write_bit(&mut self, bit: bool) -> Result<()> {
        self.write_bits(bit as u32, 1)
    }

    /// Number of bits written so far.
    pub fn bit_position(&self) -> u64 {
        self.buffer.len() as u64 * 8 + self.used as u64
    }

    /// Pad the final partial byte with zeros and return the buffer.
    pub fn finish(mut self) -> Vec<u8> {
        if self.used > 0 {
            self.buffer.push(self.bits as u8);
        }
        self.buffer
    }
}

/// Reads bits LSB-first from an owned buffer.
///
/// The reader can be fed more bytes between reads. A read that would run
/// past the bytes available fails with [`Error::TruncatedStream`] and leaves
/// the cursor where it was, so the caller may feed more input and retry.
#[derive(Debug, Clone, Default)]
pub struct BitReader {
    data: Vec<u8>,
    bit_pos: u64,
    end_of_stream: bool,
}

impl BitReader {
    /// Create a reader over a copy of `data`.
    ///
    /// The input is treated as complete.
    pub fn new(data: &[u8]) -> Self {
        Self::from_vec(data.to_vec())
    }

    /// Create a reader that takes ownership of `data`, treated as complete.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            data,
            bit_pos: 0,
            end_of_stream: true,
        }
    }

    /// Create an empty reader that expects more input through [`feed`](Self::feed).
    pub fn incremental() -> Self {
        Self {
            data: Vec::new(),
            bit_pos: 0,
            end_of_stream: false,
        }
    }

    /// Append more input bytes.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Mark that no more input will arrive.
    pub fn finish_input(&mut self) {
        self.end_of_stream = true;
    }

    /// True once [`finish_input`](Self::finish_input) has been called, or for
    /// readers built over complete data.
    pub fn input_complete(&self) -> bool {
        self.end_of_stream
    }

    /// True once all input has arrived and every bit has been consumed.
    pub fn is_end_of_stream(&self) -> bool {
        self.end_of_stream && self.bits_remaining() == 0
    }

    /// Current cursor position in bits.
    pub fn bit_position(&self) -> u64 {
        self.bit_pos
    }

    /// Move the cursor to an earlier or later bit position.
    ///
    /// Used to resume after a truncated read. Positions beyond the buffer are
    /// rejected with [`Error::TruncatedStream`].
    pub fn set_bit_position(&mut self, pos: u64) -> Result<()> {
        if pos > self.data.len() as u64 * 8 {
            return Err(at!(Error::TruncatedStream { bit_offset: pos }));
        }
        self.bit_pos = pos;
        Ok(())
    }

    /// Bits between the cursor and the end of the buffered input.
    pub fn bits_remaining(&self) -> u64 {
        self.data.len() as u64 * 8 - self.bit_pos
    }

    /// Read the next `n` bits (at most 32) as an unsigned integer.
    #[inline]
    pub fn read_bits(&mut self, n: u8) -> Result<u32> {
        if n > 32 {
            return Err(at!(Error::InvalidWidth { width: n as u32 }));
        }
        if (n as u64) > self.bits_remaining() {
            return Err(at!(Error::TruncatedStream {
                bit_offset: self.bit_pos
            }));
        }
        let mut value: u64 = 0;
        let mut filled: u8 = 0;
        let mut pos = self.bit_pos;
        while filled < n {
            let byte = self.data[(pos >> 3) as usize] as u64;
            let shift = (pos & 7) as u8;
            let take = (8 - shift).min(n - filled);
            let bits = (byte >> shift) & ((1u64 << take) - 1);
            value |= bits << filled;
            filled += take;
            pos += take as u64;
        }
        self.bit_pos = pos;
        Ok(value as u32)
    }

    /// Read a single bit.
    #[inline]
    pub fn read_bit(&mut self) -> Result<bool> {
        Ok(self.read_bits(1)? == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_lsb_first_packing() {
        let mut w = BitWriter::new();
        w.write_bits(1, 1).unwrap();
        w.write_bits(0b10, 2).unwrap();
        w.write_bits(0x1f, 5).unwrap();
        assert_eq!(w.finish(), vec![0b1111_1101]);
    }

    #[test]
    fn test_roundtrip_mixed_widths() {
        let values: [(u32, u8); 9] = [
            (0, 0),
            (1, 1),
            (5, 3),
            (0x3fff, 14),
            (0, 7),
            (0xdead_beef, 32),
            (0x1234, 13),
            (u32::MAX, 32),
            (0x55, 7),
        ];
        let mut w = BitWriter::new();
        for &(v, n) in &values {
            w.write_bits(v, n).unwrap();
        }
        let total: u64 = values.iter().map(|&(_, n)| n as u64).sum();
        assert_eq!(w.bit_position(), total);

        let mut r = BitReader::from_vec(w.finish());
        for &(v, n) in &values {
            assert_eq!(r.read_bits(n).unwrap(), v, "width {}", n);
        }
        assert_eq!(r.bit_position(), total);
    }

    #[test]
    fn test_repartitioned_reads() {
        // 48 bits written as 6 bytes, read back in widths 5+11+1+31.
        let bytes = [0xa5u8, 0x5a, 0xff, 0x00, 0x3c, 0xc3];
        let mut w = BitWriter::new();
        for b in bytes {
            w.write_bits(b as u32, 8).unwrap();
        }
        let encoded = w.finish();
        assert_eq!(encoded, bytes);

        let mut all = 0u64;
        for (i, b) in bytes.iter().enumerate() {
            all |= (*b as u64) << (8 * i);
        }
        let mut r = BitReader::new(&encoded);
        let mut shift = 0;
        for n in [5u8, 11, 1, 31] {
            let got = r.read_bits(n).unwrap() as u64;
            assert_eq!(got, (all >> shift) & ((1u64 << n) - 1));
            shift += n as u32;
        }
        assert_eq!(r.bits_remaining(), 0);
        assert!(r.is_end_of_stream());
    }

    #[test]
    fn test_invalid_width() {
        let mut w = BitWriter::new();
        let err = w.write_bits(0, 33).unwrap_err();
        assert!(matches!(err.error(), Error::InvalidWidth { width: 33 }));
        let err = w.write_bits(4, 2).unwrap_err();
        assert!(matches!(err.error(), Error::InvalidWidth { width: 2 }));
        assert_eq!(w.bit_position(), 0);

        let mut r = BitReader::new(&[0u8; 8]);
        assert!(r.read_bits(40).is_err());
    }

    #[test]
    fn test_truncated_read_keeps_position() {
        let mut r = BitReader::new(&[0xff, 0x01]);
        assert_eq!(r.read_bits(12).unwrap(), 0x1ff);
        let err = r.read_bits(8).unwrap_err();
        assert!(matches!(
            err.error(),
            Error::TruncatedStream { bit_offset: 12 }
        ));
        assert_eq!(r.bit_position(), 12);
        assert_eq!(r.read_bits(4).unwrap(), 0);
    }

    #[test]
    fn test_feed_resumes() {
        let mut w = BitWriter::new();
        w.write_bits(0xabc, 12).unwrap();
        w.write_bits(0x3ffff, 18).unwrap();
        let bytes = w.finish();

        let mut r = BitReader::incremental();
        r.feed(&bytes[..2]);
        assert_eq!(r.read_bits(12).unwrap(), 0xabc);
        assert!(r.read_bits(18).is_err());
        assert!(!r.is_end_of_stream());
        r.feed(&bytes[2..]);
        r.finish_input();
        assert_eq!(r.read_bits(18).unwrap(), 0x3ffff);
    }
}
