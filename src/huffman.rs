//! Canonical Huffman codes.
//!
//! Decoding walks the implicit code tree one bit at a time using per-length
//! symbol counts, so a table is two flat arrays and no node graph. Encoding
//! writes the canonical code bit-reversed, because the bit cursor is
//! LSB-first and the tree is walked from the most significant code bit.
//!
//! Code lengths travel in the stream Deflate-style: a 19-symbol code-length
//! alphabet with run-length symbols, itself described by 3-bit lengths.

use crate::bits::{BitReader, BitWriter};
use crate::error::{Error, Result};
use alloc::collections::BinaryHeap;
use alloc::vec;
use alloc::vec::Vec;
use core::cmp::Reverse;
use whereat::*;

/// Maximum code length in bits.
pub const MAX_CODE_LENGTH: u8 = 15;

/// Maximum code length for the code-length alphabet.
const MAX_CODE_LENGTH_CODE_LENGTH: u8 = 7;

/// Size of the code-length alphabet.
const CODE_LENGTH_CODES: usize = 19;

/// Order in which code-length code lengths are transmitted, so that rarely
/// used entries fall at the end and can be trimmed.
const CODE_LENGTH_CODE_ORDER: [usize; CODE_LENGTH_CODES] = [
    17, 18, 0, 1, 2, 3, 4, 5, 16, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15,
];

/// Code-length symbol repeating the previous non-zero length 3-6 times.
const REPEAT_PREVIOUS: u8 = 16;
/// Code-length symbol for 3-10 zeros.
const REPEAT_ZERO_SHORT: u8 = 17;
/// Code-length symbol for 11-138 zeros.
const REPEAT_ZERO_LONG: u8 = 18;

/// Length repeated by [`REPEAT_PREVIOUS`] before any non-zero length is seen.
const INITIAL_PREVIOUS_LENGTH: u8 = 8;

/// Decoding side of a canonical Huffman code.
///
/// Immutable after construction.
#[derive(Debug, Clone)]
pub struct HuffmanTable {
    /// Number of symbols of each code length, indexed by length.
    counts: [u16; MAX_CODE_LENGTH as usize + 1],
    /// Symbols ordered by (code length, symbol value).
    symbols: Vec<u16>,
    /// Set when exactly one symbol is used; it is decoded from zero bits.
    single: Option<u16>,
}

impl HuffmanTable {
    /// Build a table from per-symbol code lengths (0 means unused).
    ///
    /// Over-subscribed length sets and lengths above [`MAX_CODE_LENGTH`] fail
    /// with [`Error::InvalidHuffmanCode`]. Incomplete codes are accepted;
    /// reading an unassigned code then fails at decode time.
    pub fn from_code_lengths(lengths: &[u8]) -> Result<Self> {
        Self::build(lengths).ok_or_else(|| at!(Error::InvalidHuffmanCode { bit_offset: 0 }))
    }

    fn build(lengths: &[u8]) -> Option<Self> {
        if lengths.len() > u16::MAX as usize {
            return None;
        }
        let mut counts = [0u16; MAX_CODE_LENGTH as usize + 1];
        for &len in lengths {
            if len > MAX_CODE_LENGTH {
                return None;
            }
            if len > 0 {
                counts[len as usize] += 1;
            }
        }

        let mut left: i32 = 1;
        for &count in &counts[1..] {
            left <<= 1;
            left -= count as i32;
            if left < 0 {
                return None;
            }
        }

        let mut offsets = [0u16; MAX_CODE_LENGTH as usize + 2];
        for len in 1..=MAX_CODE_LENGTH as usize {
            offsets[len + 1] = offsets[len] + counts[len];
        }
        let used = offsets[MAX_CODE_LENGTH as usize + 1] as usize;
        let mut symbols = vec![0u16; used];
        for (symbol, &len) in lengths.iter().enumerate() {
            if len > 0 {
                symbols[offsets[len as usize] as usize] = symbol as u16;
                offsets[len as usize] += 1;
            }
        }

        let single = if used == 1 { Some(symbols[0]) } else { None };
        Some(Self {
            counts,
            symbols,
            single,
        })
    }

    /// Number of symbols with a code.
    pub fn num_symbols(&self) -> usize {
        self.symbols.len()
    }

    /// Decode one symbol.
    ///
    /// Fails with [`Error::InvalidHuffmanCode`] when the bits read match no
    /// code within [`MAX_CODE_LENGTH`] bits.
    pub fn decode(&self, r: &mut BitReader) -> Result<u16> {
        let start = r.bit_position();
        self.decode_symbol(r)?
            .ok_or_else(|| at!(Error::InvalidHuffmanCode { bit_offset: start }))
    }

    /// Decode one symbol, returning `None` when no code matches.
    ///
    /// A truncated read restores the cursor and fails with
    /// [`Error::TruncatedStream`].
    pub(crate) fn decode_symbol(&self, r: &mut BitReader) -> Result<Option<u16>> {
        if let Some(symbol) = self.single {
            return Ok(Some(symbol));
        }
        if self.symbols.is_empty() {
            return Ok(None);
        }
        let start = r.bit_position();
        let mut code: i32 = 0;
        let mut first: i32 = 0;
        let mut index: i32 = 0;
        for len in 1..=MAX_CODE_LENGTH as usize {
            let bit = match r.read_bits(1) {
                Ok(bit) => bit,
                Err(e) => {
                    r.set_bit_position(start)?;
                    return Err(e);
                }
            };
            code |= bit as i32;
            let count = self.counts[len] as i32;
            if code - count < first {
                return Ok(Some(self.symbols[(index + code - first) as usize]));
            }
            index += count;
            first += count;
            first <<= 1;
            code <<= 1;
        }
        Ok(None)
    }
}

/// Encoding side of a canonical Huffman code.
#[derive(Debug, Clone)]
pub struct HuffmanCode {
    /// Bit-reversed canonical codes.
    codes: Vec<u16>,
    lengths: Vec<u8>,
    single: bool,
}

impl HuffmanCode {
    /// Build an optimal code for `freqs` with no code longer than `max_len`.
    pub fn from_frequencies(freqs: &[u32], max_len: u8) -> Self {
        Self::from_code_lengths(build_lengths(freqs, max_len))
    }

    /// Assign canonical codes to the given lengths.
    pub fn from_code_lengths(lengths: Vec<u8>) -> Self {
        let mut length_counts = [0u32; MAX_CODE_LENGTH as usize + 1];
        for &len in &lengths {
            if len > 0 {
                length_counts[len as usize] += 1;
            }
        }
        let mut next_code = [0u32; MAX_CODE_LENGTH as usize + 1];
        let mut code = 0u32;
        for bits in 1..=MAX_CODE_LENGTH as usize {
            code = (code + length_counts[bits - 1]) << 1;
            next_code[bits] = code;
        }

        let mut codes = vec![0u16; lengths.len()];
        for (symbol, &len) in lengths.iter().enumerate() {
            if len > 0 {
                codes[symbol] = reverse_bits(next_code[len as usize] as u16, len);
                next_code[len as usize] += 1;
            }
        }
        let used = length_counts.iter().sum::<u32>();
        Self {
            codes,
            lengths,
            single: used == 1,
        }
    }

    /// Code lengths, as transmitted.
    pub fn lengths(&self) -> &[u8] {
        &self.lengths
    }

    /// Write the code for `symbol`. A single-symbol code writes nothing.
    #[inline]
    pub fn write_symbol(&self, w: &mut BitWriter, symbol: usize) -> Result<()> {
        if self.single {
            return Ok(());
        }
        let len = self.lengths[symbol];
        debug_assert!(len > 0, "symbol {} has no code", symbol);
        w.write_bits(self.codes[symbol] as u32, len)
    }

    /// Number of bits [`write_symbol`](Self::write_symbol) emits for `symbol`.
    pub fn bit_length(&self, symbol: usize) -> u8 {
        if self.single {
            0
        } else {
            self.lengths[symbol]
        }
    }
}

fn reverse_bits(code: u16, len: u8) -> u16 {
    let mut out = 0u16;
    let mut c = code;
    for _ in 0..len {
        out = (out << 1) | (c & 1);
        c >>= 1;
    }
    out
}

/// Compute length-limited Huffman code lengths for `freqs`.
///
/// Symbols with zero frequency get length 0. A single used symbol gets
/// length 1. When the optimal tree is deeper than `max_len`, small counts
/// are raised to a doubling floor and the tree is rebuilt.
pub fn build_lengths(freqs: &[u32], max_len: u8) -> Vec<u8> {
    let mut lengths = vec![0u8; freqs.len()];
    let used: Vec<usize> = freqs
        .iter()
        .enumerate()
        .filter(|(_, &f)| f > 0)
        .map(|(i, _)| i)
        .collect();

    match used.len() {
        0 => return lengths,
        1 => {
            lengths[used[0]] = 1;
            return lengths;
        }
        _ => {}
    }

    let mut count_min = 1u32;
    while !tree_lengths(freqs, &used, count_min, max_len, &mut lengths) {
        count_min = count_min.saturating_mul(2);
    }
    lengths
}

/// Build one Huffman tree with every weight raised to at least `count_min`.
/// Returns false if a code exceeds `limit`.
fn tree_lengths(
    freqs: &[u32],
    used: &[usize],
    count_min: u32,
    limit: u8,
    lengths: &mut [u8],
) -> bool {
    lengths.fill(0);
    // Leaves are nodes 0..used.len(); internal nodes are appended.
    let mut parent = vec![usize::MAX; used.len()];
    let mut heap = BinaryHeap::with_capacity(used.len());
    for (node, &symbol) in used.iter().enumerate() {
        heap.push(Reverse((freqs[symbol].max(count_min) as u64, node)));
    }
    while heap.len() > 1 {
        let (Some(Reverse((wa, a))), Some(Reverse((wb, b)))) = (heap.pop(), heap.pop()) else {
            break;
        };
        let id = parent.len();
        parent.push(usize::MAX);
        parent[a] = id;
        parent[b] = id;
        heap.push(Reverse((wa + wb, id)));
    }

    let mut max_depth = 0u32;
    for (node, &symbol) in used.iter().enumerate() {
        let mut depth = 0u32;
        let mut n = node;
        while parent[n] != usize::MAX {
            n = parent[n];
            depth += 1;
        }
        max_depth = max_depth.max(depth);
        lengths[symbol] = depth.min(u8::MAX as u32) as u8;
    }
    max_depth <= limit as u32
}

#[derive(Debug, Clone, Copy)]
struct CodeLengthToken {
    code: u8,
    extra_bits: u8,
}

/// Turn a list of code lengths into code-length symbols with run-length
/// coding of zeros and repeats.
fn tokenize_lengths(lengths: &[u8]) -> Vec<CodeLengthToken> {
    let mut tokens = Vec::new();
    let mut prev_value = INITIAL_PREVIOUS_LENGTH;
    let mut i = 0;
    while i < lengths.len() {
        let value = lengths[i];
        let mut k = i + 1;
        while k < lengths.len() && lengths[k] == value {
            k += 1;
        }
        let reps = k - i;
        if value == 0 {
            push_zero_runs(reps, &mut tokens);
        } else {
            push_value_runs(reps, value, prev_value, &mut tokens);
            prev_value = value;
        }
        i = k;
    }
    tokens
}

fn push_zero_runs(mut reps: usize, tokens: &mut Vec<CodeLengthToken>) {
    while reps > 0 {
        if reps < 3 {
            for _ in 0..reps {
                tokens.push(CodeLengthToken {
                    code: 0,
                    extra_bits: 0,
                });
            }
            break;
        } else if reps < 11 {
            tokens.push(CodeLengthToken {
                code: REPEAT_ZERO_SHORT,
                extra_bits: (reps - 3) as u8,
            });
            break;
        } else {
            let run = reps.min(138);
            tokens.push(CodeLengthToken {
                code: REPEAT_ZERO_LONG,
                extra_bits: (run - 11) as u8,
            });
            reps -= run;
        }
    }
}

fn push_value_runs(mut reps: usize, value: u8, prev_value: u8, tokens: &mut Vec<CodeLengthToken>) {
    if value != prev_value {
        tokens.push(CodeLengthToken {
            code: value,
            extra_bits: 0,
        });
        reps -= 1;
    }
    while reps > 0 {
        if reps < 3 {
            for _ in 0..reps {
                tokens.push(CodeLengthToken {
                    code: value,
                    extra_bits: 0,
                });
            }
            break;
        }
        let run = reps.min(6);
        tokens.push(CodeLengthToken {
            code: REPEAT_PREVIOUS,
            extra_bits: (run - 3) as u8,
        });
        reps -= run;
    }
}

fn extra_bits_for(code: u8) -> u8 {
    match code {
        REPEAT_PREVIOUS => 2,
        REPEAT_ZERO_SHORT => 3,
        REPEAT_ZERO_LONG => 7,
        _ => 0,
    }
}

/// Write the code lengths of `code` to the stream.
pub fn write_code(w: &mut BitWriter, code: &HuffmanCode) -> Result<()> {
    write_code_lengths(w, code.lengths())
}

/// Write a list of code lengths to the stream.
pub fn write_code_lengths(w: &mut BitWriter, lengths: &[u8]) -> Result<()> {
    let tokens = tokenize_lengths(lengths);
    let mut histogram = [0u32; CODE_LENGTH_CODES];
    for t in &tokens {
        histogram[t.code as usize] += 1;
    }
    let cl_code = HuffmanCode::from_frequencies(&histogram, MAX_CODE_LENGTH_CODE_LENGTH);

    let mut num_codes = CODE_LENGTH_CODES;
    while num_codes > 4 && cl_code.lengths()[CODE_LENGTH_CODE_ORDER[num_codes - 1]] == 0 {
        num_codes -= 1;
    }
    w.write_bits((num_codes - 4) as u32, 4)?;
    for &symbol in &CODE_LENGTH_CODE_ORDER[..num_codes] {
        w.write_bits(cl_code.lengths()[symbol] as u32, 3)?;
    }

    for t in &tokens {
        cl_code.write_symbol(w, t.code as usize)?;
        let extra = extra_bits_for(t.code);
        if extra > 0 {
            w.write_bits(t.extra_bits as u32, extra)?;
        }
    }
    Ok(())
}

/// Read `alphabet_size` code lengths from the stream.
pub fn read_code_lengths(r: &mut BitReader, alphabet_size: usize) -> Result<Vec<u8>> {
    let start = r.bit_position();
    let num_codes = r.read_bits(4)? as usize + 4;
    let mut cl_lengths = [0u8; CODE_LENGTH_CODES];
    for &symbol in &CODE_LENGTH_CODE_ORDER[..num_codes] {
        cl_lengths[symbol] = r.read_bits(3)? as u8;
    }
    let cl_table = HuffmanTable::build(&cl_lengths)
        .ok_or_else(|| at!(Error::InvalidHuffmanCode { bit_offset: start }))?;

    let mut lengths = Vec::with_capacity(alphabet_size);
    let mut prev_value = INITIAL_PREVIOUS_LENGTH;
    while lengths.len() < alphabet_size {
        let pos = r.bit_position();
        let code = cl_table.decode(r)? as u8;
        let (value, reps) = match code {
            0..=15 => {
                if code != 0 {
                    prev_value = code;
                }
                (code, 1)
            }
            REPEAT_PREVIOUS => (prev_value, 3 + r.read_bits(2)? as usize),
            REPEAT_ZERO_SHORT => (0, 3 + r.read_bits(3)? as usize),
            _ => (0, 11 + r.read_bits(7)? as usize),
        };
        if lengths.len() + reps > alphabet_size {
            return Err(at!(Error::InvalidHuffmanCode { bit_offset: pos }));
        }
        lengths.resize(lengths.len() + reps, value);
    }
    Ok(lengths)
}

/// Read code lengths and build the decoding table.
pub fn read_table(r: &mut BitReader, alphabet_size: usize) -> Result<HuffmanTable> {
    let start = r.bit_position();
    let lengths = read_code_lengths(r, alphabet_size)?;
    HuffmanTable::build(&lengths).ok_or_else(|| at!(Error::InvalidHuffmanCode { bit_offset: start }))
}
