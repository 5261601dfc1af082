//! Lossless frame bitstream: transforms, LZ77 and Huffman-coded ARGB.
//!
//! After the frame header the stream holds an optional list of transforms
//! (subtract-green, spatial prediction with its own sub-image of predictor
//! indices) followed by the entropy-coded main image. Entropy-coded images
//! use five Huffman codes: green plus LZ77 length prefixes plus color cache
//! indices, red, blue, alpha, and distance prefixes.

use crate::bits::{BitReader, BitWriter};
use crate::color_cache::{ColorCache, MAX_CACHE_BITS};
use crate::error::{check_stop, Error, Result};
use crate::huffman::{self, HuffmanCode, HuffmanTable, MAX_CODE_LENGTH};
use crate::predict::{self, alpha, blue, green, make_argb, red, subsample_size, ARGB_BLACK};
use alloc::vec;
use alloc::vec::Vec;
use enough::Stop;
use rgb::RGBA8;
use whereat::*;

const NUM_LITERAL_CODES: usize = 256;
const NUM_LENGTH_CODES: usize = 24;
const NUM_DISTANCE_CODES: usize = 40;

/// Longest LZ77 copy.
pub const MAX_COPY_LENGTH: usize = 4096;
/// Farthest LZ77 distance, in pixels.
pub const MAX_COPY_DISTANCE: usize = 1 << 20;
const MIN_COPY_LENGTH: usize = 3;
/// Pixels reserved up front when decoding; the rest grows with the input.
const DECODE_RESERVE: usize = 1 << 16;

const HASH_BITS: u32 = 16;

const TRANSFORM_PREDICTOR: u32 = 0;
const TRANSFORM_SUBTRACT_GREEN: u32 = 1;

/// Smallest predictor block, in bits.
const MIN_BLOCK_BITS: u8 = 2;

/// Encoder knobs for the lossless path.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LosslessParams {
    /// Effort 0-6: 0 disables transforms and LZ77.
    pub method: u8,
    /// Color cache bits, 0 disables the cache.
    pub cache_bits: u8,
    /// Keep RGB values under fully transparent pixels.
    pub exact: bool,
}

#[inline]
pub(crate) fn rgba_to_argb(p: RGBA8) -> u32 {
    make_argb(p.a, p.r, p.g, p.b)
}

#[inline]
pub(crate) fn argb_to_rgba(v: u32) -> RGBA8 {
    RGBA8::new(red(v), green(v), blue(v), alpha(v))
}

fn chain_length(method: u8) -> usize {
    match method {
        0 => 0,
        1 => 4,
        2 => 8,
        3 => 16,
        4 => 32,
        5 => 64,
        _ => 128,
    }
}

fn predictor_block_bits(method: u8) -> u8 {
    match method {
        0..=2 => 5,
        3..=4 => 4,
        _ => 3,
    }
}

/// Map a copy length or distance (>= 1) to (prefix symbol, extra bit count, extra bits).
#[inline]
fn prefix_encode(value: u32) -> (u16, u8, u32) {
    let v = value - 1;
    if v < 4 {
        return (v as u16, 0, 0);
    }
    let high = 31 - v.leading_zeros();
    let second = (v >> (high - 1)) & 1;
    let extra = high - 1;
    ((2 * high + second) as u16, extra as u8, v & ((1 << extra) - 1))
}

#[inline]
fn prefix_decode(r: &mut BitReader, prefix: u16) -> Result<u32> {
    if prefix < 4 {
        return Ok(prefix as u32 + 1);
    }
    let extra = ((prefix - 2) >> 1) as u8;
    let offset = (2 + (prefix as u32 & 1)) << extra;
    Ok(offset + r.read_bits(extra)? + 1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Literal(u32),
    CacheIndex(u16),
    Copy { length: u32, distance: u32 },
}

#[inline]
fn hash_pair(a: u32, b: u32) -> usize {
    ((a.wrapping_mul(0x9e37_79b1) ^ b.wrapping_mul(0x85eb_ca6b)) >> (32 - HASH_BITS)) as usize
}

#[inline]
fn match_length(argb: &[u32], pos: usize, distance: usize, max: usize) -> usize {
    let mut len = 0;
    while len < max && argb[pos + len] == argb[pos + len - distance] {
        len += 1;
    }
    len
}

/// Greedy LZ77 parse with a hash chain, plus color cache substitution.
///
/// Distance 1 and distance `width` (the pixel above) are always tried.
fn find_tokens(argb: &[u32], width: usize, cache_bits: u8, max_chain: usize) -> Result<Vec<Token>> {
    let n = argb.len();
    let mut cache = if cache_bits > 0 {
        Some(ColorCache::new(cache_bits)?)
    } else {
        None
    };
    let mut head = vec![usize::MAX; 1 << HASH_BITS];
    let mut chain = vec![usize::MAX; n];
    let mut tokens = Vec::with_capacity(n / 2 + 1);

    let insert_hash = |head: &mut [usize], chain: &mut [usize], pos: usize| {
        if pos + 1 < n {
            let h = hash_pair(argb[pos], argb[pos + 1]);
            chain[pos] = head[h];
            head[h] = pos;
        }
    };

    let mut i = 0;
    while i < n {
        let mut best_len = 0;
        let mut best_dist = 0;
        if max_chain > 0 && i + MIN_COPY_LENGTH <= n {
            let max_len = (n - i).min(MAX_COPY_LENGTH);
            for d in [1, width] {
                if d > 0 && d <= i {
                    let len = match_length(argb, i, d, max_len);
                    if len > best_len {
                        best_len = len;
                        best_dist = d;
                    }
                }
            }
            let mut candidate = head[hash_pair(argb[i], argb[i + 1])];
            let mut steps = 0;
            while candidate != usize::MAX && steps < max_chain && best_len < max_len {
                let d = i - candidate;
                if d > MAX_COPY_DISTANCE {
                    break;
                }
                let len = match_length(argb, i, d, max_len);
                if len > best_len {
                    best_len = len;
                    best_dist = d;
                }
                candidate = chain[candidate];
                steps += 1;
            }
        }

        if best_len >= MIN_COPY_LENGTH {
            tokens.push(Token::Copy {
                length: best_len as u32,
                distance: best_dist as u32,
            });
            for k in i..i + best_len {
                insert_hash(&mut head, &mut chain, k);
                if let Some(c) = cache.as_mut() {
                    c.insert(argb[k]);
                }
            }
            i += best_len;
        } else {
            let pixel = argb[i];
            let token = match cache.as_mut() {
                Some(c) => {
                    let hit = c.lookup(pixel);
                    c.insert(pixel);
                    match hit {
                        Some(idx) => Token::CacheIndex(idx),
                        None => Token::Literal(pixel),
                    }
                }
                None => Token::Literal(pixel),
            };
            tokens.push(token);
            insert_hash(&mut head, &mut chain, i);
            i += 1;
        }
    }
    Ok(tokens)
}

/// Entropy-code `argb` (a `width`-wide raster) with its own Huffman codes.
pub(crate) fn write_entropy_image(
    w: &mut BitWriter,
    argb: &[u32],
    width: usize,
    cache_bits: u8,
    method: u8,
) -> Result<()> {
    let tokens = find_tokens(argb, width, cache_bits, chain_length(method))?;
    let cache_size = if cache_bits > 0 { 1usize << cache_bits } else { 0 };

    let mut green_freq = vec![0u32; NUM_LITERAL_CODES + NUM_LENGTH_CODES + cache_size];
    let mut red_freq = vec![0u32; NUM_LITERAL_CODES];
    let mut blue_freq = vec![0u32; NUM_LITERAL_CODES];
    let mut alpha_freq = vec![0u32; NUM_LITERAL_CODES];
    let mut dist_freq = vec![0u32; NUM_DISTANCE_CODES];
    for t in &tokens {
        match *t {
            Token::Literal(p) => {
                green_freq[green(p) as usize] += 1;
                red_freq[red(p) as usize] += 1;
                blue_freq[blue(p) as usize] += 1;
                alpha_freq[alpha(p) as usize] += 1;
            }
            Token::CacheIndex(idx) => {
                green_freq[NUM_LITERAL_CODES + NUM_LENGTH_CODES + idx as usize] += 1;
            }
            Token::Copy { length, distance } => {
                green_freq[NUM_LITERAL_CODES + prefix_encode(length).0 as usize] += 1;
                dist_freq[prefix_encode(distance).0 as usize] += 1;
            }
        }
    }

    let green_code = HuffmanCode::from_frequencies(&green_freq, MAX_CODE_LENGTH);
    let red_code = HuffmanCode::from_frequencies(&red_freq, MAX_CODE_LENGTH);
    let blue_code = HuffmanCode::from_frequencies(&blue_freq, MAX_CODE_LENGTH);
    let alpha_code = HuffmanCode::from_frequencies(&alpha_freq, MAX_CODE_LENGTH);
    let dist_code = HuffmanCode::from_frequencies(&dist_freq, MAX_CODE_LENGTH);

    w.write_bit(cache_bits > 0)?;
    if cache_bits > 0 {
        w.write_bits(cache_bits as u32, 4)?;
    }
    for code in [&green_code, &red_code, &blue_code, &alpha_code, &dist_code] {
        huffman::write_code(w, code)?;
    }

    for t in &tokens {
        match *t {
            Token::Literal(p) => {
                green_code.write_symbol(w, green(p) as usize)?;
                red_code.write_symbol(w, red(p) as usize)?;
                blue_code.write_symbol(w, blue(p) as usize)?;
                alpha_code.write_symbol(w, alpha(p) as usize)?;
            }
            Token::CacheIndex(idx) => {
                green_code.write_symbol(w, NUM_LITERAL_CODES + NUM_LENGTH_CODES + idx as usize)?;
            }
            Token::Copy { length, distance } => {
                let (sym, n, bits) = prefix_encode(length);
                green_code.write_symbol(w, NUM_LITERAL_CODES + sym as usize)?;
                w.write_bits(bits, n)?;
                let (sym, n, bits) = prefix_encode(distance);
                dist_code.write_symbol(w, sym as usize)?;
                w.write_bits(bits, n)?;
            }
        }
    }
    Ok(())
}

#[inline]
fn read_symbol(table: &HuffmanTable, r: &mut BitReader) -> Result<u16> {
    let pos = r.bit_position();
    table.decode_symbol(r)?.ok_or_else(|| {
        at!(Error::CorruptFrameData {
            bit_offset: pos,
            reason: "bits match no Huffman code",
        })
    })
}

/// Decode an entropy-coded image of `width * height` pixels.
pub(crate) fn read_entropy_image(r: &mut BitReader, width: usize, height: usize) -> Result<Vec<u32>> {
    let total = width * height;
    let mut cache = if r.read_bit()? {
        let pos = r.bit_position();
        let bits = r.read_bits(4)? as u8;
        if bits == 0 || bits > MAX_CACHE_BITS {
            return Err(at!(Error::CorruptFrameData {
                bit_offset: pos,
                reason: "color cache size out of range",
            }));
        }
        Some(ColorCache::new(bits)?)
    } else {
        None
    };
    let cache_size = cache.as_ref().map_or(0, |c| c.size());

    let green_table = huffman::read_table(r, NUM_LITERAL_CODES + NUM_LENGTH_CODES + cache_size)?;
    let red_table = huffman::read_table(r, NUM_LITERAL_CODES)?;
    let blue_table = huffman::read_table(r, NUM_LITERAL_CODES)?;
    let alpha_table = huffman::read_table(r, NUM_LITERAL_CODES)?;
    let dist_table = huffman::read_table(r, NUM_DISTANCE_CODES)?;

    let mut out: Vec<u32> = Vec::with_capacity(total.min(DECODE_RESERVE));
    while out.len() < total {
        let pos = r.bit_position();
        let g = read_symbol(&green_table, r)? as usize;
        if g < NUM_LITERAL_CODES {
            let r_value = read_symbol(&red_table, r)? as u8;
            let b_value = read_symbol(&blue_table, r)? as u8;
            let a_value = read_symbol(&alpha_table, r)? as u8;
            let pixel = make_argb(a_value, r_value, g as u8, b_value);
            out.push(pixel);
            if let Some(c) = cache.as_mut() {
                c.insert(pixel);
            }
        } else if g < NUM_LITERAL_CODES + NUM_LENGTH_CODES {
            let length = prefix_decode(r, (g - NUM_LITERAL_CODES) as u16)? as usize;
            let dist_symbol = read_symbol(&dist_table, r)?;
            let distance = prefix_decode(r, dist_symbol)? as usize;
            if distance > out.len() {
                return Err(at!(Error::CorruptFrameData {
                    bit_offset: pos,
                    reason: "copy distance reaches before the image",
                }));
            }
            if length > total - out.len() {
                return Err(at!(Error::CorruptFrameData {
                    bit_offset: pos,
                    reason: "copy runs past the end of the image",
                }));
            }
            for _ in 0..length {
                let pixel = out[out.len() - distance];
                out.push(pixel);
                if let Some(c) = cache.as_mut() {
                    c.insert(pixel);
                }
            }
        } else {
            let idx = g - NUM_LITERAL_CODES - NUM_LENGTH_CODES;
            let pixel = cache.as_ref().and_then(|c| c.get(idx)).ok_or_else(|| {
                at!(Error::CorruptFrameData {
                    bit_offset: pos,
                    reason: "color cache index out of range",
                })
            })?;
            out.push(pixel);
            if let Some(c) = cache.as_mut() {
                c.insert(pixel);
            }
        }
    }
    Ok(out)
}

/// Encode the lossless body (everything after the frame header).
pub(crate) fn encode_body(
    w: &mut BitWriter,
    pixels: &[RGBA8],
    width: usize,
    height: usize,
    params: &LosslessParams,
    stop: &dyn Stop,
) -> Result<()> {
    let mut argb: Vec<u32> = pixels
        .iter()
        .map(|&p| {
            if !params.exact && p.a == 0 {
                0
            } else {
                rgba_to_argb(p)
            }
        })
        .collect();

    if params.method > 0 {
        w.write_bit(true)?;
        w.write_bits(TRANSFORM_SUBTRACT_GREEN, 2)?;
        predict::apply_subtract_green(&mut argb);

        check_stop(stop)?;
        let block_bits = predictor_block_bits(params.method);
        w.write_bit(true)?;
        w.write_bits(TRANSFORM_PREDICTOR, 2)?;
        w.write_bits((block_bits - MIN_BLOCK_BITS) as u32, 3)?;
        let modes = predict::apply_predictor_transform(&mut argb, width, height, block_bits);
        let sub_image: Vec<u32> = modes
            .iter()
            .map(|&m| ARGB_BLACK | ((m as u32) << 8))
            .collect();
        log::debug!(
            "lossless: {}x{} predictor blocks of {} px",
            subsample_size(width, block_bits),
            subsample_size(height, block_bits),
            1u32 << block_bits
        );
        write_entropy_image(w, &sub_image, subsample_size(width, block_bits), 0, params.method)?;
    }
    w.write_bit(false)?;

    check_stop(stop)?;
    write_entropy_image(w, &argb, width, params.cache_bits, params.method)
}

enum Transform {
    Predictor {
        block_bits: u8,
        modes: Vec<u8>,
        bit_offset: u64,
    },
    SubtractGreen,
}

/// Decode the lossless body into packed ARGB pixels.
pub(crate) fn decode_body(r: &mut BitReader, width: usize, height: usize) -> Result<Vec<u32>> {
    let mut transforms: Vec<Transform> = Vec::new();
    let mut seen = [false; 2];
    loop {
        let pos = r.bit_position();
        if !r.read_bit()? {
            break;
        }
        let kind = r.read_bits(2)?;
        if kind as usize >= seen.len() {
            return Err(at!(Error::CorruptFrameData {
                bit_offset: pos,
                reason: "unknown transform type",
            }));
        }
        if seen[kind as usize] {
            return Err(at!(Error::CorruptFrameData {
                bit_offset: pos,
                reason: "transform repeated",
            }));
        }
        seen[kind as usize] = true;

        if kind == TRANSFORM_PREDICTOR {
            let block_bits = r.read_bits(3)? as u8 + MIN_BLOCK_BITS;
            let sub = read_entropy_image(
                r,
                subsample_size(width, block_bits),
                subsample_size(height, block_bits),
            )?;
            transforms.push(Transform::Predictor {
                block_bits,
                modes: sub.iter().map(|&p| green(p)).collect(),
                bit_offset: pos,
            });
        } else {
            transforms.push(Transform::SubtractGreen);
        }
    }

    let mut argb = read_entropy_image(r, width, height)?;
    for t in transforms.iter().rev() {
        match t {
            Transform::Predictor {
                block_bits,
                modes,
                bit_offset,
            } => predict::invert_predictor_transform(
                &mut argb,
                width,
                height,
                *block_bits,
                modes,
                *bit_offset,
            )?,
            Transform::SubtractGreen => predict::invert_subtract_green(&mut argb),
        }
    }
    Ok(argb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use enough::Unstoppable;

    fn gradient_pixels(width: usize, height: usize) -> Vec<RGBA8> {
        (0..width * height)
            .map(|i| {
                let x = i % width;
                let y = i / width;
                RGBA8::new(
                    (x * 255 / width.max(1)) as u8,
                    (y * 255 / height.max(1)) as u8,
                    ((x + y) * 7) as u8,
                    if (x / 3 + y / 2) % 5 == 0 { 0 } else { 255 },
                )
            })
            .collect()
    }

    fn roundtrip(pixels: &[RGBA8], width: usize, height: usize, params: LosslessParams) -> Vec<RGBA8> {
        let mut w = BitWriter::new();
        encode_body(&mut w, pixels, width, height, &params, &Unstoppable).unwrap();
        let mut r = BitReader::from_vec(w.finish());
        decode_body(&mut r, width, height)
            .unwrap()
            .into_iter()
            .map(argb_to_rgba)
            .collect()
    }

    #[test]
    fn test_prefix_coding() {
        for value in [1u32, 2, 3, 4, 5, 6, 7, 8, 9, 100, 4095, 4096, 65536, 1 << 20] {
            let (sym, n, bits) = prefix_encode(value);
            let mut w = BitWriter::new();
            w.write_bits(bits, n).unwrap();
            let mut r = BitReader::from_vec(w.finish());
            assert_eq!(prefix_decode(&mut r, sym).unwrap(), value);
        }
        assert!((prefix_encode(MAX_COPY_LENGTH as u32).0 as usize) < NUM_LENGTH_CODES);
        assert!((prefix_encode(MAX_COPY_DISTANCE as u32).0 as usize) < NUM_DISTANCE_CODES);
    }

    #[test]
    fn test_roundtrip_all_methods() {
        let (w, h) = (23, 17);
        let pixels = gradient_pixels(w, h);
        for method in 0..=6 {
            for cache_bits in [0u8, 4, 10] {
                let params = LosslessParams {
                    method,
                    cache_bits,
                    exact: true,
                };
                assert_eq!(roundtrip(&pixels, w, h, params), pixels, "method {}", method);
            }
        }
    }

    #[test]
    fn test_roundtrip_single_pixel() {
        let pixels = [RGBA8::new(1, 2, 3, 4)];
        let params = LosslessParams {
            method: 6,
            cache_bits: 0,
            exact: true,
        };
        assert_eq!(roundtrip(&pixels, 1, 1, params), pixels);
    }

    #[test]
    fn test_inexact_zeroes_transparent_rgb() {
        let pixels = vec![RGBA8::new(200, 100, 50, 0), RGBA8::new(9, 9, 9, 255)];
        let params = LosslessParams {
            method: 3,
            cache_bits: 0,
            exact: false,
        };
        let out = roundtrip(&pixels, 2, 1, params);
        assert_eq!(out[0], RGBA8::new(0, 0, 0, 0));
        assert_eq!(out[1], pixels[1]);
    }

    #[test]
    fn test_repetitive_image_uses_copies() {
        let tile = [0xff11_2233u32, 0xff44_5566, 0xff77_8899, 0xffaa_bbcc];
        let argb: Vec<u32> = (0..4096).map(|i| tile[i % 4]).collect();
        let tokens = find_tokens(&argb, 64, 0, 16).unwrap();
        assert!(tokens.len() < 16, "got {} tokens", tokens.len());
        assert!(tokens
            .iter()
            .any(|t| matches!(t, Token::Copy { distance: 4, .. })));
    }

    #[test]
    fn test_unknown_transform_rejected() {
        let mut w = BitWriter::new();
        w.write_bit(true).unwrap();
        w.write_bits(3, 2).unwrap();
        w.write_bits(0, 16).unwrap();
        let mut r = BitReader::from_vec(w.finish());
        let err = decode_body(&mut r, 4, 4).unwrap_err();
        assert!(matches!(err.error(), Error::CorruptFrameData { bit_offset: 0, .. }));
    }

    #[test]
    fn test_repeated_transform_rejected() {
        let mut w = BitWriter::new();
        for _ in 0..2 {
            w.write_bit(true).unwrap();
            w.write_bits(TRANSFORM_SUBTRACT_GREEN, 2).unwrap();
        }
        w.write_bits(0, 16).unwrap();
        let mut r = BitReader::from_vec(w.finish());
        let err = decode_body(&mut r, 4, 4).unwrap_err();
        assert!(matches!(err.error(), Error::CorruptFrameData { bit_offset: 3, .. }));
    }

    #[test]
    fn test_truncated_body() {
        let pixels = gradient_pixels(16, 16);
        let params = LosslessParams {
            method: 4,
            cache_bits: 6,
            exact: true,
        };
        let mut w = BitWriter::new();
        encode_body(&mut w, &pixels, 16, 16, &params, &Unstoppable).unwrap();
        let bytes = w.finish();
        let mut r = BitReader::new(&bytes[..bytes.len() / 2]);
        assert!(decode_body(&mut r, 16, 16).is_err());
    }
}
