//! Lossy frame bitstream: 8x8 DCT with quality-scaled quantization.
//!
//! Pixels are converted to YCbCr (full range, no chroma subsampling) and
//! split into 8x8 blocks, replicating the last row and column to pad. Each
//! block of each plane is transformed with an integer DCT, quantized, and
//! coded as a DC difference plus AC run/size symbols under two Huffman
//! codes. Alpha, when present, follows as a lossless entropy-coded plane.

use crate::bits::{BitReader, BitWriter};
use crate::error::{check_stop, Error, Result};
use crate::huffman::{self, HuffmanCode, HuffmanTable, MAX_CODE_LENGTH};
use crate::lossless;
use crate::predict::{green, make_argb};
use alloc::vec::Vec;
use enough::Stop;
use rgb::RGBA8;
use whereat::*;

const BLOCK: usize = 8;
const DC_SYMBOLS: usize = 16;
const AC_SYMBOLS: usize = 256;
const END_OF_BLOCK: u8 = 0x00;
const ZERO_RUN_16: u8 = 0xf0;

/// Largest quantized coefficient magnitude. The DCT of 8-bit samples stays
/// within +-1024; anything past this bound is corrupt input.
const MAX_COEF: i32 = 2048;

/// Effort used for the alpha plane.
const ALPHA_METHOD: u8 = 4;

/// `round(4096 * c(u) / 2 * cos((2x + 1) * u * pi / 16))`, with `c(0) = 1/sqrt(2)`
/// and `c(u) = 1` otherwise. Indexed `[u][x]`.
const COS_TABLE: [[i32; 8]; 8] = [
    [1448, 1448, 1448, 1448, 1448, 1448, 1448, 1448],
    [2009, 1703, 1138, 400, -400, -1138, -1703, -2009],
    [1892, 784, -784, -1892, -1892, -784, 784, 1892],
    [1703, -400, -2009, -1138, 1138, 2009, 400, -1703],
    [1448, -1448, -1448, 1448, 1448, -1448, -1448, 1448],
    [1138, -2009, 400, 1703, -1703, -400, 2009, -1138],
    [784, -1892, 1892, -784, -784, 1892, -1892, 784],
    [400, -1138, 1703, -2009, 2009, -1703, 1138, -400],
];

/// Two table factors of 4096 each.
const DCT_SHIFT: u32 = 24;

/// Natural (row-major) index of the k-th coefficient in zigzag order.
const ZIGZAG: [usize; 64] = [
    0, 1, 8, 16, 9, 2, 3, 10, 17, 24, 32, 25, 18, 11, 4, 5, 12, 19, 26, 33, 40, 48, 41, 34, 27,
    20, 13, 6, 7, 14, 21, 28, 35, 42, 49, 56, 57, 50, 43, 36, 29, 22, 15, 23, 30, 37, 44, 51, 58,
    59, 52, 45, 38, 31, 39, 46, 53, 60, 61, 54, 47, 55, 62, 63,
];

/// Base luma quantization matrix, row-major.
const LUMA_QUANT: [u8; 64] = [
    16, 11, 10, 16, 24, 40, 51, 61, //
    12, 12, 14, 19, 26, 58, 60, 55, //
    14, 13, 16, 24, 40, 57, 69, 56, //
    14, 17, 22, 29, 51, 87, 80, 62, //
    18, 22, 37, 56, 68, 109, 103, 77, //
    24, 35, 55, 64, 81, 104, 113, 92, //
    49, 64, 78, 87, 103, 121, 120, 101, //
    72, 92, 95, 98, 112, 100, 103, 99,
];

/// Base chroma quantization matrix, row-major.
const CHROMA_QUANT: [u8; 64] = [
    17, 18, 24, 47, 99, 99, 99, 99, //
    18, 21, 26, 66, 99, 99, 99, 99, //
    24, 26, 56, 99, 99, 99, 99, 99, //
    47, 66, 99, 99, 99, 99, 99, 99, //
    99, 99, 99, 99, 99, 99, 99, 99, //
    99, 99, 99, 99, 99, 99, 99, 99, //
    99, 99, 99, 99, 99, 99, 99, 99, //
    99, 99, 99, 99, 99, 99, 99, 99,
];

/// Quantization matrix for `base` at `quality` (0-100, 0 treated as 1).
pub(crate) fn quant_table(base: &[u8; 64], quality: u8) -> [i32; 64] {
    let q = quality.clamp(1, 100) as u32;
    let scale = if q < 50 { 5000 / q } else { 200 - 2 * q };
    let mut out = [1i32; 64];
    for (o, &b) in out.iter_mut().zip(base.iter()) {
        *o = ((b as u32 * scale + 50) / 100).clamp(1, 255) as i32;
    }
    out
}

fn forward_dct(block: &[i32; 64]) -> [i32; 64] {
    let mut tmp = [0i64; 64];
    for y in 0..BLOCK {
        for u in 0..BLOCK {
            let mut s = 0i64;
            for x in 0..BLOCK {
                s += COS_TABLE[u][x] as i64 * block[y * BLOCK + x] as i64;
            }
            tmp[y * BLOCK + u] = s;
        }
    }
    let mut out = [0i32; 64];
    for v in 0..BLOCK {
        for u in 0..BLOCK {
            let mut s = 0i64;
            for y in 0..BLOCK {
                s += COS_TABLE[v][y] as i64 * tmp[y * BLOCK + u];
            }
            out[v * BLOCK + u] = ((s + (1 << (DCT_SHIFT - 1))) >> DCT_SHIFT) as i32;
        }
    }
    out
}

fn inverse_dct(coefs: &[i32; 64]) -> [i32; 64] {
    let mut tmp = [0i64; 64];
    for v in 0..BLOCK {
        for x in 0..BLOCK {
            let mut s = 0i64;
            for u in 0..BLOCK {
                s += COS_TABLE[u][x] as i64 * coefs[v * BLOCK + u] as i64;
            }
            tmp[v * BLOCK + x] = s;
        }
    }
    let mut out = [0i32; 64];
    for y in 0..BLOCK {
        for x in 0..BLOCK {
            let mut s = 0i64;
            for v in 0..BLOCK {
                s += COS_TABLE[v][y] as i64 * tmp[v * BLOCK + x];
            }
            out[y * BLOCK + x] = ((s + (1 << (DCT_SHIFT - 1))) >> DCT_SHIFT) as i32;
        }
    }
    out
}

#[inline]
fn quantize(coef: i32, q: i32) -> i32 {
    if coef >= 0 {
        (coef + q / 2) / q
    } else {
        -((-coef + q / 2) / q)
    }
}

/// Bits needed for the magnitude of `v`.
#[inline]
fn magnitude_bits(v: i32) -> u8 {
    (32 - v.unsigned_abs().leading_zeros()) as u8
}

#[inline]
fn magnitude_code(v: i32, size: u8) -> u32 {
    if v >= 0 {
        v as u32
    } else {
        (v + (1 << size) - 1) as u32
    }
}

#[inline]
fn extend(bits: u32, size: u8) -> i32 {
    if size == 0 {
        0
    } else if bits < (1 << (size - 1)) {
        bits as i32 - (1 << size) + 1
    } else {
        bits as i32
    }
}

#[inline]
fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

fn to_ycbcr(p: RGBA8) -> [i32; 3] {
    let (r, g, b) = (p.r as i32, p.g as i32, p.b as i32);
    let y = (19595 * r + 38470 * g + 7471 * b + 32768) >> 16;
    let cb = ((-11059 * r - 21709 * g + 32768 * b + 32768) >> 16) + 128;
    let cr = ((32768 * r - 27439 * g - 5329 * b + 32768) >> 16) + 128;
    [clamp_u8(y) as i32, clamp_u8(cb) as i32, clamp_u8(cr) as i32]
}

fn to_rgb(y: i32, cb: i32, cr: i32) -> (u8, u8, u8) {
    let cb = cb - 128;
    let cr = cr - 128;
    let r = y + ((91881 * cr + 32768) >> 16);
    let g = y - ((22554 * cb + 46802 * cr + 32768) >> 16);
    let b = y + ((116130 * cb + 32768) >> 16);
    (clamp_u8(r), clamp_u8(g), clamp_u8(b))
}

#[derive(Debug, Clone, Copy)]
struct Symbol {
    ac: bool,
    code: u8,
    size: u8,
    bits: u32,
}

fn push_block_symbols(
    zz: &[i32; 64],
    prev_dc: &mut i32,
    symbols: &mut Vec<Symbol>,
    dc_freq: &mut [u32; DC_SYMBOLS],
    ac_freq: &mut [u32; AC_SYMBOLS],
) {
    let diff = zz[0] - *prev_dc;
    *prev_dc = zz[0];
    let size = magnitude_bits(diff);
    dc_freq[size as usize] += 1;
    symbols.push(Symbol {
        ac: false,
        code: size,
        size,
        bits: magnitude_code(diff, size),
    });

    let mut run = 0u8;
    for &v in &zz[1..] {
        if v == 0 {
            run += 1;
            continue;
        }
        while run > 15 {
            ac_freq[ZERO_RUN_16 as usize] += 1;
            symbols.push(Symbol {
                ac: true,
                code: ZERO_RUN_16,
                size: 0,
                bits: 0,
            });
            run -= 16;
        }
        let size = magnitude_bits(v);
        let code = (run << 4) | size;
        ac_freq[code as usize] += 1;
        symbols.push(Symbol {
            ac: true,
            code,
            size,
            bits: magnitude_code(v, size),
        });
        run = 0;
    }
    if run > 0 {
        ac_freq[END_OF_BLOCK as usize] += 1;
        symbols.push(Symbol {
            ac: true,
            code: END_OF_BLOCK,
            size: 0,
            bits: 0,
        });
    }
}

/// Encode the lossy body (everything after the frame header).
pub(crate) fn encode_body(
    w: &mut BitWriter,
    pixels: &[RGBA8],
    width: usize,
    height: usize,
    quality: u8,
    has_alpha: bool,
    stop: &dyn Stop,
) -> Result<()> {
    let quality = quality.min(100);
    let blocks_x = width.div_ceil(BLOCK);
    let blocks_y = height.div_ceil(BLOCK);
    w.write_bits(quality as u32, 7)?;
    w.write_bits((blocks_x * blocks_y) as u32, 24)?;

    let tables = [
        quant_table(&LUMA_QUANT, quality),
        quant_table(&CHROMA_QUANT, quality),
    ];
    let mut symbols = Vec::new();
    let mut dc_freq = [0u32; DC_SYMBOLS];
    let mut ac_freq = [0u32; AC_SYMBOLS];
    let mut prev_dc = [0i32; 3];
    let mut block = [[0i32; 64]; 3];

    for by in 0..blocks_y {
        check_stop(stop)?;
        for bx in 0..blocks_x {
            for dy in 0..BLOCK {
                let y = (by * BLOCK + dy).min(height - 1);
                for dx in 0..BLOCK {
                    let x = (bx * BLOCK + dx).min(width - 1);
                    let ycc = to_ycbcr(pixels[y * width + x]);
                    for plane in 0..3 {
                        block[plane][dy * BLOCK + dx] = ycc[plane] - 128;
                    }
                }
            }
            for plane in 0..3 {
                let table = &tables[(plane > 0) as usize];
                let coefs = forward_dct(&block[plane]);
                let mut zz = [0i32; 64];
                for (k, &n) in ZIGZAG.iter().enumerate() {
                    zz[k] = quantize(coefs[n], table[n]);
                }
                push_block_symbols(
                    &zz,
                    &mut prev_dc[plane],
                    &mut symbols,
                    &mut dc_freq,
                    &mut ac_freq,
                );
            }
        }
    }

    let dc_code = HuffmanCode::from_frequencies(&dc_freq, MAX_CODE_LENGTH);
    let ac_code = HuffmanCode::from_frequencies(&ac_freq, MAX_CODE_LENGTH);
    huffman::write_code(w, &dc_code)?;
    huffman::write_code(w, &ac_code)?;
    for s in &symbols {
        let code = if s.ac { &ac_code } else { &dc_code };
        code.write_symbol(w, s.code as usize)?;
        if s.size > 0 {
            w.write_bits(s.bits, s.size)?;
        }
    }

    if has_alpha {
        check_stop(stop)?;
        let plane: Vec<u32> = pixels
            .iter()
            .map(|p| make_argb(0xff, 0, p.a, 0))
            .collect();
        lossless::write_entropy_image(w, &plane, width, 0, ALPHA_METHOD)?;
    }
    Ok(())
}

#[inline]
fn read_symbol(table: &HuffmanTable, r: &mut BitReader) -> Result<u8> {
    let pos = r.bit_position();
    let symbol = table.decode_symbol(r)?.ok_or_else(|| {
        at!(Error::CorruptFrameData {
            bit_offset: pos,
            reason: "bits match no Huffman code",
        })
    })?;
    Ok(symbol as u8)
}

fn read_block(
    r: &mut BitReader,
    dc_table: &HuffmanTable,
    ac_table: &HuffmanTable,
    prev_dc: &mut i32,
) -> Result<[i32; 64]> {
    let mut zz = [0i32; 64];
    let pos = r.bit_position();
    let size = read_symbol(dc_table, r)?;
    let diff = extend(r.read_bits(size)?, size);
    *prev_dc += diff;
    if prev_dc.abs() > MAX_COEF {
        return Err(at!(Error::CorruptFrameData {
            bit_offset: pos,
            reason: "coefficient out of range",
        }));
    }
    zz[0] = *prev_dc;

    let mut k = 1;
    while k < 64 {
        let pos = r.bit_position();
        let code = read_symbol(ac_table, r)?;
        if code == END_OF_BLOCK {
            break;
        }
        let run = (code >> 4) as usize;
        let size = code & 0x0f;
        if size == 0 {
            if code != ZERO_RUN_16 {
                return Err(at!(Error::CorruptFrameData {
                    bit_offset: pos,
                    reason: "invalid AC run/size symbol",
                }));
            }
            k += 16;
            if k > 63 {
                return Err(at!(Error::CorruptFrameData {
                    bit_offset: pos,
                    reason: "AC run past end of block",
                }));
            }
            continue;
        }
        k += run;
        if k > 63 {
            return Err(at!(Error::CorruptFrameData {
                bit_offset: pos,
                reason: "AC run past end of block",
            }));
        }
        let value = extend(r.read_bits(size)?, size);
        if value.abs() > MAX_COEF {
            return Err(at!(Error::CorruptFrameData {
                bit_offset: pos,
                reason: "coefficient out of range",
            }));
        }
        zz[k] = value;
        k += 1;
    }
    Ok(zz)
}

/// Decode the lossy body into RGBA pixels.
pub(crate) fn decode_body(
    r: &mut BitReader,
    width: usize,
    height: usize,
    has_alpha: bool,
) -> Result<Vec<RGBA8>> {
    let pos = r.bit_position();
    let quality = r.read_bits(7)? as u8;
    if quality > 100 {
        return Err(at!(Error::CorruptFrameData {
            bit_offset: pos,
            reason: "quality out of range",
        }));
    }
    let blocks_x = width.div_ceil(BLOCK);
    let blocks_y = height.div_ceil(BLOCK);
    let pos = r.bit_position();
    let block_count = r.read_bits(24)? as usize;
    if block_count != blocks_x * blocks_y {
        return Err(at!(Error::CorruptFrameData {
            bit_offset: pos,
            reason: "block count does not match frame size",
        }));
    }

    let tables = [
        quant_table(&LUMA_QUANT, quality),
        quant_table(&CHROMA_QUANT, quality),
    ];
    let dc_table = huffman::read_table(r, DC_SYMBOLS)?;
    let ac_table = huffman::read_table(r, AC_SYMBOLS)?;

    let stride = blocks_x * BLOCK;
    // Planes grow one block row at a time, as data arrives.
    let mut planes: [Vec<u8>; 3] = Default::default();
    let mut prev_dc = [0i32; 3];
    for by in 0..blocks_y {
        for p in &mut planes {
            p.resize((by + 1) * BLOCK * stride, 0);
        }
        for bx in 0..blocks_x {
            for plane in 0..3 {
                let table = &tables[(plane > 0) as usize];
                let zz = read_block(r, &dc_table, &ac_table, &mut prev_dc[plane])?;
                let mut coefs = [0i32; 64];
                for (k, &n) in ZIGZAG.iter().enumerate() {
                    coefs[n] = zz[k] * table[n];
                }
                let samples = inverse_dct(&coefs);
                for dy in 0..BLOCK {
                    let row = (by * BLOCK + dy) * stride + bx * BLOCK;
                    for dx in 0..BLOCK {
                        planes[plane][row + dx] = clamp_u8(samples[dy * BLOCK + dx] + 128);
                    }
                }
            }
        }
    }

    let alpha = if has_alpha {
        Some(lossless::read_entropy_image(r, width, height)?)
    } else {
        None
    };

    let mut out = Vec::with_capacity(width * height);
    for y in 0..height {
        for x in 0..width {
            let i = y * stride + x;
            let (red, green_v, blue) = to_rgb(
                planes[0][i] as i32,
                planes[1][i] as i32,
                planes[2][i] as i32,
            );
            let a = alpha.as_ref().map_or(0xff, |a| green(a[y * width + x]));
            out.push(RGBA8::new(red, green_v, blue, a));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use enough::Unstoppable;

    fn gradient(width: usize, height: usize) -> Vec<RGBA8> {
        (0..width * height)
            .map(|i| {
                let x = i % width;
                let y = i / width;
                RGBA8::new(
                    (x * 255 / (width - 1).max(1)) as u8,
                    (y * 255 / (height - 1).max(1)) as u8,
                    ((x + y) * 255 / (width + height - 2).max(1)) as u8,
                    255,
                )
            })
            .collect()
    }

    fn encode_decode(px: &[RGBA8], w: usize, h: usize, q: u8, alpha: bool) -> (Vec<RGBA8>, usize) {
        let mut bw = BitWriter::new();
        encode_body(&mut bw, px, w, h, q, alpha, &Unstoppable).unwrap();
        let bytes = bw.finish();
        let len = bytes.len();
        let mut r = BitReader::from_vec(bytes);
        (decode_body(&mut r, w, h, alpha).unwrap(), len)
    }

    fn max_error(a: &[RGBA8], b: &[RGBA8]) -> i32 {
        a.iter()
            .zip(b)
            .flat_map(|(p, q)| {
                [
                    (p.r as i32 - q.r as i32).abs(),
                    (p.g as i32 - q.g as i32).abs(),
                    (p.b as i32 - q.b as i32).abs(),
                    (p.a as i32 - q.a as i32).abs(),
                ]
            })
            .max()
            .unwrap_or(0)
    }

    #[test]
    fn test_dct_roundtrip_is_near_exact() {
        let mut block = [0i32; 64];
        for (i, v) in block.iter_mut().enumerate() {
            *v = ((i * 37) % 256) as i32 - 128;
        }
        let back = inverse_dct(&forward_dct(&block));
        for (a, b) in block.iter().zip(back.iter()) {
            assert!((a - b).abs() <= 2, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_flat_block_has_only_dc() {
        let block = [50i32; 64];
        let coefs = forward_dct(&block);
        assert_eq!(coefs[0], 400);
        assert!(coefs[1..].iter().all(|&c| c == 0));
    }

    #[test]
    fn test_magnitude_coding() {
        for v in [-1024, -255, -3, -1, 0, 1, 2, 7, 8, 1023] {
            let size = magnitude_bits(v);
            assert_eq!(extend(magnitude_code(v, size), size), v);
        }
        assert_eq!(magnitude_bits(0), 0);
        assert_eq!(magnitude_bits(-4), 3);
    }

    #[test]
    fn test_quant_table_scaling() {
        assert!(quant_table(&LUMA_QUANT, 100).iter().all(|&q| q == 1));
        assert_eq!(quant_table(&LUMA_QUANT, 50)[0], 16);
        assert_eq!(quant_table(&LUMA_QUANT, 0), quant_table(&LUMA_QUANT, 1));
        assert!(quant_table(&CHROMA_QUANT, 10).iter().all(|&q| q <= 255));
    }

    #[test]
    fn test_color_conversion_roundtrip() {
        for &(r, g, b) in &[(0u8, 0u8, 0u8), (255, 255, 255), (255, 0, 0), (12, 200, 77)] {
            let [y, cb, cr] = to_ycbcr(RGBA8::new(r, g, b, 255));
            let (r2, g2, b2) = to_rgb(y, cb, cr);
            assert!((r as i32 - r2 as i32).abs() <= 2);
            assert!((g as i32 - g2 as i32).abs() <= 2);
            assert!((b as i32 - b2 as i32).abs() <= 2);
        }
    }

    #[test]
    fn test_high_quality_close() {
        let (w, h) = (19, 13);
        let px = gradient(w, h);
        let (out, _) = encode_decode(&px, w, h, 100, false);
        assert_eq!(out.len(), px.len());
        assert!(max_error(&px, &out) <= 8);
    }

    #[test]
    fn test_lower_quality_is_smaller() {
        let (w, h) = (32, 32);
        let px: Vec<RGBA8> = (0..w * h)
            .map(|i| RGBA8::new((i * 31) as u8, (i * 7) as u8, (i / 3) as u8, 255))
            .collect();
        let (_, high) = encode_decode(&px, w, h, 95, false);
        let (_, low) = encode_decode(&px, w, h, 10, false);
        assert!(low < high, "q10 {} bytes, q95 {} bytes", low, high);
    }

    #[test]
    fn test_alpha_is_lossless() {
        let (w, h) = (10, 6);
        let px: Vec<RGBA8> = (0..w * h)
            .map(|i| RGBA8::new(100, 150, 200, (i * 13) as u8))
            .collect();
        let (out, _) = encode_decode(&px, w, h, 40, true);
        for (a, b) in px.iter().zip(out.iter()) {
            assert_eq!(a.a, b.a);
        }
    }

    /// Hand-built body for a `width` x `height` frame that emits `blocks`
    /// blocks (times three planes) through `emit`.
    fn crafted_body(
        width: usize,
        height: usize,
        quality: u8,
        blocks: usize,
        emit: impl Fn(&mut BitWriter, &HuffmanCode, &HuffmanCode),
    ) -> BitReader {
        // Symbol 0 and end-of-block get the all-zero codes, so zero padding
        // reads as flat blocks.
        let mut dc_freq = [0u32; DC_SYMBOLS];
        dc_freq[0] = 4;
        dc_freq[11] = 1;
        dc_freq[15] = 1;
        let mut ac_freq = [0u32; AC_SYMBOLS];
        ac_freq[END_OF_BLOCK as usize] = 4;
        ac_freq[ZERO_RUN_16 as usize] = 1;
        ac_freq[0x0f] = 1;
        let dc = HuffmanCode::from_frequencies(&dc_freq, MAX_CODE_LENGTH);
        let ac = HuffmanCode::from_frequencies(&ac_freq, MAX_CODE_LENGTH);

        let mut w = BitWriter::new();
        w.write_bits(quality as u32, 7).unwrap();
        let count = width.div_ceil(BLOCK) * height.div_ceil(BLOCK);
        w.write_bits(count as u32, 24).unwrap();
        huffman::write_code(&mut w, &dc).unwrap();
        huffman::write_code(&mut w, &ac).unwrap();
        for _ in 0..blocks * 3 {
            emit(&mut w, &dc, &ac);
        }
        BitReader::from_vec(w.finish())
    }

    fn is_corrupt(err: &whereat::At<Error>, expected: &str) -> bool {
        matches!(err.error(), Error::CorruptFrameData { reason, .. } if *reason == expected)
    }

    #[test]
    fn test_crafted_flat_blocks_decode() {
        let mut r = crafted_body(16, 8, 50, 2, |w, dc, ac| {
            dc.write_symbol(w, 0).unwrap();
            ac.write_symbol(w, END_OF_BLOCK as usize).unwrap();
        });
        let out = decode_body(&mut r, 16, 8, false).unwrap();
        assert!(out.iter().all(|&p| p == RGBA8::new(128, 128, 128, 255)));
    }

    #[test]
    fn test_huge_dc_difference_rejected() {
        let mut r = crafted_body(2400, 8, 1, 300, |w, dc, ac| {
            dc.write_symbol(w, 15).unwrap();
            w.write_bits(0x7fff, 15).unwrap();
            ac.write_symbol(w, END_OF_BLOCK as usize).unwrap();
        });
        let err = decode_body(&mut r, 2400, 8, false).unwrap_err();
        assert!(is_corrupt(&err, "coefficient out of range"), "{:?}", err);
    }

    #[test]
    fn test_accumulated_dc_rejected() {
        // +1024 per block stays legal for two blocks, the third overflows.
        let mut r = crafted_body(2400, 8, 1, 300, |w, dc, ac| {
            dc.write_symbol(w, 11).unwrap();
            w.write_bits(1024, 11).unwrap();
            ac.write_symbol(w, END_OF_BLOCK as usize).unwrap();
        });
        let err = decode_body(&mut r, 2400, 8, false).unwrap_err();
        assert!(is_corrupt(&err, "coefficient out of range"), "{:?}", err);
    }

    #[test]
    fn test_huge_ac_value_rejected() {
        let mut r = crafted_body(8, 8, 1, 1, |w, dc, ac| {
            dc.write_symbol(w, 0).unwrap();
            ac.write_symbol(w, 0x0f).unwrap();
            w.write_bits(0x7fff, 15).unwrap();
            ac.write_symbol(w, END_OF_BLOCK as usize).unwrap();
        });
        let err = decode_body(&mut r, 8, 8, false).unwrap_err();
        assert!(is_corrupt(&err, "coefficient out of range"), "{:?}", err);
    }

    #[test]
    fn test_zero_run_past_block_end_rejected() {
        let mut r = crafted_body(8, 8, 50, 1, |w, dc, ac| {
            dc.write_symbol(w, 0).unwrap();
            for _ in 0..4 {
                ac.write_symbol(w, ZERO_RUN_16 as usize).unwrap();
            }
        });
        let err = decode_body(&mut r, 8, 8, false).unwrap_err();
        assert!(is_corrupt(&err, "AC run past end of block"), "{:?}", err);
    }

    #[test]
    fn test_oversized_claim_fails_on_truncation() {
        // 16384x16384 with only a couple of blocks of data behind it.
        let mut r = crafted_body(16384, 16384, 50, 2, |w, dc, ac| {
            dc.write_symbol(w, 0).unwrap();
            ac.write_symbol(w, END_OF_BLOCK as usize).unwrap();
        });
        let err = decode_body(&mut r, 16384, 16384, false).unwrap_err();
        assert!(matches!(err.error(), Error::TruncatedStream { .. }), "{:?}", err);
    }

    #[test]
    fn test_block_count_mismatch() {
        let px = gradient(16, 16);
        let mut bw = BitWriter::new();
        encode_body(&mut bw, &px, 16, 16, 50, false, &Unstoppable).unwrap();
        let mut r = BitReader::from_vec(bw.finish());
        // 16x16 holds 4 blocks; claim the frame is 24 wide (6 blocks).
        let err = decode_body(&mut r, 24, 16, false).unwrap_err();
        assert!(matches!(
            err.error(),
            Error::CorruptFrameData { bit_offset: 7, .. }
        ));
    }
}
