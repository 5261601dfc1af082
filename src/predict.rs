//! Spatial prediction and color decorrelation on packed ARGB pixels.
//!
//! The image is split into square blocks and each block names one
//! [`Predictor`]. Encoding replaces every pixel by its residual against the
//! prediction, decoding adds the prediction back. All arithmetic wraps per
//! channel modulo 256.
//!
//! Border pixels ignore the block predictor: the top-left pixel predicts
//! opaque black, the rest of row 0 predicts from the left neighbour and the
//! rest of column 0 from the top neighbour.

use crate::error::{Error, Result};
use alloc::vec;
use alloc::vec::Vec;
use whereat::*;

/// Opaque black, the prediction for the first pixel.
pub const ARGB_BLACK: u32 = 0xff00_0000;

#[inline]
pub(crate) fn alpha(argb: u32) -> u8 {
    (argb >> 24) as u8
}

#[inline]
pub(crate) fn red(argb: u32) -> u8 {
    (argb >> 16) as u8
}

#[inline]
pub(crate) fn green(argb: u32) -> u8 {
    (argb >> 8) as u8
}

#[inline]
pub(crate) fn blue(argb: u32) -> u8 {
    argb as u8
}

#[inline]
pub(crate) fn make_argb(a: u8, r: u8, g: u8, b: u8) -> u32 {
    ((a as u32) << 24) | ((r as u32) << 16) | ((g as u32) << 8) | b as u32
}

/// Spatial predictors, numbered as transmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Predictor {
    /// Opaque black.
    Black = 0,
    /// Left neighbour.
    Left = 1,
    /// Top neighbour.
    Top = 2,
    /// Top-right neighbour (top at the last column).
    TopRight = 3,
    /// Top-left neighbour.
    TopLeft = 4,
    /// Per-channel average of left and top.
    Average = 5,
    /// Per-channel `clamp(L + T - TL)`.
    Gradient = 6,
    /// Left or top, whichever is closer to the gradient estimate.
    Select = 7,
}

impl Predictor {
    /// All predictors in index order.
    pub const ALL: [Predictor; 8] = [
        Predictor::Black,
        Predictor::Left,
        Predictor::Top,
        Predictor::TopRight,
        Predictor::TopLeft,
        Predictor::Average,
        Predictor::Gradient,
        Predictor::Select,
    ];

    /// Look up a predictor by its transmitted index.
    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }
}

#[inline]
fn average2(a: u32, b: u32) -> u32 {
    make_argb(
        ((alpha(a) as u16 + alpha(b) as u16) / 2) as u8,
        ((red(a) as u16 + red(b) as u16) / 2) as u8,
        ((green(a) as u16 + green(b) as u16) / 2) as u8,
        ((blue(a) as u16 + blue(b) as u16) / 2) as u8,
    )
}

#[inline]
fn gradient_channel(l: u8, t: u8, tl: u8) -> u8 {
    (l as i16 + t as i16 - tl as i16).clamp(0, 255) as u8
}

#[inline]
fn gradient(left: u32, top: u32, top_left: u32) -> u32 {
    make_argb(
        gradient_channel(alpha(left), alpha(top), alpha(top_left)),
        gradient_channel(red(left), red(top), red(top_left)),
        gradient_channel(green(left), green(top), green(top_left)),
        gradient_channel(blue(left), blue(top), blue(top_left)),
    )
}

#[inline]
fn channel_distance(a: u32, b: u32) -> u32 {
    let d = |x: u8, y: u8| (x as i16 - y as i16).unsigned_abs() as u32;
    d(alpha(a), alpha(b)) + d(red(a), red(b)) + d(green(a), green(b)) + d(blue(a), blue(b))
}

/// Ties choose top.
#[inline]
fn select(left: u32, top: u32, top_left: u32) -> u32 {
    let to_left = channel_distance(top, top_left);
    let to_top = channel_distance(left, top_left);
    if to_left < to_top {
        left
    } else {
        top
    }
}

/// Prediction for the pixel at (`x`, `y`) from already known pixels in
/// `pixels` (a `width`-wide raster).
#[inline]
pub fn predict(mode: Predictor, pixels: &[u32], width: usize, x: usize, y: usize) -> u32 {
    let i = y * width + x;
    if y == 0 {
        return if x == 0 { ARGB_BLACK } else { pixels[i - 1] };
    }
    let top = pixels[i - width];
    if x == 0 {
        return top;
    }
    let left = pixels[i - 1];
    let top_left = pixels[i - width - 1];
    match mode {
        Predictor::Black => ARGB_BLACK,
        Predictor::Left => left,
        Predictor::Top => top,
        Predictor::TopRight => {
            if x + 1 < width {
                pixels[i - width + 1]
            } else {
                top
            }
        }
        Predictor::TopLeft => top_left,
        Predictor::Average => average2(left, top),
        Predictor::Gradient => gradient(left, top, top_left),
        Predictor::Select => select(left, top, top_left),
    }
}

/// Per-channel `pixel - prediction`, wrapping.
#[inline]
pub fn sub_pixels(pixel: u32, pred: u32) -> u32 {
    make_argb(
        alpha(pixel).wrapping_sub(alpha(pred)),
        red(pixel).wrapping_sub(red(pred)),
        green(pixel).wrapping_sub(green(pred)),
        blue(pixel).wrapping_sub(blue(pred)),
    )
}

/// Per-channel `residual + prediction`, wrapping.
#[inline]
pub fn add_pixels(residual: u32, pred: u32) -> u32 {
    make_argb(
        alpha(residual).wrapping_add(alpha(pred)),
        red(residual).wrapping_add(red(pred)),
        green(residual).wrapping_add(green(pred)),
        blue(residual).wrapping_add(blue(pred)),
    )
}

/// Number of blocks needed to cover `size` pixels with blocks of `1 << bits`.
#[inline]
pub fn subsample_size(size: usize, bits: u8) -> usize {
    (size + (1 << bits) - 1) >> bits
}

/// Sum of absolute residuals, each channel read as a signed byte.
#[inline]
fn residual_cost(res: u32) -> u32 {
    let c = |v: u8| (v as i8).unsigned_abs() as u32;
    c(alpha(res)) + c(red(res)) + c(green(res)) + c(blue(res))
}

fn choose_predictor(
    pixels: &[u32],
    width: usize,
    height: usize,
    bx: usize,
    by: usize,
    block_bits: u8,
) -> Predictor {
    let x_start = bx << block_bits;
    let y_start = by << block_bits;
    let x_end = (x_start + (1 << block_bits)).min(width);
    let y_end = (y_start + (1 << block_bits)).min(height);

    let mut best = Predictor::Top;
    let mut best_cost = u64::MAX;
    for mode in Predictor::ALL {
        let mut cost = 0u64;
        for y in y_start..y_end {
            for x in x_start..x_end {
                let pred = predict(mode, pixels, width, x, y);
                cost += residual_cost(sub_pixels(pixels[y * width + x], pred)) as u64;
            }
            if cost >= best_cost {
                break;
            }
        }
        if cost < best_cost {
            best_cost = cost;
            best = mode;
        }
    }
    best
}

/// Replace `pixels` by prediction residuals.
///
/// Picks, per block of `1 << block_bits` pixels square, the predictor with
/// the smallest sum of absolute residuals. Returns the chosen predictor
/// indices, one per block in raster order.
pub fn apply_predictor_transform(
    pixels: &mut [u32],
    width: usize,
    height: usize,
    block_bits: u8,
) -> Vec<u8> {
    let blocks_x = subsample_size(width, block_bits);
    let blocks_y = subsample_size(height, block_bits);
    let mut modes = vec![0u8; blocks_x * blocks_y];
    for by in 0..blocks_y {
        for bx in 0..blocks_x {
            modes[by * blocks_x + bx] =
                choose_predictor(pixels, width, height, bx, by, block_bits) as u8;
        }
    }

    // Reverse order keeps every neighbour unmodified when it is read.
    for y in (0..height).rev() {
        for x in (0..width).rev() {
            let mode = Predictor::ALL[modes[(y >> block_bits) * blocks_x + (x >> block_bits)] as usize];
            let pred = predict(mode, pixels, width, x, y);
            let i = y * width + x;
            pixels[i] = sub_pixels(pixels[i], pred);
        }
    }
    modes
}

/// Undo [`apply_predictor_transform`] in place.
///
/// `modes` holds one predictor index per block. An index above 7 fails with
/// [`Error::CorruptFrameData`] reporting `bit_offset`.
pub fn invert_predictor_transform(
    pixels: &mut [u32],
    width: usize,
    height: usize,
    block_bits: u8,
    modes: &[u8],
    bit_offset: u64,
) -> Result<()> {
    let blocks_x = subsample_size(width, block_bits);
    let mut table = Vec::with_capacity(modes.len());
    for &m in modes {
        let mode = Predictor::from_index(m).ok_or_else(|| {
            at!(Error::CorruptFrameData {
                bit_offset,
                reason: "predictor index out of range",
            })
        })?;
        table.push(mode);
    }
    if table.len() < blocks_x * subsample_size(height, block_bits) {
        return Err(at!(Error::CorruptFrameData {
            bit_offset,
            reason: "predictor image too small",
        }));
    }

    for y in 0..height {
        for x in 0..width {
            let mode = table[(y >> block_bits) * blocks_x + (x >> block_bits)];
            let pred = predict(mode, pixels, width, x, y);
            let i = y * width + x;
            pixels[i] = add_pixels(pixels[i], pred);
        }
    }
    Ok(())
}

/// Subtract green from red and blue, wrapping.
pub fn apply_subtract_green(pixels: &mut [u32]) {
    for p in pixels.iter_mut() {
        let g = green(*p);
        *p = make_argb(alpha(*p), red(*p).wrapping_sub(g), g, blue(*p).wrapping_sub(g));
    }
}

/// Add green back to red and blue, wrapping.
pub fn invert_subtract_green(pixels: &mut [u32]) {
    for p in pixels.iter_mut() {
        let g = green(*p);
        *p = make_argb(alpha(*p), red(*p).wrapping_add(g), g, blue(*p).wrapping_add(g));
    }
}
