//! Core types for image data representation.

use crate::container::Demuxer;
use crate::frame::FrameMode;
use alloc::vec::Vec;
use core::fmt;
use core::num::NonZeroU16;
use imgref::ImgVec;
use rgb::alt::{BGR8, BGRA8};
use rgb::{RGB8, RGBA8};

/// A decoded frame: width x height RGBA pixels.
pub type PixelPlane = ImgVec<RGBA8>;

/// Pixel format for encoding/decoding operations.
///
/// This enum describes the channel order and layout for byte-oriented APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum PixelFormat {
    /// RGBA - 4 bytes per pixel (red, green, blue, alpha)
    Rgba,
    /// BGRA - 4 bytes per pixel (blue, green, red, alpha) - Windows/GPU native
    Bgra,
    /// RGB - 3 bytes per pixel (red, green, blue)
    Rgb,
    /// BGR - 3 bytes per pixel (blue, green, red) - OpenCV native
    Bgr,
}

impl PixelFormat {
    /// Bytes per pixel for this format.
    #[must_use]
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgba | PixelFormat::Bgra => 4,
            PixelFormat::Rgb | PixelFormat::Bgr => 3,
        }
    }

    /// Whether this format has an alpha channel.
    #[must_use]
    pub const fn has_alpha(self) -> bool {
        matches!(self, PixelFormat::Rgba | PixelFormat::Bgra)
    }
}

/// Pixel types the codec accepts and produces.
///
/// Frames are always coded as RGBA; other layouts are converted on the way
/// in and out. Formats without alpha are treated as opaque.
///
/// # Example
///
/// ```rust
/// use riffcodec::{Encoder, Unstoppable};
/// use rgb::RGB8;
///
/// let pixels = vec![RGB8::new(200, 10, 10); 16 * 16];
/// let bytes = Encoder::from_pixels(&pixels, 16, 16)
///     .quality(85.0)
///     .encode(&Unstoppable)?;
/// let (decoded, w, h) = riffcodec::decode::<RGB8>(&bytes)?;
/// assert_eq!((w, h, decoded.len()), (16, 16, 256));
/// # Ok::<(), riffcodec::At<riffcodec::Error>>(())
/// ```
pub trait Pixel: Copy + 'static + private::Sealed {
    /// The pixel format corresponding to this type.
    const FORMAT: PixelFormat;

    /// Convert from RGBA, dropping alpha if the format has none.
    fn from_rgba(p: RGBA8) -> Self;

    /// Convert to RGBA.
    fn to_rgba(self) -> RGBA8;
}

impl Pixel for RGBA8 {
    const FORMAT: PixelFormat = PixelFormat::Rgba;

    #[inline]
    fn from_rgba(p: RGBA8) -> Self {
        p
    }

    #[inline]
    fn to_rgba(self) -> RGBA8 {
        self
    }
}

impl Pixel for BGRA8 {
    const FORMAT: PixelFormat = PixelFormat::Bgra;

    #[inline]
    fn from_rgba(p: RGBA8) -> Self {
        BGRA8 {
            b: p.b,
            g: p.g,
            r: p.r,
            a: p.a,
        }
    }

    #[inline]
    fn to_rgba(self) -> RGBA8 {
        RGBA8::new(self.r, self.g, self.b, self.a)
    }
}

impl Pixel for RGB8 {
    const FORMAT: PixelFormat = PixelFormat::Rgb;

    #[inline]
    fn from_rgba(p: RGBA8) -> Self {
        RGB8::new(p.r, p.g, p.b)
    }

    #[inline]
    fn to_rgba(self) -> RGBA8 {
        RGBA8::new(self.r, self.g, self.b, 255)
    }
}

impl Pixel for BGR8 {
    const FORMAT: PixelFormat = PixelFormat::Bgr;

    #[inline]
    fn from_rgba(p: RGBA8) -> Self {
        BGR8 {
            b: p.b,
            g: p.g,
            r: p.r,
        }
    }

    #[inline]
    fn to_rgba(self) -> RGBA8 {
        RGBA8::new(self.r, self.g, self.b, 255)
    }
}

mod private {
    use super::*;

    pub trait Sealed {}
    impl Sealed for RGBA8 {}
    impl Sealed for BGRA8 {}
    impl Sealed for RGB8 {}
    impl Sealed for BGR8 {}
}

/// Read packed bytes in `format` as RGBA pixels.
pub(crate) fn unpack(data: &[u8], format: PixelFormat) -> Vec<RGBA8> {
    let bpp = format.bytes_per_pixel();
    data.chunks_exact(bpp)
        .map(|c| match format {
            PixelFormat::Rgba => RGBA8::new(c[0], c[1], c[2], c[3]),
            PixelFormat::Bgra => RGBA8::new(c[2], c[1], c[0], c[3]),
            PixelFormat::Rgb => RGBA8::new(c[0], c[1], c[2], 255),
            PixelFormat::Bgr => RGBA8::new(c[2], c[1], c[0], 255),
        })
        .collect()
}

/// Information about an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    /// Canvas width in pixels.
    pub width: u32,
    /// Canvas height in pixels.
    pub height: u32,
    /// Whether the image has an alpha channel.
    pub has_alpha: bool,
    /// Whether the image is animated.
    pub has_animation: bool,
    /// Number of frames (1 for static images).
    pub frame_count: u32,
    /// Bitstream format of the frames.
    pub format: BitstreamFormat,
}

impl ImageInfo {
    /// Read container headers without decoding pixels.
    pub fn from_bytes(data: &[u8]) -> crate::Result<Self> {
        let demux = Demuxer::new(data)?;
        Ok(Self::from_demuxer(&demux))
    }

    pub(crate) fn from_demuxer(demux: &Demuxer<'_>) -> Self {
        let frames = demux.frames();
        let lossy = frames.iter().filter(|f| f.image.mode == FrameMode::Lossy).count();
        let format = match lossy {
            0 => BitstreamFormat::Lossless,
            n if n == frames.len() => BitstreamFormat::Lossy,
            _ => BitstreamFormat::Mixed,
        };
        ImageInfo {
            width: demux.canvas_width(),
            height: demux.canvas_height(),
            has_alpha: demux.header().has_alpha,
            has_animation: demux.is_animated(),
            frame_count: frames.len() as u32,
            format,
        }
    }
}

/// Bitstream format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum BitstreamFormat {
    /// Format not determined.
    #[default]
    Undefined,
    /// Every frame is lossy.
    Lossy,
    /// Every frame is lossless.
    Lossless,
    /// An animation with both kinds of frame.
    Mixed,
}

/// Color mode for byte-oriented output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum ColorMode {
    /// RGBA (8 bits per channel, 32 bits per pixel).
    #[default]
    Rgba,
    /// BGRA (8 bits per channel, 32 bits per pixel).
    Bgra,
    /// ARGB (8 bits per channel, 32 bits per pixel).
    Argb,
    /// RGB (8 bits per channel, 24 bits per pixel).
    Rgb,
    /// BGR (8 bits per channel, 24 bits per pixel).
    Bgr,
}

impl ColorMode {
    /// Bytes per pixel.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            ColorMode::Rgba | ColorMode::Bgra | ColorMode::Argb => 4,
            ColorMode::Rgb | ColorMode::Bgr => 3,
        }
    }

    /// Whether this mode has an alpha channel.
    pub fn has_alpha(self) -> bool {
        matches!(self, ColorMode::Rgba | ColorMode::Bgra | ColorMode::Argb)
    }

    /// Pack RGBA pixels into bytes in this order.
    pub(crate) fn pack(self, pixels: &[RGBA8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(pixels.len() * self.bytes_per_pixel());
        for p in pixels {
            match self {
                ColorMode::Rgba => out.extend_from_slice(&[p.r, p.g, p.b, p.a]),
                ColorMode::Bgra => out.extend_from_slice(&[p.b, p.g, p.r, p.a]),
                ColorMode::Argb => out.extend_from_slice(&[p.a, p.r, p.g, p.b]),
                ColorMode::Rgb => out.extend_from_slice(&[p.r, p.g, p.b]),
                ColorMode::Bgr => out.extend_from_slice(&[p.b, p.g, p.r]),
            }
        }
        out
    }
}

/// How many times an animation plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopCount {
    /// Loop forever (stored as 0).
    #[default]
    Forever,
    /// Play this many times.
    Times(NonZeroU16),
}

impl LoopCount {
    /// Value stored in the container.
    pub const fn to_u16(self) -> u16 {
        match self {
            LoopCount::Forever => 0,
            LoopCount::Times(n) => n.get(),
        }
    }
}

impl From<u16> for LoopCount {
    fn from(n: u16) -> Self {
        match NonZeroU16::new(n) {
            None => LoopCount::Forever,
            Some(n) => LoopCount::Times(n),
        }
    }
}

impl fmt::Display for LoopCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopCount::Forever => f.write_str("infinite"),
            LoopCount::Times(n) => write!(f, "{} time{}", n, if n.get() == 1 { "" } else { "s" }),
        }
    }
}
