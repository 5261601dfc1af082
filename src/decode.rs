//! Still image decoding.
//!
//! Animations decode to a single composited canvas here; use
//! [`AnimationDecoder`](crate::AnimationDecoder) for every frame.

use crate::compositor::Compositor;
use crate::config::DecoderConfig;
use crate::container::Demuxer;
use crate::error::{Error, Result};
use crate::types::{ColorMode, ImageInfo, Pixel, PixelPlane};
use alloc::vec::Vec;
use imgref::ImgVec;
use rgb::alt::{BGR8, BGRA8};
use rgb::{RGB8, RGBA8};
use whereat::*;

/// Decode to RGBA bytes.
///
/// Returns the decoded pixels and dimensions.
///
/// # Example
///
/// ```rust
/// use riffcodec::Unstoppable;
///
/// let rgba = vec![255u8; 4 * 4 * 4];
/// let bytes = riffcodec::encode_lossless(&rgba, 4, 4, &Unstoppable)?;
/// let (pixels, width, height) = riffcodec::decode_rgba(&bytes)?;
/// assert_eq!((pixels, width, height), (rgba, 4, 4));
/// # Ok::<(), riffcodec::At<riffcodec::Error>>(())
/// ```
pub fn decode_rgba(data: &[u8]) -> Result<(Vec<u8>, u32, u32)> {
    Decoder::new(data)?.decode_raw(ColorMode::Rgba)
}

/// Decode to RGB bytes (alpha dropped).
pub fn decode_rgb(data: &[u8]) -> Result<(Vec<u8>, u32, u32)> {
    Decoder::new(data)?.decode_raw(ColorMode::Rgb)
}

/// Decode to BGRA bytes.
///
/// BGRA is the native format on Windows and some GPU APIs.
pub fn decode_bgra(data: &[u8]) -> Result<(Vec<u8>, u32, u32)> {
    Decoder::new(data)?.decode_raw(ColorMode::Bgra)
}

/// Decode to BGR bytes (alpha dropped).
pub fn decode_bgr(data: &[u8]) -> Result<(Vec<u8>, u32, u32)> {
    Decoder::new(data)?.decode_raw(ColorMode::Bgr)
}

/// Decode to typed pixels.
///
/// Supports [`RGBA8`], [`RGB8`], [`BGRA8`], and [`BGR8`].
pub fn decode<P: Pixel>(data: &[u8]) -> Result<(Vec<P>, u32, u32)> {
    let img = Decoder::new(data)?.decode::<P>()?;
    let (w, h) = (img.width() as u32, img.height() as u32);
    Ok((img.into_buf(), w, h))
}

/// Decode, appending typed pixels to an existing Vec.
///
/// Returns the width and height of the decoded image.
pub fn decode_append<P: Pixel>(data: &[u8], output: &mut Vec<P>) -> Result<(u32, u32)> {
    let plane = Decoder::new(data)?.decode_plane()?;
    output.extend(plane.buf().iter().map(|&p| P::from_rgba(p)));
    Ok((plane.width() as u32, plane.height() as u32))
}

/// Decode to an imgref image.
pub fn decode_to_img<P: Pixel>(data: &[u8]) -> Result<ImgVec<P>> {
    Decoder::new(data)?.decode::<P>()
}

/// Image decoder with configuration options.
///
/// # Example
///
/// ```rust
/// use riffcodec::{Decoder, Unstoppable};
///
/// let rgba = vec![9u8; 8 * 8 * 4];
/// let bytes = riffcodec::encode_lossless(&rgba, 8, 8, &Unstoppable)?;
/// let decoder = Decoder::new(&bytes)?;
/// println!("{}x{}, alpha: {}", decoder.info().width, decoder.info().height, decoder.info().has_alpha);
///
/// let img = decoder.crop(2, 2, 4, 4).decode_rgba()?;
/// assert_eq!((img.width(), img.height()), (4, 4));
/// # Ok::<(), riffcodec::At<riffcodec::Error>>(())
/// ```
pub struct Decoder<'a> {
    demux: Demuxer<'a>,
    info: ImageInfo,
    config: DecoderConfig,
}

impl<'a> Decoder<'a> {
    /// Parse the container. Pixels are decoded later.
    pub fn new(data: &'a [u8]) -> Result<Self> {
        let demux = Demuxer::new(data)?;
        let info = ImageInfo::from_demuxer(&demux);
        Ok(Self {
            demux,
            info,
            config: DecoderConfig::default(),
        })
    }

    /// Get image information.
    pub fn info(&self) -> &ImageInfo {
        &self.info
    }

    /// Set decoder configuration.
    #[must_use]
    pub fn config(mut self, config: DecoderConfig) -> Self {
        self.config = config;
        self
    }

    /// Enable cropping.
    #[must_use]
    pub fn crop(mut self, left: u32, top: u32, width: u32, height: u32) -> Self {
        self.config = self.config.crop(left, top, width, height);
        self
    }

    /// Flip output vertically.
    #[must_use]
    pub fn flip(mut self, enable: bool) -> Self {
        self.config = self.config.flip(enable);
        self
    }

    /// Decode to RGBA ImgVec.
    pub fn decode_rgba(self) -> Result<ImgVec<RGBA8>> {
        self.decode_plane()
    }

    /// Decode to RGB ImgVec (no alpha).
    pub fn decode_rgb(self) -> Result<ImgVec<RGB8>> {
        self.decode::<RGB8>()
    }

    /// Decode to BGRA ImgVec.
    pub fn decode_bgra(self) -> Result<ImgVec<BGRA8>> {
        self.decode::<BGRA8>()
    }

    /// Decode to BGR ImgVec.
    pub fn decode_bgr(self) -> Result<ImgVec<BGR8>> {
        self.decode::<BGR8>()
    }

    /// Decode to any supported pixel type.
    pub fn decode<P: Pixel>(self) -> Result<ImgVec<P>> {
        let plane = self.decode_plane()?;
        let (w, h) = (plane.width(), plane.height());
        let buf = plane.into_buf().into_iter().map(P::from_rgba).collect();
        Ok(ImgVec::new(buf, w, h))
    }

    /// Decode to packed bytes in `mode` order.
    pub fn decode_raw(self, mode: ColorMode) -> Result<(Vec<u8>, u32, u32)> {
        let plane = self.decode_plane()?;
        Ok((
            mode.pack(plane.buf()),
            plane.width() as u32,
            plane.height() as u32,
        ))
    }

    fn decode_plane(self) -> Result<PixelPlane> {
        let (w, h) = (self.demux.canvas_width(), self.demux.canvas_height());
        self.config.check_limits(w, h)?;
        let plane = if self.demux.is_animated() {
            let mut compositor = Compositor::new(w, h);
            let frames = self.demux.frames();
            let count = if self.config.first_frame_only { 1 } else { frames.len() };
            for frame in &frames[..count] {
                let image = frame.decode()?;
                compositor.composite(&frame.descriptor, image.as_ref())?;
            }
            let canvas = compositor.canvas();
            ImgVec::new(canvas.buf().to_vec(), canvas.width(), canvas.height())
        } else {
            self.demux.frames()[0].decode()?
        };
        apply_postprocessing(plane, &self.config)
    }
}

/// Apply crop and flip from the config.
pub(crate) fn apply_postprocessing(plane: PixelPlane, config: &DecoderConfig) -> Result<PixelPlane> {
    let plane = if config.use_cropping {
        let (w, h) = (plane.width() as u32, plane.height() as u32);
        let (x, y) = (config.crop_left, config.crop_top);
        let (cw, ch) = (config.crop_width, config.crop_height);
        if cw == 0 || ch == 0 || x.saturating_add(cw) > w || y.saturating_add(ch) > h {
            return Err(at!(Error::InvalidConfig(alloc::format!(
                "crop {}x{} at ({}, {}) outside the {}x{} image",
                cw,
                ch,
                x,
                y,
                w,
                h
            ))));
        }
        let sub = plane
            .sub_image(x as usize, y as usize, cw as usize, ch as usize)
            .rows()
            .flatten()
            .copied()
            .collect();
        ImgVec::new(sub, cw as usize, ch as usize)
    } else {
        plane
    };
    if !config.flip {
        return Ok(plane);
    }
    let (w, h) = (plane.width(), plane.height());
    let flipped = plane.rows().rev().flatten().copied().collect();
    Ok(ImgVec::new(flipped, w, h))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::encode_lossless;
    use alloc::vec;
    use enough::Unstoppable;

    fn sample() -> (Vec<u8>, Vec<u8>) {
        let mut rgba = Vec::new();
        for i in 0..12u8 {
            rgba.extend_from_slice(&[i, i * 2, i * 3, 200 + i]);
        }
        let bytes = encode_lossless(&rgba, 4, 3, &Unstoppable).unwrap();
        (rgba, bytes)
    }

    #[test]
    fn test_image_info_invalid() {
        assert!(Decoder::new(b"not an image").is_err());
    }

    #[test]
    fn test_byte_orders() {
        let (rgba, bytes) = sample();
        assert_eq!(decode_rgba(&bytes).unwrap().0, rgba);
        let (bgr, w, h) = decode_bgr(&bytes).unwrap();
        assert_eq!((w, h), (4, 3));
        assert_eq!(&bgr[3..6], &[rgba[6], rgba[5], rgba[4]]);
        let (bgra, _, _) = decode_bgra(&bytes).unwrap();
        assert_eq!(&bgra[..4], &[rgba[2], rgba[1], rgba[0], rgba[3]]);
    }

    #[test]
    fn test_decode_append() {
        let (_, bytes) = sample();
        let mut out = vec![RGB8::new(0, 0, 0)];
        let (w, h) = decode_append::<RGB8>(&bytes, &mut out).unwrap();
        assert_eq!((w, h), (4, 3));
        assert_eq!(out.len(), 13);
        assert_eq!(out[2], RGB8::new(1, 2, 3));
    }

    #[test]
    fn test_crop_and_flip() {
        let (rgba, bytes) = sample();
        let img = Decoder::new(&bytes)
            .unwrap()
            .crop(1, 1, 2, 2)
            .flip(true)
            .decode_rgba()
            .unwrap();
        assert_eq!((img.width(), img.height()), (2, 2));
        // Bottom-left of the crop is pixel (1, 2) = index 9.
        let i = 9 * 4;
        assert_eq!(img.buf()[0], RGBA8::new(rgba[i], rgba[i + 1], rgba[i + 2], rgba[i + 3]));

        let err = Decoder::new(&bytes)
            .unwrap()
            .crop(3, 0, 2, 1)
            .decode_rgba()
            .unwrap_err();
        assert!(matches!(err.error(), Error::InvalidConfig(_)));
    }

    #[test]
    fn test_pixel_limit() {
        let (_, bytes) = sample();
        let err = Decoder::new(&bytes)
            .unwrap()
            .config(DecoderConfig::new().max_pixels(Some(11)))
            .decode_rgba()
            .unwrap_err();
        assert!(matches!(err.error(), Error::LimitExceeded { .. }));
    }
}
