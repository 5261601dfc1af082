//! Still image encoding.

use crate::config::{EncodeStats, EncoderConfig};
use crate::container::{self, MuxFrame, Muxer};
use crate::compositor::FrameDescriptor;
use crate::error::{check_stop, Error, Result};
use crate::frame::{self, EncodedFrame, FrameMode, FrameParams, SizeBudget, MAX_DIMENSION};
use crate::types::{unpack, Pixel, PixelFormat};
use alloc::vec::Vec;
use enough::Stop;
use imgref::{ImgRef, ImgVec};
use rgb::RGBA8;
use whereat::*;

/// Encode RGBA pixels.
///
/// # Arguments
///
/// * `data` - RGBA pixel data (4 bytes per pixel)
/// * `width` - Image width in pixels
/// * `height` - Image height in pixels
/// * `quality` - Quality factor (0.0 = smallest, 100.0 = best)
/// * `stop` - Cancellation token ([`Unstoppable`](crate::Unstoppable) to never cancel)
///
/// # Example
///
/// ```rust
/// use riffcodec::Unstoppable;
///
/// let rgba = vec![128u8; 32 * 32 * 4];
/// let bytes = riffcodec::encode_rgba(&rgba, 32, 32, 85.0, &Unstoppable)?;
/// # Ok::<(), riffcodec::At<riffcodec::Error>>(())
/// ```
pub fn encode_rgba(
    data: &[u8],
    width: u32,
    height: u32,
    quality: f32,
    stop: &dyn Stop,
) -> Result<Vec<u8>> {
    let config = EncoderConfig::new().quality(quality);
    encode_with_config(data, width, height, PixelFormat::Rgba, &config, stop).map(|(b, _)| b)
}

/// Encode RGB pixels (no alpha).
///
/// # Arguments
///
/// * `data` - RGB pixel data (3 bytes per pixel)
/// * `width` - Image width in pixels
/// * `height` - Image height in pixels
/// * `quality` - Quality factor (0.0 = smallest, 100.0 = best)
/// * `stop` - Cancellation token
pub fn encode_rgb(
    data: &[u8],
    width: u32,
    height: u32,
    quality: f32,
    stop: &dyn Stop,
) -> Result<Vec<u8>> {
    let config = EncoderConfig::new().quality(quality);
    encode_with_config(data, width, height, PixelFormat::Rgb, &config, stop).map(|(b, _)| b)
}

/// Encode losslessly.
///
/// Decoding the result reproduces every RGBA value exactly.
///
/// # Arguments
///
/// * `data` - RGBA pixel data (4 bytes per pixel)
/// * `width` - Image width in pixels
/// * `height` - Image height in pixels
/// * `stop` - Cancellation token
pub fn encode_lossless(data: &[u8], width: u32, height: u32, stop: &dyn Stop) -> Result<Vec<u8>> {
    let config = EncoderConfig::new_lossless();
    encode_with_config(data, width, height, PixelFormat::Rgba, &config, stop).map(|(b, _)| b)
}

/// Internal: encode packed bytes with a full config.
pub(crate) fn encode_with_config(
    data: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
    config: &EncoderConfig,
    stop: &dyn Stop,
) -> Result<(Vec<u8>, EncodeStats)> {
    validate_dimensions(width, height)?;
    validate_buffer_size(data.len(), width, height, format.bytes_per_pixel())?;
    let count = width as usize * height as usize;
    let pixels = unpack(&data[..count * format.bytes_per_pixel()], format);
    let img = ImgVec::new(pixels, width as usize, height as usize);
    encode_image(img.as_ref(), config, stop)
}

/// Frame settings derived from a config.
pub(crate) fn frame_params(config: &EncoderConfig) -> FrameParams {
    FrameParams {
        mode: config.frame_mode(),
        quality: config.quality_level(),
        method: config.method,
        cache_bits: config.color_cache_bits,
        exact: config.exact,
    }
}

/// Copy metadata from the config into the container.
pub(crate) fn apply_metadata(mux: &mut Muxer, config: &EncoderConfig) {
    #[cfg(feature = "metadata")]
    {
        mux.set_icc_profile(config.icc_profile.clone());
        mux.set_exif(config.exif_data.clone());
        mux.set_xmp(config.xmp_data.clone());
    }
    #[cfg(not(feature = "metadata"))]
    let _ = (mux, config);
}

/// Fold a finished frame into running statistics.
pub(crate) fn record_frame(stats: &mut EncodeStats, encoded: &EncodedFrame) {
    let quality = match encoded.mode {
        FrameMode::Lossy => encoded.quality,
        FrameMode::Lossless => 100,
    };
    stats.quality = if stats.frames == 0 {
        quality
    } else {
        stats.quality.min(quality)
    };
    stats.frames += 1;
    stats.iterations += encoded.iterations;
    stats.target_met &= encoded.target_met;
}

/// Encode one RGBA image into a still container.
pub(crate) fn encode_image(
    img: ImgRef<'_, RGBA8>,
    config: &EncoderConfig,
    stop: &dyn Stop,
) -> Result<(Vec<u8>, EncodeStats)> {
    let (mux, stats) = mux_image(img, config, stop)?;
    Ok((mux.assemble()?, stats))
}

/// Encode one RGBA image and return the filled-in container writer.
///
/// `stats.coded_size` is the size the container will serialize to.
pub(crate) fn mux_image(
    img: ImgRef<'_, RGBA8>,
    config: &EncoderConfig,
    stop: &dyn Stop,
) -> Result<(Muxer, EncodeStats)> {
    config.validate()?;
    let (width, height) = (img.width() as u32, img.height() as u32);
    validate_dimensions(width, height)?;
    check_stop(stop)?;

    let mut mux = Muxer::new(width, height);
    apply_metadata(&mut mux, config);
    let budget = config.max_output_bytes.map(|max_bytes| SizeBudget {
        max_bytes,
        overhead: mux.encoded_len() + container::frame_overhead(false),
    });

    let encoded = frame::encode_frame(img, &frame_params(config), budget.as_ref(), stop)?;
    let mut stats = EncodeStats {
        target_met: true,
        ..EncodeStats::default()
    };
    record_frame(&mut stats, &encoded);
    mux.push_frame(MuxFrame {
        descriptor: FrameDescriptor::full_canvas(width, height, 0),
        mode: encoded.mode,
        bitstream: encoded.data,
        has_alpha: encoded.has_alpha,
    })?;

    stats.coded_size = mux.encoded_len();
    log::debug!(
        "encoded {}x{} {:?} image: {} bytes, quality {}, {} attempt(s)",
        width,
        height,
        encoded.mode,
        stats.coded_size,
        stats.quality,
        stats.iterations
    );
    Ok((mux, stats))
}

/// Image encoder with full configuration options.
///
/// # Example
///
/// ```rust
/// use riffcodec::{Encoder, Unstoppable};
///
/// let rgba = vec![0u8; 64 * 48 * 4];
/// let (bytes, stats) = Encoder::new(&rgba, 64, 48)
///     .quality(85.0)
///     .max_output_bytes(Some(2000))
///     .encode_with_stats(&Unstoppable)?;
/// assert_eq!(stats.coded_size, bytes.len());
/// # Ok::<(), riffcodec::At<riffcodec::Error>>(())
/// ```
pub struct Encoder<'a> {
    data: EncoderInput<'a>,
    width: u32,
    height: u32,
    config: EncoderConfig,
}

enum EncoderInput<'a> {
    Bytes(&'a [u8], PixelFormat),
    Img(ImgRef<'a, RGBA8>),
    Converted(Vec<RGBA8>),
}

impl<'a> Encoder<'a> {
    /// Create a new encoder for RGBA data.
    #[must_use]
    pub fn new(data: &'a [u8], width: u32, height: u32) -> Self {
        Self::with_input(EncoderInput::Bytes(data, PixelFormat::Rgba), width, height)
    }

    /// Create a new encoder for RGB data (no alpha).
    #[must_use]
    pub fn new_rgb(data: &'a [u8], width: u32, height: u32) -> Self {
        Self::with_input(EncoderInput::Bytes(data, PixelFormat::Rgb), width, height)
    }

    /// Create encoder from an imgref ImgRef<RGBA8>. Strided images are fine.
    #[must_use]
    pub fn from_rgba(img: ImgRef<'a, RGBA8>) -> Self {
        Self::with_input(EncoderInput::Img(img), img.width() as u32, img.height() as u32)
    }

    /// Create encoder from typed pixels in any supported layout.
    #[must_use]
    pub fn from_pixels<P: Pixel>(pixels: &'a [P], width: u32, height: u32) -> Self {
        let rgba = pixels.iter().map(|p| p.to_rgba()).collect();
        Self::with_input(EncoderInput::Converted(rgba), width, height)
    }

    fn with_input(data: EncoderInput<'a>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
            config: EncoderConfig::default(),
        }
    }

    /// Set encoding quality (0.0 = smallest, 100.0 = best).
    #[must_use]
    pub fn quality(mut self, quality: f32) -> Self {
        self.config = self.config.quality(quality);
        self
    }

    /// Enable lossless compression.
    #[must_use]
    pub fn lossless(mut self, lossless: bool) -> Self {
        self.config = self.config.lossless(lossless);
        self
    }

    /// Set effort (0 = fast, 6 = slower but smaller).
    #[must_use]
    pub fn method(mut self, method: u8) -> Self {
        self.config = self.config.method(method);
        self
    }

    /// Preserve exact RGB values under transparent areas.
    #[must_use]
    pub fn exact(mut self, exact: bool) -> Self {
        self.config = self.config.exact(exact);
        self
    }

    /// Cap the output size in bytes.
    #[must_use]
    pub fn max_output_bytes(mut self, max: Option<usize>) -> Self {
        self.config = self.config.max_output_bytes(max);
        self
    }

    /// Set full encoder configuration.
    #[must_use]
    pub fn config(mut self, config: EncoderConfig) -> Self {
        self.config = config;
        self
    }

    /// Set ICC profile to embed.
    #[cfg(feature = "metadata")]
    #[must_use]
    pub fn icc_profile(mut self, profile: &[u8]) -> Self {
        self.config = self.config.icc_profile(profile);
        self
    }

    /// Encode to container bytes.
    pub fn encode(self, stop: &dyn Stop) -> Result<Vec<u8>> {
        self.encode_with_stats(stop).map(|(bytes, _)| bytes)
    }

    /// Encode and report what the encoder did.
    pub fn encode_with_stats(self, stop: &dyn Stop) -> Result<(Vec<u8>, EncodeStats)> {
        validate_dimensions(self.width, self.height)?;
        match self.data {
            EncoderInput::Bytes(data, format) => {
                encode_with_config(data, self.width, self.height, format, &self.config, stop)
            }
            EncoderInput::Img(img) => encode_image(img, &self.config, stop),
            EncoderInput::Converted(pixels) => {
                validate_buffer_size(pixels.len(), self.width, self.height, 1)?;
                let (w, h) = (self.width as usize, self.height as usize);
                let mut pixels = pixels;
                pixels.truncate(w * h);
                let img = ImgVec::new(pixels, w, h);
                encode_image(img.as_ref(), &self.config, stop)
            }
        }
    }
}

pub(crate) fn validate_dimensions(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(at!(Error::InvalidInput(
            "width and height must be non-zero".into(),
        )));
    }
    if width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(at!(Error::InvalidInput(alloc::format!(
            "dimensions exceed maximum ({} x {})",
            MAX_DIMENSION,
            MAX_DIMENSION
        ))));
    }
    Ok(())
}

pub(crate) fn validate_buffer_size(size: usize, width: u32, height: u32, bpp: usize) -> Result<()> {
    let expected = (width as usize)
        .saturating_mul(height as usize)
        .saturating_mul(bpp);

    if size < expected {
        return Err(at!(Error::InvalidInput(alloc::format!(
            "buffer too small: got {}, expected {}",
            size,
            expected
        ))));
    }
    Ok(())
}
