//! Encoder and decoder configuration types.

use crate::color_cache::MAX_CACHE_BITS;
use crate::error::{Error, Result};
use crate::frame::FrameMode;
#[cfg(feature = "metadata")]
use alloc::vec::Vec;
use whereat::*;

/// Default color cache size for lossless frames, in index bits.
const DEFAULT_CACHE_BITS: u8 = 10;

/// Encoder configuration. Dimension-independent, reusable across images.
///
/// # Example
///
/// ```rust
/// use riffcodec::{EncoderConfig, Unstoppable};
///
/// let config = EncoderConfig::new()
///     .quality(85.0)
///     .method(4)
///     .max_output_bytes(Some(4096));
///
/// // Reuse config for multiple images
/// let image1 = vec![0u8; 4 * 4 * 4]; // 4x4 RGBA
/// let image2 = vec![0u8; 8 * 6 * 4]; // 8x6 RGBA
/// let out1 = config.encode_rgba(&image1, 4, 4, &Unstoppable)?;
/// let out2 = config.encode_rgba(&image2, 8, 6, &Unstoppable)?;
/// # Ok::<(), riffcodec::At<riffcodec::Error>>(())
/// ```
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    pub(crate) quality: f32,
    pub(crate) lossless: bool,
    pub(crate) method: u8,
    pub(crate) exact: bool,
    pub(crate) color_cache_bits: u8,
    pub(crate) max_output_bytes: Option<usize>,
    #[cfg(feature = "metadata")]
    pub(crate) icc_profile: Option<Vec<u8>>,
    #[cfg(feature = "metadata")]
    pub(crate) exif_data: Option<Vec<u8>>,
    #[cfg(feature = "metadata")]
    pub(crate) xmp_data: Option<Vec<u8>>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            quality: 75.0,
            lossless: false,
            method: 4,
            exact: true,
            color_cache_bits: DEFAULT_CACHE_BITS,
            max_output_bytes: None,
            #[cfg(feature = "metadata")]
            icc_profile: None,
            #[cfg(feature = "metadata")]
            exif_data: None,
            #[cfg(feature = "metadata")]
            xmp_data: None,
        }
    }
}

impl EncoderConfig {
    // === Constructors ===

    /// Create a new encoder configuration with default settings.
    ///
    /// Default: lossy encoding at quality 75, method 4, no size cap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a lossless encoder configuration.
    #[must_use]
    pub fn new_lossless() -> Self {
        Self {
            lossless: true,
            ..Self::default()
        }
    }

    /// Map a host's encode options onto a configuration.
    ///
    /// `compression_quality` is 0.0-1.0 and defaults to 1.0 (best).
    #[must_use]
    pub fn from_options(max_file_size: Option<usize>, options: &CoderOptions) -> Self {
        let quality = options.compression_quality.unwrap_or(1.0).clamp(0.0, 1.0) * 100.0;
        Self::new()
            .quality(quality)
            .lossless(options.lossless)
            .max_output_bytes(max_file_size.filter(|&n| n > 0))
    }

    // === Quality & Compression ===

    /// Set encoding quality (0.0 = smallest, 100.0 = best).
    ///
    /// Lossy frames quantize more coarsely at lower quality. Lossless frames
    /// ignore it.
    #[must_use]
    pub fn quality(mut self, quality: f32) -> Self {
        self.quality = if quality.is_nan() {
            75.0
        } else {
            quality.clamp(0.0, 100.0)
        };
        self
    }

    /// Enable or disable lossless compression.
    #[must_use]
    pub fn lossless(mut self, lossless: bool) -> Self {
        self.lossless = lossless;
        self
    }

    /// Set effort (0 = fast, 6 = slower but smaller).
    ///
    /// Controls match search depth and predictor block size for lossless
    /// frames. Method 0 also skips the spatial transforms.
    #[must_use]
    pub fn method(mut self, method: u8) -> Self {
        self.method = method.min(6);
        self
    }

    /// Preserve exact RGB values under fully transparent pixels (default on).
    ///
    /// When off, lossless frames zero the color of invisible pixels, which
    /// compresses better but no longer reproduces the input bit for bit.
    #[must_use]
    pub fn exact(mut self, exact: bool) -> Self {
        self.exact = exact;
        self
    }

    /// Color cache size for lossless frames in index bits (0 disables,
    /// otherwise 1-11).
    #[must_use]
    pub fn color_cache_bits(mut self, bits: u8) -> Self {
        self.color_cache_bits = bits;
        self
    }

    // === Target Size ===

    /// Cap the size of the whole output in bytes.
    ///
    /// The encoder lowers quality (lossy) or raises effort (lossless) until
    /// the output fits. When no attempt fits, the smallest output is
    /// returned and [`EncodeStats::target_met`] is false.
    #[must_use]
    pub fn max_output_bytes(mut self, max: Option<usize>) -> Self {
        self.max_output_bytes = max;
        self
    }

    // === Metadata ===

    /// Attach an ICC color profile to the output.
    #[cfg(feature = "metadata")]
    #[must_use]
    pub fn icc_profile(mut self, profile: impl Into<Vec<u8>>) -> Self {
        self.icc_profile = Some(profile.into());
        self
    }

    /// Attach EXIF metadata to the output.
    #[cfg(feature = "metadata")]
    #[must_use]
    pub fn exif(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.exif_data = Some(data.into());
        self
    }

    /// Attach XMP metadata to the output.
    #[cfg(feature = "metadata")]
    #[must_use]
    pub fn xmp(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.xmp_data = Some(data.into());
        self
    }

    // === Encoding Entry Points ===

    /// Encode RGBA pixel data.
    #[cfg(feature = "encode")]
    pub fn encode_rgba(
        &self,
        data: &[u8],
        width: u32,
        height: u32,
        stop: &dyn enough::Stop,
    ) -> Result<alloc::vec::Vec<u8>> {
        crate::encode::encode_with_config(data, width, height, crate::PixelFormat::Rgba, self, stop)
            .map(|(bytes, _)| bytes)
    }

    /// Encode RGB pixel data (no alpha).
    #[cfg(feature = "encode")]
    pub fn encode_rgb(
        &self,
        data: &[u8],
        width: u32,
        height: u32,
        stop: &dyn enough::Stop,
    ) -> Result<alloc::vec::Vec<u8>> {
        crate::encode::encode_with_config(data, width, height, crate::PixelFormat::Rgb, self, stop)
            .map(|(bytes, _)| bytes)
    }

    // === Validation ===

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.color_cache_bits > MAX_CACHE_BITS {
            return Err(at!(Error::InvalidConfig(alloc::format!(
                "color cache bits must be 0..={}, got {}",
                MAX_CACHE_BITS,
                self.color_cache_bits
            ))));
        }
        if self.max_output_bytes == Some(0) {
            return Err(at!(Error::InvalidConfig(
                "max_output_bytes must be non-zero".into()
            )));
        }
        Ok(())
    }

    pub(crate) fn frame_mode(&self) -> FrameMode {
        if self.lossless {
            FrameMode::Lossless
        } else {
            FrameMode::Lossy
        }
    }

    /// Quality as the integer level stored in lossy frames.
    pub(crate) fn quality_level(&self) -> u8 {
        (self.quality + 0.5) as u8
    }

    // === Accessors (read-only) ===

    /// Get the quality setting.
    #[must_use]
    pub fn get_quality(&self) -> f32 {
        self.quality
    }

    /// Check if lossless mode is enabled.
    #[must_use]
    pub fn is_lossless(&self) -> bool {
        self.lossless
    }

    /// Get the method (effort).
    #[must_use]
    pub fn get_method(&self) -> u8 {
        self.method
    }

    /// Get the output size cap.
    #[must_use]
    pub fn get_max_output_bytes(&self) -> Option<usize> {
        self.max_output_bytes
    }
}

/// Options handed over by an image-loading host.
#[derive(Debug, Clone, Default)]
pub struct CoderOptions {
    /// Compression quality, 0.0 (smallest) to 1.0 (best).
    pub compression_quality: Option<f32>,
    /// Encode losslessly.
    pub lossless: bool,
    /// Decode only the first frame of an animation.
    pub first_frame_only: bool,
}

/// Statistics from an encode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodeStats {
    /// Size of the output in bytes.
    pub coded_size: usize,
    /// Lowest quality level used by any lossy frame (100 for lossless output).
    pub quality: u8,
    /// Frames encoded.
    pub frames: u32,
    /// Frame encodes run, size search attempts included.
    pub iterations: u32,
    /// Whether the output fits `max_output_bytes` (always true without a cap).
    pub target_met: bool,
}

/// Decoder configuration.
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    pub(crate) use_cropping: bool,
    pub(crate) crop_left: u32,
    pub(crate) crop_top: u32,
    pub(crate) crop_width: u32,
    pub(crate) crop_height: u32,
    pub(crate) flip: bool,
    pub(crate) first_frame_only: bool,
    pub(crate) max_pixels: Option<u64>,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            use_cropping: false,
            crop_left: 0,
            crop_top: 0,
            crop_width: 0,
            crop_height: 0,
            flip: false,
            first_frame_only: true,
            max_pixels: None,
        }
    }
}

impl DecoderConfig {
    /// Create a new decoder configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a host's decode options onto a configuration.
    #[must_use]
    pub fn from_options(options: &CoderOptions) -> Self {
        Self::new().first_frame_only(options.first_frame_only)
    }

    /// Set crop region.
    #[must_use]
    pub fn crop(mut self, left: u32, top: u32, width: u32, height: u32) -> Self {
        self.use_cropping = true;
        self.crop_left = left;
        self.crop_top = top;
        self.crop_width = width;
        self.crop_height = height;
        self
    }

    /// Flip output vertically.
    #[must_use]
    pub fn flip(mut self, enable: bool) -> Self {
        self.flip = enable;
        self
    }

    /// Decode only the first frame of an animation (default on).
    ///
    /// When off, [`Decoder`](crate::Decoder) returns the last composited
    /// canvas instead.
    #[must_use]
    pub fn first_frame_only(mut self, enable: bool) -> Self {
        self.first_frame_only = enable;
        self
    }

    /// Refuse images whose canvas exceeds this many pixels.
    #[must_use]
    pub fn max_pixels(mut self, limit: Option<u64>) -> Self {
        self.max_pixels = limit;
        self
    }

    pub(crate) fn check_limits(&self, width: u32, height: u32) -> Result<()> {
        let pixels = u64::from(width) * u64::from(height);
        match self.max_pixels {
            Some(limit) if pixels > limit => Err(at!(Error::LimitExceeded { pixels, limit })),
            _ => Ok(()),
        }
    }
}
