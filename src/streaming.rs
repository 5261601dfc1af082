//! Streaming/incremental decode and encode.

use crate::compositor::{Compositor, Frame, FrameDescriptor};
use crate::config::{DecoderConfig, EncodeStats, EncoderConfig};
use crate::container::{AnimationParams, Chunk, ContainerParser, ExtendedHeader, TAG_ANIM};
use crate::encode::{mux_image, validate_buffer_size, validate_dimensions};
use crate::error::{Error, Result};
use crate::types::{unpack, LoopCount, PixelFormat, PixelPlane};
use alloc::vec::Vec;
use enough::Stop;
use imgref::{ImgRef, ImgVec};
use whereat::*;

/// Status of a streaming decode operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum DecodeStatus {
    /// Every frame has been decoded.
    Complete,
    /// More data needed before the next frame can be decoded.
    NeedMoreData,
    /// Some frames are decoded (total count so far); more may follow.
    Partial(u32),
}

/// Incremental decoder.
///
/// Feed bytes as they arrive. A frame is decoded once its whole chunk has
/// arrived and is then available from [`take_frames`](Self::take_frames);
/// partially received frames are never exposed.
///
/// # Example
///
/// ```rust
/// use riffcodec::{DecodeStatus, StreamingDecoder, Unstoppable};
///
/// let rgba = vec![200u8; 16 * 16 * 4];
/// let bytes = riffcodec::encode_lossless(&rgba, 16, 16, &Unstoppable)?;
///
/// let mut decoder = StreamingDecoder::new();
/// for chunk in bytes.chunks(7) {
///     match decoder.append(chunk)? {
///         DecodeStatus::Complete => break,
///         DecodeStatus::NeedMoreData => continue,
///         DecodeStatus::Partial(_frames) => {
///             for frame in decoder.take_frames() {
///                 assert_eq!(frame.image.width(), 16);
///             }
///         }
///         _ => {} // future variants
///     }
/// }
///
/// let frames = decoder.finish()?;
/// assert_eq!(frames.len(), 1);
/// # Ok::<(), riffcodec::At<riffcodec::Error>>(())
/// ```
#[derive(Default)]
pub struct StreamingDecoder {
    config: DecoderConfig,
    buffer: Vec<u8>,
    parser: ContainerParser,
    compositor: Option<Compositor>,
    animation: Option<AnimationParams>,
    ready: Vec<Frame>,
    decoded: u32,
    timestamp_ms: u32,
}

impl StreamingDecoder {
    /// Create a new streaming decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a streaming decoder that refuses canvases over `config`'s
    /// pixel limit as soon as the header arrives.
    pub fn with_config(config: DecoderConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Append data to the decoder and decode every frame it completes.
    pub fn append(&mut self, data: &[u8]) -> Result<DecodeStatus> {
        self.buffer.extend_from_slice(data);
        self.pump(false)?;
        if self.parser.is_finished() {
            self.check_complete()?;
            return Ok(DecodeStatus::Complete);
        }
        Ok(match self.decoded {
            0 => DecodeStatus::NeedMoreData,
            n => DecodeStatus::Partial(n),
        })
    }

    /// Canvas dimensions, once the header has arrived.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.parser
            .header()
            .map(|h| (h.canvas_width, h.canvas_height))
    }

    /// Loop count, once the animation chunk has arrived.
    pub fn loop_count(&self) -> Option<LoopCount> {
        self.animation.map(|a| a.loop_count)
    }

    /// Number of frames decoded so far.
    pub fn decoded_frames(&self) -> u32 {
        self.decoded
    }

    /// Take the frames decoded since the last call.
    pub fn take_frames(&mut self) -> Vec<Frame> {
        core::mem::take(&mut self.ready)
    }

    /// Treat the data so far as the whole input and return the frames not
    /// yet taken.
    ///
    /// Fails with [`Error::TruncatedChunk`] if a chunk was cut off.
    pub fn finish(mut self) -> Result<Vec<Frame>> {
        self.pump(true)?;
        if !self.parser.is_finished() {
            return Err(at!(Error::NeedMoreData));
        }
        self.check_complete()?;
        Ok(self.ready)
    }

    fn check_complete(&self) -> Result<()> {
        if self.decoded == 0 {
            return Err(at!(Error::UnsupportedContainer {
                offset: self.parser.offset(),
                reason: "no image data",
            }));
        }
        Ok(())
    }

    fn pump(&mut self, eof: bool) -> Result<()> {
        while let Some(chunk) = self.parser.next_chunk(&self.buffer, eof)? {
            let header = match self.parser.header() {
                Some(h) => *h,
                None => continue,
            };
            let (descriptor, image) = match chunk {
                Chunk::Header(h) => {
                    self.config.check_limits(h.canvas_width, h.canvas_height)?;
                    self.compositor = Some(Compositor::new(h.canvas_width, h.canvas_height));
                    continue;
                }
                Chunk::Animation(a) => {
                    self.animation = Some(a);
                    continue;
                }
                Chunk::Frame(f) if header.has_animation => {
                    if self.animation.is_none() {
                        return Err(at!(Error::InvalidChunk {
                            tag: TAG_ANIM,
                            offset: self.parser.offset(),
                            reason: "animation without ANIM chunk",
                        }));
                    }
                    (f.descriptor, f.decode()?)
                }
                Chunk::Image(img) if !header.has_animation && self.decoded == 0 => {
                    let image = img.decode(header.canvas_width, header.canvas_height)?;
                    (still_descriptor(&header), image)
                }
                _ => continue,
            };
            let Some(compositor) = self.compositor.as_mut() else {
                continue;
            };
            let canvas = compositor.composite(&descriptor, image.as_ref())?;
            self.ready.push(Frame {
                image: ImgVec::new(canvas.buf().to_vec(), canvas.width(), canvas.height()),
                timestamp_ms: self.timestamp_ms,
                duration_ms: descriptor.duration_ms,
            });
            self.decoded += 1;
            self.timestamp_ms = self.timestamp_ms.saturating_add(descriptor.duration_ms);
            log::debug!(
                "streaming: frame {} ready at byte {}",
                self.decoded,
                self.parser.offset()
            );
        }
        Ok(())
    }
}

fn still_descriptor(header: &ExtendedHeader) -> FrameDescriptor {
    FrameDescriptor::full_canvas(header.canvas_width, header.canvas_height, 0)
}

/// Still image encoder that hands the container to a callback chunk by
/// chunk instead of building it in memory.
///
/// # Example
///
/// ```rust
/// use riffcodec::{StreamingEncoder, Unstoppable};
///
/// let rgba_data = vec![0u8; 64 * 48 * 4];
/// let mut output = Vec::new();
///
/// let mut encoder = StreamingEncoder::new(64, 48)?;
/// encoder.set_quality(85.0);
///
/// // Encode with callback for output chunks
/// encoder.encode_rgba_with_callback(&rgba_data, &Unstoppable, |chunk| {
///     // Write chunk to file/network
///     output.extend_from_slice(chunk);
///     Ok(())
/// })?;
/// assert_eq!(&output[..4], b"RIFF");
/// # Ok::<(), riffcodec::At<riffcodec::Error>>(())
/// ```
pub struct StreamingEncoder {
    width: u32,
    height: u32,
    config: EncoderConfig,
}

impl StreamingEncoder {
    /// Create a new streaming encoder.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        validate_dimensions(width, height)?;
        Ok(Self {
            width,
            height,
            config: EncoderConfig::default(),
        })
    }

    /// Set encoding quality (0.0 = smallest, 100.0 = best).
    pub fn set_quality(&mut self, quality: f32) {
        self.config = self.config.clone().quality(quality);
    }

    /// Enable lossless compression.
    pub fn set_lossless(&mut self, lossless: bool) {
        self.config.lossless = lossless;
    }

    /// Replace the whole encoder configuration.
    pub fn set_config(&mut self, config: EncoderConfig) {
        self.config = config;
    }

    /// Encode RGBA data with a callback for output chunks.
    pub fn encode_rgba_with_callback<F>(&self, data: &[u8], stop: &dyn Stop, callback: F) -> Result<EncodeStats>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        self.encode_with_callback(data, PixelFormat::Rgba, stop, callback)
    }

    /// Encode RGB data with a callback for output chunks.
    pub fn encode_rgb_with_callback<F>(&self, data: &[u8], stop: &dyn Stop, callback: F) -> Result<EncodeStats>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        self.encode_with_callback(data, PixelFormat::Rgb, stop, callback)
    }

    fn encode_with_callback<F>(
        &self,
        data: &[u8],
        format: PixelFormat,
        stop: &dyn Stop,
        callback: F,
    ) -> Result<EncodeStats>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        let bpp = format.bytes_per_pixel();
        validate_buffer_size(data.len(), self.width, self.height, bpp)?;
        let count = self.width as usize * self.height as usize;
        let pixels: PixelPlane = ImgVec::new(
            unpack(&data[..count * bpp], format),
            self.width as usize,
            self.height as usize,
        );
        let img: ImgRef<'_, _> = pixels.as_ref();
        let (mux, stats) = mux_image(img, &self.config, stop)?;
        mux.write_to(callback)?;
        Ok(stats)
    }
}
