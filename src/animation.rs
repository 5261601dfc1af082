//! Animation encoding and decoding.

use crate::compositor::{decompose, AnimationSequence, Compositor, DecomposeMode};
use crate::config::{DecoderConfig, EncodeStats, EncoderConfig};
use crate::container::{self, AnimationParams, Demuxer, MuxFrame, Muxer};
use crate::encode::{apply_metadata, frame_params, record_frame, validate_dimensions};
use crate::error::{check_stop, Error, Result};
use crate::frame::{self, SizeBudget};
use crate::types::{unpack, LoopCount, Pixel, PixelFormat};
use alloc::vec::Vec;
use enough::Stop;
use imgref::ImgVec;
use rgb::RGBA8;
use whereat::*;

pub use crate::compositor::Frame;

/// Animation metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct AnimationInfo {
    /// Canvas width.
    pub width: u32,
    /// Canvas height.
    pub height: u32,
    /// Number of frames.
    pub frame_count: u32,
    /// How many times the animation plays.
    pub loop_count: LoopCount,
    /// Background color hint.
    pub background: RGBA8,
}

/// Animation decoder. Yields composited canvases in display order.
///
/// Still images decode as a one-frame animation.
///
/// # Example
///
/// ```rust
/// use riffcodec::{AnimationDecoder, AnimationEncoder, Unstoppable};
/// use rgb::RGBA8;
///
/// let mut encoder = AnimationEncoder::new(8, 8)?;
/// encoder.set_lossless(true);
/// encoder.add_frame(&vec![RGBA8::new(255, 0, 0, 255); 64], 0)?;
/// encoder.add_frame(&vec![RGBA8::new(0, 0, 255, 255); 64], 100)?;
/// let bytes = encoder.finish(200, &Unstoppable)?;
///
/// let mut decoder = AnimationDecoder::new(&bytes)?;
/// assert_eq!(decoder.info().frame_count, 2);
/// while let Some(frame) = decoder.next_frame()? {
///     println!("frame at {}ms for {}ms", frame.timestamp_ms, frame.duration_ms);
/// }
/// # Ok::<(), riffcodec::At<riffcodec::Error>>(())
/// ```
pub struct AnimationDecoder<'a> {
    demux: Demuxer<'a>,
    compositor: Compositor,
    info: AnimationInfo,
    next: usize,
    timestamp_ms: u32,
}

impl<'a> AnimationDecoder<'a> {
    /// Parse the container.
    pub fn new(data: &'a [u8]) -> Result<Self> {
        Self::with_config(data, &DecoderConfig::default())
    }

    /// Parse the container, refusing canvases over `config`'s pixel limit.
    ///
    /// Crop, flip and first-frame settings do not apply here.
    pub fn with_config(data: &'a [u8], config: &DecoderConfig) -> Result<Self> {
        let demux = Demuxer::new(data)?;
        config.check_limits(demux.canvas_width(), demux.canvas_height())?;
        let params = demux.animation();
        let info = AnimationInfo {
            width: demux.canvas_width(),
            height: demux.canvas_height(),
            frame_count: demux.frames().len() as u32,
            loop_count: params.loop_count,
            background: params.background,
        };
        let compositor = Compositor::new(info.width, info.height);
        Ok(Self {
            demux,
            compositor,
            info,
            next: 0,
            timestamp_ms: 0,
        })
    }

    /// Get animation information.
    pub fn info(&self) -> &AnimationInfo {
        &self.info
    }

    /// Check if there are more frames to decode.
    pub fn has_more_frames(&self) -> bool {
        self.next < self.demux.frames().len()
    }

    /// Decode and composite the next frame.
    ///
    /// Returns `None` when all frames have been decoded.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(chunk) = self.demux.frames().get(self.next) else {
            return Ok(None);
        };
        let image = chunk.decode()?;
        let canvas = self.compositor.composite(&chunk.descriptor, image.as_ref())?;
        let frame = Frame {
            image: ImgVec::new(canvas.buf().to_vec(), canvas.width(), canvas.height()),
            timestamp_ms: self.timestamp_ms,
            duration_ms: chunk.descriptor.duration_ms,
        };
        self.timestamp_ms = self.timestamp_ms.saturating_add(chunk.descriptor.duration_ms);
        self.next += 1;
        Ok(Some(frame))
    }

    /// Reset the decoder to the first frame.
    pub fn reset(&mut self) {
        self.compositor.reset();
        self.next = 0;
        self.timestamp_ms = 0;
    }

    /// Decode all frames into a vector.
    pub fn decode_all(&mut self) -> Result<Vec<Frame>> {
        self.reset();
        let mut frames = Vec::with_capacity(self.info.frame_count as usize);
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Decode every frame without compositing.
    ///
    /// The result keeps the stored placement, disposal and blending, so
    /// [`AnimationSequence::composite`] reproduces [`decode_all`](Self::decode_all).
    pub fn sequence(&self) -> Result<AnimationSequence> {
        let mut seq = AnimationSequence::new(self.info.width, self.info.height);
        seq.background = self.info.background;
        seq.loop_count = self.info.loop_count;
        for chunk in self.demux.frames() {
            seq.push(chunk.descriptor, chunk.decode()?)?;
        }
        Ok(seq)
    }
}

/// Animation encoder.
///
/// Frames are given as full canvases with timestamps. On
/// [`finish`](Self::finish) they are decomposed into the regions that
/// changed and each region is encoded on its own.
///
/// # Example
///
/// ```rust
/// use riffcodec::{AnimationEncoder, LoopCount, Unstoppable};
/// use rgb::RGBA8;
///
/// let frame1 = vec![RGBA8::new(255, 0, 0, 255); 32 * 24];
/// let frame2 = vec![RGBA8::new(0, 255, 0, 255); 32 * 24];
///
/// let mut encoder = AnimationEncoder::with_options(32, 24, LoopCount::from(2))?;
/// encoder.set_quality(85.0);
/// encoder.add_frame(&frame1, 0)?;      // First frame at t=0
/// encoder.add_frame(&frame2, 100)?;    // Second frame at t=100ms
/// let bytes = encoder.finish(200, &Unstoppable)?; // Total duration 200ms
/// # Ok::<(), riffcodec::At<riffcodec::Error>>(())
/// ```
pub struct AnimationEncoder {
    width: u32,
    height: u32,
    config: EncoderConfig,
    loop_count: LoopCount,
    background: RGBA8,
    decompose_mode: DecomposeMode,
    frames: Vec<(Vec<RGBA8>, u32)>,
}

impl AnimationEncoder {
    /// Create an encoder for a canvas that loops forever.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        Self::with_options(width, height, LoopCount::Forever)
    }

    /// Create an encoder with a loop count.
    pub fn with_options(width: u32, height: u32, loop_count: LoopCount) -> Result<Self> {
        validate_dimensions(width, height)?;
        Ok(Self {
            width,
            height,
            config: EncoderConfig::default(),
            loop_count,
            background: RGBA8 { r: 0, g: 0, b: 0, a: 0 },
            decompose_mode: DecomposeMode::default(),
            frames: Vec::new(),
        })
    }

    /// Set encoding quality.
    pub fn set_quality(&mut self, quality: f32) {
        self.config = self.config.clone().quality(quality);
    }

    /// Enable lossless compression for all frames.
    pub fn set_lossless(&mut self, lossless: bool) {
        self.config.lossless = lossless;
    }

    /// Replace the whole encoder configuration.
    pub fn set_config(&mut self, config: EncoderConfig) {
        self.config = config;
    }

    /// Set the background color hint.
    pub fn set_background(&mut self, color: RGBA8) {
        self.background = color;
    }

    /// Choose how frames are split into regions.
    pub fn set_decompose_mode(&mut self, mode: DecomposeMode) {
        self.decompose_mode = mode;
    }

    /// Set ICC profile to embed.
    #[cfg(feature = "metadata")]
    pub fn set_icc_profile(&mut self, profile: Vec<u8>) {
        self.config.icc_profile = Some(profile);
    }

    /// Add a full-canvas frame of typed pixels.
    ///
    /// # Arguments
    ///
    /// * `pixels` - Frame pixel data, canvas width x height
    /// * `timestamp_ms` - Frame timestamp in milliseconds from animation start
    pub fn add_frame<P: Pixel>(&mut self, pixels: &[P], timestamp_ms: u32) -> Result<()> {
        let expected = self.width as usize * self.height as usize;
        if pixels.len() < expected {
            return Err(at!(Error::InvalidInput("buffer too small".into())));
        }
        let rgba = pixels[..expected].iter().map(|p| p.to_rgba()).collect();
        self.push(rgba, timestamp_ms)
    }

    /// Add a frame with RGBA byte data.
    pub fn add_frame_rgba(&mut self, data: &[u8], timestamp_ms: u32) -> Result<()> {
        self.add_frame_internal(data, timestamp_ms, PixelFormat::Rgba)
    }

    /// Add a frame with RGB byte data (no alpha).
    pub fn add_frame_rgb(&mut self, data: &[u8], timestamp_ms: u32) -> Result<()> {
        self.add_frame_internal(data, timestamp_ms, PixelFormat::Rgb)
    }

    /// Add a frame with BGRA byte data.
    pub fn add_frame_bgra(&mut self, data: &[u8], timestamp_ms: u32) -> Result<()> {
        self.add_frame_internal(data, timestamp_ms, PixelFormat::Bgra)
    }

    /// Add a frame with BGR byte data (no alpha).
    pub fn add_frame_bgr(&mut self, data: &[u8], timestamp_ms: u32) -> Result<()> {
        self.add_frame_internal(data, timestamp_ms, PixelFormat::Bgr)
    }

    fn add_frame_internal(&mut self, data: &[u8], timestamp_ms: u32, format: PixelFormat) -> Result<()> {
        let expected = self.width as usize * self.height as usize * format.bytes_per_pixel();
        if data.len() < expected {
            return Err(at!(Error::InvalidInput("buffer too small".into())));
        }
        self.push(unpack(&data[..expected], format), timestamp_ms)
    }

    fn push(&mut self, pixels: Vec<RGBA8>, timestamp_ms: u32) -> Result<()> {
        if let Some(&(_, last)) = self.frames.last() {
            if timestamp_ms < last {
                return Err(at!(Error::AnimationError(alloc::format!(
                    "timestamp {}ms is before the previous frame at {}ms",
                    timestamp_ms,
                    last
                ))));
            }
        }
        self.frames.push((pixels, timestamp_ms));
        Ok(())
    }

    /// Finish encoding and return the container bytes.
    ///
    /// # Arguments
    ///
    /// * `end_timestamp_ms` - End timestamp (determines duration of last frame)
    /// * `stop` - Cancellation token, checked between frames
    pub fn finish(self, end_timestamp_ms: u32, stop: &dyn Stop) -> Result<Vec<u8>> {
        self.finish_with_stats(end_timestamp_ms, stop).map(|(b, _)| b)
    }

    /// Finish encoding and return the container bytes with statistics.
    pub fn finish_with_stats(
        self,
        end_timestamp_ms: u32,
        stop: &dyn Stop,
    ) -> Result<(Vec<u8>, EncodeStats)> {
        let Some(&(_, last)) = self.frames.last() else {
            return Err(at!(Error::AnimationError("animation has no frames".into())));
        };
        if end_timestamp_ms < last {
            return Err(at!(Error::AnimationError(alloc::format!(
                "end timestamp {}ms is before the last frame at {}ms",
                end_timestamp_ms,
                last
            ))));
        }

        let (w, h) = (self.width as usize, self.height as usize);
        let mut canvases = Vec::with_capacity(self.frames.len());
        let mut frames = self.frames.into_iter().peekable();
        while let Some((pixels, timestamp_ms)) = frames.next() {
            let end = frames.peek().map_or(end_timestamp_ms, |(_, next)| *next);
            canvases.push(Frame {
                image: ImgVec::new(pixels, w, h),
                timestamp_ms,
                duration_ms: end - timestamp_ms,
            });
        }

        let mut seq = decompose(&canvases, self.decompose_mode)?;
        seq.background = self.background;
        seq.loop_count = self.loop_count;
        encode_sequence(&seq, &self.config, stop)
    }
}

/// Encode an [`AnimationSequence`] as an animated container.
///
/// With [`EncoderConfig::max_output_bytes`] set, the bytes left after the
/// fixed chunks are shared out in proportion to frame area, and each frame
/// runs its own size search against its share.
pub fn encode_sequence(
    seq: &AnimationSequence,
    config: &EncoderConfig,
    stop: &dyn Stop,
) -> Result<(Vec<u8>, EncodeStats)> {
    config.validate()?;
    seq.validate()?;
    validate_dimensions(seq.canvas_width, seq.canvas_height)?;

    let mut mux = Muxer::new(seq.canvas_width, seq.canvas_height);
    mux.set_animation(AnimationParams {
        background: seq.background,
        loop_count: seq.loop_count,
    });
    apply_metadata(&mut mux, config);

    let params = frame_params(config);
    let mut remaining_bytes = config
        .max_output_bytes
        .map(|max| max.saturating_sub(mux.encoded_len()));
    let mut remaining_area: u64 = seq
        .frames()
        .iter()
        .map(|f| u64::from(f.descriptor.width) * u64::from(f.descriptor.height))
        .sum();

    let mut stats = EncodeStats {
        target_met: true,
        ..EncodeStats::default()
    };
    for f in seq.frames() {
        check_stop(stop)?;
        let area = u64::from(f.descriptor.width) * u64::from(f.descriptor.height);
        let budget = remaining_bytes.map(|left| SizeBudget {
            max_bytes: (left as u128 * u128::from(area) / u128::from(remaining_area.max(1))) as usize,
            overhead: container::frame_overhead(true),
        });
        let encoded = frame::encode_frame(f.image.as_ref(), &params, budget.as_ref(), stop)?;
        record_frame(&mut stats, &encoded);
        let used = container::frame_overhead(true) + encoded.data.len() + (encoded.data.len() & 1);
        remaining_bytes = remaining_bytes.map(|left| left.saturating_sub(used));
        remaining_area -= area;

        mux.push_frame(MuxFrame {
            descriptor: f.descriptor,
            mode: encoded.mode,
            bitstream: encoded.data,
            has_alpha: encoded.has_alpha,
        })?;
    }

    let bytes = mux.assemble()?;
    stats.coded_size = bytes.len();
    if let Some(max) = config.max_output_bytes {
        if bytes.len() > max {
            stats.target_met = false;
            log::warn!(
                "animation is {} bytes, over the {} byte target",
                bytes.len(),
                max
            );
        }
    }
    log::debug!(
        "encoded {}x{} animation: {} frames, {} bytes, {} attempt(s)",
        seq.canvas_width,
        seq.canvas_height,
        stats.frames,
        bytes.len(),
        stats.iterations
    );
    Ok((bytes, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::{BlendMode, DisposeMode, FrameDescriptor};
    use alloc::vec;
    use enough::Unstoppable;

    const RED: RGBA8 = RGBA8 { r: 255, g: 0, b: 0, a: 255 };
    const GREEN: RGBA8 = RGBA8 { r: 0, g: 255, b: 0, a: 255 };

    #[test]
    fn test_animation_encoder_creation() {
        assert!(AnimationEncoder::new(100, 100).is_ok());
    }

    #[test]
    fn test_animation_encoder_invalid_dimensions() {
        assert!(AnimationEncoder::new(0, 100).is_err());
        assert!(AnimationEncoder::new(100, 0).is_err());
        assert!(AnimationEncoder::new(20000, 100).is_err());
    }

    #[test]
    fn test_timestamps_must_not_go_back() {
        let mut enc = AnimationEncoder::new(2, 2).unwrap();
        enc.add_frame(&[RED; 4], 50).unwrap();
        assert!(enc.add_frame(&[RED; 4], 10).is_err());
        let err = enc.finish(20, &Unstoppable).unwrap_err();
        assert!(matches!(err.error(), Error::AnimationError(_)));
    }

    #[test]
    fn test_finish_without_frames() {
        let enc = AnimationEncoder::new(2, 2).unwrap();
        assert!(enc.finish(0, &Unstoppable).is_err());
    }

    #[test]
    fn test_lossless_round_trip_with_durations() {
        let mut second = vec![RED; 16];
        second[5] = GREEN;
        let mut enc = AnimationEncoder::with_options(4, 4, LoopCount::from(3)).unwrap();
        enc.set_lossless(true);
        enc.add_frame(&[RED; 16], 0).unwrap();
        enc.add_frame(&second, 40).unwrap();
        enc.add_frame(&second, 100).unwrap();
        let bytes = enc.finish(130, &Unstoppable).unwrap();

        let mut dec = AnimationDecoder::new(&bytes).unwrap();
        assert_eq!(dec.info().loop_count, LoopCount::from(3));
        let frames = dec.decode_all().unwrap();
        assert_eq!(frames.len(), 3);
        let timing: Vec<_> = frames.iter().map(|f| (f.timestamp_ms, f.duration_ms)).collect();
        assert_eq!(timing, vec![(0, 40), (40, 60), (100, 30)]);
        assert_eq!(frames[0].image.buf(), &[RED; 16][..]);
        assert_eq!(frames[1].image.buf(), &second[..]);
        assert_eq!(frames[2].image.buf(), &second[..]);

        let seq = dec.sequence().unwrap();
        // Only pixel (1, 1) changed; the unchanged frame is a 1x1 stub.
        assert_eq!(
            (seq.frames()[1].descriptor.x_offset, seq.frames()[1].descriptor.width),
            (1, 1)
        );
        assert_eq!(seq.frames()[2].descriptor.width, 1);
    }

    #[test]
    fn test_reset_restarts() {
        let mut enc = AnimationEncoder::new(2, 1).unwrap();
        enc.set_lossless(true);
        enc.add_frame(&[RED, RED], 0).unwrap();
        enc.add_frame(&[GREEN, RED], 10).unwrap();
        let bytes = enc.finish(20, &Unstoppable).unwrap();

        let mut dec = AnimationDecoder::new(&bytes).unwrap();
        while dec.next_frame().unwrap().is_some() {}
        assert!(!dec.has_more_frames());
        dec.reset();
        let first = dec.next_frame().unwrap().unwrap();
        assert_eq!(first.timestamp_ms, 0);
        assert_eq!(first.image.buf(), &[RED, RED][..]);
    }

    #[test]
    fn test_encode_sequence_keeps_dispose_and_blend() {
        let mut seq = AnimationSequence::new(4, 4);
        seq.push(FrameDescriptor::full_canvas(4, 4, 10), ImgVec::new(vec![RED; 16], 4, 4))
            .unwrap();
        let desc = FrameDescriptor {
            x_offset: 2,
            y_offset: 2,
            width: 2,
            height: 2,
            duration_ms: 20,
            dispose: DisposeMode::Background,
            blend: BlendMode::AlphaBlend,
        };
        seq.push(desc, ImgVec::new(vec![GREEN; 4], 2, 2)).unwrap();
        let config = EncoderConfig::new_lossless();
        let (bytes, stats) = encode_sequence(&seq, &config, &Unstoppable).unwrap();
        assert_eq!(stats.frames, 2);
        assert!(stats.target_met);

        let dec = AnimationDecoder::new(&bytes).unwrap();
        let back = dec.sequence().unwrap();
        assert_eq!(back.frames()[1].descriptor, desc);
        assert_eq!(back.total_duration_ms(), 30);
    }

    #[test]
    fn test_still_image_as_animation() {
        let bytes = crate::encode::encode_lossless(&[7u8; 16], 2, 2, &Unstoppable).unwrap();
        let mut dec = AnimationDecoder::new(&bytes).unwrap();
        assert_eq!(dec.info().frame_count, 1);
        assert_eq!(dec.info().loop_count, LoopCount::Forever);
        assert!(dec.next_frame().unwrap().is_some());
        assert!(dec.next_frame().unwrap().is_none());
    }
}
