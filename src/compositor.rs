//! Animation compositing and its inverse.
//!
//! A frame is drawn onto the canvas left by the previous frame after that
//! frame's disposal has been applied. [`decompose`] goes the other way and
//! turns a list of full canvases into the smallest overwrite regions that
//! reproduce them.

use crate::error::{Error, Result};
use crate::types::{LoopCount, PixelPlane};
use alloc::format;
use alloc::vec;
use alloc::vec::Vec;
use imgref::{ImgRef, ImgVec};
use rgb::RGBA8;
use whereat::*;

const TRANSPARENT: RGBA8 = RGBA8 { r: 0, g: 0, b: 0, a: 0 };

/// What happens to a frame's rectangle once the next frame is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisposeMode {
    /// Leave it.
    #[default]
    None,
    /// Clear it to transparent.
    Background,
}

/// How a frame is drawn onto the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendMode {
    /// Replace canvas pixels.
    #[default]
    Overwrite,
    /// Source-over with straight (non-premultiplied) alpha.
    AlphaBlend,
}

/// Placement and timing of one animation frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDescriptor {
    /// Left edge on the canvas.
    pub x_offset: u32,
    /// Top edge on the canvas.
    pub y_offset: u32,
    /// Frame width.
    pub width: u32,
    /// Frame height.
    pub height: u32,
    /// Display time in milliseconds.
    pub duration_ms: u32,
    /// Disposal applied before the next frame.
    pub dispose: DisposeMode,
    /// Blending applied when drawing this frame.
    pub blend: BlendMode,
}

impl FrameDescriptor {
    /// A frame covering the whole canvas that overwrites and is not disposed.
    pub const fn full_canvas(width: u32, height: u32, duration_ms: u32) -> Self {
        Self {
            x_offset: 0,
            y_offset: 0,
            width,
            height,
            duration_ms,
            dispose: DisposeMode::None,
            blend: BlendMode::Overwrite,
        }
    }

    fn check(&self, canvas_width: u32, canvas_height: u32) -> Result<()> {
        if self.width == 0
            || self.height == 0
            || self.x_offset.saturating_add(self.width) > canvas_width
            || self.y_offset.saturating_add(self.height) > canvas_height
        {
            return Err(at!(Error::AnimationError(format!(
                "frame {}x{} at ({}, {}) outside the {}x{} canvas",
                self.width, self.height, self.x_offset, self.y_offset, canvas_width, canvas_height
            ))));
        }
        Ok(())
    }
}

/// A fully composited canvas.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Canvas pixels.
    pub image: PixelPlane,
    /// Start time in milliseconds from the beginning of the animation.
    pub timestamp_ms: u32,
    /// Display time in milliseconds.
    pub duration_ms: u32,
}

/// Blend `src` over `dst`, straight alpha.
#[inline]
pub fn blend_pixel(src: RGBA8, dst: RGBA8) -> RGBA8 {
    match src.a {
        255 => return src,
        0 => return dst,
        _ => {}
    }
    let src_a = u32::from(src.a);
    let dst_factor = u32::from(dst.a) * (255 - src_a);
    let total = src_a * 255 + dst_factor;
    if total == 0 {
        return TRANSPARENT;
    }
    let mix = |s: u8, d: u8| {
        ((u32::from(s) * src_a * 255 + u32::from(d) * dst_factor + total / 2) / total) as u8
    };
    RGBA8::new(
        mix(src.r, dst.r),
        mix(src.g, dst.g),
        mix(src.b, dst.b),
        ((total + 127) / 255) as u8,
    )
}

/// Draws frames onto a canvas one at a time.
#[derive(Debug, Clone)]
pub struct Compositor {
    canvas: ImgVec<RGBA8>,
    pending_dispose: Option<FrameDescriptor>,
    frames_drawn: usize,
}

impl Compositor {
    /// Transparent `width` x `height` canvas.
    pub fn new(width: u32, height: u32) -> Self {
        let (w, h) = (width as usize, height as usize);
        Self {
            canvas: ImgVec::new(vec![TRANSPARENT; w * h], w, h),
            pending_dispose: None,
            frames_drawn: 0,
        }
    }

    /// Current canvas.
    pub fn canvas(&self) -> ImgRef<'_, RGBA8> {
        self.canvas.as_ref()
    }

    /// Clear the canvas and start over.
    pub fn reset(&mut self) {
        self.canvas.buf_mut().fill(TRANSPARENT);
        self.pending_dispose = None;
        self.frames_drawn = 0;
    }

    /// Apply the previous frame's disposal, draw `image` at `desc`, and
    /// return the resulting canvas.
    pub fn composite(&mut self, desc: &FrameDescriptor, image: ImgRef<'_, RGBA8>) -> Result<ImgRef<'_, RGBA8>> {
        desc.check(self.canvas.width() as u32, self.canvas.height() as u32)?;
        if image.width() != desc.width as usize || image.height() != desc.height as usize {
            return Err(at!(Error::AnimationError(format!(
                "frame image is {}x{} but its descriptor says {}x{}",
                image.width(),
                image.height(),
                desc.width,
                desc.height
            ))));
        }

        if let Some(prev) = self.pending_dispose.take() {
            self.clear_rect(&prev);
        }

        let blend = if self.frames_drawn == 0 {
            BlendMode::Overwrite
        } else {
            desc.blend
        };
        let (x0, y0) = (desc.x_offset as usize, desc.y_offset as usize);
        let stride = self.canvas.stride();
        let buf = self.canvas.buf_mut();
        for (dy, src_row) in image.rows().enumerate() {
            let start = (y0 + dy) * stride + x0;
            let dst_row = &mut buf[start..start + src_row.len()];
            match blend {
                BlendMode::Overwrite => dst_row.copy_from_slice(src_row),
                BlendMode::AlphaBlend => {
                    for (d, &s) in dst_row.iter_mut().zip(src_row) {
                        *d = blend_pixel(s, *d);
                    }
                }
            }
        }

        if desc.dispose == DisposeMode::Background {
            self.pending_dispose = Some(*desc);
        }
        self.frames_drawn += 1;
        Ok(self.canvas.as_ref())
    }

    fn clear_rect(&mut self, desc: &FrameDescriptor) {
        let (x0, y0) = (desc.x_offset as usize, desc.y_offset as usize);
        let (w, h) = (desc.width as usize, desc.height as usize);
        let stride = self.canvas.stride();
        let buf = self.canvas.buf_mut();
        for y in y0..y0 + h {
            buf[y * stride + x0..y * stride + x0 + w].fill(TRANSPARENT);
        }
    }
}

/// A frame of an [`AnimationSequence`].
#[derive(Debug, Clone)]
pub struct SequenceFrame {
    /// Placement and timing.
    pub descriptor: FrameDescriptor,
    /// Frame pixels, `descriptor.width` x `descriptor.height`.
    pub image: PixelPlane,
}

/// An ordered list of frames on a shared canvas.
#[derive(Debug, Clone)]
pub struct AnimationSequence {
    /// Canvas width.
    pub canvas_width: u32,
    /// Canvas height.
    pub canvas_height: u32,
    /// Background color hint stored in the container.
    pub background: RGBA8,
    /// Number of loops.
    pub loop_count: LoopCount,
    frames: Vec<SequenceFrame>,
}

impl AnimationSequence {
    /// Empty sequence that loops forever.
    pub fn new(canvas_width: u32, canvas_height: u32) -> Self {
        Self {
            canvas_width,
            canvas_height,
            background: TRANSPARENT,
            loop_count: LoopCount::Forever,
            frames: Vec::new(),
        }
    }

    /// Append a frame.
    pub fn push(&mut self, descriptor: FrameDescriptor, image: PixelPlane) -> Result<()> {
        descriptor.check(self.canvas_width, self.canvas_height)?;
        if image.width() != descriptor.width as usize || image.height() != descriptor.height as usize {
            return Err(at!(Error::AnimationError(format!(
                "frame image is {}x{} but its descriptor says {}x{}",
                image.width(),
                image.height(),
                descriptor.width,
                descriptor.height
            ))));
        }
        self.frames.push(SequenceFrame { descriptor, image });
        Ok(())
    }

    /// Frames in display order.
    pub fn frames(&self) -> &[SequenceFrame] {
        &self.frames
    }

    /// Number of frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// No frames yet.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Sum of all frame durations.
    pub fn total_duration_ms(&self) -> u64 {
        self.frames
            .iter()
            .map(|f| u64::from(f.descriptor.duration_ms))
            .sum()
    }

    /// Check the sequence can be played.
    pub fn validate(&self) -> Result<()> {
        if self.frames.is_empty() {
            return Err(at!(Error::AnimationError("animation has no frames".into())));
        }
        if matches!(self.loop_count, LoopCount::Times(_)) && self.total_duration_ms() == 0 {
            return Err(at!(Error::AnimationError(
                "finite loop count with zero total duration".into()
            )));
        }
        Ok(())
    }

    /// Composite every frame.
    pub fn composite(&self) -> Result<Vec<Frame>> {
        self.validate()?;
        let mut compositor = Compositor::new(self.canvas_width, self.canvas_height);
        let mut timestamp_ms = 0u32;
        let mut out = Vec::with_capacity(self.frames.len());
        for f in &self.frames {
            let canvas = compositor.composite(&f.descriptor, f.image.as_ref())?;
            out.push(Frame {
                image: ImgVec::new(canvas.buf().to_vec(), canvas.width(), canvas.height()),
                timestamp_ms,
                duration_ms: f.descriptor.duration_ms,
            });
            timestamp_ms = timestamp_ms.saturating_add(f.descriptor.duration_ms);
        }
        Ok(out)
    }
}

/// How [`decompose`] sizes frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecomposeMode {
    /// Only the bounding box of pixels that changed.
    #[default]
    MinimalRegion,
    /// Every frame covers the whole canvas.
    FullFrame,
}

fn changed_bounds(prev: ImgRef<'_, RGBA8>, next: ImgRef<'_, RGBA8>) -> Option<(usize, usize, usize, usize)> {
    let mut bounds: Option<(usize, usize, usize, usize)> = None;
    for (y, (a, b)) in prev.rows().zip(next.rows()).enumerate() {
        let Some(first) = a.iter().zip(b).position(|(p, q)| p != q) else {
            continue;
        };
        let last = a.iter().zip(b).rposition(|(p, q)| p != q).unwrap_or(first);
        bounds = Some(match bounds {
            None => (first, y, last, y),
            Some((x0, y0, x1, _)) => (x0.min(first), y0, x1.max(last), y),
        });
    }
    bounds
}

fn crop(img: ImgRef<'_, RGBA8>, x: usize, y: usize, w: usize, h: usize) -> PixelPlane {
    let buf = img.sub_image(x, y, w, h).pixels().collect();
    ImgVec::new(buf, w, h)
}

/// Turn full canvases back into a sequence that composites to them.
///
/// Later frames use [`DisposeMode::None`] and [`BlendMode::Overwrite`], so
/// any rectangle containing every changed pixel reproduces the canvas.
pub fn decompose(frames: &[Frame], mode: DecomposeMode) -> Result<AnimationSequence> {
    let first = frames
        .first()
        .ok_or_else(|| at!(Error::AnimationError("no frames to decompose".into())))?;
    let (w, h) = (first.image.width(), first.image.height());
    let mut seq = AnimationSequence::new(w as u32, h as u32);
    seq.push(
        FrameDescriptor::full_canvas(w as u32, h as u32, first.duration_ms),
        first.image.clone(),
    )?;

    for pair in frames.windows(2) {
        let (prev, next) = (pair[0].image.as_ref(), pair[1].image.as_ref());
        if next.width() != w || next.height() != h {
            return Err(at!(Error::AnimationError(format!(
                "canvas size changed from {}x{} to {}x{}",
                w,
                h,
                next.width(),
                next.height()
            ))));
        }
        let (x0, y0, x1, y1) = match mode {
            DecomposeMode::FullFrame => (0, 0, w - 1, h - 1),
            DecomposeMode::MinimalRegion => changed_bounds(prev, next).unwrap_or((0, 0, 0, 0)),
        };
        let (fw, fh) = (x1 - x0 + 1, y1 - y0 + 1);
        seq.push(
            FrameDescriptor {
                x_offset: x0 as u32,
                y_offset: y0 as u32,
                width: fw as u32,
                height: fh as u32,
                duration_ms: pair[1].duration_ms,
                dispose: DisposeMode::None,
                blend: BlendMode::Overwrite,
            },
            crop(next, x0, y0, fw, fh),
        )?;
    }
    log::debug!("decomposed {} canvases ({:?})", frames.len(), mode);
    Ok(seq)
}
