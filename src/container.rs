//! RIFF container parsing and assembly.
//!
//! ```text
//! "RIFF" size "RFIM"
//!   HEAD  flags, canvas size
//!   ICCP  color profile (optional)
//!   ANIM  background color, loop count (animated only)
//!   ANMF  frame rectangle, timing, flags, nested LOSL/LOSY (repeated)
//!   LOSL | LOSY  single frame (still images only)
//!   EXIF, "XMP "  (optional)
//! ```
//!
//! All integers are little-endian and every chunk is padded to an even
//! length. Parsing borrows from the input; nothing is copied.

use crate::compositor::{BlendMode, DisposeMode, FrameDescriptor};
use crate::error::{Error, Result};
use crate::frame::{self, FrameMode, MAX_DIMENSION};
use crate::types::{LoopCount, PixelPlane};
use alloc::vec::Vec;
use rgb::RGBA8;
use whereat::*;

const RIFF_HEADER_SIZE: usize = 12;
const CHUNK_HEADER_SIZE: usize = 8;
const HEAD_SIZE: usize = 10;
const ANIM_SIZE: usize = 6;
const ANMF_HEADER_SIZE: usize = 16;
const MAX_U24: u32 = (1 << 24) - 1;

const TAG_HEAD: [u8; 4] = *b"HEAD";
const TAG_ICCP: [u8; 4] = *b"ICCP";
pub(crate) const TAG_ANIM: [u8; 4] = *b"ANIM";
const TAG_ANMF: [u8; 4] = *b"ANMF";
const TAG_EXIF: [u8; 4] = *b"EXIF";
const TAG_XMP: [u8; 4] = *b"XMP ";

const FLAG_ANIMATION: u8 = 0x02;
const FLAG_XMP: u8 = 0x04;
const FLAG_EXIF: u8 = 0x08;
const FLAG_ALPHA: u8 = 0x10;
const FLAG_ICC: u8 = 0x20;

const FRAME_DISPOSE_BACKGROUND: u8 = 0x01;
const FRAME_ALPHA_BLEND: u8 = 0x02;

fn read_u24(data: &[u8], pos: usize) -> u32 {
    u32::from(data[pos]) | u32::from(data[pos + 1]) << 8 | u32::from(data[pos + 2]) << 16
}

fn read_u32(data: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]])
}

fn tag_at(data: &[u8], pos: usize) -> [u8; 4] {
    [data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]
}

/// Bytes a chunk with a `payload_len` byte payload occupies, padding included.
pub const fn chunk_size(payload_len: usize) -> usize {
    CHUNK_HEADER_SIZE + payload_len + (payload_len & 1)
}

/// Container bytes spent on one frame besides its bitstream and pad byte.
pub(crate) const fn frame_overhead(animated: bool) -> usize {
    if animated {
        chunk_size(ANMF_HEADER_SIZE + CHUNK_HEADER_SIZE)
    } else {
        CHUNK_HEADER_SIZE
    }
}

/// Contents of the `HEAD` chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtendedHeader {
    /// Canvas width in pixels.
    pub canvas_width: u32,
    /// Canvas height in pixels.
    pub canvas_height: u32,
    /// File is an animation.
    pub has_animation: bool,
    /// Some frame carries alpha.
    pub has_alpha: bool,
    /// An `ICCP` chunk is present.
    pub has_icc: bool,
    /// An `EXIF` chunk is present.
    pub has_exif: bool,
    /// An `XMP ` chunk is present.
    pub has_xmp: bool,
}

impl ExtendedHeader {
    fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.has_animation {
            flags |= FLAG_ANIMATION;
        }
        if self.has_xmp {
            flags |= FLAG_XMP;
        }
        if self.has_exif {
            flags |= FLAG_EXIF;
        }
        if self.has_alpha {
            flags |= FLAG_ALPHA;
        }
        if self.has_icc {
            flags |= FLAG_ICC;
        }
        flags
    }
}

/// Contents of the `ANIM` chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnimationParams {
    /// Background color hint.
    pub background: RGBA8,
    /// Number of loops.
    pub loop_count: LoopCount,
}

/// A frame bitstream and the chunk that carried it.
#[derive(Debug, Clone, Copy)]
pub struct ImageChunk<'a> {
    /// Coding mode named by the chunk tag.
    pub mode: FrameMode,
    /// Raw frame bitstream.
    pub data: &'a [u8],
    /// Byte offset of `data` within the file.
    pub offset: usize,
}

impl ImageChunk<'_> {
    /// Decode the bitstream, checking it against the size the container
    /// declared for it.
    pub fn decode(&self, width: u32, height: u32) -> Result<PixelPlane> {
        let header = frame::read_frame_header(self.data, self.mode)?;
        if header.width != width || header.height != height {
            return Err(at!(Error::CorruptFrameData {
                bit_offset: 8,
                reason: "frame size does not match its container",
            }));
        }
        frame::decode_frame(self.data, self.mode)
    }
}

/// An `ANMF` chunk.
#[derive(Debug, Clone, Copy)]
pub struct FrameChunk<'a> {
    /// Placement, timing, disposal and blending.
    pub descriptor: FrameDescriptor,
    /// The nested bitstream.
    pub image: ImageChunk<'a>,
}

impl FrameChunk<'_> {
    /// Decode the frame's pixels.
    pub fn decode(&self) -> Result<PixelPlane> {
        self.image
            .decode(self.descriptor.width, self.descriptor.height)
    }
}

/// One parsed top-level chunk.
#[derive(Debug, Clone, Copy)]
#[non_exhaustive]
pub enum Chunk<'a> {
    /// `HEAD`.
    Header(ExtendedHeader),
    /// `ICCP` payload.
    ColorProfile(&'a [u8]),
    /// `ANIM`.
    Animation(AnimationParams),
    /// `ANMF`.
    Frame(FrameChunk<'a>),
    /// Top-level `LOSL` or `LOSY`.
    Image(ImageChunk<'a>),
    /// `EXIF` payload.
    Exif(&'a [u8]),
    /// `XMP ` payload.
    Xmp(&'a [u8]),
}

/// Resumable chunk parser.
///
/// Give it every byte seen so far (the same growing buffer on each call)
/// and whether that is all the input. It yields a chunk only once the
/// whole chunk is available.
#[derive(Debug, Clone, Default)]
pub struct ContainerParser {
    riff_end: Option<usize>,
    offset: usize,
    header: Option<ExtendedHeader>,
    finished: bool,
}

impl ContainerParser {
    /// New parser positioned at the start of the file.
    pub fn new() -> Self {
        Self::default()
    }

    /// The `HEAD` chunk, once parsed.
    pub fn header(&self) -> Option<&ExtendedHeader> {
        self.header.as_ref()
    }

    /// All chunks of the RIFF payload have been returned.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Byte offset of the next unparsed chunk.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Return the next complete chunk, or `None` if more input is needed or
    /// the container is exhausted (see [`is_finished`](Self::is_finished)).
    pub fn next_chunk<'a>(&mut self, data: &'a [u8], eof: bool) -> Result<Option<Chunk<'a>>> {
        if self.finished {
            return Ok(None);
        }
        let riff_end = match self.riff_end {
            Some(end) => end,
            None => match self.parse_riff_header(data, eof)? {
                Some(end) => end,
                None => return Ok(None),
            },
        };

        loop {
            let start = self.offset;
            let available = data.len().min(riff_end);
            if start >= riff_end || (eof && available.saturating_sub(start) < CHUNK_HEADER_SIZE) {
                if start < riff_end {
                    log::debug!(
                        "container: ignoring {} trailing bytes at offset {}",
                        available.saturating_sub(start),
                        start
                    );
                }
                self.finished = true;
                return Ok(None);
            }
            if riff_end - start < CHUNK_HEADER_SIZE {
                // Fragment too short to be a chunk.
                if data.len() >= riff_end {
                    self.finished = true;
                }
                return Ok(None);
            }
            if data.len() < start + CHUNK_HEADER_SIZE {
                return Ok(None);
            }

            let tag = tag_at(data, start);
            let declared = read_u32(data, start + 4) as usize;
            let payload_start = start + CHUNK_HEADER_SIZE;
            let payload_end = payload_start.saturating_add(declared);
            if payload_end > riff_end || (eof && payload_end > data.len()) {
                return Err(at!(Error::TruncatedChunk {
                    tag,
                    offset: start,
                    declared,
                    available: available.saturating_sub(payload_start),
                }));
            }
            if payload_end > data.len() {
                return Ok(None);
            }
            let payload = &data[payload_start..payload_end];

            if self.header.is_none() && tag != TAG_HEAD {
                return Err(at!(Error::UnsupportedContainer {
                    offset: start,
                    reason: "first chunk is not HEAD",
                }));
            }
            self.offset = payload_end + (declared & 1);

            let chunk = match tag {
                TAG_HEAD => Chunk::Header(self.parse_header(payload, start)?),
                TAG_ICCP => Chunk::ColorProfile(payload),
                TAG_ANIM => Chunk::Animation(parse_animation(payload, start)?),
                TAG_ANMF => Chunk::Frame(self.parse_frame(payload, start)?),
                TAG_EXIF => Chunk::Exif(payload),
                TAG_XMP => Chunk::Xmp(payload),
                _ => match FrameMode::from_tag(tag) {
                    Some(mode) => Chunk::Image(ImageChunk {
                        mode,
                        data: payload,
                        offset: payload_start,
                    }),
                    None => {
                        log::debug!(
                            "container: skipping unknown chunk {:?} ({} bytes) at offset {}",
                            tag,
                            declared,
                            start
                        );
                        continue;
                    }
                },
            };
            return Ok(Some(chunk));
        }
    }

    fn parse_riff_header(&mut self, data: &[u8], eof: bool) -> Result<Option<usize>> {
        let prefix = data.len().min(4);
        if data[..prefix] != b"RIFF"[..prefix] {
            return Err(at!(Error::UnsupportedContainer {
                offset: 0,
                reason: "missing RIFF signature",
            }));
        }
        if data.len() < RIFF_HEADER_SIZE {
            if eof {
                return Err(at!(Error::UnsupportedContainer {
                    offset: 0,
                    reason: "file too small",
                }));
            }
            return Ok(None);
        }
        if tag_at(data, 8) != *b"RFIM" {
            return Err(at!(Error::UnsupportedContainer {
                offset: 8,
                reason: "missing RFIM form type",
            }));
        }
        let riff_size = read_u32(data, 4) as usize;
        if riff_size < 4 {
            return Err(at!(Error::UnsupportedContainer {
                offset: 4,
                reason: "RIFF size too small",
            }));
        }
        let end = riff_size.saturating_add(8);
        self.riff_end = Some(end);
        self.offset = RIFF_HEADER_SIZE;
        Ok(Some(end))
    }

    fn parse_header(&mut self, payload: &[u8], offset: usize) -> Result<ExtendedHeader> {
        if self.header.is_some() {
            return Err(at!(Error::InvalidChunk {
                tag: TAG_HEAD,
                offset,
                reason: "duplicate HEAD chunk",
            }));
        }
        if payload.len() < HEAD_SIZE {
            return Err(at!(Error::InvalidChunk {
                tag: TAG_HEAD,
                offset,
                reason: "HEAD chunk too small",
            }));
        }
        let flags = payload[0];
        let canvas_width = read_u24(payload, 4) + 1;
        let canvas_height = read_u24(payload, 7) + 1;
        if canvas_width > MAX_DIMENSION || canvas_height > MAX_DIMENSION {
            return Err(at!(Error::InvalidChunk {
                tag: TAG_HEAD,
                offset,
                reason: "canvas too large",
            }));
        }
        let header = ExtendedHeader {
            canvas_width,
            canvas_height,
            has_animation: flags & FLAG_ANIMATION != 0,
            has_alpha: flags & FLAG_ALPHA != 0,
            has_icc: flags & FLAG_ICC != 0,
            has_exif: flags & FLAG_EXIF != 0,
            has_xmp: flags & FLAG_XMP != 0,
        };
        self.header = Some(header);
        Ok(header)
    }

    fn parse_frame<'a>(&self, payload: &'a [u8], offset: usize) -> Result<FrameChunk<'a>> {
        let invalid = |reason| {
            at!(Error::InvalidChunk {
                tag: TAG_ANMF,
                offset,
                reason,
            })
        };
        if payload.len() < ANMF_HEADER_SIZE + CHUNK_HEADER_SIZE {
            return Err(invalid("ANMF chunk too small"));
        }
        let x_offset = read_u24(payload, 0);
        let y_offset = read_u24(payload, 3);
        let width = read_u24(payload, 6) + 1;
        let height = read_u24(payload, 9) + 1;
        let duration_ms = read_u24(payload, 12);
        let flags = payload[15];

        let (canvas_width, canvas_height) = self
            .header
            .map(|h| (h.canvas_width, h.canvas_height))
            .unwrap_or((0, 0));
        if x_offset + width > canvas_width || y_offset + height > canvas_height {
            return Err(invalid("frame extends outside the canvas"));
        }

        let tag = tag_at(payload, ANMF_HEADER_SIZE);
        let declared = read_u32(payload, ANMF_HEADER_SIZE + 4) as usize;
        let nested_start = ANMF_HEADER_SIZE + CHUNK_HEADER_SIZE;
        let available = payload.len() - nested_start;
        if declared > available {
            return Err(at!(Error::TruncatedChunk {
                tag,
                offset: offset + CHUNK_HEADER_SIZE + ANMF_HEADER_SIZE,
                declared,
                available,
            }));
        }
        let mode = FrameMode::from_tag(tag).ok_or_else(|| invalid("unknown frame bitstream tag"))?;

        Ok(FrameChunk {
            descriptor: FrameDescriptor {
                x_offset,
                y_offset,
                width,
                height,
                duration_ms,
                dispose: if flags & FRAME_DISPOSE_BACKGROUND != 0 {
                    DisposeMode::Background
                } else {
                    DisposeMode::None
                },
                blend: if flags & FRAME_ALPHA_BLEND != 0 {
                    BlendMode::AlphaBlend
                } else {
                    BlendMode::Overwrite
                },
            },
            image: ImageChunk {
                mode,
                data: &payload[nested_start..nested_start + declared],
                offset: offset + CHUNK_HEADER_SIZE + nested_start,
            },
        })
    }
}

fn parse_animation(payload: &[u8], offset: usize) -> Result<AnimationParams> {
    if payload.len() < ANIM_SIZE {
        return Err(at!(Error::InvalidChunk {
            tag: TAG_ANIM,
            offset,
            reason: "ANIM chunk too small",
        }));
    }
    Ok(AnimationParams {
        background: RGBA8::new(payload[0], payload[1], payload[2], payload[3]),
        loop_count: LoopCount::from(u16::from_le_bytes([payload[4], payload[5]])),
    })
}

/// One-shot demuxer over a complete file.
#[derive(Debug, Clone)]
pub struct Demuxer<'a> {
    header: ExtendedHeader,
    animation: Option<AnimationParams>,
    frames: Vec<FrameChunk<'a>>,
    icc_profile: Option<&'a [u8]>,
    exif: Option<&'a [u8]>,
    xmp: Option<&'a [u8]>,
}

impl<'a> Demuxer<'a> {
    /// Parse every chunk of `data`.
    ///
    /// A still image is exposed as a single frame covering the canvas.
    pub fn new(data: &'a [u8]) -> Result<Self> {
        let mut parser = ContainerParser::new();
        let mut animation = None;
        let mut frames = Vec::new();
        let mut still = None;
        let mut icc_profile = None;
        let mut exif = None;
        let mut xmp = None;

        while let Some(chunk) = parser.next_chunk(data, true)? {
            match chunk {
                Chunk::Header(_) => {}
                Chunk::ColorProfile(p) => icc_profile = Some(p),
                Chunk::Animation(a) => animation = Some(a),
                Chunk::Frame(f) => frames.push(f),
                Chunk::Image(image) => {
                    if still.is_none() {
                        still = Some(image);
                    } else {
                        log::debug!("container: ignoring extra image chunk at {}", image.offset);
                    }
                }
                Chunk::Exif(p) => exif = Some(p),
                Chunk::Xmp(p) => xmp = Some(p),
            }
        }

        let header = parser.header.ok_or_else(|| {
            at!(Error::UnsupportedContainer {
                offset: RIFF_HEADER_SIZE,
                reason: "no HEAD chunk",
            })
        })?;

        if header.has_animation {
            if animation.is_none() && !frames.is_empty() {
                return Err(at!(Error::InvalidChunk {
                    tag: TAG_ANIM,
                    offset: RIFF_HEADER_SIZE,
                    reason: "animation without ANIM chunk",
                }));
            }
        } else {
            let image = still.ok_or_else(|| {
                at!(Error::UnsupportedContainer {
                    offset: parser.offset,
                    reason: "no image data",
                })
            })?;
            frames.clear();
            frames.push(FrameChunk {
                descriptor: FrameDescriptor::full_canvas(header.canvas_width, header.canvas_height, 0),
                image,
            });
        }
        if frames.is_empty() {
            return Err(at!(Error::UnsupportedContainer {
                offset: parser.offset,
                reason: "no frames",
            }));
        }

        Ok(Self {
            header,
            animation,
            frames,
            icc_profile,
            exif,
            xmp,
        })
    }

    /// The `HEAD` chunk.
    pub fn header(&self) -> &ExtendedHeader {
        &self.header
    }

    /// Canvas width.
    pub fn canvas_width(&self) -> u32 {
        self.header.canvas_width
    }

    /// Canvas height.
    pub fn canvas_height(&self) -> u32 {
        self.header.canvas_height
    }

    /// Whether the file is an animation.
    pub fn is_animated(&self) -> bool {
        self.header.has_animation
    }

    /// Animation parameters, defaulting to a transparent background and
    /// infinite looping when no `ANIM` chunk is present.
    pub fn animation(&self) -> AnimationParams {
        self.animation.unwrap_or(AnimationParams {
            background: RGBA8::new(0, 0, 0, 0),
            loop_count: LoopCount::Forever,
        })
    }

    /// Frames in file order.
    pub fn frames(&self) -> &[FrameChunk<'a>] {
        &self.frames
    }

    /// ICC profile payload.
    pub fn icc_profile(&self) -> Option<&'a [u8]> {
        self.icc_profile
    }

    /// EXIF payload.
    pub fn exif(&self) -> Option<&'a [u8]> {
        self.exif
    }

    /// XMP payload.
    pub fn xmp(&self) -> Option<&'a [u8]> {
        self.xmp
    }
}

/// An encoded frame ready for muxing.
#[derive(Debug, Clone)]
pub struct MuxFrame {
    /// Placement, timing, disposal and blending.
    pub descriptor: FrameDescriptor,
    /// Bitstream coding mode.
    pub mode: FrameMode,
    /// Raw frame bitstream.
    pub bitstream: Vec<u8>,
    /// The frame carries non-opaque alpha.
    pub has_alpha: bool,
}

/// Container writer. Chunks are always emitted in canonical order.
#[derive(Debug, Clone)]
pub struct Muxer {
    canvas_width: u32,
    canvas_height: u32,
    animation: Option<AnimationParams>,
    frames: Vec<MuxFrame>,
    icc_profile: Option<Vec<u8>>,
    exif: Option<Vec<u8>>,
    xmp: Option<Vec<u8>>,
}

impl Muxer {
    /// Empty container for a `width` x `height` canvas.
    pub fn new(canvas_width: u32, canvas_height: u32) -> Self {
        Self {
            canvas_width,
            canvas_height,
            animation: None,
            frames: Vec::new(),
            icc_profile: None,
            exif: None,
            xmp: None,
        }
    }

    /// Rebuild a muxer from an existing file.
    pub fn from_data(data: &[u8]) -> Result<Self> {
        let demux = Demuxer::new(data)?;
        let mut mux = Self::new(demux.canvas_width(), demux.canvas_height());
        mux.animation = demux.animation;
        mux.icc_profile = demux.icc_profile().map(<[u8]>::to_vec);
        mux.exif = demux.exif().map(<[u8]>::to_vec);
        mux.xmp = demux.xmp().map(<[u8]>::to_vec);
        for f in demux.frames() {
            let header = frame::read_frame_header(f.image.data, f.image.mode)?;
            mux.frames.push(MuxFrame {
                descriptor: f.descriptor,
                mode: f.image.mode,
                bitstream: f.image.data.to_vec(),
                has_alpha: header.has_alpha,
            });
        }
        Ok(mux)
    }

    /// Mark the container as animated.
    pub fn set_animation(&mut self, params: AnimationParams) {
        self.animation = Some(params);
    }

    /// Set or clear the ICC profile.
    pub fn set_icc_profile(&mut self, icc: Option<Vec<u8>>) {
        self.icc_profile = icc;
    }

    /// Set or clear the EXIF payload.
    pub fn set_exif(&mut self, exif: Option<Vec<u8>>) {
        self.exif = exif;
    }

    /// Set or clear the XMP payload.
    pub fn set_xmp(&mut self, xmp: Option<Vec<u8>>) {
        self.xmp = xmp;
    }

    /// Append a frame. Still images hold exactly one full-canvas frame.
    pub fn push_frame(&mut self, frame: MuxFrame) -> Result<()> {
        let d = &frame.descriptor;
        if d.width == 0
            || d.height == 0
            || d.x_offset.saturating_add(d.width) > self.canvas_width
            || d.y_offset.saturating_add(d.height) > self.canvas_height
        {
            return Err(at!(Error::InvalidInput(alloc::format!(
                "frame {}x{} at ({}, {}) does not fit the {}x{} canvas",
                d.width,
                d.height,
                d.x_offset,
                d.y_offset,
                self.canvas_width,
                self.canvas_height
            ))));
        }
        if d.duration_ms > MAX_U24 {
            return Err(at!(Error::InvalidInput(alloc::format!(
                "frame duration {}ms exceeds {}ms",
                d.duration_ms,
                MAX_U24
            ))));
        }
        self.frames.push(frame);
        Ok(())
    }

    /// Number of frames pushed.
    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    fn header(&self) -> ExtendedHeader {
        ExtendedHeader {
            canvas_width: self.canvas_width,
            canvas_height: self.canvas_height,
            has_animation: self.animation.is_some(),
            has_alpha: self.frames.iter().any(|f| f.has_alpha),
            has_icc: self.icc_profile.is_some(),
            has_exif: self.exif.is_some(),
            has_xmp: self.xmp.is_some(),
        }
    }

    fn frame_chunk_size(&self, frame: &MuxFrame) -> usize {
        let image = chunk_size(frame.bitstream.len());
        if self.animation.is_some() {
            chunk_size(ANMF_HEADER_SIZE + image)
        } else {
            image
        }
    }

    /// Whether the container is animated.
    pub fn is_animated(&self) -> bool {
        self.animation.is_some()
    }

    /// Total size of the file [`assemble`](Self::assemble) would produce.
    pub fn encoded_len(&self) -> usize {
        let mut len = RIFF_HEADER_SIZE + chunk_size(HEAD_SIZE);
        len += self.icc_profile.as_ref().map_or(0, |p| chunk_size(p.len()));
        if self.animation.is_some() {
            len += chunk_size(ANIM_SIZE);
        }
        len += self.frames.iter().map(|f| self.frame_chunk_size(f)).sum::<usize>();
        len += self.exif.as_ref().map_or(0, |p| chunk_size(p.len()));
        len += self.xmp.as_ref().map_or(0, |p| chunk_size(p.len()));
        len
    }

    /// Serialize the container.
    pub fn assemble(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.write_to(|bytes| {
            out.extend_from_slice(bytes);
            Ok(())
        })?;
        Ok(out)
    }

    /// Serialize the container chunk by chunk into `sink`.
    pub fn write_to<F>(&self, mut sink: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        if self.frames.is_empty() {
            return Err(at!(Error::InvalidInput("container has no frames".into())));
        }
        if self.animation.is_none() && self.frames.len() > 1 {
            return Err(at!(Error::InvalidInput(
                "still image with more than one frame".into()
            )));
        }
        if self.canvas_width == 0
            || self.canvas_height == 0
            || self.canvas_width > MAX_DIMENSION
            || self.canvas_height > MAX_DIMENSION
        {
            return Err(at!(Error::InvalidInput(alloc::format!(
                "canvas {}x{} outside 1..={}",
                self.canvas_width,
                self.canvas_height,
                MAX_DIMENSION
            ))));
        }
        let riff_size = self.encoded_len() - 8;
        let riff_size = u32::try_from(riff_size)
            .map_err(|_| at!(Error::InvalidInput("container exceeds 4 GiB".into())))?;

        let mut buf = Vec::with_capacity(RIFF_HEADER_SIZE);
        buf.extend_from_slice(b"RIFF");
        buf.extend_from_slice(&riff_size.to_le_bytes());
        buf.extend_from_slice(b"RFIM");
        sink(&buf)?;

        let header = self.header();
        let mut head = [0u8; HEAD_SIZE];
        head[0] = header.flags();
        put_u24(&mut head[4..7], self.canvas_width - 1);
        put_u24(&mut head[7..10], self.canvas_height - 1);
        write_chunk(&mut sink, TAG_HEAD, &[&head[..]])?;

        if let Some(icc) = &self.icc_profile {
            write_chunk(&mut sink, TAG_ICCP, &[icc.as_slice()])?;
        }

        match &self.animation {
            Some(anim) => {
                let mut payload = [0u8; ANIM_SIZE];
                payload[..4].copy_from_slice(&[
                    anim.background.r,
                    anim.background.g,
                    anim.background.b,
                    anim.background.a,
                ]);
                payload[4..].copy_from_slice(&anim.loop_count.to_u16().to_le_bytes());
                write_chunk(&mut sink, TAG_ANIM, &[&payload[..]])?;

                for frame in &self.frames {
                    let d = &frame.descriptor;
                    let mut anmf = [0u8; ANMF_HEADER_SIZE + CHUNK_HEADER_SIZE];
                    put_u24(&mut anmf[0..3], d.x_offset);
                    put_u24(&mut anmf[3..6], d.y_offset);
                    put_u24(&mut anmf[6..9], d.width - 1);
                    put_u24(&mut anmf[9..12], d.height - 1);
                    put_u24(&mut anmf[12..15], d.duration_ms);
                    let mut flags = 0;
                    if d.dispose == DisposeMode::Background {
                        flags |= FRAME_DISPOSE_BACKGROUND;
                    }
                    if d.blend == BlendMode::AlphaBlend {
                        flags |= FRAME_ALPHA_BLEND;
                    }
                    anmf[15] = flags;
                    anmf[16..20].copy_from_slice(&frame.mode.tag());
                    anmf[20..24].copy_from_slice(&payload_len(frame.bitstream.len())?.to_le_bytes());
                    let pad: &[u8] = if frame.bitstream.len() & 1 == 1 { &[0] } else { &[] };
                    write_chunk(&mut sink, TAG_ANMF, &[&anmf[..], frame.bitstream.as_slice(), pad])?;
                }
            }
            None => {
                for frame in &self.frames {
                    write_chunk(&mut sink, frame.mode.tag(), &[frame.bitstream.as_slice()])?;
                }
            }
        }

        if let Some(exif) = &self.exif {
            write_chunk(&mut sink, TAG_EXIF, &[exif.as_slice()])?;
        }
        if let Some(xmp) = &self.xmp {
            write_chunk(&mut sink, TAG_XMP, &[xmp.as_slice()])?;
        }
        Ok(())
    }
}

fn put_u24(dst: &mut [u8], v: u32) {
    dst.copy_from_slice(&v.to_le_bytes()[..3]);
}

fn payload_len(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| at!(Error::InvalidInput("chunk exceeds 4 GiB".into())))
}

fn write_chunk<F>(sink: &mut F, tag: [u8; 4], parts: &[&[u8]]) -> Result<()>
where
    F: FnMut(&[u8]) -> Result<()>,
{
    let len: usize = parts.iter().map(|p| p.len()).sum();
    let mut header = [0u8; CHUNK_HEADER_SIZE];
    header[..4].copy_from_slice(&tag);
    header[4..].copy_from_slice(&payload_len(len)?.to_le_bytes());
    sink(&header)?;
    for part in parts {
        sink(part)?;
    }
    if len & 1 == 1 {
        sink(&[0])?;
    }
    Ok(())
}
