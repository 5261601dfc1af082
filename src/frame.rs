//! Single-frame codec.
//!
//! Every frame bitstream starts with a 40-bit header: a signature byte that
//! names the coding mode, 14-bit width and height (minus one), an alpha
//! flag and a 3-bit version. Which mode to expect comes from the container
//! chunk tag; the signature only confirms it.

use crate::bits::{BitReader, BitWriter};
use crate::error::{check_stop, Error, Result};
use crate::lossless::{self, LosslessParams};
use crate::lossy;
use crate::types::PixelPlane;
use alloc::vec::Vec;
use enough::Stop;
use imgref::{ImgRef, ImgVec};
use rgb::RGBA8;
use whereat::*;

/// Largest frame width or height.
pub const MAX_DIMENSION: u32 = 16384;

/// Upper bound on encode attempts made while searching for a size target.
pub const MAX_SEARCH_ITERATIONS: u32 = 8;

const LOSSLESS_SIGNATURE: u8 = 0x2f;
const LOSSY_SIGNATURE: u8 = 0x9d;
const VERSION: u32 = 0;

/// Size of the frame header in bytes (40 bits).
pub const FRAME_HEADER_SIZE: usize = 5;

/// Coding mode of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameMode {
    /// LZ77 + Huffman, exact.
    Lossless,
    /// Block DCT with quantization.
    Lossy,
}

impl FrameMode {
    /// Container chunk tag that carries frames of this mode.
    pub const fn tag(self) -> [u8; 4] {
        match self {
            FrameMode::Lossless => *b"LOSL",
            FrameMode::Lossy => *b"LOSY",
        }
    }

    /// Mode named by a container chunk tag.
    pub fn from_tag(tag: [u8; 4]) -> Option<Self> {
        match &tag {
            b"LOSL" => Some(FrameMode::Lossless),
            b"LOSY" => Some(FrameMode::Lossy),
            _ => None,
        }
    }

    const fn signature(self) -> u8 {
        match self {
            FrameMode::Lossless => LOSSLESS_SIGNATURE,
            FrameMode::Lossy => LOSSY_SIGNATURE,
        }
    }
}

/// Parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Whether the frame carries non-opaque alpha.
    pub has_alpha: bool,
    /// Coding mode.
    pub mode: FrameMode,
}

fn write_header(w: &mut BitWriter, header: &FrameHeader) -> Result<()> {
    w.write_bits(header.mode.signature() as u32, 8)?;
    w.write_bits(header.width - 1, 14)?;
    w.write_bits(header.height - 1, 14)?;
    w.write_bit(header.has_alpha)?;
    w.write_bits(VERSION, 3)
}

enum State {
    Header,
    ModeSelect(FrameHeader),
    Lossless(FrameHeader),
    Lossy(FrameHeader),
    Reconstructed(PixelPlane),
    Done,
}

/// Decoder for one frame bitstream.
///
/// Runs `Header → ModeSelect → {Lossless | Lossy} → Reconstructed`. Each
/// decoder owns its bit cursor; nothing is shared between frames.
///
/// Built with [`incremental`](Self::incremental), the decoder is fed bytes as
/// they arrive and [`poll`](Self::poll) advances as far as the input allows.
/// A stage that runs out of input is retried from its first bit once more
/// bytes are fed, so a partly decoded frame is never returned.
pub struct FrameDecoder {
    reader: BitReader,
    mode: FrameMode,
    state: State,
    header: Option<FrameHeader>,
}

impl FrameDecoder {
    /// Prepare to decode `data`, which the container labelled as `mode`.
    pub fn new(data: &[u8], mode: FrameMode) -> Self {
        Self {
            reader: BitReader::new(data),
            mode,
            state: State::Header,
            header: None,
        }
    }

    /// Prepare to decode a frame whose bytes arrive through [`feed`](Self::feed).
    pub fn incremental(mode: FrameMode) -> Self {
        Self {
            reader: BitReader::incremental(),
            mode,
            state: State::Header,
            header: None,
        }
    }

    /// Append input bytes.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.reader.feed(bytes);
    }

    /// Mark the input complete. Running out of bits is an error from now on.
    pub fn finish_input(&mut self) {
        self.reader.finish_input();
    }

    /// Parse the header if needed and return it.
    pub fn header(&mut self) -> Result<FrameHeader> {
        if let Some(h) = self.header {
            return Ok(h);
        }
        self.step()?;
        self.header
            .ok_or_else(|| at!(Error::CorruptFrameData {
                bit_offset: 0,
                reason: "frame header unavailable",
            }))
    }

    /// Header, once enough input has arrived to parse it.
    pub fn parsed_header(&self) -> Option<FrameHeader> {
        self.header
    }

    /// Advance as far as the input allows.
    ///
    /// Returns the pixels once the frame is complete and `None` while more
    /// input is needed. After the pixels have been returned, further calls
    /// return `None`.
    pub fn poll(&mut self) -> Result<Option<PixelPlane>> {
        loop {
            match core::mem::replace(&mut self.state, State::Done) {
                State::Reconstructed(plane) => return Ok(Some(plane)),
                State::Done => return Ok(None),
                state => self.state = state,
            }
            let checkpoint = self.reader.bit_position();
            match self.step() {
                Ok(()) => {}
                Err(e)
                    if !self.reader.input_complete()
                        && matches!(e.error(), Error::TruncatedStream { .. }) =>
                {
                    self.reader.set_bit_position(checkpoint)?;
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Run the state machine to completion.
    pub fn decode(mut self) -> Result<PixelPlane> {
        self.reader.finish_input();
        self.poll()?.ok_or_else(|| {
            at!(Error::CorruptFrameData {
                bit_offset: self.reader.bit_position(),
                reason: "frame decode did not finish",
            })
        })
    }

    /// Run one stage. The state only changes when the stage succeeds.
    fn step(&mut self) -> Result<()> {
        let next = match self.state {
            State::Header => {
                let header = self.read_header()?;
                self.header = Some(header);
                State::ModeSelect(header)
            }
            State::ModeSelect(header) => match header.mode {
                FrameMode::Lossless => State::Lossless(header),
                FrameMode::Lossy => State::Lossy(header),
            },
            State::Lossless(header) => {
                let (w, h) = (header.width as usize, header.height as usize);
                let argb = lossless::decode_body(&mut self.reader, w, h)?;
                let pixels = argb.into_iter().map(lossless::argb_to_rgba).collect();
                State::Reconstructed(ImgVec::new(pixels, w, h))
            }
            State::Lossy(header) => {
                let (w, h) = (header.width as usize, header.height as usize);
                let pixels = lossy::decode_body(&mut self.reader, w, h, header.has_alpha)?;
                State::Reconstructed(ImgVec::new(pixels, w, h))
            }
            State::Reconstructed(_) | State::Done => return Ok(()),
        };
        self.state = next;
        Ok(())
    }

    fn read_header(&mut self) -> Result<FrameHeader> {
        let r = &mut self.reader;
        let signature = r.read_bits(8)? as u8;
        if signature != self.mode.signature() {
            return Err(at!(Error::CorruptFrameData {
                bit_offset: 0,
                reason: "frame signature does not match its chunk",
            }));
        }
        let width = r.read_bits(14)? + 1;
        let height = r.read_bits(14)? + 1;
        let has_alpha = r.read_bit()?;
        let pos = r.bit_position();
        if r.read_bits(3)? != VERSION {
            return Err(at!(Error::CorruptFrameData {
                bit_offset: pos,
                reason: "unsupported frame version",
            }));
        }
        Ok(FrameHeader {
            width,
            height,
            has_alpha,
            mode: self.mode,
        })
    }
}

/// Read just the header of a frame bitstream.
pub fn read_frame_header(data: &[u8], mode: FrameMode) -> Result<FrameHeader> {
    FrameDecoder::new(data, mode).header()
}

/// Decode a raw frame bitstream.
pub fn decode_frame(data: &[u8], mode: FrameMode) -> Result<PixelPlane> {
    FrameDecoder::new(data, mode).decode()
}

/// Frame encoder settings.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FrameParams {
    pub mode: FrameMode,
    /// 0-100, lossy only.
    pub quality: u8,
    /// 0-6.
    pub method: u8,
    /// Color cache bits for lossless frames, 0 disables.
    pub cache_bits: u8,
    pub exact: bool,
}

/// Byte budget for a frame payload inside a larger output.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SizeBudget {
    /// Cap on the whole output.
    pub max_bytes: usize,
    /// Output bytes other than the frame payload and its pad byte.
    pub overhead: usize,
}

impl SizeBudget {
    fn fits(&self, payload_len: usize) -> bool {
        self.overhead + payload_len + (payload_len & 1) <= self.max_bytes
    }
}

/// Result of [`encode_frame`].
#[derive(Debug, Clone)]
pub(crate) struct EncodedFrame {
    pub data: Vec<u8>,
    pub mode: FrameMode,
    pub has_alpha: bool,
    pub quality: u8,
    pub method: u8,
    pub target_met: bool,
    pub iterations: u32,
}

fn encode_once(
    img: ImgRef<'_, RGBA8>,
    pixels: &[RGBA8],
    has_alpha: bool,
    params: &FrameParams,
    stop: &dyn Stop,
) -> Result<Vec<u8>> {
    let (width, height) = (img.width(), img.height());
    let mut w = BitWriter::with_capacity(width * height / 2 + 16);
    write_header(
        &mut w,
        &FrameHeader {
            width: width as u32,
            height: height as u32,
            has_alpha,
            mode: params.mode,
        },
    )?;
    match params.mode {
        FrameMode::Lossless => lossless::encode_body(
            &mut w,
            pixels,
            width,
            height,
            &LosslessParams {
                method: params.method,
                cache_bits: params.cache_bits,
                exact: params.exact,
            },
            stop,
        )?,
        FrameMode::Lossy => {
            lossy::encode_body(&mut w, pixels, width, height, params.quality, has_alpha, stop)?
        }
    }
    Ok(w.finish())
}

/// Encode one frame, optionally searching for settings that fit `budget`.
///
/// Lossy frames binary-search the quality below the requested one; lossless
/// frames try higher effort. At most [`MAX_SEARCH_ITERATIONS`] encodes run.
/// If nothing fits, the smallest output is returned with `target_met`
/// cleared.
pub(crate) fn encode_frame(
    img: ImgRef<'_, RGBA8>,
    params: &FrameParams,
    budget: Option<&SizeBudget>,
    stop: &dyn Stop,
) -> Result<EncodedFrame> {
    let (width, height) = (img.width() as u32, img.height() as u32);
    if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(at!(Error::InvalidInput(alloc::format!(
            "frame dimensions {}x{} outside 1..={}",
            width,
            height,
            MAX_DIMENSION
        ))));
    }
    let pixels: Vec<RGBA8> = img.rows().flat_map(|row| row.iter().copied()).collect();
    let has_alpha = pixels.iter().any(|p| p.a != 255);

    let first = encode_once(img, &pixels, has_alpha, params, stop)?;
    let mut iterations = 1;
    let mut result = EncodedFrame {
        data: first,
        mode: params.mode,
        has_alpha,
        quality: params.quality,
        method: params.method,
        target_met: true,
        iterations,
    };
    let Some(budget) = budget else {
        return Ok(result);
    };
    if budget.fits(result.data.len()) {
        return Ok(result);
    }

    let mut best_fit: Option<EncodedFrame> = None;
    let mut smallest = result.clone();
    match params.mode {
        FrameMode::Lossy => {
            let mut lo: i32 = 0;
            let mut hi: i32 = params.quality as i32 - 1;
            while lo <= hi && iterations < MAX_SEARCH_ITERATIONS {
                check_stop(stop)?;
                let mid = (lo + hi) / 2;
                let attempt = FrameParams {
                    quality: mid as u8,
                    ..*params
                };
                let data = encode_once(img, &pixels, has_alpha, &attempt, stop)?;
                iterations += 1;
                log::debug!("size search: quality {} -> {} bytes", mid, data.len());
                let candidate = EncodedFrame {
                    data,
                    quality: mid as u8,
                    ..result.clone()
                };
                if budget.fits(candidate.data.len()) {
                    lo = mid + 1;
                    best_fit = Some(candidate);
                } else {
                    hi = mid - 1;
                    if candidate.data.len() < smallest.data.len() {
                        smallest = candidate;
                    }
                }
            }
        }
        FrameMode::Lossless => {
            let mut method = params.method;
            while method < 6 && iterations < MAX_SEARCH_ITERATIONS {
                check_stop(stop)?;
                method += 1;
                let attempt = FrameParams { method, ..*params };
                let data = encode_once(img, &pixels, has_alpha, &attempt, stop)?;
                iterations += 1;
                log::debug!("size search: method {} -> {} bytes", method, data.len());
                let candidate = EncodedFrame {
                    data,
                    method,
                    ..result.clone()
                };
                if budget.fits(candidate.data.len()) {
                    best_fit = Some(candidate);
                    break;
                }
                if candidate.data.len() < smallest.data.len() {
                    smallest = candidate;
                }
            }
        }
    }

    result = match best_fit {
        Some(fit) => fit,
        None => {
            log::warn!(
                "size target of {} bytes not met; smallest frame is {} bytes",
                budget.max_bytes,
                budget.overhead + smallest.data.len()
            );
            EncodedFrame {
                target_met: false,
                ..smallest
            }
        }
    };
    result.iterations = iterations;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use enough::Unstoppable;

    fn test_image(width: usize, height: usize) -> ImgVec<RGBA8> {
        let pixels = (0..width * height)
            .map(|i| {
                let x = i % width;
                let y = i / width;
                RGBA8::new((x * 9) as u8, (y * 13) as u8, ((x * y) % 251) as u8, 255)
            })
            .collect();
        ImgVec::new(pixels, width, height)
    }

    fn params(mode: FrameMode) -> FrameParams {
        FrameParams {
            mode,
            quality: 75,
            method: 4,
            cache_bits: 0,
            exact: true,
        }
    }

    #[test]
    fn test_header_roundtrip() {
        let img = test_image(300, 7);
        let out = encode_frame(img.as_ref(), &params(FrameMode::Lossy), None, &Unstoppable).unwrap();
        let header = read_frame_header(&out.data, FrameMode::Lossy).unwrap();
        assert_eq!(
            header,
            FrameHeader {
                width: 300,
                height: 7,
                has_alpha: false,
                mode: FrameMode::Lossy
            }
        );
    }

    #[test]
    fn test_lossless_frame_roundtrip() {
        let img = test_image(37, 21);
        let out =
            encode_frame(img.as_ref(), &params(FrameMode::Lossless), None, &Unstoppable).unwrap();
        assert!(out.target_met);
        assert_eq!(out.iterations, 1);
        let decoded = decode_frame(&out.data, FrameMode::Lossless).unwrap();
        assert_eq!(decoded.width(), 37);
        assert_eq!(decoded.height(), 21);
        assert_eq!(decoded.buf(), img.buf());
    }

    #[test]
    fn test_signature_must_match_tag() {
        let img = test_image(8, 8);
        let out =
            encode_frame(img.as_ref(), &params(FrameMode::Lossless), None, &Unstoppable).unwrap();
        let err = decode_frame(&out.data, FrameMode::Lossy).unwrap_err();
        assert!(matches!(
            err.error(),
            Error::CorruptFrameData { bit_offset: 0, .. }
        ));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut w = BitWriter::new();
        w.write_bits(LOSSLESS_SIGNATURE as u32, 8).unwrap();
        w.write_bits(0, 28).unwrap();
        w.write_bit(false).unwrap();
        w.write_bits(5, 3).unwrap();
        let err = decode_frame(&w.finish(), FrameMode::Lossless).unwrap_err();
        assert!(matches!(
            err.error(),
            Error::CorruptFrameData { bit_offset: 37, .. }
        ));
    }

    #[test]
    fn test_oversized_lossless_claim_fails_on_truncation() {
        use crate::huffman::{self, HuffmanCode, MAX_CODE_LENGTH};

        let mut w = BitWriter::new();
        write_header(
            &mut w,
            &FrameHeader {
                width: MAX_DIMENSION,
                height: MAX_DIMENSION,
                has_alpha: false,
                mode: FrameMode::Lossless,
            },
        )
        .unwrap();
        w.write_bit(false).unwrap(); // no transforms
        w.write_bit(false).unwrap(); // no color cache
        for alphabet in [256 + 24, 256, 256, 256, 40] {
            let mut freqs = vec![0u32; alphabet];
            freqs[0] = 1;
            freqs[1] = 1;
            huffman::write_code(&mut w, &HuffmanCode::from_frequencies(&freqs, MAX_CODE_LENGTH))
                .unwrap();
        }
        w.write_bits(0, 32).unwrap();
        let data = w.finish();
        assert!(data.len() < 128);

        let err = decode_frame(&data, FrameMode::Lossless).unwrap_err();
        assert!(matches!(err.error(), Error::TruncatedStream { .. }), "{:?}", err);
    }

    #[test]
    fn test_incremental_decode_matches_one_shot() {
        for mode in [FrameMode::Lossless, FrameMode::Lossy] {
            let img = test_image(23, 17);
            let data = encode_frame(img.as_ref(), &params(mode), None, &Unstoppable)
                .unwrap()
                .data;
            let expected = decode_frame(&data, mode).unwrap();

            let mut dec = FrameDecoder::incremental(mode);
            assert!(dec.poll().unwrap().is_none());
            dec.feed(&data[..FRAME_HEADER_SIZE]);
            assert!(dec.poll().unwrap().is_none());
            assert_eq!(dec.parsed_header().map(|h| (h.width, h.height)), Some((23, 17)));

            let mut result = None;
            for b in &data[FRAME_HEADER_SIZE..] {
                assert!(result.is_none(), "pixels returned before the input ended");
                dec.feed(core::slice::from_ref(b));
                result = dec.poll().unwrap();
            }
            if result.is_none() {
                dec.finish_input();
                result = dec.poll().unwrap();
            }
            let plane = result.unwrap();
            assert_eq!(plane.buf(), expected.buf());
            assert!(dec.poll().unwrap().is_none());
        }
    }

    #[test]
    fn test_incremental_truncated_after_finish_input() {
        let img = test_image(16, 16);
        let data = encode_frame(img.as_ref(), &params(FrameMode::Lossless), None, &Unstoppable)
            .unwrap()
            .data;
        let mut dec = FrameDecoder::incremental(FrameMode::Lossless);
        dec.feed(&data[..data.len() / 2]);
        assert!(dec.poll().unwrap().is_none());
        dec.finish_input();
        let err = dec.poll().unwrap_err();
        assert!(matches!(err.error(), Error::TruncatedStream { .. }));
    }

    #[test]
    fn test_truncated_header() {
        let err = decode_frame(&[LOSSY_SIGNATURE, 0], FrameMode::Lossy).unwrap_err();
        assert!(matches!(err.error(), Error::TruncatedStream { .. }));
    }

    #[test]
    fn test_lossy_search_meets_reachable_budget() {
        let img = test_image(64, 64);
        let mut p = params(FrameMode::Lossy);
        p.quality = 0;
        let floor = encode_frame(img.as_ref(), &p, None, &Unstoppable).unwrap();

        let budget = SizeBudget {
            max_bytes: floor.data.len() + (floor.data.len() & 1),
            overhead: 0,
        };
        p.quality = 95;
        let out = encode_frame(img.as_ref(), &p, Some(&budget), &Unstoppable).unwrap();
        assert!(out.target_met);
        assert!(out.data.len() <= budget.max_bytes);
        assert!(out.iterations <= MAX_SEARCH_ITERATIONS);
        assert!(out.quality < 95);
    }

    #[test]
    fn test_unreachable_budget_reports_not_met() {
        let img = test_image(64, 64);
        let budget = SizeBudget {
            max_bytes: 10,
            overhead: 0,
        };
        for mode in [FrameMode::Lossy, FrameMode::Lossless] {
            let out = encode_frame(img.as_ref(), &params(mode), Some(&budget), &Unstoppable).unwrap();
            assert!(!out.target_met);
            assert!(out.iterations <= MAX_SEARCH_ITERATIONS);
            // Still a valid frame.
            decode_frame(&out.data, mode).unwrap();
        }
    }

    #[test]
    fn test_rejects_oversized() {
        let img = ImgVec::new(vec![RGBA8::default(); 0], 0, 0);
        assert!(encode_frame(img.as_ref(), &params(FrameMode::Lossless), None, &Unstoppable).is_err());
    }
}
