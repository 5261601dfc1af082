//! # riffcodec
//!
//! Animated image encoding and decoding in pure Rust.
//!
//! Frames are coded either losslessly (spatial prediction, LZ77 and
//! canonical Huffman codes with a color cache) or lossily (8x8 DCT with
//! quality-scaled quantization) and stored in a RIFF chunk container that
//! also carries animation timing and ICC/EXIF/XMP metadata.
//!
//! - Still and animated encode/decode
//! - Output size targets with a bounded quality search
//! - ICC profile, EXIF and XMP embedding and extraction
//! - Streaming/incremental processing
//! - RGB, RGBA, BGR and BGRA pixel layouts
//!
//! ## Quick Start
//!
//! ```rust
//! use riffcodec::Unstoppable;
//!
//! // Create a small 2x2 RGBA image (red, green, blue, white)
//! let rgba_data: Vec<u8> = vec![
//!     255, 0, 0, 255,    // red
//!     0, 255, 0, 255,    // green
//!     0, 0, 255, 255,    // blue
//!     255, 255, 255, 255 // white
//! ];
//!
//! // Encode losslessly
//! let bytes = riffcodec::encode_lossless(&rgba_data, 2, 2, &Unstoppable)?;
//!
//! // Decode back
//! let (pixels, width, height) = riffcodec::decode_rgba(&bytes)?;
//! assert_eq!((width, height), (2, 2));
//! assert_eq!(pixels, rgba_data);
//! # Ok::<(), riffcodec::At<riffcodec::Error>>(())
//! ```
//!
//! ## Builder API
//!
//! ```rust
//! use riffcodec::{Encoder, Unstoppable};
//!
//! let rgba_data = vec![90u8; 64 * 48 * 4];
//! let (bytes, stats) = Encoder::new(&rgba_data, 64, 48)
//!     .quality(85.0)
//!     .max_output_bytes(Some(4096))
//!     .encode_with_stats(&Unstoppable)?;
//! assert!(stats.target_met);
//! assert!(bytes.len() <= 4096);
//! # Ok::<(), riffcodec::At<riffcodec::Error>>(())
//! ```
//!
//! The building blocks (`bits`, `huffman`, `color_cache`, `predict`,
//! `frame`, `container`, `compositor`) are public for callers that need
//! raw frame bitstreams or their own container handling.

#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]
#![warn(missing_docs)]

extern crate alloc;

whereat::define_at_crate_info!();

pub mod bits;
pub mod color_cache;
pub mod compositor;
pub mod container;
pub mod frame;
pub mod huffman;
pub mod predict;

mod config;
mod error;
mod lossless;
mod lossy;
mod types;

#[cfg(feature = "decode")]
mod decode;

#[cfg(feature = "encode")]
mod encode;

#[cfg(feature = "metadata")]
mod mux;

#[cfg(all(feature = "streaming", feature = "encode"))]
mod streaming;

#[cfg(all(feature = "animation", feature = "encode"))]
mod animation;

// Re-exports
pub use compositor::{
    AnimationSequence, BlendMode, DecomposeMode, DisposeMode, Frame, FrameDescriptor,
};
pub use config::{CoderOptions, DecoderConfig, EncodeStats, EncoderConfig};
pub use enough::{Stop, StopReason, Unstoppable};
pub use error::{Error, Result};
pub use frame::{decode_frame, FrameMode};
pub use types::{BitstreamFormat, ColorMode, ImageInfo, LoopCount, Pixel, PixelFormat, PixelPlane};
pub use whereat::At;

#[cfg(feature = "decode")]
pub use decode::{
    decode, decode_append, decode_bgr, decode_bgra, decode_rgb, decode_rgba, decode_to_img,
    Decoder,
};

#[cfg(feature = "encode")]
pub use encode::{encode_lossless, encode_rgb, encode_rgba, Encoder};

#[cfg(feature = "metadata")]
pub use mux::{
    embed_exif, embed_icc, embed_xmp, get_exif, get_icc_profile, get_xmp, remove_exif, remove_icc,
    remove_xmp,
};

#[cfg(all(feature = "streaming", feature = "encode"))]
pub use streaming::{DecodeStatus, StreamingDecoder, StreamingEncoder};

#[cfg(all(feature = "animation", feature = "encode"))]
pub use animation::{encode_sequence, AnimationDecoder, AnimationEncoder, AnimationInfo};
