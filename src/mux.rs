//! Metadata (ICC, EXIF, XMP) editing on existing containers.
//!
//! Frames are copied through untouched; only the metadata chunks and the
//! header flags change.

use crate::container::{Demuxer, Muxer};
use crate::error::Result;
use alloc::vec::Vec;

#[derive(Clone, Copy)]
enum Metadata {
    Icc,
    Exif,
    Xmp,
}

/// Extract ICC profile from container data.
///
/// Returns `None` if no ICC profile is present.
///
/// # Example
///
/// ```rust
/// use riffcodec::Unstoppable;
///
/// let bytes = riffcodec::encode_lossless(&[0u8; 16], 2, 2, &Unstoppable)?;
/// let tagged = riffcodec::embed_icc(&bytes, b"profile")?;
/// if let Some(icc) = riffcodec::get_icc_profile(&tagged)? {
///     println!("Found ICC profile: {} bytes", icc.len());
/// }
/// # Ok::<(), riffcodec::At<riffcodec::Error>>(())
/// ```
pub fn get_icc_profile(data: &[u8]) -> Result<Option<Vec<u8>>> {
    get_chunk(data, Metadata::Icc)
}

/// Extract EXIF metadata from container data.
///
/// Returns `None` if no EXIF data is present.
pub fn get_exif(data: &[u8]) -> Result<Option<Vec<u8>>> {
    get_chunk(data, Metadata::Exif)
}

/// Extract XMP metadata from container data.
///
/// Returns `None` if no XMP data is present.
pub fn get_xmp(data: &[u8]) -> Result<Option<Vec<u8>>> {
    get_chunk(data, Metadata::Xmp)
}

fn get_chunk(data: &[u8], kind: Metadata) -> Result<Option<Vec<u8>>> {
    let demux = Demuxer::new(data)?;
    let payload = match kind {
        Metadata::Icc => demux.icc_profile(),
        Metadata::Exif => demux.exif(),
        Metadata::Xmp => demux.xmp(),
    };
    Ok(payload.map(<[u8]>::to_vec))
}

/// Embed ICC profile into container data.
///
/// Takes existing data and adds or replaces the ICC profile.
pub fn embed_icc(data: &[u8], icc_profile: &[u8]) -> Result<Vec<u8>> {
    set_chunk(data, Metadata::Icc, Some(icc_profile.to_vec()))
}

/// Embed EXIF metadata into container data.
pub fn embed_exif(data: &[u8], exif_data: &[u8]) -> Result<Vec<u8>> {
    set_chunk(data, Metadata::Exif, Some(exif_data.to_vec()))
}

/// Embed XMP metadata into container data.
pub fn embed_xmp(data: &[u8], xmp_data: &[u8]) -> Result<Vec<u8>> {
    set_chunk(data, Metadata::Xmp, Some(xmp_data.to_vec()))
}

/// Remove ICC profile from container data.
pub fn remove_icc(data: &[u8]) -> Result<Vec<u8>> {
    set_chunk(data, Metadata::Icc, None)
}

/// Remove EXIF metadata from container data.
pub fn remove_exif(data: &[u8]) -> Result<Vec<u8>> {
    set_chunk(data, Metadata::Exif, None)
}

/// Remove XMP metadata from container data.
pub fn remove_xmp(data: &[u8]) -> Result<Vec<u8>> {
    set_chunk(data, Metadata::Xmp, None)
}

fn set_chunk(data: &[u8], kind: Metadata, payload: Option<Vec<u8>>) -> Result<Vec<u8>> {
    let mut mux = Muxer::from_data(data)?;
    match kind {
        Metadata::Icc => mux.set_icc_profile(payload),
        Metadata::Exif => mux.set_exif(payload),
        Metadata::Xmp => mux.set_xmp(payload),
    }
    mux.assemble()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::decode_rgba;
    use crate::encode::encode_lossless;
    use enough::Unstoppable;

    fn image() -> Vec<u8> {
        let rgba: Vec<u8> = (0..36u8).collect();
        encode_lossless(&rgba, 3, 3, &Unstoppable).unwrap()
    }

    #[test]
    fn test_embed_get_remove() {
        let plain = image();
        assert_eq!(get_exif(&plain).unwrap(), None);

        let tagged = embed_exif(&plain, b"Exif\0\0odd").unwrap();
        let tagged = embed_xmp(&tagged, b"<x/>").unwrap();
        assert_eq!(get_exif(&tagged).unwrap().as_deref(), Some(&b"Exif\0\0odd"[..]));
        assert_eq!(get_xmp(&tagged).unwrap().as_deref(), Some(&b"<x/>"[..]));
        assert_eq!(decode_rgba(&tagged).unwrap(), decode_rgba(&plain).unwrap());

        let header = *Demuxer::new(&tagged).unwrap().header();
        assert!(header.has_exif && header.has_xmp && !header.has_icc);

        let stripped = remove_exif(&remove_xmp(&tagged).unwrap()).unwrap();
        assert_eq!(stripped, plain);
    }

    #[test]
    fn test_replace_icc() {
        let once = embed_icc(&image(), b"first").unwrap();
        let twice = embed_icc(&once, b"second").unwrap();
        assert_eq!(get_icc_profile(&twice).unwrap().as_deref(), Some(&b"second"[..]));
        assert_eq!(remove_icc(&twice).unwrap(), image());
    }

    #[test]
    fn test_remove_missing_is_noop() {
        assert_eq!(remove_icc(&image()).unwrap(), image());
    }

    #[test]
    fn test_invalid_input() {
        assert!(get_icc_profile(b"RIFF").is_err());
        assert!(embed_exif(b"not a container", b"x").is_err());
    }
}
