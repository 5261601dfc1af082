//! Direct-mapped cache of recently coded ARGB colors.
//!
//! Encoder and decoder insert every pixel in raster order, so both sides
//! hold identical caches and a cached color can be sent as its index.

use crate::error::{Error, Result};
use alloc::vec;
use alloc::vec::Vec;
use whereat::*;

/// Largest supported cache, in index bits.
pub const MAX_CACHE_BITS: u8 = 11;

/// Hash multiplier; both sides must agree on it.
const COLOR_CACHE_MULT: u32 = 0x1e35a7bd;

/// Hash a color to [`MAX_CACHE_BITS`] bits.
#[inline]
pub fn hash(argb: u32) -> u32 {
    COLOR_CACHE_MULT.wrapping_mul(argb) >> (32 - MAX_CACHE_BITS as u32)
}

/// Color cache with `1 << bits` entries.
#[derive(Debug, Clone)]
pub struct ColorCache {
    colors: Vec<u32>,
    bits: u8,
}

impl ColorCache {
    /// Create a cache of `1 << bits` entries. `bits` must be in 1..=11.
    pub fn new(bits: u8) -> Result<Self> {
        if !(1..=MAX_CACHE_BITS).contains(&bits) {
            return Err(at!(Error::InvalidConfig(alloc::format!(
                "color cache bits must be 1..={}, got {}",
                MAX_CACHE_BITS,
                bits
            ))));
        }
        Ok(Self {
            colors: vec![0; 1 << bits],
            bits,
        })
    }

    /// Index bits.
    #[inline]
    pub fn bits(&self) -> u8 {
        self.bits
    }

    /// Number of entries.
    #[inline]
    pub fn size(&self) -> usize {
        self.colors.len()
    }

    #[inline]
    fn index(&self, argb: u32) -> usize {
        hash(argb) as usize % self.colors.len()
    }

    /// Store a color in its slot.
    #[inline]
    pub fn insert(&mut self, argb: u32) {
        let idx = self.index(argb);
        self.colors[idx] = argb;
    }

    /// Index of `argb` if it is currently cached.
    #[inline]
    pub fn lookup(&self, argb: u32) -> Option<u16> {
        let idx = self.index(argb);
        (self.colors[idx] == argb).then_some(idx as u16)
    }

    /// Color stored at `idx`, or `None` if the index is out of range.
    #[inline]
    pub fn get(&self, idx: usize) -> Option<u32> {
        self.colors.get(idx).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_is_hash_mod_size() {
        for bits in 1..=MAX_CACHE_BITS {
            let mut cache = ColorCache::new(bits).unwrap();
            for argb in [0u32, 0xff00_0000, 0xffff_ffff, 0x1234_5678, 0x8040_2010] {
                cache.insert(argb);
                let idx = cache.lookup(argb).unwrap() as usize;
                assert_eq!(idx, hash(argb) as usize % (1 << bits));
                assert_eq!(cache.get(idx), Some(argb));
            }
        }
    }

    #[test]
    fn test_collision_evicts() {
        let mut cache = ColorCache::new(1).unwrap();
        let a = 0xff00_0000u32;
        let b = (1..u32::MAX)
            .map(|d| a.wrapping_add(d))
            .find(|&c| hash(c) % 2 == hash(a) % 2)
            .unwrap();
        cache.insert(a);
        cache.insert(b);
        assert_eq!(cache.lookup(a), None);
        assert!(cache.lookup(b).is_some());
    }

    #[test]
    fn test_invalid_bits() {
        assert!(ColorCache::new(0).is_err());
        assert!(ColorCache::new(12).is_err());
        assert_eq!(ColorCache::new(4).unwrap().get(16), None);
    }
}
