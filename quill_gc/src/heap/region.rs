//! A contiguous range of heap words.
//!
//! Regions own their memory as a boxed slice of atomic words. Every access
//! goes through an atomic, so concurrent scavenger workers can read and
//! CAS slots without any `unsafe`.

use crate::tagged::{Address, WORD_SIZE};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Backing memory for one space.
pub struct Region {
    start: Address,
    words: Box<[AtomicUsize]>,
}

impl Region {
    /// Reserve `size` zeroed bytes starting at `start`.
    pub fn new(start: Address, size: usize) -> Self {
        debug_assert!(start.is_double_aligned());
        debug_assert_eq!(size % WORD_SIZE, 0);
        let words = (0..size / WORD_SIZE)
            .map(|_| AtomicUsize::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { start, words }
    }

    /// First address.
    #[inline]
    pub fn start(&self) -> Address {
        self.start
    }

    /// One past the last address.
    #[inline]
    pub fn end(&self) -> Address {
        self.start.offset(self.size())
    }

    /// Size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.words.len() * WORD_SIZE
    }

    /// Check whether `addr` falls inside this region.
    #[inline]
    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.start && addr < self.end()
    }

    /// The word at `addr`, if it lies in this region and is word aligned.
    #[inline]
    pub fn word(&self, addr: Address) -> Option<&AtomicUsize> {
        if !self.contains(addr) || !addr.is_word_aligned() {
            return None;
        }
        self.words.get(addr.distance_from(self.start) / WORD_SIZE)
    }

    /// Words covering `addr..addr + size`.
    #[inline]
    pub fn words(&self, addr: Address, size: usize) -> Option<&[AtomicUsize]> {
        if !addr.is_word_aligned() || addr < self.start {
            return None;
        }
        let first = addr.distance_from(self.start) / WORD_SIZE;
        self.words.get(first..first + size / WORD_SIZE)
    }

    /// Zero every word.
    pub fn clear(&self) {
        for word in self.words.iter() {
            word.store(0, Ordering::Relaxed);
        }
    }
}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Region")
            .field("start", &self.start)
            .field("end", &self.end())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_bounds() {
        let region = Region::new(Address::new(0x1000), 256);
        assert_eq!(region.size(), 256);
        assert!(region.contains(Address::new(0x1000)));
        assert!(region.contains(Address::new(0x10f8)));
        assert!(!region.contains(Address::new(0x1100)));
        assert!(region.word(Address::new(0x1004)).is_none());
    }

    #[test]
    fn test_word_access() {
        let region = Region::new(Address::new(0x1000), 64);
        region
            .word(Address::new(0x1008))
            .unwrap()
            .store(42, Ordering::Relaxed);
        let words = region.words(Address::new(0x1000), 24).unwrap();
        assert_eq!(words.len(), 3);
        assert_eq!(words[1].load(Ordering::Relaxed), 42);
        assert!(region.words(Address::new(0x1030), 32).is_none());

        region.clear();
        assert_eq!(words_sum(&region), 0);
    }

    fn words_sum(region: &Region) -> usize {
        region
            .words(region.start(), region.size())
            .unwrap()
            .iter()
            .map(|w| w.load(Ordering::Relaxed))
            .sum()
    }
}
