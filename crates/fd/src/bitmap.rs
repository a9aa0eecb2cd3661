//! Fixed-capacity "already seen" flags, one bit per descriptor number.

use libc::c_int;

/// Twice the usual per-process descriptor limit on Linux.
pub const DEFAULT_CAPACITY: usize = 2048;

const WORD_BITS: usize = u64::BITS as usize;

/// One bit per descriptor recording whether its first use was accounted.
///
/// The bitmap never grows.  Descriptors outside `0..capacity` read as
/// already seen and writes to them are dropped, so an unexpectedly large
/// descriptor is simply left uninstrumented instead of being logged twice.
///
/// There is no interior locking; callers serialize access (the
/// [`Tracker`](crate::Tracker) keeps it behind its lock).
#[derive(Clone, Debug)]
pub struct SeenBitmap {
    words: Box<[u64]>,
    capacity: usize,
}

impl SeenBitmap {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Build a bitmap able to track descriptors `0..capacity`.
    pub fn with_capacity(capacity: usize) -> Self {
        let words = vec![0u64; capacity.div_ceil(WORD_BITS)].into_boxed_slice();
        SeenBitmap { words, capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    fn slot(&self, fd: c_int) -> Option<(usize, u64)> {
        let bit = usize::try_from(fd).ok()?;
        if bit >= self.capacity {
            return None;
        }
        Some((bit / WORD_BITS, 1u64 << (bit % WORD_BITS)))
    }

    /// Returns true if `fd` was marked, or if it cannot be tracked at all.
    #[inline]
    pub fn is_seen(&self, fd: c_int) -> bool {
        match self.slot(fd) {
            Some((word, mask)) => self.words[word] & mask != 0,
            None => true,
        }
    }

    /// Set or clear the flag for `fd`.  Out-of-range descriptors are ignored.
    #[inline]
    pub fn mark(&mut self, fd: c_int, value: bool) {
        if let Some((word, mask)) = self.slot(fd) {
            if value {
                self.words[word] |= mask;
            } else {
                self.words[word] &= !mask;
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn count_seen(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }
}

impl Default for SeenBitmap {
    fn default() -> Self {
        Self::new()
    }
}
