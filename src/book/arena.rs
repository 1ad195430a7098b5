//! Anonymous mmap arena backing the open-addressed lookup tables.
//!
//! The arena reserves a fixed virtual range up front (huge pages first,
//! regular pages as the fallback) and hands out cache-line-aligned regions by
//! offset. Pages are only committed as they are touched, so a generous
//! reservation costs nothing until the tables actually grow into it.

use super::error::BookError;
use memmap2::{MmapMut, MmapOptions};
use tracing::debug;

/// Cache line size assumed for alignment and padding throughout the book.
pub const CACHE_LINE: usize = 64;

/// A fixed-capacity bump arena over an anonymous memory map.
pub struct Arena {
    map: MmapMut,
    used: usize,
    huge: bool,
}

impl Arena {
    /// Map a new arena of `capacity` bytes.
    ///
    /// Huge pages are attempted first; on failure (no hugetlb pool, or an
    /// unsupported platform) the arena silently falls back to regular pages.
    ///
    /// # Errors
    ///
    /// Returns [`BookError::ArenaMap`] when neither mapping succeeds.
    pub fn with_capacity(capacity: usize) -> Result<Self, BookError> {
        let capacity = align_up(capacity.max(CACHE_LINE));

        #[cfg(target_os = "linux")]
        let huge_attempt = MmapOptions::new().len(capacity).huge(None).map_anon();
        #[cfg(not(target_os = "linux"))]
        let huge_attempt: std::io::Result<MmapMut> =
            Err(std::io::Error::other("huge pages unsupported"));

        let (map, huge) = match huge_attempt {
            Ok(map) => (map, true),
            Err(_) => {
                let map = MmapOptions::new().len(capacity).map_anon().map_err(|e| {
                    BookError::ArenaMap {
                        requested: capacity,
                        message: e.to_string(),
                    }
                })?;
                (map, false)
            }
        };

        debug!(capacity, huge, "mapped lookup arena");
        Ok(Self { map, used: 0, huge })
    }

    /// Reserve `bytes` at a fixed `offset`, extending the high-water mark.
    ///
    /// Regions may overlap previously returned ones after [`Arena::reset`];
    /// callers own the layout. The returned pointer is cache-line aligned as
    /// long as `offset` is.
    ///
    /// # Errors
    ///
    /// Returns [`BookError::ArenaExhausted`] when the region does not fit.
    pub fn alloc_at(&mut self, offset: usize, bytes: usize) -> Result<*mut u8, BookError> {
        let aligned = align_up(bytes);
        let end = offset
            .checked_add(aligned)
            .ok_or(BookError::ArenaExhausted {
                requested: bytes,
                used: self.used,
                capacity: self.capacity(),
            })?;
        if end > self.capacity() {
            return Err(BookError::ArenaExhausted {
                requested: bytes,
                used: self.used,
                capacity: self.capacity(),
            });
        }

        self.used = self.used.max(end);
        // SAFETY: offset + aligned is within the mapping, checked above.
        Ok(unsafe { self.map.as_mut_ptr().add(offset) })
    }

    /// Reserve `bytes` at the current high-water mark.
    ///
    /// # Errors
    ///
    /// Returns [`BookError::ArenaExhausted`] when the region does not fit.
    pub fn alloc(&mut self, bytes: usize) -> Result<*mut u8, BookError> {
        self.alloc_at(self.used, bytes)
    }

    /// Forget all allocations, rewinding the high-water mark to zero.
    ///
    /// The mapping itself is retained; previously committed pages stay
    /// resident and are simply reused.
    pub fn reset(&mut self) {
        self.used = 0;
    }

    /// Bytes currently in use.
    #[must_use]
    pub fn used(&self) -> usize {
        self.used
    }

    /// Total mapped capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.map.len()
    }

    /// Whether the mapping landed on huge pages.
    #[must_use]
    pub fn is_huge(&self) -> bool {
        self.huge
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("capacity", &self.capacity())
            .field("used", &self.used)
            .field("huge", &self.huge)
            .finish()
    }
}

/// Round `bytes` up to a cache-line multiple.
#[inline]
#[must_use]
pub fn align_up(bytes: usize) -> usize {
    (bytes + CACHE_LINE - 1) & !(CACHE_LINE - 1)
}
