//! Arena-backed Robin Hood hash table.
//!
//! [`OpenAddressTable`] maps `u64` keys to small `Copy` values (pool handles)
//! with linear probing and Robin Hood displacement: an inserting entry that
//! has probed further than the resident it lands on steals the slot and the
//! resident continues probing. Deletion shifts the following cluster backward
//! one slot, so no tombstones ever accumulate.
//!
//! Metadata and values live in parallel, cache-line-aligned arrays carved out
//! of a single [`Arena`]. A resize doubles capacity by appending fresh arrays
//! at the arena's high-water mark and rehashing; the abandoned region is
//! reclaimed when the table is dropped or rebuilt. Doubling is geometric, so
//! all abandoned regions together never exceed the size of the live one.

use super::arena::{Arena, align_up};
use super::error::BookError;
use rustc_hash::FxHasher;
use std::hash::Hasher;
use std::marker::PhantomData;

const STATUS_EMPTY: u8 = 0;
const STATUS_OCCUPIED: u8 = 1;

/// Rehash once occupancy reaches this fraction of capacity.
const LOAD_FACTOR_THRESHOLD: f64 = 0.85;

/// Smallest capacity a table will be created with.
const MIN_CAPACITY: usize = 64;

/// Default arena reservation: 1 GiB of virtual space, committed lazily.
const DEFAULT_ARENA_BYTES: usize = 1 << 30;

/// Per-slot metadata, kept separate from values so probe loops touch the
/// densest possible cache lines.
#[repr(C)]
#[derive(Clone, Copy)]
struct Meta {
    key: u64,
    probe: u16,
    status: u8,
    _pad: [u8; 5],
}

impl Meta {
    const EMPTY: Meta = Meta {
        key: 0,
        probe: 0,
        status: STATUS_EMPTY,
        _pad: [0; 5],
    };
}

/// Open-addressed Robin Hood map from `u64` keys to `Copy` values.
pub struct OpenAddressTable<V: Copy> {
    arena: Arena,
    meta: *mut Meta,
    values: *mut V,
    capacity: usize,
    len: usize,
    _marker: PhantomData<V>,
}

// SAFETY: The table exclusively owns its arena and the raw pointers into it;
// no aliasing handles escape. Sending the table to another thread moves that
// ownership wholesale.
unsafe impl<V: Copy + Send> Send for OpenAddressTable<V> {}

impl<V: Copy> OpenAddressTable<V> {
    /// Create a table sized for at least `min_capacity` entries, backed by
    /// the default 1 GiB virtual arena.
    ///
    /// # Errors
    ///
    /// Returns [`BookError`] when the arena cannot be mapped.
    pub fn with_capacity(min_capacity: usize) -> Result<Self, BookError> {
        Self::with_capacity_and_arena(min_capacity, DEFAULT_ARENA_BYTES)
    }

    /// Create a table with an explicit arena reservation in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`BookError`] when the arena cannot be mapped or the initial
    /// arrays do not fit in it.
    pub fn with_capacity_and_arena(
        min_capacity: usize,
        arena_bytes: usize,
    ) -> Result<Self, BookError> {
        let capacity = next_pow2(min_capacity.max(MIN_CAPACITY));
        let mut arena = Arena::with_capacity(arena_bytes)?;

        let meta_bytes = capacity
            .checked_mul(size_of::<Meta>())
            .ok_or(BookError::InvalidCapacity {
                requested: min_capacity,
            })?;
        let value_bytes =
            capacity
                .checked_mul(size_of::<V>())
                .ok_or(BookError::InvalidCapacity {
                    requested: min_capacity,
                })?;

        let meta = arena.alloc_at(0, meta_bytes)?.cast::<Meta>();
        let values = arena.alloc_at(align_up(meta_bytes), value_bytes)?.cast::<V>();

        let mut table = Self {
            arena,
            meta,
            values,
            capacity,
            len: 0,
            _marker: PhantomData,
        };
        table.wipe_metadata();
        Ok(table)
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when no entries are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current slot capacity (always a power of two).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fraction of slots occupied.
    #[must_use]
    pub fn load_factor(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            self.len as f64 / self.capacity as f64
        }
    }

    /// Bytes of arena currently reserved (live plus abandoned regions).
    #[must_use]
    pub fn arena_used(&self) -> usize {
        self.arena.used()
    }

    /// Insert or overwrite `key`.
    ///
    /// # Errors
    ///
    /// Returns [`BookError::ArenaExhausted`] when a required resize no longer
    /// fits in the arena.
    pub fn insert(&mut self, key: u64, value: V) -> Result<(), BookError> {
        if self.load_factor() >= LOAD_FACTOR_THRESHOLD {
            self.resize()?;
        }

        let mask = self.capacity - 1;
        let mut pos = (hash_u64(key) as usize) & mask;
        let mut probe: u16 = 0;
        let mut working_key = key;
        let mut working_value = value;

        loop {
            // SAFETY: pos < capacity by the mask; meta/values arrays hold
            // exactly `capacity` initialized slots.
            let meta = unsafe { &mut *self.meta.add(pos) };

            if meta.status == STATUS_EMPTY {
                meta.key = working_key;
                meta.probe = probe;
                meta.status = STATUS_OCCUPIED;
                unsafe { self.values.add(pos).write(working_value) };
                self.len += 1;
                return Ok(());
            }

            if meta.key == working_key {
                unsafe { self.values.add(pos).write(working_value) };
                return Ok(());
            }

            if probe > meta.probe {
                // Robin Hood displacement: the richer resident moves on.
                std::mem::swap(&mut working_key, &mut meta.key);
                std::mem::swap(&mut probe, &mut meta.probe);
                // SAFETY: same slot as above.
                unsafe {
                    let slot = self.values.add(pos);
                    let resident = slot.read();
                    slot.write(working_value);
                    working_value = resident;
                }
            }

            pos = (pos + 1) & mask;
            probe += 1;
        }
    }

    /// Look up `key`, copying out the value on a hit.
    #[must_use]
    pub fn get(&self, key: u64) -> Option<V> {
        let mask = self.capacity - 1;
        let mut pos = (hash_u64(key) as usize) & mask;
        let mut probe: u16 = 0;

        loop {
            // SAFETY: pos < capacity by the mask.
            let meta = unsafe { &*self.meta.add(pos) };

            if meta.status == STATUS_EMPTY {
                return None;
            }
            if meta.key == key {
                // SAFETY: occupied slot holds an initialized value.
                return Some(unsafe { self.values.add(pos).read() });
            }
            if probe > meta.probe {
                // The key would have displaced this resident; it is absent.
                return None;
            }

            pos = (pos + 1) & mask;
            probe += 1;
        }
    }

    /// True when `key` is present.
    #[must_use]
    pub fn contains(&self, key: u64) -> bool {
        self.get(key).is_some()
    }

    /// Remove `key`, shifting the following cluster backward.
    ///
    /// Returns whether the key was present.
    pub fn erase(&mut self, key: u64) -> bool {
        let mask = self.capacity - 1;
        let mut pos = (hash_u64(key) as usize) & mask;
        let mut probe: u16 = 0;

        loop {
            // SAFETY: pos < capacity by the mask.
            let meta = unsafe { &*self.meta.add(pos) };

            if meta.status == STATUS_EMPTY {
                return false;
            }
            if meta.key == key {
                self.shift_back(pos, mask);
                self.len -= 1;
                return true;
            }
            if probe > meta.probe {
                return false;
            }

            pos = (pos + 1) & mask;
            probe += 1;
        }
    }

    /// Drop every entry while keeping capacity and the arena allocation.
    pub fn clear(&mut self) {
        self.wipe_metadata();
        self.len = 0;
    }

    /// Backward-shift deletion starting from the vacated `pos`.
    fn shift_back(&mut self, mut pos: usize, mask: usize) {
        loop {
            let next = (pos + 1) & mask;
            // SAFETY: both indices are masked into range.
            let next_meta = unsafe { *self.meta.add(next) };

            if next_meta.status != STATUS_OCCUPIED || next_meta.probe == 0 {
                unsafe { self.meta.add(pos).write(Meta::EMPTY) };
                return;
            }

            unsafe {
                let mut moved = next_meta;
                moved.probe -= 1;
                self.meta.add(pos).write(moved);
                self.values.add(pos).write(self.values.add(next).read());
            }
            pos = next;
        }
    }

    /// Double capacity in place: append fresh arrays at the arena's
    /// high-water mark and rehash. The old region is abandoned until the
    /// table is dropped.
    fn resize(&mut self) -> Result<(), BookError> {
        let old_capacity = self.capacity;
        let old_meta = self.meta;
        let old_values = self.values;

        let new_capacity = old_capacity * 2;
        let meta_bytes = new_capacity * size_of::<Meta>();
        let value_bytes = new_capacity * size_of::<V>();

        let meta_offset = align_up(self.arena.used());
        let new_meta = self.arena.alloc_at(meta_offset, meta_bytes)?.cast::<Meta>();
        let new_values = self
            .arena
            .alloc_at(align_up(meta_offset + meta_bytes), value_bytes)?
            .cast::<V>();

        self.meta = new_meta;
        self.values = new_values;
        self.capacity = new_capacity;
        self.len = 0;
        self.wipe_metadata();

        for i in 0..old_capacity {
            // SAFETY: the old arrays remain valid inside the arena; resize
            // never hands their region out again during this loop.
            let meta = unsafe { &*old_meta.add(i) };
            if meta.status == STATUS_OCCUPIED {
                let value = unsafe { old_values.add(i).read() };
                self.insert_fresh(meta.key, value);
            }
        }

        Ok(())
    }

    /// Insert during rehash: keys are known unique and capacity sufficient.
    fn insert_fresh(&mut self, key: u64, value: V) {
        let mask = self.capacity - 1;
        let mut pos = (hash_u64(key) as usize) & mask;
        let mut probe: u16 = 0;
        let mut working_key = key;
        let mut working_value = value;

        loop {
            // SAFETY: pos < capacity by the mask.
            let meta = unsafe { &mut *self.meta.add(pos) };

            if meta.status == STATUS_EMPTY {
                meta.key = working_key;
                meta.probe = probe;
                meta.status = STATUS_OCCUPIED;
                unsafe { self.values.add(pos).write(working_value) };
                self.len += 1;
                return;
            }

            if probe > meta.probe {
                std::mem::swap(&mut working_key, &mut meta.key);
                std::mem::swap(&mut probe, &mut meta.probe);
                unsafe {
                    let slot = self.values.add(pos);
                    let resident = slot.read();
                    slot.write(working_value);
                    working_value = resident;
                }
            }

            pos = (pos + 1) & mask;
            probe += 1;
        }
    }

    fn wipe_metadata(&mut self) {
        // SAFETY: the metadata array holds exactly `capacity` slots and Meta
        // is valid as all-zeroes (STATUS_EMPTY).
        unsafe { std::ptr::write_bytes(self.meta, 0, self.capacity) };
    }
}

impl<V: Copy> std::fmt::Debug for OpenAddressTable<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAddressTable")
            .field("len", &self.len)
            .field("capacity", &self.capacity)
            .field("arena_used", &self.arena.used())
            .finish()
    }
}

#[inline]
fn hash_u64(key: u64) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write_u64(key);
    hasher.finish()
}

fn next_pow2(x: usize) -> usize {
    x.next_power_of_two()
}
