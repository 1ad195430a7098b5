//! Typed object pools for orders and price levels.
//!
//! Pools grow by appending page-sized chunks and never move existing records,
//! so handles stay valid for the pool's lifetime. Released records go onto a
//! LIFO free list — the hottest record is reused first — and every record is
//! reset to its default state before `acquire` hands it out again.

use super::limit::Limit;
use super::order::{LimitRef, Order, OrderRef};
use crate::feed::Side;

/// Growth granularity in bytes; one chunk is roughly one page of records.
const CHUNK_BYTES: usize = 4096;

/// Generic chunked pool with `u32` handles.
#[derive(Debug)]
struct Pool<T> {
    chunks: Vec<Box<[T]>>,
    free: Vec<u32>,
    chunk_len: usize,
    allocated: u32,
    live: usize,
    high_water: usize,
}

impl<T: Default + Clone> Pool<T> {
    fn new() -> Self {
        let chunk_len = (CHUNK_BYTES / size_of::<T>()).max(1);
        Self {
            chunks: Vec::new(),
            free: Vec::new(),
            chunk_len,
            allocated: 0,
            live: 0,
            high_water: 0,
        }
    }

    fn with_capacity(records: usize) -> Self {
        let mut pool = Self::new();
        let chunks = records.div_ceil(pool.chunk_len);
        for _ in 0..chunks {
            pool.grow();
        }
        pool
    }

    fn grow(&mut self) {
        self.chunks
            .push(vec![T::default(); self.chunk_len].into_boxed_slice());
    }

    fn acquire(&mut self) -> u32 {
        let idx = if let Some(idx) = self.free.pop() {
            self.slot_mut(idx).clone_from(&T::default());
            idx
        } else {
            let idx = self.allocated;
            if idx as usize >= self.chunks.len() * self.chunk_len {
                self.grow();
            }
            self.allocated += 1;
            idx
        };
        self.live += 1;
        self.high_water = self.high_water.max(self.live);
        idx
    }

    fn release(&mut self, idx: u32) {
        self.free.push(idx);
        self.live -= 1;
    }

    /// Recycle every record: the free list is rebuilt over all allocated
    /// slots (LIFO over allocation order) and the live count drops to zero.
    /// Chunk capacity is preserved.
    fn recycle_all(&mut self) {
        self.free.clear();
        self.free.extend(0..self.allocated);
        self.live = 0;
    }

    #[inline]
    fn slot(&self, idx: u32) -> &T {
        &self.chunks[idx as usize / self.chunk_len][idx as usize % self.chunk_len]
    }

    #[inline]
    fn slot_mut(&mut self, idx: u32) -> &mut T {
        &mut self.chunks[idx as usize / self.chunk_len][idx as usize % self.chunk_len]
    }

    fn capacity(&self) -> usize {
        self.chunks.len() * self.chunk_len
    }
}

/// Pool of [`Order`] records addressed by [`OrderRef`].
#[derive(Debug)]
pub struct OrderPool {
    inner: Pool<Order>,
}

impl OrderPool {
    /// Create an empty pool; the first acquire allocates the first chunk.
    #[must_use]
    pub fn new() -> Self {
        Self { inner: Pool::new() }
    }

    /// Create a pool pre-sized for `records` live orders.
    #[must_use]
    pub fn with_capacity(records: usize) -> Self {
        Self {
            inner: Pool::with_capacity(records),
        }
    }

    /// Acquire a reset record and initialize it for a new order.
    pub fn acquire(
        &mut self,
        id: u64,
        price: i32,
        size: u32,
        side: Side,
        timestamp_ns: u64,
    ) -> OrderRef {
        let idx = self.inner.acquire();
        self.inner
            .slot_mut(idx)
            .init(id, price, size, side, timestamp_ns);
        OrderRef(idx)
    }

    /// Return a record to the free list.
    pub fn release(&mut self, oref: OrderRef) {
        self.inner.release(oref.0);
    }

    /// Borrow a record.
    #[inline]
    #[must_use]
    pub fn get(&self, oref: OrderRef) -> &Order {
        self.inner.slot(oref.0)
    }

    /// Borrow a record mutably.
    #[inline]
    pub fn get_mut(&mut self, oref: OrderRef) -> &mut Order {
        self.inner.slot_mut(oref.0)
    }

    /// Recycle every record, keeping chunk capacity.
    pub fn recycle_all(&mut self) {
        self.inner.recycle_all();
    }

    /// Number of records currently acquired.
    #[must_use]
    pub fn live(&self) -> usize {
        self.inner.live
    }

    /// Peak simultaneous acquires seen so far.
    #[must_use]
    pub fn high_water(&self) -> usize {
        self.inner.high_water
    }

    /// Total record capacity across all chunks.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }
}

impl Default for OrderPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Pool of [`Limit`] records addressed by [`LimitRef`].
#[derive(Debug)]
pub struct LimitPool {
    inner: Pool<Limit>,
}

impl LimitPool {
    /// Create an empty pool; the first acquire allocates the first chunk.
    #[must_use]
    pub fn new() -> Self {
        Self { inner: Pool::new() }
    }

    /// Create a pool pre-sized for `records` live levels.
    #[must_use]
    pub fn with_capacity(records: usize) -> Self {
        Self {
            inner: Pool::with_capacity(records),
        }
    }

    /// Acquire a reset record and initialize it for a new level.
    pub fn acquire(&mut self, price: i32, side: Side) -> LimitRef {
        let idx = self.inner.acquire();
        self.inner.slot_mut(idx).init(price, side);
        LimitRef(idx)
    }

    /// Return a record to the free list.
    pub fn release(&mut self, lref: LimitRef) {
        self.inner.release(lref.0);
    }

    /// Borrow a record.
    #[inline]
    #[must_use]
    pub fn get(&self, lref: LimitRef) -> &Limit {
        self.inner.slot(lref.0)
    }

    /// Borrow a record mutably.
    #[inline]
    pub fn get_mut(&mut self, lref: LimitRef) -> &mut Limit {
        self.inner.slot_mut(lref.0)
    }

    /// Recycle every record, keeping chunk capacity.
    pub fn recycle_all(&mut self) {
        self.inner.recycle_all();
    }

    /// Number of records currently acquired.
    #[must_use]
    pub fn live(&self) -> usize {
        self.inner.live
    }

    /// Peak simultaneous acquires seen so far.
    #[must_use]
    pub fn high_water(&self) -> usize {
        self.inner.high_water
    }

    /// Total record capacity across all chunks.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }
}

impl Default for LimitPool {
    fn default() -> Self {
        Self::new()
    }
}
