//! Fixed-length ring of atomic integer points.
//!
//! Every cell is an `AtomicU64` rather than a plain integer: the balance
//! predicates read `sum`/`last` from the (multi-reader) pick path while
//! `heartbeat` is the sole writer rotating the ring (see the crate-level
//! concurrency notes). Relaxed loads/stores keep this sound without a lock;
//! a picker observing a torn generation (half-old, half-new point) is an
//! accepted race per the sliding-window contract, not undefined behavior.

use std::sync::atomic::{AtomicUsize, AtomicU64, Ordering};

/// Ring buffer of `size` atomic `u64` cells, plus a write cursor.
#[derive(Debug)]
pub struct CycleArray {
    cells: Vec<AtomicU64>,
    cursor: AtomicUsize,
}

impl CycleArray {
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "cycle array size must be greater than 0");
        let mut cells = Vec::with_capacity(size);
        cells.resize_with(size, || AtomicU64::new(0));
        Self {
            cells,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn size(&self) -> usize {
        self.cells.len()
    }

    fn idx(&self, delta: usize) -> usize {
        (self.cursor.load(Ordering::Relaxed) + delta) % self.size()
    }

    /// The oldest point still held (about to be evicted by the next `push`).
    pub fn curr_item(&self) -> u64 {
        self.cells[self.idx(0)].load(Ordering::Relaxed)
    }

    /// The most recently pushed (complete) point.
    pub fn prev_item(&self) -> u64 {
        self.cells[self.idx(self.size() - 1)].load(Ordering::Relaxed)
    }

    /// Overwrite the oldest slot with `value`, then advance the cursor.
    /// Returns the value that was evicted.
    pub fn push(&self, value: u64) -> u64 {
        let i = self.idx(0);
        let evicted = self.cells[i].swap(value, Ordering::Relaxed);
        self.cursor
            .store((i + 1) % self.size(), Ordering::Relaxed);
        evicted
    }

    pub fn clear(&self) {
        for c in &self.cells {
            c.store(0, Ordering::Relaxed);
        }
        self.cursor.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_zeroed() {
        let c = CycleArray::new(4);
        assert_eq!(c.curr_item(), 0);
        assert_eq!(c.prev_item(), 0);
    }

    #[test]
    fn push_rotates_and_evicts() {
        let c = CycleArray::new(3);
        assert_eq!(c.push(1), 0);
        assert_eq!(c.prev_item(), 1);
        assert_eq!(c.push(2), 0);
        assert_eq!(c.prev_item(), 2);
        assert_eq!(c.push(3), 0);
        assert_eq!(c.prev_item(), 3);
        // ring is now full (1,2,3); next push evicts the oldest (1)
        assert_eq!(c.push(4), 1);
        assert_eq!(c.prev_item(), 4);
    }
}
