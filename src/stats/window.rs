//! Sliding window: a `heartbeat` rotates the ring, pushes the now-complete
//! point, zeroes `now`, and maintains a rolling `sum` over the last `W`
//! points without re-summing the ring on every tick.

use super::cycle::CycleArray;
use std::sync::atomic::{AtomicU64, Ordering};

/// A single metric's rolling window: "now" (incomplete), a ring of the last
/// `W` complete points, and their sum.
#[derive(Debug)]
pub struct SlidingWindow {
    now: AtomicU64,
    seq: CycleArray,
    sum: AtomicU64,
    heartbeat_cnt: AtomicU64,
}

impl SlidingWindow {
    pub fn new(window_size: usize) -> Self {
        Self {
            now: AtomicU64::new(0),
            seq: CycleArray::new(window_size),
            sum: AtomicU64::new(0),
            heartbeat_cnt: AtomicU64::new(0),
        }
    }

    pub fn window_size(&self) -> usize {
        self.seq.size()
    }

    /// Add `delta` to the incomplete current point.
    pub fn incr(&self, delta: u64) {
        self.now.fetch_add(delta, Ordering::Relaxed);
    }

    /// The incomplete point of "now".
    pub fn now(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }

    /// The most recently completed point.
    pub fn last(&self) -> u64 {
        self.seq.prev_item()
    }

    /// Sum of all complete points currently held in the window.
    pub fn sum(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }

    pub fn heartbeat_cnt(&self) -> u64 {
        self.heartbeat_cnt.load(Ordering::Relaxed)
    }

    /// Average over the window: divides by the tick count until the window
    /// fills, then by the fixed window size (I7).
    pub fn avg(&self) -> f64 {
        let cnt = self.heartbeat_cnt();
        let denom = if cnt > 0 && cnt < self.window_size() as u64 {
            cnt
        } else {
            self.window_size() as u64
        };
        self.sum() as f64 / denom as f64
    }

    /// Push `now` onto the ring, reset `now` to 0, roll `sum` forward.
    pub fn heartbeat(&self) {
        let now = self.now.swap(0, Ordering::Relaxed);
        let evicted = self.seq.push(now);
        // sum += now - evicted; done via fetch_add of a signed delta encoded in u64 space.
        if now >= evicted {
            self.sum.fetch_add(now - evicted, Ordering::Relaxed);
        } else {
            self.sum.fetch_sub(evicted - now, Ordering::Relaxed);
        }
        self.heartbeat_cnt.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sliding_window_law_scenario() {
        // W=4; increments (1),tick,(2),tick,(3),tick,(4),tick => sum=10,last=4,avg=2.5
        let w = SlidingWindow::new(4);
        for v in 1..=4u64 {
            w.incr(v);
            w.heartbeat();
        }
        assert_eq!(w.sum(), 10);
        assert_eq!(w.last(), 4);
        assert_eq!(w.avg(), 2.5);

        // One more (5), tick => sum=14, last=5, avg=3.5
        w.incr(5);
        w.heartbeat();
        assert_eq!(w.sum(), 14);
        assert_eq!(w.last(), 5);
        assert_eq!(w.avg(), 3.5);
    }

    #[test]
    fn partial_window_divides_by_tick_count() {
        let w = SlidingWindow::new(10);
        w.incr(3);
        w.heartbeat();
        w.incr(5);
        w.heartbeat();
        assert_eq!(w.sum(), 8);
        assert_eq!(w.avg(), 4.0); // divide by 2 ticks, not window size 10
    }

    #[test]
    fn empty_heartbeat_is_idempotent() {
        let w = SlidingWindow::new(4);
        w.heartbeat();
        assert_eq!(w.sum(), 0);
        assert_eq!(w.now(), 0);
        assert_eq!(w.heartbeat_cnt(), 1);
        w.heartbeat();
        assert_eq!(w.sum(), 0);
        assert_eq!(w.heartbeat_cnt(), 2);
    }
}
