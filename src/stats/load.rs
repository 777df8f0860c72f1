//! Per-node load and server statistics.
//!
//! The reference implementation composes these through a chain of mixin
//! wrappers (`ban_wrapper<server_load_stats_wrapper<load_stats<node>>>`); here
//! the same two shapes are flattened into a two-variant enum, with the ban
//! bookkeeping folded directly into the server-stats variant since only that
//! variant ever needs it (§4.6).

use super::window::SlidingWindow;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Tracks a single rolling load figure and its fleet-wide rank.
#[derive(Debug)]
pub struct LoadStats {
    load: SlidingWindow,
    load_rank: AtomicU32,
}

impl LoadStats {
    pub fn new(window_size: usize) -> Self {
        Self {
            load: SlidingWindow::new(window_size),
            load_rank: AtomicU32::new(0),
        }
    }

    pub fn incr_load(&self, delta: u64) {
        self.load.incr(delta);
    }

    pub fn load_now(&self) -> u64 {
        self.load.now()
    }

    pub fn load_last(&self) -> u64 {
        self.load.last()
    }

    pub fn load_sum(&self) -> u64 {
        self.load.sum()
    }

    pub fn load_avg(&self) -> f64 {
        self.load.avg()
    }

    pub fn load_rank(&self) -> u32 {
        self.load_rank.load(Ordering::Relaxed)
    }

    pub fn set_load_rank(&self, rank: u32) {
        self.load_rank.store(rank, Ordering::Relaxed);
    }

    pub fn heartbeat(&self) {
        self.load.heartbeat();
    }

    pub fn heartbeat_cnt(&self) -> u64 {
        self.load.heartbeat_cnt()
    }
}

/// Full server stats: query/error/fatal/latency windows, their ranks, and
/// ban state. `load` is `None` for an "unweighted" server — in that mode
/// `load_*` accessors transparently mirror the `query` window instead of
/// recording a separate figure (§3).
#[derive(Debug)]
pub struct ServerLoadStats {
    load: Option<SlidingWindow>,
    query: SlidingWindow,
    error: SlidingWindow,
    fatal: SlidingWindow,
    latency: SlidingWindow,

    load_rank: AtomicU32,
    query_rank: AtomicU32,
    error_rank: AtomicU32,
    fatal_rank: AtomicU32,
    latency_rank: AtomicU32,

    consecutive_ban_cnt: AtomicU32,
    last_ban_time: AtomicU64,
}

impl ServerLoadStats {
    pub fn new(window_size: usize) -> Self {
        Self::build(window_size, true)
    }

    pub fn new_unweighted(window_size: usize) -> Self {
        Self::build(window_size, false)
    }

    fn build(window_size: usize, weighted: bool) -> Self {
        Self {
            load: weighted.then(|| SlidingWindow::new(window_size)),
            query: SlidingWindow::new(window_size),
            error: SlidingWindow::new(window_size),
            fatal: SlidingWindow::new(window_size),
            latency: SlidingWindow::new(window_size),
            load_rank: AtomicU32::new(0),
            query_rank: AtomicU32::new(0),
            error_rank: AtomicU32::new(0),
            fatal_rank: AtomicU32::new(0),
            latency_rank: AtomicU32::new(0),
            consecutive_ban_cnt: AtomicU32::new(0),
            last_ban_time: AtomicU64::new(0),
        }
    }

    pub fn is_unweighted(&self) -> bool {
        self.load.is_none()
    }

    fn load_window(&self) -> &SlidingWindow {
        self.load.as_ref().unwrap_or(&self.query)
    }

    pub fn incr_load(&self, delta: u64) {
        if let Some(load) = &self.load {
            load.incr(delta);
        }
    }

    pub fn incr_query(&self, delta: u64) {
        self.query.incr(delta);
    }

    pub fn incr_error(&self, delta: u64) {
        self.error.incr(delta);
    }

    pub fn incr_fatal(&self, delta: u64) {
        self.fatal.incr(delta);
    }

    pub fn incr_latency(&self, delta: u64) {
        self.latency.incr(delta);
    }

    /// Records one request's outcome in a single call: a query, its latency,
    /// and whether it errored / was fatal.
    pub fn incr_server_load(&self, latency: u64, is_error: bool, is_fatal: bool) {
        self.incr_query(1);
        self.incr_latency(latency);
        if is_error {
            self.incr_error(1);
        }
        if is_fatal {
            self.incr_fatal(1);
        }
    }

    pub fn load_now(&self) -> u64 {
        self.load_window().now()
    }
    pub fn load_last(&self) -> u64 {
        self.load_window().last()
    }
    pub fn load_sum(&self) -> u64 {
        self.load_window().sum()
    }
    pub fn load_avg(&self) -> f64 {
        self.load_window().avg()
    }

    pub fn query_now(&self) -> u64 {
        self.query.now()
    }
    pub fn query_last(&self) -> u64 {
        self.query.last()
    }
    pub fn query_sum(&self) -> u64 {
        self.query.sum()
    }

    pub fn fatal_now(&self) -> u64 {
        self.fatal.now()
    }
    pub fn fatal_last(&self) -> u64 {
        self.fatal.last()
    }

    pub fn error_sum(&self) -> u64 {
        self.error.sum()
    }

    /// Average latency per request over the whole retained window: latency
    /// sum divided by query sum, not by tick count (a node's tick-to-tick
    /// query volume varies, so dividing by window size would put nodes on
    /// different scales).
    pub fn latency_avg(&self) -> f64 {
        ratio(self.latency.sum(), self.query.sum())
    }

    /// Window (sum-based) error rate: errors over the whole retained window
    /// divided by queries over the same window.
    pub fn error_rate(&self) -> f64 {
        ratio(self.error.sum(), self.query.sum())
    }

    /// Window (sum-based) fatal rate: fatals over the whole retained window
    /// divided by queries over the same window.
    pub fn fatal_rate(&self) -> f64 {
        ratio(self.fatal.sum(), self.query.sum())
    }

    /// Fatal rate at the current (incomplete) point.
    pub fn fatal_rate_now(&self) -> f64 {
        ratio(self.fatal.now(), self.query.now())
    }

    /// Fatal rate at the most recently completed point.
    pub fn fatal_rate_last(&self) -> f64 {
        ratio(self.fatal.last(), self.query.last())
    }

    pub fn load_rank(&self) -> u32 {
        self.load_rank.load(Ordering::Relaxed)
    }
    pub fn query_rank(&self) -> u32 {
        self.query_rank.load(Ordering::Relaxed)
    }
    pub fn error_rank(&self) -> u32 {
        self.error_rank.load(Ordering::Relaxed)
    }
    pub fn fatal_rank(&self) -> u32 {
        self.fatal_rank.load(Ordering::Relaxed)
    }
    pub fn latency_rank(&self) -> u32 {
        self.latency_rank.load(Ordering::Relaxed)
    }

    pub fn set_load_rank(&self, rank: u32) {
        self.load_rank.store(rank, Ordering::Relaxed);
    }
    pub fn set_query_rank(&self, rank: u32) {
        self.query_rank.store(rank, Ordering::Relaxed);
    }
    pub fn set_error_rank(&self, rank: u32) {
        self.error_rank.store(rank, Ordering::Relaxed);
    }
    pub fn set_fatal_rank(&self, rank: u32) {
        self.fatal_rank.store(rank, Ordering::Relaxed);
    }
    pub fn set_latency_rank(&self, rank: u32) {
        self.latency_rank.store(rank, Ordering::Relaxed);
    }

    pub fn consecutive_ban_cnt(&self) -> u32 {
        self.consecutive_ban_cnt.load(Ordering::Relaxed)
    }

    pub fn last_ban_time(&self) -> u64 {
        self.last_ban_time.load(Ordering::Relaxed)
    }

    /// Record a new ban at time `now` (seconds), bumping the consecutive
    /// count so the next recovery delay backs off further.
    pub fn mark_banned(&self, now: u64) {
        self.consecutive_ban_cnt.fetch_add(1, Ordering::Relaxed);
        self.last_ban_time.store(now, Ordering::Relaxed);
    }

    /// Clear the consecutive-ban streak after a clean bi-tick. `last_ban_time`
    /// is left untouched — the next recovery delay simply collapses to the
    /// base `recover_delay_s` once the count is 0 (§4.6).
    pub fn clear_ban_streak(&self) {
        self.consecutive_ban_cnt.store(0, Ordering::Relaxed);
    }

    /// A node had a clean bi-tick if both the current and previous points
    /// show traffic with zero fatal outcomes.
    pub fn is_clean_bi_tick(&self) -> bool {
        self.query.now() > 0
            && self.fatal.now() == 0
            && self.query.last() > 0
            && self.fatal.last() == 0
    }

    pub fn heartbeat(&self) {
        if let Some(load) = &self.load {
            load.heartbeat();
        }
        self.query.heartbeat();
        self.error.heartbeat();
        self.fatal.heartbeat();
        self.latency.heartbeat();
    }

    /// All windows advance together each heartbeat, so the `query` window's
    /// count is representative of the whole stats object.
    pub fn heartbeat_cnt(&self) -> u64 {
        self.query.heartbeat_cnt()
    }
}

fn ratio(num: u64, denom: u64) -> f64 {
    if denom == 0 {
        0.0
    } else {
        num as f64 / denom as f64
    }
}

/// Flat replacement for the reference implementation's wrapper stack: every
/// node carries at most one of these, selected at construction time.
#[derive(Debug)]
pub enum NodeStats {
    Load(LoadStats),
    Server(ServerLoadStats),
}

impl NodeStats {
    pub fn incr_load(&self, delta: u64) {
        match self {
            NodeStats::Load(s) => s.incr_load(delta),
            NodeStats::Server(s) => s.incr_load(delta),
        }
    }

    pub fn load_now(&self) -> u64 {
        match self {
            NodeStats::Load(s) => s.load_now(),
            NodeStats::Server(s) => s.load_now(),
        }
    }

    pub fn load_last(&self) -> u64 {
        match self {
            NodeStats::Load(s) => s.load_last(),
            NodeStats::Server(s) => s.load_last(),
        }
    }

    pub fn load_sum(&self) -> u64 {
        match self {
            NodeStats::Load(s) => s.load_sum(),
            NodeStats::Server(s) => s.load_sum(),
        }
    }

    pub fn load_avg(&self) -> f64 {
        match self {
            NodeStats::Load(s) => s.load_avg(),
            NodeStats::Server(s) => s.load_avg(),
        }
    }

    pub fn load_rank(&self) -> u32 {
        match self {
            NodeStats::Load(s) => s.load_rank(),
            NodeStats::Server(s) => s.load_rank(),
        }
    }

    pub fn set_load_rank(&self, rank: u32) {
        match self {
            NodeStats::Load(s) => s.set_load_rank(rank),
            NodeStats::Server(s) => s.set_load_rank(rank),
        }
    }

    pub fn heartbeat(&self) {
        match self {
            NodeStats::Load(s) => s.heartbeat(),
            NodeStats::Server(s) => s.heartbeat(),
        }
    }

    pub fn heartbeat_cnt(&self) -> u64 {
        match self {
            NodeStats::Load(s) => s.heartbeat_cnt(),
            NodeStats::Server(s) => s.heartbeat_cnt(),
        }
    }

    pub fn as_server(&self) -> Option<&ServerLoadStats> {
        match self {
            NodeStats::Server(s) => Some(s),
            NodeStats::Load(_) => None,
        }
    }

    pub fn as_load(&self) -> Option<&LoadStats> {
        match self {
            NodeStats::Load(s) => Some(s),
            NodeStats::Server(_) => None,
        }
    }
}
