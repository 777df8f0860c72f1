//! The balancer: owns a hot-swappable [`MaglevHasher`], the node manager it
//! was built from, and the balance/ban policy that sits on top of a raw
//! pick.

use crate::balance::{current_unix_time, rehash, BalanceStrategy};
use crate::hasher::MaglevHasher;
use crate::node::{Node, NodeId, NodeManager};
use crate::stats::NodeStats;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicPtr, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Result of a policy-applied pick: the final node, plus the
/// try_cnt-zero ("consistent-hash") result for observability.
#[derive(Debug, Clone)]
pub struct PickResult<'a> {
    pub node_idx: usize,
    pub node: &'a Node,
    pub is_consistent: bool,
    pub consistent_node_idx: usize,
    pub consistent_node: &'a Node,
}

/// Owns the node manager and a hot-swappable slot table, and applies the
/// balance/ban policy on top of the raw consistent-hash pick.
///
/// The slot table is held behind an `AtomicPtr` over `Arc::into_raw`: the
/// single writer (`build`/`set_maglev_hasher`) keeps the previous `Arc` alive
/// for exactly one more swap before dropping it, so an in-flight reader that
/// already loaded the old pointer can finish without synchronizing against
/// the writer (§4.8).
pub struct Balancer {
    nodes: NodeManager,
    hasher: AtomicPtr<MaglevHasher>,
    previous: Mutex<Option<Arc<MaglevHasher>>>,
    write_guard: Mutex<()>,
    strategy: BalanceStrategy,
    global_stats: NodeStats,
    banned_cnt: AtomicU32,
}

impl Balancer {
    pub fn new(nodes: NodeManager, slot_size: usize, strategy: BalanceStrategy, server_stats: bool, window_size: usize) -> Self {
        let hasher = Arc::new(MaglevHasher::build(&nodes, slot_size));
        let global_stats = if server_stats {
            NodeStats::Server(crate::stats::ServerLoadStats::new(window_size))
        } else {
            NodeStats::Load(crate::stats::LoadStats::new(window_size))
        };
        Self {
            nodes,
            hasher: AtomicPtr::new(Arc::into_raw(hasher) as *mut MaglevHasher),
            previous: Mutex::new(None),
            write_guard: Mutex::new(()),
            strategy,
            global_stats,
            banned_cnt: AtomicU32::new(0),
        }
    }

    fn current_hasher(&self) -> Arc<MaglevHasher> {
        let ptr = self.hasher.load(Ordering::Acquire);
        // Safety: `ptr` always originates from `Arc::into_raw` below, and the
        // writer keeps the pointee alive for one generation past any swap.
        unsafe {
            Arc::increment_strong_count(ptr);
            Arc::from_raw(ptr)
        }
    }

    /// Rebuild the slot table from the current node manager and hot-swap it
    /// in. Serializes against other writers; never blocks `pick`.
    pub fn build(&self, slot_size: usize) {
        let _guard = self.write_guard.lock();
        let new_hasher = Arc::new(MaglevHasher::build(&self.nodes, slot_size));
        self.swap_hasher(new_hasher);
    }

    fn swap_hasher(&self, new_hasher: Arc<MaglevHasher>) {
        let new_ptr = Arc::into_raw(new_hasher) as *mut MaglevHasher;
        let old_ptr = self.hasher.swap(new_ptr, Ordering::AcqRel);
        let old_arc = unsafe { Arc::from_raw(old_ptr) };
        // Retain the just-replaced generation for one more swap before it's
        // actually dropped, giving in-flight readers time to finish.
        let mut previous = self.previous.lock();
        *previous = Some(old_arc);
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node_by_id(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.index_of(id).and_then(|i| self.nodes.get(i))
    }

    pub fn global_stats(&self) -> &NodeStats {
        &self.global_stats
    }

    pub fn banned_count(&self) -> u32 {
        self.banned_cnt.load(Ordering::Relaxed)
    }

    pub fn heartbeat_count(&self) -> u64 {
        self.global_stats.heartbeat_cnt()
    }

    /// Record load (and, for server-stats clusters, a full request outcome)
    /// against both the node and the fleet-wide mirror the balance
    /// predicates compare against.
    pub fn record_load(&self, node_idx: usize, delta: u64) -> crate::common::Result<()> {
        let Some(n) = self.nodes.get(node_idx) else {
            return Err(crate::common::Error::invalid_node(node_idx));
        };
        if let Some(stats) = &n.stats {
            stats.incr_load(delta * n.load_unit() as u64);
        }
        self.global_stats.incr_load(delta);
        Ok(())
    }

    pub fn record_server_load(
        &self,
        node_idx: usize,
        latency: u64,
        is_error: bool,
        is_fatal: bool,
    ) -> crate::common::Result<()> {
        let Some(n) = self.nodes.get(node_idx) else {
            return Err(crate::common::Error::invalid_node(node_idx));
        };
        if let Some(NodeStats::Server(s)) = &n.stats {
            s.incr_server_load(latency, is_error, is_fatal);
        }
        if let NodeStats::Server(g) = &self.global_stats {
            g.incr_server_load(latency, is_error, is_fatal);
        }
        Ok(())
    }

    /// Apply the balance/ban policy on top of the raw consistent-hash pick.
    pub fn pick(&self, hashed_key: u64) -> Option<PickResult<'_>> {
        self.pick_at(hashed_key, current_unix_time())
    }

    /// Same as [`Self::pick`] with an explicit wall-clock reading, so ban
    /// recovery timing can be driven deterministically in tests.
    pub fn pick_at(&self, hashed_key: u64, now: u64) -> Option<PickResult<'_>> {
        let hasher = self.current_hasher();
        let n = self.nodes.len();
        if n == 0 {
            return None;
        }

        let mut consistent_node_idx = None;
        let mut final_idx = None;
        for try_cnt in 0..n as u64 {
            let slot_idx = rehash(hashed_key, try_cnt, hasher.slot_table_size() as u64);
            let node_idx = hasher.slots().get_by_key(slot_idx);
            if node_idx < 0 {
                continue;
            }
            let node_idx = node_idx as usize;
            if try_cnt == 0 {
                consistent_node_idx = Some(node_idx);
            }

            let node = self.nodes.get(node_idx)?;
            if let Some(stats) = &node.stats {
                if self.strategy.should_balance(stats, &self.global_stats, n) {
                    continue;
                }
                if self.strategy.should_ban(stats, n, now) {
                    continue;
                }
            }
            final_idx = Some(node_idx);
            break;
        }

        let final_idx = final_idx.or(consistent_node_idx)?;
        let consistent_idx = consistent_node_idx.unwrap_or(final_idx);
        Some(PickResult {
            node_idx: final_idx,
            node: self.nodes.get(final_idx)?,
            is_consistent: final_idx == consistent_idx,
            consistent_node_idx: consistent_idx,
            consistent_node: self.nodes.get(consistent_idx)?,
        })
    }

    /// `pick_direct` with no balance/ban policy applied: O(1), no mutation.
    pub fn pick_direct(&self, hashed_key: u64) -> Option<(usize, &Node)> {
        let hasher = self.current_hasher();
        let (idx, _) = hasher.pick_direct(&self.nodes, hashed_key)?;
        self.nodes.get(idx).map(|n| (idx, n))
    }

    /// Rank update, ban pass, then window advance for every node and the
    /// global mirror (§4.7's fixed order).
    pub fn heartbeat(&self) {
        self.heartbeat_at(current_unix_time());
    }

    /// Same as [`Self::heartbeat`] with an explicit wall-clock reading.
    pub fn heartbeat_at(&self, now: u64) {
        let _guard = self.write_guard.lock();
        self.update_ranks();
        let banned = self.ban_pass(now);
        self.banned_cnt.store(banned, Ordering::Relaxed);

        for node in self.nodes.iter() {
            if let Some(stats) = &node.stats {
                stats.heartbeat();
            }
        }
        self.global_stats.heartbeat();
        debug!(banned_cnt = banned, "balancer heartbeat complete");
    }

    fn update_ranks(&self) {
        let mut by_load: Vec<&Node> = self.nodes.iter().filter(|n| n.stats.is_some()).collect();
        by_load.sort_by_key(|n| std::cmp::Reverse(n.stats.as_ref().unwrap().load_sum()));
        for (i, n) in by_load.iter().enumerate() {
            n.stats.as_ref().unwrap().set_load_rank((i + 1) as u32);
        }

        let mut servers: Vec<&crate::stats::ServerLoadStats> = self
            .nodes
            .iter()
            .filter_map(|n| n.stats.as_ref().and_then(|s| s.as_server()))
            .collect();
        if servers.is_empty() {
            return;
        }

        servers.sort_by_key(|s| std::cmp::Reverse(s.query_sum()));
        for (i, s) in servers.iter().enumerate() {
            s.set_query_rank((i + 1) as u32);
        }
        servers.sort_by(|a, b| b.error_rate().partial_cmp(&a.error_rate()).unwrap());
        for (i, s) in servers.iter().enumerate() {
            s.set_error_rank((i + 1) as u32);
        }
        servers.sort_by(|a, b| b.fatal_rate().partial_cmp(&a.fatal_rate()).unwrap());
        for (i, s) in servers.iter().enumerate() {
            s.set_fatal_rank((i + 1) as u32);
        }
        servers.sort_by(|a, b| b.latency_avg().partial_cmp(&a.latency_avg()).unwrap());
        for (i, s) in servers.iter().enumerate() {
            s.set_latency_rank((i + 1) as u32);
        }
    }

    fn ban_pass(&self, now: u64) -> u32 {
        let mut banned = 0u32;
        for node in self.nodes.iter() {
            let Some(s) = node.stats.as_ref().and_then(|s| s.as_server()) else {
                continue;
            };
            if self.strategy.should_ban_by_delay_recover(s, now) {
                banned += 1;
            } else if self.strategy.should_ban_by_fatal(s) {
                s.mark_banned(now);
                banned += 1;
            } else if s.is_clean_bi_tick() {
                s.clear_ban_streak();
            }
        }
        banned
    }
}

impl Drop for Balancer {
    fn drop(&mut self) {
        let ptr = self.hasher.load(Ordering::Acquire);
        unsafe {
            drop(Arc::from_raw(ptr));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeId;
    use crate::stats::ServerLoadStats;

    fn balancer_with_server_stats(n: usize, window: usize) -> Balancer {
        let mut nodes = NodeManager::new();
        for i in 0..n {
            nodes
                .push(Node::new(NodeId::Int(i as u64), None).with_stats(NodeStats::Server(ServerLoadStats::new_unweighted(window))))
                .unwrap();
        }
        nodes.ready_go();
        Balancer::new(nodes, 1009, BalanceStrategy::default(), true, window)
    }

    #[test]
    fn pick_is_consistent_by_default() {
        let b = balancer_with_server_stats(5, 8);
        for key in 0..50u64 {
            let r = b.pick(key).unwrap();
            assert!(r.is_consistent);
            assert_eq!(r.node_idx, r.consistent_node_idx);
        }
    }

    #[test]
    fn record_load_rejects_out_of_range_index() {
        let b = balancer_with_server_stats(3, 8);
        let err = b.record_load(3, 10).unwrap_err();
        assert!(matches!(err, crate::common::Error::InvalidNode(3)));
        // The fleet-wide mirror must not be touched on a rejected record.
        assert_eq!(b.global_stats().load_sum(), 0);
    }

    #[test]
    fn record_server_load_rejects_out_of_range_index() {
        let b = balancer_with_server_stats(3, 8);
        let err = b.record_server_load(99, 10, false, true).unwrap_err();
        assert!(matches!(err, crate::common::Error::InvalidNode(99)));
        let g = b.global_stats().as_server().unwrap();
        assert_eq!(g.query_now(), 0);
        assert_eq!(g.fatal_now(), 0);
    }

    #[test]
    fn pick_direct_matches_raw_hasher() {
        let b = balancer_with_server_stats(5, 8);
        let (idx_a, _) = b.pick_direct(42).unwrap();
        let (idx_b, _) = b.pick_direct(42).unwrap();
        assert_eq!(idx_a, idx_b);
    }

    #[test]
    fn heartbeat_assigns_ranks() {
        let b = balancer_with_server_stats(3, 8);
        b.record_server_load(0, 10, false, false).unwrap();
        b.record_server_load(1, 10, false, false).unwrap();
        b.record_server_load(1, 10, false, false).unwrap();
        // Rank reflects the completed-window sum, so it lags one tick behind
        // the recording: the first heartbeat rolls "now" into "sum", the
        // second computes ranks from it.
        b.heartbeat();
        b.heartbeat();
        let n1 = b.node_by_id(&NodeId::Int(1)).unwrap();
        let n0 = b.node_by_id(&NodeId::Int(0)).unwrap();
        let rank1 = n1.stats.as_ref().unwrap().as_server().unwrap().query_rank();
        let rank0 = n0.stats.as_ref().unwrap().as_server().unwrap().query_rank();
        assert!(rank1 < rank0); // node 1 has more queries, ranks better (1 = best)
    }

    #[test]
    fn ban_then_recover_diverts_and_returns() {
        let mut nodes = NodeManager::new();
        for i in 0..3u64 {
            nodes
                .push(Node::new(NodeId::Int(i), None).with_stats(NodeStats::Server(ServerLoadStats::new_unweighted(8))))
                .unwrap();
        }
        nodes.ready_go();
        let strategy = BalanceStrategy {
            min_query_to_ban: 0,
            ..BalanceStrategy::default()
        };
        let b = Balancer::new(nodes, 1009, strategy, true, 8);

        let key = 0u64;
        let t0 = 1_000_000u64;
        let idx = b.pick_at(key, t0).unwrap().node_idx;

        // Two ticks of a pure-fatal stream for `idx` trips should_ban_by_fatal
        // at the second heartbeat (fatal rate must hold for both the current
        // and the just-completed point).
        for _ in 0..2 {
            b.record_server_load(idx, 1, false, true).unwrap();
            for i in 0..3usize {
                if i != idx {
                    b.record_server_load(i, 1, false, false).unwrap();
                }
            }
            b.heartbeat_at(t0);
        }

        let after_ban = b.pick_at(key, t0).unwrap();
        assert_ne!(after_ban.node_idx, idx);

        let n = b.node_by_id(&NodeId::Int(idx as u64)).unwrap();
        let s = n.stats.as_ref().unwrap().as_server().unwrap();
        assert_eq!(s.consecutive_ban_cnt(), 1);
        assert_eq!(s.last_ban_time(), t0);

        // Base recovery delay is 5s << 1 = 10s. Two clean ticks after that
        // delay elapses clear the streak (a clean bi-tick needs both the
        // current and the previous point free of fatal traffic).
        let t1 = t0 + 11;
        for i in 0..3usize {
            b.record_server_load(i, 1, false, false).unwrap();
        }
        b.heartbeat_at(t1);
        for i in 0..3usize {
            b.record_server_load(i, 1, false, false).unwrap();
        }
        b.heartbeat_at(t1 + 1);

        assert_eq!(s.consecutive_ban_cnt(), 0);
        let recovered = b.pick_at(key, t1 + 1).unwrap();
        assert_eq!(recovered.node_idx, idx);
        assert!(recovered.is_consistent);
    }

    #[test]
    fn build_swaps_hasher_without_blocking_pick() {
        let b = balancer_with_server_stats(5, 8);
        let before = b.pick(1).unwrap().node_idx;
        b.build(1009);
        let after = b.pick(1).unwrap().node_idx;
        assert_eq!(before, after); // same nodes, same slot size -> same table
    }
}
