//! Balance and ban policy: when a pick should be diverted away from the
//! consistent-hash result, and when a node should be treated as unavailable.

use crate::stats::NodeStats;
use serde::{Deserialize, Serialize};

/// Tunable thresholds for the balance/ban predicates. Defaults mirror the
/// reference implementation's `default_balance_strategy`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BalanceStrategy {
    pub eps_of_load_to_balance: f64,
    pub min_heartbeat_cnt_to_balance: u64,
    pub min_load_to_balance: u64,

    pub min_query_to_balance: u64,
    pub min_error_rate_to_balance: f64,
    pub min_avg_latency_to_balance: f64,
    pub eps_of_latency_to_balance: f64,
    pub max_pct_of_balance_by_latency: f64,
    pub min_error_rate_to_balance_by_latency: f64,
    pub latency_th_to_force_balance: f64,

    pub max_pct_of_balance_by_error: f64,
    pub min_error_rate_to_balance_by_error: f64,

    pub max_fatal_rank_to_ban: u32,
    pub max_pct_of_ban_by_fatal: f64,
    pub min_query_to_ban: u64,
    pub min_fatal_ratio_to_ban: f64,

    pub recover_delay_s: u64,
    pub max_recover_delay_s: u64,
}

impl Default for BalanceStrategy {
    fn default() -> Self {
        Self {
            eps_of_load_to_balance: 1.2,
            min_heartbeat_cnt_to_balance: 5,
            min_load_to_balance: 10,

            min_query_to_balance: 10,
            min_error_rate_to_balance: 0.0,
            min_avg_latency_to_balance: 0.0,
            eps_of_latency_to_balance: 1.5,
            max_pct_of_balance_by_latency: 0.03,
            min_error_rate_to_balance_by_latency: 0.01,
            latency_th_to_force_balance: f64::INFINITY,

            max_pct_of_balance_by_error: 0.03,
            min_error_rate_to_balance_by_error: 0.5,

            max_fatal_rank_to_ban: 3,
            max_pct_of_ban_by_fatal: 0.03,
            min_query_to_ban: 10,
            min_fatal_ratio_to_ban: 0.9,

            recover_delay_s: 5,
            max_recover_delay_s: 600,
        }
    }
}

impl BalanceStrategy {
    pub fn should_balance(&self, node: &NodeStats, global: &NodeStats, node_size: usize) -> bool {
        if global.heartbeat_cnt() <= self.min_heartbeat_cnt_to_balance {
            return false;
        }
        if node.load_now() <= self.min_load_to_balance {
            return false;
        }

        if let (Some(n), Some(g)) = (node.as_server(), global.as_server()) {
            if n.query_now() <= self.min_query_to_balance {
                return false;
            }
            if n.error_rate() <= self.min_error_rate_to_balance {
                return false;
            }
            if n.latency_avg() <= self.min_avg_latency_to_balance {
                return false;
            }

            if self.load_spike(node, global, node_size) {
                return true;
            }

            if n.error_rate() > self.min_error_rate_to_balance_by_latency
                && n.latency_rank() as f64 <= (node_size as f64 * self.max_pct_of_balance_by_latency).ceil()
            {
                if n.latency_avg() > g.latency_avg() * self.eps_of_latency_to_balance {
                    return true;
                }
                if n.latency_avg() > self.latency_th_to_force_balance {
                    return true;
                }
            }

            if n.error_sum() > 0
                && n.error_rate() > self.min_error_rate_to_balance_by_error
                && n.error_rank() as f64 <= (node_size as f64 * self.max_pct_of_balance_by_error).ceil()
            {
                return true;
            }
            return false;
        }

        self.load_spike(node, global, node_size)
    }

    fn load_spike(&self, node: &NodeStats, global: &NodeStats, node_size: usize) -> bool {
        let g_load = global.load_now().max(global.load_last()) as f64;
        (node.load_now() as f64) * (node_size as f64) > g_load * self.eps_of_load_to_balance
    }

    /// Only meaningful for server-stats variants; `false` for load-only ones.
    /// `now` is the caller's wall-clock reading (seconds), threaded through
    /// explicitly so recovery timing is testable without a real clock.
    pub fn should_ban(&self, node: &NodeStats, node_size: usize, now: u64) -> bool {
        let Some(n) = node.as_server() else {
            return false;
        };
        self.should_ban_server(n, node_size, now)
    }

    fn should_ban_server(&self, n: &crate::stats::ServerLoadStats, node_size: usize, now: u64) -> bool {
        if n.fatal_rank() > self.max_fatal_rank_to_ban
            || n.fatal_rank() as f64 > (node_size as f64 * self.max_pct_of_ban_by_fatal).ceil()
            || n.query_now() < self.min_query_to_ban
        {
            return false;
        }
        self.should_ban_by_fatal(n) || self.should_ban_by_delay_recover(n, now)
    }

    pub fn should_ban_by_fatal(&self, n: &crate::stats::ServerLoadStats) -> bool {
        n.fatal_rate_now() > self.min_fatal_ratio_to_ban
            && n.fatal_rate_last() > self.min_fatal_ratio_to_ban
    }

    pub fn should_ban_by_delay_recover(&self, n: &crate::stats::ServerLoadStats, now: u64) -> bool {
        let cnt = n.consecutive_ban_cnt();
        if cnt == 0 {
            return false;
        }
        let delay = (self.recover_delay_s << cnt.min(63)).min(self.max_recover_delay_s);
        now <= n.last_ban_time() + delay
    }
}

/// `(key + (key mod 997 + 1) * try_cnt) mod slot_size`: a deterministic
/// fallback stride that never revisits a slot before covering `slot_size`
/// distinct ones (997 is coprime with any prime slot size > 997).
pub fn rehash(key: u64, try_cnt: u64, slot_size: u64) -> u64 {
    (key + (key % 997 + 1) * try_cnt) % slot_size
}

/// Wall-clock seconds since the epoch, used for ban timestamps.
pub fn current_unix_time() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
