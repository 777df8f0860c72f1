//! maglev-balance - client-side consistent-hashing load balancer
//!
//! Weighted Maglev slot-table construction, a sliding-window stats layer,
//! and a balance/ban policy engine sit directly on top of the hasher so that
//! a pick never has to leave the calling process or make a network call.
//!
//! # Architecture
//!
//! ```text
//! +----------------+      +--------------+      +----------------+
//! |  perm (perm.rs)|      | slot (slot.rs)|     | hashutil.rs    |
//! +-------+--------+      +------+-------+      +--------+-------+
//!         |                      |                        |
//!         +----------+-----------+------------------------+
//!                    |
//!             +------v-------+
//!             |  hasher.rs   |   (build + pick_direct)
//!             +------+-------+
//!                    |
//!      +-------------+--------------+
//!      |                            |
//! +----v-----+               +------v------+
//! | node.rs  |               | stats/      |   (cycle, window, load)
//! +----+-----+               +------+------+
//!      |                            |
//!      +-------------+--------------+
//!                    |
//!             +------v-------+      +--------------+
//!             | balancer.rs  +------+ balance.rs   |  (policy + rehash)
//!             +--------------+      +--------------+
//! ```
//!
//! `config.rs` loads a [`config::BalancerConfig`] from YAML/JSON into the
//! pieces above; `common::error` and `common::rng` are shared plumbing.

pub mod balance;
pub mod balancer;
pub mod common;
pub mod config;
pub mod hasher;
pub mod hashutil;
pub mod node;
pub mod perm;
pub mod slot;
pub mod stats;

pub use balance::BalanceStrategy;
pub use balancer::{Balancer, PickResult};
pub use common::error::{Error, Result};
pub use config::BalancerConfig;
pub use hasher::MaglevHasher;
pub use node::{Node, NodeId, NodeManager, NodeSpec};
pub use stats::{LoadStats, NodeStats, ServerLoadStats};

use config::StatsMode;
use tracing::info;

/// Build a ready-to-use [`Balancer`] from a loaded configuration.
pub fn balancer_from_config(cfg: &BalancerConfig, slot_size: usize) -> Result<Balancer> {
    let mut nodes = NodeManager::new();
    if let Some(limit) = cfg.max_avg_rate_limit {
        nodes = nodes.with_max_avg_rate_limit(limit);
    }

    let weighted = !cfg.nodes.is_empty() && cfg.nodes.iter().all(|n| n.weight.is_some());

    for spec in &cfg.nodes {
        let id = NodeId::from(spec.id.clone());
        let mut node = Node::new(id, spec.weight);
        if weighted {
            node = node.with_slot_counting();
        }
        node = match cfg.stats_mode {
            StatsMode::None => node,
            StatsMode::LoadOnly => node.with_stats(NodeStats::Load(LoadStats::new(cfg.window_size))),
            StatsMode::Server => {
                let stats = if weighted {
                    ServerLoadStats::new(cfg.window_size)
                } else {
                    ServerLoadStats::new_unweighted(cfg.window_size)
                };
                node.with_stats(NodeStats::Server(stats))
            }
        };
        nodes.push(node)?;
    }
    nodes.ready_go();
    if weighted && cfg.stats_mode == StatsMode::Server {
        nodes.init_load_units(1.0);
    }

    info!(
        node_count = nodes.len(),
        slot_size, weighted, "balancer initialized from configuration"
    );

    Ok(Balancer::new(
        nodes,
        slot_size,
        cfg.strategy.clone(),
        cfg.stats_mode == StatsMode::Server,
        cfg.window_size,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_balancer_end_to_end_from_yaml() {
        let yaml = r#"
window_size: 8
nodes:
  - id: 1
    weight: 10
  - id: 2
    weight: 20
  - id: 3
    weight: 30
"#;
        let cfg = BalancerConfig::from_yaml(yaml).unwrap();
        let balancer = balancer_from_config(&cfg, 1009).unwrap();
        assert_eq!(balancer.node_count(), 3);
        let r = balancer.pick(1234).unwrap();
        assert!(r.is_consistent);
    }

    #[test]
    fn unweighted_config_skips_slot_counting() {
        let yaml = r#"
nodes:
  - id: "a"
  - id: "b"
"#;
        let cfg = BalancerConfig::from_yaml(yaml).unwrap();
        let balancer = balancer_from_config(&cfg, 1009).unwrap();
        assert_eq!(balancer.node_count(), 2);
    }
}
