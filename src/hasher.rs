//! Maglev hasher: builds a slot table from a node manager and serves O(1)
//! direct lookups.

use crate::node::{Node, NodeManager};
use crate::perm::WeightedPermutationGenerator;
use crate::slot::SlotArray;
use tracing::warn;

/// An immutable, fully-built slot table paired with accessors into the node
/// manager it was built from.
#[derive(Debug)]
pub struct MaglevHasher {
    slots: SlotArray,
}

impl MaglevHasher {
    /// Build a slot table of size `m` (must be prime) for the given,
    /// `ready_go()`-frozen node manager.
    pub fn build(nodes: &NodeManager, m: usize) -> Self {
        let mut slots = SlotArray::new(m);
        if nodes.is_empty() {
            return Self { slots };
        }

        for n in nodes.iter() {
            n.reset_slot_cnt();
        }

        let weighted = nodes.iter().all(|n| n.weight.is_some());
        let zero_weight_cluster = weighted && nodes.weight_sum() == 0;
        if zero_weight_cluster {
            warn!("all node weights are zero; falling back to unweighted slot allocation");
        }
        let use_weights = weighted && !zero_weight_cluster;

        let mut perms: Vec<WeightedPermutationGenerator> = nodes
            .iter()
            .map(|n| WeightedPermutationGenerator::new(m as u64, n.id_hash()))
            .collect();

        let limited_max = nodes.limited_max_weight().max(1) as f64;
        let n_count = nodes.len();
        let mut distributed = 0usize;
        let mut round_robin = 0usize;

        // Bound total rounds generously: each node gets at most `m` accepted
        // draws before the table is full, so `n_count * m` rounds is a safe
        // cap even under adversarial rejection rates.
        let max_rounds = n_count.saturating_mul(m).saturating_mul(4).max(1);
        let mut rounds = 0usize;

        while distributed < m && rounds < max_rounds {
            let i = round_robin % n_count;
            round_robin += 1;
            rounds += 1;

            let node = nodes.get(i).expect("index within node manager bounds");
            let accept = if use_weights {
                let w = node.weight.unwrap_or(0);
                if w == 0 {
                    perms[i].draw(); // keep the stream advancing uniformly
                    false
                } else {
                    perms[i].draw() <= (w as f64 / limited_max)
                }
            } else {
                true
            };

            if !accept {
                continue;
            }

            let t = loop {
                let candidate = perms[i].next() as usize;
                if !slots.is_distributed(candidate) {
                    break candidate;
                }
            };
            slots.set(t, i);
            node.incr_slot_cnt();
            distributed += 1;
        }

        Self { slots }
    }

    /// O(1) lookup by raw hashed key, with no balance/ban policy applied.
    pub fn pick_direct<'a>(&self, nodes: &'a NodeManager, hashed_key: u64) -> Option<(usize, &'a Node)> {
        let idx = self.slots.get_by_key(hashed_key);
        if idx < 0 {
            return None;
        }
        let idx = idx as usize;
        nodes.get(idx).map(|n| (idx, n))
    }

    pub fn slot_table_size(&self) -> usize {
        self.slots.size()
    }

    pub fn slots(&self) -> &SlotArray {
        &self.slots
    }
}
