//! Node identity and the node manager: the ordered backing sequence the
//! hasher's slot table indexes into.

use crate::common::{Error, Result};
use crate::hashutil::mix64;
use crate::stats::NodeStats;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

/// A node's identity: either a small integer id or an opaque byte string
/// (e.g. a host:port). Both hash to a permutation seed via [`mix64`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeId {
    Int(u64),
    Bytes(Vec<u8>),
}

impl NodeId {
    /// Seed fed to the permutation generator for this node.
    pub fn id_hash(&self) -> u64 {
        match self {
            NodeId::Int(n) => mix64(*n),
            NodeId::Bytes(b) => mix64(fnv1a64(b)),
        }
    }
}

/// FNV-1a, used only to fold an arbitrary byte string down to a u64 before
/// the SplitMix64 avalanche in [`mix64`] spreads it.
fn fnv1a64(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xCBF2_9CE4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01B3;
    let mut h = OFFSET;
    for &b in bytes {
        h ^= b as u64;
        h = h.wrapping_mul(PRIME);
    }
    h
}

impl From<u64> for NodeId {
    fn from(n: u64) -> Self {
        NodeId::Int(n)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId::Bytes(s.as_bytes().to_vec())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        NodeId::Bytes(s.into_bytes())
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeId::Int(n) => write!(f, "{n}"),
            NodeId::Bytes(b) => match std::str::from_utf8(b) {
                Ok(s) => write!(f, "{s}"),
                Err(_) => write!(f, "{b:02x?}"),
            },
        }
    }
}

/// A node as given by configuration: identity plus an optional weight
/// (`None`/absent means "unweighted cluster").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: NodeIdSpec,
    #[serde(default)]
    pub weight: Option<u32>,
}

/// Serializable form of [`NodeId`]: a YAML/JSON node `id` is either a
/// string or an integer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeIdSpec {
    Int(u64),
    Text(String),
}

impl From<NodeIdSpec> for NodeId {
    fn from(spec: NodeIdSpec) -> Self {
        match spec {
            NodeIdSpec::Int(n) => NodeId::Int(n),
            NodeIdSpec::Text(s) => NodeId::from(s),
        }
    }
}

/// A single backend, as tracked by the node manager.
///
/// Flat replacement for the reference implementation's mixin ladder
/// (`ban_wrapper<server_load_stats_wrapper<load_stats<node>>>`): every
/// optional feature (weight, slot counting, stats) is an `Option` field
/// rather than a layer of wrapper types.
#[derive(Debug)]
pub struct Node {
    pub id: NodeId,
    pub weight: Option<u32>,
    slot_cnt: Option<AtomicU32>,
    /// Per-node load unit, derived from `init_load_units` when enabled.
    load_unit: Option<u32>,
    pub stats: Option<NodeStats>,
}

impl Node {
    pub fn new(id: NodeId, weight: Option<u32>) -> Self {
        Self {
            id,
            weight,
            slot_cnt: None,
            load_unit: None,
            stats: None,
        }
    }

    pub fn with_slot_counting(mut self) -> Self {
        self.slot_cnt = Some(AtomicU32::new(0));
        self
    }

    pub fn with_stats(mut self, stats: NodeStats) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn id_hash(&self) -> u64 {
        self.id.id_hash()
    }

    pub fn slot_cnt(&self) -> u32 {
        self.slot_cnt
            .as_ref()
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn incr_slot_cnt(&self) {
        if let Some(c) = &self.slot_cnt {
            c.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn reset_slot_cnt(&self) {
        if let Some(c) = &self.slot_cnt {
            c.store(0, Ordering::Relaxed);
        }
    }

    pub fn load_unit(&self) -> u32 {
        self.load_unit.unwrap_or(1)
    }

    pub fn set_load_unit(&mut self, unit: u32) {
        self.load_unit = Some(unit);
    }
}

/// Ordered sequence of nodes plus cached weight aggregates. Ordering (by id)
/// is fixed once [`NodeManager::ready_go`] is called, so rank ties and
/// external iteration stay stable.
#[derive(Debug)]
pub struct NodeManager {
    nodes: Vec<Node>,
    index_of: HashMap<NodeId, usize>,
    ready: bool,
    max_weight: u32,
    weight_sum: u64,
    avg_weight: f64,
    max_avg_rate_limit: Option<f64>,
}

impl NodeManager {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            index_of: HashMap::new(),
            ready: false,
            max_weight: 0,
            weight_sum: 0,
            avg_weight: 0.0,
            max_avg_rate_limit: None,
        }
    }

    pub fn with_max_avg_rate_limit(mut self, limit: f64) -> Self {
        self.max_avg_rate_limit = Some(limit);
        self
    }

    /// Insert a node. Must be called before [`Self::ready_go`].
    pub fn push(&mut self, node: Node) -> Result<()> {
        if self.ready {
            return Err(Error::precondition(
                "cannot add nodes after ready_go() has been called",
            ));
        }
        if self.index_of.contains_key(&node.id) {
            return Err(Error::config(format!("duplicate node id {}", node.id)));
        }
        self.index_of.insert(node.id.clone(), self.nodes.len());
        self.nodes.push(node);
        Ok(())
    }

    /// Freeze the node sequence (sorted by id for deterministic rank ties)
    /// and compute cached weight aggregates.
    pub fn ready_go(&mut self) {
        self.nodes.sort_by_key(|a| node_id_key(&a.id));
        for (idx, n) in self.nodes.iter().enumerate() {
            self.index_of.insert(n.id.clone(), idx);
        }

        self.max_weight = self.nodes.iter().filter_map(|n| n.weight).max().unwrap_or(0);
        self.weight_sum = self.nodes.iter().filter_map(|n| n.weight).map(u64::from).sum();
        let weighted_cnt = self.nodes.iter().filter(|n| n.weight.is_some()).count();
        self.avg_weight = if weighted_cnt > 0 {
            self.weight_sum as f64 / weighted_cnt as f64
        } else {
            0.0
        };
        self.ready = true;
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Node> {
        self.nodes.get(idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn index_of(&self, id: &NodeId) -> Option<usize> {
        self.index_of.get(id).copied()
    }

    pub fn max_weight(&self) -> u32 {
        self.max_weight
    }

    pub fn weight_sum(&self) -> u64 {
        self.weight_sum
    }

    pub fn avg_weight(&self) -> f64 {
        self.avg_weight
    }

    /// `min(max_weight, floor(max_avg_rate_limit * avg_weight))` when a cap
    /// is configured, else `max_weight`.
    pub fn limited_max_weight(&self) -> u32 {
        match self.max_avg_rate_limit {
            Some(limit) => {
                let capped = (limit * self.avg_weight).floor() as u32;
                self.max_weight.min(capped.max(1))
            }
            None => self.max_weight,
        }
    }

    /// Derive a per-node load unit `floor(factor * avg_weight / weight)` so
    /// that one recorded unit of load contributes inversely to a node's
    /// nominal capacity. No-op for nodes without a weight.
    pub fn init_load_units(&mut self, factor: f64) {
        let avg_weight = self.avg_weight;
        for n in &mut self.nodes {
            if let Some(w) = n.weight {
                if w > 0 {
                    let unit = (factor * avg_weight / w as f64).floor().max(1.0) as u32;
                    n.set_load_unit(unit);
                }
            }
        }
    }
}

impl Default for NodeManager {
    fn default() -> Self {
        Self::new()
    }
}

fn node_id_key(id: &NodeId) -> (u8, u64, Vec<u8>) {
    match id {
        NodeId::Int(n) => (0, *n, Vec::new()),
        NodeId::Bytes(b) => (1, 0, b.clone()),
    }
}
