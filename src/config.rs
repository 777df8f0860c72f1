//! Declarative cluster configuration: sliding-window size, the balance
//! strategy's tunables, rate-limit cap, and the node list, loadable from
//! YAML or JSON.

use crate::balance::BalanceStrategy;
use crate::common::Result;
use crate::node::NodeSpec;
use serde::{Deserialize, Serialize};

fn default_window_size() -> usize {
    16
}

/// Whether nodes carry only a load figure, or full query/error/fatal/latency
/// server stats with the ban policy attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StatsMode {
    /// No stats at all — pure consistent hashing, no balance/ban policy.
    None,
    /// One load figure per node (`should_balance` only, never bans).
    LoadOnly,
    /// Full server stats (`should_balance` and `should_ban`).
    #[default]
    Server,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalancerConfig {
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Caps `limited_max_weight` as `max_avg_rate_limit * avg_weight`; unset
    /// means no cap (`limited_max_weight == max_weight`).
    #[serde(default)]
    pub max_avg_rate_limit: Option<f64>,

    #[serde(default)]
    pub stats_mode: StatsMode,

    #[serde(default)]
    pub strategy: BalanceStrategy,

    pub nodes: Vec<NodeSpec>,
}

impl BalancerConfig {
    pub fn from_yaml(s: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(s)?)
    }

    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}
