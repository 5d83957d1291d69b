//! Egress selection strategies.
//!
//! A strategy picks the subset of a FIB entry's next hops that an Interest
//! is actually sent on. Multicast fans out to every candidate; BestPath
//! keeps a smoothed round-trip estimate per next hop and sends one copy to
//! the current best. Neither ever selects the arrival connection.

use crate::fib::FibEntry;
use rust_ccnf_common::types::ConnId;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Starting estimate for a next hop that has never answered; low enough
/// that fresh hops get probed ahead of known-slow ones.
pub const INITIAL_SRTT_TICKS: u64 = 50;
/// Ceiling applied when timeouts keep doubling an estimate.
pub const MAX_SRTT_TICKS: u64 = 6_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategyTag {
    #[default]
    Multicast,
    BestPath,
}

impl fmt::Display for StrategyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Multicast => f.write_str("multicast"),
            Self::BestPath => f.write_str("best-path"),
        }
    }
}

impl FromStr for StrategyTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "multicast" => Ok(Self::Multicast),
            "best-path" => Ok(Self::BestPath),
            other => Err(format!("unknown strategy '{other}'")),
        }
    }
}

/// Smoothed round-trip state for one (prefix, next hop) pair.
#[derive(Debug, Clone, Copy)]
pub struct RttEstimate {
    srtt_ticks: u64,
}

impl RttEstimate {
    pub fn srtt_ticks(&self) -> u64 {
        self.srtt_ticks
    }
}

impl Default for RttEstimate {
    fn default() -> Self {
        Self {
            srtt_ticks: INITIAL_SRTT_TICKS,
        }
    }
}

/// Picks the egress set for `entry`, never including `ingress`.
pub fn choose(entry: &FibEntry, ingress: ConnId) -> Vec<ConnId> {
    let candidates = entry.next_hops().iter().filter(|h| h.conn != ingress);
    match entry.strategy() {
        StrategyTag::Multicast => candidates.map(|h| h.conn).collect(),
        StrategyTag::BestPath => {
            // Ties break on ascending connection id for determinism.
            candidates
                .min_by_key(|h| (estimate(entry.rtt_state(), h.conn), h.conn))
                .map(|h| vec![h.conn])
                .unwrap_or_default()
        }
    }
}

fn estimate(rtt: &HashMap<ConnId, RttEstimate>, conn: ConnId) -> u64 {
    rtt.get(&conn).copied().unwrap_or_default().srtt_ticks
}

/// Folds a measured round trip into the estimate for `egress`.
pub fn on_satisfied(entry: &mut FibEntry, egress: ConnId, rtt_ticks: u64) {
    let state = entry.rtt_state_mut().entry(egress).or_default();
    state.srtt_ticks = state.srtt_ticks - state.srtt_ticks / 8 + rtt_ticks / 8;
}

/// Penalizes `egress` after a pending Interest expired unanswered.
pub fn on_timeout(entry: &mut FibEntry, egress: ConnId) {
    let state = entry.rtt_state_mut().entry(egress).or_default();
    state.srtt_ticks = (state.srtt_ticks * 2).min(MAX_SRTT_TICKS);
}
