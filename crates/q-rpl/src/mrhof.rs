// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Minimum Rank with Hysteresis Objective Function
//!
//! RFC 6719 with the Wi-SUN FAN profile rules layered on top:
//!
//! - path cost through a neighbor is `ETX + advertised rank`, or
//!   MAX_PATH_COST while the link metric is unknown;
//! - admission requires a defined ETX (otherwise active probing is
//!   requested), bidirectional signal levels passing a two-threshold
//!   hysteresis, a link metric under MAX_LINK_METRIC, no active penalty,
//!   and a prospective rank under the dynamic rank limit;
//! - a better candidate only displaces the current parent when it wins by
//!   more than PARENT_SWITCH_THRESHOLD.

use q_common::{Eui64, Ticks};
use q_link::NeighborTable;

use crate::candidate::{CandidateSet, RplCandidate, RANK_INFINITE};

/// MRHOF parameters (RFC 6719 §5, scaled for ETX × 128)
#[derive(Debug, Clone, Copy)]
pub struct MrhofConfig {
    /// Links costlier than this are excluded from parent selection
    pub max_link_metric: f32,
    /// Path cost assigned to unusable/unknown paths
    pub max_path_cost: f32,
    /// A candidate must beat the current parent by this margin
    pub parent_switch_threshold: f32,
    /// Radio sensitivity floor, dBm
    pub device_min_sens_dbm: f32,
    /// Candidate admission threshold above the sensitivity floor, dB
    pub cand_parent_threshold_db: f32,
    /// Hysteresis around the admission threshold, dB
    pub cand_parent_hysteresis_db: f32,
}

impl Default for MrhofConfig {
    fn default() -> Self {
        Self {
            max_link_metric: 512.0,          // 128 × 4
            max_path_cost: 32768.0,          // 128 × 256
            parent_switch_threshold: 192.0,  // 128 × 1.5
            device_min_sens_dbm: -93.0,
            cand_parent_threshold_db: 10.0,
            cand_parent_hysteresis_db: 3.0,
        }
    }
}

/// Why a candidate was not admissible (transient, drives retries)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discard {
    /// ETX undefined or above MAX_LINK_METRIC
    Etx,
    /// Signal-level hysteresis not satisfied
    Rsl,
    /// Penalty timer running
    Denied,
    /// Prospective rank above the dynamic limit
    Rank,
}

impl Discard {
    /// Stable name for log lines
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Etx => "etx",
            Self::Rsl => "rsl",
            Self::Denied => "denied",
            Self::Rank => "rank",
        }
    }
}

/// Requests active neighbor probing (neighbor unreachability detection)
pub trait NudProbe {
    /// Generate traffic toward `eui64` so its ETX can be measured
    fn probe(&mut self, eui64: &Eui64);
}

/// Preferred-parent change notifications
pub trait ParentObserver {
    /// The preferred parent changed (`None`: no parent selectable)
    fn on_pref_parent_change(&mut self, parent: Option<&Eui64>);
}

fn etx_of(neighbors: &NeighborTable, eui64: &Eui64) -> f32 {
    neighbors.get(eui64).map_or(f32::NAN, |n| n.etx.etx())
}

/// RFC 6719 §3.1: path cost through a candidate
#[must_use]
pub fn path_cost(cfg: &MrhofConfig, neighbors: &NeighborTable, cand: &RplCandidate) -> f32 {
    let etx = etx_of(neighbors, &cand.eui64);
    // Unknown link metric: MAX_PATH_COST, per the RFC
    if etx.is_nan() {
        return cfg.max_path_cost;
    }
    etx + f32::from(cand.dio_rank)
}

/// RFC 6719 §3.3: rank is the path cost, saturated to the rank range
fn path_rank(cfg: &MrhofConfig, neighbors: &NeighborTable, cand: &RplCandidate) -> u16 {
    // Saturating float-to-int conversion bounds the overflow
    path_cost(cfg, neighbors, cand) as u16
}

/// Wi-SUN FAN §6.2.3.1.6.3: bidirectional signal-level hysteresis
///
/// Admission requires both directions above
/// `DEVICE_MIN_SENS + THRESHOLD + HYSTERESIS`; once valid, candidacy only
/// drops when both fall below `DEVICE_MIN_SENS + THRESHOLD - HYSTERESIS`.
fn rsl_admissible(cfg: &MrhofConfig, neighbors: &NeighborTable, cand: &RplCandidate) -> bool {
    let Some(neigh) = neighbors.get(&cand.eui64) else {
        return false;
    };
    if neigh.rsl_out_dbm.is_nan() || neigh.rsl_in_dbm.is_nan() {
        return false;
    }
    if !cand.rsl_valid {
        let threshold =
            cfg.device_min_sens_dbm + cfg.cand_parent_threshold_db + cfg.cand_parent_hysteresis_db;
        neigh.rsl_in_dbm > threshold && neigh.rsl_out_dbm > threshold
    } else {
        let threshold =
            cfg.device_min_sens_dbm + cfg.cand_parent_threshold_db - cfg.cand_parent_hysteresis_db;
        !(neigh.rsl_in_dbm < threshold && neigh.rsl_out_dbm < threshold)
    }
}

/// Rank this node would take with `cand` as its sole parent
fn rank_through(cfg: &MrhofConfig, neighbors: &NeighborTable, cand: &RplCandidate) -> u16 {
    let min_hop = cand.config.min_hop_rank_inc.max(1);
    let through = path_rank(cfg, neighbors, cand);
    let rounded = min_hop.saturating_mul(cand.dio_rank / min_hop + 1);
    through.max(rounded)
}

/// RFC 6550 §8.2.2.4: highest rank we may take without exceeding
/// `L + DAGMaxRankIncrease`
///
/// With MaxRankIncrease 0 the limit still allows finishing the current
/// DAGRank step, so equal-rank candidates are not all discarded.
#[must_use]
pub fn rank_limit(cands: &CandidateSet, max_rank_inc: u16, min_hop_rank_inc: u16) -> u16 {
    let min_hop = u32::from(min_hop_rank_inc.max(1));
    let bound = u32::from(cands.lowest_advertised_rank().saturating_add(max_rank_inc));
    let max_dag_rank = bound / min_hop;
    let limit = (max_dag_rank + 1) * min_hop;
    if limit >= u32::from(u16::MAX) {
        return RANK_INFINITE;
    }
    (limit - 1) as u16
}

/// Admission test for one candidate
///
/// Updates the candidate's signal-hysteresis state. An undefined ETX also
/// requests a probe toward the neighbor, per the FAN join-state-4 rule that
/// unicast neighbor discovery collects link metrics.
pub fn check_candidate<P: NudProbe>(
    cfg: &MrhofConfig,
    now: Ticks,
    neighbors: &NeighborTable,
    cand: &mut RplCandidate,
    rank_limit: u16,
    probe: &mut P,
) -> Option<Discard> {
    let etx = etx_of(neighbors, &cand.eui64);
    if etx.is_nan() {
        probe.probe(&cand.eui64);
        return Some(Discard::Etx);
    }
    cand.rsl_valid = rsl_admissible(cfg, neighbors, cand);
    if !cand.rsl_valid {
        return Some(Discard::Rsl);
    }
    if etx > cfg.max_link_metric {
        return Some(Discard::Etx);
    }
    if cand.denied(now) {
        return Some(Discard::Denied);
    }
    if rank_through(cfg, neighbors, cand) > rank_limit {
        return Some(Discard::Rank);
    }
    None
}

/// Whether any admissible candidate exists, ignoring the rank limit
///
/// Detects "no suitable parent within the allowed rank range" situations,
/// which escalate differently from a plain parent loss.
pub fn has_candidates<P: NudProbe>(
    cfg: &MrhofConfig,
    now: Ticks,
    neighbors: &NeighborTable,
    cands: &mut CandidateSet,
    probe: &mut P,
) -> bool {
    for cand in cands.iter_mut() {
        if check_candidate(cfg, now, neighbors, cand, RANK_INFINITE, probe).is_none() {
            return true;
        }
    }
    false
}

/// RFC 6719 §3.2.2: parent selection with switch hysteresis
///
/// Returns the preferred parent after selection. The observer fires only
/// when the parent actually changed.
pub fn select_parent<P: NudProbe, O: ParentObserver>(
    cfg: &MrhofConfig,
    now: Ticks,
    neighbors: &NeighborTable,
    cands: &mut CandidateSet,
    probe: &mut P,
    obs: &mut O,
) -> Option<Eui64> {
    let cur = cands.pref_parent_eui64();

    // Refresh the current parent's cost so ETX/rank changes are reflected
    let cur_min_path_cost = match cur.and_then(|eui| cands.get(&eui)) {
        Some(cand) if !cand.denied(now) => path_cost(cfg, neighbors, cand),
        _ => cfg.max_path_cost,
    };

    let limit = match cur.and_then(|eui| cands.get(&eui)) {
        Some(cand) => rank_limit(cands, cand.config.max_rank_inc, cand.config.min_hop_rank_inc),
        None => RANK_INFINITE,
    };

    // Lowest path cost among admissible candidates
    let mut best: Option<Eui64> = None;
    let mut best_cost = cfg.max_path_cost;
    for cand in cands.iter_mut() {
        if check_candidate(cfg, now, neighbors, cand, limit, probe).is_some() {
            continue;
        }
        let cost = path_cost(cfg, neighbors, cand);
        if cost >= best_cost {
            continue;
        }
        best_cost = cost;
        best = Some(cand.eui64);
    }

    // Same parent, still usable: nothing to do
    if best == cur && cur_min_path_cost < cfg.max_path_cost {
        return cur;
    }

    // Hysteresis: a candidate that does not beat the current parent by
    // PARENT_SWITCH_THRESHOLD does not displace it
    if cur_min_path_cost < cfg.max_path_cost
        && best_cost < cfg.max_path_cost
        && best_cost + cfg.parent_switch_threshold > cur_min_path_cost
    {
        return cur;
    }

    if let Some(eui) = cur {
        if let Some(cand) = cands.get_mut(&eui) {
            cand.is_parent = false;
        }
    }
    if let Some(eui) = best {
        if let Some(cand) = cands.get_mut(&eui) {
            cand.is_parent = true;
        }
    }
    if best != cur {
        obs.on_pref_parent_change(best.as_ref());
    }
    best
}

/// RFC 6719 §3.3: this node's rank, the maximum of three quantities over
/// the parent set
#[must_use]
pub fn rank(cfg: &MrhofConfig, neighbors: &NeighborTable, cands: &CandidateSet) -> u16 {
    let Some(parent) = cands.pref_parent() else {
        return RANK_INFINITE;
    };

    // 1. The rank of the path through the preferred parent
    let mut rank = path_rank(cfg, neighbors, parent);

    let min_hop = parent.config.min_hop_rank_inc.max(1);
    let max_rank_inc = parent.config.max_rank_inc;

    // 2. The highest advertised rank in the parent set, rounded up to the
    //    next integral rank
    let mut worst_advertised = 0u16;
    for cand in cands.iter().filter(|c| c.is_parent) {
        worst_advertised = worst_advertised.max(cand.dio_rank);
    }
    rank = rank.max(min_hop.saturating_mul(worst_advertised / min_hop + 1));

    // 3. The largest path rank through the parent set, minus MaxRankIncrease
    let mut worst_path = 0u16;
    for cand in cands.iter().filter(|c| c.is_parent) {
        worst_path = worst_path.max(path_rank(cfg, neighbors, cand));
    }
    rank.max(worst_path.saturating_sub(max_rank_inc))
}
