// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Candidate parent set
//!
//! One entry per neighbor that has advertised a DIO, keyed by EUI-64 and
//! owned here; the link-layer neighbor table is consulted by EUI-64 for
//! ETX and signal levels, never owned.

use heapless::Vec;

use q_common::{Error, Eui64, Result, Ticks, Timer};

/// Candidate set capacity
pub const MAX_CANDIDATES: usize = 32;

/// Rank advertised by a node with no route (also DIO poisoning)
pub const RANK_INFINITE: u16 = 0xFFFF;

/// DODAG configuration advertised by the root
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DodagConfig {
    /// DAGMaxRankIncrease (0: rank movement within the DODAG is pinned)
    pub max_rank_inc: u16,
    /// MinHopRankIncrease
    pub min_hop_rank_inc: u16,
}

impl Default for DodagConfig {
    fn default() -> Self {
        // Wi-SUN FAN profile values
        Self {
            max_rank_inc: 0,
            min_hop_rank_inc: 128,
        }
    }
}

/// Per-neighbor RPL metadata
#[derive(Debug, Clone)]
pub struct RplCandidate {
    /// Link-layer identity (key into the neighbor table)
    pub eui64: Eui64,
    /// Rank advertised in the neighbor's last DIO
    pub dio_rank: u16,
    /// DODAG this neighbor belongs to
    pub dodag_id: [u8; 16],
    /// DODAG configuration the neighbor advertises
    pub config: DodagConfig,
    /// This neighbor is in our parent set
    pub is_parent: bool,
    /// Signal-level hysteresis state: once validated, candidacy survives
    /// until both directions drop below the low threshold
    pub rsl_valid: bool,
    /// Penalty timer; policy and duration are the routing core's business,
    /// this module only honors the deadline
    pub deny_timer: Timer,
    /// The neighbor acknowledged our DAO
    pub dao_ack_received: bool,
}

impl RplCandidate {
    fn new(eui64: Eui64) -> Self {
        Self {
            eui64,
            dio_rank: RANK_INFINITE,
            dodag_id: [0; 16],
            config: DodagConfig::default(),
            is_parent: false,
            rsl_valid: false,
            deny_timer: Timer::new(),
            dao_ack_received: false,
        }
    }

    /// Under penalty at `now`
    #[must_use]
    pub fn denied(&self, now: Ticks) -> bool {
        self.deny_timer.remaining_ms(now) > 0
    }
}

/// Bounded candidate arena keyed by EUI-64
#[derive(Debug, Default)]
pub struct CandidateSet {
    entries: Vec<RplCandidate, MAX_CANDIDATES>,
    lowest_advertised_rank: u16,
}

impl CandidateSet {
    /// Empty set
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            lowest_advertised_rank: RANK_INFINITE,
        }
    }

    /// Look up a candidate
    #[must_use]
    pub fn get(&self, eui64: &Eui64) -> Option<&RplCandidate> {
        self.entries.iter().find(|c| c.eui64 == *eui64)
    }

    /// Look up a candidate for mutation
    pub fn get_mut(&mut self, eui64: &Eui64) -> Option<&mut RplCandidate> {
        self.entries.iter_mut().find(|c| c.eui64 == *eui64)
    }

    /// Look up or create a candidate (first DIO from this neighbor)
    ///
    /// # Errors
    ///
    /// [`Error::TableFull`] when the arena is exhausted.
    pub fn fetch(&mut self, eui64: &Eui64) -> Result<&mut RplCandidate> {
        if let Some(pos) = self.entries.iter().position(|c| c.eui64 == *eui64) {
            return Ok(&mut self.entries[pos]);
        }
        self.entries
            .push(RplCandidate::new(*eui64))
            .map_err(|_| Error::TableFull)?;
        let last = self.entries.len() - 1;
        Ok(&mut self.entries[last])
    }

    /// Remove a candidate (neighbor evicted)
    pub fn remove(&mut self, eui64: &Eui64) {
        self.entries.retain(|c| c.eui64 != *eui64);
    }

    /// Drop every candidate (leaving the DODAG)
    pub fn clear(&mut self) {
        self.entries.clear();
        self.lowest_advertised_rank = RANK_INFINITE;
    }

    /// Number of candidates
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the set is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate candidates
    pub fn iter(&self) -> impl Iterator<Item = &RplCandidate> {
        self.entries.iter()
    }

    /// Iterate candidates mutably
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut RplCandidate> {
        self.entries.iter_mut()
    }

    /// Current preferred parent
    #[must_use]
    pub fn pref_parent(&self) -> Option<&RplCandidate> {
        self.entries.iter().find(|c| c.is_parent)
    }

    /// Current preferred parent's identity
    #[must_use]
    pub fn pref_parent_eui64(&self) -> Option<Eui64> {
        self.pref_parent().map(|c| c.eui64)
    }

    /// Penalize a candidate until `until`; a denied preferred parent also
    /// leaves the parent set
    pub fn deny(&mut self, eui64: &Eui64, until: Ticks) {
        if let Some(cand) = self.get_mut(eui64) {
            cand.deny_timer.start_abs(until);
            cand.is_parent = false;
        }
    }

    /// Lowest rank this node has ever advertised in the current DODAG
    /// version (bounds upward rank movement, RFC 6550 §8.2.2.4)
    #[must_use]
    pub const fn lowest_advertised_rank(&self) -> u16 {
        self.lowest_advertised_rank
    }

    /// Record a rank we advertised
    pub fn note_advertised_rank(&mut self, rank: u16) {
        self.lowest_advertised_rank = self.lowest_advertised_rank.min(rank);
    }

    /// Forget rank history (new DODAG version)
    pub fn reset_advertised_rank(&mut self) {
        self.lowest_advertised_rank = RANK_INFINITE;
    }
}
