// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Link-layer neighbor table
//!
//! One entry per discovered peer, created on first frame reception and keyed
//! by EUI-64. The table owns each neighbor's ETX estimator, the RSL EWMAs in
//! both directions, and the per-key-slot frame-counter floors used for
//! replay protection. Routing holds EUI-64 references into this table, never
//! ownership.

use heapless::Vec;

use q_common::types::KEY_SLOT_COUNT;
use q_common::{Error, Eui64, Result, Ticks};

use crate::etx::Etx;
use crate::ewma::{ewma_next, LINK_EWMA_SF};

/// Neighbor table capacity
pub const MAX_NEIGHBORS: usize = 32;

/// Routing cost advertised by a neighbor that cannot reach the border router
pub const ROUTING_COST_UNREACHABLE: u16 = 0xFFFF;

/// One discovered peer
#[derive(Debug, Clone)]
pub struct Neighbor {
    /// Link-layer identity
    pub eui64: Eui64,
    /// Link quality estimator
    pub etx: Etx,
    /// Neighbor-to-node received signal level EWMA, dBm (NaN until measured)
    pub rsl_in_dbm: f32,
    /// Node-to-neighbor received signal level EWMA, dBm, as reported back by
    /// the neighbor (NaN until known)
    pub rsl_out_dbm: f32,
    /// PAN routing cost advertised by this neighbor
    pub routing_cost: u16,
    /// Lowest acceptable frame counter per key slot (replay floor);
    /// `u32::MAX` blocks a slot with no live key
    pub frame_counter_min: [u32; KEY_SLOT_COUNT],
    /// Last reception from this neighbor
    pub last_heard: Ticks,
}

impl Neighbor {
    fn new(eui64: Eui64, now: Ticks, live_slots: &[bool; KEY_SLOT_COUNT]) -> Self {
        let mut frame_counter_min = [u32::MAX; KEY_SLOT_COUNT];
        for (floor, live) in frame_counter_min.iter_mut().zip(live_slots) {
            if *live {
                *floor = 0;
            }
        }
        Self {
            eui64,
            etx: Etx::new(),
            rsl_in_dbm: f32::NAN,
            rsl_out_dbm: f32::NAN,
            routing_cost: ROUTING_COST_UNREACHABLE,
            frame_counter_min,
            last_heard: now,
        }
    }

    /// Fold one inbound signal-level sample into the EWMA
    pub fn record_rsl_in(&mut self, dbm: f32) {
        self.rsl_in_dbm = ewma_next(self.rsl_in_dbm, dbm, LINK_EWMA_SF);
    }

    /// Fold the neighbor's report of our signal level into the EWMA
    pub fn record_rsl_out(&mut self, dbm: f32) {
        self.rsl_out_dbm = ewma_next(self.rsl_out_dbm, dbm, LINK_EWMA_SF);
    }
}

/// Bounded neighbor arena keyed by EUI-64
#[derive(Debug, Default)]
pub struct NeighborTable {
    entries: Vec<Neighbor, MAX_NEIGHBORS>,
}

impl NeighborTable {
    /// Empty table
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Look up a neighbor
    #[must_use]
    pub fn get(&self, eui64: &Eui64) -> Option<&Neighbor> {
        self.entries.iter().find(|n| n.eui64 == *eui64)
    }

    /// Look up a neighbor for mutation
    pub fn get_mut(&mut self, eui64: &Eui64) -> Option<&mut Neighbor> {
        self.entries.iter_mut().find(|n| n.eui64 == *eui64)
    }

    /// Look up or create a neighbor
    ///
    /// New entries seed their frame-counter floors from `live_slots`: slots
    /// with a live key accept from counter 0, dead slots are blocked.
    ///
    /// # Errors
    ///
    /// [`Error::TableFull`] when the arena is exhausted.
    pub fn fetch(
        &mut self,
        eui64: &Eui64,
        now: Ticks,
        live_slots: &[bool; KEY_SLOT_COUNT],
    ) -> Result<&mut Neighbor> {
        if let Some(pos) = self.entries.iter().position(|n| n.eui64 == *eui64) {
            return Ok(&mut self.entries[pos]);
        }
        self.entries
            .push(Neighbor::new(*eui64, now, live_slots))
            .map_err(|_| Error::TableFull)?;
        let last = self.entries.len() - 1;
        Ok(&mut self.entries[last])
    }

    /// Remove a neighbor
    pub fn remove(&mut self, eui64: &Eui64) {
        self.entries.retain(|n| n.eui64 != *eui64);
    }

    /// Drop every entry (link loss, re-entering discovery)
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of tracked neighbors
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no neighbor is tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate all neighbors
    pub fn iter(&self) -> impl Iterator<Item = &Neighbor> {
        self.entries.iter()
    }

    /// Iterate all neighbors mutably
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Neighbor> {
        self.entries.iter_mut()
    }

    /// Set every neighbor's frame-counter floor for one key slot
    ///
    /// Installing a key resets the floor to 0; clearing a key blocks the
    /// slot with `u32::MAX`.
    pub fn set_frame_counter_floor(&mut self, slot: usize, floor: u32) {
        for neigh in &mut self.entries {
            neigh.frame_counter_min[slot] = floor;
        }
    }

    /// Reset every neighbor's ETX estimator
    pub fn reset_etx(&mut self) {
        for neigh in &mut self.entries {
            neigh.etx.reset();
        }
    }
}
