// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Parent selection driven by live ETX measurements

#![cfg(test)]

use q_common::types::KEY_SLOT_COUNT;
use q_common::{Eui64, Ticks};
use q_link::{EtxConfig, NeighborTable};
use q_rpl::mrhof::{self, MrhofConfig, NudProbe, ParentObserver};
use q_rpl::CandidateSet;

struct Probes(Vec<Eui64>);

impl NudProbe for Probes {
    fn probe(&mut self, eui64: &Eui64) {
        self.0.push(*eui64);
    }
}

struct Switches(Vec<Option<Eui64>>);

impl ParentObserver for Switches {
    fn on_pref_parent_change(&mut self, parent: Option<&Eui64>) {
        self.0.push(parent.copied());
    }
}

fn eui(n: u8) -> Eui64 {
    Eui64::new([n; 8])
}

#[test]
fn degrading_link_forces_a_parent_switch() {
    let cfg = MrhofConfig::default();
    let etx_cfg = EtxConfig::ACCELERATED;
    let no_keys = [false; KEY_SLOT_COUNT];
    let mut neighbors = NeighborTable::new();
    let mut cands = CandidateSet::new();
    let mut probes = Probes(Vec::new());
    let mut switches = Switches(Vec::new());

    for id in [1u8, 2] {
        let neigh = neighbors.fetch(&eui(id), Ticks::ZERO, &no_keys).unwrap();
        neigh.record_rsl_in(-65.0);
        neigh.record_rsl_out(-65.0);
        cands.fetch(&eui(id)).unwrap().dio_rank = 256;
    }

    // Before any measurement: no parent, but both neighbors get probed
    let parent = mrhof::select_parent(
        &cfg,
        Ticks::ZERO,
        &neighbors,
        &mut cands,
        &mut probes,
        &mut switches,
    );
    assert_eq!(parent, None);
    assert_eq!(probes.0.len(), 2);

    // Neighbor 1 measures clean, neighbor 2 needs two attempts per frame
    let mut now = Ticks::from_millis(10);
    for _ in 0..12u32 {
        for (id, attempts) in [(1u8, 1u32), (2, 2)] {
            let neigh = neighbors.get_mut(&eui(id)).unwrap();
            neigh.etx.update(now, attempts, true);
            while neigh.etx.poll(now + 1, &etx_cfg).is_some() {}
        }
        now = now + 100;
    }

    let parent = mrhof::select_parent(&cfg, now, &neighbors, &mut cands, &mut probes, &mut switches);
    assert_eq!(parent, Some(eui(1)));
    assert_eq!(switches.0.last(), Some(&Some(eui(1))));

    // Neighbor 1 collapses: every frame lost for a while
    for round in 0..16u32 {
        let neigh = neighbors.get_mut(&eui(1)).unwrap();
        neigh.etx.update(now, 8, false);
        while neigh.etx.poll(now + 1, &etx_cfg).is_some() {}
        now = now + 100;
        let _ = round;
    }

    let parent = mrhof::select_parent(&cfg, now, &neighbors, &mut cands, &mut probes, &mut switches);
    assert_eq!(parent, Some(eui(2)), "lossy-but-alive neighbor wins over dead link");
}
