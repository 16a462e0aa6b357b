// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Cross-module tests for q-link

#![cfg(test)]

use q_common::Ticks;
use q_link::etx::{EtxConfig, EtxEvent};
use q_link::neigh::NeighborTable;
use q_common::types::KEY_SLOT_COUNT;
use q_common::Eui64;

#[test]
fn lossy_link_converges_above_perfect_link() {
    let cfg = EtxConfig::ACCELERATED;
    let no_keys = [false; KEY_SLOT_COUNT];
    let mut table = NeighborTable::new();
    let good = Eui64::new([1; 8]);
    let bad = Eui64::new([2; 8]);
    table.fetch(&good, Ticks::ZERO, &no_keys).unwrap();
    table.fetch(&bad, Ticks::ZERO, &no_keys).unwrap();

    for i in 0..32u64 {
        let now = Ticks::from_millis(i * 100);
        {
            let neigh = table.get_mut(&good).unwrap();
            neigh.etx.update(now, 1, true);
            while neigh.etx.poll(now + 1, &cfg) == Some(EtxEvent::Outdated) {}
        }
        {
            // Every transmission needs 3 attempts and half are lost outright
            let neigh = table.get_mut(&bad).unwrap();
            neigh.etx.update(now, 3, i % 2 == 0);
            while neigh.etx.poll(now + 1, &cfg) == Some(EtxEvent::Outdated) {}
        }
    }

    let good_etx = table.get(&good).unwrap().etx.etx();
    let bad_etx = table.get(&bad).unwrap().etx.etx();
    assert!(good_etx <= 128.0);
    assert!(bad_etx > good_etx * 2.0, "lossy {bad_etx} vs clean {good_etx}");
}
