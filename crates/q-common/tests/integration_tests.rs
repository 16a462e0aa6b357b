// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Cross-module tests for q-common

#![cfg(test)]

use q_common::storage::{fields, MemStorage, RecordWriter, StorageBackend};
use q_common::timer::Timer;
use q_common::{Eui64, Ticks};

#[test]
fn record_survives_storage_round_trip() {
    let eui64 = Eui64::new([0x0A, 0x1B, 0x2C, 0x3D, 0x4E, 0x5F, 0x60, 0x71]);

    let mut writer = RecordWriter::<512>::new();
    writer.comment("network state");
    writer.field_bytes("eui64", eui64.as_bytes());
    writer.field_u64("pan_id", 0x1234);
    writer.field_idx_u64("gtk", 1, "frame_counter", 42);
    let text = writer.finish().unwrap();

    let mut store: MemStorage = MemStorage::new();
    store.store("network-config", &text, true).unwrap();

    let mut buf = [0u8; 512];
    let n = store.load("network-config", &mut buf).unwrap();
    let contents = core::str::from_utf8(&buf[..n]).unwrap();

    let mut pan_id = None;
    let mut frame_counter = None;
    let mut parsed_eui = None;
    for (_, field) in fields(contents) {
        let field = field.unwrap();
        match (field.key, field.index, field.sub) {
            ("eui64", None, None) => {
                let mut raw = [0u8; 8];
                field.as_bytes(&mut raw).unwrap();
                parsed_eui = Some(Eui64::new(raw));
            }
            ("pan_id", None, None) => pan_id = field.as_u64().ok(),
            ("gtk", Some(1), Some("frame_counter")) => frame_counter = field.as_u64().ok(),
            _ => panic!("unexpected field {field:?}"),
        }
    }
    assert_eq!(parsed_eui, Some(eui64));
    assert_eq!(pan_id, Some(0x1234));
    assert_eq!(frame_counter, Some(42));
}

#[test]
fn stopped_timer_is_a_liveness_signal() {
    let mut timer = Timer::new();
    assert!(timer.stopped(), "nothing in flight initially");

    timer.start_rel(Ticks::ZERO, 2_000);
    assert!(!timer.stopped(), "operation in flight while armed");

    assert!(timer.poll(Ticks::from_secs(2)));
    assert!(timer.stopped(), "expiry returns the timer to stopped");
}
