// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Ordering tests for 6LoWPAN reassembly

#![cfg(test)]

use q_common::{Eui64, Ticks};
use q_lowpan::{FragStatus, Reassembler};

const SRC: Eui64 = Eui64::new([0xA0; 8]);
const DST: Eui64 = Eui64::new([0xB0; 8]);
const TAG: u16 = 0x0102;
const LEN: usize = 128;

fn payload() -> [u8; LEN] {
    let mut data = [0u8; LEN];
    data[0] = 0x7A; // IPHC dispatch
    for (i, b) in data.iter_mut().enumerate().skip(1) {
        *b = (i * 7 % 256) as u8;
    }
    data
}

/// Fragments covering [0, 128): FRAG1 [0, 32), then three FRAGN pieces
fn fragments() -> [Vec<u8>; 4] {
    let data = payload();
    let mut frames: [Vec<u8>; 4] = [Vec::new(), Vec::new(), Vec::new(), Vec::new()];

    frames[0].extend_from_slice(&[0xC0, LEN as u8]);
    frames[0].extend_from_slice(&TAG.to_be_bytes());
    frames[0].extend_from_slice(&data[..32]);

    for (slot, offset) in [(1usize, 32usize), (2, 64), (3, 96)] {
        frames[slot].extend_from_slice(&[0xE0, LEN as u8]);
        frames[slot].extend_from_slice(&TAG.to_be_bytes());
        frames[slot].push((offset / 8) as u8);
        frames[slot].extend_from_slice(&data[offset..offset + 32]);
    }
    frames
}

fn permutations(n: usize) -> Vec<Vec<usize>> {
    if n == 1 {
        return vec![vec![0]];
    }
    let mut out = Vec::new();
    for perm in permutations(n - 1) {
        for pos in 0..=perm.len() {
            let mut next = perm.clone();
            next.insert(pos, n - 1);
            out.push(next);
        }
    }
    out
}

#[test]
fn every_delivery_order_yields_the_same_datagram() {
    let frames = fragments();
    let expected = payload();

    for order in permutations(frames.len()) {
        let mut reasm = Reassembler::new(1000);
        let mut complete = None;
        for (step, idx) in order.iter().enumerate() {
            match reasm.recv(Ticks::ZERO, &frames[*idx], &SRC, &DST).unwrap() {
                FragStatus::Complete(buf) => {
                    assert_eq!(step, order.len() - 1, "completed early in {order:?}");
                    complete = Some(buf);
                }
                FragStatus::Pending => {
                    assert!(step < order.len() - 1, "never completed in {order:?}");
                }
            }
        }
        let buf = complete.expect("reassembly must complete");
        assert_eq!(buf.as_slice(), &expected[..], "payload mismatch in {order:?}");
    }
}
