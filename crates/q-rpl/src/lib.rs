// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Qbitel FAN Router RPL upward-route formation
//!
//! The candidate parent set (per-neighbor DIO metadata) and the MRHOF
//! objective function (RFC 6719) with the Wi-SUN FAN profile's admission
//! rules: bidirectional signal-level hysteresis, link metric caps and a
//! dynamic rank limit.
//!
//! DIO/DAO/DIS wire handling lives outside this crate; it feeds advertised
//! ranks and DODAG configuration in, and consumes parent-selection results.

#![no_std]
#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod candidate;
pub mod mrhof;

pub use candidate::{CandidateSet, DodagConfig, RplCandidate, MAX_CANDIDATES, RANK_INFINITE};
pub use mrhof::{Discard, MrhofConfig, NudProbe, ParentObserver};
