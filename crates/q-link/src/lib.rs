// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Qbitel FAN Router link layer state
//!
//! Per-neighbor link quality tracking for the mesh:
//!
//! - **Neighbor table**: bounded arena of discovered peers, keyed by EUI-64
//! - **ETX**: expected transmission count estimation with epoch-based
//!   recomputation and staleness detection
//! - **RSL**: received signal level EWMAs in both directions
//! - **Duty cycle**: regulatory transmit-budget compliance levels

#![no_std]
#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod duty_cycle;
pub mod etx;
pub mod ewma;
pub mod neigh;

pub use duty_cycle::{DutyCycleConfig, DUTY_CYCLE_LEVEL_MAX};
pub use etx::{Etx, EtxConfig, EtxEvent, ETX_MAX};
pub use neigh::{Neighbor, NeighborTable, MAX_NEIGHBORS};
