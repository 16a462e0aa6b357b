// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Expected transmission count estimation
//!
//! Every confirmed unicast transmission feeds the per-neighbor accumulator.
//! The calculation epoch fires when enough transmission requests have been
//! seen since the last epoch, or immediately for the very first measurement
//! (one attempt suffices at startup, to speed boot).
//!
//! On each epoch the raw value `tx / ack * 128` (capped at [`ETX_MAX`], and
//! [`ETX_MAX`] outright when no acknowledgement arrived) is fed into an EWMA
//! with an adaptive smoothing factor `1/min(n, 8)`: early noisy samples get
//! less weight, settling at the profile's 1/8.
//!
//! A second timer tracks staleness: when it fires first, the caller should
//! initiate traffic toward the neighbor (neighbor unreachability detection)
//! so a fresh measurement can happen.

use q_common::{Ticks, Timer};

use crate::ewma::ewma_next;

/// Maximum ETX value; also the value used when no acknowledgement arrived
pub const ETX_MAX: f32 = 1024.0;

/// Number of epochs after which the smoothing factor settles at 1/8
const ETX_EWMA_SETTLE: u32 = 8;

/// Estimator timing parameters
///
/// The router swaps between [`EtxConfig::DEFAULT`] and
/// [`EtxConfig::ACCELERATED`] around parent selection: right after PAN
/// configuration the broadcast schedule was not yet known, so pre-existing
/// measurements are biased and fresh ones are wanted fast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EtxConfig {
    /// Transmission requests required to trigger an epoch
    pub update_min_tx_req_cnt: u32,
    /// Minimum delay between epochs, milliseconds
    pub update_min_delay_ms: u64,
    /// Staleness period after which a refresh is requested, milliseconds
    pub refresh_period_ms: u64,
}

impl EtxConfig {
    /// Profile timings: 4 attempts / 1 minute epochs, 30 minute refresh
    pub const DEFAULT: Self = Self {
        update_min_tx_req_cnt: 4,
        update_min_delay_ms: 60 * 1000,
        refresh_period_ms: 30 * 60 * 1000,
    };

    /// Fast convergence during initial parent selection
    pub const ACCELERATED: Self = Self {
        update_min_tx_req_cnt: 1,
        update_min_delay_ms: 0,
        refresh_period_ms: 0,
    };
}

/// What an estimator poll observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtxEvent {
    /// The smoothed ETX changed; routing should re-evaluate parents
    Updated,
    /// The measurement is stale or missing; probe the neighbor
    Outdated,
}

/// Per-neighbor ETX accumulator
#[derive(Debug, Clone)]
pub struct Etx {
    etx: f32,
    tx_cnt: u32,
    ack_cnt: u32,
    tx_req_cnt: u32,
    compute_cnt: u32,
    timer_compute: Timer,
    timer_outdated: Timer,
}

impl Etx {
    /// Fresh estimator with no measurement
    #[must_use]
    pub const fn new() -> Self {
        Self {
            etx: f32::NAN,
            tx_cnt: 0,
            ack_cnt: 0,
            tx_req_cnt: 0,
            compute_cnt: 0,
            timer_compute: Timer::new(),
            timer_outdated: Timer::new(),
        }
    }

    /// Smoothed ETX; NaN until the first epoch has fired
    #[must_use]
    pub const fn etx(&self) -> f32 {
        self.etx
    }

    /// Whether a measurement exists
    #[must_use]
    pub fn is_defined(&self) -> bool {
        !self.etx.is_nan()
    }

    /// Cancel the timers and return to the no-measurement state
    ///
    /// Used when re-entering discovery, and when pre-configuration
    /// measurements must be discarded as biased.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Record one confirmed transmission: `tx_count` attempts, acknowledged
    /// or not
    ///
    /// Schedules an immediate recompute if none is pending.
    pub fn update(&mut self, now: Ticks, tx_count: u32, acked: bool) {
        self.tx_req_cnt += 1;
        self.tx_cnt += tx_count.max(1);
        self.ack_cnt += u32::from(acked);
        if self.timer_compute.stopped() {
            self.timer_compute.start_rel(now, 0);
        }
    }

    /// Drive the estimator's timers from the event loop
    pub fn poll(&mut self, now: Ticks, cfg: &EtxConfig) -> Option<EtxEvent> {
        if self.timer_compute.poll(now) {
            if !(self.tx_req_cnt >= cfg.update_min_tx_req_cnt || self.etx.is_nan()) {
                // Not enough samples for this epoch. If no refresh is
                // scheduled either, ask the caller to generate traffic.
                if self.timer_outdated.stopped() {
                    return Some(EtxEvent::Outdated);
                }
                return None;
            }

            let raw = if self.ack_cnt > 0 {
                (self.tx_cnt as f32 / self.ack_cnt as f32 * 128.0).min(ETX_MAX)
            } else {
                ETX_MAX
            };

            if self.compute_cnt < ETX_EWMA_SETTLE {
                self.compute_cnt += 1;
            }
            self.etx = ewma_next(self.etx, raw, 1.0 / self.compute_cnt as f32);

            self.tx_cnt = 0;
            self.ack_cnt = 0;
            self.tx_req_cnt = 0;
            self.timer_compute.start_rel(now, cfg.update_min_delay_ms);
            self.timer_outdated.start_rel(now, cfg.refresh_period_ms);
            return Some(EtxEvent::Updated);
        }

        if self.timer_outdated.poll(now) {
            return Some(EtxEvent::Outdated);
        }
        None
    }
}

impl Default for Etx {
    fn default() -> Self {
        Self::new()
    }
}
