// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Trickle timers (RFC 6206)
//!
//! PAN advertisement and solicitation frames are paced by trickle: an
//! interval that doubles from Imin up to Imax while the network is
//! consistent, with a transmission at a random point `t in [I/2, I)` of each
//! interval, suppressed when at least `k` consistent messages were already
//! heard.

use q_common::rng::random_below;
use q_common::{CryptoRng, Ticks, Timer};

/// Trickle interval parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrickleConfig {
    /// Smallest interval, milliseconds
    pub imin_ms: u64,
    /// Number of Imin doublings up to the largest interval
    pub imax_doublings: u8,
    /// Redundancy constant (0: never suppress)
    pub k: u8,
}

impl TrickleConfig {
    /// FAN discovery defaults: Imin 15 s, Imax 60 s, k = 1
    pub const DISCOVERY: Self = Self {
        imin_ms: 15 * 1000,
        imax_doublings: 2,
        k: 1,
    };

    fn imax_ms(&self) -> u64 {
        self.imin_ms << self.imax_doublings
    }
}

/// What a trickle poll asks the caller to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrickleEvent {
    /// Transmit the paced frame now
    Transmit,
    /// The interval elapsed (doubling already applied)
    IntervalDone,
}

/// One trickle instance
#[derive(Debug, Clone, Copy)]
pub struct Trickle {
    interval_ms: u64,
    counter: u8,
    t_timer: Timer,
    interval_timer: Timer,
}

impl Trickle {
    /// New stopped instance
    #[must_use]
    pub const fn new() -> Self {
        Self {
            interval_ms: 0,
            counter: 0,
            t_timer: Timer::new(),
            interval_timer: Timer::new(),
        }
    }

    fn arm<R: CryptoRng>(&mut self, now: Ticks, rng: &mut R) {
        self.counter = 0;
        // t in [I/2, I)
        let half = self.interval_ms / 2;
        let t = half + random_below(rng, half.max(1)).unwrap_or(0);
        self.t_timer.start_rel(now, t);
        self.interval_timer.start_rel(now, self.interval_ms);
    }

    /// Begin at the smallest interval
    pub fn start<R: CryptoRng>(&mut self, now: Ticks, rng: &mut R, cfg: &TrickleConfig) {
        self.interval_ms = cfg.imin_ms;
        self.arm(now, rng);
    }

    /// Stop pacing
    pub fn stop(&mut self) {
        self.t_timer.stop();
        self.interval_timer.stop();
    }

    /// Not currently pacing
    #[must_use]
    pub const fn stopped(&self) -> bool {
        self.interval_timer.stopped()
    }

    /// A consistent message was heard (suppression credit)
    pub fn consistent(&mut self) {
        self.counter = self.counter.saturating_add(1);
    }

    /// An inconsistency was observed: fall back to the smallest interval
    pub fn inconsistent<R: CryptoRng>(&mut self, now: Ticks, rng: &mut R, cfg: &TrickleConfig) {
        if self.stopped() {
            return;
        }
        if self.interval_ms > cfg.imin_ms {
            self.interval_ms = cfg.imin_ms;
            self.arm(now, rng);
        }
    }

    /// Drive the two timers
    pub fn poll<R: CryptoRng>(
        &mut self,
        now: Ticks,
        rng: &mut R,
        cfg: &TrickleConfig,
    ) -> Option<TrickleEvent> {
        if self.t_timer.poll(now) {
            if cfg.k == 0 || self.counter < cfg.k {
                return Some(TrickleEvent::Transmit);
            }
            return None;
        }
        if self.interval_timer.poll(now) {
            self.interval_ms = (self.interval_ms * 2).min(cfg.imax_ms());
            self.arm(now, rng);
            return Some(TrickleEvent::IntervalDone);
        }
        None
    }
}

impl Default for Trickle {
    fn default() -> Self {
        Self::new()
    }
}
