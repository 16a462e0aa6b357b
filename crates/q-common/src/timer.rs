// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Cooperative timers
//!
//! A [`Timer`] is a stored absolute deadline. The owning component is polled
//! from the single-threaded event loop with the current [`Ticks`]; a timer
//! "fires" when a poll observes the deadline in the past. A stopped timer is
//! queryable and is used throughout the router as a liveness signal ("is this
//! operation in flight").
//!
//! [`TxAlg`] is the bounded retransmission algorithm (RFC 8415 style) used
//! for solicit/request exchanges: exponential backoff from IRT to MRT with
//! ±10 % jitter, bounded by a maximum retransmission count.

use crate::rng::CryptoRng;
use crate::time::Ticks;

/// One-shot cooperative timer
#[derive(Debug, Clone, Copy, Default)]
pub struct Timer {
    deadline: Option<Ticks>,
}

impl Timer {
    /// New stopped timer
    #[must_use]
    pub const fn new() -> Self {
        Self { deadline: None }
    }

    /// Arm at an absolute deadline
    pub fn start_abs(&mut self, deadline: Ticks) {
        self.deadline = Some(deadline);
    }

    /// Arm `delay_ms` from `now`
    pub fn start_rel(&mut self, now: Ticks, delay_ms: u64) {
        self.deadline = Some(now + delay_ms);
    }

    /// Disarm
    pub fn stop(&mut self) {
        self.deadline = None;
    }

    /// A stopped timer is not armed and will never fire
    #[must_use]
    pub const fn stopped(&self) -> bool {
        self.deadline.is_none()
    }

    /// Armed deadline, if any
    #[must_use]
    pub const fn expires_at(&self) -> Option<Ticks> {
        self.deadline
    }

    /// Milliseconds until expiry (0 if stopped or already due)
    #[must_use]
    pub fn remaining_ms(&self, now: Ticks) -> u64 {
        match self.deadline {
            Some(deadline) => deadline.since(now),
            None => 0,
        }
    }

    /// Consume an expiry: returns true exactly once per arm, when the
    /// deadline has been reached, and stops the timer
    pub fn poll(&mut self, now: Ticks) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// Retransmission jitter bounds, RFC 8415 §15 (RAND in [-0.1, +0.1])
const RAND_SPREAD_PCT: u64 = 10;

/// Apply ±10 % jitter to a delay
fn jitter_ms<R: CryptoRng>(rng: &mut R, base_ms: u64) -> u64 {
    let mut raw = [0u8; 2];
    if rng.fill_bytes(&mut raw).is_err() {
        return base_ms;
    }
    let frac = u64::from(u16::from_le_bytes(raw)); // [0, 65536)
    let spread = base_ms * RAND_SPREAD_PCT / 100;
    // base - spread + frac/65536 * 2*spread
    (base_ms - spread) + (spread * 2).saturating_mul(frac) / 65536
}

/// Configuration for a bounded retransmission exchange
#[derive(Debug, Clone, Copy)]
pub struct TxAlgConfig {
    /// Initial retransmission time, seconds
    pub irt_s: u32,
    /// Maximum retransmission time, seconds (0: no upper bound)
    pub mrt_s: u32,
    /// Maximum retransmission count (0: unbounded)
    pub mrc: u8,
    /// Upper bound on the random delay before the first transmission,
    /// seconds (0: transmit on the next poll)
    pub max_first_delay_s: u32,
}

/// What a [`TxAlg`] poll asks the caller to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxAlgEvent {
    /// Transmit (or retransmit) the message now
    Transmit,
    /// The retry budget is exhausted; the exchange failed
    Failure,
}

/// Bounded retransmission algorithm state
#[derive(Debug, Clone, Copy)]
pub struct TxAlg {
    cfg: TxAlgConfig,
    timer: Timer,
    rt_ms: u64,
    count: u8,
}

impl TxAlg {
    /// New stopped instance
    #[must_use]
    pub const fn new(cfg: TxAlgConfig) -> Self {
        Self {
            cfg,
            timer: Timer::new(),
            rt_ms: 0,
            count: 0,
        }
    }

    /// Begin an exchange; the first [`TxAlgEvent::Transmit`] is delivered by
    /// a later poll
    pub fn start<R: CryptoRng>(&mut self, now: Ticks, rng: &mut R) {
        self.count = 0;
        self.rt_ms = 0;
        let first_ms = if self.cfg.max_first_delay_s == 0 {
            0
        } else {
            let bound = u64::from(self.cfg.max_first_delay_s) * 1000;
            let mut raw = [0u8; 2];
            if rng.fill_bytes(&mut raw).is_ok() {
                bound * u64::from(u16::from_le_bytes(raw)) / 65536
            } else {
                bound
            }
        };
        self.timer.start_rel(now, first_ms);
    }

    /// Abort the exchange
    pub fn stop(&mut self) {
        self.timer.stop();
        self.count = 0;
        self.rt_ms = 0;
    }

    /// No exchange in flight
    #[must_use]
    pub const fn stopped(&self) -> bool {
        self.timer.stopped()
    }

    /// Transmissions performed so far in this exchange
    #[must_use]
    pub const fn count(&self) -> u8 {
        self.count
    }

    /// Drive the exchange from the event loop
    pub fn poll<R: CryptoRng>(&mut self, now: Ticks, rng: &mut R) -> Option<TxAlgEvent> {
        if !self.timer.poll(now) {
            return None;
        }
        if self.cfg.mrc != 0 && self.count >= self.cfg.mrc {
            self.stop();
            return Some(TxAlgEvent::Failure);
        }
        self.count = self.count.saturating_add(1);
        // RT doubles from IRT, capped at MRT when one is configured
        self.rt_ms = if self.rt_ms == 0 {
            u64::from(self.cfg.irt_s) * 1000
        } else {
            self.rt_ms.saturating_mul(2)
        };
        if self.cfg.mrt_s != 0 {
            self.rt_ms = self.rt_ms.min(u64::from(self.cfg.mrt_s) * 1000);
        }
        self.timer.start_rel(now, jitter_ms(rng, self.rt_ms));
        Some(TxAlgEvent::Transmit)
    }
}
