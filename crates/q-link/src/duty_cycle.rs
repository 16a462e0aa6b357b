// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Regulatory duty-cycle monitoring
//!
//! Some regional regulations require devices to monitor their time spent
//! transmitting. This module computes a discrete compliance level from:
//!
//! - the cumulative TX duration reported over the last hour,
//! - a maximum TX duration allowed (budget), defined for all transmissions
//!   and also per channel,
//! - thresholds expressed as a percentage of the budgets, defining the
//!   transitions between levels.
//!
//! Level 0 is unrestricted; [`DUTY_CYCLE_LEVEL_MAX`] means the budget is
//! exhausted.

use q_common::{Error, Result};

/// Number of threshold-defined levels (levels run `0..=DUTY_CYCLE_LEVEL_MAX`)
pub const DUTY_CYCLE_LEVEL_MAX: usize = 2;

/// Transmit budget configuration
///
/// A budget of 0 disables the corresponding check; its thresholds must then
/// be 0 as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DutyCycleConfig {
    /// Total transmit budget per hour, milliseconds (0: disabled)
    pub budget_ms: u32,
    /// Level thresholds, percent of `budget_ms`, non-decreasing
    pub threshold_pct: [u8; DUTY_CYCLE_LEVEL_MAX],
    /// Per-channel transmit budget per hour, milliseconds (0: disabled)
    pub chan_budget_ms: u32,
    /// Level thresholds, percent of `chan_budget_ms`, non-decreasing
    pub chan_threshold_pct: [u8; DUTY_CYCLE_LEVEL_MAX],
}

fn check_thresholds(budget_ms: u32, thresholds: &[u8; DUTY_CYCLE_LEVEL_MAX]) -> Result<()> {
    if budget_ms != 0 {
        let mut prev = 0u8;
        for pct in thresholds {
            if *pct < prev {
                return Err(Error::InvalidConfig);
            }
            prev = *pct;
        }
    } else if thresholds.iter().any(|pct| *pct != 0) {
        // A threshold without its budget is a configuration mistake
        return Err(Error::InvalidConfig);
    }
    Ok(())
}

impl DutyCycleConfig {
    /// Validate at startup; violations are fatal configuration errors
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] when thresholds decrease or are set without
    /// their budget.
    pub fn validate(&self) -> Result<()> {
        check_thresholds(self.budget_ms, &self.threshold_pct)?;
        check_thresholds(self.chan_budget_ms, &self.chan_threshold_pct)
    }

    /// Compliance level for the given cumulative TX duration
    ///
    /// `chan_count` spreads the duration across channels for the per-channel
    /// budget.
    #[must_use]
    pub fn level(&self, tx_duration_ms: u32, chan_count: u16) -> usize {
        let chan_tx_ms = tx_duration_ms / u32::from(chan_count.max(1));

        for lvl in 0..DUTY_CYCLE_LEVEL_MAX {
            let total_ok = self.budget_ms == 0
                || u64::from(tx_duration_ms)
                    < u64::from(self.budget_ms) * u64::from(self.threshold_pct[lvl]) / 100;
            let chan_ok = self.chan_budget_ms == 0
                || u64::from(chan_tx_ms)
                    < u64::from(self.chan_budget_ms) * u64::from(self.chan_threshold_pct[lvl]) / 100;
            if total_ok && chan_ok {
                return lvl;
            }
        }
        DUTY_CYCLE_LEVEL_MAX
    }
}
