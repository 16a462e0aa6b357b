// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Exponentially weighted moving average
//!
//! Link metrics (ETX, RSL) smooth their samples with an EWMA whose initial
//! state is NaN: the first sample becomes the average unchanged.

/// Smoothing factor used by the link metrics (1/8)
pub const LINK_EWMA_SF: f32 = 1.0 / 8.0;

/// Advance an EWMA by one sample
///
/// `EWMA(0) = X(0); EWMA(t) = S*(X(t) - EWMA(t-1)) + EWMA(t-1)`
#[must_use]
pub fn ewma_next(cur: f32, sample: f32, smoothing_factor: f32) -> f32 {
    if cur.is_nan() {
        return sample;
    }
    smoothing_factor * (sample - cur) + cur
}
