// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Error types for the Qbitel FAN router
//!
//! One unified error enum is shared by every subsystem crate. Errors are
//! `Copy` and carry no heap state.
//!
//! Expected transient conditions (an undefined ETX, no viable parent
//! candidate, an incomplete reassembly) are deliberately NOT errors; they are
//! expressed as `Option`/status returns by the subsystems themselves.

use core::fmt;

/// Result type alias for router operations
pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the router core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    // =========================================================================
    // Configuration errors: fatal at startup, never after initialization
    // =========================================================================
    /// Configuration field combination is invalid
    InvalidConfig,

    // =========================================================================
    // Malformed input: logged and dropped by the caller
    // =========================================================================
    /// Frame or record too short for its declared contents
    Truncated,
    /// 6LoWPAN fragment violates a framing rule
    InvalidFragment,
    /// First fragment does not start with a supported dispatch
    UnsupportedDispatch,
    /// EAPOL frame failed validation
    InvalidEapol,
    /// Stored record line or field could not be parsed
    StorageCorrupted,

    // =========================================================================
    // Security state
    // =========================================================================
    /// Key material is all-zero or collides with an installed key
    InvalidKey,
    /// No security conversation exists for this peer
    UnknownSupplicant,
    /// Random number generator failure
    RngFailure,

    // =========================================================================
    // Bounded resources
    // =========================================================================
    /// Fixed-capacity table cannot accept another entry
    TableFull,
    /// Destination buffer is too small for the result
    BufferTooSmall,
    /// Requested entry does not exist
    NotFound,

    // =========================================================================
    // Storage backend
    // =========================================================================
    /// Backend failed to read a record
    StorageReadFailed,
    /// Backend failed to write a record
    StorageWriteFailed,
}

impl Error {
    /// Short stable name, usable in log lines
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidConfig => "invalid config",
            Self::Truncated => "truncated",
            Self::InvalidFragment => "invalid fragment",
            Self::UnsupportedDispatch => "unsupported dispatch",
            Self::InvalidEapol => "invalid eapol",
            Self::StorageCorrupted => "storage corrupted",
            Self::InvalidKey => "invalid key",
            Self::UnknownSupplicant => "unknown supplicant",
            Self::RngFailure => "rng failure",
            Self::TableFull => "table full",
            Self::BufferTooSmall => "buffer too small",
            Self::NotFound => "not found",
            Self::StorageReadFailed => "storage read failed",
            Self::StorageWriteFailed => "storage write failed",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_names_are_stable() {
        assert_eq!(Error::InvalidConfig.as_str(), "invalid config");
        assert_eq!(Error::TableFull.as_str(), "table full");
    }
}
