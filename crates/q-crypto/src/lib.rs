// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Qbitel FAN Router crypto support
//!
//! Derivations used by the security state machines. The heavy lifting
//! (EAP-TLS, MAC-layer AEAD) happens outside the router core; this crate
//! only turns group transient keys into the material those services consume:
//!
//! - **GAK**: the group AES key handed to the radio for a given GTK
//! - **GTK hash**: the truncated digest advertised in PAN configuration
//!   frames, used to detect key set mismatches
//!
//! All derivations are SHA3-256 based.

#![no_std]
#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod gak;

pub use gak::{derive_gak, gtk_hash};
// Entropy plumbing lives in q-common so timers can draw jitter without a
// dependency cycle; re-exported here for callers thinking in crypto terms.
pub use q_common::rng::{random_array, random_below};
pub use q_common::CryptoRng;
