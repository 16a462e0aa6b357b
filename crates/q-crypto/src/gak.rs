// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Group key derivations
//!
//! A Group AES Key (GAK) binds a group transient key to the network it
//! serves: `GAK = Trunc-16(SHA3-256(network name || GTK))`. Two PANs sharing
//! a GTK by accident still end up with distinct link keys.
//!
//! The GTK hash is the 8-byte digest advertised in PAN configuration frames;
//! a node compares it against its own key set to detect that the border
//! router has rotated keys while the node was asleep.

use sha3::{Digest, Sha3_256};

use q_common::types::GTK_LEN;

/// Length of a derived group AES key
pub const GAK_LEN: usize = 16;

/// Length of an advertised GTK hash
pub const GTK_HASH_LEN: usize = 8;

/// Derive the group AES key for `gtk` on the network named `netname`
///
/// The network name contributes its bytes without any terminator, matching
/// the advertisement encoding.
#[must_use]
pub fn derive_gak(netname: &[u8], gtk: &[u8; GTK_LEN]) -> [u8; GAK_LEN] {
    let mut hasher = Sha3_256::new();
    hasher.update(netname);
    hasher.update(gtk);
    let digest = hasher.finalize();

    let mut gak = [0u8; GAK_LEN];
    gak.copy_from_slice(&digest[..GAK_LEN]);
    gak
}

/// Truncated digest of a GTK, as advertised in PAN configuration frames
#[must_use]
pub fn gtk_hash(gtk: &[u8; GTK_LEN]) -> [u8; GTK_HASH_LEN] {
    let digest = Sha3_256::digest(gtk);
    let mut hash = [0u8; GTK_HASH_LEN];
    hash.copy_from_slice(&digest[..GTK_HASH_LEN]);
    hash
}
