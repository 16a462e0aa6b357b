// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Core identity and key types
//!
//! All sensitive material implements `Zeroize` and is wiped on drop.

use core::fmt;

use zeroize::Zeroize;

/// Number of FFN group transient key slots
pub const GTK_COUNT: usize = 4;

/// Number of LFN (long-lifetime) group transient key slots
pub const LGTK_COUNT: usize = 4;

/// Total key slots across both groups
pub const KEY_SLOT_COUNT: usize = GTK_COUNT + LGTK_COUNT;

/// Length of a group transient key in bytes
pub const GTK_LEN: usize = 16;

/// IEEE EUI-64 link-layer identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Eui64(pub [u8; 8]);

impl Eui64 {
    /// Broadcast address (all ones)
    pub const BROADCAST: Self = Self([0xFF; 8]);

    /// Create from raw bytes
    #[must_use]
    pub const fn new(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// Raw bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    /// Check for the broadcast address
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Derive the IPv6 interface identifier (EUI-64 with the
    /// universal/local bit flipped, RFC 4291 appendix A)
    #[must_use]
    pub fn to_iid(&self) -> [u8; 8] {
        let mut iid = self.0;
        iid[0] ^= 0x02;
        iid
    }

    /// Recover the EUI-64 from an IPv6 interface identifier
    #[must_use]
    pub fn from_iid(iid: [u8; 8]) -> Self {
        let mut bytes = iid;
        bytes[0] ^= 0x02;
        Self(bytes)
    }
}

impl fmt::Display for Eui64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ":")?;
            }
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Wi-SUN PAN identifier
///
/// `0xFFFF` is reserved as the broadcast/unset value on the wire; the router
/// state machine uses `Option<PanId>` instead of that sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PanId(pub u16);

impl PanId {
    /// Wire value reserved for "no PAN"
    pub const UNSET_WIRE: u16 = 0xFFFF;

    /// Parse a wire value, mapping the reserved value to `None`
    #[must_use]
    pub fn from_wire(raw: u16) -> Option<Self> {
        if raw == Self::UNSET_WIRE {
            None
        } else {
            Some(Self(raw))
        }
    }
}

impl fmt::Display for PanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Fixed-length secret key buffer, zeroized on drop
///
/// Display prints a truncated prefix only; full key material never reaches a
/// log line.
#[derive(Clone)]
pub struct Secret<const N: usize>([u8; N]);

impl<const N: usize> Secret<N> {
    /// All-zero (uninstalled) key
    #[must_use]
    pub const fn zero() -> Self {
        Self([0u8; N])
    }

    /// Create from raw bytes
    #[must_use]
    pub const fn new(bytes: [u8; N]) -> Self {
        Self(bytes)
    }

    /// Raw bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; N] {
        &self.0
    }

    /// An all-zero key counts as "no key material"
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Overwrite the key material
    pub fn set(&mut self, bytes: &[u8; N]) {
        self.0.copy_from_slice(bytes);
    }

    /// Wipe the key material
    pub fn clear(&mut self) {
        self.0.zeroize();
    }
}

impl<const N: usize> Default for Secret<N> {
    fn default() -> Self {
        Self::zero()
    }
}

impl<const N: usize> Zeroize for Secret<N> {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

impl<const N: usize> Drop for Secret<N> {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl<const N: usize> fmt::Display for Secret<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First two bytes only
        for b in self.0.iter().take(2) {
            write!(f, "{b:02x}")?;
        }
        write!(f, "..")
    }
}

impl<const N: usize> fmt::Debug for Secret<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret({self})")
    }
}
