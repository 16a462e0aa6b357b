// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Key slots and groups
//!
//! Eight fixed key slots: four FFN GTKs followed by four LFN LGTKs. A slot
//! is "installed" exactly while its expiration timer is armed; liveness is
//! the timer, not the key bytes. Within a group exactly one slot is active
//! for transmission; installation always targets the slot after the active
//! one, circularly.

use core::ops::Range;

use q_common::types::{Secret, GTK_COUNT, GTK_LEN, KEY_SLOT_COUNT, LGTK_COUNT};
use q_common::{Ticks, Timer};

/// The two independent key groups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyGroup {
    /// FFN group transient keys (slots 0..4)
    Ffn,
    /// LFN long-lifetime group transient keys (slots 4..8)
    Lfn,
}

impl KeyGroup {
    /// Slot indices belonging to this group
    #[must_use]
    pub const fn slots(self) -> Range<usize> {
        match self {
            Self::Ffn => 0..GTK_COUNT,
            Self::Lfn => GTK_COUNT..GTK_COUNT + LGTK_COUNT,
        }
    }

    /// First slot of the group
    #[must_use]
    pub const fn first_slot(self) -> usize {
        match self {
            Self::Ffn => 0,
            Self::Lfn => GTK_COUNT,
        }
    }

    /// Group owning a slot index
    #[must_use]
    pub fn of_slot(slot: usize) -> Self {
        if slot < GTK_COUNT {
            Self::Ffn
        } else {
            Self::Lfn
        }
    }

    /// Short name for log lines
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ffn => "gtk",
            Self::Lfn => "lgtk",
        }
    }
}

/// Next slot, circular within the slot's group
#[must_use]
pub fn slot_next(slot: usize) -> usize {
    let group = KeyGroup::of_slot(slot).slots();
    if slot + 1 < group.end {
        slot + 1
    } else {
        group.start
    }
}

/// One group transient key slot
#[derive(Debug, Clone, Default)]
pub struct GtkSlot {
    /// Key material (all-zero when uninstalled)
    pub key: Secret<GTK_LEN>,
    /// Monotonic frame counter floor for this key
    pub frame_counter: u32,
    /// Expiration timer; armed exactly while the slot is installed
    pub expiry: Timer,
}

impl GtkSlot {
    /// Empty slot
    #[must_use]
    pub const fn new() -> Self {
        Self {
            key: Secret::zero(),
            frame_counter: 0,
            expiry: Timer::new(),
        }
    }

    /// A slot is installed while its expiration timer runs
    #[must_use]
    pub const fn installed(&self) -> bool {
        !self.expiry.stopped()
    }

    /// Wipe the key material and disarm the slot
    pub fn clear(&mut self) {
        self.key.clear();
        self.frame_counter = 0;
        self.expiry.stop();
    }
}

/// GTK liveness bitmask over a slot slice (bit i = slot i installed)
#[must_use]
pub fn gtkl(slots: &[GtkSlot]) -> u8 {
    let mut mask = 0u8;
    for (i, slot) in slots.iter().enumerate().take(KEY_SLOT_COUNT) {
        if slot.installed() {
            mask |= 1 << i;
        }
    }
    mask
}

/// Pairwise key material with installation bookkeeping
#[derive(Debug, Clone, Default)]
pub struct PairwiseKey<const N: usize> {
    /// Key material
    pub key: Secret<N>,
    /// When the key was installed (None: never)
    pub installed_at: Option<Ticks>,
    /// EAPOL replay counter floor
    pub replay_counter: u64,
}

impl<const N: usize> PairwiseKey<N> {
    /// Empty key
    #[must_use]
    pub const fn new() -> Self {
        Self {
            key: Secret::zero(),
            installed_at: None,
            replay_counter: 0,
        }
    }

    /// Install fresh key material
    pub fn install(&mut self, now: Ticks, key: &[u8; N]) {
        self.key.set(key);
        self.installed_at = Some(now);
    }

    /// Valid key material is present
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.installed_at.is_some() && !self.key.is_zero()
    }

    /// Wipe and forget
    pub fn clear(&mut self) {
        self.key.clear();
        self.installed_at = None;
        self.replay_counter = 0;
    }
}

/// Receiver of group key changes
///
/// The node glue maps these into radio key installs, frame-counter floor
/// updates and join-state events; the status bus mirrors them.
pub trait GtkObserver {
    /// Slot `slot` changed: installed (`Some`) or cleared (`None`);
    /// `activate` marks the slot becoming the active transmit key
    fn on_gtk_change(
        &mut self,
        slot: usize,
        key: Option<&[u8; GTK_LEN]>,
        frame_counter: u32,
        activate: bool,
    );
}

/// Observer that ignores everything (tests, bootstrap paths)
#[derive(Debug, Default)]
pub struct NullGtkObserver;

impl GtkObserver for NullGtkObserver {
    fn on_gtk_change(&mut self, _: usize, _: Option<&[u8; GTK_LEN]>, _: u32, _: bool) {}
}
