// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Security state records
//!
//! Key material and counters survive restarts through three records:
//!
//! - `network-keys` (node role): PMK, PTK and the learned GTK set
//! - `authenticator-keys` (border router role): slot keys, expirations,
//!   active slots and the next install/activate deadlines
//! - `supp-<eui64>` (border router role): one record per authenticated
//!   supplicant
//!
//! Counters are restored with a safety margin (frame counters +200000,
//! replay counters +100): a crash may have lost the last few increments,
//! and reusing a counter value with the same key is worse than skipping a
//! range.
//!
//! Malformed lines or fields are skipped; a load never fails on one bad
//! line. Only an identity mismatch aborts, since mixing another node's key
//! material would be unrecoverable.

use core::fmt::Write;

use heapless::String;

use q_common::storage::{fields, Field, RecordWriter, StorageBackend, RECORD_NAME_LEN};
use q_common::types::{GTK_COUNT, GTK_LEN, KEY_SLOT_COUNT};
use q_common::{CryptoRng, Error, Eui64, Result, Ticks};

use crate::authenticator::Authenticator;
use crate::gtk::{slot_next, GtkObserver, GtkSlot, KeyGroup};
use crate::supplicant::Supplicant;
use crate::SuppSession;

/// Restored frame counters jump ahead by this margin
pub const FRAME_COUNTER_OFFSET: u32 = 200_000;

/// Restored replay counters jump ahead by this margin
pub const REPLAY_COUNTER_OFFSET: u64 = 100;

/// Record name for the node-side key set
pub const NODE_KEYS_RECORD: &str = "network-keys";

/// Record name for the authenticator key set
pub const AUTH_KEYS_RECORD: &str = "authenticator-keys";

fn supp_record_name(eui64: &Eui64) -> String<RECORD_NAME_LEN> {
    let mut name = String::new();
    let _ = name.push_str("supp-");
    for b in eui64.as_bytes() {
        let _ = write!(name, "{b:02x}");
    }
    name
}

fn load_contents<'a, S: StorageBackend>(
    store: &mut S,
    name: &str,
    buf: &'a mut [u8],
) -> Option<&'a str> {
    let len = store.load(name, buf).ok()?;
    core::str::from_utf8(&buf[..len]).ok()
}

fn slot_index(field: &Field<'_>) -> Option<usize> {
    let base = match field.key {
        "gtk" => 0,
        "lgtk" => GTK_COUNT,
        _ => return None,
    };
    let idx = field.index?;
    let slot = base + idx;
    (idx < GTK_COUNT && slot < KEY_SLOT_COUNT).then_some(slot)
}

fn write_slots(writer: &mut RecordWriter<2048>, slots: &[GtkSlot; KEY_SLOT_COUNT]) {
    for (i, slot) in slots.iter().enumerate() {
        if !slot.installed() {
            continue;
        }
        let (name, idx) = if i < GTK_COUNT {
            ("gtk", i)
        } else {
            ("lgtk", i - GTK_COUNT)
        };
        writer.field_idx_bytes(name, idx, slot.key.as_bytes());
        if let Some(expiry) = slot.expiry.expires_at() {
            writer.field_idx_u64(name, idx, "expiration_timestamp_ms", expiry.as_millis());
        }
        writer.field_idx_u64(name, idx, "frame_counter", u64::from(slot.frame_counter));
        writer.blank();
    }
}

// =============================================================================
// Authenticator record
// =============================================================================

/// Persist the authenticator's key groups
pub fn store_auth_keys<S: StorageBackend>(auth: &Authenticator, store: &mut S, force_sync: bool) {
    let mut writer = RecordWriter::<2048>::new();
    writer.comment("authenticator group keys, do not edit");
    writer.field_bytes("eui64", auth.eui64().as_bytes());
    writer.blank();

    for (name, group) in [("gtk", KeyGroup::Ffn), ("lgtk", KeyGroup::Lfn)] {
        let state = auth.group(group);
        let mut key: String<64> = String::new();
        let _ = write!(key, "{name}.active_slot");
        writer.field_u64(&key, (state.slot_active - group.first_slot()) as u64);
        if let Some(at) = state.install_timer.expires_at() {
            let mut key: String<64> = String::new();
            let _ = write!(key, "{name}.next_installation_timestamp_ms");
            writer.field_u64(&key, at.as_millis());
        }
        if let Some(at) = state.activation_timer.expires_at() {
            let mut key: String<64> = String::new();
            let _ = write!(key, "{name}.next_activation_timestamp_ms");
            writer.field_u64(&key, at.as_millis());
        }
    }
    writer.blank();
    write_slots(&mut writer, auth.slots());

    if let Ok(contents) = writer.finish() {
        let _ = store.store(AUTH_KEYS_RECORD, &contents, force_sync);
    }
}

#[derive(Default, Clone, Copy)]
struct GroupRestore {
    next_install_ms: u64,
    next_activate_ms: u64,
}

/// Restore the authenticator's key groups
///
/// Returns `Ok(false)` when no record exists. Expired slots are dropped;
/// missed install/activate deadlines are caught up immediately.
///
/// # Errors
///
/// [`Error::StorageCorrupted`] on an identity mismatch with the stored
/// record, plus installation errors from the catch-up path.
pub fn load_auth_keys<R, S, O>(
    auth: &mut Authenticator,
    store: &mut S,
    now: Ticks,
    rng: &mut R,
    obs: &mut O,
) -> Result<bool>
where
    R: CryptoRng,
    S: StorageBackend,
    O: GtkObserver,
{
    let mut buf = [0u8; 2048];
    let Some(contents) = load_contents(store, AUTH_KEYS_RECORD, &mut buf) else {
        return Ok(false);
    };

    let mut expirations = [0u64; KEY_SLOT_COUNT];
    let mut ffn = GroupRestore::default();
    let mut lfn = GroupRestore::default();

    for (_, field) in fields(contents) {
        // One bad line never aborts the load
        let Ok(field) = field else { continue };
        match (field.key, field.index, field.sub) {
            ("eui64", None, None) => {
                let mut raw = [0u8; 8];
                if field.as_bytes(&mut raw).is_err() {
                    continue;
                }
                if Eui64::new(raw) != *auth.eui64() {
                    return Err(Error::StorageCorrupted);
                }
            }
            ("gtk" | "lgtk", None, Some(sub)) => {
                let group = if field.key == "gtk" {
                    KeyGroup::Ffn
                } else {
                    KeyGroup::Lfn
                };
                let Ok(value) = field.as_u64() else { continue };
                let restore = if field.key == "gtk" { &mut ffn } else { &mut lfn };
                match sub {
                    "active_slot" => {
                        let slot = group.first_slot() + (value as usize).min(GTK_COUNT - 1);
                        auth.group_state_mut(group).slot_active = slot;
                    }
                    "next_installation_timestamp_ms" => restore.next_install_ms = value,
                    "next_activation_timestamp_ms" => restore.next_activate_ms = value,
                    _ => {}
                }
            }
            ("gtk" | "lgtk", Some(_), None) => {
                let Some(slot) = slot_index(&field) else { continue };
                let mut raw = [0u8; GTK_LEN];
                if field.as_bytes(&mut raw).is_ok() {
                    auth.slots_mut()[slot].key.set(&raw);
                }
            }
            ("gtk" | "lgtk", Some(_), Some("expiration_timestamp_ms")) => {
                let Some(slot) = slot_index(&field) else { continue };
                if let Ok(value) = field.as_u64() {
                    expirations[slot] = value;
                }
            }
            ("gtk" | "lgtk", Some(_), Some("frame_counter")) => {
                let Some(slot) = slot_index(&field) else { continue };
                if let Ok(value) = field.as_u64() {
                    auth.slots_mut()[slot].frame_counter =
                        (value as u32).saturating_add(FRAME_COUNTER_OFFSET);
                }
            }
            _ => {}
        }
    }

    for slot in 0..KEY_SLOT_COUNT {
        if expirations[slot] == 0 {
            continue;
        }
        if now.as_millis() >= expirations[slot] {
            // Expired while we were down
            auth.slots_mut()[slot].clear();
            continue;
        }
        auth.slots_mut()[slot]
            .expiry
            .start_abs(Ticks::from_millis(expirations[slot]));
        let group = KeyGroup::of_slot(slot);
        let activate = auth.group(group).slot_active == slot;
        let slot_state = &auth.slots()[slot];
        let key = *slot_state.key.as_bytes();
        let frame_counter = slot_state.frame_counter;
        obs.on_gtk_change(slot, Some(&key), frame_counter, activate);
    }

    for (group, restore) in [(KeyGroup::Ffn, ffn), (KeyGroup::Lfn, lfn)] {
        if auth.group_expire_offset_ms(group) == 0 {
            continue;
        }
        if group == KeyGroup::Lfn && !auth.config().enable_lfn {
            continue;
        }
        if now.as_millis() >= restore.next_install_ms {
            // Missed installation: stage a fresh key right away
            let state = auth.group_state_mut(group);
            state.slot_active = slot_next(state.slot_active);
            let slot = auth.group(group).slot_active;
            auth.install_gtk(now, group, slot, None, rng, store, obs)?;
        } else {
            auth.group_state_mut(group)
                .install_timer
                .start_abs(Ticks::from_millis(restore.next_install_ms));
        }
        if now.as_millis() >= restore.next_activate_ms {
            auth.activate_current(group, store, obs);
        } else {
            auth.group_state_mut(group)
                .activation_timer
                .start_abs(Ticks::from_millis(restore.next_activate_ms));
        }
    }
    Ok(true)
}

// =============================================================================
// Node-side record
// =============================================================================

/// Persist the node's learned key set
pub fn store_node_keys<S: StorageBackend>(supp: &Supplicant, store: &mut S, force_sync: bool) {
    let mut writer = RecordWriter::<2048>::new();
    writer.comment("supplicant key state, do not edit");
    writer.field_bytes("eui64", supp.eui64().as_bytes());
    writer.blank();

    if supp.pmk.is_valid() {
        writer.field_bytes("pmk", supp.pmk.key.as_bytes());
        writer.field_u64("pmk.replay_counter", supp.pmk.replay_counter);
        writer.blank();
    }
    if supp.ptk.is_valid() {
        writer.field_bytes("ptk", supp.ptk.key.as_bytes());
        writer.blank();
    }
    write_slots(&mut writer, &supp.gtks);

    if let Ok(contents) = writer.finish() {
        let _ = store.store(NODE_KEYS_RECORD, &contents, force_sync);
    }
}

/// Restore the node's learned key set
///
/// Returns `Ok(false)` when no record exists. Live slots are re-announced
/// through `obs` so the radio relearns its keys.
///
/// # Errors
///
/// [`Error::StorageCorrupted`] on an identity mismatch.
pub fn load_node_keys<S, O>(
    supp: &mut Supplicant,
    store: &mut S,
    now: Ticks,
    obs: &mut O,
) -> Result<bool>
where
    S: StorageBackend,
    O: GtkObserver,
{
    let mut buf = [0u8; 2048];
    let Some(contents) = load_contents(store, NODE_KEYS_RECORD, &mut buf) else {
        return Ok(false);
    };

    let mut expirations = [0u64; KEY_SLOT_COUNT];

    for (_, field) in fields(contents) {
        let Ok(field) = field else { continue };
        match (field.key, field.index, field.sub) {
            ("eui64", None, None) => {
                let mut raw = [0u8; 8];
                if field.as_bytes(&mut raw).is_err() {
                    continue;
                }
                if Eui64::new(raw) != *supp.eui64() {
                    return Err(Error::StorageCorrupted);
                }
            }
            ("pmk", None, None) => {
                let mut raw = [0u8; 32];
                if field.as_bytes(&mut raw).is_ok() {
                    supp.pmk.install(now, &raw);
                }
            }
            ("pmk", None, Some("replay_counter")) => {
                if let Ok(value) = field.as_u64() {
                    supp.pmk.replay_counter = value.saturating_add(REPLAY_COUNTER_OFFSET);
                }
            }
            ("ptk", None, None) => {
                let mut raw = [0u8; 48];
                if field.as_bytes(&mut raw).is_ok() {
                    supp.ptk.install(now, &raw);
                }
            }
            ("gtk" | "lgtk", Some(_), None) => {
                let Some(slot) = slot_index(&field) else { continue };
                let mut raw = [0u8; GTK_LEN];
                if field.as_bytes(&mut raw).is_ok() {
                    supp.gtks[slot].key.set(&raw);
                }
            }
            ("gtk" | "lgtk", Some(_), Some("expiration_timestamp_ms")) => {
                let Some(slot) = slot_index(&field) else { continue };
                if let Ok(value) = field.as_u64() {
                    expirations[slot] = value;
                }
            }
            ("gtk" | "lgtk", Some(_), Some("frame_counter")) => {
                let Some(slot) = slot_index(&field) else { continue };
                if let Ok(value) = field.as_u64() {
                    supp.gtks[slot].frame_counter =
                        (value as u32).saturating_add(FRAME_COUNTER_OFFSET);
                }
            }
            _ => {}
        }
    }

    for slot in 0..KEY_SLOT_COUNT {
        if expirations[slot] == 0 {
            continue;
        }
        if now.as_millis() >= expirations[slot] {
            supp.gtks[slot].clear();
            continue;
        }
        supp.gtks[slot]
            .expiry
            .start_abs(Ticks::from_millis(expirations[slot]));
        let key = *supp.gtks[slot].key.as_bytes();
        let frame_counter = supp.gtks[slot].frame_counter;
        obs.on_gtk_change(slot, Some(&key), frame_counter, false);
    }
    Ok(true)
}

/// Delete the node-side record (fresh start)
pub fn clear_node_keys<S: StorageBackend>(store: &mut S) {
    store.clear(NODE_KEYS_RECORD);
}

// =============================================================================
// Per-supplicant records (authenticator side)
// =============================================================================

/// Persist one supplicant's pairwise state
pub fn store_supplicant<S: StorageBackend>(supp: &SuppSession, store: &mut S) {
    let mut writer = RecordWriter::<2048>::new();
    writer.field_bytes("eui64", supp.eui64.as_bytes());
    if supp.pmk.is_valid() {
        writer.field_bytes("pmk", supp.pmk.key.as_bytes());
        writer.field_u64("pmk.replay_counter", supp.pmk.replay_counter);
    }
    if supp.ptk.is_valid() {
        writer.field_bytes("ptk", supp.ptk.key.as_bytes());
    }
    if let Ok(contents) = writer.finish() {
        let _ = store.store(&supp_record_name(&supp.eui64), &contents, true);
    }
}

/// Restore one supplicant's pairwise state, if a record exists
pub fn load_supplicant<S: StorageBackend>(supp: &mut SuppSession, store: &mut S, now: Ticks) {
    let mut buf = [0u8; 2048];
    let name = supp_record_name(&supp.eui64);
    let Some(contents) = load_contents(store, &name, &mut buf) else {
        return;
    };
    for (_, field) in fields(contents) {
        let Ok(field) = field else { continue };
        match (field.key, field.sub) {
            ("pmk", None) => {
                let mut raw = [0u8; 32];
                if field.as_bytes(&mut raw).is_ok() {
                    supp.pmk.install(now, &raw);
                }
            }
            ("pmk", Some("replay_counter")) => {
                if let Ok(value) = field.as_u64() {
                    supp.pmk.replay_counter = value.saturating_add(REPLAY_COUNTER_OFFSET);
                }
            }
            ("ptk", None) => {
                let mut raw = [0u8; 48];
                if field.as_bytes(&mut raw).is_ok() {
                    supp.ptk.install(now, &raw);
                }
            }
            _ => {}
        }
    }
}

/// Delete a supplicant's record
pub fn clear_supplicant<S: StorageBackend>(eui64: &Eui64, store: &mut S) {
    store.clear(&supp_record_name(eui64));
}
