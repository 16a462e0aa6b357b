// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Network identity record
//!
//! `network-config` remembers which PAN this node belongs to, so a restart
//! can reconnect instead of rediscovering. The record is bound to the
//! configured network name; joining a differently-named network with stale
//! state would be unrecoverable, so a mismatch aborts the load.

use q_common::storage::{fields, RecordWriter, StorageBackend};
use q_common::types::PanId;
use q_common::{Error, Result};

/// Record name
pub const NETWORK_CONFIG_RECORD: &str = "network-config";

/// Persist the network identity
pub fn store_network_config<S: StorageBackend>(
    store: &mut S,
    netname: &str,
    pan_id: Option<PanId>,
) {
    let mut writer = RecordWriter::<256>::new();
    writer.field_str("network_name", netname);
    if let Some(pan_id) = pan_id {
        writer.field_u64("pan_id", u64::from(pan_id.0));
    }
    if let Ok(contents) = writer.finish() {
        let _ = store.store(NETWORK_CONFIG_RECORD, &contents, true);
    }
}

/// Restore the network identity
///
/// # Errors
///
/// [`Error::NotFound`] when no record exists, [`Error::StorageCorrupted`]
/// when the stored network name differs from the configured one.
pub fn load_network_config<S: StorageBackend>(
    store: &mut S,
    expected_netname: &str,
) -> Result<Option<PanId>> {
    let mut buf = [0u8; 256];
    let len = store.load(NETWORK_CONFIG_RECORD, &mut buf)?;
    let contents = core::str::from_utf8(&buf[..len]).map_err(|_| Error::StorageCorrupted)?;

    let mut pan_id = None;
    for (_, field) in fields(contents) {
        let Ok(field) = field else { continue };
        match (field.key, field.sub) {
            ("network_name", None) => {
                if field.value != expected_netname {
                    return Err(Error::StorageCorrupted);
                }
            }
            ("pan_id", None) => {
                if let Ok(value) = field.as_u64() {
                    pan_id = PanId::from_wire(value as u16);
                }
            }
            _ => {}
        }
    }
    Ok(pan_id)
}

/// Delete the record (fresh start)
pub fn clear_network_config<S: StorageBackend>(store: &mut S) {
    store.clear(NETWORK_CONFIG_RECORD);
}
