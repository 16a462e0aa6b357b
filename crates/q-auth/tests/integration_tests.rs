// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Lifecycle tests spanning the authenticator and its storage records

#![cfg(test)]

mod test_rng {
    use q_common::{CryptoRng, Result};

    /// Deterministic xorshift source for repeatable key material
    pub struct TestRng {
        state: u64,
    }

    impl TestRng {
        pub fn new(seed: u64) -> Self {
            Self {
                state: seed.max(1),
            }
        }
    }

    impl CryptoRng for TestRng {
        fn fill_bytes(&mut self, dest: &mut [u8]) -> Result<()> {
            for chunk in dest.chunks_mut(8) {
                self.state ^= self.state << 13;
                self.state ^= self.state >> 7;
                self.state ^= self.state << 17;
                let bytes = self.state.to_le_bytes();
                chunk.copy_from_slice(&bytes[..chunk.len()]);
            }
            Ok(())
        }
    }
}

use q_auth::gtk::{GtkObserver, KeyGroup};
use q_auth::{AuthConfig, Authenticator, EapolPort, KmpId};
use q_common::storage::MemStorage;
use q_common::types::GTK_LEN;
use q_common::{Eui64, Ticks};
use test_rng::TestRng;

const BR: Eui64 = Eui64::new([0xB0; 8]);

#[derive(Default)]
struct ChangeLog {
    installs: Vec<(usize, [u8; GTK_LEN])>,
    activations: Vec<usize>,
    clears: Vec<usize>,
}

impl GtkObserver for ChangeLog {
    fn on_gtk_change(&mut self, slot: usize, key: Option<&[u8; GTK_LEN]>, _fc: u32, activate: bool) {
        if let Some(key) = key {
            self.installs.push((slot, *key));
        }
        if activate {
            self.activations.push(slot);
        } else if key.is_none() {
            self.clears.push(slot);
        }
    }
}

struct NullPort;

impl EapolPort for NullPort {
    fn sendto_mac(&mut self, _: KmpId, _: &[u8], _: &Eui64) {}
}

#[test]
fn restart_restores_keys_and_schedules() {
    let mut rng = TestRng::new(0xDEAD);
    let mut store: MemStorage<16, 4096> = MemStorage::new();
    let mut log = ChangeLog::default();

    let mut auth = Authenticator::new(AuthConfig::default(), BR);
    auth.start(Ticks::ZERO, &mut rng, &mut store, &mut log).unwrap();
    let key0 = *auth.slots()[0].key.as_bytes();
    let expiry0 = auth.slots()[0].expiry.expires_at().unwrap();
    let install_at = auth.group(KeyGroup::Ffn).install_timer.expires_at().unwrap();

    // Restart an hour later from the same storage
    let mut log2 = ChangeLog::default();
    let mut auth2 = Authenticator::new(AuthConfig::default(), BR);
    auth2
        .start(Ticks::from_secs(3600), &mut rng, &mut store, &mut log2)
        .unwrap();

    assert_eq!(auth2.slots()[0].key.as_bytes(), &key0);
    assert_eq!(auth2.slots()[0].expiry.expires_at().unwrap(), expiry0);
    assert_eq!(
        auth2.group(KeyGroup::Ffn).install_timer.expires_at().unwrap(),
        install_at
    );
    // The restored active key was re-announced to the observer
    assert!(log2.installs.iter().any(|(slot, key)| *slot == 0 && key == &key0));
}

#[test]
fn restart_with_wrong_identity_is_refused() {
    let mut rng = TestRng::new(5);
    let mut store: MemStorage<16, 4096> = MemStorage::new();
    let mut log = ChangeLog::default();

    let mut auth = Authenticator::new(AuthConfig::default(), BR);
    auth.start(Ticks::ZERO, &mut rng, &mut store, &mut log).unwrap();

    let mut other = Authenticator::new(AuthConfig::default(), Eui64::new([0xC0; 8]));
    assert!(other
        .start(Ticks::from_secs(1), &mut rng, &mut store, &mut log)
        .is_err());
}

#[test]
fn missed_installation_is_caught_up_on_restore() {
    let mut cfg = AuthConfig::default();
    cfg.ffn.expire_offset_s = 1000; // 1000 s lifetime, install due at 800 s
    let mut rng = TestRng::new(11);
    let mut store: MemStorage<16, 4096> = MemStorage::new();
    let mut log = ChangeLog::default();

    let mut auth = Authenticator::new(cfg, BR);
    auth.start(Ticks::ZERO, &mut rng, &mut store, &mut log).unwrap();
    assert_eq!(log.installs.len(), 1);

    // Come back after the staged installation deadline passed
    let mut log2 = ChangeLog::default();
    let mut auth2 = Authenticator::new(cfg, BR);
    auth2
        .start(Ticks::from_secs(900), &mut rng, &mut store, &mut log2)
        .unwrap();

    // Restore re-announced slot 0 and staged a fresh key in the next slot
    assert!(auth2.slots()[1].installed());
    assert!(log2.installs.iter().any(|(slot, _)| *slot == 1));
}

#[test]
fn full_rotation_with_timers_reuses_slots_in_order() {
    let mut cfg = AuthConfig::default();
    cfg.ffn.expire_offset_s = 100;
    let mut rng = TestRng::new(21);
    let mut store: MemStorage<16, 4096> = MemStorage::new();
    let mut log = ChangeLog::default();
    let mut port = NullPort;

    let mut auth = Authenticator::new(cfg, BR);
    auth.start(Ticks::ZERO, &mut rng, &mut store, &mut log).unwrap();

    // Run the clock for 10 lifetimes; rotation must cycle 0,1,2,3,0,...
    for ms in (0..1_000_000u64).step_by(5_000) {
        auth.poll(Ticks::from_millis(ms), &mut rng, &mut store, &mut log, &mut port);
    }
    assert!(log.activations.len() >= 4, "activations: {:?}", log.activations);
    for pair in log.activations.windows(2) {
        assert_eq!(pair[1], (pair[0] + 1) % 4, "activation order {:?}", log.activations);
    }
    // Keys eventually expire and their slots are cleared
    assert!(!log.clears.is_empty());
}
