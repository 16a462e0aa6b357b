// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Node-side key state
//!
//! The supplicant holds everything a router node learns through EAPOL: the
//! PMK from EAP-TLS, the PTK from the four-way handshake, and the GTK set
//! from key frames, plus the bounded key-request schedule that starts the
//! whole exchange (initial retry after 5 minutes, backing off to 1 hour,
//! three attempts before giving up).
//!
//! The EAPOL frame cryptography itself is an external service; it pushes
//! results in through [`Supplicant::set_pmk`], [`Supplicant::set_ptk`] and
//! [`Supplicant::install_gtk`].

use q_common::storage::StorageBackend;
use q_common::timer::{TxAlg, TxAlgConfig, TxAlgEvent};
use q_common::types::{GTK_COUNT, GTK_LEN, KEY_SLOT_COUNT};
use q_common::{CryptoRng, Eui64, Ticks};

use crate::gtk::{gtkl, GtkObserver, GtkSlot, PairwiseKey};
use crate::storage;

/// Supplicant configuration
#[derive(Debug, Clone, Copy)]
pub struct SupplicantConfig {
    /// Our link-layer identity
    pub eui64: Eui64,
    /// Key-request retransmission parameters
    pub key_request: TxAlgConfig,
}

impl SupplicantConfig {
    /// FAN SUP operation defaults: IRT 5 min, MRT 1 h, 3 attempts
    #[must_use]
    pub const fn new(eui64: Eui64) -> Self {
        Self {
            eui64,
            key_request: TxAlgConfig {
                irt_s: 5 * 60,
                mrt_s: 60 * 60,
                mrc: 3,
                max_first_delay_s: 0,
            },
        }
    }
}

/// What a supplicant poll asks the caller to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupplicantEvent {
    /// Transmit an EAPOL key request toward the EAPOL target
    SendKeyRequest,
    /// The key-request budget is exhausted; authentication failed
    Failure,
    /// A learned GTK expired; the slot was cleared
    GtkExpired(usize),
}

/// Node-side security conversation state
pub struct Supplicant {
    cfg: SupplicantConfig,
    /// Pairwise master key from EAP-TLS
    pub pmk: PairwiseKey<32>,
    /// Pairwise transient key from the four-way handshake
    pub ptk: PairwiseKey<48>,
    /// Learned group keys (FFN then LFN slots)
    pub gtks: [GtkSlot; KEY_SLOT_COUNT],
    key_request: TxAlg,
    running: bool,
}

impl Supplicant {
    /// Fresh supplicant with no key material
    #[must_use]
    pub fn new(cfg: SupplicantConfig) -> Self {
        Self {
            cfg,
            pmk: PairwiseKey::new(),
            ptk: PairwiseKey::new(),
            gtks: Default::default(),
            key_request: TxAlg::new(cfg.key_request),
            running: false,
        }
    }

    /// Our identity
    #[must_use]
    pub const fn eui64(&self) -> &Eui64 {
        &self.cfg.eui64
    }

    /// Forget every key and cancel any exchange
    ///
    /// Used when entering discovery: advertising a stale GTK liveness mask
    /// toward a new PAN would poison the join.
    pub fn reset(&mut self) {
        self.pmk.clear();
        self.ptk.clear();
        for slot in &mut self.gtks {
            slot.clear();
        }
        self.key_request.stop();
        self.running = false;
    }

    /// Begin the key-request exchange
    pub fn start_key_request<R: CryptoRng>(&mut self, now: Ticks, rng: &mut R) {
        self.running = true;
        self.key_request.start(now, rng);
    }

    /// Cancel the key-request exchange (reconnect path)
    pub fn stop_key_request(&mut self) {
        self.key_request.stop();
    }

    /// A key-request exchange is in flight
    #[must_use]
    pub fn key_request_in_flight(&self) -> bool {
        !self.key_request.stopped()
    }

    /// The supplicant has been started since the last reset
    #[must_use]
    pub const fn running(&self) -> bool {
        self.running
    }

    /// Drive retransmissions and key expirations
    pub fn poll<R: CryptoRng>(&mut self, now: Ticks, rng: &mut R) -> Option<SupplicantEvent> {
        match self.key_request.poll(now, rng) {
            Some(TxAlgEvent::Transmit) => return Some(SupplicantEvent::SendKeyRequest),
            Some(TxAlgEvent::Failure) => return Some(SupplicantEvent::Failure),
            None => {}
        }
        for slot in 0..KEY_SLOT_COUNT {
            if self.gtks[slot].expiry.poll(now) {
                self.gtks[slot].clear();
                return Some(SupplicantEvent::GtkExpired(slot));
            }
        }
        None
    }

    /// Install a group key learned from an EAPOL key frame
    ///
    /// `lifetime_ms` comes from the key's lifetime KDE. A successful install
    /// also ends the key-request exchange: the authenticator answered.
    pub fn install_gtk<O: GtkObserver>(
        &mut self,
        now: Ticks,
        slot: usize,
        key: &[u8; GTK_LEN],
        frame_counter: u32,
        lifetime_ms: u64,
        obs: &mut O,
    ) {
        let entry = &mut self.gtks[slot];
        entry.key.set(key);
        entry.frame_counter = frame_counter;
        entry.expiry.start_rel(now, lifetime_ms);
        self.key_request.stop();
        obs.on_gtk_change(slot, Some(key), frame_counter, false);
    }

    /// Drop a group key (revoked or superseded)
    pub fn remove_gtk<O: GtkObserver>(&mut self, slot: usize, obs: &mut O) {
        self.gtks[slot].clear();
        obs.on_gtk_change(slot, None, 0, false);
    }

    /// Install the PMK produced by EAP-TLS
    pub fn set_pmk(&mut self, now: Ticks, key: &[u8; 32]) {
        self.pmk.install(now, key);
    }

    /// Install the PTK produced by the four-way handshake
    pub fn set_ptk(&mut self, now: Ticks, key: &[u8; 48]) {
        self.ptk.install(now, key);
    }

    /// GTK liveness bitmask (FFN slots)
    #[must_use]
    pub fn gtkl(&self) -> u8 {
        gtkl(&self.gtks[..GTK_COUNT])
    }

    /// At least one FFN group key is live
    #[must_use]
    pub fn has_gtk(&self) -> bool {
        self.gtkl() != 0
    }

    /// Per-slot liveness, for seeding neighbor frame-counter floors
    #[must_use]
    pub fn live_slots(&self) -> [bool; KEY_SLOT_COUNT] {
        let mut live = [false; KEY_SLOT_COUNT];
        for (flag, slot) in live.iter_mut().zip(&self.gtks) {
            *flag = slot.installed();
        }
        live
    }

    /// Persist the key state
    pub fn store<S: StorageBackend>(&self, store: &mut S, force_sync: bool) {
        storage::store_node_keys(self, store, force_sync);
    }

    /// Restore the key state; returns false when no record exists
    ///
    /// # Errors
    ///
    /// [`q_common::Error::StorageCorrupted`] on identity mismatch.
    pub fn load<S: StorageBackend, O: GtkObserver>(
        &mut self,
        store: &mut S,
        now: Ticks,
        obs: &mut O,
    ) -> q_common::Result<bool> {
        storage::load_node_keys(self, store, now, obs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gtk::NullGtkObserver;
    use q_common::Result;

    struct TestRng(u64);

    impl CryptoRng for TestRng {
        fn fill_bytes(&mut self, dest: &mut [u8]) -> Result<()> {
            for chunk in dest.chunks_mut(8) {
                self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1);
                let bytes = self.0.to_le_bytes();
                chunk.copy_from_slice(&bytes[..chunk.len()]);
            }
            Ok(())
        }
    }

    fn supp() -> Supplicant {
        Supplicant::new(SupplicantConfig::new(Eui64::new([0x11; 8])))
    }

    #[test]
    fn key_request_retries_then_fails() {
        let mut rng = TestRng(99);
        let mut supp = supp();
        supp.start_key_request(Ticks::ZERO, &mut rng);

        let mut transmits = 0;
        let mut now = Ticks::ZERO;
        loop {
            match supp.poll(now, &mut rng) {
                Some(SupplicantEvent::SendKeyRequest) => transmits += 1,
                Some(SupplicantEvent::Failure) => break,
                Some(SupplicantEvent::GtkExpired(_)) | None => {}
            }
            now = now + 60_000;
            assert!(now.as_millis() < 24 * 3600 * 1000, "never failed");
        }
        assert_eq!(transmits, 3);
        assert!(!supp.key_request_in_flight());
    }

    #[test]
    fn gtk_install_answers_the_key_request() {
        let mut rng = TestRng(7);
        let mut supp = supp();
        let mut obs = NullGtkObserver;
        supp.start_key_request(Ticks::ZERO, &mut rng);
        assert!(supp.key_request_in_flight());

        supp.install_gtk(Ticks::ZERO, 0, &[0xAB; GTK_LEN], 5, 1_000_000, &mut obs);
        assert!(!supp.key_request_in_flight());
        assert_eq!(supp.gtkl(), 0b0001);
        assert!(supp.has_gtk());
        assert!(supp.live_slots()[0]);
    }

    #[test]
    fn expiry_clears_the_slot() {
        let mut rng = TestRng(7);
        let mut supp = supp();
        let mut obs = NullGtkObserver;
        supp.install_gtk(Ticks::ZERO, 1, &[0xCD; GTK_LEN], 0, 10_000, &mut obs);
        assert_eq!(
            supp.poll(Ticks::from_millis(10_000), &mut rng),
            Some(SupplicantEvent::GtkExpired(1))
        );
        assert!(!supp.has_gtk());
        assert!(supp.gtks[1].key.is_zero());
    }

    #[test]
    fn reset_wipes_everything() {
        let mut rng = TestRng(7);
        let mut supp = supp();
        let mut obs = NullGtkObserver;
        supp.set_pmk(Ticks::ZERO, &[1; 32]);
        supp.set_ptk(Ticks::ZERO, &[2; 48]);
        supp.install_gtk(Ticks::ZERO, 0, &[3; GTK_LEN], 0, 10_000, &mut obs);
        supp.start_key_request(Ticks::ZERO, &mut rng);

        supp.reset();
        assert!(!supp.pmk.is_valid());
        assert!(!supp.ptk.is_valid());
        assert!(!supp.has_gtk());
        assert!(!supp.key_request_in_flight());
    }

    #[test]
    fn state_round_trips_through_storage() {
        use q_common::storage::MemStorage;
        let mut obs = NullGtkObserver;
        let mut store: MemStorage<4, 4096> = MemStorage::new();

        let mut supp1 = supp();
        supp1.set_pmk(Ticks::ZERO, &[1; 32]);
        supp1.pmk.replay_counter = 10;
        supp1.install_gtk(Ticks::ZERO, 0, &[3; GTK_LEN], 1000, 1_000_000, &mut obs);
        supp1.store(&mut store, true);

        let mut supp2 = supp();
        assert!(supp2.load(&mut store, Ticks::from_millis(50), &mut obs).unwrap());
        assert!(supp2.pmk.is_valid());
        // Replay counter restored with its safety margin
        assert_eq!(supp2.pmk.replay_counter, 10 + storage::REPLAY_COUNTER_OFFSET);
        assert!(supp2.gtks[0].installed());
        assert_eq!(
            supp2.gtks[0].frame_counter,
            1000 + storage::FRAME_COUNTER_OFFSET
        );

        // Restored after the expiry: the slot is dropped
        let mut supp3 = supp();
        assert!(supp3
            .load(&mut store, Ticks::from_millis(2_000_000), &mut obs)
            .unwrap());
        assert!(!supp3.gtks[0].installed());
    }
}
