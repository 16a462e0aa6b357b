// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Authenticator-side key lifecycle
//!
//! The border router owns the group transient keys. Per group (FFN GTK,
//! LFN LGTK) three timer-driven movements rotate the slots:
//!
//! - **Install**: stage the next key (caller-provided or random), expiring
//!   `GTK_EXPIRE_OFFSET` after the most recently installed key; schedule the
//!   following install when a configured percentage of that lifetime has
//!   elapsed.
//! - **Activate**: advance the active transmit slot circularly, a
//!   `1/GTK_NEW_ACTIVATION_TIME` fraction of the lifetime before the active
//!   key expires.
//! - **Expire**: clear the slot and notify.
//!
//! Revocation of node access follows the two-branch FAN rule: shrink the
//! remaining lifetime of the surviving key, destroy the others, and stage a
//! fresh key behind it.
//!
//! Per-supplicant conversations are created lazily on the first EAPOL frame
//! and removed aggressively when they hold no valid PMK, bounding memory
//! under attack.

use heapless::Vec;

use q_common::rng::random_array;
use q_common::storage::StorageBackend;
use q_common::types::{GTK_LEN, KEY_SLOT_COUNT};
use q_common::{CryptoRng, Error, Eui64, Result, Ticks, Timer};

use crate::gtk::{gtkl, slot_next, GtkObserver, GtkSlot, KeyGroup, PairwiseKey};
use crate::storage;

/// Maximum simultaneous security conversations
pub const MAX_SUPPLICANTS: usize = 16;

/// Maximum retained EAPOL frame for retransmission
pub const MAX_EAPOL_FRAME: usize = 512;

/// EAPOL retry budget (IEEE 802.11 dot11RSNAConfigPairwiseUpdateCount)
pub const EAPOL_MAX_RETRIES: u8 = 3;

/// EAPOL protocol version accepted on reception
pub const EAPOL_PROTOCOL_VERSION: u8 = 3;

/// Key management protocol identifiers (IEEE 802.15.9)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KmpId {
    /// EAP over LAN (EAP-TLS transport)
    Ieee8021X = 1,
    /// Four-way pairwise handshake
    FourWayHandshake = 6,
    /// Group key handshake
    GroupKeyHandshake = 7,
}

/// EAPOL packet types (IEEE 802.1X)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EapolPacketType {
    /// EAP payload
    Eap = 0,
    /// EAPOL-Start
    Start = 1,
    /// EAPOL-Logoff
    Logoff = 2,
    /// EAPOL-Key
    Key = 3,
}

impl EapolPacketType {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Eap),
            1 => Some(Self::Start),
            2 => Some(Self::Logoff),
            3 => Some(Self::Key),
            _ => None,
        }
    }
}

/// What became of a received EAPOL frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EapolVerdict {
    /// Delivered to the key-exchange handler
    Delivered,
    /// Valid frame, but not the exchange we are waiting for
    Ignored,
}

/// Outbound EAPOL transmission port
pub trait EapolPort {
    /// Hand a frame to the MAC for `dst`
    fn sendto_mac(&mut self, kmp_id: KmpId, frame: &[u8], dst: &Eui64);
}

/// Per-group lifetime parameters
#[derive(Debug, Clone, Copy)]
pub struct GroupConfig {
    /// GTK_EXPIRE_OFFSET, seconds (0: keys never expire)
    pub expire_offset_s: u32,
    /// GTK_NEW_INSTALL_REQUIRED: percentage of the lifetime after which the
    /// next key must be staged
    pub new_install_required_pct: u8,
    /// GTK_NEW_ACTIVATION_TIME: activate the next key `lifetime / X` before
    /// expiry
    pub new_activation_time: u32,
    /// REVOCATION_LIFETIME_REDUCTION: revoked lifetime is `lifetime / X`
    pub revocation_lifetime_reduction: u32,
}

impl GroupConfig {
    /// FAN profile defaults for the FFN group (30 day lifetime)
    pub const DEFAULT_FFN: Self = Self {
        expire_offset_s: 30 * 24 * 3600,
        new_install_required_pct: 80,
        new_activation_time: 720,
        revocation_lifetime_reduction: 30,
    };

    /// FAN profile defaults for the LFN group (90 day lifetime)
    pub const DEFAULT_LFN: Self = Self {
        expire_offset_s: 90 * 24 * 3600,
        new_install_required_pct: 90,
        new_activation_time: 180,
        revocation_lifetime_reduction: 30,
    };

    fn expire_offset_ms(&self) -> u64 {
        u64::from(self.expire_offset_s) * 1000
    }
}

/// Authenticator configuration
#[derive(Debug, Clone, Copy)]
pub struct AuthConfig {
    /// FFN group parameters
    pub ffn: GroupConfig,
    /// LFN group parameters
    pub lfn: GroupConfig,
    /// Operator-provided initial keys per slot (tests, interop)
    pub gtk_init: [Option<[u8; GTK_LEN]>; KEY_SLOT_COUNT],
    /// Retry interval for EAPOL/RADIUS exchanges, milliseconds
    pub retry_timeout_ms: u64,
    /// Whether the LFN group is managed at all
    pub enable_lfn: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            ffn: GroupConfig::DEFAULT_FFN,
            lfn: GroupConfig::DEFAULT_LFN,
            gtk_init: [None; KEY_SLOT_COUNT],
            retry_timeout_ms: 60 * 1000,
            enable_lfn: false,
        }
    }
}

/// Rotation state of one key group
#[derive(Debug, Clone, Default)]
pub struct GroupState {
    /// Slot currently used for transmission
    pub slot_active: usize,
    /// Fires when the next key must be staged
    pub install_timer: Timer,
    /// Fires when the next slot becomes active
    pub activation_timer: Timer,
}

/// One security conversation with a supplicant
#[derive(Debug)]
pub struct SuppSession {
    /// Peer identity
    pub eui64: Eui64,
    /// Authenticator nonce for the pairwise handshake
    pub anonce: [u8; 32],
    /// Pairwise master key from EAP-TLS
    pub pmk: PairwiseKey<32>,
    /// Pairwise transient key from the four-way handshake
    pub ptk: PairwiseKey<48>,
    rt_timer: Timer,
    rt_count: u8,
    rt_kmp: Option<KmpId>,
    rt_frame: Vec<u8, MAX_EAPOL_FRAME>,
}

impl SuppSession {
    fn new(eui64: Eui64, anonce: [u8; 32]) -> Self {
        Self {
            eui64,
            anonce,
            pmk: PairwiseKey::new(),
            ptk: PairwiseKey::new(),
            rt_timer: Timer::new(),
            rt_count: 0,
            rt_kmp: None,
            rt_frame: Vec::new(),
        }
    }

    /// The exchange this conversation is waiting on, if any
    #[must_use]
    pub fn pending_exchange(&self) -> Option<KmpId> {
        self.rt_kmp
    }

    /// An exchange is in flight while the retry timer runs
    #[must_use]
    pub fn exchange_in_flight(&self) -> bool {
        !self.rt_timer.stopped()
    }

    /// Retain `frame` for bounded retransmission of the `kmp` exchange
    ///
    /// The caller transmits the initial frame itself; the retry timer covers
    /// the follow-ups.
    ///
    /// # Errors
    ///
    /// [`Error::BufferTooSmall`] when the frame exceeds the retry buffer.
    pub fn retry_arm(&mut self, now: Ticks, kmp: KmpId, frame: &[u8], timeout_ms: u64) -> Result<()> {
        self.retry_disarm();
        self.rt_frame
            .extend_from_slice(frame)
            .map_err(|()| Error::BufferTooSmall)?;
        self.rt_kmp = Some(kmp);
        self.rt_count = 0;
        self.rt_timer.start_rel(now, timeout_ms);
        Ok(())
    }

    /// Abandon the in-flight exchange
    pub fn retry_disarm(&mut self) {
        self.rt_timer.stop();
        self.rt_frame.clear();
        self.rt_kmp = None;
        self.rt_count = 0;
    }
}

/// Authenticator security context
pub struct Authenticator {
    cfg: AuthConfig,
    eui64: Eui64,
    pub(crate) gtks: [GtkSlot; KEY_SLOT_COUNT],
    pub(crate) ffn_group: GroupState,
    pub(crate) lfn_group: GroupState,
    supplicants: Vec<SuppSession, MAX_SUPPLICANTS>,
}

impl Authenticator {
    /// New context; call [`Authenticator::start`] before use
    #[must_use]
    pub fn new(cfg: AuthConfig, eui64: Eui64) -> Self {
        Self {
            cfg,
            eui64,
            gtks: Default::default(),
            ffn_group: GroupState {
                slot_active: KeyGroup::Ffn.first_slot(),
                ..Default::default()
            },
            lfn_group: GroupState {
                slot_active: KeyGroup::Lfn.first_slot(),
                ..Default::default()
            },
            supplicants: Vec::new(),
        }
    }

    /// Our identity
    #[must_use]
    pub const fn eui64(&self) -> &Eui64 {
        &self.eui64
    }

    /// Configuration in force
    #[must_use]
    pub const fn config(&self) -> &AuthConfig {
        &self.cfg
    }

    /// Key slots (read-only view)
    #[must_use]
    pub fn slots(&self) -> &[GtkSlot; KEY_SLOT_COUNT] {
        &self.gtks
    }

    /// Rotation state of a group
    #[must_use]
    pub fn group(&self, group: KeyGroup) -> &GroupState {
        match group {
            KeyGroup::Ffn => &self.ffn_group,
            KeyGroup::Lfn => &self.lfn_group,
        }
    }

    fn group_mut(&mut self, group: KeyGroup) -> &mut GroupState {
        match group {
            KeyGroup::Ffn => &mut self.ffn_group,
            KeyGroup::Lfn => &mut self.lfn_group,
        }
    }

    pub(crate) fn group_state_mut(&mut self, group: KeyGroup) -> &mut GroupState {
        self.group_mut(group)
    }

    pub(crate) fn slots_mut(&mut self) -> &mut [GtkSlot; KEY_SLOT_COUNT] {
        &mut self.gtks
    }

    pub(crate) fn group_expire_offset_ms(&self, group: KeyGroup) -> u64 {
        self.group_cfg(group).expire_offset_ms()
    }

    fn group_cfg(&self, group: KeyGroup) -> &GroupConfig {
        match group {
            KeyGroup::Ffn => &self.cfg.ffn,
            KeyGroup::Lfn => &self.cfg.lfn,
        }
    }

    /// Liveness bitmask of the FFN group
    #[must_use]
    pub fn gtkl(&self) -> u8 {
        gtkl(&self.gtks[KeyGroup::Ffn.slots()])
    }

    /// Slot holding the key with the latest expiration in `group`
    fn slot_latest(&self, group: KeyGroup) -> usize {
        let mut latest = group.first_slot();
        let mut max_expiry = Ticks::ZERO;
        for slot in group.slots() {
            if let Some(expiry) = self.gtks[slot].expiry.expires_at() {
                if expiry >= max_expiry {
                    max_expiry = expiry;
                    latest = slot;
                }
            }
        }
        latest
    }

    /// A key is usable if nonzero and distinct from every key in the group
    fn is_key_valid(&self, group: KeyGroup, key: &[u8; GTK_LEN]) -> bool {
        if key.iter().all(|b| *b == 0) {
            return false;
        }
        group
            .slots()
            .all(|slot| self.gtks[slot].key.as_bytes() != key)
    }

    /// Install a key into `slot_install`
    ///
    /// With `key == None` a random key is drawn, retried until it collides
    /// with nothing.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidKey`] for an all-zero or colliding caller key,
    /// [`Error::RngFailure`] when the RNG cannot produce a usable key.
    pub fn install_gtk<R, S, O>(
        &mut self,
        now: Ticks,
        group: KeyGroup,
        slot_install: usize,
        key: Option<&[u8; GTK_LEN]>,
        rng: &mut R,
        store: &mut S,
        obs: &mut O,
    ) -> Result<()>
    where
        R: CryptoRng,
        S: StorageBackend,
        O: GtkObserver,
    {
        let material = match key {
            Some(key) => {
                if !self.is_key_valid(group, key) {
                    return Err(Error::InvalidKey);
                }
                *key
            }
            None => {
                let mut attempts = 0;
                loop {
                    let drawn = random_array::<GTK_LEN, R>(rng)?;
                    if self.is_key_valid(group, &drawn) {
                        break drawn;
                    }
                    attempts += 1;
                    if attempts > 32 {
                        return Err(Error::RngFailure);
                    }
                }
            }
        };

        let cfg = *self.group_cfg(group);
        let expire_offset_ms = cfg.expire_offset_ms();
        // The expiration of a key is the expiration of the most recently
        // installed key plus GTK_EXPIRE_OFFSET (or now for the first one).
        let start = self.gtks[self.slot_latest(group)]
            .expiry
            .expires_at()
            .unwrap_or(now);

        let slot = &mut self.gtks[slot_install];
        slot.key.set(&material);
        slot.frame_counter = 0;
        if expire_offset_ms != 0 {
            slot.expiry.start_abs(start + expire_offset_ms);
        } else {
            // Liveness is then tracked purely by the armed timer
            slot.expiry.start_abs(Ticks::from_millis(u64::MAX));
        }

        if expire_offset_ms != 0 {
            let install_at = start + u64::from(cfg.new_install_required_pct) * expire_offset_ms / 100;
            self.group_mut(group).install_timer.start_abs(install_at);
        }

        obs.on_gtk_change(slot_install, Some(&material), 0, false);
        storage::store_auth_keys(self, store, true);
        Ok(())
    }

    /// Mark the group's current `slot_active` as the transmit key and arm
    /// the next activation
    ///
    /// The next activation is scheduled relative to the active key's
    /// expiry, so no current time is needed.
    pub fn activate_current<S, O>(&mut self, group: KeyGroup, store: &mut S, obs: &mut O)
    where
        S: StorageBackend,
        O: GtkObserver,
    {
        let cfg = *self.group_cfg(group);
        let slot_active = self.group(group).slot_active;
        let expire_offset_ms = cfg.expire_offset_ms();
        if expire_offset_ms != 0 {
            if let Some(expiry) = self.gtks[slot_active].expiry.expires_at() {
                let activate_at =
                    Ticks::from_millis(expiry.as_millis().saturating_sub(
                        expire_offset_ms / u64::from(cfg.new_activation_time.max(1)),
                    ));
                self.group_mut(group).activation_timer.start_abs(activate_at);
            }
        }
        obs.on_gtk_change(slot_active, None, 0, true);
        storage::store_auth_keys(self, store, true);
    }

    fn expire_slot<S, O>(&mut self, slot: usize, store: &mut S, obs: &mut O)
    where
        S: StorageBackend,
        O: GtkObserver,
    {
        obs.on_gtk_change(slot, None, 0, false);
        self.gtks[slot].clear();
        storage::store_auth_keys(self, store, true);
    }

    /// Record MAC-reported frame counter usage for a live slot
    pub fn update_frame_counter<S: StorageBackend>(
        &mut self,
        slot: usize,
        frame_counter: u32,
        store: &mut S,
    ) {
        if !self.gtks[slot].installed() {
            return;
        }
        self.gtks[slot].frame_counter = frame_counter;
        storage::store_auth_keys(self, store, false);
    }

    /// Revoke node access: rotate the group's keys on a reduced lifetime
    ///
    /// FAN 1.1 §6.5.2.5, two branches on the active key's remaining
    /// lifetime. Any pending supplicant retries are left alone: revocation
    /// wins, and key requests restart against the new key set.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidKey`] when the replacement key is unusable.
    pub fn revoke_gtks<R, S, O>(
        &mut self,
        now: Ticks,
        group: KeyGroup,
        key: Option<&[u8; GTK_LEN]>,
        rng: &mut R,
        store: &mut S,
        obs: &mut O,
    ) -> Result<()>
    where
        R: CryptoRng,
        S: StorageBackend,
        O: GtkObserver,
    {
        if let Some(key) = key {
            if !self.is_key_valid(group, key) {
                return Err(Error::InvalidKey);
            }
        }

        let cfg = *self.group_cfg(group);
        let reduced_ms = cfg.expire_offset_ms() / u64::from(cfg.revocation_lifetime_reduction.max(1));
        let slot_active = self.group(group).slot_active;
        let mut active_remaining_ms = self.gtks[slot_active].expiry.remaining_ms(now);

        let slot_latest;
        if active_remaining_ms > reduced_ms {
            // a. Destroy everything but the active key, shrink its lifetime
            for slot in group.slots() {
                if slot == slot_active || !self.gtks[slot].installed() {
                    continue;
                }
                self.expire_slot(slot, store, obs);
            }
            active_remaining_ms = reduced_ms;
            slot_latest = slot_active;
        } else {
            // b. Keep active and next, shrink the next key's lifetime
            let slot_keep = slot_next(slot_active);
            for slot in group.slots() {
                if slot == slot_active || slot == slot_keep || !self.gtks[slot].installed() {
                    continue;
                }
                self.expire_slot(slot, store, obs);
            }
            slot_latest = slot_keep;
        }

        self.gtks[slot_latest].expiry.start_rel(now, reduced_ms);
        self.install_gtk(now, group, slot_next(slot_latest), key, rng, store, obs)?;

        let activate_in = active_remaining_ms
            .saturating_sub(cfg.expire_offset_ms() / u64::from(cfg.new_activation_time.max(1)));
        self.group_mut(group)
            .activation_timer
            .start_rel(now, activate_in);
        storage::store_auth_keys(self, store, true);
        Ok(())
    }

    fn install_from_init<R, S, O>(
        &mut self,
        now: Ticks,
        group: KeyGroup,
        rng: &mut R,
        store: &mut S,
        obs: &mut O,
    ) -> Result<()>
    where
        R: CryptoRng,
        S: StorageBackend,
        O: GtkObserver,
    {
        let mut gap = false;
        for slot in group.slots() {
            match self.cfg.gtk_init[slot] {
                None => gap = true,
                Some(key) => {
                    // Initial keys must occupy a contiguous slot prefix
                    if gap {
                        return Err(Error::InvalidConfig);
                    }
                    self.install_gtk(now, group, slot, Some(&key), rng, store, obs)?;
                }
            }
        }
        Ok(())
    }

    /// Bring up the key state: restore from storage, or bootstrap the
    /// groups from configured or random keys
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] when initial keys are hardcoded while a
    /// previous context exists in storage, or violate slot contiguity;
    /// [`Error::InvalidKey`]/[`Error::RngFailure`] from installation.
    pub fn start<R, S, O>(
        &mut self,
        now: Ticks,
        rng: &mut R,
        store: &mut S,
        obs: &mut O,
    ) -> Result<()>
    where
        R: CryptoRng,
        S: StorageBackend,
        O: GtkObserver,
    {
        if storage::load_auth_keys(self, store, now, rng, obs)? {
            if self.cfg.gtk_init.iter().any(Option::is_some) {
                return Err(Error::InvalidConfig);
            }
            storage::store_auth_keys(self, store, true);
            return Ok(());
        }

        if self.cfg.gtk_init[KeyGroup::Ffn.slots()].iter().any(Option::is_some) {
            self.install_from_init(now, KeyGroup::Ffn, rng, store, obs)?;
        } else {
            let slot = self.ffn_group.slot_active;
            self.install_gtk(now, KeyGroup::Ffn, slot, None, rng, store, obs)?;
        }
        self.activate_current(KeyGroup::Ffn, store, obs);

        if self.cfg.enable_lfn {
            if self.cfg.gtk_init[KeyGroup::Lfn.slots()].iter().any(Option::is_some) {
                self.install_from_init(now, KeyGroup::Lfn, rng, store, obs)?;
            } else {
                let slot = self.lfn_group.slot_active;
                self.install_gtk(now, KeyGroup::Lfn, slot, None, rng, store, obs)?;
            }
            self.activate_current(KeyGroup::Lfn, store, obs);
        }
        storage::store_auth_keys(self, store, true);
        Ok(())
    }

    /// Drive every lifecycle and retry timer
    pub fn poll<R, S, O, P>(
        &mut self,
        now: Ticks,
        rng: &mut R,
        store: &mut S,
        obs: &mut O,
        port: &mut P,
    ) where
        R: CryptoRng,
        S: StorageBackend,
        O: GtkObserver,
        P: EapolPort,
    {
        for slot in 0..KEY_SLOT_COUNT {
            if self.gtks[slot].expiry.poll(now) {
                self.expire_slot(slot, store, obs);
            }
        }

        for group in [KeyGroup::Ffn, KeyGroup::Lfn] {
            if self.group_mut(group).activation_timer.poll(now) {
                let state = self.group_mut(group);
                state.slot_active = slot_next(state.slot_active);
                self.activate_current(group, store, obs);
            }
            if self.group_mut(group).install_timer.poll(now) {
                let slot = slot_next(self.group(group).slot_active);
                // A collision-free random key always exists; RNG failure
                // leaves the slot empty until the next poll retries.
                let _ = self.install_gtk(now, group, slot, None, rng, store, obs);
            }
        }

        self.poll_retries(now, store, port);
    }

    fn poll_retries<S, P>(&mut self, now: Ticks, store: &mut S, port: &mut P)
    where
        S: StorageBackend,
        P: EapolPort,
    {
        let timeout_ms = self.cfg.retry_timeout_ms;
        let mut remove: Option<Eui64> = None;
        for supp in &mut self.supplicants {
            if !supp.rt_timer.poll(now) {
                continue;
            }
            supp.rt_count += 1;
            if supp.rt_count >= EAPOL_MAX_RETRIES {
                // Final timeout: abandon the exchange, and with it the
                // supplicant if it never produced a PMK
                supp.retry_disarm();
                if !supp.pmk.is_valid() {
                    remove = Some(supp.eui64);
                }
                continue;
            }
            if let Some(kmp) = supp.rt_kmp {
                port.sendto_mac(kmp, &supp.rt_frame, &supp.eui64);
            }
            supp.rt_timer.start_rel(now, timeout_ms);
        }
        if let Some(eui64) = remove {
            self.remove_supp(&eui64, store);
        }
    }

    /// Look up a conversation
    #[must_use]
    pub fn get_supp(&self, eui64: &Eui64) -> Option<&SuppSession> {
        self.supplicants.iter().find(|s| s.eui64 == *eui64)
    }

    /// Look up a conversation for mutation
    pub fn get_supp_mut(&mut self, eui64: &Eui64) -> Option<&mut SuppSession> {
        self.supplicants.iter_mut().find(|s| s.eui64 == *eui64)
    }

    /// Look up or lazily create a conversation
    ///
    /// # Errors
    ///
    /// [`Error::TableFull`] when the conversation arena is exhausted,
    /// [`Error::RngFailure`] when no nonce can be drawn.
    pub fn fetch_supp<R, S>(
        &mut self,
        now: Ticks,
        eui64: &Eui64,
        rng: &mut R,
        store: &mut S,
    ) -> Result<&mut SuppSession>
    where
        R: CryptoRng,
        S: StorageBackend,
    {
        if let Some(pos) = self.supplicants.iter().position(|s| s.eui64 == *eui64) {
            return Ok(&mut self.supplicants[pos]);
        }
        let anonce = random_array::<32, R>(rng)?;
        let mut supp = SuppSession::new(*eui64, anonce);
        storage::load_supplicant(&mut supp, store, now);
        self.supplicants.push(supp).map_err(|_| Error::TableFull)?;
        let last = self.supplicants.len() - 1;
        Ok(&mut self.supplicants[last])
    }

    fn remove_supp<S: StorageBackend>(&mut self, eui64: &Eui64, store: &mut S) {
        storage::clear_supplicant(eui64, store);
        self.supplicants.retain(|s| s.eui64 != *eui64);
    }

    /// Forget a supplicant's keys entirely (operator revocation)
    ///
    /// # Errors
    ///
    /// [`Error::UnknownSupplicant`] when no conversation exists.
    pub fn revoke_pmk<S: StorageBackend>(&mut self, eui64: &Eui64, store: &mut S) -> Result<()> {
        if self.get_supp(eui64).is_none() {
            return Err(Error::UnknownSupplicant);
        }
        self.remove_supp(eui64, store);
        Ok(())
    }

    /// Pairwise temporal key for a peer, if its handshake completed
    ///
    /// The TK is the tail of the PTK (IEEE 802.11 AKM 1 layout).
    #[must_use]
    pub fn supp_tk(&self, eui64: &Eui64) -> Option<[u8; 16]> {
        let supp = self.get_supp(eui64)?;
        if !supp.ptk.is_valid() {
            return None;
        }
        let mut tk = [0u8; 16];
        tk.copy_from_slice(&supp.ptk.key.as_bytes()[32..48]);
        Some(tk)
    }

    /// Validate and dispatch a received EAPOL frame
    ///
    /// `handler` is the external key-exchange engine (EAP-TLS, 4WH/GKH
    /// processing); it receives the conversation and the frame body. After
    /// it runs, a conversation with no exchange in flight and no valid PMK
    /// is removed. Either the peer sent garbage or its handshake failed,
    /// and keeping it would let an attacker exhaust the arena.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidEapol`] for header or consistency violations (the
    /// frame is dropped), plus creation errors from
    /// [`Authenticator::fetch_supp`].
    pub fn recv_eapol<R, S, F>(
        &mut self,
        now: Ticks,
        kmp_id: KmpId,
        eui64: &Eui64,
        frame: &[u8],
        rng: &mut R,
        store: &mut S,
        mut handler: F,
    ) -> Result<EapolVerdict>
    where
        R: CryptoRng,
        S: StorageBackend,
        F: FnMut(&mut SuppSession, EapolPacketType, &[u8]),
    {
        if frame.len() < 4 {
            return Err(Error::InvalidEapol);
        }
        if frame[0] != EAPOL_PROTOCOL_VERSION {
            return Err(Error::InvalidEapol);
        }
        let packet_type = EapolPacketType::from_byte(frame[1]).ok_or(Error::InvalidEapol)?;
        let body_len = usize::from(u16::from_be_bytes([frame[2], frame[3]]));
        let body = frame.get(4..4 + body_len).ok_or(Error::InvalidEapol)?;

        // Handshake KMPs carry only EAPOL-Key; EAP payloads only ride 802.1X
        let consistent = match kmp_id {
            KmpId::FourWayHandshake | KmpId::GroupKeyHandshake => {
                packet_type == EapolPacketType::Key
            }
            KmpId::Ieee8021X => true,
        };
        if !consistent {
            return Err(Error::InvalidEapol);
        }

        let supp = self.fetch_supp(now, eui64, rng, store)?;

        // We initiate every exchange after a Key-Request, so the expected
        // KMP is known; a Key-Request itself (802.1X EAPOL-Key) is always
        // accepted.
        let expected = supp.rt_kmp == Some(kmp_id)
            || (kmp_id == KmpId::Ieee8021X && packet_type == EapolPacketType::Key);
        let verdict = if expected {
            match packet_type {
                EapolPacketType::Eap | EapolPacketType::Key => {
                    handler(supp, packet_type, body);
                    EapolVerdict::Delivered
                }
                EapolPacketType::Start | EapolPacketType::Logoff => EapolVerdict::Ignored,
            }
        } else {
            EapolVerdict::Ignored
        };

        let supp = self.get_supp(eui64).ok_or(Error::UnknownSupplicant)?;
        if !supp.exchange_in_flight() && !supp.pmk.is_valid() {
            self.remove_supp(eui64, store);
        }
        Ok(verdict)
    }

    /// Number of live conversations
    #[must_use]
    pub fn supp_count(&self) -> usize {
        self.supplicants.len()
    }

    /// Persist a supplicant's pairwise state (called by the key-exchange
    /// engine after installing PMK/PTK material)
    pub fn store_supp<S: StorageBackend>(&self, eui64: &Eui64, store: &mut S) {
        if let Some(supp) = self.get_supp(eui64) {
            storage::store_supplicant(supp, store);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gtk::NullGtkObserver;
    use q_common::storage::MemStorage;
    use q_common::types::GTK_COUNT;

    struct TestRng(u64);

    impl CryptoRng for TestRng {
        fn fill_bytes(&mut self, dest: &mut [u8]) -> Result<()> {
            for chunk in dest.chunks_mut(8) {
                self.0 ^= self.0 << 13;
                self.0 ^= self.0 >> 7;
                self.0 ^= self.0 << 17;
                let bytes = self.0.to_le_bytes();
                chunk.copy_from_slice(&bytes[..chunk.len()]);
            }
            Ok(())
        }
    }

    struct NullPort;

    impl EapolPort for NullPort {
        fn sendto_mac(&mut self, _: KmpId, _: &[u8], _: &Eui64) {}
    }

    fn setup() -> (Authenticator, TestRng, MemStorage<16, 4096>, NullGtkObserver) {
        let auth = Authenticator::new(AuthConfig::default(), Eui64::new([0xBB; 8]));
        (auth, TestRng(0x1234_5678), MemStorage::new(), NullGtkObserver)
    }

    #[test]
    fn start_installs_and_activates_first_key() {
        let (mut auth, mut rng, mut store, mut obs) = setup();
        auth.start(Ticks::ZERO, &mut rng, &mut store, &mut obs).unwrap();
        assert!(auth.slots()[0].installed());
        assert_eq!(auth.group(KeyGroup::Ffn).slot_active, 0);
        assert!(!auth.group(KeyGroup::Ffn).install_timer.stopped());
        assert!(!auth.group(KeyGroup::Ffn).activation_timer.stopped());
        assert_eq!(auth.gtkl(), 0b0001);
    }

    #[test]
    fn rotation_covers_every_slot_exactly_once() {
        let (mut auth, mut rng, mut store, mut obs) = setup();
        let mut assigned = [0u32; KEY_SLOT_COUNT];
        for round in 0..GTK_COUNT {
            let slot = if round == 0 {
                auth.ffn_group.slot_active
            } else {
                slot_next(auth.ffn_group.slot_active)
            };
            auth.install_gtk(
                Ticks::ZERO,
                KeyGroup::Ffn,
                slot,
                None,
                &mut rng,
                &mut store,
                &mut obs,
            )
            .unwrap();
            assigned[slot] += 1;
            auth.ffn_group.slot_active = slot;
        }
        assert_eq!(&assigned[..GTK_COUNT], &[1, 1, 1, 1]);

        // No two live slots hold identical key material
        for a in KeyGroup::Ffn.slots() {
            for b in KeyGroup::Ffn.slots() {
                if a != b {
                    assert_ne!(auth.slots()[a].key.as_bytes(), auth.slots()[b].key.as_bytes());
                }
            }
        }
    }

    #[test]
    fn install_rejects_duplicate_and_zero_keys() {
        let (mut auth, mut rng, mut store, mut obs) = setup();
        let key = [0x42u8; GTK_LEN];
        auth.install_gtk(Ticks::ZERO, KeyGroup::Ffn, 0, Some(&key), &mut rng, &mut store, &mut obs)
            .unwrap();
        assert_eq!(
            auth.install_gtk(Ticks::ZERO, KeyGroup::Ffn, 1, Some(&key), &mut rng, &mut store, &mut obs)
                .unwrap_err(),
            Error::InvalidKey
        );
        assert_eq!(
            auth.install_gtk(
                Ticks::ZERO,
                KeyGroup::Ffn,
                1,
                Some(&[0u8; GTK_LEN]),
                &mut rng,
                &mut store,
                &mut obs
            )
            .unwrap_err(),
            Error::InvalidKey
        );
    }

    #[test]
    fn expiration_chains_from_latest_installed_key() {
        let (mut auth, mut rng, mut store, mut obs) = setup();
        let offset_ms = GroupConfig::DEFAULT_FFN.expire_offset_ms();
        auth.install_gtk(Ticks::ZERO, KeyGroup::Ffn, 0, None, &mut rng, &mut store, &mut obs)
            .unwrap();
        auth.install_gtk(Ticks::ZERO, KeyGroup::Ffn, 1, None, &mut rng, &mut store, &mut obs)
            .unwrap();
        let first = auth.slots()[0].expiry.expires_at().unwrap();
        let second = auth.slots()[1].expiry.expires_at().unwrap();
        assert_eq!(first.as_millis(), offset_ms);
        assert_eq!(second.as_millis(), 2 * offset_ms);
    }

    #[test]
    fn zero_offset_means_infinite_lifetime() {
        let mut cfg = AuthConfig::default();
        cfg.ffn.expire_offset_s = 0;
        let mut auth = Authenticator::new(cfg, Eui64::new([0xBB; 8]));
        let mut rng = TestRng(5);
        let mut store: MemStorage<16, 4096> = MemStorage::new();
        let mut obs = NullGtkObserver;
        auth.start(Ticks::ZERO, &mut rng, &mut store, &mut obs).unwrap();
        assert!(auth.slots()[0].installed());
        assert!(auth.group(KeyGroup::Ffn).install_timer.stopped());
        assert!(auth.group(KeyGroup::Ffn).activation_timer.stopped());
    }

    #[test]
    fn activation_timer_advances_the_active_slot() {
        let (mut auth, mut rng, mut store, mut obs) = setup();
        auth.start(Ticks::ZERO, &mut rng, &mut store, &mut obs).unwrap();
        // Stage the next key so activation makes sense
        auth.install_gtk(Ticks::ZERO, KeyGroup::Ffn, 1, None, &mut rng, &mut store, &mut obs)
            .unwrap();
        let due = auth.group(KeyGroup::Ffn).activation_timer.expires_at().unwrap();
        let mut port = NullPort;
        auth.poll(due, &mut rng, &mut store, &mut obs, &mut port);
        assert_eq!(auth.group(KeyGroup::Ffn).slot_active, 1);
    }

    #[test]
    fn revocation_branch_a_destroys_non_active_keys() {
        let (mut auth, mut rng, mut store, mut obs) = setup();
        auth.start(Ticks::ZERO, &mut rng, &mut store, &mut obs).unwrap();
        auth.install_gtk(Ticks::ZERO, KeyGroup::Ffn, 1, None, &mut rng, &mut store, &mut obs)
            .unwrap();
        auth.install_gtk(Ticks::ZERO, KeyGroup::Ffn, 2, None, &mut rng, &mut store, &mut obs)
            .unwrap();

        let reduced_ms = GroupConfig::DEFAULT_FFN.expire_offset_ms()
            / u64::from(GroupConfig::DEFAULT_FFN.revocation_lifetime_reduction);
        // Fresh keys: remaining lifetime far exceeds the reduced value
        auth.revoke_gtks(Ticks::ZERO, KeyGroup::Ffn, None, &mut rng, &mut store, &mut obs)
            .unwrap();

        // Active key survives with a reduced lifetime, slot 2 was destroyed,
        // and a fresh key sits right after the active slot
        assert!(auth.slots()[0].installed());
        assert_eq!(auth.slots()[0].expiry.expires_at().unwrap().as_millis(), reduced_ms);
        assert!(auth.slots()[1].installed());
        assert!(!auth.slots()[2].installed());
    }

    #[test]
    fn revocation_branch_b_keeps_active_and_next() {
        let (mut auth, mut rng, mut store, mut obs) = setup();
        auth.start(Ticks::ZERO, &mut rng, &mut store, &mut obs).unwrap();
        auth.install_gtk(Ticks::ZERO, KeyGroup::Ffn, 1, None, &mut rng, &mut store, &mut obs)
            .unwrap();
        auth.install_gtk(Ticks::ZERO, KeyGroup::Ffn, 2, None, &mut rng, &mut store, &mut obs)
            .unwrap();

        // Move close to the active key's expiry so branch b applies
        let reduced_ms = GroupConfig::DEFAULT_FFN.expire_offset_ms()
            / u64::from(GroupConfig::DEFAULT_FFN.revocation_lifetime_reduction);
        let expiry = auth.slots()[0].expiry.expires_at().unwrap();
        let late = Ticks::from_millis(expiry.as_millis() - reduced_ms / 2);

        auth.revoke_gtks(late, KeyGroup::Ffn, None, &mut rng, &mut store, &mut obs)
            .unwrap();

        assert!(auth.slots()[0].installed(), "active key kept");
        assert!(auth.slots()[1].installed(), "next key kept with reduced lifetime");
        assert_eq!(
            auth.slots()[1].expiry.expires_at().unwrap().as_millis(),
            late.as_millis() + reduced_ms
        );
        // Slot 2 was destroyed, then immediately restaged with a fresh key
        assert!(auth.slots()[2].installed());
        assert_eq!(auth.slots()[2].frame_counter, 0);
        assert!(!auth.slots()[3].installed());
    }

    #[test]
    fn hardcoded_keys_conflict_with_restored_state() {
        let (mut auth, mut rng, mut store, mut obs) = setup();
        auth.start(Ticks::ZERO, &mut rng, &mut store, &mut obs).unwrap();

        // Second boot from the same storage with gtk_init set
        let mut cfg = AuthConfig::default();
        cfg.gtk_init[0] = Some([9u8; GTK_LEN]);
        let mut auth2 = Authenticator::new(cfg, Eui64::new([0xBB; 8]));
        assert_eq!(
            auth2.start(Ticks::from_secs(1), &mut rng, &mut store, &mut obs).unwrap_err(),
            Error::InvalidConfig
        );
    }

    #[test]
    fn init_keys_must_be_contiguous() {
        let mut cfg = AuthConfig::default();
        cfg.gtk_init[1] = Some([9u8; GTK_LEN]); // slot 0 missing
        let mut auth = Authenticator::new(cfg, Eui64::new([0xBB; 8]));
        let mut rng = TestRng(3);
        let mut store: MemStorage<16, 4096> = MemStorage::new();
        let mut obs = NullGtkObserver;
        assert_eq!(
            auth.start(Ticks::ZERO, &mut rng, &mut store, &mut obs).unwrap_err(),
            Error::InvalidConfig
        );
    }

    fn eapol_frame(packet_type: u8, body: &[u8]) -> Vec<u8, 64> {
        let mut frame = Vec::new();
        frame.push(EAPOL_PROTOCOL_VERSION).unwrap();
        frame.push(packet_type).unwrap();
        frame
            .extend_from_slice(&(body.len() as u16).to_be_bytes())
            .unwrap();
        frame.extend_from_slice(body).unwrap();
        frame
    }

    #[test]
    fn eapol_validation_drops_bad_frames() {
        let (mut auth, mut rng, mut store, _) = setup();
        let peer = Eui64::new([1; 8]);

        // Bad version
        let mut frame = eapol_frame(3, b"x");
        frame[0] = 1;
        assert_eq!(
            auth.recv_eapol(Ticks::ZERO, KmpId::Ieee8021X, &peer, &frame, &mut rng, &mut store, |_, _, _| {})
                .unwrap_err(),
            Error::InvalidEapol
        );

        // EAP payload on a handshake KMP
        let frame = eapol_frame(0, b"x");
        assert_eq!(
            auth.recv_eapol(Ticks::ZERO, KmpId::FourWayHandshake, &peer, &frame, &mut rng, &mut store, |_, _, _| {})
                .unwrap_err(),
            Error::InvalidEapol
        );

        // Truncated body
        let frame = [EAPOL_PROTOCOL_VERSION, 3, 0x00, 0x10, 0xAA];
        assert_eq!(
            auth.recv_eapol(Ticks::ZERO, KmpId::Ieee8021X, &peer, &frame, &mut rng, &mut store, |_, _, _| {})
                .unwrap_err(),
            Error::InvalidEapol
        );
    }

    #[test]
    fn garbage_supplicant_is_removed_immediately() {
        let (mut auth, mut rng, mut store, _) = setup();
        let peer = Eui64::new([1; 8]);
        let frame = eapol_frame(3, b"key-request");
        let verdict = auth
            .recv_eapol(Ticks::ZERO, KmpId::Ieee8021X, &peer, &frame, &mut rng, &mut store, |_, _, _| {})
            .unwrap();
        assert_eq!(verdict, EapolVerdict::Delivered);
        // Handler installed nothing and armed nothing: context is gone
        assert_eq!(auth.supp_count(), 0);
    }

    #[test]
    fn supplicant_with_pmk_survives() {
        let (mut auth, mut rng, mut store, _) = setup();
        let peer = Eui64::new([1; 8]);
        let frame = eapol_frame(3, b"key-request");
        auth.recv_eapol(Ticks::ZERO, KmpId::Ieee8021X, &peer, &frame, &mut rng, &mut store, |supp, _, _| {
            supp.pmk.install(Ticks::ZERO, &[7u8; 32]);
        })
        .unwrap();
        assert_eq!(auth.supp_count(), 1);
    }

    #[test]
    fn retry_exhaustion_removes_pmkless_supplicant() {
        let (mut auth, mut rng, mut store, mut obs) = setup();
        let peer = Eui64::new([1; 8]);
        let timeout = auth.config().retry_timeout_ms;
        let frame = eapol_frame(3, b"key-request");
        auth.recv_eapol(Ticks::ZERO, KmpId::Ieee8021X, &peer, &frame, &mut rng, &mut store, |supp, _, _| {
            supp.retry_arm(Ticks::ZERO, KmpId::Ieee8021X, b"eap-request", 60_000)
                .unwrap();
        })
        .unwrap();
        assert_eq!(auth.supp_count(), 1);

        let mut port = NullPort;
        let mut now = Ticks::ZERO;
        for _ in 0..EAPOL_MAX_RETRIES {
            now = now + timeout;
            auth.poll(now, &mut rng, &mut store, &mut obs, &mut port);
        }
        assert_eq!(auth.supp_count(), 0, "DoS bound enforced");
    }

    #[test]
    fn frame_counter_updates_touch_live_slots_only() {
        let (mut auth, mut rng, mut store, mut obs) = setup();
        auth.start(Ticks::ZERO, &mut rng, &mut store, &mut obs).unwrap();
        auth.update_frame_counter(0, 7777, &mut store);
        assert_eq!(auth.slots()[0].frame_counter, 7777);
        // Slot 1 holds no key: the update is ignored
        auth.update_frame_counter(1, 7777, &mut store);
        assert_eq!(auth.slots()[1].frame_counter, 0);
    }

    #[test]
    fn pmk_revocation_forgets_the_peer() {
        let (mut auth, mut rng, mut store, _) = setup();
        let peer = Eui64::new([1; 8]);
        assert_eq!(
            auth.revoke_pmk(&peer, &mut store).unwrap_err(),
            Error::UnknownSupplicant
        );
        let frame = eapol_frame(3, b"key-request");
        auth.recv_eapol(Ticks::ZERO, KmpId::Ieee8021X, &peer, &frame, &mut rng, &mut store, |supp, _, _| {
            supp.pmk.install(Ticks::ZERO, &[7u8; 32]);
        })
        .unwrap();
        assert_eq!(auth.supp_count(), 1);
        auth.revoke_pmk(&peer, &mut store).unwrap();
        assert_eq!(auth.supp_count(), 0);
    }

    #[test]
    fn tk_is_ptk_tail() {
        let (mut auth, mut rng, mut store, _) = setup();
        let peer = Eui64::new([1; 8]);
        let frame = eapol_frame(3, b"key-request");
        auth.recv_eapol(Ticks::ZERO, KmpId::Ieee8021X, &peer, &frame, &mut rng, &mut store, |supp, _, _| {
            let mut ptk = [0u8; 48];
            ptk[32..].copy_from_slice(&[0xEE; 16]);
            ptk[0] = 1; // nonzero head so the key is valid
            supp.pmk.install(Ticks::ZERO, &[7u8; 32]);
            supp.ptk.install(Ticks::ZERO, &ptk);
        })
        .unwrap();
        assert_eq!(auth.supp_tk(&peer), Some([0xEE; 16]));
    }
}
