// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Router node context
//!
//! [`Router`] owns every subsystem of the node role: neighbor table,
//! candidate parents, supplicant key state, fragment reassembly, trickle
//! timers. It routes events between them and the join state machine. It
//! is constructed explicitly and passed by reference; there is no ambient
//! global state.
//!
//! The environment (radio, DHCP, relays, status bus, storage, entropy,
//! clock) reaches the router through the [`Runtime`] bundle, so a test
//! harness can drive the full node deterministically.

use heapless::{String, Vec};

use q_auth::supplicant::SupplicantEvent;
use q_auth::{Supplicant, SupplicantConfig};
use q_common::log::LogBuffer;
use q_common::storage::StorageBackend;
use q_common::timer::{TxAlg, TxAlgConfig, TxAlgEvent};
use q_common::types::{PanId, GTK_COUNT, GTK_LEN};
use q_common::{log_info, log_warn, CryptoRng, Error, Eui64, Result, Ticks, Timer};
use q_crypto::gak::{gtk_hash, GTK_HASH_LEN};
use q_crypto::derive_gak;
use q_link::duty_cycle::DutyCycleConfig;
use q_link::etx::EtxEvent;
use q_link::neigh::ROUTING_COST_UNREACHABLE;
use q_link::{EtxConfig, NeighborTable};
use q_lowpan::{FragStatus, Reassembler, MAX_DATAGRAM_SIZE};
use q_rpl::mrhof::{self, MrhofConfig, NudProbe, ParentObserver};
use q_rpl::CandidateSet;

use crate::join::{Event, JoinState};
use crate::storage;
use crate::trickle::{Trickle, TrickleConfig, TrickleEvent};

/// Maximum network name length (bytes)
pub const NETNAME_LEN: usize = 32;

/// Collaborator seams the router core calls out through
///
/// Implementations wrap the radio/MAC, the IPv6 stack, DHCP and the relay
/// sockets. Every method is fire-and-forget; delivery failures surface
/// later as missing confirmations or timeouts.
pub trait Platform {
    /// Broadcast a PAN advertisement solicit
    fn send_pan_advert_solicit(&mut self);
    /// Broadcast a PAN advertisement
    fn send_pan_advert(&mut self);
    /// Broadcast a PAN configuration solicit (optionally for a previous PAN)
    fn send_pan_config_solicit(&mut self, prev_pan: Option<PanId>);
    /// Broadcast a PAN configuration
    fn send_pan_config(&mut self);
    /// Multicast a RPL DODAG information solicitation
    fn send_dis(&mut self);
    /// Multicast a RPL DIO advertising `rank`
    fn send_dio(&mut self, rank: u16);
    /// Send a RPL DAO No-Path to withdraw our routes
    fn send_dao_no_path(&mut self);
    /// Send a neighbor solicitation with registration lifetime `lifetime_s`
    fn send_ns_aro(&mut self, parent: &Eui64, lifetime_s: u32);
    /// Send an EAPOL key request toward the EAPOL target
    fn send_key_request(&mut self, target: &Eui64);
    /// Start soliciting a global address
    fn dhcp_start(&mut self);
    /// Stop the address client
    fn dhcp_stop(&mut self);
    /// Start relaying DHCP for child nodes
    fn dhcp_relay_start(&mut self, server: &[u8; 16], link: &[u8; 16]);
    /// Stop the DHCP relay
    fn dhcp_relay_stop(&mut self);
    /// Start relaying EAPOL for child nodes
    fn eapol_relay_start(&mut self);
    /// Stop the EAPOL relay
    fn eapol_relay_stop(&mut self);
    /// Install (`Some`) or clear (`None`) a group AES key in the radio;
    /// `index` is the 1-based key index on the air
    fn install_gak(&mut self, index: usize, gak: Option<&[u8; 16]>, frame_counter: u32);
    /// Generate unicast traffic toward `eui64` for link measurement
    fn nud_probe(&mut self, eui64: &Eui64);
}

/// Read-only status surface (IPC/D-Bus mirror)
pub trait StatusObserver {
    /// The join state changed
    fn join_state_changed(&mut self, state: JoinState);
    /// The group key set changed
    fn gaks_changed(&mut self);
    /// PAN id or PAN version changed
    fn pan_changed(&mut self, pan_id: Option<PanId>, pan_version: Option<u16>);
    /// The preferred parent changed
    fn parent_changed(&mut self, parent: Option<&Eui64>);
}

/// Environment bundle passed into every router call
pub struct Runtime<'a, P, S, R, O>
where
    P: Platform,
    S: StorageBackend,
    R: CryptoRng,
    O: StatusObserver,
{
    /// Current monotonic time
    pub now: Ticks,
    /// Radio/IPv6/DHCP collaborators
    pub platform: &'a mut P,
    /// Persistent record backend
    pub storage: &'a mut S,
    /// Entropy source
    pub rng: &'a mut R,
    /// Status bus
    pub status: &'a mut O,
}

/// Static node configuration, validated once at startup
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Wi-SUN network name
    pub netname: String<NETNAME_LEN>,
    /// Our link-layer identity
    pub eui64: Eui64,
    /// Trickle parameters shared by the discovery frames (PAS/PA/PCS/PC)
    pub disc: TrickleConfig,
    /// PAN timeout: silence from the border router for this long means the
    /// PAN is gone
    pub pan_timeout_ms: u64,
    /// PCS intervals without a PAN configuration before giving up
    pub pcs_max_intervals: u8,
    /// Penalty applied to a parent that failed us
    pub parent_deny_ms: u64,
    /// Settle time before leaving Disconnecting (lets unregistration
    /// frames reach the radio before the key index resets)
    pub unregistration_settle_ms: u64,
    /// Fragment reassembly context lifetime
    pub reasm_timeout_ms: u64,
    /// ETX estimation timings (swapped for the accelerated profile during
    /// initial parent selection)
    pub etx: EtxConfig,
    /// Parent selection parameters
    pub mrhof: MrhofConfig,
    /// DIS retransmission parameters
    pub dis: TxAlgConfig,
    /// Regulatory transmit budgets
    pub duty_cycle: DutyCycleConfig,
    /// Number of channels in the unicast schedule
    pub chan_count: u16,
}

impl RouterConfig {
    /// Profile defaults for a network named `netname`
    #[must_use]
    pub fn new(netname: &str, eui64: Eui64) -> Self {
        let mut name = String::new();
        let _ = name.push_str(netname);
        Self {
            netname: name,
            eui64,
            disc: TrickleConfig::DISCOVERY,
            pan_timeout_ms: 60 * 60 * 1000,
            pcs_max_intervals: 5,
            // The deny policy lives in the routing core; this default is
            // arbitrary and only bounds how long a penalty can last here.
            parent_deny_ms: 5 * 60 * 1000,
            unregistration_settle_ms: 2 * 1000,
            reasm_timeout_ms: 60 * 1000,
            etx: EtxConfig::DEFAULT,
            mrhof: MrhofConfig::default(),
            dis: TxAlgConfig {
                irt_s: 5,
                mrt_s: 180,
                mrc: 0,
                max_first_delay_s: 5,
            },
            duty_cycle: DutyCycleConfig::default(),
            chan_count: 1,
        }
    }

    /// Validate at startup; any violation is fatal before the node runs
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] with the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        if self.netname.is_empty() {
            return Err(Error::InvalidConfig);
        }
        if self.pan_timeout_ms == 0 || self.reasm_timeout_ms == 0 {
            return Err(Error::InvalidConfig);
        }
        if self.pcs_max_intervals == 0 || self.chan_count == 0 {
            return Err(Error::InvalidConfig);
        }
        self.duty_cycle.validate()
    }
}

struct ProbeAdapter<'a, P: Platform>(&'a mut P);

impl<P: Platform> NudProbe for ProbeAdapter<'_, P> {
    fn probe(&mut self, eui64: &Eui64) {
        self.0.nud_probe(eui64);
    }
}

#[derive(Default)]
struct ParentCapture {
    changed: bool,
    parent: Option<Eui64>,
}

impl ParentObserver for ParentCapture {
    fn on_pref_parent_change(&mut self, parent: Option<&Eui64>) {
        self.changed = true;
        self.parent = parent.copied();
    }
}

/// The router node
pub struct Router {
    pub(crate) cfg: RouterConfig,
    pub(crate) state: JoinState,
    pub(crate) last_event: Option<Event>,
    pub(crate) running: bool,

    pub(crate) pan_id: Option<PanId>,
    pub(crate) prev_pan_id: Option<PanId>,
    pub(crate) pan_version: Option<u16>,
    pub(crate) eapol_target: Eui64,

    pub(crate) neighbors: NeighborTable,
    pub(crate) etx_cfg: EtxConfig,
    pub(crate) candidates: CandidateSet,
    pub(crate) supp: Supplicant,
    pub(crate) reasm: Reassembler,

    pub(crate) pas_tkl: Trickle,
    pub(crate) pa_tkl: Trickle,
    pub(crate) pcs_tkl: Trickle,
    pub(crate) pc_tkl: Trickle,
    pub(crate) dio_tkl: Trickle,
    pub(crate) dis_txalg: TxAlg,
    pub(crate) pcs_count: u8,

    pub(crate) pan_timeout: Timer,
    pub(crate) unregistration: Timer,
    pub(crate) dao_refresh: Timer,

    pub(crate) dhcp_running: bool,
    pub(crate) dhcp_addr: Option<[u8; 16]>,
    pub(crate) dhcp_relay_running: bool,
    pub(crate) eapol_relay_running: bool,

    /// Event log, drained by the host
    pub log: LogBuffer,
}

impl core::fmt::Debug for Router {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Router")
            .field("state", &self.state)
            .field("running", &self.running)
            .finish_non_exhaustive()
    }
}

impl Router {
    /// Build a node from a validated configuration
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] from [`RouterConfig::validate`].
    pub fn new(cfg: RouterConfig) -> Result<Self> {
        cfg.validate()?;
        let supp = Supplicant::new(SupplicantConfig::new(cfg.eui64));
        let reasm = Reassembler::new(cfg.reasm_timeout_ms);
        let dis = cfg.dis;
        let etx = cfg.etx;
        Ok(Self {
            cfg,
            state: JoinState::Discovery,
            last_event: None,
            running: false,
            pan_id: None,
            prev_pan_id: None,
            pan_version: None,
            eapol_target: Eui64::BROADCAST,
            neighbors: NeighborTable::new(),
            etx_cfg: etx,
            candidates: CandidateSet::new(),
            supp,
            reasm,
            pas_tkl: Trickle::new(),
            pa_tkl: Trickle::new(),
            pcs_tkl: Trickle::new(),
            pc_tkl: Trickle::new(),
            dio_tkl: Trickle::new(),
            dis_txalg: TxAlg::new(dis),
            pcs_count: 0,
            pan_timeout: Timer::new(),
            unregistration: Timer::new(),
            dao_refresh: Timer::new(),
            dhcp_running: false,
            dhcp_addr: None,
            dhcp_relay_running: false,
            eapol_relay_running: false,
            log: LogBuffer::new(),
        })
    }

    /// Current join state
    #[must_use]
    pub const fn state(&self) -> JoinState {
        self.state
    }

    /// The node keeps running until a disconnect completes
    #[must_use]
    pub const fn running(&self) -> bool {
        self.running
    }

    /// Current PAN, once one is selected
    #[must_use]
    pub const fn pan_id(&self) -> Option<PanId> {
        self.pan_id
    }

    /// Current PAN version, once configuration was received
    #[must_use]
    pub const fn pan_version(&self) -> Option<u16> {
        self.pan_version
    }

    /// Preferred parent, if any
    #[must_use]
    pub fn pref_parent(&self) -> Option<Eui64> {
        self.candidates.pref_parent_eui64()
    }

    /// Where EAPOL frames are directed
    #[must_use]
    pub const fn eapol_target(&self) -> &Eui64 {
        &self.eapol_target
    }

    /// Regulatory compliance level for the reported TX duration
    #[must_use]
    pub fn duty_cycle_level(&self, tx_duration_ms: u32) -> usize {
        self.cfg.duty_cycle.level(tx_duration_ms, self.cfg.chan_count)
    }

    /// Bring the node up: restore identity and keys, then enter Reconnect
    /// (previous PAN and live keys on record) or Discovery
    ///
    /// # Errors
    ///
    /// Configuration and identity-mismatch errors; both are fatal at
    /// startup.
    pub fn start<P, S, R, O>(&mut self, rt: &mut Runtime<'_, P, S, R, O>) -> Result<()>
    where
        P: Platform,
        S: StorageBackend,
        R: CryptoRng,
        O: StatusObserver,
    {
        let pan = match storage::load_network_config(rt.storage, &self.cfg.netname) {
            Ok(pan) => pan,
            Err(Error::NotFound) => None,
            Err(e) => return Err(e),
        };
        let mut sink = q_auth::gtk::NullGtkObserver;
        let restored = self.supp.load(rt.storage, rt.now, &mut sink)?;

        self.running = true;
        if let (Some(pan), true, true) = (pan, restored, self.supp.has_gtk()) {
            // Reinstall the surviving keys into the radio
            for slot in 0..GTK_COUNT {
                if self.supp.gtks[slot].installed() {
                    let gak = derive_gak(self.cfg.netname.as_bytes(), self.supp.gtks[slot].key.as_bytes());
                    rt.platform
                        .install_gak(slot + 1, Some(&gak), self.supp.gtks[slot].frame_counter);
                }
            }
            self.pan_id = Some(pan);
            self.state = JoinState::Reconnect;
            self.enter_reconnect(rt);
        } else {
            self.state = JoinState::Discovery;
            self.enter_discovery(rt);
        }
        rt.status.join_state_changed(self.state);
        Ok(())
    }

    pub(crate) fn set_pan<P, S, R, O>(&mut self, rt: &mut Runtime<'_, P, S, R, O>, pan_id: Option<PanId>)
    where
        P: Platform,
        S: StorageBackend,
        R: CryptoRng,
        O: StatusObserver,
    {
        self.pan_id = pan_id;
        rt.status.pan_changed(self.pan_id, self.pan_version);
        if pan_id.is_some() {
            storage::store_network_config(rt.storage, &self.cfg.netname, pan_id);
        }
    }

    pub(crate) fn set_pan_version<P, S, R, O>(
        &mut self,
        rt: &mut Runtime<'_, P, S, R, O>,
        version: Option<u16>,
    ) where
        P: Platform,
        S: StorageBackend,
        R: CryptoRng,
        O: StatusObserver,
    {
        self.pan_version = version;
        rt.status.pan_changed(self.pan_id, self.pan_version);
    }

    pub(crate) fn pan_timeout_update(&mut self, now: Ticks) {
        self.pan_timeout.start_rel(now, self.cfg.pan_timeout_ms);
    }

    // =========================================================================
    // Inbound events
    // =========================================================================

    /// A PAN advertisement arrived
    pub fn on_pan_advert<P, S, R, O>(
        &mut self,
        rt: &mut Runtime<'_, P, S, R, O>,
        src: Eui64,
        pan: PanId,
        routing_cost: u16,
        rsl_dbm: f32,
    ) where
        P: Platform,
        S: StorageBackend,
        R: CryptoRng,
        O: StatusObserver,
    {
        let live = self.supp.live_slots();
        if let Ok(neigh) = self.neighbors.fetch(&src, rt.now, &live) {
            neigh.routing_cost = routing_cost;
            neigh.record_rsl_in(rsl_dbm);
            neigh.last_heard = rt.now;
        }
        // A node advertising no route to the border router is not a way in
        if routing_cost == ROUTING_COST_UNREACHABLE {
            return;
        }
        match self.state {
            JoinState::Reconnect if self.prev_pan_id == Some(pan) => {
                self.set_pan(rt, Some(pan));
                self.dispatch(rt, Event::PaFromPrevPan);
            }
            JoinState::Discovery | JoinState::Reconnect | JoinState::Authenticate
                if self.pan_id != Some(pan) =>
            {
                self.set_pan(rt, Some(pan));
                self.eapol_target = src;
                self.dispatch(rt, Event::PaFromNewPan);
            }
            _ => {}
        }
    }

    /// A PAN configuration arrived
    ///
    /// Only configurations from the PAN we are joining (or rejoining) are
    /// meaningful; others are recorded as neighbor activity and dropped.
    pub fn on_pan_config<P, S, R, O>(
        &mut self,
        rt: &mut Runtime<'_, P, S, R, O>,
        src: Eui64,
        pan: PanId,
        pan_version: u16,
        rsl_dbm: f32,
    ) where
        P: Platform,
        S: StorageBackend,
        R: CryptoRng,
        O: StatusObserver,
    {
        let live = self.supp.live_slots();
        if let Ok(neigh) = self.neighbors.fetch(&src, rt.now, &live) {
            neigh.record_rsl_in(rsl_dbm);
            neigh.last_heard = rt.now;
        }
        match self.state {
            JoinState::Configure if self.pan_id == Some(pan) => {
                self.pan_timeout_update(rt.now);
                self.set_pan_version(rt, Some(pan_version));
                self.dispatch(rt, Event::PcRx);
            }
            JoinState::Reconnect if self.prev_pan_id == Some(pan) => {
                self.pan_timeout_update(rt.now);
                self.set_pan(rt, Some(pan));
                self.set_pan_version(rt, Some(pan_version));
                self.dispatch(rt, Event::PcRx);
            }
            _ if self.pan_id == Some(pan) => {
                self.pan_timeout_update(rt.now);
                if self.pan_version != Some(pan_version) {
                    self.set_pan_version(rt, Some(pan_version));
                }
            }
            _ => {}
        }
    }

    /// The MAC confirmed a unicast transmission toward `dst`
    pub fn on_tx_confirm<P, S, R, O>(
        &mut self,
        rt: &mut Runtime<'_, P, S, R, O>,
        dst: &Eui64,
        tx_count: u32,
        acked: bool,
    ) where
        P: Platform,
        S: StorageBackend,
        R: CryptoRng,
        O: StatusObserver,
    {
        if let Some(neigh) = self.neighbors.get_mut(dst) {
            neigh.etx.update(rt.now, tx_count, acked);
        }
    }

    /// A neighbor reported the signal level it sees from us
    pub fn on_rsl_report(&mut self, now: Ticks, src: &Eui64, rsl_out_dbm: f32) {
        if let Some(neigh) = self.neighbors.get_mut(src) {
            neigh.record_rsl_out(rsl_out_dbm);
            neigh.last_heard = now;
        }
    }

    /// A DIO arrived from `src`
    pub fn on_dio<P, S, R, O>(
        &mut self,
        rt: &mut Runtime<'_, P, S, R, O>,
        src: Eui64,
        rank: u16,
        dodag_id: [u8; 16],
        config: q_rpl::DodagConfig,
    ) where
        P: Platform,
        S: StorageBackend,
        R: CryptoRng,
        O: StatusObserver,
    {
        let Ok(cand) = self.candidates.fetch(&src) else {
            return;
        };
        cand.dio_rank = rank;
        cand.dodag_id = dodag_id;
        cand.config = config;
        self.update_parents(rt);
    }

    /// Our DAO was acknowledged by the preferred parent
    pub fn on_dao_ack<P, S, R, O>(&mut self, rt: &mut Runtime<'_, P, S, R, O>)
    where
        P: Platform,
        S: StorageBackend,
        R: CryptoRng,
        O: StatusObserver,
    {
        let Some(parent) = self.candidates.pref_parent_eui64() else {
            return;
        };
        if let Some(cand) = self.candidates.get_mut(&parent) {
            cand.dao_ack_received = true;
        }
        // The routing layer refreshes DAOs periodically; the armed timer
        // doubles as the "registration is current" liveness signal
        self.dao_refresh.start_rel(rt.now, self.cfg.pan_timeout_ms / 2);
        self.dispatch(rt, Event::RoutingSuccess);
    }

    /// The DHCP client acquired or lost our global address
    pub fn on_dhcp_addr<P, S, R, O>(
        &mut self,
        rt: &mut Runtime<'_, P, S, R, O>,
        addr: Option<[u8; 16]>,
    ) where
        P: Platform,
        S: StorageBackend,
        R: CryptoRng,
        O: StatusObserver,
    {
        self.dhcp_addr = addr;
        if addr.is_some() {
            // Probe the parent so registration can proceed on a live link
            if let Some(parent) = self.candidates.pref_parent_eui64() {
                rt.platform.nud_probe(&parent);
            }
        }
    }

    /// The DHCP solicit retries were exhausted: penalize the parent that
    /// led us here and retry through the next one
    pub fn on_dhcp_failure<P, S, R, O>(&mut self, rt: &mut Runtime<'_, P, S, R, O>)
    where
        P: Platform,
        S: StorageBackend,
        R: CryptoRng,
        O: StatusObserver,
    {
        let Some(parent) = self.candidates.pref_parent_eui64() else {
            return;
        };
        self.candidates.deny(&parent, rt.now + self.cfg.parent_deny_ms);
        self.update_parents(rt);
        if self.candidates.pref_parent_eui64().is_some() {
            rt.platform.dhcp_start();
        }
    }

    /// IPv6 traffic arrived from `src` (global address)
    ///
    /// Anything from the DODAG root proves the PAN is alive.
    pub fn note_pan_traffic(&mut self, now: Ticks, src: &[u8; 16]) {
        let Some(parent) = self.candidates.pref_parent() else {
            return;
        };
        if parent.dodag_id == *src {
            self.pan_timeout_update(now);
        }
    }

    /// Feed a received 6LoWPAN fragment; `Some` is a completed datagram
    ///
    /// # Errors
    ///
    /// Malformed fragments propagate after being logged; the caller drops
    /// the frame and carries on.
    pub fn recv_fragment(
        &mut self,
        now: Ticks,
        frame: &[u8],
        src: &Eui64,
        dst: &Eui64,
    ) -> Result<Option<Vec<u8, MAX_DATAGRAM_SIZE>>> {
        match self.reasm.recv(now, frame, src, dst) {
            Ok(FragStatus::Complete(payload)) => Ok(Some(payload)),
            Ok(FragStatus::Pending) => Ok(None),
            Err(e) => {
                log_warn!(self.log, now, "6lowpan", "drop fragment from {src}: {e}");
                Err(e)
            }
        }
    }

    /// The external EAPOL engine installed a group key
    pub fn install_gtk<P, S, R, O>(
        &mut self,
        rt: &mut Runtime<'_, P, S, R, O>,
        slot: usize,
        key: &[u8; GTK_LEN],
        frame_counter: u32,
        lifetime_ms: u64,
    ) where
        P: Platform,
        S: StorageBackend,
        R: CryptoRng,
        O: StatusObserver,
    {
        let mut sink = q_auth::gtk::NullGtkObserver;
        self.supp
            .install_gtk(rt.now, slot, key, frame_counter, lifetime_ms, &mut sink);
        self.supp.store(rt.storage, true);
        if slot >= GTK_COUNT {
            // TODO: install LGTKs once LFN broadcast schedules are supported
            return;
        }
        self.neighbors.set_frame_counter_floor(slot, 0);
        let gak = derive_gak(self.cfg.netname.as_bytes(), key);
        log_info!(self.log, rt.now, "sec", "install gak[{}]", slot + 1);
        rt.platform.install_gak(slot + 1, Some(&gak), frame_counter);
        rt.status.gaks_changed();
        self.dispatch(rt, Event::AuthSuccess);
    }

    /// The external EAPOL engine revoked a group key
    pub fn remove_gtk<P, S, R, O>(&mut self, rt: &mut Runtime<'_, P, S, R, O>, slot: usize)
    where
        P: Platform,
        S: StorageBackend,
        R: CryptoRng,
        O: StatusObserver,
    {
        let mut sink = q_auth::gtk::NullGtkObserver;
        self.supp.remove_gtk(slot, &mut sink);
        self.supp.store(rt.storage, true);
        if slot >= GTK_COUNT {
            return;
        }
        self.neighbors.set_frame_counter_floor(slot, u32::MAX);
        rt.platform.install_gak(slot + 1, None, 0);
        rt.status.gaks_changed();
    }

    /// Compare the GTK hashes advertised in a PAN configuration against
    /// our key set
    ///
    /// A mismatch means the border router rotated keys while we were not
    /// listening; the stale slots cannot decrypt traffic anymore, so a
    /// fresh key request is issued. An all-zero advertised hash marks an
    /// empty slot.
    pub fn check_gtk_hash<P, S, R, O>(
        &mut self,
        rt: &mut Runtime<'_, P, S, R, O>,
        advertised: &[[u8; GTK_HASH_LEN]; GTK_COUNT],
    ) where
        P: Platform,
        S: StorageBackend,
        R: CryptoRng,
        O: StatusObserver,
    {
        for (slot, adv) in advertised.iter().enumerate() {
            let matches = if self.supp.gtks[slot].installed() {
                gtk_hash(self.supp.gtks[slot].key.as_bytes()) == *adv
            } else {
                *adv == [0u8; GTK_HASH_LEN]
            };
            if matches {
                continue;
            }
            if self.supp.key_request_in_flight() {
                return;
            }
            log_info!(self.log, rt.now, "sec", "gtkhash mismatch on gtk[{slot}]");
            self.supp.start_key_request(rt.now, rt.rng);
            return;
        }
    }

    /// The external EAPOL engine reports authentication failure
    pub fn on_auth_failure<P, S, R, O>(&mut self, rt: &mut Runtime<'_, P, S, R, O>)
    where
        P: Platform,
        S: StorageBackend,
        R: CryptoRng,
        O: StatusObserver,
    {
        if let Some(neigh) = self.neighbors.get_mut(&self.eapol_target) {
            // Keep this node out of target selection until it proves itself
            neigh.routing_cost = ROUTING_COST_UNREACHABLE;
        }
        let parent = self.candidates.pref_parent_eui64();
        if let (Some(parent), true) = (parent, self.supp.has_gtk()) {
            // With live keys and a parent, penalize the parent and let the
            // next PAN configuration trigger a fresh key request
            self.candidates.deny(&parent, rt.now + self.cfg.parent_deny_ms);
            self.update_parents(rt);
        } else {
            self.dispatch(rt, Event::AuthFail);
        }
    }

    // =========================================================================
    // Parent selection
    // =========================================================================

    pub(crate) fn update_parents<P, S, R, O>(&mut self, rt: &mut Runtime<'_, P, S, R, O>)
    where
        P: Platform,
        S: StorageBackend,
        R: CryptoRng,
        O: StatusObserver,
    {
        let mut probe = ProbeAdapter(&mut *rt.platform);
        let mut capture = ParentCapture::default();
        mrhof::select_parent(
            &self.cfg.mrhof,
            rt.now,
            &self.neighbors,
            &mut self.candidates,
            &mut probe,
            &mut capture,
        );
        if !capture.changed {
            return;
        }
        rt.status.parent_changed(capture.parent.as_ref());
        match capture.parent {
            Some(parent) => {
                log_info!(self.log, rt.now, "rpl", "parent select {parent}");
                self.dispatch(rt, Event::RplNewPrefParent);
                // The preferred parent is also the EAPOL target from now on
                if self.eapol_target != parent {
                    self.eapol_target = parent;
                }
            }
            None => {
                log_info!(self.log, rt.now, "rpl", "parent select none");
                self.eapol_target = Eui64::BROADCAST;
                let mut probe = ProbeAdapter(&mut *rt.platform);
                if mrhof::has_candidates(
                    &self.cfg.mrhof,
                    rt.now,
                    &self.neighbors,
                    &mut self.candidates,
                    &mut probe,
                ) {
                    self.dispatch(rt, Event::RplPrefLost);
                } else {
                    self.dispatch(rt, Event::RplNoCandidate);
                }
            }
        }
    }

    /// Rank we would currently advertise
    #[must_use]
    pub fn rank(&self) -> u16 {
        mrhof::rank(&self.cfg.mrhof, &self.neighbors, &self.candidates)
    }

    // =========================================================================
    // Timer pump
    // =========================================================================

    /// Drive every cooperative timer; call once per poll-loop iteration
    pub fn poll<P, S, R, O>(&mut self, rt: &mut Runtime<'_, P, S, R, O>)
    where
        P: Platform,
        S: StorageBackend,
        R: CryptoRng,
        O: StatusObserver,
    {
        let now = rt.now;
        let disc = self.cfg.disc;

        while let Some(ev) = self.pas_tkl.poll(now, rt.rng, &disc) {
            if ev == TrickleEvent::Transmit {
                rt.platform.send_pan_advert_solicit();
            }
        }
        while let Some(ev) = self.pa_tkl.poll(now, rt.rng, &disc) {
            if ev == TrickleEvent::Transmit {
                rt.platform.send_pan_advert();
            }
        }
        while let Some(ev) = self.pcs_tkl.poll(now, rt.rng, &disc) {
            match ev {
                TrickleEvent::Transmit => rt.platform.send_pan_config_solicit(self.prev_pan_id),
                TrickleEvent::IntervalDone => {
                    self.pcs_count = self.pcs_count.saturating_add(1);
                    if self.pcs_count >= self.cfg.pcs_max_intervals {
                        self.dispatch(rt, Event::PcTimeout);
                        break;
                    }
                }
            }
        }
        while let Some(ev) = self.pc_tkl.poll(now, rt.rng, &disc) {
            if ev == TrickleEvent::Transmit {
                rt.platform.send_pan_config();
            }
        }
        while let Some(ev) = self.dio_tkl.poll(now, rt.rng, &disc) {
            if ev == TrickleEvent::Transmit {
                let rank = self.rank();
                self.candidates.note_advertised_rank(rank);
                rt.platform.send_dio(rank);
            }
        }

        match self.dis_txalg.poll(now, rt.rng) {
            Some(TxAlgEvent::Transmit) => rt.platform.send_dis(),
            Some(TxAlgEvent::Failure) | None => {}
        }

        match self.supp.poll(now, rt.rng) {
            Some(SupplicantEvent::SendKeyRequest) => {
                let target = self.eapol_target;
                log_info!(self.log, now, "sec", "key request to {target}");
                rt.platform.send_key_request(&target);
            }
            Some(SupplicantEvent::Failure) => {
                log_warn!(self.log, now, "sec", "key request retries exhausted");
                self.on_auth_failure(rt);
            }
            Some(SupplicantEvent::GtkExpired(slot)) => {
                log_info!(self.log, now, "sec", "gtk[{slot}] expired");
                self.remove_gtk(rt, slot);
            }
            None => {}
        }

        // ETX epochs: collect first, then react, so parent selection sees a
        // settled neighbor table
        let mut etx_events: Vec<(Eui64, EtxEvent), 8> = Vec::new();
        let etx_cfg = self.etx_cfg;
        for neigh in self.neighbors.iter_mut() {
            if let Some(ev) = neigh.etx.poll(now, &etx_cfg) {
                if etx_events.push((neigh.eui64, ev)).is_err() {
                    break;
                }
            }
        }
        for (eui64, ev) in &etx_events {
            match ev {
                EtxEvent::Updated => {
                    if self.candidates.get(eui64).is_some() {
                        self.update_parents(rt);
                    }
                }
                EtxEvent::Outdated => rt.platform.nud_probe(eui64),
            }
        }

        while let Some(report) = self.reasm.poll(now) {
            log_warn!(
                self.log,
                now,
                "6lowpan",
                "reasm drop src={} tag={:#06x} len={}/{}",
                report.src,
                report.tag,
                report.received,
                report.len
            );
        }

        if self.pan_timeout.poll(now) {
            log_warn!(self.log, now, "join", "pan timeout");
            self.dispatch(rt, Event::PanTimeout);
        }

        if self.unregistration.poll(now) {
            // Deferred transition out of Disconnecting, now that the
            // unregistration frames had time to leave
            if let Some(event) = self.last_event {
                self.dispatch(rt, event);
            }
        }
    }
}
