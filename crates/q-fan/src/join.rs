// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Join state machine
//!
//! Eight states from cold start to operational routing, driven by a static
//! per-state transition table. Events with no entry in the current state's
//! table are ignored: no transition, no action. A matched event runs the
//! outgoing state's exit action, switches, runs the incoming state's enter
//! action, then notifies the status bus.
//!
//! Enter actions assert their preconditions. The transition graph is
//! supposed to make a violation unreachable, so a failure here is a
//! programming defect, not a runtime condition to recover from.

use q_common::storage::StorageBackend;
use q_common::{log_info, CryptoRng};
use q_rpl::RANK_INFINITE;

use crate::node::{Platform, Router, Runtime, StatusObserver};

/// Join states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinState {
    /// Join state 1: select a PAN
    Discovery,
    /// Join state 2: authenticate and acquire group keys
    Authenticate,
    /// Join state 3: acquire the PAN configuration
    Configure,
    /// Join state 3 variant: rejoin a previously known PAN
    Reconnect,
    /// Join state 4: choose a RPL parent
    RplParent,
    /// Join state 4 variant: acquire an address and register routes
    Routing,
    /// Join state 5: fully operational
    Operational,
    /// Graceful teardown / fallback
    Disconnecting,
}

impl JoinState {
    /// FAN join state number exposed on the status bus (1..=6)
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Discovery => 1,
            Self::Authenticate => 2,
            Self::Configure | Self::Reconnect => 3,
            Self::RplParent | Self::Routing => 4,
            Self::Operational => 5,
            Self::Disconnecting => 6,
        }
    }

    /// Name for log lines
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Authenticate => "authenticate",
            Self::Configure => "configure",
            Self::Reconnect => "reconnect",
            Self::RplParent => "rpl-parent",
            Self::Routing => "routing",
            Self::Operational => "operational",
            Self::Disconnecting => "disconnecting",
        }
    }
}

/// Events fed into the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// PAN advertisement from a PAN we do not belong to
    PaFromNewPan,
    /// PAN advertisement from the PAN we were connected to before
    PaFromPrevPan,
    /// PAN configuration received
    PcRx,
    /// No PAN configuration within the solicit budget
    PcTimeout,
    /// Group keys acquired
    AuthSuccess,
    /// Authentication failed
    AuthFail,
    /// A preferred parent was selected
    RplNewPrefParent,
    /// Address acquired and DAO acknowledged
    RoutingSuccess,
    /// Nothing heard from the border router for the PAN timeout
    PanTimeout,
    /// Preferred parent lost, other candidates remain
    RplPrefLost,
    /// Preferred parent lost, no candidate remains
    RplNoCandidate,
    /// Operator-requested shutdown
    Disconnect,
}

const DISCOVERY: &[(Event, JoinState)] = &[
    (Event::PaFromNewPan, JoinState::Authenticate),
    (Event::Disconnect, JoinState::Disconnecting),
];

const RECONNECT: &[(Event, JoinState)] = &[
    (Event::PcRx, JoinState::RplParent),
    (Event::PcTimeout, JoinState::Discovery),
    (Event::PaFromPrevPan, JoinState::Configure),
    (Event::PaFromNewPan, JoinState::Authenticate),
    (Event::AuthFail, JoinState::Discovery),
    (Event::Disconnect, JoinState::Disconnecting),
];

const AUTHENTICATE: &[(Event, JoinState)] = &[
    (Event::AuthSuccess, JoinState::Configure),
    (Event::AuthFail, JoinState::Discovery),
    (Event::PaFromNewPan, JoinState::Authenticate),
    (Event::Disconnect, JoinState::Disconnecting),
];

const CONFIGURE: &[(Event, JoinState)] = &[
    (Event::PcRx, JoinState::RplParent),
    (Event::PcTimeout, JoinState::Reconnect),
    (Event::AuthFail, JoinState::Discovery),
    (Event::Disconnect, JoinState::Disconnecting),
];

const RPL_PARENT: &[(Event, JoinState)] = &[
    (Event::RplNewPrefParent, JoinState::Routing),
    (Event::PanTimeout, JoinState::Reconnect),
    (Event::AuthFail, JoinState::Discovery),
    (Event::Disconnect, JoinState::Disconnecting),
];

const ROUTING: &[(Event, JoinState)] = &[
    (Event::RoutingSuccess, JoinState::Operational),
    (Event::PanTimeout, JoinState::Disconnecting),
    (Event::RplPrefLost, JoinState::Disconnecting),
    (Event::RplNoCandidate, JoinState::Disconnecting),
    (Event::AuthFail, JoinState::Disconnecting),
    (Event::Disconnect, JoinState::Disconnecting),
];

const OPERATIONAL: &[(Event, JoinState)] = &[
    (Event::PanTimeout, JoinState::Disconnecting),
    (Event::RplPrefLost, JoinState::Disconnecting),
    (Event::RplNoCandidate, JoinState::Disconnecting),
    (Event::AuthFail, JoinState::Disconnecting),
    (Event::Disconnect, JoinState::Disconnecting),
];

const DISCONNECTING: &[(Event, JoinState)] = &[
    (Event::PanTimeout, JoinState::Reconnect),
    (Event::RplPrefLost, JoinState::RplParent),
    (Event::RplNoCandidate, JoinState::Reconnect),
    (Event::AuthFail, JoinState::Discovery),
    // Self-transition so the exit action can stop the node
    (Event::Disconnect, JoinState::Disconnecting),
];

const fn transitions(state: JoinState) -> &'static [(Event, JoinState)] {
    match state {
        JoinState::Discovery => DISCOVERY,
        JoinState::Reconnect => RECONNECT,
        JoinState::Authenticate => AUTHENTICATE,
        JoinState::Configure => CONFIGURE,
        JoinState::RplParent => RPL_PARENT,
        JoinState::Routing => ROUTING,
        JoinState::Operational => OPERATIONAL,
        JoinState::Disconnecting => DISCONNECTING,
    }
}

/// Next state for a (state, event) pair, a pure function of the table
#[must_use]
pub fn next_state(state: JoinState, event: Event) -> Option<JoinState> {
    transitions(state)
        .iter()
        .find(|(e, _)| *e == event)
        .map(|(_, next)| *next)
}

impl Router {
    /// Feed one event into the state machine
    pub fn dispatch<P, S, R, O>(&mut self, rt: &mut Runtime<'_, P, S, R, O>, event: Event)
    where
        P: Platform,
        S: StorageBackend,
        R: CryptoRng,
        O: StatusObserver,
    {
        let Some(next) = next_state(self.state, event) else {
            return;
        };
        self.last_event = Some(event);

        match self.state {
            JoinState::Discovery => self.exit_discovery(),
            JoinState::Reconnect => self.exit_reconnect(),
            JoinState::Configure => self.exit_configure(),
            JoinState::RplParent => self.exit_rpl_parent(),
            JoinState::Operational => self.exit_operational(rt),
            JoinState::Disconnecting => self.exit_disconnecting(),
            JoinState::Authenticate | JoinState::Routing => {}
        }

        self.state = next;

        match self.state {
            JoinState::Discovery => self.enter_discovery(rt),
            JoinState::Reconnect => self.enter_reconnect(rt),
            JoinState::Authenticate => self.enter_authenticate(rt),
            JoinState::Configure => self.enter_configure(rt),
            JoinState::RplParent => self.enter_rpl_parent(rt),
            JoinState::Routing => self.enter_routing(rt),
            JoinState::Operational => self.enter_operational(rt),
            JoinState::Disconnecting => self.enter_disconnecting(rt),
        }
        rt.status.join_state_changed(self.state);
    }

    fn rpl_stop(&mut self) {
        self.dis_txalg.stop();
        self.dio_tkl.stop();
        self.dao_refresh.stop();
        self.candidates.clear();
    }

    // Join state 1: a fresh start. Every trace of the previous network is
    // dropped before soliciting advertisements
    pub(crate) fn enter_discovery<P, S, R, O>(&mut self, rt: &mut Runtime<'_, P, S, R, O>)
    where
        P: Platform,
        S: StorageBackend,
        R: CryptoRng,
        O: StatusObserver,
    {
        crate::storage::clear_network_config(rt.storage);
        q_auth::storage::clear_node_keys(rt.storage);
        self.set_pan(rt, None);
        self.prev_pan_id = None;
        self.supp.reset();
        self.eapol_target = q_common::Eui64::BROADCAST;
        self.set_pan_version(rt, None);
        rt.platform.dhcp_stop();
        self.dhcp_running = false;
        self.dhcp_addr = None;
        self.rpl_stop();
        self.pan_timeout.stop();
        self.neighbors.clear();
        self.etx_cfg = self.cfg.etx;
        log_info!(self.log, rt.now, "join", "join state 1: select pan");
        self.pas_tkl.start(rt.now, rt.rng, &self.cfg.disc);
    }

    fn exit_discovery(&mut self) {
        assert!(!self.pas_tkl.stopped());
        self.pas_tkl.stop();
    }

    // Join state 3 variant: PAN id and GTKs are known from storage, so try
    // to pick up where we left, while remaining open to a better PAN
    pub(crate) fn enter_reconnect<P, S, R, O>(&mut self, rt: &mut Runtime<'_, P, S, R, O>)
    where
        P: Platform,
        S: StorageBackend,
        R: CryptoRng,
        O: StatusObserver,
    {
        assert!(self.pan_id.is_some());
        assert!(self.supp.has_gtk());

        log_info!(self.log, rt.now, "join", "join state 3: reconnect");
        // prev_pan_id drives PCS transmission and PA matching; pan_id is
        // cleared so advertisements from a new PAN are acceptable
        self.prev_pan_id = self.pan_id;
        self.set_pan(rt, None);
        self.eapol_target = q_common::Eui64::BROADCAST;
        self.supp.stop_key_request();
        self.set_pan_version(rt, None);
        self.pcs_count = 0;
        rt.platform.dhcp_stop();
        self.dhcp_running = false;
        self.dhcp_addr = None;
        self.rpl_stop();
        self.pan_timeout.stop();
        self.etx_cfg = self.cfg.etx;

        self.pas_tkl.start(rt.now, rt.rng, &self.cfg.disc);
        self.pcs_tkl.start(rt.now, rt.rng, &self.cfg.disc);
        rt.platform.send_pan_advert_solicit();
        rt.platform.send_pan_config_solicit(self.prev_pan_id);
    }

    fn exit_reconnect(&mut self) {
        self.pas_tkl.stop();
        self.pcs_tkl.stop();
    }

    // Join state 2
    pub(crate) fn enter_authenticate<P, S, R, O>(&mut self, rt: &mut Runtime<'_, P, S, R, O>)
    where
        P: Platform,
        S: StorageBackend,
        R: CryptoRng,
        O: StatusObserver,
    {
        assert!(self.pan_id.is_some());

        // A stale GTK liveness mask must not leak into the new PAN
        self.supp.reset();
        log_info!(self.log, rt.now, "join", "join state 2: authenticate");
        self.supp.start_key_request(rt.now, rt.rng);
    }

    // Join state 3
    pub(crate) fn enter_configure<P, S, R, O>(&mut self, rt: &mut Runtime<'_, P, S, R, O>)
    where
        P: Platform,
        S: StorageBackend,
        R: CryptoRng,
        O: StatusObserver,
    {
        assert!(self.pan_id.is_some());
        assert!(self.supp.has_gtk());

        self.set_pan_version(rt, None);
        self.pcs_count = 0;
        log_info!(self.log, rt.now, "join", "join state 3: acquire pan config");
        self.pcs_tkl.start(rt.now, rt.rng, &self.cfg.disc);
    }

    fn exit_configure(&mut self) {
        assert!(!self.pcs_tkl.stopped());
        self.pcs_tkl.stop();
    }

    // Join state 4, first half: parent selection
    pub(crate) fn enter_rpl_parent<P, S, R, O>(&mut self, rt: &mut Runtime<'_, P, S, R, O>)
    where
        P: Platform,
        S: StorageBackend,
        R: CryptoRng,
        O: StatusObserver,
    {
        assert!(self.pan_id.is_some());
        assert!(self.supp.has_gtk());
        assert!(self.pan_version.is_some());
        assert!(!self.pan_timeout.stopped());

        log_info!(self.log, rt.now, "join", "join state 4: choose parent");
        rt.platform.dhcp_stop();
        self.dhcp_running = false;
        if self.last_event == Some(Event::PcRx) {
            // Unicast frames sent before the broadcast schedule was known
            // collided with broadcast slots and inflated retry counts; those
            // measurements would bias parent selection
            self.neighbors.reset_etx();
            self.etx_cfg = q_link::EtxConfig::ACCELERATED;
        }
        self.dis_txalg.start(rt.now, rt.rng);
    }

    fn exit_rpl_parent(&mut self) {
        assert!(!self.dis_txalg.stopped());
        self.dis_txalg.stop();
        self.etx_cfg = self.cfg.etx;
    }

    // Join state 4, second half: address acquisition and registration
    pub(crate) fn enter_routing<P, S, R, O>(&mut self, rt: &mut Runtime<'_, P, S, R, O>)
    where
        P: Platform,
        S: StorageBackend,
        R: CryptoRng,
        O: StatusObserver,
    {
        assert!(self.pan_id.is_some());
        assert!(self.supp.has_gtk());
        assert!(self.pan_version.is_some());
        assert!(self.candidates.pref_parent().is_some());
        assert!(!self.dhcp_running);

        log_info!(self.log, rt.now, "join", "join state 4: configure routing");
        rt.platform.dhcp_start();
        self.dhcp_running = true;
    }

    // Join state 5
    pub(crate) fn enter_operational<P, S, R, O>(&mut self, rt: &mut Runtime<'_, P, S, R, O>)
    where
        P: Platform,
        S: StorageBackend,
        R: CryptoRng,
        O: StatusObserver,
    {
        let parent = self.candidates.pref_parent().expect("parent required");
        assert!(self.pan_id.is_some());
        assert!(self.supp.has_gtk());
        assert!(self.pan_version.is_some());
        assert!(self.dhcp_running);
        assert!(self.dhcp_addr.is_some());
        assert!(parent.dao_ack_received);
        assert!(!self.dao_refresh.stopped());
        assert!(!self.eapol_relay_running);

        let server = parent.dodag_id;
        log_info!(self.log, rt.now, "join", "join state 5: operational");
        self.dio_tkl.start(rt.now, rt.rng, &self.cfg.disc);
        rt.platform.eapol_relay_start();
        self.eapol_relay_running = true;
        self.pa_tkl.start(rt.now, rt.rng, &self.cfg.disc);
        self.pc_tkl.start(rt.now, rt.rng, &self.cfg.disc);
        let link = self.dhcp_addr.unwrap_or([0; 16]);
        rt.platform.dhcp_relay_start(&server, &link);
        self.dhcp_relay_running = true;
    }

    fn exit_operational<P, S, R, O>(&mut self, rt: &mut Runtime<'_, P, S, R, O>)
    where
        P: Platform,
        S: StorageBackend,
        R: CryptoRng,
        O: StatusObserver,
    {
        assert!(self.eapol_relay_running);
        assert!(self.dhcp_relay_running);

        // RPL and the PAN timeout keep running: the disconnecting enter
        // action reads their timer states
        rt.platform.eapol_relay_stop();
        self.eapol_relay_running = false;
        rt.platform.dhcp_relay_stop();
        self.dhcp_relay_running = false;
        self.pa_tkl.stop();
        self.pc_tkl.stop();
    }

    pub(crate) fn enter_disconnecting<P, S, R, O>(&mut self, rt: &mut Runtime<'_, P, S, R, O>)
    where
        P: Platform,
        S: StorageBackend,
        R: CryptoRng,
        O: StatusObserver,
    {
        self.supp.stop_key_request();
        // The DHCP client stays up: unregistration may still need our GUA.
        //
        // The settle timer guards against transmitting with a stale key
        // index: discovery/reconnect reset the active key, so transitioning
        // before the unregistration frames left would corrupt them. It runs
        // even without a parent, since RPL already unregistered in that
        // case.
        self.unregistration
            .start_rel(rt.now, self.cfg.unregistration_settle_ms);
        log_info!(self.log, rt.now, "join", "disconnecting");

        let parent = self.candidates.pref_parent_eui64();
        let (Some(parent), Some(_)) = (parent, self.dhcp_addr) else {
            // RPL already unregistered whatever there was to unregister
            if self.last_event != Some(Event::RplPrefLost) {
                self.pan_timeout.stop();
            }
            self.rpl_stop();
            return;
        };

        // On PAN timeout the border router is unreachable and the DAO
        // No-Path would be wasted; likewise before any DAO went out
        if !self.pan_timeout.stopped() && !self.dao_refresh.stopped() {
            rt.platform.send_dao_no_path();
        }
        self.pan_timeout.stop();
        if let Some(cand) = self.candidates.get_mut(&parent) {
            cand.is_parent = false;
        }
        // Poisoning: advertise infinite rank, unless DIO emission never
        // started (disconnect before join state 5)
        if !self.dio_tkl.stopped() {
            rt.platform.send_dio(RANK_INFINITE);
        }
        // Unconditional unregistration, in case the NS(ARO) ack never came
        rt.platform.send_ns_aro(&parent, 0);
        self.rpl_stop();
    }

    fn exit_disconnecting(&mut self) {
        // Operator shutdown completes once the settle timer re-dispatched
        if self.last_event == Some(Event::Disconnect) {
            self.running = false;
        }
    }
}
