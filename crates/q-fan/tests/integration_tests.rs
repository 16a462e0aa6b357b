// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Full-node join scenarios against a mock environment

#![cfg(test)]

use q_common::storage::MemStorage;
use q_common::types::PanId;
use q_common::{CryptoRng, Eui64, Result, Ticks};
use q_fan::{Event, JoinState, Platform, Router, RouterConfig, Runtime, StatusObserver};
use q_rpl::DodagConfig;

const NODE: Eui64 = Eui64::new([0x02, 0, 0, 0, 0, 0, 0, 0x01]);
const BORDER_ROUTER: Eui64 = Eui64::new([0x02, 0, 0, 0, 0, 0, 0, 0xBB]);
const PAN: PanId = PanId(0x1234);
const DODAG_ID: [u8; 16] = [0xFD, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xBB];
const GTK: [u8; 16] = [0x42; 16];

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

/// Records every platform call in order
#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    PanAdvertSolicit,
    PanAdvert,
    PanConfigSolicit,
    PanConfig,
    Dis,
    Dio(u16),
    DaoNoPath,
    NsAro(Eui64, u32),
    KeyRequest(Eui64),
    DhcpStart,
    DhcpStop,
    DhcpRelayStart,
    DhcpRelayStop,
    EapolRelayStart,
    EapolRelayStop,
    InstallGak(usize, bool),
    NudProbe(Eui64),
}

#[derive(Default)]
struct MockPlatform {
    calls: Vec<Call>,
}

impl Platform for MockPlatform {
    fn send_pan_advert_solicit(&mut self) {
        self.calls.push(Call::PanAdvertSolicit);
    }
    fn send_pan_advert(&mut self) {
        self.calls.push(Call::PanAdvert);
    }
    fn send_pan_config_solicit(&mut self, _prev: Option<PanId>) {
        self.calls.push(Call::PanConfigSolicit);
    }
    fn send_pan_config(&mut self) {
        self.calls.push(Call::PanConfig);
    }
    fn send_dis(&mut self) {
        self.calls.push(Call::Dis);
    }
    fn send_dio(&mut self, rank: u16) {
        self.calls.push(Call::Dio(rank));
    }
    fn send_dao_no_path(&mut self) {
        self.calls.push(Call::DaoNoPath);
    }
    fn send_ns_aro(&mut self, parent: &Eui64, lifetime_s: u32) {
        self.calls.push(Call::NsAro(*parent, lifetime_s));
    }
    fn send_key_request(&mut self, target: &Eui64) {
        self.calls.push(Call::KeyRequest(*target));
    }
    fn dhcp_start(&mut self) {
        self.calls.push(Call::DhcpStart);
    }
    fn dhcp_stop(&mut self) {
        self.calls.push(Call::DhcpStop);
    }
    fn dhcp_relay_start(&mut self, _server: &[u8; 16], _link: &[u8; 16]) {
        self.calls.push(Call::DhcpRelayStart);
    }
    fn dhcp_relay_stop(&mut self) {
        self.calls.push(Call::DhcpRelayStop);
    }
    fn eapol_relay_start(&mut self) {
        self.calls.push(Call::EapolRelayStart);
    }
    fn eapol_relay_stop(&mut self) {
        self.calls.push(Call::EapolRelayStop);
    }
    fn install_gak(&mut self, index: usize, gak: Option<&[u8; 16]>, _fc: u32) {
        self.calls.push(Call::InstallGak(index, gak.is_some()));
    }
    fn nud_probe(&mut self, eui64: &Eui64) {
        self.calls.push(Call::NudProbe(*eui64));
    }
}

#[derive(Default)]
struct StatusLog {
    states: Vec<JoinState>,
}

impl StatusObserver for StatusLog {
    fn join_state_changed(&mut self, state: JoinState) {
        self.states.push(state);
    }
    fn gaks_changed(&mut self) {}
    fn pan_changed(&mut self, _pan: Option<PanId>, _version: Option<u16>) {}
    fn parent_changed(&mut self, _parent: Option<&Eui64>) {}
}

struct Harness {
    router: Router,
    platform: MockPlatform,
    storage: MemStorage<16, 4096>,
    rng: TestRng,
    status: StatusLog,
    now: Ticks,
}

macro_rules! rt {
    ($h:expr) => {
        &mut Runtime {
            now: $h.now,
            platform: &mut $h.platform,
            storage: &mut $h.storage,
            rng: &mut $h.rng,
            status: &mut $h.status,
        }
    };
}

impl Harness {
    fn new() -> Self {
        let cfg = RouterConfig::new("meadow", NODE);
        Self {
            router: Router::new(cfg).unwrap(),
            platform: MockPlatform::default(),
            storage: MemStorage::new(),
            rng: TestRng(0xFEED),
            status: StatusLog::default(),
            now: Ticks::from_millis(1),
        }
    }

    fn advance(&mut self, ms: u64) {
        self.now = self.now + ms;
        self.router.poll(rt!(self));
    }

    /// Drive the node from cold start to the Routing state
    fn join_until_routing(&mut self) {
        self.router.start(rt!(self)).unwrap();
        assert_eq!(self.router.state(), JoinState::Discovery);

        // PA from a new PAN selects it and starts authentication
        self.router
            .on_pan_advert(rt!(self), BORDER_ROUTER, PAN, 100, -55.0);
        assert_eq!(self.router.state(), JoinState::Authenticate);

        // The external EAPOL engine delivers a GTK: authentication success
        self.router.install_gtk(rt!(self), 0, &GTK, 0, 86_400_000);
        assert_eq!(self.router.state(), JoinState::Configure);

        // PAN configuration arrives
        self.router
            .on_pan_config(rt!(self), BORDER_ROUTER, PAN, 7, -55.0);
        assert_eq!(self.router.state(), JoinState::RplParent);

        // Bidirectional signal levels and a DIO make the BR a candidate
        self.router.on_rsl_report(self.now, &BORDER_ROUTER, -58.0);
        self.router.on_dio(
            rt!(self),
            BORDER_ROUTER,
            256,
            DODAG_ID,
            DodagConfig::default(),
        );
        assert_eq!(self.router.state(), JoinState::RplParent, "ETX still unknown");

        // A confirmed unicast transmission gives the link an ETX
        self.router.on_tx_confirm(rt!(self), &BORDER_ROUTER, 1, true);
        self.advance(10);
        assert_eq!(self.router.state(), JoinState::Routing);
        assert_eq!(self.router.pref_parent(), Some(BORDER_ROUTER));
        assert_eq!(*self.router.eapol_target(), BORDER_ROUTER);
    }

    fn join_until_operational(&mut self) {
        self.join_until_routing();
        self.router.on_dhcp_addr(rt!(self), Some(DODAG_ID));
        self.router.on_dao_ack(rt!(self));
        assert_eq!(self.router.state(), JoinState::Operational);
    }
}

#[test]
fn end_to_end_join_scenario() {
    let mut h = Harness::new();
    h.join_until_operational();

    assert!(h.platform.calls.contains(&Call::DhcpStart));
    assert!(h.platform.calls.contains(&Call::EapolRelayStart));
    assert!(h.platform.calls.contains(&Call::DhcpRelayStart));
    assert!(h
        .platform
        .calls
        .contains(&Call::InstallGak(1, true)));

    assert_eq!(
        h.status.states,
        vec![
            JoinState::Discovery,
            JoinState::Authenticate,
            JoinState::Configure,
            JoinState::RplParent,
            JoinState::Routing,
            JoinState::Operational,
        ]
    );
}

#[test]
fn disconnect_poisons_before_the_settle_timer() {
    let mut h = Harness::new();
    h.join_until_operational();
    let mark = h.platform.calls.len();

    h.router.dispatch(rt!(h), Event::Disconnect);
    assert_eq!(h.router.state(), JoinState::Disconnecting);
    assert!(h.router.running());

    // Graceful teardown happened synchronously on entry: DAO No-Path,
    // poisoning DIO (infinite rank) and NS(ARO) with lifetime 0
    let teardown = &h.platform.calls[mark..];
    assert!(teardown.contains(&Call::DaoNoPath));
    assert!(teardown.contains(&Call::Dio(0xFFFF)));
    assert!(teardown.contains(&Call::NsAro(BORDER_ROUTER, 0)));

    // Nothing further transitions until the 2 s settle timer fires
    h.advance(1_000);
    assert_eq!(h.router.state(), JoinState::Disconnecting);
    assert!(h.router.running());

    h.advance(1_100);
    assert!(!h.router.running(), "shutdown completes after the settle time");
}

#[test]
fn pan_timeout_falls_back_to_reconnect() {
    let mut h = Harness::new();
    h.join_until_operational();

    // Silence from the border router for the whole PAN timeout
    h.advance(60 * 60 * 1000 + 1000);
    assert_eq!(h.router.state(), JoinState::Disconnecting);

    // After the settle time the node drops back to Reconnect, keeping its
    // PAN id and keys
    h.advance(3_000);
    assert_eq!(h.router.state(), JoinState::Reconnect);
    assert!(h.platform.calls.contains(&Call::PanConfigSolicit));
}

#[test]
fn restart_reconnects_from_storage() {
    let mut h = Harness::new();
    h.join_until_operational();

    // A second node instance sharing the same storage: boots straight into
    // Reconnect with the stored PAN and keys
    let cfg = RouterConfig::new("meadow", NODE);
    let mut router = Router::new(cfg).unwrap();
    let mut platform = MockPlatform::default();
    let mut status = StatusLog::default();
    let mut rng = TestRng(0xBEEF);
    {
        let mut rt = Runtime {
            now: Ticks::from_secs(3600),
            platform: &mut platform,
            storage: &mut h.storage,
            rng: &mut rng,
            status: &mut status,
        };
        router.start(&mut rt).unwrap();
    }
    assert_eq!(router.state(), JoinState::Reconnect);
    // The surviving group key went back into the radio
    assert!(platform.calls.contains(&Call::InstallGak(1, true)));

    // A PAN configuration from the previous PAN resumes the join at
    // parent selection
    {
        let mut rt = Runtime {
            now: Ticks::from_secs(3601),
            platform: &mut platform,
            storage: &mut h.storage,
            rng: &mut rng,
            status: &mut status,
        };
        router.on_pan_config(&mut rt, BORDER_ROUTER, PAN, 8, -60.0);
    }
    assert_eq!(router.state(), JoinState::RplParent);
    assert_eq!(router.pan_id(), Some(PAN));
}

#[test]
fn replaying_the_same_events_gives_the_same_states() {
    let run = || {
        let mut h = Harness::new();
        h.join_until_operational();
        h.router.dispatch(rt!(h), Event::Disconnect);
        h.advance(2_500);
        h.status.states.clone()
    };
    assert_eq!(run(), run());
}

#[test]
fn auth_failure_without_keys_restarts_discovery() {
    let mut h = Harness::new();
    h.router.start(rt!(h)).unwrap();
    h.router
        .on_pan_advert(rt!(h), BORDER_ROUTER, PAN, 100, -55.0);
    assert_eq!(h.router.state(), JoinState::Authenticate);

    // Key request retries exhaust without a single GTK
    h.router.on_auth_failure(rt!(h));
    assert_eq!(h.router.state(), JoinState::Discovery);
}

#[test]
fn traffic_from_the_dodag_root_keeps_the_pan_alive() {
    let mut h = Harness::new();
    h.join_until_operational();

    // Periodic traffic from the root re-arms the PAN timeout: two hours
    // pass and the node stays operational
    for _ in 0..8 {
        h.router.note_pan_traffic(h.now, &DODAG_ID);
        h.advance(15 * 60 * 1000);
    }
    assert_eq!(h.router.state(), JoinState::Operational);

    // Traffic from elsewhere does not count
    h.router.note_pan_traffic(h.now, &[0xAA; 16]);
    h.advance(60 * 60 * 1000 + 1000);
    assert_eq!(h.router.state(), JoinState::Disconnecting);
}

#[test]
fn gtk_hash_mismatch_restarts_the_key_request() {
    let mut h = Harness::new();
    h.join_until_operational();
    let mark = h.platform.calls.len();

    // Advertised hashes disagree with our slot 0 key
    let advertised = [[0xA5u8; 8], [0u8; 8], [0u8; 8], [0u8; 8]];
    h.router.check_gtk_hash(rt!(h), &advertised);
    h.advance(10);
    assert!(h.platform.calls[mark..].contains(&Call::KeyRequest(BORDER_ROUTER)));
}

#[test]
fn key_requests_are_paced_and_directed_at_the_target() {
    let mut h = Harness::new();
    h.router.start(rt!(h)).unwrap();
    h.router
        .on_pan_advert(rt!(h), BORDER_ROUTER, PAN, 100, -55.0);

    // First key request fires promptly toward the advertising node
    h.advance(10);
    assert!(h.platform.calls.contains(&Call::KeyRequest(BORDER_ROUTER)));
}
