// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Qbitel FAN Router security state
//!
//! Group transient key (GTK) lifecycle and EAPOL conversation state for both
//! roles:
//!
//! - **Authenticator** (border router): rotates the FFN GTK and LFN LGTK
//!   slot groups on install/activate/expire timers, performs FAN key
//!   revocation, and tracks one security conversation per supplicant with
//!   bounded retries and DoS-bounded memory.
//! - **Supplicant** (router node): holds the PMK/PTK pair learned via
//!   EAP-TLS, the GTK set learned via EAPOL key frames, and the bounded
//!   key-request retransmission schedule.
//!
//! The EAP-TLS handshake and EAPOL-Key MIC/KDE cryptography are external
//! services; this crate owns the state machines around them.
//!
//! All security-relevant mutations persist synchronously through a
//! [`q_common::storage::StorageBackend`].

#![no_std]
#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod authenticator;
pub mod gtk;
pub mod storage;
pub mod supplicant;

pub use authenticator::{
    AuthConfig, Authenticator, EapolPort, EapolVerdict, GroupConfig, KmpId, SuppSession,
};
pub use gtk::{GtkObserver, GtkSlot, KeyGroup, PairwiseKey};
pub use supplicant::{Supplicant, SupplicantConfig, SupplicantEvent};
