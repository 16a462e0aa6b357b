// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Qbitel FAN Router node core
//!
//! The join state machine and the context wiring every subsystem together:
//!
//! - **Join FSM**: eight states from PAN discovery to operational routing,
//!   driven by a static transition table
//! - **Trickle timers** (RFC 6206) for PAN advertisement/solicitation
//! - **Router context**: neighbor table, candidate parents, supplicant key
//!   state, fragment reassembly and the timers binding them
//!
//! The host supplies the radio, address acquisition and status-bus seams
//! through the [`node::Platform`] and [`node::StatusObserver`] traits, plus
//! storage and entropy; the core never touches a socket or a clock itself.

#![no_std]
#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod join;
pub mod node;
pub mod storage;
pub mod trickle;

pub use join::{Event, JoinState};
pub use node::{Platform, Router, RouterConfig, Runtime, StatusObserver};
pub use trickle::{Trickle, TrickleConfig, TrickleEvent};
