// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Qbitel FAN Router 6LoWPAN support
//!
//! Datagram fragment reassembly per RFC 4944, using the RFC 815 hole
//! algorithm. Header compression itself happens outside this crate; the
//! reassembler only validates that a first fragment begins with a supported
//! compression dispatch.

#![no_std]
#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod frag;

pub use frag::{DropReport, FragStatus, Reassembler, MAX_DATAGRAM_SIZE, MAX_REASSEMBLIES};
