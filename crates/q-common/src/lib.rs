// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Qbitel FAN Router Common Library
//!
//! This crate provides the types, error definitions, cooperative timers and
//! persistent-record codec shared across all router subsystems.
//!
//! # Features
//!
//! - `std`: Enable standard library support (disabled by default for embedded)
//!
//! # Concurrency model
//!
//! Everything here is written for a single-threaded, event-driven router: a
//! timer is a stored deadline, and the owning component is polled with the
//! current monotonic time. Nothing blocks, nothing runs concurrently.

#![no_std]
#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

#[cfg(feature = "std")]
extern crate std;

pub mod errors;
pub mod log;
pub mod rng;
pub mod storage;
pub mod time;
pub mod timer;
pub mod types;

pub use errors::{Error, Result};
pub use rng::CryptoRng;
pub use time::Ticks;
pub use timer::Timer;
pub use types::Eui64;
