// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Logging infrastructure
//!
//! A lightweight, `no_std` circular log buffer. The router context owns one
//! buffer; subsystem events are written with a short tag ("join", "sec",
//! "rpl", "6lowpan", ...) and the monotonic timestamp of the poll iteration.
//! The host drains the buffer to its transport of choice.
//!
//! # Security
//!
//! Key material must never be logged in full; use the truncated
//! [`Display`](core::fmt::Display) of [`crate::types::Secret`].

use core::fmt::{self, Write};

use heapless::String;

use crate::time::Ticks;

/// Maximum formatted message length
pub const LOG_MSG_LEN: usize = 96;

/// Number of retained entries
pub const LOG_CAPACITY: usize = 64;

/// Severity of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
    /// Unexpected conditions requiring attention
    Error = 0,
    /// Recoverable anomalies (dropped frames, bad storage lines)
    Warn = 1,
    /// State transitions and lifecycle milestones
    Info = 2,
    /// Per-event detail (development)
    Debug = 3,
}

impl Level {
    /// Uppercase name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
        }
    }
}

/// One buffered log record
#[derive(Clone)]
pub struct Entry {
    /// Severity
    pub level: Level,
    /// Poll-loop timestamp at write time
    pub at: Ticks,
    /// Subsystem tag
    pub tag: &'static str,
    /// Formatted message (truncated at [`LOG_MSG_LEN`])
    pub message: String<LOG_MSG_LEN>,
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:>10}] {:5} {}: {}",
            self.at.as_millis(),
            self.level.as_str(),
            self.tag,
            self.message
        )
    }
}

/// Fixed-capacity circular log buffer
pub struct LogBuffer {
    entries: [Option<Entry>; LOG_CAPACITY],
    next: usize,
    len: usize,
    max_level: Level,
}

impl LogBuffer {
    /// New empty buffer recording up to `Info`
    #[must_use]
    pub const fn new() -> Self {
        const EMPTY: Option<Entry> = None;
        Self {
            entries: [EMPTY; LOG_CAPACITY],
            next: 0,
            len: 0,
            max_level: Level::Info,
        }
    }

    /// Record levels up to and including `level`
    pub fn set_max_level(&mut self, level: Level) {
        self.max_level = level;
    }

    /// Whether `level` would currently be recorded
    #[must_use]
    pub fn enabled(&self, level: Level) -> bool {
        level <= self.max_level
    }

    /// Format and append an entry
    pub fn push(&mut self, level: Level, at: Ticks, tag: &'static str, args: fmt::Arguments<'_>) {
        if !self.enabled(level) {
            return;
        }
        let mut message = String::new();
        // Overlong messages are truncated, not dropped
        let _ = message.write_fmt(args);
        self.entries[self.next] = Some(Entry {
            level,
            at,
            tag,
            message,
        });
        self.next = (self.next + 1) % LOG_CAPACITY;
        if self.len < LOG_CAPACITY {
            self.len += 1;
        }
    }

    /// Number of retained entries
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// True when nothing has been recorded
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drop all entries
    pub fn clear(&mut self) {
        for slot in &mut self.entries {
            *slot = None;
        }
        self.next = 0;
        self.len = 0;
    }

    /// Iterate oldest-first
    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        let first = if self.len < LOG_CAPACITY { 0 } else { self.next };
        (0..self.len).filter_map(move |i| self.entries[(first + i) % LOG_CAPACITY].as_ref())
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Log an error
#[macro_export]
macro_rules! log_error {
    ($buf:expr, $now:expr, $tag:expr, $($arg:tt)*) => {
        $buf.push($crate::log::Level::Error, $now, $tag, format_args!($($arg)*))
    };
}

/// Log a recoverable anomaly
#[macro_export]
macro_rules! log_warn {
    ($buf:expr, $now:expr, $tag:expr, $($arg:tt)*) => {
        $buf.push($crate::log::Level::Warn, $now, $tag, format_args!($($arg)*))
    };
}

/// Log a lifecycle event
#[macro_export]
macro_rules! log_info {
    ($buf:expr, $now:expr, $tag:expr, $($arg:tt)*) => {
        $buf.push($crate::log::Level::Info, $now, $tag, format_args!($($arg)*))
    };
}

/// Log per-event detail
#[macro_export]
macro_rules! log_debug {
    ($buf:expr, $now:expr, $tag:expr, $($arg:tt)*) => {
        $buf.push($crate::log::Level::Debug, $now, $tag, format_args!($($arg)*))
    };
}
