// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Persistent key=value records
//!
//! Security-relevant state (network identity, key material, counters) is
//! persisted as line-oriented `key = value` records:
//!
//! ```text
//! # informational comment, ignored on read
//! eui64 = 0a:1b:2c:3d:4e:5f:60:71
//! pmk.replay_counter = 12
//! gtk[1] = aa:bb:...
//! gtk[1].frame_counter = 200000
//! ```
//!
//! Array fields carry an index in brackets; dotted suffixes address
//! subfields. Unparsable lines are reported individually so the caller can
//! warn and continue; a corrupt line never aborts a load.
//!
//! The actual file I/O (paths, fsync) is the host's concern, reached through
//! [`StorageBackend`]. Writes of key material request a forced sync for
//! crash safety.

use core::fmt::{self, Write};

use heapless::{String, Vec};

use crate::errors::{Error, Result};

/// One parsed `key = value` line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field<'a> {
    /// Base key name (before any `[` or `.`)
    pub key: &'a str,
    /// Array index, for `key[i]` forms
    pub index: Option<usize>,
    /// Subfield name, for `key.sub` / `key[i].sub` forms
    pub sub: Option<&'a str>,
    /// Raw value text (trimmed)
    pub value: &'a str,
}

impl<'a> Field<'a> {
    /// Parse the value as an unsigned integer (decimal or `0x` hex)
    ///
    /// # Errors
    ///
    /// [`Error::StorageCorrupted`] if the value is not a number.
    pub fn as_u64(&self) -> Result<u64> {
        let (text, radix) = match self.value.strip_prefix("0x") {
            Some(hex) => (hex, 16),
            None => (self.value, 10),
        };
        u64::from_str_radix(text, radix).map_err(|_| Error::StorageCorrupted)
    }

    /// Parse the value as colon-separated hex into `out` (exact length)
    ///
    /// # Errors
    ///
    /// [`Error::StorageCorrupted`] on length or digit mismatch.
    pub fn as_bytes(&self, out: &mut [u8]) -> Result<()> {
        let mut n = 0;
        for part in self.value.split(':') {
            if n >= out.len() || part.len() != 2 {
                return Err(Error::StorageCorrupted);
            }
            out[n] = u8::from_str_radix(part, 16).map_err(|_| Error::StorageCorrupted)?;
            n += 1;
        }
        if n != out.len() {
            return Err(Error::StorageCorrupted);
        }
        Ok(())
    }
}

/// Parse one record line
///
/// Returns `Ok(None)` for blank lines and `#` comments.
///
/// # Errors
///
/// [`Error::StorageCorrupted`] for lines that are not `key = value`.
pub fn parse_line(line: &str) -> Result<Option<Field<'_>>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let (key_part, value) = line.split_once('=').ok_or(Error::StorageCorrupted)?;
    let key_part = key_part.trim();
    let value = value.trim();
    if key_part.is_empty() || value.is_empty() {
        return Err(Error::StorageCorrupted);
    }

    // key, key.sub, key[i], key[i].sub
    let (head, sub) = match key_part.split_once('.') {
        Some((head, sub)) if !sub.is_empty() => (head, Some(sub)),
        Some(_) => return Err(Error::StorageCorrupted),
        None => (key_part, None),
    };
    let (key, index) = match head.split_once('[') {
        Some((key, rest)) => {
            let digits = rest.strip_suffix(']').ok_or(Error::StorageCorrupted)?;
            let index = digits.parse::<usize>().map_err(|_| Error::StorageCorrupted)?;
            (key, Some(index))
        }
        None => (head, None),
    };
    if key.is_empty() {
        return Err(Error::StorageCorrupted);
    }
    Ok(Some(Field {
        key,
        index,
        sub,
        value,
    }))
}

/// Iterate the fields of a record, with 1-based line numbers
///
/// Blank lines and comments are skipped; bad lines are yielded as errors so
/// the caller can log them and keep going.
pub fn fields(contents: &str) -> impl Iterator<Item = (usize, Result<Field<'_>>)> {
    contents
        .lines()
        .enumerate()
        .filter_map(|(i, line)| match parse_line(line) {
            Ok(None) => None,
            Ok(Some(field)) => Some((i + 1, Ok(field))),
            Err(e) => Some((i + 1, Err(e))),
        })
}

/// Builder for record contents
///
/// Overflow is sticky: [`RecordWriter::finish`] fails rather than persisting
/// a silently truncated record.
pub struct RecordWriter<const N: usize> {
    buf: String<N>,
    overflow: bool,
}

impl<const N: usize> RecordWriter<N> {
    /// Empty record
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buf: String::new(),
            overflow: false,
        }
    }

    fn emit(&mut self, args: fmt::Arguments<'_>) {
        if self.buf.write_fmt(args).is_err() {
            self.overflow = true;
        }
    }

    /// Append a `#` comment line
    pub fn comment(&mut self, text: &str) {
        self.emit(format_args!("# {text}\n"));
    }

    /// Append a blank separator line
    pub fn blank(&mut self) {
        self.emit(format_args!("\n"));
    }

    /// Append `key = <integer>`
    pub fn field_u64(&mut self, key: &str, value: u64) {
        self.emit(format_args!("{key} = {value}\n"));
    }

    /// Append `key = <text>`
    pub fn field_str(&mut self, key: &str, value: &str) {
        self.emit(format_args!("{key} = {value}\n"));
    }

    /// Append `key = aa:bb:...`
    pub fn field_bytes(&mut self, key: &str, bytes: &[u8]) {
        self.emit(format_args!("{key} = "));
        for (i, b) in bytes.iter().enumerate() {
            if i > 0 {
                self.emit(format_args!(":"));
            }
            self.emit(format_args!("{b:02x}"));
        }
        self.emit(format_args!("\n"));
    }

    /// Append `key[i] = aa:bb:...`
    pub fn field_idx_bytes(&mut self, key: &str, index: usize, bytes: &[u8]) {
        self.emit(format_args!("{key}[{index}] = "));
        for (i, b) in bytes.iter().enumerate() {
            if i > 0 {
                self.emit(format_args!(":"));
            }
            self.emit(format_args!("{b:02x}"));
        }
        self.emit(format_args!("\n"));
    }

    /// Append `key[i].sub = <integer>`
    pub fn field_idx_u64(&mut self, key: &str, index: usize, sub: &str, value: u64) {
        self.emit(format_args!("{key}[{index}].{sub} = {value}\n"));
    }

    /// Finish the record
    ///
    /// # Errors
    ///
    /// [`Error::BufferTooSmall`] if any append overflowed the buffer.
    pub fn finish(self) -> Result<String<N>> {
        if self.overflow {
            Err(Error::BufferTooSmall)
        } else {
            Ok(self.buf)
        }
    }
}

impl<const N: usize> Default for RecordWriter<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Host storage for named records
pub trait StorageBackend {
    /// Read a record into `buf`, returning its length
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when no such record exists,
    /// [`Error::BufferTooSmall`] when `buf` cannot hold it,
    /// [`Error::StorageReadFailed`] on backend failure.
    fn load(&mut self, name: &str, buf: &mut [u8]) -> Result<usize>;

    /// Write a record, replacing any previous contents
    ///
    /// `force_sync` requests a synchronous flush (key material, counters).
    ///
    /// # Errors
    ///
    /// [`Error::StorageWriteFailed`] on backend failure.
    fn store(&mut self, name: &str, contents: &str, force_sync: bool) -> Result<()>;

    /// Delete a record (no-op when absent)
    fn clear(&mut self, name: &str);
}

/// Maximum record name length for [`MemStorage`]
pub const RECORD_NAME_LEN: usize = 40;

/// In-memory [`StorageBackend`], the reference implementation used in tests
pub struct MemStorage<const SLOTS: usize = 8, const CAP: usize = 2048> {
    records: Vec<(String<RECORD_NAME_LEN>, String<CAP>), SLOTS>,
}

impl<const SLOTS: usize, const CAP: usize> MemStorage<SLOTS, CAP> {
    /// Empty store
    #[must_use]
    pub const fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    /// Borrow a record's contents, if present
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.records
            .iter()
            .find(|(n, _)| n.as_str() == name)
            .map(|(_, c)| c.as_str())
    }
}

impl<const SLOTS: usize, const CAP: usize> Default for MemStorage<SLOTS, CAP> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const SLOTS: usize, const CAP: usize> StorageBackend for MemStorage<SLOTS, CAP> {
    fn load(&mut self, name: &str, buf: &mut [u8]) -> Result<usize> {
        let contents = self.get(name).ok_or(Error::NotFound)?;
        let bytes = contents.as_bytes();
        if bytes.len() > buf.len() {
            return Err(Error::BufferTooSmall);
        }
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(bytes.len())
    }

    fn store(&mut self, name: &str, contents: &str, _force_sync: bool) -> Result<()> {
        let mut text = String::new();
        text.push_str(contents).map_err(|()| Error::BufferTooSmall)?;
        if let Some(slot) = self.records.iter_mut().find(|(n, _)| n.as_str() == name) {
            slot.1 = text;
            return Ok(());
        }
        let mut key = String::new();
        key.push_str(name).map_err(|()| Error::BufferTooSmall)?;
        self.records
            .push((key, text))
            .map_err(|_| Error::StorageWriteFailed)
    }

    fn clear(&mut self, name: &str) {
        self.records.retain(|(n, _)| n.as_str() != name);
    }
}
