// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Fragment reassembly
//!
//! Link fragments belonging to one datagram are identified by the sender's
//! address, the destination's address, the datagram size and the datagram
//! tag (RFC 4944 §5.3). Each in-flight datagram keeps a flat buffer sized to
//! the declared length plus a list of "holes": the maximal contiguous byte
//! ranges not yet filled (RFC 815). A fragment that overlaps a hole removes
//! it and reinserts up to two sub-holes for the uncovered portions.
//! Reassembly is complete exactly when the hole list is empty.
//!
//! `hole.last` from RFC 815 is replaced with an exclusive `hole.end` to
//! simplify handling of zero-length fragments.

use heapless::Vec;

use q_common::{Error, Eui64, Result, Ticks, Timer};

/// Largest accepted datagram (the 6LoWPAN link MTU)
pub const MAX_DATAGRAM_SIZE: usize = 1280;

/// Concurrent reassembly contexts
pub const MAX_REASSEMBLIES: usize = 4;

/// Hole list capacity per context
///
/// Non-terminal fragments are at least 8 bytes, so a 1280-byte datagram can
/// never need more than 80 holes.
const MAX_HOLES: usize = 96;

/// Default context lifetime
pub const DEFAULT_REASM_TIMEOUT_MS: u64 = 60 * 1000;

// Dispatch encodings, RFC 4944 §5.1 / RFC 6282
const DISPATCH_FRAG1_MASK: u8 = 0xF8;
const DISPATCH_FRAG1: u8 = 0xC0;
const DISPATCH_FRAGN: u8 = 0xE0;
const DISPATCH_IPHC_MASK: u8 = 0xE0;
const DISPATCH_IPHC: u8 = 0x60;

fn is_frag1(dispatch: u8) -> bool {
    dispatch & DISPATCH_FRAG1_MASK == DISPATCH_FRAG1
}

fn is_fragn(dispatch: u8) -> bool {
    dispatch & DISPATCH_FRAG1_MASK == DISPATCH_FRAGN
}

fn is_iphc(dispatch: u8) -> bool {
    dispatch & DISPATCH_IPHC_MASK == DISPATCH_IPHC
}

/// Outcome of feeding one fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragStatus {
    /// The datagram is complete; the context has been released
    Complete(Vec<u8, MAX_DATAGRAM_SIZE>),
    /// More fragments are awaited
    Pending,
}

/// An expired partial reassembly, for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DropReport {
    /// Fragment sender
    pub src: Eui64,
    /// Datagram tag
    pub tag: u16,
    /// Bytes received before expiry
    pub received: u16,
    /// Declared datagram length
    pub len: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Hole {
    first: u16,
    end: u16,
}

struct Reasm {
    src: Eui64,
    dst: Eui64,
    tag: u16,
    len: u16,
    holes: Vec<Hole, MAX_HOLES>,
    buf: Vec<u8, MAX_DATAGRAM_SIZE>,
    timer: Timer,
}

impl Reasm {
    fn missing(&self) -> u16 {
        self.holes.iter().map(|h| h.end - h.first).sum()
    }

    /// RFC 815 §3: test the fragment range against every surviving hole,
    /// splitting overlapped holes, then copy the payload into place.
    fn update(&mut self, payload: &[u8], offset: u8) -> Result<()> {
        let frag_first = u16::from(offset) * 8;
        let frag_end = frag_first + payload.len() as u16;

        if frag_end > self.len {
            return Err(Error::InvalidFragment);
        }
        // RFC 4944 §5.3: all link fragments for a datagram except the last
        // one MUST be multiples of eight bytes in length.
        if frag_end != self.len && payload.len() % 8 != 0 {
            return Err(Error::InvalidFragment);
        }

        let mut survivors: Vec<Hole, MAX_HOLES> = Vec::new();
        let mut overflow = false;
        for hole in &self.holes {
            if frag_first >= hole.end || frag_end <= hole.first {
                overflow |= survivors.push(*hole).is_err();
                continue;
            }
            if frag_first > hole.first {
                overflow |= survivors
                    .push(Hole {
                        first: hole.first,
                        end: frag_first,
                    })
                    .is_err();
            }
            if frag_end < hole.end {
                overflow |= survivors
                    .push(Hole {
                        first: frag_end,
                        end: hole.end,
                    })
                    .is_err();
            }
        }
        if overflow {
            return Err(Error::TableFull);
        }
        self.holes = survivors;

        let first = usize::from(frag_first);
        self.buf[first..first + payload.len()].copy_from_slice(payload);
        Ok(())
    }
}

/// Fragment reassembly engine
///
/// At most one context exists per (src, dst, tag, len) tuple; a duplicate
/// create request reuses the live context.
pub struct Reassembler {
    contexts: Vec<Reasm, MAX_REASSEMBLIES>,
    timeout_ms: u64,
}

impl Reassembler {
    /// New engine with the given context lifetime
    ///
    /// A zero timeout is a configuration bug: contexts would expire on the
    /// next poll.
    #[must_use]
    pub fn new(reasm_timeout_ms: u64) -> Self {
        assert!(reasm_timeout_ms > 0);
        Self {
            contexts: Vec::new(),
            timeout_ms: reasm_timeout_ms,
        }
    }

    /// In-flight reassembly count
    #[must_use]
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    /// True when nothing is in flight
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Drop every context
    pub fn clear(&mut self) {
        self.contexts.clear();
    }

    fn position(&self, src: &Eui64, dst: &Eui64, tag: u16, len: u16) -> Option<usize> {
        self.contexts
            .iter()
            .position(|r| r.src == *src && r.dst == *dst && r.tag == tag && r.len == len)
    }

    fn create(
        &mut self,
        now: Ticks,
        src: &Eui64,
        dst: &Eui64,
        tag: u16,
        len: u16,
    ) -> Result<usize> {
        if usize::from(len) > MAX_DATAGRAM_SIZE {
            return Err(Error::InvalidFragment);
        }
        let mut reasm = Reasm {
            src: *src,
            dst: *dst,
            tag,
            len,
            holes: Vec::new(),
            buf: Vec::new(),
            timer: Timer::new(),
        };
        // A single hole covering the whole datagram
        reasm
            .holes
            .push(Hole { first: 0, end: len })
            .map_err(|_| Error::TableFull)?;
        reasm
            .buf
            .resize_default(usize::from(len))
            .map_err(|()| Error::InvalidFragment)?;
        reasm.timer.start_rel(now, self.timeout_ms);
        self.contexts.push(reasm).map_err(|_| Error::TableFull)?;
        Ok(self.contexts.len() - 1)
    }

    /// Feed one received frame starting with a FRAG1 or FRAGN header
    ///
    /// # Errors
    ///
    /// - [`Error::Truncated`]: frame shorter than its fragment header
    /// - [`Error::InvalidFragment`]: framing rule violation; ranges already
    ///   accepted are untouched
    /// - [`Error::UnsupportedDispatch`]: a first fragment whose payload does
    ///   not begin with a compression dispatch; the whole reassembly
    ///   attempt is invalidated
    /// - [`Error::TableFull`]: context or hole budget exhausted
    pub fn recv(
        &mut self,
        now: Ticks,
        frame: &[u8],
        src: &Eui64,
        dst: &Eui64,
    ) -> Result<FragStatus> {
        if frame.len() < 4 {
            return Err(Error::Truncated);
        }
        let dispatch = frame[0];
        let len = (u16::from(frame[0] & 0x07) << 8) | u16::from(frame[1]);
        let tag = u16::from_be_bytes([frame[2], frame[3]]);

        let (offset, payload) = if is_frag1(dispatch) {
            (0u8, &frame[4..])
        } else if is_fragn(dispatch) {
            if frame.len() < 5 {
                return Err(Error::Truncated);
            }
            (frame[4], &frame[5..])
        } else {
            return Err(Error::InvalidFragment);
        };

        let idx = match self.position(src, dst, tag, len) {
            Some(idx) => idx,
            None => self.create(now, src, dst, tag, len)?,
        };

        // RFC 6282: headers that do not fit in the first fragment must not
        // be compressed, so a first fragment always starts with a
        // compression dispatch. Anything else dooms the datagram.
        if is_frag1(dispatch) {
            if payload.is_empty() || !is_iphc(payload[0]) {
                self.contexts.swap_remove(idx);
                return Err(Error::UnsupportedDispatch);
            }
        }

        match self.contexts[idx].update(payload, offset) {
            Ok(()) => {}
            Err(Error::TableFull) => {
                self.contexts.swap_remove(idx);
                return Err(Error::TableFull);
            }
            Err(e) => return Err(e),
        }

        if self.contexts[idx].holes.is_empty() {
            let reasm = self.contexts.swap_remove(idx);
            return Ok(FragStatus::Complete(reasm.buf));
        }
        Ok(FragStatus::Pending)
    }

    /// Expire stale contexts; returns at most one drop report per call
    pub fn poll(&mut self, now: Ticks) -> Option<DropReport> {
        let idx = self
            .contexts
            .iter_mut()
            .position(|r| r.timer.poll(now))?;
        let reasm = self.contexts.swap_remove(idx);
        Some(DropReport {
            src: reasm.src,
            tag: reasm.tag,
            received: reasm.len - reasm.missing(),
            len: reasm.len,
        })
    }
}
