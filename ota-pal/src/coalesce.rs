// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Write coalescing for flash that can only be programmed in whole write
//! units. Bytes of a partially covered unit are buffered, keyed by the
//! unit's aligned offset, until the unit is complete.

use crate::config::MAX_WRITE_SIZE;
use heapless::Vec;

/// Partially filled units that can be buffered at once.
pub const MAX_PENDING_UNITS: usize = 16;

#[derive(Debug)]
struct PendingUnit {
    base: u32,
    data: [u8; MAX_WRITE_SIZE],
    /// Bit `n` set when byte `n` has been received.
    filled: u32,
}

#[derive(Debug)]
pub(crate) struct Coalescer {
    unit: usize,
    pending: Vec<PendingUnit, MAX_PENDING_UNITS>,
}

/// No room left for another partial unit.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct Exhausted;

impl Coalescer {
    pub fn new(unit: usize) -> Self {
        Self {
            unit,
            pending: Vec::new(),
        }
    }

    pub fn unit(&self) -> usize {
        self.unit
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn free(&self) -> usize {
        MAX_PENDING_UNITS - self.pending.len()
    }

    pub fn is_pending(&self, base: u32) -> bool {
        self.pending.iter().any(|p| p.base == base)
    }

    fn full_mask(&self) -> u32 {
        if self.unit >= 32 {
            u32::MAX
        } else {
            (1u32 << self.unit) - 1
        }
    }

    /// Copy `bytes` into the unit at `base`, starting `at` bytes into it.
    /// Returns the unit's contents once every byte of it has been received.
    /// A complete unit stays buffered until [`Coalescer::complete`].
    pub fn merge(
        &mut self,
        base: u32,
        at: usize,
        bytes: &[u8],
    ) -> Result<Option<[u8; MAX_WRITE_SIZE]>, Exhausted> {
        let full = self.full_mask();
        let idx = match self.pending.iter().position(|p| p.base == base) {
            Some(idx) => idx,
            None => {
                self.pending
                    .push(PendingUnit {
                        base,
                        // Unreceived bytes stay at the erased value.
                        data: [0xff; MAX_WRITE_SIZE],
                        filled: 0,
                    })
                    .map_err(|_| Exhausted)?;
                self.pending.len() - 1
            }
        };

        let unit = &mut self.pending[idx];
        unit.data[at..at + bytes.len()].copy_from_slice(bytes);
        for bit in at..at + bytes.len() {
            unit.filled |= 1 << bit;
        }
        if unit.filled & full == full {
            return Ok(Some(unit.data));
        }
        Ok(None)
    }

    /// Forget the unit at `base` once it has been programmed.
    pub fn complete(&mut self, base: u32) {
        if let Some(idx) = self.pending.iter().position(|p| p.base == base) {
            self.pending.swap_remove(idx);
        }
    }

    /// Drop buffered units whose base lies in `from..to`; a whole-unit write
    /// over that range supersedes them.
    pub fn discard_range(&mut self, from: u32, to: u32) {
        self.pending.retain(|p| p.base < from || p.base >= to);
    }

    /// Take any buffered unit, complete or not. Missing bytes read as 0xFF.
    pub fn pop(&mut self) -> Option<(u32, [u8; MAX_WRITE_SIZE])> {
        self.pending.pop().map(|p| (p.base, p.data))
    }

    /// Number of units a write of `offset..end` would add to the buffer.
    pub fn units_needed(&self, offset: u32, end: u32) -> usize {
        let unit = self.unit as u32;
        if unit <= 1 || offset >= end {
            return 0;
        }
        let head_base = offset - offset % unit;
        let head_partial = offset % unit != 0 || end < head_base + unit;
        let tail_base = end - end % unit;
        let tail_partial = end % unit != 0 && tail_base > head_base;

        let mut needed = 0;
        if head_partial && !self.is_pending(head_base) {
            needed += 1;
        }
        if tail_partial && !self.is_pending(tail_base) {
            needed += 1;
        }
        needed
    }
}
