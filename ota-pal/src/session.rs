// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! The open write session: the image region being filled, which of its
//! sectors are erased, and the partial write units still buffered.

use crate::coalesce::Coalescer;
use crate::config::MAX_IMAGE_SECTORS;
use crate::context::FileHandle;
use crate::error::{MainStatus, PalError, PalResult, SUB_FLASH_OUT_OF_BOUNDS};
use crate::store::Slot;
use embedded_storage::nor_flash::NorFlash;

/// One bit per erase sector of an image region.
#[derive(Debug, Clone)]
struct SectorMap([u32; MAX_IMAGE_SECTORS / 32]);

impl SectorMap {
    fn new() -> Self {
        Self([0; MAX_IMAGE_SECTORS / 32])
    }

    fn contains(&self, sector: usize) -> bool {
        self.0[sector / 32] & (1 << (sector % 32)) != 0
    }

    fn insert(&mut self, sector: usize) {
        self.0[sector / 32] |= 1 << (sector % 32);
    }

    fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..MAX_IMAGE_SECTORS).filter(|&s| self.contains(s))
    }
}

#[derive(Debug)]
pub(crate) struct WriteSession {
    pub handle: FileHandle,
    pub slot: Slot,
    /// Offset of the image region in flash.
    base: u32,
    pub file_size: u32,
    erased: SectorMap,
    pending: Coalescer,
}

impl WriteSession {
    pub fn new(handle: FileHandle, slot: Slot, base: u32, file_size: u32, write_size: usize) -> Self {
        Self {
            handle,
            slot,
            base,
            file_size,
            erased: SectorMap::new(),
            pending: Coalescer::new(write_size),
        }
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    /// Erase every sector the file will occupy.
    pub fn erase_all<F: NorFlash>(&mut self, flash: &mut F) -> Result<(), F::Error> {
        self.ensure_erased(flash, 0, self.file_size)
    }

    /// Write `data` at `offset` into the file. The whole block is checked
    /// before flash is touched. Returns the number of leading bytes that
    /// were programmed or buffered; when flash fails part way that count
    /// falls short of `data.len()` and the rest must be sent again.
    pub fn write_block<F: NorFlash>(
        &mut self,
        flash: &mut F,
        offset: u32,
        data: &[u8],
    ) -> PalResult<usize> {
        let end = u32::try_from(data.len())
            .ok()
            .and_then(|len| offset.checked_add(len))
            .filter(|&end| end <= self.file_size)
            .ok_or(PalError::new(
                MainStatus::BlockWriteFailed,
                SUB_FLASH_OUT_OF_BOUNDS,
            ))?;
        if data.is_empty() {
            return Ok(0);
        }
        let needed = self.pending.units_needed(offset, end);
        if needed > self.pending.free() {
            warn!(
                "no room to buffer block at {}: {} partial units pending",
                offset,
                self.pending.len()
            );
            return Err(PalError::new(MainStatus::OutOfMemory, needed as u32));
        }

        let mut pos = offset;
        while pos < end {
            match self.write_step(flash, offset, pos, end, data) {
                Ok(next) => pos = next,
                Err(e) if pos == offset => return Err(e),
                Err(e) => {
                    let done = (pos - offset) as usize;
                    warn!(
                        "block at {} stopped after {} of {} bytes: {}",
                        offset,
                        done,
                        data.len(),
                        e
                    );
                    return Ok(done);
                }
            }
        }
        Ok(data.len())
    }

    /// Take the bytes of `data` from `pos` up to the next unit boundary, or a
    /// run of whole units. Returns where the next step starts.
    fn write_step<F: NorFlash>(
        &mut self,
        flash: &mut F,
        offset: u32,
        pos: u32,
        end: u32,
        data: &[u8],
    ) -> PalResult<u32> {
        let unit = self.pending.unit() as u32;
        let unit_base = pos - pos % unit;
        let unit_end = unit_base + unit;
        if pos == unit_base && end >= unit_end {
            // Run of whole units, programmed straight from the block.
            let run_end = end - (end - pos) % unit;
            let bytes = &data[(pos - offset) as usize..(run_end - offset) as usize];
            self.program(flash, pos, bytes)?;
            self.pending.discard_range(pos, run_end);
            Ok(run_end)
        } else {
            let chunk_end = end.min(unit_end);
            let bytes = &data[(pos - offset) as usize..(chunk_end - offset) as usize];
            let merged = self
                .pending
                .merge(unit_base, (pos - unit_base) as usize, bytes)
                .map_err(|_| PalError::new(MainStatus::OutOfMemory, 0))?;
            if let Some(full) = merged {
                self.program(flash, unit_base, &full[..unit as usize])?;
                self.pending.complete(unit_base);
            }
            Ok(chunk_end)
        }
    }

    /// Program every buffered unit. Bytes never received are left at 0xFF.
    pub fn flush<F: NorFlash>(&mut self, flash: &mut F) -> PalResult {
        let unit = self.pending.unit();
        while let Some((unit_base, data)) = self.pending.pop() {
            trace!("flushing partial unit at {}", unit_base);
            self.program(flash, unit_base, &data[..unit])?;
        }
        Ok(())
    }

    /// Erase every sector this session erased or wrote.
    pub fn roll_back<F: NorFlash>(&mut self, flash: &mut F) -> Result<(), F::Error> {
        let sector = F::ERASE_SIZE as u32;
        for s in self.erased.iter() {
            let from = self.base + s as u32 * sector;
            flash.erase(from, from + sector)?;
        }
        Ok(())
    }

    fn program<F: NorFlash>(&mut self, flash: &mut F, at: u32, bytes: &[u8]) -> PalResult {
        let map = |e| PalError::flash(MainStatus::BlockWriteFailed, e);
        self.ensure_erased(flash, at, at + bytes.len() as u32)
            .map_err(map)?;
        flash.write(self.base + at, bytes).map_err(map)
    }

    /// Erase the sectors under `from..to` (file offsets) not erased yet.
    fn ensure_erased<F: NorFlash>(&mut self, flash: &mut F, from: u32, to: u32) -> Result<(), F::Error> {
        if from >= to {
            return Ok(());
        }
        let sector = F::ERASE_SIZE as u32;
        for s in (from / sector)..=((to - 1) / sector) {
            if self.erased.contains(s as usize) {
                continue;
            }
            let start = self.base + s * sector;
            trace!("erasing sector at {}", start);
            flash.erase(start, start + sector)?;
            self.erased.insert(s as usize);
        }
        Ok(())
    }
}
