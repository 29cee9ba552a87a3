// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! The two descriptor regions and the slot decisions derived from them.

use crate::config::{FlashLayout, MAX_WRITE_SIZE};
use crate::descriptor::{self, ImageDescriptor, ImageFlags};
use crate::error::{MainStatus, PalError};
use embedded_storage::nor_flash::{NorFlash, NorFlashError, ReadNorFlash};

pub(crate) const fn align_up(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}

/// Descriptor record as stored, padded to any supported write or read unit.
pub(crate) const RECORD_LEN: usize = align_up(ImageDescriptor::SIZE, MAX_WRITE_SIZE);

/// One of the two image slots.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Slot {
    A,
    B,
}

impl Slot {
    pub fn index(self) -> usize {
        match self {
            Slot::A => 0,
            Slot::B => 1,
        }
    }

    pub fn other(self) -> Slot {
        match self {
            Slot::A => Slot::B,
            Slot::B => Slot::A,
        }
    }
}

/// What a descriptor region currently holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Region {
    Blank,
    Corrupt(descriptor::Error),
    Descriptor(ImageDescriptor),
}

/// Snapshot of both descriptor regions.
#[derive(Debug, Clone)]
pub(crate) struct Descriptors {
    regions: [Region; 2],
}

impl Descriptors {
    pub fn read<F: ReadNorFlash>(flash: &mut F, layout: &FlashLayout) -> Result<Self, F::Error> {
        Ok(Self {
            regions: [
                read_region(flash, layout.descriptors[0])?,
                read_region(flash, layout.descriptors[1])?,
            ],
        })
    }

    pub fn region(&self, slot: Slot) -> &Region {
        &self.regions[slot.index()]
    }

    pub fn descriptor(&self, slot: Slot) -> Option<&ImageDescriptor> {
        match self.region(slot) {
            Region::Descriptor(d) => Some(d),
            _ => None,
        }
    }

    pub fn any_corrupt(&self) -> bool {
        self.regions.iter().any(|r| matches!(r, Region::Corrupt(_)))
    }

    /// The descriptor with the highest sequence number. Slot A wins a tie.
    pub fn newest(&self) -> Option<(Slot, &ImageDescriptor)> {
        self.newest_where(|_| true)
    }

    /// Slot of the image that last passed self-test. Slot A holds the factory
    /// image when nothing has been accepted yet.
    pub fn active(&self) -> Slot {
        self.newest_where(|d| d.flags == ImageFlags::Valid)
            .map(|(slot, _)| slot)
            .unwrap_or(Slot::A)
    }

    /// Slot a new download goes to.
    pub fn update_slot(&self) -> Slot {
        self.active().other()
    }

    /// Slot to boot: an image on trial if there is one, else the active one.
    pub fn boot_slot(&self) -> Slot {
        match self.newest() {
            Some((slot, d)) if matches!(d.flags, ImageFlags::New | ImageFlags::PendingCommit) => {
                slot
            }
            _ => self.active(),
        }
    }

    pub fn next_sequence(&self) -> u32 {
        self.newest()
            .map(|(_, d)| d.sequence.saturating_add(1))
            .unwrap_or(1)
    }

    fn newest_where(
        &self,
        mut pred: impl FnMut(&ImageDescriptor) -> bool,
    ) -> Option<(Slot, &ImageDescriptor)> {
        let mut newest: Option<(Slot, &ImageDescriptor)> = None;
        for slot in [Slot::A, Slot::B] {
            let Some(d) = self.descriptor(slot) else {
                continue;
            };
            if !pred(d) {
                continue;
            }
            match newest {
                Some((_, n)) if n.sequence >= d.sequence => {}
                _ => newest = Some((slot, d)),
            }
        }
        newest
    }
}

fn read_region<F: ReadNorFlash>(flash: &mut F, offset: u32) -> Result<Region, F::Error> {
    let mut buf = [0u8; RECORD_LEN];
    let len = align_up(ImageDescriptor::SIZE, F::READ_SIZE);
    flash.read(offset, &mut buf[..len])?;
    Ok(match ImageDescriptor::deserialize(&buf) {
        Ok(Some(d)) => Region::Descriptor(d),
        Ok(None) => Region::Blank,
        Err(e) => {
            warn!("descriptor at {} unusable: {:?}", offset, e);
            Region::Corrupt(e)
        }
    })
}

#[derive(Debug)]
pub(crate) enum PersistError<E> {
    Flash(E),
    Encode(descriptor::Error),
}

impl<E: NorFlashError> PersistError<E> {
    pub fn into_pal(self, main: MainStatus) -> PalError {
        match self {
            PersistError::Flash(e) => PalError::flash(main, e),
            PersistError::Encode(e) => PalError::new(main, e.sub_status()),
        }
    }
}

/// Replace the descriptor of `slot`: erase its sector, then program the
/// record. Bytes past the record stay erased.
pub(crate) fn persist<F: NorFlash>(
    flash: &mut F,
    layout: &FlashLayout,
    slot: Slot,
    descriptor: &ImageDescriptor,
) -> Result<(), PersistError<F::Error>> {
    let mut buf = [0xffu8; RECORD_LEN];
    descriptor
        .serialize(&mut buf)
        .map_err(PersistError::Encode)?;

    let offset = layout.descriptors[slot.index()];
    debug!(
        "persisting descriptor seq {} flags {:?} to slot {:?}",
        descriptor.sequence, descriptor.flags, slot
    );
    flash
        .erase(offset, offset + F::ERASE_SIZE as u32)
        .map_err(PersistError::Flash)?;
    let len = align_up(ImageDescriptor::SIZE, F::WRITE_SIZE);
    flash
        .write(offset, &buf[..len])
        .map_err(PersistError::Flash)
}

/// Drop the descriptor of `slot` by erasing its sector.
pub(crate) fn invalidate<F: NorFlash>(
    flash: &mut F,
    layout: &FlashLayout,
    slot: Slot,
) -> Result<(), F::Error> {
    let offset = layout.descriptors[slot.index()];
    debug!("invalidating descriptor of slot {:?}", slot);
    flash.erase(offset, offset + F::ERASE_SIZE as u32)
}
