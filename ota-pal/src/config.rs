// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! PAL configuration: flash layout and the policies platforms disagree on.

use consts::CODE_SIGNING_CERTIFICATE_PEM;

/// Where descriptors and images live, as offsets into the flash device.
///
/// Slot A is described by index 0 of each array, slot B by index 1.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlashLayout {
    /// Offset of the erase sector holding each slot's descriptor.
    pub descriptors: [u32; 2],
    /// Offset of each slot's image region.
    pub images: [u32; 2],
    /// Size of each image region.
    pub image_capacity: u32,
    /// Entry point relative to the image start.
    pub entry_offset: u32,
}

impl FlashLayout {
    /// Two descriptor sectors at `base`, followed by the two image regions.
    pub const fn contiguous(base: u32, erase_size: u32, image_capacity: u32) -> Self {
        let image_a = base + 2 * erase_size;
        Self {
            descriptors: [base, base + erase_size],
            images: [image_a, image_a + image_capacity],
            image_capacity,
            entry_offset: 0,
        }
    }
}

/// When the target image region is erased.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ErasePolicy {
    /// Erase each sector the first time a block touches it. Creating and then
    /// aborting a file leaves flash untouched.
    #[default]
    OnFirstWrite,
    /// Erase the whole file span when the file is created.
    OnCreate,
}

/// What aborting a file does to the data already written.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AbortPolicy {
    /// Release the write session and leave flash as it is.
    #[default]
    CloseOnly,
    /// Erase every sector the session touched so no partial image remains.
    RollBack,
}

#[derive(Debug, Clone)]
pub struct PalConfig {
    pub layout: FlashLayout,
    pub erase_policy: ErasePolicy,
    pub abort_policy: AbortPolicy,
    /// Written into every descriptor.
    pub hardware_id: u32,
    /// Certificate used when the job's certificate path is not found.
    pub fallback_certificate: &'static [u8],
}

impl PalConfig {
    pub fn new(layout: FlashLayout) -> Self {
        Self {
            layout,
            erase_policy: ErasePolicy::default(),
            abort_policy: AbortPolicy::default(),
            hardware_id: 0,
            fallback_certificate: CODE_SIGNING_CERTIFICATE_PEM,
        }
    }

    pub fn with_erase_policy(mut self, policy: ErasePolicy) -> Self {
        self.erase_policy = policy;
        self
    }

    pub fn with_abort_policy(mut self, policy: AbortPolicy) -> Self {
        self.abort_policy = policy;
        self
    }

    pub fn with_hardware_id(mut self, hardware_id: u32) -> Self {
        self.hardware_id = hardware_id;
        self
    }

    pub fn with_fallback_certificate(mut self, certificate: &'static [u8]) -> Self {
        self.fallback_certificate = certificate;
        self
    }
}

/// Layout rules checked by [`crate::OtaPal::new`]. The value is the
/// sub-status reported with [`crate::MainStatus::Uninitialized`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum LayoutError {
    UnalignedDescriptor = 1,
    UnalignedImage = 2,
    DescriptorTooLarge = 3,
    Overlap = 4,
    OutOfBounds = 5,
    WriteSizeTooLarge = 6,
    TooManySectors = 7,
    EmptyImageRegion = 8,
    ReadSizeUnsupported = 9,
}

/// Largest flash write unit the coalescer can buffer. Also bounds the flash
/// read unit.
pub const MAX_WRITE_SIZE: usize = 32;

/// Most erase sectors a single image region may span.
pub const MAX_IMAGE_SECTORS: usize = 1024;

pub(crate) fn validate_layout(
    layout: &FlashLayout,
    capacity: usize,
    read_size: usize,
    write_size: usize,
    erase_size: usize,
    descriptor_size: usize,
) -> Result<(), LayoutError> {
    if write_size > MAX_WRITE_SIZE || write_size == 0 || MAX_WRITE_SIZE % write_size != 0 {
        return Err(LayoutError::WriteSizeTooLarge);
    }
    if read_size > MAX_WRITE_SIZE || read_size == 0 || MAX_WRITE_SIZE % read_size != 0 {
        return Err(LayoutError::ReadSizeUnsupported);
    }
    if descriptor_size > erase_size {
        return Err(LayoutError::DescriptorTooLarge);
    }
    if layout.image_capacity == 0 {
        return Err(LayoutError::EmptyImageRegion);
    }
    let erase = erase_size as u64;
    let capacity_bytes = layout.image_capacity as u64;
    if layout.descriptors.iter().any(|&d| d as u64 % erase != 0) {
        return Err(LayoutError::UnalignedDescriptor);
    }
    if layout.images.iter().any(|&i| i as u64 % erase != 0) || capacity_bytes % erase != 0 {
        return Err(LayoutError::UnalignedImage);
    }
    if capacity_bytes / erase > MAX_IMAGE_SECTORS as u64 {
        return Err(LayoutError::TooManySectors);
    }

    let regions = [
        (layout.descriptors[0] as u64, erase),
        (layout.descriptors[1] as u64, erase),
        (layout.images[0] as u64, capacity_bytes),
        (layout.images[1] as u64, capacity_bytes),
    ];
    for (i, &(start, len)) in regions.iter().enumerate() {
        if start + len > capacity as u64 {
            return Err(LayoutError::OutOfBounds);
        }
        for &(other_start, other_len) in &regions[i + 1..] {
            if start < other_start + other_len && other_start < start + len {
                return Err(LayoutError::Overlap);
            }
        }
    }
    Ok(())
}
