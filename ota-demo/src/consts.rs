// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use ota_pal::FlashLayout;

/// Size of a flash memory page in bytes (4KB)
pub const FLASH_PAGE: u32 = 4096;

/// Start of the OTA area, right after the demo firmware.
/// The two descriptor pages come first, then slot A and slot B.
pub const OTA_BASE: u32 = 0x10000;

/// Size of each image slot (36KB), leaving the bootloader region at
/// 0x26000 untouched.
pub const IMAGE_CAPACITY: u32 = 0x9000;

pub const OTA_LAYOUT: FlashLayout = FlashLayout::contiguous(OTA_BASE, FLASH_PAGE, IMAGE_CAPACITY);

/// Written into every descriptor: "nRF52805".
pub const HARDWARE_ID: u32 = 0x5280_5000;
