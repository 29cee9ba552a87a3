// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::error::{MainStatus, PalError};

/// Image state requested by the agent.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u32)]
pub enum ImageState {
    Unknown = 0,
    /// Booted into the new image, self-test in progress.
    Testing = 1,
    Accepted = 2,
    Rejected = 3,
    Aborted = 4,
}

impl TryFrom<u32> for ImageState {
    type Error = PalError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Unknown),
            1 => Ok(Self::Testing),
            2 => Ok(Self::Accepted),
            3 => Ok(Self::Rejected),
            4 => Ok(Self::Aborted),
            _ => Err(PalError::new(MainStatus::BadImageState, value)),
        }
    }
}

/// Image state as reported by the platform.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u32)]
pub enum PalImageState {
    Unknown = 0,
    PendingCommit = 1,
    Valid = 2,
    Invalid = 3,
}
