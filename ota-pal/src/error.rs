// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! PAL status codes.
//!
//! Every operation reports a portable [`MainStatus`] plus an opaque sub-status
//! carrying the backend diagnostic (flash error kind, verifier code, platform
//! reset code). The sub-status is only meant for logs.

use embedded_storage::nor_flash::{NorFlashError, NorFlashErrorKind};

/// Portable error category.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum MainStatus {
    Success = 0,
    Uninitialized = 0xe0,
    OutOfMemory,
    NullFileContext,
    SignatureCheckFailed,
    RxFileCreateFailed,
    RxFileTooLarge,
    BadSignerCert,
    BadImageState,
    AbortFailed,
    RejectFailed,
    CommitFailed,
    ActivateFailed,
    FileAbort,
    FileClose,
    BlockWriteFailed,
    DescriptorWriteFailed,
}

impl MainStatus {
    const ALL: [MainStatus; 17] = [
        MainStatus::Success,
        MainStatus::Uninitialized,
        MainStatus::OutOfMemory,
        MainStatus::NullFileContext,
        MainStatus::SignatureCheckFailed,
        MainStatus::RxFileCreateFailed,
        MainStatus::RxFileTooLarge,
        MainStatus::BadSignerCert,
        MainStatus::BadImageState,
        MainStatus::AbortFailed,
        MainStatus::RejectFailed,
        MainStatus::CommitFailed,
        MainStatus::ActivateFailed,
        MainStatus::FileAbort,
        MainStatus::FileClose,
        MainStatus::BlockWriteFailed,
        MainStatus::DescriptorWriteFailed,
    ];

    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| *s as u8 == value)
    }
}

/// Error returned by every PAL operation: the portable kind and the backend
/// diagnostic folded into it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PalError {
    pub main: MainStatus,
    pub sub: u32,
}

impl PalError {
    pub const fn new(main: MainStatus, sub: u32) -> Self {
        Self { main, sub }
    }

    /// Error of the given kind carrying a flash backend diagnostic.
    pub fn flash<E: NorFlashError>(main: MainStatus, e: E) -> Self {
        Self::new(main, flash_sub_status(e.kind()))
    }
}

impl core::fmt::Display for PalError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let what = match self.main {
            MainStatus::Success => "success",
            MainStatus::Uninitialized => "PAL not initialized",
            MainStatus::OutOfMemory => "out of write buffers",
            MainStatus::NullFileContext => "file context has no open session",
            MainStatus::SignatureCheckFailed => "signature check failed",
            MainStatus::RxFileCreateFailed => "failed to create file for receive",
            MainStatus::RxFileTooLarge => "file too large for image region",
            MainStatus::BadSignerCert => "bad signer certificate",
            MainStatus::BadImageState => "bad image state",
            MainStatus::AbortFailed => "failed to abort image",
            MainStatus::RejectFailed => "failed to reject image",
            MainStatus::CommitFailed => "failed to commit image",
            MainStatus::ActivateFailed => "failed to activate image",
            MainStatus::FileAbort => "failed to abort file",
            MainStatus::FileClose => "failed to close file",
            MainStatus::BlockWriteFailed => "failed to write block",
            MainStatus::DescriptorWriteFailed => "failed to write image descriptor",
        };
        write!(f, "{what} (sub-status {:#x})", self.sub)
    }
}

pub type PalResult<T = ()> = Result<T, PalError>;

/// Flat `(main, sub)` pair as reported to the agent and sent on the wire.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PalStatus {
    pub main: MainStatus,
    pub sub: u32,
}

impl PalStatus {
    pub const SUCCESS: Self = Self {
        main: MainStatus::Success,
        sub: 0,
    };

    /// Only the low 24 bits of the sub-status survive packing.
    const SUB_MASK: u32 = 0x00ff_ffff;

    pub fn is_success(&self) -> bool {
        self.main == MainStatus::Success
    }

    /// Main status in the top byte, sub-status in the low 24 bits.
    pub fn pack(&self) -> u32 {
        ((self.main as u32) << 24) | (self.sub & Self::SUB_MASK)
    }

    /// Returns `None` when the top byte is not a known main status.
    pub fn unpack(packed: u32) -> Option<Self> {
        let main = MainStatus::from_u8((packed >> 24) as u8)?;
        Some(Self {
            main,
            sub: packed & Self::SUB_MASK,
        })
    }
}

impl From<PalError> for PalStatus {
    fn from(e: PalError) -> Self {
        Self {
            main: e.main,
            sub: e.sub,
        }
    }
}

impl<T> From<&PalResult<T>> for PalStatus {
    fn from(result: &PalResult<T>) -> Self {
        match result {
            Ok(_) => Self::SUCCESS,
            Err(e) => (*e).into(),
        }
    }
}

pub(crate) const SUB_FLASH_NOT_ALIGNED: u32 = 1;
pub(crate) const SUB_FLASH_OUT_OF_BOUNDS: u32 = 2;
pub(crate) const SUB_FLASH_OTHER: u32 = 3;

/// Folds a flash error kind into a sub-status code.
pub fn flash_sub_status(kind: NorFlashErrorKind) -> u32 {
    match kind {
        NorFlashErrorKind::NotAligned => SUB_FLASH_NOT_ALIGNED,
        NorFlashErrorKind::OutOfBounds => SUB_FLASH_OUT_OF_BOUNDS,
        _ => SUB_FLASH_OTHER,
    }
}
