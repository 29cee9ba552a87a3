// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::error::{MainStatus, PalError};
use crate::pal::{SUB_CREATE_PATH_TOO_LONG, SUB_SIGNATURE_TOO_LONG};
use consts::{FILE_TYPE_FIRMWARE, MAX_FILE_PATH_LEN, MAX_SIGNATURE_SIZE};
use heapless::{String, Vec};

/// Opaque handle tying a file context to the PAL's open write session.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FileHandle(pub(crate) u32);

/// Per-job file transfer state, created by the agent when a job starts.
///
/// `file_handle` belongs to the PAL: it is set by
/// [`create_file_for_rx`](crate::OtaPal::create_file_for_rx) and cleared by
/// [`close_file`](crate::OtaPal::close_file) or [`abort`](crate::OtaPal::abort).
#[derive(Debug, Clone, Default)]
pub struct OtaFileContext {
    pub file_path: String<MAX_FILE_PATH_LEN>,
    pub file_size: u32,
    pub file_type: u32,
    /// Signature from the job document, not yet verified.
    pub signature: Vec<u8, MAX_SIGNATURE_SIZE>,
    pub cert_filepath: String<MAX_FILE_PATH_LEN>,
    pub file_handle: Option<FileHandle>,
}

impl OtaFileContext {
    /// Context for a firmware image. Fails if the path is too long.
    pub fn firmware(file_path: &str, file_size: u32) -> Result<Self, ContextError> {
        let mut ctx = Self {
            file_size,
            file_type: FILE_TYPE_FIRMWARE,
            ..Default::default()
        };
        ctx.file_path
            .push_str(file_path)
            .map_err(|_| ContextError::PathTooLong)?;
        Ok(ctx)
    }

    pub fn set_signature(&mut self, signature: &[u8]) -> Result<(), ContextError> {
        self.signature = Vec::from_slice(signature).map_err(|_| ContextError::SignatureTooLong)?;
        Ok(())
    }

    pub fn set_cert_filepath(&mut self, path: &str) -> Result<(), ContextError> {
        self.cert_filepath.clear();
        self.cert_filepath
            .push_str(path)
            .map_err(|_| ContextError::PathTooLong)
    }

    pub fn is_open(&self) -> bool {
        self.file_handle.is_some()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ContextError {
    PathTooLong,
    SignatureTooLong,
}

impl core::fmt::Display for ContextError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::PathTooLong => write!(f, "path longer than {MAX_FILE_PATH_LEN} bytes"),
            Self::SignatureTooLong => write!(f, "signature longer than {MAX_SIGNATURE_SIZE} bytes"),
        }
    }
}

/// A job the context cannot hold fails the same way the PAL would fail it.
impl From<ContextError> for PalError {
    fn from(e: ContextError) -> Self {
        match e {
            ContextError::PathTooLong => {
                PalError::new(MainStatus::RxFileCreateFailed, SUB_CREATE_PATH_TOO_LONG)
            }
            ContextError::SignatureTooLong => {
                PalError::new(MainStatus::SignatureCheckFailed, SUB_SIGNATURE_TOO_LONG)
            }
        }
    }
}
