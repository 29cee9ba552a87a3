// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! OTA platform abstraction layer.
//!
//! Receives a firmware image into the inactive flash slot, verifies its
//! signature, and walks it through the boot lifecycle
//! (new, pending commit, valid or invalid) with a persisted descriptor per
//! slot.

#![no_std]

#[macro_use]
mod fmt;

mod coalesce;
pub mod config;
pub mod context;
pub mod descriptor;
#[cfg(feature = "p256")]
pub mod ecdsa;
pub mod error;
mod pal;
mod session;
pub mod state;
mod store;
pub mod traits;

pub use config::{AbortPolicy, ErasePolicy, FlashLayout, LayoutError, PalConfig};
pub use context::{ContextError, FileHandle, OtaFileContext};
pub use descriptor::{ImageDescriptor, ImageFlags};
#[cfg(feature = "p256")]
pub use ecdsa::EcdsaP256Verifier;
pub use error::{MainStatus, PalError, PalResult, PalStatus};
pub use pal::*;
pub use state::{ImageState, PalImageState};
pub use store::Slot;
pub use traits::{
    CertificateStore, DeviceReset, NoCertificates, ResetUnsupported, SignatureVerifier,
    StaticCertificates, VerificationResult, VerifyError,
};

#[cfg(test)]
extern crate std;

#[cfg(test)]
mod tests;
