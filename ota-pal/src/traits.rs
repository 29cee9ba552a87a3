// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Collaborators the PAL drives. Flash access goes through
//! [`embedded_storage::nor_flash::NorFlash`]; the rest is defined here.

/// Verification result.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum VerificationResult {
    // The values are arbitrary, but differ by more than one bit so a single
    // glitched bit cannot turn one into the other.
    Valid = 0xcafebabe,
    Invalid = 0xdeadbeef,
}

/// The certificate could not be used to verify anything.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VerifyError {
    /// Unparseable certificate or unsupported key type. The code is the
    /// sub-status reported with [`crate::MainStatus::BadSignerCert`].
    BadCertificate(u32),
}

/// Incremental signature verification over the image bytes.
pub trait SignatureVerifier {
    /// Algorithm identifier recorded in descriptors, e.g. `"sig-sha256-ecdsa"`.
    const SIGNATURE_TYPE: &'static str;

    /// Begin a new verification, discarding any previous state.
    fn start(&mut self);

    /// Feed the next run of image bytes.
    fn update(&mut self, data: &[u8]);

    /// Check `signature` over everything fed since [`start`](Self::start).
    fn finish(
        &mut self,
        certificate: &[u8],
        signature: &[u8],
    ) -> Result<VerificationResult, VerifyError>;
}

/// Certificates available on the device, looked up by path or label.
pub trait CertificateStore {
    fn certificate(&self, path: &str) -> Option<&[u8]>;
}

/// Store with nothing in it; every lookup falls back to the built-in
/// certificate.
#[derive(Debug, Default, Copy, Clone)]
pub struct NoCertificates;

impl CertificateStore for NoCertificates {
    fn certificate(&self, _path: &str) -> Option<&[u8]> {
        None
    }
}

/// Fixed table of `(path, certificate)` pairs.
#[derive(Debug, Copy, Clone)]
pub struct StaticCertificates<'a>(pub &'a [(&'a str, &'a [u8])]);

impl CertificateStore for StaticCertificates<'_> {
    fn certificate(&self, path: &str) -> Option<&[u8]> {
        self.0
            .iter()
            .find(|(p, _)| *p == path)
            .map(|(_, cert)| *cert)
    }
}

/// Returned by [`DeviceReset::reset`] when the platform cannot reset itself.
/// Carries a platform diagnostic code.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ResetUnsupported(pub u32);

pub trait DeviceReset {
    /// Reset the device. Only returns if the reset could not be issued.
    fn reset(&mut self) -> ResetUnsupported;
}
