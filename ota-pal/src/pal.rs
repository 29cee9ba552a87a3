// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::config::{validate_layout, AbortPolicy, ErasePolicy, PalConfig};
use crate::context::{FileHandle, OtaFileContext};
use crate::descriptor::{ImageDescriptor, ImageFlags};
use crate::error::{MainStatus, PalError, PalResult};
use crate::session::WriteSession;
use crate::state::{ImageState, PalImageState};
use crate::store::{invalidate, persist, Descriptors, Region, Slot, RECORD_LEN};
use crate::traits::{
    CertificateStore, DeviceReset, SignatureVerifier, VerificationResult, VerifyError,
};
use consts::FILE_TYPE_FIRMWARE;
use embedded_storage::nor_flash::NorFlash;

/// Create was given an empty file path.
pub const SUB_CREATE_EMPTY_PATH: u32 = 1;
/// Only firmware files are stored in flash.
pub const SUB_CREATE_FILE_TYPE: u32 = 2;
/// Another file is still open.
pub const SUB_CREATE_SESSION_OPEN: u32 = 3;
/// The running image is still on trial and must not be overwritten.
pub const SUB_CREATE_PENDING_COMMIT: u32 = 4;
/// The job announced an empty file.
pub const SUB_CREATE_EMPTY_FILE: u32 = 5;
/// The job's file or certificate path does not fit a context.
pub const SUB_CREATE_PATH_TOO_LONG: u32 = 6;
/// The job carried no signature.
pub const SUB_SIGNATURE_MISSING: u32 = 1;
/// The job's signature does not fit a context.
pub const SUB_SIGNATURE_TOO_LONG: u32 = 2;
/// Activation was requested with a file still open.
pub const SUB_ACTIVATE_SESSION_OPEN: u32 = 1;

/// Bytes read back per verifier update at close.
const READ_BACK_CHUNK: usize = 256;

/// The OTA image lifecycle over a pair of flash slots.
///
/// Owns the flash, the signature verifier, the certificate store and the
/// platform reset. At most one file is open at a time.
pub struct OtaPal<F, V, C, R> {
    flash: F,
    verifier: V,
    certificates: C,
    reset: R,
    config: PalConfig,
    session: Option<WriteSession>,
    next_handle: u32,
}

impl<F, V, C, R> OtaPal<F, V, C, R>
where
    F: NorFlash,
    V: SignatureVerifier,
    C: CertificateStore,
    R: DeviceReset,
{
    /// Fails with [`MainStatus::Uninitialized`] when the layout does not fit
    /// the flash. The sub-status is the [`crate::LayoutError`].
    pub fn new(flash: F, verifier: V, certificates: C, reset: R, config: PalConfig) -> PalResult<Self> {
        validate_layout(
            &config.layout,
            flash.capacity(),
            F::READ_SIZE,
            F::WRITE_SIZE,
            F::ERASE_SIZE,
            RECORD_LEN,
        )
        .map_err(|e| {
            error!("invalid flash layout: {:?}", e);
            PalError::new(MainStatus::Uninitialized, e as u32)
        })?;

        Ok(Self {
            flash,
            verifier,
            certificates,
            reset,
            config,
            session: None,
            next_handle: 1,
        })
    }

    pub fn config(&self) -> &PalConfig {
        &self.config
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    /// Give back the collaborators, dropping any open session.
    pub fn release(self) -> (F, V, C, R) {
        (self.flash, self.verifier, self.certificates, self.reset)
    }

    /// Open the update slot for writing and store the session handle in `ctx`.
    pub fn create_file_for_rx(&mut self, ctx: &mut OtaFileContext) -> PalResult {
        let fail = |sub| PalError::new(MainStatus::RxFileCreateFailed, sub);

        if ctx.file_path.is_empty() {
            return Err(fail(SUB_CREATE_EMPTY_PATH));
        }
        if ctx.file_type != FILE_TYPE_FIRMWARE {
            warn!("unsupported file type {}", ctx.file_type);
            return Err(fail(SUB_CREATE_FILE_TYPE));
        }
        if self.session.is_some() {
            return Err(fail(SUB_CREATE_SESSION_OPEN));
        }
        if ctx.file_size == 0 {
            return Err(fail(SUB_CREATE_EMPTY_FILE));
        }
        if ctx.file_size > self.config.layout.image_capacity {
            warn!(
                "file of {} bytes exceeds image capacity {}",
                ctx.file_size, self.config.layout.image_capacity
            );
            return Err(PalError::new(MainStatus::RxFileTooLarge, ctx.file_size));
        }

        let descriptors = self.descriptors(MainStatus::RxFileCreateFailed)?;
        if let Some((slot, d)) = descriptors.newest() {
            if d.flags == ImageFlags::PendingCommit {
                warn!("image in slot {:?} awaits commit, refusing download", slot);
                return Err(fail(SUB_CREATE_PENDING_COMMIT));
            }
        }

        let slot = descriptors.update_slot();
        // The slot's image is about to be overwritten, its old record must
        // not be booted or reported for the new bytes.
        if !matches!(descriptors.region(slot), Region::Blank) {
            invalidate(&mut self.flash, &self.config.layout, slot)
                .map_err(|e| PalError::flash(MainStatus::RxFileCreateFailed, e))?;
        }

        let handle = FileHandle(self.next_handle);
        let mut session = WriteSession::new(
            handle,
            slot,
            self.config.layout.images[slot.index()],
            ctx.file_size,
            F::WRITE_SIZE,
        );
        if self.config.erase_policy == ErasePolicy::OnCreate {
            session
                .erase_all(&mut self.flash)
                .map_err(|e| PalError::flash(MainStatus::RxFileCreateFailed, e))?;
        }

        info!(
            "receiving {} bytes into slot {:?}, handle {}",
            ctx.file_size, slot, handle.0
        );
        self.next_handle = self.next_handle.wrapping_add(1);
        self.session = Some(session);
        ctx.file_handle = Some(handle);
        Ok(())
    }

    /// Write `data` at `offset` into the open file. Returns the number of
    /// bytes accepted, short of `data.len()` when flash failed part way.
    pub fn write_block(&mut self, ctx: &OtaFileContext, offset: u32, data: &[u8]) -> PalResult<usize> {
        let session = match (ctx.file_handle, self.session.as_mut()) {
            (Some(handle), Some(session)) if session.handle == handle => session,
            _ => return Err(PalError::new(MainStatus::NullFileContext, 0)),
        };
        session.write_block(&mut self.flash, offset, data).map_err(|e| {
            error!("block at {} ({} bytes) failed: {}", offset, data.len(), e);
            e
        })
    }

    /// Finish the file, verify it against `ctx.signature` and record the
    /// outcome. The handle in `ctx` is cleared whatever the result.
    pub fn close_file(&mut self, ctx: &mut OtaFileContext) -> PalResult {
        let handle = ctx.file_handle.take();
        let mut session = match (handle, self.session.take()) {
            (Some(handle), Some(session)) if session.handle == handle => session,
            (_, other) => {
                self.session = other;
                return Err(PalError::new(MainStatus::NullFileContext, 0));
            }
        };

        session.flush(&mut self.flash).map_err(|e| {
            error!("flushing buffered writes failed: {}", e);
            PalError::new(MainStatus::FileClose, e.sub)
        })?;

        let verified = self.verify(&session, ctx);
        let flags = if verified.is_ok() {
            ImageFlags::New
        } else {
            ImageFlags::Aborted
        };
        let recorded = self.record(&session, ctx, flags);

        match (verified, recorded) {
            (Ok(()), Ok(sequence)) => {
                info!(
                    "image in slot {:?} verified, sequence {}",
                    session.slot, sequence
                );
                Ok(())
            }
            (Ok(()), Err(e)) => {
                error!("recording verified image failed: {}", e);
                Err(e)
            }
            (Err(e), Ok(_)) => {
                error!("image in slot {:?} rejected: {}", session.slot, e);
                if let Err(abort) = self.set_platform_image_state(ImageState::Aborted) {
                    error!("marking image aborted failed: {}", abort);
                }
                Err(e)
            }
            (Err(e), Err(record)) => {
                error!("image in slot {:?} rejected: {}", session.slot, e);
                error!("recording rejected image failed: {}", record);
                Err(e)
            }
        }
    }

    /// Write the closed file's descriptor with `flags`. Returns its sequence.
    fn record(
        &mut self,
        session: &WriteSession,
        ctx: &OtaFileContext,
        flags: ImageFlags,
    ) -> PalResult<u32> {
        let descriptors = self.descriptors(MainStatus::FileClose)?;
        let start = session.base();
        let descriptor = ImageDescriptor::new(
            flags,
            descriptors.next_sequence(),
            start,
            start + session.file_size,
            start + self.config.layout.entry_offset,
            self.config.hardware_id,
            V::SIGNATURE_TYPE,
            &ctx.signature,
        )
        .map_err(|e| PalError::new(MainStatus::DescriptorWriteFailed, e.sub_status()))?;
        persist(&mut self.flash, &self.config.layout, session.slot, &descriptor)
            .map_err(|e| e.into_pal(MainStatus::DescriptorWriteFailed))?;
        Ok(descriptor.sequence)
    }

    /// Drop the open file without verifying it. Succeeds when nothing is
    /// open.
    pub fn abort(&mut self, ctx: &mut OtaFileContext) -> PalResult {
        let Some(handle) = ctx.file_handle.take() else {
            return Ok(());
        };
        let mut session = match self.session.take() {
            Some(session) if session.handle == handle => session,
            other => {
                debug!("abort with stale handle {}", handle.0);
                self.session = other;
                return Ok(());
            }
        };

        info!("aborting file in slot {:?}", session.slot);
        if self.config.abort_policy == AbortPolicy::RollBack {
            session
                .roll_back(&mut self.flash)
                .map_err(|e| PalError::flash(MainStatus::FileAbort, e))?;
        }
        Ok(())
    }

    /// Reset into the new image. Only returns on failure.
    pub fn activate_new_image(&mut self, ctx: &OtaFileContext) -> PalResult {
        if self.session.is_some() || ctx.is_open() {
            return Err(PalError::new(
                MainStatus::ActivateFailed,
                SUB_ACTIVATE_SESSION_OPEN,
            ));
        }
        info!("activating new image");
        self.reset_device()
    }

    /// Move the newest image along its lifecycle.
    pub fn set_platform_image_state(&mut self, state: ImageState) -> PalResult {
        let failed = match state {
            ImageState::Testing => MainStatus::BadImageState,
            ImageState::Accepted => MainStatus::CommitFailed,
            ImageState::Rejected => MainStatus::RejectFailed,
            ImageState::Aborted => MainStatus::AbortFailed,
            ImageState::Unknown => return Err(PalError::new(MainStatus::BadImageState, 0)),
        };

        let descriptors = self.descriptors(failed)?;
        let Some((slot, current)) = descriptors.newest() else {
            return match state {
                ImageState::Aborted => Ok(()),
                _ => Err(PalError::new(failed, 0)),
            };
        };
        let refuse = || PalError::new(failed, current.flags as u32);

        use ImageFlags::*;
        let next = match (state, current.flags) {
            (ImageState::Testing, New | PendingCommit) => PendingCommit,
            (ImageState::Accepted, PendingCommit) => Valid,
            (ImageState::Rejected | ImageState::Aborted, New | PendingCommit | Aborted) => Invalid,
            (ImageState::Rejected, Invalid) | (ImageState::Aborted, Invalid | Valid) => return Ok(()),
            _ => {
                warn!("{:?} not allowed from {:?}", state, current.flags);
                return Err(refuse());
            }
        };
        if next == current.flags {
            return Ok(());
        }

        info!("slot {:?} {:?} -> {:?}", slot, current.flags, next);
        let mut updated = current.clone();
        updated.flags = next;
        persist(&mut self.flash, &self.config.layout, slot, &updated)
            .map_err(|e| e.into_pal(failed))
    }

    /// Lifecycle state of the newest image.
    pub fn get_platform_image_state(&mut self) -> PalImageState {
        let descriptors = match Descriptors::read(&mut self.flash, &self.config.layout) {
            Ok(d) => d,
            Err(e) => {
                let e = PalError::flash(MainStatus::Uninitialized, e);
                error!("reading descriptors failed: {}", e);
                return PalImageState::Unknown;
            }
        };
        if descriptors.any_corrupt() {
            return PalImageState::Invalid;
        }
        match descriptors.newest().map(|(_, d)| d.flags) {
            Some(ImageFlags::PendingCommit) => PalImageState::PendingCommit,
            Some(ImageFlags::Valid | ImageFlags::New) => PalImageState::Valid,
            _ => PalImageState::Invalid,
        }
    }

    /// Reset the device. Only returns on failure.
    pub fn reset_device(&mut self) -> PalResult {
        let unsupported = self.reset.reset();
        error!("device reset not supported: {}", unsupported.0);
        Err(PalError::new(MainStatus::ActivateFailed, unsupported.0))
    }

    /// Slot the bootloader should start.
    pub fn boot_slot(&mut self) -> PalResult<Slot> {
        Ok(self.descriptors(MainStatus::Uninitialized)?.boot_slot())
    }

    /// Decoded descriptor of `slot`, `None` when blank or corrupt.
    pub fn descriptor(&mut self, slot: Slot) -> PalResult<Option<ImageDescriptor>> {
        Ok(self
            .descriptors(MainStatus::Uninitialized)?
            .descriptor(slot)
            .cloned())
    }

    fn descriptors(&mut self, failed: MainStatus) -> PalResult<Descriptors> {
        Descriptors::read(&mut self.flash, &self.config.layout).map_err(|e| {
            let e = PalError::flash(failed, e);
            error!("reading descriptors failed: {}", e);
            e
        })
    }

    /// Read the file back and check it against the job's signature.
    fn verify(&mut self, session: &WriteSession, ctx: &OtaFileContext) -> PalResult {
        if ctx.signature.is_empty() {
            return Err(PalError::new(
                MainStatus::SignatureCheckFailed,
                SUB_SIGNATURE_MISSING,
            ));
        }
        let certificate = match self.certificates.certificate(&ctx.cert_filepath) {
            Some(certificate) => certificate,
            None => {
                debug!("certificate {} not found, using built-in", ctx.cert_filepath.as_str());
                self.config.fallback_certificate
            }
        };

        self.verifier.start();
        let mut buf = [0u8; READ_BACK_CHUNK];
        let mut pos = 0;
        while pos < session.file_size {
            let n = (session.file_size - pos).min(READ_BACK_CHUNK as u32) as usize;
            let read_len = n.div_ceil(F::READ_SIZE) * F::READ_SIZE;
            self.flash
                .read(session.base() + pos, &mut buf[..read_len])
                .map_err(|e| PalError::flash(MainStatus::FileClose, e))?;
            self.verifier.update(&buf[..n]);
            pos += n as u32;
        }

        match self.verifier.finish(certificate, &ctx.signature) {
            Ok(VerificationResult::Valid) => Ok(()),
            Ok(VerificationResult::Invalid) => {
                Err(PalError::new(MainStatus::SignatureCheckFailed, 0))
            }
            Err(VerifyError::BadCertificate(sub)) => {
                Err(PalError::new(MainStatus::BadSignerCert, sub))
            }
        }
    }
}
