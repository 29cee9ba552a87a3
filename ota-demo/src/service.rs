// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Maps host messages onto PAL calls.

use crc::{Crc, CRC_32_ISCSI};
use defmt::{info, warn};
use embedded_storage::nor_flash::NorFlash;
use host_protocol::{HostProtocolMessage, Ota, State};
use ota_pal::{
    CertificateStore, DeviceReset, OtaFileContext, OtaPal, PalImageState, PalResult, PalStatus,
    SignatureVerifier,
};

const CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

pub struct OtaService<F, V, C, R> {
    pal: OtaPal<F, V, C, R>,
    /// Context of the file being received, or of the last one.
    ctx: OtaFileContext,
}

impl<F, V, C, R> OtaService<F, V, C, R>
where
    F: NorFlash,
    V: SignatureVerifier,
    C: CertificateStore,
    R: DeviceReset,
{
    pub fn new(pal: OtaPal<F, V, C, R>) -> Self {
        Self {
            pal,
            ctx: OtaFileContext::default(),
        }
    }

    pub fn pal(&mut self) -> &mut OtaPal<F, V, C, R> {
        &mut self.pal
    }

    /// Handle one message. Returns the reply, if the message needs one.
    pub fn handle(&mut self, msg: HostProtocolMessage<'_>) -> Option<HostProtocolMessage<'static>> {
        match msg {
            HostProtocolMessage::Ota(ota) => self.handle_ota(ota).map(HostProtocolMessage::Ota),
            HostProtocolMessage::GetState => Some(HostProtocolMessage::AckState(self.state())),
            // Replies and requests the caller deals with itself.
            HostProtocolMessage::Reset | HostProtocolMessage::AckState(_) => None,
        }
    }

    fn handle_ota(&mut self, msg: Ota<'_>) -> Option<Ota<'static>> {
        let reply = match msg {
            Ota::CreateFile {
                path,
                file_size,
                file_type,
                signature,
                certificate,
            } => {
                info!("Create {} ({} bytes)", path, file_size);
                ack(&self.create(path, file_size, file_type, signature, certificate))
            }
            Ota::WriteBlock { offset, data } => match self.pal.write_block(&self.ctx, offset, data) {
                Ok(written) => Ota::AckWriteBlock {
                    offset,
                    written: written as u32,
                    crc: CRC.checksum(&data[..written]),
                },
                Err(e) => {
                    warn!("Block at {} failed: {}", offset, e);
                    Ota::Ack(e.into())
                }
            },
            Ota::CloseFile => {
                let result = self.pal.close_file(&mut self.ctx);
                info!("Close: {}", result);
                ack(&result)
            }
            Ota::Abort => ack(&self.pal.abort(&mut self.ctx)),
            Ota::SetImageState(state) => {
                info!("Set image state {}", state);
                ack(&self.pal.set_platform_image_state(state))
            }
            Ota::GetImageState => Ota::AckImageState(self.pal.get_platform_image_state()),
            // Only comes back if the reset could not be issued.
            Ota::Activate => ack(&self.pal.activate_new_image(&self.ctx)),
            Ota::AckWriteBlock { .. } | Ota::AckImageState(_) | Ota::Ack(_) => return None,
        };
        Some(reply)
    }

    fn create(
        &mut self,
        path: &str,
        file_size: u32,
        file_type: u32,
        signature: &[u8],
        certificate: &str,
    ) -> PalResult {
        let mut ctx = OtaFileContext::firmware(path, file_size)?;
        ctx.file_type = file_type;
        ctx.set_signature(signature)?;
        ctx.set_cert_filepath(certificate)?;
        self.pal.create_file_for_rx(&mut ctx)?;
        self.ctx = ctx;
        Ok(())
    }

    fn state(&mut self) -> State {
        if self.ctx.is_open() {
            return State::Receiving;
        }
        match self.pal.get_platform_image_state() {
            PalImageState::PendingCommit => State::PendingCommit,
            PalImageState::Unknown => State::Unknown,
            PalImageState::Valid | PalImageState::Invalid => State::Idle,
        }
    }
}

fn ack(result: &PalResult) -> Ota<'static> {
    Ota::Ack(PalStatus::from(result))
}
