// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Persisted image descriptor.
//!
//! Fixed little-endian layout, [`ImageDescriptor::SIZE`] bytes:
//!
//! | offset | size | field                              |
//! |--------|------|------------------------------------|
//! | 0      | 8    | magic                              |
//! | 8      | 1    | flags                              |
//! | 9      | 3    | reserved, zero                     |
//! | 12     | 4    | sequence number                    |
//! | 16     | 4    | start address                      |
//! | 20     | 4    | end address                        |
//! | 24     | 4    | execution address                  |
//! | 28     | 4    | hardware id                        |
//! | 32     | 32   | signature type, NUL padded         |
//! | 64     | 2    | signature length                   |
//! | 66     | 2    | reserved, zero                     |
//! | 68     | 256  | signature, zero padded             |
//! | 324    | 4    | CRC-32/ISCSI over bytes 0..324     |

use consts::{DESCRIPTOR_MAGIC, MAX_SIGNATURE_SIZE, MAX_SIGNATURE_TYPE_LEN};
use crc::{Crc, CRC_32_ISCSI};
use heapless::{String, Vec};

const CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Lifecycle state of the image a descriptor describes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ImageFlags {
    // Values differ from each other in at least four bits, and none of them
    // is the erased value 0xFF.
    /// Downloaded and signature checked, never booted.
    New = 0x3c,
    /// Booted in self-test, waiting for the agent to accept or reject it.
    PendingCommit = 0x5a,
    /// Accepted after self-test.
    Valid = 0xa5,
    /// Rejected, aborted or failed verification.
    Invalid = 0xc3,
    /// Closed with a failed signature check, not yet marked invalid.
    Aborted = 0x96,
}

impl ImageFlags {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x3c => Some(Self::New),
            0x5a => Some(Self::PendingCommit),
            0xa5 => Some(Self::Valid),
            0xc3 => Some(Self::Invalid),
            0x96 => Some(Self::Aborted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescriptor {
    pub flags: ImageFlags,
    pub sequence: u32,
    pub start_address: u32,
    pub end_address: u32,
    pub execution_address: u32,
    pub hardware_id: u32,
    pub signature_type: String<MAX_SIGNATURE_TYPE_LEN>,
    pub signature: Vec<u8, MAX_SIGNATURE_SIZE>,
}

impl ImageDescriptor {
    /// Size of the serialized descriptor in bytes.
    pub const SIZE: usize = 328;

    const SIGNATURE_TYPE_OFFSET: usize = 32;
    const SIGNATURE_LEN_OFFSET: usize = 64;
    const SIGNATURE_OFFSET: usize = 68;
    const CRC_OFFSET: usize = Self::SIGNATURE_OFFSET + MAX_SIGNATURE_SIZE;

    /// Create a descriptor. Fails if the signature type or signature does
    /// not fit the fixed layout.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        flags: ImageFlags,
        sequence: u32,
        start_address: u32,
        end_address: u32,
        execution_address: u32,
        hardware_id: u32,
        signature_type: &str,
        signature: &[u8],
    ) -> Result<Self, Error> {
        let mut sig_type = String::new();
        sig_type
            .push_str(signature_type)
            .map_err(|_| Error::SignatureTypeTooLong)?;
        let signature = Vec::from_slice(signature).map_err(|_| Error::SignatureTooLong)?;
        Ok(Self {
            flags,
            sequence,
            start_address,
            end_address,
            execution_address,
            hardware_id,
            signature_type: sig_type,
            signature,
        })
    }

    /// Image length in bytes.
    pub fn image_len(&self) -> u32 {
        self.end_address.saturating_sub(self.start_address)
    }

    /// Serialize the descriptor to a buffer. Exactly [`Self::SIZE`] bytes are
    /// written.
    pub fn serialize(&self, buf: &mut [u8]) -> Result<(), Error> {
        if buf.len() < Self::SIZE {
            return Err(Error::SerializeBufferTooSmall);
        }
        let buf = &mut buf[..Self::SIZE];
        buf.fill(0);

        buf[..8].copy_from_slice(&DESCRIPTOR_MAGIC);
        buf[8] = self.flags as u8;
        buf[12..16].copy_from_slice(&self.sequence.to_le_bytes());
        buf[16..20].copy_from_slice(&self.start_address.to_le_bytes());
        buf[20..24].copy_from_slice(&self.end_address.to_le_bytes());
        buf[24..28].copy_from_slice(&self.execution_address.to_le_bytes());
        buf[28..32].copy_from_slice(&self.hardware_id.to_le_bytes());
        let sig_type = self.signature_type.as_bytes();
        buf[Self::SIGNATURE_TYPE_OFFSET..Self::SIGNATURE_TYPE_OFFSET + sig_type.len()]
            .copy_from_slice(sig_type);
        let sig_len = self.signature.len() as u16;
        buf[Self::SIGNATURE_LEN_OFFSET..Self::SIGNATURE_LEN_OFFSET + 2]
            .copy_from_slice(&sig_len.to_le_bytes());
        buf[Self::SIGNATURE_OFFSET..Self::SIGNATURE_OFFSET + self.signature.len()]
            .copy_from_slice(&self.signature);

        let crc = CRC.checksum(&buf[..Self::CRC_OFFSET]);
        buf[Self::CRC_OFFSET..Self::SIZE].copy_from_slice(&crc.to_le_bytes());
        Ok(())
    }

    /// Deserialize a descriptor.
    ///
    /// Returns `None` for erased flash. Anything else that is not a well
    /// formed descriptor is an error.
    pub fn deserialize(data: &[u8]) -> Result<Option<Self>, Error> {
        if data.len() < Self::SIZE {
            return Err(Error::TooShort);
        }
        let data = &data[..Self::SIZE];
        if data.iter().all(|&b| b == 0xff) {
            return Ok(None);
        }
        if data[..8] != DESCRIPTOR_MAGIC {
            return Err(Error::BadMagic);
        }

        let stored_crc = u32::from_le_bytes(le4(data, Self::CRC_OFFSET));
        let crc = CRC.checksum(&data[..Self::CRC_OFFSET]);
        if stored_crc != crc {
            return Err(Error::CrcMismatch {
                stored: stored_crc,
                computed: crc,
            });
        }

        let flags = ImageFlags::from_u8(data[8]).ok_or(Error::BadFlags(data[8]))?;
        if data[9..12].iter().any(|&b| b != 0) || data[66..68].iter().any(|&b| b != 0) {
            return Err(Error::InvalidReservedBytes);
        }

        let sig_type_field =
            &data[Self::SIGNATURE_TYPE_OFFSET..Self::SIGNATURE_TYPE_OFFSET + MAX_SIGNATURE_TYPE_LEN];
        let first_zero = sig_type_field
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(sig_type_field.len());
        let signature_type = core::str::from_utf8(&sig_type_field[..first_zero])
            .map_err(|_| Error::InvalidSignatureTypeUtf8)?;
        if sig_type_field[first_zero..].iter().any(|&b| b != 0) {
            return Err(Error::InvalidSignatureTypeTrailingBytes);
        }

        let sig_len = u16::from_le_bytes([
            data[Self::SIGNATURE_LEN_OFFSET],
            data[Self::SIGNATURE_LEN_OFFSET + 1],
        ]) as usize;
        if sig_len > MAX_SIGNATURE_SIZE {
            return Err(Error::SignatureTooLong);
        }
        let signature = &data[Self::SIGNATURE_OFFSET..Self::SIGNATURE_OFFSET + sig_len];

        Self::new(
            flags,
            u32::from_le_bytes(le4(data, 12)),
            u32::from_le_bytes(le4(data, 16)),
            u32::from_le_bytes(le4(data, 20)),
            u32::from_le_bytes(le4(data, 24)),
            u32::from_le_bytes(le4(data, 28)),
            signature_type,
            signature,
        )
        .map(Some)
    }
}

fn le4(data: &[u8], at: usize) -> [u8; 4] {
    [data[at], data[at + 1], data[at + 2], data[at + 3]]
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    BadFlags(u8),
    BadMagic,
    CrcMismatch { stored: u32, computed: u32 },
    InvalidReservedBytes,
    InvalidSignatureTypeTrailingBytes,
    InvalidSignatureTypeUtf8,
    SerializeBufferTooSmall,
    SignatureTooLong,
    SignatureTypeTooLong,
    TooShort,
}

impl Error {
    /// Sub-status reported when a descriptor cannot be used.
    pub fn sub_status(&self) -> u32 {
        match self {
            Self::BadFlags(_) => 0x20,
            Self::BadMagic => 0x21,
            Self::CrcMismatch { .. } => 0x22,
            Self::InvalidReservedBytes => 0x23,
            Self::InvalidSignatureTypeTrailingBytes => 0x24,
            Self::InvalidSignatureTypeUtf8 => 0x25,
            Self::SerializeBufferTooSmall => 0x26,
            Self::SignatureTooLong => 0x27,
            Self::SignatureTypeTooLong => 0x28,
            Self::TooShort => 0x29,
        }
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::BadFlags(b) => write!(f, "unknown image flags {b:#04x} in descriptor"),
            Self::BadMagic => write!(f, "bad magic in descriptor"),
            Self::CrcMismatch { stored, computed } => write!(
                f,
                "descriptor CRC mismatch: stored {stored:#010x}, computed {computed:#010x}"
            ),
            Self::InvalidReservedBytes => write!(f, "invalid reserved bytes in descriptor"),
            Self::InvalidSignatureTypeTrailingBytes => {
                write!(f, "invalid signature type trailing bytes in descriptor")
            }
            Self::InvalidSignatureTypeUtf8 => write!(f, "invalid signature type UTF-8 in descriptor"),
            Self::SerializeBufferTooSmall => write!(f, "buffer too small for serialization"),
            Self::SignatureTooLong => write!(f, "signature too long for descriptor"),
            Self::SignatureTypeTooLong => write!(f, "signature type too long for descriptor"),
            Self::TooShort => write!(f, "descriptor too short"),
        }
    }
}
