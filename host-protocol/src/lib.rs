// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Host to device OTA control protocol.
//! A host pushes a signed image over UART and drives the device's OTA PAL
//! through its image lifecycle. Messages are postcard encoded, COBS framed.

#![no_std]
use ota_pal::{ImageState, PalImageState, PalStatus};
use serde::{Deserialize, Serialize};

/// Maximum supported message size to be serialized or deserialized by `postcard`.
/// Messages larger than this will be rejected.
pub const COBS_MAX_MSG_SIZE: usize = 512;

/// OTA PAL operations and their replies.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub enum Ota<'a> {
    /// Open a file for receiving into the update slot
    CreateFile {
        path: &'a str,
        file_size: u32,
        file_type: u32,
        /// Signature from the job document
        signature: &'a [u8],
        /// Path of the certificate to verify with, empty for the built-in one
        certificate: &'a str,
    },
    /// Write a block of the open file
    WriteBlock { offset: u32, data: &'a [u8] },
    /// Block written, with the CRC of the data received
    AckWriteBlock { offset: u32, written: u32, crc: u32 },
    /// Finish and verify the open file
    CloseFile,
    /// Drop the open file
    Abort,
    /// Move the newest image along its lifecycle
    SetImageState(ImageState),
    /// Request the lifecycle state of the newest image
    GetImageState,
    /// Response with the image state
    AckImageState(PalImageState),
    /// Reset into the new image
    Activate,
    /// Outcome of any operation without a dedicated reply
    Ack(PalStatus),
}

/// Current state of the device's OTA service
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub enum State {
    /// No file open
    Idle,
    /// A file is open and blocks are being received
    Receiving,
    /// Running an image that awaits commit
    PendingCommit,
    /// Device state is undefined or transitioning
    Unknown,
}

/// Top-level message types for host-target communication
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub enum HostProtocolMessage<'a> {
    /// OTA file transfer and image lifecycle messages
    Ota(#[serde(borrow)] Ota<'a>),
    /// Request device reset
    Reset,
    /// Query current device state
    GetState,
    /// Response with current state
    AckState(State),
}
