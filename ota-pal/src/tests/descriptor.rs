// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::descriptor::{Error, ImageDescriptor, ImageFlags};
use consts::SIGNATURE_TYPE_SHA256_ECDSA;

fn descriptor() -> ImageDescriptor {
    ImageDescriptor::new(
        ImageFlags::PendingCommit,
        7,
        0x1_0000,
        0x1_4000,
        0x1_0100,
        0x52,
        SIGNATURE_TYPE_SHA256_ECDSA,
        &[0xab; 71],
    )
    .unwrap()
}

fn serialized() -> [u8; ImageDescriptor::SIZE] {
    let mut buf = [0u8; ImageDescriptor::SIZE];
    descriptor().serialize(&mut buf).unwrap();
    buf
}

/// Serialize a descriptor and parse it back.
#[test]
fn parse_serialized() {
    let buf = serialized();
    assert_eq!(&buf[..8], b"OTAIMGD1");
    assert_eq!(buf[8], 0x5a);
    assert_eq!(ImageDescriptor::deserialize(&buf), Ok(Some(descriptor())));
}

/// Erased flash is not a descriptor, and not an error either.
#[test]
fn erased_is_blank() {
    let buf = [0xff; ImageDescriptor::SIZE];
    assert_eq!(ImageDescriptor::deserialize(&buf), Ok(None));
}

/// Anything but all 0xFF needs the magic.
#[test]
fn bad_magic() {
    let mut buf = [0xff; ImageDescriptor::SIZE];
    buf[100] = 0;
    assert_eq!(ImageDescriptor::deserialize(&buf), Err(Error::BadMagic));

    let mut buf = serialized();
    buf[0] = b'X';
    assert_eq!(ImageDescriptor::deserialize(&buf), Err(Error::BadMagic));
}

/// A torn or bit-flipped record fails the CRC.
#[test]
fn crc_mismatch() {
    let mut buf = serialized();
    buf[20] ^= 0x01;
    assert!(matches!(
        ImageDescriptor::deserialize(&buf),
        Err(Error::CrcMismatch { .. })
    ));

    // Half written: the tail is still erased.
    let mut buf = serialized();
    buf[200..].fill(0xff);
    assert!(matches!(
        ImageDescriptor::deserialize(&buf),
        Err(Error::CrcMismatch { .. })
    ));
}

#[test]
fn too_short() {
    let buf = serialized();
    assert_eq!(
        ImageDescriptor::deserialize(&buf[..ImageDescriptor::SIZE - 1]),
        Err(Error::TooShort)
    );
    let mut small = [0u8; 10];
    assert_eq!(
        descriptor().serialize(&mut small),
        Err(Error::SerializeBufferTooSmall)
    );
}

#[test]
fn oversized_fields_rejected() {
    assert_eq!(
        ImageDescriptor::new(ImageFlags::New, 1, 0, 1, 0, 0, &"x".repeat(33), &[]),
        Err(Error::SignatureTypeTooLong)
    );
    assert_eq!(
        ImageDescriptor::new(ImageFlags::New, 1, 0, 1, 0, 0, "t", &[0; 257]),
        Err(Error::SignatureTooLong)
    );
}

#[test]
fn flag_values_are_distinct_and_never_erased() {
    let flags = [
        ImageFlags::New,
        ImageFlags::PendingCommit,
        ImageFlags::Valid,
        ImageFlags::Invalid,
        ImageFlags::Aborted,
    ];
    for (i, a) in flags.iter().enumerate() {
        assert_ne!(*a as u8, 0xff);
        assert_eq!(ImageFlags::from_u8(*a as u8), Some(*a));
        for b in &flags[i + 1..] {
            assert!((*a as u8 ^ *b as u8).count_ones() >= 2);
        }
    }
    assert_eq!(ImageFlags::from_u8(0xff), None);
}

#[test]
fn image_len() {
    assert_eq!(descriptor().image_len(), 0x4000);
}
