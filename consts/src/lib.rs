// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

#![no_std]

/// Signature algorithm identifier for SHA-256 digests signed with ECDSA on P-256.
/// Job documents name the algorithm with this string.
pub const SIGNATURE_TYPE_SHA256_ECDSA: &str = "sig-sha256-ecdsa";

/// Magic bytes at the start of every image descriptor.
/// Erased flash reads as 0xFF, so a blank region never matches.
pub const DESCRIPTOR_MAGIC: [u8; 8] = *b"OTAIMGD1";

/// Largest signature blob a descriptor can hold.
/// Large enough for an RSA-2048 signature; DER encoded P-256 signatures use at most 72 bytes.
pub const MAX_SIGNATURE_SIZE: usize = 256;

/// Size of the NUL padded signature type field in a descriptor.
pub const MAX_SIGNATURE_TYPE_LEN: usize = 32;

/// Longest file path or certificate path accepted in a file context.
pub const MAX_FILE_PATH_LEN: usize = 64;

/// File type for firmware images. Other file types are not stored in NOR flash.
pub const FILE_TYPE_FIRMWARE: u32 = 0;

/// Block size the host uses when pushing an image.
pub const OTA_BLOCK_SIZE: usize = 256;

/// Code signing certificate used when a job names a certificate path that
/// cannot be found on the device.
pub const CODE_SIGNING_CERTIFICATE_PEM: &[u8] = b"-----BEGIN PUBLIC KEY-----
MFkwEwYHKoZIzj0CAQYIKoZIzj0DAQcDQgAE7SFtjPuThObzRwDJhOrCNFEaq0NO
g1eHDNcrudStS6+Az5RDu6SNgqQfVZICDsqYy7zJCY0zzlxkbP9rsW9lcw==
-----END PUBLIC KEY-----
";
