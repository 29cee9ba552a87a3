// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! SHA-256 + ECDSA P-256 verifier.

use crate::traits::{SignatureVerifier, VerificationResult, VerifyError};
use consts::SIGNATURE_TYPE_SHA256_ECDSA;
use p256::ecdsa::signature::hazmat::PrehashVerifier;
use p256::ecdsa::{Signature, VerifyingKey};
use p256::pkcs8::DecodePublicKey;
use sha2::{Digest, Sha256};

/// Certificate is PEM but could not be decoded.
pub const SUB_CERT_BAD_PEM: u32 = 0x10;
/// PEM label is not `PUBLIC KEY`.
pub const SUB_CERT_BAD_LABEL: u32 = 0x11;
/// Key is not a P-256 SubjectPublicKeyInfo.
pub const SUB_CERT_BAD_KEY: u32 = 0x12;

const PEM_LABEL: &str = "PUBLIC KEY";
const PEM_PREFIX: &[u8] = b"-----BEGIN";
// A P-256 SubjectPublicKeyInfo is 91 bytes of DER.
const MAX_KEY_DER: usize = 128;

#[derive(Debug, Clone, Default)]
pub struct EcdsaP256Verifier {
    hasher: Sha256,
}

impl EcdsaP256Verifier {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Parse a PEM `PUBLIC KEY` or raw DER SubjectPublicKeyInfo.
pub fn parse_public_key(certificate: &[u8]) -> Result<VerifyingKey, VerifyError> {
    let mut buf = [0u8; MAX_KEY_DER];
    let der = if certificate.starts_with(PEM_PREFIX) {
        let (label, der) = pem_rfc7468::decode(certificate, &mut buf)
            .map_err(|_| VerifyError::BadCertificate(SUB_CERT_BAD_PEM))?;
        if label != PEM_LABEL {
            return Err(VerifyError::BadCertificate(SUB_CERT_BAD_LABEL));
        }
        der
    } else {
        certificate
    };
    VerifyingKey::from_public_key_der(der).map_err(|_| VerifyError::BadCertificate(SUB_CERT_BAD_KEY))
}

/// ASN.1 DER, or raw `r || s`.
fn parse_signature(signature: &[u8]) -> Option<Signature> {
    Signature::from_der(signature)
        .or_else(|_| Signature::from_slice(signature))
        .ok()
}

impl SignatureVerifier for EcdsaP256Verifier {
    const SIGNATURE_TYPE: &'static str = SIGNATURE_TYPE_SHA256_ECDSA;

    fn start(&mut self) {
        self.hasher = Sha256::new();
    }

    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    fn finish(
        &mut self,
        certificate: &[u8],
        signature: &[u8],
    ) -> Result<VerificationResult, VerifyError> {
        let digest = self.hasher.finalize_reset();
        let key = parse_public_key(certificate)?;
        let Some(signature) = parse_signature(signature) else {
            warn!("malformed signature, {} bytes", signature.len());
            return Ok(VerificationResult::Invalid);
        };
        match key.verify_prehash(&digest, &signature) {
            Ok(()) => Ok(VerificationResult::Valid),
            Err(_) => Ok(VerificationResult::Invalid),
        }
    }
}
