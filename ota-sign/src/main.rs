// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use {
    colored::Colorize,
    ota_pal::{
        descriptor::ImageDescriptor, EcdsaP256Verifier, SignatureVerifier, VerificationResult,
        VerifyError,
    },
    p256::{
        ecdsa::{signature::hazmat::PrehashSigner, Signature, SigningKey},
        pkcs8::EncodePublicKey,
    },
    sha2::Digest,
    std::{ffi::OsString, io::Write, path::Path},
};

mod args;

#[cfg(test)]
mod tests;

/// Bytes of signature printed per line by `dump`.
const HEX_LINE: usize = 32;

fn main() -> std::process::ExitCode {
    main_args(
        std::env::args_os(),
        &mut std::io::stdout(),
        &mut std::io::stderr(),
    )
    .into()
}

fn main_args<I, T>(args: I, stdout: impl Write, mut stderr: impl Write) -> ExitCode
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match run(args, stdout) {
        Ok(()) => ExitCode(0),
        Err(Error::Args(e @ args::Error::Cli(_))) => {
            // Clap already does the "error: {}" formatting.
            writeln!(stderr, "{e}").expect("write error to stderr");
            ExitCode(1)
        }
        Err(e) => {
            writeln!(stderr, "{} {e}", "error:".bold().red()).expect("write error to stderr");
            ExitCode(1)
        }
    }
}

fn run<I, T>(args: I, mut stdout: impl Write) -> Result<(), Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match args::args(args)? {
        args::Args::Dump { input } => {
            let input_buf = std::fs::read(input).map_err(Error::ReadInputFile)?;
            match ImageDescriptor::deserialize(&input_buf)? {
                Some(descriptor) => dump(&descriptor, &mut stdout).map_err(Error::Stdout)?,
                None => writeln!(&mut stdout, "{}", "erased descriptor".bold())
                    .map_err(Error::Stdout)?,
            }
        }
        args::Args::Sign {
            secret,
            certificate,
            input,
            output,
        } => {
            // Check that user is not accidentally signing with the wrong key.
            if let Some(certificate) = &certificate {
                let expected = ota_pal::ecdsa::parse_public_key(certificate)
                    .map_err(Error::Certificate)?;
                if &expected != secret.verifying_key() {
                    return Err(Error::KeyMismatch);
                }
            }

            let image = std::fs::read(&input).map_err(Error::ReadInputFile)?;
            let signature = sign(&secret, &image)?;
            std::fs::write(&output, signature.to_der().as_bytes())
                .map_err(Error::WriteOutputFile)?;

            // Sanity check that the device would accept the written signature.
            let certificate = match certificate {
                Some(certificate) => certificate,
                None => secret
                    .verifying_key()
                    .to_public_key_der()
                    .map_err(|_| Error::EncodePublicKey)?
                    .into_vec(),
            };
            match verify(&image, &output, &certificate) {
                Ok(()) => {}
                Err(Error::SignatureInvalid) => return Err(Error::OutputInvalid),
                Err(e) => return Err(e),
            }
        }
        args::Args::Verify {
            input,
            signature,
            certificate,
        } => {
            let image = std::fs::read(&input).map_err(Error::ReadInputFile)?;
            verify(&image, &signature, &certificate)?;
            writeln!(&mut stdout, "{}", "signature valid".bold().green())
                .map_err(Error::Stdout)?;
        }
    }
    Ok(())
}

fn sign(secret: &SigningKey, image: &[u8]) -> Result<Signature, Error> {
    let digest = sha2::Sha256::digest(image);
    secret.sign_prehash(&digest).map_err(Error::Sign)
}

/// Verify the way the device does, streaming the image through the
/// bundled verifier.
fn verify(image: &[u8], signature: &Path, certificate: &[u8]) -> Result<(), Error> {
    let signature = std::fs::read(signature).map_err(Error::ReadSignature)?;
    let mut verifier = EcdsaP256Verifier::new();
    verifier.start();
    for chunk in image.chunks(consts::OTA_BLOCK_SIZE) {
        verifier.update(chunk);
    }
    match verifier
        .finish(certificate, &signature)
        .map_err(Error::Certificate)?
    {
        VerificationResult::Valid => Ok(()),
        VerificationResult::Invalid => Err(Error::SignatureInvalid),
    }
}

fn dump(descriptor: &ImageDescriptor, mut stdout: impl Write) -> std::io::Result<()> {
    writeln!(&mut stdout, "{:10} {:?}", "flags".bold(), descriptor.flags)?;
    writeln!(&mut stdout, "{:10} {}", "sequence".bold(), descriptor.sequence)?;
    writeln!(
        &mut stdout,
        "{:10} {:#010x}",
        "start".bold(),
        descriptor.start_address
    )?;
    writeln!(&mut stdout, "{:10} {:#010x}", "end".bold(), descriptor.end_address)?;
    writeln!(
        &mut stdout,
        "{:10} {:#010x}",
        "entry".bold(),
        descriptor.execution_address
    )?;
    let human_size = humansize::format_size(descriptor.image_len(), humansize::BINARY);
    writeln!(
        &mut stdout,
        "{:10} {human_size} ({})",
        "size".bold(),
        descriptor.image_len(),
    )?;
    writeln!(
        &mut stdout,
        "{:10} {:#010x}",
        "hardware".bold(),
        descriptor.hardware_id
    )?;
    writeln!(
        &mut stdout,
        "{:10} {}",
        "sig type".bold(),
        descriptor.signature_type
    )?;
    let mut lines = descriptor.signature.chunks(HEX_LINE);
    writeln!(
        &mut stdout,
        "{:10} {}",
        "signature".bold(),
        lines.next().map(hex::encode).unwrap_or_default(),
    )?;
    for line in lines {
        writeln!(&mut stdout, "{} {}", " ".repeat(10), hex::encode(line))?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ExitCode(u8);

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        code.0.into()
    }
}

#[derive(Debug)]
enum Error {
    Args(args::Error),
    Certificate(VerifyError),
    Descriptor(ota_pal::descriptor::Error),
    EncodePublicKey,
    KeyMismatch,
    OutputInvalid,
    ReadInputFile(std::io::Error),
    ReadSignature(std::io::Error),
    Sign(p256::ecdsa::Error),
    SignatureInvalid,
    Stdout(std::io::Error),
    WriteOutputFile(std::io::Error),
}

impl From<args::Error> for Error {
    fn from(e: args::Error) -> Self {
        Error::Args(e)
    }
}

impl From<ota_pal::descriptor::Error> for Error {
    fn from(e: ota_pal::descriptor::Error) -> Self {
        Error::Descriptor(e)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Args(e) => write!(f, "{e}"),
            Error::Certificate(VerifyError::BadCertificate(code)) => {
                write!(f, "certificate rejected (sub-status {code:#x})")
            }
            Error::Descriptor(e) => write!(f, "{e}"),
            Error::EncodePublicKey => write!(f, "failed to encode public key"),
            Error::KeyMismatch => write!(f, "certificate does not match secret key"),
            Error::OutputInvalid => write!(
                f,
                "written signature does not verify; is another process using the output file?"
            ),
            Error::ReadInputFile(e) => write!(f, "failed to read input file: {e}"),
            Error::ReadSignature(e) => write!(f, "failed to read signature file: {e}"),
            Error::Sign(e) => write!(f, "failed to sign image: {e}"),
            Error::SignatureInvalid => write!(f, "signature invalid"),
            Error::Stdout(e) => write!(f, "failed to write to stdout: {e}"),
            Error::WriteOutputFile(e) => write!(f, "failed to write to output file: {e}"),
        }
    }
}

impl std::error::Error for Error {}
