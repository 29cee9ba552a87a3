// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use {
    clap::Parser,
    consts::{CODE_SIGNING_CERTIFICATE_PEM, SIGNATURE_TYPE_SHA256_ECDSA},
    p256::{ecdsa::SigningKey, pkcs8::DecodePrivateKey},
    std::path::{Path, PathBuf},
};

mod cli;
mod config;

pub use config::Error as ConfigError;

const SECRET_PEM_LABEL: &str = "PRIVATE KEY";

/// Program arguments loaded from the CLI and config file.
#[derive(Debug, Clone)]
pub enum Args {
    /// Dump the descriptor contents to stdout.
    Dump { input: PathBuf },
    /// Sign a firmware image.
    Sign {
        secret: SigningKey,
        certificate: Option<Vec<u8>>,
        input: PathBuf,
        output: PathBuf,
    },
    /// Verify a firmware image.
    Verify {
        input: PathBuf,
        signature: PathBuf,
        certificate: Vec<u8>,
    },
}

pub fn args<I, T>(args: I) -> Result<Args, Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let cli = cli::Args::try_parse_from(args).map_err(Error::Cli)?;
    match cli.command {
        cli::Command::Dump { input } => Ok(Args::Dump { input }),
        cli::Command::Verify {
            input,
            signature,
            certificate,
        } => {
            let certificate = match certificate {
                Some(path) => read_certificate(&path)?,
                None => CODE_SIGNING_CERTIFICATE_PEM.to_vec(),
            };
            Ok(Args::Verify {
                input,
                signature,
                certificate,
            })
        }
        cli::Command::Sign {
            secret,
            certificate,
            signature_type,
            config,
            input,
            output,
        } => {
            // Load and validate the config.
            let config = config.map(|c| config::Config::load(&c)).transpose()?;
            let config_secret_path = config
                .as_ref()
                .and_then(|config| config.secret.as_ref())
                .map(|secret| absolute_in_config(secret))
                .transpose()?;
            let config_certificate_path = config
                .as_ref()
                .and_then(|config| config.certificate.as_ref())
                .map(|certificate| absolute_in_config(certificate))
                .transpose()?;
            let config_signature_type = config
                .as_ref()
                .and_then(|config| config.signature_type.clone());

            // Reconcile the CLI and config arguments. Error if anything is specified both
            // on the CLI and in the config file.
            let secret = match (secret, config_secret_path) {
                (None, None) => return Err(Error::SecretMissing),
                (None, Some(secret)) | (Some(secret), None) => secret,
                (Some(_), Some(_)) => return Err(Error::SecretInConfigAndCli),
            };
            let certificate = match (certificate, config_certificate_path) {
                (None, None) => None,
                (None, Some(certificate)) | (Some(certificate), None) => Some(certificate),
                (Some(_), Some(_)) => return Err(Error::CertificateInConfigAndCli),
            };
            let signature_type = match (signature_type, config_signature_type) {
                (None, None) => SIGNATURE_TYPE_SHA256_ECDSA.to_owned(),
                (None, Some(signature_type)) | (Some(signature_type), None) => signature_type,
                (Some(_), Some(_)) => return Err(Error::SignatureTypeInConfigAndCli),
            };

            // Parse the arguments.
            if signature_type != SIGNATURE_TYPE_SHA256_ECDSA {
                return Err(Error::InvalidSignatureType(signature_type));
            }
            let pem = std::fs::read_to_string(secret).map_err(Error::ReadPemFile)?;
            let label = pem_rfc7468::decode_label(pem.as_bytes()).map_err(Error::ParsePemFile)?;
            if label != SECRET_PEM_LABEL {
                return Err(Error::InvalidPemTag(label.to_owned()));
            }
            let secret = SigningKey::from_pkcs8_pem(&pem).map_err(Error::InvalidSecretKey)?;
            let certificate = certificate.map(|c| read_certificate(&c)).transpose()?;
            let output = output.unwrap_or_else(|| {
                let mut output = input.clone().into_os_string();
                output.push(".sig");
                output.into()
            });
            Ok(Args::Sign {
                secret,
                certificate,
                input,
                output,
            })
        }
    }
}

fn absolute_in_config(path: &Path) -> Result<PathBuf, Error> {
    if !path.is_absolute() {
        return Err(Error::PathNotAbsoluteInConfig(path.to_owned()));
    }
    Ok(path.to_owned())
}

/// Read a certificate and check that the device would accept it.
fn read_certificate(path: &Path) -> Result<Vec<u8>, Error> {
    let certificate = std::fs::read(path).map_err(Error::ReadCertificate)?;
    ota_pal::ecdsa::parse_public_key(&certificate).map_err(|_| Error::InvalidCertificate)?;
    Ok(certificate)
}

#[derive(Debug)]
pub enum Error {
    CertificateInConfigAndCli,
    Cli(clap::Error),
    Config(ConfigError),
    InvalidCertificate,
    InvalidPemTag(String),
    InvalidSecretKey(p256::pkcs8::Error),
    InvalidSignatureType(String),
    ParsePemFile(pem_rfc7468::Error),
    PathNotAbsoluteInConfig(PathBuf),
    ReadCertificate(std::io::Error),
    ReadPemFile(std::io::Error),
    SecretInConfigAndCli,
    SecretMissing,
    SignatureTypeInConfigAndCli,
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::CertificateInConfigAndCli => {
                write!(f, "certificate specified in both config and cli")
            }
            Error::Cli(e) => write!(f, "{}", e.render().ansi()),
            Error::Config(e) => write!(f, "config error: {e}"),
            Error::InvalidCertificate => {
                write!(f, "certificate is not a P-256 public key in PEM or DER")
            }
            Error::InvalidPemTag(tag) => {
                write!(f, r#"invalid PEM tag: "{tag}", expected "{SECRET_PEM_LABEL}""#)
            }
            Error::InvalidSecretKey(e) => write!(f, "user specified invalid secret key: {e}"),
            Error::InvalidSignatureType(signature_type) => {
                write!(
                    f,
                    r#"user specified invalid signature type: "{signature_type}", expected "{SIGNATURE_TYPE_SHA256_ECDSA}""#
                )
            }
            Error::ParsePemFile(e) => write!(f, "invalid PEM file: {e}"),
            Error::PathNotAbsoluteInConfig(path) => {
                write!(
                    f,
                    r#"config error: path is not absolute: "{}""#,
                    path.to_str().unwrap_or("<invalid path>")
                )
            }
            Error::ReadCertificate(e) => write!(f, "failed to read certificate: {e}"),
            Error::ReadPemFile(e) => write!(f, "failed to read PEM file: {e}"),
            Error::SecretInConfigAndCli => write!(f, "secret specified in both config and cli"),
            Error::SecretMissing => write!(f, "user did not specify a secret key"),
            Error::SignatureTypeInConfigAndCli => {
                write!(f, "signature type specified in both config and cli")
            }
        }
    }
}

impl std::error::Error for Error {}
