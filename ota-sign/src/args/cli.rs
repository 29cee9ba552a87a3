// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Command line arguments.

use std::path::PathBuf;

#[derive(clap::Parser)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand)]
pub enum Command {
    /// Dump an image descriptor read back from flash.
    Dump {
        /// The raw descriptor file.
        #[clap(short, long)]
        input: PathBuf,
    },
    /// Sign a firmware image.
    Sign {
        /// Path to the PKCS#8 PEM-encoded P-256 secret key.
        #[clap(long)]
        secret: Option<PathBuf>,
        /// Certificate the device will verify with, checked against the
        /// secret key to avoid signing with the wrong key.
        #[clap(long)]
        certificate: Option<PathBuf>,
        /// Signature algorithm. Valid values are "sig-sha256-ecdsa".
        #[clap(long)]
        signature_type: Option<String>,
        /// Path to config file.
        #[clap(long, short)]
        config: Option<PathBuf>,
        /// The firmware image.
        #[clap(short, long)]
        input: PathBuf,
        /// Path to write the DER signature. Defaults to the image path with
        /// ".sig" appended.
        #[clap(short, long)]
        output: Option<PathBuf>,
    },
    /// Verify a firmware image against a detached signature.
    Verify {
        /// The firmware image.
        #[clap(short, long)]
        input: PathBuf,
        /// The DER or raw signature.
        #[clap(short, long)]
        signature: PathBuf,
        /// PEM or DER public key. Defaults to the built-in code signing
        /// certificate.
        #[clap(long)]
        certificate: Option<PathBuf>,
    },
}
