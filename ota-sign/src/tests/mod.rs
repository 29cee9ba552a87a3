// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use {
    crate::ExitCode,
    ota_pal::descriptor::ImageFlags,
    p256::{
        ecdsa::{signature::hazmat::PrehashSigner, Signature, SigningKey},
        pkcs8::{DecodePrivateKey, EncodePublicKey},
    },
    sha2::Digest,
    std::io::Write,
};


/// Sign with the built-in key and verify against the built-in certificate.
#[test]
fn sign_and_verify_builtin() {
    let image = create_file(input::FIRMWARE);
    let signature = tempfile::NamedTempFile::new().unwrap();
    let secret = create_file(input::BUILTIN_SECRET_PEM);
    let output = test([
        "sign",
        "--secret",
        secret.path().to_str().unwrap(),
        "-i",
        image.path().to_str().unwrap(),
        "-o",
        signature.path().to_str().unwrap(),
    ]);

    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stdout.is_empty());
    assert!(output.stderr.is_empty());

    // RFC 6979 signatures are deterministic.
    let key = SigningKey::from_pkcs8_pem(
        std::str::from_utf8(input::BUILTIN_SECRET_PEM).unwrap(),
    )
    .unwrap();
    let expected: Signature = key
        .sign_prehash(&sha2::Sha256::digest(input::FIRMWARE))
        .unwrap();
    let written = std::fs::read(signature.path()).unwrap();
    assert_eq!(written, expected.to_der().as_bytes());

    let output = test([
        "verify",
        "-i",
        image.path().to_str().unwrap(),
        "-s",
        signature.path().to_str().unwrap(),
    ]);

    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stdout.contains("signature valid"));
    assert!(output.stderr.is_empty());
}

/// Without `-o` the signature lands next to the image.
#[test]
fn sign_default_output() {
    let image = create_file(input::FIRMWARE);
    let secret = create_file(input::BUILTIN_SECRET_PEM);
    let output = test([
        "sign",
        "--secret",
        secret.path().to_str().unwrap(),
        "-i",
        image.path().to_str().unwrap(),
    ]);

    assert_eq!(output.exit_code, ExitCode(0));
    let mut signature_path = image.path().as_os_str().to_owned();
    signature_path.push(".sig");
    let signature = std::fs::read(&signature_path).unwrap();
    std::fs::remove_file(&signature_path).unwrap();
    assert!(Signature::from_der(&signature).is_ok());
}

/// An image signed by another key fails against the built-in certificate
/// and passes against its own.
#[test]
fn verify_with_certificate() {
    let image = create_file(input::FIRMWARE);
    let signature = tempfile::NamedTempFile::new().unwrap();
    let secret = create_file(input::OTHER_SECRET_PEM);
    let certificate = create_file(input::OTHER_PUBLIC_PEM);
    let output = test([
        "sign",
        "--secret",
        secret.path().to_str().unwrap(),
        "--certificate",
        certificate.path().to_str().unwrap(),
        "-i",
        image.path().to_str().unwrap(),
        "-o",
        signature.path().to_str().unwrap(),
    ]);
    assert_eq!(output.exit_code, ExitCode(0));

    let output = test([
        "verify",
        "-i",
        image.path().to_str().unwrap(),
        "-s",
        signature.path().to_str().unwrap(),
    ]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stdout.is_empty());
    assert!(output.stderr.contains("signature invalid"));

    let output = test([
        "verify",
        "-i",
        image.path().to_str().unwrap(),
        "-s",
        signature.path().to_str().unwrap(),
        "--certificate",
        certificate.path().to_str().unwrap(),
    ]);
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stdout.contains("signature valid"));
}

/// DER certificates are accepted as well as PEM.
#[test]
fn verify_with_der_certificate() {
    let key = SigningKey::from_pkcs8_pem(std::str::from_utf8(input::OTHER_SECRET_PEM).unwrap())
        .unwrap();
    let der = key.verifying_key().to_public_key_der().unwrap();
    let certificate = create_file(der.as_bytes());
    let image = create_file(input::FIRMWARE);
    let signature: Signature = key
        .sign_prehash(&sha2::Sha256::digest(input::FIRMWARE))
        .unwrap();
    // Raw r || s signatures are accepted too.
    let signature = create_file(&signature.to_bytes());

    let output = test([
        "verify",
        "-i",
        image.path().to_str().unwrap(),
        "-s",
        signature.path().to_str().unwrap(),
        "--certificate",
        certificate.path().to_str().unwrap(),
    ]);
    assert_eq!(output.exit_code, ExitCode(0));
}

/// A modified image no longer verifies.
#[test]
fn verify_tampered_image() {
    let image = create_file(input::FIRMWARE);
    let signature = tempfile::NamedTempFile::new().unwrap();
    let secret = create_file(input::BUILTIN_SECRET_PEM);
    let output = test([
        "sign",
        "--secret",
        secret.path().to_str().unwrap(),
        "-i",
        image.path().to_str().unwrap(),
        "-o",
        signature.path().to_str().unwrap(),
    ]);
    assert_eq!(output.exit_code, ExitCode(0));

    let tampered = create_file(b"Hello, world?");
    let output = test([
        "verify",
        "-i",
        tampered.path().to_str().unwrap(),
        "-s",
        signature.path().to_str().unwrap(),
    ]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("signature invalid"));
}

/// Refuse to sign when the certificate belongs to another key.
#[test]
fn sign_key_mismatch() {
    let image = create_file(input::FIRMWARE);
    let signature = tempfile::NamedTempFile::new().unwrap();
    let secret = create_file(input::BUILTIN_SECRET_PEM);
    let certificate = create_file(input::OTHER_PUBLIC_PEM);
    let output = test([
        "sign",
        "--secret",
        secret.path().to_str().unwrap(),
        "--certificate",
        certificate.path().to_str().unwrap(),
        "-i",
        image.path().to_str().unwrap(),
        "-o",
        signature.path().to_str().unwrap(),
    ]);

    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stdout.is_empty());
    assert!(output
        .stderr
        .contains("certificate does not match secret key"));
    assert!(std::fs::read(signature.path()).unwrap().is_empty());
}

/// Sign with the secret and certificate loaded from config.
#[test]
fn sign_with_config() {
    let image = create_file(input::FIRMWARE);
    let signature = tempfile::NamedTempFile::new().unwrap();
    let secret = create_file(input::OTHER_SECRET_PEM);
    let certificate = create_file(input::OTHER_PUBLIC_PEM);
    let config = create_file(
        format!(
            r#"
            secret = "{}"
            certificate = "{}"
            signature_type = "sig-sha256-ecdsa"
            "#,
            secret.path().to_str().unwrap(),
            certificate.path().to_str().unwrap(),
        )
        .as_bytes(),
    );

    let output = test([
        "sign",
        "--config",
        config.path().to_str().unwrap(),
        "-i",
        image.path().to_str().unwrap(),
        "-o",
        signature.path().to_str().unwrap(),
    ]);
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stderr.is_empty());

    let output = test([
        "verify",
        "-i",
        image.path().to_str().unwrap(),
        "-s",
        signature.path().to_str().unwrap(),
        "--certificate",
        certificate.path().to_str().unwrap(),
    ]);
    assert_eq!(output.exit_code, ExitCode(0));
}

/// Attempt to specify the secret both in the config file and on the CLI.
#[test]
fn secret_in_config_and_cli() {
    let image = create_file(input::FIRMWARE);
    let secret = create_file(input::BUILTIN_SECRET_PEM);
    let config = create_file(
        format!(r#"secret = "{}""#, secret.path().to_str().unwrap()).as_bytes(),
    );

    let output = test([
        "sign",
        "--secret",
        secret.path().to_str().unwrap(),
        "--config",
        config.path().to_str().unwrap(),
        "-i",
        image.path().to_str().unwrap(),
    ]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output
        .stderr
        .contains("secret specified in both config and cli"));
}

/// Attempt to specify the certificate both in the config file and on the CLI.
#[test]
fn certificate_in_config_and_cli() {
    let image = create_file(input::FIRMWARE);
    let secret = create_file(input::OTHER_SECRET_PEM);
    let certificate = create_file(input::OTHER_PUBLIC_PEM);
    let config = create_file(
        format!(
            r#"certificate = "{}""#,
            certificate.path().to_str().unwrap()
        )
        .as_bytes(),
    );

    let output = test([
        "sign",
        "--secret",
        secret.path().to_str().unwrap(),
        "--certificate",
        certificate.path().to_str().unwrap(),
        "--config",
        config.path().to_str().unwrap(),
        "-i",
        image.path().to_str().unwrap(),
    ]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output
        .stderr
        .contains("certificate specified in both config and cli"));
}

/// Attempt to specify the signature type both in the config file and on the CLI.
#[test]
fn signature_type_in_config_and_cli() {
    let image = create_file(input::FIRMWARE);
    let secret = create_file(input::BUILTIN_SECRET_PEM);
    let config = create_file(br#"signature_type = "sig-sha256-ecdsa""#);

    let output = test([
        "sign",
        "--secret",
        secret.path().to_str().unwrap(),
        "--signature-type",
        "sig-sha256-ecdsa",
        "--config",
        config.path().to_str().unwrap(),
        "-i",
        image.path().to_str().unwrap(),
    ]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output
        .stderr
        .contains("signature type specified in both config and cli"));
}

/// Config paths must be absolute.
#[test]
fn relative_secret_in_config() {
    let image = create_file(input::FIRMWARE);
    let config = create_file(br#"secret = "keys/secret.pem""#);

    let output = test([
        "sign",
        "--config",
        config.path().to_str().unwrap(),
        "-i",
        image.path().to_str().unwrap(),
    ]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("path is not absolute"));
    assert!(output.stderr.contains("keys/secret.pem"));
}

/// Unknown config keys are rejected rather than ignored.
#[test]
fn unknown_config_key() {
    let image = create_file(input::FIRMWARE);
    let secret = create_file(input::BUILTIN_SECRET_PEM);
    let config = create_file(br#"pubkey = "00""#);

    let output = test([
        "sign",
        "--secret",
        secret.path().to_str().unwrap(),
        "--config",
        config.path().to_str().unwrap(),
        "-i",
        image.path().to_str().unwrap(),
    ]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("config error"));
}

#[test]
fn secret_missing() {
    let image = create_file(input::FIRMWARE);
    let output = test(["sign", "-i", image.path().to_str().unwrap()]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("user did not specify a secret key"));
}

/// Only SHA-256 with ECDSA P-256 can be produced.
#[test]
fn unsupported_signature_type() {
    let image = create_file(input::FIRMWARE);
    let secret = create_file(input::BUILTIN_SECRET_PEM);
    let output = test([
        "sign",
        "--secret",
        secret.path().to_str().unwrap(),
        "--signature-type",
        "sig-sha256-rsa",
        "-i",
        image.path().to_str().unwrap(),
    ]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output
        .stderr
        .contains(r#"invalid signature type: "sig-sha256-rsa""#));
}

/// A public key passed as the secret.
#[test]
fn secret_wrong_pem_tag() {
    let image = create_file(input::FIRMWARE);
    let secret = create_file(input::OTHER_PUBLIC_PEM);
    let output = test([
        "sign",
        "--secret",
        secret.path().to_str().unwrap(),
        "-i",
        image.path().to_str().unwrap(),
    ]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output
        .stderr
        .contains(r#"invalid PEM tag: "PUBLIC KEY", expected "PRIVATE KEY""#));
}

#[test]
fn verify_bad_certificate() {
    let image = create_file(input::FIRMWARE);
    let signature = create_file(&[0u8; 64]);
    let certificate = create_file(b"not a certificate");
    let output = test([
        "verify",
        "-i",
        image.path().to_str().unwrap(),
        "-s",
        signature.path().to_str().unwrap(),
        "--certificate",
        certificate.path().to_str().unwrap(),
    ]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("certificate is not a P-256 public key"));
}

/// Dump a descriptor as read back from flash.
#[test]
fn dump_descriptor() {
    let signature: Vec<u8> = (0..72).collect();
    let descriptor = create_file(&input::descriptor(ImageFlags::PendingCommit, &signature));
    let output = test(["dump", "-i", descriptor.path().to_str().unwrap()]);

    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stdout.contains("PendingCommit"));
    assert!(output.stdout.contains("0x00020000"));
    assert!(output.stdout.contains("0x0002000d"));
    assert!(output.stdout.contains("13 B (13)"));
    assert!(output.stdout.contains("0x52444e31"));
    assert!(output.stdout.contains("sig-sha256-ecdsa"));
    assert!(output.stdout.contains(&hex::encode(&signature[..32])));
    assert!(output.stdout.contains(&hex::encode(&signature[32..64])));
    assert!(output.stdout.contains(&hex::encode(&signature[64..])));
    assert!(output.stderr.is_empty());
}

/// A descriptor region that was never written.
#[test]
fn dump_erased() {
    let descriptor = create_file(&[0xff; 352]);
    let output = test(["dump", "-i", descriptor.path().to_str().unwrap()]);
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stdout.contains("erased descriptor"));
}

#[test]
fn dump_corrupt() {
    let mut descriptor = input::descriptor(ImageFlags::Valid, &[1, 2, 3]);
    descriptor[14] ^= 0x01;
    let descriptor = create_file(&descriptor);
    let output = test(["dump", "-i", descriptor.path().to_str().unwrap()]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stdout.is_empty());
    assert!(output.stderr.contains("descriptor CRC mismatch"));
}

#[test]
fn dump_truncated() {
    let descriptor = input::descriptor(ImageFlags::New, &[]);
    let descriptor = create_file(&descriptor[..100]);
    let output = test(["dump", "-i", descriptor.path().to_str().unwrap()]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("descriptor too short"));
}

#[test]
fn missing_subcommand() {
    let output = test([]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stdout.is_empty());
    assert!(!output.stderr.is_empty());
}

fn test<const N: usize>(args: [&str; N]) -> Output {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let exit_code = crate::main_args(
        std::iter::once("ota-sign").chain(args),
        &mut stdout,
        &mut stderr,
    );
    println!("* args: {:?}", args);
    println!("* exit_code: {:?}", exit_code);
    println!("* stdout:\n{}", String::from_utf8_lossy(&stdout));
    println!("* stderr:\n{}", String::from_utf8_lossy(&stderr));
    Output {
        exit_code,
        stdout: String::from_utf8(stdout).unwrap(),
        stderr: String::from_utf8(stderr).unwrap(),
    }
}

#[derive(Debug)]
struct Output {
    exit_code: ExitCode,
    stdout: String,
    stderr: String,
}

fn create_file(data: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(data).unwrap();
    file
}
