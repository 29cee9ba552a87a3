// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use clap::{Parser, ValueEnum};
use consts::{FILE_TYPE_FIRMWARE, OTA_BLOCK_SIZE};
use crc::{Crc, CRC_32_ISCSI};
use host_protocol::{HostProtocolMessage, Ota, COBS_MAX_MSG_SIZE};
use log::{debug, error, info, warn};
use ota_pal::ImageState;
use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

#[derive(Clone, Debug, PartialEq, ValueEnum)]
enum Command {
    Reset,
    State,
    ImageState,
    Push,
    Abort,
    Test,
    Accept,
    Reject,
    Activate,
}

#[derive(Debug, Parser)]
struct Args {
    #[arg(short, long)]
    list_ports: bool,
    #[arg(short, long, default_value_t = String::from("/dev/ttyUSB0"))]
    port: String,
    #[arg(short, long, default_value_t = 460800)]
    baudrate: u32,
    #[arg(short, long, value_enum)]
    cmd: Option<Command>,
    /// Image to push
    #[arg(short, long)]
    image: Option<PathBuf>,
    /// DER signature of the image, as written by ota-sign
    #[arg(short, long)]
    signature: Option<PathBuf>,
    /// Certificate path on the device, built-in certificate if empty
    #[arg(long, default_value_t = String::new())]
    certificate: String,
}

/// Send one message and wait for the reply.
async fn transact(
    serial: &mut SerialStream,
    msg: &HostProtocolMessage<'_>,
    timeout: Duration,
    rx: &mut [u8; COBS_MAX_MSG_SIZE],
) -> Result<Option<usize>, Box<dyn Error>> {
    let mut tx = [0; COBS_MAX_MSG_SIZE];
    let frame = postcard::to_slice_cobs(msg, &mut tx)?;
    debug!(">>{:02x?}", frame);
    serial.write_all(frame).await?;
    serial.flush().await?;

    match tokio::time::timeout(timeout, serial.read(rx)).await {
        Ok(read) => Ok(Some(read?)),
        Err(_) => Ok(None),
    }
}

async fn push(
    serial: &mut SerialStream,
    image: &[u8],
    signature: &[u8],
    certificate: &str,
) -> Result<(), Box<dyn Error>> {
    let mut rx = [0; COBS_MAX_MSG_SIZE];
    let create = HostProtocolMessage::Ota(Ota::CreateFile {
        path: "firmware.bin",
        file_size: image.len().try_into()?,
        file_type: FILE_TYPE_FIRMWARE,
        signature,
        certificate,
    });
    if transact(serial, &create, Duration::from_secs(5), &mut rx)
        .await?
        .is_none()
    {
        return Err("no response from device".into());
    }
    match postcard::from_bytes_cobs(&mut rx)? {
        HostProtocolMessage::Ota(Ota::Ack(status)) if status.is_success() => {}
        other => return Err(format!("create refused: {other:?}").into()),
    }

    let crc = Crc::<u32>::new(&CRC_32_ISCSI);
    for (idx, chunk) in image.chunks(OTA_BLOCK_SIZE).enumerate() {
        let offset = (idx * OTA_BLOCK_SIZE) as u32;
        let block = HostProtocolMessage::Ota(Ota::WriteBlock {
            offset,
            data: chunk,
        });
        if transact(serial, &block, Duration::from_millis(500), &mut rx)
            .await?
            .is_none()
        {
            error!("no response for block at {offset}");
            return Err("no response from device".into());
        }
        match postcard::from_bytes_cobs(&mut rx)? {
            HostProtocolMessage::Ota(Ota::AckWriteBlock {
                offset: acked,
                written,
                crc: block_crc,
            }) => {
                if acked != offset || written as usize != chunk.len() || block_crc != crc.checksum(chunk) {
                    error!("block at {offset} acknowledged as {acked}, {written} bytes, CRC {block_crc:#010x}");
                    return Err("block mismatch".into());
                }
                debug!("block at {offset} acknowledged");
            }
            other => {
                error!("block at {offset} failed: {other:?}");
                return Err("block rejected".into());
            }
        }
    }
    info!("{} bytes sent, verifying", image.len());

    // Reading back and checking the signature takes a while.
    if transact(
        serial,
        &HostProtocolMessage::Ota(Ota::CloseFile),
        Duration::from_secs(10),
        &mut rx,
    )
    .await?
    .is_none()
    {
        return Err("no response from device".into());
    }
    match postcard::from_bytes_cobs(&mut rx)? {
        HostProtocolMessage::Ota(Ota::Ack(status)) if status.is_success() => {
            info!("image verified");
            Ok(())
        }
        other => Err(format!("close failed: {other:?}").into()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    pretty_env_logger::init();

    let args = Args::parse();

    if args.list_ports {
        let ports = tokio_serial::available_ports()?;
        println!("List of available serial ports:");
        for port in ports {
            println!("- {}", port.port_name);
        }
        return Ok(());
    }

    let Some(cmd) = args.cmd else {
        println!("Choose a command to be send.");
        return Ok(());
    };
    let mut serial = tokio_serial::new(&args.port, args.baudrate).open_native_async()?;

    let msg = match cmd {
        Command::Push => {
            let (Some(image), Some(signature)) = (&args.image, &args.signature) else {
                return Err("push needs --image and --signature".into());
            };
            let image = std::fs::read(image)?;
            let signature = std::fs::read(signature)?;
            return push(&mut serial, &image, &signature, &args.certificate).await;
        }
        Command::Reset => HostProtocolMessage::Reset,
        Command::State => HostProtocolMessage::GetState,
        Command::ImageState => HostProtocolMessage::Ota(Ota::GetImageState),
        Command::Abort => HostProtocolMessage::Ota(Ota::Abort),
        Command::Test => HostProtocolMessage::Ota(Ota::SetImageState(ImageState::Testing)),
        Command::Accept => HostProtocolMessage::Ota(Ota::SetImageState(ImageState::Accepted)),
        Command::Reject => HostProtocolMessage::Ota(Ota::SetImageState(ImageState::Rejected)),
        Command::Activate => HostProtocolMessage::Ota(Ota::Activate),
    };
    let mut rx = [0; COBS_MAX_MSG_SIZE];
    if transact(&mut serial, &msg, Duration::from_secs(5), &mut rx)
        .await?
        .is_none()
    {
        if cmd == Command::Activate || cmd == Command::Reset {
            info!("device is resetting");
        } else {
            warn!("no response from device");
        }
        return Ok(());
    }
    let ans: HostProtocolMessage = postcard::from_bytes_cobs(&mut rx)?;
    match ans {
        HostProtocolMessage::Ota(Ota::Ack(status)) if status.is_success() => println!("ok"),
        HostProtocolMessage::Ota(Ota::Ack(status)) => {
            println!("failed: {:?} (sub-status {:#x})", status.main, status.sub)
        }
        HostProtocolMessage::Ota(Ota::AckImageState(state)) => println!("image state: {state:?}"),
        HostProtocolMessage::AckState(state) => println!("state: {state:?}"),
        _ => println!("<{ans:?}"),
    }

    Ok(())
}
