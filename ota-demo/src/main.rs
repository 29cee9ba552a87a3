// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

#![no_std]
#![no_main]
mod consts;
mod service;

use defmt_rtt as _;
use embassy_nrf::peripherals;
// global logger
use embassy_nrf as _;
// time driver
use panic_probe as _;

use consts::{HARDWARE_ID, OTA_LAYOUT};
use defmt::{error, info, warn};
use embassy_executor::Spawner;
use embassy_nrf::nvmc::Nvmc;
use embassy_nrf::{bind_interrupts, uarte};
use host_protocol::{HostProtocolMessage, COBS_MAX_MSG_SIZE};
use ota_pal::{
    DeviceReset, EcdsaP256Verifier, NoCertificates, OtaPal, PalConfig, PalImageState,
    ResetUnsupported,
};
use postcard::accumulator::{CobsAccumulator, FeedResult};
use postcard::to_slice_cobs;
use service::OtaService;

bind_interrupts!(struct Irqs {
    UARTE0_UART0 => uarte::InterruptHandler<peripherals::UARTE0>;
});

/// System reset through the SCB.
struct ScbReset;

impl DeviceReset for ScbReset {
    fn reset(&mut self) -> ResetUnsupported {
        cortex_m::peripheral::SCB::sys_reset()
    }
}

#[embassy_executor::main]
async fn main(_spawner: Spawner) {
    let p = embassy_nrf::init(Default::default());

    let mut config_uart = uarte::Config::default();
    config_uart.parity = uarte::Parity::EXCLUDED;
    config_uart.baudrate = uarte::Baudrate::BAUD460800;

    // Uarte config
    #[cfg(feature = "uart-pins-console")]
    let uart = uarte::Uarte::new(p.UARTE0, Irqs, p.P0_16, p.P0_18, config_uart);
    #[cfg(feature = "uart-pins-mpu")]
    let uart = uarte::Uarte::new(p.UARTE0, Irqs, p.P0_14, p.P0_12, config_uart);
    let (mut tx, mut rx) = uart.split_with_idle(p.TIMER0, p.PPI_CH0, p.PPI_CH1);

    // FLASH
    let flash = Nvmc::new(p.NVMC);
    let config = PalConfig::new(OTA_LAYOUT).with_hardware_id(HARDWARE_ID);
    let pal = match OtaPal::new(flash, EcdsaP256Verifier::new(), NoCertificates, ScbReset, config) {
        Ok(pal) => pal,
        Err(e) => {
            error!("OTA layout rejected: {}", e);
            return;
        }
    };
    let mut service = OtaService::new(pal);

    match service.pal().get_platform_image_state() {
        PalImageState::PendingCommit => info!("Image on trial, waiting for accept or reject"),
        state => info!("Image state {}", state),
    }
    if let Ok(slot) = service.pal().boot_slot() {
        info!("Boot slot {}", slot);
    }

    // Raw buffer for the UART, and the accumulator for cobs frames
    let mut raw_buf = [0u8; COBS_MAX_MSG_SIZE];
    let mut cobs_buf: CobsAccumulator<COBS_MAX_MSG_SIZE> = CobsAccumulator::new();
    // Replies never borrow, so they stay small
    let mut reply_buf = [0u8; 32];

    loop {
        let n = match rx.read_until_idle(&mut raw_buf).await {
            Ok(n) => n,
            Err(e) => {
                warn!("UART read failed: {}", e);
                continue;
            }
        };
        if n == 0 {
            continue;
        }

        let mut window: &[u8] = &raw_buf[..n];
        'cobs: while !window.is_empty() {
            window = match cobs_buf.feed_ref::<HostProtocolMessage>(window) {
                FeedResult::Consumed => break 'cobs,
                FeedResult::OverFull(new_wind) => {
                    warn!("Frame overflow");
                    new_wind
                }
                FeedResult::DeserError(new_wind) => {
                    warn!("Frame not decodable");
                    new_wind
                }
                FeedResult::Success { data, remaining } => {
                    if let HostProtocolMessage::Reset = data {
                        info!("Resetting");
                        cortex_m::peripheral::SCB::sys_reset();
                    }
                    if let Some(reply) = service.handle(data) {
                        match to_slice_cobs(&reply, &mut reply_buf) {
                            Ok(frame) => {
                                if let Err(e) = tx.write(frame).await {
                                    warn!("UART write failed: {}", e);
                                }
                            }
                            Err(_) => error!("Reply does not fit a frame"),
                        }
                    }
                    remaining
                }
            };
        }
    }
}
