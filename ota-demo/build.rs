// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! This build script writes `memory.x` into a directory where the linker
//! can always find it at build time. The demo runs from the bottom of
//! flash; everything from `OTA_BASE` up belongs to the OTA PAL.

use std::env;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

/// Must match `consts::OTA_BASE` in the firmware.
const OTA_BASE: u32 = 0x10000;

fn main() {
    let memory_x_content = format!(
        r##"
        MEMORY
        {{
            /* NOTE 1 K = 1 KiBi = 1024 bytes */
            FLASH (rx) : ORIGIN = 0x00000000, LENGTH = {:#X}
            RAM : ORIGIN = 0x20000000, LENGTH = 24K
        }}
        "##,
        OTA_BASE
    );
    // Put `memory.x` in our output directory and ensure it's
    // on the linker search path.
    let out = &PathBuf::from(env::var_os("OUT_DIR").unwrap());
    File::create(out.join("memory.x"))
        .unwrap()
        .write_all(memory_x_content.as_bytes())
        .unwrap();
    println!("cargo:rustc-link-search={}", out.display());
    println!("cargo:rerun-if-changed=build.rs");

    println!("cargo:rustc-link-arg-bins=--nmagic");
    println!("cargo:rustc-link-arg-bins=-Tlink.x");
    println!("cargo:rustc-link-arg-bins=-Tdefmt.x");
}
