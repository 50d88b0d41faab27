// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Generates `memory.x` for the bootloader partition and bakes the
//! provisioned secrets into `secrets.rs`.
//!
//! The secrets file is the TOML written by `host-tools secrets`, located
//! through the `BOOT_SECRETS` environment variable.

use consts::BASE_BOOTLOADER_ADDR;
use serde::Deserialize;
use std::env;
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;

#[derive(Deserialize)]
struct Secrets {
    firmware_key: String,
    firmware_hash_key: String,
    firmware_iv: String,
    readback_key: String,
    readback_hash_key: String,
    readback_iv: String,
    readback_password: String,
}

fn decode<const N: usize>(name: &str, value: &str) -> [u8; N] {
    let bytes = hex::decode(value).unwrap_or_else(|e| panic!("{name}: {e}"));
    bytes
        .try_into()
        .unwrap_or_else(|v: Vec<u8>| panic!("{name}: expected {N} bytes, got {}", v.len()))
}

fn secrets_rs(path: &str) -> String {
    let text = fs::read_to_string(path).unwrap_or_else(|e| panic!("reading {path}: {e}"));
    let secrets: Secrets = toml::from_str(&text).unwrap_or_else(|e| panic!("parsing {path}: {e}"));

    let keys = [
        ("firmware_key", decode::<32>("firmware_key", &secrets.firmware_key)),
        ("firmware_hash_key", decode::<32>("firmware_hash_key", &secrets.firmware_hash_key)),
        ("readback_key", decode::<32>("readback_key", &secrets.readback_key)),
        ("readback_hash_key", decode::<32>("readback_hash_key", &secrets.readback_hash_key)),
    ];
    for (i, (a, ka)) in keys.iter().enumerate() {
        for (b, kb) in &keys[i + 1..] {
            assert!(ka != kb, "{a} and {b} must differ");
        }
    }
    let firmware_iv = decode::<16>("firmware_iv", &secrets.firmware_iv);
    let readback_iv = decode::<16>("readback_iv", &secrets.readback_iv);
    let password = decode::<24>("readback_password", &secrets.readback_password);

    let mut out = String::from("pub fn material() -> boot_core::KeyMaterial {\n    boot_core::KeyMaterial {\n");
    for (name, key) in &keys {
        out.push_str(&format!("        {name}: {key:?},\n"));
    }
    out.push_str(&format!("        firmware_iv: {firmware_iv:?},\n"));
    out.push_str(&format!("        readback_iv: {readback_iv:?},\n"));
    out.push_str(&format!("        readback_password: {password:?},\n"));
    out.push_str("    }\n}\n");
    out
}

fn main() {
    let memory_x_content = format!(
        r##"
        BASE_BOOTLOADER_ADDR = {:#X};

        MEMORY
        {{
            /* NOTE 1 K = 1 KiBi = 1024 bytes */
            /* The bootloader owns the 16K below the settings sector */
            FLASH (rx) : ORIGIN = BASE_BOOTLOADER_ADDR, LENGTH = 16K
            RAM : ORIGIN = 0x20000008, LENGTH = 256K - 8
            mbr_uicr_bootloader_addr (r) : ORIGIN = 0x10001014, LENGTH = 0x4
            uicr_approtect (r) : ORIGIN = 0x10001208, LENGTH = 0x4
        }}

        SECTIONS {{
            .uicr_approtect :  {{
                KEEP(*(.uicr_approtect))
                . = ALIGN(4);
            }} > uicr_approtect

            .mbr_uicr_bootloader_addr :  {{
                KEEP(*(.mbr_uicr_bootloader_addr))
                . = ALIGN(4);
            }} > mbr_uicr_bootloader_addr
        }};
        "##,
        BASE_BOOTLOADER_ADDR
    );
    let out = &PathBuf::from(env::var_os("OUT_DIR").unwrap());
    File::create(out.join("memory.x"))
        .unwrap()
        .write_all(memory_x_content.as_bytes())
        .unwrap();
    println!("cargo:rustc-link-search={}", out.display());

    let path = env::var("BOOT_SECRETS")
        .expect("BOOT_SECRETS must point to the secrets file written by `host-tools secrets`");
    fs::write(out.join("secrets.rs"), secrets_rs(&path)).unwrap();
    println!("cargo:rerun-if-env-changed=BOOT_SECRETS");
    println!("cargo:rerun-if-changed={path}");

    println!("cargo:rustc-link-arg-bins=-Tlink.x");
    println!("cargo:rustc-link-arg-bins=-Tdefmt.x");
}
