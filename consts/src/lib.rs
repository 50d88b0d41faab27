// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Compile-time layout of the bootloader's world: flash regions, update
//! package geometry, protocol timing and the nRF52840 physical mapping.
//!
//! Every region is a whole number of [`PAGE_SIZE`] pages and is addressed by
//! page index. None of these are discoverable at runtime.

#![no_std]

/// Size of one logical flash page in bytes.
/// This is the unit of every flash commit, of every update frame received from
/// the host and of every readback frame sent back to it.
pub const PAGE_SIZE: usize = 256;

/// Number of logical pages in the bootloader's address space.
/// Covers all four data regions plus the bootloader's own image.
pub const FLASH_PAGES: u16 = 544;

/// Value of every byte of a freshly erased page.
/// Scratch regions are wiped to this value, and a message region starting with
/// it means no release message is installed.
pub const ERASED_BYTE: u8 = 0xFF;

/// Number of pages in a firmware update package, trailing MAC page included.
pub const UPDATE_PAGES: u16 = 126;

/// First page of the application region (executable code).
pub const APPLICATION_FIRST_PAGE: u16 = 0;

/// Size of the application region in pages.
pub const APPLICATION_PAGES: u16 = 120;

/// First page of the release message region.
pub const MESSAGE_FIRST_PAGE: u16 = APPLICATION_FIRST_PAGE + APPLICATION_PAGES;

/// Size of the release message region in pages.
pub const MESSAGE_PAGES: u16 = 4;

/// First page of the scratch region holding the still-encrypted package.
pub const ENCRYPTED_FIRST_PAGE: u16 = UPDATE_PAGES;

/// First page of the scratch region holding the decrypted package.
pub const DECRYPTED_FIRST_PAGE: u16 = ENCRYPTED_FIRST_PAGE + SCRATCH_PAGES;

/// Size of each scratch region in pages. Both hold a complete package.
pub const SCRATCH_PAGES: u16 = UPDATE_PAGES;

/// First page of the bootloader's own image.
pub const BOOTLOADER_FIRST_PAGE: u16 = 480;

/// Size of the bootloader's own image in pages (16 KiB).
pub const BOOTLOADER_PAGES: u16 = 64;

/// Version number carried by debug builds. Such images skip the downgrade
/// check and never touch the stored version.
pub const DEBUG_VERSION: u16 = 0;

/// Firmware version assumed when no persisted state exists yet.
pub const FACTORY_VERSION: u16 = 1;

/// LFSR seed assumed when no persisted state exists yet. Must not be zero.
pub const FACTORY_LFSR_SEED: u16 = 6969;

/// Hardware watchdog timeout. Every bounded unit of work must fit inside it.
pub const WATCHDOG_TIMEOUT_MS: u32 = 4000;

/// Baud rate of both the comms and the debug UART.
pub const BAUD_RATE: u32 = 115_200;

/// Minimum number of timer ticks between two clock-rate switches.
pub const CLOCK_SWITCH_BASE: u8 = 50;

/// Random spread added on top of [`CLOCK_SWITCH_BASE`].
pub const CLOCK_SWITCH_SPREAD: u8 = 10;

/// Physical address of logical page 0 on the nRF52840.
/// The MBR occupies the first 4 KiB and forwards interrupts to this address,
/// which is where the application's vector table lands.
pub const FLASH_WINDOW_BASE: u32 = 0x1000;

/// Physical start address of the bootloader image.
/// Stored in UICR so that the MBR starts the bootloader at reset.
pub const BASE_BOOTLOADER_ADDR: u32 = FLASH_WINDOW_BASE + BOOTLOADER_FIRST_PAGE as u32 * PAGE_SIZE as u32;

/// Physical address of the flash sector holding the persisted state record.
/// Sits right after the bootloader image, outside of every logical region.
pub const SETTINGS_ADDR: u32 = BASE_BOOTLOADER_ADDR + BOOTLOADER_PAGES as u32 * PAGE_SIZE as u32;

/// Erase granularity of the nRF52840 NVMC.
pub const NRF_ERASE_SIZE: usize = 4096;
