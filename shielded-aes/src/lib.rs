// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! AES-256 hardened against power analysis, and the two modes the bootloader
//! builds from it: CFB for confidentiality and CBC-MAC for integrity.
//!
//! Only the forward cipher exists. Every function that touches key material
//! takes a random number generator used purely for masking and shuffling;
//! outputs never depend on it.

#![no_std]

#[cfg(test)]
extern crate std;

#[macro_use]
mod fmt;

mod aes;
mod cbc_mac;
mod cfb;
mod lfsr;


pub use self::aes::{Aes256, Block, Key, BLOCK_SIZE, KEY_SIZE};
pub use cbc_mac::{accumulate, cbc_mac, CbcMac, Tag};
pub use cfb::{Cfb, CfbStream, Direction};
pub use lfsr::Lfsr16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    UnalignedLength { len: usize },
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::UnalignedLength { len } => {
                write!(f, "{len} bytes is not a whole number of {BLOCK_SIZE}-byte blocks")
            }
        }
    }
}
