// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Secure bootloader core.
//!
//! Authenticated, encrypted firmware updates with a downgrade check,
//! password-protected readback of flash, one-time fingerprinting of the
//! bootloader image, and the hand-over to the application. Everything board
//! specific sits behind the traits in [`hal`], [`clock`] and [`store`], so the
//! same state machine runs on the device and in host tests.

#![no_std]

#[cfg(test)]
extern crate std;

#[macro_use]
mod fmt;

pub mod clock;
mod error;
pub mod hal;
mod keys;
pub mod layout;
mod machine;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod store;
pub mod verify;

#[cfg(test)]
mod tests;

pub use error::{Fault, StoreError};
pub use keys::{KeyError, KeyMaterial, KeySet};
pub use machine::{Bootloader, Completed, Peripherals, Platform, Terminal};
