// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::verify::constant_time_eq;
use host_protocol::PASSWORD_SIZE;
use shielded_aes::{Block, Key};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Provisioned secrets as they come out of the device build.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    pub firmware_key: Key,
    pub firmware_hash_key: Key,
    pub firmware_iv: Block,
    pub readback_key: Key,
    pub readback_hash_key: Key,
    pub readback_iv: Block,
    pub readback_password: [u8; PASSWORD_SIZE],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum KeyError {
    /// Two of the four keys are equal.
    Reused,
}

impl core::fmt::Display for KeyError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Reused => write!(f, "every key must be used for exactly one purpose"),
        }
    }
}

/// Validated key set handed to the bootloader for one boot cycle.
///
/// A key that hashes some data must never encrypt the same data, otherwise
/// the CBC-MAC can be forged. The set therefore refuses any two equal keys.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct KeySet(KeyMaterial);

impl KeySet {
    pub fn new(material: KeyMaterial) -> Result<Self, KeyError> {
        let keys = [
            &material.firmware_key,
            &material.firmware_hash_key,
            &material.readback_key,
            &material.readback_hash_key,
        ];
        for (i, a) in keys.iter().enumerate() {
            for b in &keys[i + 1..] {
                if constant_time_eq(&a[..], &b[..]) {
                    return Err(KeyError::Reused);
                }
            }
        }
        Ok(Self(material))
    }

    pub(crate) fn material(&self) -> &KeyMaterial {
        &self.0
    }
}
