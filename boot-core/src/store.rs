// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! State that survives resets: installed version, seal flag and LFSR seed.
//!
//! On flash the state is one record: a length byte, the `postcard` encoding
//! and a CRC-32 over that encoding. Blank or torn records read back as the
//! factory default.

use crate::error::StoreError;
use consts::{FACTORY_LFSR_SEED, FACTORY_VERSION};
use core::num::NonZeroU16;
use crc::{Crc, CRC_32_ISCSI};
use embedded_storage::nor_flash::NorFlash;
use serde::{Deserialize, Serialize};

/// Size of the on-flash record, padding included.
pub const RECORD_SIZE: usize = 16;

const CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);
const CRC_SIZE: usize = 4;
const MAX_PAYLOAD: usize = RECORD_SIZE - 1 - CRC_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PersistedState {
    pub fw_version: u16,
    /// Set once the bootloader image has been fingerprinted and approved.
    pub configured: bool,
    pub lfsr_seed: u16,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            fw_version: FACTORY_VERSION,
            configured: false,
            lfsr_seed: FACTORY_LFSR_SEED,
        }
    }
}

impl PersistedState {
    /// Seed for the clock-switch LFSR. A zeroed seed would lock the register,
    /// so it falls back to the factory value.
    pub fn seed(&self) -> NonZeroU16 {
        NonZeroU16::new(self.lfsr_seed)
            .or(NonZeroU16::new(FACTORY_LFSR_SEED))
            .unwrap_or(NonZeroU16::MIN)
    }

    pub fn encode(&self) -> Result<[u8; RECORD_SIZE], StoreError> {
        let mut record = [0u8; RECORD_SIZE];
        let len = postcard::to_slice(self, &mut record[1..1 + MAX_PAYLOAD])
            .map_err(|_| StoreError::Encode)?
            .len();
        record[0] = len as u8;
        let crc = CRC.checksum(&record[1..1 + len]);
        record[1 + len..1 + len + CRC_SIZE].copy_from_slice(&crc.to_le_bytes());
        Ok(record)
    }

    pub fn decode(record: &[u8; RECORD_SIZE]) -> Result<Self, StoreError> {
        let len = usize::from(record[0]);
        if len > MAX_PAYLOAD {
            return Err(StoreError::Decode);
        }
        let payload = &record[1..1 + len];
        let mut crc = [0u8; CRC_SIZE];
        crc.copy_from_slice(&record[1 + len..1 + len + CRC_SIZE]);
        if CRC.checksum(payload) != u32::from_le_bytes(crc) {
            return Err(StoreError::Checksum);
        }
        postcard::from_bytes(payload).map_err(|_| StoreError::Decode)
    }
}

/// Persistent storage for [`PersistedState`].
pub trait StateStore {
    fn load(&mut self) -> Result<PersistedState, StoreError>;

    fn save(&mut self, state: &PersistedState) -> Result<(), StoreError>;
}

/// [`StateStore`] keeping the record at the start of one dedicated erase
/// sector of a NOR flash.
pub struct FlashStateStore<F> {
    flash: F,
    offset: u32,
}

impl<F: NorFlash> FlashStateStore<F> {
    /// `offset` must be the start of an erase sector nothing else uses.
    pub fn new(flash: F, offset: u32) -> Self {
        Self { flash, offset }
    }

    pub fn release(self) -> F {
        self.flash
    }
}

impl<F: NorFlash> StateStore for FlashStateStore<F> {
    fn load(&mut self) -> Result<PersistedState, StoreError> {
        let mut record = [0u8; RECORD_SIZE];
        self.flash.read(self.offset, &mut record).map_err(|_| StoreError::Backend)?;
        match PersistedState::decode(&record) {
            Ok(state) => Ok(state),
            Err(StoreError::Backend) => Err(StoreError::Backend),
            Err(e) => {
                warn!("state record unusable ({}), using factory defaults", e);
                Ok(PersistedState::default())
            }
        }
    }

    fn save(&mut self, state: &PersistedState) -> Result<(), StoreError> {
        let record = state.encode()?;
        let flash = &mut self.flash;
        let offset = self.offset;
        critical_section::with(|_| {
            flash.erase(offset, offset + F::ERASE_SIZE as u32)?;
            flash.write(offset, &record)
        })
        .map_err(|_| StoreError::Backend)
    }
}
