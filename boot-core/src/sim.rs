// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! In-memory stand-ins for the board, for running whole sessions on a host.

use crate::clock::RandomizedClock;
use crate::hal::{NorFlashPages, Watchdog};
use crate::machine::Platform;
use crate::store::FlashStateStore;
use consts::{FLASH_PAGES, NRF_ERASE_SIZE, PAGE_SIZE};
use core::marker::PhantomData;
use core::num::NonZeroU16;
use embedded_io::{ErrorType, Read, Write};
use embedded_storage::nor_flash::{
    check_erase, check_read, check_write, ErrorType as FlashErrorType, NorFlash, NorFlashErrorKind, ReadNorFlash,
};
use shielded_aes::Lfsr16;

/// Bytes of the simulated logical flash.
pub const SIM_FLASH_SIZE: usize = FLASH_PAGES as usize * PAGE_SIZE;

/// NOR flash in RAM with nRF52840 geometry. Writes can only clear bits.
pub struct RamFlash<const N: usize> {
    data: [u8; N],
    erases: usize,
}

impl<const N: usize> Default for RamFlash<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> RamFlash<N> {
    pub fn new() -> Self {
        Self {
            data: [0xff; N],
            erases: 0,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Writes bypassing NOR semantics, e.g. to plant an image.
    pub fn program(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    pub fn erase_count(&self) -> usize {
        self.erases
    }
}

impl<const N: usize> FlashErrorType for RamFlash<N> {
    type Error = NorFlashErrorKind;
}

impl<const N: usize> ReadNorFlash for RamFlash<N> {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        check_read(self, offset, bytes.len())?;
        let start = offset as usize;
        bytes.copy_from_slice(&self.data[start..start + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        N
    }
}

impl<const N: usize> NorFlash for RamFlash<N> {
    const WRITE_SIZE: usize = 4;
    const ERASE_SIZE: usize = NRF_ERASE_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        check_erase(self, from, to)?;
        self.data[from as usize..to as usize].fill(0xff);
        self.erases += 1;
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        check_write(self, offset, bytes.len())?;
        let start = offset as usize;
        for (dst, src) in self.data[start..start + bytes.len()].iter_mut().zip(bytes) {
            *dst &= src;
        }
        Ok(())
    }
}

pub type SimFlash = RamFlash<SIM_FLASH_SIZE>;
pub type SimPages = NorFlashPages<SimFlash, NRF_ERASE_SIZE>;
pub type SimStore = FlashStateStore<RamFlash<NRF_ERASE_SIZE>>;

/// Fresh, fully erased flash behind the page committer.
pub fn sim_pages() -> SimPages {
    match NorFlashPages::new(SimFlash::new()) {
        Ok(pages) => pages,
        // RamFlash geometry always matches.
        Err(_) => unreachable!(),
    }
}

pub fn sim_store() -> SimStore {
    FlashStateStore::new(RamFlash::new(), 0)
}

#[derive(Debug, Default)]
pub struct SimWatchdog {
    pub armed_ms: Option<u32>,
    pub feeds: usize,
    pub disabled: bool,
}

impl Watchdog for SimWatchdog {
    fn arm(&mut self, timeout_ms: u32) {
        self.armed_ms = Some(timeout_ms);
    }

    fn feed(&mut self) {
        self.feeds += 1;
    }

    fn disable(&mut self) {
        self.disabled = true;
    }
}

/// Records how the randomized clock was used.
#[derive(Debug, Default)]
pub struct SimClock {
    pub seed: Option<NonZeroU16>,
    pub scopes: usize,
    pub inside: bool,
}

impl RandomizedClock for SimClock {
    fn reseed(&mut self, seed: NonZeroU16) {
        self.seed = Some(seed);
    }

    fn enter(&mut self) {
        assert!(!self.inside, "randomized clock scopes must not nest");
        self.inside = true;
        self.scopes += 1;
    }

    fn exit(&mut self) {
        self.inside = false;
    }
}

/// Debug console capturing up to `N` bytes.
pub struct SimConsole<const N: usize = 2048> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> Default for SimConsole<N> {
    fn default() -> Self {
        Self { buf: [0; N], len: 0 }
    }
}

impl<const N: usize> SimConsole<N> {
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl<const N: usize> ErrorType for SimConsole<N> {
    type Error = core::convert::Infallible;
}

impl<const N: usize> Write for SimConsole<N> {
    fn write(&mut self, bytes: &[u8]) -> Result<usize, Self::Error> {
        let n = bytes.len().min(N - self.len);
        self.buf[self.len..self.len + n].copy_from_slice(&bytes[..n]);
        self.len += n;
        Ok(bytes.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Host simulation of the board, parameterized by the comms link.
pub struct Sim<L>(PhantomData<L>);

impl<L: Read + Write> Platform for Sim<L> {
    type Link = L;
    type Console = SimConsole;
    type Flash = SimPages;
    type Store = SimStore;
    type Watchdog = SimWatchdog;
    type Clock = SimClock;
    type Rng = Lfsr16;
}

/// Masking generator for simulated sessions.
pub fn sim_rng() -> Lfsr16 {
    Lfsr16::new(NonZeroU16::new(0x1234).unwrap_or(NonZeroU16::MIN))
}
