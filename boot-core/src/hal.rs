// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Contracts of the hardware collaborators the state machine drives.
//!
//! The serial links are plain `embedded_io` streams and are not redefined
//! here.

use consts::{FLASH_PAGES, PAGE_SIZE};
use embedded_storage::nor_flash::NorFlash;

/// Whole-page access to the logical flash.
pub trait PageCommitter {
    type Error: core::fmt::Debug;

    /// Replaces page `page` with `data`. Erase and write of the page happen
    /// with interrupts disabled.
    fn commit_page(&mut self, page: u16, data: &[u8; PAGE_SIZE]) -> Result<(), Self::Error>;

    fn read_page(&mut self, page: u16, out: &mut [u8; PAGE_SIZE]) -> Result<(), Self::Error>;
}

/// Hardware watchdog. Once armed, the part resets unless `feed` is called
/// within the timeout.
pub trait Watchdog {
    fn arm(&mut self, timeout_ms: u32);

    fn feed(&mut self);

    /// Stops the watchdog before the application takes over. Parts whose
    /// watchdog cannot be stopped keep feeding it until the jump instead.
    fn disable(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PageError<E> {
    Flash(E),
    /// Erase sector size is not a multiple of the page size or does not
    /// match the buffer.
    Geometry,
    OutOfRange { page: u16 },
}

/// [`PageCommitter`] on top of any NOR flash whose erase sector holds a
/// whole number of pages. Logical page `n` lives at offset `n * PAGE_SIZE`.
///
/// Committing a page is a read-modify-write of its sector through a
/// `SECTOR`-byte buffer. Other pages of the sector are preserved.
pub struct NorFlashPages<F, const SECTOR: usize> {
    flash: F,
    sector: [u8; SECTOR],
}

impl<F: NorFlash, const SECTOR: usize> NorFlashPages<F, SECTOR> {
    pub fn new(flash: F) -> Result<Self, PageError<F::Error>> {
        if F::ERASE_SIZE != SECTOR || SECTOR % PAGE_SIZE != 0 || PAGE_SIZE % F::WRITE_SIZE != 0 {
            return Err(PageError::Geometry);
        }
        Ok(Self {
            flash,
            sector: [0; SECTOR],
        })
    }

    pub fn release(self) -> F {
        self.flash
    }

    fn offset(&self, page: u16) -> Result<u32, PageError<F::Error>> {
        let offset = u32::from(page) * PAGE_SIZE as u32;
        if page >= FLASH_PAGES || offset as usize + PAGE_SIZE > self.flash.capacity() {
            return Err(PageError::OutOfRange { page });
        }
        Ok(offset)
    }
}

impl<F: NorFlash, const SECTOR: usize> PageCommitter for NorFlashPages<F, SECTOR>
where
    F::Error: core::fmt::Debug,
{
    type Error = PageError<F::Error>;

    fn commit_page(&mut self, page: u16, data: &[u8; PAGE_SIZE]) -> Result<(), Self::Error> {
        let offset = self.offset(page)?;
        let sector_start = offset - offset % SECTOR as u32;
        let within = (offset - sector_start) as usize;

        self.flash.read(sector_start, &mut self.sector).map_err(PageError::Flash)?;
        if self.sector[within..within + PAGE_SIZE] == data[..] {
            return Ok(());
        }
        self.sector[within..within + PAGE_SIZE].copy_from_slice(data);

        let flash = &mut self.flash;
        let sector = &self.sector;
        critical_section::with(|_| {
            flash.erase(sector_start, sector_start + SECTOR as u32)?;
            flash.write(sector_start, sector)
        })
        .map_err(PageError::Flash)
    }

    fn read_page(&mut self, page: u16, out: &mut [u8; PAGE_SIZE]) -> Result<(), Self::Error> {
        let offset = self.offset(page)?;
        self.flash.read(offset, out).map_err(PageError::Flash)
    }
}
