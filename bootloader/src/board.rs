// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! nRF52840 implementation of the bootloader platform.

use boot_core::clock::{ClockControl, ClockRate, SharedSwitcher};
use boot_core::hal::{NorFlashPages, Watchdog};
use boot_core::store::FlashStateStore;
use boot_core::Platform;
use consts::NRF_ERASE_SIZE;
use core::cell::RefCell;
use cortex_m::peripheral::NVIC;
use embassy_nrf::nvmc::{self, Nvmc};
use embassy_nrf::peripherals::{RNG, UARTE0, UARTE1, WDT};
use embassy_nrf::rng::Rng;
use embassy_nrf::uarte::{self, Uarte};
use embassy_nrf::wdt;
use embedded_storage::nor_flash::{ErrorType as FlashErrorType, NorFlash, NorFlashError, ReadNorFlash};
use nrf52840_pac::{self as pac, interrupt};

/// Randomized clock shared with the `TIMER1` interrupt.
pub static SWITCHER: SharedSwitcher<BoardClock> = SharedSwitcher::new();

pub struct Board;

impl Platform for Board {
    type Link = Serial<'static, UARTE0>;
    type Console = Serial<'static, UARTE1>;
    type Flash = NorFlashPages<Partition, NRF_ERASE_SIZE>;
    type Store = FlashStateStore<Partition>;
    type Watchdog = BoardWatchdog;
    type Clock = &'static SharedSwitcher<BoardClock>;
    type Rng = Rng<'static, RNG>;
}

/// Blocking `embedded_io` view of a UARTE.
pub struct Serial<'d, T: uarte::Instance>(pub Uarte<'d, T>);

impl<T: uarte::Instance> embedded_io::ErrorType for Serial<'_, T> {
    type Error = uarte::Error;
}

impl<T: uarte::Instance> embedded_io::Read for Serial<'_, T> {
    /// Blocks until `buf` is full.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.0.blocking_read(buf)?;
        Ok(buf.len())
    }
}

impl<T: uarte::Instance> embedded_io::Write for Serial<'_, T> {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        // EasyDMA only reads from RAM
        let mut chunk = [0u8; 64];
        let n = buf.len().min(chunk.len());
        chunk[..n].copy_from_slice(&buf[..n]);
        self.0.blocking_write(&chunk[..n])?;
        Ok(n)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Window of the internal flash, shared with the other partitions.
///
/// Offsets are relative to `base`. The partitions are never used
/// concurrently, so a `RefCell` is enough.
pub struct Partition {
    nvmc: &'static RefCell<Nvmc<'static>>,
    base: u32,
    size: u32,
}

impl Partition {
    pub fn new(nvmc: &'static RefCell<Nvmc<'static>>, base: u32, size: u32) -> Self {
        Self { nvmc, base, size }
    }

    fn span(&self, offset: u32, len: usize) -> Result<u32, PartitionError> {
        let end = offset.checked_add(len as u32).ok_or(PartitionError::OutOfBounds)?;
        if end > self.size {
            return Err(PartitionError::OutOfBounds);
        }
        Ok(self.base + offset)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum PartitionError {
    OutOfBounds,
    Flash(nvmc::Error),
}

impl NorFlashError for PartitionError {
    fn kind(&self) -> embedded_storage::nor_flash::NorFlashErrorKind {
        match self {
            Self::OutOfBounds => embedded_storage::nor_flash::NorFlashErrorKind::OutOfBounds,
            Self::Flash(e) => e.kind(),
        }
    }
}

impl FlashErrorType for Partition {
    type Error = PartitionError;
}

impl ReadNorFlash for Partition {
    const READ_SIZE: usize = <Nvmc<'static> as ReadNorFlash>::READ_SIZE;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let address = self.span(offset, bytes.len())?;
        self.nvmc.borrow_mut().read(address, bytes).map_err(PartitionError::Flash)
    }

    fn capacity(&self) -> usize {
        self.size as usize
    }
}

impl NorFlash for Partition {
    const WRITE_SIZE: usize = <Nvmc<'static> as NorFlash>::WRITE_SIZE;
    const ERASE_SIZE: usize = <Nvmc<'static> as NorFlash>::ERASE_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        let start = self.span(from, 0)?;
        let end = self.span(to, 0)?;
        self.nvmc.borrow_mut().erase(start, end).map_err(PartitionError::Flash)
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        let address = self.span(offset, bytes.len())?;
        self.nvmc.borrow_mut().write(address, bytes).map_err(PartitionError::Flash)
    }
}

/// The nRF watchdog cannot be stopped once started. `disable` pets it one
/// last time so the application gets a full period to take over.
pub struct BoardWatchdog {
    peripheral: Option<WDT>,
    handle: Option<wdt::WatchdogHandle>,
}

impl BoardWatchdog {
    pub fn new(peripheral: WDT) -> Self {
        Self {
            peripheral: Some(peripheral),
            handle: None,
        }
    }
}

impl Watchdog for BoardWatchdog {
    fn arm(&mut self, timeout_ms: u32) {
        let Some(peripheral) = self.peripheral.take() else {
            return;
        };
        let mut config = wdt::Config::default();
        config.timeout_ticks = 32768 * timeout_ms / 1000;
        config.run_during_sleep = true;
        config.run_during_debug_halt = false;
        match wdt::Watchdog::try_new::<1>(peripheral, config) {
            Ok((_, [handle])) => self.handle = Some(handle),
            Err(peripheral) => {
                defmt::warn!("watchdog already running with another configuration");
                self.peripheral = Some(peripheral);
            }
        }
    }

    fn feed(&mut self) {
        if let Some(handle) = self.handle.as_mut() {
            handle.pet();
        }
    }

    fn disable(&mut self) {
        self.feed();
    }
}

/// Switches the high frequency clock between the crystal oscillator and the
/// internal RC oscillator, with `TIMER1` pacing the switches.
pub struct BoardClock {
    _private: (),
}

/// `TIMER1` runs at 16 MHz / 2^9.
const SWITCH_TIMER_PRESCALER: u8 = 9;

impl BoardClock {
    pub fn new() -> Self {
        let timer = unsafe { &*pac::TIMER1::ptr() };
        timer.tasks_stop.write(|w| unsafe { w.bits(1) });
        timer.mode.write(|w| w.mode().timer());
        timer.bitmode.write(|w| w.bitmode()._16bit());
        timer.prescaler.write(|w| unsafe { w.prescaler().bits(SWITCH_TIMER_PRESCALER) });
        timer.shorts.write(|w| w.compare0_clear().enabled());
        timer.intenset.write(|w| w.compare0().set());
        unsafe { NVIC::unmask(pac::Interrupt::TIMER1) };
        Self { _private: () }
    }
}

impl ClockControl for BoardClock {
    fn set_rate(&mut self, rate: ClockRate) {
        let clock = unsafe { &*pac::CLOCK::ptr() };
        match rate {
            ClockRate::Fast => clock.tasks_hfclkstart.write(|w| unsafe { w.bits(1) }),
            ClockRate::Slow => clock.tasks_hfclkstop.write(|w| unsafe { w.bits(1) }),
        }
    }

    fn arm_timer(&mut self, ticks: u8) {
        let timer = unsafe { &*pac::TIMER1::ptr() };
        timer.tasks_stop.write(|w| unsafe { w.bits(1) });
        timer.tasks_clear.write(|w| unsafe { w.bits(1) });
        timer.cc[0].write(|w| unsafe { w.bits(u32::from(ticks)) });
        timer.tasks_start.write(|w| unsafe { w.bits(1) });
    }

    fn stop_timer(&mut self) {
        let timer = unsafe { &*pac::TIMER1::ptr() };
        timer.tasks_stop.write(|w| unsafe { w.bits(1) });
        timer.events_compare[0].reset();
    }
}

#[interrupt]
fn TIMER1() {
    let timer = unsafe { &*pac::TIMER1::ptr() };
    timer.events_compare[0].reset();
    SWITCHER.on_timer();
}

/// Write-protects the MBR and the bootloader sectors until the next reset.
#[cfg(feature = "flash-protect")]
pub fn protect_bootloader() {
    use consts::{BASE_BOOTLOADER_ADDR, SETTINGS_ADDR};

    let bprot = unsafe { &*pac::BPROT::ptr() };
    let mut mask: u64 = 1;
    let sector_size = NRF_ERASE_SIZE as u32;
    for sector in BASE_BOOTLOADER_ADDR / sector_size..SETTINGS_ADDR / sector_size {
        mask |= 1 << sector;
    }
    bprot.config0.write(|w| unsafe { w.bits(mask as u32) });
    bprot.config1.write(|w| unsafe { w.bits((mask >> 32) as u32) });
}
