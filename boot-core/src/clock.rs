// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Random CPU clock switching during cryptographic work.
//!
//! A timer interrupt flips the core clock between a fast and a slow rate at
//! intervals drawn from an LFSR, so that instruction timing no longer lines
//! up with a fixed power-trace sampling rate. Switching must only run inside
//! a [`ClockScope`]: UART framing needs a stable clock, so no link traffic may
//! happen while a scope is alive.

use consts::{CLOCK_SWITCH_BASE, CLOCK_SWITCH_SPREAD};
use core::cell::RefCell;
use core::num::NonZeroU16;
use critical_section::Mutex;
use shielded_aes::Lfsr16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockRate {
    Fast,
    Slow,
}

/// Board-specific clock and switch-timer registers.
pub trait ClockControl {
    fn set_rate(&mut self, rate: ClockRate);

    /// (Re)starts the switch timer so that it fires after `ticks` ticks.
    fn arm_timer(&mut self, ticks: u8);

    fn stop_timer(&mut self);
}

/// What the state machine needs from the clock: seed it once per boot, then
/// enter and leave randomized sections.
pub trait RandomizedClock {
    fn reseed(&mut self, seed: NonZeroU16);

    fn enter(&mut self);

    fn exit(&mut self);
}

/// Switching logic shared by the mainline and the timer interrupt.
pub struct ClockSwitcher<C> {
    control: C,
    lfsr: Lfsr16,
    rate: ClockRate,
    active: bool,
}

impl<C: ClockControl> ClockSwitcher<C> {
    pub fn new(control: C, seed: NonZeroU16) -> Self {
        Self {
            control,
            lfsr: Lfsr16::new(seed),
            rate: ClockRate::Fast,
            active: false,
        }
    }

    fn next_interval(&mut self) -> u8 {
        CLOCK_SWITCH_BASE + (self.lfsr.step() % u16::from(CLOCK_SWITCH_SPREAD)) as u8
    }

    pub fn reseed(&mut self, seed: NonZeroU16) {
        self.lfsr = Lfsr16::new(seed);
    }

    pub fn enable(&mut self) {
        self.active = true;
        let ticks = self.next_interval();
        self.control.arm_timer(ticks);
    }

    /// Stops switching and leaves the clock fast.
    pub fn disable(&mut self) {
        self.active = false;
        self.control.stop_timer();
        self.rate = ClockRate::Fast;
        self.control.set_rate(ClockRate::Fast);
    }

    /// Timer interrupt body: flip the rate and schedule the next flip.
    pub fn tick(&mut self) {
        if !self.active {
            return;
        }
        self.rate = match self.rate {
            ClockRate::Fast => ClockRate::Slow,
            ClockRate::Slow => ClockRate::Fast,
        };
        self.control.set_rate(self.rate);
        let ticks = self.next_interval();
        self.control.arm_timer(ticks);
    }

    pub fn rate(&self) -> ClockRate {
        self.rate
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

/// A [`ClockSwitcher`] that can live in a `static` and be reached from both
/// the mainline and the timer interrupt. Every access is a critical section,
/// so the interrupt never observes a half-updated rate.
pub struct SharedSwitcher<C> {
    inner: Mutex<RefCell<Option<ClockSwitcher<C>>>>,
}

impl<C> Default for SharedSwitcher<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> SharedSwitcher<C> {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(None)),
        }
    }
}

impl<C: ClockControl> SharedSwitcher<C> {
    pub fn install(&self, switcher: ClockSwitcher<C>) {
        critical_section::with(|cs| {
            self.inner.borrow_ref_mut(cs).replace(switcher);
        });
    }

    fn with<T>(&self, f: impl FnOnce(&mut ClockSwitcher<C>) -> T) -> Option<T> {
        critical_section::with(|cs| self.inner.borrow_ref_mut(cs).as_mut().map(f))
    }

    /// Call from the switch timer interrupt handler.
    pub fn on_timer(&self) {
        self.with(ClockSwitcher::tick);
    }

    pub fn rate(&self) -> Option<ClockRate> {
        self.with(|s| s.rate())
    }
}

impl<C: ClockControl> RandomizedClock for &SharedSwitcher<C> {
    fn reseed(&mut self, seed: NonZeroU16) {
        self.with(|s| s.reseed(seed));
    }

    fn enter(&mut self) {
        self.with(ClockSwitcher::enable);
    }

    fn exit(&mut self) {
        self.with(ClockSwitcher::disable);
    }
}

/// Randomized-clock section. Switching is on from construction until drop.
pub struct ClockScope<'a, C: RandomizedClock> {
    clock: &'a mut C,
}

impl<'a, C: RandomizedClock> ClockScope<'a, C> {
    pub fn enter(clock: &'a mut C) -> Self {
        clock.enter();
        Self { clock }
    }
}

impl<C: RandomizedClock> Drop for ClockScope<'_, C> {
    fn drop(&mut self) {
        self.clock.exit();
    }
}
