// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

use core::num::NonZeroU16;
use rand_core::{impls, Error, RngCore};

/// 16-bit maximal-length Galois LFSR.
///
/// Not a CSPRNG. It is cheap and runs in constant time, which is all the
/// clock-switch timer and the cipher's masking need between resets.
#[derive(Clone, Debug)]
pub struct Lfsr16 {
    state: u16,
}

impl Lfsr16 {
    /// Feedback taps for x^16 + x^14 + x^13 + x^11 + 1.
    pub const TAPS: u16 = 0xB400;

    /// Zero is the one seed that never leaves itself.
    pub fn new(seed: NonZeroU16) -> Self {
        Self { state: seed.get() }
    }

    pub fn step(&mut self) -> u16 {
        let lsb = self.state & 1;
        self.state >>= 1;
        self.state ^= 0u16.wrapping_sub(lsb) & Self::TAPS;
        self.state
    }

    /// Current register value, suitable for persisting as the next seed.
    pub fn state(&self) -> NonZeroU16 {
        // A nonzero Galois register stays nonzero.
        NonZeroU16::new(self.state).unwrap_or(NonZeroU16::MIN)
    }
}

impl RngCore for Lfsr16 {
    fn next_u32(&mut self) -> u32 {
        let hi = u32::from(self.step());
        let lo = u32::from(self.step());
        (hi << 16) | lo
    }

    fn next_u64(&mut self) -> u64 {
        impls::next_u64_via_u32(self)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        impls::fill_bytes_via_next(self, dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}
