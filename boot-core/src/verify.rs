// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Security verdicts hardened against fault injection.
//!
//! Each decision is taken twice, once through `black_box`, with a control
//! flow counter that must reach an exact value, and after a random delay so
//! that the comparison does not sit at a fixed offset in the trace.

use consts::DEBUG_VERSION;
use core::hint::black_box;
use rand_core::RngCore;

/// Verification result.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum VerificationResult {
    // Hamming-distant values, so that a single glitched bit cannot turn one into the other.
    Valid = 0xcafebabe,
    Invalid = 0xdeadbeef,
}

impl VerificationResult {
    pub fn is_valid(self) -> bool {
        black_box(self as u32) == Self::Valid as u32
    }
}

/// Compares two byte strings without an early exit on the first difference.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let diff = a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | black_box(x ^ y));
    black_box(diff) == 0
}

/// Busy-waits for a random number of iterations (at most 1023).
pub fn random_delay<R: RngCore>(rng: &mut R) {
    let spins = rng.next_u32() & 0x3ff;
    for i in 0..spins {
        black_box(i);
    }
}

/// Checks a received tag or password against the expected value.
pub fn verify_secret<R: RngCore>(expected: &[u8], received: &[u8], rng: &mut R) -> VerificationResult {
    const CF1: u32 = 3;
    const CF2: u32 = 5;
    let mut control_flow_integrity_counter = 0;

    random_delay(rng);
    if constant_time_eq(expected, received) {
        control_flow_integrity_counter += CF1;
        random_delay(rng);
        if black_box(constant_time_eq(black_box(expected), black_box(received))) {
            control_flow_integrity_counter += CF2;
            if black_box(control_flow_integrity_counter) == CF1 + CF2 {
                return VerificationResult::Valid;
            }
        }
    }
    VerificationResult::Invalid
}

/// Downgrade check: a non-debug image must not be older than the installed one.
pub fn version_allowed<R: RngCore>(incoming: u16, installed: u16, rng: &mut R) -> VerificationResult {
    const CF1: u32 = 7;
    const CF2: u32 = 11;
    let mut control_flow_integrity_counter = 0;

    random_delay(rng);
    if incoming == DEBUG_VERSION || incoming >= installed {
        control_flow_integrity_counter += CF1;
        let incoming = black_box(incoming);
        if incoming == black_box(DEBUG_VERSION) || incoming >= black_box(installed) {
            control_flow_integrity_counter += CF2;
            if black_box(control_flow_integrity_counter) == CF1 + CF2 {
                return VerificationResult::Valid;
            }
        }
    }
    VerificationResult::Invalid
}
