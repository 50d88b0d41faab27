// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Forward-only AES-256 with power-analysis countermeasures.
//!
//! Every pass over the 16-byte state (S-box substitution, key addition) walks
//! the indices starting at a random offset, S-box passes are padded with a
//! random split of dummy lookups, and the linear layer runs on a masked copy
//! of the state. The mask goes through ShiftRows and MixColumns on its own
//! and is removed together with the round key. None of this changes the
//! ciphertext.

use core::hint::black_box;
use rand_core::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Cipher block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// AES-256 key size in bytes.
pub const KEY_SIZE: usize = 32;

pub type Block = [u8; BLOCK_SIZE];
pub type Key = [u8; KEY_SIZE];

const ROUNDS: usize = 14;
const KEY_WORDS: usize = KEY_SIZE / 4;
const SCHEDULE_WORDS: usize = 4 * (ROUNDS + 1);

/// Dummy S-box lookups spent around every real substitution pass.
const NUM_DUMMY_OP: usize = 5;

#[rustfmt::skip]
static SBOX: [u8; 256] = [
    0x63, 0x7c, 0x77, 0x7b, 0xf2, 0x6b, 0x6f, 0xc5, 0x30, 0x01, 0x67, 0x2b, 0xfe, 0xd7, 0xab, 0x76,
    0xca, 0x82, 0xc9, 0x7d, 0xfa, 0x59, 0x47, 0xf0, 0xad, 0xd4, 0xa2, 0xaf, 0x9c, 0xa4, 0x72, 0xc0,
    0xb7, 0xfd, 0x93, 0x26, 0x36, 0x3f, 0xf7, 0xcc, 0x34, 0xa5, 0xe5, 0xf1, 0x71, 0xd8, 0x31, 0x15,
    0x04, 0xc7, 0x23, 0xc3, 0x18, 0x96, 0x05, 0x9a, 0x07, 0x12, 0x80, 0xe2, 0xeb, 0x27, 0xb2, 0x75,
    0x09, 0x83, 0x2c, 0x1a, 0x1b, 0x6e, 0x5a, 0xa0, 0x52, 0x3b, 0xd6, 0xb3, 0x29, 0xe3, 0x2f, 0x84,
    0x53, 0xd1, 0x00, 0xed, 0x20, 0xfc, 0xb1, 0x5b, 0x6a, 0xcb, 0xbe, 0x39, 0x4a, 0x4c, 0x58, 0xcf,
    0xd0, 0xef, 0xaa, 0xfb, 0x43, 0x4d, 0x33, 0x85, 0x45, 0xf9, 0x02, 0x7f, 0x50, 0x3c, 0x9f, 0xa8,
    0x51, 0xa3, 0x40, 0x8f, 0x92, 0x9d, 0x38, 0xf5, 0xbc, 0xb6, 0xda, 0x21, 0x10, 0xff, 0xf3, 0xd2,
    0xcd, 0x0c, 0x13, 0xec, 0x5f, 0x97, 0x44, 0x17, 0xc4, 0xa7, 0x7e, 0x3d, 0x64, 0x5d, 0x19, 0x73,
    0x60, 0x81, 0x4f, 0xdc, 0x22, 0x2a, 0x90, 0x88, 0x46, 0xee, 0xb8, 0x14, 0xde, 0x5e, 0x0b, 0xdb,
    0xe0, 0x32, 0x3a, 0x0a, 0x49, 0x06, 0x24, 0x5c, 0xc2, 0xd3, 0xac, 0x62, 0x91, 0x95, 0xe4, 0x79,
    0xe7, 0xc8, 0x37, 0x6d, 0x8d, 0xd5, 0x4e, 0xa9, 0x6c, 0x56, 0xf4, 0xea, 0x65, 0x7a, 0xae, 0x08,
    0xba, 0x78, 0x25, 0x2e, 0x1c, 0xa6, 0xb4, 0xc6, 0xe8, 0xdd, 0x74, 0x1f, 0x4b, 0xbd, 0x8b, 0x8a,
    0x70, 0x3e, 0xb5, 0x66, 0x48, 0x03, 0xf6, 0x0e, 0x61, 0x35, 0x57, 0xb9, 0x86, 0xc1, 0x1d, 0x9e,
    0xe1, 0xf8, 0x98, 0x11, 0x69, 0xd9, 0x8e, 0x94, 0x9b, 0x1e, 0x87, 0xe9, 0xce, 0x55, 0x28, 0xdf,
    0x8c, 0xa1, 0x89, 0x0d, 0xbf, 0xe6, 0x42, 0x68, 0x41, 0x99, 0x2d, 0x0f, 0xb0, 0x54, 0xbb, 0x16,
];

const RCON: [u8; 7] = [0x01, 0x02, 0x04, 0x08, 0x10, 0x20, 0x40];

/// Randomness drawn for one pass over a state or key word.
struct Walk {
    start: u8,
    dummies_before: usize,
    dummy_seed: u8,
}

impl Walk {
    fn draw<R: RngCore>(rng: &mut R) -> Self {
        let [start, split, dummy_seed, _] = rng.next_u32().to_le_bytes();
        Self {
            start,
            dummies_before: usize::from(split) % (NUM_DUMMY_OP + 1),
            dummy_seed,
        }
    }

    /// Visits every index below `width` exactly once, beginning right after
    /// the random start. `width` must be a power of two.
    fn order(&self, width: u8) -> impl Iterator<Item = usize> {
        let wrap = width - 1;
        let start = self.start & wrap;
        (0..width).map(move |i| usize::from(start.wrapping_add(1).wrapping_add(i) & wrap))
    }

    /// Runs `f` over the walk with the dummy lookups split around it.
    fn substitute(&self, width: u8, mut f: impl FnMut(usize)) {
        let trail = dummy_lookups(self.dummy_seed, self.dummies_before);
        for idx in self.order(width) {
            f(idx);
        }
        black_box(dummy_lookups(trail, NUM_DUMMY_OP - self.dummies_before));
    }
}

fn dummy_lookups(mut value: u8, count: usize) -> u8 {
    for _ in 0..count {
        value = black_box(SBOX[usize::from(value)]);
    }
    value
}

fn xtime(x: u8) -> u8 {
    (x << 1) ^ (((x >> 7) & 1) * 0x1b)
}

/// Rotates row `r` of the column-major state left by `r`.
fn shift_rows(state: &mut Block) {
    for row in 1..4 {
        let line = [state[row], state[row + 4], state[row + 8], state[row + 12]];
        for col in 0..4 {
            state[row + 4 * col] = line[(col + row) & 3];
        }
    }
}

fn mix_columns(state: &Block) -> Block {
    let mut out = [0u8; BLOCK_SIZE];
    for col in 0..4 {
        let c = &state[4 * col..4 * col + 4];
        let t = c[0] ^ c[1] ^ c[2] ^ c[3];
        for row in 0..4 {
            out[4 * col + row] = xtime(c[row] ^ c[(row + 1) & 3]) ^ c[row] ^ t;
        }
    }
    out
}

/// Expanded AES-256 key schedule.
///
/// Owned by the mode object that created it and wiped on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Aes256 {
    round_keys: [Block; ROUNDS + 1],
}

impl Aes256 {
    /// Expands `key`. The SubWord lookups of the schedule get the same
    /// shuffling and dummy treatment as the cipher rounds.
    pub fn new<R: RngCore>(key: &Key, rng: &mut R) -> Self {
        let mut words = [[0u8; 4]; SCHEDULE_WORDS];
        for (word, chunk) in words.iter_mut().zip(key.chunks_exact(4)) {
            word.copy_from_slice(chunk);
        }

        for i in KEY_WORDS..SCHEDULE_WORDS {
            let mut temp = words[i - 1];
            if i % KEY_WORDS == 0 {
                temp.rotate_left(1);
                sub_word(&mut temp, rng);
                temp[0] ^= RCON[i / KEY_WORDS - 1];
            } else if i % KEY_WORDS == 4 {
                sub_word(&mut temp, rng);
            }
            for (b, prev) in temp.iter_mut().zip(words[i - KEY_WORDS]) {
                *b ^= prev;
            }
            words[i] = temp;
            temp.zeroize();
        }

        let mut round_keys = [[0u8; BLOCK_SIZE]; ROUNDS + 1];
        for (round_key, group) in round_keys.iter_mut().zip(words.chunks_exact(4)) {
            for (dst, word) in round_key.chunks_exact_mut(4).zip(group) {
                dst.copy_from_slice(word);
            }
        }
        words.zeroize();

        Self { round_keys }
    }

    /// Encrypts `block` in place. `rng` feeds the masks, start offsets and
    /// dummy splits; any generator produces the same ciphertext.
    pub fn encrypt_block<R: RngCore>(&self, block: &mut Block, rng: &mut R) {
        let mut mask = [0u8; BLOCK_SIZE];
        rng.fill_bytes(&mut mask);

        let walk = Walk::draw(rng);
        walk.substitute(BLOCK_SIZE as u8, |idx| {
            block[idx] ^= mask[idx];
            block[idx] ^= self.round_keys[0][idx];
            block[idx] ^= mask[idx];
        });
        mask.zeroize();

        for round_key in &self.round_keys[1..ROUNDS] {
            masked_round(block, round_key, rng);
        }
        masked_last_round(block, &self.round_keys[ROUNDS], rng);
    }
}

fn sub_word<R: RngCore>(word: &mut [u8; 4], rng: &mut R) {
    let walk = Walk::draw(rng);
    let input = *word;
    walk.substitute(4, |idx| word[idx] = SBOX[usize::from(input[idx])]);
}

/// SubBytes into a randomly prefilled buffer, then mask it.
fn masked_sub_bytes<R: RngCore>(state: &Block, rng: &mut R) -> (Block, Block) {
    let mut tmp = [0u8; BLOCK_SIZE];
    rng.fill_bytes(&mut tmp);

    let walk = Walk::draw(rng);
    walk.substitute(BLOCK_SIZE as u8, |idx| tmp[idx] = SBOX[usize::from(state[idx])]);

    let mut mask = [0u8; BLOCK_SIZE];
    rng.fill_bytes(&mut mask);
    for (t, m) in tmp.iter_mut().zip(mask) {
        *t ^= m;
    }

    shift_rows(&mut tmp);
    shift_rows(&mut mask);
    (tmp, mask)
}

fn masked_round<R: RngCore>(state: &mut Block, round_key: &Block, rng: &mut R) {
    let (mut tmp, mut mask) = masked_sub_bytes(state, rng);

    *state = mix_columns(&tmp);
    let mut mixed_mask = mix_columns(&mask);

    // MixColumns is linear, so adding MC(mask) with the key removes the mask.
    let walk = Walk::draw(rng);
    for idx in walk.order(BLOCK_SIZE as u8) {
        state[idx] ^= round_key[idx];
        state[idx] ^= mixed_mask[idx];
    }

    tmp.zeroize();
    mask.zeroize();
    mixed_mask.zeroize();
}

fn masked_last_round<R: RngCore>(state: &mut Block, round_key: &Block, rng: &mut R) {
    let (mut tmp, mut mask) = masked_sub_bytes(state, rng);

    let walk = Walk::draw(rng);
    walk.substitute(BLOCK_SIZE as u8, |idx| {
        state[idx] = tmp[idx];
        state[idx] ^= round_key[idx];
        state[idx] ^= mask[idx];
    });

    tmp.zeroize();
    mask.zeroize();
}
