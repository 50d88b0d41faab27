// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Cipher feedback mode over [`Aes256`].
//!
//! The same forward cipher serves both directions: the keystream for block
//! `n` is `E(c[n-1])`, with `c[-1] = IV`. Decryption must chain on the
//! received ciphertext, never on the recovered plaintext.

use crate::aes::{Aes256, Block, Key, BLOCK_SIZE};
use crate::Error;
use rand_core::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

fn xor_block(dst: &mut Block, src: &Block) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d ^= s;
    }
}

/// Block-level CFB primitive.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Cfb {
    cipher: Aes256,
}

impl Cfb {
    pub fn new<R: RngCore>(key: &Key, rng: &mut R) -> Self {
        Self { cipher: Aes256::new(key, rng) }
    }

    /// Expands `key` and processes the first block of a message against `iv`.
    pub fn start<R: RngCore>(key: &Key, iv: &Block, block: &Block, rng: &mut R) -> (Self, Block) {
        let cfb = Self::new(key, rng);
        let out = cfb.chain(block, iv, rng);
        (cfb, out)
    }

    /// Processes `next` against the previous ciphertext block.
    ///
    /// Returns `next ^ E(prev_ciphertext)`: ciphertext when `next` is
    /// plaintext and the other way round.
    pub fn chain<R: RngCore>(&self, next: &Block, prev_ciphertext: &Block, rng: &mut R) -> Block {
        let mut out = *prev_ciphertext;
        self.cipher.encrypt_block(&mut out, rng);
        xor_block(&mut out, next);
        out
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Encrypt,
    Decrypt,
}

/// A CFB message processed in several slices, e.g. one flash page at a time.
///
/// Keeps the last ciphertext block between calls so that splitting a message
/// at any block boundary yields the same bytes as processing it whole.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct CfbStream {
    cfb: Cfb,
    feedback: Block,
    #[zeroize(skip)]
    direction: Direction,
    #[zeroize(skip)]
    blocks: usize,
}

impl CfbStream {
    pub fn new<R: RngCore>(key: &Key, iv: &Block, direction: Direction, rng: &mut R) -> Self {
        Self {
            cfb: Cfb::new(key, rng),
            feedback: *iv,
            direction,
            blocks: 0,
        }
    }

    /// Encrypts or decrypts `data` in place. `data` must be a whole number of blocks.
    pub fn apply<R: RngCore>(&mut self, data: &mut [u8], rng: &mut R) -> Result<(), Error> {
        if data.len() % BLOCK_SIZE != 0 {
            return Err(Error::UnalignedLength { len: data.len() });
        }

        for chunk in data.chunks_exact_mut(BLOCK_SIZE) {
            let mut block = [0u8; BLOCK_SIZE];
            block.copy_from_slice(chunk);
            let mut out = self.cfb.chain(&block, &self.feedback, rng);
            self.feedback = match self.direction {
                Direction::Encrypt => out,
                Direction::Decrypt => block,
            };
            chunk.copy_from_slice(&out);
            block.zeroize();
            out.zeroize();
        }
        self.blocks += data.len() / BLOCK_SIZE;
        trace!("cfb: {} blocks so far", self.blocks);
        Ok(())
    }

    /// Number of blocks processed so far.
    pub fn blocks(&self) -> usize {
        self.blocks
    }
}
