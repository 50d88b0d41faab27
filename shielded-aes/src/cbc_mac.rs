// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! CBC-MAC over [`Aes256`].
//!
//! No length block and no padding: only messages of a size both sides know
//! up front may be authenticated. The key must not be used to encrypt the
//! same data.

use crate::aes::{Aes256, Block, Key, BLOCK_SIZE};
use crate::Error;
use rand_core::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub type Tag = Block;

/// Folds one block into the running tag: `tag = E(tag ^ block)`.
pub fn accumulate<R: RngCore>(cipher: &Aes256, block: &Block, tag: &mut Tag, rng: &mut R) {
    for (t, b) in tag.iter_mut().zip(block) {
        *t ^= b;
    }
    cipher.encrypt_block(tag, rng);
}

/// Incremental CBC-MAC. The tag starts at all zero bytes.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct CbcMac {
    cipher: Aes256,
    tag: Tag,
}

impl CbcMac {
    pub fn new<R: RngCore>(key: &Key, rng: &mut R) -> Self {
        Self {
            cipher: Aes256::new(key, rng),
            tag: [0u8; BLOCK_SIZE],
        }
    }

    /// Absorbs `data`, which must be a whole number of blocks.
    pub fn update<R: RngCore>(&mut self, data: &[u8], rng: &mut R) -> Result<(), Error> {
        if data.len() % BLOCK_SIZE != 0 {
            return Err(Error::UnalignedLength { len: data.len() });
        }
        for chunk in data.chunks_exact(BLOCK_SIZE) {
            let mut block = [0u8; BLOCK_SIZE];
            block.copy_from_slice(chunk);
            accumulate(&self.cipher, &block, &mut self.tag, rng);
        }
        Ok(())
    }

    pub fn finalize(self) -> Tag {
        self.tag
    }
}

/// One-shot CBC-MAC of `data`.
pub fn cbc_mac<R: RngCore>(key: &Key, data: &[u8], rng: &mut R) -> Result<Tag, Error> {
    let mut mac = CbcMac::new(key, rng);
    mac.update(data, rng)?;
    Ok(mac.finalize())
}
