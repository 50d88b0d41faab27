//! Update packages and bootloader fingerprints.

use {
    crate::secrets::Secrets,
    consts::{BOOTLOADER_PAGES, ERASED_BYTE, PAGE_SIZE, UPDATE_PAGES},
    host_protocol::{assemble_plaintext, ENCRYPTED_BYTES, TAG_SIZE},
    rand::{CryptoRng, RngCore},
    shielded_aes::{cbc_mac, CfbStream, Direction, Tag},
    zeroize::Zeroizing,
};

/// Size of a complete update package.
pub const PACKAGE_SIZE: usize = UPDATE_PAGES as usize * PAGE_SIZE;

/// Largest bootloader binary the fingerprint covers.
pub const BOOTLOADER_SIZE: usize = BOOTLOADER_PAGES as usize * PAGE_SIZE;

/// Builds the update package for `image`.
///
/// The version page, release message and firmware are encrypted as one CFB
/// stream with the firmware key. The last page carries the CBC-MAC of that
/// ciphertext under the firmware hash key. Unused bytes of the version and
/// MAC pages are random.
pub fn protect(
    secrets: &Secrets,
    version: u16,
    message: &[u8],
    image: &[u8],
    rng: &mut (impl RngCore + CryptoRng),
) -> Result<Vec<u8>, Error> {
    let mut body = Zeroizing::new([0u8; ENCRYPTED_BYTES]);
    rng.fill_bytes(&mut body[..PAGE_SIZE]);
    assemble_plaintext(version, message, image, &mut body)?;

    let mut package = body.to_vec();
    CfbStream::new(&secrets.firmware_key, &secrets.firmware_iv, Direction::Encrypt, rng)
        .apply(&mut package, rng)?;
    let tag = cbc_mac(&secrets.firmware_hash_key, &package, rng)?;

    let mut mac_page = [0u8; PAGE_SIZE];
    rng.fill_bytes(&mut mac_page);
    mac_page[..TAG_SIZE].copy_from_slice(&tag);
    package.extend_from_slice(&mac_page);
    debug_assert_eq!(package.len(), PACKAGE_SIZE);
    Ok(package)
}

/// CBC-MAC the bootloader computes over its own flash region when
/// `bootloader` is what was flashed there.
pub fn fingerprint(
    secrets: &Secrets,
    bootloader: &[u8],
    rng: &mut impl RngCore,
) -> Result<Tag, Error> {
    if bootloader.len() > BOOTLOADER_SIZE {
        return Err(Error::BootloaderTooLarge(bootloader.len()));
    }
    let mut region = bootloader.to_vec();
    region.resize(BOOTLOADER_SIZE, ERASED_BYTE);
    Ok(cbc_mac(&secrets.firmware_hash_key, &region, rng)?)
}

#[derive(Debug)]
pub enum Error {
    BootloaderTooLarge(usize),
    Cipher(shielded_aes::Error),
    Protocol(host_protocol::Error),
}

impl From<shielded_aes::Error> for Error {
    fn from(e: shielded_aes::Error) -> Self {
        Error::Cipher(e)
    }
}

impl From<host_protocol::Error> for Error {
    fn from(e: host_protocol::Error) -> Self {
        Error::Protocol(e)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::BootloaderTooLarge(len) => write!(
                f,
                "bootloader binary is {len} bytes, the bootloader region holds {BOOTLOADER_SIZE}"
            ),
            Error::Cipher(e) => write!(f, "{e}"),
            Error::Protocol(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for Error {}
