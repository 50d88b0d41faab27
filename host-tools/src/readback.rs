//! Readback requests and responses.

use {
    crate::secrets::Secrets,
    consts::PAGE_SIZE,
    host_protocol::{ReadbackRequest, READBACK_REQUEST_SIZE},
    rand::RngCore,
    shielded_aes::{cbc_mac, CfbStream, Direction},
    std::ops::Range,
};

/// Encrypted and authenticated request for `length` bytes from `start`.
pub fn request(
    secrets: &Secrets,
    start: u32,
    length: u32,
    rng: &mut impl RngCore,
) -> Result<[u8; READBACK_REQUEST_SIZE], shielded_aes::Error> {
    let mut body = ReadbackRequest {
        password: secrets.readback_password,
        start,
        length,
    }
    .to_bytes();
    CfbStream::new(&secrets.readback_key, &secrets.readback_iv, Direction::Encrypt, rng).apply(&mut body, rng)?;
    let tag = cbc_mac(&secrets.readback_hash_key, &body, rng)?;

    let mut frame = [0u8; READBACK_REQUEST_SIZE];
    frame[..body.len()].copy_from_slice(&body);
    frame[body.len()..].copy_from_slice(&tag);
    Ok(frame)
}

/// Pages the bootloader answers a request with, after clamping.
pub fn pages(start: u32, length: u32) -> Range<u16> {
    ReadbackRequest {
        password: [0; host_protocol::PASSWORD_SIZE],
        start,
        length,
    }
    .pages()
}

/// Number of bytes the bootloader streams back.
pub fn response_size(start: u32, length: u32) -> usize {
    pages(start, length).len() * PAGE_SIZE
}

/// Decrypts the streamed pages in place.
pub fn decrypt(secrets: &Secrets, data: &mut [u8], rng: &mut impl RngCore) -> Result<(), shielded_aes::Error> {
    CfbStream::new(&secrets.readback_key, &secrets.readback_iv, Direction::Decrypt, rng).apply(data, rng)
}
