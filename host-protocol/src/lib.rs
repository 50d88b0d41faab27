// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Bootloader to host tool serial protocol.
//! The host tools drive the session; the bootloader announces its mode with a
//! single byte and then follows the fixed exchange for that mode.
//! Every frame has a size known to both sides in advance: there is no length
//! prefix and no framing byte.

#![no_std]

#[cfg(test)]
extern crate std;

use consts::{
    APPLICATION_FIRST_PAGE, APPLICATION_PAGES, ERASED_BYTE, MESSAGE_FIRST_PAGE, MESSAGE_PAGES, PAGE_SIZE, UPDATE_PAGES,
};
use core::ops::Range;


/// Positive acknowledgement.
pub const ACK: u8 = 0x06;

/// Negative acknowledgement, sent before the bootloader gives up on a session.
pub const NACK: u8 = 0x15;

/// Size of the readback password in bytes.
pub const PASSWORD_SIZE: usize = 24;

/// Size of the encrypted part of a readback request.
pub const READBACK_BODY_SIZE: usize = PASSWORD_SIZE + 4 + 4;

/// Size of the CBC-MAC tags exchanged over the link.
pub const TAG_SIZE: usize = 16;

/// Size of a complete readback request: encrypted body followed by its tag.
pub const READBACK_REQUEST_SIZE: usize = READBACK_BODY_SIZE + TAG_SIZE;

/// Package page carrying the version number.
pub const VERSION_PAGE: usize = 0;

/// First package page of the release message.
pub const MESSAGE_PAGE: usize = 1;

/// First package page of the firmware image.
pub const FIRMWARE_PAGE: usize = MESSAGE_PAGE + MESSAGE_PAGES as usize;

/// Package page carrying the CBC-MAC of everything before it.
pub const MAC_PAGE: usize = UPDATE_PAGES as usize - 1;

/// Number of encrypted package pages, i.e. everything but the MAC page.
pub const ENCRYPTED_PAGES: usize = MAC_PAGE;

/// Bytes of the encrypted part of an update package.
pub const ENCRYPTED_BYTES: usize = ENCRYPTED_PAGES * PAGE_SIZE;

/// Largest firmware image a package can carry.
pub const MAX_IMAGE_SIZE: usize = APPLICATION_PAGES as usize * PAGE_SIZE;

/// Longest release message, leaving room for the terminating NUL.
pub const MAX_MESSAGE_LEN: usize = MESSAGE_PAGES as usize * PAGE_SIZE - 1;

const _: () = assert!(FIRMWARE_PAGE + APPLICATION_PAGES as usize == MAC_PAGE);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    WrongLength { expected: usize, actual: usize },
    ImageTooLarge { size: usize, max: usize },
    MessageTooLong { len: usize, max: usize },
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::WrongLength { expected, actual } => {
                write!(f, "wrong frame length: expected {expected} bytes, got {actual}")
            }
            Self::ImageTooLarge { size, max } => {
                write!(f, "firmware image is {size} bytes, at most {max} fit in a package")
            }
            Self::MessageTooLong { len, max } => {
                write!(f, "release message is {len} bytes, at most {max} fit in a package")
            }
        }
    }
}

/// Boot mode, selected by the board before any session starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    Update,
    Readback,
    Configure,
    Run,
}

impl Mode {
    /// Byte the bootloader sends on the comms link when it enters the mode.
    pub const fn announce(self) -> u8 {
        match self {
            Self::Update => b'U',
            Self::Readback => b'R',
            Self::Configure => b'C',
            Self::Run => b'B',
        }
    }

    pub const fn from_announce(byte: u8) -> Option<Self> {
        match byte {
            b'U' => Some(Self::Update),
            b'R' => Some(Self::Readback),
            b'C' => Some(Self::Configure),
            b'B' => Some(Self::Run),
            _ => None,
        }
    }
}

/// Decrypted body of a readback request.
#[derive(Clone, PartialEq, Eq)]
pub struct ReadbackRequest {
    pub password: [u8; PASSWORD_SIZE],
    /// Byte address of the first byte to read.
    pub start: u32,
    /// Number of bytes to read.
    pub length: u32,
}

impl core::fmt::Debug for ReadbackRequest {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ReadbackRequest")
            .field("start", &self.start)
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

impl ReadbackRequest {
    /// Serializes as `password || start (BE) || length (BE)`.
    pub fn to_bytes(&self) -> [u8; READBACK_BODY_SIZE] {
        let mut out = [0u8; READBACK_BODY_SIZE];
        out[..PASSWORD_SIZE].copy_from_slice(&self.password);
        out[PASSWORD_SIZE..PASSWORD_SIZE + 4].copy_from_slice(&self.start.to_be_bytes());
        out[PASSWORD_SIZE + 4..].copy_from_slice(&self.length.to_be_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8; READBACK_BODY_SIZE]) -> Self {
        let mut password = [0u8; PASSWORD_SIZE];
        password.copy_from_slice(&bytes[..PASSWORD_SIZE]);
        let mut start = [0u8; 4];
        start.copy_from_slice(&bytes[PASSWORD_SIZE..PASSWORD_SIZE + 4]);
        let mut length = [0u8; 4];
        length.copy_from_slice(&bytes[PASSWORD_SIZE + 4..]);
        Self {
            password,
            start: u32::from_be_bytes(start),
            length: u32::from_be_bytes(length),
        }
    }

    /// Pages the bootloader streams back for this request.
    ///
    /// The byte range becomes the inclusive page range
    /// `start / PAGE_SIZE ..= (start + length - 1) / PAGE_SIZE`, and both ends are
    /// clamped to the last readable page, so nothing past the message region
    /// is ever served. A zero length selects no page.
    pub fn pages(&self) -> Range<u16> {
        if self.length == 0 {
            return 0..0;
        }
        let last_readable = readable_pages().end - 1;
        let page_of = |addr: u32| -> u16 {
            let page = addr / PAGE_SIZE as u32;
            u16::try_from(page).unwrap_or(u16::MAX).min(last_readable)
        };
        let first = page_of(self.start);
        let last = page_of(self.start.saturating_add(self.length - 1));
        first..last + 1
    }
}

/// Pages a readback may disclose: the application and message regions.
pub const fn readable_pages() -> Range<u16> {
    APPLICATION_FIRST_PAGE..MESSAGE_FIRST_PAGE + MESSAGE_PAGES
}

/// Splits a received readback request into its encrypted body and its tag.
pub fn split_readback_request(frame: &[u8]) -> Result<([u8; READBACK_BODY_SIZE], [u8; TAG_SIZE]), Error> {
    if frame.len() != READBACK_REQUEST_SIZE {
        return Err(Error::WrongLength {
            expected: READBACK_REQUEST_SIZE,
            actual: frame.len(),
        });
    }
    let mut body = [0u8; READBACK_BODY_SIZE];
    body.copy_from_slice(&frame[..READBACK_BODY_SIZE]);
    let mut tag = [0u8; TAG_SIZE];
    tag.copy_from_slice(&frame[READBACK_BODY_SIZE..]);
    Ok((body, tag))
}

/// Version number stored in the first two bytes (little-endian) of the
/// decrypted version page.
pub fn version_of(version_page: &[u8; PAGE_SIZE]) -> u16 {
    u16::from_le_bytes([version_page[0], version_page[1]])
}

/// Lays out the plaintext of an update package.
///
/// Writes the version, the NUL-terminated release message padded with the
/// erase value, and the firmware image padded with the erase value. The rest
/// of the version page is left as the caller filled it, so it can carry
/// random padding.
pub fn assemble_plaintext(version: u16, message: &[u8], image: &[u8], out: &mut [u8; ENCRYPTED_BYTES]) -> Result<(), Error> {
    if image.len() > MAX_IMAGE_SIZE {
        return Err(Error::ImageTooLarge {
            size: image.len(),
            max: MAX_IMAGE_SIZE,
        });
    }
    if message.len() > MAX_MESSAGE_LEN {
        return Err(Error::MessageTooLong {
            len: message.len(),
            max: MAX_MESSAGE_LEN,
        });
    }

    out[..2].copy_from_slice(&version.to_le_bytes());

    let message_area = &mut out[MESSAGE_PAGE * PAGE_SIZE..FIRMWARE_PAGE * PAGE_SIZE];
    message_area.fill(ERASED_BYTE);
    message_area[..message.len()].copy_from_slice(message);
    message_area[message.len()] = 0;

    let firmware_area = &mut out[FIRMWARE_PAGE * PAGE_SIZE..];
    firmware_area.fill(ERASED_BYTE);
    firmware_area[..image.len()].copy_from_slice(image);
    Ok(())
}
