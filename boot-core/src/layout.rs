// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

use consts::*;
use core::ops::Range;

/// Fixed flash regions, addressed in whole pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Region {
    Application,
    Message,
    EncryptedScratch,
    DecryptedScratch,
    Bootloader,
}

impl Region {
    pub const fn first_page(self) -> u16 {
        match self {
            Self::Application => APPLICATION_FIRST_PAGE,
            Self::Message => MESSAGE_FIRST_PAGE,
            Self::EncryptedScratch => ENCRYPTED_FIRST_PAGE,
            Self::DecryptedScratch => DECRYPTED_FIRST_PAGE,
            Self::Bootloader => BOOTLOADER_FIRST_PAGE,
        }
    }

    pub const fn page_count(self) -> u16 {
        match self {
            Self::Application => APPLICATION_PAGES,
            Self::Message => MESSAGE_PAGES,
            Self::EncryptedScratch | Self::DecryptedScratch => SCRATCH_PAGES,
            Self::Bootloader => BOOTLOADER_PAGES,
        }
    }

    /// Absolute page numbers of the region.
    pub const fn pages(self) -> Range<u16> {
        self.first_page()..self.first_page() + self.page_count()
    }

    /// Absolute page number of the `index`-th page of the region, `None`
    /// past its end.
    pub const fn page(self, index: u16) -> Option<u16> {
        if index < self.page_count() {
            Some(self.first_page() + index)
        } else {
            None
        }
    }
}

// Regions must not overlap and must fit in the logical flash.
const _: () = {
    let order = [
        Region::Application,
        Region::Message,
        Region::EncryptedScratch,
        Region::DecryptedScratch,
        Region::Bootloader,
    ];
    let mut i = 1;
    while i < order.len() {
        assert!(order[i - 1].pages().end <= order[i].first_page());
        i += 1;
    }
    assert!(Region::Bootloader.pages().end <= FLASH_PAGES);
};
