// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

/// Why a session ended early. Every fault is terminal for the boot cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Fault {
    /// CBC-MAC of an inbound message did not match.
    AuthenticationFailure,
    /// Readback password did not match.
    AuthorizationFailure,
    /// Update carries an older version than the installed one.
    DowngradeRejected,
    /// Configure requested on a device that is already sealed.
    AlreadySealed,
    /// The host stopped sending mid-frame. On hardware the watchdog fires first.
    LinkStalled,
    /// The link reported an error.
    Link,
    Flash,
    Store(StoreError),
}

impl Fault {
    /// Whether the host is told about the fault with a NACK.
    pub fn is_reported(self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailure | Self::AuthorizationFailure | Self::DowngradeRejected | Self::AlreadySealed
        )
    }
}

impl core::fmt::Display for Fault {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::AuthenticationFailure => write!(f, "message authentication failed"),
            Self::AuthorizationFailure => write!(f, "readback password rejected"),
            Self::DowngradeRejected => write!(f, "firmware downgrade rejected"),
            Self::AlreadySealed => write!(f, "bootloader already configured"),
            Self::LinkStalled => write!(f, "host stopped sending"),
            Self::Link => write!(f, "serial link error"),
            Self::Flash => write!(f, "flash access failed"),
            Self::Store(e) => write!(f, "persisted state: {e}"),
        }
    }
}

impl From<StoreError> for Fault {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError {
    Encode,
    Decode,
    Checksum,
    Backend,
}

impl core::fmt::Display for StoreError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Encode => write!(f, "record does not fit"),
            Self::Decode => write!(f, "record is malformed"),
            Self::Checksum => write!(f, "record checksum mismatch"),
            Self::Backend => write!(f, "storage backend failed"),
        }
    }
}
