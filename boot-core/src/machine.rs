// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Bootloader sessions.
//!
//! The board selects a [`Mode`]; [`Bootloader::run`] announces it on the comms
//! link, runs the session and returns a [`Terminal`]. There is no way back to
//! mode selection: the caller either waits for the watchdog or jumps to the
//! application.

use crate::clock::{ClockScope, RandomizedClock};
use crate::error::Fault;
use crate::hal::{PageCommitter, Watchdog};
use crate::keys::KeySet;
use crate::layout::Region;
use crate::store::{PersistedState, StateStore};
use crate::verify::{verify_secret, version_allowed};
use consts::{DEBUG_VERSION, ERASED_BYTE, PAGE_SIZE, WATCHDOG_TIMEOUT_MS};
use embedded_io::{Read, ReadExactError, Write};
use host_protocol::{
    split_readback_request, version_of, Mode, ReadbackRequest, ACK, ENCRYPTED_PAGES, FIRMWARE_PAGE, MAC_PAGE,
    MESSAGE_PAGE, NACK, READBACK_REQUEST_SIZE, TAG_SIZE, VERSION_PAGE,
};
use rand_core::RngCore;
use shielded_aes::{CbcMac, CfbStream, Direction, Lfsr16};
use zeroize::Zeroize;

type Page = [u8; PAGE_SIZE];

/// Hardware the bootloader runs on.
pub trait Platform {
    /// Comms link to the host tools.
    type Link: Read + Write;
    /// Debug output, not security relevant.
    type Console: Write;
    type Flash: PageCommitter;
    type Store: StateStore;
    type Watchdog: Watchdog;
    type Clock: RandomizedClock;
    /// Randomness for masking, shuffling and delays.
    type Rng: RngCore;
}

pub struct Peripherals<P: Platform> {
    pub link: P::Link,
    pub console: P::Console,
    pub flash: P::Flash,
    pub store: P::Store,
    pub watchdog: P::Watchdog,
    pub clock: P::Clock,
    pub rng: P::Rng,
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Terminal {
    /// Nothing left to do until the watchdog resets the part.
    AwaitReset(Result<Completed, Fault>),
    /// Run mode: hand over to the application.
    Launch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Completed {
    Updated { version: u16 },
    ReadBack { pages: u16 },
    Configured { sealed: bool },
}

pub struct Bootloader<'k, P: Platform> {
    keys: &'k KeySet,
    io: Peripherals<P>,
    state: PersistedState,
}

impl<'k, P: Platform> Bootloader<'k, P> {
    pub fn new(keys: &'k KeySet, io: Peripherals<P>) -> Self {
        Self {
            keys,
            io,
            state: PersistedState::default(),
        }
    }

    /// Runs one session. Only returns once the session is over for good.
    pub fn run(&mut self, mode: Mode) -> Terminal {
        self.io.watchdog.arm(WATCHDOG_TIMEOUT_MS);
        info!("boot mode {}", mode);

        let result = self.session(mode);

        match result {
            Ok(None) => {
                self.launch();
                Terminal::Launch
            }
            Ok(Some(completed)) => {
                info!("session complete: {}", completed);
                Terminal::AwaitReset(Ok(completed))
            }
            Err(fault) => {
                warn!("session failed: {}", fault);
                if fault.is_reported() {
                    // Best effort, the session is over either way.
                    let _ = send(&mut self.io.link, &[NACK]);
                }
                Terminal::AwaitReset(Err(fault))
            }
        }
    }

    fn session(&mut self, mode: Mode) -> Result<Option<Completed>, Fault> {
        self.prepare()?;
        send(&mut self.io.link, &[mode.announce()])?;
        let completed = match mode {
            Mode::Update => self.update()?,
            Mode::Readback => self.readback()?,
            Mode::Configure => self.configure()?,
            Mode::Run => return Ok(None),
        };
        Ok(Some(completed))
    }

    /// Gives the peripherals back, e.g. to inspect them after a session.
    pub fn release(self) -> Peripherals<P> {
        self.io
    }

    /// Loads the persisted state and moves the LFSR seed on, so that clock
    /// switching follows a different sequence on every boot.
    fn prepare(&mut self) -> Result<(), Fault> {
        self.state = self.io.store.load()?;
        let mut lfsr = Lfsr16::new(self.state.seed());
        lfsr.step();
        self.state.lfsr_seed = lfsr.state().get();
        self.io.store.save(&self.state)?;
        self.io.clock.reseed(lfsr.state());
        debug!("installed version {}, sealed {}", self.state.fw_version, self.state.configured);
        Ok(())
    }

    fn update(&mut self) -> Result<Completed, Fault> {
        let result = self.install_package();
        if result.is_err() {
            // Scratch may hold ciphertext or plaintext from the failed session.
            if wipe(&mut self.io, &[Region::EncryptedScratch, Region::DecryptedScratch]).is_err() {
                warn!("scratch wipe after failed update incomplete");
            }
        }
        result
    }

    fn install_package(&mut self) -> Result<Completed, Fault> {
        let keys = self.keys;
        let keys = keys.material();
        let io = &mut self.io;
        let mut page: Page = [0; PAGE_SIZE];

        // Receive the package. Each page is committed before it is acknowledged.
        for index in 0..consts::UPDATE_PAGES {
            io.watchdog.feed();
            receive(&mut io.link, &mut page)?;
            commit(&mut io.flash, page_of(Region::EncryptedScratch, index)?, &page)?;
            send(&mut io.link, &[ACK])?;
        }
        info!("package received");

        // Authenticate the ciphertext before anything is decrypted.
        let computed = {
            let _scope = ClockScope::enter(&mut io.clock);
            let mut mac = CbcMac::new(&keys.firmware_hash_key, &mut io.rng);
            for index in 0..ENCRYPTED_PAGES as u16 {
                io.watchdog.feed();
                read(&mut io.flash, page_of(Region::EncryptedScratch, index)?, &mut page)?;
                absorb(&mut mac, &page, &mut io.rng)?;
            }
            mac.finalize()
        };
        read(&mut io.flash, page_of(Region::EncryptedScratch, MAC_PAGE as u16)?, &mut page)?;
        let verdict = verify_secret(&computed, &page[..TAG_SIZE], &mut io.rng);
        if !verdict.is_valid() {
            return Err(Fault::AuthenticationFailure);
        }
        info!("package authenticated");

        // Decrypt into the second scratch region. The stream carries the CFB
        // chaining block from one page to the next.
        {
            let _scope = ClockScope::enter(&mut io.clock);
            let mut stream = CfbStream::new(&keys.firmware_key, &keys.firmware_iv, Direction::Decrypt, &mut io.rng);
            for index in 0..ENCRYPTED_PAGES as u16 {
                io.watchdog.feed();
                read(&mut io.flash, page_of(Region::EncryptedScratch, index)?, &mut page)?;
                apply(&mut stream, &mut page, &mut io.rng)?;
                commit(&mut io.flash, page_of(Region::DecryptedScratch, index)?, &page)?;
            }
        }
        page.zeroize();

        read(&mut io.flash, page_of(Region::DecryptedScratch, VERSION_PAGE as u16)?, &mut page)?;
        let version = version_of(&page);
        page.zeroize();
        if !version_allowed(version, self.state.fw_version, &mut io.rng).is_valid() {
            warn!("version {} is older than {}", version, self.state.fw_version);
            return Err(Fault::DowngradeRejected);
        }
        if version != DEBUG_VERSION {
            self.state.fw_version = version;
            io.store.save(&self.state)?;
        }

        // Install: release message first, then the application.
        let installs = [
            (Region::Message, MESSAGE_PAGE as u16),
            (Region::Application, FIRMWARE_PAGE as u16),
        ];
        for (region, first) in installs {
            for index in 0..region.page_count() {
                io.watchdog.feed();
                read(&mut io.flash, page_of(Region::DecryptedScratch, first + index)?, &mut page)?;
                commit(&mut io.flash, page_of(region, index)?, &page)?;
            }
        }
        page.zeroize();

        wipe(io, &[Region::EncryptedScratch, Region::DecryptedScratch])?;
        send(&mut io.link, &[ACK])?;
        Ok(Completed::Updated { version })
    }

    fn readback(&mut self) -> Result<Completed, Fault> {
        let keys = self.keys;
        let keys = keys.material();
        let io = &mut self.io;

        let mut frame = [0u8; READBACK_REQUEST_SIZE];
        io.watchdog.feed();
        receive(&mut io.link, &mut frame)?;
        let (mut body, tag) = split_readback_request(&frame).map_err(|_| Fault::Link)?;

        let request = {
            let _scope = ClockScope::enter(&mut io.clock);
            let mut mac = CbcMac::new(&keys.readback_hash_key, &mut io.rng);
            absorb(&mut mac, &body, &mut io.rng)?;
            let computed = mac.finalize();
            if !verify_secret(&computed, &tag, &mut io.rng).is_valid() {
                return Err(Fault::AuthenticationFailure);
            }

            let mut stream = CfbStream::new(&keys.readback_key, &keys.readback_iv, Direction::Decrypt, &mut io.rng);
            apply(&mut stream, &mut body, &mut io.rng)?;
            let mut request = ReadbackRequest::from_bytes(&body);
            body.zeroize();
            let verdict = verify_secret(&keys.readback_password, &request.password, &mut io.rng);
            request.password.zeroize();
            if !verdict.is_valid() {
                return Err(Fault::AuthorizationFailure);
            }
            request
        };

        let pages = request.pages();
        info!("readback of pages {}..{}", pages.start, pages.end);

        let mut page: Page = [0; PAGE_SIZE];
        // Restarts from the readback IV: the first response block reuses the
        // keystream that covered the start of the request.
        let mut stream = {
            let _scope = ClockScope::enter(&mut io.clock);
            CfbStream::new(&keys.readback_key, &keys.readback_iv, Direction::Encrypt, &mut io.rng)
        };
        for index in pages.clone() {
            io.watchdog.feed();
            read(&mut io.flash, index, &mut page)?;
            {
                let _scope = ClockScope::enter(&mut io.clock);
                apply(&mut stream, &mut page, &mut io.rng)?;
            }
            send(&mut io.link, &page)?;
        }

        Ok(Completed::ReadBack {
            pages: pages.end - pages.start,
        })
    }

    fn configure(&mut self) -> Result<Completed, Fault> {
        if self.state.configured {
            return Err(Fault::AlreadySealed);
        }
        let keys = self.keys;
        let keys = keys.material();
        let io = &mut self.io;

        // Garbage from the host does not count as progress: only the ACK
        // ends the wait, and the watchdog is not fed until it arrives.
        let mut byte = [0u8; 1];
        loop {
            receive(&mut io.link, &mut byte)?;
            if byte[0] == ACK {
                break;
            }
        }

        let mut page: Page = [0; PAGE_SIZE];
        let fingerprint = {
            let _scope = ClockScope::enter(&mut io.clock);
            let mut mac = CbcMac::new(&keys.firmware_hash_key, &mut io.rng);
            for index in Region::Bootloader.pages() {
                io.watchdog.feed();
                read(&mut io.flash, index, &mut page)?;
                absorb(&mut mac, &page, &mut io.rng)?;
            }
            mac.finalize()
        };
        send(&mut io.link, &fingerprint)?;

        io.watchdog.feed();
        receive(&mut io.link, &mut byte)?;
        let sealed = byte[0] == ACK;
        if sealed {
            self.state.configured = true;
            io.store.save(&self.state)?;
        }
        Ok(Completed::Configured { sealed })
    }

    /// Prints the release message, if any, and stops the watchdog.
    fn launch(&mut self) {
        let io = &mut self.io;
        let mut page: Page = [0; PAGE_SIZE];
        for index in Region::Message.pages() {
            io.watchdog.feed();
            if read(&mut io.flash, index, &mut page).is_err() {
                break;
            }
            if index == Region::Message.first_page() && page[0] == ERASED_BYTE {
                break;
            }
            let end = page.iter().position(|&b| b == 0);
            let _ = io.console.write_all(&page[..end.unwrap_or(PAGE_SIZE)]);
            if end.is_some() || index + 1 == Region::Message.pages().end {
                let _ = io.console.write_all(b"\n");
                break;
            }
        }
        let _ = io.console.flush();
        io.watchdog.disable();
    }
}

fn send<L: Write>(link: &mut L, bytes: &[u8]) -> Result<(), Fault> {
    link.write_all(bytes).map_err(|_| Fault::Link)?;
    link.flush().map_err(|_| Fault::Link)
}

fn receive<L: Read>(link: &mut L, buf: &mut [u8]) -> Result<(), Fault> {
    link.read_exact(buf).map_err(|e| match e {
        ReadExactError::UnexpectedEof => Fault::LinkStalled,
        ReadExactError::Other(_) => Fault::Link,
    })
}

/// Absolute page number of the `index`-th page of `region`.
fn page_of(region: Region, index: u16) -> Result<u16, Fault> {
    region.page(index).ok_or(Fault::Flash)
}

fn read<F: PageCommitter>(flash: &mut F, page: u16, out: &mut Page) -> Result<(), Fault> {
    flash.read_page(page, out).map_err(|_| {
        warn!("reading page {} failed", page);
        Fault::Flash
    })
}

fn commit<F: PageCommitter>(flash: &mut F, page: u16, data: &Page) -> Result<(), Fault> {
    flash.commit_page(page, data).map_err(|_| {
        warn!("committing page {} failed", page);
        Fault::Flash
    })
}

fn absorb<R: RngCore>(mac: &mut CbcMac, data: &[u8], rng: &mut R) -> Result<(), Fault> {
    // Callers only pass whole pages or whole request bodies.
    mac.update(data, rng).map_err(|_| Fault::Link)
}

fn apply<R: RngCore>(stream: &mut CfbStream, data: &mut [u8], rng: &mut R) -> Result<(), Fault> {
    stream.apply(data, rng).map_err(|_| Fault::Link)
}

/// Fills every page of `regions` with the erase value. A page that fails
/// does not stop the others; the first failure is returned.
fn wipe<P: Platform>(io: &mut Peripherals<P>, regions: &[Region]) -> Result<(), Fault> {
    let blank: Page = [ERASED_BYTE; PAGE_SIZE];
    let mut result = Ok(());
    for region in regions {
        for index in region.pages() {
            io.watchdog.feed();
            let committed = commit(&mut io.flash, index, &blank);
            if result.is_ok() {
                result = committed;
            }
        }
        debug!("wiped {}", region);
    }
    result
}
