// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

#![no_std]
#![no_main]

mod board;
mod jump_app;

#[cfg(feature = "debug")]
use defmt_rtt as _;
use panic_probe as _;

use board::{Board, BoardClock, BoardWatchdog, Partition, Serial, SWITCHER};
use boot_core::clock::ClockSwitcher;
use boot_core::hal::NorFlashPages;
use boot_core::store::FlashStateStore;
use boot_core::{Bootloader, KeySet, Peripherals, Terminal};
use consts::{BAUD_RATE, FACTORY_LFSR_SEED, FLASH_PAGES, FLASH_WINDOW_BASE, NRF_ERASE_SIZE, PAGE_SIZE, SETTINGS_ADDR};
use core::cell::RefCell;
use core::num::NonZeroU16;
use defmt::{error, info};
use embassy_executor::Spawner;
use embassy_nrf::config::{Config, HfclkSource};
use embassy_nrf::gpio::{Input, Pull};
use embassy_nrf::nvmc::Nvmc;
use embassy_nrf::rng::{self, Rng};
use embassy_nrf::{bind_interrupts, peripherals, uarte};
use host_protocol::Mode;
use jump_app::jump_to_app;
use static_cell::StaticCell;

mod secrets {
    include!(concat!(env!("OUT_DIR"), "/secrets.rs"));
}

#[cfg(not(feature = "debug"))]
mod dummy_logging {
    #[defmt::global_logger]
    struct Logger;

    unsafe impl defmt::Logger for Logger {
        fn acquire() {}
        unsafe fn flush() {}
        unsafe fn release() {}
        unsafe fn write(_bytes: &[u8]) {}
    }
}

bind_interrupts!(struct Irqs {
    UARTE0_UART0 => uarte::InterruptHandler<peripherals::UARTE0>;
    UARTE1 => uarte::InterruptHandler<peripherals::UARTE1>;
    RNG => rng::InterruptHandler<peripherals::RNG>;
});

#[used]
#[link_section = ".mbr_uicr_bootloader_addr"]
pub static BOOTLOADER_ADDR: u32 = consts::BASE_BOOTLOADER_ADDR;

#[cfg(feature = "no-dbg-access")]
#[used]
#[link_section = ".uicr_approtect"]
pub static APPROTECT: u32 = 0xFFFF_FF00;

static NVMC: StaticCell<RefCell<Nvmc<'static>>> = StaticCell::new();

/// Strap pins are active low; the first one pulled low wins.
fn select_mode(update: &Input, readback: &Input, configure: &Input) -> Mode {
    if update.is_low() {
        Mode::Update
    } else if readback.is_low() {
        Mode::Readback
    } else if configure.is_low() {
        Mode::Configure
    } else {
        Mode::Run
    }
}

const _: () = assert!(BAUD_RATE == 115_200);

fn uart_config() -> uarte::Config {
    let mut config = uarte::Config::default();
    config.parity = uarte::Parity::EXCLUDED;
    config.baudrate = uarte::Baudrate::BAUD115200;
    config
}

fn halt() -> ! {
    loop {
        cortex_m::asm::wfe();
    }
}

#[embassy_executor::main]
async fn main(_spawner: Spawner) {
    let mut config = Config::default();
    config.hfclk_source = HfclkSource::ExternalXtal;
    let p = embassy_nrf::init(config);

    #[cfg(feature = "flash-protect")]
    board::protect_bootloader();

    let update_pin = Input::new(p.P0_11, Pull::Up);
    let readback_pin = Input::new(p.P0_12, Pull::Up);
    let configure_pin = Input::new(p.P0_24, Pull::Up);
    // let the pull-ups settle
    cortex_m::asm::delay(1_000);
    let mode = select_mode(&update_pin, &readback_pin, &configure_pin);
    drop((update_pin, readback_pin, configure_pin));
    info!("boot mode {}", mode);

    let link = uarte::Uarte::new(p.UARTE0, Irqs, p.P0_08, p.P0_06, uart_config());
    let console = uarte::Uarte::new(p.UARTE1, Irqs, p.P0_26, p.P0_27, uart_config());

    let nvmc = NVMC.init(RefCell::new(Nvmc::new(p.NVMC)));
    let window = Partition::new(nvmc, FLASH_WINDOW_BASE, FLASH_PAGES as u32 * PAGE_SIZE as u32);
    let settings = Partition::new(nvmc, SETTINGS_ADDR, NRF_ERASE_SIZE as u32);
    let Ok(flash) = NorFlashPages::new(window) else {
        error!("flash geometry does not fit the page layout");
        halt();
    };

    let Some(seed) = NonZeroU16::new(FACTORY_LFSR_SEED) else {
        halt();
    };
    SWITCHER.install(ClockSwitcher::new(BoardClock::new(), seed));

    let io = Peripherals::<Board> {
        link: Serial(link),
        console: Serial(console),
        flash,
        store: FlashStateStore::new(settings, 0),
        watchdog: BoardWatchdog::new(p.WDT),
        clock: &SWITCHER,
        rng: Rng::new(p.RNG, Irqs),
    };

    let terminal = {
        let Ok(keys) = KeySet::new(secrets::material()) else {
            error!("provisioned keys are reused");
            halt();
        };
        let mut bootloader = Bootloader::new(&keys, io);
        bootloader.run(mode)
    };

    match terminal {
        Terminal::Launch => unsafe { jump_to_app() },
        Terminal::AwaitReset(outcome) => {
            info!("session over: {}, waiting for the watchdog", outcome);
            halt()
        }
    }
}
