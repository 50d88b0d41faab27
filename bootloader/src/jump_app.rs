// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later
use consts::FLASH_WINDOW_BASE;
use cortex_m::peripheral::NVIC;
use defmt::info;
use nrf52840_pac::Interrupt;

/// Hands the part over to the application at the start of the flash window.
///
/// # Safety
///
/// This modifies the stack pointer and reset vector and runs whatever sits at
/// [`FLASH_WINDOW_BASE`]. Every peripheral driver must be dropped first.
pub unsafe fn jump_to_app() -> ! {
    use nrf_softdevice_mbr as mbr;

    NVIC::mask(Interrupt::UARTE0_UART0);
    NVIC::mask(Interrupt::UARTE1);
    NVIC::mask(Interrupt::RNG);
    NVIC::mask(Interrupt::TIMER1);

    critical_section::with(|_| {
        // Without a SoftDevice the MBR forwards interrupts straight to the
        // application vector table.
        let mut cmd = mbr::sd_mbr_command_t {
            command: mbr::NRF_MBR_COMMANDS_SD_MBR_COMMAND_IRQ_FORWARD_ADDRESS_SET,
            params: mbr::sd_mbr_command_t__bindgen_ty_1 {
                irq_forward_address_set: mbr::sd_mbr_command_irq_forward_address_set_t {
                    address: FLASH_WINDOW_BASE,
                },
            },
        };
        let ret = mbr::sd_mbr_command(&mut cmd);
        info!("irq forward set: {}", ret);

        let msp = *(FLASH_WINDOW_BASE as *const u32);
        let rv = *((FLASH_WINDOW_BASE + 4) as *const u32);

        info!("msp = {=u32:x}, rv = {=u32:x}", msp, rv);

        // Use MSP as stack pointer, load the application's initial stack
        // pointer, make LR a non-returning value and branch to its reset
        // vector.
        core::arch::asm!(
            "mrs {tmp}, CONTROL",
            "bics {tmp}, {spsel}",
            "msr CONTROL, {tmp}",
            "isb",
            "msr MSP, {msp}",
            "mov lr, {new_lr}",
            "bx {rv}",
            // `out(reg) _` is not permitted in a `noreturn` asm! call,
            // so instead use `in(reg) 0` and don't restore it afterwards.
            tmp = in(reg) 0,
            spsel = in(reg) 2,
            new_lr = in(reg) 0xFFFFFFFFu32,
            msp = in(reg) msp,
            rv = in(reg) rv,
            options(noreturn),
        );
    })
}
