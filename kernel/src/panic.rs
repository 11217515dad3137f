//! Panic handler for the kernel.
//!
//! Fatal failures of the environment core (no current environment where one
//! is required, boot-time load failure, a dispatch that came back) end up
//! here: print the diagnostic to the serial console and halt.

use crate::serial_println;
use core::panic::PanicInfo;

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    serial_println!();
    serial_println!("========================================");
    serial_println!("KERNEL PANIC");
    serial_println!("========================================");

    if let Some(location) = info.location() {
        serial_println!(
            "Location: {}:{}:{}",
            location.file(),
            location.line(),
            location.column()
        );
    }

    serial_println!("Message: {}", info.message());

    serial_println!();
    serial_println!("System halted.");
    serial_println!("========================================");

    hlt_loop()
}

/// Halt the CPU forever.
pub fn hlt_loop() -> ! {
    loop {
        x86_64::instructions::hlt();
    }
}
