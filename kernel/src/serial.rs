//! Serial port driver for console output.
//!
//! This module provides serial console output using the 16550 UART and
//! plugs it into the `log` facade so the rest of the kernel can use
//! `log::info!` and friends.

use core::fmt;
use core::fmt::Write;
use log::{Level, LevelFilter, Log, Metadata, Record};
use spin::Mutex;
use uart_16550::SerialPort;

/// COM1 base address.
const COM1_BASE: u16 = 0x3F8;

/// Global serial port (COM1).
static SERIAL1: Mutex<Option<SerialPort>> = Mutex::new(None);

/// Logger backed by COM1.
static LOGGER: SerialLogger = SerialLogger;

/// Initialize COM1 and install the serial logger.
///
/// Calling it twice keeps the first logger; only the level is updated.
pub fn init(level: LevelFilter) {
    let mut port = unsafe { SerialPort::new(COM1_BASE) };
    port.init();
    *SERIAL1.lock() = Some(port);

    if cfg!(feature = "serial-console") {
        let _ = log::set_logger(&LOGGER);
        log::set_max_level(level);
    }
}

/// Write a byte to COM1.
pub fn write_byte(byte: u8) {
    if let Some(ref mut serial) = *SERIAL1.lock() {
        serial.send(byte);
    }
}

/// Write a string to COM1.
pub fn write_str(s: &str) {
    for byte in s.bytes() {
        write_byte(byte);
    }
}

/// Serial writer for formatting.
pub struct SerialWriter;

impl fmt::Write for SerialWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        write_str(s);
        Ok(())
    }
}

/// Print macro for serial output.
#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => {
        $crate::serial::_print(format_args!($($arg)*));
    };
}

/// Println macro for serial output.
#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($($arg:tt)*) => {
        $crate::serial_print!("{}\n", format_args!($($arg)*));
    };
}

/// Internal print function.
#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use x86_64::instructions::interrupts;

    // Disable interrupts to prevent deadlock
    interrupts::without_interrupts(|| {
        let _ = SerialWriter.write_fmt(args);
    });
}

/// Fixed-width tag printed in front of every log line.
fn level_tag(level: Level) -> &'static str {
    match level {
        Level::Trace => "[TRACE]",
        Level::Debug => "[DEBUG]",
        Level::Info => "[INFO ]",
        Level::Warn => "[WARN ]",
        Level::Error => "[ERROR]",
    }
}

/// `log` backend writing to COM1.
pub struct SerialLogger;

impl Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            crate::serial_println!(
                "{} {}: {}",
                level_tag(record.level()),
                record.target(),
                record.args()
            );
        }
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_tags_have_equal_width() {
        let levels = [
            Level::Trace,
            Level::Debug,
            Level::Info,
            Level::Warn,
            Level::Error,
        ];
        for level in levels {
            assert_eq!(level_tag(level).len(), 7);
        }
    }
}
