//! CMOS real-time clock as the periodic preemption source.
//!
//! The RTC is programmed to raise its periodic interrupt at 2 Hz. The trap
//! path acknowledges each tick with [`check_status`] and then hands control
//! to the scheduler, which dispatches through [`crate::env::run`].

use bitflags::bitflags;
use x86_64::instructions::port::Port;

/// CMOS index register. Bit 7 masks NMI.
const IO_RTC_CMND: u16 = 0x70;

/// CMOS data register.
const IO_RTC_DATA: u16 = 0x71;

/// Status register A (rate selection).
pub const RTC_AREG: u8 = 0x0A;

/// Status register B (interrupt enables).
pub const RTC_BREG: u8 = 0x0B;

/// Status register C (interrupt flags, cleared on read).
pub const RTC_CREG: u8 = 0x0C;

/// Set in the index byte to keep NMI masked while selecting a register.
pub const NMI_LOCK: u8 = 0x80;

/// Rate selector for a 500 ms period.
const RATE_2HZ: u8 = 0x0F;

bitflags! {
    /// RTC status register B.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RegisterB: u8 {
        /// Daylight saving enable.
        const DSE = 1 << 0;
        /// 24 hour mode.
        const HOUR_24 = 1 << 1;
        /// Binary (not BCD) date mode.
        const DM = 1 << 2;
        /// Square wave enable.
        const SQWE = 1 << 3;
        /// Update-ended interrupt enable.
        const UIE = 1 << 4;
        /// Alarm interrupt enable.
        const AIE = 1 << 5;
        /// Periodic interrupt enable.
        const PIE = 1 << 6;
        /// Halt clock updates.
        const SET = 1 << 7;
    }
}

bitflags! {
    /// RTC status register C.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RegisterC: u8 {
        /// Update-ended interrupt fired.
        const UF = 1 << 4;
        /// Alarm interrupt fired.
        const AF = 1 << 5;
        /// Periodic interrupt fired.
        const PF = 1 << 6;
        /// Any of the above is pending.
        const IRQF = 1 << 7;
    }
}

/// Register A with the rate bits forced to the 2 Hz selector.
fn with_periodic_rate(reg_a: u8) -> u8 {
    reg_a | RATE_2HZ
}

/// Register B with the periodic interrupt enabled.
fn with_periodic_interrupt(reg_b: u8) -> u8 {
    (RegisterB::from_bits_retain(reg_b) | RegisterB::PIE).bits()
}

/// Select a CMOS register, keeping NMI masked.
fn select(reg: u8) {
    let mut cmnd: Port<u8> = Port::new(IO_RTC_CMND);
    unsafe { cmnd.write(reg | NMI_LOCK) };
}

fn read_data() -> u8 {
    let mut data: Port<u8> = Port::new(IO_RTC_DATA);
    unsafe { data.read() }
}

fn write_data(value: u8) {
    let mut data: Port<u8> = Port::new(IO_RTC_DATA);
    unsafe { data.write(value) };
}

/// Unmask non-maskable interrupts.
pub fn nmi_enable() {
    let mut cmnd: Port<u8> = Port::new(IO_RTC_CMND);
    unsafe {
        let value = cmnd.read();
        cmnd.write(value & !NMI_LOCK);
    }
}

/// Mask non-maskable interrupts.
pub fn nmi_disable() {
    let mut cmnd: Port<u8> = Port::new(IO_RTC_CMND);
    unsafe {
        let value = cmnd.read();
        cmnd.write(value | NMI_LOCK);
    }
}

/// Program the RTC for a 2 Hz periodic interrupt.
pub fn init() {
    nmi_disable();

    select(RTC_AREG);
    let reg_a = read_data();
    select(RTC_AREG);
    write_data(with_periodic_rate(reg_a));

    select(RTC_BREG);
    let reg_b = read_data();
    select(RTC_BREG);
    write_data(with_periodic_interrupt(reg_b));

    nmi_enable();
    log::info!("rtc: periodic interrupt at 2 Hz");
}

/// Read and thereby acknowledge status register C.
///
/// The RTC raises no further interrupts until this is done.
pub fn check_status() -> RegisterC {
    select(RTC_CREG);
    let status = read_data();
    nmi_enable();
    RegisterC::from_bits_retain(status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_bits_select_2hz() {
        assert_eq!(with_periodic_rate(0x26), 0x2F);
        assert_eq!(with_periodic_rate(0x00), 0x0F);
    }

    #[test]
    fn test_periodic_interrupt_keeps_other_bits() {
        let reg_b = (RegisterB::HOUR_24 | RegisterB::DM).bits();
        let updated = RegisterB::from_bits_retain(with_periodic_interrupt(reg_b));
        assert!(updated.contains(RegisterB::PIE));
        assert!(updated.contains(RegisterB::HOUR_24 | RegisterB::DM));
        assert_eq!(with_periodic_interrupt(updated.bits()), updated.bits());
    }
}
