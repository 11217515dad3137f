//! Saved execution state of an environment.
//!
//! The layout of [`TrapFrame`] is shared with the trap entry stubs, which
//! push it on the kernel stack, and with [`env_pop_tf`], which consumes it.
//! Do not reorder fields.

use core::mem::offset_of;

use x86_64::registers::rflags::RFlags;
use x86_64::registers::segmentation::SegmentSelector;

/// General purpose registers, in trap-entry push order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct PushRegs {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rax: u64,
}

/// Full register, flags and segment snapshot of a suspended environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct TrapFrame {
    /// General purpose registers
    pub regs: PushRegs,
    /// Extra segment
    pub es: u64,
    /// Data segment
    pub ds: u64,
    /// Trap number (filled by the entry stub)
    pub trapno: u64,
    /// Error code (hardware or zero)
    pub err: u64,

    // Interrupt frame, in `iretq` order
    /// Instruction pointer
    pub rip: u64,
    /// Code segment
    pub cs: u64,
    /// RFLAGS register
    pub rflags: u64,
    /// Stack pointer
    pub rsp: u64,
    /// Stack segment
    pub ss: u64,
}

/// Code and data selectors an environment starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segments {
    pub code: SegmentSelector,
    pub data: SegmentSelector,
}

impl TrapFrame {
    /// All-zero frame.
    pub const fn new() -> Self {
        Self {
            regs: PushRegs {
                r15: 0,
                r14: 0,
                r13: 0,
                r12: 0,
                r11: 0,
                r10: 0,
                r9: 0,
                r8: 0,
                rsi: 0,
                rdi: 0,
                rbp: 0,
                rdx: 0,
                rcx: 0,
                rbx: 0,
                rax: 0,
            },
            es: 0,
            ds: 0,
            trapno: 0,
            err: 0,
            rip: 0,
            cs: 0,
            rflags: 0,
            rsp: 0,
            ss: 0,
        }
    }

    /// Frame for a freshly allocated environment.
    ///
    /// Everything is zero except the selectors, the stack pointer and the
    /// flags (interrupts enabled, IOPL 0). The entry point is filled in by
    /// the loader.
    pub fn initial(segments: Segments, stack_top: u64) -> Self {
        let data = u64::from(segments.data.0);

        Self {
            ds: data,
            es: data,
            ss: data,
            cs: u64::from(segments.code.0),
            rsp: stack_top,
            rflags: RFlags::INTERRUPT_FLAG.bits(),
            ..Self::new()
        }
    }

    /// Flags register as typed bits.
    pub fn flags(&self) -> RFlags {
        RFlags::from_bits_retain(self.rflags)
    }
}

/// Restore `tf` onto the CPU and resume at its instruction pointer.
///
/// General purpose registers are loaded first, then SS, RSP, RFLAGS, CS and
/// RIP are pushed in the order `iretq` pops them. RAX doubles as the frame
/// pointer and is loaded last.
///
/// # Safety
///
/// - `tf` must point to a frame whose selectors are valid GDT entries
/// - `tf.rip` and `tf.rsp` must be mapped at the frame's privilege level
/// - Nothing on the current kernel stack may still be needed
#[unsafe(naked)]
pub unsafe extern "C" fn env_pop_tf(tf: *const TrapFrame) -> ! {
    core::arch::naked_asm!(
        "mov rax, rdi",
        "mov rcx, [rax + {es}]",
        "mov es, cx",
        "mov rcx, [rax + {ds}]",
        "mov ds, cx",
        "mov rbx, [rax + {rbx}]",
        "mov rcx, [rax + {rcx}]",
        "mov rdx, [rax + {rdx}]",
        "mov rsi, [rax + {rsi}]",
        "mov rdi, [rax + {rdi}]",
        "mov rbp, [rax + {rbp}]",
        "mov r8,  [rax + {r8}]",
        "mov r9,  [rax + {r9}]",
        "mov r10, [rax + {r10}]",
        "mov r11, [rax + {r11}]",
        "mov r12, [rax + {r12}]",
        "mov r13, [rax + {r13}]",
        "mov r14, [rax + {r14}]",
        "mov r15, [rax + {r15}]",
        "push qword ptr [rax + {ss}]",
        "push qword ptr [rax + {rsp}]",
        "push qword ptr [rax + {rflags}]",
        "push qword ptr [rax + {cs}]",
        "push qword ptr [rax + {rip}]",
        "mov rax, [rax + {rax}]",
        "iretq",
        es = const offset_of!(TrapFrame, es),
        ds = const offset_of!(TrapFrame, ds),
        rax = const offset_of!(TrapFrame, regs.rax),
        rbx = const offset_of!(TrapFrame, regs.rbx),
        rcx = const offset_of!(TrapFrame, regs.rcx),
        rdx = const offset_of!(TrapFrame, regs.rdx),
        rsi = const offset_of!(TrapFrame, regs.rsi),
        rdi = const offset_of!(TrapFrame, regs.rdi),
        rbp = const offset_of!(TrapFrame, regs.rbp),
        r8 = const offset_of!(TrapFrame, regs.r8),
        r9 = const offset_of!(TrapFrame, regs.r9),
        r10 = const offset_of!(TrapFrame, regs.r10),
        r11 = const offset_of!(TrapFrame, regs.r11),
        r12 = const offset_of!(TrapFrame, regs.r12),
        r13 = const offset_of!(TrapFrame, regs.r13),
        r14 = const offset_of!(TrapFrame, regs.r14),
        r15 = const offset_of!(TrapFrame, regs.r15),
        rip = const offset_of!(TrapFrame, rip),
        cs = const offset_of!(TrapFrame, cs),
        rflags = const offset_of!(TrapFrame, rflags),
        rsp = const offset_of!(TrapFrame, rsp),
        ss = const offset_of!(TrapFrame, ss),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gdt::{GD_KD, GD_KT};

    #[test]
    fn test_frame_size() {
        assert_eq!(core::mem::size_of::<PushRegs>(), 15 * 8);
        assert_eq!(core::mem::size_of::<TrapFrame>(), 24 * 8);
    }

    #[test]
    fn test_iret_frame_order() {
        let rip = offset_of!(TrapFrame, rip);
        assert_eq!(offset_of!(TrapFrame, cs), rip + 8);
        assert_eq!(offset_of!(TrapFrame, rflags), rip + 16);
        assert_eq!(offset_of!(TrapFrame, rsp), rip + 24);
        assert_eq!(offset_of!(TrapFrame, ss), rip + 32);
    }

    #[test]
    fn test_initial_frame() {
        let segments = Segments {
            code: GD_KT,
            data: GD_KD,
        };
        let tf = TrapFrame::initial(segments, 0x200_0000);

        assert_eq!(tf.cs, 0x08);
        assert_eq!(tf.ds, 0x10);
        assert_eq!(tf.es, 0x10);
        assert_eq!(tf.ss, 0x10);
        assert_eq!(tf.rsp, 0x200_0000);
        assert_eq!(tf.rip, 0);
        assert_eq!(tf.regs, PushRegs::default());
        assert!(tf.flags().contains(RFlags::INTERRUPT_FLAG));
        assert!(!tf.flags().intersects(RFlags::IOPL_HIGH | RFlags::IOPL_LOW));
    }
}
