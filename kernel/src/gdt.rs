//! Global Descriptor Table setup.
//!
//! Segmentation is mostly disabled in long mode, but the privilege level of
//! an environment is still decided by the selectors in its trap frame. The
//! environment core only references the selectors published here; the
//! table itself is built once and loaded per CPU by [`init_percpu`].

use lazy_static::lazy_static;
use x86_64::registers::segmentation::SegmentSelector;
use x86_64::structures::gdt::{Descriptor, GlobalDescriptorTable};
use x86_64::structures::tss::TaskStateSegment;
use x86_64::{PrivilegeLevel, VirtAddr};

/// Kernel code segment (0x08).
pub const GD_KT: SegmentSelector = SegmentSelector::new(1, PrivilegeLevel::Ring0);

/// Kernel data segment (0x10).
pub const GD_KD: SegmentSelector = SegmentSelector::new(2, PrivilegeLevel::Ring0);

/// User data segment (0x18 | RPL 3 = 0x1B).
pub const GD_UD: SegmentSelector = SegmentSelector::new(3, PrivilegeLevel::Ring3);

/// User code segment (0x20 | RPL 3 = 0x23).
pub const GD_UT: SegmentSelector = SegmentSelector::new(4, PrivilegeLevel::Ring3);

/// IST index used by the double fault handler.
pub const DOUBLE_FAULT_IST_INDEX: u16 = 0;

/// Stack size for the double fault handler.
const DOUBLE_FAULT_STACK_SIZE: usize = 4096 * 5;

lazy_static! {
    static ref TSS: TaskStateSegment = {
        let mut tss = TaskStateSegment::new();

        tss.interrupt_stack_table[DOUBLE_FAULT_IST_INDEX as usize] = {
            static mut STACK: [u8; DOUBLE_FAULT_STACK_SIZE] = [0; DOUBLE_FAULT_STACK_SIZE];

            let stack_start = VirtAddr::from_ptr(unsafe { &raw const STACK });
            // Stacks grow down
            stack_start + DOUBLE_FAULT_STACK_SIZE as u64
        };

        tss
    };
}

lazy_static! {
    static ref GDT: (GlobalDescriptorTable, Selectors) = {
        let mut gdt = GlobalDescriptorTable::new();

        // Order matters: the appended indices must match the GD_* constants.
        let kernel_code = gdt.append(Descriptor::kernel_code_segment());
        let kernel_data = gdt.append(Descriptor::kernel_data_segment());
        let user_data = gdt.append(Descriptor::user_data_segment());
        let user_code = gdt.append(Descriptor::user_code_segment());
        let tss = gdt.append(Descriptor::tss_segment(&TSS));

        (gdt, Selectors {
            kernel_code,
            kernel_data,
            user_data,
            user_code,
            tss,
        })
    };
}

/// Selectors handed out by the GDT while it was being built.
struct Selectors {
    kernel_code: SegmentSelector,
    kernel_data: SegmentSelector,
    user_data: SegmentSelector,
    user_code: SegmentSelector,
    tss: SegmentSelector,
}

/// Load the GDT and segment registers on the calling CPU.
///
/// The kernel never uses FS or GS, so those stay on the user data segment.
/// The LDT is cleared since nothing uses it.
pub fn init_percpu() {
    use x86_64::instructions::segmentation::{Segment, CS, DS, ES, FS, GS, SS};
    use x86_64::instructions::tables::load_tss;

    debug_assert!(selectors_match());

    GDT.0.load();

    unsafe {
        CS::set_reg(GDT.1.kernel_code);
        DS::set_reg(GDT.1.kernel_data);
        ES::set_reg(GDT.1.kernel_data);
        SS::set_reg(GDT.1.kernel_data);
        FS::set_reg(GDT.1.user_data);
        GS::set_reg(GDT.1.user_data);

        core::arch::asm!("lldt {0:x}", in(reg) 0u16, options(nostack, preserves_flags));

        load_tss(GDT.1.tss);
    }
}

/// Whether the built table agrees with the published constants.
fn selectors_match() -> bool {
    let s = &GDT.1;
    s.kernel_code.index() == GD_KT.index()
        && s.kernel_data.index() == GD_KD.index()
        && s.user_data.index() == GD_UD.index()
        && s.user_code.index() == GD_UT.index()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_values() {
        assert_eq!(GD_KT.0, 0x08);
        assert_eq!(GD_KD.0, 0x10);
        assert_eq!(GD_UD.0, 0x1B);
        assert_eq!(GD_UT.0, 0x23);
    }

    #[test]
    fn test_table_layout_matches_constants() {
        assert!(selectors_match());
        assert_eq!(GDT.1.tss.index(), 5);
    }
}
