//! ELF Segment Memory Loader
//!
//! Copies the `PT_LOAD` segments of a validated [`ElfFile`] into an
//! [`AddressSpace`] and works out the span the image occupies.
//!
//! # Process
//!
//! 1. For each PT_LOAD segment in the ELF:
//!    a. Clamp the file size to the memory size
//!    b. Check the source range against the file and the destination
//!       range against the address ceiling
//!    c. Copy segment data and zero-fill the rest (BSS)
//! 2. Reject an image without segments or with an empty span
//! 3. Check that the entry point lies inside the span

use log::{debug, warn};

use super::binder::{bind_functions, SymbolResolver};
use super::elf::{range_within, ElfError, ElfFile, PT_LOAD};

/// Memory an image is loaded into.
///
/// Addresses below [`AddressSpace::limit`] are assumed mapped and writable.
/// The loader checks every destination range against the limit before
/// writing.
pub trait AddressSpace {
    /// Exclusive upper bound of loadable addresses.
    fn limit(&self) -> u64;

    /// Copy `bytes` to `va`.
    fn copy_to(&mut self, va: u64, bytes: &[u8]);

    /// Fill `len` bytes at `va` with zero.
    fn zero(&mut self, va: u64, len: u64);

    /// Store a little-endian `u64` at `va`.
    fn write_u64(&mut self, va: u64, value: u64) {
        self.copy_to(va, &value.to_le_bytes());
    }
}

/// The flat, identity-mapped address space environments run in before
/// paging is set up.
#[derive(Debug)]
pub struct FlatMemory {
    limit: u64,
}

impl FlatMemory {
    /// # Safety
    ///
    /// Every address below `limit` must be mapped writable and must not
    /// overlap memory the kernel is using.
    pub const unsafe fn new(limit: u64) -> Self {
        Self { limit }
    }
}

impl AddressSpace for FlatMemory {
    fn limit(&self) -> u64 {
        self.limit
    }

    fn copy_to(&mut self, va: u64, bytes: &[u8]) {
        // SAFETY: the loader only writes below `limit`, which the caller of
        // `new` promised is mapped and unused.
        unsafe { core::ptr::copy_nonoverlapping(bytes.as_ptr(), va as *mut u8, bytes.len()) };
    }

    fn zero(&mut self, va: u64, len: u64) {
        // SAFETY: as for `copy_to`.
        unsafe { core::ptr::write_bytes(va as *mut u8, 0, len as usize) };
    }
}

/// Address span of a loaded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedImage {
    /// Entry point
    pub entry: u64,
    /// Lowest loaded address
    pub start: u64,
    /// One past the highest loaded address
    pub end: u64,
}

impl LoadedImage {
    /// Whether `len` bytes at `va` lie inside the image.
    pub fn contains(&self, va: u64, len: u64) -> bool {
        va >= self.start && va.checked_add(len).is_some_and(|end| end <= self.end)
    }
}

/// Copy every loadable segment of `elf` into `mem`.
///
/// Segments are validated one at a time, so a failure leaves the segments
/// before it in place. Segment overlap is not checked.
pub fn load_segments(elf: &ElfFile<'_>, mem: &mut dyn AddressSpace) -> Result<LoadedImage, ElfError> {
    let binary = elf.binary();
    let limit = mem.limit();
    let mut start = limit;
    let mut end = 0u64;

    for ph in elf.program_headers().filter(|ph| ph.p_type == PT_LOAD) {
        let vaddr = ph.p_vaddr;
        let memsz = ph.p_memsz;
        let filesz = ph.p_filesz.min(memsz);

        let Some(src) = range_within(ph.p_offset, filesz, binary.len()) else {
            warn!(
                "Segment contents exceed file size: {:#x} > {:#x}",
                ph.p_offset.saturating_add(filesz),
                binary.len()
            );
            return Err(ElfError::SegmentOutOfBounds);
        };

        let seg_end = match vaddr.checked_add(memsz) {
            Some(seg_end) if seg_end <= limit => seg_end,
            _ => {
                warn!("Segment at {:#x} exceeds user memory {:#x}", vaddr, limit);
                return Err(ElfError::SegmentAboveLimit);
            }
        };

        start = start.min(vaddr);
        end = end.max(seg_end);

        debug!(
            "Loading segment of size {:#010x} to {:#x} ({:?})",
            filesz,
            vaddr,
            ph.flags()
        );
        mem.copy_to(vaddr, &binary[src]);
        mem.zero(vaddr + filesz, memsz - filesz);
    }

    if end <= start || end >= limit {
        warn!("Invalid memory mappings {:#x}..{:#x}", start, end);
        return Err(ElfError::InvalidMappings);
    }

    let entry = elf.entry();
    if entry < start || entry >= end {
        warn!("Program entry point {:#x} is outside program data", entry);
        return Err(ElfError::EntryOutsideImage);
    }

    Ok(LoadedImage { entry, start, end })
}

/// Validate `binary` and load it into `mem`.
///
/// With a `resolver`, kernel function pointers in the image are bound once
/// the segments are in place. Nothing outside `mem` is touched, so a caller
/// can load before committing any other state to the new image.
pub fn load_icode(
    binary: &[u8],
    mem: &mut dyn AddressSpace,
    resolver: Option<&dyn SymbolResolver>,
) -> Result<LoadedImage, ElfError> {
    let elf = ElfFile::parse(binary)?;
    let image = load_segments(&elf, mem)?;
    if let Some(resolver) = resolver {
        bind_functions(&elf, &image, mem, resolver)?;
    }
    debug!("Program entry point {:#x}", image.entry);
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_contains() {
        let image = LoadedImage {
            entry: 0x1000,
            start: 0x1000,
            end: 0x2000,
        };
        assert!(image.contains(0x1000, 8));
        assert!(image.contains(0x1ff8, 8));
        assert!(!image.contains(0x1ffc, 8));
        assert!(!image.contains(0xff8, 8));
        assert!(!image.contains(u64::MAX, 8));
    }
}
