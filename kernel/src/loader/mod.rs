//! ELF Binary Loader
//!
//! Turns a raw ELF64 executable into a loaded image inside an
//! environment's address space.
//!
//! # Security
//!
//! - Every offset and size read from the image is checked against the
//!   buffer before use
//! - Segments may not reach the address ceiling of the target space
//! - Symbol binding only writes inside the loaded span

pub mod binder;
pub mod elf;
pub mod segment_loader;

pub use binder::{bind_functions, SymbolResolver};
pub use elf::{ElfError, ElfFile};
pub use segment_loader::{load_icode, load_segments, AddressSpace, FlatMemory, LoadedImage};

use crate::error::KernelError;

impl From<ElfError> for KernelError {
    fn from(_: ElfError) -> Self {
        KernelError::InvalidExe
    }
}
