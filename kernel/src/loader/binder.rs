//! Load-time binding of kernel functions.
//!
//! Environments built for the non-isolated (`kspace`) variant reach kernel
//! services through global function pointers. Their images are linked
//! without the kernel, so the pointers are filled in here: every global,
//! default-visibility, pointer-sized data symbol whose name matches a kernel
//! function gets that function's address written to it.

use log::debug;

use super::elf::{ElfError, ElfFile, Elf64Symbol, STB_GLOBAL, STT_OBJECT, STV_DEFAULT};
use super::segment_loader::{AddressSpace, LoadedImage};

/// Resolves kernel function names to addresses.
pub trait SymbolResolver {
    /// Address of the kernel function `name`, if there is one.
    fn find_function(&self, name: &str) -> Option<u64>;
}

const POINTER_SIZE: u64 = core::mem::size_of::<u64>() as u64;

fn is_bindable(symbol: &Elf64Symbol) -> bool {
    symbol.binding() == STB_GLOBAL
        && symbol.kind() == STT_OBJECT
        && symbol.visibility() == STV_DEFAULT
        && symbol.st_size == POINTER_SIZE
}

/// Patch the function pointers of a loaded image.
///
/// Images without `.strtab` or without a symbol table bind nothing. Names
/// the resolver does not know are skipped. Returns the number of pointers
/// written.
pub fn bind_functions(
    elf: &ElfFile<'_>,
    image: &LoadedImage,
    mem: &mut dyn AddressSpace,
    resolver: &dyn SymbolResolver,
) -> Result<usize, ElfError> {
    let Some(strings) = elf.symbol_names()? else {
        debug!("String table is absent");
        return Ok(0);
    };

    let mut bound = 0;
    for section in elf.symbol_tables() {
        for symbol in elf.symbols(&section)?.filter(is_bindable) {
            let name = strings
                .get(symbol.st_name)
                .ok_or(ElfError::InvalidSymbolName)?;

            let value = symbol.st_value;
            if !image.contains(value, POINTER_SIZE) {
                return Err(ElfError::SymbolOutsideImage);
            }

            let Ok(name) = core::str::from_utf8(name) else {
                continue;
            };
            if let Some(addr) = resolver.find_function(name) {
                debug!("Bind function '{}' to {:#x}", name, addr);
                mem.write_u64(value, addr);
                bound += 1;
            }
        }
    }

    Ok(bound)
}
