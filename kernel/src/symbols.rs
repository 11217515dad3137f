//! Kernel symbol table
//!
//! Maps kernel function names to addresses and back. The loader uses the
//! name direction to bind environment function pointers; the address
//! direction turns raw instruction pointers into readable locations.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use hashbrown::HashMap;
use lazy_static::lazy_static;
use log::debug;
use spin::RwLock;

use crate::loader::elf::{ElfError, ElfFile, STT_FUNC};
use crate::loader::SymbolResolver;

/// Symbol
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    /// Name
    pub name: String,
    /// Address
    pub address: u64,
    /// Size
    pub size: u64,
}

impl Symbol {
    fn contains(&self, address: u64) -> bool {
        address >= self.address && address - self.address < self.size.max(1)
    }
}

/// Symbol table
#[derive(Debug, Default)]
pub struct SymbolTable {
    /// Symbols sorted by address
    symbols: Vec<Symbol>,
    /// Name to address lookup
    by_name: HashMap<String, u64>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect the function symbols of an ELF image.
    ///
    /// Symbols without an address or with a name that is not UTF-8 are
    /// left out.
    pub fn from_elf(binary: &[u8]) -> Result<Self, ElfError> {
        let elf = ElfFile::parse(binary)?;
        let mut table = Self::new();

        let Some(strings) = elf.symbol_names()? else {
            return Ok(table);
        };

        for section in elf.symbol_tables() {
            for symbol in elf.symbols(&section)? {
                if symbol.kind() != STT_FUNC || symbol.st_value == 0 {
                    continue;
                }
                let Some(name) = strings.get(symbol.st_name) else {
                    return Err(ElfError::InvalidSymbolName);
                };
                let Ok(name) = core::str::from_utf8(name) else {
                    continue;
                };
                table.add_symbol(Symbol {
                    name: name.to_string(),
                    address: symbol.st_value,
                    size: symbol.st_size,
                });
            }
        }

        debug!("symbols: loaded {} functions", table.count());
        Ok(table)
    }

    /// Add symbol. A later symbol with the same name replaces the earlier
    /// one in name lookups.
    pub fn add_symbol(&mut self, symbol: Symbol) {
        self.by_name.insert(symbol.name.clone(), symbol.address);

        let idx = self.symbols.partition_point(|s| s.address <= symbol.address);
        self.symbols.insert(idx, symbol);
    }

    /// Symbol containing `address`, with the offset into it.
    pub fn find(&self, address: u64) -> Option<(&Symbol, u64)> {
        let idx = self.symbols.partition_point(|s| s.address <= address);
        let symbol = self.symbols[..idx].last()?;
        symbol
            .contains(address)
            .then(|| (symbol, address - symbol.address))
    }

    /// Address of the function called `name`.
    pub fn find_function(&self, name: &str) -> Option<u64> {
        self.by_name.get(name).copied()
    }

    /// Symbol count
    pub fn count(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

impl SymbolResolver for SymbolTable {
    fn find_function(&self, name: &str) -> Option<u64> {
        SymbolTable::find_function(self, name)
    }
}

lazy_static! {
    /// Symbols of the running kernel, filled in at boot.
    pub static ref KERNEL_SYMBOLS: RwLock<SymbolTable> = RwLock::new(SymbolTable::new());
}

/// Replace the kernel symbols with the functions found in `kernel_image`.
pub fn load_kernel_symbols(kernel_image: &[u8]) -> Result<usize, ElfError> {
    let table = SymbolTable::from_elf(kernel_image)?;
    let count = table.count();
    *KERNEL_SYMBOLS.write() = table;
    Ok(count)
}
