//! Test Support
//!
//! In-memory ELF64 images and a Vec-backed address space to load them into.

use alloc::vec;
use alloc::vec::Vec;

use crate::loader::elf::{STB_GLOBAL, STT_FUNC, STT_OBJECT};
use crate::loader::{AddressSpace, SymbolResolver};

// File header field offsets
pub const E_IDENT_CLASS: usize = 4;
pub const E_IDENT_DATA: usize = 5;
pub const E_IDENT_VERSION: usize = 6;
pub const E_TYPE: usize = 16;
pub const E_MACHINE: usize = 18;
pub const E_ENTRY: usize = 24;
pub const E_PHOFF: usize = 32;
pub const E_SHOFF: usize = 40;
pub const E_EHSIZE: usize = 52;
pub const E_PHENTSIZE: usize = 54;
pub const E_PHNUM: usize = 56;
pub const E_SHENTSIZE: usize = 58;
pub const E_SHNUM: usize = 60;
pub const E_SHSTRNDX: usize = 62;

// Section header field offsets
pub const SH_TYPE: usize = 4;
pub const SH_OFFSET: usize = 24;
pub const SH_SIZE: usize = 32;
pub const SH_ENTSIZE: usize = 56;

// Program header field offsets
pub const P_OFFSET: usize = 8;
pub const P_VADDR: usize = 16;
pub const P_FILESZ: usize = 32;
pub const P_MEMSZ: usize = 40;

/// Section indices in built images
pub const SHSTRTAB_INDEX: usize = 1;
pub const STRTAB_INDEX: usize = 2;
pub const SYMTAB_INDEX: usize = 3;

/// ".shstrtab" at 1, ".strtab" at 11, ".symtab" at 19
const SECTION_NAMES: &[u8] = b"\0.shstrtab\0.strtab\0.symtab\0";

pub const GLOBAL_OBJECT: u8 = (STB_GLOBAL << 4) | STT_OBJECT;
pub const GLOBAL_FUNC: u8 = (STB_GLOBAL << 4) | STT_FUNC;
pub const LOCAL_OBJECT: u8 = STT_OBJECT;

struct Segment {
    vaddr: u64,
    data: Vec<u8>,
    memsz: u64,
}

struct Sym {
    name: &'static str,
    info: u8,
    value: u64,
    size: u64,
}

/// Builds a minimal x86_64 executable.
///
/// Layout: file header, program headers, segment contents, string tables,
/// symbol table, section headers. Sections are null, `.shstrtab` and, if
/// any symbol was added, `.strtab` and `.symtab`.
pub struct ElfBuilder {
    entry: u64,
    segments: Vec<Segment>,
    symbols: Vec<Sym>,
}

impl ElfBuilder {
    pub fn new(entry: u64) -> Self {
        Self {
            entry,
            segments: Vec::new(),
            symbols: Vec::new(),
        }
    }

    pub fn segment(mut self, vaddr: u64, data: &[u8], memsz: u64) -> Self {
        self.segments.push(Segment {
            vaddr,
            data: data.to_vec(),
            memsz,
        });
        self
    }

    pub fn symbol(mut self, name: &'static str, info: u8, value: u64, size: u64) -> Self {
        self.symbols.push(Sym {
            name,
            info,
            value,
            size,
        });
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let phoff = 64;
        let data_start = phoff + 56 * self.segments.len();

        let mut body = Vec::new();
        let mut segment_offsets = Vec::new();
        for segment in &self.segments {
            segment_offsets.push(data_start + body.len());
            body.extend_from_slice(&segment.data);
        }

        let shstrtab_offset = data_start + body.len();
        body.extend_from_slice(SECTION_NAMES);

        let mut strtab = vec![0u8];
        let mut name_offsets = Vec::new();
        for sym in &self.symbols {
            name_offsets.push(strtab.len() as u32);
            strtab.extend_from_slice(sym.name.as_bytes());
            strtab.push(0);
        }
        let strtab_offset = data_start + body.len();
        body.extend_from_slice(&strtab);
        align8(&mut body, data_start);

        let symtab_offset = data_start + body.len();
        body.extend_from_slice(&[0u8; 24]);
        for (sym, &name) in self.symbols.iter().zip(&name_offsets) {
            put_u32(&mut body, name);
            body.push(sym.info);
            body.push(0);
            put_u16(&mut body, 1);
            put_u64(&mut body, sym.value);
            put_u64(&mut body, sym.size);
        }
        let symtab_size = 24 * (self.symbols.len() + 1);
        align8(&mut body, data_start);

        let shoff = data_start + body.len();
        let shnum: u16 = if self.symbols.is_empty() { 2 } else { 4 };

        let mut out = Vec::new();
        out.extend_from_slice(&[0x7F, b'E', b'L', b'F', 2, 1, 1]);
        out.resize(16, 0);
        put_u16(&mut out, 2);
        put_u16(&mut out, 62);
        put_u32(&mut out, 1);
        put_u64(&mut out, self.entry);
        put_u64(&mut out, phoff as u64);
        put_u64(&mut out, shoff as u64);
        put_u32(&mut out, 0);
        put_u16(&mut out, 64);
        put_u16(&mut out, 56);
        put_u16(&mut out, self.segments.len() as u16);
        put_u16(&mut out, 64);
        put_u16(&mut out, shnum);
        put_u16(&mut out, SHSTRTAB_INDEX as u16);

        for (segment, &offset) in self.segments.iter().zip(&segment_offsets) {
            put_u32(&mut out, 1);
            put_u32(&mut out, 5);
            put_u64(&mut out, offset as u64);
            put_u64(&mut out, segment.vaddr);
            put_u64(&mut out, segment.vaddr);
            put_u64(&mut out, segment.data.len() as u64);
            put_u64(&mut out, segment.memsz);
            put_u64(&mut out, 0x1000);
        }

        out.extend_from_slice(&body);

        out.extend_from_slice(&[0u8; 64]);
        section(&mut out, 1, 3, shstrtab_offset, SECTION_NAMES.len(), 0, 0);
        if !self.symbols.is_empty() {
            section(&mut out, 11, 3, strtab_offset, strtab.len(), 0, 0);
            section(&mut out, 19, 2, symtab_offset, symtab_size, STRTAB_INDEX as u32, 24);
        }

        out
    }
}

fn section(
    out: &mut Vec<u8>,
    name: u32,
    kind: u32,
    offset: usize,
    size: usize,
    link: u32,
    entsize: u64,
) {
    put_u32(out, name);
    put_u32(out, kind);
    put_u64(out, 0);
    put_u64(out, 0);
    put_u64(out, offset as u64);
    put_u64(out, size as u64);
    put_u32(out, link);
    put_u32(out, 0);
    put_u64(out, 1);
    put_u64(out, entsize);
}

fn align8(body: &mut Vec<u8>, base: usize) {
    while (base + body.len()) % 8 != 0 {
        body.push(0);
    }
}

fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_u64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap())
}

pub fn write_u16(bytes: &mut [u8], offset: usize, value: u16) {
    bytes[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

pub fn write_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub fn write_u64(bytes: &mut [u8], offset: usize, value: u64) {
    bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

/// File offset of section header `index`.
pub fn section_header(bytes: &[u8], index: usize) -> usize {
    read_u64(bytes, E_SHOFF) as usize + index * 64
}

/// File offset of program header `index`.
pub fn program_header(bytes: &[u8], index: usize) -> usize {
    read_u64(bytes, E_PHOFF) as usize + index * 56
}

/// Byte filling fresh test memory, so zero-fill is observable.
pub const POISON: u8 = 0xAA;

/// Address space backed by a vector, covering `base .. base + size`.
pub struct TestMemory {
    base: u64,
    bytes: Vec<u8>,
    limit: u64,
    /// Number of copy and zero calls
    pub writes: usize,
}

impl TestMemory {
    pub fn new(base: u64, size: usize, limit: u64) -> Self {
        Self {
            base,
            bytes: vec![POISON; size],
            limit,
            writes: 0,
        }
    }

    fn index(&self, va: u64, len: u64) -> usize {
        assert!(va >= self.base, "write below test memory: {:#x}", va);
        let start = (va - self.base) as usize;
        assert!(
            start + len as usize <= self.bytes.len(),
            "write past test memory: {:#x}+{:#x}",
            va,
            len
        );
        start
    }

    pub fn read(&self, va: u64, len: usize) -> &[u8] {
        let start = (va - self.base) as usize;
        &self.bytes[start..start + len]
    }

    pub fn read_u64(&self, va: u64) -> u64 {
        read_u64(self.read(va, 8), 0)
    }

    pub fn is_untouched(&self) -> bool {
        self.bytes.iter().all(|&b| b == POISON)
    }
}

impl AddressSpace for TestMemory {
    fn limit(&self) -> u64 {
        self.limit
    }

    fn copy_to(&mut self, va: u64, bytes: &[u8]) {
        let start = self.index(va, bytes.len() as u64);
        self.bytes[start..start + bytes.len()].copy_from_slice(bytes);
        self.writes += 1;
    }

    fn zero(&mut self, va: u64, len: u64) {
        let start = self.index(va, len);
        self.bytes[start..start + len as usize].fill(0);
        self.writes += 1;
    }
}

/// Resolver over a fixed list of names.
pub struct FixedResolver(pub &'static [(&'static str, u64)]);

impl SymbolResolver for FixedResolver {
    fn find_function(&self, name: &str) -> Option<u64> {
        self.0
            .iter()
            .find(|(known, _)| *known == name)
            .map(|&(_, addr)| addr)
    }
}

/// Resolver that knows nothing.
pub const NO_SYMBOLS: FixedResolver = FixedResolver(&[]);
