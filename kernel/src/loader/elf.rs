//! ELF64 image parser
//!
//! Everything in an image is untrusted. [`ElfFile::parse`] checks the file
//! header, the section and program header tables and the section name
//! string table against the buffer before anything else looks at them;
//! later accessors only hand out ranges that were checked.

use core::fmt;
use core::mem::size_of;
use core::ops::Range;

use bitflags::bitflags;

/// ELF magic number: 0x7F 'E' 'L' 'F'
pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// ELF class: 64-bit
pub const ELFCLASS64: u8 = 2;

/// ELF data encoding: little endian
pub const ELFDATA2LSB: u8 = 1;

/// ELF identification version
pub const EV_CURRENT: u8 = 1;

/// ELF type: executable
pub const ET_EXEC: u16 = 2;

/// Machine type: x86_64
pub const EM_X86_64: u16 = 62;

/// Program header type: loadable segment
pub const PT_LOAD: u32 = 1;

/// Section type: symbol table
pub const SHT_SYMTAB: u32 = 2;

/// Section type: string table
pub const SHT_STRTAB: u32 = 3;

/// Symbol binding: global
pub const STB_GLOBAL: u8 = 1;

/// Symbol type: data object
pub const STT_OBJECT: u8 = 1;

/// Symbol type: function
pub const STT_FUNC: u8 = 2;

/// Symbol visibility: default
pub const STV_DEFAULT: u8 = 0;

bitflags! {
    /// Program header permission bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SegmentFlags: u32 {
        const EXECUTE = 1;
        const WRITE = 2;
        const READ = 4;
    }
}

/// ELF64 file header
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct Elf64Header {
    /// Magic number and other info
    pub e_ident: [u8; 16],
    /// Object file type
    pub e_type: u16,
    /// Machine type
    pub e_machine: u16,
    /// Object file version
    pub e_version: u32,
    /// Entry point virtual address
    pub e_entry: u64,
    /// Program header table file offset
    pub e_phoff: u64,
    /// Section header table file offset
    pub e_shoff: u64,
    /// Processor-specific flags
    pub e_flags: u32,
    /// ELF header size
    pub e_ehsize: u16,
    /// Program header table entry size
    pub e_phentsize: u16,
    /// Program header table entry count
    pub e_phnum: u16,
    /// Section header table entry size
    pub e_shentsize: u16,
    /// Section header table entry count
    pub e_shnum: u16,
    /// Section name string table index
    pub e_shstrndx: u16,
}

/// ELF64 program header
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct Elf64ProgramHeader {
    /// Segment type
    pub p_type: u32,
    /// Segment flags
    pub p_flags: u32,
    /// Segment file offset
    pub p_offset: u64,
    /// Segment virtual address
    pub p_vaddr: u64,
    /// Segment physical address (unused)
    pub p_paddr: u64,
    /// Segment size in file
    pub p_filesz: u64,
    /// Segment size in memory
    pub p_memsz: u64,
    /// Segment alignment
    pub p_align: u64,
}

impl Elf64ProgramHeader {
    pub fn flags(&self) -> SegmentFlags {
        SegmentFlags::from_bits_truncate(self.p_flags)
    }
}

/// ELF64 section header
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct Elf64SectionHeader {
    /// Section name (string table index)
    pub sh_name: u32,
    /// Section type
    pub sh_type: u32,
    /// Section flags
    pub sh_flags: u64,
    /// Section virtual address
    pub sh_addr: u64,
    /// Section file offset
    pub sh_offset: u64,
    /// Section size
    pub sh_size: u64,
    /// Link to another section
    pub sh_link: u32,
    /// Additional section information
    pub sh_info: u32,
    /// Section alignment
    pub sh_addralign: u64,
    /// Entry size if section holds table
    pub sh_entsize: u64,
}

/// ELF64 symbol table entry
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct Elf64Symbol {
    /// Name (string table offset)
    pub st_name: u32,
    /// Binding (high nibble) and type (low nibble)
    pub st_info: u8,
    /// Visibility (low two bits)
    pub st_other: u8,
    /// Section index
    pub st_shndx: u16,
    /// Value (virtual address)
    pub st_value: u64,
    /// Object size
    pub st_size: u64,
}

impl Elf64Symbol {
    pub const fn binding(&self) -> u8 {
        self.st_info >> 4
    }

    pub const fn kind(&self) -> u8 {
        self.st_info & 0xf
    }

    pub const fn visibility(&self) -> u8 {
        self.st_other & 0x3
    }
}

/// Header types that may be read straight out of an image.
///
/// # Safety
///
/// Implementors must be `repr(C, packed)` structs of integers, valid for any
/// bit pattern.
unsafe trait Plain: Copy {}

unsafe impl Plain for Elf64Header {}
unsafe impl Plain for Elf64ProgramHeader {}
unsafe impl Plain for Elf64SectionHeader {}
unsafe impl Plain for Elf64Symbol {}

/// Read a `T` at `offset`, or `None` if it does not fit in `binary`.
fn read<T: Plain>(binary: &[u8], offset: usize) -> Option<T> {
    let end = offset.checked_add(size_of::<T>())?;
    let bytes = binary.get(offset..end)?;
    // SAFETY: `bytes` covers exactly size_of::<T>() bytes and T is Plain.
    Some(unsafe { core::ptr::read_unaligned(bytes.as_ptr().cast::<T>()) })
}

/// `offset .. offset + len` as an index range, if it lies within `limit`.
pub(crate) fn range_within(offset: u64, len: u64, limit: usize) -> Option<Range<usize>> {
    let end = offset.checked_add(len)?;
    if end > limit as u64 {
        return None;
    }
    Some(offset as usize..end as usize)
}

/// ELF loading errors
///
/// Each variant names the check that failed. All of them are reported to
/// callers as [`crate::error::KernelError::InvalidExe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfError {
    /// Binary too small to contain ELF header
    TooSmall,
    /// Invalid ELF magic number
    InvalidMagic,
    /// Invalid ELF class (not 64-bit)
    InvalidClass,
    /// Invalid data encoding (not little endian)
    InvalidEncoding,
    /// Invalid ELF version
    InvalidVersion,
    /// Not an executable
    InvalidType,
    /// Invalid machine type (not x86_64)
    InvalidMachine,
    /// Declared header size smaller than the header
    InvalidEhsize,
    /// Unexpected section header entry size
    InvalidShentsize,
    /// Unexpected program header entry size
    InvalidPhentsize,
    /// Section name table index past the section count
    InvalidShstrndx,
    /// Section header table extends beyond file
    SectionTableOutOfBounds,
    /// Program header table extends beyond file
    ProgramTableOutOfBounds,
    /// Section name table is not a string table
    NotStringTable,
    /// String table extends beyond file
    StringTableOutOfBounds,
    /// String table has no bytes
    StringTableEmpty,
    /// String table does not end with NUL
    StringTableNotTerminated,
    /// Section name offset past the section name table
    InvalidSectionName,
    /// Segment contents extend beyond file
    SegmentOutOfBounds,
    /// Segment reaches past the address ceiling
    SegmentAboveLimit,
    /// No loadable segments, or an empty or out of range span
    InvalidMappings,
    /// Entry point outside the loaded span
    EntryOutsideImage,
    /// Symbol table extends beyond file
    SymbolTableOutOfBounds,
    /// Unexpected symbol entry size
    InvalidSymbolSize,
    /// Symbol name offset past the string table
    InvalidSymbolName,
    /// Symbol value outside the loaded span
    SymbolOutsideImage,
}

impl fmt::Display for ElfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::TooSmall => "file is too small",
            Self::InvalidMagic => "bad magic",
            Self::InvalidClass => "not a 64-bit image",
            Self::InvalidEncoding => "not little endian",
            Self::InvalidVersion => "unknown ELF version",
            Self::InvalidType => "not an executable",
            Self::InvalidMachine => "not an x86_64 image",
            Self::InvalidEhsize => "ELF header is too small",
            Self::InvalidShentsize => "unexpected section header size",
            Self::InvalidPhentsize => "unexpected program header size",
            Self::InvalidShstrndx => "string section index overflows section count",
            Self::SectionTableOutOfBounds => "section table exceeds file contents",
            Self::ProgramTableOutOfBounds => "program header table exceeds file contents",
            Self::NotStringTable => "string section has wrong type",
            Self::StringTableOutOfBounds => "string table exceeds file contents",
            Self::StringTableEmpty => "string table is empty",
            Self::StringTableNotTerminated => "string table is not NUL-terminated",
            Self::InvalidSectionName => "section name exceeds string table",
            Self::SegmentOutOfBounds => "segment contents exceed file size",
            Self::SegmentAboveLimit => "segment exceeds user memory",
            Self::InvalidMappings => "invalid memory mappings",
            Self::EntryOutsideImage => "entry point is outside program data",
            Self::SymbolTableOutOfBounds => "symbol table exceeds file contents",
            Self::InvalidSymbolSize => "unexpected symbol size",
            Self::InvalidSymbolName => "symbol name exceeds string table",
            Self::SymbolOutsideImage => "symbol value points outside program image",
        };
        f.write_str(reason)
    }
}

/// NUL-terminated string table inside an image.
#[derive(Debug, Clone, Copy)]
pub struct StringTable<'a> {
    bytes: &'a [u8],
}

impl<'a> StringTable<'a> {
    /// Validate the byte range of `section` and wrap it.
    ///
    /// The range must lie within `binary`, be non-empty and end in NUL.
    pub fn from_section(binary: &'a [u8], section: &Elf64SectionHeader) -> Result<Self, ElfError> {
        let range = range_within(section.sh_offset, section.sh_size, binary.len())
            .ok_or(ElfError::StringTableOutOfBounds)?;
        let bytes = &binary[range];

        match bytes.last() {
            None => Err(ElfError::StringTableEmpty),
            Some(0) => Ok(Self { bytes }),
            Some(_) => Err(ElfError::StringTableNotTerminated),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// String starting at `offset`, without its terminator.
    pub fn get(&self, offset: u32) -> Option<&'a [u8]> {
        let rest = self.bytes.get(offset as usize..)?;
        let len = rest.iter().position(|&b| b == 0)?;
        Some(&rest[..len])
    }
}

/// A validated ELF64 image.
#[derive(Debug, Clone, Copy)]
pub struct ElfFile<'a> {
    binary: &'a [u8],
    header: Elf64Header,
    shstrtab: StringTable<'a>,
}

impl<'a> ElfFile<'a> {
    /// Parse and validate the headers of `binary`.
    ///
    /// Checks run in a fixed order and stop at the first failure. Nothing
    /// is loaded.
    pub fn parse(binary: &'a [u8]) -> Result<Self, ElfError> {
        let header: Elf64Header = read(binary, 0).ok_or(ElfError::TooSmall)?;
        Self::validate_header(&header)?;

        let shnum = header.e_shnum as u64;
        let shentsize = size_of::<Elf64SectionHeader>() as u64;
        if header.e_shstrndx >= header.e_shnum {
            return Err(ElfError::InvalidShstrndx);
        }
        range_within(header.e_shoff, shnum * shentsize, binary.len())
            .ok_or(ElfError::SectionTableOutOfBounds)?;

        let phnum = header.e_phnum as u64;
        let phentsize = size_of::<Elf64ProgramHeader>() as u64;
        range_within(header.e_phoff, phnum * phentsize, binary.len())
            .ok_or(ElfError::ProgramTableOutOfBounds)?;

        let names = Self::section_at(binary, &header, header.e_shstrndx as usize)
            .ok_or(ElfError::SectionTableOutOfBounds)?;
        if names.sh_type != SHT_STRTAB {
            return Err(ElfError::NotStringTable);
        }
        let shstrtab = StringTable::from_section(binary, &names)?;

        Ok(Self {
            binary,
            header,
            shstrtab,
        })
    }

    fn validate_header(header: &Elf64Header) -> Result<(), ElfError> {
        if header.e_ident[0..4] != ELF_MAGIC {
            return Err(ElfError::InvalidMagic);
        }
        if header.e_ident[4] != ELFCLASS64 {
            return Err(ElfError::InvalidClass);
        }
        if header.e_ident[5] != ELFDATA2LSB {
            return Err(ElfError::InvalidEncoding);
        }
        if header.e_ident[6] != EV_CURRENT {
            return Err(ElfError::InvalidVersion);
        }
        if header.e_type != ET_EXEC {
            return Err(ElfError::InvalidType);
        }
        if header.e_machine != EM_X86_64 {
            return Err(ElfError::InvalidMachine);
        }
        if (header.e_ehsize as usize) < size_of::<Elf64Header>() {
            return Err(ElfError::InvalidEhsize);
        }
        if header.e_shentsize as usize != size_of::<Elf64SectionHeader>() {
            return Err(ElfError::InvalidShentsize);
        }
        if header.e_phentsize as usize != size_of::<Elf64ProgramHeader>() {
            return Err(ElfError::InvalidPhentsize);
        }
        Ok(())
    }

    fn section_at(binary: &[u8], header: &Elf64Header, index: usize) -> Option<Elf64SectionHeader> {
        let offset = (header.e_shoff as usize)
            .checked_add(index.checked_mul(size_of::<Elf64SectionHeader>())?)?;
        read(binary, offset)
    }

    pub fn binary(&self) -> &'a [u8] {
        self.binary
    }

    pub fn header(&self) -> &Elf64Header {
        &self.header
    }

    pub fn entry(&self) -> u64 {
        self.header.e_entry
    }

    /// Section name string table.
    pub fn section_names(&self) -> StringTable<'a> {
        self.shstrtab
    }

    /// Section header `index`, if it exists.
    pub fn section(&self, index: usize) -> Option<Elf64SectionHeader> {
        if index >= self.header.e_shnum as usize {
            return None;
        }
        Self::section_at(self.binary, &self.header, index)
    }

    pub fn sections(&self) -> impl Iterator<Item = Elf64SectionHeader> + '_ {
        (0..self.header.e_shnum as usize).filter_map(move |i| self.section(i))
    }

    pub fn program_headers(&self) -> impl Iterator<Item = Elf64ProgramHeader> + '_ {
        let phoff = self.header.e_phoff as usize;
        (0..self.header.e_phnum as usize).filter_map(move |i| {
            read(self.binary, phoff + i * size_of::<Elf64ProgramHeader>())
        })
    }

    /// Name of `section`.
    ///
    /// Fails if the name offset does not point into the section name table.
    pub fn section_name(&self, section: &Elf64SectionHeader) -> Result<&'a [u8], ElfError> {
        self.shstrtab
            .get(section.sh_name)
            .ok_or(ElfError::InvalidSectionName)
    }

    /// The `.strtab` string table, if the image has one.
    ///
    /// Sections are scanned in order; a section whose name is out of range
    /// ends the scan with an error even if `.strtab` comes later.
    pub fn symbol_names(&self) -> Result<Option<StringTable<'a>>, ElfError> {
        for section in self.sections() {
            let name = self.section_name(&section)?;
            if section.sh_type == SHT_STRTAB && name == b".strtab" {
                return StringTable::from_section(self.binary, &section).map(Some);
            }
        }
        Ok(None)
    }

    /// Section headers of type `SHT_SYMTAB`.
    pub fn symbol_tables(&self) -> impl Iterator<Item = Elf64SectionHeader> + '_ {
        self.sections().filter(|sh| sh.sh_type == SHT_SYMTAB)
    }

    /// Entries of the symbol table `section`, after checking its bounds and
    /// entry size.
    pub fn symbols(&self, section: &Elf64SectionHeader) -> Result<Symbols<'a>, ElfError> {
        let range = range_within(section.sh_offset, section.sh_size, self.binary.len())
            .ok_or(ElfError::SymbolTableOutOfBounds)?;

        let entsize = size_of::<Elf64Symbol>() as u64;
        if section.sh_entsize != entsize || section.sh_size % entsize != 0 {
            return Err(ElfError::InvalidSymbolSize);
        }

        Ok(Symbols {
            bytes: &self.binary[range],
            offset: 0,
        })
    }
}

/// Iterator over the entries of one symbol table.
#[derive(Debug, Clone)]
pub struct Symbols<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl Iterator for Symbols<'_> {
    type Item = Elf64Symbol;

    fn next(&mut self) -> Option<Elf64Symbol> {
        let symbol = read(self.bytes, self.offset)?;
        self.offset += size_of::<Elf64Symbol>();
        Some(symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_sizes() {
        assert_eq!(size_of::<Elf64Header>(), 64);
        assert_eq!(size_of::<Elf64ProgramHeader>(), 56);
        assert_eq!(size_of::<Elf64SectionHeader>(), 64);
        assert_eq!(size_of::<Elf64Symbol>(), 24);
    }

    #[test]
    fn test_range_within() {
        assert_eq!(range_within(0, 4, 4), Some(0..4));
        assert_eq!(range_within(4, 0, 4), Some(4..4));
        assert_eq!(range_within(1, 4, 4), None);
        assert_eq!(range_within(u64::MAX, 2, 4), None);
    }

    #[test]
    fn test_string_table_lookup() {
        let table = StringTable {
            bytes: b"\0.text\0.strtab\0",
        };
        assert_eq!(table.get(0), Some(&b""[..]));
        assert_eq!(table.get(1), Some(&b".text"[..]));
        assert_eq!(table.get(7), Some(&b".strtab"[..]));
        assert_eq!(table.get(100), None);
    }

    #[test]
    fn test_symbol_info_fields() {
        let symbol = Elf64Symbol {
            st_name: 0,
            st_info: (STB_GLOBAL << 4) | STT_OBJECT,
            st_other: 0x4 | STV_DEFAULT,
            st_shndx: 1,
            st_value: 0,
            st_size: 8,
        };
        assert_eq!(symbol.binding(), STB_GLOBAL);
        assert_eq!(symbol.kind(), STT_OBJECT);
        assert_eq!(symbol.visibility(), STV_DEFAULT);
    }

    #[test]
    fn test_truncated_header_rejected() {
        assert_eq!(ElfFile::parse(&[0x7F, b'E', b'L', b'F']).err(), Some(ElfError::TooSmall));
    }
}
