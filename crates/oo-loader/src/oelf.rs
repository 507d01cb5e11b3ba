//! OELF (Orbis ELF) parser
//!
//! An OELF is a little-endian Elf64 image extended with Sony program types
//! and dynamic tags. All dynamic tables live inside the PT_SCE_DYNLIBDATA
//! segment and their offsets are relative to it, not to the file.

use oo_core::error::LoaderError;
use oo_memory::checked_align_up;
use std::ops::Range;
use tracing::debug;

/// ELF magic bytes
pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// Sony ELF file types
pub mod et {
    pub const SCE_EXEC: u16 = 0xFE00;
    pub const SCE_DYNEXEC: u16 = 0xFE10;
    pub const SCE_DYNAMIC: u16 = 0xFE18;
}

/// Program header types
pub mod pt {
    pub const LOAD: u32 = 1;
    pub const DYNAMIC: u32 = 2;
    pub const SCE_DYNLIBDATA: u32 = 0x6100_0000;
    pub const SCE_PROCPARAM: u32 = 0x6100_0001;
    pub const SCE_RELRO: u32 = 0x6100_0010;
}

/// Program header flags
pub mod pf {
    pub const X: u32 = 0x1;
    pub const W: u32 = 0x2;
    pub const R: u32 = 0x4;
}

/// Dynamic entry tags
pub mod dt {
    pub const NULL: i64 = 0;
    pub const NEEDED: i64 = 1;
    pub const INIT: i64 = 0x0C;
    pub const SCE_MODULE_INFO: i64 = 0x6100_000D;
    pub const SCE_NEEDED_MODULE: i64 = 0x6100_000F;
    pub const SCE_EXPORT_LIB: i64 = 0x6100_0013;
    pub const SCE_IMPORT_LIB: i64 = 0x6100_0015;
    pub const SCE_JMPREL: i64 = 0x6100_0029;
    pub const SCE_PLTRELSZ: i64 = 0x6100_002D;
    pub const SCE_RELA: i64 = 0x6100_002F;
    pub const SCE_RELASZ: i64 = 0x6100_0031;
    pub const SCE_STRTAB: i64 = 0x6100_0035;
    pub const SCE_STRSZ: i64 = 0x6100_0037;
    pub const SCE_SYMTAB: i64 = 0x6100_0039;
    pub const SCE_SYMTABSZ: i64 = 0x6100_003F;
}

/// Symbol binding
pub const STB_LOCAL: u8 = 0;
pub const STB_GLOBAL: u8 = 1;
pub const STB_WEAK: u8 = 2;

/// Symbol type
pub const STT_NOTYPE: u8 = 0;
pub const STT_OBJECT: u8 = 1;
pub const STT_FUNC: u8 = 2;

/// ELF file header (64-bit)
#[derive(Debug, Clone, Copy, Default)]
pub struct Elf64Header {
    pub e_ident: [u8; 16],
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: u64,
    pub e_phoff: u64,
    pub e_shoff: u64,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

/// ELF program header (64-bit)
#[derive(Debug, Clone, Copy, Default)]
pub struct Elf64Phdr {
    pub p_type: u32,
    pub p_flags: u32,
    pub p_offset: u64,
    pub p_vaddr: u64,
    pub p_paddr: u64,
    pub p_filesz: u64,
    pub p_memsz: u64,
    pub p_align: u64,
}

/// ELF dynamic entry (64-bit)
#[derive(Debug, Clone, Copy)]
pub struct Elf64Dyn {
    pub d_tag: i64,
    pub d_val: u64,
}

/// ELF symbol table entry (64-bit)
#[derive(Debug, Clone, Copy)]
pub struct Elf64Sym {
    pub st_name: u32,
    pub st_info: u8,
    pub st_other: u8,
    pub st_shndx: u16,
    pub st_value: u64,
    pub st_size: u64,
}

impl Elf64Sym {
    pub const SIZE: usize = 24;

    pub fn binding(&self) -> u8 {
        self.st_info >> 4
    }

    pub fn sym_type(&self) -> u8 {
        self.st_info & 0xF
    }
}

/// ELF relocation entry with addend (64-bit)
#[derive(Debug, Clone, Copy)]
pub struct Elf64Rela {
    pub r_offset: u64,
    pub r_info: u64,
    pub r_addend: i64,
}

impl Elf64Rela {
    pub const SIZE: usize = 24;

    pub fn r_type(&self) -> u32 {
        (self.r_info & 0xFFFF_FFFF) as u32
    }

    pub fn r_sym(&self) -> usize {
        (self.r_info >> 32) as usize
    }
}

/// Export/import module reference
///
/// `d_val` packs `{name_offset:u32, version_minor:u8, version_major:u8,
/// id:u16}` from low to high bits.
#[derive(Debug, Clone)]
pub struct ModuleRef {
    pub name: String,
    pub name_offset: u32,
    pub version_minor: u8,
    pub version_major: u8,
    pub id: u16,
}

impl ModuleRef {
    fn unpack(name: String, value: u64) -> Self {
        Self {
            name,
            name_offset: value as u32,
            version_minor: (value >> 32) as u8,
            version_major: (value >> 40) as u8,
            id: (value >> 48) as u16,
        }
    }
}

/// Export/import library reference
///
/// `d_val` packs `{name_offset:u32, version:u16, id:u16}` from low to high
/// bits.
#[derive(Debug, Clone)]
pub struct LibraryRef {
    pub name: String,
    pub name_offset: u32,
    pub version: u16,
    pub id: u16,
}

impl LibraryRef {
    fn unpack(name: String, value: u64) -> Self {
        Self {
            name,
            name_offset: value as u32,
            version: (value >> 32) as u16,
            id: (value >> 48) as u16,
        }
    }
}

fn u16_at(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes(buf[off..off + 2].try_into().unwrap())
}

fn u32_at(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(buf[off..off + 4].try_into().unwrap())
}

fn u64_at(buf: &[u8], off: usize) -> u64 {
    u64::from_le_bytes(buf[off..off + 8].try_into().unwrap())
}

impl Elf64Header {
    const SIZE: usize = 64;

    fn parse(buf: &[u8]) -> Self {
        let mut e_ident = [0u8; 16];
        e_ident.copy_from_slice(&buf[..16]);
        Self {
            e_ident,
            e_type: u16_at(buf, 0x10),
            e_machine: u16_at(buf, 0x12),
            e_version: u32_at(buf, 0x14),
            e_entry: u64_at(buf, 0x18),
            e_phoff: u64_at(buf, 0x20),
            e_shoff: u64_at(buf, 0x28),
            e_flags: u32_at(buf, 0x30),
            e_ehsize: u16_at(buf, 0x34),
            e_phentsize: u16_at(buf, 0x36),
            e_phnum: u16_at(buf, 0x38),
            e_shentsize: u16_at(buf, 0x3A),
            e_shnum: u16_at(buf, 0x3C),
            e_shstrndx: u16_at(buf, 0x3E),
        }
    }
}

impl Elf64Phdr {
    pub const SIZE: usize = 0x38;

    fn parse(buf: &[u8]) -> Self {
        Self {
            p_type: u32_at(buf, 0x00),
            p_flags: u32_at(buf, 0x04),
            p_offset: u64_at(buf, 0x08),
            p_vaddr: u64_at(buf, 0x10),
            p_paddr: u64_at(buf, 0x18),
            p_filesz: u64_at(buf, 0x20),
            p_memsz: u64_at(buf, 0x28),
            p_align: u64_at(buf, 0x30),
        }
    }
}

impl Elf64Sym {
    fn parse(buf: &[u8]) -> Self {
        Self {
            st_name: u32_at(buf, 0x00),
            st_info: buf[0x04],
            st_other: buf[0x05],
            st_shndx: u16_at(buf, 0x06),
            st_value: u64_at(buf, 0x08),
            st_size: u64_at(buf, 0x10),
        }
    }
}

impl Elf64Rela {
    fn parse(buf: &[u8]) -> Self {
        Self {
            r_offset: u64_at(buf, 0x00),
            r_info: u64_at(buf, 0x08),
            r_addend: u64_at(buf, 0x10) as i64,
        }
    }
}

/// Parsed OELF image
///
/// Owns the reconstructed byte buffer; the dynamic tables are byte ranges
/// into it, decoded on demand.
#[derive(Debug)]
pub struct OelfData {
    buf: Vec<u8>,
    pub header: Elf64Header,
    pub phdrs: Vec<Elf64Phdr>,
    pub dynamic: Vec<Elf64Dyn>,
    pub mapped_size: u64,
    pub load_base: u64,
    pub needed_files: Vec<String>,
    pub export_modules: Vec<ModuleRef>,
    pub import_modules: Vec<ModuleRef>,
    pub export_libraries: Vec<LibraryRef>,
    pub import_libraries: Vec<LibraryRef>,
    pub init_proc_offset: Option<u64>,
    pub proc_param_offset: Option<u64>,
    symtab: Range<usize>,
    strtab: Range<usize>,
    rela: Range<usize>,
    jmprel: Range<usize>,
}

fn record_unique(slot: &mut Option<u64>, value: u64, dup: LoaderError) -> Result<(), LoaderError> {
    if slot.replace(value).is_some() {
        Err(dup)
    } else {
        Ok(())
    }
}

fn table_range(
    buf_len: usize,
    base: usize,
    offset: u64,
    size: u64,
    what: &str,
) -> Result<Range<usize>, LoaderError> {
    let start = (base as u64).checked_add(offset);
    let end = start.and_then(|s| s.checked_add(size));
    match (start, end) {
        (Some(start), Some(end)) if end <= buf_len as u64 => Ok(start as usize..end as usize),
        _ => Err(LoaderError::InvalidOElf(format!(
            "{} at {:#x}+{:#x}+{:#x} runs past the end of the image ({:#x} bytes)",
            what, base, offset, size, buf_len
        ))),
    }
}

impl OelfData {
    /// Parse an OELF image, taking ownership of its bytes
    pub fn parse(buf: Vec<u8>) -> Result<Self, LoaderError> {
        if buf.len() < Elf64Header::SIZE {
            return Err(LoaderError::InvalidOElf(format!(
                "file too small for an ELF header: {} bytes",
                buf.len()
            )));
        }
        if buf[0..4] != ELF_MAGIC {
            return Err(LoaderError::InvalidOElf(format!(
                "invalid ELF magic {:02X?}",
                &buf[0..4]
            )));
        }
        if buf[4] != 2 {
            return Err(LoaderError::InvalidOElf(format!(
                "not a 64-bit ELF: class={}",
                buf[4]
            )));
        }
        if buf[5] != 1 {
            return Err(LoaderError::InvalidOElf(format!(
                "not a little-endian ELF: data encoding={}",
                buf[5]
            )));
        }

        let header = Elf64Header::parse(&buf);
        if header.e_machine != 0x3E {
            return Err(LoaderError::InvalidOElf(format!(
                "not an x86-64 ELF: machine={:#x}",
                header.e_machine
            )));
        }

        let phtab_end = header
            .e_phoff
            .checked_add(header.e_phnum as u64 * Elf64Phdr::SIZE as u64)
            .unwrap_or(u64::MAX);
        if phtab_end > buf.len() as u64 {
            return Err(LoaderError::InvalidOElf(format!(
                "program header table ends at {:#x} but the image is {:#x} bytes",
                phtab_end,
                buf.len()
            )));
        }

        let phdrs: Vec<Elf64Phdr> = (0..header.e_phnum as usize)
            .map(|i| {
                let off = header.e_phoff as usize + i * Elf64Phdr::SIZE;
                Elf64Phdr::parse(&buf[off..off + Elf64Phdr::SIZE])
            })
            .collect();

        debug!(
            "OELF: type={:#x} entry={:#x} phnum={}",
            header.e_type,
            header.e_entry,
            phdrs.len()
        );

        // First pass over program headers: loadable span, unique segments
        let mut load_begin: Option<u64> = None;
        let mut load_end: Option<u64> = None;
        let mut dynamic_ph: Option<Elf64Phdr> = None;
        let mut dynlib_ph: Option<Elf64Phdr> = None;
        let mut proc_param_offset = None;

        for ph in &phdrs {
            match ph.p_type {
                pt::LOAD | pt::SCE_RELRO => {
                    let align = ph.p_align.max(1);
                    let end = ph
                        .p_vaddr
                        .checked_add(ph.p_memsz)
                        .and_then(|top| checked_align_up(top, align))
                        .ok_or_else(|| {
                            LoaderError::InvalidOElf(format!(
                                "loadable segment at {:#x}+{:#x} overflows the address space",
                                ph.p_vaddr, ph.p_memsz
                            ))
                        })?;
                    load_begin = Some(load_begin.map_or(ph.p_vaddr, |b: u64| b.min(ph.p_vaddr)));
                    load_end = Some(load_end.map_or(end, |e: u64| e.max(end)));
                }
                pt::DYNAMIC => {
                    if dynamic_ph.replace(*ph).is_some() {
                        return Err(LoaderError::MoreThanOneDynamic);
                    }
                }
                pt::SCE_DYNLIBDATA => {
                    if dynlib_ph.replace(*ph).is_some() {
                        return Err(LoaderError::MoreThanOneDynlib);
                    }
                }
                pt::SCE_PROCPARAM => proc_param_offset = Some(ph.p_vaddr),
                _ => {}
            }
        }

        let dynamic_ph = dynamic_ph.ok_or(LoaderError::CouldntFindDynamic)?;
        let dynlib_ph = dynlib_ph.ok_or(LoaderError::CouldntFindDynlib)?;

        let load_base = load_begin.unwrap_or(0);
        let mapped_size = load_end.unwrap_or(0) - load_base;

        // Decode the dynamic entry array
        let dyn_range = table_range(
            buf.len(),
            0,
            dynamic_ph.p_offset,
            dynamic_ph.p_filesz,
            "dynamic segment",
        )?;
        let mut dynamic = Vec::with_capacity(dyn_range.len() / 16);
        for chunk in buf[dyn_range].chunks_exact(16) {
            let entry = Elf64Dyn {
                d_tag: u64_at(chunk, 0) as i64,
                d_val: u64_at(chunk, 8),
            };
            if entry.d_tag == dt::NULL {
                break;
            }
            dynamic.push(entry);
        }

        // Required unique tags, offsets relative to the dynlib base
        let mut symtab_off = None;
        let mut symtab_sz = None;
        let mut strtab_off = None;
        let mut strtab_sz = None;
        let mut rela_off = None;
        let mut rela_sz = None;
        let mut jmprel_off = None;
        let mut pltrel_sz = None;
        let mut init_proc_offset = None;

        for d in &dynamic {
            match d.d_tag {
                dt::SCE_SYMTAB => {
                    record_unique(&mut symtab_off, d.d_val, LoaderError::MoreThanOneSymTab)?
                }
                dt::SCE_SYMTABSZ => {
                    record_unique(&mut symtab_sz, d.d_val, LoaderError::MoreThanOneSymTabSz)?
                }
                dt::SCE_STRTAB => {
                    record_unique(&mut strtab_off, d.d_val, LoaderError::MoreThanOneStrTab)?
                }
                dt::SCE_STRSZ => {
                    record_unique(&mut strtab_sz, d.d_val, LoaderError::MoreThanOneStrSz)?
                }
                dt::SCE_RELA => record_unique(&mut rela_off, d.d_val, LoaderError::MoreThanOneRela)?,
                dt::SCE_RELASZ => {
                    record_unique(&mut rela_sz, d.d_val, LoaderError::MoreThanOneRelaSz)?
                }
                dt::SCE_JMPREL => {
                    record_unique(&mut jmprel_off, d.d_val, LoaderError::MoreThanOneJmpRel)?
                }
                dt::SCE_PLTRELSZ => {
                    record_unique(&mut pltrel_sz, d.d_val, LoaderError::MoreThanOnePltRelaSz)?
                }
                dt::INIT => init_proc_offset = Some(d.d_val),
                _ => {}
            }
        }

        let dynlib_base = dynlib_ph.p_offset as usize;
        let symtab = table_range(
            buf.len(),
            dynlib_base,
            symtab_off.ok_or(LoaderError::CouldntFindSymTab)?,
            symtab_sz.ok_or(LoaderError::CouldntFindSymTabSz)?,
            "symbol table",
        )?;
        let strtab = table_range(
            buf.len(),
            dynlib_base,
            strtab_off.ok_or(LoaderError::CouldntFindStrTab)?,
            strtab_sz.ok_or(LoaderError::CouldntFindStrSz)?,
            "string table",
        )?;
        let rela = table_range(
            buf.len(),
            dynlib_base,
            rela_off.ok_or(LoaderError::CouldntFindRela)?,
            rela_sz.ok_or(LoaderError::CouldntFindRelaSz)?,
            "rela table",
        )?;
        let jmprel = table_range(
            buf.len(),
            dynlib_base,
            jmprel_off.ok_or(LoaderError::CouldntFindJmpRel)?,
            pltrel_sz.ok_or(LoaderError::CouldntFindPltRelaSz)?,
            "plt rela table",
        )?;

        let mut data = Self {
            buf,
            header,
            phdrs,
            dynamic,
            mapped_size,
            load_base,
            needed_files: Vec::new(),
            export_modules: Vec::new(),
            import_modules: Vec::new(),
            export_libraries: Vec::new(),
            import_libraries: Vec::new(),
            init_proc_offset,
            proc_param_offset,
            symtab,
            strtab,
            rela,
            jmprel,
        };

        // Second pass over dynamic entries: counted lists, now that the
        // string table is addressable
        for i in 0..data.dynamic.len() {
            let d = data.dynamic[i];
            match d.d_tag {
                dt::NEEDED => {
                    let name = data.string_from_table(d.d_val)?.to_string();
                    data.needed_files.push(name);
                }
                dt::SCE_MODULE_INFO => {
                    let name = data.string_from_table(d.d_val & 0xFFFF_FFFF)?.to_string();
                    data.export_modules.push(ModuleRef::unpack(name, d.d_val));
                }
                dt::SCE_NEEDED_MODULE => {
                    let name = data.string_from_table(d.d_val & 0xFFFF_FFFF)?.to_string();
                    data.import_modules.push(ModuleRef::unpack(name, d.d_val));
                }
                dt::SCE_EXPORT_LIB => {
                    let name = data.string_from_table(d.d_val & 0xFFFF_FFFF)?.to_string();
                    data.export_libraries
                        .push(LibraryRef::unpack(name, d.d_val));
                }
                dt::SCE_IMPORT_LIB => {
                    let name = data.string_from_table(d.d_val & 0xFFFF_FFFF)?.to_string();
                    data.import_libraries
                        .push(LibraryRef::unpack(name, d.d_val));
                }
                _ => {}
            }
        }

        debug!(
            "OELF: mapped_size={:#x} symbols={} needed={:?}",
            data.mapped_size,
            data.symbol_count(),
            data.needed_files
        );

        Ok(data)
    }

    /// The owned image bytes
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Read a NUL-terminated string out of the dynamic string table
    pub fn string_from_table(&self, offset: u64) -> Result<&str, LoaderError> {
        let table = &self.buf[self.strtab.clone()];
        let off = offset as usize;
        if off >= table.len() {
            return Err(LoaderError::InvalidOElf(format!(
                "string offset {:#x} outside the string table ({:#x} bytes)",
                off,
                table.len()
            )));
        }
        let rest = &table[off..];
        let nul = rest.iter().position(|&b| b == 0).ok_or_else(|| {
            LoaderError::InvalidOElf(format!("unterminated string at offset {:#x}", off))
        })?;
        std::str::from_utf8(&rest[..nul]).map_err(|_| {
            LoaderError::InvalidOElf(format!("string at offset {:#x} is not UTF-8", off))
        })
    }

    pub fn symbol_count(&self) -> usize {
        self.symtab.len() / Elf64Sym::SIZE
    }

    /// Decoded dynamic symbol records
    pub fn symbols(&self) -> impl Iterator<Item = Elf64Sym> + '_ {
        self.buf[self.symtab.clone()]
            .chunks_exact(Elf64Sym::SIZE)
            .map(Elf64Sym::parse)
    }

    /// Decoded RELA relocation records
    pub fn rela_entries(&self) -> impl Iterator<Item = Elf64Rela> + '_ {
        self.buf[self.rela.clone()]
            .chunks_exact(Elf64Rela::SIZE)
            .map(Elf64Rela::parse)
    }

    /// Decoded PLT (jump slot) relocation records
    pub fn plt_rela_entries(&self) -> impl Iterator<Item = Elf64Rela> + '_ {
        self.buf[self.jmprel.clone()]
            .chunks_exact(Elf64Rela::SIZE)
            .map(Elf64Rela::parse)
    }
}
