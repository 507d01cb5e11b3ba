//! Synthetic OELF / fake SELF image builders shared by the integration tests
#![allow(dead_code)]

use oo_loader::oelf::{dt, et, pf, pt};
use std::collections::HashMap;

pub fn put_u16(buf: &mut [u8], off: usize, v: u16) {
    buf[off..off + 2].copy_from_slice(&v.to_le_bytes());
}

pub fn put_u32(buf: &mut [u8], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

pub fn put_u64(buf: &mut [u8], off: usize, v: u64) {
    buf[off..off + 8].copy_from_slice(&v.to_le_bytes());
}

pub fn get_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes(buf[off..off + 2].try_into().unwrap())
}

pub fn get_u64(buf: &[u8], off: usize) -> u64 {
    u64::from_le_bytes(buf[off..off + 8].try_into().unwrap())
}

pub struct SegmentSpec {
    pub p_type: u32,
    pub flags: u32,
    pub vaddr: u64,
    pub memsz: u64,
    pub align: u64,
    pub content: Vec<u8>,
}

pub struct SymSpec {
    pub name: &'static str,
    pub binding: u8,
    pub sym_type: u8,
    pub value: u64,
}

/// Builds a minimal but structurally valid OELF image. Knobs exist to
/// produce the malformed variants the error-path tests need.
pub struct OelfBuilder {
    pub e_type: u16,
    pub entry: u64,
    pub segments: Vec<SegmentSpec>,
    pub needed: Vec<&'static str>,
    pub export_modules: Vec<(&'static str, u16)>,
    pub import_modules: Vec<(&'static str, u16)>,
    pub export_libraries: Vec<(&'static str, u16)>,
    pub import_libraries: Vec<(&'static str, u16)>,
    pub symbols: Vec<SymSpec>,
    pub init_offset: Option<u64>,
    pub proc_param_vaddr: Option<u64>,
    pub skip_tags: Vec<i64>,
    pub extra_dynamic: Vec<(i64, u64)>,
    pub omit_dynamic: bool,
    pub omit_dynlib: bool,
    pub duplicate_dynamic: bool,
}

impl OelfBuilder {
    /// Three loadable segments (code / relro / data), one export module
    pub fn standard() -> Self {
        Self {
            e_type: et::SCE_EXEC,
            entry: 0,
            segments: vec![
                SegmentSpec {
                    p_type: pt::LOAD,
                    flags: pf::R | pf::X,
                    vaddr: 0,
                    memsz: 0x1000,
                    align: 0x1000,
                    content: vec![0xCC; 16],
                },
                SegmentSpec {
                    p_type: pt::SCE_RELRO,
                    flags: pf::R,
                    vaddr: 0x1000,
                    memsz: 0x1000,
                    align: 0x1000,
                    content: Vec::new(),
                },
                SegmentSpec {
                    p_type: pt::LOAD,
                    flags: pf::R,
                    vaddr: 0x2000,
                    memsz: 0x1000,
                    align: 0x1000,
                    content: b"DATA0000".to_vec(),
                },
            ],
            needed: Vec::new(),
            export_modules: vec![("eboot", 0x64)],
            import_modules: Vec::new(),
            export_libraries: Vec::new(),
            import_libraries: Vec::new(),
            symbols: Vec::new(),
            init_offset: None,
            proc_param_vaddr: None,
            skip_tags: Vec::new(),
            extra_dynamic: Vec::new(),
            omit_dynamic: false,
            omit_dynlib: false,
            duplicate_dynamic: false,
        }
    }

    pub fn build(&self) -> Vec<u8> {
        let mut strtab = vec![0u8];
        let mut interned: HashMap<String, u64> = HashMap::new();
        let mut intern = |strtab: &mut Vec<u8>, name: &str| -> u64 {
            if let Some(&off) = interned.get(name) {
                return off;
            }
            let off = strtab.len() as u64;
            strtab.extend_from_slice(name.as_bytes());
            strtab.push(0);
            interned.insert(name.to_string(), off);
            off
        };

        let pack_module = |off: u64, id: u16| ((id as u64) << 48) | off;
        let pack_library = |off: u64, id: u16| ((id as u64) << 48) | off;

        let mut dynamic: Vec<(i64, u64)> = Vec::new();
        for name in &self.needed {
            let off = intern(&mut strtab, name);
            dynamic.push((dt::NEEDED, off));
        }
        for (name, id) in &self.export_modules {
            let off = intern(&mut strtab, name);
            dynamic.push((dt::SCE_MODULE_INFO, pack_module(off, *id)));
        }
        for (name, id) in &self.import_modules {
            let off = intern(&mut strtab, name);
            dynamic.push((dt::SCE_NEEDED_MODULE, pack_module(off, *id)));
        }
        for (name, id) in &self.export_libraries {
            let off = intern(&mut strtab, name);
            dynamic.push((dt::SCE_EXPORT_LIB, pack_library(off, *id)));
        }
        for (name, id) in &self.import_libraries {
            let off = intern(&mut strtab, name);
            dynamic.push((dt::SCE_IMPORT_LIB, pack_library(off, *id)));
        }
        if let Some(init) = self.init_offset {
            dynamic.push((dt::INIT, init));
        }

        let mut symtab = Vec::new();
        for sym in &self.symbols {
            let name_off = intern(&mut strtab, sym.name) as u32;
            let mut record = [0u8; 24];
            put_u32(&mut record, 0x00, name_off);
            record[0x04] = (sym.binding << 4) | sym.sym_type;
            put_u16(&mut record, 0x06, 1);
            put_u64(&mut record, 0x08, sym.value);
            symtab.extend_from_slice(&record);
        }

        // Dynlib blob: strtab | symtab | (empty rela) | (empty jmprel)
        let symtab_off = strtab.len() as u64;
        let rela_off = symtab_off + symtab.len() as u64;
        let mut blob = strtab.clone();
        blob.extend_from_slice(&symtab);

        let required = [
            (dt::SCE_SYMTAB, symtab_off),
            (dt::SCE_SYMTABSZ, symtab.len() as u64),
            (dt::SCE_STRTAB, 0),
            (dt::SCE_STRSZ, strtab.len() as u64),
            (dt::SCE_RELA, rela_off),
            (dt::SCE_RELASZ, 0),
            (dt::SCE_JMPREL, rela_off),
            (dt::SCE_PLTRELSZ, 0),
        ];
        for (tag, val) in required {
            if !self.skip_tags.contains(&tag) {
                dynamic.push((tag, val));
            }
        }
        dynamic.extend_from_slice(&self.extra_dynamic);
        dynamic.push((dt::NULL, 0));

        let mut dyn_bytes = Vec::with_capacity(dynamic.len() * 16);
        for (tag, val) in &dynamic {
            dyn_bytes.extend_from_slice(&(*tag as u64).to_le_bytes());
            dyn_bytes.extend_from_slice(&val.to_le_bytes());
        }

        // Layout
        let dynamic_count = if self.omit_dynamic {
            0
        } else if self.duplicate_dynamic {
            2
        } else {
            1
        };
        let phnum = self.segments.len()
            + dynamic_count
            + usize::from(!self.omit_dynlib)
            + usize::from(self.proc_param_vaddr.is_some());

        let mut cursor = 0x40 + phnum * 0x38;
        let content_offsets: Vec<usize> = self
            .segments
            .iter()
            .map(|seg| {
                let off = cursor;
                cursor += seg.content.len();
                off
            })
            .collect();
        let dynlib_off = cursor;
        cursor += blob.len();
        let dyn_off = cursor;
        cursor += dyn_bytes.len();

        let mut img = vec![0u8; cursor];

        // ELF header
        img[0..4].copy_from_slice(&[0x7F, b'E', b'L', b'F']);
        img[4] = 2; // 64-bit
        img[5] = 1; // little-endian
        img[6] = 1; // version
        put_u16(&mut img, 0x10, self.e_type);
        put_u16(&mut img, 0x12, 0x3E); // x86-64
        put_u32(&mut img, 0x14, 1);
        put_u64(&mut img, 0x18, self.entry);
        put_u64(&mut img, 0x20, 0x40); // e_phoff
        put_u16(&mut img, 0x34, 64); // e_ehsize
        put_u16(&mut img, 0x36, 0x38); // e_phentsize
        put_u16(&mut img, 0x38, phnum as u16);

        let mut ph = 0x40;
        let mut write_phdr =
            |img: &mut Vec<u8>, p_type: u32, flags: u32, offset: u64, vaddr: u64, filesz: u64, memsz: u64, align: u64| {
                put_u32(img, ph, p_type);
                put_u32(img, ph + 0x04, flags);
                put_u64(img, ph + 0x08, offset);
                put_u64(img, ph + 0x10, vaddr);
                put_u64(img, ph + 0x18, vaddr);
                put_u64(img, ph + 0x20, filesz);
                put_u64(img, ph + 0x28, memsz);
                put_u64(img, ph + 0x30, align);
                ph += 0x38;
            };

        for (seg, &off) in self.segments.iter().zip(&content_offsets) {
            write_phdr(
                &mut img,
                seg.p_type,
                seg.flags,
                off as u64,
                seg.vaddr,
                seg.content.len() as u64,
                seg.memsz,
                seg.align,
            );
        }
        for _ in 0..dynamic_count {
            write_phdr(
                &mut img,
                pt::DYNAMIC,
                pf::R,
                dyn_off as u64,
                0,
                dyn_bytes.len() as u64,
                dyn_bytes.len() as u64,
                8,
            );
        }
        if !self.omit_dynlib {
            write_phdr(
                &mut img,
                pt::SCE_DYNLIBDATA,
                pf::R,
                dynlib_off as u64,
                0,
                blob.len() as u64,
                blob.len() as u64,
                8,
            );
        }
        if let Some(vaddr) = self.proc_param_vaddr {
            write_phdr(&mut img, pt::SCE_PROCPARAM, pf::R, 0, vaddr, 0, 0x40, 8);
        }

        for (seg, &off) in self.segments.iter().zip(&content_offsets) {
            img[off..off + seg.content.len()].copy_from_slice(&seg.content);
        }
        img[dynlib_off..dynlib_off + blob.len()].copy_from_slice(&blob);
        img[dyn_off..dyn_off + dyn_bytes.len()].copy_from_slice(&dyn_bytes);

        img
    }
}

/// Pack an OELF into a fake SELF container: every program header with file
/// bytes becomes a blocked entry whose payload is appended after the
/// embedded image.
pub fn wrap_fake_self(oelf: &[u8]) -> Vec<u8> {
    let phoff = get_u64(oelf, 0x20) as usize;
    let phentsize = get_u16(oelf, 0x36) as usize;
    let phnum = get_u16(oelf, 0x38) as usize;

    let mut segments: Vec<(usize, u64, u64)> = Vec::new();
    for i in 0..phnum {
        let ph = phoff + i * phentsize;
        let p_offset = get_u64(oelf, ph + 0x08);
        let p_filesz = get_u64(oelf, ph + 0x20);
        if p_filesz > 0 {
            segments.push((i, p_offset, p_filesz));
        }
    }

    let header_len = 0x20 + segments.len() * 0x20;
    let elf_offset = header_len as u64;
    let total = header_len + oelf.len() + segments.iter().map(|s| s.2 as usize).sum::<usize>();

    let mut out = vec![0u8; total];
    out[0..4].copy_from_slice(&[0x4F, 0x15, 0x3D, 0x1D]);
    out[4] = 0; // version
    out[5] = 1; // mode
    out[6] = 1; // endian
    out[7] = 0x12; // attribs
    put_u32(&mut out, 0x08, 0x1); // key_type: fake
    put_u16(&mut out, 0x0C, header_len as u16);
    put_u64(&mut out, 0x10, total as u64);
    put_u16(&mut out, 0x18, segments.len() as u16);

    out[elf_offset as usize..elf_offset as usize + oelf.len()].copy_from_slice(oelf);

    let mut payload_cursor = elf_offset as usize + oelf.len();
    for (slot, (index, p_offset, p_filesz)) in segments.iter().enumerate() {
        let e = 0x20 + slot * 0x20;
        put_u64(&mut out, e, ((*index as u64) << 20) | 0x800);
        put_u64(&mut out, e + 0x08, payload_cursor as u64);
        put_u64(&mut out, e + 0x10, *p_filesz);
        put_u64(&mut out, e + 0x18, *p_filesz);

        let src = *p_offset as usize..(*p_offset + *p_filesz) as usize;
        out[payload_cursor..payload_cursor + *p_filesz as usize].copy_from_slice(&oelf[src]);
        payload_cursor += *p_filesz as usize;

        // Zero the segment bytes inside the embedded image so reconstruction
        // really has to come from the entry payloads
        let dst = elf_offset as usize + *p_offset as usize;
        out[dst..dst + *p_filesz as usize].fill(0);
    }

    out
}
