//! Fake SELF container parsing
//!
//! Retail SELFs are encrypted and compressed; the loader only accepts the
//! "fake" variant produced by decryption tools, where every segment is
//! stored in the clear. Reconstruction copies each blocked segment back to
//! its original offset inside the embedded OELF, yielding the plain ELF
//! image the parser works on.

use crate::oelf::ELF_MAGIC;
use crate::stream::OffsetStream;
use oo_core::error::LoaderError;
use std::io::{Read, Seek, SeekFrom};
use tracing::{debug, info};

/// Fake SELF magic
pub const SELF_MAGIC: [u8; 4] = [0x4F, 0x15, 0x3D, 0x1D];

/// Program type of a fake (pre-decrypted) SELF
const KEY_TYPE_FAKE: u32 = 0x1;

/// Entry carries segment data for the program header in its props
const PROPS_HAS_BLOCKS: u64 = 0x800;

/// First 8 bytes of every SELF
#[derive(Debug, Clone, Copy)]
pub struct SelfCommonHeader {
    pub magic: [u8; 4],
    pub version: u8,
    pub mode: u8,
    pub endian: u8,
    pub attribs: u8,
}

/// Extended header following the common header
#[derive(Debug, Clone, Copy)]
pub struct SelfExtendedHeader {
    pub key_type: u32,
    pub header_size: u16,
    pub meta_size: u16,
    pub file_size: u64,
    pub num_entries: u16,
    pub flags: u16,
}

/// Per-segment entry of the SELF entry table
#[derive(Debug, Clone, Copy)]
pub struct SelfEntry {
    pub props: u64,
    pub offset: u64,
    pub filesz: u64,
    pub memsz: u64,
}

impl SelfEntry {
    /// Whether the entry carries segment bytes (vs. signature/key metadata)
    pub fn has_blocks(&self) -> bool {
        self.props & PROPS_HAS_BLOCKS != 0
    }

    /// Index of the program header this entry's bytes belong to
    pub fn segment_index(&self) -> usize {
        ((self.props >> 20) & 0xFFF) as usize
    }
}

/// Check if a magic prefix identifies a SELF file
pub fn is_self_magic(magic: &[u8; 4]) -> bool {
    *magic == SELF_MAGIC
}

fn read_u16<R: Read>(r: &mut R) -> std::io::Result<u16> {
    let mut b = [0u8; 2];
    r.read_exact(&mut b)?;
    Ok(u16::from_le_bytes(b))
}

fn read_u32<R: Read>(r: &mut R) -> std::io::Result<u32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(u32::from_le_bytes(b))
}

fn read_u64<R: Read>(r: &mut R) -> std::io::Result<u64> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b)?;
    Ok(u64::from_le_bytes(b))
}

/// Reconstruct the embedded OELF from a fake SELF stream
///
/// The stream must be positioned anywhere; reconstruction seeks from the
/// start. Returns the contiguous OELF image truncated to the end of its
/// last segment.
pub fn reconstruct_oelf<S: Read + Seek>(stream: &mut S) -> Result<Vec<u8>, LoaderError> {
    let self_size = stream.seek(SeekFrom::End(0))?;
    stream.seek(SeekFrom::Start(0))?;

    let mut magic = [0u8; 4];
    stream.read_exact(&mut magic)?;
    if !is_self_magic(&magic) {
        return Err(LoaderError::InvalidFakeSelf(format!(
            "bad magic {:02X?}",
            magic
        )));
    }

    let mut rest = [0u8; 4];
    stream.read_exact(&mut rest)?;
    let common = SelfCommonHeader {
        magic,
        version: rest[0],
        mode: rest[1],
        endian: rest[2],
        attribs: rest[3],
    };

    let extended = SelfExtendedHeader {
        key_type: read_u32(stream)?,
        header_size: read_u16(stream)?,
        meta_size: read_u16(stream)?,
        file_size: read_u64(stream)?,
        num_entries: read_u16(stream)?,
        flags: read_u16(stream)?,
    };
    stream.seek(SeekFrom::Current(4))?; // padding

    if extended.key_type != KEY_TYPE_FAKE {
        return Err(LoaderError::InvalidFakeSelf(format!(
            "program type {:#x} is not a fake SELF; only pre-decrypted fake SELFs are supported",
            extended.key_type
        )));
    }

    debug!(
        "Fake SELF: version={} mode={:#x} attribs={:#x} file_size={:#x} entries={}",
        common.version, common.mode, common.attribs, extended.file_size, extended.num_entries
    );

    let mut entries = Vec::with_capacity(extended.num_entries as usize);
    for _ in 0..extended.num_entries {
        entries.push(SelfEntry {
            props: read_u64(stream)?,
            offset: read_u64(stream)?,
            filesz: read_u64(stream)?,
            memsz: read_u64(stream)?,
        });
    }

    let elf_offset = stream.stream_position()?;

    // Size up the embedded ELF through an offset stream rooted at it
    let (elf_size, min_offset, phoff, phentsize, phnum) = {
        let mut elf = OffsetStream::new(&mut *stream, elf_offset);

        let mut ehdr = [0u8; 64];
        elf.seek(SeekFrom::Start(0))?;
        elf.read_exact(&mut ehdr)?;
        if ehdr[0..4] != ELF_MAGIC {
            return Err(LoaderError::InvalidFakeSelf(
                "embedded file is not an ELF".to_string(),
            ));
        }

        let phoff = u64::from_le_bytes(ehdr[0x20..0x28].try_into().unwrap());
        let phentsize = u16::from_le_bytes(ehdr[0x36..0x38].try_into().unwrap()) as u64;
        let phnum = u16::from_le_bytes(ehdr[0x38..0x3A].try_into().unwrap()) as u64;

        let mut elf_size = 0u64;
        let mut min_offset = u64::MAX;
        for i in 0..phnum {
            elf.seek(SeekFrom::Start(phoff + i * phentsize))?;
            let mut phdr = [0u8; 0x38];
            elf.read_exact(&mut phdr)?;
            let p_offset = u64::from_le_bytes(phdr[0x08..0x10].try_into().unwrap());
            let p_filesz = u64::from_le_bytes(phdr[0x20..0x28].try_into().unwrap());

            elf_size = elf_size.max(p_offset + p_filesz);
            if p_offset > 0 {
                min_offset = min_offset.min(p_offset);
            }
        }

        // The verbatim prefix (header + program header table) cannot reach
        // past the end of the container
        min_offset = min_offset
            .min(self_size.max(elf_offset) - elf_offset)
            .min(elf_size);

        (elf_size, min_offset, phoff, phentsize, phnum)
    };

    let mut elf_data = vec![0u8; elf_size as usize];

    stream.seek(SeekFrom::Start(elf_offset))?;
    stream.read_exact(&mut elf_data[..min_offset as usize])?;

    for entry in entries.iter().filter(|e| e.has_blocks()) {
        let index = entry.segment_index() as u64;
        if index >= phnum {
            return Err(LoaderError::InvalidFakeSelf(format!(
                "entry references program header {} of {}",
                index, phnum
            )));
        }

        let ph_pos = (phoff + index * phentsize) as usize;
        if ph_pos + 0x10 > elf_data.len() {
            return Err(LoaderError::InvalidFakeSelf(
                "program header table outside reconstructed image".to_string(),
            ));
        }
        let p_offset =
            u64::from_le_bytes(elf_data[ph_pos + 0x08..ph_pos + 0x10].try_into().unwrap());

        let dest_end = p_offset + entry.filesz;
        if dest_end > elf_size {
            return Err(LoaderError::InvalidFakeSelf(format!(
                "segment {} overflows reconstructed image ({:#x} > {:#x})",
                index, dest_end, elf_size
            )));
        }

        stream.seek(SeekFrom::Start(entry.offset))?;
        stream.read_exact(&mut elf_data[p_offset as usize..dest_end as usize])?;
    }

    info!(
        "Reconstructed {:#x}-byte OELF from fake SELF ({} entries)",
        elf_size,
        entries.len()
    );

    Ok(elf_data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn put_u16(buf: &mut [u8], off: usize, v: u16) {
        buf[off..off + 2].copy_from_slice(&v.to_le_bytes());
    }

    fn put_u32(buf: &mut [u8], off: usize, v: u32) {
        buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
    }

    fn put_u64(buf: &mut [u8], off: usize, v: u64) {
        buf[off..off + 8].copy_from_slice(&v.to_le_bytes());
    }

    /// Fake SELF with three entries, two of them blocked, wrapping an ELF
    /// with two program headers whose data lives at 0x200 / 0x300 in the
    /// container.
    fn build_fake_self() -> Vec<u8> {
        let mut buf = vec![0u8; 0x380];

        buf[0..4].copy_from_slice(&SELF_MAGIC);
        buf[4] = 0; // version
        buf[5] = 1; // mode
        buf[6] = 1; // endian
        buf[7] = 0x12; // attribs

        put_u32(&mut buf, 0x08, 0x1); // key_type: fake
        put_u16(&mut buf, 0x0C, 0x20); // header_size
        put_u16(&mut buf, 0x0E, 0); // meta_size
        put_u64(&mut buf, 0x10, 0x380); // file_size
        put_u16(&mut buf, 0x18, 3); // num_entries
        put_u16(&mut buf, 0x1A, 0); // flags

        // Entry table at 0x20, 32 bytes each
        let e = 0x20;
        put_u64(&mut buf, e, 0x0); // metadata entry, ignored

        put_u64(&mut buf, e + 0x20, 0x800); // segment 0
        put_u64(&mut buf, e + 0x28, 0x200);
        put_u64(&mut buf, e + 0x30, 0x40);
        put_u64(&mut buf, e + 0x38, 0x40);

        put_u64(&mut buf, e + 0x40, (1 << 20) | 0x800); // segment 1
        put_u64(&mut buf, e + 0x48, 0x300);
        put_u64(&mut buf, e + 0x50, 0x80);
        put_u64(&mut buf, e + 0x58, 0x80);

        // Embedded ELF header at 0x80 (= elf_offset)
        let elf = 0x80;
        buf[elf..elf + 4].copy_from_slice(&ELF_MAGIC);
        buf[elf + 4] = 2; // 64-bit
        buf[elf + 5] = 1; // little-endian
        put_u64(&mut buf, elf + 0x20, 0x40); // e_phoff
        put_u16(&mut buf, elf + 0x36, 0x38); // e_phentsize
        put_u16(&mut buf, elf + 0x38, 2); // e_phnum

        // Program headers inside the ELF region
        let ph0 = elf + 0x40;
        put_u32(&mut buf, ph0, 1); // PT_LOAD
        put_u64(&mut buf, ph0 + 0x08, 0x100); // p_offset
        put_u64(&mut buf, ph0 + 0x20, 0x40); // p_filesz

        let ph1 = ph0 + 0x38;
        put_u32(&mut buf, ph1, 1);
        put_u64(&mut buf, ph1 + 0x08, 0x180);
        put_u64(&mut buf, ph1 + 0x20, 0x80);

        // Segment payloads at their container offsets
        for (i, b) in buf[0x200..0x240].iter_mut().enumerate() {
            *b = 0xA0 | (i as u8 & 0x0F);
        }
        for (i, b) in buf[0x300..0x380].iter_mut().enumerate() {
            *b = 0xB0 | (i as u8 & 0x0F);
        }

        buf
    }

    #[test]
    fn test_self_magic_detection() {
        assert!(is_self_magic(&SELF_MAGIC));
        assert!(!is_self_magic(&ELF_MAGIC));
    }

    #[test]
    fn test_reconstruct_places_blocked_segments() {
        let container = build_fake_self();
        let elf = reconstruct_oelf(&mut Cursor::new(&container)).unwrap();

        // elf_size = max(p_offset + p_filesz) = 0x180 + 0x80
        assert_eq!(elf.len(), 0x200);

        // Verbatim prefix: header + program header table
        assert_eq!(&elf[..0x100], &container[0x80..0x180]);

        // Blocked entries copied to their p_offset destinations
        assert_eq!(&elf[0x100..0x140], &container[0x200..0x240]);
        assert_eq!(&elf[0x180..0x200], &container[0x300..0x380]);
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut container = build_fake_self();
        container[0] = 0xFF;
        assert!(matches!(
            reconstruct_oelf(&mut Cursor::new(&container)),
            Err(LoaderError::InvalidFakeSelf(_))
        ));
    }

    #[test]
    fn test_rejects_non_fake_program_type() {
        let mut container = build_fake_self();
        container[0x08] = 0x2;
        assert!(matches!(
            reconstruct_oelf(&mut Cursor::new(&container)),
            Err(LoaderError::InvalidFakeSelf(_))
        ));
    }

    #[test]
    fn test_rejects_truncated_container() {
        let container = build_fake_self();
        let truncated = &container[..0x250];
        assert!(reconstruct_oelf(&mut Cursor::new(truncated)).is_err());
    }

    #[test]
    fn test_rejects_out_of_range_segment_index() {
        let mut container = build_fake_self();
        // Point the second blocked entry at program header 5 of 2
        put_u64(&mut container, 0x60, (5 << 20) | 0x800);
        assert!(matches!(
            reconstruct_oelf(&mut Cursor::new(&container)),
            Err(LoaderError::InvalidFakeSelf(_))
        ));
    }
}
