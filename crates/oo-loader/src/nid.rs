//! NID symbol name codec
//!
//! Orbis dynamic symbols are exported under short NIDs instead of their
//! textual names: an 11-character base-64 hash of the symbol name followed
//! by `#`-separated module and library ids, e.g. `fJnpuVVBbKk#L#M`. The
//! codec detects that shape, decodes the ids against the owning module's
//! import tables, and rebuilds the full `symbol#module#library` name used
//! as the key of the global symbol table.

use crate::module::LoadedModule;
use crate::nid_table::NidTable;
use oo_core::error::NidError;

/// Check whether a symbol name is NID-encoded
///
/// Encoded names are exactly 15 bytes with `#` separators at positions 11
/// and 13.
pub fn is_encoded_symbol(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() == 15 && bytes[11] == b'#' && bytes[13] == b'#'
}

fn char_index(c: u8) -> Option<u64> {
    match c {
        b'A'..=b'Z' => Some((c - b'A') as u64),
        b'a'..=b'z' => Some((c - b'a') as u64 + 26),
        b'0'..=b'9' => Some((c - b'0') as u64 + 52),
        b'+' => Some(62),
        b'-' => Some(63),
        _ => None,
    }
}

/// Decode a base-64 NID fragment into a 64-bit value
///
/// Each character contributes six bits except the eleventh, which carries
/// only the top four bits of its sextet (ten sextets plus four bits fill
/// the 64-bit hash exactly). Module and library ids are shorter and use
/// plain six-bit accumulation.
pub fn decode_value(encoded: &str) -> Result<u64, NidError> {
    let bytes = encoded.as_bytes();
    if bytes.is_empty() || bytes.len() > 11 {
        return Err(NidError::InvalidEncodedValue(encoded.to_string()));
    }

    let mut value = 0u64;
    for (i, &c) in bytes.iter().enumerate() {
        let index =
            char_index(c).ok_or_else(|| NidError::InvalidEncodedValue(encoded.to_string()))?;
        if i == 10 {
            value = (value << 4) | (index >> 2);
        } else {
            value = (value << 6) | index;
        }
    }
    Ok(value)
}

/// A reconstructed `symbol#module#library` name
///
/// One allocation; the part accessors slice into it.
#[derive(Debug, Clone)]
pub struct FullNid {
    full: String,
    symbol_len: usize,
    module_len: usize,
}

impl FullNid {
    pub fn full_name(&self) -> &str {
        &self.full
    }

    pub fn symbol(&self) -> &str {
        &self.full[..self.symbol_len]
    }

    pub fn module(&self) -> &str {
        &self.full[self.symbol_len + 1..self.symbol_len + 1 + self.module_len]
    }

    pub fn library(&self) -> &str {
        &self.full[self.symbol_len + self.module_len + 2..]
    }

    pub fn into_full_name(self) -> String {
        self.full
    }
}

/// Expand an encoded symbol name against a module's import tables
///
/// The hash resolves through the NID table and the ids through the module's
/// import maps; each part falls back to its raw encoded form when the
/// lookup misses.
pub fn reconstruct_full_nid(
    module: &LoadedModule,
    table: &NidTable,
    encoded: &str,
) -> Result<FullNid, NidError> {
    let parts: Vec<&str> = encoded.split('#').collect();
    if parts.len() != 3 {
        return Err(NidError::InvalidNid(encoded.to_string()));
    }

    let symbol = table.lookup(parts[0]);

    let module_id = (decode_value(parts[1])? & 0xFFFF) as u16;
    let module_name = module.import_module_name(module_id).unwrap_or(parts[1]);

    let library_id = (decode_value(parts[2])? & 0xFFFF) as u16;
    let library_name = module.import_library_name(library_id).unwrap_or(parts[2]);

    Ok(FullNid {
        symbol_len: symbol.len(),
        module_len: module_name.len(),
        full: format!("{symbol}#{module_name}#{library_name}"),
    })
}
