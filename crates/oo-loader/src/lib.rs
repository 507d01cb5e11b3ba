//! Module loading for the oxidized-orbis PS4 loader
//!
//! This crate ingests fake SELF / OELF artifacts, maps their segments into
//! executable host memory, decodes NID symbol names, and tracks the loaded
//! module registry and the global symbol table.

pub mod module;
pub mod nid;
pub mod nid_table;
pub mod oelf;
pub mod self_file;
pub mod stream;
pub mod symbols;

pub use module::{EntryPoint, ExitFn, InitProc, LoadedModule, ModuleLoader, RawSymbol};
pub use nid::{decode_value, is_encoded_symbol, reconstruct_full_nid, FullNid};
pub use nid_table::NidTable;
pub use oelf::OelfData;
pub use self_file::reconstruct_oelf;
pub use stream::OffsetStream;
pub use symbols::{HostAddr, SymbolTable};
