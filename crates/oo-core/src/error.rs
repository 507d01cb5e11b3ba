//! Error types for the oxidized-orbis loader

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the loader core
#[derive(Error, Debug)]
pub enum OrbisError {
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Loader error: {0}")]
    Loader(#[from] LoaderError),

    #[error("NID error: {0}")]
    Nid(#[from] NidError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),
}

/// Host memory mapping errors
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Failed to allocate {len} bytes of host memory: {reason}")]
    AllocationFailed { len: usize, reason: String },
}

/// Module loading errors
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("File is neither a fake SELF nor an OELF")]
    InvalidSelfOrOElf,

    #[error("Module has no loadable segments")]
    NothingToLoad,

    #[error("Module carries no export module info")]
    NoModuleInfo,

    #[error("Import module id 0 is not defined")]
    ImportModuleIdNotDefined,

    #[error("Not all of code, data and relro sections are present")]
    NotAllSectionsArePresent,

    #[error("More than one code section")]
    MoreThanOneCodeSection,

    #[error("More than one data section")]
    MoreThanOneDataSection,

    #[error("More than one relro section")]
    MoreThanOneRelroSection,

    #[error("Couldn't find the PT_DYNAMIC segment")]
    CouldntFindDynamic,

    #[error("More than one PT_DYNAMIC segment")]
    MoreThanOneDynamic,

    #[error("Couldn't find the PT_SCE_DYNLIBDATA segment")]
    CouldntFindDynlib,

    #[error("More than one PT_SCE_DYNLIBDATA segment")]
    MoreThanOneDynlib,

    #[error("Couldn't find the DT_SCE_SYMTAB entry")]
    CouldntFindSymTab,

    #[error("More than one DT_SCE_SYMTAB entry")]
    MoreThanOneSymTab,

    #[error("Couldn't find the DT_SCE_SYMTABSZ entry")]
    CouldntFindSymTabSz,

    #[error("More than one DT_SCE_SYMTABSZ entry")]
    MoreThanOneSymTabSz,

    #[error("Couldn't find the DT_SCE_STRTAB entry")]
    CouldntFindStrTab,

    #[error("More than one DT_SCE_STRTAB entry")]
    MoreThanOneStrTab,

    #[error("Couldn't find the DT_SCE_STRSZ entry")]
    CouldntFindStrSz,

    #[error("More than one DT_SCE_STRSZ entry")]
    MoreThanOneStrSz,

    #[error("Couldn't find the DT_SCE_RELA entry")]
    CouldntFindRela,

    #[error("More than one DT_SCE_RELA entry")]
    MoreThanOneRela,

    #[error("Couldn't find the DT_SCE_RELASZ entry")]
    CouldntFindRelaSz,

    #[error("More than one DT_SCE_RELASZ entry")]
    MoreThanOneRelaSz,

    #[error("Couldn't find the DT_SCE_JMPREL entry")]
    CouldntFindJmpRel,

    #[error("More than one DT_SCE_JMPREL entry")]
    MoreThanOneJmpRel,

    #[error("Couldn't find the DT_SCE_PLTRELSZ entry")]
    CouldntFindPltRelaSz,

    #[error("More than one DT_SCE_PLTRELSZ entry")]
    MoreThanOnePltRelaSz,

    #[error("Invalid fake SELF: {0}")]
    InvalidFakeSelf(String),

    #[error("Invalid OELF: {0}")]
    InvalidOElf(String),

    #[error("Couldn't open module file {path:?}: {source}")]
    FileOpen {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("NID error: {0}")]
    Nid(#[from] NidError),
}

/// NID codec errors
#[derive(Error, Debug)]
pub enum NidError {
    #[error("Invalid NID symbol name: {0}")]
    InvalidNid(String),

    #[error("Invalid encoded NID value: {0}")]
    InvalidEncodedValue(String),
}

/// Result type alias for loader operations
pub type Result<T> = std::result::Result<T, OrbisError>;
