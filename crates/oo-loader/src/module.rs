//! Module loading and the process-wide module registry
//!
//! `ModuleLoader` orchestrates the whole ingest path: fake-SELF
//! reconstruction, OELF parsing, segment mapping into an RWX region at the
//! module's virtual addresses, symbol extraction, and transitive dependency
//! resolution by file name.

use crate::nid;
use crate::nid_table::NidTable;
use crate::oelf::{et, pf, pt, OelfData, ELF_MAGIC, STB_LOCAL};
use crate::self_file::{self, SELF_MAGIC};
use crate::symbols::{HostAddr, SymbolTable};
use oo_core::error::LoaderError;
use oo_memory::{align_down, PageFlags, PageRegion};
use std::collections::{HashMap, HashSet};
use std::ffi::c_void;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// Exit callback handed to guest entry points
pub type ExitFn = unsafe extern "sysv64" fn();

/// Module initialiser (`.init`), System-V x86-64 convention
pub type InitProc = unsafe extern "sysv64" fn(usize, *const *const u8, ExitFn) -> i32;

/// Executable entry point, System-V x86-64 convention
pub type EntryPoint = unsafe extern "sysv64" fn(*mut c_void, ExitFn) -> *mut c_void;

/// A symbol record lifted out of the OELF symbol table
#[derive(Debug, Clone)]
pub struct RawSymbol {
    pub name: String,
    pub is_encoded: bool,
    pub sym_type: u8,
    pub binding: u8,
    pub address: Option<HostAddr>,
}

/// A module materialised in host memory
pub struct LoadedModule {
    /// Stable id from the first export module
    pub id: u16,
    /// File stem the module was loaded under
    pub name: String,
    /// Name declared by the first export module
    pub export_name: String,
    /// Needed file names, in declaration order
    pub dependencies: Vec<String>,
    /// RWX region holding the mapped segments; absent only while the
    /// registry slot is being populated
    pub data: Option<PageRegion>,
    pub code_section: Range<usize>,
    pub data_section: Range<usize>,
    pub relro_section: Range<usize>,
    pub init_proc: Option<HostAddr>,
    pub entry_point: Option<HostAddr>,
    pub proc_param: Option<HostAddr>,
    pub raw_symbols: Vec<RawSymbol>,
    /// STB_LOCAL symbols with addresses
    pub local_symbols: HashMap<String, HostAddr>,
    pub module_id_to_name: HashMap<u16, String>,
    pub library_id_to_name: HashMap<u16, String>,
    pub is_lib: bool,
}

impl LoadedModule {
    pub fn new(name: &str) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            export_name: String::new(),
            dependencies: Vec::new(),
            data: None,
            code_section: 0..0,
            data_section: 0..0,
            relro_section: 0..0,
            init_proc: None,
            entry_point: None,
            proc_param: None,
            raw_symbols: Vec::new(),
            local_symbols: HashMap::new(),
            module_id_to_name: HashMap::new(),
            library_id_to_name: HashMap::new(),
            is_lib: false,
        }
    }

    pub fn import_module_name(&self, id: u16) -> Option<&str> {
        self.module_id_to_name.get(&id).map(String::as_str)
    }

    pub fn import_library_name(&self, id: u16) -> Option<&str> {
        self.library_id_to_name.get(&id).map(String::as_str)
    }

    fn section(&self, range: &Range<usize>) -> &[u8] {
        match &self.data {
            Some(region) => &region.as_slice()[range.clone()],
            None => &[],
        }
    }

    pub fn code(&self) -> &[u8] {
        self.section(&self.code_section)
    }

    pub fn data_bytes(&self) -> &[u8] {
        self.section(&self.data_section)
    }

    pub fn relro(&self) -> &[u8] {
        self.section(&self.relro_section)
    }

    /// The `.init` entry as a callable function pointer
    pub fn init_proc_fn(&self) -> Option<InitProc> {
        self.init_proc
            .map(|addr| unsafe { std::mem::transmute::<*const u8, InitProc>(addr.as_ptr()) })
    }

    /// The executable entry as a callable function pointer
    pub fn entry_point_fn(&self) -> Option<EntryPoint> {
        self.entry_point
            .map(|addr| unsafe { std::mem::transmute::<*const u8, EntryPoint>(addr.as_ptr()) })
    }
}

/// Loader runtime: registry, lookup maps, and search paths
pub struct ModuleLoader {
    modules: Vec<LoadedModule>,
    name_to_index: HashMap<String, usize>,
    nids: NidTable,
    eboot_dir: PathBuf,
    system_dir: PathBuf,
}

fn file_stem(path: &Path) -> &str {
    path.file_stem().and_then(|s| s.to_str()).unwrap_or("")
}

impl ModuleLoader {
    /// Create a loader rooted at the eboot's directory and the firmware
    /// system directory
    pub fn new(
        eboot_dir: impl Into<PathBuf>,
        system_dir: impl Into<PathBuf>,
        nids: NidTable,
    ) -> Self {
        Self {
            modules: Vec::new(),
            name_to_index: HashMap::new(),
            nids,
            eboot_dir: eboot_dir.into(),
            system_dir: system_dir.into(),
        }
    }

    /// Loaded modules in load order; the root executable is index 0
    pub fn modules(&self) -> &[LoadedModule] {
        &self.modules
    }

    pub fn module(&self, index: usize) -> &LoadedModule {
        &self.modules[index]
    }

    pub fn find_module(&self, name: &str) -> Option<&LoadedModule> {
        self.name_to_index.get(name).map(|&i| &self.modules[i])
    }

    pub fn module_names(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.name.as_str()).collect()
    }

    pub fn nid_table(&self) -> &NidTable {
        &self.nids
    }

    /// Load a fake SELF or bare OELF file into the registry
    ///
    /// Idempotent per file stem: a module that is already present is
    /// returned as-is, which also breaks dependency cycles.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<usize, LoaderError> {
        let path = path.as_ref();
        let stem = file_stem(path).to_string();

        if let Some(&index) = self.name_to_index.get(&stem) {
            debug!("Module {} already loaded", stem);
            return Ok(index);
        }

        let mut file = File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                error!(
                    "Missing module file {}; please make sure you have the PS4 firmware \
                     system directory inside the directory with the executable",
                    path.display()
                );
            }
            LoaderError::FileOpen {
                path: path.to_path_buf(),
                source: e,
            }
        })?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;

        let oelf_bytes = if magic == SELF_MAGIC {
            file.seek(SeekFrom::Start(0))?;
            self_file::reconstruct_oelf(&mut file)?
        } else if magic == ELF_MAGIC {
            file.seek(SeekFrom::Start(0))?;
            let mut buf = Vec::new();
            file.read_to_end(&mut buf)?;
            buf
        } else {
            return Err(LoaderError::InvalidSelfOrOElf);
        };

        let parsed = OelfData::parse(oelf_bytes)?;
        if parsed.mapped_size == 0 {
            return Err(LoaderError::NothingToLoad);
        }
        if parsed.export_modules.is_empty() {
            return Err(LoaderError::NoModuleInfo);
        }

        // The slot goes in before population so dependency cycles see the
        // module as already loaded
        let index = self.modules.len();
        self.modules.push(LoadedModule::new(&stem));
        self.name_to_index.insert(stem, index);

        Self::populate(&mut self.modules[index], &parsed)?;

        let module = &self.modules[index];
        info!(
            "Loaded module {} (id {:#x}, export {}, {} symbols, {} dependencies, {:#x} bytes mapped)",
            module.name,
            module.id,
            module.export_name,
            module.raw_symbols.len(),
            module.dependencies.len(),
            parsed.mapped_size
        );

        Ok(index)
    }

    fn populate(module: &mut LoadedModule, parsed: &OelfData) -> Result<(), LoaderError> {
        let first_export = &parsed.export_modules[0];
        module.id = first_export.id;
        module.export_name = first_export.name.clone();
        module.dependencies = parsed.needed_files.clone();
        module.is_lib = parsed.header.e_type == et::SCE_DYNAMIC;

        let mapped = parsed.mapped_size as usize;
        let mut region = PageRegion::alloc(mapped, PageFlags::RWX)?;

        // Map segments: one code, one data, one relro
        let mut code: Option<Range<usize>> = None;
        let mut data_sec: Option<Range<usize>> = None;
        let mut relro: Option<Range<usize>> = None;

        for ph in &parsed.phdrs {
            // Executable wins over the relro type, which wins over plain
            // readable load segments
            let (slot, dup) = match ph.p_type {
                _ if ph.p_flags & pf::X != 0 => (&mut code, LoaderError::MoreThanOneCodeSection),
                pt::SCE_RELRO => (&mut relro, LoaderError::MoreThanOneRelroSection),
                pt::LOAD if ph.p_flags & pf::R != 0 => {
                    (&mut data_sec, LoaderError::MoreThanOneDataSection)
                }
                _ => continue,
            };
            if slot.is_some() {
                return Err(dup);
            }

            let start = align_down(ph.p_vaddr, ph.p_align.max(1)) as usize;
            let end = start + ph.p_memsz as usize;
            if end > mapped {
                return Err(LoaderError::InvalidOElf(format!(
                    "segment at {:#x}..{:#x} outside the mapped size {:#x}",
                    start, end, mapped
                )));
            }

            let filesz = ph.p_filesz as usize;
            let src_start = ph.p_offset as usize;
            let src_end = src_start + filesz;
            if src_end > parsed.bytes().len() {
                return Err(LoaderError::InvalidOElf(format!(
                    "segment file bytes {:#x}..{:#x} outside the image",
                    src_start, src_end
                )));
            }

            // Bytes past p_filesz stay zero from the allocator
            region.as_mut_slice()[start..start + filesz]
                .copy_from_slice(&parsed.bytes()[src_start..src_end]);
            *slot = Some(start..end);

            debug!(
                "Mapped segment type={:#x} flags={:#x} at {:#x}..{:#x} ({:#x} file bytes)",
                ph.p_type, ph.p_flags, start, end, filesz
            );
        }

        module.code_section = code.ok_or(LoaderError::NotAllSectionsArePresent)?;
        module.data_section = data_sec.ok_or(LoaderError::NotAllSectionsArePresent)?;
        module.relro_section = relro.ok_or(LoaderError::NotAllSectionsArePresent)?;

        let addr_for = |offset: u64| -> Result<HostAddr, LoaderError> {
            if offset as usize >= mapped {
                return Err(LoaderError::InvalidOElf(format!(
                    "address offset {:#x} outside the mapped size {:#x}",
                    offset, mapped
                )));
            }
            Ok(HostAddr::new(region.addr_at(offset as usize)))
        };

        if let Some(offset) = parsed.init_proc_offset.filter(|&o| o != 0) {
            module.init_proc = Some(addr_for(offset)?);
        }
        if let Some(offset) = parsed.proc_param_offset.filter(|&o| o != 0) {
            module.proc_param = Some(addr_for(offset)?);
        }
        if parsed.header.e_entry != 0 {
            module.entry_point = Some(addr_for(parsed.header.e_entry)?);
        }

        for sym in parsed.symbols() {
            let name = parsed.string_from_table(sym.st_name as u64)?.to_string();
            let address = if sym.st_value != 0 {
                Some(addr_for(sym.st_value)?)
            } else {
                None
            };
            let raw = RawSymbol {
                is_encoded: nid::is_encoded_symbol(&name),
                sym_type: sym.sym_type(),
                binding: sym.binding(),
                name,
                address,
            };
            if raw.binding == STB_LOCAL && !raw.name.is_empty() {
                if let Some(addr) = raw.address {
                    module.local_symbols.insert(raw.name.clone(), addr);
                }
            }
            module.raw_symbols.push(raw);
        }

        for import in &parsed.import_modules {
            if import.id == 0 {
                return Err(LoaderError::ImportModuleIdNotDefined);
            }
            module
                .module_id_to_name
                .insert(import.id, import.name.clone());
        }
        for import in &parsed.import_libraries {
            module
                .library_id_to_name
                .insert(import.id, import.name.clone());
        }

        module.data = Some(region);
        Ok(())
    }

    /// Resolve the transitive dependency closure of the root module
    ///
    /// Visits each dependency name at most once; cycles are cut by the
    /// already-loaded short-circuit in `load_file`.
    pub fn load_all_dependencies(&mut self) -> Result<(), LoaderError> {
        let Some(root) = self.modules.first() else {
            return Ok(());
        };

        let mut pending: Vec<String> = root.dependencies.clone();
        let mut visited: HashSet<String> = HashSet::new();

        while let Some(name) = pending.pop() {
            if !visited.insert(name.clone()) {
                continue;
            }
            let path = self.search_for_module_file(&name);
            let index = self.load_file(&path)?;
            pending.extend(self.modules[index].dependencies.iter().cloned());
        }

        info!(
            "Dependency closure complete: {} modules loaded",
            self.modules.len()
        );
        Ok(())
    }

    /// Find a dependency on disk by file stem
    ///
    /// Probes the game's bundled modules first, then the firmware library
    /// directories. Extensions are ignored so `libfoo.prx` matches
    /// `libfoo.sprx`. Returns the name unchanged on a total miss; the
    /// subsequent open reports the missing file.
    pub fn search_for_module_file(&self, name: &str) -> PathBuf {
        let stem = file_stem(Path::new(name));
        let dirs = [
            self.eboot_dir.join("sce_module"),
            self.system_dir.join("system/common/lib"),
            self.system_dir.join("system/priv/lib"),
        ];

        for dir in &dirs {
            let Ok(entries) = std::fs::read_dir(dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let file_name = entry.file_name();
                if file_stem(Path::new(&file_name)) == stem {
                    return entry.path();
                }
            }
        }

        PathBuf::from(name)
    }

    /// Apply RELA/JMPREL fix-ups against the published symbol table
    ///
    /// Cross-module relocation is not implemented yet; the pass succeeds
    /// without touching the mapped regions.
    pub fn link_modules(&mut self, symbols: &SymbolTable) -> Result<(), LoaderError> {
        debug!(
            "Linking {} modules against {} published symbols",
            self.modules.len(),
            symbols.symbol_count()
        );
        Ok(())
    }
}
