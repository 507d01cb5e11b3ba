//! HLE module registry
//!
//! Declares which firmware modules the host re-implements and, per library,
//! how its symbols arbitrate against the guest's own (LLE) code. The
//! registry is plain data built at startup; the publisher walks it when it
//! fills the global symbol table.

use oo_loader::HostAddr;

/// Whether a module or library prefers host (HLE) or guest (LLE) code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Hle,
    Lle,
}

/// Per-library priority declaration
///
/// Exactly one of the two lists is declared. `Low` names the functions that
/// register before the guest's symbols and lose to them; every other
/// function of the library wins over the guest. `High` is the mirror image.
#[derive(Debug, Clone)]
pub enum Priority {
    Low(Vec<String>),
    High(Vec<String>),
}

/// A host function exported by an HLE library
pub struct HleFunction {
    pub name: String,
    pub entry: HostAddr,
}

/// A library within an HLE module
pub struct HleLibrary {
    pub name: String,
    pub default_mode: Mode,
    pub priority: Priority,
    /// Symbols bound to the guest implementation even when the library
    /// defaults to HLE
    pub lle_symbols: Vec<String>,
    pub functions: Vec<HleFunction>,
}

impl HleLibrary {
    pub fn new(name: &str, default_mode: Mode, priority: Priority) -> Self {
        Self {
            name: name.to_string(),
            default_mode,
            priority,
            lle_symbols: Vec::new(),
            functions: Vec::new(),
        }
    }

    /// Register a host function under its public name
    pub fn register(&mut self, name: &str, entry: *const u8) {
        self.functions.push(HleFunction {
            name: name.to_string(),
            entry: HostAddr::new(entry),
        });
    }
}

/// An HLE module declaration
pub struct HleModule {
    pub name: String,
    pub default_mode: Mode,
    pub libraries: Vec<HleLibrary>,
}

impl HleModule {
    pub fn new(name: &str, default_mode: Mode) -> Self {
        Self {
            name: name.to_string(),
            default_mode,
            libraries: Vec::new(),
        }
    }
}

/// Ordered set of HLE module declarations
#[derive(Default)]
pub struct HleRegistry {
    pub modules: Vec<HleModule>,
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

// ========================================================================
// Built-in stub bodies
//
// The real HLE implementations live outside the loader core; these stubs
// give the built-in declarations callable entries.
// ========================================================================

extern "sysv64" fn sce_kernel_is_neo_mode() -> i32 {
    0
}

extern "sysv64" fn sce_kernel_get_cpumode() -> i32 {
    0
}

extern "sysv64" fn sce_kernel_get_compiled_sdk_version(version: *mut u32) -> i32 {
    if !version.is_null() {
        unsafe { *version = 0 };
    }
    0
}

extern "sysv64" fn sce_kernel_usleep(_microseconds: u32) -> i32 {
    0
}

extern "sysv64" fn sce_gnm_submit_done() -> i32 {
    0
}

extern "sysv64" fn sce_gnm_flush_garlic() {}

extern "sysv64" fn sce_gnm_draw_init_default_hardware_state() -> u32 {
    0
}

extern "sysv64" fn libc_memcpy(dest: *mut u8, src: *const u8, n: usize) -> *mut u8 {
    unsafe { std::ptr::copy_nonoverlapping(src, dest, n) };
    dest
}

extern "sysv64" fn libc_memset(dest: *mut u8, value: i32, n: usize) -> *mut u8 {
    unsafe { std::ptr::write_bytes(dest, value as u8, n) };
    dest
}

impl HleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in module declarations
    pub fn builtin() -> Self {
        let mut registry = Self::new();

        let mut libkernel = HleModule::new("libkernel", Mode::Hle);
        let mut kernel_lib = HleLibrary::new(
            "libkernel",
            Mode::Hle,
            Priority::Low(names(&["sceKernelIsNeoMode", "sceKernelGetCpumode"])),
        );
        kernel_lib.lle_symbols = names(&["__stack_chk_guard", "__stack_chk_fail"]);
        kernel_lib.register("sceKernelIsNeoMode", sce_kernel_is_neo_mode as *const u8);
        kernel_lib.register("sceKernelGetCpumode", sce_kernel_get_cpumode as *const u8);
        kernel_lib.register(
            "sceKernelGetCompiledSdkVersion",
            sce_kernel_get_compiled_sdk_version as *const u8,
        );
        kernel_lib.register("sceKernelUsleep", sce_kernel_usleep as *const u8);
        libkernel.libraries.push(kernel_lib);
        registry.register_module(libkernel);

        let mut gnm = HleModule::new("libSceGnmDriver", Mode::Hle);
        let mut gnm_lib = HleLibrary::new("libSceGnmDriver", Mode::Hle, Priority::Low(Vec::new()));
        gnm_lib.register("sceGnmSubmitDone", sce_gnm_submit_done as *const u8);
        gnm_lib.register("sceGnmFlushGarlic", sce_gnm_flush_garlic as *const u8);
        gnm_lib.register(
            "sceGnmDrawInitDefaultHardwareState",
            sce_gnm_draw_init_default_hardware_state as *const u8,
        );
        gnm.libraries.push(gnm_lib);
        registry.register_module(gnm);

        // The guest's libc is preferred wholesale; the two memory helpers
        // are pinned to the host versions.
        let mut libc = HleModule::new("libSceLibcInternal", Mode::Lle);
        let mut libc_lib = HleLibrary::new(
            "libSceLibcInternal",
            Mode::Lle,
            Priority::High(names(&["memcpy", "memset"])),
        );
        libc_lib.register("memcpy", libc_memcpy as *const u8);
        libc_lib.register("memset", libc_memset as *const u8);
        libc.libraries.push(libc_lib);
        registry.register_module(libc);

        registry
    }

    pub fn register_module(&mut self, module: HleModule) {
        self.modules.push(module);
    }

    pub fn find_module(&self, name: &str) -> Option<&HleModule> {
        self.modules.iter().find(|m| m.name == name)
    }

    pub fn module_names(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.name.as_str()).collect()
    }
}
