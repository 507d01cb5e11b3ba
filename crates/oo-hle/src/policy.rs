//! LLE/HLE arbitration policy

use crate::registry::{HleRegistry, Mode};

impl HleRegistry {
    /// Decide whether the guest's own implementation should be bound for
    /// a `(symbol, module, library)` triple
    ///
    /// Modules and libraries absent from the registry default to LLE; an
    /// HLE-default library still yields to the guest for symbols on its
    /// `lle_symbols` escape list.
    pub fn should_load_lle_symbol(
        &self,
        symbol_name: &str,
        module_name: &str,
        library_name: &str,
    ) -> bool {
        let Some(module) = self.modules.iter().find(|m| m.name == module_name) else {
            return true;
        };
        let Some(library) = module.libraries.iter().find(|l| l.name == library_name) else {
            return module.default_mode == Mode::Lle;
        };
        match library.default_mode {
            Mode::Lle => true,
            Mode::Hle => library.lle_symbols.iter().any(|s| s == symbol_name),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::registry::{HleLibrary, HleModule, HleRegistry, Mode, Priority};

    fn registry_with(library_mode: Mode, lle_symbols: &[&str]) -> HleRegistry {
        let mut lib = HleLibrary::new("libkernel", library_mode, Priority::Low(Vec::new()));
        lib.lle_symbols = lle_symbols.iter().map(|s| s.to_string()).collect();

        let mut module = HleModule::new("libkernel", Mode::Hle);
        module.libraries.push(lib);

        let mut registry = HleRegistry::new();
        registry.register_module(module);
        registry
    }

    #[test]
    fn test_unknown_module_defaults_to_lle() {
        let registry = HleRegistry::new();
        assert!(registry.should_load_lle_symbol("anything", "libSceFoo", "libSceFoo"));
    }

    #[test]
    fn test_unknown_library_uses_module_default() {
        let registry = registry_with(Mode::Hle, &[]);
        // Module is declared Hle, so an unknown library is HLE-bound
        assert!(!registry.should_load_lle_symbol("anything", "libkernel", "libSceOther"));

        let mut lle_module = HleModule::new("libSceNet", Mode::Lle);
        lle_module.libraries.clear();
        let mut registry = HleRegistry::new();
        registry.register_module(lle_module);
        assert!(registry.should_load_lle_symbol("anything", "libSceNet", "libSceNetCtl"));
    }

    #[test]
    fn test_lle_library_always_loads_lle() {
        let registry = registry_with(Mode::Lle, &[]);
        assert!(registry.should_load_lle_symbol("sceKernelIsNeoMode", "libkernel", "libkernel"));
    }

    #[test]
    fn test_hle_library_with_escape_list() {
        let registry = registry_with(Mode::Hle, &["__stack_chk_guard"]);
        assert!(registry.should_load_lle_symbol("__stack_chk_guard", "libkernel", "libkernel"));
        assert!(!registry.should_load_lle_symbol("sceKernelIsNeoMode", "libkernel", "libkernel"));
    }
}
