//! Symbol publication
//!
//! Fills the global symbol table from the loaded modules and the HLE
//! registry in three ordered passes: overwritable HLE bindings first, then
//! the guest's own symbols, then the authoritative HLE bindings. The final
//! state per name is what the passes leave behind; no priority is stored.

use crate::registry::{HleRegistry, Priority};
use oo_core::error::NidError;
use oo_loader::oelf::{STB_GLOBAL, STB_WEAK};
use oo_loader::{nid, HostAddr, LoadedModule, NidTable, SymbolTable};
use tracing::{info, warn};

/// Sentinel for symbols whose HLE binding is authoritative but has no
/// concrete host function yet
pub extern "sysv64" fn hle_stub() {
    warn!("Guest called an unimplemented HLE stub");
}

/// Address of the shared stub sentinel
pub fn hle_stub_addr() -> HostAddr {
    HostAddr::new(hle_stub as *const u8)
}

fn synthetic_name(func: &str, module: &str, library: &str) -> String {
    format!("{func}#{module}#{library}")
}

/// Run the full three-pass publication sequence
pub fn publish_symbols(
    table: &mut SymbolTable,
    modules: &[LoadedModule],
    registry: &HleRegistry,
    nids: &NidTable,
) -> Result<(), NidError> {
    register_low_priority_hle(table, registry);
    register_lle(table, modules, registry, nids)?;
    register_high_priority_hle(table, registry);

    info!(
        "Published {} symbols from {} modules and {} HLE modules",
        table.symbol_count(),
        modules.len(),
        registry.modules.len()
    );
    Ok(())
}

/// Pass 1: HLE bindings that guest symbols are allowed to overwrite
fn register_low_priority_hle(table: &mut SymbolTable, registry: &HleRegistry) {
    for module in &registry.modules {
        for library in &module.libraries {
            for func in &library.functions {
                let low = match &library.priority {
                    Priority::Low(listed) => listed.contains(&func.name),
                    Priority::High(listed) => !listed.contains(&func.name),
                };
                if low {
                    let name = synthetic_name(&func.name, &module.name, &library.name);
                    table.register_if_absent(&name, func.entry);
                }
            }
        }
    }
}

/// Pass 2: guest symbols, weak bindings before global so globals win
fn register_lle(
    table: &mut SymbolTable,
    modules: &[LoadedModule],
    registry: &HleRegistry,
    nids: &NidTable,
) -> Result<(), NidError> {
    for module in modules {
        for binding in [STB_WEAK, STB_GLOBAL] {
            for sym in &module.raw_symbols {
                if sym.binding != binding {
                    continue;
                }
                let Some(address) = sym.address else {
                    continue;
                };

                if sym.is_encoded {
                    let full = nid::reconstruct_full_nid(module, nids, &sym.name)?;
                    if registry.should_load_lle_symbol(
                        full.symbol(),
                        full.module(),
                        full.library(),
                    ) {
                        table.register(full.full_name(), address);
                    } else {
                        // HLE is authoritative for this triple; leave a
                        // traceable stub where no host function landed
                        table.register_if_absent(full.full_name(), hle_stub_addr());
                    }
                } else {
                    table.register(&sym.name, address);
                }
            }
        }
    }
    Ok(())
}

/// Pass 3: authoritative HLE bindings, overwriting guest symbols
///
/// Members of a library's `lle_symbols` escape list are skipped so the
/// guest binding from pass 2 survives.
fn register_high_priority_hle(table: &mut SymbolTable, registry: &HleRegistry) {
    for module in &registry.modules {
        for library in &module.libraries {
            for func in &library.functions {
                if library.lle_symbols.contains(&func.name) {
                    continue;
                }
                let high = match &library.priority {
                    Priority::High(listed) => listed.contains(&func.name),
                    Priority::Low(listed) => !listed.contains(&func.name),
                };
                if high {
                    let name = synthetic_name(&func.name, &module.name, &library.name);
                    table.register(&name, func.entry);
                }
            }
        }
    }
}
