//! Oxidized-Orbis - PS4 module loader
//!
//! Main entry point: loads an eboot and its dependency closure, publishes
//! the global symbol table, and runs the link pass.

use oo_core::Config;
use oo_hle::{publish_symbols, HleRegistry};
use oo_loader::{ModuleLoader, NidTable, SymbolTable};
use std::path::{Path, PathBuf};

fn main() -> oo_core::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting Oxidized-Orbis module loader");

    let config = Config::load().unwrap_or_default();

    let eboot = match std::env::args().nth(1) {
        Some(path) => PathBuf::from(path),
        None => {
            tracing::error!("Usage: oxidized-orbis <eboot.bin>");
            std::process::exit(2);
        }
    };
    let eboot_dir = eboot
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let mut loader = ModuleLoader::new(eboot_dir, config.paths.system.clone(), NidTable::builtin());
    loader.load_file(&eboot)?;
    loader.load_all_dependencies()?;

    let mut symbols = SymbolTable::new();
    publish_symbols(
        &mut symbols,
        loader.modules(),
        &HleRegistry::builtin(),
        loader.nid_table(),
    )?;
    loader.link_modules(&symbols)?;

    tracing::info!(
        "{} modules loaded, {} symbols published",
        loader.modules().len(),
        symbols.symbol_count()
    );

    Ok(())
}
