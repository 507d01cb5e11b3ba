//! HLE (High Level Emulation) layer for the oxidized-orbis loader
//!
//! Declares the host re-implementations of PS4 firmware modules and
//! arbitrates, per symbol, between them and the guest's own code when the
//! global symbol table is published.

pub mod policy;
pub mod publish;
pub mod registry;

pub use publish::{hle_stub, hle_stub_addr, publish_symbols};
pub use registry::{HleFunction, HleLibrary, HleModule, HleRegistry, Mode, Priority};
