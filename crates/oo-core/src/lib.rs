//! Core types for the oxidized-orbis PS4 module loader
//!
//! This crate provides the foundational error handling and configuration
//! infrastructure shared by the loader crates.

pub mod config;
pub mod error;

pub use config::Config;
pub use error::{LoaderError, MemoryError, NidError, OrbisError, Result};
