//! mpegfs-core: shared error type and configuration.
//!
//! This crate is the foundational dependency for the other mpegfs crates,
//! providing the unified [`Error`] (with its POSIX errno mapping for FUSE
//! replies) and the TOML-backed [`config::Config`].

pub mod config;
pub mod error;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
