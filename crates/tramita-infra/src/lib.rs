//! Infrastructure implementations for Tramita.
//!
//! SQLite persistence (WAL mode, split reader/writer pools, embedded
//! migrations) for the repository traits defined in tramita-core, plus the
//! data-directory and config loaders.

use std::path::PathBuf;

pub mod config;
pub mod sqlite;

/// Resolve the data directory: `TRAMITA_DATA_DIR` env var, falling back to
/// `~/.tramita`.
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("TRAMITA_DATA_DIR") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tramita")
}
