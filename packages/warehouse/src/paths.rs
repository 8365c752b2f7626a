#![allow(clippy::module_name_repetitions)]
//! Default file locations under the project's `data/` directory.

use std::path::{Path, PathBuf};

/// Returns the workspace root directory.
///
/// Resolved at compile time from `CARGO_MANIFEST_DIR`; falls back to the
/// current directory when the crate was built outside the workspace layout.
#[must_use]
pub fn project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Returns the `data/` directory path.
#[must_use]
pub fn data_dir() -> PathBuf {
    project_root().join("data")
}

/// Returns the `data/source/` directory where source exports are cached.
#[must_use]
pub fn source_dir() -> PathBuf {
    data_dir().join("source")
}

/// Returns the default warehouse `DuckDB` file.
#[must_use]
pub fn warehouse_db_path() -> PathBuf {
    data_dir().join("warehouse.duckdb")
}

/// Returns the `data/exports/` directory for Parquet output.
#[must_use]
pub fn exports_dir() -> PathBuf {
    data_dir().join("exports")
}

/// Ensures a directory exists, creating it if necessary.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be created.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_paths_live_under_project_root() {
        let root = project_root();
        assert!(root.join("Cargo.toml").exists());
        assert!(warehouse_db_path().starts_with(data_dir()));
        assert_eq!(source_dir(), root.join("data").join("source"));
    }
}
