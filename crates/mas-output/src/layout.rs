//! Results directory layout.

use std::fs;
use std::path::{Path, PathBuf};

use crate::OutputResult;

/// Create (or clear) the scenario's results root.
///
/// The launcher calls this once at startup; a stale directory from a
/// previous run is removed first so every run's results stand alone.
pub fn reset_results_root(root: &Path) -> OutputResult<()> {
    if root.exists() {
        fs::remove_dir_all(root)?;
    }
    fs::create_dir_all(root)?;
    Ok(())
}

/// The directory owned by `element` under `root`, created on first use.
pub fn element_dir(root: &Path, element: &str) -> OutputResult<PathBuf> {
    let dir = root.join(element);
    fs::create_dir_all(&dir)?;
    Ok(dir)
}
