// src/filesystem/atomic.rs

//! Write-temp-then-rename for generated files
//!
//! The temp file is created in the destination directory so the final
//! rename never crosses a filesystem. A crash leaves either the old file or
//! the new one, never a truncated mix.

use crate::error::Result;
use std::fs::{self, Permissions};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

/// Atomically replace `path` with `contents`, applying `mode`
pub fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(contents)?;
    temp.as_file().sync_all()?;
    fs::set_permissions(temp.path(), Permissions::from_mode(mode))?;
    temp.persist(path).map_err(|e| e.error)?;

    debug!("Atomically wrote {} ({} bytes)", path.display(), contents.len());
    Ok(())
}
