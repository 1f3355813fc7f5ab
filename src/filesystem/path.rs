// src/filesystem/path.rs

//! Location normalization and offset handling
//!
//! Content sets key entries by a normalized absolute location string. The
//! real filesystem path for an entry is the merge offset joined with that
//! location. Everything here is purely lexical; nothing touches the disk
//! except `safe_join`'s final containment check.

use crate::error::{Error, Result};
use std::path::{Component, Path, PathBuf};

/// Lexically normalize a path string
///
/// Collapses duplicate separators, drops `.` components, resolves `..`
/// against the preceding component and strips any trailing slash. `..` above
/// the root stays at the root. Relative input stays relative.
///
/// ```
/// use conary_merge::filesystem::path::normpath;
///
/// assert_eq!(normpath("//usr///lib/"), "/usr/lib");
/// assert_eq!(normpath("/usr/./lib/../bin"), "/usr/bin");
/// assert_eq!(normpath("/.."), "/");
/// ```
pub fn normpath(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|p| *p != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    if absolute {
        format!("/{}", joined)
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// Normalize a location into the canonical content-set key form
///
/// Locations are always absolute; a relative location is anchored at `/`.
pub fn normalize_location(location: &str) -> Result<String> {
    if location.is_empty() {
        return Err(Error::InvalidPath("empty location".to_string()));
    }
    if location.contains('\0') {
        return Err(Error::InvalidPath(format!("NUL byte in location {:?}", location)));
    }
    if location.starts_with('/') {
        Ok(normpath(location))
    } else {
        Ok(normpath(&format!("/{}", location)))
    }
}

/// Directory component of a normalized location (`/` for top-level entries)
pub fn dirname(location: &str) -> &str {
    match location.rfind('/') {
        Some(0) => "/",
        Some(idx) => &location[..idx],
        None => "",
    }
}

/// Final component of a normalized location
pub fn basename(location: &str) -> &str {
    match location.rfind('/') {
        Some(idx) => &location[idx + 1..],
        None => location,
    }
}

/// Join a directory location and a child name
pub fn join_location(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// The real filesystem path of a location under an offset
pub fn real_path(offset: &Path, location: &str) -> PathBuf {
    let relative = location.trim_start_matches('/');
    if relative.is_empty() {
        offset.to_path_buf()
    } else {
        offset.join(relative)
    }
}

/// Strip an offset prefix from a real path, yielding a location
///
/// Returns `None` when the path is not under the offset.
pub fn strip_offset(offset: &Path, path: &Path) -> Option<String> {
    let rest = path.strip_prefix(offset).ok()?;
    Some(normpath(&format!("/{}", rest.to_string_lossy())))
}

/// Absolute, normalized location a symlink at `location` points to
pub fn resolve_symlink_target(location: &str, target: &str) -> String {
    if target.starts_with('/') {
        normpath(target)
    } else {
        normpath(&join_location(dirname(location), target))
    }
}

/// Safely join an offset with an untrusted location
///
/// Rejects `..` components outright and verifies the parent directory stays
/// under the offset once both exist on disk. The final component is never
/// followed, so a symlink being replaced or removed may point anywhere.
pub fn safe_join(root: impl AsRef<Path>, location: &str) -> Result<PathBuf> {
    let root = root.as_ref();
    let mut normalized = PathBuf::new();

    for component in Path::new(location.trim_start_matches('/')).components() {
        match component {
            Component::Normal(c) => normalized.push(c),
            Component::CurDir => {}
            Component::ParentDir => return Err(Error::PathTraversal(location.to_string())),
            Component::Prefix(_) | Component::RootDir => {}
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(Error::InvalidPath(format!("empty path after sanitization: {:?}", location)));
    }

    let joined = root.join(&normalized);
    let parent = joined.parent().unwrap_or(root);

    if let (Ok(canonical_root), Ok(canonical_parent)) = (root.canonicalize(), parent.canonicalize())
        && !canonical_parent.starts_with(&canonical_root)
    {
        return Err(Error::PathTraversal(format!(
            "{} escapes root {}",
            joined.display(),
            root.display()
        )));
    }

    Ok(joined)
}
