// src/filesystem/livefs.rs

//! Live filesystem scanning
//!
//! The only code that calls `stat`, `lstat`, `readlink` and lists
//! directories. Everything else works on [`FsEntry`] values produced here.
//!
//! Scans are breadth-first over an explicit queue so pathological directory
//! depth never grows the stack. When an offset is given, yielded locations
//! have it stripped (`/tmp/image/usr/bin` becomes `/usr/bin`) while all I/O
//! goes to the real, offset-joined path.

use crate::error::{Result, is_missing_target};
use crate::filesystem::contents::ContentSet;
use crate::filesystem::entry::{Checksums, ContentSource, DeviceType, EntryKind, FileData, FsEntry};
use crate::filesystem::path::{join_location, normpath, real_path, resolve_symlink_target, strip_offset};
use crate::hash::HashAlgorithm;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs::{self, Metadata};
use std::io;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Options for [`iter_scan`]
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Prefix stripped from every yielded location
    pub offset: Option<PathBuf>,
    /// Use `stat` instead of `lstat`
    pub follow_symlinks: bool,
    /// Algorithms regular files can compute on demand
    pub checksum_algorithms: Vec<HashAlgorithm>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            offset: None,
            follow_symlinks: false,
            checksum_algorithms: HashAlgorithm::ALL.to_vec(),
        }
    }
}

impl ScanOptions {
    pub fn with_offset(mut self, offset: impl Into<PathBuf>) -> Self {
        self.offset = Some(offset.into());
        self
    }

    pub fn follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    pub fn checksums(mut self, algorithms: &[HashAlgorithm]) -> Self {
        self.checksum_algorithms = algorithms.to_vec();
        self
    }
}

fn stat(path: &Path, follow: bool) -> io::Result<Metadata> {
    if !follow {
        return fs::symlink_metadata(path);
    }
    match fs::metadata(path) {
        Ok(meta) => Ok(meta),
        // Dangling link: describe the link itself
        Err(e) if e.kind() == io::ErrorKind::NotFound => fs::symlink_metadata(path),
        Err(e) => Err(e),
    }
}

/// Build an entry for `location` from the object at `real`
pub fn gen_entry(
    location: &str,
    real: &Path,
    follow_symlinks: bool,
    algorithms: &[HashAlgorithm],
) -> Result<FsEntry> {
    let meta = stat(real, follow_symlinks)?;
    entry_from_metadata(location, real, &meta, algorithms)
}

fn entry_from_metadata(
    location: &str,
    real: &Path,
    meta: &Metadata,
    algorithms: &[HashAlgorithm],
) -> Result<FsEntry> {
    let file_type = meta.file_type();
    let kind = if file_type.is_file() {
        EntryKind::File(FileData {
            size: Some(meta.len()),
            checksums: Checksums::lazy(ContentSource::Local(real.to_path_buf()), algorithms),
        })
    } else if file_type.is_dir() {
        EntryKind::Dir
    } else if file_type.is_symlink() {
        let target = fs::read_link(real)?;
        EntryKind::Symlink {
            target: target.to_string_lossy().into_owned(),
        }
    } else if file_type.is_fifo() {
        EntryKind::Fifo
    } else {
        let device = if file_type.is_block_device() {
            DeviceType::Block
        } else {
            DeviceType::Char
        };
        let rdev = meta.rdev();
        EntryKind::Device {
            device,
            major: nix::sys::stat::major(rdev),
            minor: nix::sys::stat::minor(rdev),
        }
    };

    Ok(FsEntry::new(location, meta.mode(), kind)?
        .with_owner(meta.uid(), meta.gid())
        .with_mtime(meta.mtime()))
}

/// Iterator over a live directory tree; see [`iter_scan`]
pub struct ScanIter {
    offset: Option<PathBuf>,
    follow_symlinks: bool,
    algorithms: Vec<HashAlgorithm>,
    /// Directories still to list: (location, real path)
    dirs: VecDeque<(String, PathBuf)>,
    /// Entries produced by the last listing, not yet yielded
    pending: VecDeque<FsEntry>,
    /// (dev, ino) of directories already queued, when following links
    seen_dirs: HashSet<(u64, u64)>,
    root: Option<(String, PathBuf)>,
    failed: bool,
}

impl ScanIter {
    fn new(path: &Path, options: ScanOptions) -> Self {
        let real = PathBuf::from(normpath(&path.to_string_lossy()));
        let location = match &options.offset {
            Some(offset) => {
                let offset = normpath(&offset.to_string_lossy());
                let full = real.to_string_lossy().into_owned();
                let stripped = full.strip_prefix(offset.trim_end_matches('/')).unwrap_or(&full);
                if stripped.is_empty() {
                    String::new()
                } else {
                    normpath(stripped)
                }
            }
            None => real.to_string_lossy().into_owned(),
        };

        Self {
            offset: options.offset,
            follow_symlinks: options.follow_symlinks,
            algorithms: options.checksum_algorithms,
            dirs: VecDeque::new(),
            pending: VecDeque::new(),
            seen_dirs: HashSet::new(),
            root: Some((location, real)),
            failed: false,
        }
    }

    fn queue_dir(&mut self, location: String, real: PathBuf, meta: Option<&Metadata>) {
        if self.follow_symlinks
            && let Some(meta) = meta
            && !self.seen_dirs.insert((meta.dev(), meta.ino()))
        {
            debug!("Skipping already visited directory {}", real.display());
            return;
        }
        self.dirs.push_back((location, real));
    }

    /// Handle the scan root; the root is yielded first
    fn start(&mut self, location: String, real: PathBuf) -> Option<Result<FsEntry>> {
        let meta = match stat(&real, self.follow_symlinks) {
            Ok(meta) => meta,
            Err(e) => return Some(Err(e.into())),
        };

        if location.is_empty() {
            // Scan root coincides with the offset: nothing to name it by
            if meta.is_dir() {
                self.queue_dir("/".to_string(), real, Some(&meta));
            }
            return None;
        }

        match entry_from_metadata(&location, &real, &meta, &self.algorithms) {
            Ok(entry) => {
                if entry.is_dir() {
                    self.queue_dir(entry.location().to_string(), real, Some(&meta));
                }
                Some(Ok(entry))
            }
            Err(e) => Some(Err(e)),
        }
    }

    /// List one directory into `pending`
    fn list(&mut self, location: &str, real: &Path) -> Result<()> {
        let read_dir = match fs::read_dir(real) {
            Ok(rd) => rd,
            Err(e) if is_missing_target(&e) => {
                debug!("Directory vanished during scan: {}", real.display());
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for dirent in read_dir {
            match dirent {
                Ok(dirent) => names.push(dirent.file_name()),
                Err(e) if is_missing_target(&e) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        names.sort();

        for name in names {
            let name_str = name.to_string_lossy();
            let child_location = join_location(location, &name_str);
            let child_real = real.join(&name);

            let meta = match stat(&child_real, self.follow_symlinks) {
                Ok(meta) => meta,
                Err(e) if is_missing_target(&e) => {
                    trace!("Entry raced away during scan: {}", child_real.display());
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let entry = match entry_from_metadata(&child_location, &child_real, &meta, &self.algorithms) {
                Ok(entry) => entry,
                Err(e) if e.is_missing_target() => continue,
                Err(e) => return Err(e),
            };

            if entry.is_dir() {
                self.queue_dir(child_location, child_real, Some(&meta));
            }
            self.pending.push_back(entry);
        }
        Ok(())
    }
}

impl Iterator for ScanIter {
    type Item = Result<FsEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        if let Some((location, real)) = self.root.take()
            && let Some(item) = self.start(location, real)
        {
            if item.is_err() {
                self.failed = true;
            }
            return Some(item);
        }

        loop {
            if let Some(entry) = self.pending.pop_front() {
                return Some(Ok(entry));
            }
            let (location, real) = self.dirs.pop_front()?;
            if let Err(e) = self.list(&location, &real) {
                self.failed = true;
                return Some(Err(e));
            }
        }
    }
}

impl ScanIter {
    /// Offset this scan strips from locations, if any
    pub fn offset(&self) -> Option<&Path> {
        self.offset.as_deref()
    }
}

/// Lazily scan a live directory tree
///
/// Symlinks are reported as symlink entries, never traversed, unless
/// `follow_symlinks` is set. The iterator is single-pass and stops after the
/// first error.
pub fn iter_scan(path: impl AsRef<Path>, options: ScanOptions) -> ScanIter {
    ScanIter::new(path.as_ref(), options)
}

/// Scan a live directory tree into a mutable [`ContentSet`]
pub fn scan(path: impl AsRef<Path>, options: ScanOptions) -> Result<ContentSet> {
    iter_scan(path, options).collect()
}

/// Caches parent-directory canonicalization for one `intersect` run
struct RealpathDirCache {
    cache: HashMap<PathBuf, PathBuf>,
}

impl RealpathDirCache {
    fn new() -> Self {
        Self { cache: HashMap::new() }
    }

    fn resolve(&mut self, real: &Path) -> io::Result<PathBuf> {
        let (Some(parent), Some(name)) = (real.parent(), real.file_name()) else {
            return Ok(real.to_path_buf());
        };
        if let Some(resolved) = self.cache.get(parent) {
            return Ok(resolved.join(name));
        }
        let resolved = fs::canonicalize(parent)?;
        self.cache.insert(parent.to_path_buf(), resolved.clone());
        Ok(resolved.join(name))
    }
}

/// Live entries for every location in `cset` that exists under `offset`
///
/// Missing paths (`ENOENT`, `ENOTDIR`) are skipped. With
/// `resolve_real_path`, each parent directory is canonicalized first so
/// entries reachable through symlinked directories are found; their
/// locations then reflect the resolved directory.
pub fn intersect(cset: &ContentSet, offset: &Path, resolve_real_path: bool) -> Result<ContentSet> {
    let mut dirs = RealpathDirCache::new();
    let mut found = ContentSet::new();

    for entry in cset {
        let mut location = entry.location().to_string();
        let mut real = real_path(offset, &location);

        if resolve_real_path {
            match dirs.resolve(&real) {
                Ok(resolved) => {
                    if let Some(stripped) = strip_offset(offset, &resolved) {
                        location = stripped;
                    }
                    real = resolved;
                }
                Err(e) if is_missing_target(&e) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        match gen_entry(&location, &real, false, HashAlgorithm::ALL) {
            Ok(live) => {
                found.add(live)?;
            }
            Err(e) if e.is_missing_target() => {}
            Err(e) => return Err(e),
        }
    }

    Ok(found)
}

/// Add everything reachable through chains of symlinks in `cset`
///
/// Each unseen symlink's target is resolved; a symlink target is added and
/// expanded further, any other entry is added only if `type_filter` accepts
/// it. Dangling targets are ignored.
pub fn expand_symlink_closure(
    cset: &mut ContentSet,
    offset: &Path,
    type_filter: impl Fn(&FsEntry) -> bool,
) -> Result<()> {
    let mut work: Vec<Vec<FsEntry>> = vec![cset.iter_symlinks().cloned().collect()];

    while let Some(syms) = work.pop() {
        let mut new_syms = Vec::new();
        for sym in syms {
            let Some(target) = sym.target() else { continue };
            let resolved = resolve_symlink_target(sym.location(), target);
            if cset.contains(&resolved) {
                continue;
            }

            let entry = match gen_entry(&resolved, &real_path(offset, &resolved), false, HashAlgorithm::ALL) {
                Ok(entry) => entry,
                Err(e) if e.is_missing_target() => continue,
                Err(e) => return Err(e),
            };

            if entry.is_symlink() {
                cset.add(entry.clone())?;
                new_syms.push(entry);
            } else if type_filter(&entry) {
                cset.add(entry)?;
            }
        }
        if !new_syms.is_empty() {
            work.push(new_syms);
        }
    }

    Ok(())
}

/// Regular files in a live directory (non-recursive), sorted by name
///
/// A missing directory yields an empty list.
pub fn listdir_files(dir: &Path) -> Result<Vec<String>> {
    let read_dir = match fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) if is_missing_target(&e) => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut names = Vec::new();
    for dirent in read_dir {
        let dirent = dirent?;
        let is_file = match dirent.file_type() {
            Ok(ft) if ft.is_symlink() => fs::metadata(dirent.path()).map(|m| m.is_file()).unwrap_or(false),
            Ok(ft) => ft.is_file(),
            Err(e) if is_missing_target(&e) => continue,
            Err(e) => return Err(e.into()),
        };
        if is_file {
            names.push(dirent.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}
