// src/filesystem/entry.rs

//! Filesystem entity model
//!
//! An [`FsEntry`] describes one filesystem object (regular file, directory,
//! symlink, fifo or device node) by location and metadata. Entries are value
//! objects: "changing" one produces a new entry. Regular files carry a
//! [`Checksums`] map that computes each digest on first access and caches it
//! for the entry's lifetime, since most entries are never compared by content.

use crate::filesystem::path::normalize_location;
use crate::hash::{HashAlgorithm, hash_reader};
use crate::error::Result;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::PathBuf;
use std::sync::Arc;

/// Set-user-ID bit
pub const S_ISUID: u32 = 0o4000;
/// Set-group-ID bit
pub const S_ISGID: u32 = 0o2000;
/// Sticky bit
pub const S_ISVTX: u32 = 0o1000;

/// Where a regular file's bytes come from
#[derive(Clone)]
pub enum ContentSource {
    /// A file on the live filesystem (real path, offset already applied)
    Local(PathBuf),
    /// Bytes held in memory
    Bytes(Arc<[u8]>),
}

impl ContentSource {
    /// Open the content for reading
    pub fn open(&self) -> io::Result<Box<dyn Read + '_>> {
        match self {
            ContentSource::Local(path) => Ok(Box::new(File::open(path)?)),
            ContentSource::Bytes(data) => Ok(Box::new(Cursor::new(&data[..]))),
        }
    }

    /// Real path, when the content lives on disk
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            ContentSource::Local(path) => Some(path),
            ContentSource::Bytes(_) => None,
        }
    }
}

impl fmt::Debug for ContentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentSource::Local(path) => write!(f, "Local({})", path.display()),
            ContentSource::Bytes(data) => write!(f, "Bytes({} bytes)", data.len()),
        }
    }
}

/// Lazily evaluated algorithm -> digest map
///
/// Digests can be preset (recorded manifests) or computed from the content
/// source for any of the enabled algorithms. A computed digest is cached.
#[derive(Debug)]
pub struct Checksums {
    source: Option<ContentSource>,
    enabled: Vec<HashAlgorithm>,
    cache: RefCell<BTreeMap<HashAlgorithm, String>>,
}

impl Checksums {
    /// Digests computable on demand from `source`
    pub fn lazy(source: ContentSource, enabled: &[HashAlgorithm]) -> Self {
        Self {
            source: Some(source),
            enabled: enabled.to_vec(),
            cache: RefCell::new(BTreeMap::new()),
        }
    }

    /// Fixed, previously recorded digests with no content to compute more
    pub fn recorded(digests: BTreeMap<HashAlgorithm, String>) -> Self {
        Self {
            source: None,
            enabled: Vec::new(),
            cache: RefCell::new(digests),
        }
    }

    /// Algorithms a digest is available (or computable) for
    pub fn algorithms(&self) -> Vec<HashAlgorithm> {
        let mut algos: Vec<HashAlgorithm> = self.cache.borrow().keys().copied().collect();
        for algo in &self.enabled {
            if !algos.contains(algo) {
                algos.push(*algo);
            }
        }
        algos.sort();
        algos
    }

    /// Whether a digest is available for `algo`
    pub fn contains(&self, algo: HashAlgorithm) -> bool {
        self.cache.borrow().contains_key(&algo) || self.enabled.contains(&algo)
    }

    /// Digest for `algo`, computing and caching it on first access
    pub fn get(&self, algo: HashAlgorithm) -> io::Result<Option<String>> {
        if let Some(value) = self.cache.borrow().get(&algo) {
            return Ok(Some(value.clone()));
        }
        let Some(source) = self.source.as_ref().filter(|_| self.enabled.contains(&algo)) else {
            return Ok(None);
        };

        let mut reader = source.open()?;
        let value = hash_reader(algo, &mut reader)?;
        self.cache.borrow_mut().insert(algo, value.clone());
        Ok(Some(value))
    }

    /// Digests computed or recorded so far
    pub fn cached(&self) -> BTreeMap<HashAlgorithm, String> {
        self.cache.borrow().clone()
    }

    /// Compute every enabled digest and return the full map
    pub fn all(&self) -> io::Result<BTreeMap<HashAlgorithm, String>> {
        for algo in self.algorithms() {
            self.get(algo)?;
        }
        Ok(self.cached())
    }

    pub fn source(&self) -> Option<&ContentSource> {
        self.source.as_ref()
    }
}

impl Clone for Checksums {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            enabled: self.enabled.clone(),
            cache: RefCell::new(self.cache.borrow().clone()),
        }
    }
}

/// Character or block special file
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, strum_macros::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum DeviceType {
    Char,
    Block,
}

/// Regular file payload
#[derive(Debug, Clone)]
pub struct FileData {
    /// Size in bytes; absent on records that never stored it
    pub size: Option<u64>,
    pub checksums: Checksums,
}

/// The variant part of an entry
#[derive(Debug, Clone)]
pub enum EntryKind {
    File(FileData),
    Dir,
    Symlink { target: String },
    Fifo,
    Device { device: DeviceType, major: u64, minor: u64 },
}

/// One filesystem object
#[derive(Debug, Clone)]
pub struct FsEntry {
    location: String,
    mode: u32,
    uid: u32,
    gid: u32,
    mtime: i64,
    kind: EntryKind,
}

impl FsEntry {
    /// Build an entry, normalizing `location`
    pub fn new(location: &str, mode: u32, kind: EntryKind) -> Result<Self> {
        Ok(Self {
            location: normalize_location(location)?,
            mode: mode & 0o7777,
            uid: 0,
            gid: 0,
            mtime: 0,
            kind,
        })
    }

    /// Regular file whose digests are computed from `source` on demand
    pub fn file(location: &str, mode: u32, source: ContentSource, size: Option<u64>) -> Result<Self> {
        let checksums = Checksums::lazy(source, HashAlgorithm::ALL);
        Self::new(location, mode, EntryKind::File(FileData { size, checksums }))
    }

    /// Regular file with in-memory content
    pub fn file_with_data(location: &str, mode: u32, data: impl Into<Vec<u8>>) -> Result<Self> {
        let data: Vec<u8> = data.into();
        let size = data.len() as u64;
        Self::file(location, mode, ContentSource::Bytes(Arc::from(data)), Some(size))
    }

    pub fn dir(location: &str, mode: u32) -> Result<Self> {
        Self::new(location, mode, EntryKind::Dir)
    }

    pub fn symlink(location: &str, target: impl Into<String>) -> Result<Self> {
        Self::new(location, 0o777, EntryKind::Symlink { target: target.into() })
    }

    pub fn fifo(location: &str, mode: u32) -> Result<Self> {
        Self::new(location, mode, EntryKind::Fifo)
    }

    pub fn device(location: &str, mode: u32, device: DeviceType, major: u64, minor: u64) -> Result<Self> {
        Self::new(location, mode, EntryKind::Device { device, major, minor })
    }

    /// Set ownership
    pub fn with_owner(mut self, uid: u32, gid: u32) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }

    /// Set the modification time (seconds since the epoch)
    pub fn with_mtime(mut self, mtime: i64) -> Self {
        self.mtime = mtime;
        self
    }

    /// Copy of this entry with permission bits replaced
    pub fn with_mode(&self, mode: u32) -> Self {
        let mut entry = self.clone();
        entry.mode = mode & 0o7777;
        entry
    }

    /// Copy of this entry at another location
    pub fn with_location(&self, location: &str) -> Result<Self> {
        let mut entry = self.clone();
        entry.location = normalize_location(location)?;
        Ok(entry)
    }

    /// Copy of a symlink entry with a new target; other kinds are cloned as-is
    pub fn with_target(&self, target: impl Into<String>) -> Self {
        let mut entry = self.clone();
        if let EntryKind::Symlink { target: t } = &mut entry.kind {
            *t = target.into();
        }
        entry
    }

    #[inline]
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Permission bits (including set-UID, set-GID and sticky)
    #[inline]
    pub fn mode(&self) -> u32 {
        self.mode
    }

    #[inline]
    pub fn uid(&self) -> u32 {
        self.uid
    }

    #[inline]
    pub fn gid(&self) -> u32 {
        self.gid
    }

    #[inline]
    pub fn mtime(&self) -> i64 {
        self.mtime
    }

    #[inline]
    pub fn kind(&self) -> &EntryKind {
        &self.kind
    }

    pub fn is_file(&self) -> bool {
        matches!(self.kind, EntryKind::File(_))
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, EntryKind::Dir)
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self.kind, EntryKind::Symlink { .. })
    }

    pub fn is_fifo(&self) -> bool {
        matches!(self.kind, EntryKind::Fifo)
    }

    pub fn is_device(&self) -> bool {
        matches!(self.kind, EntryKind::Device { .. })
    }

    /// File payload, for regular files
    pub fn file_data(&self) -> Option<&FileData> {
        match &self.kind {
            EntryKind::File(data) => Some(data),
            _ => None,
        }
    }

    /// File size, when known
    pub fn size(&self) -> Option<u64> {
        self.file_data().and_then(|d| d.size)
    }

    /// Checksum map, for regular files
    pub fn checksums(&self) -> Option<&Checksums> {
        self.file_data().map(|d| &d.checksums)
    }

    /// Digest for `algo`, computed on first access
    pub fn checksum(&self, algo: HashAlgorithm) -> io::Result<Option<String>> {
        match self.checksums() {
            Some(c) => c.get(algo),
            None => Ok(None),
        }
    }

    /// Where the file content can be read from
    pub fn data(&self) -> Option<&ContentSource> {
        self.checksums().and_then(|c| c.source())
    }

    /// Raw symlink target
    pub fn target(&self) -> Option<&str> {
        match &self.kind {
            EntryKind::Symlink { target } => Some(target),
            _ => None,
        }
    }

    /// Short type tag used in messages and records
    pub fn type_name(&self) -> &'static str {
        match self.kind {
            EntryKind::File(_) => "file",
            EntryKind::Dir => "dir",
            EntryKind::Symlink { .. } => "sym",
            EntryKind::Fifo => "fifo",
            EntryKind::Device { .. } => "dev",
        }
    }
}

impl fmt::Display for FsEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            EntryKind::Symlink { target } => write!(f, "sym:{} -> {}", self.location, target),
            _ => write!(f, "{}:{}", self.type_name(), self.location),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_location_normalized() {
        let entry = FsEntry::dir("/usr//lib/", 0o755).unwrap();
        assert_eq!(entry.location(), "/usr/lib");
        assert!(entry.is_dir());
    }

    #[test]
    fn test_lazy_checksum_cached() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data");
        fs::write(&path, b"first").unwrap();

        let entry = FsEntry::file("/data", 0o644, ContentSource::Local(path.clone()), Some(5)).unwrap();
        assert!(entry.checksums().unwrap().cached().is_empty());

        let first = entry.checksum(HashAlgorithm::Sha256).unwrap().unwrap();
        assert_eq!(first, hash_bytes(HashAlgorithm::Sha256, b"first"));

        // Cached for the entry's lifetime, even if the file changes underneath
        fs::write(&path, b"second").unwrap();
        assert_eq!(entry.checksum(HashAlgorithm::Sha256).unwrap().unwrap(), first);
        assert_eq!(entry.checksums().unwrap().cached().len(), 1);
    }

    #[test]
    fn test_recorded_checksums_not_computable() {
        let mut digests = BTreeMap::new();
        digests.insert(HashAlgorithm::Md5, "5eb63bbbe01eeed093cb22bb8f5acdc3".to_string());
        let entry = FsEntry::new(
            "/etc/foo",
            0o644,
            EntryKind::File(FileData { size: Some(11), checksums: Checksums::recorded(digests) }),
        )
        .unwrap();

        assert!(entry.checksum(HashAlgorithm::Md5).unwrap().is_some());
        assert!(entry.checksum(HashAlgorithm::Sha256).unwrap().is_none());
        assert_eq!(entry.checksums().unwrap().algorithms(), vec![HashAlgorithm::Md5]);
    }

    #[test]
    fn test_missing_source_is_io_error() {
        let entry = FsEntry::file("/gone", 0o644, ContentSource::Local("/nonexistent/gone".into()), None).unwrap();
        let err = entry.checksum(HashAlgorithm::Sha256).unwrap_err();
        assert!(crate::error::is_missing_target(&err));
    }

    #[test]
    fn test_value_semantics() {
        let entry = FsEntry::file_with_data("/usr/bin/su", 0o4755, b"x".to_vec()).unwrap();
        let stripped = entry.with_mode(0o4751);
        assert_eq!(entry.mode(), 0o4755);
        assert_eq!(stripped.mode(), 0o4751);

        let moved = entry.with_location("/usr/sbin/su").unwrap();
        assert_eq!(moved.location(), "/usr/sbin/su");
        assert_eq!(entry.location(), "/usr/bin/su");

        let link = FsEntry::symlink("/lib", "/image/usr/lib").unwrap().with_target("/usr/lib");
        assert_eq!(link.target(), Some("/usr/lib"));
        assert_eq!(link.to_string(), "sym:/lib -> /usr/lib");
    }
}
