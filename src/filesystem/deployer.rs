// src/filesystem/deployer.rs

//! Entry deployment onto a target root
//!
//! Writes [`FsEntry`] values under an install root: regular file content is
//! streamed into a temp file in the destination directory and renamed into
//! place, so a reader never sees a half-written file. Ownership is only
//! applied when running as root.

use crate::error::{Error, Result};
use crate::filesystem::entry::{ContentSource, DeviceType, EntryKind, FsEntry};
use crate::filesystem::path::safe_join;
use nix::sys::stat::{Mode, SFlag, makedev, mknod};
use nix::unistd::{geteuid, mkfifo};
use std::fs::{self, Permissions};
use std::io;
use std::os::unix::fs::{PermissionsExt, lchown};
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Deploys entries under an install root
pub struct FileDeployer {
    /// Install root directory (e.g., "/" or "/tmp/conary-root")
    install_root: PathBuf,
    apply_ownership: bool,
}

impl FileDeployer {
    /// Create a deployer, creating the install root if needed
    pub fn new<P: AsRef<Path>>(install_root: P) -> Result<Self> {
        let install_root = install_root.as_ref().to_path_buf();

        if !install_root.exists() {
            fs::create_dir_all(&install_root)?;
            debug!("Created install root: {:?}", install_root);
        }

        Ok(Self {
            install_root,
            apply_ownership: geteuid().is_root(),
        })
    }

    pub fn install_root(&self) -> &Path {
        &self.install_root
    }

    /// Validate and compute a safe target path within the install root
    pub fn target_path(&self, location: &str) -> Result<PathBuf> {
        safe_join(&self.install_root, location)
    }

    /// Write any kind of entry
    pub fn deploy_entry(&self, entry: &FsEntry) -> Result<()> {
        match entry.kind() {
            EntryKind::Dir => self.deploy_dir(entry),
            EntryKind::File(_) => {
                let source = entry.data().ok_or_else(|| {
                    Error::TriggerError(format!("no content available for {}", entry.location()))
                })?;
                self.deploy_file(entry, source)
            }
            EntryKind::Symlink { target } => self.deploy_symlink(entry, target),
            EntryKind::Fifo => self.deploy_fifo(entry),
            EntryKind::Device { device, major, minor } => {
                self.deploy_device(entry, *device, *major, *minor)
            }
        }
    }

    /// Create or adopt a directory and apply its metadata
    ///
    /// A live symlink to a directory is adopted as is: the link stays and
    /// neither it nor its target is touched.
    pub fn deploy_dir(&self, entry: &FsEntry) -> Result<()> {
        let target_path = self.target_path(entry.location())?;

        match fs::symlink_metadata(&target_path) {
            Ok(meta) if meta.is_dir() => {}
            Ok(meta) if meta.file_type().is_symlink() && target_path.is_dir() => {
                debug!("Keeping symlinked directory: {}", entry.location());
                return Ok(());
            }
            Ok(_) => {
                fs::remove_file(&target_path)?;
                fs::create_dir_all(&target_path)?;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => fs::create_dir_all(&target_path)?,
            Err(e) => return Err(e.into()),
        }

        self.apply_metadata(&target_path, entry)?;
        debug!("Deployed directory: {} (mode: {:o})", entry.location(), entry.mode());
        Ok(())
    }

    /// Copy file content into place atomically
    pub fn deploy_file(&self, entry: &FsEntry, source: &ContentSource) -> Result<()> {
        let target_path = self.target_path(entry.location())?;
        let parent = self.ensure_parent(&target_path)?;

        let mut temp = NamedTempFile::new_in(&parent)?;
        {
            let mut reader = source.open()?;
            io::copy(&mut reader, temp.as_file_mut())?;
        }
        temp.as_file().sync_all()?;

        if entry.mtime() > 0 {
            let mtime = UNIX_EPOCH + Duration::from_secs(entry.mtime() as u64);
            temp.as_file().set_modified(mtime)?;
        }
        self.apply_metadata(temp.path(), entry)?;

        temp.persist(&target_path).map_err(|e| e.error)?;

        info!(
            "Deployed file: {} (mode: {:o}, size: {})",
            entry.location(),
            entry.mode(),
            entry.size().map(|s| s.to_string()).unwrap_or_else(|| "?".into())
        );
        Ok(())
    }

    /// Create a symbolic link, replacing any non-directory in the way
    pub fn deploy_symlink(&self, entry: &FsEntry, target: &str) -> Result<()> {
        let link_path = self.target_path(entry.location())?;
        self.ensure_parent(&link_path)?;

        if let Ok(meta) = fs::symlink_metadata(&link_path) {
            if meta.is_dir() {
                debug!("Skipping symlink deployment over directory: {}", entry.location());
                return Ok(());
            }
            fs::remove_file(&link_path)?;
        }

        std::os::unix::fs::symlink(target, &link_path)?;
        if self.apply_ownership {
            lchown(&link_path, Some(entry.uid()), Some(entry.gid()))?;
        }

        info!("Deployed symlink: {} -> {}", entry.location(), target);
        Ok(())
    }

    pub fn deploy_fifo(&self, entry: &FsEntry) -> Result<()> {
        let path = self.clear_for_node(entry)?;
        mkfifo(&path, Mode::from_bits_truncate(entry.mode() & 0o777)).map_err(io::Error::from)?;
        self.apply_metadata(&path, entry)?;
        info!("Deployed fifo: {}", entry.location());
        Ok(())
    }

    pub fn deploy_device(&self, entry: &FsEntry, device: DeviceType, major: u64, minor: u64) -> Result<()> {
        let path = self.clear_for_node(entry)?;
        let kind = match device {
            DeviceType::Block => SFlag::S_IFBLK,
            DeviceType::Char => SFlag::S_IFCHR,
        };
        mknod(
            &path,
            kind,
            Mode::from_bits_truncate(entry.mode() & 0o777),
            makedev(major, minor),
        )
        .map_err(io::Error::from)?;
        self.apply_metadata(&path, entry)?;
        info!("Deployed {} device: {} ({}:{})", device, entry.location(), major, minor);
        Ok(())
    }

    fn clear_for_node(&self, entry: &FsEntry) -> Result<PathBuf> {
        let path = self.target_path(entry.location())?;
        self.ensure_parent(&path)?;
        match fs::symlink_metadata(&path) {
            Ok(meta) if meta.is_dir() => {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("directory in the way of {}", entry.location()),
                )));
            }
            Ok(_) => fs::remove_file(&path)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(path)
    }

    fn ensure_parent(&self, path: &Path) -> Result<PathBuf> {
        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.install_root.clone());
        fs::create_dir_all(&parent)?;
        Ok(parent)
    }

    /// Ownership first: chown clears the set-ID bits
    fn apply_metadata(&self, path: &Path, entry: &FsEntry) -> Result<()> {
        if self.apply_ownership {
            lchown(path, Some(entry.uid()), Some(entry.gid()))?;
        }
        fs::set_permissions(path, Permissions::from_mode(entry.mode()))?;
        Ok(())
    }

    /// Remove a non-directory from the filesystem
    pub fn remove_file(&self, location: &str) -> Result<()> {
        let target_path = self.target_path(location)?;

        match fs::symlink_metadata(&target_path) {
            Ok(meta) if meta.is_dir() => {
                debug!("Skipping directory in remove_file: {}", location);
            }
            Ok(_) => {
                fs::remove_file(&target_path)?;
                info!("Removed file: {}", location);
            }
            Err(e) if crate::error::is_missing_target(&e) => {
                debug!("File already removed: {}", location);
            }
            Err(e) => return Err(e.into()),
        }

        Ok(())
    }

    /// Remove an empty directory
    ///
    /// Returns Ok(true) if removed, Ok(false) if not empty or absent.
    pub fn remove_directory(&self, location: &str) -> Result<bool> {
        let target_path = self.target_path(location)?;

        match fs::symlink_metadata(&target_path) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                debug!("Path is not a directory: {}", location);
                return Ok(false);
            }
            Err(e) if crate::error::is_missing_target(&e) => {
                debug!("Directory already removed: {}", location);
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        }

        match fs::remove_dir(&target_path) {
            Ok(()) => {
                info!("Removed directory: {}", location);
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::DirectoryNotEmpty => {
                debug!("Directory not empty, skipping: {}", location);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}
