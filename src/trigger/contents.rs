// src/trigger/contents.rs

//! Triggers that touch the live filesystem
//!
//! Every other trigger only edits content sets; these two are the point
//! where the `install` set is written and the `uninstall` set removed.

use crate::error::Result;
use crate::filesystem::{ContentSet, FileDeployer, FsEntry};
use crate::merge::{CsetName, Hook, MergeContext, MergeMode, RequiredCsets, Trigger};
use tracing::{debug, info};

use super::expect_csets;

/// Writes the `install` set under the offset
#[derive(Debug, Default)]
pub struct MergeContents;

impl Trigger for MergeContents {
    fn label(&self) -> &str {
        "merge-contents"
    }

    fn hooks(&self) -> &'static [Hook] {
        &[Hook::Merge]
    }

    fn required_csets(&self) -> RequiredCsets {
        RequiredCsets::Fixed(&[CsetName::Install])
    }

    fn applicable_modes(&self) -> &'static [MergeMode] {
        MergeMode::INSTALLING
    }

    fn trigger(&mut self, ctx: &MergeContext<'_>, csets: &mut [ContentSet]) -> Result<()> {
        let [cset] = expect_csets::<1>(self.label(), csets)?;
        let deployer = FileDeployer::new(ctx.offset)?;

        // Sets iterate in location order, so parents precede children
        for dir in cset.iter_dirs() {
            deployer.deploy_entry(dir)?;
        }
        let mut written = 0usize;
        for entry in cset.iter().filter(|e| !e.is_dir()) {
            deployer.deploy_entry(entry)?;
            written += 1;
        }

        info!(
            "Merged {} entr(ies) into {} ({} directories)",
            cset.len(),
            ctx.offset.display(),
            cset.len() - written
        );
        Ok(())
    }
}

/// Removes the `uninstall` set from the offset
///
/// Directories go last and deepest first, and only when already empty, so
/// a directory shared with other contents survives.
#[derive(Debug, Default)]
pub struct UnmergeContents;

impl Trigger for UnmergeContents {
    fn label(&self) -> &str {
        "unmerge-contents"
    }

    fn hooks(&self) -> &'static [Hook] {
        &[Hook::Unmerge]
    }

    fn required_csets(&self) -> RequiredCsets {
        RequiredCsets::Fixed(&[CsetName::Uninstall])
    }

    fn applicable_modes(&self) -> &'static [MergeMode] {
        MergeMode::REMOVING
    }

    fn trigger(&mut self, ctx: &MergeContext<'_>, csets: &mut [ContentSet]) -> Result<()> {
        let [cset] = expect_csets::<1>(self.label(), csets)?;
        let deployer = FileDeployer::new(ctx.offset)?;

        for entry in cset.iter().filter(|e| !e.is_dir()) {
            deployer.remove_file(entry.location())?;
        }

        let dirs: Vec<&FsEntry> = cset.iter_dirs().collect();
        let mut kept = 0usize;
        for dir in dirs.into_iter().rev() {
            if !deployer.remove_directory(dir.location())? {
                kept += 1;
            }
        }
        if kept > 0 {
            debug!("{} director(ies) left in place under {}", kept, ctx.offset.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::RecordingObserver;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn contents() -> ContentSet {
        ContentSet::from_entries([
            FsEntry::dir("/usr", 0o755).unwrap(),
            FsEntry::dir("/usr/bin", 0o755).unwrap(),
            FsEntry::file_with_data("/usr/bin/foo", 0o755, b"foo".to_vec()).unwrap(),
            FsEntry::symlink("/usr/bin/bar", "foo").unwrap(),
        ])
    }

    #[test]
    fn test_merge_then_unmerge() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let observer = RecordingObserver::new();

        let ctx = MergeContext::new(MergeMode::Install, Hook::Merge, root, &observer);
        MergeContents.trigger(&ctx, &mut [contents()]).unwrap();

        assert_eq!(fs::read(root.join("usr/bin/foo")).unwrap(), b"foo");
        assert_eq!(
            fs::metadata(root.join("usr/bin/foo")).unwrap().permissions().mode() & 0o7777,
            0o755
        );
        assert_eq!(fs::read_link(root.join("usr/bin/bar")).unwrap().to_str(), Some("foo"));

        // Unrelated file keeps /usr alive
        fs::write(root.join("usr/other"), b"x").unwrap();

        let ctx = MergeContext::new(MergeMode::Uninstall, Hook::Unmerge, root, &observer);
        UnmergeContents.trigger(&ctx, &mut [contents()]).unwrap();

        assert!(!root.join("usr/bin").exists());
        assert!(root.join("usr/other").exists());
    }

    #[test]
    fn test_unmerge_tolerates_missing() {
        let temp_dir = TempDir::new().unwrap();
        let observer = RecordingObserver::new();
        let ctx = MergeContext::new(MergeMode::Uninstall, Hook::Unmerge, temp_dir.path(), &observer);
        UnmergeContents.trigger(&ctx, &mut [contents()]).unwrap();
    }
}
