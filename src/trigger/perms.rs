// src/trigger/perms.rs

//! Set-UID/set-GID hardening
//!
//! A set-ID binary others can read can be copied and inspected at leisure;
//! dropping the read bits keeps it executable but opaque.

use crate::error::Result;
use crate::filesystem::ContentSet;
use crate::filesystem::entry::{S_ISGID, S_ISUID};
use crate::merge::{CsetName, Hook, MergeContext, MergeMode, RequiredCsets, Trigger};

use super::expect_csets;

const WORLD_READ: u32 = 0o004;
const GROUP_WORLD_READ: u32 = 0o044;

/// Strips read bits from set-UID/set-GID files (`FEATURES=sfperms`)
#[derive(Debug, Default)]
pub struct SfPerms;

impl Trigger for SfPerms {
    fn label(&self) -> &str {
        "sfperms"
    }

    fn hooks(&self) -> &'static [Hook] {
        &[Hook::PreMerge]
    }

    fn required_csets(&self) -> RequiredCsets {
        RequiredCsets::Fixed(&[CsetName::NewCset])
    }

    fn applicable_modes(&self) -> &'static [MergeMode] {
        MergeMode::INSTALLING
    }

    fn trigger(&mut self, ctx: &MergeContext<'_>, csets: &mut [ContentSet]) -> Result<()> {
        let [cset] = expect_csets::<1>(self.label(), csets)?;

        let mut resets = Vec::new();
        for entry in cset.iter_files() {
            let mode = entry.mode();
            let mut new_mode = mode;
            if mode & S_ISUID != 0 && mode & WORLD_READ != 0 {
                ctx.warn(format!("sfperms: dropping world read due to SetUID: {}", entry));
                new_mode &= !WORLD_READ;
            }
            if mode & S_ISGID != 0 && mode & GROUP_WORLD_READ != 0 {
                ctx.warn(format!("sfperms: dropping group/world read due to SetGID: {}", entry));
                new_mode &= !GROUP_WORLD_READ;
            }
            if new_mode != mode {
                resets.push(entry.with_mode(new_mode));
            }
        }

        cset.update(resets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::FsEntry;
    use crate::merge::RecordingObserver;
    use std::path::Path;

    fn run(entries: Vec<FsEntry>) -> (ContentSet, Vec<String>) {
        let observer = RecordingObserver::new();
        let ctx = MergeContext::new(MergeMode::Install, Hook::PreMerge, Path::new("/"), &observer);
        let mut csets = [ContentSet::from_entries(entries)];
        SfPerms.trigger(&ctx, &mut csets).unwrap();
        let [cset] = csets;
        (cset, observer.warnings())
    }

    #[test]
    fn test_setuid_setgid_both_stripped() {
        let (cset, warnings) = run(vec![
            FsEntry::file_with_data("/usr/bin/su", 0o6644, b"elf".to_vec()).unwrap(),
        ]);
        assert_eq!(cset.get("/usr/bin/su").unwrap().mode(), 0o6600);
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].starts_with("sfperms: dropping world read due to SetUID"));
        assert!(warnings[1].starts_with("sfperms: dropping group/world read due to SetGID"));
    }

    #[test]
    fn test_only_documented_cases() {
        let (cset, warnings) = run(vec![
            FsEntry::file_with_data("/usr/bin/suid", 0o4751, b"a".to_vec()).unwrap(),
            FsEntry::file_with_data("/usr/bin/sgid", 0o2711, b"b".to_vec()).unwrap(),
            FsEntry::file_with_data("/usr/bin/plain", 0o755, b"c".to_vec()).unwrap(),
            FsEntry::dir("/var/mail", 0o2775).unwrap(),
        ]);
        assert!(warnings.is_empty());
        assert_eq!(cset.get("/usr/bin/suid").unwrap().mode(), 0o4751);
        assert_eq!(cset.get("/var/mail").unwrap().mode(), 0o2775);
    }

    #[test]
    fn test_setgid_group_read_only() {
        let (cset, warnings) = run(vec![
            FsEntry::file_with_data("/usr/bin/wall", 0o2750, b"a".to_vec()).unwrap(),
        ]);
        assert_eq!(cset.get("/usr/bin/wall").unwrap().mode(), 0o2710);
        assert_eq!(warnings.len(), 1);
    }
}
