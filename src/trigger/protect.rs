// src/trigger/protect.rs

//! Configuration file protection
//!
//! Files under a protected prefix (always `/etc`, plus `CONFIG_PROTECT`)
//! are never silently overwritten. When an install would change the content
//! of an existing protected file, the new version is written beside it as
//! `._cfgNNNN_<name>` instead, and on uninstall a protected file the admin
//! has edited is left alone.

use crate::envd::{collapse_envd, envd_dir};
use crate::error::{Result, is_missing_target};
use crate::filesystem::livefs::{gen_entry, listdir_files};
use crate::filesystem::path::{basename, dirname, join_location, normpath, real_path};
use crate::filesystem::{ContentSet, FsEntry};
use crate::hash::HashAlgorithm;
use crate::merge::{CsetName, Hook, MergeContext, MergeEngine, MergeMode, RequiredCsets, Trigger};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::Path;
use std::rc::Rc;
use tracing::debug;

use super::expect_csets;

/// Prefix matcher for protected locations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectFilter {
    protect: Vec<String>,
    mask: Vec<String>,
}

impl ProtectFilter {
    /// Build from raw prefixes; `/etc` is always protected
    pub fn new<P, M>(protect: P, mask: M) -> Self
    where
        P: IntoIterator,
        P::Item: AsRef<str>,
        M: IntoIterator,
        M::Item: AsRef<str>,
    {
        let mut protect_prefixes = Vec::new();
        for item in protect {
            push_prefix(&mut protect_prefixes, item.as_ref());
        }
        push_prefix(&mut protect_prefixes, "/etc");
        let mut mask_prefixes = Vec::new();
        for item in mask {
            push_prefix(&mut mask_prefixes, item.as_ref());
        }
        Self {
            protect: protect_prefixes,
            mask: mask_prefixes,
        }
    }

    /// Protected and not masked
    pub fn matches(&self, location: &str) -> bool {
        self.protect.iter().any(|p| location.starts_with(p.as_str()))
            && !self.mask.iter().any(|m| location.starts_with(m.as_str()))
    }

    pub fn protect_prefixes(&self) -> &[String] {
        &self.protect
    }

    pub fn mask_prefixes(&self) -> &[String] {
        &self.mask
    }
}

fn push_prefix(prefixes: &mut Vec<String>, raw: &str) {
    let raw = raw.trim();
    if raw.is_empty() {
        return;
    }
    let prefix = format!("{}/", normpath(raw).trim_end_matches('/'));
    if !prefixes.contains(&prefix) {
        prefixes.push(prefix);
    }
}

/// Protect filter for `offset`: env.d settings plus the given extras
pub fn gen_config_protect_filter(
    offset: &Path,
    extra_protects: &[String],
    extra_disables: &[String],
) -> Result<ProtectFilter> {
    let collapsed = collapse_envd(&envd_dir(offset))?;

    let mut protect = collapsed.list("CONFIG_PROTECT");
    protect.extend(extra_protects.iter().cloned());
    let mut mask = collapsed.list("CONFIG_PROTECT_MASK");
    mask.extend(extra_disables.iter().cloned());

    let filter = ProtectFilter::new(protect, mask);
    debug!(
        "config-protect: protecting {:?}, masking {:?}",
        filter.protect_prefixes(),
        filter.mask_prefixes()
    );
    Ok(filter)
}

/// Whether two file entries have the same content
///
/// Every algorithm known to both must agree. When both sizes are known the
/// answer is their equality; otherwise at least one algorithm must have
/// matched. Non-files never compare equal.
pub fn simple_chksum_compare(a: &FsEntry, b: &FsEntry) -> io::Result<bool> {
    let (Some(a_data), Some(b_data)) = (a.file_data(), b.file_data()) else {
        return Ok(false);
    };

    let sizes = match (a_data.size, b_data.size) {
        (Some(x), Some(y)) => Some((x, y)),
        _ => None,
    };
    // Differing sizes can never come out equal; skip the hashing
    if let Some((x, y)) = sizes
        && x != y
    {
        return Ok(false);
    }

    let mut found = false;
    for algo in a_data.checksums.algorithms() {
        if !b_data.checksums.contains(algo) {
            continue;
        }
        let (Some(x), Some(y)) = (a_data.checksums.get(algo)?, b_data.checksums.get(algo)?) else {
            continue;
        };
        if x != y {
            return Ok(false);
        }
        found = true;
    }

    match sizes {
        Some((x, y)) => Ok(x == y),
        None => Ok(found),
    }
}

/// Parse `._cfgNNNN_<name>` into its counter and original name
pub fn parse_backup_name(name: &str) -> Option<(u32, &str)> {
    let digits = name.strip_prefix("._cfg")?.get(..4)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if name.as_bytes().get(9) != Some(&b'_') {
        return None;
    }
    let original = name.get(10..)?;
    Some((digits.parse().ok()?, original))
}

pub fn backup_name(count: u32, name: &str) -> String {
    format!("._cfg{:04}_{}", count, name)
}

/// Renamed install entries and the entries they stand in for
pub type RenameTable = Rc<RefCell<Vec<(FsEntry, FsEntry)>>>;

/// Redirects content-changing installs of protected files to backups
pub struct ConfigProtectInstall {
    renames: RenameTable,
    extra_protects: Vec<String>,
    extra_disables: Vec<String>,
}

impl ConfigProtectInstall {
    pub fn new(extra_protects: Vec<String>, extra_disables: Vec<String>) -> Self {
        Self {
            renames: RenameTable::default(),
            extra_protects,
            extra_disables,
        }
    }

    /// Shared handle on the rename table
    pub fn renames(&self) -> RenameTable {
        self.renames.clone()
    }
}

impl Trigger for ConfigProtectInstall {
    fn label(&self) -> &str {
        "config-protect-install"
    }

    fn hooks(&self) -> &'static [Hook] {
        &[Hook::PreMerge]
    }

    fn required_csets(&self) -> RequiredCsets {
        RequiredCsets::Fixed(&[CsetName::InstallExisting, CsetName::Install])
    }

    fn priority(&self) -> i32 {
        90
    }

    fn applicable_modes(&self) -> &'static [MergeMode] {
        MergeMode::INSTALLING
    }

    fn register(&mut self, engine: &mut MergeEngine) -> Result<()> {
        engine.register(Box::new(ConfigProtectInstallRestore::new(self.renames.clone())))?;
        Ok(())
    }

    fn trigger(&mut self, ctx: &MergeContext<'_>, csets: &mut [ContentSet]) -> Result<()> {
        let [existing, install] = expect_csets::<2>(self.label(), csets)?;
        let filter = gen_config_protect_filter(ctx.offset, &self.extra_protects, &self.extra_disables)?;

        // directory location -> (basename, replacement)
        let mut protected: BTreeMap<String, Vec<(String, FsEntry)>> = BTreeMap::new();
        for live in existing.iter_files() {
            let location = live.location();
            if location.ends_with("/.keep") || !filter.matches(location) {
                continue;
            }
            let Some(replacement) = install.get(location) else { continue };
            if !replacement.is_file() {
                continue;
            }
            match simple_chksum_compare(replacement, live) {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) if is_missing_target(&e) => continue,
                Err(e) => return Err(e.into()),
            }
            protected
                .entry(dirname(location).to_string())
                .or_default()
                .push((basename(location).to_string(), replacement.clone()));
        }

        for (dir, entries) in protected {
            let real_dir = real_path(ctx.offset, &dir);

            // name -> [(counter, backup file name)], ascending
            let mut backups: HashMap<String, Vec<(u32, String)>> = HashMap::new();
            for name in listdir_files(&real_dir)? {
                if let Some((count, original)) = parse_backup_name(&name) {
                    backups
                        .entry(original.to_string())
                        .or_default()
                        .push((count, name.clone()));
                }
            }

            for (name, entry) in entries {
                let mut count = 0;
                for (backup_count, backup_file) in backups.get(&name).map(Vec::as_slice).unwrap_or_default() {
                    let backup = match gen_entry(
                        &join_location(&dir, backup_file),
                        &real_dir.join(backup_file),
                        false,
                        HashAlgorithm::ALL,
                    ) {
                        Ok(backup) => backup,
                        Err(e) if e.is_missing_target() => continue,
                        Err(e) => return Err(e),
                    };
                    match simple_chksum_compare(&backup, &entry) {
                        Ok(true) => {
                            count = *backup_count;
                            break;
                        }
                        Ok(false) => {}
                        Err(e) if is_missing_target(&e) => {}
                        Err(e) => return Err(e.into()),
                    }
                    count = count.max(backup_count + 1);
                }

                if install.remove(entry.location())?.is_none() {
                    continue;
                }
                let renamed = entry.with_location(&join_location(&dir, &backup_name(count, &name)))?;
                ctx.info(format!(
                    "config-protect: installing {} as {}",
                    entry.location(),
                    renamed.location()
                ));
                install.add(renamed.clone())?;
                self.renames.borrow_mut().push((renamed, entry));
            }
        }

        Ok(())
    }
}

/// Puts renamed install entries back under their real locations
///
/// Runs after the merge so the recorded contents name the protected file,
/// not its backup.
pub struct ConfigProtectInstallRestore {
    renames: RenameTable,
}

impl ConfigProtectInstallRestore {
    pub fn new(renames: RenameTable) -> Self {
        Self { renames }
    }
}

impl Trigger for ConfigProtectInstallRestore {
    fn label(&self) -> &str {
        "config-protect-install-restore"
    }

    fn hooks(&self) -> &'static [Hook] {
        &[Hook::PostMerge]
    }

    fn required_csets(&self) -> RequiredCsets {
        RequiredCsets::Fixed(&[CsetName::Install])
    }

    fn priority(&self) -> i32 {
        10
    }

    fn applicable_modes(&self) -> &'static [MergeMode] {
        MergeMode::INSTALLING
    }

    fn trigger(&mut self, _ctx: &MergeContext<'_>, csets: &mut [ContentSet]) -> Result<()> {
        let [install] = expect_csets::<1>(self.label(), csets)?;
        let renames: Vec<_> = self.renames.borrow_mut().drain(..).collect();
        for (renamed, original) in renames {
            if install.remove(renamed.location())?.is_some() {
                install.add(original)?;
            }
        }
        Ok(())
    }
}

/// Keeps locally modified protected files on uninstall
pub struct ConfigProtectUninstall {
    extra_protects: Vec<String>,
    extra_disables: Vec<String>,
}

impl ConfigProtectUninstall {
    pub fn new(extra_protects: Vec<String>, extra_disables: Vec<String>) -> Self {
        Self {
            extra_protects,
            extra_disables,
        }
    }
}

impl Default for ConfigProtectUninstall {
    fn default() -> Self {
        Self::new(Vec::new(), Vec::new())
    }
}

impl Trigger for ConfigProtectUninstall {
    fn label(&self) -> &str {
        "config-protect-uninstall"
    }

    fn hooks(&self) -> &'static [Hook] {
        &[Hook::PreUnmerge]
    }

    fn required_csets(&self) -> RequiredCsets {
        RequiredCsets::Fixed(&[CsetName::UninstallExisting, CsetName::Uninstall])
    }

    fn trigger(&mut self, ctx: &MergeContext<'_>, csets: &mut [ContentSet]) -> Result<()> {
        let [existing, uninstall] = expect_csets::<2>(self.label(), csets)?;
        let filter = gen_config_protect_filter(ctx.offset, &self.extra_protects, &self.extra_disables)?;

        let mut keep = Vec::new();
        for live in existing.iter_files() {
            let location = live.location();
            if location.ends_with("/.keep") || !filter.matches(location) {
                continue;
            }
            let Some(recorded) = uninstall.get(location) else { continue };
            match simple_chksum_compare(recorded, live) {
                Ok(true) => {}
                Ok(false) => keep.push(location.to_string()),
                Err(e) if is_missing_target(&e) => {}
                Err(e) => return Err(e.into()),
            }
        }

        for location in keep {
            ctx.warn(format!("config-protect: keeping modified {}", location));
            uninstall.remove(&location)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::entry::{Checksums, EntryKind, FileData};
    use crate::hash::hash_bytes;

    fn recorded(location: &str, size: Option<u64>, digests: &[(HashAlgorithm, &str)]) -> FsEntry {
        let digests = digests
            .iter()
            .map(|(algo, data)| (*algo, hash_bytes(*algo, data.as_bytes())))
            .collect();
        FsEntry::new(
            location,
            0o644,
            EntryKind::File(FileData {
                size,
                checksums: Checksums::recorded(digests),
            }),
        )
        .unwrap()
    }

    #[test]
    fn test_filter_prefixes() {
        let filter = ProtectFilter::new(["/usr/share/config/", "/opt//conf"], ["/etc/env.d"]);
        assert!(filter.matches("/etc/foo.conf"));
        assert!(filter.matches("/usr/share/config/kde"));
        assert!(filter.matches("/opt/conf/x"));
        assert!(!filter.matches("/etc/env.d/50foo"));
        assert!(!filter.matches("/etc"));
        assert!(!filter.matches("/etcetera/x"));
        assert!(!filter.matches("/usr/bin/foo"));
        assert_eq!(filter.protect_prefixes().iter().filter(|p| *p == "/etc/").count(), 1);
    }

    #[test]
    fn test_filter_reads_envd() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let dir = envd_dir(temp_dir.path());
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("00basic"), "CONFIG_PROTECT=\"/var/conf\"\nCONFIG_PROTECT_MASK=\"/etc/skip\"\n")
            .unwrap();

        let filter = gen_config_protect_filter(temp_dir.path(), &["/srv".to_string()], &[]).unwrap();
        assert!(filter.matches("/var/conf/a"));
        assert!(filter.matches("/srv/a"));
        assert!(!filter.matches("/etc/skip/a"));
    }

    #[test]
    fn test_chksum_compare_rules() {
        let a = recorded("/a", Some(3), &[(HashAlgorithm::Sha256, "abc")]);
        let b = recorded("/b", Some(3), &[(HashAlgorithm::Md5, "xyz")]);
        // Disjoint algorithms: size is all they share
        assert!(simple_chksum_compare(&a, &b).unwrap());

        let c = recorded("/c", Some(3), &[(HashAlgorithm::Sha256, "xyz")]);
        assert!(!simple_chksum_compare(&a, &c).unwrap());

        // No sizes: needs at least one matching algorithm
        let d = recorded("/d", None, &[(HashAlgorithm::Sha256, "abc")]);
        let e = recorded("/e", None, &[(HashAlgorithm::Md5, "abc")]);
        assert!(simple_chksum_compare(&a, &d).unwrap());
        assert!(!simple_chksum_compare(&d, &e).unwrap());

        let dir = FsEntry::dir("/etc", 0o755).unwrap();
        assert!(!simple_chksum_compare(&a, &dir).unwrap());
    }

    #[test]
    fn test_backup_names() {
        assert_eq!(backup_name(7, "foo.conf"), "._cfg0007_foo.conf");
        assert_eq!(parse_backup_name("._cfg0007_foo.conf"), Some((7, "foo.conf")));
        assert_eq!(parse_backup_name("._cfg12_foo"), None);
        assert_eq!(parse_backup_name("._cfg0001-foo"), None);
        assert_eq!(parse_backup_name("foo.conf"), None);
    }

    #[test]
    fn test_restore_puts_originals_back() {
        let renames = RenameTable::default();
        let original = FsEntry::file_with_data("/etc/foo", 0o644, b"new".to_vec()).unwrap();
        let renamed = original.with_location("/etc/._cfg0000_foo").unwrap();
        renames.borrow_mut().push((renamed.clone(), original));

        let mut restore = ConfigProtectInstallRestore::new(renames.clone());
        let observer = crate::merge::RecordingObserver::new();
        let ctx = MergeContext::new(MergeMode::Install, Hook::PostMerge, Path::new("/"), &observer);
        let mut csets = [ContentSet::from_entries([renamed])];
        restore.trigger(&ctx, &mut csets).unwrap();

        assert!(csets[0].contains("/etc/foo"));
        assert!(!csets[0].contains("/etc/._cfg0000_foo"));
        assert!(renames.borrow().is_empty());
    }
}
