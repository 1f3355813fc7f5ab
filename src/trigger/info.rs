// src/trigger/info.rs

//! GNU info directory index regeneration
//!
//! Before a merge the modification times of the info directories are
//! recorded; afterwards every directory whose mtime moved has its `dir`
//! index rebuilt with `install-info`. A missing `install-info` is not an
//! error, the indexes are simply left alone.

use crate::envd::{collapse_envd, envd_dir};
use crate::error::{Error, Result};
use crate::filesystem::ContentSet;
use crate::filesystem::livefs::listdir_files;
use crate::filesystem::path::real_path;
use crate::merge::{Hook, MergeContext, MergeEngine, MergeMode, Trigger};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

pub const GENERIC_INFO_LABEL: &str = "gnu info regen";
pub const ENVD_INFO_LABEL: &str = "envd info regen";

pub const DEFAULT_INFO_DIRS: &[&str] = &["/usr/share/info"];

/// Default timeout for one install-info run (30 seconds)
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const HOOKS: &[Hook] = &[Hook::PreMerge, Hook::PostMerge, Hook::PreUnmerge, Hook::PostUnmerge];

/// Rebuilds info `dir` indexes whose directories changed
pub struct InfoRegen {
    from_envd: bool,
    command: String,
    timeout: Duration,
    mtimes: Option<HashMap<PathBuf, Option<SystemTime>>>,
}

impl InfoRegen {
    /// Fixed `/usr/share/info`
    pub fn generic() -> Self {
        Self {
            from_envd: false,
            command: "install-info".to_string(),
            timeout: DEFAULT_TIMEOUT,
            mtimes: None,
        }
    }

    /// Directories from env.d `INFOPATH`; replaces any generic instance
    pub fn envd() -> Self {
        Self {
            from_envd: true,
            ..Self::generic()
        }
    }

    /// Use another indexer binary (name or path)
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn locations(&self, offset: &Path) -> Result<Vec<String>> {
        if self.from_envd {
            let infopath = collapse_envd(&envd_dir(offset))?.list("INFOPATH");
            if !infopath.is_empty() {
                return Ok(infopath);
            }
        }
        Ok(DEFAULT_INFO_DIRS.iter().map(|s| s.to_string()).collect())
    }

    fn snapshot(&self, offset: &Path) -> Result<HashMap<PathBuf, Option<SystemTime>>> {
        let mut mtimes = HashMap::new();
        for location in self.locations(offset)? {
            let dir = real_path(offset, &location);
            let mtime = fs::metadata(&dir).and_then(|m| m.modified()).ok();
            mtimes.insert(dir, mtime);
        }
        Ok(mtimes)
    }

    fn regen(&self, ctx: &MergeContext<'_>, dir: &Path) -> Result<()> {
        let Ok(indexer) = which::which(&self.command) else {
            debug!("{} not found, skipping info regen of {}", self.command, dir.display());
            return Ok(());
        };

        let index = dir.join("dir");
        for stale in [index.clone(), dir.join("dir.old")] {
            match fs::remove_file(&stale) {
                Ok(()) => {}
                Err(e) if crate::error::is_missing_target(&e) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let mut failed = 0usize;
        for name in listdir_files(dir)? {
            if name.starts_with('.') || name == "dir" || name == "dir.old" {
                continue;
            }
            let page = dir.join(&name);
            if let Err(e) = run_indexer(&indexer, &page, &index, self.timeout) {
                ctx.warn(format!("info regen: failed to index {}: {}", page.display(), e));
                failed += 1;
            }
        }

        info!("Regenerated info index {} ({} failure(s))", index.display(), failed);
        Ok(())
    }
}

impl Trigger for InfoRegen {
    fn label(&self) -> &str {
        if self.from_envd { ENVD_INFO_LABEL } else { GENERIC_INFO_LABEL }
    }

    fn hooks(&self) -> &'static [Hook] {
        HOOKS
    }

    fn register(&mut self, engine: &mut MergeEngine) -> Result<()> {
        if self.from_envd {
            for hook in HOOKS {
                let removed = engine.remove_triggers(*hook, |t| t.label() == GENERIC_INFO_LABEL);
                if removed > 0 {
                    debug!("Superseded {} generic info regen trigger(s) at {}", removed, hook);
                }
            }
        }
        Ok(())
    }

    fn trigger(&mut self, ctx: &MergeContext<'_>, _csets: &mut [ContentSet]) -> Result<()> {
        match ctx.hook {
            // A replace keeps its pre_merge snapshot so post_unmerge sees both halves
            Hook::PreUnmerge if ctx.mode == MergeMode::Replace && self.mtimes.is_some() => Ok(()),
            Hook::PreMerge | Hook::PreUnmerge => {
                self.mtimes = Some(self.snapshot(ctx.offset)?);
                Ok(())
            }
            Hook::PostMerge if ctx.mode == MergeMode::Replace => Ok(()),
            Hook::PostMerge | Hook::PostUnmerge => {
                let previous = self.mtimes.take().unwrap_or_default();
                let current = self.snapshot(ctx.offset)?;
                for (dir, mtime) in current {
                    if mtime.is_none() || previous.get(&dir) == Some(&mtime) {
                        continue;
                    }
                    self.regen(ctx, &dir)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Run `install-info --quiet <page> --dir-file <index>` with a timeout
fn run_indexer(indexer: &Path, page: &Path, index: &Path, timeout: Duration) -> Result<()> {
    debug!("Executing: {} --quiet {} --dir-file {}", indexer.display(), page.display(), index.display());

    let mut child = Command::new(indexer)
        .arg("--quiet")
        .arg(page)
        .arg("--dir-file")
        .arg(index)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::TriggerError(format!("Failed to spawn '{}': {}", indexer.display(), e)))?;

    match child.wait_timeout(timeout)? {
        Some(status) => {
            let output = child.wait_with_output()?;
            let stderr = String::from_utf8_lossy(&output.stderr);
            for line in stderr.lines() {
                warn!("[install-info] {}", line);
            }
            if status.success() {
                Ok(())
            } else {
                Err(Error::TriggerError(format!(
                    "exit code {}: {}",
                    status.code().unwrap_or(-1),
                    stderr.trim()
                )))
            }
        }
        None => {
            let _ = child.kill();
            Err(Error::TriggerError(format!(
                "timed out after {} seconds",
                timeout.as_secs()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::RecordingObserver;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// Fake indexer that logs the page it was asked to index
    fn fake_indexer(temp_dir: &Path, exit_code: i32) -> PathBuf {
        let script = temp_dir.join("fake-install-info");
        let log = temp_dir.join("indexed.log");
        fs::write(
            &script,
            format!("#!/bin/sh\necho \"$2\" >> {}\nexit {}\n", log.display(), exit_code),
        )
        .unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[test]
    fn test_regen_only_changed_dirs() {
        let tools = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let script = fake_indexer(tools.path(), 0);

        let observer = RecordingObserver::new();
        let mut trigger = InfoRegen::generic().with_command(script.to_string_lossy());

        let pre = MergeContext::new(MergeMode::Install, Hook::PreMerge, root.path(), &observer);
        trigger.trigger(&pre, &mut []).unwrap();

        let info_dir = root.path().join("usr/share/info");
        fs::create_dir_all(&info_dir).unwrap();
        fs::write(info_dir.join("foo.info"), b"info").unwrap();
        fs::write(info_dir.join(".hidden"), b"x").unwrap();
        fs::write(info_dir.join("dir"), b"stale").unwrap();

        let post = MergeContext::new(MergeMode::Install, Hook::PostMerge, root.path(), &observer);
        trigger.trigger(&post, &mut []).unwrap();

        let log = fs::read_to_string(tools.path().join("indexed.log")).unwrap();
        assert_eq!(log.lines().collect::<Vec<_>>(), vec![info_dir.join("foo.info").to_string_lossy().to_string()]);
        assert!(!info_dir.join("dir").exists());
        assert!(observer.warnings().is_empty());

        // Unchanged since the last snapshot: nothing to do
        trigger.trigger(&pre, &mut []).unwrap();
        trigger.trigger(&post, &mut []).unwrap();
        let log = fs::read_to_string(tools.path().join("indexed.log")).unwrap();
        assert_eq!(log.lines().count(), 1);
    }

    #[test]
    fn test_failures_are_warnings() {
        let tools = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let script = fake_indexer(tools.path(), 1);

        let observer = RecordingObserver::new();
        let mut trigger = InfoRegen::generic().with_command(script.to_string_lossy());
        let pre = MergeContext::new(MergeMode::Uninstall, Hook::PreUnmerge, root.path(), &observer);
        trigger.trigger(&pre, &mut []).unwrap();

        let info_dir = root.path().join("usr/share/info");
        fs::create_dir_all(&info_dir).unwrap();
        fs::write(info_dir.join("bar.info"), b"info").unwrap();

        let post = MergeContext::new(MergeMode::Uninstall, Hook::PostUnmerge, root.path(), &observer);
        trigger.trigger(&post, &mut []).unwrap();
        assert_eq!(observer.warnings().len(), 1);
    }

    #[test]
    fn test_replace_regens_once_at_post_unmerge() {
        let tools = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let script = fake_indexer(tools.path(), 0);

        let observer = RecordingObserver::new();
        let mut trigger = InfoRegen::generic().with_command(script.to_string_lossy());
        let ctx = |hook| MergeContext::new(MergeMode::Replace, hook, root.path(), &observer);

        trigger.trigger(&ctx(Hook::PreMerge), &mut []).unwrap();
        let info_dir = root.path().join("usr/share/info");
        fs::create_dir_all(&info_dir).unwrap();
        fs::write(info_dir.join("new.info"), b"info").unwrap();

        // Snapshot taken after the merge must not hide the merged page
        trigger.trigger(&ctx(Hook::PreUnmerge), &mut []).unwrap();
        trigger.trigger(&ctx(Hook::PostUnmerge), &mut []).unwrap();
        trigger.trigger(&ctx(Hook::PostMerge), &mut []).unwrap();

        let log = fs::read_to_string(tools.path().join("indexed.log")).unwrap();
        assert_eq!(log.lines().count(), 1);
    }

    #[test]
    fn test_missing_indexer_is_silent() {
        let root = TempDir::new().unwrap();
        let observer = RecordingObserver::new();
        let mut trigger = InfoRegen::generic().with_command("/nonexistent/install-info");

        let pre = MergeContext::new(MergeMode::Install, Hook::PreMerge, root.path(), &observer);
        trigger.trigger(&pre, &mut []).unwrap();
        fs::create_dir_all(root.path().join("usr/share/info")).unwrap();
        let post = MergeContext::new(MergeMode::Install, Hook::PostMerge, root.path(), &observer);
        trigger.trigger(&post, &mut []).unwrap();
        assert!(observer.messages().is_empty());
    }

    #[test]
    fn test_envd_infopath() {
        let root = TempDir::new().unwrap();
        let envd = envd_dir(root.path());
        fs::create_dir_all(&envd).unwrap();
        fs::write(envd.join("50info"), "INFOPATH=\"/usr/share/gcc-data/info:/opt/info\"\n").unwrap();

        let trigger = InfoRegen::envd();
        assert_eq!(trigger.label(), ENVD_INFO_LABEL);
        assert_eq!(
            trigger.locations(root.path()).unwrap(),
            vec!["/usr/share/gcc-data/info", "/opt/info"]
        );
        assert_eq!(InfoRegen::generic().locations(root.path()).unwrap(), vec!["/usr/share/info"]);
    }
}
