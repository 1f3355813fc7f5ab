// tests/common/mod.rs

//! Shared fixtures for merge integration tests.

#![allow(dead_code)]

use conary_merge::filesystem::{ScanOptions, scan};
use conary_merge::merge::{Hook, MergeContext, MergeEngine, RecordingObserver, Trigger};
use conary_merge::{ContentSet, Result};
use std::cell::RefCell;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tempfile::TempDir;

/// Write `contents` at `location` under `root`, creating parents.
pub fn write_file(root: &Path, location: &str, contents: &[u8], mode: u32) -> PathBuf {
    let path = root.join(location.trim_start_matches('/'));
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, contents).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(mode)).unwrap();
    path
}

/// Build a staging image from `(location, contents, mode)` triples.
pub fn stage(files: &[(&str, &[u8], u32)]) -> TempDir {
    let image = tempfile::tempdir().unwrap();
    for (location, contents, mode) in files {
        write_file(image.path(), location, contents, *mode);
    }
    image
}

/// Scan a staged image into a content set keyed by logical location.
pub fn scan_image(image: &Path) -> ContentSet {
    scan(image, ScanOptions::default().with_offset(image)).unwrap()
}

/// Merge `image` into `root` as a fresh install with the given triggers.
pub fn install(
    image: &Path,
    root: &Path,
    triggers: Vec<Box<dyn Trigger>>,
) -> (Result<()>, MergeEngine, RecordingObserver) {
    let observer = RecordingObserver::new();
    let mut engine = MergeEngine::install(root, scan_image(image), Box::new(observer.clone())).unwrap();
    for trigger in triggers {
        engine.register(trigger).unwrap();
    }
    let result = engine.run();
    (result, engine, observer)
}

/// Trigger that appends its label to a shared log whenever it runs.
pub struct Recorder {
    pub label: String,
    pub hooks: &'static [Hook],
    pub priority: i32,
    pub log: Rc<RefCell<Vec<String>>>,
}

impl Recorder {
    pub fn new(label: &str, hooks: &'static [Hook], priority: i32, log: &Rc<RefCell<Vec<String>>>) -> Self {
        Self {
            label: label.to_string(),
            hooks,
            priority,
            log: log.clone(),
        }
    }
}

impl Trigger for Recorder {
    fn label(&self) -> &str {
        &self.label
    }

    fn hooks(&self) -> &'static [Hook] {
        self.hooks
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn trigger(&mut self, ctx: &MergeContext<'_>, _csets: &mut [ContentSet]) -> Result<()> {
        self.log.borrow_mut().push(format!("{}@{}", self.label, ctx.hook));
        Ok(())
    }
}
