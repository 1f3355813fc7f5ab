// src/trigger/prune.rs

//! `INSTALL_MASK` pruning

use crate::error::{Error, Result};
use crate::filesystem::ContentSet;
use crate::merge::{CsetName, Hook, MergeContext, MergeMode, RequiredCsets, Trigger};
use glob::Pattern;

use super::expect_csets;

/// Drops masked entries from the incoming contents before they are written
pub struct PruneFiles {
    patterns: Vec<Pattern>,
}

impl PruneFiles {
    /// One matcher for `mask` itself and one for everything below it
    pub fn new<I, S>(masks: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut patterns = Vec::new();
        for mask in masks {
            let mask = mask.as_ref().trim_end_matches('/');
            if mask.is_empty() {
                continue;
            }
            for pat in [mask.to_string(), format!("{}/*", mask)] {
                let pattern = Pattern::new(&pat)
                    .map_err(|e| Error::Pattern(format!("INSTALL_MASK entry '{}': {}", pat, e)))?;
                patterns.push(pattern);
            }
        }
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn matches(&self, location: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(location))
    }
}

impl Trigger for PruneFiles {
    fn label(&self) -> &str {
        "prune-files"
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

        let pruned: Vec<String> = cset
            .locations()
            .filter(|loc| self.matches(loc))
            .map(str::to_string)
            .collect();
        for location in pruned {
            if let Some(entry) = cset.remove(&location)? {
                ctx.info(format!("pruning: {}", entry));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::FsEntry;
    use crate::merge::RecordingObserver;
    use std::path::Path;

    #[test]
    fn test_masks_dir_and_contents() {
        let mut prune = PruneFiles::new(["/usr/share/doc/", "*.la"]).unwrap();
        assert!(prune.matches("/usr/share/doc"));
        assert!(prune.matches("/usr/share/doc/foo/README"));
        assert!(prune.matches("/usr/lib/libfoo.la"));
        assert!(!prune.matches("/usr/share/docs"));

        let observer = RecordingObserver::new();
        let ctx = MergeContext::new(MergeMode::Install, Hook::PreMerge, Path::new("/"), &observer);
        let mut csets = [ContentSet::from_entries([
            FsEntry::dir("/usr/share/doc", 0o755).unwrap(),
            FsEntry::file_with_data("/usr/share/doc/README", 0o644, b"hi".to_vec()).unwrap(),
            FsEntry::file_with_data("/usr/bin/foo", 0o755, b"elf".to_vec()).unwrap(),
        ])];
        prune.trigger(&ctx, &mut csets).unwrap();

        assert_eq!(csets[0].locations().collect::<Vec<_>>(), vec!["/usr/bin/foo"]);
        assert_eq!(observer.infos().len(), 2);
    }

    #[test]
    fn test_bad_pattern() {
        assert!(matches!(PruneFiles::new(["/usr/[oops"]), Err(Error::Pattern(_))));
        assert!(PruneFiles::new(["", "/"]).unwrap().is_empty());
    }
}
