// src/trigger/symlinks.rs

//! Symlinks that point into the staging image

use crate::error::Result;
use crate::filesystem::ContentSet;
use crate::merge::{CsetName, Hook, MergeContext, RequiredCsets, Trigger};

use super::expect_csets;

/// Re-anchors symlinks that point into the staging image at `/`
///
/// A build that creates `ln -s ${D}/usr/lib/foo` leaves an absolute target
/// under the image root; once merged, that target would dangle.
pub struct FixImageSymlinks {
    image_root: String,
}

impl FixImageSymlinks {
    pub fn new(image_root: impl Into<String>) -> Self {
        Self {
            image_root: image_root.into(),
        }
    }

    /// Image root with exactly one trailing `/`
    fn prefix(&self) -> String {
        format!("{}/", self.image_root.trim_end_matches('/'))
    }
}

impl Trigger for FixImageSymlinks {
    fn label(&self) -> &str {
        "fix-image-symlinks"
    }

    fn hooks(&self) -> &'static [Hook] {
        &[Hook::PreMerge]
    }

    fn required_csets(&self) -> RequiredCsets {
        RequiredCsets::Fixed(&[CsetName::NewCset])
    }

    fn trigger(&mut self, ctx: &MergeContext<'_>, csets: &mut [ContentSet]) -> Result<()> {
        let [cset] = expect_csets::<1>(self.label(), csets)?;
        let prefix = self.prefix();

        let mut fixed = Vec::new();
        for link in cset.iter_symlinks() {
            let Some(target) = link.target() else { continue };
            let Some(rest) = target.strip_prefix(&prefix) else { continue };
            ctx.warn(format!(
                "correcting {} sym pointing into $D: {}",
                link.location(),
                target
            ));
            fixed.push(link.with_target(format!("/{}", rest)));
        }

        cset.update(fixed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::FsEntry;
    use crate::merge::{MergeMode, RecordingObserver};
    use std::path::Path;

    #[test]
    fn test_targets_reanchored() {
        let observer = RecordingObserver::new();
        let ctx = MergeContext::new(MergeMode::Install, Hook::PreMerge, Path::new("/"), &observer);
        let mut csets = [ContentSet::from_entries([
            FsEntry::symlink("/usr/lib/libfoo.so", "/var/tmp/image/usr/lib/libfoo.so.1").unwrap(),
            FsEntry::symlink("/usr/bin/vi", "vim").unwrap(),
            FsEntry::symlink("/usr/bin/ex", "/var/tmp/image-other/usr/bin/vim").unwrap(),
        ])];

        FixImageSymlinks::new("/var/tmp/image//").trigger(&ctx, &mut csets).unwrap();

        let [cset] = csets;
        assert_eq!(cset.get("/usr/lib/libfoo.so").unwrap().target(), Some("/usr/lib/libfoo.so.1"));
        assert_eq!(cset.get("/usr/bin/vi").unwrap().target(), Some("vim"));
        assert_eq!(
            cset.get("/usr/bin/ex").unwrap().target(),
            Some("/var/tmp/image-other/usr/bin/vim")
        );
        assert_eq!(
            observer.warnings(),
            vec!["correcting /usr/lib/libfoo.so sym pointing into $D: /var/tmp/image/usr/lib/libfoo.so.1"]
        );
    }
}
