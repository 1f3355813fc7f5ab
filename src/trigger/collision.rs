// src/trigger/collision.rs

//! Refuse to overwrite files no package owns

use crate::error::{BlockModification, Result};
use crate::filesystem::ContentSet;
use crate::merge::{CsetName, Hook, MergeContext, MergeMode, RequiredCsets, Trigger};

use super::protect::gen_config_protect_filter;

/// Blocks installs that would clobber unowned, unprotected files
pub struct CollisionProtect {
    extra_protects: Vec<String>,
    extra_disables: Vec<String>,
}

impl CollisionProtect {
    pub fn new(extra_protects: Vec<String>, extra_disables: Vec<String>) -> Self {
        Self {
            extra_protects,
            extra_disables,
        }
    }
}

impl Trigger for CollisionProtect {
    fn label(&self) -> &str {
        "collision-protect"
    }

    fn hooks(&self) -> &'static [Hook] {
        &[Hook::SanityCheck]
    }

    fn required_csets(&self) -> RequiredCsets {
        RequiredCsets::PerMode(&[
            (MergeMode::Install, &[CsetName::Install, CsetName::InstallExisting]),
            (
                MergeMode::Replace,
                &[CsetName::Install, CsetName::InstallExisting, CsetName::OldCset],
            ),
        ])
    }

    fn applicable_modes(&self) -> &'static [MergeMode] {
        MergeMode::INSTALLING
    }

    fn trigger(&mut self, ctx: &MergeContext<'_>, csets: &mut [ContentSet]) -> Result<()> {
        let count = csets.len();
        let (install, existing, old) = match csets {
            [install, existing] => (install, existing, None),
            [install, existing, old] => (install, existing, Some(&*old)),
            _ => {
                return Err(crate::Error::Config(format!(
                    "trigger '{}' expected 2 or 3 content sets, got {}",
                    self.label(),
                    count
                )));
            }
        };
        if existing.is_empty() {
            return Ok(());
        }

        let colliding = existing.difference(install.iter_dirs().map(|e| e.location()));
        let filter = gen_config_protect_filter(ctx.offset, &self.extra_protects, &self.extra_disables)?;

        let paths: Vec<String> = colliding
            .locations()
            .filter(|loc| !loc.ends_with(".keep") && !filter.matches(loc))
            .filter(|loc| old.is_none_or(|old| !old.contains(loc)))
            .map(str::to_string)
            .collect();

        if paths.is_empty() {
            return Ok(());
        }

        let quoted: Vec<String> = paths.iter().map(|p| format!("'{}'", p)).collect();
        Err(BlockModification::new(
            self.label(),
            format!("file(s) already exist: ( {} )", quoted.join(", ")),
            paths,
        )
        .into())
    }
}
