// src/trigger/mod.rs

//! Standard merge triggers
//!
//! Each trigger is a small policy unit attached to one or more merge hooks:
//!
//! - `collision`: refuse to overwrite files the operation does not own
//! - `protect`: divert updates of protected config files to `._cfgNNNN_` names
//! - `perms`: strip group/other read from setuid/setgid files
//! - `symlinks`: re-anchor symlinks that point into the staging image
//! - `prune`: drop `INSTALL_MASK` matches before they are written
//! - `multilib`: block denied ELF types in multilib-strict directories
//! - `env_update`: regenerate profile.env, profile.csh and ld.so.conf
//! - `info`: rebuild GNU info `dir` indexes
//! - `contents`: write and remove the actual filesystem entries
//!
//! [`generate_triggers`] builds the per-operation set from [`DomainSettings`].

pub mod collision;
pub mod contents;
pub mod env_update;
pub mod info;
pub mod multilib;
pub mod perms;
pub mod protect;
pub mod prune;
pub mod symlinks;

pub use collision::CollisionProtect;
pub use contents::{MergeContents, UnmergeContents};
pub use env_update::EnvUpdate;
pub use info::{ENVD_INFO_LABEL, GENERIC_INFO_LABEL, InfoRegen};
pub use multilib::BlockFileType;
pub use perms::SfPerms;
pub use protect::{ConfigProtectInstall, ConfigProtectInstallRestore, ConfigProtectUninstall, ProtectFilter};
pub use prune::PruneFiles;
pub use symlinks::FixImageSymlinks;

use crate::config::DomainSettings;
use crate::error::{Error, Result};
use crate::filesystem::ContentSet;
use crate::merge::Trigger;
use tracing::debug;

/// Directories dropped by the `noman`, `noinfo` and `nodoc` features
const DOC_FEATURES: &[(&str, &str)] = &[
    ("noman", "/usr/share/man"),
    ("noinfo", "/usr/share/info"),
    ("nodoc", "/usr/share/doc"),
];

/// View the sets handed to a trigger as a fixed-size array
pub(crate) fn expect_csets<'a, const N: usize>(
    label: &str,
    csets: &'a mut [ContentSet],
) -> Result<&'a mut [ContentSet; N]> {
    let found = csets.len();
    csets.try_into().map_err(|_| {
        Error::Config(format!(
            "{}: expected {} content set(s), got {}",
            label, N, found
        ))
    })
}

/// Build the standard triggers for one operation
///
/// `image_root` is the staging directory of an install, if any.
pub fn generate_triggers(settings: &DomainSettings, image_root: Option<&str>) -> Result<Vec<Box<dyn Trigger>>> {
    let mut triggers: Vec<Box<dyn Trigger>> = vec![
        Box::new(EnvUpdate),
        Box::new(ConfigProtectInstall::new(
            settings.config_protect.clone(),
            settings.config_protect_mask.clone(),
        )),
        Box::new(ConfigProtectUninstall::new(
            settings.config_protect.clone(),
            settings.config_protect_mask.clone(),
        )),
    ];

    if settings.has_feature("collision-protect") {
        triggers.push(Box::new(CollisionProtect::new(
            settings.config_protect.clone(),
            settings.config_protect_mask.clone(),
        )));
    }

    if settings.has_feature("multilib-strict")
        && !settings.multilib_strict_dirs.is_empty()
        && let Some(deny) = settings.multilib_strict_deny.as_deref()
    {
        let exempt = settings
            .multilib_exempt_pattern()
            .unwrap_or_else(|| multilib::DEFAULT_EXEMPT.to_string());
        triggers.push(Box::new(BlockFileType::new(
            deny,
            &settings.multilib_strict_dirs,
            &exempt,
        )?));
    }

    if settings.has_feature("sfperms") {
        triggers.push(Box::new(SfPerms));
    }

    if let Some(image_root) = image_root {
        triggers.push(Box::new(FixImageSymlinks::new(image_root)));
    }

    let mut masks = settings.install_mask.clone();
    for (feature, dir) in DOC_FEATURES {
        if settings.has_feature(feature) {
            masks.push(dir.to_string());
        }
    }
    let prune = PruneFiles::new(&masks)?;
    if !prune.is_empty() {
        triggers.push(Box::new(prune));
    }

    triggers.push(Box::new(InfoRegen::envd()));

    debug!(
        "Generated triggers: {}",
        triggers.iter().map(|t| t.label()).collect::<Vec<_>>().join(", ")
    );
    Ok(triggers)
}
