// src/trigger/env_update.rs

//! Regenerate env.d-derived files after contents change

use crate::envd;
use crate::error::Result;
use crate::filesystem::ContentSet;
use crate::merge::{Hook, MergeContext, Trigger};
use tracing::debug;

/// Regenerates `profile.env`, `profile.csh` and `ld.so.conf` from env.d
#[derive(Debug, Default)]
pub struct EnvUpdate;

impl Trigger for EnvUpdate {
    fn label(&self) -> &str {
        "env-update"
    }

    fn hooks(&self) -> &'static [Hook] {
        &[Hook::PostMerge, Hook::PostUnmerge]
    }

    fn priority(&self) -> i32 {
        5
    }

    fn trigger(&mut self, ctx: &MergeContext<'_>, _csets: &mut [ContentSet]) -> Result<()> {
        let env = envd::regenerate(ctx.offset)?;
        debug!("env-update: wrote {} variable(s) under {}", env.len(), ctx.offset.display());
        Ok(())
    }
}
