// src/merge/trigger.rs

//! The trigger interface

use crate::error::Result;
use crate::filesystem::ContentSet;
use crate::merge::{CsetName, Hook, MergeContext, MergeEngine, MergeMode};

/// Default priority; lower runs first
pub const DEFAULT_PRIORITY: i32 = 50;

/// Content sets a trigger receives, in the order it receives them
#[derive(Debug, Clone, Copy)]
pub enum RequiredCsets {
    /// Same sets in every mode
    Fixed(&'static [CsetName]),
    /// Per-mode sets; a missing mode is a registration error
    PerMode(&'static [(MergeMode, &'static [CsetName])]),
}

impl RequiredCsets {
    pub const NONE: RequiredCsets = RequiredCsets::Fixed(&[]);

    pub fn for_mode(&self, mode: MergeMode) -> Option<&'static [CsetName]> {
        match self {
            RequiredCsets::Fixed(names) => Some(*names),
            RequiredCsets::PerMode(table) => table
                .iter()
                .find(|(m, _)| *m == mode)
                .map(|(_, names)| *names),
        }
    }
}

/// A policy unit run by the [`MergeEngine`] at one or more hooks
///
/// Triggers are constructed once per operation, registered, invoked once
/// per hook they participate in, and dropped with the engine.
pub trait Trigger {
    /// Human readable name, also used to supersede triggers
    fn label(&self) -> &str;

    /// Hooks this trigger attaches to
    fn hooks(&self) -> &'static [Hook];

    fn required_csets(&self) -> RequiredCsets {
        RequiredCsets::NONE
    }

    fn priority(&self) -> i32 {
        DEFAULT_PRIORITY
    }

    fn applicable_modes(&self) -> &'static [MergeMode] {
        MergeMode::ALL
    }

    /// Called by [`MergeEngine::register`] before the trigger is attached
    ///
    /// May add companion triggers or remove previously registered ones.
    fn register(&mut self, engine: &mut MergeEngine) -> Result<()> {
        let _ = engine;
        Ok(())
    }

    /// Run at `ctx.hook`, with the required sets in declared order
    fn trigger(&mut self, ctx: &MergeContext<'_>, csets: &mut [ContentSet]) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_csets_per_mode() {
        let fixed = RequiredCsets::Fixed(&[CsetName::Install]);
        assert_eq!(fixed.for_mode(MergeMode::Uninstall), Some(&[CsetName::Install][..]));

        let per_mode = RequiredCsets::PerMode(&[
            (MergeMode::Install, &[CsetName::InstallExisting]),
            (MergeMode::Replace, &[CsetName::InstallExisting, CsetName::OldCset]),
        ]);
        assert_eq!(per_mode.for_mode(MergeMode::Replace).unwrap().len(), 2);
        assert!(per_mode.for_mode(MergeMode::Uninstall).is_none());
    }
}
