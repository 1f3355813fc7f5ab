// src/merge/mod.rs

//! Hook/trigger orchestration for merge operations
//!
//! A [`MergeEngine`] drives one install, replace or uninstall through the
//! mode's ordered hooks. At each hook the triggers registered for it run in
//! ascending priority (registration order breaks ties), each handed exactly
//! the content sets it declared. A [`BlockModification`] from any trigger
//! stops the operation before anything later runs.
//!
//! [`BlockModification`]: crate::error::BlockModification

pub mod observer;
pub mod trigger;

pub use observer::{MessageLevel, Observer, ObserverMessage, RecordingObserver, TracingObserver};
pub use trigger::{DEFAULT_PRIORITY, RequiredCsets, Trigger};

use crate::error::{Error, Result};
use crate::filesystem::{ContentSet, intersect};
use crate::trigger::{InfoRegen, MergeContents, UnmergeContents};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use strum_macros::{Display, EnumString};
use tracing::{debug, info};

/// Kind of merge operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum MergeMode {
    Install,
    Replace,
    Uninstall,
}

impl MergeMode {
    pub const ALL: &'static [MergeMode] = &[MergeMode::Install, MergeMode::Replace, MergeMode::Uninstall];

    /// Modes that put new content on disk
    pub const INSTALLING: &'static [MergeMode] = &[MergeMode::Install, MergeMode::Replace];

    /// Modes that take old content off disk
    pub const REMOVING: &'static [MergeMode] = &[MergeMode::Uninstall, MergeMode::Replace];

    /// Phase order
    pub fn hooks(&self) -> &'static [Hook] {
        match self {
            MergeMode::Install => &[Hook::SanityCheck, Hook::PreMerge, Hook::Merge, Hook::PostMerge],
            MergeMode::Uninstall => &[
                Hook::SanityCheck,
                Hook::PreUnmerge,
                Hook::Unmerge,
                Hook::PostUnmerge,
            ],
            MergeMode::Replace => &[
                Hook::SanityCheck,
                Hook::PreMerge,
                Hook::Merge,
                Hook::PreUnmerge,
                Hook::Unmerge,
                Hook::PostUnmerge,
                Hook::PostMerge,
            ],
        }
    }

    /// Content sets available to triggers in this mode
    pub fn csets(&self) -> &'static [CsetName] {
        match self {
            MergeMode::Install => &[CsetName::Install, CsetName::InstallExisting, CsetName::NewCset],
            MergeMode::Uninstall => &[CsetName::Uninstall, CsetName::UninstallExisting, CsetName::OldCset],
            MergeMode::Replace => &[
                CsetName::Install,
                CsetName::InstallExisting,
                CsetName::Uninstall,
                CsetName::UninstallExisting,
                CsetName::OldCset,
                CsetName::NewCset,
            ],
        }
    }
}

/// Named phase of a merge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Hook {
    SanityCheck,
    PreMerge,
    Merge,
    PostMerge,
    PreUnmerge,
    Unmerge,
    PostUnmerge,
}

/// Named content sets of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum CsetName {
    /// What will be written
    Install,
    /// Live entries at the paths of `install`
    InstallExisting,
    /// What will be removed
    Uninstall,
    /// Live entries at the paths of `uninstall`
    UninstallExisting,
    /// The previously installed manifest, frozen
    OldCset,
    /// The incoming manifest; shares storage with `install`
    NewCset,
}

impl CsetName {
    /// The set actually holding the entries
    pub fn storage(&self) -> CsetName {
        match self {
            CsetName::NewCset => CsetName::Install,
            other => *other,
        }
    }
}

/// What a trigger sees of the running operation
pub struct MergeContext<'a> {
    pub mode: MergeMode,
    pub hook: Hook,
    pub offset: &'a Path,
    observer: &'a dyn Observer,
}

impl<'a> MergeContext<'a> {
    pub fn new(mode: MergeMode, hook: Hook, offset: &'a Path, observer: &'a dyn Observer) -> Self {
        Self {
            mode,
            hook,
            offset,
            observer,
        }
    }

    pub fn observer(&self) -> &dyn Observer {
        self.observer
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.observer.warn(message.as_ref());
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.observer.info(message.as_ref());
    }
}

struct RegisteredTrigger {
    trigger: Box<dyn Trigger>,
    /// Storage names, in declared order
    csets: Vec<CsetName>,
}

/// Drives one merge operation
pub struct MergeEngine {
    mode: MergeMode,
    offset: PathBuf,
    observer: Box<dyn Observer>,
    triggers: Vec<RegisteredTrigger>,
    hooks: HashMap<Hook, Vec<usize>>,
    csets: HashMap<CsetName, ContentSet>,
}

impl MergeEngine {
    /// Engine with the given sets and no triggers
    ///
    /// `new_cset` entries are ignored; it always aliases `install`.
    pub fn new(
        mode: MergeMode,
        offset: impl Into<PathBuf>,
        csets: impl IntoIterator<Item = (CsetName, ContentSet)>,
        observer: Box<dyn Observer>,
    ) -> Self {
        let csets = csets
            .into_iter()
            .filter(|(name, _)| *name != CsetName::NewCset && mode.csets().contains(name))
            .map(|(name, cset)| (name, cset.with_label(name.to_string())))
            .collect();

        Self {
            mode,
            offset: offset.into(),
            observer,
            triggers: Vec::new(),
            hooks: HashMap::new(),
            csets,
        }
    }

    /// Install `new` under `offset`
    pub fn install(offset: impl Into<PathBuf>, new: ContentSet, observer: Box<dyn Observer>) -> Result<Self> {
        let offset = offset.into();
        let install_existing = intersect(&new, &offset, false)?;
        let mut engine = Self::new(
            MergeMode::Install,
            offset,
            [(CsetName::Install, new), (CsetName::InstallExisting, install_existing)],
            observer,
        );
        engine.register(Box::new(MergeContents))?;
        engine.register(Box::new(InfoRegen::generic()))?;
        Ok(engine)
    }

    /// Remove the installed manifest `old` from under `offset`
    pub fn uninstall(offset: impl Into<PathBuf>, old: ContentSet, observer: Box<dyn Observer>) -> Result<Self> {
        let offset = offset.into();
        let uninstall_existing = intersect(&old, &offset, false)?;
        let mut engine = Self::new(
            MergeMode::Uninstall,
            offset,
            [
                (CsetName::Uninstall, old.thawed()),
                (CsetName::UninstallExisting, uninstall_existing),
                (CsetName::OldCset, old.freeze()),
            ],
            observer,
        );
        engine.register(Box::new(UnmergeContents))?;
        engine.register(Box::new(InfoRegen::generic()))?;
        Ok(engine)
    }

    /// Replace the installed manifest `old` with `new`
    ///
    /// `uninstall` is `old` minus the paths of `new`, fixed at construction.
    pub fn replace(
        offset: impl Into<PathBuf>,
        old: ContentSet,
        new: ContentSet,
        observer: Box<dyn Observer>,
    ) -> Result<Self> {
        let offset = offset.into();
        let install_existing = intersect(&new, &offset, false)?;
        let uninstall = old.difference(new.locations());
        let uninstall_existing = intersect(&uninstall, &offset, false)?;
        let mut engine = Self::new(
            MergeMode::Replace,
            offset,
            [
                (CsetName::Install, new),
                (CsetName::InstallExisting, install_existing),
                (CsetName::Uninstall, uninstall),
                (CsetName::UninstallExisting, uninstall_existing),
                (CsetName::OldCset, old.freeze()),
            ],
            observer,
        );
        engine.register(Box::new(MergeContents))?;
        engine.register(Box::new(UnmergeContents))?;
        engine.register(Box::new(InfoRegen::generic()))?;
        Ok(engine)
    }

    pub fn mode(&self) -> MergeMode {
        self.mode
    }

    pub fn offset(&self) -> &Path {
        &self.offset
    }

    pub fn observer(&self) -> &dyn Observer {
        &*self.observer
    }

    /// A content set by name; `new_cset` resolves to `install`
    pub fn cset(&self, name: CsetName) -> Option<&ContentSet> {
        self.csets.get(&name.storage())
    }

    /// Take ownership of a content set, typically after [`run`](Self::run)
    pub fn take_cset(&mut self, name: CsetName) -> Option<ContentSet> {
        self.csets.remove(&name.storage())
    }

    fn is_applicable(&self, trigger: &dyn Trigger) -> bool {
        trigger.applicable_modes().contains(&self.mode)
            && trigger.hooks().iter().any(|h| self.mode.hooks().contains(h))
    }

    /// Let the trigger set itself up, then attach it
    ///
    /// Returns whether the trigger was attached; triggers that do not apply
    /// to this mode are dropped without calling their `register`.
    pub fn register(&mut self, mut trigger: Box<dyn Trigger>) -> Result<bool> {
        if !self.is_applicable(&*trigger) {
            debug!("Skipping trigger '{}' for {} mode", trigger.label(), self.mode);
            return Ok(false);
        }
        trigger.register(self)?;
        self.add_trigger(trigger)
    }

    /// Attach a trigger to every hook of this mode it names
    ///
    /// Errors if the trigger needs a content set this mode lacks.
    pub fn add_trigger(&mut self, trigger: Box<dyn Trigger>) -> Result<bool> {
        if !self.is_applicable(&*trigger) {
            debug!("Skipping trigger '{}' for {} mode", trigger.label(), self.mode);
            return Ok(false);
        }

        let required = trigger.required_csets().for_mode(self.mode).ok_or_else(|| {
            Error::Config(format!(
                "trigger '{}' declares no content sets for {} mode",
                trigger.label(),
                self.mode
            ))
        })?;

        let mut storage = Vec::with_capacity(required.len());
        for name in required {
            if !self.mode.csets().contains(name) {
                return Err(Error::Config(format!(
                    "trigger '{}' requires content set '{}', unavailable in {} mode",
                    trigger.label(),
                    name,
                    self.mode
                )));
            }
            let actual = name.storage();
            if storage.contains(&actual) {
                return Err(Error::Config(format!(
                    "trigger '{}' requires '{}' more than once (new_cset aliases install)",
                    trigger.label(),
                    actual
                )));
            }
            storage.push(actual);
        }

        let index = self.triggers.len();
        for hook in trigger.hooks() {
            if self.mode.hooks().contains(hook) {
                self.hooks.entry(*hook).or_default().push(index);
            }
        }
        debug!(
            "Registered trigger '{}' (priority {}) on {:?}",
            trigger.label(),
            trigger.priority(),
            trigger.hooks()
        );
        self.triggers.push(RegisteredTrigger {
            trigger,
            csets: storage,
        });
        Ok(true)
    }

    /// Detach triggers matching `predicate` from `hook`; returns how many
    pub fn remove_triggers(&mut self, hook: Hook, predicate: impl Fn(&dyn Trigger) -> bool) -> usize {
        let Some(indices) = self.hooks.get_mut(&hook) else {
            return 0;
        };
        let triggers = &self.triggers;
        let before = indices.len();
        indices.retain(|&i| !predicate(&*triggers[i].trigger));
        before - indices.len()
    }

    /// Labels of the triggers that will run at `hook`, in run order
    pub fn trigger_labels(&self, hook: Hook) -> Vec<String> {
        self.ordered(hook)
            .into_iter()
            .map(|i| self.triggers[i].trigger.label().to_string())
            .collect()
    }

    fn ordered(&self, hook: Hook) -> Vec<usize> {
        let mut order = self.hooks.get(&hook).cloned().unwrap_or_default();
        order.sort_by_key(|&i| self.triggers[i].trigger.priority());
        order
    }

    /// Run every hook of the mode in order
    pub fn run(&mut self) -> Result<()> {
        info!("Starting {} at {}", self.mode, self.offset.display());
        for hook in self.mode.hooks() {
            self.run_hook(*hook)?;
        }
        info!("Finished {} at {}", self.mode, self.offset.display());
        Ok(())
    }

    /// Run the triggers of a single hook
    pub fn run_hook(&mut self, hook: Hook) -> Result<()> {
        let order = self.ordered(hook);
        debug!("Hook {}: {} trigger(s)", hook, order.len());

        let ctx = MergeContext::new(self.mode, hook, &self.offset, &*self.observer);
        for index in order {
            let registered = &mut self.triggers[index];
            debug!("Running trigger '{}' at {}", registered.trigger.label(), hook);

            let mut taken = take_csets(&mut self.csets, &registered.csets)?;
            let result = registered.trigger.trigger(&ctx, &mut taken);
            for (name, cset) in registered.csets.iter().zip(taken) {
                self.csets.insert(*name, cset);
            }
            result?;
        }
        Ok(())
    }
}

fn take_csets(csets: &mut HashMap<CsetName, ContentSet>, names: &[CsetName]) -> Result<Vec<ContentSet>> {
    let mut taken = Vec::with_capacity(names.len());
    for name in names {
        match csets.remove(name) {
            Some(cset) => taken.push(cset),
            None => {
                for (name, cset) in names.iter().zip(taken) {
                    csets.insert(*name, cset);
                }
                return Err(Error::Config(format!("content set '{}' is not available", name)));
            }
        }
    }
    Ok(taken)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BlockModification;
    use crate::filesystem::FsEntry;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<String>>>;

    struct Probe {
        label: String,
        hooks: &'static [Hook],
        priority: i32,
        csets: RequiredCsets,
        modes: &'static [MergeMode],
        log: Log,
        block: bool,
    }

    impl Probe {
        fn new(label: &str, log: &Log) -> Self {
            Self {
                label: label.to_string(),
                hooks: &[Hook::PreMerge],
                priority: DEFAULT_PRIORITY,
                csets: RequiredCsets::NONE,
                modes: MergeMode::ALL,
                log: log.clone(),
                block: false,
            }
        }
    }

    impl Trigger for Probe {
        fn label(&self) -> &str {
            &self.label
        }

        fn hooks(&self) -> &'static [Hook] {
            self.hooks
        }

        fn required_csets(&self) -> RequiredCsets {
            self.csets
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn applicable_modes(&self) -> &'static [MergeMode] {
            self.modes
        }

        fn trigger(&mut self, ctx: &MergeContext<'_>, csets: &mut [ContentSet]) -> Result<()> {
            self.log
                .borrow_mut()
                .push(format!("{}@{}:{}", self.label, ctx.hook, csets.len()));
            if self.block {
                return Err(BlockModification::new(&self.label, "blocked", vec!["/x".into()]).into());
            }
            Ok(())
        }
    }

    fn engine(mode: MergeMode) -> MergeEngine {
        let csets = mode
            .csets()
            .iter()
            .map(|name| (*name, ContentSet::new()))
            .collect::<Vec<_>>();
        MergeEngine::new(mode, "/nonexistent", csets, Box::new(RecordingObserver::new()))
    }

    #[test]
    fn test_phase_order() {
        let log: Log = Default::default();
        let mut engine = engine(MergeMode::Replace);
        for hook in [Hook::PostMerge, Hook::Unmerge, Hook::SanityCheck] {
            let mut probe = Probe::new(&hook.to_string(), &log);
            probe.hooks = match hook {
                Hook::PostMerge => &[Hook::PostMerge],
                Hook::Unmerge => &[Hook::Unmerge],
                _ => &[Hook::SanityCheck],
            };
            engine.register(Box::new(probe)).unwrap();
        }
        engine.run().unwrap();
        assert_eq!(
            *log.borrow(),
            vec!["sanity_check@sanity_check:0", "unmerge@unmerge:0", "post_merge@post_merge:0"]
        );
    }

    #[test]
    fn test_priority_is_stable() {
        let log: Log = Default::default();
        let mut engine = engine(MergeMode::Install);
        for (label, priority) in [("a", 50), ("b", 10), ("c", 50), ("d", 90), ("e", 10)] {
            let mut probe = Probe::new(label, &log);
            probe.priority = priority;
            engine.register(Box::new(probe)).unwrap();
        }
        assert_eq!(engine.trigger_labels(Hook::PreMerge), vec!["b", "e", "a", "c", "d"]);
        engine.run_hook(Hook::PreMerge).unwrap();
        assert_eq!(log.borrow().len(), 5);
    }

    #[test]
    fn test_skips_inapplicable_triggers() {
        let log: Log = Default::default();
        let mut engine = engine(MergeMode::Uninstall);

        let mut wrong_mode = Probe::new("install-only", &log);
        wrong_mode.modes = MergeMode::INSTALLING;
        wrong_mode.hooks = &[Hook::PreUnmerge];
        assert!(!engine.register(Box::new(wrong_mode)).unwrap());

        // pre_merge is not a hook of uninstall
        assert!(!engine.register(Box::new(Probe::new("pre-merge", &log))).unwrap());

        engine.run().unwrap();
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_unavailable_cset_is_config_error() {
        let log: Log = Default::default();
        let mut engine = engine(MergeMode::Install);

        let mut probe = Probe::new("needs-old", &log);
        probe.csets = RequiredCsets::Fixed(&[CsetName::OldCset]);
        assert!(matches!(engine.register(Box::new(probe)), Err(Error::Config(_))));

        let mut probe = Probe::new("no-mapping", &log);
        probe.csets = RequiredCsets::PerMode(&[(MergeMode::Replace, &[CsetName::Install])]);
        assert!(matches!(engine.register(Box::new(probe)), Err(Error::Config(_))));

        let mut probe = Probe::new("alias-twice", &log);
        probe.csets = RequiredCsets::Fixed(&[CsetName::Install, CsetName::NewCset]);
        assert!(matches!(engine.register(Box::new(probe)), Err(Error::Config(_))));
    }

    #[test]
    fn test_block_stops_later_triggers_and_hooks() {
        let log: Log = Default::default();
        let mut engine = engine(MergeMode::Install);

        let mut blocker = Probe::new("blocker", &log);
        blocker.block = true;
        blocker.priority = 10;
        engine.register(Box::new(blocker)).unwrap();
        engine.register(Box::new(Probe::new("later", &log))).unwrap();
        let mut post = Probe::new("post", &log);
        post.hooks = &[Hook::PostMerge];
        engine.register(Box::new(post)).unwrap();

        let err = engine.run().unwrap_err();
        assert!(matches!(err, Error::BlockModification(ref b) if b.trigger == "blocker"));
        assert_eq!(*log.borrow(), vec!["blocker@pre_merge:0"]);
    }

    #[test]
    fn test_csets_returned_after_trigger() {
        struct AddEntry;
        impl Trigger for AddEntry {
            fn label(&self) -> &str {
                "add"
            }
            fn hooks(&self) -> &'static [Hook] {
                &[Hook::PreMerge, Hook::PostMerge]
            }
            fn required_csets(&self) -> RequiredCsets {
                RequiredCsets::Fixed(&[CsetName::NewCset])
            }
            fn trigger(&mut self, ctx: &MergeContext<'_>, csets: &mut [ContentSet]) -> Result<()> {
                let path = format!("/{}", ctx.hook);
                csets[0].add(FsEntry::dir(&path, 0o755)?)?;
                Ok(())
            }
        }

        let mut engine = engine(MergeMode::Install);
        engine.register(Box::new(AddEntry)).unwrap();
        engine.run().unwrap();

        // new_cset writes land in install
        let install = engine.cset(CsetName::Install).unwrap();
        assert!(install.contains("/pre_merge"));
        assert!(install.contains("/post_merge"));
        assert_eq!(install.label(), "install");
    }

    #[test]
    fn test_remove_triggers_by_label() {
        let log: Log = Default::default();
        let mut engine = engine(MergeMode::Install);
        engine.register(Box::new(Probe::new("old", &log))).unwrap();
        engine.register(Box::new(Probe::new("keep", &log))).unwrap();

        assert_eq!(engine.remove_triggers(Hook::PreMerge, |t| t.label() == "old"), 1);
        assert_eq!(engine.remove_triggers(Hook::Unmerge, |_| true), 0);
        assert_eq!(engine.trigger_labels(Hook::PreMerge), vec!["keep"]);
    }
}
