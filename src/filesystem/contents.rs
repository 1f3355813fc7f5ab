// src/filesystem/contents.rs

//! Content sets: path-keyed collections of filesystem entries
//!
//! A [`ContentSet`] represents either a package manifest or a snapshot of
//! live filesystem state. Membership is by normalized location only; set
//! algebra never looks at content. A set can be frozen, after which every
//! mutation fails with [`Error::FrozenContentSet`].

use crate::error::{Error, Result};
use crate::filesystem::entry::FsEntry;
use crate::filesystem::path::normalize_location;
use std::collections::BTreeMap;
use std::collections::btree_map;

/// Path-keyed collection of entries
#[derive(Debug, Clone, Default)]
pub struct ContentSet {
    entries: BTreeMap<String, FsEntry>,
    frozen: bool,
    label: String,
}

impl ContentSet {
    /// Create an empty, mutable set
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            frozen: false,
            label: "contents".to_string(),
        }
    }

    /// Build a mutable set; later entries win on duplicate locations
    pub fn from_entries(entries: impl IntoIterator<Item = FsEntry>) -> Self {
        let mut set = Self::new();
        for entry in entries {
            set.entries.insert(entry.location().to_string(), entry);
        }
        set
    }

    /// Name used in error messages
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Freeze the set against further mutation
    pub fn freeze(mut self) -> Self {
        self.frozen = true;
        self
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Mutable copy of a (possibly frozen) set
    pub fn thawed(&self) -> Self {
        let mut set = self.clone();
        set.frozen = false;
        set
    }

    fn check_mutable(&self) -> Result<()> {
        if self.frozen {
            return Err(Error::FrozenContentSet(self.label.clone()));
        }
        Ok(())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Membership test; `location` is normalized first
    pub fn contains(&self, location: &str) -> bool {
        self.get(location).is_some()
    }

    /// Look up an entry by location
    pub fn get(&self, location: &str) -> Option<&FsEntry> {
        if let Some(entry) = self.entries.get(location) {
            return Some(entry);
        }
        let normalized = normalize_location(location).ok()?;
        self.entries.get(&normalized)
    }

    /// Insert an entry, replacing any entry at the same location
    pub fn add(&mut self, entry: FsEntry) -> Result<Option<FsEntry>> {
        self.check_mutable()?;
        Ok(self.entries.insert(entry.location().to_string(), entry))
    }

    /// Remove the entry at `location`, returning it
    pub fn remove(&mut self, location: &str) -> Result<Option<FsEntry>> {
        self.check_mutable()?;
        if let Some(entry) = self.entries.remove(location) {
            return Ok(Some(entry));
        }
        match normalize_location(location) {
            Ok(normalized) => Ok(self.entries.remove(&normalized)),
            Err(_) => Ok(None),
        }
    }

    /// Swap in `entry` for the existing entry at its location
    ///
    /// Nothing is inserted when no entry exists at that location.
    pub fn replace(&mut self, entry: FsEntry) -> Result<Option<FsEntry>> {
        self.check_mutable()?;
        match self.entries.get_mut(entry.location()) {
            Some(slot) => Ok(Some(std::mem::replace(slot, entry))),
            None => Ok(None),
        }
    }

    /// Add every entry, replacing same-location entries
    pub fn update(&mut self, entries: impl IntoIterator<Item = FsEntry>) -> Result<()> {
        self.check_mutable()?;
        for entry in entries {
            self.entries.insert(entry.location().to_string(), entry);
        }
        Ok(())
    }

    /// Remove every entry
    pub fn clear(&mut self) -> Result<()> {
        self.check_mutable()?;
        self.entries.clear();
        Ok(())
    }

    /// Entries of `self` whose location is not among `locations`
    pub fn difference<'a>(&self, locations: impl IntoIterator<Item = &'a str>) -> ContentSet {
        let mut result = self.thawed();
        for location in locations {
            result.entries.remove(location);
        }
        result
    }

    /// Entries of `self` whose location is among `locations`
    pub fn intersection<'a>(&self, locations: impl IntoIterator<Item = &'a str>) -> ContentSet {
        let mut result = ContentSet::new().with_label(self.label.clone());
        for location in locations {
            if let Some(entry) = self.entries.get(location) {
                result.entries.insert(location.to_string(), entry.clone());
            }
        }
        result
    }

    /// In-place difference
    pub fn difference_update<'a>(&mut self, locations: impl IntoIterator<Item = &'a str>) -> Result<()> {
        self.check_mutable()?;
        for location in locations {
            self.entries.remove(location);
        }
        Ok(())
    }

    /// Keep only entries matching `keep`
    pub fn retain(&mut self, mut keep: impl FnMut(&FsEntry) -> bool) -> Result<()> {
        self.check_mutable()?;
        self.entries.retain(|_, entry| keep(entry));
        Ok(())
    }

    /// All locations, sorted
    pub fn locations(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// All entries, sorted by location
    pub fn iter(&self) -> btree_map::Values<'_, String, FsEntry> {
        self.entries.values()
    }

    pub fn iter_files(&self) -> impl Iterator<Item = &FsEntry> {
        self.iter().filter(|e| e.is_file())
    }

    pub fn iter_dirs(&self) -> impl Iterator<Item = &FsEntry> {
        self.iter().filter(|e| e.is_dir())
    }

    pub fn iter_symlinks(&self) -> impl Iterator<Item = &FsEntry> {
        self.iter().filter(|e| e.is_symlink())
    }
}

impl FromIterator<FsEntry> for ContentSet {
    fn from_iter<I: IntoIterator<Item = FsEntry>>(iter: I) -> Self {
        ContentSet::from_entries(iter)
    }
}

impl IntoIterator for ContentSet {
    type Item = FsEntry;
    type IntoIter = btree_map::IntoValues<String, FsEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_values()
    }
}

impl<'a> IntoIterator for &'a ContentSet {
    type Item = &'a FsEntry;
    type IntoIter = btree_map::Values<'a, String, FsEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.values()
    }
}
