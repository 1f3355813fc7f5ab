// src/filesystem/record.rs

//! Installed-contents records
//!
//! After a merge, the authoritative `install` set is written out as a JSON
//! record. Reading it back yields a manifest whose files carry the recorded
//! digests but no content source, which is what uninstall and replace
//! operations compare the live filesystem against.

use crate::error::{Error, Result};
use crate::filesystem::atomic::write_atomic;
use crate::filesystem::contents::ContentSet;
use crate::filesystem::entry::{Checksums, DeviceType, EntryKind, FileData, FsEntry};
use crate::hash::{HashAlgorithm, normalize_digest};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// One serialized entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRecord {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub mode: u32,
    #[serde(default)]
    pub uid: u32,
    #[serde(default)]
    pub gid: u32,
    #[serde(default)]
    pub mtime: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub checksums: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub major: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minor: Option<u64>,
}

impl EntryRecord {
    /// Serialize an entry, computing the requested digests for files
    pub fn from_entry(entry: &FsEntry, algorithms: &[HashAlgorithm]) -> Result<Self> {
        let mut record = EntryRecord {
            path: entry.location().to_string(),
            kind: entry.type_name().to_string(),
            mode: entry.mode(),
            uid: entry.uid(),
            gid: entry.gid(),
            mtime: entry.mtime(),
            size: entry.size(),
            checksums: BTreeMap::new(),
            target: None,
            device: None,
            major: None,
            minor: None,
        };

        match entry.kind() {
            EntryKind::File(data) => {
                for algo in algorithms {
                    if let Some(value) = data.checksums.get(*algo)? {
                        record.checksums.insert(algo.name().to_string(), value);
                    }
                }
                // Keep anything already known, even if not requested
                for (algo, value) in data.checksums.cached() {
                    record.checksums.entry(algo.name().to_string()).or_insert(value);
                }
            }
            EntryKind::Symlink { target } => record.target = Some(target.clone()),
            EntryKind::Device { device, major, minor } => {
                record.device = Some(device.to_string());
                record.major = Some(*major);
                record.minor = Some(*minor);
            }
            EntryKind::Dir | EntryKind::Fifo => {}
        }

        Ok(record)
    }

    /// Rebuild the entry this record describes
    pub fn to_entry(&self) -> Result<FsEntry> {
        let kind = match self.kind.as_str() {
            "file" => {
                let mut digests = BTreeMap::new();
                for (name, value) in &self.checksums {
                    let algo: HashAlgorithm = name.parse()?;
                    digests.insert(algo, normalize_digest(algo, value)?);
                }
                EntryKind::File(FileData {
                    size: self.size,
                    checksums: Checksums::recorded(digests),
                })
            }
            "dir" => EntryKind::Dir,
            "sym" => EntryKind::Symlink {
                target: self
                    .target
                    .clone()
                    .ok_or_else(|| Error::InvalidPath(format!("symlink record {} has no target", self.path)))?,
            },
            "fifo" => EntryKind::Fifo,
            "dev" => {
                let device: DeviceType = self
                    .device
                    .as_deref()
                    .unwrap_or("char")
                    .parse()
                    .map_err(|_| Error::InvalidPath(format!("bad device type in record {}", self.path)))?;
                EntryKind::Device {
                    device,
                    major: self.major.unwrap_or(0),
                    minor: self.minor.unwrap_or(0),
                }
            }
            other => {
                return Err(Error::InvalidPath(format!(
                    "unknown entry type '{}' for {}",
                    other, self.path
                )));
            }
        };

        Ok(FsEntry::new(&self.path, self.mode, kind)?
            .with_owner(self.uid, self.gid)
            .with_mtime(self.mtime))
    }
}

/// Serialize a content set, sorted by location
pub fn to_records(cset: &ContentSet, algorithms: &[HashAlgorithm]) -> Result<Vec<EntryRecord>> {
    cset.iter().map(|e| EntryRecord::from_entry(e, algorithms)).collect()
}

/// Rebuild a mutable content set from records
pub fn from_records(records: &[EntryRecord]) -> Result<ContentSet> {
    records.iter().map(EntryRecord::to_entry).collect()
}

/// Atomically write a content set record to `path`
pub fn write_record(path: &Path, cset: &ContentSet, algorithms: &[HashAlgorithm]) -> Result<()> {
    let records = to_records(cset, algorithms)?;
    let mut json = serde_json::to_vec_pretty(&records)?;
    json.push(b'\n');
    write_atomic(path, &json, 0o644)
}

/// Load a content set record
pub fn read_record(path: &Path) -> Result<ContentSet> {
    let data = fs::read(path)?;
    let records: Vec<EntryRecord> = serde_json::from_slice(&data)?;
    from_records(&records)
}
