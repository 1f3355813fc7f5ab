// src/filesystem/mod.rs

//! Filesystem layer for the merge engine
//!
//! This module provides:
//! - The entry model ([`FsEntry`]) with lazily computed checksums
//! - [`ContentSet`], the path-keyed collection triggers operate on
//! - The live scanner that turns on-disk state into entries
//! - Deployment of entries onto a target root, and contents records

pub mod atomic;
pub mod contents;
pub mod deployer;
pub mod entry;
pub mod livefs;
pub mod path;
pub mod record;

pub use contents::ContentSet;
pub use deployer::FileDeployer;
pub use entry::{Checksums, ContentSource, DeviceType, EntryKind, FileData, FsEntry};
pub use livefs::{ScanOptions, gen_entry, intersect, iter_scan, scan};
