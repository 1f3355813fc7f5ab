// src/lib.rs

//! Conary Merge Engine
//!
//! Transactional file merging for a package manager: installs, replaces and
//! uninstalls content sets on a live root while a chain of policy triggers
//! checks collisions, protects configuration files, hardens permissions and
//! regenerates env.d derived files.
//!
//! # Architecture
//!
//! - Content sets: immutable-by-convention maps of location to entry
//! - Engine: hook phases per mode, triggers ordered by priority
//! - Triggers: policy units that edit content sets or veto the merge
//! - Live scanning: content sets built from (and compared with) the disk

pub mod config;
pub mod envd;
mod error;
pub mod filesystem;
pub mod hash;
pub mod merge;
pub mod trigger;

pub use config::DomainSettings;
pub use error::{BlockModification, Error, Result, is_missing_target};
pub use filesystem::{ContentSet, FsEntry};
pub use hash::{HashAlgorithm, Hasher};
pub use merge::{CsetName, Hook, MergeContext, MergeEngine, MergeMode, Observer, Trigger};
pub use trigger::generate_triggers;
