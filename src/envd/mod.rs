// src/envd/mod.rs

//! env.d fragment aggregation
//!
//! `etc/env.d` holds numbered shell fragments (`00basic`, `50python`, ...).
//! They are read in name order and collapsed into one environment: ordinary
//! keys keep their last value, incremental keys (`PATH`, `LDPATH`, ...)
//! accumulate every value. The result feeds `etc/profile.env`,
//! `etc/profile.csh` and `etc/ld.so.conf`.

pub mod parser;

pub use parser::{parse_bash_dict, read_bash_dict};

use crate::error::Result;
use crate::filesystem::atomic::write_atomic;
use crate::filesystem::livefs::listdir_files;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Incrementals joined with `:`
pub const COLON_PARSED: &[&str] = &[
    "ADA_INCLUDE_PATH",
    "ADA_OBJECTS_PATH",
    "INFODIR",
    "INFOPATH",
    "LDPATH",
    "MANPATH",
    "PATH",
    "PRELINK_PATH",
    "PRELINK_PATH_MASK",
    "PYTHONPATH",
    "PKG_CONFIG_PATH",
    "ROOTPATH",
];

/// Keys whose values accumulate across fragments
pub const INCREMENTALS: &[&str] = &[
    "ADA_INCLUDE_PATH",
    "ADA_OBJECTS_PATH",
    "CLASSPATH",
    "CONFIG_PROTECT",
    "CONFIG_PROTECT_MASK",
    "INFODIR",
    "INFOPATH",
    "KDEDIRS",
    "LDPATH",
    "MANPATH",
    "PATH",
    "PRELINK_PATH",
    "PRELINK_PATH_MASK",
    "PYTHONPATH",
    "ROOTPATH",
    "PKG_CONFIG_PATH",
];

pub const LDSO_HEADER: &str = "# automatically generated, edit env.d files instead";
pub const PROFILE_ENV_HEADER: &str = "# autogenerated.  update env.d instead";
pub const PROFILE_CSH_HEADER: &str = "# autogenerated, update env.d instead";

/// Location of the fragment directory under a root
pub fn envd_dir(offset: &Path) -> PathBuf {
    offset.join("etc/env.d")
}

/// Whether a file name is read as a fragment
pub fn is_fragment_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() > 2
        && bytes[0].is_ascii_digit()
        && bytes[1].is_ascii_digit()
        && !name.ends_with(".bak")
        && !name.ends_with('~')
        && !name.starts_with("._cfg")
}

/// A collapsed value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvValue {
    /// Last assignment of an ordinary key
    Single(String),
    /// Split union of an incremental key, in fragment order
    List(Vec<String>),
}

impl EnvValue {
    /// Tokens of the value; a single value is split on whitespace
    pub fn to_list(&self) -> Vec<String> {
        match self {
            EnvValue::Single(s) => s.split_whitespace().map(str::to_string).collect(),
            EnvValue::List(items) => items.clone(),
        }
    }
}

/// Result of [`collapse_envd`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollapsedEnvd {
    pub values: BTreeMap<String, EnvValue>,
    /// Effective incremental keys, built-ins included
    pub incrementals: BTreeSet<String>,
    /// Effective colon-joined keys, built-ins included
    pub colon_parsed: BTreeSet<String>,
}

impl CollapsedEnvd {
    pub fn get(&self, key: &str) -> Option<&EnvValue> {
        self.values.get(key)
    }

    /// Tokens for `key`, empty when unset
    pub fn list(&self, key: &str) -> Vec<String> {
        self.values.get(key).map(EnvValue::to_list).unwrap_or_default()
    }

    pub fn remove(&mut self, key: &str) -> Option<EnvValue> {
        self.values.remove(key)
    }
}

/// Read and collapse every fragment in `dir`
///
/// A missing directory yields an empty environment.
pub fn collapse_envd(dir: &Path) -> Result<CollapsedEnvd> {
    let mut history: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for name in listdir_files(dir)? {
        if !is_fragment_name(&name) {
            continue;
        }
        let vars = read_bash_dict(&dir.join(&name))?;
        debug!("env.d fragment {}: {} assignment(s)", name, vars.len());
        for (key, value) in vars {
            history.entry(key).or_default().push(value);
        }
    }

    let mut incrementals: BTreeSet<String> = INCREMENTALS.iter().map(|s| s.to_string()).collect();
    let mut colon_parsed: BTreeSet<String> = COLON_PARSED.iter().map(|s| s.to_string()).collect();

    for value in history.remove("COLON_SEPARATED").unwrap_or_default() {
        colon_parsed.extend(value.split_whitespace().map(str::to_string));
    }
    incrementals.extend(colon_parsed.iter().cloned());
    for value in history.remove("SPACE_SEPARATED").unwrap_or_default() {
        incrementals.extend(value.split_whitespace().map(str::to_string));
    }

    let values = history
        .into_iter()
        .filter_map(|(key, mut assignments)| {
            let value = if !incrementals.contains(&key) {
                EnvValue::Single(assignments.pop()?)
            } else if colon_parsed.contains(&key) {
                EnvValue::List(split_all(&assignments, |s| s.split(':').map(str::to_string).collect()))
            } else {
                EnvValue::List(split_all(&assignments, |s| {
                    s.split_whitespace().map(str::to_string).collect()
                }))
            };
            Some((key, value))
        })
        .collect();

    Ok(CollapsedEnvd {
        values,
        incrementals,
        colon_parsed,
    })
}

fn split_all(assignments: &[String], split: impl Fn(&str) -> Vec<String>) -> Vec<String> {
    assignments
        .iter()
        .flat_map(|s| split(s.as_str()))
        .filter(|token| !token.is_empty())
        .collect()
}

/// Flatten a collapsed environment into strings
///
/// Incrementals are re-joined with `:` (colon keys) or a space.
pub fn string_collapse_envd(collapsed: &CollapsedEnvd) -> BTreeMap<String, String> {
    collapsed
        .values
        .iter()
        .map(|(key, value)| {
            let joined = match value {
                EnvValue::Single(s) => s.clone(),
                EnvValue::List(items) if collapsed.colon_parsed.contains(key) => items.join(":"),
                EnvValue::List(items) => items.join(" "),
            };
            (key.clone(), joined)
        })
        .collect()
}

/// Atomically rewrite `etc/ld.so.conf` under `offset`
pub fn update_ldso(paths: &[String], offset: &Path) -> Result<()> {
    let mut contents = String::from(LDSO_HEADER);
    contents.push('\n');
    for path in paths {
        contents.push_str(path.trim());
        contents.push('\n');
    }
    write_atomic(&offset.join("etc/ld.so.conf"), contents.as_bytes(), 0o644)
}

/// Atomically write `etc/profile.env`, sorted by key
pub fn write_profile_env(env: &BTreeMap<String, String>, offset: &Path) -> Result<()> {
    let mut contents = format!("{}\n", PROFILE_ENV_HEADER);
    for (key, value) in env {
        contents.push_str(&format!("export {}=\"{}\"\n", key, value));
    }
    write_atomic(&offset.join("etc/profile.env"), contents.as_bytes(), 0o644)
}

/// Atomically write `etc/profile.csh`, sorted by key
pub fn write_profile_csh(env: &BTreeMap<String, String>, offset: &Path) -> Result<()> {
    let mut contents = format!("{}\n", PROFILE_CSH_HEADER);
    for (key, value) in env {
        contents.push_str(&format!("setenv {} \"{}\"\n", key, value));
    }
    write_atomic(&offset.join("etc/profile.csh"), contents.as_bytes(), 0o644)
}

/// Regenerate every env.d-derived file under `offset`
pub fn regenerate(offset: &Path) -> Result<BTreeMap<String, String>> {
    let mut collapsed = collapse_envd(&envd_dir(offset))?;

    if let Some(ldpath) = collapsed.remove("LDPATH") {
        update_ldso(&ldpath.to_list(), offset)?;
    }

    let env = string_collapse_envd(&collapsed);
    write_profile_env(&env, offset)?;
    write_profile_csh(&env, offset)?;
    Ok(env)
}
