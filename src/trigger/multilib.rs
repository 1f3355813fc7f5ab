// src/trigger/multilib.rs

//! Multilib-strict file type enforcement
//!
//! With `FEATURES=multilib-strict`, files of a denied type (typically
//! 64-bit objects) must not land in the strict directories (typically the
//! 32-bit `lib` dirs). File types are described from the ELF header.

use crate::error::{BlockModification, Error, Result};
use crate::filesystem::{ContentSet, FsEntry};
use crate::merge::{CsetName, Hook, MergeContext, MergeMode, RequiredCsets, Trigger};
use goblin::elf::Elf;
use goblin::elf::header::{
    EI_CLASS, EI_DATA, ELFCLASS32, ELFCLASS64, ELFDATA2LSB, ELFDATA2MSB, ET_CORE, ET_DYN, ET_EXEC, ET_REL,
    machine_to_str,
};
use regex::{Regex, RegexBuilder};
use std::io::Read;
use tracing::debug;

use super::expect_csets;

pub const DEFAULT_EXEMPT: &str = "(perl5|gcc|gcc-lib)";

/// ELF header size for 64-bit objects, the larger of the two classes
const ELF_HEADER_LEN: u64 = 64;

/// Describe a file the way `file(1)` summarizes ELF objects
///
/// Anything that is not ELF is `data`.
pub fn describe_file_type(header: &[u8]) -> String {
    let Ok(header) = Elf::parse_header(header) else {
        return "data".to_string();
    };

    let class = match header.e_ident[EI_CLASS] {
        ELFCLASS32 => "32-bit",
        ELFCLASS64 => "64-bit",
        _ => "unknown-class",
    };
    let endian = match header.e_ident[EI_DATA] {
        ELFDATA2LSB => "LSB",
        ELFDATA2MSB => "MSB",
        _ => "unknown-endian",
    };
    let kind = match header.e_type {
        ET_EXEC => "executable",
        ET_DYN => "shared object",
        ET_REL => "relocatable",
        ET_CORE => "core file",
        _ => "object",
    };
    format!("ELF {} {} {}, {}", class, endian, kind, machine_to_str(header.e_machine))
}

fn read_header(entry: &FsEntry) -> Result<Option<Vec<u8>>> {
    let Some(source) = entry.data() else {
        return Ok(None);
    };
    let mut header = Vec::with_capacity(ELF_HEADER_LEN as usize);
    source.open()?.take(ELF_HEADER_LEN).read_to_end(&mut header)?;
    Ok(Some(header))
}

/// Blocks denied file types inside strict directories
pub struct BlockFileType {
    deny: Regex,
    location: Regex,
    exempt: Regex,
}

impl BlockFileType {
    pub fn new(deny_pattern: &str, strict_dirs: &[String], exempt: &str) -> Result<Self> {
        // Absolute or relative, each dir is anchored at `/` exactly once
        let dirs: Vec<&str> = strict_dirs
            .iter()
            .map(|d| d.trim_matches('/'))
            .filter(|d| !d.is_empty())
            .collect();
        if dirs.is_empty() {
            return Err(Error::Config("multilib-strict needs at least one directory".to_string()));
        }

        let location = format!("^/({})/", dirs.join("|"));

        let compile = |pattern: &str, case_insensitive: bool| {
            RegexBuilder::new(pattern)
                .case_insensitive(case_insensitive)
                .build()
                .map_err(|e| Error::Pattern(format!("{}: {}", pattern, e)))
        };

        Ok(Self {
            deny: compile(deny_pattern, true)?,
            location: compile(&location, false)?,
            exempt: compile(&format!("^(?:{})", exempt), false)?,
        })
    }

    /// Whether `location` lies in a strict directory and is not exempt
    pub fn is_restricted(&self, location: &str) -> bool {
        match self.location.find(location) {
            Some(m) => !self.exempt.is_match(&location[m.end()..]),
            None => false,
        }
    }
}

impl Trigger for BlockFileType {
    fn label(&self) -> &str {
        "multilib-strict"
    }

    fn hooks(&self) -> &'static [Hook] {
        &[Hook::PreMerge]
    }

    fn required_csets(&self) -> RequiredCsets {
        RequiredCsets::Fixed(&[CsetName::NewCset])
    }

    fn applicable_modes(&self) -> &'static [MergeMode] {
        MergeMode::INSTALLING
    }

    fn trigger(&mut self, ctx: &MergeContext<'_>, csets: &mut [ContentSet]) -> Result<()> {
        let [cset] = expect_csets::<1>(self.label(), csets)?;

        let mut offenders = Vec::new();
        for entry in cset.iter_files() {
            if !self.is_restricted(entry.location()) {
                continue;
            }
            let Some(header) = read_header(entry)? else { continue };
            let description = describe_file_type(&header);
            debug!("multilib-strict: {} is {}", entry.location(), description);
            if self.deny.is_match(&description) {
                ctx.warn(format!(
                    "multilib-strict: {} is a {} file",
                    entry.location(),
                    description
                ));
                offenders.push(entry.location().to_string());
            }
        }

        if offenders.is_empty() {
            return Ok(());
        }
        let quoted: Vec<String> = offenders.iter().map(|p| format!("'{}'", p)).collect();
        Err(BlockModification::new(
            self.label(),
            format!("denied file type(s) in strict dirs: ( {} )", quoted.join(", ")),
            offenders,
        )
        .into())
    }
}
