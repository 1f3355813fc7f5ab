// src/main.rs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use conary_merge::filesystem::record::{read_record, to_records, write_record};
use conary_merge::filesystem::{ScanOptions, scan};
use conary_merge::merge::{CsetName, MergeEngine, RecordingObserver};
use conary_merge::{ContentSet, DomainSettings, HashAlgorithm, envd, generate_triggers};
use fs2::FileExt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Lock file taken under the target root for the duration of a merge
const LOCK_FILE: &str = ".conary-merge.lock";

/// Checksums carried in installed-contents records
const RECORD_ALGORITHMS: &[HashAlgorithm] = &[HashAlgorithm::Sha256];

#[derive(Parser)]
#[command(name = "conary-merge")]
#[command(author, version, about = "Transactional file merging with config protection", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List the entries of a directory tree
    Scan {
        /// Directory to scan
        path: PathBuf,
        /// Strip this prefix from reported locations (default: the scanned path)
        #[arg(long)]
        offset: Option<PathBuf>,
        /// Describe symlink targets instead of the links
        #[arg(long)]
        follow: bool,
        /// Print an installed-contents record instead of a listing
        #[arg(long)]
        json: bool,
    },
    /// Merge a staged image into a root
    Install {
        /// Staging directory holding the new contents
        #[arg(long)]
        image: PathBuf,
        /// Target root
        #[arg(short, long, default_value = "/")]
        root: PathBuf,
        /// Record of the contents being replaced
        #[arg(long)]
        previous: Option<PathBuf>,
        /// Where to write the record of the merged contents
        #[arg(long)]
        record: Option<PathBuf>,
        /// Domain settings (TOML)
        #[arg(short, long)]
        settings: Option<PathBuf>,
    },
    /// Remove previously merged contents from a root
    Uninstall {
        /// Record of the contents to remove
        #[arg(long)]
        record: PathBuf,
        /// Target root
        #[arg(short, long, default_value = "/")]
        root: PathBuf,
        /// Domain settings (TOML)
        #[arg(short, long)]
        settings: Option<PathBuf>,
    },
    /// Regenerate profile.env, profile.csh and ld.so.conf from env.d
    EnvUpdate {
        /// Target root
        #[arg(short, long, default_value = "/")]
        root: PathBuf,
    },
}

/// Take the merge lock under `root`, retrying with backoff
///
/// Tries: 0ms, 100ms, 200ms, 400ms, 800ms (total ~1.5s wait)
fn acquire_lock(root: &Path) -> Result<File> {
    const MAX_RETRIES: u32 = 5;

    std::fs::create_dir_all(root).with_context(|| format!("Failed to create root {}", root.display()))?;
    let lock_path = root.join(LOCK_FILE);
    let lock_file =
        File::create(&lock_path).with_context(|| format!("Failed to create lock file {}", lock_path.display()))?;

    let mut last_error = None;
    for attempt in 0..MAX_RETRIES {
        match lock_file.try_lock_exclusive() {
            Ok(()) => {
                last_error = None;
                break;
            }
            Err(e) => {
                last_error = Some(e);
                if attempt < MAX_RETRIES - 1 {
                    std::thread::sleep(Duration::from_millis(100 * (1 << attempt)));
                }
            }
        }
    }

    if let Some(e) = last_error {
        anyhow::bail!(
            "Failed to acquire merge lock {} after {} retries. \
             Another merge may be in progress. Error: {}",
            lock_path.display(),
            MAX_RETRIES,
            e
        );
    }
    Ok(lock_file)
}

fn load_settings(path: Option<&Path>) -> Result<DomainSettings> {
    match path {
        Some(path) => DomainSettings::load(path)
            .with_context(|| format!("Failed to load settings from {}", path.display())),
        None => Ok(DomainSettings::default()),
    }
}

/// Register the standard triggers, run every hook and report warnings
fn run_engine(
    mut engine: MergeEngine,
    settings: &DomainSettings,
    image_root: Option<&str>,
    observer: &RecordingObserver,
) -> Result<MergeEngine> {
    for trigger in generate_triggers(settings, image_root)? {
        engine.register(trigger)?;
    }
    engine.run()?;

    let warnings = observer.warnings();
    if !warnings.is_empty() {
        println!("{} warning(s):", warnings.len());
        for warning in &warnings {
            println!("  {}", warning);
        }
    }
    Ok(engine)
}

fn cmd_scan(path: &Path, offset: Option<&Path>, follow: bool, json: bool) -> Result<()> {
    let options = ScanOptions::default()
        .with_offset(offset.unwrap_or(path))
        .follow_symlinks(follow);
    let cset = scan(path, options).with_context(|| format!("Failed to scan {}", path.display()))?;

    if json {
        let records = to_records(&cset, RECORD_ALGORITHMS)?;
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    for entry in cset.iter() {
        let mtime = chrono::DateTime::from_timestamp(entry.mtime(), 0)
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        let suffix = entry.target().map(|t| format!(" -> {}", t)).unwrap_or_default();
        println!(
            "{:<8} {:04o} {:>5}:{:<5} {} {}{}",
            entry.type_name(),
            entry.mode(),
            entry.uid(),
            entry.gid(),
            mtime,
            entry.location(),
            suffix
        );
    }
    Ok(())
}

fn cmd_install(
    image: &Path,
    root: &Path,
    previous: Option<&Path>,
    record: Option<&Path>,
    settings: Option<&Path>,
) -> Result<()> {
    let settings = load_settings(settings)?;
    let image_str = image.to_string_lossy().into_owned();

    let new = scan(image, ScanOptions::default().with_offset(image).checksums(RECORD_ALGORITHMS))
        .with_context(|| format!("Failed to scan image {}", image.display()))?;
    info!("Staged {} entries from {}", new.len(), image.display());

    let _lock = acquire_lock(root)?;
    let observer = RecordingObserver::new();

    let engine = match previous {
        Some(previous) => {
            let old: ContentSet = read_record(previous)
                .with_context(|| format!("Failed to read record {}", previous.display()))?;
            MergeEngine::replace(root, old, new, Box::new(observer.clone()))?
        }
        None => MergeEngine::install(root, new, Box::new(observer.clone()))?,
    };

    let engine = run_engine(engine, &settings, Some(&image_str), &observer)?;

    let installed = engine
        .cset(CsetName::Install)
        .context("install contents missing after merge")?;
    if let Some(record) = record {
        write_record(record, installed, RECORD_ALGORITHMS)
            .with_context(|| format!("Failed to write record {}", record.display()))?;
        info!("Wrote installed-contents record {}", record.display());
    }

    println!("Merged {} entries into {}", installed.len(), root.display());
    Ok(())
}

fn cmd_uninstall(record: &Path, root: &Path, settings: Option<&Path>) -> Result<()> {
    let settings = load_settings(settings)?;
    let old = read_record(record).with_context(|| format!("Failed to read record {}", record.display()))?;

    let _lock = acquire_lock(root)?;
    let observer = RecordingObserver::new();
    let engine = MergeEngine::uninstall(root, old, Box::new(observer.clone()))?;
    let engine = run_engine(engine, &settings, None, &observer)?;

    let removed = engine.cset(CsetName::Uninstall).map(ContentSet::len).unwrap_or(0);
    println!("Unmerged {} entries from {}", removed, root.display());
    Ok(())
}

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Scan {
            path,
            offset,
            follow,
            json,
        }) => cmd_scan(&path, offset.as_deref(), follow, json),
        Some(Commands::Install {
            image,
            root,
            previous,
            record,
            settings,
        }) => cmd_install(&image, &root, previous.as_deref(), record.as_deref(), settings.as_deref()),
        Some(Commands::Uninstall { record, root, settings }) => {
            cmd_uninstall(&record, &root, settings.as_deref())
        }
        Some(Commands::EnvUpdate { root }) => {
            let _lock = acquire_lock(&root)?;
            let env = envd::regenerate(&root)?;
            println!("Regenerated {} variable(s) under {}", env.len(), root.display());
            Ok(())
        }
        None => {
            warn!("No command given");
            println!("conary-merge v{}", env!("CARGO_PKG_VERSION"));
            println!("Run 'conary-merge --help' for usage information");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tempfile::TempDir;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_lock_is_exclusive() {
        let temp_dir = TempDir::new().unwrap();
        let held = acquire_lock(temp_dir.path()).unwrap();

        let other = File::create(temp_dir.path().join(LOCK_FILE)).unwrap();
        assert!(other.try_lock_exclusive().is_err());

        drop(held);
        assert!(other.try_lock_exclusive().is_ok());
    }
}
