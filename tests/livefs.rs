// tests/livefs.rs

//! Live filesystem scanning and content comparison against real trees.

mod common;

use common::{stage, write_file};
use conary_merge::filesystem::livefs::gen_entry;
use conary_merge::filesystem::{ScanOptions, intersect, scan};
use conary_merge::trigger::protect::simple_chksum_compare;
use conary_merge::{ContentSet, FsEntry, HashAlgorithm};
use std::collections::BTreeSet;
use std::os::unix::fs::symlink;
use tempfile::TempDir;
use walkdir::WalkDir;

fn live(root: &std::path::Path, location: &str) -> FsEntry {
    gen_entry(location, &root.join(location.trim_start_matches('/')), false, HashAlgorithm::ALL).unwrap()
}

#[test]
fn test_scan_matches_walkdir() {
    let image = stage(&[
        ("/usr/bin/a", b"a", 0o755),
        ("/usr/share/doc/pkg/README", b"readme", 0o644),
        ("/etc/pkg.conf", b"conf", 0o644),
    ]);
    std::fs::create_dir_all(image.path().join("var/empty")).unwrap();
    symlink("a", image.path().join("usr/bin/b")).unwrap();
    // A link to a directory is reported, never descended into
    symlink("/usr/share", image.path().join("usr/shared")).unwrap();

    let cset = scan(image.path(), ScanOptions::default().with_offset(image.path())).unwrap();
    let scanned: BTreeSet<String> = cset.locations().map(str::to_string).collect();

    let walked: BTreeSet<String> = WalkDir::new(image.path())
        .min_depth(1)
        .into_iter()
        .map(|e| {
            let e = e.unwrap();
            format!("/{}", e.path().strip_prefix(image.path()).unwrap().display())
        })
        .collect();

    assert_eq!(scanned, walked);
    assert!(cset.get("/usr/bin/b").unwrap().is_symlink());
    assert!(cset.get("/usr/shared").unwrap().is_symlink());
    assert!(cset.get("/var/empty").unwrap().is_dir());
    assert_eq!(cset.get("/usr/bin/a").unwrap().mode() & 0o7777, 0o755);
}

#[test]
fn test_scan_without_offset_keeps_full_paths() {
    let image = stage(&[("/x", b"x", 0o644)]);
    let cset = scan(image.path(), ScanOptions::default()).unwrap();

    let root_location = image.path().to_string_lossy().into_owned();
    assert!(cset.contains(&root_location));
    assert!(cset.contains(&format!("{}/x", root_location)));
}

#[test]
fn test_intersect_only_existing() {
    let root = TempDir::new().unwrap();
    write_file(root.path(), "/usr/bin/present", b"p", 0o755);

    let wanted = ContentSet::from_entries([
        FsEntry::file_with_data("/usr/bin/present", 0o755, b"new".to_vec()).unwrap(),
        FsEntry::file_with_data("/usr/bin/absent", 0o755, b"new".to_vec()).unwrap(),
        // Parent is a file: ENOTDIR is "absent" too
        FsEntry::file_with_data("/usr/bin/present/child", 0o644, b"new".to_vec()).unwrap(),
    ]);
    let found = intersect(&wanted, root.path(), false).unwrap();

    assert_eq!(found.locations().collect::<Vec<_>>(), vec!["/usr/bin/present"]);
    assert_eq!(found.get("/usr/bin/present").unwrap().size(), Some(1));
}

#[test]
fn test_chksum_compare_live_files() {
    let root = TempDir::new().unwrap();
    write_file(root.path(), "/a", b"same bytes", 0o644);
    write_file(root.path(), "/b", b"same bytes", 0o600);
    write_file(root.path(), "/c", b"diff bytes", 0o644);
    write_file(root.path(), "/d", b"longer than the rest", 0o644);
    std::fs::create_dir(root.path().join("e")).unwrap();

    let (a, b, c, d, e) = (
        live(root.path(), "/a"),
        live(root.path(), "/b"),
        live(root.path(), "/c"),
        live(root.path(), "/d"),
        live(root.path(), "/e"),
    );

    // Mode is not content
    assert!(simple_chksum_compare(&a, &b).unwrap());
    assert!(simple_chksum_compare(&b, &a).unwrap());
    assert!(!simple_chksum_compare(&a, &c).unwrap());
    assert!(!simple_chksum_compare(&a, &d).unwrap());
    assert!(!simple_chksum_compare(&a, &e).unwrap());
    assert!(!simple_chksum_compare(&e, &e).unwrap());

    // In-memory content against the live file
    let staged = FsEntry::file_with_data("/a", 0o644, b"same bytes".to_vec()).unwrap();
    assert!(simple_chksum_compare(&staged, &a).unwrap());
}
