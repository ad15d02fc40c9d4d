//! Merging per-bundle file lists into one global view.
//!
//! Several installed bundles may declare the same path; consolidation
//! resolves those collisions deterministically so the installer and the
//! remover both act on a single, conflict-free file set.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use itertools::Itertools;

use crate::manifest::{FileRecord, Manifest};

/// Concatenate every manifest's records, sort by path, and resolve
/// same-path collisions: a non-deleted record wins over a deleted one,
/// and ties among non-deleted go to the higher `last_change`. A path
/// deleted in one bundle must not erase a file still provided by
/// another.
pub fn consolidate(manifests: &[Arc<Manifest>]) -> Vec<FileRecord> {
    let sorted = manifests
        .iter()
        .flat_map(|m| m.files.iter())
        .sorted_by(|a, b| a.path.cmp(&b.path));

    let mut result: Vec<FileRecord> = Vec::new();
    for record in sorted {
        match result.last_mut() {
            Some(winner) if winner.path == record.path => {
                if beats(record, winner) {
                    *winner = record.clone();
                }
            }
            _ => result.push(record.clone()),
        }
    }
    result
}

fn beats(challenger: &FileRecord, incumbent: &FileRecord) -> bool {
    match (challenger.is_deleted(), incumbent.is_deleted()) {
        (false, true) => true,
        (true, false) => false,
        _ => challenger.last_change > incumbent.last_change,
    }
}

pub fn filter_out_deleted(records: Vec<FileRecord>) -> Vec<FileRecord> {
    records.into_iter().filter(|r| !r.is_deleted()).collect()
}

/// Records in `desired` that are not already present (by path and hash)
/// in `installed`.
pub fn filter_out_existing(desired: Vec<FileRecord>, installed: &[FileRecord]) -> Vec<FileRecord> {
    let have: HashSet<(&std::path::Path, &crate::digest::Hash)> = installed
        .iter()
        .map(|r| (r.path.as_path(), &r.hash))
        .collect();
    desired
        .into_iter()
        .filter(|r| !have.contains(&(r.path.as_path(), &r.hash)))
        .collect()
}

/// Paths present in the removed set but absent from the kept set. A
/// path counts as kept when any kept record is non-deleted for it.
pub fn files_to_unlink(removed: &[FileRecord], kept: &[FileRecord]) -> Vec<PathBuf> {
    let still_needed: HashSet<&std::path::Path> = kept
        .iter()
        .filter(|r| !r.is_deleted())
        .map(|r| r.path.as_path())
        .collect();

    removed
        .iter()
        .filter(|r| !r.is_deleted())
        .map(|r| r.path.as_path())
        .filter(|p| !still_needed.contains(p))
        .unique()
        .map(PathBuf::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::{hash_bytes, Hash};
    use crate::manifest::{FileFlags, FileKind};
    use std::path::Path;

    fn record(path: &str, kind: FileKind, last_change: u32, seed: &[u8]) -> FileRecord {
        FileRecord {
            path: PathBuf::from(path),
            hash: if kind == FileKind::Deleted {
                Hash::ZERO
            } else {
                hash_bytes(seed)
            },
            kind,
            last_change,
            flags: FileFlags::default(),
        }
    }

    fn bundle(name: &str, files: Vec<FileRecord>) -> Arc<Manifest> {
        Arc::new(Manifest {
            component: name.to_owned(),
            version: 40,
            format: 1,
            files,
            includes: vec![],
            optional: vec![],
            contentsize: 0,
            is_experimental: false,
        })
    }

    #[test]
    fn result_is_path_sorted_and_unique() {
        let a = bundle(
            "a",
            vec![
                record("/usr/bin/z", FileKind::File, 1, b"z"),
                record("/usr/bin/a", FileKind::File, 1, b"a"),
            ],
        );
        let b = bundle("b", vec![record("/usr/bin/m", FileKind::File, 1, b"m")]);

        let merged = consolidate(&[a, b]);
        let paths: Vec<_> = merged.iter().map(|r| r.path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/usr/bin/a"),
                PathBuf::from("/usr/bin/m"),
                PathBuf::from("/usr/bin/z"),
            ]
        );
    }

    #[test]
    fn live_record_beats_deleted() {
        let provider = bundle("a", vec![record("/usr/bin/ed", FileKind::File, 5, b"ed")]);
        let deleter = bundle("b", vec![record("/usr/bin/ed", FileKind::Deleted, 9, b"")]);

        // Order of the inputs must not matter.
        for pair in [
            vec![provider.clone(), deleter.clone()],
            vec![deleter, provider],
        ] {
            let merged = consolidate(&pair);
            assert_eq!(merged.len(), 1);
            assert_eq!(merged[0].kind, FileKind::File);
        }
    }

    #[test]
    fn newer_record_beats_older() {
        let old = bundle("a", vec![record("/usr/bin/ed", FileKind::File, 5, b"old")]);
        let new = bundle("b", vec![record("/usr/bin/ed", FileKind::File, 9, b"new")]);

        let merged = consolidate(&[old, new]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].last_change, 9);
        assert_eq!(merged[0].hash, hash_bytes(b"new"));
    }

    #[test]
    fn filter_out_existing_matches_on_path_and_hash() {
        let desired = vec![
            record("/usr/bin/same", FileKind::File, 1, b"same"),
            record("/usr/bin/changed", FileKind::File, 2, b"new content"),
        ];
        let installed = vec![
            record("/usr/bin/same", FileKind::File, 1, b"same"),
            record("/usr/bin/changed", FileKind::File, 1, b"old content"),
        ];

        let needed = filter_out_existing(desired, &installed);
        assert_eq!(needed.len(), 1);
        assert_eq!(needed[0].path, Path::new("/usr/bin/changed"));
    }

    #[test]
    fn unlink_spares_shared_paths() {
        let removed = vec![
            record("/usr/bin/only-mine", FileKind::File, 1, b"mine"),
            record("/usr/share/common", FileKind::File, 1, b"shared"),
            record("/usr/bin/long-gone", FileKind::Deleted, 1, b""),
        ];
        let kept = vec![
            record("/usr/share/common", FileKind::File, 1, b"shared"),
            record("/usr/bin/tombstone", FileKind::Deleted, 1, b""),
        ];

        let unlink = files_to_unlink(&removed, &kept);
        assert_eq!(unlink, vec![PathBuf::from("/usr/bin/only-mine")]);
    }

    #[test]
    fn deleted_kept_record_does_not_protect_a_path() {
        let removed = vec![record("/usr/bin/ed", FileKind::File, 1, b"ed")];
        let kept = vec![record("/usr/bin/ed", FileKind::Deleted, 2, b"")];

        let unlink = files_to_unlink(&removed, &kept);
        assert_eq!(unlink, vec![PathBuf::from("/usr/bin/ed")]);
    }
}
