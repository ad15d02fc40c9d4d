//! The two-phase staged installer.
//!
//! Phase A places every piece of new content next to its final
//! destination (a `.update` sidecar for files and symlinks, the real
//! name for directories). Phase B renames the sidecars into place, one
//! atomic rename per path. The only window in which a partial system is
//! visible is the rename loop itself; a crash between the phases leaves
//! sidecars behind that the next run overwrites.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use tracing::{debug, warn};

use crate::context::Context;
use crate::digest;
use crate::errors::ClearupError;
use crate::manifest::{FileKind, FileRecord};
use crate::utils::{self, raw};

pub struct StagedInstaller<'a> {
    cx: &'a Context,
    /// Consolidated view of every loaded manifest, keyed by path. Used
    /// to recover the real record behind entries synthesized during
    /// path repair.
    view: BTreeMap<PathBuf, FileRecord>,
}

/// Sidecar name content is staged under before the commit rename.
pub(crate) fn sidecar_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(".update");
    PathBuf::from(name)
}

impl<'a> StagedInstaller<'a> {
    pub fn new(cx: &'a Context, consolidated_view: Vec<FileRecord>) -> Self {
        Self {
            cx,
            view: consolidated_view
                .into_iter()
                .map(|r| (r.path.clone(), r))
                .collect(),
        }
    }

    /// Verify whatever already sits in the staging area for this plan.
    /// Content that does not hash to its name is unlinked so the
    /// fetcher downloads it again. Returns how many blobs were evicted.
    pub fn preflight(&self, plan: &[FileRecord]) -> Result<usize> {
        let mut evicted = 0;
        for record in plan {
            if !matches!(record.kind, FileKind::File | FileKind::Symlink)
                || !record.is_installable()
                || record.hash.is_zero()
            {
                continue;
            }
            let staged = self.cx.staged_file(&record.hash);
            if !raw::path_exists(&staged) {
                continue;
            }
            if !digest::verify(&staged, &record.hash)? {
                warn!("staged content {} is corrupt, evicting", record.hash);
                utils::remove_file(&staged)?;
                evicted += 1;
            }
        }
        Ok(evicted)
    }

    /// Phase A: stage every installable record, in manifest order.
    /// Ancestor directories materialized out of band are appended to
    /// `plan` as zero-hash records so Phase B sees them too.
    pub fn stage(&self, plan: &mut Vec<FileRecord>) -> Result<()> {
        let mut synthesized: Vec<FileRecord> = Vec::new();
        for record in plan.iter() {
            if !record.is_installable() {
                continue;
            }
            self.repair_path(&record.path, &mut synthesized)?;
            self.stage_one(record)
                .with_context(|| format!("could not stage '{}'", record.path.display()))?;
        }

        synthesized.retain(|s| !plan.iter().any(|r| r.path == s.path));
        plan.extend(synthesized);
        Ok(())
    }

    /// Phase B: commit each sidecar to its final name, then sync.
    pub fn rename_into_place(&self, plan: &[FileRecord]) -> Result<()> {
        for record in plan {
            // A record synthesized by path repair carries no staging
            // metadata; the consolidated view holds the real one.
            let real = if record.hash.is_zero() && !record.is_deleted() {
                self.view.get(&record.path).unwrap_or(record)
            } else {
                record
            };
            if !real.is_installable() || real.kind == FileKind::Directory {
                continue;
            }

            let target = self.cx.target_path(&real.path);
            let sidecar = sidecar_path(&target);
            if !raw::path_exists(&sidecar) {
                // Nothing was staged for this path in this run.
                debug!("no sidecar for '{}', skipping", real.path.display());
                continue;
            }
            // rename(2) replaces an existing target atomically; type
            // changes were already cleared during staging.
            utils::rename(&sidecar, &target)?;
        }

        #[cfg(unix)]
        unsafe {
            libc::sync();
        }
        Ok(())
    }

    /// Materialize missing ancestors of `record_path` in the target
    /// tree, recovering each one's identity from the consolidated view
    /// when it is known there.
    fn repair_path(&self, record_path: &Path, synthesized: &mut Vec<FileRecord>) -> Result<()> {
        let ancestors: Vec<&Path> = record_path
            .ancestors()
            .skip(1)
            .filter(|p| p.parent().is_some())
            .collect();
        for ancestor in ancestors.into_iter().rev() {
            let target = self.cx.target_path(ancestor);
            if raw::path_exists(&target) {
                continue;
            }
            if !self.view.contains_key(ancestor) {
                debug!(
                    "ancestor '{}' is not in any manifest, creating bare",
                    ancestor.display()
                );
            }
            fs::create_dir_all(&target).with_context(|| ClearupError::CreatingDirectory {
                name: "target",
                path: target.clone(),
            })?;
            synthesized.push(FileRecord {
                path: ancestor.to_path_buf(),
                hash: digest::Hash::ZERO,
                kind: FileKind::Directory,
                last_change: 0,
                flags: Default::default(),
            });
        }
        Ok(())
    }

    fn stage_one(&self, record: &FileRecord) -> Result<()> {
        let target = self.cx.target_path(&record.path);

        // A path changing kind (file became directory, ...) cannot be
        // renamed over; clear it up front.
        if let Ok(meta) = fs::symlink_metadata(&target) {
            let same_kind = match record.kind {
                FileKind::File => meta.is_file(),
                FileKind::Directory => meta.is_dir(),
                FileKind::Symlink => meta.file_type().is_symlink(),
                _ => true,
            };
            if !same_kind {
                raw::remove_any(&target).with_context(|| ClearupError::CouldntRemoveFile {
                    path: target.clone(),
                })?;
            }
        }

        match record.kind {
            FileKind::Directory => match fs::create_dir(&target) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
                Err(e) => Err(e).with_context(|| ClearupError::CreatingDirectory {
                    name: "target",
                    path: target,
                }),
            },
            FileKind::File => {
                let staged = self.staged_content(record)?;
                utils::copy_file("staged content", &staged, &sidecar_path(&target))
            }
            FileKind::Symlink => {
                let staged = self.staged_content(record)?;
                let bytes = utils::read_bytes("staged link", &staged)?;
                let link_target = String::from_utf8(bytes)
                    .map_err(|_| ClearupError::MissingStagedFile(record.hash.to_string()))?;
                let sidecar = sidecar_path(&target);
                raw::remove_any(&sidecar).ok();
                raw::symlink_file(Path::new(&link_target), &sidecar).with_context(|| {
                    ClearupError::WritingFile {
                        name: "symlink",
                        path: sidecar,
                    }
                })
            }
            FileKind::Deleted | FileKind::Manifest => Ok(()),
        }
    }

    fn staged_content(&self, record: &FileRecord) -> Result<PathBuf> {
        let staged = self.cx.staged_file(&record.hash);
        if !raw::path_exists(&staged) {
            return Err(ClearupError::MissingStagedFile(record.hash.to_string()).into());
        }
        Ok(staged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::hash_bytes;
    use crate::manifest::FileFlags;
    use crate::test::test_context;

    fn stage_blob(cx: &Context, contents: &[u8]) -> digest::Hash {
        let hash = hash_bytes(contents);
        fs::create_dir_all(cx.staged_dir()).unwrap();
        fs::write(cx.staged_file(&hash), contents).unwrap();
        hash
    }

    fn file_record(path: &str, hash: digest::Hash) -> FileRecord {
        FileRecord {
            path: PathBuf::from(path),
            hash,
            kind: FileKind::File,
            last_change: 10,
            flags: FileFlags::default(),
        }
    }

    #[test]
    fn stage_then_rename_materializes_the_plan() {
        let tmp = tempfile::tempdir().unwrap();
        let cx = test_context(tmp.path(), 10);

        let content_hash = stage_blob(&cx, b"ed 1.0");
        let link_hash = stage_blob(&cx, b"/usr/bin/ed");
        let mut plan = vec![
            FileRecord {
                path: PathBuf::from("/usr/bin"),
                hash: hash_bytes(b"dir"),
                kind: FileKind::Directory,
                last_change: 10,
                flags: FileFlags::default(),
            },
            file_record("/usr/bin/ed", content_hash),
            FileRecord {
                path: PathBuf::from("/usr/bin/red"),
                hash: link_hash,
                kind: FileKind::Symlink,
                last_change: 10,
                flags: FileFlags::default(),
            },
        ];

        let installer = StagedInstaller::new(&cx, plan.clone());
        installer.stage(&mut plan).unwrap();

        // Nothing committed yet: sidecars only.
        let target = cx.target_path(Path::new("/usr/bin/ed"));
        assert!(!target.exists());
        assert!(sidecar_path(&target).exists());

        installer.rename_into_place(&plan).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"ed 1.0");
        assert!(!sidecar_path(&target).exists());
        let link = cx.target_path(Path::new("/usr/bin/red"));
        assert_eq!(fs::read_link(&link).unwrap(), PathBuf::from("/usr/bin/ed"));
    }

    #[test]
    fn type_change_replaces_the_old_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let cx = test_context(tmp.path(), 10);

        // The target path currently is a directory; the plan says file.
        let target = cx.target_path(Path::new("/usr/lib/peculiar"));
        fs::create_dir_all(&target).unwrap();

        let hash = stage_blob(&cx, b"now a file");
        let mut plan = vec![file_record("/usr/lib/peculiar", hash)];
        let installer = StagedInstaller::new(&cx, plan.clone());
        installer.stage(&mut plan).unwrap();
        installer.rename_into_place(&plan).unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"now a file");
    }

    #[test]
    fn preflight_evicts_corrupt_staged_content() {
        let tmp = tempfile::tempdir().unwrap();
        let cx = test_context(tmp.path(), 10);

        let hash = hash_bytes(b"the real content");
        fs::create_dir_all(cx.staged_dir()).unwrap();
        fs::write(cx.staged_file(&hash), b"not the real content").unwrap();

        let plan = vec![file_record("/usr/bin/ed", hash)];
        let installer = StagedInstaller::new(&cx, plan.clone());
        assert_eq!(installer.preflight(&plan).unwrap(), 1);
        assert!(!cx.staged_file(&hash).exists());

        // A verified blob stays put.
        fs::write(cx.staged_file(&hash), b"the real content").unwrap();
        assert_eq!(installer.preflight(&plan).unwrap(), 0);
        assert!(cx.staged_file(&hash).exists());
    }

    #[test]
    fn path_repair_recovers_records_from_the_view() {
        let tmp = tempfile::tempdir().unwrap();
        let cx = test_context(tmp.path(), 10);

        let hash = stage_blob(&cx, b"deep file");
        // The view knows /usr/lib/deep is a directory owned by some
        // bundle, but the plan only carries the leaf.
        let view = vec![
            FileRecord {
                path: PathBuf::from("/usr/lib/deep"),
                hash: hash_bytes(b"deep dir"),
                kind: FileKind::Directory,
                last_change: 4,
                flags: FileFlags::default(),
            },
            file_record("/usr/lib/deep/file", hash),
        ];
        let mut plan = vec![file_record("/usr/lib/deep/file", hash)];

        let installer = StagedInstaller::new(&cx, view);
        installer.stage(&mut plan).unwrap();
        // The repaired ancestor was appended with no staging name.
        assert!(plan.iter().any(|r| r.path == Path::new("/usr/lib/deep")
            && r.hash.is_zero()
            && r.kind == FileKind::Directory));

        installer.rename_into_place(&plan).unwrap();
        let target = cx.target_path(Path::new("/usr/lib/deep/file"));
        assert_eq!(fs::read(target).unwrap(), b"deep file");
    }

    #[test]
    fn pinned_and_deleted_records_are_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        let cx = test_context(tmp.path(), 10);

        let hash = stage_blob(&cx, b"should never land");
        let mut pinned = file_record("/usr/bin/pinned", hash);
        pinned.flags.do_not_update = true;
        let deleted = FileRecord {
            path: PathBuf::from("/usr/bin/gone"),
            hash: digest::Hash::ZERO,
            kind: FileKind::Deleted,
            last_change: 10,
            flags: FileFlags::default(),
        };

        let mut plan = vec![pinned, deleted];
        let installer = StagedInstaller::new(&cx, plan.clone());
        installer.stage(&mut plan).unwrap();
        installer.rename_into_place(&plan).unwrap();

        assert!(!cx.target_path(Path::new("/usr/bin/pinned")).exists());
        assert!(!cx.target_path(Path::new("/usr/bin/gone")).exists());
    }

    #[test]
    fn rerun_after_partial_stage_converges() {
        let tmp = tempfile::tempdir().unwrap();
        let cx = test_context(tmp.path(), 10);

        let hash = stage_blob(&cx, b"ed 1.0");
        let mut plan = vec![file_record("/usr/bin/ed", hash)];
        let installer = StagedInstaller::new(&cx, plan.clone());

        // First run halts after Phase A.
        installer.stage(&mut plan).unwrap();
        let target = cx.target_path(Path::new("/usr/bin/ed"));
        assert!(sidecar_path(&target).exists());
        assert!(!target.exists());

        // The re-run stages over the leftover sidecar and commits.
        let mut plan = vec![file_record("/usr/bin/ed", hash)];
        installer.preflight(&plan).unwrap();
        installer.stage(&mut plan).unwrap();
        installer.rename_into_place(&plan).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"ed 1.0");
        assert!(!sidecar_path(&target).exists());
    }
}
