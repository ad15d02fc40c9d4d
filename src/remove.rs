//! Bundle removal.
//!
//! Removal is planned against the full installed view: a file is only
//! unlinked when no kept bundle still provides its path. Dependents
//! protect their includes unless the operator forces the removal, in
//! which case the dependents go first.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::consolidate::{consolidate, files_to_unlink};
use crate::context::Context;
use crate::errors::{ClearupError, ExitStatus};
use crate::manifest::{Manifest, OS_CORE_BUNDLE};
use crate::resolve::required_by;
use crate::tracking::TrackingStore;
use crate::utils;

#[derive(Clone, Copy, Debug, Default)]
pub struct RemoveOptions {
    /// Also remove every installed bundle that depends on the targets.
    pub force: bool,
}

#[derive(Debug, Default)]
pub struct RemoveOutcome {
    /// Bundles actually removed, dependents first.
    pub removed: Vec<String>,
    /// Bundles skipped, with the per-bundle fault.
    pub skipped: Vec<(String, ExitStatus)>,
    pub unlinked: usize,
    /// Most severe fault observed (Ok when everything was removed).
    pub status: ExitStatus,
    pub total: usize,
    pub bad: usize,
}

/// Remove `names` from the system. `submanifests` must hold the loaded
/// manifest of every installed bundle.
pub fn remove_bundles(
    cx: &Context,
    mom: &Manifest,
    submanifests: Vec<Arc<Manifest>>,
    names: &[String],
    opts: RemoveOptions,
) -> Result<RemoveOutcome> {
    let installed: HashSet<String> = utils::dir_entry_names("bundles", &cx.system_bundles_dir())?
        .into_iter()
        .collect();
    let requested: HashSet<String> = names.iter().cloned().collect();

    let mut outcome = RemoveOutcome {
        status: ExitStatus::Ok,
        total: names.len(),
        ..Default::default()
    };
    let mut active = submanifests;
    let mut to_remove: Vec<Arc<Manifest>> = Vec::new();

    for name in names {
        if name == OS_CORE_BUNDLE {
            warn!("bundle '{OS_CORE_BUNDLE}' is the base of the system and cannot be removed");
            outcome.fault(name, ExitStatus::RequiredBundleError);
            continue;
        }
        if mom.submanifest(name).is_none() {
            outcome.skip(name, ClearupError::InvalidBundle(name.clone()));
            continue;
        }
        if !installed.contains(name) {
            outcome.skip(name, ClearupError::BundleNotTracked(name.clone()));
            continue;
        }
        if to_remove.iter().any(|m| m.component == *name) {
            // Already pulled in as a forced dependent.
            continue;
        }

        // Bundles the user is also removing never block the removal.
        let mut exclusions = requested.clone();
        exclusions.extend(to_remove.iter().map(|m| m.component.clone()));
        let dependents = required_by(&active, name, &exclusions);
        if !dependents.is_empty() {
            if !opts.force {
                outcome.skip(
                    name,
                    ClearupError::RequiredBundle {
                        target: name.clone(),
                        count: dependents.count(),
                    },
                );
                info!("{}", dependents.render(name));
                continue;
            }
            // Dependents are removed before their target.
            for dep in dependents.names() {
                if dep == OS_CORE_BUNDLE {
                    continue;
                }
                move_manifest(&mut active, &mut to_remove, dep);
            }
        }

        move_manifest(&mut active, &mut to_remove, name);
    }

    if !to_remove.is_empty() {
        let kept_files = consolidate(&active);
        let candidates = consolidate(&to_remove);
        let unlink = files_to_unlink(&candidates, &kept_files);

        outcome.unlinked = unlink_paths(cx, &unlink, &mut outcome.status);

        let tracking = TrackingStore::new(cx);
        for manifest in &to_remove {
            let marker = cx.system_bundles_dir().join(&manifest.component);
            if let Err(e) = fs::remove_file(&marker) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("could not drop marker for '{}': {e}", manifest.component);
                }
            }
            tracking.untrack(&manifest.component);
            outcome.removed.push(manifest.component.clone());
        }
    }

    info!(
        "removed {} of {} bundle(s)",
        outcome.removed.len(),
        outcome.total
    );
    Ok(outcome)
}

impl RemoveOutcome {
    /// Skip `name` over a per-bundle fault; the error supplies both the
    /// user-visible message and the exit code.
    fn skip(&mut self, name: &str, fault: ClearupError) {
        warn!("{fault}, skipping");
        self.fault(name, ExitStatus::from(&fault));
    }

    fn fault(&mut self, name: &str, fault: ExitStatus) {
        self.skipped.push((name.to_owned(), fault));
        self.status.escalate(fault);
        self.bad += 1;
    }
}

fn move_manifest(active: &mut Vec<Arc<Manifest>>, to_remove: &mut Vec<Arc<Manifest>>, name: &str) {
    if let Some(pos) = active.iter().position(|m| m.component == name) {
        to_remove.push(active.remove(pos));
    }
}

/// Unlink files and symlinks, then prune any directories that emptied
/// out, deepest first. Shared directories simply stay.
fn unlink_paths(cx: &Context, paths: &[std::path::PathBuf], status: &mut ExitStatus) -> usize {
    let mut unlinked = 0;
    let mut dirs = Vec::new();

    for path in paths {
        let target = cx.target_path(path);
        let meta = match fs::symlink_metadata(&target) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => {
                warn!("could not stat '{}': {e}", target.display());
                status.escalate(ExitStatus::CouldntRemoveFile);
                continue;
            }
            Ok(meta) => meta,
        };
        if meta.is_dir() {
            dirs.push(target);
            continue;
        }
        match fs::remove_file(&target) {
            Ok(()) => unlinked += 1,
            Err(e) => {
                warn!("could not remove '{}': {e}", target.display());
                status.escalate(ExitStatus::CouldntRemoveFile);
            }
        }
    }

    dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
    for dir in dirs {
        match fs::remove_dir(&dir) {
            Ok(()) => unlinked += 1,
            // Still holds files some other bundle owns.
            Err(_) => {}
        }
    }

    unlinked
}
