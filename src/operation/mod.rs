//! Front-door operations.
//!
//! The front-end hands the core a list of bundle names and an
//! operation; everything here follows the same arc: load the MoM for
//! the current version, resolve subscriptions, consolidate file sets,
//! admit, then mutate — and only afterwards touch the tracking store.


use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::admission::check_disk_space;
use crate::consolidate::{consolidate, filter_out_deleted, filter_out_existing};
use crate::context::Context;
use crate::download;
use crate::errors::{ClearupError, ExitStatus};
use crate::fetch::Fetcher;
use crate::manifest::store::ManifestStore;
use crate::manifest::Manifest;
use crate::remove::{remove_bundles, RemoveOptions, RemoveOutcome};
use crate::resolve::{add_subscriptions, required_by, RequiredByReport, ResolveOptions};
use crate::stage::StagedInstaller;
use crate::subscribe::SubscriptionSet;
use crate::telemetry::{Telemetry, TelemetryRecord};
use crate::tracking::TrackingStore;
use crate::utils::{self, raw};

#[derive(Clone, Copy, Debug, Default)]
pub struct InstallOptions {
    /// Operate against this version instead of the one the system
    /// reports.
    pub version: Option<u32>,
    /// Leave `optional` includes uninstalled.
    pub skip_optional: bool,
    /// Operator override for the disk admission check.
    pub skip_diskspace_check: bool,
}

#[derive(Debug)]
pub struct InstallReport {
    pub status: ExitStatus,
    pub version: u32,
    /// Requested bundles that were newly installed.
    pub installed: Vec<String>,
    /// Requested bundles that were already present; a no-op.
    pub already_installed: Vec<String>,
    /// Bundles pulled in transitively.
    pub as_dependency: Vec<String>,
    /// Requested names the MoM does not know.
    pub invalid: Vec<String>,
    pub bytes: u64,
}

/// Install bundles and their include closure.
pub fn install(
    cx: &Context,
    fetcher: &dyn Fetcher,
    telemetry: &dyn Telemetry,
    names: &[String],
    opts: &InstallOptions,
) -> Result<InstallReport> {
    let result = install_inner(cx, fetcher, names, opts);
    telemetry.record(&TelemetryRecord {
        operation: "install",
        bundles: names.to_vec(),
        version: result.as_ref().map(|r| r.version).unwrap_or(0),
        status: result
            .as_ref()
            .map(|r| r.status)
            .unwrap_or_else(|e| ExitStatus::from_error(e)),
        bytes: result.as_ref().map(|r| r.bytes).unwrap_or(0),
    });
    result
}

fn install_inner(
    cx: &Context,
    fetcher: &dyn Fetcher,
    names: &[String],
    opts: &InstallOptions,
) -> Result<InstallReport> {
    let version = match opts.version {
        Some(v) => v,
        None => cx.current_version()?,
    };
    let mut store = ManifestStore::new();
    let mom = store.load_mom(cx, fetcher, version)?;

    utils::ensure_dir_exists("bundles", &cx.system_bundles_dir())?;
    let installed: HashSet<String> = utils::dir_entry_names("bundles", &cx.system_bundles_dir())?
        .into_iter()
        .collect();

    let already_installed: Vec<String> = names
        .iter()
        .filter(|n| installed.contains(*n) && mom.submanifest(n).is_some())
        .cloned()
        .collect();
    for name in &already_installed {
        info!("bundle '{name}' is already installed");
    }

    let mut subs = SubscriptionSet::new();
    let resolved = add_subscriptions(
        &mut store,
        cx,
        fetcher,
        &mom,
        names,
        &mut subs,
        &installed,
        ResolveOptions {
            find_all: false,
            skip_optional: opts.skip_optional,
        },
        0,
    );
    if resolved.had_error {
        return Err(ClearupError::RecurseManifest.into());
    }
    // An invalid name outlives an otherwise successful run, so the
    // final code distinguishes "did what was asked" from "did what it
    // could".
    let mut status = ExitStatus::Ok;
    if !resolved.bad_names.is_empty() {
        status.escalate(ExitStatus::InvalidBundle);
    }

    if subs.is_empty() {
        return Ok(InstallReport {
            status,
            version,
            installed: vec![],
            already_installed,
            as_dependency: vec![],
            invalid: resolved.bad_names,
            bytes: 0,
        });
    }

    let to_install = store.recurse(cx, fetcher, &mom, &subs)?;
    let installed_manifests = load_installed_manifests(cx, fetcher, &mut store, &mom, &installed);

    let target = consolidate(&to_install);
    let installed_records = consolidate(&installed_manifests);
    let needed = filter_out_existing(filter_out_deleted(target), &installed_records);

    if !opts.skip_diskspace_check {
        check_disk_space(cx, &to_install)?;
    }

    // The full consolidated view backs path repair during staging.
    let mut all_manifests = to_install.clone();
    all_manifests.extend(installed_manifests.iter().cloned());
    let installer = StagedInstaller::new(cx, consolidate(&all_manifests));

    let mut plan = needed;
    installer.preflight(&plan)?;
    let summary = match download::populate_staged(cx, fetcher, &to_install, &plan) {
        Ok(summary) => summary,
        Err(e) => {
            let _ = raw::remove_any(&cx.download_dir());
            return Err(e);
        }
    };

    // Every file is staged before any file is renamed; on a fatal
    // error the state is forward-only — renamed files stay, scratch
    // goes.
    let staged = installer.stage(&mut plan);
    let reconciled = match staged {
        Ok(()) => installer.rename_into_place(&plan),
        Err(e) => Err(e),
    };
    if let Err(e) = reconciled {
        let _ = raw::remove_any(&cx.download_dir());
        return Err(e);
    }

    // Seed from the pre-install system view, then stamp the new
    // bundles and track the ones the user asked for by name.
    let tracking = TrackingStore::new(cx);
    tracking.ensure_seeded()?;

    let mut newly_installed = Vec::new();
    let mut as_dependency = Vec::new();
    for sub in subs.iter() {
        utils::write_bytes(
            "bundle marker",
            &cx.system_bundles_dir().join(&sub.component),
            b"",
        )?;
        if names.contains(&sub.component) {
            tracking.track(&sub.component)?;
            newly_installed.push(sub.component.clone());
        } else {
            info!("bundle '{}' was installed as a dependency", sub.component);
            as_dependency.push(sub.component.clone());
        }
    }

    info!(
        "installed {} bundle(s), {} pulled as dependencies",
        newly_installed.len(),
        as_dependency.len()
    );

    Ok(InstallReport {
        status,
        version,
        installed: newly_installed,
        already_installed,
        as_dependency,
        invalid: resolved.bad_names,
        bytes: summary.bytes,
    })
}

/// Manifests of the bundles already installed on this system. A bundle
/// whose manifest will not load is left out with a warning; install
/// only uses this view to avoid re-staging content that is already in
/// place.
fn load_installed_manifests(
    cx: &Context,
    fetcher: &dyn Fetcher,
    store: &mut ManifestStore,
    mom: &Manifest,
    installed: &HashSet<String>,
) -> Vec<Arc<Manifest>> {
    let mut manifests = Vec::new();
    for name in mom.bundle_names() {
        if !installed.contains(name) {
            continue;
        }
        match store.load_manifest(cx, fetcher, name, mom) {
            Ok(m) => manifests.push(m),
            Err(e) => warn!("could not load manifest for installed bundle '{name}': {e:#}"),
        }
    }
    manifests
}

/// Remove bundles, refusing targets that installed bundles still
/// depend on unless forced.
pub fn remove(
    cx: &Context,
    fetcher: &dyn Fetcher,
    telemetry: &dyn Telemetry,
    names: &[String],
    opts: RemoveOptions,
) -> Result<RemoveOutcome> {
    let result = remove_inner(cx, fetcher, names, opts);
    telemetry.record(&TelemetryRecord {
        operation: "remove",
        bundles: names.to_vec(),
        version: cx.current_version().unwrap_or(0),
        status: result
            .as_ref()
            .map(|o| o.status)
            .unwrap_or_else(|e| ExitStatus::from_error(e)),
        bytes: 0,
    });
    result
}

fn remove_inner(
    cx: &Context,
    fetcher: &dyn Fetcher,
    names: &[String],
    opts: RemoveOptions,
) -> Result<RemoveOutcome> {
    let version = cx.current_version()?;
    let mut store = ManifestStore::new();
    let mom = store.load_mom(cx, fetcher, version)?;

    let installed: HashSet<String> = utils::dir_entry_names("bundles", &cx.system_bundles_dir())?
        .into_iter()
        .collect();

    // Removal plans against the complete installed view; a manifest we
    // cannot load could cost another bundle its files, so this load is
    // strict.
    let mut submanifests = Vec::with_capacity(installed.len());
    for name in mom.bundle_names() {
        if !installed.contains(name) {
            continue;
        }
        let manifest = store
            .load_manifest(cx, fetcher, name, &mom)
            .map_err(|e| e.context(ClearupError::RecurseManifest))?;
        submanifests.push(manifest);
    }

    remove_bundles(cx, &mom, submanifests, names, opts)
}

#[derive(Debug)]
pub struct BundleInfo {
    pub name: String,
    pub installed: bool,
    pub tracked: bool,
    pub is_experimental: bool,
}

/// Every bundle the MoM publishes, with its local state.
pub fn list_bundles(
    cx: &Context,
    fetcher: &dyn Fetcher,
    version: Option<u32>,
) -> Result<Vec<BundleInfo>> {
    let version = match version {
        Some(v) => v,
        None => cx.current_version()?,
    };
    let mut store = ManifestStore::new();
    let mom = store.load_mom(cx, fetcher, version)?;

    let installed: HashSet<String> = utils::dir_entry_names("bundles", &cx.system_bundles_dir())?
        .into_iter()
        .collect();
    let tracking = TrackingStore::new(cx);

    Ok(mom
        .bundle_names()
        .map(|name| BundleInfo {
            name: name.to_owned(),
            installed: installed.contains(name),
            tracked: tracking.is_tracked(name),
            is_experimental: mom
                .submanifest(name)
                .map(|r| r.flags.experimental)
                .unwrap_or(false),
        })
        .collect())
}

/// Names of the bundles installed on this system, per the system view.
pub fn list_installed(cx: &Context) -> Result<Vec<String>> {
    utils::dir_entry_names("bundles", &cx.system_bundles_dir())
}

/// Which installed bundles transitively require `target`?
pub fn required_by_query(
    cx: &Context,
    fetcher: &dyn Fetcher,
    target: &str,
    version: Option<u32>,
) -> Result<RequiredByReport> {
    let version = match version {
        Some(v) => v,
        None => cx.current_version()?,
    };
    let mut store = ManifestStore::new();
    let mom = store.load_mom(cx, fetcher, version)?;
    if mom.submanifest(target).is_none() {
        return Err(ClearupError::InvalidBundle(target.to_owned()).into());
    }

    let installed: HashSet<String> = utils::dir_entry_names("bundles", &cx.system_bundles_dir())?
        .into_iter()
        .collect();
    let mut submanifests: Vec<Arc<Manifest>> = Vec::new();
    for name in mom.bundle_names() {
        if !installed.contains(name) {
            continue;
        }
        match store.load_manifest(cx, fetcher, name, &mom) {
            Ok(m) => submanifests.push(m),
            Err(e) => warn!("leaving '{name}' out of the query: {e:#}"),
        }
    }

    Ok(required_by(&submanifests, target, &HashSet::new()))
}
