//! Filling the staging area from the content server.
//!
//! Whatever the install plan needs and `<state>/staged/` does not yet
//! hold is pulled here: preferably as one pack per bundle, falling back
//! to per-hash full-files. Every landed blob is hash-verified before it
//! is accepted into the staging area. This is the only layer that would
//! be allowed to parallelize; it stays sequential like the rest of the
//! core.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::digest::{hash_bytes, hash_file, Hash};
use crate::errors::ClearupError;
use crate::fetch::{Fetcher, Resource};
use crate::manifest::{FileKind, FileRecord, Manifest};
use crate::unpack::unpack_tar_gz;
use crate::utils::{self, raw};

/// Bundles with at least this many missing files are worth a pack
/// round-trip; smaller gaps go straight to full-files.
const MIN_FILES_FOR_PACK: usize = 3;

#[derive(Debug, Default)]
pub(crate) struct DownloadSummary {
    /// Bytes pulled over the fetcher, for telemetry.
    pub bytes: u64,
    pub fullfiles: usize,
    pub packed: usize,
}

/// Make sure `<state>/staged/` holds verified content for every record
/// in `needed`. The download scratch directory is wiped first.
pub(crate) fn populate_staged(
    cx: &Context,
    fetcher: &dyn Fetcher,
    to_install: &[Arc<Manifest>],
    needed: &[FileRecord],
) -> Result<DownloadSummary> {
    let download_dir = cx.download_dir();
    raw::remove_any(&download_dir).with_context(|| ClearupError::CreatingDirectory {
        name: "download",
        path: download_dir.clone(),
    })?;
    utils::ensure_dir_exists("download", &download_dir)?;
    utils::ensure_dir_exists("staged", &cx.staged_dir())?;

    let mut missing: BTreeMap<Hash, &FileRecord> = needed
        .iter()
        .filter(|r| matches!(r.kind, FileKind::File | FileKind::Symlink))
        .filter(|r| r.is_installable() && !r.hash.is_zero())
        .filter(|r| !raw::path_exists(&cx.staged_file(&r.hash)))
        .map(|r| (r.hash, r))
        .collect();

    let mut summary = DownloadSummary::default();
    if missing.is_empty() {
        return Ok(summary);
    }
    info!("{} file(s) to download", missing.len());

    for manifest in to_install {
        try_pack(cx, fetcher, manifest, &mut missing, &mut summary);
        if missing.is_empty() {
            break;
        }
    }

    for (hash, record) in missing {
        let resource = Resource::FullFile {
            version: record.last_change,
            hash: &hash,
        };
        let bytes = fetcher
            .fetch(resource)
            .with_context(|| format!("could not download full-file {hash}"))?;
        let calculated = hash_bytes(&bytes);
        if calculated != hash {
            return Err(ClearupError::ChecksumFailed {
                name: format!("full-file {hash}"),
                expected: hash.to_string(),
                calculated: calculated.to_string(),
            }
            .into());
        }

        // Land in scratch first so a torn write can never be mistaken
        // for staged content.
        let scratch = download_dir.join(hash.to_string());
        utils::write_bytes("download", &scratch, &bytes)?;
        utils::rename(&scratch, &cx.staged_file(&hash))?;

        summary.bytes += bytes.len() as u64;
        summary.fullfiles += 1;
    }

    Ok(summary)
}

/// Try to satisfy this bundle's share of `missing` with one pack.
/// Packs are an optimization; any failure just leaves the full-file
/// path to do the work.
fn try_pack(
    cx: &Context,
    fetcher: &dyn Fetcher,
    manifest: &Manifest,
    missing: &mut BTreeMap<Hash, &FileRecord>,
    summary: &mut DownloadSummary,
) {
    let wanted: Vec<Hash> = manifest
        .files
        .iter()
        .filter(|r| missing.contains_key(&r.hash))
        .map(|r| r.hash)
        .collect();
    if wanted.len() < MIN_FILES_FOR_PACK {
        return;
    }

    let resource = Resource::Pack {
        component: &manifest.component,
        from: 0,
        to: manifest.version,
    };
    let bytes = match fetcher.fetch(resource) {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!("no pack for '{}': {e}", manifest.component);
            return;
        }
    };

    let archive = cx
        .download_dir()
        .join(format!("pack-{}.tar.gz", manifest.component));
    let extracted = cx.download_dir().join(format!("pack-{}", manifest.component));
    let landed = utils::write_bytes("pack", &archive, &bytes)
        .and_then(|()| unpack_tar_gz(&archive, &extracted));
    if let Err(e) = landed {
        warn!("discarding unusable pack for '{}': {e:#}", manifest.component);
        return;
    }
    summary.bytes += bytes.len() as u64;

    for hash in wanted {
        let member = extracted.join("staged").join(hash.to_string());
        if !raw::path_exists(&member) {
            continue;
        }
        match hash_file(&member) {
            Ok(calculated) if calculated == hash => {}
            Ok(calculated) => {
                warn!(
                    "pack member {hash} for '{}' hashes to {calculated}, ignoring",
                    manifest.component
                );
                continue;
            }
            Err(e) => {
                warn!("could not verify pack member {hash}: {e:#}");
                continue;
            }
        }
        if utils::rename(&member, &cx.staged_file(&hash)).is_ok() {
            missing.remove(&hash);
            summary.packed += 1;
        }
    }
}
