//! Archive extraction for pack payloads.

use std::fs::File;
use std::io::BufReader;
use std::path::{Component, Path};

use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use tar::Archive;

/// Extract a gzipped tarball into `into`.
///
/// Entry paths are checked before extraction; anything that would
/// escape the output directory fails the whole unpack.
pub(crate) fn unpack_tar_gz(archive: &Path, into: &Path) -> Result<()> {
    let file = File::open(archive)
        .with_context(|| format!("could not open pack '{}'", archive.display()))?;
    let mut tar = Archive::new(GzDecoder::new(BufReader::new(file)));

    for entry in tar
        .entries()
        .with_context(|| format!("could not read pack '{}'", archive.display()))?
    {
        let mut entry =
            entry.with_context(|| format!("corrupt entry in pack '{}'", archive.display()))?;
        let rel = entry.path()?.into_owned();
        if rel
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
        {
            bail!("pack entry '{}' escapes the output directory", rel.display());
        }
        let dest = into.join(&rel);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("could not create '{}'", parent.display()))?;
        }
        entry
            .unpack(&dest)
            .with_context(|| format!("could not unpack '{}'", rel.display()))?;
    }

    Ok(())
}
