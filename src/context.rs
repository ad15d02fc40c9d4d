//! Per-invocation configuration.
//!
//! The reference updater kept a process-wide mutable configuration; here
//! everything an operation needs to know about the machine is carried in
//! one immutable `Context` value, constructed once by the front-end and
//! threaded through every core call.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use url::Url;

use crate::errors::ClearupError;
use crate::utils;

/// Where the OS version of the running image is recorded, relative to
/// the install prefix.
const VERSION_FILE: &str = "usr/share/clear/version";

/// Authoritative system view of installed bundles, relative to the
/// install prefix.
const SYSTEM_BUNDLES_DIR: &str = "usr/share/clear/bundles";

#[derive(Clone, Debug)]
pub struct Context {
    prefix: PathBuf,
    state_dir: PathBuf,
    content_url: Option<Url>,
    mix_enabled: bool,
}

impl Context {
    pub fn new(prefix: impl Into<PathBuf>, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
            state_dir: state_dir.into(),
            content_url: None,
            mix_enabled: false,
        }
    }

    /// Upstream content source. The core never dials it directly; it is
    /// recorded here so the front-end can hand a matching fetcher and
    /// telemetry a stable origin.
    pub fn with_content_url(mut self, url: Url) -> Self {
        self.content_url = Some(url);
        self
    }

    pub fn with_mix(mut self, enabled: bool) -> Self {
        self.mix_enabled = enabled;
        self
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn content_url(&self) -> Option<&Url> {
        self.content_url.as_ref()
    }

    pub fn mix_enabled(&self) -> bool {
        self.mix_enabled
    }

    /// `<prefix>/usr/` — the filesystem the disk-admission check consults.
    pub fn usr_dir(&self) -> PathBuf {
        self.prefix.join("usr")
    }

    /// `<prefix>/usr/share/clear/bundles/` — presence of a file here
    /// marks the bundle installed (system view).
    pub fn system_bundles_dir(&self) -> PathBuf {
        self.prefix.join(SYSTEM_BUNDLES_DIR)
    }

    /// `<state>/bundles/` — presence of a file here marks the bundle
    /// manually installed (user view).
    pub fn tracking_dir(&self) -> PathBuf {
        self.state_dir.join("bundles")
    }

    /// `<state>/staged/` — content-addressed staging area.
    pub fn staged_dir(&self) -> PathBuf {
        self.state_dir.join("staged")
    }

    pub fn staged_file(&self, hash: &crate::digest::Hash) -> PathBuf {
        self.staged_dir().join(hash.to_string())
    }

    /// `<state>/download/` — scratch space, wiped at install start.
    pub fn download_dir(&self) -> PathBuf {
        self.state_dir.join("download")
    }

    /// Local manifest overlay for the given version, consulted before
    /// upstream when mix is enabled.
    pub fn mix_dir(&self, version: u32) -> PathBuf {
        self.state_dir.join("mix").join(version.to_string())
    }

    pub fn version_file(&self) -> PathBuf {
        self.prefix.join(VERSION_FILE)
    }

    /// The version of the currently installed image.
    pub fn current_version(&self) -> Result<u32> {
        let path = self.version_file();
        let contents =
            utils::read_file("version", &path).context(ClearupError::CurrentVersionUnknown)?;
        contents
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|v| *v > 0)
            .ok_or(ClearupError::CurrentVersionUnknown)
            .map_err(Into::into)
    }

    /// Translate a record's absolute path into the target tree.
    pub fn target_path(&self, record_path: &Path) -> PathBuf {
        match record_path.strip_prefix("/") {
            Ok(rel) => self.prefix.join(rel),
            Err(_) => self.prefix.join(record_path),
        }
    }
}
