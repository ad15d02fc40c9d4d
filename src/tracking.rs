//! The store of manually installed bundles.
//!
//! A marker file under `<state>/bundles/` records that the user asked
//! for a bundle, as opposed to it being pulled in as a dependency.
//! The first time the store is used it seeds itself from the system's
//! authoritative bundle directory, so pre-existing installations start
//! out fully tracked.

use std::fs;

use anyhow::Result;
use tracing::{debug, warn};

use crate::context::Context;
use crate::utils::{self, raw};

/// Internal sentinel in the system bundle directory; never a bundle.
const MOM_SENTINEL: &str = ".MoM";

pub struct TrackingStore<'a> {
    cx: &'a Context,
}

impl<'a> TrackingStore<'a> {
    pub fn new(cx: &'a Context) -> Self {
        Self { cx }
    }

    /// Seed the tracking directory from the system view if it is
    /// missing or empty, skipping internal markers.
    pub fn ensure_seeded(&self) -> Result<()> {
        let dir = self.cx.tracking_dir();
        if raw::is_directory(&dir) && !utils::dir_entry_names("tracking", &dir)?.is_empty() {
            return Ok(());
        }
        utils::ensure_dir_exists("tracking", &dir)?;

        let system = self.cx.system_bundles_dir();
        for name in utils::dir_entry_names("bundles", &system)? {
            if name == MOM_SENTINEL {
                continue;
            }
            if let Err(e) = fs::copy(system.join(&name), dir.join(&name)) {
                warn!("could not seed tracking for '{name}': {e}");
            }
        }
        debug!("seeded tracking directory from the system view");

        restrict_mode(&dir, 0o700);
        Ok(())
    }

    /// Record that the user asked for `name`.
    pub fn track(&self, name: &str) -> Result<()> {
        utils::ensure_dir_exists("tracking", &self.cx.tracking_dir())?;
        let path = self.cx.tracking_dir().join(name);
        utils::write_bytes("tracking", &path, b"")?;
        restrict_mode(&path, 0o600);
        Ok(())
    }

    /// Best-effort: an untracked bundle that was never tracked is fine.
    pub fn untrack(&self, name: &str) {
        let _ = fs::remove_file(self.cx.tracking_dir().join(name));
    }

    pub fn is_tracked(&self, name: &str) -> bool {
        raw::is_file(self.cx.tracking_dir().join(name))
    }

    pub fn list(&self) -> Result<Vec<String>> {
        utils::dir_entry_names("tracking", &self.cx.tracking_dir())
    }
}

#[cfg(unix)]
fn restrict_mode(path: &std::path::Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(mode)) {
        warn!("could not restrict '{}': {e}", path.display());
    }
}

#[cfg(not(unix))]
fn restrict_mode(_path: &std::path::Path, _mode: u32) {}
