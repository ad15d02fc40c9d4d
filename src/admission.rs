//! Disk-space admission control.
//!
//! Installing without enough room would strand the system half-staged,
//! so the planned content size is checked against the free space on the
//! target filesystem before anything is downloaded. Only `<prefix>/usr/`
//! is consulted; bundles that place files elsewhere are outside the
//! check's model, and that scope is deliberately not widened.

use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, warn};

use crate::context::Context;
use crate::errors::ClearupError;
use crate::manifest::Manifest;

/// Installed content rarely lands at exactly `contentsize`; pad the
/// requirement by 10%.
fn required_space(to_install: &[Arc<Manifest>]) -> u64 {
    let total: u64 = to_install.iter().map(|m| m.contentsize).sum();
    total.saturating_add(total / 10)
}

/// Fail with `DiskSpaceError` unless `<prefix>/usr/` has room for the
/// planned install.
pub fn check_disk_space(cx: &Context, to_install: &[Arc<Manifest>]) -> Result<()> {
    let required = required_space(to_install);
    if required == 0 {
        return Ok(());
    }

    let path = cx.usr_dir();
    let available = match free_space(&path) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("could not query free space on '{}': {e}", path.display());
            return Err(ClearupError::DiskSpace {
                path,
                required,
                available: 0,
            }
            .into());
        }
    };

    debug!(required, available, "disk admission");
    if required > available {
        return Err(ClearupError::DiskSpace {
            path,
            required,
            available,
        }
        .into());
    }
    Ok(())
}

#[cfg(unix)]
fn free_space(path: &Path) -> io::Result<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    if unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(stat.f_bavail as u64 * stat.f_frsize as u64)
}

#[cfg(not(unix))]
fn free_space(_path: &Path) -> io::Result<u64> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "free-space query is unix-only",
    ))
}
