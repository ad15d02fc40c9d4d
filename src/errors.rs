#![allow(clippy::large_enum_variant)]

use std::path::PathBuf;

use thiserror::Error as ThisError;

/// Everything that can go wrong while reconciling bundles.
///
/// Variants cover the user-visible exit taxonomy plus the usual I/O
/// contexts; operations return `anyhow::Result` and attach one of these
/// at the failing seam so the front-end can map it back to an
/// [`ExitStatus`].
#[derive(ThisError, Debug)]
pub enum ClearupError {
    #[error("current OS version is unknown")]
    CurrentVersionUnknown,
    #[error("could not load the manifest of manifests for version {0}")]
    CouldntLoadMom(u32),
    #[error("could not load manifest for bundle '{component}' at version {version}")]
    CouldntLoadManifest { component: String, version: u32 },
    #[error("could not load manifests for all subscribed bundles")]
    RecurseManifest,
    #[error("bundle '{0}' is invalid")]
    InvalidBundle(String),
    #[error("bundle '{0}' is not tracked on this system")]
    BundleNotTracked(String),
    #[error("bundle '{target}' is required by {count} installed bundle(s)")]
    RequiredBundle { target: String, count: usize },
    #[error("not enough free space under '{}': {required} bytes required, {available} available", .path.display())]
    DiskSpace {
        path: PathBuf,
        required: u64,
        available: u64,
    },
    #[error("could not remove file '{}'", .path.display())]
    CouldntRemoveFile { path: PathBuf },

    #[error("checksum failed for '{name}': expected {expected}, calculated {calculated}")]
    ChecksumFailed {
        name: String,
        expected: String,
        calculated: String,
    },
    #[error("no staged content for hash {0}")]
    MissingStagedFile(String),
    #[error("invalid content hash: '{0}'")]
    InvalidHash(String),
    #[error("manifest format {0} is not supported")]
    UnsupportedFormat(u32),
    #[error("missing key: '{0}'")]
    MissingKey(String),
    #[error("expected type '{0}' for '{1}'")]
    ExpectedType(&'static str, String),

    #[error("could not create {name} directory: '{}'", .path.display())]
    CreatingDirectory { name: &'static str, path: PathBuf },
    #[error("could not read {name} directory: '{}'", .path.display())]
    ReadingDirectory { name: &'static str, path: PathBuf },
    #[error("could not read {name} file: '{}'", .path.display())]
    ReadingFile { name: &'static str, path: PathBuf },
    #[error("could not write {name} file: '{}'", .path.display())]
    WritingFile { name: &'static str, path: PathBuf },
    #[error("could not copy {name} file from '{}' to '{}'", .src.display(), .dest.display())]
    CopyingFile {
        name: &'static str,
        src: PathBuf,
        dest: PathBuf,
    },
    #[error("could not rename '{}' to '{}'", .src.display(), .dest.display())]
    RenamingFile { src: PathBuf, dest: PathBuf },
}

/// Exit taxonomy reported to the front-end, one code per operation.
///
/// The numeric values are part of the external contract; new codes get
/// appended, existing ones never move.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitStatus {
    #[default]
    Ok = 0,
    CurrentVersionUnknown = 2,
    CouldntLoadMom = 3,
    CouldntLoadManifest = 4,
    RecurseManifest = 5,
    InvalidBundle = 6,
    BundleNotTracked = 7,
    RequiredBundleError = 8,
    DiskSpaceError = 9,
    CouldntRemoveFile = 10,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }

    /// Ranking used when several per-bundle faults occurred and the
    /// operation has to report the most severe one.
    pub(crate) fn severity(self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::BundleNotTracked => 1,
            Self::InvalidBundle => 2,
            Self::RequiredBundleError => 3,
            _ => 4,
        }
    }

    /// Keep `self` unless `other` outranks it.
    pub(crate) fn escalate(&mut self, other: Self) {
        if other.severity() > self.severity() {
            *self = other;
        }
    }

    /// Map a failed operation back onto the taxonomy by walking the
    /// error chain for the outermost `ClearupError`.
    pub fn from_error(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if let Some(e) = cause.downcast_ref::<ClearupError>() {
                return Self::from(e);
            }
        }
        Self::RecurseManifest
    }
}

impl From<&ClearupError> for ExitStatus {
    fn from(e: &ClearupError) -> Self {
        match e {
            ClearupError::CurrentVersionUnknown => Self::CurrentVersionUnknown,
            ClearupError::CouldntLoadMom(_) => Self::CouldntLoadMom,
            ClearupError::CouldntLoadManifest { .. } => Self::CouldntLoadManifest,
            ClearupError::RecurseManifest => Self::RecurseManifest,
            ClearupError::InvalidBundle(_) => Self::InvalidBundle,
            ClearupError::BundleNotTracked(_) => Self::BundleNotTracked,
            ClearupError::RequiredBundle { .. } => Self::RequiredBundleError,
            ClearupError::DiskSpace { .. } => Self::DiskSpaceError,
            ClearupError::CouldntRemoveFile { .. } => Self::CouldntRemoveFile,
            // Everything else is an environment or mutation fault
            // discovered mid-flight.
            _ => Self::RecurseManifest,
        }
    }
}
