//! The fetcher seam.
//!
//! The core never talks to the network itself. Everything it needs from
//! the content server is pulled through [`Fetcher`], keyed by resource
//! kind, version and identifier. The front-end supplies a transport; the
//! directory-backed implementation here serves local mirrors and the
//! test suite.

use std::path::{Path, PathBuf};

use thiserror::Error as ThisError;

use crate::digest::Hash;
use crate::utils::raw;

/// One addressable blob on the content server.
#[derive(Debug, Clone, Copy)]
pub enum Resource<'a> {
    Mom {
        version: u32,
    },
    BundleManifest {
        version: u32,
        component: &'a str,
    },
    FullFile {
        version: u32,
        hash: &'a Hash,
    },
    /// Batched download of the full-files a bundle gained between two
    /// versions. `from == 0` asks for the zero pack (everything).
    Pack {
        component: &'a str,
        from: u32,
        to: u32,
    },
}

impl Resource<'_> {
    /// Mirror-relative location of this resource. Shared by the
    /// directory fetcher and the mock servers in the test suite.
    pub fn rel_path(&self) -> PathBuf {
        match self {
            Resource::Mom { version } => PathBuf::from(format!("{version}/Manifest.MoM")),
            Resource::BundleManifest { version, component } => {
                PathBuf::from(format!("{version}/Manifest.{component}"))
            }
            Resource::FullFile { version, hash } => {
                PathBuf::from(format!("{version}/files/{hash}"))
            }
            Resource::Pack {
                component,
                from,
                to,
            } => PathBuf::from(format!("{to}/pack-{component}-from-{from}-to-{to}.tar.gz")),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Resource::Mom { version } => format!("MoM for version {version}"),
            Resource::BundleManifest { version, component } => {
                format!("manifest for '{component}' at version {version}")
            }
            Resource::FullFile { hash, .. } => format!("full-file {hash}"),
            Resource::Pack {
                component,
                from,
                to,
            } => format!("pack for '{component}' from {from} to {to}"),
        }
    }
}

#[derive(ThisError, Debug)]
pub enum FetchError {
    #[error("{0} was not found on the content server")]
    NotFound(String),
    #[error("could not retrieve {resource}")]
    Transport {
        resource: String,
        #[source]
        source: std::io::Error,
    },
}

/// Transport abstraction over the content server.
pub trait Fetcher {
    fn fetch(&self, resource: Resource<'_>) -> Result<Vec<u8>, FetchError>;
}

/// Serves a mirror laid out on the local filesystem:
/// `<root>/<version>/Manifest.MoM`, `<root>/<version>/files/<hash>`, …
#[derive(Debug, Clone)]
pub struct DirFetcher {
    root: PathBuf,
}

impl DirFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Fetcher for DirFetcher {
    fn fetch(&self, resource: Resource<'_>) -> Result<Vec<u8>, FetchError> {
        let path = self.root.join(resource.rel_path());
        if !raw::path_exists(&path) {
            return Err(FetchError::NotFound(resource.describe()));
        }
        raw::read_bytes(&path).map_err(|source| FetchError::Transport {
            resource: resource.describe(),
            source,
        })
    }
}
