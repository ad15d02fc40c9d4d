//! Content digests.
//!
//! Everything in the system is addressed by a fixed-width SHA-256
//! digest: file payloads in the staging area, manifests in the MoM, and
//! integrity checks before any content is committed to its final path.
//! Equality of hashes implies equality of content.

use std::fmt;
use std::fs::File;
use std::io;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

use crate::errors::ClearupError;

pub const HASH_LEN: usize = 32;
pub const HASH_HEX_LEN: usize = 64;

/// A SHA-256 content digest.
///
/// The all-zero hash is reserved: it marks deleted records (nothing to
/// stage) and records synthesized during path repair.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hash([u8; HASH_LEN]);

impl Hash {
    pub const ZERO: Self = Self([0u8; HASH_LEN]);

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&faster_hex::hex_string(&self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({self})")
    }
}

impl FromStr for Hash {
    type Err = ClearupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != HASH_HEX_LEN {
            return Err(ClearupError::InvalidHash(s.to_owned()));
        }
        let mut out = [0u8; HASH_LEN];
        faster_hex::hex_decode(s.as_bytes(), &mut out)
            .map_err(|_| ClearupError::InvalidHash(s.to_owned()))?;
        Ok(Self(out))
    }
}

pub fn hash_bytes(data: &[u8]) -> Hash {
    let digest = Sha256::digest(data);
    let mut out = [0u8; HASH_LEN];
    out.copy_from_slice(&digest);
    Hash(out)
}

/// Digest of the content at `path`.
///
/// Regular files hash their bytes; symlinks hash the bytes of their
/// target path, mirroring how link content is staged.
pub fn hash_file(path: &Path) -> Result<Hash> {
    let meta = path
        .symlink_metadata()
        .with_context(|| format!("could not stat '{}'", path.display()))?;
    if meta.file_type().is_symlink() {
        let target = path
            .read_link()
            .with_context(|| format!("could not read link '{}'", path.display()))?;
        return Ok(hash_bytes(target.as_os_str().as_encoded_bytes()));
    }

    let mut file = File::open(path).with_context(|| ClearupError::ReadingFile {
        name: "content",
        path: path.to_path_buf(),
    })?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)
        .with_context(|| format!("could not hash '{}'", path.display()))?;
    let digest = hasher.finalize();
    let mut out = [0u8; HASH_LEN];
    out.copy_from_slice(&digest);
    Ok(Hash(out))
}

/// Does the content at `path` hash to `expected`?
pub fn verify(path: &Path, expected: &Hash) -> Result<bool> {
    Ok(hash_file(path)? == *expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let h = hash_bytes(b"os-core");
        let parsed: Hash = h.to_string().parse().unwrap();
        assert_eq!(h, parsed);
        assert_eq!(h.to_string().len(), HASH_HEX_LEN);
    }

    #[test]
    fn zero_hash_is_reserved() {
        let z: Hash = "0".repeat(64).parse().unwrap();
        assert!(z.is_zero());
        assert!(!hash_bytes(b"").is_zero());
    }

    #[test]
    fn verify_detects_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        std::fs::write(&path, b"payload").unwrap();
        let good = hash_bytes(b"payload");
        assert!(verify(&path, &good).unwrap());
        std::fs::write(&path, b"tampered").unwrap();
        assert!(!verify(&path, &good).unwrap());
    }
}
