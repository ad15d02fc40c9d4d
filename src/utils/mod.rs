//! Utility functions for clearup.
//!
//! The `raw` submodule holds the plain `io::Result` primitives; the
//! wrappers here attach the failing path and a short role name so error
//! chains read like "could not read version file: '...'".

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::errors::ClearupError;

pub(crate) mod raw;
pub(crate) mod toml_utils;

pub(crate) use raw::{is_directory, is_file};

pub(crate) fn ensure_dir_exists(name: &'static str, path: &Path) -> Result<bool> {
    raw::ensure_dir_exists(path).with_context(|| ClearupError::CreatingDirectory {
        name,
        path: PathBuf::from(path),
    })
}

pub(crate) fn read_file(name: &'static str, path: &Path) -> Result<String> {
    raw::read_file(path).with_context(|| ClearupError::ReadingFile {
        name,
        path: PathBuf::from(path),
    })
}

pub(crate) fn read_bytes(name: &'static str, path: &Path) -> Result<Vec<u8>> {
    raw::read_bytes(path).with_context(|| ClearupError::ReadingFile {
        name,
        path: PathBuf::from(path),
    })
}

pub(crate) fn write_bytes(name: &'static str, path: &Path, contents: &[u8]) -> Result<()> {
    raw::write_bytes(path, contents).with_context(|| ClearupError::WritingFile {
        name,
        path: PathBuf::from(path),
    })
}

pub(crate) fn copy_file(name: &'static str, src: &Path, dest: &Path) -> Result<()> {
    fs::copy(src, dest)
        .map(|_| ())
        .with_context(|| ClearupError::CopyingFile {
            name,
            src: PathBuf::from(src),
            dest: PathBuf::from(dest),
        })
}

pub(crate) fn rename(src: &Path, dest: &Path) -> Result<()> {
    fs::rename(src, dest).with_context(|| ClearupError::RenamingFile {
        src: PathBuf::from(src),
        dest: PathBuf::from(dest),
    })
}

pub(crate) fn remove_file(path: &Path) -> Result<()> {
    fs::remove_file(path).with_context(|| ClearupError::CouldntRemoveFile {
        path: PathBuf::from(path),
    })
}

/// List the plain entry names of a directory. A missing directory reads
/// as empty.
pub(crate) fn dir_entry_names(name: &'static str, path: &Path) -> Result<Vec<String>> {
    if !is_directory(path) {
        return Ok(Vec::new());
    }
    let context = || ClearupError::ReadingDirectory {
        name,
        path: PathBuf::from(path),
    };
    let mut names = Vec::new();
    for entry in fs::read_dir(path).with_context(context)? {
        let entry = entry.with_context(context)?;
        if let Some(s) = entry.file_name().to_str() {
            names.push(s.to_owned());
        }
    }
    names.sort();
    Ok(names)
}
