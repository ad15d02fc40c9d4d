//! Bundle manifests and the Manifest of Manifests.
//!
//! A manifest describes one published bundle at one version: the files
//! it owns, the bundles it includes, and enough bookkeeping (content
//! size, format, flags) for the updater to plan an operation. The MoM
//! is itself a manifest whose records point at the per-bundle manifests
//! for a release; its `hash` fields are what make the store
//! content-addressed.
//!
//! Manifests are TOML on the wire and parsed by hand from `toml::Value`
//! so that unknown keys fail loudly and the parsed form never aliases
//! the input.

pub mod store;

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};

use crate::digest::Hash;
use crate::errors::ClearupError;
use crate::utils::toml_utils::{
    get_integer, get_opt_bool, get_string, get_string_array, get_value,
};

pub const SUPPORTED_FORMATS: [u32; 1] = [1];
pub const DEFAULT_FORMAT: u32 = 1;

/// Component name of the Manifest of Manifests.
pub const MOM_COMPONENT: &str = "MoM";

/// The immutable base bundle. Never removable.
pub const OS_CORE_BUNDLE: &str = "os-core";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
    Symlink,
    /// The path must not exist after reconciliation. Carries a zero
    /// hash.
    Deleted,
    /// MoM only: the record references a per-bundle manifest.
    Manifest,
}

impl FileKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Directory => "dir",
            Self::Symlink => "link",
            Self::Deleted => "deleted",
            Self::Manifest => "manifest",
        }
    }
}

impl FromStr for FileKind {
    type Err = ClearupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "file" => Self::File,
            "dir" => Self::Directory,
            "link" => Self::Symlink,
            "deleted" => Self::Deleted,
            "manifest" => Self::Manifest,
            _ => return Err(ClearupError::ExpectedType("file kind", s.to_owned())),
        })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FileFlags {
    /// Never touch the installed copy, even when outdated.
    pub do_not_update: bool,
    pub experimental: bool,
    /// Present in the manifest but invisible to reconciliation.
    pub ignored: bool,
}

impl FileFlags {
    fn from_names(names: &[String], path: &str) -> Result<Self> {
        let mut flags = Self::default();
        for name in names {
            match name.as_str() {
                "do-not-update" => flags.do_not_update = true,
                "experimental" => flags.experimental = true,
                "ignored" => flags.ignored = true,
                other => {
                    return Err(
                        ClearupError::ExpectedType("file flag", format!("{path}{other}")).into(),
                    )
                }
            }
        }
        Ok(flags)
    }

    fn names(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.do_not_update {
            out.push("do-not-update".to_owned());
        }
        if self.experimental {
            out.push("experimental".to_owned());
        }
        if self.ignored {
            out.push("ignored".to_owned());
        }
        out
    }
}

/// One path in one manifest version.
#[derive(Clone, Debug, PartialEq)]
pub struct FileRecord {
    /// Absolute, canonical path. For MoM records this is the component
    /// name instead.
    pub path: PathBuf,
    pub hash: Hash,
    pub kind: FileKind,
    /// Version at which this record last changed.
    pub last_change: u32,
    pub flags: FileFlags,
}

impl FileRecord {
    pub fn is_deleted(&self) -> bool {
        self.kind == FileKind::Deleted
    }

    /// Records the staged installer acts on. Deleted, pinned and
    /// ignored records are left alone.
    pub fn is_installable(&self) -> bool {
        !self.is_deleted() && !self.flags.do_not_update && !self.flags.ignored
    }

    fn from_toml(mut table: toml::value::Table, path: &str) -> Result<Self> {
        let record_path = get_string(&mut table, "path", path)?;
        let hash: Hash = get_string(&mut table, "hash", path)?.parse()?;
        let kind: FileKind = get_string(&mut table, "type", path)?.parse()?;
        let last_change = get_integer(&mut table, "last-change", path)? as u32;
        let flag_names = get_string_array(&mut table, "flags", path)?;
        Ok(Self {
            path: PathBuf::from(record_path),
            hash,
            kind,
            last_change,
            flags: FileFlags::from_names(&flag_names, path)?,
        })
    }

    fn into_toml(self) -> toml::value::Table {
        let mut result = toml::value::Table::new();
        result.insert(
            "path".to_owned(),
            toml::Value::String(self.path.to_string_lossy().into_owned()),
        );
        result.insert("hash".to_owned(), toml::Value::String(self.hash.to_string()));
        result.insert(
            "type".to_owned(),
            toml::Value::String(self.kind.as_str().to_owned()),
        );
        result.insert(
            "last-change".to_owned(),
            toml::Value::Integer(i64::from(self.last_change)),
        );
        let flags = self.flags.names();
        if !flags.is_empty() {
            result.insert(
                "flags".to_owned(),
                toml::Value::Array(flags.into_iter().map(toml::Value::String).collect()),
            );
        }
        result
    }
}

/// A parsed bundle description.
#[derive(Clone, Debug, PartialEq)]
pub struct Manifest {
    pub component: String,
    pub version: u32,
    pub format: u32,
    /// Ordered by `path`, unique by `path`.
    pub files: Vec<FileRecord>,
    /// Mandatory dependencies.
    pub includes: Vec<String>,
    /// Installed unless the caller opts out.
    pub optional: Vec<String>,
    /// Sum of live file sizes, used for disk admission.
    pub contentsize: u64,
    pub is_experimental: bool,
}

impl Manifest {
    pub fn parse(data: &str) -> Result<Self> {
        let value: toml::Value = toml::from_str(data).context("could not parse manifest")?;
        let toml::Value::Table(table) = value else {
            bail!("manifest is not a table");
        };
        let manifest = Self::from_toml(table, "")?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn stringify(self) -> String {
        toml::to_string(&toml::Value::Table(self.into_toml())).expect("manifest serializes to toml")
    }

    fn from_toml(mut table: toml::value::Table, path: &str) -> Result<Self> {
        let format = get_integer(&mut table, "format", path)? as u32;
        if !SUPPORTED_FORMATS.contains(&format) {
            return Err(ClearupError::UnsupportedFormat(format).into());
        }

        let mut files = Vec::new();
        if let Ok(toml::Value::Array(records)) = get_value(&mut table, "file", path) {
            for (i, v) in records.into_iter().enumerate() {
                if let toml::Value::Table(t) = v {
                    files.push(FileRecord::from_toml(t, &format!("{path}file[{i}]."))?);
                }
            }
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));

        Ok(Self {
            component: get_string(&mut table, "component", path)?,
            version: get_integer(&mut table, "version", path)? as u32,
            format,
            files,
            includes: get_string_array(&mut table, "includes", path)?,
            optional: get_string_array(&mut table, "optional", path)?,
            contentsize: get_integer(&mut table, "contentsize", path)?.max(0) as u64,
            is_experimental: get_opt_bool(&mut table, "experimental", path)?.unwrap_or(false),
        })
    }

    fn into_toml(self) -> toml::value::Table {
        let mut result = toml::value::Table::new();
        result.insert(
            "format".to_owned(),
            toml::Value::Integer(i64::from(self.format)),
        );
        result.insert("component".to_owned(), toml::Value::String(self.component));
        result.insert(
            "version".to_owned(),
            toml::Value::Integer(i64::from(self.version)),
        );
        result.insert(
            "contentsize".to_owned(),
            toml::Value::Integer(self.contentsize as i64),
        );
        if self.is_experimental {
            result.insert("experimental".to_owned(), toml::Value::Boolean(true));
        }
        if !self.includes.is_empty() {
            result.insert(
                "includes".to_owned(),
                toml::Value::Array(self.includes.into_iter().map(toml::Value::String).collect()),
            );
        }
        if !self.optional.is_empty() {
            result.insert(
                "optional".to_owned(),
                toml::Value::Array(self.optional.into_iter().map(toml::Value::String).collect()),
            );
        }
        if !self.files.is_empty() {
            result.insert(
                "file".to_owned(),
                toml::Value::Array(
                    self.files
                        .into_iter()
                        .map(|f| toml::Value::Table(f.into_toml()))
                        .collect(),
                ),
            );
        }
        result
    }

    fn validate(&self) -> Result<()> {
        for pair in self.files.windows(2) {
            if pair[0].path == pair[1].path {
                bail!(
                    "manifest '{}' lists '{}' twice",
                    self.component,
                    pair[0].path.display()
                );
            }
        }
        for record in &self.files {
            if record.is_deleted() && !record.hash.is_zero() {
                bail!(
                    "deleted record '{}' in '{}' carries a non-zero hash",
                    record.path.display(),
                    self.component
                );
            }
        }
        for include in self.includes.iter().chain(self.optional.iter()) {
            if *include == self.component {
                bail!("manifest '{}' includes itself", self.component);
            }
        }
        Ok(())
    }

    pub fn is_mom(&self) -> bool {
        self.component == MOM_COMPONENT
    }

    /// Look a record up by path. Files are path-sorted, so this is a
    /// binary search.
    pub fn find_file(&self, path: &Path) -> Option<&FileRecord> {
        self.files
            .binary_search_by(|r| r.path.as_path().cmp(path))
            .ok()
            .map(|i| &self.files[i])
    }

    /// MoM only: the record referencing `component`'s manifest.
    pub fn submanifest(&self, component: &str) -> Option<&FileRecord> {
        self.find_file(Path::new(component))
            .filter(|r| r.kind == FileKind::Manifest)
    }

    /// MoM only: names of every published bundle.
    pub fn bundle_names(&self) -> impl Iterator<Item = &str> {
        self.files
            .iter()
            .filter(|r| r.kind == FileKind::Manifest)
            .filter_map(|r| r.path.to_str())
    }
}
