//! Shared test support: a mock content server publishing a mirror tree
//! that `DirFetcher` serves, plus sandboxed contexts.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::context::Context;
use crate::digest::{hash_bytes, Hash};
use crate::manifest::{FileFlags, FileKind, FileRecord, Manifest, MOM_COMPONENT};

pub(crate) struct MockServer {
    root: PathBuf,
    version: u32,
    bundles: Vec<MockBundle>,
}

pub(crate) struct MockBundle {
    name: String,
    includes: Vec<String>,
    optional: Vec<String>,
    files: Vec<MockFile>,
    contentsize: Option<u64>,
}

enum MockFile {
    File {
        path: String,
        contents: Vec<u8>,
        do_not_update: bool,
    },
    Dir {
        path: String,
    },
    Link {
        path: String,
        target: String,
    },
    Deleted {
        path: String,
    },
}

impl MockServer {
    pub(crate) fn new(root: impl Into<PathBuf>, version: u32) -> Self {
        Self {
            root: root.into(),
            version,
            bundles: Vec::new(),
        }
    }

    pub(crate) fn bundle(
        &mut self,
        name: &str,
        includes: &[&str],
        optional: &[&str],
        files: &[(&str, &str)],
    ) -> &mut MockBundle {
        let bundle = MockBundle {
            name: name.to_owned(),
            includes: includes.iter().map(|s| (*s).to_owned()).collect(),
            optional: optional.iter().map(|s| (*s).to_owned()).collect(),
            files: files
                .iter()
                .map(|(path, contents)| MockFile::File {
                    path: (*path).to_owned(),
                    contents: contents.as_bytes().to_vec(),
                    do_not_update: false,
                })
                .collect(),
            contentsize: None,
        };
        self.bundles.push(bundle);
        self.bundles.last_mut().unwrap()
    }

    /// The manifest this server publishes for `name`.
    pub(crate) fn manifest(&self, name: &str) -> Manifest {
        let bundle = self
            .bundles
            .iter()
            .find(|b| b.name == name)
            .unwrap_or_else(|| panic!("no mock bundle '{name}'"));
        bundle.build(self.version).0
    }

    /// Write the whole mirror: blobs, bundle manifests, and the MoM.
    pub(crate) fn publish(&self) -> Result<()> {
        let version_dir = self.root.join(self.version.to_string());
        fs::create_dir_all(version_dir.join("files"))?;

        let mut mom_records = Vec::new();
        for bundle in &self.bundles {
            let (manifest, blobs) = bundle.build(self.version);
            for (hash, contents) in blobs {
                fs::write(version_dir.join("files").join(hash.to_string()), contents)?;
            }
            let text = manifest.stringify();
            mom_records.push(FileRecord {
                path: PathBuf::from(&bundle.name),
                hash: hash_bytes(text.as_bytes()),
                kind: FileKind::Manifest,
                last_change: self.version,
                flags: FileFlags::default(),
            });
            fs::write(
                version_dir.join(format!("Manifest.{}", bundle.name)),
                text,
            )?;
        }

        mom_records.sort_by(|a, b| a.path.cmp(&b.path));
        let mom = Manifest {
            component: MOM_COMPONENT.to_owned(),
            version: self.version,
            format: 1,
            files: mom_records,
            includes: vec![],
            optional: vec![],
            contentsize: 0,
            is_experimental: false,
        };
        fs::write(version_dir.join("Manifest.MoM"), mom.stringify())?;
        Ok(())
    }

    /// Publish the zero pack for one bundle: a tarball of its staged
    /// blobs.
    pub(crate) fn publish_pack(&self, name: &str) -> Result<()> {
        use flate2::write::GzEncoder;
        use flate2::Compression;

        let bundle = self
            .bundles
            .iter()
            .find(|b| b.name == name)
            .unwrap_or_else(|| panic!("no mock bundle '{name}'"));
        let (_, blobs) = bundle.build(self.version);

        let path = self
            .root
            .join(self.version.to_string())
            .join(format!("pack-{name}-from-0-to-{}.tar.gz", self.version));
        fs::create_dir_all(path.parent().unwrap())?;
        let mut builder =
            tar::Builder::new(GzEncoder::new(fs::File::create(path)?, Compression::default()));
        for (hash, contents) in blobs {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, format!("staged/{hash}"), contents.as_slice())?;
        }
        builder.into_inner()?.finish()?;
        Ok(())
    }
}

impl MockBundle {
    pub(crate) fn dir(&mut self, path: &str) -> &mut Self {
        self.files.push(MockFile::Dir {
            path: path.to_owned(),
        });
        self
    }

    pub(crate) fn link(&mut self, path: &str, target: &str) -> &mut Self {
        self.files.push(MockFile::Link {
            path: path.to_owned(),
            target: target.to_owned(),
        });
        self
    }

    pub(crate) fn deleted(&mut self, path: &str) -> &mut Self {
        self.files.push(MockFile::Deleted {
            path: path.to_owned(),
        });
        self
    }

    pub(crate) fn pinned(&mut self, path: &str, contents: &str) -> &mut Self {
        self.files.push(MockFile::File {
            path: path.to_owned(),
            contents: contents.as_bytes().to_vec(),
            do_not_update: true,
        });
        self
    }

    pub(crate) fn contentsize(&mut self, bytes: u64) -> &mut Self {
        self.contentsize = Some(bytes);
        self
    }

    /// The manifest plus the (hash, contents) blobs backing it.
    fn build(&self, version: u32) -> (Manifest, Vec<(Hash, Vec<u8>)>) {
        let mut records = Vec::new();
        let mut blobs = Vec::new();
        let mut size = 0u64;

        for file in &self.files {
            let record = match file {
                MockFile::File {
                    path,
                    contents,
                    do_not_update,
                } => {
                    let hash = hash_bytes(contents);
                    blobs.push((hash, contents.clone()));
                    size += contents.len() as u64;
                    FileRecord {
                        path: PathBuf::from(path),
                        hash,
                        kind: FileKind::File,
                        last_change: version,
                        flags: FileFlags {
                            do_not_update: *do_not_update,
                            ..Default::default()
                        },
                    }
                }
                MockFile::Dir { path } => FileRecord {
                    path: PathBuf::from(path),
                    hash: hash_bytes(path.as_bytes()),
                    kind: FileKind::Directory,
                    last_change: version,
                    flags: FileFlags::default(),
                },
                MockFile::Link { path, target } => {
                    let hash = hash_bytes(target.as_bytes());
                    blobs.push((hash, target.as_bytes().to_vec()));
                    FileRecord {
                        path: PathBuf::from(path),
                        hash,
                        kind: FileKind::Symlink,
                        last_change: version,
                        flags: FileFlags::default(),
                    }
                }
                MockFile::Deleted { path } => FileRecord {
                    path: PathBuf::from(path),
                    hash: Hash::ZERO,
                    kind: FileKind::Deleted,
                    last_change: version,
                    flags: FileFlags::default(),
                },
            };
            records.push(record);
        }
        records.sort_by(|a, b| a.path.cmp(&b.path));

        let manifest = Manifest {
            component: self.name.clone(),
            version,
            format: 1,
            files: records,
            includes: self.includes.clone(),
            optional: self.optional.clone(),
            contentsize: self.contentsize.unwrap_or(size),
            is_experimental: false,
        };
        (manifest, blobs)
    }
}

/// A sandboxed context whose prefix records `version` as the current
/// OS version.
pub(crate) fn test_context(tmp: &Path, version: u32) -> Context {
    let prefix = tmp.join("root");
    let state = tmp.join("state");
    fs::create_dir_all(prefix.join("usr/share/clear/bundles")).unwrap();
    fs::create_dir_all(&state).unwrap();
    fs::write(
        prefix.join("usr/share/clear/version"),
        format!("{version}\n"),
    )
    .unwrap();
    Context::new(prefix, state)
}

/// Stamp bundles as installed in the system view.
pub(crate) fn mark_installed(cx: &Context, names: &[&str]) {
    let dir = cx.system_bundles_dir();
    fs::create_dir_all(&dir).unwrap();
    for name in names {
        fs::write(dir.join(name), b"").unwrap();
    }
}
