//! Loading, caching and recursive expansion of manifests.
//!
//! The store is content-addressed: a component at a given version is
//! immutable, so a second request for the same (component, version)
//! pair is served from memory without revalidation. When the mix
//! overlay is enabled, a locally authored manifest shadows the upstream
//! one for the same version.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use tracing::{debug, warn};

use crate::context::Context;
use crate::digest::hash_bytes;
use crate::errors::ClearupError;
use crate::fetch::{Fetcher, Resource};
use crate::manifest::{Manifest, MOM_COMPONENT};
use crate::subscribe::SubscriptionSet;
use crate::utils;

#[derive(Debug, Default)]
pub struct ManifestStore {
    cache: HashMap<(String, u32), Arc<Manifest>>,
}

impl ManifestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the Manifest of Manifests for `version`.
    pub fn load_mom(
        &mut self,
        cx: &Context,
        fetcher: &dyn Fetcher,
        version: u32,
    ) -> Result<Arc<Manifest>> {
        let key = (MOM_COMPONENT.to_owned(), version);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(Arc::clone(cached));
        }

        let mom = self
            .load_raw(cx, fetcher, MOM_COMPONENT, version, Resource::Mom { version })
            .with_context(|| ClearupError::CouldntLoadMom(version))?;
        if !mom.is_mom() {
            return Err(anyhow::anyhow!("'{}' is not a MoM", mom.component)
                .context(ClearupError::CouldntLoadMom(version)));
        }

        let mom = Arc::new(mom);
        self.cache.insert(key, Arc::clone(&mom));
        Ok(mom)
    }

    /// Load the manifest of one bundle listed in `mom`. The MoM record
    /// pins both the version to fetch and the hash the payload must
    /// carry.
    pub fn load_manifest(
        &mut self,
        cx: &Context,
        fetcher: &dyn Fetcher,
        component: &str,
        mom: &Manifest,
    ) -> Result<Arc<Manifest>> {
        let record = mom
            .submanifest(component)
            .ok_or_else(|| ClearupError::InvalidBundle(component.to_owned()))?;
        let version = record.last_change;

        let key = (component.to_owned(), version);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(Arc::clone(cached));
        }

        let fail = || ClearupError::CouldntLoadManifest {
            component: component.to_owned(),
            version,
        };

        let manifest = if let Some(local) = self.load_mix_local(cx, component, version)? {
            local
        } else {
            let resource = Resource::BundleManifest { version, component };
            let bytes = fetcher.fetch(resource).with_context(fail)?;
            let calculated = hash_bytes(&bytes);
            if calculated != record.hash {
                return Err(anyhow::Error::new(ClearupError::ChecksumFailed {
                    name: format!("manifest for '{component}'"),
                    expected: record.hash.to_string(),
                    calculated: calculated.to_string(),
                })
                .context(fail()));
            }
            let text = String::from_utf8(bytes).map_err(|_| fail())?;
            Manifest::parse(&text).with_context(fail)?
        };

        if manifest.component != component {
            return Err(
                anyhow::anyhow!("manifest declares component '{}'", manifest.component)
                    .context(fail()),
            );
        }

        let manifest = Arc::new(manifest);
        self.cache.insert(key, Arc::clone(&manifest));
        Ok(manifest)
    }

    /// Fetch the manifest for every subscribed component, yielding the
    /// transitive set in subscription order.
    pub fn recurse(
        &mut self,
        cx: &Context,
        fetcher: &dyn Fetcher,
        mom: &Manifest,
        subs: &SubscriptionSet,
    ) -> Result<Vec<Arc<Manifest>>> {
        let mut manifests = Vec::with_capacity(subs.len());
        for sub in subs.iter() {
            let manifest = self
                .load_manifest(cx, fetcher, &sub.component, mom)
                .context(ClearupError::RecurseManifest)?;
            manifests.push(manifest);
        }
        Ok(manifests)
    }

    fn load_raw(
        &self,
        cx: &Context,
        fetcher: &dyn Fetcher,
        component: &str,
        version: u32,
        resource: Resource<'_>,
    ) -> Result<Manifest> {
        if let Some(local) = self.load_mix_local(cx, component, version)? {
            return Ok(local);
        }
        let bytes = fetcher.fetch(resource)?;
        let text = String::from_utf8(bytes).map_err(|_| anyhow::anyhow!("manifest is not UTF-8"))?;
        Manifest::parse(&text)
    }

    /// A locally authored manifest shadowing upstream, or `None` when
    /// mix is off or nothing local exists for this version.
    fn load_mix_local(
        &self,
        cx: &Context,
        component: &str,
        version: u32,
    ) -> Result<Option<Manifest>> {
        if !cx.mix_enabled() {
            return Ok(None);
        }
        let path = cx.mix_dir(version).join(format!("Manifest.{component}"));
        if !utils::is_file(&path) {
            return Ok(None);
        }
        debug!("using mix manifest for '{component}' from {}", path.display());
        let text = utils::read_file("mix manifest", &path)?;
        match Manifest::parse(&text) {
            Ok(manifest) => Ok(Some(manifest)),
            Err(e) => {
                // A broken local overlay must not brick the updater;
                // fall back to upstream.
                warn!(
                    "ignoring unparsable mix manifest '{}': {e:#}",
                    path.display()
                );
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::DirFetcher;
    use crate::test::MockServer;

    #[test]
    fn loads_and_caches() {
        let tmp = tempfile::tempdir().unwrap();
        let mut server = MockServer::new(tmp.path().join("mirror"), 10);
        server.bundle("editors", &[], &[], &[("/usr/bin/ed", "ed 1.0")]);
        server.publish().unwrap();

        let cx = Context::new(tmp.path().join("root"), tmp.path().join("state"));
        let fetcher = DirFetcher::new(tmp.path().join("mirror"));
        let mut store = ManifestStore::new();

        let mom = store.load_mom(&cx, &fetcher, 10).unwrap();
        let first = store.load_manifest(&cx, &fetcher, "editors", &mom).unwrap();
        // Second load must come from cache: the same allocation.
        let second = store.load_manifest(&cx, &fetcher, "editors", &mom).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.component, "editors");
    }

    #[test]
    fn manifest_hash_must_match_mom() {
        let tmp = tempfile::tempdir().unwrap();
        let mut server = MockServer::new(tmp.path().join("mirror"), 10);
        server.bundle("editors", &[], &[], &[("/usr/bin/ed", "ed 1.0")]);
        server.publish().unwrap();

        // Corrupt the published manifest after the MoM recorded its hash.
        let manifest_path = tmp.path().join("mirror/10/Manifest.editors");
        let mut text = std::fs::read_to_string(&manifest_path).unwrap();
        text.push_str("\n# tampered\n");
        std::fs::write(&manifest_path, text).unwrap();

        let cx = Context::new(tmp.path().join("root"), tmp.path().join("state"));
        let fetcher = DirFetcher::new(tmp.path().join("mirror"));
        let mut store = ManifestStore::new();

        let mom = store.load_mom(&cx, &fetcher, 10).unwrap();
        let err = store
            .load_manifest(&cx, &fetcher, "editors", &mom)
            .unwrap_err();
        assert_eq!(
            crate::ExitStatus::from_error(&err),
            crate::ExitStatus::CouldntLoadManifest
        );
    }

    #[test]
    fn mix_overlay_shadows_upstream() {
        let tmp = tempfile::tempdir().unwrap();
        let mut server = MockServer::new(tmp.path().join("mirror"), 10);
        server.bundle("editors", &[], &[], &[("/usr/bin/ed", "ed 1.0")]);
        server.publish().unwrap();

        let cx = Context::new(tmp.path().join("root"), tmp.path().join("state")).with_mix(true);

        // Author a local manifest for the same component and version.
        let upstream = std::fs::read_to_string(tmp.path().join("mirror/10/Manifest.editors"))
            .unwrap();
        let mut local = Manifest::parse(&upstream).unwrap();
        local.contentsize = 12345;
        let mix_path = cx.mix_dir(10).join("Manifest.editors");
        std::fs::create_dir_all(mix_path.parent().unwrap()).unwrap();
        std::fs::write(&mix_path, local.stringify()).unwrap();

        let fetcher = DirFetcher::new(tmp.path().join("mirror"));
        let mut store = ManifestStore::new();
        let mom = store.load_mom(&cx, &fetcher, 10).unwrap();
        let loaded = store.load_manifest(&cx, &fetcher, "editors", &mom).unwrap();
        assert_eq!(loaded.contentsize, 12345);
    }

    #[test]
    fn unknown_bundle_is_invalid() {
        let tmp = tempfile::tempdir().unwrap();
        let mut server = MockServer::new(tmp.path().join("mirror"), 10);
        server.bundle("editors", &[], &[], &[]);
        server.publish().unwrap();

        let cx = Context::new(tmp.path().join("root"), tmp.path().join("state"));
        let fetcher = DirFetcher::new(tmp.path().join("mirror"));
        let mut store = ManifestStore::new();
        let mom = store.load_mom(&cx, &fetcher, 10).unwrap();
        let err = store.load_manifest(&cx, &fetcher, "ZZZ", &mom).unwrap_err();
        assert_eq!(
            crate::ExitStatus::from_error(&err),
            crate::ExitStatus::InvalidBundle
        );
    }
}
