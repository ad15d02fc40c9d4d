//! Bundle dependency resolution.
//!
//! Forward traversal turns a seed list of bundle names into the full
//! subscription closure over `includes` (and `optional`, unless the
//! caller opted out). Reverse traversal answers "which installed
//! bundles would break if this one disappeared".

use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::context::Context;
use crate::fetch::Fetcher;
use crate::manifest::store::ManifestStore;
use crate::manifest::Manifest;
use crate::subscribe::SubscriptionSet;

#[derive(Clone, Copy, Debug)]
pub struct ResolveOptions {
    /// Materialize bundles even when they are already installed
    /// locally. Install passes `false` so installed bundles short out
    /// of the walk.
    pub find_all: bool,
    /// Leave `optional` includes out of the closure. Only honored on
    /// the forward walk; reverse resolution always follows real
    /// `includes`.
    pub skip_optional: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            find_all: false,
            skip_optional: false,
        }
    }
}

/// Outcome of a forward traversal. The reference implementation packed
/// this into a bitmask; a structured result keeps the caller out of the
/// bit-decoding business.
#[derive(Debug, Default)]
pub struct ResolveReport {
    /// At least one bundle was newly subscribed.
    pub added_new: bool,
    /// At least one manifest failed to load; the walk skipped it.
    pub had_error: bool,
    /// Names that do not exist in the MoM, in encounter order.
    pub bad_names: Vec<String>,
}

impl ResolveReport {
    pub fn is_clean(&self) -> bool {
        !self.had_error && self.bad_names.is_empty()
    }

    fn absorb(&mut self, other: Self) {
        self.added_new |= other.added_new;
        self.had_error |= other.had_error;
        self.bad_names.extend(other.bad_names);
    }
}

/// Grow `subs` with `names` and their transitive includes.
///
/// Already-installed bundles are skipped (and not recursed) unless
/// `find_all` is set. A bundle that is already subscribed ends the walk
/// at depth > 0; at depth 0 the seed is still descended into so the
/// caller always sees its closure materialized.
#[allow(clippy::too_many_arguments)]
pub fn add_subscriptions(
    store: &mut ManifestStore,
    cx: &Context,
    fetcher: &dyn Fetcher,
    mom: &Manifest,
    names: &[String],
    subs: &mut SubscriptionSet,
    installed: &HashSet<String>,
    opts: ResolveOptions,
    depth: usize,
) -> ResolveReport {
    let mut report = ResolveReport::default();

    for name in names {
        let Some(record) = mom.submanifest(name) else {
            warn!("bundle '{name}' is invalid, skipping");
            report.bad_names.push(name.clone());
            continue;
        };

        if !opts.find_all && installed.contains(name) {
            debug!("bundle '{name}' is already installed, skipping");
            continue;
        }

        let manifest = match store.load_manifest(cx, fetcher, name, mom) {
            Ok(m) => m,
            Err(e) => {
                warn!("could not load manifest for '{name}': {e:#}");
                report.had_error = true;
                continue;
            }
        };

        if subs.is_subscribed(name) {
            // Deeper copies of an already-subscribed bundle terminate
            // the walk; the top level still descends so the seed's
            // closure is materialized.
            if depth > 0 {
                continue;
            }
        } else {
            subs.insert(name, record.last_change);
            report.added_new = true;
        }

        let sub = add_subscriptions(
            store,
            cx,
            fetcher,
            mom,
            &manifest.includes,
            subs,
            installed,
            opts,
            depth + 1,
        );
        report.absorb(sub);

        if !opts.skip_optional {
            let sub = add_subscriptions(
                store,
                cx,
                fetcher,
                mom,
                &manifest.optional,
                subs,
                installed,
                opts,
                depth + 1,
            );
            report.absorb(sub);
        }
    }

    report
}

/// Result of a reverse traversal: the installed bundles whose
/// transitive `includes` reach the target.
#[derive(Debug, Default)]
pub struct RequiredByReport {
    /// (recursion depth, dependent name) in visit order; drives the
    /// rendered tree.
    entries: Vec<(usize, String)>,
    /// Dependent names, deduplicated, in first-seen order.
    names: Vec<String>,
}

impl RequiredByReport {
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn count(&self) -> usize {
        self.names.len()
    }

    /// Indented dependency tree, collected first and rendered in a
    /// second pass.
    pub fn render(&self, target: &str) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "* {target}");
        for (depth, name) in &self.entries {
            let _ = writeln!(out, "{}|-- {name}", "  ".repeat(depth + 1));
        }
        out
    }
}

/// Which installed bundles transitively include `target`?
///
/// `submanifests` must already hold the manifest of every installed
/// bundle. Names in `exclusions` (bundles the caller is also removing)
/// are not reported and not walked.
pub fn required_by(
    submanifests: &[Arc<Manifest>],
    target: &str,
    exclusions: &HashSet<String>,
) -> RequiredByReport {
    let mut report = RequiredByReport::default();
    let mut visited = HashSet::new();
    walk_dependents(submanifests, target, exclusions, &mut visited, 0, &mut report);
    report
}

fn walk_dependents(
    submanifests: &[Arc<Manifest>],
    target: &str,
    exclusions: &HashSet<String>,
    visited: &mut HashSet<String>,
    depth: usize,
    report: &mut RequiredByReport,
) {
    // Visited-set membership bounds the walk; an include cycle would be
    // a server bug.
    if !visited.insert(target.to_owned()) {
        return;
    }

    for manifest in submanifests {
        let name = manifest.component.as_str();
        if name == target || exclusions.contains(name) {
            continue;
        }
        if !manifest.includes.iter().any(|i| i == target) {
            continue;
        }

        report.entries.push((depth, name.to_owned()));
        if !report.names.iter().any(|n| n == name) {
            report.names.push(name.to_owned());
        }
        walk_dependents(submanifests, name, exclusions, visited, depth + 1, report);
    }
}
