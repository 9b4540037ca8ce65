//! Symbol resolution
//!
//! A [`Resolver`] answers "does a unit of this name exist, and what is it",
//! plus resource lookups by path suffix. The environment composes several of
//! them into an ambient chain; the capture interceptor is one more resolver
//! wired into that chain or in front of it.

use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;

use crate::artifact::{Artifact, ArtifactIndex};

/// Trait for anything that can answer unit and resource lookups
pub trait Resolver: Send + Sync {
    /// Short label used in logs
    fn label(&self) -> &str;

    /// Resolve a unit by declared name
    fn resolve_unit(&self, name: &str) -> Option<Artifact>;

    /// Resolve resources whose path ends with `suffix`.
    ///
    /// When `first_only` is set at most one artifact is returned.
    fn resolve_resources(&self, suffix: &str, first_only: bool) -> Vec<Artifact>;

    /// Every unit name this resolver could answer right now
    fn unit_names(&self) -> Vec<String>;
}

/// Resolver over a fixed set of directories or archives
#[derive(Debug)]
pub struct PathResolver {
    label: String,
    index: ArtifactIndex,
}

impl PathResolver {
    pub fn new(label: impl Into<String>, index: ArtifactIndex) -> Self {
        Self {
            label: label.into(),
            index,
        }
    }

    pub fn scan<P: AsRef<Path>>(label: impl Into<String>, paths: &[P]) -> Self {
        Self::new(label, ArtifactIndex::build(paths))
    }

    pub fn index(&self) -> &ArtifactIndex {
        &self.index
    }
}

impl Resolver for PathResolver {
    fn label(&self) -> &str {
        &self.label
    }

    fn resolve_unit(&self, name: &str) -> Option<Artifact> {
        self.index.unit(name).cloned()
    }

    fn resolve_resources(&self, suffix: &str, first_only: bool) -> Vec<Artifact> {
        let matches = self.index.ending_with(suffix).cloned();
        if first_only {
            matches.take(1).collect()
        } else {
            matches.collect()
        }
    }

    fn unit_names(&self) -> Vec<String> {
        self.index.unit_names().map(str::to_string).collect()
    }
}

/// Units defined into the environment at run time
#[derive(Debug, Default)]
pub struct DefinedUnits {
    units: DashMap<String, Artifact>,
}

impl DefinedUnits {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a unit; an existing definition of the same name is kept.
    /// Returns whether the unit was newly defined.
    pub fn define(&self, artifact: Artifact) -> bool {
        let mut inserted = false;
        self.units
            .entry(artifact.name().to_string())
            .or_insert_with(|| {
                inserted = true;
                artifact
            });
        inserted
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

impl Resolver for DefinedUnits {
    fn label(&self) -> &str {
        "defined"
    }

    fn resolve_unit(&self, name: &str) -> Option<Artifact> {
        self.units.get(name).map(|entry| entry.value().clone())
    }

    fn resolve_resources(&self, _suffix: &str, _first_only: bool) -> Vec<Artifact> {
        Vec::new()
    }

    fn unit_names(&self) -> Vec<String> {
        self.units.iter().map(|entry| entry.key().clone()).collect()
    }
}

/// Ordered chain: the first resolver that answers wins
#[derive(Clone, Default)]
pub struct ChainResolver {
    links: Vec<Arc<dyn Resolver>>,
}

impl ChainResolver {
    pub fn new(links: Vec<Arc<dyn Resolver>>) -> Self {
        Self { links }
    }

    pub fn links(&self) -> &[Arc<dyn Resolver>] {
        &self.links
    }
}

impl std::fmt::Debug for ChainResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.links.iter().map(|link| link.label()))
            .finish()
    }
}

impl Resolver for ChainResolver {
    fn label(&self) -> &str {
        "chain"
    }

    fn resolve_unit(&self, name: &str) -> Option<Artifact> {
        self.links.iter().find_map(|link| link.resolve_unit(name))
    }

    fn resolve_resources(&self, suffix: &str, first_only: bool) -> Vec<Artifact> {
        let mut found = Vec::new();
        for link in &self.links {
            found.extend(link.resolve_resources(suffix, first_only));
            if first_only && !found.is_empty() {
                found.truncate(1);
                break;
            }
        }
        found
    }

    fn unit_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.links.iter().flat_map(|l| l.unit_names()).collect();
        names.sort();
        names.dedup();
        names
    }
}
