use std::collections::BTreeSet;

use dashmap::DashMap;

use crate::artifact::{Artifact, ArtifactKey, ArtifactKind};

/// Artifacts confirmed as resolved during execution.
///
/// Insert-only and idempotent per (kind, name, container); safe to share
/// between the interpreter, deferred threads and readers.
#[derive(Debug, Default)]
pub struct DiscoveredSet {
    entries: DashMap<ArtifactKey, Artifact>,
}

impl DiscoveredSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `artifact`; returns whether it was not already present
    pub fn insert(&self, artifact: &Artifact) -> bool {
        let mut inserted = false;
        self.entries.entry(artifact.key()).or_insert_with(|| {
            inserted = true;
            artifact.clone()
        });
        inserted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn sorted(&self, kind: ArtifactKind) -> Vec<Artifact> {
        let mut found: Vec<(ArtifactKey, Artifact)> = self
            .entries
            .iter()
            .filter(|entry| entry.key().kind == kind)
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        found.into_iter().map(|(_, artifact)| artifact).collect()
    }

    /// Discovered units, ordered by name then container
    pub fn units(&self) -> Vec<Artifact> {
        self.sorted(ArtifactKind::Unit)
    }

    /// Discovered resources, ordered by name then container
    pub fn resources(&self) -> Vec<Artifact> {
        self.sorted(ArtifactKind::Resource)
    }

    /// Discovered unit declaring `name`
    pub fn unit(&self, name: &str) -> Option<Artifact> {
        self.units().into_iter().find(|unit| unit.name() == name)
    }

    pub fn unit_names(&self) -> BTreeSet<String> {
        self.entries
            .iter()
            .filter(|entry| entry.key().kind == ArtifactKind::Unit)
            .map(|entry| entry.key().name.clone())
            .collect()
    }

    /// Replace the whole content, used when the store becomes the result
    pub fn replace_with(&self, artifacts: impl IntoIterator<Item = Artifact>) {
        self.entries.clear();
        for artifact in artifacts {
            self.insert(&artifact);
        }
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
