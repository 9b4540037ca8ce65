//! Artifact index over a set of candidate base paths
//!
//! Built once per capture session and read-only afterwards. Lookups by
//! declared unit name honour base-path order: the first container that
//! declares a name wins.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::archive::{is_archive, read_archive};
use super::Artifact;

/// In-memory map of every candidate artifact found under the base paths
#[derive(Debug, Default, Clone)]
pub struct ArtifactIndex {
    base_paths: Vec<PathBuf>,
    /// Artifacts in scan order
    artifacts: Vec<Artifact>,
    /// Absolute path → position in `artifacts`
    by_path: HashMap<PathBuf, usize>,
    /// Declared unit name → position of the first declaring artifact
    by_unit_name: HashMap<String, usize>,
}

impl ArtifactIndex {
    /// Scan every base path, in order.
    ///
    /// Directories are walked recursively (sorted by file name so the result
    /// is deterministic), archives are expanded. Unreadable entries are
    /// skipped with a warning; the scan itself never fails.
    pub fn build<P: AsRef<Path>>(base_paths: &[P]) -> Self {
        let mut index = Self {
            base_paths: base_paths.iter().map(|p| p.as_ref().to_path_buf()).collect(),
            ..Self::default()
        };
        tracing::info!(
            paths = %index
                .base_paths
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            "Scanning base paths"
        );

        for base_path in index.base_paths.clone() {
            index.scan_base_path(&base_path);
        }

        tracing::debug!(
            artifacts = index.artifacts.len(),
            units = index.by_unit_name.len(),
            "Artifact index built"
        );
        index
    }

    fn scan_base_path(&mut self, base_path: &Path) {
        if !base_path.exists() {
            tracing::warn!(path = %base_path.display(), "Base path does not exist, skipping");
            return;
        }
        if base_path.is_file() {
            if is_archive(base_path) {
                self.scan_archive(base_path);
            } else {
                tracing::warn!(
                    path = %base_path.display(),
                    "Base path is a plain file, not a container; skipping"
                );
            }
            return;
        }

        for entry in WalkDir::new(base_path).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(
                        base = %base_path.display(),
                        error = %e,
                        "Skipping unreadable directory entry"
                    );
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if is_archive(path) {
                self.scan_archive(path);
                continue;
            }
            let Some(relative) = relative_path(base_path, path) else {
                continue;
            };
            match fs::read(path) {
                Ok(content) => self.insert(Artifact::classify(base_path, relative, content)),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable file");
                }
            }
        }
    }

    fn scan_archive(&mut self, archive_path: &Path) {
        match read_archive(archive_path) {
            Ok(artifacts) => {
                for artifact in artifacts {
                    self.insert(artifact);
                }
            }
            Err(e) => {
                tracing::warn!(
                    archive = %archive_path.display(),
                    error = %e,
                    "Skipping unreadable archive"
                );
            }
        }
    }

    fn insert(&mut self, artifact: Artifact) {
        let position = self.artifacts.len();
        // Same file reachable from two base paths: the first scan keeps it.
        match self.by_path.entry(artifact.absolute_path().to_path_buf()) {
            Entry::Occupied(_) => return,
            Entry::Vacant(slot) => {
                slot.insert(position);
            }
        }
        if artifact.is_unit() {
            self.by_unit_name
                .entry(artifact.name().to_string())
                .or_insert(position);
        }
        self.artifacts.push(artifact);
    }

    /// Base paths in the order they were scanned
    pub fn base_paths(&self) -> &[PathBuf] {
        &self.base_paths
    }

    /// First unit declaring `name`, in base-path order
    pub fn unit(&self, name: &str) -> Option<&Artifact> {
        self.by_unit_name.get(name).map(|&i| &self.artifacts[i])
    }

    /// Every unit declaring `name`, across all containers
    pub fn units_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Artifact> + 'a {
        self.artifacts
            .iter()
            .filter(move |a| a.is_unit() && a.name() == name)
    }

    pub fn by_path(&self, absolute_path: &Path) -> Option<&Artifact> {
        self.by_path.get(absolute_path).map(|&i| &self.artifacts[i])
    }

    /// Every artifact whose relative path ends with `suffix`, in scan order.
    ///
    /// Matching is done on whole path components, so `config.txt` does not
    /// match `myconfig.txt`.
    pub fn ending_with<'a>(&'a self, suffix: &'a str) -> impl Iterator<Item = &'a Artifact> + 'a {
        let suffix = suffix.trim_start_matches('/');
        self.artifacts.iter().filter(move |a| {
            !suffix.is_empty()
                && a.relative_path().ends_with(suffix)
                && (a.relative_path().len() == suffix.len()
                    || a.relative_path()[..a.relative_path().len() - suffix.len()].ends_with('/'))
        })
    }

    /// Declared unit names, each once
    pub fn unit_names(&self) -> impl Iterator<Item = &str> {
        self.by_unit_name.keys().map(String::as_str)
    }

    pub fn units(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts.iter().filter(|a| a.is_unit())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts.iter()
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

/// Relative path of `path` below `base`, with `/` separators
fn relative_path(base: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(base).ok()?;
    let segments: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}
