//! Capture store
//!
//! A store is a directory holding persisted artifacts under one bucket per
//! origin container, plus launcher scripts and parameter dumps at its root.
//! It accumulates across generations and repeated runs: an artifact that is
//! already materialized is never rewritten.

mod scripts;
mod sink;

use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

use crate::artifact::{Artifact, ArtifactIndex, UNIT_EXTENSION};
use crate::runtime::unit::sniff_unit_name;

pub use scripts::{write_launcher_script, write_params_dump, ParamsDump, LAUNCHER_PREFIX, PARAMS_PREFIX};
pub use sink::{ArtifactSink, CallbackSink, PersistenceSink, StoreOutcome};

/// Number of trailing container components kept in a bucket name
const BUCKET_DEPTH: usize = 2;

/// Destination directory of a capture
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
    runtime_home: Option<PathBuf>,
}

impl Store {
    /// Open (creating if needed) the store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            runtime_home: None,
        })
    }

    /// Never persist artifacts located under `runtime_home`
    pub fn with_runtime_home(mut self, runtime_home: Option<PathBuf>) -> Self {
        self.runtime_home = runtime_home;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Bucket directory name for a container: its path components wrapped
    /// in brackets, reduced to the last two (`/opt/app/lib/core.zip` →
    /// `[lib][core.zip]`).
    pub fn bucket_name(container: &Path) -> String {
        let components: Vec<String> = container
            .components()
            .filter_map(|component| match component {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        if components.is_empty() {
            return "[root]".to_string();
        }
        components[components.len().saturating_sub(BUCKET_DEPTH)..]
            .iter()
            .map(|part| format!("[{part}]"))
            .collect()
    }

    /// Where `artifact` lives inside the store
    pub fn destination_for(&self, artifact: &Artifact) -> PathBuf {
        artifact
            .relative_path()
            .split('/')
            .filter(|segment| !segment.is_empty() && *segment != "..")
            .fold(
                self.root.join(Self::bucket_name(artifact.container())),
                |path, segment| path.join(segment),
            )
    }

    fn is_runtime_artifact(&self, artifact: &Artifact) -> bool {
        self.runtime_home
            .as_deref()
            .is_some_and(|home| artifact.container().starts_with(home))
    }

    /// Materialize `artifact` unless it is already present.
    ///
    /// The content is written to a temporary file beside the destination and
    /// moved into place without clobbering, so a concurrent writer of the
    /// same artifact never leaves a partial file behind.
    pub fn persist(&self, artifact: &Artifact) -> io::Result<StoreOutcome> {
        if self.is_runtime_artifact(artifact) {
            return Ok(StoreOutcome::Excluded);
        }
        let destination = self.destination_for(artifact);
        if destination.exists() {
            return Ok(StoreOutcome::AlreadyPresent(destination));
        }
        let parent = destination.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent)?;

        let mut temp = tempfile::Builder::new()
            .prefix(".depcapture-")
            .tempfile_in(parent)?;
        temp.write_all(artifact.content())?;
        match temp.persist_noclobber(&destination) {
            Ok(_) => {
                tracing::debug!(
                    artifact = %artifact.name(),
                    path = %destination.display(),
                    "Artifact stored"
                );
                Ok(StoreOutcome::Written(destination))
            }
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                Ok(StoreOutcome::AlreadyPresent(destination))
            }
            Err(e) => Err(e.error),
        }
    }

    /// Bucket directories, sorted by name
    pub fn bucket_dirs(&self) -> io::Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() && entry.file_name().to_string_lossy().starts_with('[') {
                dirs.push(entry.path());
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    /// Every materialized file, relative to the store root
    pub fn files(&self) -> io::Result<BTreeSet<PathBuf>> {
        let mut files = BTreeSet::new();
        for bucket in self.bucket_dirs()? {
            for entry in WalkDir::new(&bucket) {
                let entry = entry.map_err(io::Error::from)?;
                if entry.file_type().is_file() && !is_temp_file(entry.path()) {
                    if let Ok(relative) = entry.path().strip_prefix(&self.root) {
                        files.insert(relative.to_path_buf());
                    }
                }
            }
        }
        Ok(files)
    }

    /// Index over the store's buckets
    pub fn scan(&self) -> io::Result<ArtifactIndex> {
        Ok(ArtifactIndex::build(&self.bucket_dirs()?))
    }

    /// Delete every stored unit declaring `name`, then prune directories
    /// left empty up to the store root. Returns the number of files removed.
    pub fn remove_unit(&self, name: &str) -> io::Result<usize> {
        let mut doomed = Vec::new();
        for bucket in self.bucket_dirs()? {
            for entry in WalkDir::new(&bucket).into_iter().filter_map(Result::ok) {
                let path = entry.path();
                let is_unit_file = entry.file_type().is_file()
                    && path.extension().is_some_and(|ext| ext == UNIT_EXTENSION);
                if !is_unit_file {
                    continue;
                }
                let declared = fs::read(path).ok().and_then(|content| sniff_unit_name(&content));
                if declared.as_deref() == Some(name) {
                    doomed.push(path.to_path_buf());
                }
            }
        }

        for path in &doomed {
            fs::remove_file(path)?;
            tracing::info!(unit = name, path = %path.display(), "Removed unit from store");
            self.prune_empty_ancestors(path);
        }
        Ok(doomed.len())
    }

    fn prune_empty_ancestors(&self, removed: &Path) {
        let mut current = removed.parent();
        while let Some(dir) = current {
            if dir == self.root || !dir.starts_with(&self.root) {
                break;
            }
            let is_empty = fs::read_dir(dir)
                .map(|mut entries| entries.next().is_none())
                .unwrap_or(false);
            if !is_empty || fs::remove_dir(dir).is_err() {
                break;
            }
            current = dir.parent();
        }
    }
}

fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| name.to_string_lossy().starts_with(".depcapture-"))
}
