//! Candidate artifacts and the index built over them
//!
//! An [`Artifact`] is an immutable (name, container, relative path, content)
//! tuple. Units are named loadable code; everything else is a resource.

mod archive;
mod index;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use archive::{is_archive, ARCHIVE_EXTENSIONS};
pub use index::ArtifactIndex;

/// File extension of unit files
pub const UNIT_EXTENSION: &str = "unit";

/// Kind of a captured artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// Independently loadable, named code
    Unit,
    /// Arbitrary named payload
    Resource,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Unit => "unit",
            ArtifactKind::Resource => "resource",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct ArtifactInner {
    kind: ArtifactKind,
    name: String,
    container: PathBuf,
    relative_path: String,
    absolute_path: PathBuf,
    content: Arc<[u8]>,
}

/// A unit or resource plus the container it was found in.
///
/// Cloning is cheap: the content and metadata are shared.
#[derive(Debug, Clone)]
pub struct Artifact {
    inner: Arc<ArtifactInner>,
}

impl Artifact {
    /// Build an artifact found at `relative_path` inside `container`.
    ///
    /// `relative_path` always uses `/` separators, regardless of platform.
    pub fn new(
        kind: ArtifactKind,
        name: impl Into<String>,
        container: impl Into<PathBuf>,
        relative_path: impl Into<String>,
        content: impl Into<Arc<[u8]>>,
    ) -> Self {
        let container = container.into();
        let relative_path = relative_path.into();
        let absolute_path = join_relative(&container, &relative_path);
        Self {
            inner: Arc::new(ArtifactInner {
                kind,
                name: name.into(),
                container,
                relative_path,
                absolute_path,
                content: content.into(),
            }),
        }
    }

    /// Classify raw bytes found at `relative_path`: a `.unit` file with a
    /// valid header becomes a unit, anything else a resource named after its
    /// relative path.
    pub fn classify(
        container: impl Into<PathBuf>,
        relative_path: impl Into<String>,
        content: Vec<u8>,
    ) -> Self {
        let relative_path = relative_path.into();
        let declared = if relative_path.ends_with(&format!(".{UNIT_EXTENSION}")) {
            crate::runtime::unit::sniff_unit_name(&content)
        } else {
            None
        };
        match declared {
            Some(name) => Self::new(ArtifactKind::Unit, name, container, relative_path, content),
            None => Self::new(
                ArtifactKind::Resource,
                relative_path.clone(),
                container,
                relative_path,
                content,
            ),
        }
    }

    pub fn kind(&self) -> ArtifactKind {
        self.inner.kind
    }

    pub fn is_unit(&self) -> bool {
        self.inner.kind == ArtifactKind::Unit
    }

    /// Declared unit name, or the relative path for resources
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Directory or archive the artifact was found in
    pub fn container(&self) -> &Path {
        &self.inner.container
    }

    pub fn relative_path(&self) -> &str {
        &self.inner.relative_path
    }

    /// Container joined with the relative path. For archive entries this is
    /// a virtual path below the archive file.
    pub fn absolute_path(&self) -> &Path {
        &self.inner.absolute_path
    }

    pub fn content(&self) -> &[u8] {
        &self.inner.content
    }

    /// Shared handle to the content bytes
    pub fn content_arc(&self) -> Arc<[u8]> {
        Arc::clone(&self.inner.content)
    }

    /// Identity of the artifact: (name, container)
    pub fn key(&self) -> ArtifactKey {
        ArtifactKey {
            kind: self.inner.kind,
            name: self.inner.name.clone(),
            container: self.inner.container.clone(),
        }
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({})",
            self.inner.kind,
            self.inner.name,
            self.inner.absolute_path.display()
        )
    }
}

/// Identity of an artifact within a capture session
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtifactKey {
    pub kind: ArtifactKind,
    pub name: String,
    pub container: PathBuf,
}

impl PartialOrd for ArtifactKind {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ArtifactKind {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_str().cmp(other.as_str())
    }
}

/// Canonical relative path of a unit: `a.b.C` lives at `a/b/C.unit`
pub fn unit_relative_path(name: &str) -> String {
    format!("{}.{UNIT_EXTENSION}", name.replace('.', "/"))
}

fn join_relative(container: &Path, relative_path: &str) -> PathBuf {
    relative_path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .fold(container.to_path_buf(), |path, segment| path.join(segment))
}
