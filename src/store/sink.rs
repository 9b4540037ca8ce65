use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::artifact::Artifact;

use super::Store;

/// Result of handing an artifact to a sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    /// Content was materialized at the path
    Written(PathBuf),
    /// The destination already existed; nothing was written
    AlreadyPresent(PathBuf),
    /// The artifact belongs to the host runtime and is never persisted
    Excluded,
    /// Consumed by a sink that does not materialize anything
    Accepted,
}

/// Receiver of newly discovered artifacts.
///
/// Called from the blocking task pool, possibly from several threads at once.
pub trait ArtifactSink: Send + Sync {
    fn accept(&self, artifact: &Artifact) -> io::Result<StoreOutcome>;
}

/// Sink that materializes artifacts into a [`Store`]
#[derive(Debug)]
pub struct PersistenceSink {
    store: Arc<Store>,
    written: AtomicUsize,
}

impl PersistenceSink {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            written: AtomicUsize::new(0),
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Number of files this sink actually wrote
    pub fn written(&self) -> usize {
        self.written.load(Ordering::Relaxed)
    }
}

impl ArtifactSink for PersistenceSink {
    fn accept(&self, artifact: &Artifact) -> io::Result<StoreOutcome> {
        let outcome = self.store.persist(artifact)?;
        if matches!(outcome, StoreOutcome::Written(_)) {
            self.written.fetch_add(1, Ordering::Relaxed);
        }
        Ok(outcome)
    }
}

/// Sink forwarding every artifact to a closure
pub struct CallbackSink<F> {
    callback: F,
}

impl<F> CallbackSink<F>
where
    F: Fn(&Artifact) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> ArtifactSink for CallbackSink<F>
where
    F: Fn(&Artifact) + Send + Sync,
{
    fn accept(&self, artifact: &Artifact) -> io::Result<StoreOutcome> {
        (self.callback)(artifact);
        Ok(StoreOutcome::Accepted)
    }
}
