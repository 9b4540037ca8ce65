//! Resolution interceptor
//!
//! Sits in the resolution path for one capture pass. Lookups are answered
//! from a private table built over the capture's base paths; every hit is
//! reported through the adder hook and, when newly added, handed to the sink
//! on the blocking task pool.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::artifact::{Artifact, ArtifactIndex};
use crate::runtime::{ChainResolver, Environment, InstallGuard, InstallMode, Resolver};
use crate::store::ArtifactSink;

/// Filters and records an artifact; returns true when it was newly added
pub type Adder = Arc<dyn Fn(&Artifact) -> bool + Send + Sync>;

/// Per-capture behaviour plugged into the interceptor
#[derive(Clone)]
pub struct InterceptorHooks {
    pub adder: Adder,
    pub sink: Option<Arc<dyn ArtifactSink>>,
}

impl InterceptorHooks {
    pub fn new(adder: Adder) -> Self {
        Self { adder, sink: None }
    }

    pub fn with_sink(mut self, sink: Option<Arc<dyn ArtifactSink>>) -> Self {
        self.sink = sink;
        self
    }
}

pub struct Interceptor {
    mode: InstallMode,
    table: RwLock<ArtifactIndex>,
    /// Where leaf-mode misses go
    delegate: Option<ChainResolver>,
    hooks: InterceptorHooks,
    runtime: Handle,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    guard: Mutex<Option<InstallGuard>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interceptor")
            .field("mode", &self.mode)
            .field("artifacts", &self.table.read().len())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl Interceptor {
    /// Interceptor over `table`. Persistence tasks are spawned on `runtime`.
    ///
    /// In leaf mode misses are delegated to the environment's ambient chain
    /// as wired at construction time.
    pub fn new(
        table: ArtifactIndex,
        mode: InstallMode,
        env: &Environment,
        hooks: InterceptorHooks,
        runtime: Handle,
    ) -> Arc<Self> {
        let delegate = match mode {
            InstallMode::Leaf => Some(env.ambient()),
            InstallMode::Root => None,
        };
        Arc::new(Self {
            mode,
            table: RwLock::new(table),
            delegate,
            hooks,
            runtime,
            tasks: Mutex::new(Vec::new()),
            guard: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    pub fn mode(&self) -> InstallMode {
        self.mode
    }

    /// Wire the interceptor into `env` until [`close`](Self::close)
    pub fn install(self: &Arc<Self>, env: &Arc<Environment>) {
        let resolver: Arc<dyn Resolver> = Arc::clone(self) as Arc<dyn Resolver>;
        let guard = env.install(resolver, self.mode);
        if let Some(previous) = self.guard.lock().replace(guard) {
            previous.uninstall();
        }
        tracing::debug!(mode = self.mode.as_str(), "Interceptor installed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Report an artifact actually served; persists it when newly added
    fn report(&self, artifact: &Artifact) -> bool {
        if self.is_closed() {
            return false;
        }
        let added = (self.hooks.adder)(artifact);
        if added {
            tracing::debug!(kind = %artifact.kind(), name = artifact.name(), "Discovered");
            if let Some(sink) = &self.hooks.sink {
                self.spawn_persist(Arc::clone(sink), artifact.clone());
            }
        }
        added
    }

    /// Hand `artifact` to the sink on the blocking pool. The task list lock
    /// is held across the closed check so `close` never misses a task.
    fn spawn_persist(&self, sink: Arc<dyn ArtifactSink>, artifact: Artifact) {
        let mut tasks = self.tasks.lock();
        if self.is_closed() {
            tracing::debug!(name = artifact.name(), "Interceptor closed, not persisting");
            return;
        }
        let task = self.runtime.spawn_blocking(move || {
            if let Err(e) = sink.accept(&artifact) {
                tracing::warn!(
                    artifact = %artifact.absolute_path().display(),
                    error = %e,
                    "Failed to persist artifact"
                );
            }
        });
        tasks.push(task);
    }

    /// Report and return every name in `names` the private table knows,
    /// without going through any resolver chain.
    pub fn consume_known_units(&self, names: &BTreeSet<String>) -> Vec<Artifact> {
        let known: Vec<Artifact> = {
            let table = self.table.read();
            names.iter().filter_map(|name| table.unit(name).cloned()).collect()
        };
        for unit in &known {
            self.report(unit);
        }
        known
    }

    /// Number of persistence tasks not yet awaited
    pub fn pending_tasks(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Undo the wiring, release the private table and wait for every
    /// persistence task spawned so far.
    pub async fn close(&self) {
        if let Some(guard) = self.guard.lock().take() {
            guard.uninstall();
        }
        {
            let _tasks = self.tasks.lock();
            self.closed.store(true, Ordering::Release);
        }
        *self.table.write() = ArtifactIndex::default();

        loop {
            let pending: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
            if pending.is_empty() {
                break;
            }
            for result in futures::future::join_all(pending).await {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "Persistence task failed");
                }
            }
        }
        tracing::debug!(mode = self.mode.as_str(), "Interceptor closed");
    }
}

impl Resolver for Interceptor {
    fn label(&self) -> &str {
        "interceptor"
    }

    fn resolve_unit(&self, name: &str) -> Option<Artifact> {
        let hit = self.table.read().unit(name).cloned();
        match hit {
            Some(unit) => {
                self.report(&unit);
                Some(unit)
            }
            None => self.delegate.as_ref().and_then(|d| d.resolve_unit(name)),
        }
    }

    fn resolve_resources(&self, suffix: &str, first_only: bool) -> Vec<Artifact> {
        let mut found: Vec<Artifact> = {
            let table = self.table.read();
            let matches = table.ending_with(suffix).cloned();
            if first_only {
                matches.take(1).collect()
            } else {
                matches.collect()
            }
        };
        for resource in &found {
            self.report(resource);
        }
        if let Some(delegate) = &self.delegate {
            if !(first_only && !found.is_empty()) {
                found.extend(delegate.resolve_resources(suffix, first_only));
            }
        }
        found
    }

    fn unit_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.table.read().unit_names().map(str::to_string).collect();
        if let Some(delegate) = &self.delegate {
            names.extend(delegate.unit_names());
        }
        names.sort();
        names.dedup();
        names
    }
}
