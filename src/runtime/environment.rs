//! Host environment
//!
//! The environment is the capability a capture session runs against: it
//! owns the ambient resolver chain (builtins, defined units, search path),
//! tracks which unit names have been loaded, and lets a resolver be wired in
//! either as the current context resolver (leaf) or ahead of the whole
//! ambient chain (root). Nothing here is process-global; tests build as many
//! environments as they like.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashSet;
use parking_lot::RwLock;

use crate::artifact::Artifact;
use crate::config::Config;

use super::resolver::{ChainResolver, DefinedUnits, PathResolver, Resolver};

/// Where an installed resolver sits in the resolution path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallMode {
    /// Current resolver of the executing context; misses go to the ambient chain
    Leaf,
    /// Ultimate ancestor: consulted before anything else in the ambient chain
    Root,
}

impl InstallMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallMode::Leaf => "leaf",
            InstallMode::Root => "root",
        }
    }
}

type Installed = Vec<(u64, Arc<dyn Resolver>)>;

/// Host runtime the monitored program executes in
pub struct Environment {
    runtime_home: Option<PathBuf>,
    builtins: Arc<PathResolver>,
    search_path: Arc<PathResolver>,
    defined: Arc<DefinedUnits>,
    /// Root-installed resolvers, most recent first
    roots: RwLock<Installed>,
    /// Leaf-installed resolvers, most recent last
    contexts: RwLock<Installed>,
    loaded: DashSet<String>,
    next_install_id: AtomicU64,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("runtime_home", &self.runtime_home)
            .field("search_path", &self.search_path.index().base_paths())
            .field("defined", &self.defined.len())
            .field("loaded", &self.loaded.len())
            .finish()
    }
}

/// Builder for [`Environment`]
#[derive(Debug, Default, Clone)]
pub struct EnvironmentBuilder {
    runtime_home: Option<PathBuf>,
    search_path: Vec<PathBuf>,
}

impl EnvironmentBuilder {
    /// Directory holding the host runtime's own units
    pub fn runtime_home(mut self, path: impl Into<PathBuf>) -> Self {
        self.runtime_home = Some(path.into());
        self
    }

    /// Ambient search path, consulted after the builtins
    pub fn search_path(mut self, paths: Vec<PathBuf>) -> Self {
        self.search_path = paths;
        self
    }

    pub fn build(self) -> Arc<Environment> {
        let builtins = match &self.runtime_home {
            Some(home) => PathResolver::scan("builtins", &[home]),
            None => PathResolver::new("builtins", Default::default()),
        };
        let search_path = PathResolver::scan("search-path", &self.search_path);
        Arc::new(Environment {
            runtime_home: self.runtime_home,
            builtins: Arc::new(builtins),
            search_path: Arc::new(search_path),
            defined: Arc::new(DefinedUnits::new()),
            roots: RwLock::new(Vec::new()),
            contexts: RwLock::new(Vec::new()),
            loaded: DashSet::new(),
            next_install_id: AtomicU64::new(1),
        })
    }
}

impl Environment {
    pub fn builder() -> EnvironmentBuilder {
        EnvironmentBuilder::default()
    }

    /// Environment described by the configuration file and its overrides
    pub fn from_config(config: &Config) -> Arc<Self> {
        let mut builder = Self::builder().search_path(config.search_path.clone());
        if let Some(home) = &config.runtime_home {
            builder = builder.runtime_home(home);
        }
        builder.build()
    }

    pub fn runtime_home(&self) -> Option<&Path> {
        self.runtime_home.as_deref()
    }

    pub fn search_path(&self) -> &[PathBuf] {
        self.search_path.index().base_paths()
    }

    /// The ambient chain as it is wired right now: root-installed resolvers,
    /// builtins, defined units, search path.
    pub fn ambient(&self) -> ChainResolver {
        let mut links: Vec<Arc<dyn Resolver>> = self
            .roots
            .read()
            .iter()
            .map(|(_, resolver)| Arc::clone(resolver))
            .collect();
        links.push(self.builtins.clone());
        links.push(self.defined.clone());
        links.push(self.search_path.clone());
        ChainResolver::new(links)
    }

    /// Resolver an invocation starts with: the innermost leaf install, or
    /// the ambient chain when nothing is installed.
    pub fn current_resolver(&self) -> Arc<dyn Resolver> {
        match self.contexts.read().last() {
            Some((_, resolver)) => Arc::clone(resolver),
            None => Arc::new(self.ambient()),
        }
    }

    /// Wire `resolver` into the resolution path. The wiring is undone when
    /// the returned guard is dropped or uninstalled.
    pub fn install(self: &Arc<Self>, resolver: Arc<dyn Resolver>, mode: InstallMode) -> InstallGuard {
        let id = self.next_install_id.fetch_add(1, Ordering::Relaxed);
        match mode {
            InstallMode::Leaf => self.contexts.write().push((id, resolver)),
            InstallMode::Root => self.roots.write().insert(0, (id, resolver)),
        }
        tracing::debug!(id, mode = mode.as_str(), "Resolver installed");
        InstallGuard {
            environment: Arc::clone(self),
            id,
            mode,
            active: true,
        }
    }

    fn uninstall(&self, id: u64, mode: InstallMode) {
        let installed = match mode {
            InstallMode::Leaf => &self.contexts,
            InstallMode::Root => &self.roots,
        };
        installed.write().retain(|(installed_id, _)| *installed_id != id);
        tracing::debug!(id, mode = mode.as_str(), "Resolver uninstalled");
    }

    /// Define a unit so the ambient chain can answer it.
    /// Returns whether it was newly defined.
    pub fn define(&self, artifact: Artifact) -> bool {
        self.defined.define(artifact)
    }

    /// Record that a unit name has been loaded in this environment
    pub fn mark_loaded(&self, name: &str) {
        if !self.loaded.contains(name) {
            self.loaded.insert(name.to_string());
        }
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.contains(name)
    }

    pub fn loaded_names(&self) -> Vec<String> {
        self.loaded.iter().map(|name| name.key().clone()).collect()
    }

    /// Names the environment can satisfy without any interceptor: everything
    /// the builtins, defined units and search path declare, plus everything
    /// already loaded.
    pub fn satisfiable_names(&self) -> Vec<String> {
        let mut names = self.builtins.unit_names();
        names.extend(self.defined.unit_names());
        names.extend(self.search_path.unit_names());
        names.extend(self.loaded_names());
        names.sort();
        names.dedup();
        names
    }
}

/// Keeps a resolver installed; dropping it restores the previous wiring
pub struct InstallGuard {
    environment: Arc<Environment>,
    id: u64,
    mode: InstallMode,
    active: bool,
}

impl InstallGuard {
    pub fn mode(&self) -> InstallMode {
        self.mode
    }

    /// Undo the installation now
    pub fn uninstall(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.active {
            self.active = false;
            self.environment.uninstall(self.id, self.mode);
        }
    }
}

impl Drop for InstallGuard {
    fn drop(&mut self) {
        self.release();
    }
}
