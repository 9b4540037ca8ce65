//! Capture sessions
//!
//! A [`Capturer`] runs an entry point under an [`Interceptor`] on a
//! background task and hands back a [`CaptureSession`] right away. The
//! session owns the discovered set; callers wait on it, cancel it, or drop
//! it (which cancels).

use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::artifact::{Artifact, ArtifactIndex};
use crate::runtime::{Environment, ExecError, InstallMode, Invocation};
use crate::store::{write_launcher_script, ArtifactSink, PersistenceSink, Store};

use super::discovered::DiscoveredSet;
use super::error::CaptureError;
use super::interceptor::{Adder, Interceptor, InterceptorHooks};

/// Upper bound on recovery retries, on top of the no-progress rule
const MAX_RECOVERY_ATTEMPTS: usize = 64;

/// What to capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    pub entry_point: String,
    pub main_arguments: Vec<String>,
    pub base_paths: Vec<PathBuf>,
    /// Whether the entry point's own unit belongs in the result
    pub include_entry_point: bool,
    /// Keep observing for this long after `main` returns
    pub linger: Option<Duration>,
}

impl CaptureRequest {
    pub fn new(entry_point: impl Into<String>, base_paths: Vec<PathBuf>) -> Self {
        Self {
            entry_point: entry_point.into(),
            main_arguments: Vec::new(),
            base_paths,
            include_entry_point: true,
            linger: None,
        }
    }

    pub fn with_arguments(mut self, args: Vec<String>) -> Self {
        self.main_arguments = args;
        self
    }

    pub fn include_entry_point(mut self, include: bool) -> Self {
        self.include_entry_point = include;
        self
    }

    pub fn with_linger(mut self, linger: Option<Duration>) -> Self {
        self.linger = linger.filter(|d| !d.is_zero());
        self
    }
}

/// One generation of a capture, as seen by the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationReport {
    pub generation: u32,
    /// Ran inside the calling process rather than a relaunched one
    pub in_process: bool,
    /// Exit code of a relaunched generation; `None` when in-process or
    /// terminated by a signal
    pub exit_code: Option<i32>,
    /// Files this generation added to the store
    pub new_files: usize,
    /// Parameters dump written by a relaunched generation
    pub params_dump: Option<PathBuf>,
}

impl GenerationReport {
    pub fn succeeded(&self) -> bool {
        self.in_process || self.exit_code == Some(0)
    }
}

/// State shared between a session handle and its background task
#[derive(Debug, Default)]
pub(crate) struct SessionState {
    pub(crate) discovered: DiscoveredSet,
    pub(crate) generations: Mutex<Vec<GenerationReport>>,
}

/// Runs captures against an environment
#[derive(Debug, Clone)]
pub struct Capturer {
    env: Arc<Environment>,
    mode: InstallMode,
    executable: Option<PathBuf>,
}

impl Capturer {
    /// Capturer installing its interceptor in leaf mode
    pub fn new(env: Arc<Environment>) -> Self {
        Self {
            env,
            mode: InstallMode::Leaf,
            executable: None,
        }
    }

    pub fn with_mode(mut self, mode: InstallMode) -> Self {
        self.mode = mode;
        self
    }

    /// Executable embedded in launcher scripts (defaults to the running one)
    pub fn with_executable(mut self, executable: impl Into<PathBuf>) -> Self {
        self.executable = Some(executable.into());
        self
    }

    pub fn environment(&self) -> &Arc<Environment> {
        &self.env
    }

    pub fn mode(&self) -> InstallMode {
        self.mode
    }

    /// Start capturing; every newly discovered artifact is handed to `sink`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn capture(&self, request: CaptureRequest, sink: Option<Arc<dyn ArtifactSink>>) -> CaptureSession {
        let env = Arc::clone(&self.env);
        let mode = self.mode;
        CaptureSession::spawn(None, move |state, cancel| async move {
            run_pass(env, mode, &request, sink, state, cancel).await
        })
    }

    /// Start capturing into the store at `destination`
    pub fn capture_and_store(
        &self,
        request: CaptureRequest,
        destination: &Path,
    ) -> Result<CaptureSession, CaptureError> {
        let store = Arc::new(self.open_store(destination)?);
        let sink: Arc<dyn ArtifactSink> = Arc::new(PersistenceSink::new(Arc::clone(&store)));
        let env = Arc::clone(&self.env);
        let mode = self.mode;
        let executable = self.executable.clone();
        let task_store = Arc::clone(&store);

        Ok(CaptureSession::spawn(Some(store), move |state, cancel| async move {
            let result = run_pass(env, mode, &request, Some(sink), state, cancel).await;
            write_launcher(&task_store, executable.as_deref(), &request);
            result
        }))
    }

    pub(crate) fn open_store(&self, destination: &Path) -> Result<Store, CaptureError> {
        Ok(Store::open(destination)?.with_runtime_home(self.env.runtime_home().map(Path::to_path_buf)))
    }

    pub(crate) fn executable(&self) -> Option<&Path> {
        self.executable.as_deref()
    }
}

/// Write a launcher script for the store; failures are only logged
pub(crate) fn write_launcher(store: &Store, executable: Option<&Path>, request: &CaptureRequest) {
    let executable = match executable {
        Some(path) => path.to_path_buf(),
        None => match std::env::current_exe() {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!(error = %e, "Cannot determine executable, skipping launcher script");
                return;
            }
        },
    };
    if let Err(e) = write_launcher_script(store, &executable, &request.entry_point, &request.main_arguments) {
        tracing::warn!(store = %store.root().display(), error = %e, "Failed to write launcher script");
    }
}

/// One capture pass: index, install, invoke with recovery, linger, close
pub(crate) async fn run_pass(
    env: Arc<Environment>,
    mode: InstallMode,
    request: &CaptureRequest,
    sink: Option<Arc<dyn ArtifactSink>>,
    state: Arc<SessionState>,
    cancel: CancellationToken,
) -> Result<(), CaptureError> {
    let base_paths = request.base_paths.clone();
    let index = tokio::task::spawn_blocking(move || ArtifactIndex::build(&base_paths)).await?;
    let excluded: HashSet<String> = env.satisfiable_names().into_iter().collect();
    tracing::info!(
        entry_point = %request.entry_point,
        mode = mode.as_str(),
        candidates = index.len(),
        excluded = excluded.len(),
        "Capture pass starting"
    );

    let hooks = InterceptorHooks::new(entry_point_adder(
        Arc::clone(&state),
        &request.entry_point,
        request.include_entry_point,
    ))
    .with_sink(sink);
    let interceptor = Interceptor::new(index, mode, &env, hooks, Handle::current());
    interceptor.install(&env);

    let invoked = {
        let env = Arc::clone(&env);
        let interceptor = Arc::clone(&interceptor);
        let entry_point = request.entry_point.clone();
        let args = request.main_arguments.clone();
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || {
            invoke_with_recovery(&env, &interceptor, &entry_point, &args, excluded, &cancel)
        })
        .await
    };

    if matches!(invoked, Ok(Ok(()))) {
        if let Some(linger) = request.linger {
            tracing::debug!(millis = linger.as_millis() as u64, "Lingering for late resolutions");
            tokio::select! {
                _ = tokio::time::sleep(linger) => {}
                _ = cancel.cancelled() => {}
            }
        }
    }
    interceptor.close().await;

    match invoked? {
        Ok(()) if cancel.is_cancelled() => Err(CaptureError::Cancelled),
        Ok(()) => {
            tracing::info!(
                entry_point = %request.entry_point,
                units = state.discovered.units().len(),
                resources = state.discovered.resources().len(),
                "Capture pass finished"
            );
            Ok(())
        }
        Err(ExecError::Interrupted) => Err(CaptureError::Cancelled),
        Err(source) => Err(CaptureError::Invocation {
            entry_point: request.entry_point.clone(),
            source,
        }),
    }
}

/// Adder recording into the session's discovered set, withholding the entry
/// point's own unit when it is not to be included.
fn entry_point_adder(state: Arc<SessionState>, entry_point: &str, include_entry_point: bool) -> Adder {
    let entry_point = entry_point.to_string();
    Arc::new(move |artifact: &Artifact| {
        if !include_entry_point && artifact.is_unit() && artifact.name() == entry_point {
            return false;
        }
        state.discovered.insert(artifact)
    })
}

/// Invoke the entry point, retrying after unresolved-symbol failures as long
/// as each failure implicates something new.
fn invoke_with_recovery(
    env: &Arc<Environment>,
    interceptor: &Interceptor,
    entry_point: &str,
    args: &[String],
    mut excluded: HashSet<String>,
    cancel: &CancellationToken,
) -> Result<(), ExecError> {
    let mut previous_missing: Option<BTreeSet<String>> = None;
    for attempt in 1..=MAX_RECOVERY_ATTEMPTS {
        let error = match Invocation::new(Arc::clone(env), cancel.clone()).invoke_main(entry_point, args) {
            Ok(()) => return Ok(()),
            Err(e) if e.is_unresolved() => e,
            Err(e) => return Err(e),
        };

        let mut missing: BTreeSet<String> = error.missing_names().iter().cloned().collect();
        missing.extend(env.loaded_names());
        missing.retain(|name| !excluded.contains(name));

        if let Some(previous) = &previous_missing {
            if missing.is_subset(previous) {
                tracing::warn!(attempt, error = %error, "Recovery made no progress, giving up");
                return Err(error);
            }
        }

        let consumed = interceptor.consume_known_units(&missing);
        tracing::info!(
            attempt,
            missing = missing.len(),
            registered = consumed.len(),
            error = %error,
            "Unresolved symbols, retrying with known units registered"
        );
        for unit in consumed {
            env.define(unit);
        }
        excluded.extend(env.loaded_names());
        previous_missing = Some(missing);
    }
    Err(ExecError::Failed {
        unit: entry_point.to_string(),
        message: format!("recovery gave up after {MAX_RECOVERY_ATTEMPTS} attempts"),
    })
}

/// Handle on a running or finished capture
pub struct CaptureSession {
    id: Uuid,
    state: Arc<SessionState>,
    store: Option<Arc<Store>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<Result<(), CaptureError>>>,
    outcome: Option<Result<(), String>>,
}

impl std::fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("id", &self.id)
            .field("discovered", &self.state.discovered.len())
            .field("store", &self.store.as_ref().map(|s| s.root().to_path_buf()))
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl CaptureSession {
    /// Run `body` on a background task with fresh session state
    pub(crate) fn spawn<F, Fut>(store: Option<Arc<Store>>, body: F) -> Self
    where
        F: FnOnce(Arc<SessionState>, CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), CaptureError>> + Send + 'static,
    {
        let id = Uuid::new_v4();
        let state = Arc::new(SessionState::default());
        let cancel = CancellationToken::new();
        let future = body(Arc::clone(&state), cancel.clone());
        let task = tokio::spawn(async move {
            let result = future.await;
            match &result {
                Ok(()) => tracing::info!(session = %id, "Capture session completed"),
                Err(e) => tracing::warn!(session = %id, error = %e, "Capture session failed"),
            }
            result
        });
        Self {
            id,
            state,
            store,
            cancel,
            task: Some(task),
            outcome: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn discovered_units(&self) -> Vec<Artifact> {
        self.state.discovered.units()
    }

    pub fn discovered_resources(&self) -> Vec<Artifact> {
        self.state.discovered.resources()
    }

    pub fn discovered_unit(&self, name: &str) -> Option<Artifact> {
        self.state.discovered.unit(name)
    }

    /// Store the capture writes into, if any
    pub fn store(&self) -> Option<&Arc<Store>> {
        self.store.as_ref()
    }

    /// Generations run so far (multi-generation captures only)
    pub fn generations(&self) -> Vec<GenerationReport> {
        self.state.generations.lock().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |task| task.is_finished())
    }

    /// Wait for the background task. Every persistence task it spawned has
    /// completed by the time this returns.
    pub async fn wait_for_completion(&mut self) -> Result<(), CaptureError> {
        if let Some(task) = self.task.take() {
            let result = task.await.unwrap_or_else(|e| Err(CaptureError::from(e)));
            self.outcome = Some(result.as_ref().map(|_| ()).map_err(|e| e.to_string()));
            return result;
        }
        match &self.outcome {
            Some(Err(message)) => Err(CaptureError::AlreadyFailed(message.clone())),
            _ => Ok(()),
        }
    }

    /// Ask the background task to stop; partial results are kept
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token that cancels this session, for use from another task
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel if still running, wait for teardown and release the results
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.state.discovered.clear();
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if self.task.as_ref().is_some_and(|task| !task.is_finished()) {
            self.cancel.cancel();
        }
    }
}
