//! Multi-generation capture
//!
//! Generation 1 runs in-process with a leaf-mode interceptor. Each later
//! generation is relaunched as a separate process whose ambient search path
//! is the store produced so far; it captures in root mode into the same
//! store. Generation 2 always runs when allowed; further ones only while the
//! previous generation still added files.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::DEFAULT_MAX_GENERATIONS;
use crate::runtime::InstallMode;
use crate::store::{ArtifactSink, PersistenceSink, Store, PARAMS_PREFIX};

use super::error::CaptureError;
use super::launcher::{GenerationLauncher, LaunchExit};
use super::resume::{ResumeToken, RESUME_TOKEN_VERSION};
use super::session::{run_pass, write_launcher, CaptureRequest, CaptureSession, Capturer, GenerationReport};

pub struct TwoPassCapturer {
    capturer: Capturer,
    launcher: Arc<dyn GenerationLauncher>,
    max_generations: usize,
}

impl TwoPassCapturer {
    pub fn new(capturer: Capturer, launcher: Arc<dyn GenerationLauncher>) -> Self {
        Self {
            capturer: capturer.with_mode(InstallMode::Leaf),
            launcher,
            max_generations: DEFAULT_MAX_GENERATIONS,
        }
    }

    /// Total generations allowed, the in-process one included (at least 1)
    pub fn max_generations(mut self, max_generations: usize) -> Self {
        self.max_generations = max_generations.max(1);
        self
    }

    /// Capture into `destination` across generations.
    ///
    /// When the last generation is done the entry point's unit is removed
    /// from the store unless it is to be included, and the session's
    /// discovered collections are replaced by what the store holds.
    pub fn capture_and_store(
        &self,
        request: CaptureRequest,
        destination: &Path,
    ) -> Result<CaptureSession, CaptureError> {
        let store = Arc::new(self.capturer.open_store(destination)?);
        let sink: Arc<dyn ArtifactSink> = Arc::new(PersistenceSink::new(Arc::clone(&store)));
        let env = Arc::clone(self.capturer.environment());
        let executable = self.capturer.executable().map(Path::to_path_buf);
        let launcher = Arc::clone(&self.launcher);
        let max_generations = self.max_generations;
        let task_store = Arc::clone(&store);

        Ok(CaptureSession::spawn(Some(store), move |state, cancel| async move {
            let store = task_store;

            let files_before = store.files()?;
            let first = run_pass(
                env,
                InstallMode::Leaf,
                &request,
                Some(sink),
                Arc::clone(&state),
                cancel.clone(),
            )
            .await;
            write_launcher(&store, executable.as_deref(), &request);
            first?;

            let mut last_added = added_since(&store, &files_before)?;
            state.generations.lock().push(GenerationReport {
                generation: 1,
                in_process: true,
                exit_code: None,
                new_files: last_added,
                params_dump: None,
            });

            let scan_paths = scan_paths_excluding(&request.base_paths, store.root());
            for generation in 2..=max_generations as u32 {
                if generation > 2 && last_added == 0 {
                    tracing::info!(generation, "Store stopped growing, no further generation");
                    break;
                }
                let token = ResumeToken {
                    version: RESUME_TOKEN_VERSION,
                    generation,
                    scan_paths: scan_paths.clone(),
                    search_path: store.bucket_dirs()?,
                    entry_point: request.entry_point.clone(),
                    destination: store.root().to_path_buf(),
                    include_entry_point: request.include_entry_point,
                    linger: request.linger,
                    main_arguments: request.main_arguments.clone(),
                };

                let files_before = store.files()?;
                let dumps_before = params_dumps(store.root());
                let exit = launcher
                    .launch(&token, cancel.clone())
                    .await
                    .map_err(|source| CaptureError::Spawn { generation, source })?;
                let exit_code = match exit {
                    LaunchExit::Cancelled => return Err(CaptureError::Cancelled),
                    LaunchExit::Exited(code) => code,
                };
                if exit_code != Some(0) {
                    tracing::warn!(
                        generation,
                        exit_code = ?exit_code,
                        "Relaunched generation failed; keeping the store as is"
                    );
                }

                last_added = added_since(&store, &files_before)?;
                let params_dump = params_dumps(store.root())
                    .difference(&dumps_before)
                    .next()
                    .cloned();
                tracing::info!(generation, new_files = last_added, "Generation finished");
                state.generations.lock().push(GenerationReport {
                    generation,
                    in_process: false,
                    exit_code,
                    new_files: last_added,
                    params_dump,
                });
            }

            if !request.include_entry_point {
                store.remove_unit(&request.entry_point)?;
            }
            let stored = store.scan()?;
            state.discovered.replace_with(stored.iter().cloned());
            Ok(())
        }))
    }
}

fn added_since(store: &Store, before: &BTreeSet<PathBuf>) -> Result<usize, CaptureError> {
    Ok(store.files()?.difference(before).count())
}

/// Base paths still worth scanning: everything but the store itself
fn scan_paths_excluding(base_paths: &[PathBuf], destination: &Path) -> Vec<PathBuf> {
    base_paths
        .iter()
        .filter(|path| !path.starts_with(destination))
        .cloned()
        .collect()
}

fn params_dumps(root: &Path) -> BTreeSet<PathBuf> {
    fs::read_dir(root)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|entry| entry.path())
                .filter(|path| {
                    path.file_name()
                        .is_some_and(|name| name.to_string_lossy().starts_with(PARAMS_PREFIX))
                })
                .collect()
        })
        .unwrap_or_default()
}
