//! Launching relaunched generations

use std::io;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::config::{RUNTIME_HOME_ENV, SEARCH_PATH_ENV};
use crate::util::paths::join_path_list;

use super::resume::ResumeToken;

/// How a relaunched generation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchExit {
    /// The process exited; `None` when it was terminated by a signal
    Exited(Option<i32>),
    /// The launch was cancelled and the process killed
    Cancelled,
}

/// Starts a generation from a resume token and waits for it
#[async_trait]
pub trait GenerationLauncher: Send + Sync {
    /// Run the generation described by `token` to completion.
    ///
    /// Errors are spawn failures only; a generation that runs and fails is
    /// reported through its exit code.
    async fn launch(&self, token: &ResumeToken, cancel: CancellationToken) -> io::Result<LaunchExit>;
}

/// Relaunches the depcapture binary with the `resume` command
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    executable: PathBuf,
    data_dir: Option<PathBuf>,
    runtime_home: Option<PathBuf>,
}

impl ProcessLauncher {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            data_dir: None,
            runtime_home: None,
        }
    }

    /// Launcher for the running executable
    pub fn current_exe() -> io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    /// Pass `--data-dir` to children so they log where the parent does
    pub fn with_data_dir(mut self, data_dir: Option<PathBuf>) -> Self {
        self.data_dir = data_dir;
        self
    }

    /// Runtime home handed to children through `DEPCAPTURE_RUNTIME_HOME`
    pub fn with_runtime_home(mut self, runtime_home: Option<PathBuf>) -> Self {
        self.runtime_home = runtime_home;
        self
    }

    pub fn executable(&self) -> &PathBuf {
        &self.executable
    }

    fn build_command(&self, token: &ResumeToken) -> Command {
        let mut cmd = Command::new(&self.executable);
        if let Some(data_dir) = &self.data_dir {
            cmd.arg("--data-dir").arg(data_dir);
        }
        cmd.arg("resume").arg("--");
        cmd.args(token.to_args());
        cmd.env(SEARCH_PATH_ENV, join_path_list(token.search_path.iter().cloned()));
        if let Some(home) = &self.runtime_home {
            cmd.env(RUNTIME_HOME_ENV, home);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::inherit());
        cmd.kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl GenerationLauncher for ProcessLauncher {
    async fn launch(&self, token: &ResumeToken, cancel: CancellationToken) -> io::Result<LaunchExit> {
        let mut child = self.build_command(token).spawn()?;
        tracing::info!(
            generation = token.generation,
            pid = child.id().unwrap_or_default(),
            executable = %self.executable.display(),
            "Generation launched"
        );

        tokio::select! {
            status = child.wait() => Ok(LaunchExit::Exited(status?.code())),
            _ = cancel.cancelled() => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(generation = token.generation, error = %e, "Failed to kill generation");
                }
                Ok(LaunchExit::Cancelled)
            }
        }
    }
}
