use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use depcapture::capture::{CaptureSession, GenerationReport};
use depcapture::store::{write_params_dump, ParamsDump};
use depcapture::util::{self, split_path_list};
use depcapture::{
    Artifact, ArtifactIndex, CaptureRequest, Capturer, Config, Environment, InstallMode,
    Invocation, ProcessLauncher, ResumeToken, TwoPassCapturer,
};

/// Execution-verified dependency capture
#[derive(Parser)]
#[command(name = "depcapture")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Data directory for config and logs (defaults to ~/.depcapture)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an entry point and capture what it resolves
    Capture {
        /// Entry point unit name
        #[arg(short, long)]
        entry: String,

        /// Directory or archive to scan for candidates (repeatable)
        #[arg(short, long = "base-path", required = true)]
        base_paths: Vec<PathBuf>,

        /// Store directory; without it nothing is persisted
        #[arg(short, long)]
        destination: Option<PathBuf>,

        /// Leave the entry point's own unit out of the result
        #[arg(long)]
        exclude_entry: bool,

        /// Keep observing this long after main returns
        #[arg(long)]
        linger_ms: Option<u64>,

        /// Skip relaunched generations
        #[arg(long)]
        single_pass: bool,

        /// Total generations, the in-process one included
        #[arg(long)]
        max_generations: Option<usize>,

        /// Ambient search path (path list, repeatable)
        #[arg(long = "search-path")]
        search_path: Vec<String>,

        /// Host runtime directory whose units are never captured
        #[arg(long)]
        runtime_home: Option<PathBuf>,

        /// Arguments passed to the entry point
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Run an entry point against a search path
    Run {
        /// Ambient search path (path list, repeatable)
        #[arg(long = "search-path")]
        search_path: Vec<String>,

        /// Entry point unit name
        entry: String,

        /// Arguments passed to the entry point
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// List the artifacts found under base paths
    Index {
        /// Directories or archives to scan
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Run a relaunched generation (used by capture)
    #[command(hide = true)]
    Resume {
        /// Resume token arguments
        #[arg(allow_hyphen_values = true)]
        token: Vec<String>,
    },
}

#[derive(Serialize)]
struct ArtifactSummary {
    kind: &'static str,
    name: String,
    container: PathBuf,
    path: String,
}

impl From<&Artifact> for ArtifactSummary {
    fn from(artifact: &Artifact) -> Self {
        Self {
            kind: artifact.kind().as_str(),
            name: artifact.name().to_string(),
            container: artifact.container().to_path_buf(),
            path: artifact.relative_path().to_string(),
        }
    }
}

#[derive(Serialize)]
struct CaptureReport {
    session: String,
    store: Option<PathBuf>,
    units: Vec<ArtifactSummary>,
    resources: Vec<ArtifactSummary>,
    generations: Vec<GenerationReport>,
}

impl CaptureReport {
    fn from_session(session: &CaptureSession) -> Self {
        Self {
            session: session.id().to_string(),
            store: session.store().map(|s| s.root().to_path_buf()),
            units: session.discovered_units().iter().map(Into::into).collect(),
            resources: session.discovered_resources().iter().map(Into::into).collect(),
            generations: session.generations(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    util::paths::init_data_dir(cli.data_dir.clone());

    // Initialize logging to file (~/.depcapture/logs/depcapture.log)
    fs::create_dir_all(util::logs_dir())?;

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(util::log_file_path())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .init();

    let config = Config::load();

    match cli.command {
        Commands::Capture {
            entry,
            base_paths,
            destination,
            exclude_entry,
            linger_ms,
            single_pass,
            max_generations,
            search_path,
            runtime_home,
            args,
        } => {
            let mut config = config;
            if !search_path.is_empty() {
                config = config.with_search_path(parse_path_lists(&search_path));
            }
            if let Some(home) = runtime_home {
                config = config.with_runtime_home(home);
            }
            let linger = linger_ms.map(Duration::from_millis).or(config.capture.linger);
            let include = config.capture.include_entry_point && !exclude_entry;
            let max_generations = max_generations.unwrap_or(config.capture.max_generations);

            let request = CaptureRequest::new(entry, base_paths)
                .with_arguments(args)
                .include_entry_point(include)
                .with_linger(linger);
            let capturer = Capturer::new(Environment::from_config(&config));

            let mut session = match destination {
                None => capturer.capture(request, None),
                Some(dest) if single_pass || max_generations <= 1 => {
                    capturer.capture_and_store(request, &dest)?
                }
                Some(dest) => {
                    let launcher = ProcessLauncher::current_exe()
                        .context("Cannot locate the depcapture executable")?
                        .with_data_dir(cli.data_dir.clone())
                        .with_runtime_home(config.runtime_home.clone());
                    TwoPassCapturer::new(capturer, Arc::new(launcher))
                        .max_generations(max_generations)
                        .capture_and_store(request, &dest)?
                }
            };

            let cancel = session.cancellation_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            });
            let result = session.wait_for_completion().await;
            println!("{}", serde_json::to_string_pretty(&CaptureReport::from_session(&session))?);
            result?;
        }

        Commands::Run {
            search_path,
            entry,
            args,
        } => {
            let mut config = config;
            if !search_path.is_empty() {
                config = config.with_search_path(parse_path_lists(&search_path));
            }
            let env = Environment::from_config(&config);
            tokio::task::spawn_blocking(move || {
                Invocation::new(env, CancellationToken::new()).invoke_main(&entry, &args)
            })
            .await??;
        }

        Commands::Index { paths } => {
            let index = tokio::task::spawn_blocking(move || ArtifactIndex::build(&paths)).await?;
            let mut entries: Vec<ArtifactSummary> = index.iter().map(Into::into).collect();
            entries.sort_by(|a, b| (&a.container, &a.path).cmp(&(&b.container, &b.path)));
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }

        Commands::Resume { token } => resume(config, &token).await?,
    }

    Ok(())
}

/// Body of a relaunched generation: capture in root mode into the shared
/// store, then leave a parameters dump behind.
async fn resume(config: Config, raw: &[String]) -> Result<()> {
    let token = ResumeToken::from_args(raw, config.search_path.clone())?;
    tracing::info!(
        generation = token.generation,
        entry_point = %token.entry_point,
        search_path = token.search_path.len(),
        "Resuming relaunched generation"
    );

    let request = CaptureRequest::new(token.entry_point.clone(), token.scan_paths.clone())
        .with_arguments(token.main_arguments.clone())
        .include_entry_point(token.include_entry_point)
        .with_linger(token.linger);
    let capturer = Capturer::new(Environment::from_config(&config)).with_mode(InstallMode::Root);
    let mut session = capturer.capture_and_store(request, &token.destination)?;
    let result = session.wait_for_completion().await;

    if let Some(store) = session.store() {
        let dump = ParamsDump {
            written_at: chrono::Utc::now(),
            generation: token.generation,
            entry_point: token.entry_point.clone(),
            destination: token.destination.clone(),
            include_entry_point: token.include_entry_point,
            linger_millis: token.linger_millis(),
            search_path: token.search_path.clone(),
            scan_paths: token.scan_paths.clone(),
            main_arguments: token.main_arguments.clone(),
        };
        if let Err(e) = write_params_dump(store, &dump) {
            tracing::warn!(error = %e, "Failed to write parameters dump");
        }
    }

    if let Err(e) = result {
        tracing::warn!(generation = token.generation, error = %e, "Relaunched generation failed");
        bail!("generation {} failed: {e}", token.generation);
    }
    Ok(())
}

fn parse_path_lists(lists: &[String]) -> Vec<PathBuf> {
    lists.iter().flat_map(|list| split_path_list(list)).collect()
}
