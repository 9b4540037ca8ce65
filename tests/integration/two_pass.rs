//! Integration tests for multi-generation captures
//!
//! Generation 1 cannot see a unit that a background thread looks up
//! reflectively after `main` returns; a relaunched generation, whose
//! interceptor sits at the front of the ambient chain, can.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::common::fixtures::{stored_files_ending_with, BasePath};
use depcapture::capture::LaunchExit;
use depcapture::store::ParamsDump;
use depcapture::{
    CaptureRequest, Capturer, Environment, GenerationLauncher, InstallMode, ProcessLauncher,
    ResumeToken, Store, TwoPassCapturer,
};

/// `A` looks `C` up reflectively on a background thread shortly after starting
fn late_resolution() -> BasePath {
    let base = BasePath::new();
    base.unit("A", "proc main\n  defer 50 lookup C\nend\n")
        .unit("C", "proc run\nend\n");
    base
}

fn request(base: &BasePath) -> CaptureRequest {
    CaptureRequest::new("A", base.paths()).with_linger(Some(Duration::from_millis(500)))
}

fn stored_unit_names(store_root: &std::path::Path) -> Vec<String> {
    let index = Store::open(store_root).unwrap().scan().unwrap();
    let mut names: Vec<String> = index.unit_names().map(str::to_string).collect();
    names.sort();
    names
}

/// Runs each generation in this process, the way the `resume` command would
struct InProcessLauncher;

#[async_trait]
impl GenerationLauncher for InProcessLauncher {
    async fn launch(&self, token: &ResumeToken, _cancel: CancellationToken) -> io::Result<LaunchExit> {
        // The command-line form must carry everything but the search path
        let token = ResumeToken::from_args(&token.to_args(), token.search_path.clone())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let env = Environment::builder().search_path(token.search_path.clone()).build();
        let request = CaptureRequest::new(token.entry_point.clone(), token.scan_paths.clone())
            .include_entry_point(token.include_entry_point)
            .with_linger(token.linger);
        let mut session = Capturer::new(env)
            .with_mode(InstallMode::Root)
            .capture_and_store(request, &token.destination)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let code = match session.wait_for_completion().await {
            Ok(()) => 0,
            Err(_) => 1,
        };
        Ok(LaunchExit::Exited(Some(code)))
    }
}

#[tokio::test]
async fn test_single_pass_misses_late_reflective_lookup() {
    let base = late_resolution();
    let dest = tempfile::tempdir().unwrap();

    let mut session = Capturer::new(Environment::builder().build())
        .capture_and_store(request(&base), dest.path())
        .unwrap();
    session.wait_for_completion().await.unwrap();

    assert!(session.discovered_unit("A").is_some());
    assert!(session.discovered_unit("C").is_none());
    assert_eq!(stored_unit_names(dest.path()), ["A"]);
}

#[tokio::test]
async fn test_second_generation_captures_late_resolution() {
    let base = late_resolution();
    let dest = tempfile::tempdir().unwrap();

    let capturer = TwoPassCapturer::new(
        Capturer::new(Environment::builder().build()),
        Arc::new(InProcessLauncher),
    );
    let mut session = capturer.capture_and_store(request(&base), dest.path()).unwrap();
    session.wait_for_completion().await.unwrap();

    assert_eq!(stored_unit_names(dest.path()), ["A", "C"]);
    assert!(session.discovered_unit("C").is_some());
    let generations = session.generations();
    assert_eq!(generations.len(), 2);
    assert_eq!(generations[0].new_files, 1);
    assert_eq!(generations[1].exit_code, Some(0));
    assert_eq!(generations[1].new_files, 1);
}

#[tokio::test]
async fn test_relaunched_binary_captures_late_resolution() {
    let base = late_resolution();
    let dest = tempfile::tempdir().unwrap();
    let data_dir = tempfile::tempdir().unwrap();

    let launcher = ProcessLauncher::new(PathBuf::from(env!("CARGO_BIN_EXE_depcapture")))
        .with_data_dir(Some(data_dir.path().to_path_buf()));
    let capturer = TwoPassCapturer::new(Capturer::new(Environment::builder().build()), Arc::new(launcher));
    let mut session = capturer.capture_and_store(request(&base), dest.path()).unwrap();
    tokio::time::timeout(Duration::from_secs(60), session.wait_for_completion())
        .await
        .expect("generations should finish")
        .unwrap();

    assert_eq!(stored_unit_names(dest.path()), ["A", "C"]);
    let generations = session.generations();
    assert_eq!(generations.len(), 2);
    assert!(generations[1].succeeded());

    let dump_path = generations[1].params_dump.clone().expect("child writes a parameters dump");
    let dump: ParamsDump = toml::from_str(&std::fs::read_to_string(dump_path).unwrap()).unwrap();
    assert_eq!(dump.generation, 2);
    assert_eq!(dump.entry_point, "A");
    assert_eq!(dump.linger_millis, 500);
    assert_eq!(dump.scan_paths, base.paths());
}

#[tokio::test]
async fn test_relaunched_binary_respects_excluded_entry_point() {
    let base = late_resolution();
    let dest = tempfile::tempdir().unwrap();
    let data_dir = tempfile::tempdir().unwrap();

    let launcher = ProcessLauncher::new(PathBuf::from(env!("CARGO_BIN_EXE_depcapture")))
        .with_data_dir(Some(data_dir.path().to_path_buf()));
    let capturer = TwoPassCapturer::new(Capturer::new(Environment::builder().build()), Arc::new(launcher));
    let mut session = capturer
        .capture_and_store(request(&base).include_entry_point(false), dest.path())
        .unwrap();
    tokio::time::timeout(Duration::from_secs(60), session.wait_for_completion())
        .await
        .expect("generations should finish")
        .unwrap();

    assert_eq!(stored_unit_names(dest.path()), ["C"]);
    assert!(stored_files_ending_with(dest.path(), "A.unit").is_empty());
    assert!(session.discovered_unit("A").is_none());
    assert!(session.discovered_unit("C").is_some());
}
