//! Integration tests for single-pass captures
//!
//! Runs entry points through the capture engine and checks the discovered
//! set and the store it produces.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::common::fixtures::{names, stored_files_ending_with, BasePath};
use depcapture::store::{CallbackSink, LAUNCHER_PREFIX};
use depcapture::{
    Artifact, ArtifactSink, CaptureError, CaptureRequest, Capturer, Environment, ExecError, Store,
};

/// Entry point `A` calling into `B`, plus a unit nobody touches
fn a_calls_b() -> BasePath {
    let base = BasePath::new();
    base.unit("A", "proc main\n  call B run\nend\n")
        .unit("B", "proc run\nend\n")
        .unit("Unused", "proc main\nend\n");
    base
}

#[tokio::test]
async fn test_captures_entry_point_and_callee() {
    let base = a_calls_b();
    let capturer = Capturer::new(Environment::builder().build());

    let mut session = capturer.capture(CaptureRequest::new("A", base.paths()), None);
    session.wait_for_completion().await.unwrap();

    assert_eq!(names(&session.discovered_units()), ["A", "B"]);
    assert!(session.discovered_resources().is_empty());
}

#[tokio::test]
async fn test_excluded_entry_point_is_withheld() {
    let base = a_calls_b();
    let capturer = Capturer::new(Environment::builder().build());

    let mut session = capturer.capture(
        CaptureRequest::new("A", base.paths()).include_entry_point(false),
        None,
    );
    session.wait_for_completion().await.unwrap();

    assert_eq!(names(&session.discovered_units()), ["B"]);
}

#[tokio::test]
async fn test_resource_requested_twice_is_recorded_once() {
    let base = BasePath::new();
    base.unit("A", "proc main\n  resource config.txt\n  resource config.txt\nend\n")
        .resource("config.txt", "key=value\n")
        .resource("myconfig.txt", "unrelated\n");

    let mut session = Capturer::new(Environment::builder().build())
        .capture(CaptureRequest::new("A", base.paths()), None);
    session.wait_for_completion().await.unwrap();

    let resources = session.discovered_resources();
    assert_eq!(resources.len(), 1);
    assert_eq!(resources[0].name(), "config.txt");
    assert_eq!(resources[0].content(), b"key=value\n");
}

#[tokio::test]
async fn test_repeated_resolution_adds_one_entry() {
    let base = BasePath::new();
    let calls: String = (0..25).map(|_| "  call B run\n  load B\n").collect();
    base.unit("A", &format!("proc main\n{calls}end\n"))
        .unit("B", "proc run\nend\n");

    let mut session = Capturer::new(Environment::builder().build())
        .capture(CaptureRequest::new("A", base.paths()), None);
    session.wait_for_completion().await.unwrap();

    assert_eq!(session.discovered_units().len(), 2);
}

#[tokio::test]
async fn test_first_base_path_wins() {
    let first = BasePath::new();
    let second = BasePath::new();
    first.unit("A", "proc main\n  load X\nend\n").unit("X", "# first\n");
    second.unit("X", "# second\n");

    let mut session = Capturer::new(Environment::builder().build()).capture(
        CaptureRequest::new("A", vec![first.path.clone(), second.path.clone()]),
        None,
    );
    session.wait_for_completion().await.unwrap();

    let x = session.discovered_unit("X").expect("X should be discovered");
    assert_eq!(x.container(), first.path.as_path());
}

#[tokio::test]
async fn test_ambient_units_are_not_captured_unless_requested() {
    let host = BasePath::new();
    host.unit("Lib", "proc run\nend\n");
    let base = BasePath::new();
    base.unit("Lib", "proc run\nend\n")
        .unit("A", "proc main\n  lookup Lib\nend\n")
        .unit("Direct", "proc main\n  load Lib\nend\n");
    let env = Environment::builder().search_path(host.paths()).build();

    // Satisfied by the host before capture: not part of the result
    let mut session = Capturer::new(Arc::clone(&env)).capture(CaptureRequest::new("A", base.paths()), None);
    session.wait_for_completion().await.unwrap();
    assert!(session.discovered_unit("Lib").is_none());

    // Requested through the interceptor: captured from the base path
    let mut session = Capturer::new(env).capture(CaptureRequest::new("Direct", base.paths()), None);
    session.wait_for_completion().await.unwrap();
    let lib = session.discovered_unit("Lib").expect("Lib should be discovered");
    assert_eq!(lib.container(), base.path.as_path());
}

#[tokio::test]
async fn test_recovery_stops_when_nothing_new_is_missing() {
    let base = BasePath::new();
    base.unit("A", "proc main\n  load B\n  lookup Ghost\nend\n")
        .unit("B", "");

    let mut session = Capturer::new(Environment::builder().build())
        .capture(CaptureRequest::new("A", base.paths()), None);
    let result = tokio::time::timeout(Duration::from_secs(30), session.wait_for_completion())
        .await
        .expect("recovery should terminate");

    let err = result.unwrap_err();
    assert!(matches!(
        err,
        CaptureError::Invocation {
            source: ExecError::Unresolved { .. },
            ..
        }
    ));
    assert_eq!(err.exec_error().unwrap().missing_names(), ["Ghost"]);
    // Partial results survive the failure
    assert!(session.discovered_unit("B").is_some());
}

#[tokio::test]
async fn test_entry_point_arguments_drive_resolution() {
    let base = BasePath::new();
    base.unit("A", "proc main\n  arg 0\nend\n")
        .unit("Chosen", "")
        .unit("Other", "");

    let mut session = Capturer::new(Environment::builder().build()).capture(
        CaptureRequest::new("A", base.paths()).with_arguments(vec!["Chosen".to_string()]),
        None,
    );
    session.wait_for_completion().await.unwrap();

    assert_eq!(names(&session.discovered_units()), ["A", "Chosen"]);
}

#[tokio::test]
async fn test_store_materializes_discovered_artifacts() {
    let base = a_calls_b();
    base.resource("conf/app.txt", "settings");
    base.unit("B", "proc run\n  resource conf/app.txt\nend\n");
    let dest = tempfile::tempdir().unwrap();

    let mut session = Capturer::new(Environment::builder().build())
        .capture_and_store(CaptureRequest::new("A", base.paths()), dest.path())
        .unwrap();
    session.wait_for_completion().await.unwrap();

    let store = Store::open(dest.path()).unwrap();
    let stored = store.scan().unwrap();
    let mut unit_names: Vec<&str> = stored.unit_names().collect();
    unit_names.sort();
    assert_eq!(unit_names, ["A", "B"]);
    assert_eq!(stored.ending_with("conf/app.txt").count(), 1);
    assert!(stored.unit("Unused").is_none());

    let launchers: Vec<_> = fs::read_dir(dest.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with(LAUNCHER_PREFIX))
        .collect();
    assert_eq!(launchers.len(), 1);
}

#[tokio::test]
async fn test_second_run_does_not_rewrite_stored_artifacts() {
    let base = a_calls_b();
    let dest = tempfile::tempdir().unwrap();
    let capturer = Capturer::new(Environment::builder().build());

    let mut session = capturer
        .capture_and_store(CaptureRequest::new("A", base.paths()), dest.path())
        .unwrap();
    session.wait_for_completion().await.unwrap();

    let stored_b = stored_files_ending_with(dest.path(), "B.unit");
    assert_eq!(stored_b.len(), 1);
    // Marker to detect a rewrite
    fs::write(&stored_b[0], "unit B\n# untouched\nproc run\nend\n").unwrap();
    let files_before = Store::open(dest.path()).unwrap().files().unwrap();

    let mut session = capturer
        .capture_and_store(CaptureRequest::new("A", base.paths()), dest.path())
        .unwrap();
    session.wait_for_completion().await.unwrap();

    assert_eq!(Store::open(dest.path()).unwrap().files().unwrap(), files_before);
    assert!(fs::read_to_string(&stored_b[0]).unwrap().contains("# untouched"));
}

#[tokio::test]
async fn test_archive_members_are_stored_in_their_own_bucket() {
    let base = BasePath::new();
    base.unit("A", "proc main\n  call lib.Util greet\nend\n");
    base.archive("lib.zip", &[("lib.Util", "proc greet\nend\n")]);
    let dest = tempfile::tempdir().unwrap();

    let mut session = Capturer::new(Environment::builder().build())
        .capture_and_store(CaptureRequest::new("A", base.paths()), dest.path())
        .unwrap();
    session.wait_for_completion().await.unwrap();

    let util = session.discovered_unit("lib.Util").expect("archive member discovered");
    assert_eq!(util.container(), base.path.join("lib.zip").as_path());
    assert!(dest.path().join("[base][lib.zip]").join("lib").join("Util.unit").is_file());
    assert_eq!(stored_files_ending_with(dest.path(), "A.unit").len(), 1);
}

#[tokio::test]
async fn test_runtime_home_artifacts_are_never_stored() {
    let runtime = BasePath::new();
    runtime.unit("core.Builtin", "");
    let base = BasePath::new();
    base.unit("A", "proc main\n  load core.Builtin\nend\n");
    let dest = tempfile::tempdir().unwrap();

    let env = Environment::builder().runtime_home(&runtime.path).build();
    let mut session = Capturer::new(env)
        .capture_and_store(
            CaptureRequest::new("A", vec![base.path.clone(), runtime.path.clone()]),
            dest.path(),
        )
        .unwrap();
    session.wait_for_completion().await.unwrap();

    assert!(session.discovered_unit("core.Builtin").is_some());
    assert!(stored_files_ending_with(dest.path(), "Builtin.unit").is_empty());
    assert_eq!(stored_files_ending_with(dest.path(), "A.unit").len(), 1);
}

#[tokio::test]
async fn test_linger_catches_background_load() {
    let base = BasePath::new();
    base.unit("A", "proc main\n  defer 20 load Late\nend\n")
        .unit("Late", "");

    let mut session = Capturer::new(Environment::builder().build()).capture(
        CaptureRequest::new("A", base.paths()).with_linger(Some(Duration::from_millis(800))),
        None,
    );
    session.wait_for_completion().await.unwrap();

    assert_eq!(names(&session.discovered_units()), ["A", "Late"]);
}

#[tokio::test]
async fn test_persistence_failure_does_not_abort_capture() {
    let base = BasePath::new();
    base.unit("A", "proc main\n  call lib.Util greet\nend\n");
    base.archive("lib.zip", &[("lib.Util", "proc greet\nend\n")]);
    let dest = tempfile::tempdir().unwrap();
    // A plain file where the archive's bucket directory would go
    fs::write(dest.path().join("[base][lib.zip]"), "in the way").unwrap();

    let mut session = Capturer::new(Environment::builder().build())
        .capture_and_store(CaptureRequest::new("A", base.paths()), dest.path())
        .unwrap();
    session.wait_for_completion().await.unwrap();

    assert!(session.discovered_unit("lib.Util").is_some());
    assert_eq!(stored_files_ending_with(dest.path(), "A.unit").len(), 1);
    assert!(stored_files_ending_with(dest.path(), "Util.unit").is_empty());
    assert!(dest.path().join("[base][lib.zip]").is_file());
}

#[tokio::test]
async fn test_callback_sink_sees_each_discovery_once() {
    let base = BasePath::new();
    base.unit("A", "proc main\n  call B run\n  load B\n  resource conf/app.txt\nend\n")
        .unit("B", "proc run\n  resource conf/app.txt\nend\n")
        .resource("conf/app.txt", "settings");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink: Arc<dyn ArtifactSink> = {
        let seen = Arc::clone(&seen);
        Arc::new(CallbackSink::new(move |artifact: &Artifact| {
            seen.lock().push(artifact.name().to_string());
        }))
    };

    let mut session = Capturer::new(Environment::builder().build())
        .capture(CaptureRequest::new("A", base.paths()), Some(sink));
    session.wait_for_completion().await.unwrap();

    let mut seen = seen.lock().clone();
    seen.sort();
    assert_eq!(seen, ["A", "B", "conf/app.txt"]);
}
