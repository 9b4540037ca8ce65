//! Files written at the store root: launcher scripts and parameter dumps

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::util::paths::join_path_list;

use super::Store;

pub const LAUNCHER_PREFIX: &str = "executor-";
pub const PARAMS_PREFIX: &str = "params-";

#[cfg(windows)]
const LAUNCHER_EXTENSION: &str = "cmd";
#[cfg(not(windows))]
const LAUNCHER_EXTENSION: &str = "sh";

/// Write a script that runs `entry_point` against the store alone.
///
/// The script invokes `executable run --search-path <buckets> <entry> <args>`
/// so the captured closure can be executed without the original base paths.
pub fn write_launcher_script(
    store: &Store,
    executable: &Path,
    entry_point: &str,
    args: &[String],
) -> io::Result<PathBuf> {
    let search_path = join_path_list(store.bucket_dirs()?);
    let mut command = vec![
        executable.display().to_string(),
        "run".to_string(),
        "--search-path".to_string(),
        search_path,
        entry_point.to_string(),
    ];
    command.extend(args.iter().cloned());

    let path = store.root().join(format!(
        "{LAUNCHER_PREFIX}{}.{LAUNCHER_EXTENSION}",
        Uuid::new_v4()
    ));
    fs::write(&path, render_launcher(&command))?;
    make_executable(&path)?;
    tracing::debug!(path = %path.display(), "Launcher script written");
    Ok(path)
}

#[cfg(not(windows))]
fn render_launcher(command: &[String]) -> String {
    let quoted: Vec<String> = command.iter().map(|part| sh_quote(part)).collect();
    format!("#!/bin/sh\nexec {}\n", quoted.join(" "))
}

#[cfg(windows)]
fn render_launcher(command: &[String]) -> String {
    let quoted: Vec<String> = command.iter().map(|part| format!("\"{part}\"")).collect();
    format!("@echo off\r\n{}\r\n", quoted.join(" "))
}

#[cfg(unix)]
fn make_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_mode(0o755);
    fs::set_permissions(path, permissions)
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// Single-quote a word for `/bin/sh` unless it is plainly safe
#[cfg(not(windows))]
fn sh_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | ':' | '=' | ','));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// What a relaunched generation was invoked with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamsDump {
    pub written_at: DateTime<Utc>,
    pub generation: u32,
    pub entry_point: String,
    pub destination: PathBuf,
    pub include_entry_point: bool,
    pub linger_millis: u64,
    pub search_path: Vec<PathBuf>,
    pub scan_paths: Vec<PathBuf>,
    pub main_arguments: Vec<String>,
}

/// Write `params` as `params-<uuid>.txt` at the store root
pub fn write_params_dump(store: &Store, params: &ParamsDump) -> io::Result<PathBuf> {
    let rendered = toml::to_string_pretty(params)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let path = store
        .root()
        .join(format!("{PARAMS_PREFIX}{}.txt", Uuid::new_v4()));
    fs::write(&path, rendered)?;
    tracing::debug!(path = %path.display(), generation = params.generation, "Parameters dumped");
    Ok(path)
}
