//! Locations under the depcapture data directory

use std::path::PathBuf;
use std::sync::OnceLock;

/// Set once from `--data-dir`
static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Fix the data directory for this process. Call before anything reads a
/// path; later calls are ignored.
pub fn init_data_dir(custom_path: Option<PathBuf>) {
    let path = custom_path.unwrap_or_else(default_data_dir);
    if let Err(rejected) = DATA_DIR.set(path) {
        tracing::debug!(
            rejected = %rejected.display(),
            current = %data_dir().display(),
            "Data directory already set"
        );
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".depcapture"))
        .unwrap_or_else(|| PathBuf::from(".depcapture"))
}

pub fn data_dir() -> PathBuf {
    DATA_DIR.get().cloned().unwrap_or_else(default_data_dir)
}

pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Shared by the parent process and every relaunched generation
pub fn log_file_path() -> PathBuf {
    logs_dir().join("depcapture.log")
}

pub fn config_path() -> PathBuf {
    data_dir().join("config.toml")
}

/// Join paths with the platform's path-list separator
pub fn join_path_list<I, P>(paths: I) -> String
where
    I: IntoIterator<Item = P>,
    P: Into<PathBuf>,
{
    let paths: Vec<PathBuf> = paths.into_iter().map(Into::into).collect();
    match std::env::join_paths(&paths) {
        Ok(joined) => joined.to_string_lossy().into_owned(),
        // A path containing the separator itself; fall back to lossy joining
        Err(_) => paths
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(PATH_LIST_SEPARATOR),
    }
}

/// Split a platform path list, dropping empty entries
pub fn split_path_list(list: &str) -> Vec<PathBuf> {
    std::env::split_paths(list)
        .filter(|p| !p.as_os_str().is_empty())
        .collect()
}

#[cfg(windows)]
pub const PATH_LIST_SEPARATOR: &str = ";";
#[cfg(not(windows))]
pub const PATH_LIST_SEPARATOR: &str = ":";
