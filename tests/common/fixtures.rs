//! Base path fixtures
//!
//! Builds throwaway directories of unit files and resources that the
//! capture engine can scan.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use depcapture::artifact::unit_relative_path;
use tempfile::TempDir;
use zip::write::FileOptions;

/// A temporary base path
///
/// The directory is removed when the `BasePath` is dropped.
pub struct BasePath {
    /// TempDir handle (keeps directory alive until dropped)
    _dir: TempDir,
    /// Root of the base path
    pub path: PathBuf,
}

impl BasePath {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("base");
        fs::create_dir_all(&path).expect("Failed to create base path");
        Self { _dir: dir, path }
    }

    /// Write a unit named `name` whose body follows the header
    pub fn unit(&self, name: &str, body: &str) -> &Self {
        let path = self.path.join(unit_relative_path(name));
        write_file(&path, format!("unit {name}\n{body}").as_bytes());
        self
    }

    /// Write a resource at `relative_path`
    pub fn resource(&self, relative_path: &str, content: &str) -> &Self {
        write_file(&self.path.join(relative_path), content.as_bytes());
        self
    }

    /// Write a zip archive next to the base path's files.
    ///
    /// `units` are (name, body) pairs stored under their unit paths.
    pub fn archive(&self, file_name: &str, units: &[(&str, &str)]) -> PathBuf {
        let path = self.path.join(file_name);
        let mut zip = zip::ZipWriter::new(File::create(&path).expect("Failed to create archive"));
        for (name, body) in units {
            zip.start_file(unit_relative_path(name), FileOptions::default())
                .expect("Failed to start archive entry");
            zip.write_all(format!("unit {name}\n{body}").as_bytes())
                .expect("Failed to write archive entry");
        }
        zip.finish().expect("Failed to finish archive");
        path
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        vec![self.path.clone()]
    }
}

impl Default for BasePath {
    fn default() -> Self {
        Self::new()
    }
}

fn write_file(path: &Path, content: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent directory");
    }
    fs::write(path, content).expect("Failed to write fixture file");
}

/// Every file under the store's buckets whose name ends with `suffix`
pub fn stored_files_ending_with(store_root: &Path, suffix: &str) -> Vec<PathBuf> {
    walkdir::WalkDir::new(store_root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.to_string_lossy().ends_with(suffix))
        .collect()
}

/// Sorted names of a list of artifacts
pub fn names(artifacts: &[depcapture::Artifact]) -> Vec<String> {
    let mut names: Vec<String> = artifacts.iter().map(|a| a.name().to_string()).collect();
    names.sort();
    names
}
