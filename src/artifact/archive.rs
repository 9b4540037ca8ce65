//! Zip archive containers

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use super::Artifact;

/// Extensions treated as archive containers
pub const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "jar", "car"];

/// Whether `path` names an archive container
pub fn is_archive(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            ARCHIVE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

/// Read every file entry of an archive, in archive order.
///
/// Entries that fail to decompress are skipped with a warning; a file that
/// is not a readable archive at all is an error.
pub(crate) fn read_archive(archive_path: &Path) -> io::Result<Vec<Artifact>> {
    let file = File::open(archive_path)?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let mut artifacts = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut entry = match archive.by_index(i) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(
                    archive = %archive_path.display(),
                    index = i,
                    error = %e,
                    "Skipping unreadable archive entry"
                );
                continue;
            }
        };
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().trim_start_matches('/').to_string();
        let mut content = Vec::with_capacity(entry.size() as usize);
        if let Err(e) = entry.read_to_end(&mut content) {
            tracing::warn!(
                archive = %archive_path.display(),
                entry = %name,
                error = %e,
                "Skipping archive entry that failed to decompress"
            );
            continue;
        }
        artifacts.push(Artifact::classify(archive_path, name, content));
    }
    Ok(artifacts)
}
