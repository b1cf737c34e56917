use std::path::{Path, PathBuf};

use log::{debug, warn};
use walkdir::WalkDir;

/// Lists every regular file below `root` in walk order.
///
/// Entries are visited depth first with siblings sorted by file name, so repeated walks over an
/// unchanged tree yield the same sequence. Symbolic links are followed and reported under the
/// link's path. Unreadable entries and link loops are logged and skipped. A root that does not
/// exist or is not a directory yields nothing.
pub fn walk_files(root: &Path) -> Vec<PathBuf> {
    if !root.is_dir() {
        debug!("Search root {} is not a directory, nothing to walk", root.display());
        return Vec::new();
    }

    let section_name = root.file_name().unwrap_or_default().to_string_lossy();
    let mut files = Vec::new();

    for entry_result in WalkDir::new(root).follow_links(true).sort_by_file_name() {
        match entry_result {
            Ok(entry) => {
                if entry.file_type().is_file() {
                    files.push(entry.into_path());
                }
            }
            Err(err) => {
                warn!("Error accessing path in {}: {}", section_name, err);
            }
        }
    }

    debug!("Walked {} files under {}", files.len(), root.display());
    files
}
