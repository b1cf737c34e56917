//! Per-run registry directories for the shipper.
//!
//! The shipper records file offsets in its registry. Re-running over the same triage directory
//! must ship everything again, so the registry directory is wiped and recreated before each run.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::info;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateDirError {
    #[error("The directory {} cannot be deleted, please check if the directory is in use: {source}", .path.display())]
    Cleanup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Unable to create the directory {}, please check directory permissions: {source}", .path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type StateDirResult<T> = Result<T, StateDirError>;

/// Owns the `<shipper>/<data>/<runId>` layout.
#[derive(Debug, Clone)]
pub struct StateDirectoryManager {
    data_dir: PathBuf,
}

impl StateDirectoryManager {
    pub fn new(shipper_dir: &Path, data_dir_name: &str) -> Self {
        Self {
            data_dir: shipper_dir.join(data_dir_name),
        }
    }

    /// Derives the run identifier from the base name of a triage directory.
    pub fn run_id(triage_dir: &Path) -> String {
        triage_dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "root".to_string())
    }

    /// Ensures `data/<run_id>` exists and is empty, returning its path.
    pub fn prepare(&self, run_id: &str) -> StateDirResult<PathBuf> {
        if !self.data_dir.is_dir() {
            info!("Data path not found, creating {}", self.data_dir.display());
            fs::create_dir_all(&self.data_dir).map_err(|source| StateDirError::Create {
                path: self.data_dir.clone(),
                source,
            })?;
        }

        let run_dir = self.data_dir.join(run_id);
        if run_dir.exists() {
            info!(
                "The directory \"{}\" already exists in {}, removing...",
                run_id,
                self.data_dir.display()
            );
            let removed = if run_dir.is_dir() {
                fs::remove_dir_all(&run_dir)
            } else {
                fs::remove_file(&run_dir)
            };
            removed.map_err(|source| StateDirError::Cleanup {
                path: run_dir.clone(),
                source,
            })?;
        }

        info!("Creating new directory \"{}\" in {}", run_id, self.data_dir.display());
        fs::create_dir(&run_dir).map_err(|source| StateDirError::Create {
            path: run_dir.clone(),
            source,
        })?;

        Ok(run_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{create_dir_all, read_dir, write};
    use tempfile::tempdir;

    #[test]
    fn test_run_id_is_base_name() {
        assert_eq!(
            StateDirectoryManager::run_id(Path::new("/cases/ubuntu-triage_20211110")),
            "ubuntu-triage_20211110"
        );
    }

    #[test]
    fn test_prepare_creates_data_dir() {
        let shipper = tempdir().unwrap();
        let manager = StateDirectoryManager::new(shipper.path(), "data");

        let run_dir = manager.prepare("case1").unwrap();
        assert_eq!(run_dir, shipper.path().join("data/case1"));
        assert!(run_dir.is_dir());
    }

    #[test]
    fn test_prepare_twice_leaves_empty_directory() {
        let shipper = tempdir().unwrap();
        let manager = StateDirectoryManager::new(shipper.path(), "data");

        let run_dir = manager.prepare("case1").unwrap();
        create_dir_all(run_dir.join("registry/filebeat")).unwrap();
        write(run_dir.join("registry/filebeat/log.json"), "{}").unwrap();

        let run_dir = manager.prepare("case1").unwrap();
        assert!(run_dir.is_dir());
        assert_eq!(read_dir(&run_dir).unwrap().count(), 0);
    }

    #[test]
    fn test_prepare_leaves_other_runs_alone() {
        let shipper = tempdir().unwrap();
        let manager = StateDirectoryManager::new(shipper.path(), "data");

        let other = manager.prepare("case10").unwrap();
        write(other.join("meta.json"), "{}").unwrap();
        manager.prepare("case1").unwrap();

        assert!(other.join("meta.json").exists());
    }
}
