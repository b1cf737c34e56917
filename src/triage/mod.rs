//! Discovery, shipping and reconciliation of forensic triage captures.

pub mod backend;
pub mod command;
pub mod discovery;
pub mod estimate;
pub mod reconcile;
pub mod shipper;
pub mod state;
pub mod taxonomy;

use std::path::{Path, PathBuf};

use thiserror::Error;

use state::StateDirectoryManager;

#[derive(Error, Debug)]
#[error("The following indicated path cannot be found: {}", .0.display())]
pub struct InvalidTriageDirectory(pub PathBuf);

/// One forensic capture to process, held as an absolute path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriageDirectory {
    path: PathBuf,
}

impl TriageDirectory {
    /// Makes `raw` absolute and checks that it names an existing directory.
    pub fn resolve(raw: &Path) -> Result<Self, InvalidTriageDirectory> {
        let path = std::path::absolute(raw).map_err(|_| InvalidTriageDirectory(raw.to_path_buf()))?;
        if !path.is_dir() {
            return Err(InvalidTriageDirectory(path));
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Identifier of this capture's shipper registry.
    pub fn run_id(&self) -> String {
        StateDirectoryManager::run_id(&self.path)
    }
}
