//! Staged writes for model artifacts.
//!
//! Files are written into a hidden temporary directory inside the target and renamed
//! into place one by one once every file has been written and synced. A crash while
//! writing leaves the previous artifact untouched; the staging directory is removed on
//! drop.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;

use super::error::ModelError;

const STAGING_PREFIX: &str = ".artifact-staging";

pub struct ArtifactStaging {
    staging: TempDir,
    target: PathBuf,
    files: Vec<String>,
}

impl ArtifactStaging {
    /// Creates the target directory (if needed) and a staging directory inside it.
    pub fn new(target: &Path) -> Result<Self, ModelError> {
        fs::create_dir_all(target).map_err(|e| ModelError::artifact_io(target, e))?;

        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(target)
            .map_err(|e| ModelError::artifact_io(target, e))?;

        Ok(Self {
            staging,
            target: target.to_path_buf(),
            files: Vec::new(),
        })
    }

    /// Returns the staging path for `name` and registers it for commit.
    ///
    /// Files are committed in registration order, so register the file that marks the
    /// artifact as loadable (`config.json`) last.
    pub fn file(&mut self, name: &str) -> PathBuf {
        self.files.push(name.to_string());
        self.staging.path().join(name)
    }

    /// Syncs every staged file and renames it into the target directory.
    pub fn commit(self) -> Result<(), ModelError> {
        for name in &self.files {
            let staged = self.staging.path().join(name);
            File::open(&staged)
                .and_then(|f| f.sync_all())
                .map_err(|e| ModelError::artifact_io(&staged, e))?;
        }

        for name in &self.files {
            let staged = self.staging.path().join(name);
            let final_path = self.target.join(name);
            fs::rename(&staged, &final_path).map_err(|e| ModelError::artifact_io(&final_path, e))?;
        }

        debug!(
            target = %self.target.display(),
            files = self.files.len(),
            "Artifact committed"
        );

        Ok(())
    }
}
