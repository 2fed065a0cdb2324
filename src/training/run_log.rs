use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::error::{TrainingError, TrainingResult};

/// Append-only `train.log` of a session.
#[derive(Debug, Clone)]
pub struct RunLog {
    path: PathBuf,
}

impl RunLog {
    /// Truncates (or creates) the log for a fresh session.
    pub fn create(path: impl Into<PathBuf>) -> TrainingResult<Self> {
        let path = path.into();
        File::create(&path).map_err(|e| TrainingError::io(&path, e))?;
        Ok(Self { path })
    }

    /// Continues an existing log without truncating it.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `entry` followed by a newline.
    pub fn append(&self, entry: &str) -> TrainingResult<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| TrainingError::io(&self.path, e))?;
        writeln!(file, "{}", entry).map_err(|e| TrainingError::io(&self.path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_truncates() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("train.log");
        std::fs::write(&path, "old run\n").unwrap();

        let log = RunLog::create(&path).unwrap();
        log.append("Train Epoch: 0").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "Train Epoch: 0\n");
    }

    #[test]
    fn test_open_appends() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("train.log");
        std::fs::write(&path, "Train Epoch: 0\n").unwrap();

        let log = RunLog::open(&path);
        log.append("Train Epoch: 1").unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.ends_with("Train Epoch: 1\n"));
    }
}
