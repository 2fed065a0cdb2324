use std::io;
use std::path::{Path, PathBuf};

use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::constants::{MODEL_CONFIG_FILENAME, TOKENIZER_FILENAME, WEIGHTS_FILENAME};

use super::error::ModelError;

/// Loads a tokenizer from a model directory or explicit tokenizer.json path.
pub fn load_tokenizer(model_path: &Path) -> io::Result<Tokenizer> {
    let tokenizer_path = if model_path
        .file_name()
        .is_some_and(|name| name == std::ffi::OsStr::new(TOKENIZER_FILENAME))
    {
        model_path.to_path_buf()
    } else if model_path.is_dir() {
        model_path.join(TOKENIZER_FILENAME)
    } else {
        model_path
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "Model path has no parent"))?
            .join(TOKENIZER_FILENAME)
    };

    Tokenizer::from_file(&tokenizer_path).map_err(io::Error::other)
}

/// Loads a tokenizer with truncation enabled for a maximum sequence length.
///
/// Cross-encoders have a fixed maximum sequence length; longer (query, document)
/// pairs are truncated to fit.
pub fn load_tokenizer_with_truncation(model_path: &Path, max_len: usize) -> io::Result<Tokenizer> {
    let mut tokenizer = load_tokenizer(model_path)?;
    apply_truncation(&mut tokenizer, max_len)?;
    Ok(tokenizer)
}

/// Enables truncation to `max_len` tokens on an already loaded tokenizer.
pub fn apply_truncation(tokenizer: &mut Tokenizer, max_len: usize) -> io::Result<()> {
    use tokenizers::TruncationParams;

    let truncation = TruncationParams {
        max_length: max_len,
        ..Default::default()
    };

    tokenizer
        .with_truncation(Some(truncation))
        .map_err(|e| io::Error::other(format!("Failed to configure truncation: {}", e)))?;

    Ok(())
}

/// Checks that `dir` holds a loadable artifact (config + weights).
pub fn ensure_artifact_files(dir: &Path) -> Result<(), ModelError> {
    if !dir.is_dir() {
        return Err(ModelError::NotFound {
            path: dir.to_path_buf(),
        });
    }

    for name in [MODEL_CONFIG_FILENAME, WEIGHTS_FILENAME] {
        let path = dir.join(name);
        if !path.is_file() {
            return Err(ModelError::MissingFile { path });
        }
    }

    Ok(())
}

/// Resolves `model_name_or_path` to a local directory.
///
/// Existing paths are used as-is. Anything else is treated as a Hugging Face Hub
/// repository id; the config, tokenizer and weights are fetched into the hub cache and
/// the snapshot directory holding them is returned.
pub fn resolve_model_source(model_name_or_path: &str) -> Result<PathBuf, ModelError> {
    let local = Path::new(model_name_or_path);
    if local.exists() {
        debug!(path = %local.display(), "Using local model directory");
        return Ok(local.to_path_buf());
    }

    if model_name_or_path.trim().is_empty() {
        return Err(ModelError::InvalidConfig {
            reason: "model_name_or_path cannot be empty".to_string(),
        });
    }

    info!(repo = model_name_or_path, "Fetching model from the hub");

    use hf_hub::api::sync::Api;

    let download_err = |e: hf_hub::api::sync::ApiError| ModelError::DownloadFailed {
        repo: model_name_or_path.to_string(),
        reason: e.to_string(),
    };

    let api = Api::new().map_err(download_err)?;
    let repo = api.model(model_name_or_path.to_string());

    let config_path = repo.get(MODEL_CONFIG_FILENAME).map_err(download_err)?;
    repo.get(TOKENIZER_FILENAME).map_err(download_err)?;
    repo.get(WEIGHTS_FILENAME).map_err(download_err)?;

    let snapshot = config_path
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| ModelError::LoadFailed {
            reason: format!("hub path has no parent: {}", config_path.display()),
        })?;

    info!(path = %snapshot.display(), "Model snapshot ready");
    Ok(snapshot)
}
