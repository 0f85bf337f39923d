//! Model persistence

use crate::error::{PipelineError, Result};
use crate::output::OutputBatch;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Write a fitted model to `path` as JSON, creating parent directories
pub fn save_model<M: Serialize, P: AsRef<Path>>(model: &M, path: P) -> Result<()> {
    let mut batch = OutputBatch::new();
    stage_json(&mut batch, path.as_ref(), model)?;
    batch.commit()?;
    Ok(())
}

fn stage_json<M: Serialize>(batch: &mut OutputBatch, path: &Path, model: &M) -> Result<()> {
    batch.stage(path, |out| {
        serde_json::to_writer(out, model)?;
        Ok(())
    })
}

/// Read a model written by [`save_model`] or [`ModelStore::stage`]
pub fn load_model<M: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<M> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => PipelineError::NotFound(path.to_path_buf()),
        _ => PipelineError::Io(e),
    })?;

    Ok(serde_json::from_reader(BufReader::new(file))?)
}

/// Directory of named model artifacts
#[derive(Debug, Clone)]
pub struct ModelStore {
    models_dir: PathBuf,
}

impl ModelStore {
    pub fn new<P: Into<PathBuf>>(models_dir: P) -> Self {
        Self {
            models_dir: models_dir.into(),
        }
    }

    /// Artifact path for a model name
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.models_dir.join(format!("{}.json", name))
    }

    /// Stage a fitted model as JSON; it lands on disk when `batch` commits
    pub fn stage<M: Serialize>(
        &self,
        batch: &mut OutputBatch,
        name: &str,
        model: &M,
    ) -> Result<PathBuf> {
        let path = self.path_for(name);
        stage_json(batch, &path, model)?;
        info!(model = %name, path = %path.display(), "Model staged");
        Ok(path)
    }

    /// Load a model if its artifact exists; a missing file is not an error
    pub fn load_if_present<M: DeserializeOwned>(&self, name: &str) -> Result<Option<M>> {
        let path = self.path_for(name);
        if !path.exists() {
            warn!(model = %name, path = %path.display(), "Model file not found");
            return Ok(None);
        }

        let model = load_model(&path)?;
        info!(model = %name, path = %path.display(), "Model loaded");
        Ok(Some(model))
    }
}
