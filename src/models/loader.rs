//! Fitted model persistence

use crate::models::inference::FittedModel;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::info;

/// Bumped whenever the serialized layout of [`FittedModel`] changes.
const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct PersistedModel {
    format_version: u32,
    model: FittedModel,
}

/// Saves and loads fitted models as JSON
pub struct ModelStore {
    path: PathBuf,
}

impl ModelStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Write the model, creating parent directories as needed.
    pub fn save(&self, model: &FittedModel) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let file = File::create(&self.path)
            .with_context(|| format!("Failed to create {}", self.path.display()))?;
        let persisted = PersistedModel {
            format_version: FORMAT_VERSION,
            model: model.clone(),
        };
        serde_json::to_writer(BufWriter::new(file), &persisted)
            .with_context(|| format!("Failed to write model to {}", self.path.display()))?;

        info!(path = %self.path.display(), "Model saved");
        Ok(())
    }

    pub fn load(&self) -> Result<FittedModel> {
        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open model {}", self.path.display()))?;
        let persisted: PersistedModel = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse model {}", self.path.display()))?;

        if persisted.format_version != FORMAT_VERSION {
            anyhow::bail!(
                "Model {} has format version {}, expected {}",
                self.path.display(),
                persisted.format_version,
                FORMAT_VERSION
            );
        }

        info!(
            path = %self.path.display(),
            training_rows = persisted.model.training_rows(),
            fitted_at = %persisted.model.fitted_at(),
            "Model loaded"
        );
        Ok(persisted.model)
    }
}
