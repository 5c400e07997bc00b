//! Model artifact directory: one JSON artifact per quantile.
//!
//! Layout: `{dir}/quantile_{id}.json`, overwritten on retrain. There is no
//! registry or versioning; the artifacts are the only hand-off between
//! training and forecasting.

use super::linear::LinearQuantileModel;
use super::{ModelError, Quantile, QuantileModels, QuantileRegressor};
use std::fs;
use std::path::{Path, PathBuf};

pub struct ModelStore {
    dir: PathBuf,
}

impl ModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn artifact_path(&self, quantile: Quantile) -> PathBuf {
        self.dir.join(format!("quantile_{}.json", quantile.id()))
    }

    /// Write atomically (tmp file, then rename).
    pub fn save(&self, model: &LinearQuantileModel) -> Result<PathBuf, ModelError> {
        fs::create_dir_all(&self.dir).map_err(|e| ModelError::Io(format!("create dir: {e}")))?;
        let path = self.artifact_path(model.quantile);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(model)
            .map_err(|e| ModelError::Serialization(e.to_string()))?;
        fs::write(&tmp, json).map_err(|e| ModelError::Io(format!("write {}: {e}", tmp.display())))?;
        fs::rename(&tmp, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            ModelError::Io(format!("atomic rename failed: {e}"))
        })?;
        Ok(path)
    }

    pub fn load(&self, quantile: Quantile) -> Result<LinearQuantileModel, ModelError> {
        let path = self.artifact_path(quantile);
        if !path.exists() {
            return Err(ModelError::MissingArtifact { quantile, path });
        }
        let content = fs::read_to_string(&path)
            .map_err(|e| ModelError::Io(format!("read {}: {e}", path.display())))?;
        let model: LinearQuantileModel = serde_json::from_str(&content)
            .map_err(|e| ModelError::Serialization(format!("{}: {e}", path.display())))?;
        if model.quantile != quantile {
            return Err(ModelError::FeatureMismatch {
                quantile,
                detail: format!("artifact holds {} instead", model.quantile),
            });
        }
        Ok(model)
    }

    /// Load every requested quantile, checking each was trained on
    /// `expected_features`. Fails on the first absent artifact.
    pub fn load_all(
        &self,
        quantiles: &[Quantile],
        expected_features: &[String],
    ) -> Result<QuantileModels, ModelError> {
        let mut models: Vec<Box<dyn QuantileRegressor>> = Vec::with_capacity(quantiles.len());
        for &q in quantiles {
            let model = self.load(q)?;
            if model.feature_names != expected_features {
                let detail = first_difference(&model.feature_names, expected_features);
                return Err(ModelError::FeatureMismatch { quantile: q, detail });
            }
            models.push(Box::new(model));
        }
        Ok(QuantileModels::new(models))
    }
}

fn first_difference(trained: &[String], current: &[String]) -> String {
    if trained.len() != current.len() {
        return format!(
            "trained on {} features, current layout has {}",
            trained.len(),
            current.len()
        );
    }
    trained
        .iter()
        .zip(current)
        .enumerate()
        .find(|(_, (a, b))| a != b)
        .map(|(i, (a, b))| format!("feature {i} is '{a}', expected '{b}'"))
        .unwrap_or_default()
}
