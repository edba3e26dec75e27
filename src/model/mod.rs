use crate::dataset::{Dataset, Matrix};
use crate::error::ModelError;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// On-disk representation of a model handed to the model compiler.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFormat {
    /// The compiler's own JSON descriptor.
    CompilerJson,
    /// A native ONNX graph.
    Onnx,
}

impl ModelFormat {
    pub fn from_path(path: &Path) -> Result<Self, ModelError> {
        match path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref() {
            Some("json") => Ok(ModelFormat::CompilerJson),
            Some("onnx") => Ok(ModelFormat::Onnx),
            _ => Err(ModelError::UnknownFormat(path.to_path_buf())),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ModelFormat::CompilerJson => "json",
            ModelFormat::Onnx => "onnx",
        }
    }
}

/// A model persisted for the exporter.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredModel {
    pub path: PathBuf,
    pub n_classes: usize,
    pub format: ModelFormat,
}

/// A trainable classifier provided by an external ML library.
pub trait Estimator: Send {
    fn fit(&mut self, features: &Matrix, labels: &[u32]) -> Result<(), ModelError>;

    fn predict(&self, features: &Matrix) -> Result<Vec<u32>, ModelError>;

    /// Serialises the fitted model into a format the model compiler loads,
    /// embedding the reference `accuracy` (in percent).
    fn store(&self, dir: &Path, name: &str, accuracy: f64) -> Result<StoredModel, ModelError>;
}

/// An already exported model artifact.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PretrainedModel {
    pub path: PathBuf,
    pub n_classes: usize,
    /// Holdout accuracy measured when the artifact was produced, if known.
    #[serde(default)]
    pub accuracy: Option<f64>,
}

/// The classifier every generated artifact is compared against.
pub enum ReferenceModel {
    Estimator(Box<dyn Estimator>),
    Pretrained(PretrainedModel),
}

/// Reference model after it has been stored once under the output root.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedModel {
    pub stored: StoredModel,
    pub accuracy: Option<f64>,
}

impl ReferenceModel {
    /// Fits the model if needed, scores it on the test split and persists it
    /// under `output_root` with a file name derived from `name`.
    pub fn prepare(self, dataset: &Dataset, output_root: &Path, name: &str) -> Result<PreparedModel, ModelError> {
        fs::create_dir_all(output_root)?;

        match self {
            ReferenceModel::Estimator(mut estimator) => {
                info!("Fitting model.");
                estimator.fit(&dataset.train_features, &dataset.train_labels)?;

                let predictions = estimator.predict(&dataset.test_features)?;
                let accuracy = accuracy_score(&predictions, &dataset.test_labels);
                info!("Reference accuracy on {}: {:.3}%", dataset.dataset_name, accuracy);

                info!("Storing model.");
                let stored = estimator.store(output_root, name, accuracy)?;
                Ok(PreparedModel { stored, accuracy: Some(accuracy) })
            }
            ReferenceModel::Pretrained(model) => {
                let format = ModelFormat::from_path(&model.path)?;
                let target = output_root.join(format!("{}.{}", name, format.extension()));

                let same_file = match (fs::canonicalize(&model.path), fs::canonicalize(&target)) {
                    (Ok(a), Ok(b)) => a == b,
                    _ => false,
                };
                if !same_file {
                    fs::copy(&model.path, &target).map_err(|e| ModelError::Store {
                        path: target.clone(),
                        message: e.to_string(),
                    })?;
                }
                info!("Stored model {} to {}", model.path.display(), target.display());

                Ok(PreparedModel {
                    stored: StoredModel { path: target, n_classes: model.n_classes, format },
                    accuracy: model.accuracy,
                })
            }
        }
    }
}

/// Percentage of predictions that match the ground truth.
pub fn accuracy_score(predictions: &[u32], truth: &[u32]) -> f64 {
    if truth.is_empty() {
        return 0.0;
    }
    let correct = predictions.iter().zip(truth).filter(|(p, t)| p == t).count();
    correct as f64 / truth.len() as f64 * 100.0
}
