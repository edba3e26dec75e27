use crate::compiler::descriptor::{Implementation, OptimizerSpec};
use crate::error::ExperimentError;
use crate::experiment::ExperimentPlan;
use crate::model::PretrainedModel;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_split() -> f64 {
    0.3
}

fn default_n_repeat() -> usize {
    5
}

fn default_scaffold_dir() -> PathBuf {
    PathBuf::from("scaffold")
}

fn default_results_file() -> PathBuf {
    PathBuf::from("benchmark_results.json")
}

/// How to invoke the external model compiler.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CompilerConfig {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

/// An experiment file.
///
/// ```json
/// {
///   "dataset": "magic",
///   "output_root": "/tmp/fi/magic",
///   "model_name": "tree",
///   "model": {"path": "tree.json", "n_classes": 2, "accuracy": 85.1},
///   "implementations": [["ifelse", {}], ["native", {"reorder_nodes": true}]],
///   "optimizers": [[[null], [null]], [["quantize"], [{}]]],
///   "compiler": {"program": "fastinference"}
/// }
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ExperimentConfig {
    pub dataset: String,
    #[serde(default = "default_split")]
    pub split: f64,
    /// Dataset cache; see `CacheDir::resolve` for the fallback.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    pub output_root: PathBuf,
    pub model_name: String,
    #[serde(default = "default_n_repeat")]
    pub n_repeat: usize,
    pub model: PretrainedModel,
    pub implementations: Vec<Implementation>,
    pub optimizers: Vec<OptimizerSpec>,
    pub compiler: CompilerConfig,
    #[serde(default = "default_scaffold_dir")]
    pub scaffold_dir: PathBuf,
    /// Parallel cells; all available cores when unset.
    #[serde(default)]
    pub workers: Option<usize>,
    /// Upper bound for every compiler, build and benchmark command.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub core_id: Option<usize>,
    #[serde(default = "default_results_file")]
    pub results_file: PathBuf,
}

impl ExperimentConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ExperimentError> {
        let path = path.as_ref();
        let config_error = |message: String| ExperimentError::Config { path: path.to_path_buf(), message };

        let content = fs::read_to_string(path).map_err(|e| config_error(e.to_string()))?;
        let config: ExperimentConfig = serde_json::from_str(&content).map_err(|e| config_error(e.to_string()))?;

        if !(config.split > 0.0 && config.split < 1.0) {
            return Err(config_error(format!("split {} must be in (0, 1)", config.split)));
        }
        if config.workers == Some(0) {
            return Err(config_error("workers must be greater than 0".to_string()));
        }

        Ok(config)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn plan(&self) -> ExperimentPlan {
        ExperimentPlan {
            dataset: self.dataset.clone(),
            split: self.split,
            implementations: self.implementations.clone(),
            optimizers: self.optimizers.clone(),
            output_root: self.output_root.clone(),
            model_name: self.model_name.clone(),
            n_repeat: self.n_repeat,
        }
    }
}
