pub mod descriptor;

use crate::error::ExportError;
use crate::fingerprint::ConfigValue;
use crate::model::ModelFormat;
use crate::process::{CommandSpec, ProcessRunner};
use descriptor::{Implementation, OptimizerPipeline, OptimizerSpec};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Name of the generated model inside every cell directory.
pub const OUT_NAME: &str = "model";

/// Whether a loaded model is a plain estimator or an ensemble of members.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Single,
    Composite,
}

/// A stored model as seen by the model compiler.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportableModel {
    pub path: PathBuf,
    pub format: ModelFormat,
    pub kind: ModelKind,
}

impl ExportableModel {
    /// Inspects the artifact to decide which export strategy applies.
    ///
    /// ONNX graphs are always single models. Compiler JSON descriptors carry
    /// their model type in a top-level `"model"` field.
    pub fn load(path: &Path, format: ModelFormat) -> Result<Self, ExportError> {
        let load_error = |message: String| ExportError::Load { path: path.to_path_buf(), message };

        let kind = match format {
            ModelFormat::Onnx => {
                if !path.is_file() {
                    return Err(load_error("file not found".to_string()));
                }
                ModelKind::Single
            }
            ModelFormat::CompilerJson => {
                let content = fs::read_to_string(path).map_err(|e| load_error(e.to_string()))?;
                let json: serde_json::Value = serde_json::from_str(&content).map_err(|e| load_error(e.to_string()))?;
                match json.get("model").and_then(|m| m.as_str()) {
                    Some("Ensemble") => ModelKind::Composite,
                    Some(_) => ModelKind::Single,
                    None => return Err(load_error("missing \"model\" field".to_string())),
                }
            }
        };

        Ok(ExportableModel { path: path.to_path_buf(), format, kind })
    }

    /// Builds the compiler request for one experiment cell.
    pub fn compile_request(
        &self,
        out_path: &Path,
        implementation: &Implementation,
        optimizer: &OptimizerSpec,
    ) -> CompileRequest {
        let active = |p: &OptimizerPipeline| if p.is_noop() { None } else { Some(p.clone()) };

        let (backend, ensemble_pipeline) = match self.kind {
            ModelKind::Composite => (Some("cpp".to_string()), active(&optimizer.ensemble)),
            ModelKind::Single => {
                if !optimizer.ensemble.is_noop() {
                    warn!(
                        "Ignoring ensemble optimizers {} for single model {}",
                        optimizer.ensemble,
                        self.path.display()
                    );
                }
                (None, None)
            }
        };

        CompileRequest {
            model: self.path.clone(),
            kind: self.kind,
            out_path: out_path.to_path_buf(),
            out_name: OUT_NAME.to_string(),
            backend,
            implementation: implementation.tag(),
            implementation_args: implementation.args.clone(),
            base_pipeline: active(&optimizer.base),
            ensemble_pipeline,
        }
    }
}

/// Everything the model compiler needs to emit one native source tree.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileRequest {
    pub model: PathBuf,
    pub kind: ModelKind,
    pub out_path: PathBuf,
    pub out_name: String,
    /// Ensemble-level backend; `None` for single models.
    pub backend: Option<String>,
    /// Member-level (or single model) backend tag.
    pub implementation: String,
    pub implementation_args: BTreeMap<String, ConfigValue>,
    pub base_pipeline: Option<OptimizerPipeline>,
    pub ensemble_pipeline: Option<OptimizerPipeline>,
}

/// The external engine that optimizes a model and generates native code.
pub trait ModelCompiler: Send + Sync {
    fn compile(&self, request: &CompileRequest) -> Result<(), ExportError>;
}

/// Drives a model compiler command line tool.
///
/// Invocation: `<program> <base args> --model <path> --out_path <dir>
/// --out_name model --implementation_type <tag> --implementation_args <json>`
/// plus `--base_implementation_type` for ensembles and
/// `--optimize/--optimize_args` (and `--ensemble_optimize/...`) when a
/// pipeline is active. Pass names and their arguments are both JSON lists
/// of equal length.
pub struct CommandCompiler {
    program: PathBuf,
    base_args: Vec<String>,
    runner: Arc<dyn ProcessRunner>,
    timeout: Option<Duration>,
}

impl CommandCompiler {
    pub fn new(program: PathBuf, base_args: Vec<String>, runner: Arc<dyn ProcessRunner>, timeout: Option<Duration>) -> Self {
        CommandCompiler { program, base_args, runner, timeout }
    }

    pub fn command(&self, request: &CompileRequest) -> CommandSpec {
        let mut cmd = CommandSpec::new(&self.program)
            .args(self.base_args.iter().cloned())
            .arg("--model")
            .arg(request.model.to_string_lossy())
            .arg("--out_path")
            .arg(request.out_path.to_string_lossy())
            .arg("--out_name")
            .arg(request.out_name.as_str());

        cmd = match &request.backend {
            Some(backend) => cmd
                .arg("--implementation_type")
                .arg(backend.as_str())
                .arg("--base_implementation_type")
                .arg(request.implementation.as_str()),
            None => cmd.arg("--implementation_type").arg(request.implementation.as_str()),
        };
        cmd = cmd.arg("--implementation_args").arg(to_json(&request.implementation_args));

        if let Some(pipeline) = &request.ensemble_pipeline {
            let (names, args) = pass_lists(pipeline);
            cmd = cmd.arg("--ensemble_optimize").arg(names).arg("--ensemble_optimize_args").arg(args);
        }
        if let Some(pipeline) = &request.base_pipeline {
            let (names, args) = pass_lists(pipeline);
            cmd = cmd.arg("--optimize").arg(names).arg("--optimize_args").arg(args);
        }
        cmd
    }
}

/// JSON lists of the named passes and their arguments, index aligned.
fn pass_lists(pipeline: &OptimizerPipeline) -> (String, String) {
    let (names, args): (Vec<&str>, Vec<&ConfigValue>) = pipeline.passes().into_iter().unzip();
    (to_json(&names), to_json(&args))
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

impl ModelCompiler for CommandCompiler {
    fn compile(&self, request: &CompileRequest) -> Result<(), ExportError> {
        let output = self.runner.run(&self.command(request), self.timeout)?;
        if output.timed_out {
            return Err(ExportError::Timeout);
        }
        if !output.success() {
            return Err(ExportError::Compiler { status: output.code, stderr: output.stderr });
        }
        Ok(())
    }
}
