use crate::benchmark::{BuildRunner, PerformanceRecord};
use crate::compiler::descriptor::{Implementation, OptimizerSpec};
use crate::dataset::{write_test_csv, DatasetProvider};
use crate::error::{ExperimentError, ExportError, MeasureError};
use crate::exporter::Exporter;
use crate::fingerprint::{ConfigValue, Fingerprint};
use crate::model::{PreparedModel, ReferenceModel};
use log::{error, info};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

pub const TEST_FILE: &str = "testing.csv";

/// Stage of a cell at which it failed.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Export,
    Build,
    Run,
    Parse,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Export => "export",
            Phase::Build => "build",
            Phase::Run => "run",
            Phase::Parse => "parse",
        };
        write!(f, "{}", name)
    }
}

impl From<&MeasureError> for Phase {
    fn from(error: &MeasureError) -> Self {
        match error {
            MeasureError::Build { .. } | MeasureError::BuildTimeout => Phase::Build,
            MeasureError::Parse { .. } => Phase::Parse,
            MeasureError::Run { .. } | MeasureError::RunTimeout | MeasureError::Io(_) => Phase::Run,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CellOutcome {
    Measured(PerformanceRecord),
    Failed { phase: Phase, message: String },
}

/// One row of the final report.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CellReport {
    pub dataset_name: String,
    pub model_name: String,
    pub implementation: String,
    pub implementation_args: BTreeMap<String, ConfigValue>,
    pub optimizer: Vec<Option<String>>,
    pub optimizer_args: Vec<ConfigValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ensemble_optimizer: Vec<Option<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ensemble_optimizer_args: Vec<ConfigValue>,
    pub reference_accuracy: Option<f64>,
    pub directory: PathBuf,
    pub outcome: CellOutcome,
}

impl CellReport {
    pub fn record(&self) -> Option<&PerformanceRecord> {
        match &self.outcome {
            CellOutcome::Measured(record) => Some(record),
            CellOutcome::Failed { .. } => None,
        }
    }

    pub fn failed_phase(&self) -> Option<Phase> {
        match &self.outcome {
            CellOutcome::Measured(_) => None,
            CellOutcome::Failed { phase, .. } => Some(*phase),
        }
    }
}

/// What to benchmark: one dataset, one reference model, and the
/// implementation x optimizer matrix.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ExperimentPlan {
    pub dataset: String,
    pub split: f64,
    pub implementations: Vec<Implementation>,
    pub optimizers: Vec<OptimizerSpec>,
    pub output_root: PathBuf,
    pub model_name: String,
    pub n_repeat: usize,
}

/// One (implementation, optimizer) pair with its own output directory.
#[derive(Debug, Clone)]
pub struct Cell<'a> {
    pub implementation: &'a Implementation,
    pub optimizer: &'a OptimizerSpec,
    pub directory: PathBuf,
}

impl ExperimentPlan {
    fn validate(&self) -> Result<(), ExperimentError> {
        if self.model_name.is_empty() || self.model_name.contains(['/', '\\']) {
            return Err(ExperimentError::InvalidPlan(format!("invalid model name '{}'", self.model_name)));
        }
        if self.n_repeat == 0 {
            return Err(ExperimentError::InvalidPlan("n_repeat must be greater than 0".to_string()));
        }
        Ok(())
    }

    /// Expands the cartesian product in implementation-major order.
    ///
    /// Every cell gets `<model>_<impl fingerprint>_<opt fingerprint>`. Two
    /// cells mapping to the same directory abort the plan.
    pub fn cells(&self) -> Result<Vec<Cell<'_>>, ExperimentError> {
        let mut seen: FxHashMap<String, String> = FxHashMap::default();
        let mut cells = Vec::with_capacity(self.implementations.len() * self.optimizers.len());

        for implementation in &self.implementations {
            for optimizer in &self.optimizers {
                let name = format!("{}_{}_{}", self.model_name, implementation.fingerprint(), optimizer.fingerprint());
                let description = format!("({} / {})", implementation, optimizer);

                if let Some(first) = seen.insert(name.clone(), description.clone()) {
                    return Err(ExperimentError::CellCollision { directory: name, first, second: description });
                }

                cells.push(Cell {
                    implementation,
                    optimizer,
                    directory: self.output_root.join(name),
                });
            }
        }

        Ok(cells)
    }
}

/// Shared, read-only inputs of every cell.
struct CellContext<'a> {
    plan: &'a ExperimentPlan,
    dataset_name: &'a str,
    model: &'a PreparedModel,
    test_csv: &'a Path,
}

/// The top-level driver.
pub struct Experiment {
    provider: DatasetProvider,
    exporter: Exporter,
    build_runner: BuildRunner,
    workers: usize,
}

impl Experiment {
    pub fn new(provider: DatasetProvider, exporter: Exporter, build_runner: BuildRunner) -> Self {
        let workers = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Experiment { provider, exporter, build_runner, workers }
    }

    /// Number of cells compiled and measured at the same time.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Runs the full matrix. Dataset and model failures abort the run;
    /// a failing cell is reported and the remaining cells still run.
    pub fn run(&self, model: ReferenceModel, plan: &ExperimentPlan) -> Result<Vec<CellReport>, ExperimentError> {
        plan.validate()?;
        let cells = plan.cells()?;

        info!("Loading {}", plan.dataset);
        let dataset = self.provider.resolve(&plan.dataset, plan.split)?;

        let prepared = model.prepare(&dataset, &plan.output_root, &plan.model_name)?;

        info!("Storing test data");
        let test_csv = plan.output_root.join(TEST_FILE);
        write_test_csv(&test_csv, &dataset.test_features, &dataset.test_labels)?;

        let context = CellContext {
            plan,
            dataset_name: &dataset.dataset_name,
            model: &prepared,
            test_csv: &test_csv,
        };

        let pool = rayon::ThreadPoolBuilder::new().num_threads(self.workers).build()?;
        let reports = pool.install(|| cells.par_iter().map(|cell| self.run_cell(&context, cell)).collect());

        Ok(reports)
    }

    fn run_cell(&self, context: &CellContext<'_>, cell: &Cell<'_>) -> CellReport {
        let outcome = match self.measure_cell(context, cell) {
            Ok(record) => {
                info!(
                    "{} with {}: accuracy {:.3}, latency {:.4} ms, size {} bytes",
                    cell.implementation, cell.optimizer, record.accuracy, record.latency_ms, record.size_bytes
                );
                CellOutcome::Measured(record)
            }
            Err((phase, message)) => {
                error!(
                    "Cell {} with {} failed during {}: {}",
                    cell.implementation, cell.optimizer, phase, message
                );
                CellOutcome::Failed { phase, message }
            }
        };

        CellReport {
            dataset_name: context.dataset_name.to_string(),
            model_name: context.plan.model_name.clone(),
            implementation: cell.implementation.variant.clone(),
            implementation_args: cell.implementation.args.clone(),
            optimizer: cell.optimizer.base.names.clone(),
            optimizer_args: cell.optimizer.base.args.clone(),
            ensemble_optimizer: cell.optimizer.ensemble.names.clone(),
            ensemble_optimizer_args: cell.optimizer.ensemble.args.clone(),
            reference_accuracy: context.model.accuracy,
            directory: cell.directory.clone(),
            outcome,
        }
    }

    fn measure_cell(&self, context: &CellContext<'_>, cell: &Cell<'_>) -> Result<PerformanceRecord, (Phase, String)> {
        self.exporter
            .export(
                &context.model.stored,
                &cell.directory,
                &context.plan.model_name,
                cell.implementation,
                cell.optimizer,
                context.test_csv,
            )
            .map_err(|e: ExportError| (Phase::Export, e.to_string()))?;

        self.build_runner
            .build_and_measure(
                &cell.directory,
                &context.plan.model_name,
                context.test_csv,
                context.model.stored.n_classes,
                context.plan.n_repeat,
            )
            .map_err(|e| (Phase::from(&e), e.to_string()))
    }
}
