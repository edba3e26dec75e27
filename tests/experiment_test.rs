use codegen_benchmark_rs::benchmark::{BuildRunner, BINARY_NAME};
use codegen_benchmark_rs::compiler::descriptor::{Implementation, OptimizerPipeline, OptimizerSpec};
use codegen_benchmark_rs::compiler::{CompileRequest, ModelCompiler};
use codegen_benchmark_rs::dataset::fetch::Fetcher;
use codegen_benchmark_rs::dataset::{CacheDir, DatasetProvider, Matrix};
use codegen_benchmark_rs::error::{DatasetError, ExperimentError, ExportError, ModelError};
use codegen_benchmark_rs::experiment::{Experiment, ExperimentPlan, Phase, TEST_FILE};
use codegen_benchmark_rs::exporter::{Exporter, Scaffold, BUILD_DESCRIPTOR_FILE, DRIVER_FILE};
use codegen_benchmark_rs::fingerprint::ConfigValue;
use codegen_benchmark_rs::model::{Estimator, ModelFormat, PretrainedModel, ReferenceModel, StoredModel};
use codegen_benchmark_rs::process::{CommandSpec, ProcessOutput, ProcessRunner};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 100 MAGIC-like rows: ten features and a `g`/`h` class column.
fn magic_csv() -> String {
    (0..100)
        .map(|i| {
            let features: Vec<String> = (0..10).map(|j| format!("{}.5", i * 10 + j)).collect();
            let class = if i % 3 == 0 { "h" } else { "g" };
            format!("{},{}\n", features.join(","), class)
        })
        .collect()
}

/// Serves the synthetic MAGIC file and counts requests.
struct MagicFetcher {
    calls: Arc<AtomicUsize>,
}

impl Fetcher for MagicFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, DatasetError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !url.contains("magic") {
            return Err(DatasetError::Acquisition { url: url.to_string(), message: "offline".to_string() });
        }
        Ok(magic_csv().into_bytes())
    }
}

fn magic_provider(cache: &Path) -> (DatasetProvider, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let fetcher = MagicFetcher { calls: calls.clone() };
    (DatasetProvider::new(CacheDir::resolve(Some(cache)), Box::new(fetcher)), calls)
}

/// Emits a header file so there is something generated in the cell.
struct StubCompiler;

impl ModelCompiler for StubCompiler {
    fn compile(&self, request: &CompileRequest) -> Result<(), ExportError> {
        fs::write(request.out_path.join(format!("{}.h", request.out_name)), "// generated")?;
        Ok(())
    }
}

/// Pretends to be cmake, make and the built benchmark binary.
///
/// The binary exits with status 1 when run from `failing_cell`.
struct FakeToolchain {
    failing_cell: Option<PathBuf>,
    runs: Mutex<Vec<CommandSpec>>,
}

impl ProcessRunner for FakeToolchain {
    fn run(&self, command: &CommandSpec, _: Option<Duration>) -> io::Result<ProcessOutput> {
        let name = command.program.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string();

        if name == "make" {
            let dir = command.cwd.clone().unwrap();
            fs::write(dir.join(BINARY_NAME), vec![0u8; 4096])?;
        }

        if name == BINARY_NAME {
            self.runs.lock().unwrap().push(command.clone());
            if command.program.parent() == self.failing_cell.as_deref() {
                return Ok(ProcessOutput { code: Some(1), stderr: "segfault".to_string(), ..Default::default() });
            }
            return Ok(ProcessOutput {
                code: Some(0),
                stdout: "Reading testing.csv\n85.0,85.0,0.0,0.125\n".to_string(),
                ..Default::default()
            });
        }

        Ok(ProcessOutput { code: Some(0), ..Default::default() })
    }
}

fn scaffold(root: &Path) -> Scaffold {
    let dir = root.join("scaffold");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(DRIVER_FILE), "int main() { return 0; }").unwrap();
    fs::write(dir.join(BUILD_DESCRIPTOR_FILE), "add_executable(testCode main.cpp)").unwrap();
    Scaffold::in_dir(dir)
}

fn plan(output_root: PathBuf) -> ExperimentPlan {
    ExperimentPlan {
        dataset: "magic".to_string(),
        split: 0.3,
        implementations: vec![
            Implementation::new("ifelse"),
            Implementation::new("native").with_arg("reorder_nodes", true),
        ],
        optimizers: vec![
            OptimizerPipeline::noop().into(),
            OptimizerPipeline::new(vec![("quantize", ConfigValue::Null)]).into(),
        ],
        output_root,
        model_name: "tree".to_string(),
        n_repeat: 3,
    }
}

#[test]
fn test_magic_split_sizes() {
    let dir = tempfile::tempdir().unwrap();
    let (provider, _) = magic_provider(dir.path());

    let dataset = provider.resolve("magic", 0.3).unwrap();
    assert_eq!(dataset.dataset_name, "magic");
    assert_eq!(dataset.train_features.rows(), 70);
    assert_eq!(dataset.test_features.rows(), 30);
    assert_eq!(dataset.n_features(), 10);
    assert!(dataset.train_labels.iter().chain(&dataset.test_labels).all(|&l| l <= 1));
    assert_eq!(dataset.n_classes(), 2);
}

#[test]
fn test_resolve_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let (provider, calls) = magic_provider(dir.path());

    let first = provider.resolve("magic", 0.3).unwrap();
    let second = provider.resolve("magic", 0.3).unwrap();
    assert_eq!(first, second);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // A fresh provider over the same cache does not download again
    let (again, calls) = magic_provider(dir.path());
    assert_eq!(again.resolve("magic", 0.3).unwrap(), first);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_unsupported_dataset() {
    let dir = tempfile::tempdir().unwrap();
    let (provider, calls) = magic_provider(dir.path());

    let err = provider.resolve("iris", 0.3).unwrap_err();
    assert!(matches!(err, DatasetError::Unsupported { .. }));
    assert!(err.to_string().contains("magic"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_failing_cell_does_not_stop_the_matrix() {
    let dir = tempfile::tempdir().unwrap();
    let output_root = dir.path().join("out");
    let plan = plan(output_root.clone());

    let model_path = dir.path().join("tree.json");
    fs::write(&model_path, r#"{"model": "DecisionTree"}"#).unwrap();

    let failing_cell = plan.cells().unwrap()[2].directory.clone();
    let toolchain = Arc::new(FakeToolchain { failing_cell: Some(failing_cell.clone()), runs: Mutex::new(Vec::new()) });

    let (provider, _) = magic_provider(&dir.path().join("cache"));
    let exporter = Exporter::new(Arc::new(StubCompiler), scaffold(dir.path()));
    let experiment = Experiment::new(provider, exporter, BuildRunner::new(toolchain.clone(), None, None)).with_workers(2);

    let model = ReferenceModel::Pretrained(PretrainedModel { path: model_path, n_classes: 2, accuracy: Some(85.0) });
    let reports = experiment.run(model, &plan).unwrap();

    assert_eq!(reports.len(), 4);
    let mut directories: Vec<&PathBuf> = reports.iter().map(|r| &r.directory).collect();
    directories.sort();
    directories.dedup();
    assert_eq!(directories.len(), 4);

    assert_eq!(reports[2].directory, failing_cell);
    assert_eq!(reports[2].failed_phase(), Some(Phase::Run));
    for (i, report) in reports.iter().enumerate().filter(|(i, _)| *i != 2) {
        let record = report.record().unwrap_or_else(|| panic!("cell {} failed", i));
        assert_eq!(record.accuracy, 85.0);
        assert_eq!(record.latency_ms, 0.125);
        assert_eq!(record.size_bytes, 4096);
        assert_eq!(report.reference_accuracy, Some(85.0));
        assert!(report.directory.join(DRIVER_FILE).exists());
    }

    assert!(output_root.join("tree.json").exists());
    let test_csv = fs::read_to_string(output_root.join(TEST_FILE)).unwrap();
    assert_eq!(test_csv.lines().count(), 31);
    assert!(test_csv.starts_with("f0,f1,"));

    let runs = toolchain.runs.lock().unwrap();
    assert_eq!(runs.len(), 4);
    assert!(runs.iter().all(|r| r.args[1] == "2" && r.args[2] == "3"));
}

/// Always predicts the most frequent training label.
#[derive(Default)]
struct MajorityEstimator {
    label: u32,
}

impl Estimator for MajorityEstimator {
    fn fit(&mut self, _: &Matrix, labels: &[u32]) -> Result<(), ModelError> {
        let ones = labels.iter().filter(|&&l| l == 1).count();
        self.label = if ones * 2 > labels.len() { 1 } else { 0 };
        Ok(())
    }

    fn predict(&self, features: &Matrix) -> Result<Vec<u32>, ModelError> {
        Ok(vec![self.label; features.rows()])
    }

    fn store(&self, dir: &Path, name: &str, accuracy: f64) -> Result<StoredModel, ModelError> {
        let path = dir.join(format!("{}.json", name));
        let json = format!(r#"{{"model": "Constant", "label": {}, "accuracy": {}}}"#, self.label, accuracy);
        fs::write(&path, json)?;
        Ok(StoredModel { path, n_classes: 2, format: ModelFormat::CompilerJson })
    }
}

#[test]
fn test_fitted_estimator_reference() {
    let dir = tempfile::tempdir().unwrap();
    let mut plan = plan(dir.path().join("out"));
    plan.implementations.truncate(1);
    plan.optimizers = vec![OptimizerSpec::default()];

    let cache = dir.path().join("cache");
    let toolchain = Arc::new(FakeToolchain { failing_cell: None, runs: Mutex::new(Vec::new()) });
    let (cells_provider, _) = magic_provider(&cache);
    let exporter = Exporter::new(Arc::new(StubCompiler), scaffold(dir.path()));
    let experiment = Experiment::new(cells_provider, exporter, BuildRunner::new(toolchain, None, None));

    let reports = experiment
        .run(ReferenceModel::Estimator(Box::new(MajorityEstimator::default())), &plan)
        .unwrap();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].record().is_some());
    assert!(plan.output_root.join("tree.json").exists());

    // Same split as the experiment saw, read back from the cache
    let (check, _) = magic_provider(&cache);
    let dataset = check.resolve("magic", 0.3).unwrap();
    let mut estimator = MajorityEstimator::default();
    estimator.fit(&dataset.train_features, &dataset.train_labels).unwrap();
    let hits = dataset.test_labels.iter().filter(|&&l| l == estimator.label).count();
    let expected = hits as f64 / dataset.test_labels.len() as f64 * 100.0;
    assert_eq!(reports[0].reference_accuracy, Some(expected));
}

#[test]
fn test_colliding_cells_abort_before_any_work() {
    let dir = tempfile::tempdir().unwrap();
    let mut plan = plan(dir.path().join("out"));
    plan.implementations = vec![Implementation::new("ifelse"), Implementation::new("ifelse")];

    let toolchain = Arc::new(FakeToolchain { failing_cell: None, runs: Mutex::new(Vec::new()) });
    let (provider, calls) = magic_provider(&dir.path().join("cache"));
    let exporter = Exporter::new(Arc::new(StubCompiler), scaffold(dir.path()));
    let experiment = Experiment::new(provider, exporter, BuildRunner::new(toolchain, None, None));

    let model = ReferenceModel::Pretrained(PretrainedModel {
        path: dir.path().join("missing.json"),
        n_classes: 2,
        accuracy: None,
    });
    let err = experiment.run(model, &plan).unwrap_err();
    assert!(matches!(err, ExperimentError::CellCollision { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
