use codegen_benchmark_rs::benchmark::BuildRunner;
use codegen_benchmark_rs::benchmark_utils::*;
use codegen_benchmark_rs::compiler::CommandCompiler;
use codegen_benchmark_rs::config::ExperimentConfig;
use codegen_benchmark_rs::dataset::fetch::HttpFetcher;
use codegen_benchmark_rs::dataset::{CacheDir, DatasetProvider};
use codegen_benchmark_rs::experiment::Experiment;
use codegen_benchmark_rs::exporter::{Exporter, Scaffold};
use codegen_benchmark_rs::model::ReferenceModel;
use codegen_benchmark_rs::process::{ProcessRunner, SystemRunner};
use std::env;
use std::path::Path;
use std::sync::Arc;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Get the command-line arguments
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <experiment.json>", args[0]);
        eprintln!("  <experiment.json>  - Experiment description (dataset, model, implementations, optimizers)");
        std::process::exit(1);
    }

    let config_path = Path::new(&args[1]);
    if !config_path.is_file() {
        eprintln!("Error: {} is not a valid file.", config_path.display());
        std::process::exit(1);
    }

    let config = ExperimentConfig::load(config_path).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });

    if let Some(core) = config.core_id {
        if let Err(e) = set_affinity(core) {
            eprintln!("Error: Failed to pin to core {}: {}", core, e);
            std::process::exit(1);
        }
    }

    let fetcher = HttpFetcher::new().unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });

    let runner: Arc<dyn ProcessRunner> = Arc::new(SystemRunner);
    let provider = DatasetProvider::new(CacheDir::resolve(config.cache_dir.as_deref()), Box::new(fetcher));
    let compiler = CommandCompiler::new(
        config.compiler.program.clone(),
        config.compiler.args.clone(),
        runner.clone(),
        config.timeout(),
    );
    let exporter = Exporter::new(Arc::new(compiler), Scaffold::in_dir(&config.scaffold_dir));
    let build_runner = BuildRunner::new(runner, config.timeout(), config.timeout());

    let mut experiment = Experiment::new(provider, exporter, build_runner);
    if let Some(workers) = config.workers {
        experiment = experiment.with_workers(workers);
    }

    let model = ReferenceModel::Pretrained(config.model.clone());
    let reports = experiment.run(model, &config.plan()).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });

    if let Err(e) = append_cell_reports(&reports, &config.results_file) {
        eprintln!("Error: Failed to write results to {}: {}", config.results_file.display(), e);
    }

    print_cell_reports(&reports);

    let failed = reports.iter().filter(|r| r.failed_phase().is_some()).count();
    if failed > 0 {
        eprintln!("{} of {} cells failed.", failed, reports.len());
        std::process::exit(2);
    }
}
