use crate::error::MeasureError;
use crate::process::{CommandSpec, ProcessRunner};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Executable produced by the staged build descriptor.
pub const BINARY_NAME: &str = "testCode";
/// Numeric type of the generated model's features.
pub const FEATURE_TYPE: &str = "double";

/// Measurements of one generated artifact.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PerformanceRecord {
    /// Accuracy reported by the native program, in percent.
    pub accuracy: f64,
    /// Difference to the reference model's accuracy, as reported by the native program.
    pub accuracy_delta: f64,
    pub latency_ms: f64,
    pub size_bytes: u64,
}

/// The metrics part of the driver's final output line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriverMetrics {
    pub accuracy: f64,
    pub accuracy_delta: f64,
    pub latency_ms: f64,
}

/// Parses the last non-empty line of the driver's stdout as
/// `accuracy,<reserved>,accuracy_delta,latency[,...]`.
///
/// Earlier lines are free-form diagnostics and are ignored.
pub fn parse_driver_output(stdout: &str) -> Result<DriverMetrics, MeasureError> {
    let line = stdout.lines().map(str::trim).filter(|l| !l.is_empty()).last().unwrap_or("");
    let parse_error = |message: String| MeasureError::Parse { line: line.to_string(), message };

    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() < 4 {
        return Err(parse_error(format!("expected at least 4 comma separated fields, found {}", fields.len())));
    }

    let number = |idx: usize, what: &str| {
        fields[idx]
            .parse::<f64>()
            .map_err(|e| parse_error(format!("{} '{}': {}", what, fields[idx], e)))
    };

    Ok(DriverMetrics {
        accuracy: number(0, "accuracy")?,
        accuracy_delta: number(2, "accuracy delta")?,
        latency_ms: number(3, "latency")?,
    })
}

/// Compiles a staged cell directory and measures the resulting binary.
pub struct BuildRunner {
    runner: Arc<dyn ProcessRunner>,
    build_timeout: Option<Duration>,
    run_timeout: Option<Duration>,
}

impl BuildRunner {
    pub fn new(runner: Arc<dyn ProcessRunner>, build_timeout: Option<Duration>, run_timeout: Option<Duration>) -> Self {
        BuildRunner { runner, build_timeout, run_timeout }
    }

    /// Configures and builds the project in `output_dir`, returning the binary path.
    pub fn build(&self, output_dir: &Path, model_name: &str) -> Result<PathBuf, MeasureError> {
        let configure = CommandSpec::new("cmake")
            .arg(".")
            .arg(format!("-DMODELNAME={}", model_name))
            .arg(format!("-DFEATURE_TYPE={}", FEATURE_TYPE))
            .current_dir(output_dir);
        let make = CommandSpec::new("make").current_dir(output_dir);

        for step in [configure, make] {
            let output = self
                .runner
                .run(&step, self.build_timeout)
                .map_err(|e| MeasureError::Build { status: None, stderr: format!("{}: {}", step, e) })?;
            if output.timed_out {
                return Err(MeasureError::BuildTimeout);
            }
            if !output.success() {
                return Err(MeasureError::Build { status: output.code, stderr: output.stderr });
            }
        }

        Ok(output_dir.join(BINARY_NAME))
    }

    /// Runs the built binary against the test CSV and reads back its metrics.
    pub fn measure(
        &self,
        binary: &Path,
        test_csv: &Path,
        n_classes: usize,
        n_repeat: usize,
    ) -> Result<PerformanceRecord, MeasureError> {
        let run = CommandSpec::new(binary)
            .arg(test_csv.to_string_lossy())
            .arg(n_classes.to_string())
            .arg(n_repeat.to_string());

        let output = self
            .runner
            .run(&run, self.run_timeout)
            .map_err(|e| MeasureError::Run { status: None, stderr: format!("{}: {}", run, e) })?;
        if output.timed_out {
            return Err(MeasureError::RunTimeout);
        }
        if !output.success() {
            return Err(MeasureError::Run { status: output.code, stderr: output.stderr });
        }
        debug!("{} printed: {}", binary.display(), output.stdout.trim());

        let metrics = parse_driver_output(&output.stdout)?;
        let size_bytes = fs::metadata(binary)?.len();

        Ok(PerformanceRecord {
            accuracy: metrics.accuracy,
            accuracy_delta: metrics.accuracy_delta,
            latency_ms: metrics.latency_ms,
            size_bytes,
        })
    }

    pub fn build_and_measure(
        &self,
        output_dir: &Path,
        model_name: &str,
        test_csv: &Path,
        n_classes: usize,
        n_repeat: usize,
    ) -> Result<PerformanceRecord, MeasureError> {
        let binary = self.build(output_dir, model_name)?;
        self.measure(&binary, test_csv, n_classes, n_repeat)
    }
}
