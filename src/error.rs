//! Error types for every stage of an experiment run.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures while resolving a dataset. All of them abort the whole run.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Unsupported dataset '{requested}'. Currently supported are: {}", supported.join(", "))]
    Unsupported {
        requested: String,
        supported: Vec<&'static str>,
    },

    #[error("Failed to download {url}: {message}")]
    Acquisition { url: String, message: String },

    #[error("Malformed dataset file {}: {message}", path.display())]
    Format { path: PathBuf, message: String },

    #[error("Invalid split ratio {0}. Must be in (0, 1)")]
    InvalidSplit(f64),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Failures of the reference model collaborator.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Model fit failed: {0}")]
    Fit(String),

    #[error("Model prediction failed: {0}")]
    Predict(String),

    #[error("Failed to store model to {}: {message}", path.display())]
    Store { path: PathBuf, message: String },

    #[error("Unknown model format for {}", .0.display())]
    UnknownFormat(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Failures while turning a stored model into a native source tree.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Failed to load model {}: {message}", path.display())]
    Load { path: PathBuf, message: String },

    #[error("Model compiler exited with {}: {stderr}", describe_status(*status))]
    Compiler { status: Option<i32>, stderr: String },

    #[error("Model compiler timed out")]
    Timeout,

    #[error("Failed to stage {}: {message}", path.display())]
    Staging { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Failures of the compile-run-parse protocol.
#[derive(Debug, Error)]
pub enum MeasureError {
    #[error("Build failed with {}: {stderr}", describe_status(*status))]
    Build { status: Option<i32>, stderr: String },

    #[error("Build timed out")]
    BuildTimeout,

    #[error("Benchmark binary exited with {}: {stderr}", describe_status(*status))]
    Run { status: Option<i32>, stderr: String },

    #[error("Benchmark binary timed out")]
    RunTimeout,

    #[error("Malformed benchmark output line '{line}': {message}")]
    Parse { line: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Run-level failures. Cell-level failures never surface here.
#[derive(Debug, Error)]
pub enum ExperimentError {
    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("Invalid experiment: {0}")]
    InvalidPlan(String),

    #[error("Cell directory '{directory}' is shared by {first} and {second}")]
    CellCollision {
        directory: String,
        first: String,
        second: String,
    },

    #[error("Failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error("Failed to read configuration {}: {message}", path.display())]
    Config { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

fn describe_status(status: Option<i32>) -> String {
    match status {
        Some(code) => format!("status {}", code),
        None => "no exit status (killed by signal)".to_string(),
    }
}
