pub mod benchmark;
pub mod benchmark_utils;
pub mod compiler;
pub mod config;
pub mod dataset;
pub mod error;
pub mod experiment;
pub mod exporter;
pub mod fingerprint;
pub mod model;
pub mod process;
