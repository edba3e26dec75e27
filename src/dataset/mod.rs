pub mod arff;
pub mod fetch;
pub mod flat_file;
pub mod idx;

use crate::error::DatasetError;
use crate::fingerprint::{fingerprint, ConfigValue};
use fetch::{download, write_atomic, Fetcher};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Seed of the train/test shuffle.
pub const SPLIT_SEED: u64 = 42;

pub const SUPPORTED_DATASETS: [&str; 4] = ["magic", "mnist", "fashion", "eeg"];

const MAGIC_URL: &str = "https://archive.ics.uci.edu/ml/machine-learning-databases/magic/magic04.data";
const EEG_URL: &str = "https://archive.ics.uci.edu/ml/machine-learning-databases/00264/EEG%20Eye%20State.arff";
const MNIST_BASE_URL: &str = "https://ossci-datasets.s3.amazonaws.com/mnist/";
const FASHION_BASE_URL: &str = "http://fashion-mnist.s3-website.eu-central-1.amazonaws.com/";
const IDX_FILES: [&str; 4] = [
    "train-images-idx3-ubyte.gz",
    "train-labels-idx1-ubyte.gz",
    "t10k-images-idx3-ubyte.gz",
    "t10k-labels-idx1-ubyte.gz",
];

/// Row-major matrix of `f64` features.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    pub fn new(rows: usize, cols: usize, data: Vec<f64>) -> Self {
        assert_eq!(rows * cols, data.len(), "matrix data does not match its shape");
        Matrix { rows, cols, data }
    }

    pub fn from_rows(rows: &[Vec<f64>]) -> Self {
        let cols = rows.first().map(|r| r.len()).unwrap_or(0);
        let data: Vec<f64> = rows.iter().flat_map(|r| r.iter().copied()).collect();
        Matrix::new(rows.len(), cols, data)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[f64]> {
        (0..self.rows).map(move |i| self.row(i))
    }

    /// Copies the given rows, in the given order, into a new matrix.
    pub fn select_rows(&self, indices: &[usize]) -> Matrix {
        let mut data = Vec::with_capacity(indices.len() * self.cols);
        for &i in indices {
            data.extend_from_slice(self.row(i));
        }
        Matrix::new(indices.len(), self.cols, data)
    }
}

/// A train/test split of one benchmark dataset.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Dataset {
    pub dataset_name: String,
    pub train_features: Matrix,
    pub train_labels: Vec<u32>,
    pub test_features: Matrix,
    pub test_labels: Vec<u32>,
}

impl Dataset {
    /// Loads a previously stored split.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DatasetError> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        let mut dataset: Dataset = bincode::deserialize(&bytes).map_err(|e| DatasetError::Format {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        dataset.dataset_name.shrink_to_fit();
        dataset.validate(path)?;

        Ok(dataset)
    }

    /// Stores the split atomically under `path`.
    pub fn store<P: AsRef<Path>>(&self, path: P) -> Result<(), DatasetError> {
        let path = path.as_ref();
        let bytes = bincode::serialize(self).map_err(|e| DatasetError::Format {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        write_atomic(path, &bytes)
    }

    pub fn n_features(&self) -> usize {
        self.train_features.cols()
    }

    /// Number of classes, assuming labels are contiguous from 0.
    pub fn n_classes(&self) -> usize {
        self.train_labels
            .iter()
            .chain(self.test_labels.iter())
            .max()
            .map(|&m| m as usize + 1)
            .unwrap_or(0)
    }

    fn validate(&self, path: &Path) -> Result<(), DatasetError> {
        let problem = if self.train_features.cols() != self.test_features.cols() {
            Some(format!(
                "train has {} features but test has {}",
                self.train_features.cols(),
                self.test_features.cols()
            ))
        } else if self.train_features.rows() != self.train_labels.len() {
            Some("train features and labels differ in length".to_string())
        } else if self.test_features.rows() != self.test_labels.len() {
            Some("test features and labels differ in length".to_string())
        } else {
            None
        };

        match problem {
            Some(message) => Err(DatasetError::Format { path: path.to_path_buf(), message }),
            None => Ok(()),
        }
    }
}

/// Directory that holds downloaded datasets.
///
/// Resolution order: an explicit path, then the `TMPDIR` environment
/// variable, then the platform temp directory; the latter two get a `data`
/// subdirectory.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheDir(PathBuf);

impl CacheDir {
    pub fn resolve(explicit: Option<&Path>) -> Self {
        Self::resolve_with(explicit, std::env::var_os("TMPDIR"))
    }

    fn resolve_with(explicit: Option<&Path>, tmpdir: Option<OsString>) -> Self {
        match explicit {
            Some(path) => CacheDir(path.to_path_buf()),
            None => {
                let root = tmpdir
                    .filter(|t| !t.is_empty())
                    .map(PathBuf::from)
                    .unwrap_or_else(std::env::temp_dir);
                CacheDir(root.join("data"))
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

/// Resolves dataset names to cached, parsed train/test splits.
pub struct DatasetProvider {
    cache: CacheDir,
    fetcher: Box<dyn Fetcher>,
}

impl DatasetProvider {
    pub fn new(cache: CacheDir, fetcher: Box<dyn Fetcher>) -> Self {
        DatasetProvider { cache, fetcher }
    }

    pub fn cache_dir(&self) -> &Path {
        self.cache.path()
    }

    /// Returns the split of `name`, downloading the raw files if absent.
    ///
    /// `split` is the test fraction. It is ignored for datasets that ship
    /// with their own train/test partition.
    pub fn resolve(&self, name: &str, split: f64) -> Result<Dataset, DatasetError> {
        if !SUPPORTED_DATASETS.contains(&name) {
            return Err(DatasetError::Unsupported {
                requested: name.to_string(),
                supported: SUPPORTED_DATASETS.to_vec(),
            });
        }

        let cache_key = ConfigValue::Sequence(vec![name.into(), split.into(), (SPLIT_SEED as i64).into()]);
        let cached_split = self.cache.path().join(format!("{}_{}.bin", name, fingerprint(&cache_key)));

        if cached_split.exists() {
            match Dataset::load(&cached_split) {
                Ok(dataset) => {
                    debug!("Using cached split {}", cached_split.display());
                    return Ok(dataset);
                }
                Err(e) => warn!("Ignoring unreadable split cache {}: {}", cached_split.display(), e),
            }
        }

        let dataset = self.load_raw(name, split)?;
        dataset.store(&cached_split)?;
        Ok(dataset)
    }

    fn load_raw(&self, name: &str, split: f64) -> Result<Dataset, DatasetError> {
        let cache = self.cache.path();
        let fetcher = self.fetcher.as_ref();

        match name {
            "magic" => {
                let path = download(fetcher, MAGIC_URL, "magic.csv", cache)?;
                let content = fs::read_to_string(&path)?;
                let table = flat_file::parse_flat_csv(&content, &path)?;
                let labels = flat_file::binary_labels(&table.targets, "g");
                train_test_split(name, &table.features, &labels, split, SPLIT_SEED)
            }
            "mnist" | "fashion" => {
                let base_url = if name == "mnist" { MNIST_BASE_URL } else { FASHION_BASE_URL };
                let dir = cache.join(name);
                for file in IDX_FILES {
                    download(fetcher, &format!("{}{}", base_url, file), file, &dir)?;
                }

                let (train_features, train_labels) = idx::load_idx_pair(&dir, "train")?;
                let (test_features, test_labels) = idx::load_idx_pair(&dir, "t10k")?;
                let dataset = Dataset {
                    dataset_name: name.to_string(),
                    train_features,
                    train_labels,
                    test_features,
                    test_labels,
                };
                dataset.validate(&dir)?;
                Ok(dataset)
            }
            "eeg" => {
                let path = download(fetcher, EEG_URL, "eeg.arff", cache)?;
                let content = fs::read_to_string(&path)?;
                let (features, labels) = arff::load_arff(&content, &path, "eyeDetection")?;
                train_test_split(name, &features, &labels, split, SPLIT_SEED)
            }
            _ => Err(DatasetError::Unsupported {
                requested: name.to_string(),
                supported: SUPPORTED_DATASETS.to_vec(),
            }),
        }
    }
}

/// Shuffles row indices with a seeded RNG and assigns the first
/// `ceil(n * test_ratio)` of them to the test part.
pub fn train_test_split(
    dataset_name: &str,
    features: &Matrix,
    labels: &[u32],
    test_ratio: f64,
    seed: u64,
) -> Result<Dataset, DatasetError> {
    if !(test_ratio > 0.0 && test_ratio < 1.0) {
        return Err(DatasetError::InvalidSplit(test_ratio));
    }
    assert_eq!(features.rows(), labels.len(), "features and labels differ in length");

    let n = labels.len();
    // Guard against products like 30.000000000000004
    let n_test = ((n as f64 * test_ratio) - 1e-9).ceil().max(0.0) as usize;
    if n_test == 0 || n_test >= n {
        return Err(DatasetError::InvalidSplit(test_ratio));
    }

    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);
    let (test_idx, train_idx) = indices.split_at(n_test);

    Ok(Dataset {
        dataset_name: dataset_name.to_string(),
        train_features: features.select_rows(train_idx),
        train_labels: train_idx.iter().map(|&i| labels[i]).collect(),
        test_features: features.select_rows(test_idx),
        test_labels: test_idx.iter().map(|&i| labels[i]).collect(),
    })
}

/// Writes a feature matrix and labels as CSV with header `f0,...,f{d-1},label`.
pub fn write_test_csv(path: &Path, features: &Matrix, labels: &[u32]) -> Result<(), DatasetError> {
    let mut writer = BufWriter::new(fs::File::create(path)?);

    let header: Vec<String> = (0..features.cols()).map(|i| format!("f{}", i)).collect();
    writeln!(writer, "{},label", header.join(","))?;

    for (row, label) in features.iter_rows().zip(labels) {
        for value in row {
            write!(writer, "{},", value)?;
        }
        writeln!(writer, "{}", label)?;
    }
    writer.flush()?;

    info!("Stored {} test rows to {}", labels.len(), path.display());
    Ok(())
}
