use crate::error::DatasetError;
use log::{debug, info};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Retrieves the raw bytes behind a URL.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, DatasetError>;
}

/// Plain HTTP(S) downloads through a blocking client.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, DatasetError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent("codegen_benchmark_rs/0.1")
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|e| DatasetError::Acquisition {
                url: String::new(),
                message: format!("Failed to create HTTP client: {e}"),
            })?;

        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, DatasetError> {
        let acquisition = |message: String| DatasetError::Acquisition { url: url.to_string(), message };

        let response = self.client.get(url).send().map_err(|e| acquisition(e.to_string()))?;
        if !response.status().is_success() {
            return Err(acquisition(format!("HTTP status {}", response.status())));
        }

        let bytes = response.bytes().map_err(|e| acquisition(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// Downloads `url` into `dir/filename` unless that file already exists.
///
/// The payload lands in a temporary file next to the target and is renamed
/// into place only once fully written, so an interrupted download never
/// leaves a file that a later call would mistake for a cache hit.
pub fn download(fetcher: &dyn Fetcher, url: &str, filename: &str, dir: &Path) -> Result<PathBuf, DatasetError> {
    fs::create_dir_all(dir)?;
    let path = dir.join(filename);

    if path.exists() {
        debug!("Using cached {}", path.display());
        return Ok(path);
    }

    info!("{} not found. Downloading.", path.display());
    let bytes = fetcher.fetch(url)?;
    write_atomic(&path, &bytes)?;

    Ok(path)
}

/// Writes `bytes` to `path` through a sibling temporary file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), DatasetError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| DatasetError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFetcher {
        calls: AtomicUsize,
        fail: bool,
    }

    impl Fetcher for CountingFetcher {
        fn fetch(&self, url: &str) -> Result<Vec<u8>, DatasetError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(DatasetError::Acquisition {
                    url: url.to_string(),
                    message: "connection reset".to_string(),
                });
            }
            Ok(b"payload".to_vec())
        }
    }

    #[test]
    fn test_download_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = CountingFetcher { calls: AtomicUsize::new(0), fail: false };

        let first = download(&fetcher, "http://host/file", "file.csv", dir.path()).unwrap();
        let second = download(&fetcher, "http://host/file", "file.csv", dir.path()).unwrap();

        assert_eq!(first, second);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fs::read(&first).unwrap(), b"payload");
    }

    #[test]
    fn test_failed_download_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = CountingFetcher { calls: AtomicUsize::new(0), fail: true };

        let err = download(&fetcher, "http://host/file", "file.csv", dir.path()).unwrap_err();
        assert!(matches!(err, DatasetError::Acquisition { .. }));
        assert!(!dir.path().join("file.csv").exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
