use super::Matrix;
use crate::error::DatasetError;
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::Read;
use std::path::Path;

const UNSIGNED_BYTE: u8 = 0x08;

/// A decoded IDX file: its dimensions and the flat `u8` payload.
#[derive(Debug)]
struct IdxArray {
    dims: Vec<usize>,
    payload: Vec<u8>,
}

/// Reads a gzip compressed IDX file of unsigned bytes.
///
/// Layout: two zero bytes, a type byte, the number of dimensions, then one
/// big-endian `u32` per dimension followed by the flat payload.
fn read_idx_gz(path: &Path) -> Result<IdxArray, DatasetError> {
    let mut raw = Vec::new();
    GzDecoder::new(File::open(path)?).read_to_end(&mut raw)?;
    decode_idx(&raw, path)
}

fn decode_idx(raw: &[u8], path: &Path) -> Result<IdxArray, DatasetError> {
    let format_error = |message: String| DatasetError::Format { path: path.to_path_buf(), message };

    if raw.len() < 4 || raw[0] != 0 || raw[1] != 0 {
        return Err(format_error("missing IDX magic number".to_string()));
    }
    if raw[2] != UNSIGNED_BYTE {
        return Err(format_error(format!("unsupported IDX element type 0x{:02x}", raw[2])));
    }

    let n_dims = raw[3] as usize;
    let header_len = 4 + 4 * n_dims;
    if raw.len() < header_len {
        return Err(format_error("truncated IDX header".to_string()));
    }

    let dims: Vec<usize> = raw[4..header_len]
        .chunks_exact(4)
        .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]) as usize)
        .collect();

    let expected = checked_product(&dims).ok_or_else(|| format_error(format!("IDX shape {:?} overflows", dims)))?;
    let payload = &raw[header_len..];
    if payload.len() != expected {
        return Err(format_error(format!(
            "expected {} payload bytes for shape {:?}, found {}",
            expected,
            dims,
            payload.len()
        )));
    }

    Ok(IdxArray { dims, payload: payload.to_vec() })
}

fn checked_product(dims: &[usize]) -> Option<usize> {
    dims.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
}

/// Loads one `kind` ("train" or "t10k") of an MNIST-style quartet from `dir`.
pub fn load_idx_pair(dir: &Path, kind: &str) -> Result<(Matrix, Vec<u32>), DatasetError> {
    let images_path = dir.join(format!("{}-images-idx3-ubyte.gz", kind));
    let labels_path = dir.join(format!("{}-labels-idx1-ubyte.gz", kind));

    let images = read_idx_gz(&images_path)?;
    let labels = read_idx_gz(&labels_path)?;

    if images.dims.len() < 2 {
        return Err(DatasetError::Format {
            path: images_path,
            message: format!("expected at least 2 dimensions, found {:?}", images.dims),
        });
    }
    if labels.dims.len() != 1 || labels.dims[0] != images.dims[0] {
        return Err(DatasetError::Format {
            path: labels_path,
            message: format!("label shape {:?} does not match image shape {:?}", labels.dims, images.dims),
        });
    }

    let rows = images.dims[0];
    let cols = checked_product(&images.dims[1..]).ok_or_else(|| DatasetError::Format {
        path: images_path,
        message: format!("IDX shape {:?} overflows", images.dims),
    })?;
    let features = Matrix::new(rows, cols, images.payload.iter().map(|&p| p as f64).collect());
    let labels = labels.payload.iter().map(|&l| l as u32).collect();

    Ok((features, labels))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    pub(crate) fn encode_idx(dims: &[u32], payload: &[u8]) -> Vec<u8> {
        let mut raw = vec![0, 0, UNSIGNED_BYTE, dims.len() as u8];
        for d in dims {
            raw.extend_from_slice(&d.to_be_bytes());
        }
        raw.extend_from_slice(payload);

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_load_idx_pair() {
        let dir = tempfile::tempdir().unwrap();
        let pixels: Vec<u8> = (0..12).collect();
        std::fs::write(dir.path().join("train-images-idx3-ubyte.gz"), encode_idx(&[3, 2, 2], &pixels)).unwrap();
        std::fs::write(dir.path().join("train-labels-idx1-ubyte.gz"), encode_idx(&[3], &[7, 1, 9])).unwrap();

        let (features, labels) = load_idx_pair(dir.path(), "train").unwrap();
        assert_eq!(features.rows(), 3);
        assert_eq!(features.cols(), 4);
        assert_eq!(features.row(2), &[8.0, 9.0, 10.0, 11.0]);
        assert_eq!(labels, vec![7, 1, 9]);
    }

    #[test]
    fn test_truncated_payload_is_rejected() {
        let mut raw = vec![0, 0, UNSIGNED_BYTE, 1];
        raw.extend_from_slice(&5u32.to_be_bytes());
        raw.extend_from_slice(&[1, 2]);
        let err = decode_idx(&raw, Path::new("labels.gz")).unwrap_err();
        assert!(err.to_string().contains("expected 5 payload bytes"));
    }

    #[test]
    fn test_overflowing_shape_is_rejected() {
        let mut raw = vec![0, 0, UNSIGNED_BYTE, 3];
        for _ in 0..3 {
            raw.extend_from_slice(&u32::MAX.to_be_bytes());
        }
        raw.extend_from_slice(&[1, 2, 3]);
        let err = decode_idx(&raw, Path::new("images.gz")).unwrap_err();
        assert!(matches!(err, DatasetError::Format { .. }));
        assert!(err.to_string().contains("overflows"));
    }

    #[test]
    fn test_mismatched_counts_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("t10k-images-idx3-ubyte.gz"), encode_idx(&[2, 1, 1], &[0, 1])).unwrap();
        std::fs::write(dir.path().join("t10k-labels-idx1-ubyte.gz"), encode_idx(&[3], &[0, 1, 2])).unwrap();

        assert!(load_idx_pair(dir.path(), "t10k").is_err());
    }
}
