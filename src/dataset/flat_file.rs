use super::Matrix;
use crate::error::DatasetError;
use std::path::Path;

/// A comma separated table whose last column is the target.
#[derive(Debug)]
pub struct FlatTable {
    pub features: Matrix,
    pub targets: Vec<String>,
}

/// Parses a headerless (or single-header) CSV file. The first row is treated
/// as a header only when one of its feature fields is not numeric.
pub fn parse_flat_csv(content: &str, path: &Path) -> Result<FlatTable, DatasetError> {
    let format_error = |message: String| DatasetError::Format { path: path.to_path_buf(), message };

    let mut data = Vec::new();
    let mut targets = Vec::new();
    let mut n_columns: Option<usize> = None;
    let mut first_row = true;

    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let (target, feature_fields) = match fields.split_last() {
            Some((target, rest)) if !rest.is_empty() => (target, rest),
            _ => return Err(format_error(format!("line {}: expected at least 2 columns", line_no + 1))),
        };
        let parsed: Result<Vec<f64>, _> = feature_fields.iter().map(|f| f.parse::<f64>()).collect();

        let is_first = first_row;
        first_row = false;
        let row = match parsed {
            Ok(row) => row,
            Err(_) if is_first => continue, // header
            Err(e) => return Err(format_error(format!("line {}: {}", line_no + 1, e))),
        };

        match n_columns {
            Some(n) if n != row.len() => {
                return Err(format_error(format!(
                    "line {}: expected {} feature columns, found {}",
                    line_no + 1,
                    n,
                    row.len()
                )));
            }
            _ => n_columns = Some(row.len()),
        }

        data.extend_from_slice(&row);
        targets.push(target.to_string());
    }

    let cols = n_columns.ok_or_else(|| format_error("no data rows".to_string()))?;
    Ok(FlatTable {
        features: Matrix::new(targets.len(), cols, data),
        targets,
    })
}

/// Encodes targets into {0, 1}: `positive` maps to 0 and everything else to 1.
pub fn binary_labels(targets: &[String], positive: &str) -> Vec<u32> {
    targets.iter().map(|t| if t == positive { 0 } else { 1 }).collect()
}
