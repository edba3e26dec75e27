use super::Matrix;
use crate::error::DatasetError;
use std::collections::BTreeSet;
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
enum AttributeType {
    Numeric,
    Nominal(Vec<String>),
}

#[derive(Debug, Clone)]
struct Attribute {
    name: String,
    kind: AttributeType,
}

/// Raw ARFF records: declared attributes and one `Option<String>` per cell
/// (`None` for `?`).
struct ArffRecords {
    attributes: Vec<Attribute>,
    rows: Vec<Vec<Option<String>>>,
}

/// Splits on commas outside of single or double quotes and unquotes tokens.
fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in line.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), c) => current.push(c),
            (None, '\'') | (None, '"') => quote = Some(c),
            (None, ',') => {
                fields.push(current.trim().to_string());
                current.clear();
            }
            (None, c) => current.push(c),
        }
    }
    fields.push(current.trim().to_string());
    fields
}

/// Splits `@attribute <name> <type>` into name and type, honouring quotes.
fn parse_attribute(rest: &str) -> Option<(String, String)> {
    let rest = rest.trim();
    let (name, remainder) = match rest.chars().next()? {
        q @ ('\'' | '"') => {
            let end = rest[1..].find(q)? + 1;
            (rest[1..end].to_string(), &rest[end + 1..])
        }
        _ => {
            let end = rest.find(char::is_whitespace)?;
            (rest[..end].to_string(), &rest[end..])
        }
    };
    Some((name, remainder.trim().to_string()))
}

fn parse_records(content: &str, path: &Path) -> Result<ArffRecords, DatasetError> {
    let format_error = |message: String| DatasetError::Format { path: path.to_path_buf(), message };

    let mut attributes = Vec::new();
    let mut rows = Vec::new();
    let mut in_data = false;

    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('%') {
            continue;
        }

        if !in_data {
            let lower = line.to_ascii_lowercase();
            if lower.starts_with("@relation") {
                continue;
            } else if lower.starts_with("@attribute") {
                let (name, kind) = parse_attribute(&line["@attribute".len()..])
                    .ok_or_else(|| format_error(format!("line {}: malformed attribute", line_no + 1)))?;
                let kind = if kind.starts_with('{') && kind.ends_with('}') {
                    AttributeType::Nominal(split_fields(&kind[1..kind.len() - 1]))
                } else {
                    match kind.to_ascii_lowercase().as_str() {
                        "numeric" | "real" | "integer" => AttributeType::Numeric,
                        other => {
                            return Err(format_error(format!(
                                "line {}: unsupported attribute type '{}'",
                                line_no + 1,
                                other
                            )))
                        }
                    }
                };
                attributes.push(Attribute { name, kind });
            } else if lower.starts_with("@data") {
                in_data = true;
            } else {
                return Err(format_error(format!("line {}: unexpected header line", line_no + 1)));
            }
            continue;
        }

        if line.starts_with('{') {
            return Err(format_error(format!("line {}: sparse ARFF rows are not supported", line_no + 1)));
        }

        let fields = split_fields(line);
        if fields.len() != attributes.len() {
            return Err(format_error(format!(
                "line {}: expected {} values, found {}",
                line_no + 1,
                attributes.len(),
                fields.len()
            )));
        }
        rows.push(fields.into_iter().map(|f| if f == "?" { None } else { Some(f) }).collect());
    }

    if !in_data {
        return Err(format_error("missing @data section".to_string()));
    }

    Ok(ArffRecords { attributes, rows })
}

/// Loads an ARFF file into a dense feature matrix and encoded labels.
///
/// The `label` attribute is encoded by the sorted order of its distinct
/// values. Remaining numeric attributes come first, followed by one-hot
/// columns for every nominal attribute (declared values that occur in the
/// data, in declaration order). Any column that still contains a missing
/// value is dropped.
pub fn load_arff(content: &str, path: &Path, label: &str) -> Result<(Matrix, Vec<u32>), DatasetError> {
    let format_error = |message: String| DatasetError::Format { path: path.to_path_buf(), message };
    let records = parse_records(content, path)?;

    let label_idx = records
        .attributes
        .iter()
        .position(|a| a.name == label)
        .ok_or_else(|| format_error(format!("label attribute '{}' not found", label)))?;

    let mut label_values = Vec::with_capacity(records.rows.len());
    for (i, row) in records.rows.iter().enumerate() {
        let value = row[label_idx]
            .clone()
            .ok_or_else(|| format_error(format!("row {}: missing label", i + 1)))?;
        label_values.push(value);
    }
    let labels = encode_labels(&label_values);

    let mut columns: Vec<Vec<f64>> = Vec::new();
    let mut dummies: Vec<Vec<f64>> = Vec::new();

    for (idx, attribute) in records.attributes.iter().enumerate() {
        if idx == label_idx {
            continue;
        }
        match &attribute.kind {
            AttributeType::Numeric => {
                let mut column = Vec::with_capacity(records.rows.len());
                for (i, row) in records.rows.iter().enumerate() {
                    let value = match &row[idx] {
                        Some(v) => v.parse::<f64>().map_err(|e| {
                            format_error(format!("row {}, attribute '{}': {}", i + 1, attribute.name, e))
                        })?,
                        None => f64::NAN,
                    };
                    column.push(value);
                }
                columns.push(column);
            }
            AttributeType::Nominal(declared) => {
                let observed: BTreeSet<&str> = records.rows.iter().filter_map(|r| r[idx].as_deref()).collect();
                if let Some(unknown) = observed.iter().find(|v| !declared.iter().any(|d| d.as_str() == **v)) {
                    return Err(format_error(format!(
                        "value '{}' is not declared for attribute '{}'",
                        unknown, attribute.name
                    )));
                }
                for value in declared.iter().map(String::as_str).filter(|v| observed.contains(v)) {
                    dummies.push(
                        records
                            .rows
                            .iter()
                            .map(|r| if r[idx].as_deref() == Some(value) { 1.0 } else { 0.0 })
                            .collect(),
                    );
                }
            }
        }
    }

    columns.extend(dummies);
    columns.retain(|c| c.iter().all(|v| !v.is_nan()));

    let rows = records.rows.len();
    let cols = columns.len();
    let mut data = Vec::with_capacity(rows * cols);
    for r in 0..rows {
        data.extend(columns.iter().map(|c| c[r]));
    }

    Ok((Matrix::new(rows, cols, data), labels))
}

/// Maps each value to the index of its sorted distinct value.
pub fn encode_labels(values: &[String]) -> Vec<u32> {
    let classes: BTreeSet<&str> = values.iter().map(String::as_str).collect();
    let index: rustc_hash::FxHashMap<&str, u32> =
        classes.into_iter().enumerate().map(|(i, c)| (c, i as u32)).collect();
    values.iter().map(|v| index[v.as_str()]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "% comment
@relation 'eeg'
@attribute AF3 numeric
@attribute 'color' {red, blue}
@attribute F7 real
@attribute eyeDetection {0,1}
@data
4329.23,red,?,1
4324.62,blue,4009.23,0
4327.69,red,4006.67,1
";

    #[test]
    fn test_one_hot_and_missing_column_drop() {
        let (features, labels) = load_arff(SAMPLE, Path::new("eeg.arff"), "eyeDetection").unwrap();
        // AF3 kept, F7 dropped for its missing value, color expanded to red/blue
        assert_eq!(features.cols(), 3);
        assert_eq!(features.rows(), 3);
        assert_eq!(features.row(0), &[4329.23, 1.0, 0.0]);
        assert_eq!(features.row(1), &[4324.62, 0.0, 1.0]);
        assert_eq!(labels, vec![1, 0, 1]);
    }

    #[test]
    fn test_missing_label_attribute() {
        let err = load_arff(SAMPLE, Path::new("eeg.arff"), "Class").unwrap_err();
        assert!(err.to_string().contains("'Class' not found"));
    }

    #[test]
    fn test_encode_labels_sorted() {
        let values: Vec<String> = ["b", "a", "c", "a"].iter().map(|s| s.to_string()).collect();
        assert_eq!(encode_labels(&values), vec![1, 0, 2, 0]);
    }

    #[test]
    fn test_split_fields_respects_quotes() {
        assert_eq!(split_fields("'a,b', c ,\"d\""), vec!["a,b", "c", "d"]);
    }

    #[test]
    fn test_string_attributes_are_rejected() {
        let content = "@relation x\n@attribute s string\n@data\nfoo\n";
        assert!(load_arff(content, Path::new("x.arff"), "s").is_err());
    }
}
