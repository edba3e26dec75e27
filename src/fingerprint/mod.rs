use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A node of an arbitrary nested configuration tree.
///
/// Mappings are kept in a `BTreeMap`, so key insertion order never reaches
/// the fingerprint. Sequences keep their order: optimizer pipelines and
/// their argument lists are ordered, and two lists that differ only in
/// order must not share a cache key.
///
/// Integers and floats stay apart so `8` is handed on as `8`, not `8.0`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ConfigValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Sequence(Vec<ConfigValue>),
    Mapping(BTreeMap<String, ConfigValue>),
}

impl ConfigValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ConfigValue::Null)
    }

    /// Appends the canonical byte encoding of this node to `out`.
    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            ConfigValue::Null => out.push(b'z'),
            ConfigValue::Bool(b) => {
                out.push(b'b');
                out.push(*b as u8);
            }
            ConfigValue::Int(n) => {
                out.push(b'i');
                out.extend_from_slice(&n.to_le_bytes());
            }
            ConfigValue::Float(n) => {
                out.push(b'f');
                let canonical = if n.is_nan() {
                    f64::NAN.to_bits()
                } else if *n == 0.0 {
                    0.0f64.to_bits()
                } else {
                    n.to_bits()
                };
                out.extend_from_slice(&canonical.to_le_bytes());
            }
            ConfigValue::String(s) => {
                out.push(b's');
                encode_len(s.len(), out);
                out.extend_from_slice(s.as_bytes());
            }
            ConfigValue::Sequence(items) => {
                out.push(b'l');
                encode_len(items.len(), out);
                for item in items {
                    item.encode(out);
                }
            }
            ConfigValue::Mapping(entries) => {
                out.push(b'm');
                encode_len(entries.len(), out);
                for (key, value) in entries {
                    encode_len(key.len(), out);
                    out.extend_from_slice(key.as_bytes());
                    value.encode(out);
                }
            }
        }
    }

    /// Canonical encoding used both for hashing and for detecting two
    /// different configurations that land on the same fingerprint.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }
}

fn encode_len(len: usize, out: &mut Vec<u8>) {
    out.extend_from_slice(&(len as u64).to_le_bytes());
}

impl From<&str> for ConfigValue {
    fn from(s: &str) -> Self {
        ConfigValue::String(s.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(s: String) -> Self {
        ConfigValue::String(s)
    }
}

impl From<f64> for ConfigValue {
    fn from(n: f64) -> Self {
        ConfigValue::Float(n)
    }
}

impl From<i64> for ConfigValue {
    fn from(n: i64) -> Self {
        ConfigValue::Int(n)
    }
}

impl From<bool> for ConfigValue {
    fn from(b: bool) -> Self {
        ConfigValue::Bool(b)
    }
}

impl<T: Into<ConfigValue>> From<Vec<T>> for ConfigValue {
    fn from(items: Vec<T>) -> Self {
        ConfigValue::Sequence(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<ConfigValue>> From<Option<T>> for ConfigValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(ConfigValue::Null)
    }
}

/// Anything that can be described as a configuration tree.
pub trait Fingerprint {
    fn to_config(&self) -> ConfigValue;

    fn fingerprint(&self) -> String {
        fingerprint(&self.to_config())
    }
}

impl Fingerprint for ConfigValue {
    fn to_config(&self) -> ConfigValue {
        self.clone()
    }
}

/// Maps a configuration tree to a decimal string usable as a directory name.
///
/// BLAKE3 over the canonical encoding, truncated to the first 8 bytes.
pub fn fingerprint(config: &ConfigValue) -> String {
    let digest = blake3::hash(&config.canonical_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(head).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> ConfigValue {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_key_order_does_not_matter() {
        let a = parse(r#"{"opt":["a","b"], "args":[1,2]}"#);
        let b = parse(r#"{"args":[1,2], "opt":["a","b"]}"#);
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_sequence_order_matters() {
        let a = parse(r#"[["quantize", "merge"], [{"bits": 8}, {}]]"#);
        let b = parse(r#"[["merge", "quantize"], [{}, {"bits": 8}]]"#);
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_fingerprint_is_decimal_and_stable() {
        let config = parse(r#"["ifelse", {"label_type": "int"}]"#);
        let fp = fingerprint(&config);
        assert!(!fp.is_empty());
        assert!(fp.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(fp, fingerprint(&config.clone()));
        assert!(fp.parse::<u64>().is_ok());
    }

    #[test]
    fn test_nesting_is_not_flattened() {
        let flat = parse(r#"["a", "b"]"#);
        let nested = parse(r#"[["a", "b"]]"#);
        assert_ne!(fingerprint(&flat), fingerprint(&nested));

        let s = parse(r#""ab""#);
        let split = parse(r#"["a", "b"]"#);
        assert_ne!(fingerprint(&s), fingerprint(&split));
    }

    #[test]
    fn test_scalar_kinds_are_distinct() {
        assert_ne!(fingerprint(&ConfigValue::from(1i64)), fingerprint(&ConfigValue::from("1")));
        assert_ne!(fingerprint(&ConfigValue::from(true)), fingerprint(&ConfigValue::from(1i64)));
        assert_ne!(fingerprint(&ConfigValue::Null), fingerprint(&ConfigValue::Sequence(vec![])));
    }

    #[test]
    fn test_signed_zero_is_folded() {
        assert_eq!(
            fingerprint(&ConfigValue::Float(0.0)),
            fingerprint(&ConfigValue::Float(-0.0))
        );
    }

    #[test]
    fn test_integers_survive_a_json_round_trip() {
        let config = parse(r#"[{"bits": 8}, {"k": 2.5}, -3]"#);
        assert_eq!(
            config,
            ConfigValue::Sequence(vec![
                ConfigValue::Mapping([("bits".to_string(), ConfigValue::Int(8))].into_iter().collect()),
                ConfigValue::Mapping([("k".to_string(), ConfigValue::Float(2.5))].into_iter().collect()),
                ConfigValue::Int(-3),
            ])
        );
        assert_eq!(serde_json::to_string(&config).unwrap(), r#"[{"bits":8},{"k":2.5},-3]"#);
        assert_eq!(parse("8.0"), ConfigValue::Float(8.0));
        assert_ne!(fingerprint(&parse("8")), fingerprint(&parse("8.0")));
    }

    #[test]
    fn test_json_null_parses_to_null() {
        let config = parse(r#"[null]"#);
        assert_eq!(config, ConfigValue::Sequence(vec![ConfigValue::Null]));
    }
}
