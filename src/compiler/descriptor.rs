use crate::fingerprint::{ConfigValue, Fingerprint};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A code generation variant plus its keyword arguments.
///
/// Written as `["ifelse", {"label_type": "int"}]` in experiment files.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(from = "(String, BTreeMap<String, ConfigValue>)", into = "(String, BTreeMap<String, ConfigValue>)")]
pub struct Implementation {
    pub variant: String,
    pub args: BTreeMap<String, ConfigValue>,
}

impl Implementation {
    pub fn new<S: Into<String>>(variant: S) -> Self {
        Implementation { variant: variant.into(), args: BTreeMap::new() }
    }

    pub fn with_arg<K: Into<String>, V: Into<ConfigValue>>(mut self, key: K, value: V) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    /// Dotted backend tag understood by the model compiler, e.g. `cpp.ifelse`.
    pub fn tag(&self) -> String {
        format!("cpp.{}", self.variant)
    }
}

impl From<(String, BTreeMap<String, ConfigValue>)> for Implementation {
    fn from((variant, args): (String, BTreeMap<String, ConfigValue>)) -> Self {
        Implementation { variant, args }
    }
}

impl From<Implementation> for (String, BTreeMap<String, ConfigValue>) {
    fn from(implementation: Implementation) -> Self {
        (implementation.variant, implementation.args)
    }
}

impl Fingerprint for Implementation {
    fn to_config(&self) -> ConfigValue {
        ConfigValue::Sequence(vec![
            ConfigValue::String(self.variant.clone()),
            ConfigValue::Mapping(self.args.clone()),
        ])
    }
}

impl fmt::Display for Implementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut described = self.args.clone();
        described.insert("implementation_type".to_string(), ConfigValue::String(self.variant.clone()));
        write!(f, "{}", serde_json::to_string(&described).unwrap_or_default())
    }
}

/// An ordered list of optimizer passes with one argument entry per pass.
///
/// Written as `[["quantize", "merge"], [{"bits": 8}, {}]]`. A `null` first
/// name (`[[null], [null]]`) or an empty list means "do not optimize".
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(from = "(Vec<Option<String>>, Vec<ConfigValue>)", into = "(Vec<Option<String>>, Vec<ConfigValue>)")]
pub struct OptimizerPipeline {
    pub names: Vec<Option<String>>,
    pub args: Vec<ConfigValue>,
}

impl OptimizerPipeline {
    pub fn new<S: Into<String>>(passes: Vec<(S, ConfigValue)>) -> Self {
        let (names, args) = passes.into_iter().map(|(n, a)| (Some(n.into()), a)).unzip();
        OptimizerPipeline { names, args }
    }

    /// The sentinel pipeline that skips optimization.
    pub fn noop() -> Self {
        OptimizerPipeline { names: vec![None], args: vec![ConfigValue::Null] }
    }

    pub fn is_noop(&self) -> bool {
        self.names.first().map_or(true, Option::is_none)
    }

    /// Named passes paired with their arguments; missing arguments are `Null`.
    pub fn passes(&self) -> Vec<(&str, &ConfigValue)> {
        const NULL: &ConfigValue = &ConfigValue::Null;
        self.names
            .iter()
            .enumerate()
            .filter_map(|(i, name)| name.as_deref().map(|n| (n, self.args.get(i).unwrap_or(NULL))))
            .collect()
    }
}

impl From<(Vec<Option<String>>, Vec<ConfigValue>)> for OptimizerPipeline {
    fn from((names, args): (Vec<Option<String>>, Vec<ConfigValue>)) -> Self {
        OptimizerPipeline { names, args }
    }
}

impl From<OptimizerPipeline> for (Vec<Option<String>>, Vec<ConfigValue>) {
    fn from(pipeline: OptimizerPipeline) -> Self {
        (pipeline.names, pipeline.args)
    }
}

impl Fingerprint for OptimizerPipeline {
    fn to_config(&self) -> ConfigValue {
        let names = self.names.iter().map(|n| ConfigValue::from(n.clone())).collect();
        ConfigValue::Sequence(vec![ConfigValue::Sequence(names), ConfigValue::Sequence(self.args.clone())])
    }
}

impl fmt::Display for OptimizerPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let described: BTreeMap<&str, &ConfigValue> = self.passes().into_iter().collect();
        write!(f, "{}", serde_json::to_string(&described).unwrap_or_default())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OptimizerSpecRepr {
    Base(OptimizerPipeline),
    Levels {
        #[serde(default)]
        base: OptimizerPipeline,
        #[serde(default)]
        ensemble: OptimizerPipeline,
    },
}

/// The optimizer side of an experiment cell.
///
/// Single estimators only use `base`. Ensembles additionally run the
/// `ensemble` pipeline over the composite before member-level passes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(from = "OptimizerSpecRepr")]
pub struct OptimizerSpec {
    pub base: OptimizerPipeline,
    pub ensemble: OptimizerPipeline,
}

impl From<OptimizerSpecRepr> for OptimizerSpec {
    fn from(repr: OptimizerSpecRepr) -> Self {
        match repr {
            OptimizerSpecRepr::Base(base) => OptimizerSpec { base, ensemble: OptimizerPipeline::default() },
            OptimizerSpecRepr::Levels { base, ensemble } => OptimizerSpec { base, ensemble },
        }
    }
}

impl From<OptimizerPipeline> for OptimizerSpec {
    fn from(base: OptimizerPipeline) -> Self {
        OptimizerSpec { base, ensemble: OptimizerPipeline::default() }
    }
}

impl Fingerprint for OptimizerSpec {
    /// A spec without ensemble passes fingerprints exactly like its base
    /// pipeline, so single-level plans keep their directory names.
    fn to_config(&self) -> ConfigValue {
        if self.ensemble.names.is_empty() {
            return self.base.to_config();
        }
        let mut levels = BTreeMap::new();
        levels.insert("base".to_string(), self.base.to_config());
        levels.insert("ensemble".to_string(), self.ensemble.to_config());
        ConfigValue::Mapping(levels)
    }
}

impl fmt::Display for OptimizerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ensemble.is_noop() {
            write!(f, "{}", self.base)
        } else {
            write!(f, "{} and {}", self.ensemble, self.base)
        }
    }
}
