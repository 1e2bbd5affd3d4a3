use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use crate::schema::{AttributeType, DEFAULT_GEOMETRY_ATTRIBUTE, GeometryKind};

/// Raw mapping definition as read from disk (before compilation).
#[derive(Debug, Deserialize, Serialize, Default)]
pub struct MappingConfig {
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

impl MappingConfig {
    /// Parse a mapping file; the format follows the extension (yaml, json, toml).
    pub fn load(path: &Path) -> Result<Self, ::config::ConfigError> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path))
            .build()?;
        settings.try_deserialize()
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RuleConfig {
    pub name: String,
    #[serde(default)]
    pub geometry: GeometrySetting,
    #[serde(default)]
    pub filter: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub exclude: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub fields: Vec<FieldConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(untagged)]
pub enum GeometrySetting {
    Kind(GeometryKind),
    Named {
        #[serde(default = "default_geometry_name")]
        name: String,
        #[serde(rename = "type", default)]
        kind: GeometryKind,
    },
}

impl Default for GeometrySetting {
    fn default() -> Self {
        GeometrySetting::Kind(GeometryKind::default())
    }
}

impl GeometrySetting {
    pub fn name(&self) -> &str {
        match self {
            GeometrySetting::Kind(_) => DEFAULT_GEOMETRY_ATTRIBUTE,
            GeometrySetting::Named { name, .. } => name,
        }
    }

    pub fn kind(&self) -> GeometryKind {
        match self {
            GeometrySetting::Kind(kind) => *kind,
            GeometrySetting::Named { kind, .. } => *kind,
        }
    }
}

fn default_geometry_name() -> String {
    DEFAULT_GEOMETRY_ATTRIBUTE.to_string()
}

#[derive(Debug, Deserialize, Serialize)]
pub struct FieldConfig {
    pub name: String,
    /// `tag:<key>`, `meta:<key>` or a bare tag key; defaults to the field name.
    #[serde(default)]
    pub source: Option<String>,
    #[serde(rename = "type", default = "default_field_type")]
    pub attr_type: AttributeType,
}

fn default_field_type() -> AttributeType {
    AttributeType::String
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSource {
    Tag(String),
    Meta(String),
}

impl FromStr for FieldSource {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        let source = if let Some(key) = value.strip_prefix("meta:") {
            FieldSource::Meta(key.to_string())
        } else if let Some(key) = value.strip_prefix("tag:") {
            FieldSource::Tag(key.to_string())
        } else {
            FieldSource::Tag(value.to_string())
        };
        match &source {
            FieldSource::Tag(key) | FieldSource::Meta(key) if key.is_empty() => {
                Err(format!("empty field source: {value}"))
            }
            _ => Ok(source),
        }
    }
}

impl FieldConfig {
    pub fn field_source(&self) -> Result<FieldSource, String> {
        self.source.as_deref().unwrap_or(&self.name).parse()
    }
}

/// A tag condition: the tag must be present and, when `values` is non-empty,
/// its value must match one of the (glob) patterns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagMatch {
    pub tag: String,
    pub values: Vec<String>,
}

impl TagMatch {
    pub fn from_table(table: &BTreeMap<String, Vec<String>>) -> Vec<TagMatch> {
        table
            .iter()
            .map(|(tag, values)| TagMatch {
                tag: tag.clone(),
                values: values.clone(),
            })
            .collect()
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum NodeCacheMode {
    /// Hash map held in memory.
    #[default]
    Memory,
    /// Sorted temp file, memory-mapped; requires nodes sorted by id.
    Sparse,
}

impl FromStr for NodeCacheMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "memory" => Ok(NodeCacheMode::Memory),
            "sparse" => Ok(NodeCacheMode::Sparse),
            _ => Err(format!("invalid node_cache_mode: {value}")),
        }
    }
}

/// What the orchestrator does after a rule fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Stop at the first failed rule.
    #[default]
    Abort,
    /// Record the failure and keep exporting the remaining rules.
    Continue,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExportOptions {
    pub overwrite: bool,
    pub policy: FailurePolicy,
}
