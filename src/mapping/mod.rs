//! Mapping definitions: ordered rules, each pairing an output schema with a
//! transform from source features to typed output features.
//!
//! A [`Mapping`] is loaded once from a declarative file and is immutable
//! afterwards. Rules can also be built directly from any closure with
//! [`MappingRule::new`].

mod rules;

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use crate::config::MappingConfig;
use crate::feature::{OutputFeature, SourceFeature};
use crate::schema::OutputSchema;

pub use rules::compile_rule;

#[derive(Debug, thiserror::Error)]
pub enum MappingLoadError {
    #[error("no mapping file specified; pass --mapping or set OSM_EXPORT_MAPPING")]
    Unspecified,

    #[error("could not read mapping file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: ::config::ConfigError,
    },

    #[error("invalid rule {index} ('{rule}'): {message}")]
    InvalidRule {
        index: usize,
        rule: String,
        message: String,
    },

    /// Rule names are compared ignoring ASCII case.
    #[error("rule name '{0}' is used by more than one rule")]
    DuplicateRule(String),
}

/// Raised by a transform for a feature it cannot map.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{0}")]
pub struct TransformError(pub String);

pub type TransformFn =
    dyn Fn(&SourceFeature) -> Result<Option<OutputFeature>, TransformError> + Send + Sync;

pub struct MappingRule {
    schema: OutputSchema,
    transform: Box<TransformFn>,
}

impl MappingRule {
    pub fn new<F>(schema: OutputSchema, transform: F) -> Self
    where
        F: Fn(&SourceFeature) -> Result<Option<OutputFeature>, TransformError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            schema,
            transform: Box::new(transform),
        }
    }

    pub fn schema(&self) -> &OutputSchema {
        &self.schema
    }

    /// `Ok(None)` excludes the feature from this rule's output.
    pub fn apply(&self, feature: &SourceFeature) -> Result<Option<OutputFeature>, TransformError> {
        (self.transform)(feature)
    }
}

impl fmt::Debug for MappingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappingRule")
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct Mapping {
    rules: Vec<MappingRule>,
}

impl Mapping {
    pub fn new(rules: Vec<MappingRule>) -> Self {
        Self { rules }
    }

    pub fn from_file(path: &Path) -> Result<Self, MappingLoadError> {
        let config = MappingConfig::load(path).map_err(|source| MappingLoadError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::compile(&config)
    }

    pub fn compile(config: &MappingConfig) -> Result<Self, MappingLoadError> {
        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(config.rules.len());

        for (i, rule) in config.rules.iter().enumerate() {
            let compiled = compile_rule(rule).map_err(|message| MappingLoadError::InvalidRule {
                index: i + 1,
                rule: rule.name.clone(),
                message,
            })?;
            if !seen.insert(rule.name.to_ascii_lowercase()) {
                return Err(MappingLoadError::DuplicateRule(rule.name.clone()));
            }
            rules.push(compiled);
        }

        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[MappingRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }
}
