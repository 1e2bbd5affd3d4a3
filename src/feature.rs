use geo_types::Geometry;
use std::collections::HashMap;

use crate::metadata::FeatureMetadata;

/// A loosely typed element read from the feature repository.
#[derive(Clone, Debug)]
pub struct SourceFeature {
    pub id: i64,
    pub geometry: Geometry<f64>,
    pub tags: HashMap<String, String>,
    pub metadata: Option<FeatureMetadata>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AttributeValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
}

impl AttributeValue {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            AttributeValue::String(val) => serde_json::Value::String(val.clone()),
            AttributeValue::Integer(val) => serde_json::Value::from(*val),
            AttributeValue::Float(val) => serde_json::Value::from(*val),
            AttributeValue::Boolean(val) => serde_json::Value::Bool(*val),
        }
    }
}

/// A typed record produced by a rule transform.
///
/// Attributes missing from `values` are null.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputFeature {
    pub id: i64,
    pub geometry: Geometry<f64>,
    pub values: HashMap<String, AttributeValue>,
}

impl OutputFeature {
    pub fn new(id: i64, geometry: Geometry<f64>) -> Self {
        Self {
            id,
            geometry,
            values: HashMap::new(),
        }
    }

    pub fn with_value(mut self, name: impl Into<String>, value: AttributeValue) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn value(&self, name: &str) -> Option<&AttributeValue> {
        self.values.get(name)
    }
}
