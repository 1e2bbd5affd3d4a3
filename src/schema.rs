//! Output record schemas and the point / non-point source classification.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the implicit integer attribute carrying the source element id.
pub const ID_ATTRIBUTE: &str = "id";

/// Default name of the geometry attribute when a rule does not name one.
pub const DEFAULT_GEOMETRY_ATTRIBUTE: &str = "geom";

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GeometryKind {
    #[serde(alias = "POINT", alias = "Point")]
    Point,
    #[serde(alias = "line", alias = "LINESTRING", alias = "LineString")]
    Linestring,
    #[serde(alias = "POLYGON", alias = "Polygon")]
    Polygon,
    #[serde(alias = "MULTIPOINT", alias = "MultiPoint")]
    Multipoint,
    #[serde(alias = "MULTILINESTRING", alias = "MultiLineString")]
    Multilinestring,
    #[serde(alias = "MULTIPOLYGON", alias = "MultiPolygon")]
    Multipolygon,
    /// No concrete kind declared; source geometries pass through unchanged.
    #[default]
    #[serde(alias = "any", alias = "GEOMETRY", alias = "Geometry")]
    Geometry,
}

impl GeometryKind {
    /// Geometry type name as used by GeoJSON and GeoParquet metadata.
    pub fn type_name(&self) -> Option<&'static str> {
        match self {
            GeometryKind::Point => Some("Point"),
            GeometryKind::Linestring => Some("LineString"),
            GeometryKind::Polygon => Some("Polygon"),
            GeometryKind::Multipoint => Some("MultiPoint"),
            GeometryKind::Multilinestring => Some("MultiLineString"),
            GeometryKind::Multipolygon => Some("MultiPolygon"),
            GeometryKind::Geometry => None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    #[serde(alias = "text", alias = "varchar")]
    String,
    #[serde(alias = "int", alias = "long")]
    Integer,
    #[serde(alias = "double", alias = "real")]
    Float,
    #[serde(alias = "bool")]
    Boolean,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeSpec {
    pub name: String,
    pub attr_type: AttributeType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeometryAttribute {
    pub name: String,
    pub kind: GeometryKind,
}

/// Typed record layout of one destination table.
///
/// The table name is the schema name; the geometry attribute comes first,
/// followed by `id` and then the declared attributes in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSchema {
    pub name: String,
    pub geometry: GeometryAttribute,
    pub attributes: Vec<AttributeSpec>,
}

impl OutputSchema {
    pub fn new(name: impl Into<String>, geometry: GeometryAttribute) -> Self {
        Self {
            name: name.into(),
            geometry,
            attributes: vec![AttributeSpec {
                name: ID_ATTRIBUTE.to_string(),
                attr_type: AttributeType::Integer,
            }],
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, attr_type: AttributeType) -> Self {
        self.attributes.push(AttributeSpec {
            name: name.into(),
            attr_type,
        });
        self
    }

    pub fn table_name(&self) -> &str {
        &self.name
    }
}

/// Logical source partition a rule reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OriginCollection {
    Node,
    Way,
}

impl OriginCollection {
    pub fn path(&self) -> &'static str {
        match self {
            OriginCollection::Node => "node",
            OriginCollection::Way => "way",
        }
    }
}

impl fmt::Display for OriginCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Point schemas draw from nodes; every other geometry kind draws from ways.
pub fn origin_collection(schema: &OutputSchema) -> OriginCollection {
    match schema.geometry.kind {
        GeometryKind::Point => OriginCollection::Node,
        _ => OriginCollection::Way,
    }
}
