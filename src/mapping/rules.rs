//! Tag-based rules compiled from the mapping file.

use geo::algorithm::orient::{Direction, Orient};
use geo_types::{Geometry, LineString, MultiLineString, MultiPoint, MultiPolygon, Polygon};
use std::collections::{HashMap, HashSet};

use super::{MappingRule, TransformError};
use crate::config::{FieldSource, RuleConfig, TagMatch};
use crate::feature::{AttributeValue, OutputFeature, SourceFeature};
use crate::metadata::META_KEYS;
use crate::schema::{AttributeType, GeometryAttribute, GeometryKind, ID_ATTRIBUTE, OutputSchema};
use crate::utils::matches_tag;

#[derive(Debug, Clone)]
pub struct CompiledField {
    pub name: String,
    pub source: FieldSource,
    pub attr_type: AttributeType,
}

/// Filter, geometry coercion and attribute extraction for one rule.
#[derive(Debug, Clone)]
pub struct TagRule {
    pub filter: Vec<TagMatch>,
    pub exclude: Vec<TagMatch>,
    pub geometry: GeometryKind,
    pub fields: Vec<CompiledField>,
}

impl TagRule {
    /// Excluded tags always reject; an empty filter accepts everything else,
    /// otherwise any single matching filter entry is enough.
    pub fn matches(&self, tags: &HashMap<String, String>) -> bool {
        if self.exclude.iter().any(|m| matches_tag(m, tags)) {
            return false;
        }
        self.filter.is_empty() || self.filter.iter().any(|m| matches_tag(m, tags))
    }

    pub fn apply(&self, feature: &SourceFeature) -> Result<Option<OutputFeature>, TransformError> {
        if !self.matches(&feature.tags) {
            return Ok(None);
        }
        let Some(geometry) = coerce_geometry(self.geometry, &feature.geometry) else {
            tracing::debug!(
                "Feature {} has no {:?} geometry, skipping",
                feature.id,
                self.geometry
            );
            return Ok(None);
        };

        let mut output = OutputFeature::new(feature.id, geometry)
            .with_value(ID_ATTRIBUTE, AttributeValue::Integer(feature.id));

        for field in &self.fields {
            let raw = match &field.source {
                FieldSource::Tag(key) => feature.tags.get(key).cloned(),
                FieldSource::Meta(key) => feature.metadata.as_ref().and_then(|m| m.value(key)),
            };
            let Some(raw) = raw else {
                continue;
            };
            let value = convert_value(&raw, field.attr_type).ok_or_else(|| {
                TransformError(format!(
                    "feature {}: cannot convert value '{}' of field '{}' to {:?}",
                    feature.id, raw, field.name, field.attr_type
                ))
            })?;
            output.values.insert(field.name.clone(), value);
        }

        Ok(Some(output))
    }
}

pub fn convert_value(raw: &str, attr_type: AttributeType) -> Option<AttributeValue> {
    let trimmed = raw.trim();
    match attr_type {
        AttributeType::String => Some(AttributeValue::String(raw.to_string())),
        AttributeType::Integer => trimmed.parse().ok().map(AttributeValue::Integer),
        AttributeType::Float => trimmed
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(AttributeValue::Float),
        AttributeType::Boolean => match trimmed.to_ascii_lowercase().as_str() {
            "yes" | "true" | "1" => Some(AttributeValue::Boolean(true)),
            "no" | "false" | "0" => Some(AttributeValue::Boolean(false)),
            _ => None,
        },
    }
}

/// Shape a source geometry into the declared kind, or `None` when it cannot be.
pub fn coerce_geometry(kind: GeometryKind, geometry: &Geometry<f64>) -> Option<Geometry<f64>> {
    match (kind, geometry) {
        (GeometryKind::Geometry, geometry) => Some(geometry.clone()),
        (GeometryKind::Point, Geometry::Point(point)) => Some(Geometry::Point(*point)),
        (GeometryKind::Multipoint, Geometry::Point(point)) => {
            Some(Geometry::MultiPoint(MultiPoint::new(vec![*point])))
        }
        (GeometryKind::Linestring, Geometry::LineString(line)) => {
            Some(Geometry::LineString(line.clone()))
        }
        (GeometryKind::Multilinestring, Geometry::LineString(line)) => Some(
            Geometry::MultiLineString(MultiLineString::new(vec![line.clone()])),
        ),
        (GeometryKind::Polygon, Geometry::LineString(line)) => {
            ring_to_polygon(line).map(Geometry::Polygon)
        }
        (GeometryKind::Polygon, Geometry::Polygon(polygon)) => {
            Some(Geometry::Polygon(polygon.orient(Direction::Default)))
        }
        (GeometryKind::Multipolygon, Geometry::LineString(line)) => ring_to_polygon(line)
            .map(|polygon| Geometry::MultiPolygon(MultiPolygon::new(vec![polygon]))),
        (_, other) if geometry_kind_of(other) == Some(kind) => Some(other.clone()),
        _ => None,
    }
}

fn ring_to_polygon(line: &LineString<f64>) -> Option<Polygon<f64>> {
    if line.0.len() < 4 || !line.is_closed() {
        return None;
    }
    Some(Polygon::new(line.clone(), vec![]).orient(Direction::Default))
}

fn geometry_kind_of(geometry: &Geometry<f64>) -> Option<GeometryKind> {
    match geometry {
        Geometry::Point(_) => Some(GeometryKind::Point),
        Geometry::LineString(_) => Some(GeometryKind::Linestring),
        Geometry::Polygon(_) => Some(GeometryKind::Polygon),
        Geometry::MultiPoint(_) => Some(GeometryKind::Multipoint),
        Geometry::MultiLineString(_) => Some(GeometryKind::Multilinestring),
        Geometry::MultiPolygon(_) => Some(GeometryKind::Multipolygon),
        _ => None,
    }
}

fn is_valid_table_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Compile one rule definition into a schema plus transform closure.
pub fn compile_rule(rule: &RuleConfig) -> Result<MappingRule, String> {
    if !is_valid_table_name(&rule.name) {
        return Err(format!(
            "table name '{}' must be non-empty and use only letters, digits, '_' or '-'",
            rule.name
        ));
    }

    let geometry_name = rule.geometry.name();
    if geometry_name.is_empty() {
        return Err("geometry attribute name is empty".to_string());
    }
    if geometry_name == ID_ATTRIBUTE {
        return Err(format!(
            "geometry attribute cannot be named '{}'",
            ID_ATTRIBUTE
        ));
    }

    let mut schema = OutputSchema::new(
        rule.name.clone(),
        GeometryAttribute {
            name: geometry_name.to_string(),
            kind: rule.geometry.kind(),
        },
    );

    let mut names: HashSet<&str> = HashSet::from([ID_ATTRIBUTE, geometry_name]);
    let mut fields = Vec::with_capacity(rule.fields.len());
    for field in &rule.fields {
        if field.name.is_empty() {
            return Err("field name is empty".to_string());
        }
        if !names.insert(field.name.as_str()) {
            return Err(format!("field '{}' is defined more than once", field.name));
        }
        let source = field.field_source()?;
        if let FieldSource::Meta(key) = &source
            && !META_KEYS.contains(&key.as_str())
        {
            return Err(format!(
                "field '{}' reads unknown metadata key '{}' (expected one of {})",
                field.name,
                key,
                META_KEYS.join(", ")
            ));
        }
        schema = schema.with_attribute(field.name.clone(), field.attr_type);
        fields.push(CompiledField {
            name: field.name.clone(),
            source,
            attr_type: field.attr_type,
        });
    }

    let tag_rule = TagRule {
        filter: TagMatch::from_table(&rule.filter),
        exclude: TagMatch::from_table(&rule.exclude),
        geometry: rule.geometry.kind(),
        fields,
    };

    Ok(MappingRule::new(schema, move |feature: &SourceFeature| {
        tag_rule.apply(feature)
    }))
}
