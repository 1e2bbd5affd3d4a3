use geojson::feature::Id;
use geojson::{Feature, GeoJson};
use serde_json::Map;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::{FeatureTable, StoreError, TableWriter};
use crate::feature::OutputFeature;

pub(super) fn create(path: &Path) -> Result<(), StoreError> {
    OpenOptions::new().write(true).create_new(true).open(path)?;
    Ok(())
}

/// Table stored as newline-delimited GeoJSON features.
///
/// Appended lines reach the file as they are written; `commit` flushes.
pub struct GeoJsonlTable {
    name: String,
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl GeoJsonlTable {
    pub fn open(name: &str, path: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            path,
            writer: None,
        }
    }

    fn line_writer(&mut self) -> Result<&mut BufWriter<File>, StoreError> {
        if self.writer.is_none() {
            let file = OpenOptions::new().append(true).open(&self.path)?;
            self.writer = Some(BufWriter::new(file));
        }
        self.writer
            .as_mut()
            .ok_or_else(|| StoreError::TableNotFound(self.name.clone()))
    }
}

pub fn to_geojson(feature: OutputFeature) -> GeoJson {
    let properties: Map<String, serde_json::Value> = feature
        .values
        .iter()
        .map(|(name, value)| (name.clone(), value.to_json()))
        .collect();

    GeoJson::Feature(Feature {
        bbox: None,
        geometry: Some(geojson::Geometry::from(&feature.geometry)),
        id: Some(Id::Number(feature.id.into())),
        properties: Some(properties),
        foreign_members: None,
    })
}

impl FeatureTable for GeoJsonlTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn writer(&mut self) -> Option<&mut dyn TableWriter> {
        Some(self)
    }
}

impl TableWriter for GeoJsonlTable {
    fn remove_all(&mut self) -> Result<(), StoreError> {
        self.writer = None;
        File::create(&self.path)?;
        Ok(())
    }

    fn append(&mut self, feature: OutputFeature) -> Result<(), StoreError> {
        let geojson = to_geojson(feature);
        let writer = self.line_writer()?;
        serde_json::to_writer(&mut *writer, &geojson)?;
        writeln!(writer)?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }
}
