//! Write side: destination stores holding one table per mapping rule.

use clap::ValueEnum;
use std::fs;
use std::path::{Path, PathBuf};

pub mod geojsonl;
pub mod geoparquet;

pub use self::geojsonl::GeoJsonlTable;
pub use self::geoparquet::GeoParquetTable;

use crate::feature::OutputFeature;
use crate::schema::OutputSchema;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),

    #[error("geometry encoding failed: {0}")]
    Geometry(String),

    #[error("table '{0}' not found")]
    TableNotFound(String),

    #[error("table '{0}' already exists")]
    TableExists(String),

    #[error("unsupported schema: {0}")]
    Unsupported(String),
}

/// One open connection to a destination store.
///
/// Dropping the connection releases it.
pub trait DestinationStore {
    fn table_names(&self) -> Result<Vec<String>, StoreError>;

    fn create_schema(&mut self, schema: &OutputSchema) -> Result<(), StoreError>;

    fn table(&mut self, name: &str) -> Result<Box<dyn FeatureTable + '_>, StoreError>;
}

/// Handle to an existing table.
pub trait FeatureTable {
    fn name(&self) -> &str;

    /// Write access, or `None` when the table is read-only.
    fn writer(&mut self) -> Option<&mut dyn TableWriter>;
}

pub trait TableWriter {
    /// Delete every record currently in the table.
    fn remove_all(&mut self) -> Result<(), StoreError>;

    fn append(&mut self, feature: OutputFeature) -> Result<(), StoreError>;

    /// Make everything appended so far durable.
    fn commit(&mut self) -> Result<(), StoreError>;
}

/// Opens a fresh connection per call; connections are never shared.
pub trait StoreFactory {
    fn connect(&self) -> Result<Box<dyn DestinationStore>, StoreError>;
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug, Default)]
pub enum TableFormat {
    #[default]
    #[value(name = "geojsonl")]
    GeoJsonl,
    #[value(name = "geoparquet", alias = "parquet")]
    GeoParquet,
}

impl TableFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            TableFormat::GeoJsonl => "geojsonl",
            TableFormat::GeoParquet => "parquet",
        }
    }
}

/// Store where each table is one file in a directory.
pub struct DirectoryStore {
    dir: PathBuf,
    format: TableFormat,
}

impl DirectoryStore {
    pub fn open(dir: &Path, format: TableFormat) -> Result<Self, StoreError> {
        fs::create_dir_all(dir)?;
        tracing::debug!("Opened destination {:?} ({:?})", dir, format);
        Ok(Self {
            dir: dir.to_path_buf(),
            format,
        })
    }

    pub fn table_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", name, self.format.extension()))
    }
}

impl DestinationStore for DirectoryStore {
    fn table_names(&self) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.is_file()
                || path.extension().and_then(|ext| ext.to_str()) != Some(self.format.extension())
            {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn create_schema(&mut self, schema: &OutputSchema) -> Result<(), StoreError> {
        let path = self.table_path(schema.table_name());
        if path.exists() {
            return Err(StoreError::TableExists(schema.name.clone()));
        }
        match self.format {
            TableFormat::GeoJsonl => geojsonl::create(&path),
            TableFormat::GeoParquet => geoparquet::create(&path, schema),
        }
    }

    fn table(&mut self, name: &str) -> Result<Box<dyn FeatureTable + '_>, StoreError> {
        let path = self.table_path(name);
        if !path.is_file() {
            return Err(StoreError::TableNotFound(name.to_string()));
        }
        Ok(match self.format {
            TableFormat::GeoJsonl => Box::new(GeoJsonlTable::open(name, path)),
            TableFormat::GeoParquet => Box::new(GeoParquetTable::open(name, path)?),
        })
    }
}

impl Drop for DirectoryStore {
    fn drop(&mut self) {
        tracing::debug!("Released destination {:?}", self.dir);
    }
}

pub struct DirectoryStoreFactory {
    pub dir: PathBuf,
    pub format: TableFormat,
}

impl StoreFactory for DirectoryStoreFactory {
    fn connect(&self) -> Result<Box<dyn DestinationStore>, StoreError> {
        Ok(Box::new(DirectoryStore::open(&self.dir, self.format)?))
    }
}
