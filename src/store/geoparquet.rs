use arrow_array::{
    ArrayRef, BinaryArray, BooleanArray, Float64Array, Int64Array, RecordBatch, StringArray,
};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use geozero::{CoordDimensions, ToWkb};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::file::metadata::KeyValue;
use parquet::file::properties::WriterProperties;
use serde_json::{Map, Value};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;

use super::{FeatureTable, StoreError, TableWriter};
use crate::feature::{AttributeValue, OutputFeature};
use crate::schema::{AttributeType, OutputSchema};

const GEO_METADATA_KEY: &str = "geo";

pub(super) fn create(path: &Path, schema: &OutputSchema) -> Result<(), StoreError> {
    let file = OpenOptions::new().write(true).create_new(true).open(path)?;
    let writer = ArrowWriter::try_new(
        file,
        Arc::new(arrow_schema_for(schema)),
        Some(writer_properties(Some(geo_metadata(schema)))),
    )?;
    writer.close()?;
    Ok(())
}

fn arrow_schema_for(schema: &OutputSchema) -> Schema {
    let mut fields = vec![Field::new(&schema.geometry.name, DataType::Binary, false)];
    for attr in &schema.attributes {
        let data_type = match attr.attr_type {
            AttributeType::String => DataType::Utf8,
            AttributeType::Integer => DataType::Int64,
            AttributeType::Float => DataType::Float64,
            AttributeType::Boolean => DataType::Boolean,
        };
        fields.push(Field::new(&attr.name, data_type, true));
    }
    Schema::new(fields)
}

fn geo_metadata(schema: &OutputSchema) -> String {
    let geometry_types: Vec<&str> = schema.geometry.kind.type_name().into_iter().collect();
    let mut columns = Map::new();
    columns.insert(
        schema.geometry.name.clone(),
        serde_json::json!({
            "encoding": "WKB",
            "geometry_types": geometry_types,
        }),
    );
    serde_json::json!({
        "version": "1.0.0",
        "primary_column": schema.geometry.name,
        "columns": columns,
    })
    .to_string()
}

fn writer_properties(geo: Option<String>) -> WriterProperties {
    let kv_metadata = geo.map(|geo| vec![KeyValue::new(GEO_METADATA_KEY.to_string(), Some(geo))]);
    WriterProperties::builder()
        .set_key_value_metadata(kv_metadata)
        .build()
}

fn primary_column(geo: &str) -> Option<String> {
    let value: Value = serde_json::from_str(geo).ok()?;
    value
        .get("primary_column")?
        .as_str()
        .map(str::to_string)
}

enum ColumnValues {
    String(Vec<Option<String>>),
    Integer(Vec<Option<i64>>),
    Float(Vec<Option<f64>>),
    Boolean(Vec<Option<bool>>),
}

struct ColumnBuffer {
    name: String,
    values: ColumnValues,
}

impl ColumnBuffer {
    fn for_field(field: &Field) -> Result<Self, StoreError> {
        let values = match field.data_type() {
            DataType::Utf8 => ColumnValues::String(Vec::new()),
            DataType::Int64 => ColumnValues::Integer(Vec::new()),
            DataType::Float64 => ColumnValues::Float(Vec::new()),
            DataType::Boolean => ColumnValues::Boolean(Vec::new()),
            other => {
                return Err(StoreError::Unsupported(format!(
                    "column '{}' has type {}",
                    field.name(),
                    other
                )));
            }
        };
        Ok(Self {
            name: field.name().clone(),
            values,
        })
    }

    fn push(&mut self, value: Option<&AttributeValue>) {
        match &mut self.values {
            ColumnValues::String(values) => values.push(coerce_string(value)),
            ColumnValues::Integer(values) => values.push(coerce_i64(value)),
            ColumnValues::Float(values) => values.push(coerce_f64(value)),
            ColumnValues::Boolean(values) => values.push(coerce_bool(value)),
        }
    }

    fn take_array(&mut self) -> ArrayRef {
        match &mut self.values {
            ColumnValues::String(values) => Arc::new(StringArray::from(std::mem::take(values))),
            ColumnValues::Integer(values) => Arc::new(Int64Array::from(std::mem::take(values))),
            ColumnValues::Float(values) => Arc::new(Float64Array::from(std::mem::take(values))),
            ColumnValues::Boolean(values) => {
                Arc::new(BooleanArray::from(std::mem::take(values)))
            }
        }
    }
}

/// Table stored as one GeoParquet file.
///
/// Rows are staged in a temp file next to the table and only replace it on
/// `commit`; an uncommitted export leaves the table untouched.
pub struct GeoParquetTable {
    name: String,
    path: PathBuf,
    schema: SchemaRef,
    geo_metadata: Option<String>,
    geometry_index: usize,
    column_buffers: Vec<ColumnBuffer>,
    geometry_buf: Vec<Vec<u8>>,
    writer: Option<ArrowWriter<NamedTempFile>>,
    cleared: bool,
    batch_size: usize,
}

impl GeoParquetTable {
    pub fn open(name: &str, path: PathBuf) -> Result<Self, StoreError> {
        let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(&path)?)?;
        let geo_metadata = builder
            .metadata()
            .file_metadata()
            .key_value_metadata()
            .and_then(|kvs| kvs.iter().find(|kv| kv.key == GEO_METADATA_KEY))
            .and_then(|kv| kv.value.clone());
        let schema = Arc::new(Schema::new(builder.schema().fields().clone()));

        let geometry_index = match geo_metadata.as_deref().and_then(primary_column) {
            Some(column) => schema.index_of(&column)?,
            None => 0,
        };
        let geometry_field = schema.fields().get(geometry_index).ok_or_else(|| {
            StoreError::Unsupported(format!("table '{}' has no columns", name))
        })?;
        if geometry_field.data_type() != &DataType::Binary {
            return Err(StoreError::Unsupported(format!(
                "geometry column '{}' is not WKB binary",
                geometry_field.name()
            )));
        }

        let column_buffers = schema
            .fields()
            .iter()
            .enumerate()
            .filter(|(index, _)| *index != geometry_index)
            .map(|(_, field)| ColumnBuffer::for_field(field))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name: name.to_string(),
            path,
            schema,
            geo_metadata,
            geometry_index,
            column_buffers,
            geometry_buf: Vec::new(),
            writer: None,
            cleared: false,
            batch_size: 10_000,
        })
    }

    fn ensure_writer(&mut self) -> Result<&mut ArrowWriter<NamedTempFile>, StoreError> {
        if self.writer.is_none() {
            let dir = self.path.parent().unwrap_or(Path::new("."));
            let temp = NamedTempFile::new_in(dir)?;
            let mut writer = ArrowWriter::try_new(
                temp,
                self.schema.clone(),
                Some(writer_properties(self.geo_metadata.clone())),
            )?;

            if !self.cleared {
                // Carry existing rows forward; the file is rewritten on commit.
                let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(&self.path)?)?
                    .build()?;
                for batch in reader {
                    let batch = RecordBatch::try_new(self.schema.clone(), batch?.columns().to_vec())?;
                    writer.write(&batch)?;
                }
            }
            self.writer = Some(writer);
        }
        self.writer
            .as_mut()
            .ok_or_else(|| StoreError::TableNotFound(self.name.clone()))
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        if self.geometry_buf.is_empty() {
            return Ok(());
        }

        let mut buffers = self.column_buffers.iter_mut();
        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(self.schema.fields().len());
        for index in 0..self.schema.fields().len() {
            if index == self.geometry_index {
                let geometries = std::mem::take(&mut self.geometry_buf);
                arrays.push(Arc::new(BinaryArray::from_iter_values(geometries)));
            } else if let Some(buffer) = buffers.next() {
                arrays.push(buffer.take_array());
            }
        }

        let batch = RecordBatch::try_new(self.schema.clone(), arrays)?;
        self.ensure_writer()?.write(&batch)?;
        Ok(())
    }
}

impl FeatureTable for GeoParquetTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn writer(&mut self) -> Option<&mut dyn TableWriter> {
        Some(self)
    }
}

impl TableWriter for GeoParquetTable {
    fn remove_all(&mut self) -> Result<(), StoreError> {
        self.cleared = true;
        self.writer = None;
        self.geometry_buf.clear();
        for buffer in &mut self.column_buffers {
            buffer.take_array();
        }
        Ok(())
    }

    fn append(&mut self, feature: OutputFeature) -> Result<(), StoreError> {
        self.ensure_writer()?;
        let wkb = feature
            .geometry
            .to_wkb(CoordDimensions::xy())
            .map_err(|err| StoreError::Geometry(err.to_string()))?;
        self.geometry_buf.push(wkb);
        for buffer in &mut self.column_buffers {
            buffer.push(feature.values.get(&buffer.name));
        }

        if self.geometry_buf.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.ensure_writer()?;
        self.flush()?;
        if let Some(writer) = self.writer.take() {
            let temp = writer.into_inner()?;
            temp.persist(&self.path).map_err(|err| StoreError::Io(err.error))?;
        }
        // Later writes start from the committed file.
        self.cleared = false;
        Ok(())
    }
}

fn coerce_string(value: Option<&AttributeValue>) -> Option<String> {
    match value {
        Some(AttributeValue::String(s)) => Some(s.clone()),
        Some(AttributeValue::Integer(n)) => Some(n.to_string()),
        Some(AttributeValue::Float(n)) => Some(n.to_string()),
        Some(AttributeValue::Boolean(b)) => Some(b.to_string()),
        None => None,
    }
}

fn coerce_i64(value: Option<&AttributeValue>) -> Option<i64> {
    match value {
        Some(AttributeValue::Integer(n)) => Some(*n),
        Some(AttributeValue::Float(n)) => Some(*n as i64),
        Some(AttributeValue::String(s)) => s.parse::<i64>().ok(),
        Some(AttributeValue::Boolean(b)) => Some(i64::from(*b)),
        None => None,
    }
}

fn coerce_f64(value: Option<&AttributeValue>) -> Option<f64> {
    match value {
        Some(AttributeValue::Float(n)) => Some(*n),
        Some(AttributeValue::Integer(n)) => Some(*n as f64),
        Some(AttributeValue::String(s)) => s.parse::<f64>().ok(),
        Some(AttributeValue::Boolean(_)) | None => None,
    }
}

fn coerce_bool(value: Option<&AttributeValue>) -> Option<bool> {
    match value {
        Some(AttributeValue::Boolean(b)) => Some(*b),
        Some(AttributeValue::Integer(n)) => Some(*n != 0),
        Some(AttributeValue::String(s)) => s.parse::<bool>().ok(),
        Some(AttributeValue::Float(_)) | None => None,
    }
}
