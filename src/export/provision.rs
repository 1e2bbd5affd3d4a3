use super::ExportError;
use crate::schema::OutputSchema;
use crate::store::{DestinationStore, FeatureTable};

/// Make sure the table for `schema` exists and hand back a handle to it.
///
/// An existing table is only accepted when `overwrite` is set; its schema is
/// assumed compatible. A table created here is not removed if the export
/// later fails.
pub fn ensure_table<'s>(
    schema: &OutputSchema,
    store: &'s mut dyn DestinationStore,
    overwrite: bool,
) -> Result<Box<dyn FeatureTable + 's>, ExportError> {
    let table = schema.table_name().to_string();
    let existing = store
        .table_names()
        .map_err(|source| ExportError::SchemaCreation {
            table: table.clone(),
            source,
        })?;

    if existing.iter().any(|name| *name == table) {
        if !overwrite {
            return Err(ExportError::TableConflict { table });
        }
        tracing::info!("Table '{}' exists and will be overwritten", table);
    } else {
        store
            .create_schema(schema)
            .map_err(|source| ExportError::SchemaCreation {
                table: table.clone(),
                source,
            })?;
        tracing::info!("Created table '{}'", table);
    }

    store
        .table(&table)
        .map_err(|source| ExportError::TableUnavailable { table, source })
}
