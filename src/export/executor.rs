use super::{ExportError, StatusCode};
use crate::mapping::MappingRule;
use crate::schema::OriginCollection;
use crate::source::{FeatureRepository, SourceError};
use crate::store::FeatureTable;
use crate::utils::ProgressListener;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub table: String,
    pub collection: OriginCollection,
    /// Source features read from the collection.
    pub read: u64,
    /// Features written to the table.
    pub written: u64,
    /// Features the transform excluded.
    pub skipped: u64,
}

/// Stream one collection through a rule's transform into `table`.
///
/// Everything is appended under a single write that is committed at the
/// end. On failure nothing is committed, but rows already appended may be
/// visible depending on the store.
pub fn export_rule(
    rule: &MappingRule,
    repository: &dyn FeatureRepository,
    collection: OriginCollection,
    table: &mut dyn FeatureTable,
    overwrite: bool,
    progress: &dyn ProgressListener,
) -> Result<ExportSummary, ExportError> {
    let table_name = table.name().to_string();
    let Some(writer) = table.writer() else {
        return Err(ExportError::UnsupportedDestination { table: table_name });
    };

    if overwrite {
        writer
            .remove_all()
            .map_err(|source| ExportError::DestinationWrite {
                table: table_name.clone(),
                source,
            })?;
    }

    let mechanics = |err: SourceError| ExportError::ExportMechanics {
        table: table_name.clone(),
        status: err.status,
        message: err.message,
    };
    let features = repository.features(collection).map_err(mechanics)?;

    let mut summary = ExportSummary {
        table: table_name.clone(),
        collection,
        read: 0,
        written: 0,
        skipped: 0,
    };

    for feature in features {
        if progress.is_canceled() {
            return Err(ExportError::Canceled { table: table_name });
        }
        let feature = feature.map_err(mechanics)?;
        summary.read += 1;

        match rule.apply(&feature) {
            Ok(Some(output)) => {
                writer
                    .append(output)
                    .map_err(|err| ExportError::ExportMechanics {
                        table: table_name.clone(),
                        status: StatusCode::UnableToAdd,
                        message: err.to_string(),
                    })?;
                summary.written += 1;
            }
            Ok(None) => summary.skipped += 1,
            Err(err) => {
                return Err(ExportError::InvalidMapping {
                    table: table_name,
                    message: err.0,
                });
            }
        }
        progress.progress(summary.read);
    }

    writer.commit().map_err(|err| ExportError::ExportMechanics {
        table: table_name.clone(),
        status: StatusCode::UnableToAdd,
        message: err.to_string(),
    })?;
    progress.complete();

    Ok(summary)
}
