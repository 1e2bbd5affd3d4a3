//! Runs a mapping: one table per rule, each filled from the origin
//! collection its geometry kind points at.

mod error;
mod executor;
mod provision;
#[cfg(test)]
mod testing;

pub use error::{ExportError, StatusCode};
pub use executor::ExportSummary;

use executor::export_rule;
use provision::ensure_table;

use crate::config::{ExportOptions, FailurePolicy};
use crate::mapping::{Mapping, MappingRule};
use crate::schema::origin_collection;
use crate::source::FeatureRepository;
use crate::store::StoreFactory;
use crate::utils::ProgressListener;

/// Result of running one rule.
#[derive(Debug)]
pub struct RuleOutcome {
    pub rule: String,
    pub result: Result<ExportSummary, ExportError>,
}

/// Rejects a mapping that would export nothing.
pub fn check_mapping(mapping: &Mapping) -> Result<(), ExportError> {
    if mapping.is_empty() {
        return Err(ExportError::EmptyMapping);
    }
    Ok(())
}

/// Export every rule of `mapping`, in declared order.
///
/// Each rule gets its own store connection, released before the next rule
/// starts. Under [`FailurePolicy::Abort`] the first failing rule ends the
/// run and later rules are not attempted.
pub fn run<P>(
    mapping: &Mapping,
    repository: &dyn FeatureRepository,
    stores: &dyn StoreFactory,
    options: ExportOptions,
    mut progress: P,
) -> Result<Vec<RuleOutcome>, ExportError>
where
    P: FnMut(&MappingRule) -> Box<dyn ProgressListener>,
{
    check_mapping(mapping)?;

    let mut outcomes = Vec::with_capacity(mapping.len());
    for rule in mapping.rules() {
        let name = rule.schema().name.clone();
        let listener = progress(rule);
        let result = export_one(rule, repository, stores, options.overwrite, listener.as_ref());

        match &result {
            Ok(summary) => tracing::info!(
                "Exported {} of {} {} features to '{}' ({} skipped)",
                summary.written,
                summary.read,
                summary.collection,
                summary.table,
                summary.skipped
            ),
            Err(err) if options.policy == FailurePolicy::Continue => {
                tracing::warn!("Rule '{}' failed: {}", name, err)
            }
            Err(_) => {}
        }

        let failed = result.is_err();
        outcomes.push(RuleOutcome { rule: name, result });
        if failed && options.policy == FailurePolicy::Abort {
            let remaining = mapping.len() - outcomes.len();
            if remaining > 0 {
                tracing::warn!("Skipping {} remaining rule(s)", remaining);
            }
            break;
        }
    }

    Ok(outcomes)
}

fn export_one(
    rule: &MappingRule,
    repository: &dyn FeatureRepository,
    stores: &dyn StoreFactory,
    overwrite: bool,
    progress: &dyn ProgressListener,
) -> Result<ExportSummary, ExportError> {
    let schema = rule.schema();
    let collection = origin_collection(schema);
    tracing::info!(
        "Exporting {} collection to '{}'",
        collection,
        schema.table_name()
    );

    let mut store = stores
        .connect()
        .map_err(|source| ExportError::Connection {
            table: schema.table_name().to_string(),
            source,
        })?;
    let mut table = ensure_table(schema, store.as_mut(), overwrite)?;
    export_rule(
        rule,
        repository,
        collection,
        table.as_mut(),
        overwrite,
        progress,
    )
}
