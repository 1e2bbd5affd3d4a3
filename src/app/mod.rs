use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;

use crate::config::{ExportOptions, FailurePolicy, NodeCacheMode};
use crate::export::{self, ExportError};
use crate::mapping::{Mapping, MappingLoadError};
use crate::schema::{OriginCollection, origin_collection};
use crate::source::OsmPbfRepository;
use crate::store::{DirectoryStoreFactory, TableFormat};
use crate::utils::ProgressCounter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Input PBF file
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output directory, one file per exported table
    #[arg(short = 'O', long)]
    pub output: PathBuf,

    /// Mapping file (YAML) defining the tables to export
    #[arg(short, long, env = "OSM_EXPORT_MAPPING")]
    pub mapping: Option<PathBuf>,

    /// Replace the contents of tables that already exist
    #[arg(short, long)]
    pub overwrite: bool,

    /// Table file format
    #[arg(long, value_enum, default_value_t)]
    pub format: TableFormat,

    /// Node cache used to assemble way geometries
    #[arg(long, value_enum, default_value_t)]
    pub node_cache_mode: NodeCacheMode,

    /// Keep exporting the remaining rules after one fails
    #[arg(long)]
    pub keep_going: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn options(&self) -> ExportOptions {
        ExportOptions {
            overwrite: self.overwrite,
            policy: if self.keep_going {
                FailurePolicy::Continue
            } else {
                FailurePolicy::Abort
            },
        }
    }
}

/// Whether any rule draws from ways, which need node coordinates indexed.
pub fn reads_ways(mapping: &Mapping) -> bool {
    mapping
        .rules()
        .iter()
        .any(|rule| origin_collection(rule.schema()) == OriginCollection::Way)
}

pub fn run(cli: &Cli) -> Result<()> {
    let mapping_path = cli.mapping.as_deref().ok_or(MappingLoadError::Unspecified)?;
    let mapping = Mapping::from_file(mapping_path)
        .with_context(|| format!("Mapping: Failed to load {:?}", mapping_path))?;
    export::check_mapping(&mapping)?;
    tracing::info!("Loaded {} rule(s) from {:?}", mapping.len(), mapping_path);

    let node_cache = reads_ways(&mapping).then_some(cli.node_cache_mode);
    let repository = OsmPbfRepository::open(&cli.input, node_cache)?;
    let stores = DirectoryStoreFactory {
        dir: cli.output.clone(),
        format: cli.format,
    };

    let start = Instant::now();
    let outcomes = export::run(&mapping, &repository, &stores, cli.options(), |rule| {
        Box::new(ProgressCounter::new(
            format!("Exporting {}", rule.schema().name),
            10_000,
        ))
    })?;

    let mut first_failure = None;
    let mut written = 0u64;
    for outcome in outcomes {
        match outcome.result {
            Ok(summary) => {
                written += summary.written;
                println!("OSM data exported successfully to {}", summary.table);
            }
            Err(err) => {
                tracing::debug!(
                    "Rule '{}' failed on table {:?}",
                    outcome.rule,
                    err.table()
                );
                first_failure.get_or_insert(err);
            }
        }
    }

    let elapsed = start.elapsed();
    tracing::info!(
        "Done! Written {} features in {:.2}s",
        written,
        elapsed.as_secs_f64()
    );

    match first_failure {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

/// Process exit code for an error returned by [`run`].
pub fn exit_code(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(export_err) = cause.downcast_ref::<ExportError>() {
            return export_err.exit_code();
        }
        if cause.downcast_ref::<MappingLoadError>().is_some() {
            return 2;
        }
    }
    1
}
