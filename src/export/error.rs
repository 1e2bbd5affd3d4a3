use std::fmt;

use crate::store::StoreError;

/// Status reported by the feature streaming machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// Source features could not be read.
    UnableToGetFeatures,
    /// A mapped feature could not be added to the destination table.
    UnableToAdd,
    /// The collection needs a node index that was never built.
    MissingNodeIndex,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusCode::UnableToGetFeatures => "UNABLE_TO_GET_FEATURES",
            StatusCode::UnableToAdd => "UNABLE_TO_ADD",
            StatusCode::MissingNodeIndex => "MISSING_NODE_INDEX",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("no rules are defined in the specified mapping")]
    EmptyMapping,

    #[error("table '{table}' already exists; use --overwrite to replace its contents")]
    TableConflict { table: String },

    #[error("cannot create new table '{table}': {source}")]
    SchemaCreation {
        table: String,
        #[source]
        source: StoreError,
    },

    #[error("cannot open table '{table}': {source}")]
    TableUnavailable {
        table: String,
        #[source]
        source: StoreError,
    },

    #[error("error truncating table '{table}': {source}")]
    DestinationWrite {
        table: String,
        #[source]
        source: StoreError,
    },

    #[error("could not connect to the destination store for '{table}': {source}")]
    Connection {
        table: String,
        #[source]
        source: StoreError,
    },

    #[error("table '{table}' does not accept writes")]
    UnsupportedDestination { table: String },

    #[error("{message}")]
    InvalidMapping { table: String, message: String },

    #[error("could not export to '{table}'. Error: {status}: {message}")]
    ExportMechanics {
        table: String,
        status: StatusCode,
        message: String,
    },

    #[error("export to '{table}' was canceled")]
    Canceled { table: String },
}

impl ExportError {
    /// Table the failure is attributed to; `None` for invocation-level errors.
    pub fn table(&self) -> Option<&str> {
        match self {
            ExportError::EmptyMapping => None,
            ExportError::TableConflict { table }
            | ExportError::Connection { table, .. }
            | ExportError::SchemaCreation { table, .. }
            | ExportError::TableUnavailable { table, .. }
            | ExportError::DestinationWrite { table, .. }
            | ExportError::UnsupportedDestination { table }
            | ExportError::InvalidMapping { table, .. }
            | ExportError::ExportMechanics { table, .. }
            | ExportError::Canceled { table } => Some(table),
        }
    }

    /// Process exit code for this failure kind.
    pub fn exit_code(&self) -> u8 {
        match self {
            ExportError::EmptyMapping => 2,
            ExportError::TableConflict { .. } => 3,
            ExportError::SchemaCreation { .. }
            | ExportError::TableUnavailable { .. }
            | ExportError::DestinationWrite { .. }
            | ExportError::Connection { .. }
            | ExportError::UnsupportedDestination { .. } => 4,
            ExportError::InvalidMapping { .. } => 5,
            ExportError::ExportMechanics { .. } => 6,
            ExportError::Canceled { .. } => 130,
        }
    }
}
