//! Read side: the feature repository the export draws from.

mod pbf;

pub use pbf::OsmPbfRepository;

use crate::export::StatusCode;
use crate::feature::SourceFeature;
use crate::schema::OriginCollection;

#[derive(Debug, thiserror::Error)]
#[error("{status}: {message}")]
pub struct SourceError {
    pub status: StatusCode,
    pub message: String,
}

impl SourceError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// Sequential feed of features, yielded in repository order.
pub type FeatureStream<'a> = Box<dyn Iterator<Item = Result<SourceFeature, SourceError>> + 'a>;

pub trait FeatureRepository {
    /// Open a read stream over one origin collection. Each call yields an
    /// independent stream, so one repository can serve many rules.
    fn features(&self, collection: OriginCollection) -> Result<FeatureStream<'_>, SourceError>;
}
