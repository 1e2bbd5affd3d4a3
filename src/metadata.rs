use osmpbf::{DenseNodeInfo, Info};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Keys accepted after `meta:` in a field source.
pub const META_KEYS: [&str; 7] = [
    "id",
    "visible",
    "version",
    "changeset",
    "timestamp",
    "uid",
    "user",
];

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FeatureMetadata {
    pub id: i64,
    pub visible: Option<bool>,
    pub version: Option<i64>,
    pub changeset: Option<i64>,
    pub timestamp: Option<String>,
    pub uid: Option<i64>,
    pub user: Option<String>,
}

impl FeatureMetadata {
    pub fn from_info(id: i64, info: &Info) -> Self {
        Self {
            id,
            visible: Some(info.visible()),
            version: info.version().map(i64::from),
            changeset: info.changeset(),
            timestamp: info.milli_timestamp().and_then(format_timestamp_millis),
            uid: info.uid().map(i64::from),
            user: info.user().and_then(|user| user.ok()).map(str::to_string),
        }
    }

    pub fn from_dense_info(id: i64, info: &DenseNodeInfo) -> Self {
        Self {
            id,
            visible: Some(info.visible()),
            version: Some(i64::from(info.version())),
            changeset: Some(info.changeset()),
            timestamp: format_timestamp_millis(info.milli_timestamp()),
            uid: Some(i64::from(info.uid())),
            user: info.user().ok().map(str::to_string),
        }
    }

    /// Raw textual value of a metadata key, before typing.
    pub fn value(&self, key: &str) -> Option<String> {
        match key {
            "id" => Some(self.id.to_string()),
            "visible" => self.visible.map(|v| v.to_string()),
            "version" => self.version.map(|v| v.to_string()),
            "changeset" => self.changeset.map(|v| v.to_string()),
            "timestamp" => self.timestamp.clone(),
            "uid" => self.uid.map(|v| v.to_string()),
            "user" => self.user.clone(),
            _ => None,
        }
    }
}

pub fn format_timestamp_millis(millis: i64) -> Option<String> {
    let nanos = i128::from(millis) * 1_000_000;
    let dt = OffsetDateTime::from_unix_timestamp_nanos(nanos).ok()?;
    dt.format(&Rfc3339).ok()
}
