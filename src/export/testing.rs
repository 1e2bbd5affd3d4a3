//! In-memory doubles for exercising the export machinery.

use geo_types::{Geometry, LineString, Point};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use super::StatusCode;
use crate::feature::{AttributeValue, OutputFeature, SourceFeature};
use crate::mapping::{MappingRule, TransformError};
use crate::schema::{AttributeType, GeometryAttribute, GeometryKind, OriginCollection, OutputSchema};
use crate::source::{FeatureRepository, FeatureStream, SourceError};
use crate::store::{DestinationStore, FeatureTable, StoreError, StoreFactory, TableWriter};
use crate::utils::ProgressListener;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Connect,
    TableNames,
    CreateSchema(String),
    GetTable(String),
    RemoveAll(String),
    Append(String),
    Commit(String),
    Release,
}

#[derive(Default)]
struct State {
    calls: Vec<StoreCall>,
    tables: BTreeMap<String, Vec<OutputFeature>>,
}

/// Shared view of everything a recording store did.
#[derive(Clone, Default)]
pub struct StoreLog(Rc<RefCell<State>>);

impl StoreLog {
    fn record(&self, call: StoreCall) {
        self.0.borrow_mut().calls.push(call);
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.0.borrow().calls.clone()
    }

    pub fn count(&self, pred: impl Fn(&StoreCall) -> bool) -> usize {
        self.0.borrow().calls.iter().filter(|call| pred(call)).count()
    }

    pub fn table_exists(&self, name: &str) -> bool {
        self.0.borrow().tables.contains_key(name)
    }

    pub fn rows(&self, name: &str) -> Vec<OutputFeature> {
        self.0.borrow().tables.get(name).cloned().unwrap_or_default()
    }

    pub fn seed_rows(&self, name: &str, rows: Vec<OutputFeature>) {
        self.0.borrow_mut().tables.insert(name.to_string(), rows);
    }
}

#[derive(Clone, Copy, Default)]
pub struct Faults {
    pub fail_connect: bool,
    pub fail_create: bool,
    pub fail_remove: bool,
    pub fail_append: bool,
    pub read_only: bool,
}

fn injected(what: &str) -> StoreError {
    StoreError::Io(std::io::Error::other(format!("injected {} failure", what)))
}

pub struct RecordingStore {
    log: StoreLog,
    pub fail_create: bool,
    pub fail_remove: bool,
    pub fail_append: bool,
    pub read_only: bool,
}

impl RecordingStore {
    pub fn new() -> (Self, StoreLog) {
        let log = StoreLog::default();
        (Self::attach(log.clone(), Faults::default()), log)
    }

    pub fn with_tables(names: &[&str]) -> (Self, StoreLog) {
        let (store, log) = Self::new();
        for name in names {
            log.seed_rows(name, Vec::new());
        }
        (store, log)
    }

    fn attach(log: StoreLog, faults: Faults) -> Self {
        Self {
            log,
            fail_create: faults.fail_create,
            fail_remove: faults.fail_remove,
            fail_append: faults.fail_append,
            read_only: faults.read_only,
        }
    }
}

impl DestinationStore for RecordingStore {
    fn table_names(&self) -> Result<Vec<String>, StoreError> {
        self.log.record(StoreCall::TableNames);
        Ok(self.log.0.borrow().tables.keys().cloned().collect())
    }

    fn create_schema(&mut self, schema: &OutputSchema) -> Result<(), StoreError> {
        self.log.record(StoreCall::CreateSchema(schema.name.clone()));
        if self.fail_create {
            return Err(injected("create"));
        }
        self.log.seed_rows(&schema.name, Vec::new());
        Ok(())
    }

    fn table(&mut self, name: &str) -> Result<Box<dyn FeatureTable + '_>, StoreError> {
        self.log.record(StoreCall::GetTable(name.to_string()));
        if !self.log.table_exists(name) {
            return Err(StoreError::TableNotFound(name.to_string()));
        }
        Ok(Box::new(RecordingTable {
            name: name.to_string(),
            store: self,
        }))
    }
}

impl Drop for RecordingStore {
    fn drop(&mut self) {
        self.log.record(StoreCall::Release);
    }
}

struct RecordingTable<'s> {
    name: String,
    store: &'s RecordingStore,
}

impl FeatureTable for RecordingTable<'_> {
    fn name(&self) -> &str {
        &self.name
    }

    fn writer(&mut self) -> Option<&mut dyn TableWriter> {
        if self.store.read_only {
            None
        } else {
            Some(self)
        }
    }
}

impl TableWriter for RecordingTable<'_> {
    fn remove_all(&mut self) -> Result<(), StoreError> {
        let log = &self.store.log;
        log.record(StoreCall::RemoveAll(self.name.clone()));
        if self.store.fail_remove {
            return Err(injected("remove"));
        }
        log.seed_rows(&self.name, Vec::new());
        Ok(())
    }

    fn append(&mut self, feature: OutputFeature) -> Result<(), StoreError> {
        let log = &self.store.log;
        log.record(StoreCall::Append(self.name.clone()));
        if self.store.fail_append {
            return Err(injected("append"));
        }
        log.0
            .borrow_mut()
            .tables
            .entry(self.name.clone())
            .or_default()
            .push(feature);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.store.log.record(StoreCall::Commit(self.name.clone()));
        Ok(())
    }
}

/// Hands out recording stores that all share one log.
#[derive(Default)]
pub struct RecordingFactory {
    pub log: StoreLog,
    pub faults: Faults,
}

impl RecordingFactory {
    pub fn with_tables(names: &[&str]) -> Self {
        let factory = Self::default();
        for name in names {
            factory.log.seed_rows(name, Vec::new());
        }
        factory
    }
}

impl StoreFactory for RecordingFactory {
    fn connect(&self) -> Result<Box<dyn DestinationStore>, StoreError> {
        self.log.record(StoreCall::Connect);
        if self.faults.fail_connect {
            return Err(injected("connect"));
        }
        Ok(Box::new(RecordingStore::attach(
            self.log.clone(),
            self.faults,
        )))
    }
}

/// Repository serving fixed node and way lists.
#[derive(Default)]
pub struct MemoryRepository {
    nodes: Vec<SourceFeature>,
    ways: Vec<SourceFeature>,
    fail_at: Option<usize>,
    opened: RefCell<Vec<OriginCollection>>,
}

impl MemoryRepository {
    pub fn new(nodes: Vec<SourceFeature>) -> Self {
        Self {
            nodes,
            ..Self::default()
        }
    }

    pub fn with_ways(mut self, ways: Vec<SourceFeature>) -> Self {
        self.ways = ways;
        self
    }

    /// Fail the stream when it reaches the feature at `index`.
    pub fn fail_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }

    pub fn streams_opened(&self) -> usize {
        self.opened.borrow().len()
    }

    pub fn collections_read(&self) -> Vec<OriginCollection> {
        self.opened.borrow().clone()
    }
}

impl FeatureRepository for MemoryRepository {
    fn features(&self, collection: OriginCollection) -> Result<FeatureStream<'_>, SourceError> {
        self.opened.borrow_mut().push(collection);
        let items = match collection {
            OriginCollection::Node => &self.nodes,
            OriginCollection::Way => &self.ways,
        };
        let fail_at = self.fail_at;
        Ok(Box::new(items.iter().enumerate().map(move |(i, feature)| {
            if Some(i) == fail_at {
                Err(SourceError::new(
                    StatusCode::UnableToGetFeatures,
                    "stream interrupted",
                ))
            } else {
                Ok(feature.clone())
            }
        })))
    }
}

/// Listener that asks for cancellation once `limit` features were reported.
pub struct CancelAfter {
    limit: usize,
    reports: RefCell<Vec<u64>>,
}

impl CancelAfter {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            reports: RefCell::new(Vec::new()),
        }
    }

    pub fn reports(&self) -> Vec<u64> {
        self.reports.borrow().clone()
    }
}

impl ProgressListener for CancelAfter {
    fn progress(&self, processed: u64) {
        self.reports.borrow_mut().push(processed);
    }

    fn is_canceled(&self) -> bool {
        self.reports.borrow().len() >= self.limit
    }
}

fn named(id: i64, name: &str, geometry: Geometry<f64>) -> SourceFeature {
    SourceFeature {
        id,
        geometry,
        tags: HashMap::from([("name".to_string(), name.to_string())]),
        metadata: None,
    }
}

pub fn node(id: i64, name: &str) -> SourceFeature {
    named(id, name, Geometry::Point(Point::new(id as f64, 1.0)))
}

pub fn way(id: i64, name: &str) -> SourceFeature {
    let line = LineString::from(vec![(0.0, 0.0), (id as f64, 1.0)]);
    named(id, name, Geometry::LineString(line))
}

fn schema(name: &str, kind: GeometryKind) -> OutputSchema {
    OutputSchema::new(
        name,
        GeometryAttribute {
            name: "geom".into(),
            kind,
        },
    )
    .with_attribute("label", AttributeType::String)
}

pub fn point_schema(name: &str) -> OutputSchema {
    schema(name, GeometryKind::Point)
}

fn relabel(feature: &SourceFeature) -> Option<OutputFeature> {
    let label = feature.tags.get("name").cloned().unwrap_or_default();
    if label == "skip" {
        return None;
    }
    Some(
        OutputFeature::new(feature.id, feature.geometry.clone())
            .with_value("id", AttributeValue::Integer(feature.id))
            .with_value("label", AttributeValue::String(label)),
    )
}

/// Copies the `name` tag into `label`; features named `skip` are excluded.
pub fn rename_rule(table: &str) -> MappingRule {
    MappingRule::new(point_schema(table), |feature| Ok(relabel(feature)))
}

pub fn line_rule(table: &str) -> MappingRule {
    MappingRule::new(schema(table, GeometryKind::Linestring), |feature| {
        Ok(relabel(feature))
    })
}

/// Like [`rename_rule`], but fails on features named `trigger`.
pub fn failing_rule(table: &str, trigger: &str) -> MappingRule {
    let trigger = trigger.to_string();
    MappingRule::new(point_schema(table), move |feature| {
        if feature.tags.get("name") == Some(&trigger) {
            return Err(TransformError(format!("cannot map feature {}", feature.id)));
        }
        Ok(relabel(feature))
    })
}
