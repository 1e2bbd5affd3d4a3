use anyhow::{Context, Result};
use geo_types::{Geometry, LineString, Point};
use osmpbf::{BlobDecode, BlobReader, Element, HeaderBlock, PrimitiveBlock};
use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use super::{FeatureRepository, FeatureStream, SourceError};
use crate::config::NodeCacheMode;
use crate::export::StatusCode;
use crate::feature::SourceFeature;
use crate::metadata::FeatureMetadata;
use crate::schema::OriginCollection;
use crate::storage::{NodeIndex, NodeIndexWriter};
use crate::utils::{ProgressCounter, build_tag_map};

/// Feature repository backed by an OSM PBF file.
///
/// The `node` collection holds tagged nodes as points; the `way` collection
/// holds ways as linestrings, which needs the node index built at open time.
pub struct OsmPbfRepository {
    path: PathBuf,
    node_index: Option<NodeIndex>,
}

impl OsmPbfRepository {
    /// Open `path`; pass a cache mode to index node coordinates for ways.
    pub fn open(path: &Path, node_cache: Option<NodeCacheMode>) -> Result<Self> {
        std::fs::metadata(path)
            .with_context(|| format!("Source: Cannot read input file {:?}", path))?;

        let node_index = match node_cache {
            Some(mode) => {
                tracing::info!("Indexing node coordinates from {:?} ({:?})...", path, mode);
                Some(index_nodes(path, mode)?)
            }
            None => None,
        };

        Ok(Self {
            path: path.to_path_buf(),
            node_index,
        })
    }
}

fn log_sort_header(header: &HeaderBlock) {
    let sorted = header
        .required_features()
        .iter()
        .chain(header.optional_features())
        .map(|feature| feature.trim())
        .find(|feature| feature.eq_ignore_ascii_case("Sort.Type_then_ID"));
    if let Some(feature) = sorted {
        tracing::info!("Detected PBF sort header: {}", feature);
    }
}

fn index_nodes(path: &Path, mode: NodeCacheMode) -> Result<NodeIndex> {
    let mut writer = NodeIndexWriter::new(mode)?;
    let reader = BlobReader::from_path(path)
        .with_context(|| format!("Source: Failed to open {:?}", path))?;
    let progress = ProgressCounter::new("Indexing nodes", 100_000);
    let mut node_count = 0u64;

    for blob in reader {
        let blob = blob?;
        match blob.decode() {
            Ok(BlobDecode::OsmHeader(header)) => log_sort_header(&header),
            Ok(BlobDecode::OsmData(block)) => {
                let mut batch = 0u64;
                for element in block.elements() {
                    let (id, lat, lon) = match element {
                        Element::Node(node) => (node.id(), node.lat(), node.lon()),
                        Element::DenseNode(node) => (node.id(), node.lat(), node.lon()),
                        _ => continue,
                    };
                    writer
                        .put(id as u64, lat, lon)
                        .with_context(|| format!("Source: Failed indexing node {}", id))?;
                    batch += 1;
                }
                node_count += batch;
                progress.inc(batch);
            }
            Ok(BlobDecode::Unknown(unknown)) => {
                tracing::info!("Unknown blob: {}", unknown);
            }
            Err(error) => return Err(error.into()),
        }
    }

    progress.finish();
    tracing::info!("Indexed {} nodes.", node_count);
    writer.finalize()
}

impl FeatureRepository for OsmPbfRepository {
    fn features(&self, collection: OriginCollection) -> Result<FeatureStream<'_>, SourceError> {
        if collection == OriginCollection::Way && self.node_index.is_none() {
            return Err(SourceError::new(
                StatusCode::MissingNodeIndex,
                "way features need the node index; open the repository with a node cache mode",
            ));
        }
        let blobs = BlobReader::from_path(&self.path).map_err(read_error)?;
        Ok(Box::new(PbfFeatures {
            blobs,
            collection,
            node_index: self.node_index.as_ref(),
            pending: VecDeque::new(),
            done: false,
        }))
    }
}

fn read_error(err: osmpbf::Error) -> SourceError {
    SourceError::new(StatusCode::UnableToGetFeatures, err.to_string())
}

struct PbfFeatures<'a> {
    blobs: BlobReader<BufReader<File>>,
    collection: OriginCollection,
    node_index: Option<&'a NodeIndex>,
    pending: VecDeque<SourceFeature>,
    done: bool,
}

impl PbfFeatures<'_> {
    fn collect_block(&mut self, block: &PrimitiveBlock) {
        for element in block.elements() {
            let feature = match (self.collection, element) {
                (OriginCollection::Node, Element::Node(node)) => node_feature(
                    node.id(),
                    (node.lon(), node.lat()),
                    build_tag_map(node.tags()),
                    Some(FeatureMetadata::from_info(node.id(), &node.info())),
                ),
                (OriginCollection::Node, Element::DenseNode(node)) => node_feature(
                    node.id(),
                    (node.lon(), node.lat()),
                    build_tag_map(node.tags()),
                    node.info()
                        .map(|info| FeatureMetadata::from_dense_info(node.id(), info)),
                ),
                (OriginCollection::Way, Element::Way(way)) => match self.node_index {
                    Some(node_index) => way_feature(
                        way.id(),
                        way.refs(),
                        build_tag_map(way.tags()),
                        Some(FeatureMetadata::from_info(way.id(), &way.info())),
                        node_index,
                    ),
                    None => None,
                },
                _ => None,
            };
            if let Some(feature) = feature {
                self.pending.push_back(feature);
            }
        }
    }
}

/// Point feature for a node; untagged nodes only feed the node index.
fn node_feature(
    id: i64,
    (lon, lat): (f64, f64),
    tags: HashMap<String, String>,
    metadata: Option<FeatureMetadata>,
) -> Option<SourceFeature> {
    if tags.is_empty() {
        return None;
    }
    Some(SourceFeature {
        id,
        geometry: Geometry::Point(Point::new(lon, lat)),
        tags,
        metadata,
    })
}

/// Linestring feature for a way, from the node refs found in `node_index`.
fn way_feature(
    id: i64,
    refs: impl IntoIterator<Item = i64>,
    tags: HashMap<String, String>,
    metadata: Option<FeatureMetadata>,
    node_index: &NodeIndex,
) -> Option<SourceFeature> {
    let coords: Vec<(f64, f64)> = refs
        .into_iter()
        .filter_map(|node_id| node_index.get(node_id as u64))
        .collect();
    if coords.len() < 2 {
        tracing::debug!(
            "Way {} has {} resolvable nodes, skipping",
            id,
            coords.len()
        );
        return None;
    }
    Some(SourceFeature {
        id,
        geometry: Geometry::LineString(LineString::from(coords)),
        tags,
        metadata,
    })
}

impl Iterator for PbfFeatures<'_> {
    type Item = Result<SourceFeature, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(feature) = self.pending.pop_front() {
                return Some(Ok(feature));
            }
            if self.done {
                return None;
            }

            let blob = match self.blobs.next() {
                None => {
                    self.done = true;
                    return None;
                }
                Some(Err(err)) => {
                    self.done = true;
                    return Some(Err(read_error(err)));
                }
                Some(Ok(blob)) => blob,
            };

            match blob.decode() {
                Ok(BlobDecode::OsmData(block)) => self.collect_block(&block),
                Ok(BlobDecode::OsmHeader(_)) => {}
                Ok(BlobDecode::Unknown(unknown)) => {
                    tracing::info!("Unknown blob: {}", unknown);
                }
                Err(err) => {
                    self.done = true;
                    return Some(Err(read_error(err)));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn node_index() -> NodeIndex {
        let mut writer = NodeIndexWriter::new_memory();
        writer.put(1, 10.0, 20.0).unwrap();
        writer.put(2, 11.0, 21.0).unwrap();
        writer.put(3, 12.0, 22.0).unwrap();
        writer.finalize().unwrap()
    }

    #[test]
    fn only_tagged_nodes_become_features() {
        assert!(node_feature(7, (20.0, 10.0), HashMap::new(), None).is_none());

        let feature = node_feature(8, (20.0, 10.0), tags(&[("amenity", "cafe")]), None).unwrap();
        assert_eq!(feature.id, 8);
        assert_eq!(feature.geometry, Geometry::Point(Point::new(20.0, 10.0)));
        assert_eq!(feature.tags.get("amenity").map(String::as_str), Some("cafe"));
    }

    #[test]
    fn way_is_assembled_from_indexed_nodes() {
        let index = node_index();
        let feature = way_feature(
            100,
            [1, 2, 3],
            tags(&[("highway", "primary")]),
            None,
            &index,
        )
        .unwrap();

        let Geometry::LineString(line) = feature.geometry else {
            panic!("expected linestring");
        };
        let coords: Vec<(f64, f64)> = line.coords().map(|c| (c.x, c.y)).collect();
        assert_eq!(coords, vec![(20.0, 10.0), (21.0, 11.0), (22.0, 12.0)]);
        assert_eq!(feature.tags.get("highway").map(String::as_str), Some("primary"));
    }

    #[test]
    fn unresolved_refs_are_dropped_from_the_line() {
        let index = node_index();
        let feature = way_feature(101, [1, 99, 3], HashMap::new(), None, &index).unwrap();
        let Geometry::LineString(line) = feature.geometry else {
            panic!("expected linestring");
        };
        assert_eq!(line.0.len(), 2);
    }

    #[test]
    fn way_with_fewer_than_two_resolvable_nodes_is_skipped() {
        let index = node_index();
        assert!(way_feature(102, [2], HashMap::new(), None, &index).is_none());
        assert!(way_feature(103, [2, 404], HashMap::new(), None, &index).is_none());
        assert!(way_feature(104, [404, 405], HashMap::new(), None, &index).is_none());
    }

    #[test]
    fn open_fails_for_missing_input() {
        let err = OsmPbfRepository::open(Path::new("/nonexistent/input.osm.pbf"), None)
            .err()
            .unwrap();
        assert!(err.to_string().contains("Cannot read input file"));
    }

    #[test]
    fn way_collection_requires_node_index() {
        let file = tempfile::NamedTempFile::with_suffix(".osm.pbf").unwrap();
        let repository = OsmPbfRepository::open(file.path(), None).unwrap();
        let err = repository.features(OriginCollection::Way).err().unwrap();
        assert_eq!(err.status, StatusCode::MissingNodeIndex);
    }

    #[test]
    fn corrupt_input_reports_read_status() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::with_suffix(".osm.pbf").unwrap();
        file.write_all(&[0xff; 64]).unwrap();
        let repository = OsmPbfRepository::open(file.path(), None).unwrap();
        let first = repository
            .features(OriginCollection::Node)
            .unwrap()
            .next()
            .unwrap();
        assert_eq!(first.unwrap_err().status, StatusCode::UnableToGetFeatures);
    }
}
