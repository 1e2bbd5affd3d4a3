//! Node coordinate index used to assemble way geometries.

use anyhow::{Context, Result, anyhow};
use memmap2::Mmap;
use std::collections::HashMap;
use std::io::{BufWriter, Write};
use tempfile::NamedTempFile;

use crate::config::NodeCacheMode;

// 16 bytes per entry: 8 bytes node id (u64), 8 bytes packed coords (i64)
const SPARSE_ENTRY_SIZE: usize = 16;
const SCALE_FACTOR: f64 = 10_000_000.0;

pub struct NodeIndexWriter {
    inner: WriterImpl,
}

pub struct NodeIndex {
    inner: ReaderImpl,
}

enum WriterImpl {
    Sparse(SparseWriter),
    Memory(MemoryIndex),
}

enum ReaderImpl {
    Sparse(SparseReader),
    Memory(MemoryIndex),
}

struct SparseWriter {
    writer: BufWriter<NamedTempFile>,
    count: u64,
    last_id: Option<u64>,
}

struct SparseReader {
    mmap: Option<Mmap>,
    count: u64,
    /// Deleted when the reader is dropped.
    _temp_file: NamedTempFile,
}

struct MemoryIndex {
    nodes: HashMap<u64, i64>,
}

impl NodeIndexWriter {
    pub fn new(mode: NodeCacheMode) -> Result<Self> {
        match mode {
            NodeCacheMode::Memory => Ok(Self::new_memory()),
            NodeCacheMode::Sparse => Self::new_sparse(),
        }
    }

    pub fn new_sparse() -> Result<Self> {
        let temp_file =
            NamedTempFile::new().context("NodeIndex: Failed to create temporary index file")?;
        Ok(Self {
            inner: WriterImpl::Sparse(SparseWriter {
                writer: BufWriter::new(temp_file),
                count: 0,
                last_id: None,
            }),
        })
    }

    pub fn new_memory() -> Self {
        Self {
            inner: WriterImpl::Memory(MemoryIndex {
                nodes: HashMap::new(),
            }),
        }
    }

    pub fn put(&mut self, id: u64, lat: f64, lon: f64) -> Result<()> {
        let packed = pack_coords(lat, lon);
        match &mut self.inner {
            WriterImpl::Sparse(index) => index.put(id, packed),
            WriterImpl::Memory(index) => {
                index.nodes.insert(id, packed);
                Ok(())
            }
        }
    }

    pub fn finalize(self) -> Result<NodeIndex> {
        match self.inner {
            WriterImpl::Sparse(index) => index.finalize(),
            WriterImpl::Memory(index) => Ok(NodeIndex {
                inner: ReaderImpl::Memory(index),
            }),
        }
    }
}

impl NodeIndex {
    /// Returns `(lon, lat)` for a node id.
    pub fn get(&self, id: u64) -> Option<(f64, f64)> {
        match &self.inner {
            ReaderImpl::Sparse(index) => index.get(id),
            ReaderImpl::Memory(index) => index.nodes.get(&id).copied().map(unpack_coords),
        }
    }
}

/// Pack lat/lon as 1e-7 fixed point into a single i64
fn pack_coords(lat: f64, lon: f64) -> i64 {
    let lat_fixed = (lat * SCALE_FACTOR).round() as i32;
    let lon_fixed = (lon * SCALE_FACTOR).round() as i32;
    ((lon_fixed as i64) << 32) | ((lat_fixed as i64) & 0xFFFF_FFFF)
}

/// Unpack i64 back to (lon, lat)
fn unpack_coords(packed: i64) -> (f64, f64) {
    let lon_fixed = (packed >> 32) as i32;
    let lat_fixed = packed as i32;
    (
        lon_fixed as f64 / SCALE_FACTOR,
        lat_fixed as f64 / SCALE_FACTOR,
    )
}

impl SparseWriter {
    fn put(&mut self, id: u64, packed: i64) -> Result<()> {
        if let Some(last_id) = self.last_id
            && id <= last_id
        {
            return Err(anyhow!(
                "NodeIndex: Node ids are out of order for the sparse index (node {id} after {last_id}); sort the input or use --node-cache-mode memory"
            ));
        }
        self.last_id = Some(id);
        self.count += 1;
        self.writer.write_all(&id.to_le_bytes())?;
        self.writer.write_all(&packed.to_le_bytes())?;
        Ok(())
    }

    fn finalize(mut self) -> Result<NodeIndex> {
        self.writer
            .flush()
            .context("NodeIndex: Failed to flush sparse index file")?;
        let temp_file = self
            .writer
            .into_inner()
            .context("NodeIndex: Failed to finalize sparse index file")?;

        let file_len = temp_file
            .as_file()
            .metadata()
            .context("NodeIndex: Failed to stat sparse index file")?
            .len();
        if file_len != self.count * SPARSE_ENTRY_SIZE as u64 {
            return Err(anyhow!(
                "NodeIndex: Sparse index size mismatch: expected {} entries, file has {} bytes",
                self.count,
                file_len
            ));
        }

        // Empty files cannot be mapped on every platform.
        let mmap = if self.count == 0 {
            None
        } else {
            // SAFETY: the temp file is owned by the reader for the lifetime of the
            // map and is never written again after this point.
            Some(unsafe {
                Mmap::map(temp_file.as_file()).context("NodeIndex: Failed to map sparse index")?
            })
        };

        Ok(NodeIndex {
            inner: ReaderImpl::Sparse(SparseReader {
                mmap,
                count: self.count,
                _temp_file: temp_file,
            }),
        })
    }
}

impl SparseReader {
    fn get(&self, id: u64) -> Option<(f64, f64)> {
        let mmap = self.mmap.as_ref()?;
        let mut low = 0u64;
        let mut high = self.count;

        while low < high {
            let mid = low + (high - low) / 2;
            let offset = (mid as usize) * SPARSE_ENTRY_SIZE;
            let entry = mmap.get(offset..offset + SPARSE_ENTRY_SIZE)?;
            let (id_bytes, coord_bytes) = entry.split_at(8);
            let mid_id = u64::from_le_bytes(id_bytes.try_into().ok()?);

            match mid_id.cmp(&id) {
                std::cmp::Ordering::Less => low = mid + 1,
                std::cmp::Ordering::Greater => high = mid,
                std::cmp::Ordering::Equal => {
                    return Some(unpack_coords(i64::from_le_bytes(
                        coord_bytes.try_into().ok()?,
                    )));
                }
            }
        }

        None
    }
}
