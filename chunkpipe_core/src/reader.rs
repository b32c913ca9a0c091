use std::collections::HashMap;
use std::ops::Range;
use std::path::Path;

use rayon::prelude::*;
use xxhash_rust::xxh3::xxh3_64;

use crate::codec::{applied_filters, FilterSpec};
use crate::config::ReaderConfig;
use crate::error::{ChunkCoords, Error, Result};
use crate::format::{
    ChunkEntry, FileHeader, Footer, FLAG_HAS_CHECKSUM, FOOTER_SIZE, HEADER_SIZE,
};
use crate::grid::{chunk_region, coords_in_grid, copy_window, BoxLayout, Region};
use crate::meta::ArrayMeta;
use crate::pipeline::FilterPipeline;
use crate::registry::FilterRegistry;
use crate::store::{ChunkStore, FileStore};
use crate::types::Element;
use crate::view::ArrayView;

/// Where one stored chunk lives and how it was filtered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDescriptor {
    /// Chunk-grid coordinates.
    pub coords: Vec<u64>,
    /// Logical index of the chunk's first element (`coords × chunk_shape`).
    pub offset: Vec<u64>,
    /// Stored bytes within the container.
    pub byte_range: Range<u64>,
    /// Filters applied at encode time, in encode order.
    pub filters: Vec<FilterSpec>,
    pub raw_size: u64,
    pub stored_size: u64,
    pub filter_mask: u32,
    pub checksum: u64,
}

/// Random-access reader for chunked array files.
///
/// # Open sequence
/// 1. Read the 16-byte header (magic, version, flags, metadata length).
/// 2. Parse the JSON array metadata that follows it.
/// 3. Read the footer from the last 16 bytes → index offset and entry count.
/// 4. Load the whole chunk index into a map keyed by chunk coordinates.
///
/// # Access pattern
/// [`read_region`](Self::read_region) resolves a region to the chunks it
/// intersects and fetches only those. Chunks missing from the index are
/// sparse and read as the fill value.
pub struct ArrayReader<'r, S: ChunkStore = FileStore> {
    store: S,
    header: FileHeader,
    meta: ArrayMeta,
    pipeline: FilterPipeline<'r>,
    config: ReaderConfig,
    entries: Vec<ChunkEntry>,
    by_coords: HashMap<Vec<u64>, usize>,
    chunk_bytes: usize,
    fill: Vec<u8>,
}

impl<'r> ArrayReader<'r, FileStore> {
    /// Open an array file on disk.
    pub fn open(path: impl AsRef<Path>, registry: &'r FilterRegistry) -> Result<Self> {
        Self::from_store(FileStore::open(path)?, registry)
    }
}

impl<'r, S: ChunkStore> ArrayReader<'r, S> {
    /// Open an array container held by any byte-range store.
    pub fn from_store(store: S, registry: &'r FilterRegistry) -> Result<Self> {
        let total = store.len()?;
        if total < HEADER_SIZE + FOOTER_SIZE {
            return Err(Error::InvalidFormat(format!(
                "container is {total} bytes, too short for header and footer"
            )));
        }

        // ── Header and metadata ─────────────────────────────────────────────
        let header = FileHeader::from_bytes(&store.fetch_bytes(0, HEADER_SIZE)?)?;
        let meta_end = HEADER_SIZE + u64::from(header.meta_len);
        if meta_end > total - FOOTER_SIZE {
            return Err(Error::InvalidFormat(format!(
                "metadata length {} runs past the end of the container",
                header.meta_len
            )));
        }
        let meta = ArrayMeta::from_json(&store.fetch_bytes(HEADER_SIZE, u64::from(header.meta_len))?)?;

        // ── Footer → chunk index ────────────────────────────────────────────
        let footer = Footer::from_bytes(&store.fetch_bytes(total - FOOTER_SIZE, FOOTER_SIZE)?)?;
        let entry_size = ChunkEntry::encoded_size(meta.rank());
        let index_len = footer
            .entry_count
            .checked_mul(entry_size)
            .ok_or_else(|| Error::InvalidFormat("chunk index entry count overflows".into()))?;
        if footer.index_offset < meta_end
            || footer.index_offset.checked_add(index_len) != Some(total - FOOTER_SIZE)
        {
            return Err(Error::InvalidFormat(format!(
                "chunk index at {} with {} entries does not fit a {}-byte container",
                footer.index_offset, footer.entry_count, total
            )));
        }
        let index = store.fetch_bytes(footer.index_offset, index_len)?;

        let chunk_bytes = meta.chunk_bytes()?;
        let grid_shape = meta.grid_shape();
        let mut entries = Vec::with_capacity(footer.entry_count as usize);
        let mut by_coords = HashMap::with_capacity(footer.entry_count as usize);
        for raw in index.chunks_exact(entry_size as usize) {
            let entry = ChunkEntry::from_bytes(raw, meta.rank())?;
            let chunk = ChunkCoords::from(entry.coords.as_slice());
            if !coords_in_grid(&entry.coords, &grid_shape) {
                return Err(Error::InvalidFormat(format!(
                    "index entry for chunk {chunk} is outside the chunk grid {grid_shape:?}"
                )));
            }
            if entry.raw_len != chunk_bytes as u64 {
                return Err(Error::InvalidFormat(format!(
                    "index entry for chunk {chunk} declares {} raw bytes, chunks hold {chunk_bytes}",
                    entry.raw_len
                )));
            }
            let in_data = entry.offset >= meta_end
                && entry
                    .offset
                    .checked_add(entry.stored_len)
                    .is_some_and(|end| end <= footer.index_offset);
            if !in_data {
                return Err(Error::InvalidFormat(format!(
                    "index entry for chunk {chunk} points outside the chunk data section"
                )));
            }
            if by_coords.insert(entry.coords.clone(), entries.len()).is_some() {
                return Err(Error::InvalidFormat(format!(
                    "chunk {chunk} appears twice in the index"
                )));
            }
            entries.push(entry);
        }

        log::debug!(
            "opened array {:?} {} chunked {:?}: {} of {} chunks stored, {} filters",
            meta.shape,
            meta.dtype,
            meta.chunk_shape,
            entries.len(),
            grid_shape.iter().product::<u64>(),
            meta.filters.len()
        );

        Ok(Self {
            store,
            header,
            fill: meta.fill_bytes()?,
            meta,
            pipeline: FilterPipeline::new(registry),
            config: ReaderConfig::default(),
            entries,
            by_coords,
            chunk_bytes,
        })
    }

    pub fn with_config(mut self, config: ReaderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn meta(&self) -> &ArrayMeta {
        &self.meta
    }

    pub fn shape(&self) -> &[u64] {
        &self.meta.shape
    }

    /// Number of chunks present in the index.
    pub fn stored_chunks(&self) -> usize {
        self.entries.len()
    }

    /// Descriptors of every stored chunk, in row-major grid order.
    pub fn chunk_descriptors(&self) -> Vec<ChunkDescriptor> {
        let mut out: Vec<ChunkDescriptor> = self
            .entries
            .iter()
            .map(|e| ChunkDescriptor {
                coords: e.coords.clone(),
                offset: chunk_region(&e.coords, &self.meta.chunk_shape).start,
                byte_range: e.offset..e.offset + e.stored_len,
                filters: applied_filters(&self.meta.filters, e.filter_mask),
                raw_size: e.raw_len,
                stored_size: e.stored_len,
                filter_mask: e.filter_mask,
                checksum: e.checksum,
            })
            .collect();
        out.sort_by(|a, b| a.coords.cmp(&b.coords));
        out
    }

    /// Total decoded size of the stored chunks in bytes.
    pub fn raw_size(&self) -> u64 {
        self.entries.iter().map(|e| e.raw_len).sum()
    }

    /// Total stored size of the chunks in bytes (excluding index/header).
    pub fn stored_size(&self) -> u64 {
        self.entries.iter().map(|e| e.stored_len).sum()
    }

    /// Compression ratio (raw / stored).
    pub fn ratio(&self) -> f64 {
        let stored = self.stored_size();
        if stored == 0 {
            return 1.0;
        }
        self.raw_size() as f64 / stored as f64
    }

    /// Decoded bytes of the full chunk at `coords`, padding included.
    /// A chunk absent from the index decodes to the fill value.
    pub fn read_chunk(&self, coords: &[u64]) -> Result<Vec<u8>> {
        let grid_shape = self.meta.grid_shape();
        if !coords_in_grid(coords, &grid_shape) {
            return Err(Error::OutOfBounds {
                start: coords.to_vec(),
                count: vec![1; coords.len()],
                shape: grid_shape,
            });
        }
        match self.entry(coords) {
            Some(entry) => self.decode_entry(entry),
            None => Ok(self.fill.repeat(self.chunk_bytes / self.fill.len())),
        }
    }

    fn entry(&self, coords: &[u64]) -> Option<&ChunkEntry> {
        self.by_coords.get(coords).map(|&i| &self.entries[i])
    }

    /// Fetch, verify and decode one stored chunk.
    fn decode_entry(&self, entry: &ChunkEntry) -> Result<Vec<u8>> {
        let chunk = ChunkCoords::from(entry.coords.as_slice());
        let stored = self
            .store
            .fetch_bytes(entry.offset, entry.stored_len)
            .map_err(|e| Error::MissingChunk {
                chunk: chunk.clone(),
                reason: e.to_string(),
            })?;
        if stored.len() as u64 != entry.stored_len {
            return Err(Error::MissingChunk {
                chunk,
                reason: format!(
                    "store returned {} of {} bytes",
                    stored.len(),
                    entry.stored_len
                ),
            });
        }

        if self.config.verify_checksums && self.header.has_flag(FLAG_HAS_CHECKSUM) {
            let computed = xxh3_64(&stored);
            if computed != entry.checksum {
                return Err(Error::ChecksumMismatch {
                    chunk,
                    expected: entry.checksum,
                    actual: computed,
                });
            }
        }

        self.pipeline.decode_chunk(
            &stored,
            &self.meta.filters,
            entry.filter_mask,
            self.chunk_bytes,
            &chunk,
        )
    }

    /// Decode the elements of `region` into a dense row-major view.
    ///
    /// Only the chunks the region intersects are fetched. The call fails on
    /// the first chunk error and returns no partial data.
    pub fn read_region(&self, region: &Region) -> Result<ArrayView> {
        region.check_bounds(&self.meta.shape)?;
        let elem_size = self.meta.elem_size();
        let out_len = region
            .num_elements()
            .checked_mul(elem_size as u64)
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| Error::OutOfBounds {
                start: region.start.clone(),
                count: region.count.clone(),
                shape: self.meta.shape.clone(),
            })?;
        let mut out = self.fill.repeat(out_len / elem_size);

        let present: Vec<&ChunkEntry> = region
            .chunks_intersecting(&self.meta.chunk_shape)
            .iter()
            .filter_map(|coords| self.entry(coords))
            .collect();
        log::trace!(
            "region {:?}+{:?}: {} stored chunks intersect",
            region.start,
            region.count,
            present.len()
        );

        if self.config.parallel {
            let batch = rayon::current_num_threads().max(1) * 2;
            for entries in present.chunks(batch) {
                let decoded: Vec<Vec<u8>> = entries
                    .par_iter()
                    .map(|entry| self.decode_entry(entry))
                    .collect::<Result<_>>()?;
                for (entry, chunk) in entries.iter().zip(&decoded) {
                    self.scatter(&entry.coords, chunk, region, &mut out);
                }
            }
        } else {
            for entry in present {
                let chunk = self.decode_entry(entry)?;
                self.scatter(&entry.coords, &chunk, region, &mut out);
            }
        }

        Ok(ArrayView::new(
            region.count.clone(),
            self.meta.dtype,
            self.meta.byte_order,
            out,
        ))
    }

    /// Copy the part of a decoded chunk that overlaps `region` into `out`.
    fn scatter(&self, coords: &[u64], chunk: &[u8], region: &Region, out: &mut [u8]) {
        let chunk_box = chunk_region(coords, &self.meta.chunk_shape);
        if let Some(window) = chunk_box.intersect(region) {
            copy_window(
                chunk,
                BoxLayout {
                    origin: &chunk_box.start,
                    shape: &self.meta.chunk_shape,
                },
                out,
                BoxLayout {
                    origin: &region.start,
                    shape: &region.count,
                },
                &window,
                self.meta.elem_size(),
            );
        }
    }

    /// The whole array.
    pub fn read_full(&self) -> Result<ArrayView> {
        self.read_region(&Region::full(&self.meta.shape))
    }

    /// One element, decoded through a single-element region.
    pub fn get<T: Element>(&self, index: &[u64]) -> Result<T> {
        if T::DTYPE != self.meta.dtype {
            return Err(Error::TypeMismatch {
                expected: T::DTYPE,
                actual: self.meta.dtype,
            });
        }
        let view = self.read_region(&Region::point(index))?;
        view.get(&vec![0; index.len()])
    }
}
