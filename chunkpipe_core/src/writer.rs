use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use rayon::prelude::*;
use xxhash_rust::xxh3::xxh3_64;

use crate::config::WriterConfig;
use crate::error::{ChunkCoords, Error, Result};
use crate::format::{ChunkEntry, FileHeader, Footer, FLAG_HAS_CHECKSUM, FORMAT_VERSION, HEADER_SIZE};
use crate::grid::{chunk_region, coords_in_grid, copy_window, BoxLayout, Region};
use crate::meta::ArrayMeta;
use crate::pipeline::FilterPipeline;
use crate::registry::FilterRegistry;

/// Writer for chunked array files.
///
/// # Write contract
/// Call [`write_chunk`](Self::write_chunk) once per chunk to store, in any
/// order, or [`write_array`](Self::write_array) once with the whole array.
/// Chunks never written are sparse and read back as the fill value.
/// Call [`finish`](Self::finish) to append the chunk index and footer.
///
/// # Format layout written
/// ```text
/// [HEADER: 16 bytes] [META: JSON]
/// [CHUNK a] [CHUNK b] ...                 ← independently filtered chunks
/// [CHUNK INDEX: one entry per stored chunk]
/// [FOOTER: 16 bytes: index offset, entry count]
/// ```
pub struct ArrayWriter<'r, W: Write = BufWriter<File>> {
    out: W,
    meta: ArrayMeta,
    pipeline: FilterPipeline<'r>,
    config: WriterConfig,
    chunk_bytes: usize,
    fill_chunk: Vec<u8>,
    grid_shape: Vec<u64>,
    entries: Vec<ChunkEntry>,
    written: HashSet<Vec<u64>>,
    /// Current write position (mirrors the output cursor).
    current_offset: u64,
}

impl<'r> ArrayWriter<'r, BufWriter<File>> {
    /// Create a new array file at `path`, overwriting any existing file.
    pub fn create(
        path: impl AsRef<Path>,
        meta: ArrayMeta,
        registry: &'r FilterRegistry,
        config: WriterConfig,
    ) -> Result<Self> {
        let file = File::create(path)?;
        Self::new(BufWriter::new(file), meta, registry, config)
    }
}

impl<'r, W: Write> ArrayWriter<'r, W> {
    /// Start an array file on any byte sink; the header and metadata are
    /// written immediately.
    pub fn new(
        mut out: W,
        meta: ArrayMeta,
        registry: &'r FilterRegistry,
        config: WriterConfig,
    ) -> Result<Self> {
        meta.validate()?;
        for spec in &meta.filters {
            registry.lookup(spec.id)?;
        }

        let meta_json = meta.to_json()?;
        let header = FileHeader {
            version: FORMAT_VERSION,
            flags: if config.checksums { FLAG_HAS_CHECKSUM } else { 0 },
            meta_len: u32::try_from(meta_json.len())
                .map_err(|_| Error::InvalidMetadata("metadata too large".into()))?,
        };
        out.write_all(&header.to_bytes())?;
        out.write_all(&meta_json)?;

        let chunk_bytes = meta.chunk_bytes()?;
        let fill = meta.fill_bytes()?;
        let fill_chunk = fill.repeat(chunk_bytes / fill.len());

        Ok(Self {
            out,
            pipeline: FilterPipeline::new(registry),
            config,
            chunk_bytes,
            fill_chunk,
            grid_shape: meta.grid_shape(),
            entries: Vec::new(),
            written: HashSet::new(),
            current_offset: HEADER_SIZE + meta_json.len() as u64,
            meta,
        })
    }

    pub fn meta(&self) -> &ArrayMeta {
        &self.meta
    }

    /// Filter and store one full-size chunk. `raw` holds the chunk's
    /// elements row-major in the array's byte order; edge chunks are padded
    /// to full size by the caller.
    pub fn write_chunk(&mut self, coords: &[u64], raw: &[u8]) -> Result<()> {
        self.check_coords(coords)?;
        if raw.len() != self.chunk_bytes {
            return Err(Error::SizeMismatch {
                chunk: ChunkCoords::from(coords),
                expected: self.chunk_bytes,
                actual: raw.len(),
            });
        }
        let encoded = self.encoder().encode(coords, raw)?;
        self.store(coords, raw.len(), encoded)
    }

    /// Split a whole array (row-major, `shape` elements) into chunks and
    /// store them. Chunks are filtered in parallel and written in grid order.
    /// Returns the number of chunks stored.
    pub fn write_array(&mut self, data: &[u8]) -> Result<u64> {
        let expected = self.meta.array_bytes()?;
        if data.len() != expected {
            return Err(Error::SizeMismatch {
                chunk: ChunkCoords::default(),
                expected,
                actual: data.len(),
            });
        }

        let all_chunks = Region::full(&self.meta.shape).chunks_intersecting(&self.meta.chunk_shape);
        for coords in &all_chunks {
            self.check_coords(coords)?;
        }

        let batch = rayon::current_num_threads().max(1) * 2;
        let mut stored = 0u64;
        for coords_batch in all_chunks.chunks(batch) {
            let encoder = self.encoder();
            let encoded: Vec<Option<(Vec<u8>, u32)>> = coords_batch
                .par_iter()
                .map(|coords| encoder.encode(coords, &encoder.extract(data, coords)))
                .collect::<Result<_>>()?;

            for (coords, enc) in coords_batch.iter().zip(encoded) {
                if enc.is_some() {
                    stored += 1;
                }
                self.store(coords, self.chunk_bytes, enc)?;
            }
        }
        Ok(stored)
    }

    fn encoder(&self) -> ChunkEncoder<'_> {
        ChunkEncoder {
            meta: &self.meta,
            pipeline: self.pipeline,
            fill_chunk: &self.fill_chunk,
            skip_fill: self.config.skip_fill_chunks,
        }
    }

    fn check_coords(&self, coords: &[u64]) -> Result<()> {
        if !coords_in_grid(coords, &self.grid_shape) {
            return Err(Error::OutOfBounds {
                start: coords.to_vec(),
                count: vec![1; coords.len()],
                shape: self.grid_shape.clone(),
            });
        }
        if self.written.contains(coords) {
            return Err(Error::InvalidMetadata(format!(
                "chunk {} written twice",
                ChunkCoords::from(coords)
            )));
        }
        Ok(())
    }

    fn store(&mut self, coords: &[u64], raw_len: usize, encoded: Option<(Vec<u8>, u32)>) -> Result<()> {
        self.written.insert(coords.to_vec());
        let Some((stored, filter_mask)) = encoded else {
            log::trace!("chunk {} is all fill, not stored", ChunkCoords::from(coords));
            return Ok(());
        };

        let checksum = if self.config.checksums { xxh3_64(&stored) } else { 0 };
        self.out.write_all(&stored)?;
        self.entries.push(ChunkEntry {
            coords: coords.to_vec(),
            offset: self.current_offset,
            stored_len: stored.len() as u64,
            raw_len: raw_len as u64,
            filter_mask,
            checksum,
        });
        self.current_offset += stored.len() as u64;
        Ok(())
    }

    /// Write the chunk index and footer and flush. Returns the number of
    /// chunks stored.
    pub fn finish(self) -> Result<u64> {
        self.finish_into_inner().map(|(count, _)| count)
    }

    /// [`finish`](Self::finish), handing back the underlying sink.
    pub fn finish_into_inner(mut self) -> Result<(u64, W)> {
        // ── Chunk index ────────────────────────────────────────────────────
        let index_offset = self.current_offset;
        let mut index = Vec::with_capacity(
            self.entries.len() * ChunkEntry::encoded_size(self.meta.rank()) as usize,
        );
        for entry in &self.entries {
            entry.write_to(&mut index);
        }
        self.out.write_all(&index)?;

        // ── Footer ─────────────────────────────────────────────────────────
        let entry_count = self.entries.len() as u64;
        let footer = Footer {
            index_offset,
            entry_count,
        };
        self.out.write_all(&footer.to_bytes())?;
        self.out.flush()?;

        log::debug!(
            "sealed array file: {} chunks stored, {} bytes of chunk data",
            entry_count,
            index_offset
        );
        Ok((entry_count, self.out))
    }
}

/// The shareable, read-only half of the writer used from worker threads.
#[derive(Clone, Copy)]
struct ChunkEncoder<'a> {
    meta: &'a ArrayMeta,
    pipeline: FilterPipeline<'a>,
    fill_chunk: &'a [u8],
    skip_fill: bool,
}

impl ChunkEncoder<'_> {
    /// Copy the part of `data` covered by the chunk at `coords` into a
    /// fill-padded chunk buffer.
    fn extract(&self, data: &[u8], coords: &[u64]) -> Vec<u8> {
        let mut chunk = self.fill_chunk.to_vec();
        let region = chunk_region(coords, &self.meta.chunk_shape);
        let zeros = vec![0u64; self.meta.rank()];
        if let Some(window) = region.intersect(&Region::full(&self.meta.shape)) {
            copy_window(
                data,
                BoxLayout {
                    origin: &zeros,
                    shape: &self.meta.shape,
                },
                &mut chunk,
                BoxLayout {
                    origin: &region.start,
                    shape: &self.meta.chunk_shape,
                },
                &window,
                self.meta.elem_size(),
            );
        }
        chunk
    }

    /// Run the pipeline over one chunk. `None` means the chunk is all fill
    /// and sparse storage is enabled.
    fn encode(&self, coords: &[u64], raw: &[u8]) -> Result<Option<(Vec<u8>, u32)>> {
        if self.skip_fill && raw == self.fill_chunk {
            return Ok(None);
        }
        let chunk = ChunkCoords::from(coords);
        self.pipeline
            .encode_chunk(raw, &self.meta.filters, &chunk)
            .map(Some)
    }
}
