use crate::codec::{filter_skipped, FilterSpec};
use crate::error::{ChunkCoords, Error, Result};
use crate::registry::FilterRegistry;

/// Headroom over the raw chunk size allowed for any single decode stage.
const STAGE_SLACK: usize = 64 << 10;

/// Largest output one decode stage may produce for a chunk of `expected`
/// raw bytes. Inner stages may carry framing on top of the raw size.
pub fn stage_limit(expected: usize) -> usize {
    expected.saturating_add(expected / 64).saturating_add(STAGE_SLACK)
}

/// Runs an ordered list of filters over one chunk's bytes.
///
/// Filters are listed in encode order. Decoding walks the list backwards, so
/// the filter applied last at encode time is the first one undone.
#[derive(Debug, Clone, Copy)]
pub struct FilterPipeline<'r> {
    registry: &'r FilterRegistry,
}

impl<'r> FilterPipeline<'r> {
    pub fn new(registry: &'r FilterRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &'r FilterRegistry {
        self.registry
    }

    /// Decode `raw` through `specs` and check the result is
    /// `expected_raw_size` bytes long. An empty `specs` is the identity.
    ///
    /// No stage may produce more than [`stage_limit`] of the expected size.
    pub fn decode(&self, raw: &[u8], specs: &[FilterSpec], expected_raw_size: usize) -> Result<Vec<u8>> {
        self.decode_chunk(raw, specs, 0, expected_raw_size, &ChunkCoords::default())
    }

    /// [`decode`](Self::decode) for a stored chunk: filters whose bit is set
    /// in `filter_mask` were skipped at encode time and are not undone, and
    /// errors carry `chunk`.
    pub fn decode_chunk(
        &self,
        raw: &[u8],
        specs: &[FilterSpec],
        filter_mask: u32,
        expected_raw_size: usize,
        chunk: &ChunkCoords,
    ) -> Result<Vec<u8>> {
        let mut current: Option<Vec<u8>> = None;
        let limit = stage_limit(expected_raw_size);

        for (index, spec) in specs.iter().enumerate().rev() {
            if filter_skipped(filter_mask, index) {
                continue;
            }
            let filter = self.registry.lookup(spec.id)?;
            let input = current.as_deref().unwrap_or(raw);
            let decoded = filter
                .decode_bounded(input, &spec.params, limit)
                .map_err(|e| Error::from_codec(e, spec.id, chunk))?;
            log::trace!(
                "chunk {}: {} decoded {} -> {} bytes",
                chunk,
                filter.name(),
                input.len(),
                decoded.len()
            );
            current = Some(decoded);
        }

        let decoded = current.unwrap_or_else(|| raw.to_vec());
        if decoded.len() != expected_raw_size {
            return Err(Error::SizeMismatch {
                chunk: chunk.clone(),
                expected: expected_raw_size,
                actual: decoded.len(),
            });
        }
        Ok(decoded)
    }

    /// Encode `raw` through `specs` in order.
    ///
    /// Returns the stored bytes and the filter mask. An optional filter that
    /// fails, or whose output is not smaller than its input, is skipped and
    /// its bit set in the mask; a mandatory filter failure aborts.
    pub fn encode(&self, raw: &[u8], specs: &[FilterSpec]) -> Result<(Vec<u8>, u32)> {
        self.encode_chunk(raw, specs, &ChunkCoords::default())
    }

    pub fn encode_chunk(
        &self,
        raw: &[u8],
        specs: &[FilterSpec],
        chunk: &ChunkCoords,
    ) -> Result<(Vec<u8>, u32)> {
        let mut current = raw.to_vec();
        let mut mask = 0u32;

        for (index, spec) in specs.iter().enumerate() {
            let filter = self.registry.lookup(spec.id)?;
            if !filter.can_encode() {
                if spec.optional && index < 32 {
                    log::warn!(
                        "chunk {}: optional filter {} is decode-only, skipping",
                        chunk,
                        spec.id
                    );
                    mask |= 1 << index;
                    continue;
                }
                return Err(Error::EncodeUnsupported { filter_id: spec.id });
            }
            match filter.encode(&current, &spec.params) {
                Ok(encoded) if spec.optional && encoded.len() >= current.len() => {
                    log::debug!(
                        "chunk {}: optional filter {} did not shrink data ({} -> {}), skipping",
                        chunk,
                        filter.name(),
                        current.len(),
                        encoded.len()
                    );
                    mask |= 1 << index;
                }
                Ok(encoded) => {
                    log::trace!(
                        "chunk {}: {} encoded {} -> {} bytes",
                        chunk,
                        filter.name(),
                        current.len(),
                        encoded.len()
                    );
                    current = encoded;
                }
                Err(e) if spec.optional => {
                    log::warn!(
                        "chunk {}: optional filter {} failed ({}), skipping",
                        chunk,
                        filter.name(),
                        e
                    );
                    mask |= 1 << index;
                }
                Err(e) => return Err(Error::from_codec(e, spec.id, chunk)),
            }
        }

        Ok((current, mask))
    }
}
