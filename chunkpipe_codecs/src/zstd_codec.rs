use std::io::Read;

use chunkpipe_core::{CodecError, Filter};

use crate::frame::{param, MAX_PREALLOC};
use crate::FILTER_ZSTD;

/// Zstandard filter (HDF5 id 32015).
///
/// Each chunk is one zstd frame. Parameter 0 is the compression level
/// (1 = fast / larger, 22 = slow / smallest), default 3.
pub struct ZstdFilter;

impl Filter for ZstdFilter {
    fn id(&self) -> u32 {
        FILTER_ZSTD
    }

    fn name(&self) -> &'static str {
        "zstd"
    }

    fn decode(&self, input: &[u8], params: &[u32]) -> Result<Vec<u8>, CodecError> {
        self.decode_bounded(input, params, usize::MAX)
    }

    fn decode_bounded(&self, input: &[u8], _params: &[u32], limit: usize) -> Result<Vec<u8>, CodecError> {
        // The frame may omit its content size, so stream-decode instead of
        // sizing the output up front.
        decompress_bounded(input, limit, "zstd")
    }

    fn encode(&self, input: &[u8], params: &[u32]) -> Result<Vec<u8>, CodecError> {
        let level = param(params, 0, 3) as i32;
        zstd::bulk::compress(input, level)
            .map_err(|e| CodecError::params(format!("zstd level {level}: {e}")))
    }

    fn can_encode(&self) -> bool {
        true
    }
}

/// Stream-decode zstd data, failing once more than `limit` bytes come out.
fn decompress_bounded(payload: &[u8], limit: usize, what: &str) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(limit.min(payload.len().saturating_mul(4)).min(MAX_PREALLOC));
    zstd::stream::read::Decoder::new(payload)
        .and_then(|d| d.take((limit as u64).saturating_add(1)).read_to_end(&mut out))
        .map_err(|e| CodecError::corrupt(format!("{what}: {e}")))?;
    if out.len() > limit {
        return Err(CodecError::corrupt(format!(
            "{what} output exceeds {limit} bytes"
        )));
    }
    Ok(out)
}

/// Decode one zstd frame that must expand to exactly `expected` bytes,
/// reading at most one byte past it.
pub(crate) fn decompress_exact(payload: &[u8], expected: usize, what: &str) -> Result<Vec<u8>, CodecError> {
    let out = decompress_bounded(payload, expected, what)?;
    if out.len() != expected {
        return Err(CodecError::corrupt(format!(
            "{what} decoded to {} bytes, expected {expected}",
            out.len()
        )));
    }
    Ok(out)
}
