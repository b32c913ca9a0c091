use std::io::{Read, Write};

use chunkpipe_core::{CodecError, Filter};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::frame::{param, MAX_PREALLOC};
use crate::FILTER_DEFLATE;

/// HDF5 deflate filter (id 1): a zlib stream. Parameter 0 is the level,
/// 0–9, default 6.
pub struct DeflateFilter;

impl Filter for DeflateFilter {
    fn id(&self) -> u32 {
        FILTER_DEFLATE
    }

    fn name(&self) -> &'static str {
        "deflate"
    }

    fn decode(&self, input: &[u8], params: &[u32]) -> Result<Vec<u8>, CodecError> {
        self.decode_bounded(input, params, usize::MAX)
    }

    fn decode_bounded(&self, input: &[u8], _params: &[u32], limit: usize) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(input.len().saturating_mul(4).min(limit).min(MAX_PREALLOC));
        ZlibDecoder::new(input)
            .take((limit as u64).saturating_add(1))
            .read_to_end(&mut out)
            .map_err(|e| CodecError::corrupt(format!("deflate: {e}")))?;
        if out.len() > limit {
            return Err(CodecError::corrupt(format!(
                "deflate output exceeds {limit} bytes"
            )));
        }
        Ok(out)
    }

    fn encode(&self, input: &[u8], params: &[u32]) -> Result<Vec<u8>, CodecError> {
        let level = param(params, 0, 6);
        if level > 9 {
            return Err(CodecError::params(format!("deflate level {level} is not 0-9")));
        }
        let mut enc = ZlibEncoder::new(Vec::with_capacity(input.len() / 2), Compression::new(level));
        enc.write_all(input)
            .map_err(|e| CodecError::corrupt(format!("deflate: {e}")))?;
        enc.finish()
            .map_err(|e| CodecError::corrupt(format!("deflate: {e}")))
    }

    fn can_encode(&self) -> bool {
        true
    }
}
