//! Error types shared by the registry, the filter pipeline, and the chunk
//! reader/writer.

use std::fmt;

use thiserror::Error;

use crate::types::DType;

/// Chunk-grid coordinates attached to errors raised while handling a chunk.
///
/// Empty when the failing operation was not tied to a stored chunk (for
/// example a direct call to [`FilterPipeline::decode`](crate::FilterPipeline::decode)).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ChunkCoords(pub Vec<u64>);

impl fmt::Display for ChunkCoords {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("<none>");
        }
        f.write_str("(")?;
        for (i, c) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{c}")?;
        }
        f.write_str(")")
    }
}

impl From<&[u64]> for ChunkCoords {
    fn from(coords: &[u64]) -> Self {
        Self(coords.to_vec())
    }
}

/// Failure reported by a single filter's encode or decode routine.
///
/// Filters know nothing about chunks or registries; the pipeline wraps these
/// into [`Error`] with the filter id and chunk coordinates attached.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The input could not be parsed as this filter's frame/header structure.
    #[error("corrupt data: {0}")]
    Corrupt(String),

    /// The filter's parameters (HDF5 "client data") are unusable.
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    /// The filter cannot perform the requested direction or mode.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl CodecError {
    pub fn corrupt(reason: impl Into<String>) -> Self {
        Self::Corrupt(reason.into())
    }

    pub fn params(reason: impl Into<String>) -> Self {
        Self::InvalidParams(reason.into())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    // ── Registry ────────────────────────────────────────────────────────────
    #[error("unknown filter id {id}")]
    UnknownFilterId { id: u32 },

    #[error("filter id {id} is already registered")]
    DuplicateFilterId { id: u32 },

    #[error("the process-wide filter registry is already initialized")]
    RegistryInitialized,

    // ── Pipeline ────────────────────────────────────────────────────────────
    #[error("corrupt data in filter {filter_id} (chunk {chunk}): {reason}")]
    CorruptData {
        filter_id: u32,
        chunk: ChunkCoords,
        reason: String,
    },

    #[error("invalid parameters for filter {filter_id} (chunk {chunk}): {reason}")]
    InvalidFilterParams {
        filter_id: u32,
        chunk: ChunkCoords,
        reason: String,
    },

    #[error("filter {filter_id} does not support encoding")]
    EncodeUnsupported { filter_id: u32 },

    #[error("filter {filter_id} cannot handle this input (chunk {chunk}): {reason}")]
    UnsupportedFilterMode {
        filter_id: u32,
        chunk: ChunkCoords,
        reason: String,
    },

    #[error("chunk {chunk} decoded to {actual} bytes, expected {expected}")]
    SizeMismatch {
        chunk: ChunkCoords,
        expected: usize,
        actual: usize,
    },

    // ── Chunk reader / writer ───────────────────────────────────────────────
    #[error("region start {start:?} count {count:?} is out of bounds for shape {shape:?}")]
    OutOfBounds {
        start: Vec<u64>,
        count: Vec<u64>,
        shape: Vec<u64>,
    },

    #[error("chunk {chunk} is declared present but could not be read: {reason}")]
    MissingChunk { chunk: ChunkCoords, reason: String },

    #[error("chunk {chunk} checksum mismatch: expected {expected:016x}, got {actual:016x}")]
    ChecksumMismatch {
        chunk: ChunkCoords,
        expected: u64,
        actual: u64,
    },

    #[error("element type mismatch: array holds {actual}, requested {expected}")]
    TypeMismatch { expected: DType, actual: DType },

    #[error("invalid array metadata: {0}")]
    InvalidMetadata(String),

    #[error("invalid container file: {0}")]
    InvalidFormat(String),

    // ── External ────────────────────────────────────────────────────────────
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Attach filter id and chunk coordinates to a codec failure.
    pub(crate) fn from_codec(err: CodecError, filter_id: u32, chunk: &ChunkCoords) -> Self {
        match err {
            CodecError::Corrupt(reason) => Error::CorruptData {
                filter_id,
                chunk: chunk.clone(),
                reason,
            },
            CodecError::InvalidParams(reason) => Error::InvalidFilterParams {
                filter_id,
                chunk: chunk.clone(),
                reason,
            },
            CodecError::Unsupported(reason) => Error::UnsupportedFilterMode {
                filter_id,
                chunk: chunk.clone(),
                reason,
            },
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_coords_display() {
        assert_eq!(ChunkCoords(vec![]).to_string(), "<none>");
        assert_eq!(ChunkCoords(vec![0, 3, 7]).to_string(), "(0, 3, 7)");
    }

    #[test]
    fn codec_errors_carry_filter_and_chunk() {
        let chunk = ChunkCoords(vec![1, 2]);
        let err = Error::from_codec(CodecError::corrupt("bad header"), 32001, &chunk);
        let msg = err.to_string();
        assert!(msg.contains("32001"), "{msg}");
        assert!(msg.contains("(1, 2)"), "{msg}");
        assert!(msg.contains("bad header"), "{msg}");
        assert!(matches!(err, Error::CorruptData { filter_id: 32001, .. }));
    }
}
