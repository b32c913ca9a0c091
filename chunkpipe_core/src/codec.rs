use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// Core filter abstraction: one reversible byte transformation.
///
/// Each `Filter` implementation:
/// - Is identified by a stable numeric `id()` stored in the array metadata
///   (the HDF5 registered filter ids are used where one exists).
/// - Works on one chunk at a time with no state carried between calls, so any
///   number of chunks can be decoded concurrently through the same instance.
/// - Receives its configuration as an ordered list of `u32` parameters, the
///   same "client data" convention HDF5 filters use.
///
/// Decoding is mandatory. Encoding is optional: decode-only filters keep the
/// default `encode` and `can_encode`.
pub trait Filter: Send + Sync {
    /// Stable filter ID stored in the array metadata.
    fn id(&self) -> u32;

    /// Human-readable filter name for CLI display and name lookup.
    fn name(&self) -> &'static str;

    /// Revision of this filter's stored format.
    fn version(&self) -> u32 {
        1
    }

    /// Undo this filter on one chunk's bytes.
    fn decode(&self, input: &[u8], params: &[u32]) -> Result<Vec<u8>, CodecError>;

    /// [`decode`](Self::decode), producing at most `limit` bytes.
    ///
    /// Filters whose output size is not fixed by their own framing (plain
    /// zlib or zstd streams) must stop once `limit` is exceeded and return
    /// [`CodecError::Corrupt`]. The default defers to `decode`.
    fn decode_bounded(
        &self,
        input: &[u8],
        params: &[u32],
        limit: usize,
    ) -> Result<Vec<u8>, CodecError> {
        let _ = limit;
        self.decode(input, params)
    }

    /// Apply this filter to one chunk's bytes.
    fn encode(&self, input: &[u8], params: &[u32]) -> Result<Vec<u8>, CodecError> {
        let _ = (input, params);
        Err(CodecError::Unsupported(format!(
            "filter '{}' is decode-only",
            self.name()
        )))
    }

    /// Whether `encode` is implemented.
    fn can_encode(&self) -> bool {
        false
    }

    /// Descriptor snapshot used for listings and equality checks.
    fn info(&self) -> FilterInfo {
        FilterInfo {
            id: self.id(),
            name: self.name(),
            version: self.version(),
            can_encode: self.can_encode(),
        }
    }
}

/// Plain-data description of a registered filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterInfo {
    pub id: u32,
    pub name: &'static str,
    pub version: u32,
    pub can_encode: bool,
}

/// One filter application with its configuration, as recorded in the array
/// metadata in encode order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub id: u32,
    #[serde(default)]
    pub params: Vec<u32>,
    /// An optional filter that fails or does not shrink a chunk is skipped for
    /// that chunk; the skip is recorded in the chunk's filter mask.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,
}

impl FilterSpec {
    pub fn new(id: u32, params: impl Into<Vec<u32>>) -> Self {
        Self {
            id,
            params: params.into(),
            optional: false,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// Bit `i` set in a filter mask means filter `i` of the pipeline was skipped
/// when the chunk was encoded.
pub fn filter_skipped(mask: u32, index: usize) -> bool {
    index < 32 && mask & (1 << index) != 0
}

/// The filters actually applied to a chunk: the array pipeline minus the ones
/// masked out for that chunk, still in encode order.
pub fn applied_filters(pipeline: &[FilterSpec], mask: u32) -> Vec<FilterSpec> {
    pipeline
        .iter()
        .enumerate()
        .filter(|(i, _)| !filter_skipped(mask, *i))
        .map(|(_, spec)| spec.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_removes_skipped_filters() {
        let pipeline = vec![
            FilterSpec::new(2, [4]),
            FilterSpec::new(32004, []).optional(),
            FilterSpec::new(3, []),
        ];
        let applied = applied_filters(&pipeline, 0b010);
        assert_eq!(applied.len(), 2);
        assert_eq!(applied[0].id, 2);
        assert_eq!(applied[1].id, 3);
        assert_eq!(applied_filters(&pipeline, 0), pipeline);
    }

    #[test]
    fn optional_flag_is_omitted_from_json_when_false() {
        let json = serde_json::to_string(&FilterSpec::new(1, [6])).unwrap();
        assert_eq!(json, r#"{"id":1,"params":[6]}"#);
        let back: FilterSpec = serde_json::from_str(r#"{"id":32008}"#).unwrap();
        assert_eq!(back, FilterSpec::new(32008, []));
    }
}
