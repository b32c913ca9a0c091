use serde::{Deserialize, Serialize};

use crate::codec::FilterSpec;
use crate::error::{Error, Result};
use crate::types::{ByteOrder, DType, FillValue};

/// Per-array facts stored in the container header: declared shape, chunk
/// shape, element type, fill value, and the filter pipeline in encode order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayMeta {
    pub shape: Vec<u64>,
    pub chunk_shape: Vec<u64>,
    pub dtype: DType,
    #[serde(default)]
    pub byte_order: ByteOrder,
    #[serde(default)]
    pub fill_value: FillValue,
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
}

impl ArrayMeta {
    pub fn new(shape: impl Into<Vec<u64>>, chunk_shape: impl Into<Vec<u64>>, dtype: DType) -> Self {
        Self {
            shape: shape.into(),
            chunk_shape: chunk_shape.into(),
            dtype,
            byte_order: ByteOrder::Little,
            fill_value: FillValue::default(),
            filters: Vec::new(),
        }
    }

    pub fn with_filter(mut self, spec: FilterSpec) -> Self {
        self.filters.push(spec);
        self
    }

    pub fn with_fill_value(mut self, fill: FillValue) -> Self {
        self.fill_value = fill;
        self
    }

    pub fn with_byte_order(mut self, order: ByteOrder) -> Self {
        self.byte_order = order;
        self
    }

    /// Check rank agreement, non-zero chunk dimensions, filter-mask capacity,
    /// that the fill value fits the element type, and that chunk and array
    /// byte sizes fit in `usize`.
    pub fn validate(&self) -> Result<()> {
        if self.shape.len() != self.chunk_shape.len() {
            return Err(Error::InvalidMetadata(format!(
                "shape has rank {} but chunk shape has rank {}",
                self.shape.len(),
                self.chunk_shape.len()
            )));
        }
        if self.chunk_shape.iter().any(|&c| c == 0) {
            return Err(Error::InvalidMetadata(format!(
                "chunk shape {:?} has a zero dimension",
                self.chunk_shape
            )));
        }
        if self.filters.len() > 32 {
            return Err(Error::InvalidMetadata(format!(
                "{} filters exceed the 32-entry filter mask",
                self.filters.len()
            )));
        }
        self.chunk_bytes()?;
        self.array_bytes()?;
        self.fill_bytes()?;
        Ok(())
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn elem_size(&self) -> usize {
        self.dtype.size()
    }

    /// Number of elements in the logical array. Only meaningful on
    /// validated metadata; saturates instead of overflowing.
    pub fn num_elements(&self) -> u64 {
        checked_product(&self.shape).unwrap_or(u64::MAX)
    }

    /// Number of elements in one (full-size) chunk. Saturates like
    /// [`num_elements`](Self::num_elements).
    pub fn chunk_elements(&self) -> u64 {
        checked_product(&self.chunk_shape).unwrap_or(u64::MAX)
    }

    /// Raw byte size of one decoded chunk.
    pub fn chunk_bytes(&self) -> Result<usize> {
        byte_size(&self.chunk_shape, self.elem_size()).ok_or_else(|| {
            Error::InvalidMetadata(format!(
                "chunk shape {:?} is too large to address",
                self.chunk_shape
            ))
        })
    }

    /// Raw byte size of the whole logical array.
    pub fn array_bytes(&self) -> Result<usize> {
        byte_size(&self.shape, self.elem_size()).ok_or_else(|| {
            Error::InvalidMetadata(format!(
                "shape {:?} of {} is too large to address",
                self.shape, self.dtype
            ))
        })
    }

    /// One element of the fill value in this array's byte order.
    pub fn fill_bytes(&self) -> Result<Vec<u8>> {
        self.fill_value.to_bytes(self.dtype, self.byte_order)
    }

    /// Number of chunks along each dimension (edge chunks included).
    pub fn grid_shape(&self) -> Vec<u64> {
        self.shape
            .iter()
            .zip(&self.chunk_shape)
            .map(|(&s, &c)| s.div_ceil(c))
            .collect()
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let meta: ArrayMeta = serde_json::from_slice(bytes)?;
        meta.validate()?;
        Ok(meta)
    }
}

fn checked_product(dims: &[u64]) -> Option<u64> {
    dims.iter().try_fold(1u64, |acc, &d| acc.checked_mul(d))
}

fn byte_size(dims: &[u64], elem_size: usize) -> Option<usize> {
    checked_product(dims)?
        .checked_mul(elem_size as u64)
        .and_then(|b| usize::try_from(b).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_shape_rounds_up_edge_chunks() {
        let meta = ArrayMeta::new([10, 7], [4, 7], DType::U8);
        assert_eq!(meta.grid_shape(), vec![3, 1]);
        assert_eq!(meta.chunk_bytes().unwrap(), 28);
    }

    #[test]
    fn validate_rejects_bad_shapes() {
        assert!(ArrayMeta::new([10, 7], [4], DType::U8).validate().is_err());
        assert!(ArrayMeta::new([10], [0], DType::U8).validate().is_err());
        assert!(ArrayMeta::new([10], [5], DType::U8)
            .with_fill_value(FillValue::Int(-3))
            .validate()
            .is_err());
        assert!(ArrayMeta::new([0], [5], DType::F32).validate().is_ok());
    }

    #[test]
    fn validate_rejects_unaddressable_sizes() {
        // Element count fits u64, byte count does not.
        let huge = ArrayMeta::new([1 << 62], [1024], DType::F64);
        assert!(matches!(huge.validate(), Err(Error::InvalidMetadata(_))));
        assert!(huge.array_bytes().is_err());

        // The element count itself overflows.
        let json = br#"{"shape":[4294967296,4294967296,2],"chunk_shape":[1,1,1],"dtype":"u8"}"#;
        assert!(matches!(
            ArrayMeta::from_json(json),
            Err(Error::InvalidMetadata(_))
        ));
        assert!(ArrayMeta::new([1 << 40, 1 << 40], [1, 1], DType::U8)
            .validate()
            .is_err());
    }

    #[test]
    fn json_round_trip_with_defaults() {
        let meta = ArrayMeta::new([100, 100, 100], [100, 100, 100], DType::F64)
            .with_filter(FilterSpec::new(32001, [2, 2, 8, 8_000_000, 5, 1, 1]));
        let json = meta.to_json().unwrap();
        assert_eq!(ArrayMeta::from_json(&json).unwrap(), meta);

        let minimal = br#"{"shape":[4],"chunk_shape":[2],"dtype":"u16"}"#;
        let parsed = ArrayMeta::from_json(minimal).unwrap();
        assert_eq!(parsed.byte_order, ByteOrder::Little);
        assert!(parsed.filters.is_empty());
    }
}
