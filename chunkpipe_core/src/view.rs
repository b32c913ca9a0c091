use ndarray::{ArrayD, IxDyn};

use crate::error::{Error, Result};
use crate::types::{ByteOrder, DType, Element};

/// Decoded array region returned by the chunk reader. Immutable.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayView {
    shape: Vec<u64>,
    dtype: DType,
    byte_order: ByteOrder,
    bytes: Vec<u8>,
}

impl ArrayView {
    pub(crate) fn new(shape: Vec<u64>, dtype: DType, byte_order: ByteOrder, bytes: Vec<u8>) -> Self {
        debug_assert_eq!(
            bytes.len() as u64,
            shape.iter().product::<u64>() * dtype.size() as u64
        );
        Self {
            shape,
            dtype,
            byte_order,
            bytes,
        }
    }

    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn len(&self) -> usize {
        self.bytes.len() / self.dtype.size()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Raw element bytes, row-major, in `byte_order()`.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    fn check_type<T: Element>(&self) -> Result<()> {
        if T::DTYPE != self.dtype {
            return Err(Error::TypeMismatch {
                expected: T::DTYPE,
                actual: self.dtype,
            });
        }
        Ok(())
    }

    /// Element at `index` (relative to the view's origin).
    pub fn get<T: Element>(&self, index: &[u64]) -> Result<T> {
        self.check_type::<T>()?;
        let in_bounds =
            index.len() == self.shape.len() && index.iter().zip(&self.shape).all(|(&i, &s)| i < s);
        if !in_bounds {
            return Err(Error::OutOfBounds {
                start: index.to_vec(),
                count: vec![1; index.len()],
                shape: self.shape.clone(),
            });
        }
        let flat = index
            .iter()
            .zip(&self.shape)
            .fold(0u64, |acc, (&i, &s)| acc * s + i) as usize;
        let size = self.dtype.size();
        Ok(T::from_bytes(
            &self.bytes[flat * size..(flat + 1) * size],
            self.byte_order,
        ))
    }

    /// All elements in row-major order, converted to native values.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        self.check_type::<T>()?;
        Ok(self
            .bytes
            .chunks_exact(self.dtype.size())
            .map(|b| T::from_bytes(b, self.byte_order))
            .collect())
    }

    /// Convert to an owned n-dimensional `ndarray` array.
    pub fn to_ndarray<T: Element>(&self) -> Result<ArrayD<T>> {
        let values = self.to_vec::<T>()?;
        let shape: Vec<usize> = self.shape.iter().map(|&s| s as usize).collect();
        ArrayD::from_shape_vec(IxDyn(&shape), values)
            .map_err(|e| Error::InvalidMetadata(format!("cannot shape view as ndarray: {e}")))
    }
}
