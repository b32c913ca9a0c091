use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Element type of a stored array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl DType {
    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            DType::U8 | DType::I8 => 1,
            DType::U16 | DType::I16 => 2,
            DType::U32 | DType::I32 | DType::F32 => 4,
            DType::U64 | DType::I64 | DType::F64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }

    pub fn is_signed(self) -> bool {
        matches!(self, DType::I8 | DType::I16 | DType::I32 | DType::I64)
    }

    pub fn name(self) -> &'static str {
        match self {
            DType::U8 => "u8",
            DType::U16 => "u16",
            DType::U32 => "u32",
            DType::U64 => "u64",
            DType::I8 => "i8",
            DType::I16 => "i16",
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::F32 => "f32",
            DType::F64 => "f64",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        let dtype = match name.to_ascii_lowercase().as_str() {
            "u8" | "uint8" => DType::U8,
            "u16" | "uint16" => DType::U16,
            "u32" | "uint32" => DType::U32,
            "u64" | "uint64" => DType::U64,
            "i8" | "int8" => DType::I8,
            "i16" | "int16" => DType::I16,
            "i32" | "int32" => DType::I32,
            "i64" | "int64" => DType::I64,
            "f32" | "float32" => DType::F32,
            "f64" | "float64" => DType::F64,
            _ => return None,
        };
        Some(dtype)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

impl ByteOrder {
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }
}

/// Value returned for positions whose chunk was never written.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FillValue {
    UInt(u64),
    Int(i64),
    Float(f64),
}

impl Default for FillValue {
    fn default() -> Self {
        FillValue::UInt(0)
    }
}

impl FillValue {
    /// Encode as one element of `dtype` in `order`.
    pub fn to_bytes(self, dtype: DType, order: ByteOrder) -> Result<Vec<u8>> {
        macro_rules! int {
            ($t:ty) => {{
                let v: $t = match self {
                    FillValue::UInt(v) => <$t>::try_from(v).ok(),
                    FillValue::Int(v) => <$t>::try_from(v).ok(),
                    FillValue::Float(v) if v.fract() == 0.0 => <$t>::try_from(v as i128).ok(),
                    FillValue::Float(_) => None,
                }
                .ok_or_else(|| {
                    Error::InvalidMetadata(format!("fill value {:?} does not fit {}", self, dtype))
                })?;
                element_bytes(v, order)
            }};
        }
        let bytes = match dtype {
            DType::U8 => int!(u8),
            DType::U16 => int!(u16),
            DType::U32 => int!(u32),
            DType::U64 => int!(u64),
            DType::I8 => int!(i8),
            DType::I16 => int!(i16),
            DType::I32 => int!(i32),
            DType::I64 => int!(i64),
            DType::F32 => element_bytes(self.as_f64() as f32, order),
            DType::F64 => element_bytes(self.as_f64(), order),
        };
        Ok(bytes)
    }

    fn as_f64(self) -> f64 {
        match self {
            FillValue::UInt(v) => v as f64,
            FillValue::Int(v) => v as f64,
            FillValue::Float(v) => v,
        }
    }
}

fn element_bytes<T: Element>(v: T, order: ByteOrder) -> Vec<u8> {
    let mut out = vec![0u8; T::DTYPE.size()];
    v.write_bytes(order, &mut out);
    out
}

/// Rust scalar types that can be read out of an array's bytes.
pub trait Element: Copy + Send + Sync + fmt::Debug + 'static {
    const DTYPE: DType;

    /// Decode from exactly `DTYPE.size()` bytes.
    fn from_bytes(bytes: &[u8], order: ByteOrder) -> Self;

    /// Encode into exactly `DTYPE.size()` bytes.
    fn write_bytes(self, order: ByteOrder, out: &mut [u8]);
}

macro_rules! impl_element {
    ($($t:ty => $d:ident),* $(,)?) => {$(
        impl Element for $t {
            const DTYPE: DType = DType::$d;

            #[inline]
            fn from_bytes(bytes: &[u8], order: ByteOrder) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$t>()];
                buf.copy_from_slice(bytes);
                match order {
                    ByteOrder::Little => <$t>::from_le_bytes(buf),
                    ByteOrder::Big => <$t>::from_be_bytes(buf),
                }
            }

            #[inline]
            fn write_bytes(self, order: ByteOrder, out: &mut [u8]) {
                let bytes = match order {
                    ByteOrder::Little => self.to_le_bytes(),
                    ByteOrder::Big => self.to_be_bytes(),
                };
                out.copy_from_slice(&bytes);
            }
        }
    )*};
}

impl_element!(
    u8 => U8, u16 => U16, u32 => U32, u64 => U64,
    i8 => I8, i16 => I16, i32 => I32, i64 => I64,
    f32 => F32, f64 => F64,
);

/// Serialize a slice of elements into array bytes.
pub fn elements_to_bytes<T: Element>(values: &[T], order: ByteOrder) -> Vec<u8> {
    let size = T::DTYPE.size();
    let mut out = vec![0u8; values.len() * size];
    for (v, dst) in values.iter().zip(out.chunks_exact_mut(size)) {
        v.write_bytes(order, dst);
    }
    out
}
