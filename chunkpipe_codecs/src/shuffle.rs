use chunkpipe_core::{CodecError, Filter};

use crate::frame::param;
use crate::FILTER_SHUFFLE;

/// HDF5 byte-shuffle filter.
///
/// Regroups bytes so that byte 0 of every element comes first, then byte 1
/// of every element, and so on. On typed numeric data the high-order bytes
/// end up in long, similar runs that a following compressor handles well.
///
/// Parameter 0 is the element size in bytes. Sizes of 0 or 1 leave the data
/// unchanged, as do inputs shorter than one element.
pub struct ShuffleFilter;

impl Filter for ShuffleFilter {
    fn id(&self) -> u32 {
        FILTER_SHUFFLE
    }

    fn name(&self) -> &'static str {
        "shuffle"
    }

    fn decode(&self, input: &[u8], params: &[u32]) -> Result<Vec<u8>, CodecError> {
        Ok(unshuffle(input, param(params, 0, 1) as usize))
    }

    fn encode(&self, input: &[u8], params: &[u32]) -> Result<Vec<u8>, CodecError> {
        Ok(shuffle(input, param(params, 0, 1) as usize))
    }

    fn can_encode(&self) -> bool {
        true
    }
}

/// Byte-shuffle `src`. Trailing bytes that do not fill a whole element are
/// copied unchanged.
pub fn shuffle(src: &[u8], elem_size: usize) -> Vec<u8> {
    let mut dst = src.to_vec();
    if elem_size > 1 {
        let n = src.len() / elem_size;
        for j in 0..elem_size {
            for i in 0..n {
                dst[j * n + i] = src[i * elem_size + j];
            }
        }
    }
    dst
}

/// Inverse of [`shuffle`].
pub fn unshuffle(src: &[u8], elem_size: usize) -> Vec<u8> {
    let mut dst = src.to_vec();
    if elem_size > 1 {
        let n = src.len() / elem_size;
        for i in 0..n {
            for j in 0..elem_size {
                dst[i * elem_size + j] = src[j * n + i];
            }
        }
    }
    dst
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_bytes_by_significance() {
        let src = [0x01, 0x00, 0x02, 0x00, 0x03, 0x00, 0xAA];
        let shuffled = shuffle(&src, 2);
        assert_eq!(shuffled, vec![0x01, 0x02, 0x03, 0x00, 0x00, 0x00, 0xAA]);
        assert_eq!(unshuffle(&shuffled, 2), src);
    }

    #[test]
    fn element_size_one_is_identity() {
        let src = b"unchanged".to_vec();
        assert_eq!(ShuffleFilter.encode(&src, &[1]).unwrap(), src);
        assert_eq!(ShuffleFilter.decode(&src, &[]).unwrap(), src);
        assert_eq!(shuffle(&src, 16), src);
    }
}
