use std::ops::Range;

use chunkpipe_core::{CodecError, Filter};

use crate::frame::{param, to_usize, FrameReader, MAX_PREALLOC};
use crate::zstd_codec::decompress_exact;
use crate::FILTER_BITSHUFFLE;

/// Compression applied to each bit-shuffled block (parameter 4).
pub const BSHUF_NONE: u32 = 0;
pub const BSHUF_LZ4: u32 = 2;
pub const BSHUF_ZSTD: u32 = 3;

const TARGET_BLOCK_BYTES: usize = 8192;
const MIN_BLOCK_ELEMS: usize = 128;

/// Bitshuffle filter (HDF5 id 32008), optionally LZ4 or zstd compressed.
///
/// Parameters: `[major, minor, elem_size, block_elems, compression, zstd_level]`.
/// Only `elem_size` is required. `block_elems` of 0 picks the default block
/// size, and must be a multiple of 8 otherwise.
///
/// Uncompressed, the output has the same length as the input. Compressed,
/// the frame is:
/// ```text
/// [raw_size: u64 BE] [block_bytes: u32 BE]
/// { [csize: u32 BE] [payload] }*   one per whole block of shuffled elements
/// [leftover bytes]                  the trailing len % (8 * elem_size) bytes
/// ```
pub struct BitshuffleFilter;

impl Filter for BitshuffleFilter {
    fn id(&self) -> u32 {
        FILTER_BITSHUFFLE
    }

    fn name(&self) -> &'static str {
        "bitshuffle"
    }

    fn decode(&self, input: &[u8], params: &[u32]) -> Result<Vec<u8>, CodecError> {
        let p = Params::parse(params)?;
        match p.compression {
            BSHUF_NONE => Ok(bitunshuffle(input, p.elem_size, p.block_elems())),
            BSHUF_LZ4 | BSHUF_ZSTD => decode_compressed(input, &p),
            other => Err(CodecError::Unsupported(format!(
                "bitshuffle compression {other}"
            ))),
        }
    }

    fn encode(&self, input: &[u8], params: &[u32]) -> Result<Vec<u8>, CodecError> {
        let p = Params::parse(params)?;
        match p.compression {
            BSHUF_NONE => Ok(bitshuffle(input, p.elem_size, p.block_elems())),
            BSHUF_LZ4 | BSHUF_ZSTD => encode_compressed(input, &p),
            other => Err(CodecError::Unsupported(format!(
                "bitshuffle compression {other}"
            ))),
        }
    }

    fn can_encode(&self) -> bool {
        true
    }
}

struct Params {
    elem_size: usize,
    block_elems: usize,
    compression: u32,
    zstd_level: i32,
}

impl Params {
    fn parse(params: &[u32]) -> Result<Self, CodecError> {
        let elem_size = param(params, 2, 0) as usize;
        if elem_size == 0 {
            return Err(CodecError::params("bitshuffle needs a non-zero element size"));
        }
        let block_elems = param(params, 3, 0) as usize;
        if block_elems % 8 != 0 {
            return Err(CodecError::params(format!(
                "bitshuffle block size {block_elems} is not a multiple of 8"
            )));
        }
        Ok(Self {
            elem_size,
            block_elems,
            compression: param(params, 4, BSHUF_NONE),
            zstd_level: param(params, 5, 3) as i32,
        })
    }

    /// Block size in elements, applying the default when unset.
    fn block_elems(&self) -> usize {
        if self.block_elems != 0 {
            return self.block_elems;
        }
        default_block_elems(self.elem_size)
    }
}

/// Default block size: about 8 KiB of elements, a multiple of 8, at least 128.
pub fn default_block_elems(elem_size: usize) -> usize {
    (TARGET_BLOCK_BYTES / elem_size.max(1) / 8 * 8).max(MIN_BLOCK_ELEMS)
}

/// Transpose an 8×8 bit matrix held one row per byte (little-endian):
/// afterwards byte `k` bit `m` is the old byte `m` bit `k`.
fn trans_bit_8x8(mut x: u64) -> u64 {
    let mut t = (x ^ (x >> 7)) & 0x00AA_00AA_00AA_00AA;
    x = x ^ t ^ (t << 7);
    t = (x ^ (x >> 14)) & 0x0000_CCCC_0000_CCCC;
    x = x ^ t ^ (t << 14);
    t = (x ^ (x >> 28)) & 0x0000_0000_F0F0_F0F0;
    x ^ t ^ (t << 28)
}

/// Bit-transpose `n` elements (`n % 8 == 0`) of `src` into `dst`.
///
/// Output row `8 * j + k` holds bit `k` of byte `j` of every element, eight
/// elements per output byte.
fn trans_bit_elem(src: &[u8], dst: &mut [u8], n: usize, elem_size: usize) {
    let row_bytes = n / 8;
    for j in 0..elem_size {
        for b in 0..row_bytes {
            let mut gathered = [0u8; 8];
            for (m, g) in gathered.iter_mut().enumerate() {
                *g = src[(8 * b + m) * elem_size + j];
            }
            let rows = trans_bit_8x8(u64::from_le_bytes(gathered)).to_le_bytes();
            for (k, byte) in rows.iter().enumerate() {
                dst[(8 * j + k) * row_bytes + b] = *byte;
            }
        }
    }
}

/// Inverse of [`trans_bit_elem`].
fn untrans_bit_elem(src: &[u8], dst: &mut [u8], n: usize, elem_size: usize) {
    let row_bytes = n / 8;
    for j in 0..elem_size {
        for b in 0..row_bytes {
            let mut rows = [0u8; 8];
            for (k, r) in rows.iter_mut().enumerate() {
                *r = src[(8 * j + k) * row_bytes + b];
            }
            let gathered = trans_bit_8x8(u64::from_le_bytes(rows)).to_le_bytes();
            for (m, byte) in gathered.iter().enumerate() {
                dst[(8 * b + m) * elem_size + j] = *byte;
            }
        }
    }
}

/// Bit-shuffle a single block. The last `n % 8` elements and any trailing
/// partial element are copied unchanged.
pub fn bitshuffle_block(src: &[u8], elem_size: usize) -> Vec<u8> {
    let mut dst = src.to_vec();
    let n = src.len() / elem_size / 8 * 8;
    trans_bit_elem(src, &mut dst, n, elem_size);
    dst
}

/// Inverse of [`bitshuffle_block`].
pub fn bitunshuffle_block(src: &[u8], elem_size: usize) -> Vec<u8> {
    let mut dst = src.to_vec();
    let n = src.len() / elem_size / 8 * 8;
    untrans_bit_elem(src, &mut dst, n, elem_size);
    dst
}

/// Byte ranges of the whole blocks of a `len`-byte buffer. The last block is
/// shortened to a multiple of 8 elements; bytes past the final range are
/// leftovers.
fn block_ranges(len: usize, elem_size: usize, block_elems: usize) -> impl Iterator<Item = Range<usize>> {
    let n = len / elem_size;
    let mut start = 0;
    std::iter::from_fn(move || {
        let count = (n - start).min(block_elems) / 8 * 8;
        if count == 0 {
            return None;
        }
        let range = start * elem_size..(start + count) * elem_size;
        start += count;
        Some(range)
    })
}

/// Length of the part of a `len`-byte buffer covered by whole blocks.
fn shuffled_len(len: usize, elem_size: usize) -> usize {
    len / elem_size / 8 * 8 * elem_size
}

/// Blocked bitshuffle of a whole buffer.
pub fn bitshuffle(src: &[u8], elem_size: usize, block_elems: usize) -> Vec<u8> {
    let mut dst = src.to_vec();
    for range in block_ranges(src.len(), elem_size, block_elems) {
        trans_bit_elem(&src[range.clone()], &mut dst[range.clone()], range.len() / elem_size, elem_size);
    }
    dst
}

/// Inverse of [`bitshuffle`].
pub fn bitunshuffle(src: &[u8], elem_size: usize, block_elems: usize) -> Vec<u8> {
    let mut dst = src.to_vec();
    for range in block_ranges(src.len(), elem_size, block_elems) {
        untrans_bit_elem(&src[range.clone()], &mut dst[range.clone()], range.len() / elem_size, elem_size);
    }
    dst
}

fn encode_compressed(input: &[u8], p: &Params) -> Result<Vec<u8>, CodecError> {
    let block_elems = p.block_elems();
    let block_bytes = u32::try_from(block_elems * p.elem_size)
        .map_err(|_| CodecError::params("bitshuffle block is larger than 4 GiB"))?;

    let mut out = Vec::with_capacity(input.len() / 2 + 12);
    out.extend_from_slice(&(input.len() as u64).to_be_bytes());
    out.extend_from_slice(&block_bytes.to_be_bytes());

    for range in block_ranges(input.len(), p.elem_size, block_elems) {
        let shuffled = bitshuffle_block(&input[range], p.elem_size);
        let payload = match p.compression {
            BSHUF_LZ4 => lz4_flex::block::compress(&shuffled),
            _ => zstd::bulk::compress(&shuffled, p.zstd_level)
                .map_err(|e| CodecError::params(format!("zstd level {}: {e}", p.zstd_level)))?,
        };
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&payload);
    }
    out.extend_from_slice(&input[shuffled_len(input.len(), p.elem_size)..]);
    Ok(out)
}

fn decode_compressed(input: &[u8], p: &Params) -> Result<Vec<u8>, CodecError> {
    let mut r = FrameReader::new(input, "bitshuffle frame");
    let raw_size = to_usize(r.u64_be()?, "bitshuffle raw size")?;
    let block_bytes = r.u32_be()? as usize;
    if block_bytes == 0 || block_bytes % (8 * p.elem_size) != 0 {
        return Err(CodecError::corrupt(format!(
            "bitshuffle block of {block_bytes} bytes is not a whole number of 8-element groups"
        )));
    }

    let mut out = Vec::with_capacity(raw_size.min(MAX_PREALLOC));
    for range in block_ranges(raw_size, p.elem_size, block_bytes / p.elem_size) {
        let csize = r.u32_be()? as usize;
        let payload = r.take(csize)?;
        if p.compression == BSHUF_LZ4 && range.len() > payload.len().saturating_mul(255) + 16 {
            return Err(CodecError::corrupt(format!(
                "bitshuffle lz4 block of {csize} bytes cannot expand to {}",
                range.len()
            )));
        }
        let shuffled = match p.compression {
            BSHUF_LZ4 => lz4_flex::block::decompress(payload, range.len())
                .map_err(|e| CodecError::corrupt(format!("bitshuffle lz4 block: {e}")))?,
            _ => decompress_exact(payload, range.len(), "bitshuffle zstd block")?,
        };
        if shuffled.len() != range.len() {
            return Err(CodecError::corrupt(format!(
                "bitshuffle block decoded to {} bytes, expected {}",
                shuffled.len(),
                range.len()
            )));
        }
        out.extend_from_slice(&bitunshuffle_block(&shuffled, p.elem_size));
    }

    let leftover = raw_size - out.len();
    if r.remaining() != leftover {
        return Err(CodecError::corrupt(format!(
            "bitshuffle frame has {} trailing bytes, expected {leftover} at offset {}",
            r.remaining(),
            r.position()
        )));
    }
    out.extend_from_slice(r.rest());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_u32(n: u32) -> Vec<u8> {
        (0..n)
            .flat_map(|v| (v.wrapping_mul(2654435761) >> 20).to_le_bytes())
            .collect()
    }

    #[test]
    fn transposes_bits_of_eight_bytes() {
        // Element 0 is 0xFF, the rest zero: bit row k has only bit 0 set.
        let mut src = vec![0u8; 8];
        src[0] = 0xFF;
        assert_eq!(bitshuffle_block(&src, 1), vec![1u8; 8]);

        // Bit 3 set in every element: row 3 is all ones.
        let src = vec![0x08u8; 8];
        let mut expected = vec![0u8; 8];
        expected[3] = 0xFF;
        assert_eq!(bitshuffle_block(&src, 1), expected);
    }

    #[test]
    fn leftover_elements_are_copied() {
        let src = sample_u32(13);
        let shuffled = bitshuffle(&src, 4, 8);
        assert_eq!(&shuffled[32..], &src[32..]);
        assert_ne!(&shuffled[..32], &src[..32]);
        assert_eq!(bitunshuffle(&shuffled, 4, 8), src);
    }

    #[test]
    fn default_block_size() {
        assert_eq!(default_block_elems(1), 8192);
        assert_eq!(default_block_elems(4), 2048);
        assert_eq!(default_block_elems(8), 1024);
        assert_eq!(default_block_elems(128), 128);
        assert_eq!(default_block_elems(24), 336);
    }

    #[test]
    fn lz4_and_zstd_frames() {
        let src = sample_u32(5003);
        for compression in [BSHUF_LZ4, BSHUF_ZSTD] {
            let params = [0, 3, 4, 0, compression, 1];
            let frame = BitshuffleFilter.encode(&src, &params).unwrap();
            assert_eq!(u64::from_be_bytes(frame[..8].try_into().unwrap()), src.len() as u64);
            assert_eq!(u32::from_be_bytes(frame[8..12].try_into().unwrap()), 8192);
            assert_eq!(&frame[frame.len() - 12..], &src[src.len() - 12..]);
            assert_eq!(BitshuffleFilter.decode(&frame, &params).unwrap(), src);
        }
    }

    #[test]
    fn truncated_frame_is_corrupt() {
        let src = sample_u32(1000);
        let params = [0, 3, 4, 0, BSHUF_LZ4];
        let frame = BitshuffleFilter.encode(&src, &params).unwrap();
        for cut in [0, 7, 12, 20, frame.len() - 1] {
            assert!(
                matches!(
                    BitshuffleFilter.decode(&frame[..cut], &params),
                    Err(CodecError::Corrupt(_))
                ),
                "cut at {cut}"
            );
        }
    }

    #[test]
    fn rejects_bad_params() {
        assert!(matches!(
            BitshuffleFilter.decode(&[0; 8], &[0, 3, 0]),
            Err(CodecError::InvalidParams(_))
        ));
        assert!(matches!(
            BitshuffleFilter.decode(&[0; 8], &[0, 3, 4, 12]),
            Err(CodecError::InvalidParams(_))
        ));
        assert!(matches!(
            BitshuffleFilter.decode(&[0; 8], &[0, 3, 4, 0, 1]),
            Err(CodecError::Unsupported(_))
        ));
    }
}
