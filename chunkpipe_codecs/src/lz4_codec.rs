use chunkpipe_core::{CodecError, Filter};

use crate::frame::{param, to_usize, FrameReader, MAX_PREALLOC};
use crate::FILTER_LZ4;

/// Default block size of the HDF5 LZ4 filter (1 GiB), capped to the input.
pub const DEFAULT_LZ4_BLOCK: u32 = 1 << 30;

/// LZ4 filter in the HDF5 framing (id 32004).
///
/// Fastest decompression of the bundled compressors. Parameter 0 is the
/// block size in bytes; 0 or absent selects the 1 GiB default.
///
/// # Frame layout
/// ```text
/// [raw_size: u64 BE] [block_size: u32 BE]
/// { [stored_size: u32 BE] [payload] }*
/// ```
/// A payload whose stored size equals its block's raw size is stored
/// uncompressed; anything else is one LZ4 block.
pub struct Lz4Filter;

impl Filter for Lz4Filter {
    fn id(&self) -> u32 {
        FILTER_LZ4
    }

    fn name(&self) -> &'static str {
        "lz4"
    }

    fn decode(&self, input: &[u8], _params: &[u32]) -> Result<Vec<u8>, CodecError> {
        let mut r = FrameReader::new(input, "lz4 frame");
        let raw_size = to_usize(r.u64_be()?, "lz4 raw size")?;
        let block_size = r.u32_be()? as usize;
        if block_size == 0 && raw_size > 0 {
            return Err(CodecError::corrupt("lz4 frame declares a zero block size"));
        }

        let mut out = Vec::with_capacity(raw_size.min(MAX_PREALLOC));
        while out.len() < raw_size {
            let expected = block_size.min(raw_size - out.len());
            let stored = r.u32_be()? as usize;
            let payload = r.take(stored)?;
            if stored == expected {
                out.extend_from_slice(payload);
                continue;
            }
            if expected > stored.saturating_mul(255) + 16 {
                return Err(CodecError::corrupt(format!(
                    "lz4 block of {stored} bytes cannot expand to {expected}"
                )));
            }
            let block = lz4_flex::block::decompress(payload, expected)
                .map_err(|e| CodecError::corrupt(format!("lz4 block: {e}")))?;
            if block.len() != expected {
                return Err(CodecError::corrupt(format!(
                    "lz4 block decoded to {} bytes, expected {expected}",
                    block.len()
                )));
            }
            out.extend_from_slice(&block);
        }
        if r.remaining() != 0 {
            return Err(CodecError::corrupt(format!(
                "{} unexpected bytes after the last lz4 block",
                r.remaining()
            )));
        }
        Ok(out)
    }

    fn encode(&self, input: &[u8], params: &[u32]) -> Result<Vec<u8>, CodecError> {
        let requested = match param(params, 0, 0) {
            0 => DEFAULT_LZ4_BLOCK,
            n => n,
        };
        let block_size = (requested as usize).min(input.len()).max(1);

        let mut out = Vec::with_capacity(input.len() / 2 + 16);
        out.extend_from_slice(&(input.len() as u64).to_be_bytes());
        out.extend_from_slice(&(block_size as u32).to_be_bytes());
        for block in input.chunks(block_size) {
            let compressed = lz4_flex::block::compress(block);
            let payload = if compressed.len() < block.len() {
                compressed.as_slice()
            } else {
                block
            };
            out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
            out.extend_from_slice(payload);
        }
        Ok(out)
    }

    fn can_encode(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_header_is_big_endian() {
        let data = vec![7u8; 5000];
        let frame = Lz4Filter.encode(&data, &[2048]).unwrap();
        assert_eq!(&frame[..8], &5000u64.to_be_bytes());
        assert_eq!(&frame[8..12], &2048u32.to_be_bytes());
        assert!(frame.len() < data.len());
        assert_eq!(Lz4Filter.decode(&frame, &[]).unwrap(), data);
    }

    #[test]
    fn incompressible_blocks_are_stored_raw() {
        let data: Vec<u8> = (0..64u32).map(|i| (i * 37 % 251) as u8).collect();
        let frame = Lz4Filter.encode(&data, &[]).unwrap();
        assert_eq!(&frame[12..16], &64u32.to_be_bytes());
        assert_eq!(&frame[16..], &data[..]);
        assert_eq!(Lz4Filter.decode(&frame, &[]).unwrap(), data);
    }

    #[test]
    fn empty_input() {
        let frame = Lz4Filter.encode(&[], &[]).unwrap();
        assert_eq!(frame.len(), 12);
        assert_eq!(Lz4Filter.decode(&frame, &[]).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn corrupt_frames_are_rejected() {
        let data = vec![1u8; 4096];
        let frame = Lz4Filter.encode(&data, &[1024]).unwrap();
        assert!(matches!(
            Lz4Filter.decode(&frame[..frame.len() - 1], &[]),
            Err(CodecError::Corrupt(_))
        ));
        assert!(Lz4Filter.decode(&frame[..5], &[]).is_err());

        let mut zero_block = frame.clone();
        zero_block[8..12].copy_from_slice(&0u32.to_be_bytes());
        assert!(matches!(
            Lz4Filter.decode(&zero_block, &[]),
            Err(CodecError::Corrupt(_))
        ));

        let mut trailing = frame;
        trailing.push(0);
        assert!(Lz4Filter.decode(&trailing, &[]).is_err());
    }
}
