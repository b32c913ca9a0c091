//! Blosc (version 1 chunk format) filter, HDF5 id 32001.
//!
//! # Chunk layout
//! ```text
//! [version:u8] [versionlz:u8] [flags:u8] [typesize:u8]
//! [nbytes: u32 LE] [blocksize: u32 LE] [cbytes: u32 LE]       16-byte header
//! [bstarts: i32 LE × nblocks]                                 block offsets
//! per block, per stream: [csize: i32 LE] [payload]
//! ```
//! A block is split into `typesize` streams unless it is the short last
//! block or the don't-split flag is set. A stream whose `csize` equals its
//! uncompressed size is stored raw. With the memcpyed flag the header is
//! followed directly by the `nbytes` raw bytes.

pub mod blosclz;

use std::io::{Read, Write};

use chunkpipe_core::{CodecError, Filter};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::bitshuffle::{bitshuffle_block, bitunshuffle_block};
use crate::frame::{param, FrameReader, MAX_PREALLOC};
use crate::shuffle::{shuffle, unshuffle};
use crate::zstd_codec::decompress_exact;
use crate::FILTER_BLOSC;

pub const HEADER_SIZE: usize = 16;

const FLAG_SHUFFLE: u8 = 0x01;
const FLAG_MEMCPYED: u8 = 0x02;
const FLAG_BITSHUFFLE: u8 = 0x04;
const FLAG_DONT_SPLIT: u8 = 0x10;

/// Compressor codes, stored in the top 3 flag bits.
pub const BLOSC_BLOSCLZ: u32 = 0;
pub const BLOSC_LZ4: u32 = 1;
pub const BLOSC_SNAPPY: u32 = 2;
pub const BLOSC_ZLIB: u32 = 3;
pub const BLOSC_ZSTD: u32 = 4;

/// Shuffle modes (parameter 5).
pub const BLOSC_NOSHUFFLE: u32 = 0;
pub const BLOSC_SHUFFLE: u32 = 1;
pub const BLOSC_BITSHUFFLE: u32 = 2;

const VERSION_FORMAT: u8 = 2;
const VERSION_LZ: u8 = 1;
const MAX_TYPESIZE: u32 = 255;
const MAX_SPLITS: usize = 16;
const MIN_BUFFERSIZE: usize = 128;
const DEFAULT_BLOCKSIZE: usize = 256 << 10;

/// Decoded 16-byte blosc chunk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BloscHeader {
    pub version: u8,
    pub versionlz: u8,
    pub flags: u8,
    pub typesize: u8,
    pub nbytes: u32,
    pub blocksize: u32,
    pub cbytes: u32,
}

impl BloscHeader {
    pub fn parse(input: &[u8]) -> Result<Self, CodecError> {
        let mut r = FrameReader::new(input, "blosc header");
        Ok(Self {
            version: r.u8()?,
            versionlz: r.u8()?,
            flags: r.u8()?,
            typesize: r.u8()?,
            nbytes: r.u32_le()?,
            blocksize: r.u32_le()?,
            cbytes: r.u32_le()?,
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = self.version;
        buf[1] = self.versionlz;
        buf[2] = self.flags;
        buf[3] = self.typesize;
        buf[4..8].copy_from_slice(&self.nbytes.to_le_bytes());
        buf[8..12].copy_from_slice(&self.blocksize.to_le_bytes());
        buf[12..16].copy_from_slice(&self.cbytes.to_le_bytes());
        buf
    }

    pub fn compressor(&self) -> u32 {
        u32::from(self.flags >> 5)
    }

    pub fn is_memcpyed(&self) -> bool {
        self.flags & FLAG_MEMCPYED != 0
    }
}

/// Blosc meta-compressor filter.
///
/// Parameters follow the HDF5 blosc plugin:
/// `[filter_rev, blosc_version, typesize, chunk_bytes, clevel, shuffle, compressor]`.
/// Decoding needs none of them since the chunk header is self-describing.
/// Encoding uses `typesize`, `clevel` (default 5), `shuffle` (default byte
/// shuffle) and `compressor` (default LZ4). BloscLZ is decode-only.
pub struct BloscFilter;

impl Filter for BloscFilter {
    fn id(&self) -> u32 {
        FILTER_BLOSC
    }

    fn name(&self) -> &'static str {
        "blosc"
    }

    fn version(&self) -> u32 {
        u32::from(VERSION_FORMAT)
    }

    fn decode(&self, input: &[u8], _params: &[u32]) -> Result<Vec<u8>, CodecError> {
        decompress(input)
    }

    fn encode(&self, input: &[u8], params: &[u32]) -> Result<Vec<u8>, CodecError> {
        let typesize = match param(params, 2, 1) {
            0 => 1,
            t if t > MAX_TYPESIZE => 1,
            t => t,
        };
        let clevel = param(params, 4, 5);
        if clevel > 9 {
            return Err(CodecError::params(format!("blosc clevel {clevel} is not 0-9")));
        }
        let shuffle_mode = param(params, 5, BLOSC_SHUFFLE);
        if shuffle_mode > BLOSC_BITSHUFFLE {
            return Err(CodecError::params(format!("blosc shuffle mode {shuffle_mode}")));
        }
        compress(
            input,
            typesize as usize,
            clevel,
            shuffle_mode,
            param(params, 6, BLOSC_LZ4),
        )
    }

    fn can_encode(&self) -> bool {
        true
    }
}

/// Decompress one blosc chunk.
pub fn decompress(input: &[u8]) -> Result<Vec<u8>, CodecError> {
    let h = BloscHeader::parse(input)?;
    if h.cbytes as usize != input.len() {
        return Err(CodecError::corrupt(format!(
            "blosc header declares {} compressed bytes, chunk holds {}",
            h.cbytes,
            input.len()
        )));
    }
    let nbytes = h.nbytes as usize;

    if h.is_memcpyed() {
        if input.len() != HEADER_SIZE + nbytes {
            return Err(CodecError::corrupt(format!(
                "memcpyed blosc chunk holds {} bytes, header declares {nbytes}",
                input.len() - HEADER_SIZE
            )));
        }
        return Ok(input[HEADER_SIZE..].to_vec());
    }
    if nbytes == 0 {
        return Ok(Vec::new());
    }
    if h.blocksize == 0 {
        return Err(CodecError::corrupt("blosc header declares a zero block size"));
    }

    let blocksize = h.blocksize as usize;
    let typesize = usize::from(h.typesize.max(1));
    let nblocks = nbytes.div_ceil(blocksize);
    let leftover = nbytes % blocksize;

    let mut r = FrameReader::new(input, "blosc chunk");
    r.take(HEADER_SIZE)?;
    if nblocks > r.remaining() / 4 {
        return Err(CodecError::corrupt(format!(
            "blosc chunk too short for {nblocks} block offsets"
        )));
    }
    let bstarts = (0..nblocks)
        .map(|_| r.i32_le())
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Vec::with_capacity(nbytes.min(MAX_PREALLOC));
    for (j, &start) in bstarts.iter().enumerate() {
        let leftover_block = j == nblocks - 1 && leftover > 0;
        let bsize = if leftover_block { leftover } else { blocksize };
        let start = usize::try_from(start)
            .ok()
            .filter(|&s| s >= HEADER_SIZE && s < input.len())
            .ok_or_else(|| CodecError::corrupt(format!("blosc block {j} starts at {start}")))?;

        let nstreams = if !leftover_block && h.flags & FLAG_DONT_SPLIT == 0 {
            typesize
        } else {
            1
        };
        if bsize % nstreams != 0 {
            return Err(CodecError::corrupt(format!(
                "blosc block of {bsize} bytes cannot split into {nstreams} streams"
            )));
        }
        let neblock = bsize / nstreams;

        let mut sr = FrameReader::new(&input[start..], "blosc block");
        let mut block = Vec::with_capacity(bsize.min(MAX_PREALLOC));
        for _ in 0..nstreams {
            let csize = usize::try_from(sr.i32_le()?)
                .map_err(|_| CodecError::Unsupported("blosc special-value streams".into()))?;
            let payload = sr.take(csize)?;
            if csize == neblock {
                block.extend_from_slice(payload);
            } else {
                block.extend_from_slice(&decompress_stream(h.compressor(), payload, neblock)?);
            }
        }

        let block = if h.flags & FLAG_SHUFFLE != 0 && typesize > 1 {
            unshuffle(&block, typesize)
        } else if h.flags & FLAG_BITSHUFFLE != 0 && bitshuffle_applies(h.version, bsize, typesize) {
            bitunshuffle_block(&block, typesize)
        } else {
            block
        };
        out.extend_from_slice(&block);
    }
    Ok(out)
}

/// Format version 2 only bit-shuffles blocks whose element count is a
/// multiple of 8; later versions shuffle the leading multiple of 8 and copy
/// the rest.
fn bitshuffle_applies(version: u8, bsize: usize, typesize: usize) -> bool {
    version > 2 || (bsize / typesize) % 8 == 0
}

fn decompress_stream(compressor: u32, payload: &[u8], expected: usize) -> Result<Vec<u8>, CodecError> {
    let out = match compressor {
        BLOSC_BLOSCLZ => blosclz::decompress(payload, expected)?,
        BLOSC_LZ4 => {
            if expected > payload.len().saturating_mul(255) + 16 {
                return Err(CodecError::corrupt(format!(
                    "blosc lz4 stream of {} bytes cannot expand to {expected}",
                    payload.len()
                )));
            }
            lz4_flex::block::decompress(payload, expected)
                .map_err(|e| CodecError::corrupt(format!("blosc lz4 stream: {e}")))?
        }
        BLOSC_SNAPPY => {
            let len = snap::raw::decompress_len(payload)
                .map_err(|e| CodecError::corrupt(format!("blosc snappy stream: {e}")))?;
            if len != expected {
                return Err(CodecError::corrupt(format!(
                    "blosc snappy stream declares {len} bytes, expected {expected}"
                )));
            }
            snap::raw::Decoder::new()
                .decompress_vec(payload)
                .map_err(|e| CodecError::corrupt(format!("blosc snappy stream: {e}")))?
        }
        BLOSC_ZLIB => {
            let mut out = Vec::with_capacity(expected.min(MAX_PREALLOC));
            ZlibDecoder::new(payload)
                .take(expected as u64 + 1)
                .read_to_end(&mut out)
                .map_err(|e| CodecError::corrupt(format!("blosc zlib stream: {e}")))?;
            out
        }
        BLOSC_ZSTD => decompress_exact(payload, expected, "blosc zstd stream")?,
        other => {
            return Err(CodecError::Unsupported(format!("blosc compressor code {other}")));
        }
    };
    if out.len() != expected {
        return Err(CodecError::corrupt(format!(
            "blosc stream decoded to {} bytes, expected {expected}",
            out.len()
        )));
    }
    Ok(out)
}

fn compress_stream(compressor: u32, clevel: u32, stream: &[u8]) -> Result<Vec<u8>, CodecError> {
    match compressor {
        BLOSC_LZ4 => Ok(lz4_flex::block::compress(stream)),
        BLOSC_SNAPPY => snap::raw::Encoder::new()
            .compress_vec(stream)
            .map_err(|e| CodecError::params(format!("blosc snappy: {e}"))),
        BLOSC_ZLIB => {
            let mut enc = ZlibEncoder::new(Vec::new(), Compression::new(clevel));
            enc.write_all(stream)
                .map_err(|e| CodecError::params(format!("blosc zlib: {e}")))?;
            enc.finish()
                .map_err(|e| CodecError::params(format!("blosc zlib: {e}")))
        }
        BLOSC_ZSTD => {
            let level = if clevel < 9 { clevel as i32 * 2 - 1 } else { 22 };
            zstd::bulk::compress(stream, level)
                .map_err(|e| CodecError::params(format!("blosc zstd: {e}")))
        }
        BLOSC_BLOSCLZ => Err(CodecError::Unsupported(
            "BloscLZ compression is decode-only".into(),
        )),
        other => Err(CodecError::params(format!("blosc compressor code {other}"))),
    }
}

/// Build a blosc chunk. Streams that do not shrink are stored raw, and a
/// chunk that would not fit in `nbytes + 16` bytes is stored memcpyed.
pub fn compress(
    input: &[u8],
    typesize: usize,
    clevel: u32,
    shuffle_mode: u32,
    compressor: u32,
) -> Result<Vec<u8>, CodecError> {
    if compressor > BLOSC_ZSTD {
        return Err(CodecError::params(format!("blosc compressor code {compressor}")));
    }
    if compressor == BLOSC_BLOSCLZ {
        return Err(CodecError::Unsupported(
            "BloscLZ compression is decode-only".into(),
        ));
    }
    let nbytes = input.len();
    if nbytes > i32::MAX as usize - HEADER_SIZE {
        return Err(CodecError::params(format!(
            "blosc chunk of {nbytes} bytes exceeds the format limit"
        )));
    }

    let mut flags = (compressor as u8) << 5;
    match shuffle_mode {
        BLOSC_SHUFFLE => flags |= FLAG_SHUFFLE,
        BLOSC_BITSHUFFLE => flags |= FLAG_BITSHUFFLE,
        _ => {}
    }
    let blocksize = if nbytes <= DEFAULT_BLOCKSIZE {
        nbytes
    } else {
        DEFAULT_BLOCKSIZE - DEFAULT_BLOCKSIZE % typesize
    };
    let split = matches!(compressor, BLOSC_LZ4 | BLOSC_SNAPPY)
        && typesize <= MAX_SPLITS
        && blocksize % typesize == 0
        && blocksize / typesize >= MIN_BUFFERSIZE;
    if !split {
        flags |= FLAG_DONT_SPLIT;
    }

    let mut header = BloscHeader {
        version: VERSION_FORMAT,
        versionlz: VERSION_LZ,
        flags,
        typesize: typesize as u8,
        nbytes: nbytes as u32,
        blocksize: blocksize as u32,
        cbytes: 0,
    };

    if clevel == 0 || nbytes < MIN_BUFFERSIZE {
        return Ok(memcpyed(header, input));
    }

    let nblocks = nbytes.div_ceil(blocksize);
    let mut out = Vec::with_capacity(nbytes / 2 + HEADER_SIZE + 4 * nblocks);
    out.extend_from_slice(&header.to_bytes());
    out.resize(HEADER_SIZE + 4 * nblocks, 0);

    for (j, block) in input.chunks(blocksize).enumerate() {
        let start = out.len() as i32;
        out[HEADER_SIZE + 4 * j..HEADER_SIZE + 4 * (j + 1)].copy_from_slice(&start.to_le_bytes());

        let shuffled = match shuffle_mode {
            BLOSC_SHUFFLE if typesize > 1 => shuffle(block, typesize),
            BLOSC_BITSHUFFLE if bitshuffle_applies(VERSION_FORMAT, block.len(), typesize) => {
                bitshuffle_block(block, typesize)
            }
            _ => block.to_vec(),
        };
        let leftover_block = block.len() < blocksize;
        let nstreams = if split && !leftover_block { typesize } else { 1 };
        for stream in shuffled.chunks(block.len() / nstreams) {
            let compressed = compress_stream(compressor, clevel, stream)?;
            let payload = if compressed.len() < stream.len() {
                compressed.as_slice()
            } else {
                stream
            };
            out.extend_from_slice(&(payload.len() as i32).to_le_bytes());
            out.extend_from_slice(payload);
        }
        if out.len() > nbytes + HEADER_SIZE {
            return Ok(memcpyed(header, input));
        }
    }

    header.cbytes = out.len() as u32;
    out[..HEADER_SIZE].copy_from_slice(&header.to_bytes());
    Ok(out)
}

fn memcpyed(mut header: BloscHeader, input: &[u8]) -> Vec<u8> {
    header.flags |= FLAG_MEMCPYED;
    header.cbytes = (input.len() + HEADER_SIZE) as u32;
    let mut out = Vec::with_capacity(input.len() + HEADER_SIZE);
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(input);
    out
}
