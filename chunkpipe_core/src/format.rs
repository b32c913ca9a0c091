use crate::error::{Error, Result};

/// Magic bytes for chunkpipe array files, version 1.
pub const MAGIC: &[u8; 8] = b"CPARR1\n\x00";

pub const FORMAT_VERSION: u16 = 1;

/// Fixed size of the file header in bytes.
///   magic[8] + version:u16 + flags:u16 + meta_len:u32 = 16
pub const HEADER_SIZE: u64 = 16;

/// Size of the index footer in bytes.
///   index_offset:u64 + entry_count:u64 = 16
pub const FOOTER_SIZE: u64 = 16;

/// Fixed part of each chunk index entry, after the `rank × u64` coordinates.
///   offset:u64 + stored_len:u64 + raw_len:u64 + filter_mask:u32 + checksum:u64
///   = 8 + 8 + 8 + 4 + 8 = 36
pub const ENTRY_FIXED_SIZE: u64 = 36;

// ── Flags ──────────────────────────────────────────────────────────────────

/// Each chunk carries an xxhash3-64 checksum of its stored bytes.
pub const FLAG_HAS_CHECKSUM: u16 = 1 << 0;

// ── Header ─────────────────────────────────────────────────────────────────

/// Decoded representation of the 16-byte file header. The JSON array
/// metadata (`meta_len` bytes) follows it directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub version: u16,
    pub flags: u16,
    pub meta_len: u32,
}

impl FileHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE as usize] {
        let mut buf = [0u8; HEADER_SIZE as usize];
        buf[..8].copy_from_slice(MAGIC);
        buf[8..10].copy_from_slice(&self.version.to_le_bytes());
        buf[10..12].copy_from_slice(&self.flags.to_le_bytes());
        buf[12..16].copy_from_slice(&self.meta_len.to_le_bytes());
        buf
    }

    /// Deserialize, checking the magic and version.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE as usize {
            return Err(Error::InvalidFormat(format!(
                "file is {} bytes, shorter than the {}-byte header",
                buf.len(),
                HEADER_SIZE
            )));
        }
        if &buf[..8] != MAGIC {
            return Err(Error::InvalidFormat(
                "invalid magic bytes, not a chunkpipe array file".into(),
            ));
        }
        let header = Self {
            version: read_u16(buf, 8),
            flags: read_u16(buf, 10),
            meta_len: read_u32(buf, 12),
        };
        if header.version != FORMAT_VERSION {
            return Err(Error::InvalidFormat(format!(
                "unsupported format version {} (only version {} is supported)",
                header.version, FORMAT_VERSION
            )));
        }
        Ok(header)
    }

    pub fn has_flag(&self, flag: u16) -> bool {
        self.flags & flag != 0
    }
}

// ── Chunk index entry ───────────────────────────────────────────────────────

/// One entry in the chunk index: locates and describes a single stored chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkEntry {
    /// Chunk-grid coordinates.
    pub coords: Vec<u64>,
    /// Byte offset of the stored chunk from the start of the file.
    pub offset: u64,
    /// Length of the stored (filtered) chunk in bytes.
    pub stored_len: u64,
    /// Length of the decoded chunk in bytes.
    pub raw_len: u64,
    /// Bit `i` set: pipeline filter `i` was skipped for this chunk.
    pub filter_mask: u32,
    /// xxhash3-64 of the stored bytes.
    pub checksum: u64,
}

impl ChunkEntry {
    pub fn encoded_size(rank: usize) -> u64 {
        8 * rank as u64 + ENTRY_FIXED_SIZE
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        for c in &self.coords {
            out.extend_from_slice(&c.to_le_bytes());
        }
        out.extend_from_slice(&self.offset.to_le_bytes());
        out.extend_from_slice(&self.stored_len.to_le_bytes());
        out.extend_from_slice(&self.raw_len.to_le_bytes());
        out.extend_from_slice(&self.filter_mask.to_le_bytes());
        out.extend_from_slice(&self.checksum.to_le_bytes());
    }

    /// Deserialize from exactly `encoded_size(rank)` bytes.
    pub fn from_bytes(buf: &[u8], rank: usize) -> Result<Self> {
        if buf.len() as u64 != Self::encoded_size(rank) {
            return Err(Error::InvalidFormat(format!(
                "chunk index entry is {} bytes, expected {}",
                buf.len(),
                Self::encoded_size(rank)
            )));
        }
        let coords = (0..rank).map(|d| read_u64(buf, d * 8)).collect();
        let base = rank * 8;
        Ok(Self {
            coords,
            offset: read_u64(buf, base),
            stored_len: read_u64(buf, base + 8),
            raw_len: read_u64(buf, base + 16),
            filter_mask: read_u32(buf, base + 24),
            checksum: read_u64(buf, base + 28),
        })
    }
}

// ── Footer ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    pub index_offset: u64,
    pub entry_count: u64,
}

impl Footer {
    pub fn to_bytes(&self) -> [u8; FOOTER_SIZE as usize] {
        let mut buf = [0u8; FOOTER_SIZE as usize];
        buf[..8].copy_from_slice(&self.index_offset.to_le_bytes());
        buf[8..].copy_from_slice(&self.entry_count.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() != FOOTER_SIZE as usize {
            return Err(Error::InvalidFormat("truncated footer".into()));
        }
        Ok(Self {
            index_offset: read_u64(buf, 0),
            entry_count: read_u64(buf, 8),
        })
    }
}

// Callers have already checked `buf` is long enough.
fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(b)
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(b)
}
