use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Mutex;

/// Byte-range access to wherever the container bytes live.
///
/// Implementations must be shareable across the reader's worker threads.
pub trait ChunkStore: Send + Sync {
    /// Return exactly `len` bytes starting at `offset`, or an error
    /// (`UnexpectedEof` when the range runs past the end).
    fn fetch_bytes(&self, offset: u64, len: u64) -> io::Result<Vec<u8>>;

    /// Total size of the store in bytes.
    fn len(&self) -> io::Result<u64>;

    fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// A container held entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    bytes: Vec<u8>,
}

impl MemoryStore {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.bytes
    }
}

impl ChunkStore for MemoryStore {
    fn fetch_bytes(&self, offset: u64, len: u64) -> io::Result<Vec<u8>> {
        let start = usize::try_from(offset).map_err(|_| eof(offset, len))?;
        let end = usize::try_from(len)
            .ok()
            .and_then(|l| start.checked_add(l))
            .ok_or_else(|| eof(offset, len))?;
        self.bytes
            .get(start..end)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| eof(offset, len))
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.bytes.len() as u64)
    }
}

/// A container file on disk. Seeks are serialized behind a mutex so the
/// store can be shared by parallel chunk decoders.
#[derive(Debug)]
pub struct FileStore {
    file: Mutex<File>,
}

impl FileStore {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self {
            file: Mutex::new(File::open(path)?),
        })
    }

    fn lock(&self) -> io::Result<std::sync::MutexGuard<'_, File>> {
        self.file
            .lock()
            .map_err(|_| io::Error::other("file store mutex poisoned"))
    }
}

impl ChunkStore for FileStore {
    fn fetch_bytes(&self, offset: u64, len: u64) -> io::Result<Vec<u8>> {
        let len = usize::try_from(len).map_err(|_| eof(offset, len))?;
        let mut buf = vec![0u8; len];
        let mut file = self.lock()?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.lock()?.metadata()?.len())
    }
}

fn eof(offset: u64, len: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("byte range {}+{} is past the end of the store", offset, len),
    )
}
