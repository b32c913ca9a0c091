//! Bounds-checked reading of filter frame headers.

use chunkpipe_core::CodecError;

/// Largest up-front allocation made on the strength of a size field read
/// from untrusted input. Larger outputs still decode, growing as they go.
pub(crate) const MAX_PREALLOC: usize = 64 << 20;

/// Forward-only reader over a filter's stored bytes. Every read checks the
/// remaining length and fails with `CodecError::Corrupt` instead of panicking.
pub(crate) struct FrameReader<'a> {
    buf: &'a [u8],
    pos: usize,
    what: &'static str,
}

impl<'a> FrameReader<'a> {
    /// `what` names the frame in error messages.
    pub(crate) fn new(buf: &'a [u8], what: &'static str) -> Self {
        Self { buf, pos: 0, what }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if n > self.remaining() {
            return Err(CodecError::corrupt(format!(
                "{} truncated: need {} bytes at offset {}, {} left",
                self.what,
                n,
                self.pos,
                self.remaining()
            )));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub(crate) fn rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut b = [0u8; N];
        b.copy_from_slice(self.take(N)?);
        Ok(b)
    }

    pub(crate) fn u32_be(&mut self) -> Result<u32, CodecError> {
        self.array().map(u32::from_be_bytes)
    }

    pub(crate) fn u64_be(&mut self) -> Result<u64, CodecError> {
        self.array().map(u64::from_be_bytes)
    }

    pub(crate) fn u32_le(&mut self) -> Result<u32, CodecError> {
        self.array().map(u32::from_le_bytes)
    }

    pub(crate) fn i32_le(&mut self) -> Result<i32, CodecError> {
        self.array().map(i32::from_le_bytes)
    }

    pub(crate) fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }
}

/// Parameter `index`, or `default` when the list is shorter.
pub(crate) fn param(params: &[u32], index: usize, default: u32) -> u32 {
    params.get(index).copied().unwrap_or(default)
}

/// Convert a size read from a frame header to `usize`.
pub(crate) fn to_usize(value: u64, what: &str) -> Result<usize, CodecError> {
    usize::try_from(value)
        .map_err(|_| CodecError::corrupt(format!("{what} {value} does not fit in memory")))
}
