//! Stream compression.
//!
//! Once the server asks for it with `compress1`, every byte in both
//! directions passes through a raw deflate stream. Each outbound packet is
//! followed by a sync flush so the peer can decode it without waiting for
//! more data.

use crate::error::ClientError;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

const MIN_SPARE: usize = 64;

/// Outbound half of the compressed stream.
pub struct Deflater {
    inner: Compress,
}

impl Deflater {
    pub fn new() -> Self {
        Self {
            inner: Compress::new(Compression::default(), false),
        }
    }

    /// Compresses `input` and sync-flushes.
    pub fn compress(&mut self, input: &[u8]) -> Result<Vec<u8>, ClientError> {
        let mut out = Vec::with_capacity(input.len() / 2 + MIN_SPARE * 2);
        let start = self.inner.total_in();

        loop {
            if out.capacity() - out.len() < MIN_SPARE {
                out.reserve(out.capacity().max(1024));
            }
            let consumed = (self.inner.total_in() - start) as usize;
            self.inner
                .compress_vec(&input[consumed..], &mut out, FlushCompress::Sync)
                .map_err(|e| ClientError::Compression(e.to_string()))?;

            // The flush is complete once all input is in and room is left over.
            let consumed = (self.inner.total_in() - start) as usize;
            if consumed == input.len() && out.len() < out.capacity() {
                return Ok(out);
            }
        }
    }

    pub fn total_in(&self) -> u64 {
        self.inner.total_in()
    }

    pub fn total_out(&self) -> u64 {
        self.inner.total_out()
    }
}

impl Default for Deflater {
    fn default() -> Self {
        Self::new()
    }
}

/// Inbound half of the compressed stream.
pub struct Inflater {
    inner: Decompress,
}

impl Inflater {
    pub fn new() -> Self {
        Self {
            inner: Decompress::new(false),
        }
    }

    /// Inflates `input`, appending whatever can be decoded so far to `out`.
    pub fn decompress(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<(), ClientError> {
        let start = self.inner.total_in();

        loop {
            if out.capacity() - out.len() < MIN_SPARE {
                out.reserve(input.len().max(4096));
            }
            let consumed = (self.inner.total_in() - start) as usize;
            let status = self
                .inner
                .decompress_vec(&input[consumed..], out, FlushDecompress::Sync)
                .map_err(|e| ClientError::Compression(e.to_string()))?;

            let consumed = (self.inner.total_in() - start) as usize;
            match status {
                Status::StreamEnd => return Ok(()),
                _ if consumed == input.len() && out.len() < out.capacity() => return Ok(()),
                _ => {}
            }
        }
    }
}

impl Default for Inflater {
    fn default() -> Self {
        Self::new()
    }
}
