use bytes::{Bytes, BytesMut};

use crate::core::error::{QueueError, Result};

/// Accumulates body chunks up to a declared size.
///
/// `append` refuses to grow past the declared size, `finalize` refuses to
/// complete short of it.
#[derive(Debug)]
pub struct ContentBuffer {
    declared: u64,
    buf: BytesMut,
}

impl ContentBuffer {
    pub fn new(declared: u64) -> Self {
        // Don't trust the header for the up-front allocation.
        let hint = declared.min(64 * 1024) as usize;
        Self {
            declared,
            buf: BytesMut::with_capacity(hint),
        }
    }

    #[inline]
    pub fn declared_size(&self) -> u64 {
        self.declared
    }

    #[inline]
    pub fn accumulated(&self) -> u64 {
        self.buf.len() as u64
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.accumulated() == self.declared
    }

    /// Fails if `len` more bytes would overrun the declared size.
    pub fn check_fits(&self, len: usize) -> Result<()> {
        let total = self.accumulated() + len as u64;
        if total > self.declared {
            return Err(QueueError::protocol(format!(
                "content of {total} bytes exceeds declared body size {}",
                self.declared
            )));
        }
        Ok(())
    }

    /// Appends a chunk, returning the offset it was written at.
    pub fn append(&mut self, chunk: &[u8]) -> Result<u64> {
        self.check_fits(chunk.len())?;
        let offset = self.accumulated();
        self.buf.extend_from_slice(chunk);
        Ok(offset)
    }

    pub fn finalize(self) -> Result<Bytes> {
        if !self.is_complete() {
            return Err(QueueError::protocol(format!(
                "content incomplete: {} of {} bytes received",
                self.accumulated(),
                self.declared
            )));
        }
        Ok(self.buf.freeze())
    }
}
