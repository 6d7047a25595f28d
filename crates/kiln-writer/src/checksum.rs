//! Output adapter that hashes what it writes.

use std::io::{self, Seek, Write};

use crc32fast::Hasher;

/// Forwards writes to the output stream, feeding every byte to `hasher` and
/// counting the bytes written.
pub(crate) struct ChecksumWriter<'a, W: Write> {
    out: &'a mut W,
    hasher: &'a mut Hasher,
    written: u64,
}

impl<'a, W: Write> ChecksumWriter<'a, W> {
    pub(crate) fn new(out: &'a mut W, hasher: &'a mut Hasher) -> Self {
        Self {
            out,
            hasher,
            written: 0,
        }
    }

    pub(crate) fn written(&self) -> u64 {
        self.written
    }

    /// Write `len` zero bytes.
    pub(crate) fn zero_fill(&mut self, len: u32) -> io::Result<()> {
        const ZEROS: [u8; 256] = [0; 256];
        let mut left = len as usize;
        while left > 0 {
            let n = left.min(ZEROS.len());
            self.write_all(&ZEROS[..n])?;
            left -= n;
        }
        Ok(())
    }
}

impl<W: Write + Seek> ChecksumWriter<'_, W> {
    pub(crate) fn stream_position(&mut self) -> io::Result<u64> {
        self.out.stream_position()
    }
}

impl<W: Write> Write for ChecksumWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.out.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// Final artifact checksum: the header prefix and the deterministic
/// key/value prefix, followed by everything after the key/value store.
///
/// `body` is the hasher that saw the bytes after the key/value store.
pub(crate) fn combine(header_prefix: &[u8], kv_prefix: &[u8], body: &Hasher) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(header_prefix);
    hasher.update(kv_prefix);
    hasher.combine(body);
    hasher.finalize()
}
