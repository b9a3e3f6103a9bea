use crate::{Error, Result};
use std::io::{ErrorKind, Read};

/// Big-endian primitive reader over any byte source.
///
/// Tracks how many bytes were consumed so callers can validate declared
/// chunk sizes and the stream start offset against the actual position.
pub struct Reader<R> {
    inner: R,
    position: u64,
}

impl<R: Read> Reader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, position: 0 }
    }

    /// Bytes consumed from the source so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn fill(&mut self, buf: &mut [u8], what: &'static str) -> Result<()> {
        self.inner.read_exact(buf).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => Error::UnexpectedEof(what),
            _ => Error::Io(e),
        })?;
        self.position += buf.len() as u64;
        Ok(())
    }

    pub fn read_u16(&mut self, what: &'static str) -> Result<u16> {
        let mut buf = [0; 2];
        self.fill(&mut buf, what)?;
        Ok(u16::from_be_bytes(buf))
    }

    pub fn read_u32(&mut self, what: &'static str) -> Result<u32> {
        let mut buf = [0; 4];
        self.fill(&mut buf, what)?;
        Ok(u32::from_be_bytes(buf))
    }

    pub fn read_bytes(&mut self, len: usize, what: &'static str) -> Result<Vec<u8>> {
        let mut buf = vec![0; len];
        self.fill(&mut buf, what)?;
        Ok(buf)
    }

    /// Consumes and discards `len` bytes. The source may not be seekable,
    /// so padding is read through a scratch buffer.
    pub fn skip(&mut self, mut len: u64, what: &'static str) -> Result<()> {
        let mut scratch = [0; 512];

        while len > 0 {
            let take = len.min(scratch.len() as u64) as usize;
            self.fill(&mut scratch[..take], what)?;
            len -= take as u64;
        }

        Ok(())
    }

    /// Reads up to `buf.len()` bytes, returning 0 at end of stream.
    pub fn read_some(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            match self.inner.read(buf) {
                Ok(n) => {
                    self.position += n as u64;
                    return Ok(n);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn position_tracks_reads_and_skips() {
        let mut reader = Reader::new(Cursor::new(vec![0u8; 32]));
        reader.read_u32("word").unwrap();
        reader.read_u16("short").unwrap();
        reader.skip(10, "padding").unwrap();
        assert_eq!(reader.position(), 16);
    }

    #[test]
    fn short_source_reports_what_was_missing() {
        let mut reader = Reader::new(Cursor::new(vec![0u8; 3]));
        let err = reader.read_u32("chunk size").unwrap_err();
        assert!(matches!(err, Error::UnexpectedEof("chunk size")));
    }
}
