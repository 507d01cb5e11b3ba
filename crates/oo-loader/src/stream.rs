//! Seekable stream adapter with a fixed origin
//!
//! The embedded OELF inside a fake SELF starts at an arbitrary file offset;
//! `OffsetStream` lets the ELF parsing code address it as if it began at
//! offset zero.

use std::io::{self, Read, Seek, SeekFrom};

/// Wraps a seekable byte source, shifting all absolute positions by `origin`
pub struct OffsetStream<S> {
    inner: S,
    origin: u64,
}

impl<S: Seek> OffsetStream<S> {
    /// Create a stream whose position zero maps to `origin` in `inner`
    pub fn new(inner: S, origin: u64) -> Self {
        Self { inner, origin }
    }

    pub fn origin(&self) -> u64 {
        self.origin
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: Read> Read for OffsetStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<S: Seek> Seek for OffsetStream<S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let shifted = match pos {
            SeekFrom::Start(p) => SeekFrom::Start(p + self.origin),
            other => other,
        };
        let absolute = self.inner.seek(shifted)?;
        absolute.checked_sub(self.origin).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek landed before the stream origin",
            )
        })
    }
}
