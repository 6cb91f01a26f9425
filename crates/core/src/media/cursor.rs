use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{ExtractError, LiveError};

/// Anything an extractor can pull bytes from.
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// Resumable read position over a media file.
///
/// Extractors only move through the stream via these calls, so the
/// position is always known and a failed attempt can be undone with
/// [`seek_to`](Self::seek_to) or [`rewind`](Self::rewind).
///
/// A cursor created by [`empty`](Self::empty) (or a failed
/// [`open`](Self::open_or_empty)) has no reader: every operation fails with
/// [`ExtractError::NoInput`].
pub struct ByteCursor {
    inner: Option<Box<dyn ReadSeek>>,
    position: u64,
}

impl ByteCursor {
    pub fn new(reader: impl ReadSeek + 'static) -> Self {
        Self {
            inner: Some(Box::new(reader)),
            position: 0,
        }
    }

    /// Cursor over an in-memory byte stream.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(io::Cursor::new(bytes.into()))
    }

    /// Cursor with no backing reader.
    pub fn empty() -> Self {
        Self {
            inner: None,
            position: 0,
        }
    }

    pub fn open(path: &Path) -> Result<Self, LiveError> {
        let file = File::open(path).map_err(|source| LiveError::SourceOpen {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(file))
    }

    /// Open `path`, falling back to an [`empty`](Self::empty) cursor.
    pub fn open_or_empty(path: &Path) -> Self {
        match Self::open(path) {
            Ok(cursor) => {
                tracing::info!(path = %path.display(), "media file opened");
                cursor
            }
            Err(e) => {
                tracing::error!(error = %e, "media source will produce no frames");
                Self::empty()
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    /// Absolute offset of the next byte to be read.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Read until `buf` is full or the stream ends. Returns the byte count;
    /// zero means end of stream.
    pub fn read_up_to(&mut self, buf: &mut [u8]) -> Result<usize, ExtractError> {
        let reader = self.inner.as_mut().ok_or(ExtractError::NoInput)?;
        let mut filled = 0;
        while filled < buf.len() {
            match reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.position += filled as u64;
                    return Err(e.into());
                }
            }
        }
        self.position += filled as u64;
        Ok(filled)
    }

    /// Fill `buf` completely or fail with [`ExtractError::Truncated`].
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), ExtractError> {
        let n = self.read_up_to(buf)?;
        if n < buf.len() {
            return Err(ExtractError::Truncated {
                expected: buf.len(),
                actual: n,
            });
        }
        Ok(())
    }

    pub fn seek_to(&mut self, offset: u64) -> Result<(), ExtractError> {
        let reader = self.inner.as_mut().ok_or(ExtractError::NoInput)?;
        self.position = reader.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    pub fn seek_relative(&mut self, delta: i64) -> Result<(), ExtractError> {
        let reader = self.inner.as_mut().ok_or(ExtractError::NoInput)?;
        self.position = reader.seek(SeekFrom::Current(delta))?;
        Ok(())
    }

    /// Go back to the start of the stream; sources loop forever this way.
    pub fn rewind(&mut self) -> Result<(), ExtractError> {
        self.seek_to(0)
    }
}
