//! Error types for the live runtime and frame pipeline.

use std::io;
use std::os::fd::RawFd;
use std::path::PathBuf;

/// Errors surfaced by the scheduler, poller, thread pool and sources.
///
/// Variants map to specific failure modes across the runtime:
///
/// - **Poller**: [`InvalidDescriptor`](Self::InvalidDescriptor),
///   [`DescriptorOutOfRange`](Self::DescriptorOutOfRange),
///   [`NotRegistered`](Self::NotRegistered).
/// - **Thread pool**: [`PoolShutdown`](Self::PoolShutdown),
///   [`WorkerSpawn`](Self::WorkerSpawn).
/// - **Sources**: [`SourceOpen`](Self::SourceOpen).
/// - **Everything else**: [`Io`](Self::Io).
#[derive(Debug, thiserror::Error)]
pub enum LiveError {
    /// Underlying I/O or syscall error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A watcher was created with a negative descriptor.
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(RawFd),

    /// `select(2)` cannot watch descriptors at or above `FD_SETSIZE`.
    #[error("descriptor {fd} exceeds select limit {limit}")]
    DescriptorOutOfRange { fd: RawFd, limit: usize },

    /// `update`/`unregister` was called for a descriptor the poller does not know.
    #[error("descriptor not registered: {0}")]
    NotRegistered(RawFd),

    /// [`ThreadPool::shutdown`](crate::ThreadPool::shutdown) already ran.
    #[error("thread pool is shut down")]
    PoolShutdown,

    /// The OS refused to start a worker thread.
    #[error("failed to spawn worker {index}: {source}")]
    WorkerSpawn {
        index: usize,
        #[source]
        source: io::Error,
    },

    /// A media file could not be opened.
    #[error("failed to open {path}: {source}")]
    SourceOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Why a single frame extraction attempt failed.
///
/// None of these are fatal: the slot goes back to the input queue and the
/// next task invocation tries again from the position chosen by
/// [`rewinds_to_start`](Self::rewinds_to_start).
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// The source file never opened.
    #[error("no input file")]
    NoInput,

    /// Nothing left to read, even after looping back to the start.
    #[error("end of stream")]
    EndOfStream,

    /// The bytes at the read position are not an Annex B start code.
    #[error("no start code at stream position")]
    MissingStartCode,

    /// ADTS header does not begin with the 12-bit sync word.
    #[error("bad ADTS sync word {0:#06x}")]
    BadSyncWord(u16),

    /// ADTS `aac_frame_length` is shorter than its own header.
    #[error("invalid frame length {0}")]
    InvalidFrameLength(usize),

    /// The frame does not fit into the slot buffer.
    #[error("frame of {len} bytes exceeds buffer capacity {capacity}")]
    FrameTooLarge { len: usize, capacity: usize },

    /// The stream ended in the middle of a frame.
    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// Too many access unit delimiters in a row.
    #[error("skipped {0} NAL units without finding a frame")]
    TooManySkipped(usize),

    /// A read or seek failed.
    #[error("read error: {0}")]
    Io(#[from] io::Error),
}

impl ExtractError {
    /// Whether recovery loops the source back to the start of the file.
    ///
    /// Malformed or exhausted input restarts the stream; a transient I/O
    /// failure retries from the last good offset.
    pub fn rewinds_to_start(&self) -> bool {
        !matches!(self, Self::Io(_) | Self::NoInput)
    }
}

/// Convenience alias for `Result<T, LiveError>`.
pub type Result<T> = std::result::Result<T, LiveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_retry_from_last_good_offset() {
        let err = ExtractError::from(io::Error::new(io::ErrorKind::Interrupted, "eintr"));
        assert!(!err.rewinds_to_start());
    }

    #[test]
    fn malformed_input_rewinds() {
        assert!(ExtractError::MissingStartCode.rewinds_to_start());
        assert!(ExtractError::BadSyncWord(0x1234).rewinds_to_start());
        assert!(
            ExtractError::Truncated {
                expected: 10,
                actual: 3
            }
            .rewinds_to_start()
        );
    }

    #[test]
    fn display_messages() {
        let err = ExtractError::FrameTooLarge {
            len: 9000,
            capacity: 4096,
        };
        assert_eq!(
            err.to_string(),
            "frame of 9000 bytes exceeds buffer capacity 4096"
        );
        assert_eq!(
            LiveError::InvalidDescriptor(-1).to_string(),
            "invalid descriptor: -1"
        );
    }
}
