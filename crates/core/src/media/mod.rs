//! File-backed media sources and their frame extractors.
//!
//! A [`MediaSource`] turns an elementary stream on disk into a queue of
//! ready frames. Extraction runs on the [`ThreadPool`](crate::ThreadPool);
//! consumption happens on the scheduler thread (usually through a
//! [`Sink`](crate::Sink)). The two sides only meet at the source's frame
//! queues, which share one lock.
//!
//! ## Supported codecs
//!
//! | Codec | Module | Framing | Frame unit |
//! |-------|--------|---------|------------|
//! | H.264 | [`h264`] | Annex B start codes | one NAL unit, start code stripped |
//! | AAC | [`aac`] | ADTS | one ADTS frame, header kept |

pub mod aac;
pub mod cursor;
pub mod frame;
pub mod h264;
pub mod source;

use crate::error::ExtractError;

pub use aac::{AacExtractor, AdtsHeader};
pub use cursor::ByteCursor;
pub use frame::{DEFAULT_FRAME_MAX_SIZE, MediaFrame};
pub use h264::H264Extractor;
pub use source::{MediaSource, SourceConfig};

/// Elementary stream formats a source can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    H264,
    Aac,
}

impl Codec {
    pub fn name(self) -> &'static str {
        match self {
            Codec::H264 => "H264",
            Codec::Aac => "AAC",
        }
    }

    /// Nominal frame rate used to pace delivery: 25 fps for video, and
    /// roughly 43 ADTS frames per second (1024 samples at 44.1 kHz) for audio.
    pub fn default_fps(self) -> u32 {
        match self {
            Codec::H264 => 25,
            Codec::Aac => 43,
        }
    }
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Codec-specific framing: pull exactly one frame from a byte stream.
///
/// ## Contract
///
/// - On success the frame's payload is set and the cursor sits at the first
///   byte of the next frame.
/// - On failure the frame is left without a payload. The cursor position is
///   unspecified; [`MediaSource`] restores it according to
///   [`ExtractError::rewinds_to_start`].
/// - End of stream is handled by rewinding and retrying once, so a source
///   loops over its file forever.
pub trait FrameExtractor: Send {
    fn codec(&self) -> Codec;

    fn extract(
        &mut self,
        cursor: &mut ByteCursor,
        frame: &mut MediaFrame,
    ) -> Result<(), ExtractError>;

    /// Header of the last ADTS frame, for AAC extractors.
    fn adts_header(&self) -> Option<AdtsHeader> {
        None
    }
}
