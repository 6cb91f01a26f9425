use super::{Codec, FrameExtractor};
use crate::error::ExtractError;
use crate::media::cursor::ByteCursor;
use crate::media::frame::MediaFrame;

/// Fixed + variable ADTS header, without CRC.
pub const ADTS_HEADER_LEN: usize = 7;

/// Sampling frequencies indexed by `sampling_frequency_index` (ISO/IEC 14496-3).
const SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// Parsed 7-byte ADTS header (ISO/IEC 13818-7 §6.2).
///
/// ```text
/// syncword(12) id(1) layer(2) protection_absent(1)
/// profile(2) sampling_frequency_index(4) private_bit(1) channel_configuration(3)
/// original_copy(1) home(1) copyright_id_bit(1) copyright_id_start(1)
/// aac_frame_length(13) adts_buffer_fullness(11) number_of_raw_data_blocks(2)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdtsHeader {
    pub id: u8,
    pub layer: u8,
    pub protection_absent: bool,
    pub profile: u8,
    pub sampling_freq_index: u8,
    pub private_bit: bool,
    pub channel_cfg: u8,
    pub original_copy: bool,
    pub home: bool,
    pub copyright_id_bit: bool,
    pub copyright_id_start: bool,
    /// Whole frame length, header included.
    pub frame_length: usize,
    pub buffer_fullness: u16,
    pub raw_data_blocks: u8,
}

impl AdtsHeader {
    pub fn parse(b: &[u8; ADTS_HEADER_LEN]) -> Result<Self, ExtractError> {
        if b[0] != 0xFF || b[1] & 0xF0 != 0xF0 {
            return Err(ExtractError::BadSyncWord(
                u16::from_be_bytes([b[0], b[1]]) >> 4,
            ));
        }

        let header = Self {
            id: (b[1] & 0x08) >> 3,
            layer: (b[1] & 0x06) >> 1,
            protection_absent: b[1] & 0x01 != 0,
            profile: (b[2] & 0xC0) >> 6,
            sampling_freq_index: (b[2] & 0x3C) >> 2,
            private_bit: b[2] & 0x02 != 0,
            channel_cfg: ((b[2] & 0x01) << 2) | ((b[3] & 0xC0) >> 6),
            original_copy: b[3] & 0x20 != 0,
            home: b[3] & 0x10 != 0,
            copyright_id_bit: b[3] & 0x08 != 0,
            copyright_id_start: b[3] & 0x04 != 0,
            frame_length: (((b[3] & 0x03) as usize) << 11)
                | ((b[4] as usize) << 3)
                | (((b[5] & 0xE0) as usize) >> 5),
            buffer_fullness: (((b[5] & 0x1F) as u16) << 6) | (((b[6] & 0xFC) as u16) >> 2),
            raw_data_blocks: b[6] & 0x03,
        };

        if header.frame_length < ADTS_HEADER_LEN {
            return Err(ExtractError::InvalidFrameLength(header.frame_length));
        }
        Ok(header)
    }

    /// Sampling rate in Hz, `None` for reserved indices.
    pub fn sample_rate(&self) -> Option<u32> {
        SAMPLE_RATES.get(self.sampling_freq_index as usize).copied()
    }

    /// A CRC follows the header when protection is not absent.
    pub fn has_crc(&self) -> bool {
        !self.protection_absent
    }
}

/// AAC ADTS extractor: one ADTS frame (header included) per slot.
#[derive(Debug, Default)]
pub struct AacExtractor {
    last_header: Option<AdtsHeader>,
}

impl AacExtractor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrameExtractor for AacExtractor {
    fn codec(&self) -> Codec {
        Codec::Aac
    }

    fn extract(
        &mut self,
        cursor: &mut ByteCursor,
        frame: &mut MediaFrame,
    ) -> Result<(), ExtractError> {
        let mut raw = [0u8; ADTS_HEADER_LEN];
        if cursor.read_up_to(&mut raw)? < ADTS_HEADER_LEN {
            cursor.rewind()?;
            if cursor.read_up_to(&mut raw)? < ADTS_HEADER_LEN {
                return Err(ExtractError::EndOfStream);
            }
        }

        let header = AdtsHeader::parse(&raw)?;
        let len = header.frame_length;
        if len > frame.capacity() {
            return Err(ExtractError::FrameTooLarge {
                len,
                capacity: frame.capacity(),
            });
        }

        let buf = frame.buffer_mut();
        buf[..ADTS_HEADER_LEN].copy_from_slice(&raw);
        cursor.read_exact(&mut buf[ADTS_HEADER_LEN..len])?;

        frame.set_payload(0, len);
        self.last_header = Some(header);
        tracing::trace!(
            frame_length = len,
            sample_rate = header.sample_rate(),
            channels = header.channel_cfg,
            "ADTS frame extracted"
        );
        Ok(())
    }

    fn adts_header(&self) -> Option<AdtsHeader> {
        self.last_header
    }
}
