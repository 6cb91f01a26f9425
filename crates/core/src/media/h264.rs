use super::{Codec, FrameExtractor};
use crate::error::ExtractError;
use crate::media::cursor::ByteCursor;
use crate::media::frame::MediaFrame;

pub const NAL_SLICE: u8 = 1;
pub const NAL_IDR: u8 = 5;
pub const NAL_SEI: u8 = 6;
pub const NAL_SPS: u8 = 7;
pub const NAL_PPS: u8 = 8;
pub const NAL_AUD: u8 = 9;

/// Give up after this many delimiters/empty units in a row.
const MAX_SKIPPED_NALUS: usize = 64;

/// H.264 Annex B extractor: one NAL unit per frame.
///
/// Annex B bitstreams delimit NAL units with start codes:
/// - 4-byte: `0x00 0x00 0x00 0x01`
/// - 3-byte: `0x00 0x00 0x01`
///
/// Each attempt reads up to a slot's worth of bytes, checks for a start
/// code at the current position, scans for the next start code from byte 3
/// on, and seeks back so the following read starts exactly on it. The
/// delivered payload excludes the start code.
///
/// Access unit delimiters (type 9) carry nothing a client needs and are
/// skipped within the same attempt, reusing the same slot. SPS/PPS units
/// are delivered like any other NAL unit.
#[derive(Debug, Default)]
pub struct H264Extractor {
    last_nal_type: Option<u8>,
}

impl H264Extractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Type of the most recently delivered NAL unit.
    pub fn last_nal_type(&self) -> Option<u8> {
        self.last_nal_type
    }
}

impl FrameExtractor for H264Extractor {
    fn codec(&self) -> Codec {
        Codec::H264
    }

    fn extract(
        &mut self,
        cursor: &mut ByteCursor,
        frame: &mut MediaFrame,
    ) -> Result<(), ExtractError> {
        for _ in 0..MAX_SKIPPED_NALUS {
            let (start_code, size) = read_nal_unit(cursor, frame.buffer_mut())?;
            if size == start_code {
                tracing::trace!("empty NAL unit skipped");
                continue;
            }

            let nal_type = nal_unit_type(frame.buffer()[start_code]);
            if nal_type == NAL_AUD {
                tracing::trace!("access unit delimiter skipped");
                continue;
            }

            frame.set_payload(start_code, size - start_code);
            self.last_nal_type = Some(nal_type);
            tracing::trace!(
                nal_type,
                nal_size = size - start_code,
                start_code,
                "NAL unit extracted"
            );
            return Ok(());
        }
        Err(ExtractError::TooManySkipped(MAX_SKIPPED_NALUS))
    }
}

/// Read one start-code-prefixed NAL unit into `buf`.
///
/// Returns `(start_code_len, size)` where `size` includes the start code.
/// On success the cursor sits on the next start code (or at end of stream).
fn read_nal_unit(cursor: &mut ByteCursor, buf: &mut [u8]) -> Result<(usize, usize), ExtractError> {
    let mut n = cursor.read_up_to(buf)?;
    if n == 0 {
        cursor.rewind()?;
        n = cursor.read_up_to(buf)?;
        if n == 0 {
            return Err(ExtractError::EndOfStream);
        }
    }

    let data = &buf[..n];
    let start_code = start_code_len(data).ok_or(ExtractError::MissingStartCode)?;

    match find_next_start_code(&data[3..]) {
        Some(next) => {
            let size = next + 3;
            cursor.seek_relative(size as i64 - n as i64)?;
            Ok((start_code, size))
        }
        None if n == buf.len() => {
            tracing::warn!(
                read = n,
                "no next start code within frame buffer, delivering truncated NAL unit"
            );
            Ok((start_code, n))
        }
        // last NAL unit in the file
        None => Ok((start_code, n)),
    }
}

/// Length of the Annex B start code at the beginning of `data`, if any.
pub fn start_code_len(data: &[u8]) -> Option<usize> {
    if data.starts_with(&[0, 0, 1]) {
        Some(3)
    } else if data.starts_with(&[0, 0, 0, 1]) {
        Some(4)
    } else {
        None
    }
}

/// Offset of the first 3- or 4-byte start code in `data`.
///
/// A `00` directly before a `00 00 01` belongs to a 4-byte start code, so
/// the returned offset points at it.
pub fn find_next_start_code(data: &[u8]) -> Option<usize> {
    let pos = data.windows(3).position(|w| w == [0, 0, 1])?;
    if pos > 0 && data[pos - 1] == 0 {
        Some(pos - 1)
    } else {
        Some(pos)
    }
}

/// NAL unit type: low five bits of the NAL header byte.
pub fn nal_unit_type(header: u8) -> u8 {
    header & 0x1f
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract_all(stream: &[u8], count: usize) -> Vec<Vec<u8>> {
        let mut cursor = ByteCursor::from_bytes(stream.to_vec());
        let mut ex = H264Extractor::new();
        let mut frame = MediaFrame::new(0, 1024);
        (0..count)
            .map(|_| {
                ex.extract(&mut cursor, &mut frame).unwrap();
                frame.payload().to_vec()
            })
            .collect()
    }

    // --- start code helpers ---

    #[test]
    fn detects_start_codes() {
        assert_eq!(start_code_len(&[0, 0, 1, 0x67]), Some(3));
        assert_eq!(start_code_len(&[0, 0, 0, 1, 0x67]), Some(4));
        assert_eq!(start_code_len(&[0, 1, 0x67]), None);
        assert_eq!(start_code_len(&[0, 0]), None);
    }

    #[test]
    fn next_start_code_prefers_four_byte_form() {
        assert_eq!(find_next_start_code(&[0xAA, 0, 0, 0, 1, 0x41]), Some(1));
        assert_eq!(find_next_start_code(&[0xAA, 0, 0, 1, 0x41]), Some(1));
        assert_eq!(find_next_start_code(&[0, 0, 1]), Some(0));
        assert_eq!(find_next_start_code(&[0xAA, 0, 0]), None);
        assert_eq!(find_next_start_code(&[]), None);
    }

    #[test]
    fn nal_type_masks_low_bits() {
        assert_eq!(nal_unit_type(0x67), NAL_SPS);
        assert_eq!(nal_unit_type(0x68), NAL_PPS);
        assert_eq!(nal_unit_type(0x65), NAL_IDR);
        assert_eq!(nal_unit_type(0x09), NAL_AUD);
        assert_eq!(nal_unit_type(0x41), NAL_SLICE);
        assert_eq!(nal_unit_type(0x06), NAL_SEI);
    }

    // --- extraction ---

    #[test]
    fn two_frame_fixture() {
        let stream = [0, 0, 0, 1, 0x67, 0xAA, 0, 0, 1, 0x41, 0xBB];
        let frames = extract_all(&stream, 2);
        assert_eq!(frames, vec![vec![0x67, 0xAA], vec![0x41, 0xBB]]);
    }

    #[test]
    fn mixed_start_codes_no_loss() {
        let a = [0x65, 0x88, 0x84, 0x00, 0x10];
        let b = [0x41, 0x9A, 0x02];
        let stream = [&[0u8, 0, 1][..], &a, &[0, 0, 0, 1], &b].concat();

        let mut cursor = ByteCursor::from_bytes(stream.clone());
        let mut ex = H264Extractor::new();
        let mut frame = MediaFrame::new(0, 1024);

        ex.extract(&mut cursor, &mut frame).unwrap();
        assert_eq!(frame.payload(), &a);
        assert_eq!(frame.size(), Some(a.len()));
        assert_eq!(frame.offset(), 3);
        assert_eq!(cursor.position(), (3 + a.len()) as u64);

        ex.extract(&mut cursor, &mut frame).unwrap();
        assert_eq!(frame.payload(), &b);
        assert_eq!(frame.offset(), 4);
        assert_eq!(cursor.position(), stream.len() as u64);
    }

    #[test]
    fn loops_to_start_at_end_of_stream() {
        let stream = [0, 0, 0, 1, 0x67, 0xAA, 0, 0, 1, 0x41, 0xBB];
        let frames = extract_all(&stream, 4);
        assert_eq!(frames[2], vec![0x67, 0xAA]);
        assert_eq!(frames[3], vec![0x41, 0xBB]);
    }

    #[test]
    fn access_unit_delimiters_are_invisible() {
        let with_aud = [
            0, 0, 0, 1, 0x67, 0x42, // SPS
            0, 0, 0, 1, 0x09, 0xF0, // AUD
            0, 0, 0, 1, 0x65, 0x11, 0x22, // IDR
        ];
        let without_aud = [0, 0, 0, 1, 0x67, 0x42, 0, 0, 0, 1, 0x65, 0x11, 0x22];

        assert_eq!(extract_all(&with_aud, 2), extract_all(&without_aud, 2));
    }

    #[test]
    fn sps_and_pps_are_delivered() {
        let stream = [0, 0, 0, 1, 0x67, 0x42, 0, 0, 0, 1, 0x68, 0xCE, 0, 0, 1, 0x65, 0x01];
        let mut cursor = ByteCursor::from_bytes(stream.to_vec());
        let mut ex = H264Extractor::new();
        let mut frame = MediaFrame::new(0, 64);

        let mut types = Vec::new();
        for _ in 0..3 {
            ex.extract(&mut cursor, &mut frame).unwrap();
            types.push(ex.last_nal_type().unwrap());
        }
        assert_eq!(types, vec![NAL_SPS, NAL_PPS, NAL_IDR]);
    }

    #[test]
    fn missing_start_code_fails() {
        let mut cursor = ByteCursor::from_bytes(vec![0xFF, 0xFE, 0x00, 0x01]);
        let mut frame = MediaFrame::new(0, 64);
        let err = H264Extractor::new().extract(&mut cursor, &mut frame).unwrap_err();
        assert!(matches!(err, ExtractError::MissingStartCode));
        assert!(!frame.is_valid());
    }

    #[test]
    fn empty_stream_is_end_of_stream() {
        let mut cursor = ByteCursor::from_bytes(Vec::new());
        let mut frame = MediaFrame::new(0, 64);
        let err = H264Extractor::new().extract(&mut cursor, &mut frame).unwrap_err();
        assert!(matches!(err, ExtractError::EndOfStream));
    }

    #[test]
    fn only_delimiters_gives_up() {
        let stream = [0, 0, 1, 0x09, 0xF0].repeat(4);
        let mut cursor = ByteCursor::from_bytes(stream);
        let mut frame = MediaFrame::new(0, 64);
        let err = H264Extractor::new().extract(&mut cursor, &mut frame).unwrap_err();
        assert!(matches!(err, ExtractError::TooManySkipped(_)));
    }

    #[test]
    fn oversized_nal_unit_is_truncated_to_buffer() {
        let mut stream = vec![0, 0, 0, 1, 0x65];
        stream.extend(std::iter::repeat_n(0xAB, 100));
        let mut cursor = ByteCursor::from_bytes(stream);
        let mut frame = MediaFrame::new(0, 32);

        H264Extractor::new().extract(&mut cursor, &mut frame).unwrap();
        assert_eq!(frame.size(), Some(28));
        assert_eq!(cursor.position(), 32);
    }
}
