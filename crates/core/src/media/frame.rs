/// Default capacity of one frame slot.
pub const DEFAULT_FRAME_MAX_SIZE: usize = 200 * 1024;

/// A reusable, fixed-capacity frame buffer.
///
/// Slots are allocated once per source and then move by value between the
/// source's input queue, the extractor and the output queue; whoever holds
/// the value owns the slot. The payload is a window into the buffer that
/// starts after any framing bytes the extractor stripped (the Annex B start
/// code for H.264).
pub struct MediaFrame {
    slot: usize,
    temp: Box<[u8]>,
    offset: usize,
    size: Option<usize>,
}

impl MediaFrame {
    pub fn new(slot: usize, capacity: usize) -> Self {
        Self {
            slot,
            temp: vec![0u8; capacity].into_boxed_slice(),
            offset: 0,
            size: None,
        }
    }

    /// Index of this slot within its source's pool.
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn capacity(&self) -> usize {
        self.temp.len()
    }

    /// Payload length, or `None` while the slot holds no frame.
    pub fn size(&self) -> Option<usize> {
        self.size
    }

    pub fn is_valid(&self) -> bool {
        self.size.is_some()
    }

    /// Frame bytes with framing stripped. Empty for an unset slot.
    pub fn payload(&self) -> &[u8] {
        match self.size {
            Some(size) => &self.temp[self.offset..self.offset + size],
            None => &[],
        }
    }

    /// Number of framing bytes before the payload.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The whole backing buffer, for extractors to fill.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.temp
    }

    pub fn buffer(&self) -> &[u8] {
        &self.temp
    }

    /// Mark `temp[offset..offset + size]` as the frame.
    pub fn set_payload(&mut self, offset: usize, size: usize) {
        assert!(
            offset + size <= self.temp.len(),
            "payload {offset}+{size} exceeds slot capacity {}",
            self.temp.len()
        );
        self.offset = offset;
        self.size = Some(size);
    }

    pub fn reset(&mut self) {
        self.offset = 0;
        self.size = None;
    }
}

impl std::fmt::Debug for MediaFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaFrame")
            .field("slot", &self.slot)
            .field("capacity", &self.temp.len())
            .field("offset", &self.offset)
            .field("size", &self.size)
            .finish()
    }
}
