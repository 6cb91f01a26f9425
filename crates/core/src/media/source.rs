use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::{
    AacExtractor, AdtsHeader, ByteCursor, Codec, FrameExtractor, H264Extractor, MediaFrame,
};
use crate::media::frame::DEFAULT_FRAME_MAX_SIZE;
use crate::thread_pool::{PoolHandle, Task, TaskHandler};

/// Per-source tuning.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Number of reusable frame slots.
    pub frame_slots: usize,
    /// Extraction tasks allowed queued or running at once.
    pub max_in_flight: usize,
    /// Capacity of each slot in bytes.
    pub max_frame_size: usize,
    /// Delivery rate a sink should pace this source at.
    pub fps: u32,
    /// Failed attempts in a row after which the source stops resubmitting
    /// itself until a slot is recycled.
    pub max_consecutive_failures: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            frame_slots: 4,
            max_in_flight: 3,
            max_frame_size: DEFAULT_FRAME_MAX_SIZE,
            fps: Codec::H264.default_fps(),
            max_consecutive_failures: 8,
        }
    }
}

impl SourceConfig {
    pub fn h264() -> Self {
        Self::default()
    }

    pub fn aac() -> Self {
        Self {
            fps: Codec::Aac.default_fps(),
            ..Self::default()
        }
    }
}

/// Everything guarded by the source lock.
struct SourceState {
    cursor: ByteCursor,
    extractor: Box<dyn FrameExtractor>,
    input: VecDeque<MediaFrame>,
    output: VecDeque<MediaFrame>,
    consecutive_failures: u32,
}

enum Attempt {
    /// No free slot to fill.
    Idle,
    Extracted,
    Failed { failures: u32 },
}

struct SourceInner {
    name: String,
    codec: Codec,
    config: SourceConfig,
    state: Mutex<SourceState>,
    pool: PoolHandle,
    in_flight: AtomicUsize,
}

impl SourceInner {
    /// Fill one slot from the input queue, under the source lock.
    fn extract_one(&self) -> Attempt {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let Some(mut frame) = state.input.pop_front() else {
            return Attempt::Idle;
        };

        let last_good = state.cursor.position();
        match state.extractor.extract(&mut state.cursor, &mut frame) {
            Ok(()) => {
                tracing::trace!(
                    source = %self.name,
                    slot = frame.slot(),
                    size = frame.size(),
                    "frame ready"
                );
                state.output.push_back(frame);
                state.consecutive_failures = 0;
                Attempt::Extracted
            }
            Err(e) => {
                let restored = if e.rewinds_to_start() {
                    state.cursor.rewind()
                } else {
                    state.cursor.seek_to(last_good)
                };
                if let Err(seek_err) = restored {
                    tracing::debug!(source = %self.name, error = %seek_err, "cursor not restored");
                }

                frame.reset();
                state.input.push_front(frame);
                state.consecutive_failures += 1;
                tracing::warn!(
                    source = %self.name,
                    error = %e,
                    offset = last_good,
                    rewound = e.rewinds_to_start(),
                    failures = state.consecutive_failures,
                    "frame extraction failed"
                );
                Attempt::Failed {
                    failures: state.consecutive_failures,
                }
            }
        }
    }

    fn has_free_slot(&self) -> bool {
        !self.state.lock().input.is_empty()
    }

    /// Queue one more extraction task unless `max_in_flight` are already out.
    fn schedule(self: &Arc<Self>) -> bool {
        let cap = self.config.max_in_flight.max(1);
        let reserved = self
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < cap).then_some(n + 1))
            .is_ok();
        if !reserved {
            return false;
        }

        if let Err(e) = self.pool.add_task(Task::new(self.clone())) {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            tracing::debug!(source = %self.name, error = %e, "extraction task not scheduled");
            return false;
        }
        true
    }
}

impl TaskHandler for SourceInner {
    fn handle_task(self: Arc<Self>) {
        let attempt = self.extract_one();
        self.finish(attempt);
    }
}

impl SourceInner {
    /// Release this task's in-flight slot and decide whether to go again.
    fn finish(self: &Arc<Self>, attempt: Attempt) {
        // released before looking at the queue again, so a concurrent
        // push_input_frame either sees the free in-flight slot or we see its frame
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Attempt::Failed { failures } = attempt
            && failures >= self.config.max_consecutive_failures
        {
            tracing::warn!(
                source = %self.name,
                failures,
                "source stalled until a slot is recycled"
            );
            return;
        }

        if self.has_free_slot() {
            self.schedule();
        }
    }
}

/// A looping, file-backed elementary stream feeding a fixed set of frame slots.
///
/// Slots circulate between two queues behind one lock: the input queue
/// holds free slots, the output queue holds filled frames in file order.
/// Pool workers move slots from input to output; the consumer pops from
/// output and hands the slot back with [`push_input_frame`](Self::push_input_frame).
/// Every slot is always in exactly one queue or held by exactly one party.
///
/// Cloning shares the same source.
#[derive(Clone)]
pub struct MediaSource {
    inner: Arc<SourceInner>,
}

impl MediaSource {
    pub fn new(
        name: impl Into<String>,
        cursor: ByteCursor,
        extractor: Box<dyn FrameExtractor>,
        pool: PoolHandle,
        config: SourceConfig,
    ) -> Self {
        let name = name.into();
        let codec = extractor.codec();
        let input = (0..config.frame_slots)
            .map(|slot| MediaFrame::new(slot, config.max_frame_size))
            .collect();

        let inner = Arc::new(SourceInner {
            name,
            codec,
            state: Mutex::new(SourceState {
                cursor,
                extractor,
                input,
                output: VecDeque::with_capacity(config.frame_slots),
                consecutive_failures: 0,
            }),
            pool,
            in_flight: AtomicUsize::new(0),
            config,
        });

        tracing::debug!(
            source = %inner.name,
            codec = %codec,
            slots = inner.config.frame_slots,
            fps = inner.config.fps,
            "media source created"
        );

        for _ in 0..inner.config.frame_slots {
            if !inner.schedule() {
                break;
            }
        }
        Self { inner }
    }

    /// H.264 Annex B file source. A file that fails to open yields a source
    /// that never produces frames.
    pub fn open_h264(path: impl AsRef<Path>, pool: PoolHandle, config: SourceConfig) -> Self {
        let path = path.as_ref();
        Self::new(
            path.display().to_string(),
            ByteCursor::open_or_empty(path),
            Box::new(H264Extractor::new()),
            pool,
            config,
        )
    }

    /// AAC ADTS file source.
    pub fn open_aac(path: impl AsRef<Path>, pool: PoolHandle, config: SourceConfig) -> Self {
        let path = path.as_ref();
        Self::new(
            path.display().to_string(),
            ByteCursor::open_or_empty(path),
            Box::new(AacExtractor::new()),
            pool,
            config,
        )
    }

    /// Oldest ready frame, if any. The caller owns the slot until it is
    /// handed back with [`push_input_frame`](Self::push_input_frame).
    pub fn pop_output_frame(&self) -> Option<MediaFrame> {
        self.inner.state.lock().output.pop_front()
    }

    /// Return a consumed slot and schedule extraction into it.
    pub fn push_input_frame(&self, mut frame: MediaFrame) {
        frame.reset();
        self.inner.state.lock().input.push_back(frame);
        self.inner.schedule();
    }

    /// Reset the failure count and restart extraction on a stalled source.
    pub fn resume(&self) {
        self.inner.state.lock().consecutive_failures = 0;
        for _ in 0..self.inner.config.max_in_flight {
            if !self.inner.schedule() {
                break;
            }
        }
    }

    /// `(free slots, ready frames)`.
    pub fn queue_depths(&self) -> (usize, usize) {
        let state = self.inner.state.lock();
        (state.input.len(), state.output.len())
    }

    pub fn slot_count(&self) -> usize {
        self.inner.config.frame_slots
    }

    pub fn fps(&self) -> u32 {
        self.inner.config.fps
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn codec(&self) -> Codec {
        self.inner.codec
    }

    /// Extraction tasks currently queued or running.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Whether the last `max_consecutive_failures` attempts all failed.
    pub fn is_stalled(&self) -> bool {
        self.inner.state.lock().consecutive_failures >= self.inner.config.max_consecutive_failures
    }

    /// Header of the most recent ADTS frame (AAC sources only).
    pub fn last_adts_header(&self) -> Option<AdtsHeader> {
        self.inner.state.lock().extractor.adts_header()
    }
}
