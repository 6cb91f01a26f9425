//! Timer-paced frame consumer.
//!
//! A [`Sink`] is the scheduler-side end of a [`MediaSource`]: once per frame
//! period it takes the oldest ready frame, hands it to a delivery callback
//! (the network layer in a server) and returns the slot to the source.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use crate::event::{Timer, TimerId};
use crate::media::{MediaFrame, MediaSource};
use crate::scheduler::Scheduler;

#[derive(Default)]
struct SinkStats {
    delivered: Cell<u64>,
    underruns: Cell<u64>,
}

/// Pulls frames from a source at its frame rate.
pub struct Sink {
    source: MediaSource,
    timer: Rc<Timer>,
    timer_id: TimerId,
    stats: Rc<SinkStats>,
}

impl Sink {
    /// Start pulling from `source` every `1 / fps` seconds.
    ///
    /// A tick with no ready frame is counted as an underrun and otherwise
    /// ignored.
    pub fn attach(
        scheduler: &Scheduler,
        source: MediaSource,
        mut deliver: impl FnMut(&MediaFrame) + 'static,
    ) -> Self {
        let interval = frame_interval(source.fps());
        let stats = Rc::new(SinkStats::default());

        let timer = {
            let source = source.clone();
            let stats = stats.clone();
            Timer::new(move || {
                match source.pop_output_frame() {
                    Some(frame) => {
                        deliver(&frame);
                        stats.delivered.set(stats.delivered.get() + 1);
                        source.push_input_frame(frame);
                    }
                    None => {
                        stats.underruns.set(stats.underruns.get() + 1);
                        tracing::trace!(source = source.name(), "no frame ready");
                    }
                }
                true
            })
        };
        let timer_id = scheduler.add_timer(&timer, interval);

        tracing::info!(
            source = source.name(),
            codec = %source.codec(),
            ?interval,
            "sink attached"
        );
        Self {
            source,
            timer,
            timer_id,
            stats,
        }
    }

    /// Stop pulling frames. Slots already delivered were recycled.
    pub fn detach(self, scheduler: &Scheduler) {
        self.timer.stop();
        scheduler.remove_timer(self.timer_id);
        tracing::info!(
            source = self.source.name(),
            delivered = self.frames_delivered(),
            underruns = self.underruns(),
            "sink detached"
        );
    }

    pub fn frames_delivered(&self) -> u64 {
        self.stats.delivered.get()
    }

    /// Ticks that found the output queue empty.
    pub fn underruns(&self) -> u64 {
        self.stats.underruns.get()
    }

    pub fn source(&self) -> &MediaSource {
        &self.source
    }
}

fn frame_interval(fps: u32) -> Duration {
    Duration::from_micros(1_000_000 / u64::from(fps.max(1)))
}
