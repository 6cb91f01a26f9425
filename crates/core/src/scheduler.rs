//! The reactor loop.
//!
//! A [`Scheduler`] owns one [`Poller`], the timer registry and the trigger
//! registry. [`run_forever`](Scheduler::run_forever) repeats three steps:
//!
//! ```text
//! poll_once()     wait for readiness (bounded), dispatch ready watchers
//! fire timers     every due timer; reschedule those that return true
//! fire triggers   every pending trigger, exactly once
//! ```
//!
//! The thread calling `run_forever` is the only one that ever runs a
//! watcher, timer or trigger callback. Other threads reach the loop through
//! a [`SchedulerRemote`] / [`RemoteTrigger`], which queue a request and
//! wake the poller through an internal socket pair.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::Result;
use crate::event::{IoWatcher, Timer, TimerId, Trigger};
use crate::poller::{Poller, SelectPoller};

/// Upper bound on a single poll wait.
pub const DEFAULT_POLL_MAX_WAIT: Duration = Duration::from_secs(2);

const MIN_TIMER_INTERVAL: Duration = Duration::from_millis(1);

/// Scheduler tuning.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Longest the loop blocks in the poller when no timer is due sooner.
    /// Keeps the loop responsive even with no registered descriptors.
    pub poll_max_wait: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_max_wait: DEFAULT_POLL_MAX_WAIT,
        }
    }
}

struct TimerEntry {
    timer: Rc<Timer>,
    interval: Duration,
}

#[derive(Default)]
struct TimerQueue {
    by_deadline: BTreeMap<(Instant, TimerId), TimerEntry>,
    /// Live timers. An id stays here while its timer is firing so that
    /// `remove_timer` from inside the callback is honoured.
    deadlines: HashMap<TimerId, Instant>,
    next_id: u64,
}

/// State shared with other threads.
struct RemoteShared {
    pending: Mutex<Vec<u64>>,
    quit: AtomicBool,
    waker: UnixStream,
}

impl RemoteShared {
    fn wake(&self) {
        match (&self.waker).write(&[1]) {
            Ok(_) => {}
            // a full buffer means a wake-up is already on its way
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => tracing::warn!(error = %e, "failed to wake scheduler"),
        }
    }
}

/// Thread-safe handle for stopping the loop or firing remote triggers.
#[derive(Clone)]
pub struct SchedulerRemote {
    shared: Arc<RemoteShared>,
}

impl SchedulerRemote {
    /// Ask the loop to return from [`Scheduler::run_forever`].
    pub fn stop(&self) {
        self.shared.quit.store(true, Ordering::SeqCst);
        self.shared.wake();
    }

    /// Same as [`RemoteTrigger::request`].
    pub fn request_trigger(&self, trigger: &RemoteTrigger) {
        trigger.request();
    }
}

/// A [`Trigger`] that may be requested from any thread.
///
/// Created by [`Scheduler::register_remote`]. The trigger itself stays on
/// the scheduler thread; this handle only carries its id.
#[derive(Clone)]
pub struct RemoteTrigger {
    id: u64,
    shared: Arc<RemoteShared>,
}

impl RemoteTrigger {
    /// Queue the trigger to fire on the next loop iteration.
    pub fn request(&self) {
        self.shared.pending.lock().push(self.id);
        self.shared.wake();
    }
}

/// Single-threaded reactor: poller + timers + triggers.
///
/// All methods take `&self`, so callbacks can hold an `Rc`/`Weak` to the
/// scheduler and add or remove events while the loop is dispatching.
pub struct Scheduler {
    config: SchedulerConfig,
    poller: RefCell<Box<dyn Poller>>,
    timers: RefCell<TimerQueue>,
    triggers: RefCell<Vec<Rc<Trigger>>>,
    remote_triggers: RefCell<HashMap<u64, Weak<Trigger>>>,
    next_remote_id: Cell<u64>,
    remote: Arc<RemoteShared>,
    wake_watcher: Rc<IoWatcher>,
}

impl Scheduler {
    /// Create a scheduler backed by a [`SelectPoller`].
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        Self::with_poller(Box::new(SelectPoller::new()), config)
    }

    /// Create a scheduler on top of a custom poller.
    pub fn with_poller(poller: Box<dyn Poller>, config: SchedulerConfig) -> Result<Self> {
        let (mut wake_rx, wake_tx) = UnixStream::pair()?;
        wake_rx.set_nonblocking(true)?;
        wake_tx.set_nonblocking(true)?;

        let wake_watcher = IoWatcher::new(wake_rx.as_raw_fd());
        wake_watcher.enable_read_handling();
        wake_watcher.set_read_callback(move || {
            let mut buf = [0u8; 64];
            loop {
                match wake_rx.read(&mut buf) {
                    Ok(0) => break,
                    Ok(_) => continue,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "wake pipe read failed");
                        break;
                    }
                }
            }
        });

        let scheduler = Self {
            config,
            poller: RefCell::new(poller),
            timers: RefCell::new(TimerQueue::default()),
            triggers: RefCell::new(Vec::new()),
            remote_triggers: RefCell::new(HashMap::new()),
            next_remote_id: Cell::new(0),
            remote: Arc::new(RemoteShared {
                pending: Mutex::new(Vec::new()),
                quit: AtomicBool::new(false),
                waker: wake_tx,
            }),
            wake_watcher,
        };
        scheduler.add_io_watcher(&scheduler.wake_watcher)?;

        tracing::debug!(poll_max_wait = ?scheduler.config.poll_max_wait, "scheduler created");
        Ok(scheduler)
    }

    pub fn add_io_watcher(&self, watcher: &Rc<IoWatcher>) -> Result<()> {
        self.poller.borrow_mut().register(watcher)
    }

    pub fn update_io_watcher(&self, watcher: &Rc<IoWatcher>) -> Result<()> {
        self.poller.borrow_mut().update(watcher)
    }

    pub fn remove_io_watcher(&self, watcher: &Rc<IoWatcher>) -> Result<()> {
        self.poller.borrow_mut().unregister(watcher)
    }

    /// Number of watchers registered by callers (the internal wake-up
    /// watcher is not counted).
    pub fn io_watcher_count(&self) -> usize {
        self.poller.borrow().len().saturating_sub(1)
    }

    /// Fire `timer` every `interval`, starting one interval from now.
    pub fn add_timer(&self, timer: &Rc<Timer>, interval: Duration) -> TimerId {
        self.run_after(timer, interval, interval)
    }

    /// Fire `timer` after `delay`, then every `interval`.
    pub fn run_after(&self, timer: &Rc<Timer>, delay: Duration, interval: Duration) -> TimerId {
        let interval = interval.max(MIN_TIMER_INTERVAL);
        let deadline = Instant::now() + delay;

        let mut timers = self.timers.borrow_mut();
        let id = TimerId(timers.next_id);
        timers.next_id += 1;
        timers.deadlines.insert(id, deadline);
        timers.by_deadline.insert(
            (deadline, id),
            TimerEntry {
                timer: timer.clone(),
                interval,
            },
        );

        tracing::debug!(timer = id.0, ?delay, ?interval, "timer added");
        id
    }

    /// Drop a timer from the registry. Returns whether it was present.
    ///
    /// Safe to call from the timer's own callback; the current fire
    /// completes and the timer is not rescheduled.
    pub fn remove_timer(&self, id: TimerId) -> bool {
        let mut timers = self.timers.borrow_mut();
        match timers.deadlines.remove(&id) {
            Some(deadline) => {
                timers.by_deadline.remove(&(deadline, id));
                tracing::debug!(timer = id.0, "timer removed");
                true
            }
            None => false,
        }
    }

    pub fn timer_count(&self) -> usize {
        self.timers.borrow().deadlines.len()
    }

    /// Schedule `trigger` to fire on the next loop iteration.
    ///
    /// Requesting a trigger that is already pending has no effect.
    pub fn request_trigger(&self, trigger: &Rc<Trigger>) {
        if trigger.arm() {
            self.triggers.borrow_mut().push(trigger.clone());
        }
    }

    /// Expose `trigger` to other threads.
    ///
    /// The scheduler only keeps a weak reference; once the caller drops the
    /// trigger, remote requests for it are ignored.
    pub fn register_remote(&self, trigger: &Rc<Trigger>) -> RemoteTrigger {
        let id = self.next_remote_id.get();
        self.next_remote_id.set(id + 1);

        let mut remote_triggers = self.remote_triggers.borrow_mut();
        remote_triggers.retain(|_, registered| registered.strong_count() > 0);
        remote_triggers.insert(id, Rc::downgrade(trigger));
        RemoteTrigger {
            id,
            shared: self.remote.clone(),
        }
    }

    pub fn remote(&self) -> SchedulerRemote {
        SchedulerRemote {
            shared: self.remote.clone(),
        }
    }

    /// Make [`run_forever`](Self::run_forever) return after the current
    /// iteration.
    pub fn stop(&self) {
        self.remote.quit.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.remote.quit.load(Ordering::SeqCst)
    }

    /// Run the loop until [`stop`](Self::stop) is called.
    pub fn run_forever(&self) {
        tracing::info!("scheduler loop started");
        while !self.is_stopped() {
            self.run_once();
        }
        tracing::info!("scheduler loop stopped");
    }

    /// One loop iteration: poll, fire due timers, fire pending triggers.
    pub fn run_once(&self) {
        self.poll_once();
        self.drain_remote_requests();
        self.fire_due_timers();
        self.fire_triggers();
    }

    /// Wait for readiness and dispatch ready watchers.
    ///
    /// A poller error skips the cycle.
    pub fn poll_once(&self) {
        let timeout = self.next_timeout();
        let result = self.poller.borrow_mut().poll_once(timeout);

        match result {
            Ok(ready) => {
                for watcher in ready {
                    // an earlier callback in this pass may have removed it
                    if watcher.is_registered() {
                        watcher.handle_event();
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                tracing::trace!("poll interrupted");
            }
            Err(e) => {
                tracing::warn!(error = %e, "poll failed, skipping cycle");
            }
        }
    }

    fn next_timeout(&self) -> Duration {
        if !self.triggers.borrow().is_empty()
            || !self.remote.pending.lock().is_empty()
            || self.is_stopped()
        {
            return Duration::ZERO;
        }

        let max_wait = self.config.poll_max_wait;
        match self.timers.borrow().by_deadline.keys().next() {
            Some(&(deadline, _)) => deadline
                .saturating_duration_since(Instant::now())
                .min(max_wait),
            None => max_wait,
        }
    }

    fn drain_remote_requests(&self) {
        let ids = std::mem::take(&mut *self.remote.pending.lock());
        if ids.is_empty() {
            return;
        }

        for id in ids {
            let trigger = self
                .remote_triggers
                .borrow()
                .get(&id)
                .and_then(Weak::upgrade);
            match trigger {
                Some(trigger) => self.request_trigger(&trigger),
                None => {
                    self.remote_triggers.borrow_mut().remove(&id);
                    tracing::debug!(id, "remote request for dropped trigger");
                }
            }
        }
    }

    fn fire_due_timers(&self) {
        let now = Instant::now();
        loop {
            let due = {
                let mut timers = self.timers.borrow_mut();
                let first = timers.by_deadline.keys().next().map(|&(deadline, _)| deadline);
                match first {
                    Some(deadline) if deadline <= now => timers.by_deadline.pop_first(),
                    _ => None,
                }
            };
            let Some(((deadline, id), entry)) = due else {
                break;
            };

            let keep = entry.timer.handle_event();

            let mut timers = self.timers.borrow_mut();
            if keep && timers.deadlines.contains_key(&id) {
                let mut next = deadline + entry.interval;
                if next <= now {
                    // fell behind; don't burst to catch up
                    next = now + entry.interval;
                }
                timers.deadlines.insert(id, next);
                timers.by_deadline.insert((next, id), entry);
            } else {
                timers.deadlines.remove(&id);
                tracing::debug!(timer = id.0, "timer retired");
            }
        }
    }

    fn fire_triggers(&self) {
        let pending = std::mem::take(&mut *self.triggers.borrow_mut());
        for trigger in pending {
            trigger.handle_event();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Err(e) = self.poller.get_mut().unregister(&self.wake_watcher) {
            tracing::debug!(error = %e, "wake watcher already unregistered");
        }
    }
}
