//! Readiness polling.
//!
//! The [`Poller`] trait is the four-method contract the scheduler relies on.
//! [`SelectPoller`] implements it on top of `select(2)`: one `fd_set` per
//! direction, rebuilt from the watcher map whenever a registration changes.
//!
//! `select` copies O(descriptors) state on every call and cannot watch
//! descriptors at or above `FD_SETSIZE`. An edge-notification backend can
//! be dropped in behind the same trait via
//! [`Scheduler::with_poller`](crate::Scheduler::with_poller).

use std::collections::BTreeMap;
use std::io;
use std::mem::MaybeUninit;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::Duration;

use crate::error::{LiveError, Result};
use crate::event::{Interest, IoWatcher};

const SELECT_LIMIT: usize = libc::FD_SETSIZE as usize;

/// Readiness backend driven by the [`Scheduler`](crate::Scheduler).
///
/// `poll_once` only *collects* ready watchers and records their readiness;
/// the caller dispatches them afterwards. Splitting the two phases lets a
/// callback register or unregister watchers without disturbing the
/// poller's own iteration.
pub trait Poller {
    /// Start watching `watcher`'s descriptor with its current interest.
    fn register(&mut self, watcher: &Rc<IoWatcher>) -> Result<()>;

    /// Re-read the interest mask of an already registered watcher.
    fn update(&mut self, watcher: &Rc<IoWatcher>) -> Result<()>;

    /// Stop watching the descriptor.
    fn unregister(&mut self, watcher: &Rc<IoWatcher>) -> Result<()>;

    /// Block for at most `timeout` and return the watchers that became ready.
    ///
    /// Each returned watcher has its [`ready`](IoWatcher::ready) mask set.
    fn poll_once(&mut self, timeout: Duration) -> io::Result<Vec<Rc<IoWatcher>>>;

    /// Number of registered descriptors.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Copy)]
struct FdSet(libc::fd_set);

impl FdSet {
    fn new() -> Self {
        let mut raw = MaybeUninit::<libc::fd_set>::uninit();
        // SAFETY: FD_ZERO fully initialises the set.
        unsafe {
            libc::FD_ZERO(raw.as_mut_ptr());
            FdSet(raw.assume_init())
        }
    }

    fn insert(&mut self, fd: RawFd) {
        debug_assert!(fd >= 0 && (fd as usize) < SELECT_LIMIT);
        // SAFETY: fd is bounds-checked at registration.
        unsafe { libc::FD_SET(fd, &mut self.0) }
    }

    fn contains(&self, fd: RawFd) -> bool {
        // SAFETY: fd is bounds-checked at registration.
        unsafe { libc::FD_ISSET(fd, &self.0) }
    }
}

/// `select(2)` based poller.
pub struct SelectPoller {
    watchers: BTreeMap<RawFd, Rc<IoWatcher>>,
    read_set: FdSet,
    write_set: FdSet,
    error_set: FdSet,
    max_fd: Option<RawFd>,
}

impl SelectPoller {
    pub fn new() -> Self {
        Self {
            watchers: BTreeMap::new(),
            read_set: FdSet::new(),
            write_set: FdSet::new(),
            error_set: FdSet::new(),
            max_fd: None,
        }
    }

    fn check_fd(fd: RawFd) -> Result<()> {
        if fd < 0 {
            return Err(LiveError::InvalidDescriptor(fd));
        }
        if fd as usize >= SELECT_LIMIT {
            return Err(LiveError::DescriptorOutOfRange {
                fd,
                limit: SELECT_LIMIT,
            });
        }
        Ok(())
    }

    /// Recompute the three descriptor sets from the watcher map.
    fn rebuild(&mut self) {
        let mut read_set = FdSet::new();
        let mut write_set = FdSet::new();
        let mut error_set = FdSet::new();

        for (&fd, watcher) in &self.watchers {
            let interest = watcher.interest();
            if interest.contains(Interest::READ) {
                read_set.insert(fd);
            }
            if interest.contains(Interest::WRITE) {
                write_set.insert(fd);
            }
            if interest.contains(Interest::ERROR) {
                error_set.insert(fd);
            }
        }

        self.read_set = read_set;
        self.write_set = write_set;
        self.error_set = error_set;
        self.max_fd = self.watchers.keys().next_back().copied();
    }
}

impl Default for SelectPoller {
    fn default() -> Self {
        Self::new()
    }
}

impl Poller for SelectPoller {
    fn register(&mut self, watcher: &Rc<IoWatcher>) -> Result<()> {
        let fd = watcher.fd();
        Self::check_fd(fd)?;

        if let Some(previous) = self.watchers.insert(fd, watcher.clone()) {
            if !Rc::ptr_eq(&previous, watcher) {
                tracing::warn!(fd, "descriptor re-registered by a different watcher");
                previous.set_registered(false);
            }
        }
        watcher.set_registered(true);
        self.rebuild();

        tracing::debug!(
            fd,
            interest = ?watcher.interest(),
            total = self.watchers.len(),
            "io watcher registered"
        );
        Ok(())
    }

    fn update(&mut self, watcher: &Rc<IoWatcher>) -> Result<()> {
        let fd = watcher.fd();
        match self.watchers.get(&fd) {
            Some(current) if Rc::ptr_eq(current, watcher) => {}
            _ => return Err(LiveError::NotRegistered(fd)),
        }
        self.rebuild();

        tracing::trace!(fd, interest = ?watcher.interest(), "io watcher updated");
        Ok(())
    }

    fn unregister(&mut self, watcher: &Rc<IoWatcher>) -> Result<()> {
        let fd = watcher.fd();
        match self.watchers.get(&fd) {
            Some(current) if Rc::ptr_eq(current, watcher) => {}
            _ => return Err(LiveError::NotRegistered(fd)),
        }
        self.watchers.remove(&fd);
        watcher.set_registered(false);
        self.rebuild();

        tracing::debug!(fd, total = self.watchers.len(), "io watcher unregistered");
        Ok(())
    }

    fn poll_once(&mut self, timeout: Duration) -> io::Result<Vec<Rc<IoWatcher>>> {
        let mut read_set = self.read_set;
        let mut write_set = self.write_set;
        let mut error_set = self.error_set;
        let nfds = self.max_fd.map_or(0, |fd| fd + 1);

        let mut tv = libc::timeval {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_usec: timeout.subsec_micros() as libc::suseconds_t,
        };

        // SAFETY: all pointers reference live, initialised locals.
        let ret = unsafe {
            libc::select(
                nfds,
                &mut read_set.0,
                &mut write_set.0,
                &mut error_set.0,
                &mut tv,
            )
        };

        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        if ret == 0 {
            return Ok(Vec::new());
        }

        let mut ready = Vec::with_capacity(ret as usize);
        for (&fd, watcher) in &self.watchers {
            let mut events = Interest::NONE;
            if read_set.contains(fd) {
                events |= Interest::READ;
            }
            if write_set.contains(fd) {
                events |= Interest::WRITE;
            }
            if error_set.contains(fd) {
                events |= Interest::ERROR;
            }
            if !events.is_empty() {
                watcher.set_ready(events);
                ready.push(watcher.clone());
            }
        }

        tracing::trace!(selected = ret, ready = ready.len(), "poll cycle");
        Ok(ready)
    }

    fn len(&self) -> usize {
        self.watchers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn rejects_negative_descriptor() {
        let mut poller = SelectPoller::new();
        let w = IoWatcher::new(-1);
        assert!(matches!(
            poller.register(&w),
            Err(LiveError::InvalidDescriptor(-1))
        ));
    }

    #[test]
    fn rejects_descriptor_beyond_select_limit() {
        let mut poller = SelectPoller::new();
        let w = IoWatcher::new(SELECT_LIMIT as RawFd);
        assert!(matches!(
            poller.register(&w),
            Err(LiveError::DescriptorOutOfRange { .. })
        ));
    }

    #[test]
    fn update_unknown_watcher_fails() {
        let mut poller = SelectPoller::new();
        let w = IoWatcher::new(5);
        assert!(matches!(poller.update(&w), Err(LiveError::NotRegistered(5))));
        assert!(matches!(
            poller.unregister(&w),
            Err(LiveError::NotRegistered(5))
        ));
    }

    #[test]
    fn reports_readable_socket() {
        let (mut a, b) = UnixStream::pair().unwrap();
        let mut poller = SelectPoller::new();
        let w = IoWatcher::new(b.as_raw_fd());
        w.enable_read_handling();
        poller.register(&w).unwrap();
        assert!(w.is_registered());

        let ready = poller.poll_once(Duration::from_millis(10)).unwrap();
        assert!(ready.is_empty());

        a.write_all(b"x").unwrap();
        let ready = poller.poll_once(Duration::from_secs(1)).unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].ready(), Interest::READ);
    }

    #[test]
    fn update_rereads_interest_mask() {
        let (_a, b) = UnixStream::pair().unwrap();
        let mut poller = SelectPoller::new();
        let w = IoWatcher::new(b.as_raw_fd());
        w.enable_read_handling();
        poller.register(&w).unwrap();

        assert!(poller.poll_once(Duration::from_millis(10)).unwrap().is_empty());

        // a connected socket with buffer space is always writable
        w.enable_write_handling();
        poller.update(&w).unwrap();
        let ready = poller.poll_once(Duration::from_secs(1)).unwrap();
        assert_eq!(ready.len(), 1);
        assert!(ready[0].ready().contains(Interest::WRITE));
    }

    #[test]
    fn unregister_stops_reporting() {
        let (_a, b) = UnixStream::pair().unwrap();
        let mut poller = SelectPoller::new();
        let w = IoWatcher::new(b.as_raw_fd());
        w.enable_write_handling();
        poller.register(&w).unwrap();
        assert_eq!(poller.len(), 1);

        poller.unregister(&w).unwrap();
        assert!(poller.is_empty());
        assert!(!w.is_registered());
        assert!(poller.poll_once(Duration::from_millis(10)).unwrap().is_empty());
    }

    #[test]
    fn empty_poller_waits_for_timeout() {
        let mut poller = SelectPoller::new();
        let start = std::time::Instant::now();
        let ready = poller.poll_once(Duration::from_millis(20)).unwrap();
        assert!(ready.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(15));
    }
}
