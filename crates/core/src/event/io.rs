use std::cell::{Cell, RefCell};
use std::os::fd::RawFd;
use std::rc::Rc;

use super::{Callback, Interest, invoke};

/// Readiness watcher bound to one file descriptor.
///
/// The interest mask can be changed direction by direction at any time;
/// call [`Scheduler::update_io_watcher`](crate::Scheduler::update_io_watcher)
/// afterwards so the poller picks up the new mask.
///
/// The watcher does not own the descriptor. Whoever owns the descriptor must
/// remove the watcher from the scheduler before closing it.
pub struct IoWatcher {
    fd: RawFd,
    interest: Cell<Interest>,
    ready: Cell<Interest>,
    registered: Cell<bool>,
    read_callback: RefCell<Option<Callback>>,
    write_callback: RefCell<Option<Callback>>,
    error_callback: RefCell<Option<Callback>>,
}

impl IoWatcher {
    /// Create a watcher with no interest and no callbacks.
    pub fn new(fd: RawFd) -> Rc<Self> {
        Rc::new(Self {
            fd,
            interest: Cell::new(Interest::NONE),
            ready: Cell::new(Interest::NONE),
            registered: Cell::new(false),
            read_callback: RefCell::new(None),
            write_callback: RefCell::new(None),
            error_callback: RefCell::new(None),
        })
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Directions the poller should watch.
    pub fn interest(&self) -> Interest {
        self.interest.get()
    }

    /// Directions reported ready by the most recent poll.
    pub fn ready(&self) -> Interest {
        self.ready.get()
    }

    /// Whether a poller currently holds this watcher.
    pub fn is_registered(&self) -> bool {
        self.registered.get()
    }

    pub fn set_read_callback(&self, cb: impl FnMut() + 'static) {
        *self.read_callback.borrow_mut() = Some(Box::new(cb));
    }

    pub fn set_write_callback(&self, cb: impl FnMut() + 'static) {
        *self.write_callback.borrow_mut() = Some(Box::new(cb));
    }

    pub fn set_error_callback(&self, cb: impl FnMut() + 'static) {
        *self.error_callback.borrow_mut() = Some(Box::new(cb));
    }

    pub fn enable_read_handling(&self) {
        self.modify(|i| i.insert(Interest::READ));
    }

    pub fn enable_write_handling(&self) {
        self.modify(|i| i.insert(Interest::WRITE));
    }

    pub fn enable_error_handling(&self) {
        self.modify(|i| i.insert(Interest::ERROR));
    }

    pub fn disable_read_handling(&self) {
        self.modify(|i| i.remove(Interest::READ));
    }

    pub fn disable_write_handling(&self) {
        self.modify(|i| i.remove(Interest::WRITE));
    }

    pub fn disable_error_handling(&self) {
        self.modify(|i| i.remove(Interest::ERROR));
    }

    pub fn is_none_handling(&self) -> bool {
        self.interest.get().is_empty()
    }

    pub fn is_read_handling(&self) -> bool {
        self.interest.get().contains(Interest::READ)
    }

    pub fn is_write_handling(&self) -> bool {
        self.interest.get().contains(Interest::WRITE)
    }

    pub fn is_error_handling(&self) -> bool {
        self.interest.get().contains(Interest::ERROR)
    }

    /// Dispatch the callbacks matching the last observed readiness.
    ///
    /// Order is read, write, error. A direction whose callback slot is empty
    /// is ignored.
    pub fn handle_event(&self) {
        let ready = self.ready.get();
        if ready.contains(Interest::READ) {
            invoke(&self.read_callback);
        }
        if ready.contains(Interest::WRITE) {
            invoke(&self.write_callback);
        }
        if ready.contains(Interest::ERROR) {
            invoke(&self.error_callback);
        }
    }

    pub(crate) fn set_ready(&self, ready: Interest) {
        self.ready.set(ready);
    }

    pub(crate) fn set_registered(&self, registered: bool) {
        self.registered.set(registered);
        if !registered {
            self.ready.set(Interest::NONE);
        }
    }

    fn modify(&self, f: impl FnOnce(&mut Interest)) {
        let mut interest = self.interest.get();
        f(&mut interest);
        self.interest.set(interest);
    }
}
