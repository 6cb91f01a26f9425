//! Schedulable units driven by the [`Scheduler`](crate::Scheduler).
//!
//! Three kinds of event exist, all owned by whoever creates them and shared
//! with the scheduler through `Rc`:
//!
//! | Kind | Module | Fires when |
//! |------|--------|------------|
//! | [`IoWatcher`] | [`io`] | its descriptor is readable/writable/in error |
//! | [`Timer`] | [`timer`] | its interval elapses, until it returns `false` |
//! | [`Trigger`] | [`trigger`] | once per [`request_trigger`](crate::Scheduler::request_trigger) |
//!
//! None of these types perform I/O. They hold a callback (a boxed closure
//! whose captures are its context) and a little state that the scheduler
//! reads. Everything here is `!Send`: the scheduler thread is the only one
//! that ever touches them.

pub mod io;
pub mod timer;
pub mod trigger;

use std::cell::RefCell;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

pub use io::IoWatcher;
pub use timer::{Timer, TimerId};
pub use trigger::Trigger;

/// Callback stored on an [`IoWatcher`] or [`Trigger`].
pub type Callback = Box<dyn FnMut()>;

/// Readiness directions a watcher can be interested in.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Interest(u8);

impl Interest {
    pub const NONE: Interest = Interest(0);
    pub const READ: Interest = Interest(1);
    pub const WRITE: Interest = Interest(2);
    pub const ERROR: Interest = Interest(4);

    pub fn contains(self, other: Interest) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Interest) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Interest) {
        self.0 &= !other.0;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        Interest(self.0 | rhs.0)
    }
}

impl BitOrAssign for Interest {
    fn bitor_assign(&mut self, rhs: Interest) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "NONE");
        }
        let mut sep = "";
        for (flag, name) in [
            (Interest::READ, "READ"),
            (Interest::WRITE, "WRITE"),
            (Interest::ERROR, "ERROR"),
        ] {
            if self.contains(flag) {
                write!(f, "{sep}{name}")?;
                sep = "|";
            }
        }
        Ok(())
    }
}

/// Run the callback in `slot`, if any.
///
/// The callback is moved out for the duration of the call so that it may
/// install a replacement for itself. It is put back only if the slot is
/// still empty afterwards.
pub(crate) fn invoke(slot: &RefCell<Option<Callback>>) -> bool {
    let taken = slot.borrow_mut().take();
    match taken {
        Some(mut callback) => {
            callback();
            let mut slot = slot.borrow_mut();
            if slot.is_none() {
                *slot = Some(callback);
            }
            true
        }
        None => false,
    }
}
