use std::cell::{Cell, RefCell};
use std::rc::Rc;

use super::{Callback, invoke};

/// One-shot deferred callback.
///
/// Used to move work out of a callback (or off another thread, through a
/// [`RemoteTrigger`](crate::scheduler::RemoteTrigger)) and back onto the
/// scheduler loop. Each [`request_trigger`](crate::Scheduler::request_trigger)
/// fires the callback at most once; requesting it again while it is still
/// pending is a no-op.
pub struct Trigger {
    callback: RefCell<Option<Callback>>,
    pending: Cell<bool>,
}

impl Trigger {
    pub fn new(cb: impl FnMut() + 'static) -> Rc<Self> {
        Rc::new(Self {
            callback: RefCell::new(Some(Box::new(cb))),
            pending: Cell::new(false),
        })
    }

    pub fn set_trigger_callback(&self, cb: impl FnMut() + 'static) {
        *self.callback.borrow_mut() = Some(Box::new(cb));
    }

    /// Whether a request is waiting for the next loop iteration.
    pub fn is_pending(&self) -> bool {
        self.pending.get()
    }

    /// Run the callback. Pending state is cleared first so the callback can
    /// re-arm its own trigger.
    pub fn handle_event(&self) {
        self.pending.set(false);
        invoke(&self.callback);
    }

    /// Mark as pending. Returns `false` if it already was.
    pub(crate) fn arm(&self) -> bool {
        !self.pending.replace(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arm_is_idempotent_until_fired() {
        let t = Trigger::new(|| {});
        assert!(t.arm());
        assert!(!t.arm());
        assert!(t.is_pending());
        t.handle_event();
        assert!(!t.is_pending());
        assert!(t.arm());
    }

    #[test]
    fn pending_cleared_before_callback() {
        let slot: Rc<RefCell<Option<Rc<Trigger>>>> = Rc::new(RefCell::new(None));
        let seen = Rc::new(Cell::new(true));

        let s = slot.clone();
        let seen2 = seen.clone();
        let t = Trigger::new(move || {
            if let Some(t) = s.borrow().as_ref() {
                seen2.set(t.is_pending());
            }
        });
        *slot.borrow_mut() = Some(t.clone());

        t.arm();
        t.handle_event();
        assert!(!seen.get());
        slot.borrow_mut().take();
    }
}
