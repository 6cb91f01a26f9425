use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Identifier handed out by [`Scheduler::add_timer`](crate::Scheduler::add_timer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(pub(crate) u64);

/// Timer callback. Returning `true` keeps the timer running for another
/// period; `false` retires it for good.
pub type TimerCallback = Box<dyn FnMut() -> bool>;

/// Repeating, cancelable timer.
///
/// Cancellation is cooperative: [`stop`](Self::stop) flips a flag that the
/// scheduler checks before rescheduling. A fire that is already running
/// completes.
pub struct Timer {
    callback: RefCell<Option<TimerCallback>>,
    stopped: Cell<bool>,
}

impl Timer {
    pub fn new(cb: impl FnMut() -> bool + 'static) -> Rc<Self> {
        Rc::new(Self {
            callback: RefCell::new(Some(Box::new(cb))),
            stopped: Cell::new(false),
        })
    }

    pub fn set_timeout_callback(&self, cb: impl FnMut() -> bool + 'static) {
        *self.callback.borrow_mut() = Some(Box::new(cb));
    }

    /// Retire the timer permanently.
    pub fn stop(&self) {
        self.stopped.set(true);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.get()
    }

    /// Fire the timer once. Returns whether it should be rescheduled.
    pub fn handle_event(&self) -> bool {
        if self.stopped.get() {
            return false;
        }

        let taken = self.callback.borrow_mut().take();
        let keep = match taken {
            Some(mut cb) => {
                let keep = cb();
                let mut slot = self.callback.borrow_mut();
                if slot.is_none() {
                    *slot = Some(cb);
                }
                keep
            }
            None => true,
        };

        if !keep {
            self.stopped.set(true);
        }
        !self.stopped.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn continues_until_callback_returns_false() {
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        let timer = Timer::new(move || {
            c.set(c.get() + 1);
            c.get() < 3
        });

        assert!(timer.handle_event());
        assert!(timer.handle_event());
        assert!(!timer.handle_event());
        assert!(timer.is_stopped());

        // retired timers never fire again
        assert!(!timer.handle_event());
        assert_eq!(count.get(), 3);
    }

    #[test]
    fn stop_from_inside_callback() {
        let slot: Rc<RefCell<Option<Rc<Timer>>>> = Rc::new(RefCell::new(None));
        let s = slot.clone();
        let timer = Timer::new(move || {
            if let Some(t) = s.borrow().as_ref() {
                t.stop();
            }
            true
        });
        *slot.borrow_mut() = Some(timer.clone());

        assert!(!timer.handle_event());
        assert!(timer.is_stopped());
        slot.borrow_mut().take();
    }

    #[test]
    fn stopped_timer_skips_callback() {
        let fired = Rc::new(Cell::new(false));
        let f = fired.clone();
        let timer = Timer::new(move || {
            f.set(true);
            true
        });
        timer.stop();
        assert!(!timer.handle_event());
        assert!(!fired.get());
    }
}
