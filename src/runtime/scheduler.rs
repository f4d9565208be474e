//! Microtask queue and virtual-clock timers.
//!
//! Nothing runs on its own: callers drain microtasks with
//! [`Runtime::run_microtasks`] and move time with [`Runtime::advance`].

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use super::Runtime;

type Task = Box<dyn FnOnce()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

#[derive(Default)]
pub(crate) struct Scheduler {
    now: Cell<Duration>,
    next_timer: Cell<u64>,
    timers: RefCell<BTreeMap<(Duration, u64), Task>>,
    due: RefCell<HashMap<u64, Duration>>,
    microtasks: RefCell<VecDeque<Task>>,
}

impl Scheduler {
    pub(crate) fn clear(&self) {
        self.timers.borrow_mut().clear();
        self.due.borrow_mut().clear();
        self.microtasks.borrow_mut().clear();
    }

    fn pop_microtask(&self) -> Option<Task> {
        self.microtasks.borrow_mut().pop_front()
    }

    fn pop_timer_until(&self, limit: Duration) -> Option<(Duration, Task)> {
        let mut timers = self.timers.borrow_mut();
        let (&(at, id), _) = timers.iter().next()?;
        if at > limit {
            return None;
        }
        let task = timers.remove(&(at, id))?;
        self.due.borrow_mut().remove(&id);
        Some((at, task))
    }
}

impl Runtime {
    pub fn queue_microtask(&self, task: impl FnOnce() + 'static) {
        if self.is_torn_down() {
            return;
        }
        self.inner.scheduler.microtasks.borrow_mut().push_back(Box::new(task));
    }

    /// Runs queued microtasks, including ones queued while draining.
    ///
    /// Returns how many ran.
    pub fn run_microtasks(&self) -> usize {
        let limit = self.inner.config.max_microtask_rounds.max(1);
        let mut ran = 0;
        while let Some(task) = self.inner.scheduler.pop_microtask() {
            task();
            ran += 1;
            if ran >= limit {
                tracing::warn!(limit, "microtask limit reached, leaving the rest queued");
                break;
            }
        }
        ran
    }

    pub fn set_timeout(&self, delay: Duration, task: impl FnOnce() + 'static) -> TimerId {
        let scheduler = &self.inner.scheduler;
        let id = scheduler.next_timer.get();
        scheduler.next_timer.set(id + 1);
        if !self.is_torn_down() {
            let at = scheduler.now.get() + delay;
            scheduler.timers.borrow_mut().insert((at, id), Box::new(task));
            scheduler.due.borrow_mut().insert(id, at);
        }
        TimerId(id)
    }

    /// Cancels a pending timer. Returns false if it already ran or was cleared.
    pub fn clear_timeout(&self, timer: TimerId) -> bool {
        let scheduler = &self.inner.scheduler;
        let Some(at) = scheduler.due.borrow_mut().remove(&timer.0) else {
            return false;
        };
        scheduler.timers.borrow_mut().remove(&(at, timer.0)).is_some()
    }

    pub fn now(&self) -> Duration {
        self.inner.scheduler.now.get()
    }

    pub fn pending_timers(&self) -> usize {
        self.inner.scheduler.timers.borrow().len()
    }

    /// Moves the virtual clock forward, firing due timers in order.
    ///
    /// Microtasks are drained before and after every timer.
    pub fn advance(&self, by: Duration) {
        let target = self.now() + by;
        self.run_microtasks();
        while let Some((at, task)) = self.inner.scheduler.pop_timer_until(target) {
            self.inner.scheduler.now.set(at);
            task();
            self.run_microtasks();
        }
        self.inner.scheduler.now.set(target);
    }
}
