//! The scheduler seam and a reference single-threaded host for it.
//!
//! Promises never run continuation bodies inline. Every reaction is handed to
//! a [`Schedule`] implementation which must run it after the current
//! synchronous call stack returns, in FIFO order. [`EventLoop`] is the host
//! this crate ships: a microtask queue plus virtual-time timers.
//!
use std::{
    cell::{Cell, RefCell},
    collections::{BTreeMap, VecDeque},
    fmt,
    rc::Rc,
};

/// Defers a [`Task`] until the current synchronous turn has unwound.
///
/// Implementations must preserve FIFO order among tasks scheduled through the
/// same instance. Nothing is required relative to other kinds of deferred
/// work such as timers.
pub trait Schedule {
    fn schedule(&self, task: Task);
}

/// A unit of deferred work.
pub struct Task {
    callback: Box<dyn FnOnce()>,
}

impl Task {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + 'static,
    {
        Self {
            callback: Box::new(f),
        }
    }

    pub fn run(self) {
        (self.callback)()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task {{ ... }}")
    }
}

/// A single-threaded event loop with a microtask queue and virtual timers.
///
/// Each turn fires one timer and then drains every microtask, including the
/// ones queued while draining. Time only moves when a timer fires or when
/// [`EventLoop::advance_by`] is called, so timer-driven code is deterministic.
///
/// # Examples
///
/// ```
/// use promise_chain::{EventLoop, Task};
/// use std::{cell::RefCell, rc::Rc};
///
/// let event_loop = EventLoop::new();
/// let order = Rc::new(RefCell::new(vec![]));
///
/// let o = order.clone();
/// event_loop.set_timeout(10, move || o.borrow_mut().push("timer"));
/// let o = order.clone();
/// event_loop.enqueue_microtask(Task::new(move || o.borrow_mut().push("micro")));
///
/// event_loop.run_until_idle();
/// assert_eq!(*order.borrow(), vec!["micro", "timer"]);
/// assert_eq!(event_loop.now(), 10);
/// ```
#[derive(Default)]
pub struct EventLoop {
    microtasks: RefCell<VecDeque<Task>>,
    timers: RefCell<BTreeMap<(u64, u64), Task>>,
    now: Cell<u64>,
    next_timer_id: Cell<u64>,
}

thread_local! {
    static CURRENT: Rc<EventLoop> = Rc::new(EventLoop::new());
}

/// The event loop owned by the calling thread.
///
/// [`Promise::new`](crate::Promise::new) and the static combinators schedule
/// through this loop.
pub fn current() -> Rc<EventLoop> {
    CURRENT.with(Rc::clone)
}

impl EventLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time in milliseconds.
    pub fn now(&self) -> u64 {
        self.now.get()
    }

    pub fn enqueue_microtask(&self, task: Task) {
        self.microtasks.borrow_mut().push_back(task);
    }

    /// Runs `f` once the virtual clock reaches `now() + delay_ms`.
    ///
    /// Timers due at the same instant fire in the order they were set.
    /// Returns the timer id.
    pub fn set_timeout<F>(&self, delay_ms: u64, f: F) -> u64
    where
        F: FnOnce() + 'static,
    {
        let id = self.next_timer_id.get();
        self.next_timer_id.set(id + 1);
        let fire_at = self.now.get().saturating_add(delay_ms);
        self.timers.borrow_mut().insert((fire_at, id), Task::new(f));
        id
    }

    pub fn pending_microtasks(&self) -> usize {
        self.microtasks.borrow().len()
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.borrow().len()
    }

    pub fn is_idle(&self) -> bool {
        self.microtasks.borrow().is_empty() && self.timers.borrow().is_empty()
    }

    /// Drains the microtask queue, returning how many tasks ran.
    pub fn run_microtasks(&self) -> usize {
        let mut ran = 0;
        loop {
            // The borrow must end before the task runs; tasks enqueue more tasks.
            let next = self.microtasks.borrow_mut().pop_front();
            let Some(task) = next else { break };
            task.run();
            ran += 1;
        }
        if ran > 0 {
            tracing::trace!(ran, "microtask queue drained");
        }
        ran
    }

    /// Runs microtasks and timers until both queues are empty.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = self.run_microtasks();
        while let Some(task) = self.pop_timer(u64::MAX) {
            task.run();
            ran += 1 + self.run_microtasks();
        }
        ran
    }

    /// Fires the timers due within the next `ms` milliseconds, then moves the
    /// clock to the end of that window.
    pub fn advance_by(&self, ms: u64) -> usize {
        let deadline = self.now.get().saturating_add(ms);
        let mut ran = self.run_microtasks();
        while let Some(task) = self.pop_timer(deadline) {
            task.run();
            ran += 1 + self.run_microtasks();
        }
        self.now.set(deadline);
        ran
    }

    fn pop_timer(&self, deadline: u64) -> Option<Task> {
        let mut timers = self.timers.borrow_mut();
        let (&(fire_at, _), _) = timers.first_key_value()?;
        if fire_at > deadline {
            return None;
        }
        let ((fire_at, id), task) = timers.pop_first()?;
        self.now.set(self.now.get().max(fire_at));
        tracing::trace!(id, fire_at, "timer fired");
        Some(task)
    }
}

impl Schedule for EventLoop {
    fn schedule(&self, task: Task) {
        self.enqueue_microtask(task);
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("now", &self.now.get())
            .field("microtasks", &self.pending_microtasks())
            .field("timers", &self.pending_timers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
use super::*;

#[test]
fn test_new_event_loop_is_idle() {
    let event_loop = EventLoop::new();
    assert!(event_loop.is_idle());
    assert_eq!(event_loop.run_until_idle(), 0);
    assert_eq!(event_loop.now(), 0);
}

#[test]
fn test_microtasks_run_fifo() {
    let event_loop = EventLoop::new();
    let order = Rc::new(RefCell::new(vec![]));
    for i in 0..3 {
        let o = order.clone();
        event_loop.schedule(Task::new(move || o.borrow_mut().push(i)));
    }
    assert_eq!(event_loop.pending_microtasks(), 3);
    assert_eq!(event_loop.run_microtasks(), 3);
    assert_eq!(*order.borrow(), vec![0, 1, 2]);
}

#[test]
fn test_microtask_queued_while_draining_runs_in_same_drain() {
    let event_loop = Rc::new(EventLoop::new());
    let order = Rc::new(RefCell::new(vec![]));

    let (el, o) = (event_loop.clone(), order.clone());
    event_loop.enqueue_microtask(Task::new(move || {
        o.borrow_mut().push("outer");
        let o = o.clone();
        el.enqueue_microtask(Task::new(move || o.borrow_mut().push("inner")));
    }));
    let o = order.clone();
    event_loop.enqueue_microtask(Task::new(move || o.borrow_mut().push("second")));

    assert_eq!(event_loop.run_microtasks(), 3);
    assert_eq!(*order.borrow(), vec!["outer", "second", "inner"]);
}

#[test]
fn test_timers_fire_by_deadline_then_insertion() {
    let event_loop = EventLoop::new();
    let order = Rc::new(RefCell::new(vec![]));
    for (delay, tag) in [(200, 'a'), (50, 'b'), (50, 'c'), (0, 'd')] {
        let o = order.clone();
        event_loop.set_timeout(delay, move || o.borrow_mut().push(tag));
    }
    event_loop.run_until_idle();
    assert_eq!(*order.borrow(), vec!['d', 'b', 'c', 'a']);
    assert_eq!(event_loop.now(), 200);
}

#[test]
fn test_microtasks_drain_between_timers() {
    let event_loop = Rc::new(EventLoop::new());
    let order = Rc::new(RefCell::new(vec![]));

    let (el, o) = (event_loop.clone(), order.clone());
    event_loop.set_timeout(10, move || {
        o.borrow_mut().push("timer 1");
        let o = o.clone();
        el.enqueue_microtask(Task::new(move || o.borrow_mut().push("micro")));
    });
    let o = order.clone();
    event_loop.set_timeout(10, move || o.borrow_mut().push("timer 2"));

    event_loop.run_until_idle();
    assert_eq!(*order.borrow(), vec!["timer 1", "micro", "timer 2"]);
}

#[test]
fn test_advance_by_only_fires_due_timers() {
    let event_loop = EventLoop::new();
    let fired = Rc::new(Cell::new(0));
    for delay in [10, 100] {
        let f = fired.clone();
        event_loop.set_timeout(delay, move || f.set(f.get() + 1));
    }
    event_loop.advance_by(50);
    assert_eq!(fired.get(), 1);
    assert_eq!(event_loop.now(), 50);
    assert_eq!(event_loop.pending_timers(), 1);

    event_loop.advance_by(50);
    assert_eq!(fired.get(), 2);
    assert!(event_loop.is_idle());
}

#[test]
fn test_current_is_per_thread_singleton() {
    assert!(Rc::ptr_eq(&current(), &current()));
}
}
