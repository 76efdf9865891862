//! The settlement core: a pending/fulfilled/rejected state machine with the
//! continuation queues that wait on it.
//!
use crate::{
    event_loop::{self, Schedule, Task},
    resolution::{resolve_promise, Resolution},
    Error,
};
use std::{
    cell::RefCell,
    fmt,
    future::Future,
    mem,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll, Waker},
};

/// One half of a registered continuation, fed the settled payload.
pub(crate) type Reaction<A> = Box<dyn FnOnce(A)>;

/// Where a [`Promise`] is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Pending,
    Fulfilled,
    Rejected,
}

struct Inner<T, E> {
    outcome: Option<Result<T, E>>,
    fulfill_queue: Vec<Reaction<T>>,
    reject_queue: Vec<Reaction<E>>,
    wakers: Vec<Waker>,
}

/// A value that settles exactly once, to a `T` or to a reason `E`.
///
/// `Promise` is a handle: clones share the same state. Continuations
/// registered with [`then`](Promise::then), [`then_else`](Promise::then_else),
/// [`catch`](Promise::catch) or [`finally`](Promise::finally) always run from
/// the scheduler, never inside the registering call, and run in registration
/// order.
///
/// # Examples
///
/// ```
/// use promise_chain::{event_loop, Promise, Resolution};
///
/// let (promise, resolver) = Promise::<i32>::deferred();
/// let doubled = promise.then(|v| Ok(Resolution::Value(v * 2)));
///
/// resolver.fulfill(21);
/// assert!(doubled.is_pending());
///
/// event_loop::current().run_until_idle();
/// assert_eq!(doubled.outcome(), Some(Ok(42)));
/// ```
pub struct Promise<T, E = Error> {
    inner: Rc<RefCell<Inner<T, E>>>,
    scheduler: Rc<dyn Schedule>,
}

/// The settle functions of one [`Promise`].
///
/// Only the first call to [`fulfill`](Resolver::fulfill) or
/// [`reject`](Resolver::reject), across all clones, has any effect.
pub struct Resolver<T, E = Error> {
    promise: Promise<T, E>,
}

impl<T, E> Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    /// Creates a promise and runs `initializer` synchronously with its
    /// [`Resolver`].
    ///
    /// An `Err` returned by the initializer rejects the promise, unless the
    /// initializer already settled it.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_chain::{Error, Promise, Status};
    ///
    /// let ok = Promise::<i32>::new(|resolver| {
    ///     resolver.fulfill(1);
    ///     Ok(())
    /// });
    /// assert_eq!(ok.status(), Status::Fulfilled);
    ///
    /// let failed = Promise::<i32>::new(|_| Err(Error::Rejected("boom".into())));
    /// assert_eq!(failed.outcome(), Some(Err(Error::Rejected("boom".into()))));
    /// ```
    pub fn new<F>(initializer: F) -> Self
    where
        F: FnOnce(Resolver<T, E>) -> Result<(), E>,
    {
        Self::new_in(event_loop::current(), initializer)
    }

    /// Like [`Promise::new`], dispatching continuations through `scheduler`.
    ///
    /// Promises chained from this one inherit the scheduler.
    pub fn new_in<F>(scheduler: Rc<dyn Schedule>, initializer: F) -> Self
    where
        F: FnOnce(Resolver<T, E>) -> Result<(), E>,
    {
        let promise = Self::pending_in(scheduler);
        if let Err(reason) = initializer(promise.resolver()) {
            promise.settle_rejected(reason);
        }
        promise
    }

    /// A pending promise together with its settle functions.
    pub fn deferred() -> (Self, Resolver<T, E>) {
        let promise = Self::pending_in(event_loop::current());
        let resolver = promise.resolver();
        (promise, resolver)
    }

    /// Registers `on_fulfilled`; a rejection skips it and propagates to the
    /// returned promise.
    pub fn then<U, F>(&self, on_fulfilled: F) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<Resolution<U, E>, E> + 'static,
    {
        self.chain(on_fulfilled, Err)
    }

    /// Registers a handler for each outcome.
    ///
    /// Whichever handler runs decides the returned promise: `Ok` goes through
    /// the resolution procedure, `Err` rejects it.
    pub fn then_else<U, F, R>(&self, on_fulfilled: F, on_rejected: R) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<Resolution<U, E>, E> + 'static,
        R: FnOnce(E) -> Result<Resolution<U, E>, E> + 'static,
    {
        self.chain(on_fulfilled, on_rejected)
    }

    /// Registers `on_rejected`; a fulfillment passes through unchanged.
    pub fn catch<R>(&self, on_rejected: R) -> Promise<T, E>
    where
        R: FnOnce(E) -> Result<Resolution<T, E>, E> + 'static,
    {
        self.chain(|value| Ok(Resolution::Value(value)), on_rejected)
    }

    /// `then` for an infallible plain-value transformation.
    pub fn map<U, F>(&self, f: F) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> U + 'static,
    {
        self.then(move |value| Ok(Resolution::Value(f(value))))
    }

    fn chain<U, F, R>(&self, on_fulfilled: F, on_rejected: R) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<Resolution<U, E>, E> + 'static,
        R: FnOnce(E) -> Result<Resolution<U, E>, E> + 'static,
    {
        let next = Promise::pending_in(self.scheduler.clone());
        let (fulfilled_next, rejected_next) = (next.clone(), next.clone());
        self.register(
            Box::new(move |value| fulfilled_next.settle_with(on_fulfilled(value))),
            Box::new(move |reason| rejected_next.settle_with(on_rejected(reason))),
        );
        next
    }

    fn settle_with(&self, result: Result<Resolution<T, E>, E>) {
        match result {
            Ok(resolution) => resolve_promise(self, resolution),
            Err(reason) => {
                self.settle_rejected(reason);
            }
        }
    }

    /// Queues the reactions while pending, otherwise schedules the one that
    /// matches the outcome. Never runs a reaction inline.
    pub(crate) fn register(&self, on_fulfilled: Reaction<T>, on_rejected: Reaction<E>) {
        let settled = {
            let mut inner = self.inner.borrow_mut();
            match inner.outcome.clone() {
                Some(outcome) => outcome,
                None => {
                    inner.fulfill_queue.push(on_fulfilled);
                    inner.reject_queue.push(on_rejected);
                    return;
                }
            }
        };
        match settled {
            Ok(value) => self.scheduler.schedule(Task::new(move || on_fulfilled(value))),
            Err(reason) => self.scheduler.schedule(Task::new(move || on_rejected(reason))),
        }
    }

    pub(crate) fn settle_fulfilled(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    pub(crate) fn settle_rejected(&self, reason: E) -> bool {
        self.settle(Err(reason))
    }

    fn settle(&self, outcome: Result<T, E>) -> bool {
        let (fulfill_queue, reject_queue, wakers) = {
            let mut inner = self.inner.borrow_mut();
            if inner.outcome.is_some() {
                return false;
            }
            inner.outcome = Some(outcome.clone());
            (
                mem::take(&mut inner.fulfill_queue),
                mem::take(&mut inner.reject_queue),
                mem::take(&mut inner.wakers),
            )
        };
        match outcome {
            Ok(value) => {
                tracing::trace!(reactions = fulfill_queue.len(), "promise fulfilled");
                drop(reject_queue);
                self.schedule_all(fulfill_queue, value);
            }
            Err(reason) => {
                tracing::trace!(reactions = reject_queue.len(), "promise rejected");
                drop(fulfill_queue);
                self.schedule_all(reject_queue, reason);
            }
        }
        for waker in wakers {
            waker.wake();
        }
        true
    }

    fn schedule_all<A>(&self, queue: Vec<Reaction<A>>, payload: A)
    where
        A: Clone + 'static,
    {
        for reaction in queue {
            let payload = payload.clone();
            self.scheduler.schedule(Task::new(move || reaction(payload)));
        }
    }
}

impl<T, E> Promise<T, E> {
    pub(crate) fn pending_in(scheduler: Rc<dyn Schedule>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                outcome: None,
                fulfill_queue: vec![],
                reject_queue: vec![],
                wakers: vec![],
            })),
            scheduler,
        }
    }

    pub(crate) fn scheduler(&self) -> Rc<dyn Schedule> {
        self.scheduler.clone()
    }

    fn resolver(&self) -> Resolver<T, E> {
        Resolver {
            promise: self.clone(),
        }
    }

    pub fn status(&self) -> Status {
        match self.inner.borrow().outcome {
            None => Status::Pending,
            Some(Ok(_)) => Status::Fulfilled,
            Some(Err(_)) => Status::Rejected,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status() == Status::Pending
    }

    /// Whether both handles refer to the same promise.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Clone, E: Clone> Promise<T, E> {
    /// A copy of the settled value or reason, `None` while pending.
    pub fn outcome(&self) -> Option<Result<T, E>> {
        self.inner.borrow().outcome.clone()
    }
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            scheduler: self.scheduler.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("status", &self.status())
            .finish()
    }
}

/// Awaiting a promise yields its outcome. Pending polls park the task's waker
/// until settlement; continuations still need the scheduler to be driven.
impl<T: Clone, E: Clone> Future for Promise<T, E> {
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.inner.borrow_mut();
        match inner.outcome.clone() {
            Some(outcome) => Poll::Ready(outcome),
            None => {
                if !inner.wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    inner.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

impl<T, E> Resolver<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    /// Fulfills the promise with `value`. Returns `false` if it had already
    /// settled.
    pub fn fulfill(&self, value: T) -> bool {
        self.promise.settle_fulfilled(value)
    }

    /// Rejects the promise with `reason`. Returns `false` if it had already
    /// settled.
    pub fn reject(&self, reason: E) -> bool {
        self.promise.settle_rejected(reason)
    }
}

impl<T, E> Resolver<T, E> {
    pub fn promise(&self) -> Promise<T, E> {
        self.promise.clone()
    }
}

impl<T, E> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Resolver<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("promise", &self.promise)
            .finish()
    }
}
