//! The resolution procedure: how a continuation's result becomes the next
//! promise's settlement, adopting promises and foreign thenables along the way.
//!
use crate::{Error, Promise};
use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::Rc,
};

/// Delivers a thenable's eventual value. The value may itself be adoptable.
pub type OnFulfilled<T, E> = Box<dyn FnOnce(Resolution<T, E>)>;

/// Delivers a thenable's eventual reason. Reasons are never unwrapped.
pub type OnRejected<E> = Box<dyn FnOnce(E)>;

/// Anything that can register a pair of continuations and later call one of
/// them.
///
/// This is the interop seam for foreign deferred values. [`Promise`]
/// implements it; adapters for other implementations implement it too, and
/// neither side needs the other's concrete type.
///
/// A well-behaved thenable calls exactly one callback, once. Adoption
/// tolerates thenables that call both, call one from inside `subscribe`, or
/// return `Err` after calling one: only the first signal counts.
///
/// # Examples
///
/// ```
/// use promise_chain::{
///     event_loop, Error, OnFulfilled, OnRejected, Promise, Resolution, Thenable,
/// };
///
/// struct Ready(i32);
///
/// impl Thenable<i32, Error> for Ready {
///     fn subscribe(
///         &self,
///         on_fulfilled: OnFulfilled<i32, Error>,
///         _: OnRejected<Error>,
///     ) -> Result<(), Error> {
///         on_fulfilled(Resolution::Value(self.0));
///         Ok(())
///     }
/// }
///
/// let adopted = Promise::<i32>::resolve(Resolution::Thenable(Box::new(Ready(9))));
/// event_loop::current().run_until_idle();
/// assert_eq!(adopted.outcome(), Some(Ok(9)));
/// ```
pub trait Thenable<T, E> {
    /// Registers the callbacks. An `Err` counts as a rejection unless a
    /// callback already fired.
    fn subscribe(
        &self,
        on_fulfilled: OnFulfilled<T, E>,
        on_rejected: OnRejected<E>,
    ) -> Result<(), E>;
}

/// What a continuation hands back: a plain value, or something to adopt.
pub enum Resolution<T, E = Error> {
    Value(T),
    Promise(Promise<T, E>),
    Thenable(Box<dyn Thenable<T, E>>),
}

impl<T, E> From<Promise<T, E>> for Resolution<T, E> {
    fn from(promise: Promise<T, E>) -> Self {
        Resolution::Promise(promise)
    }
}

impl<T: fmt::Debug, E> fmt::Debug for Resolution<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Resolution::Promise(promise) => f.debug_tuple("Promise").field(promise).finish(),
            Resolution::Thenable(_) => write!(f, "Thenable(..)"),
        }
    }
}

impl<T, E> Thenable<T, E> for Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    fn subscribe(
        &self,
        on_fulfilled: OnFulfilled<T, E>,
        on_rejected: OnRejected<E>,
    ) -> Result<(), E> {
        self.register(Box::new(move |value| on_fulfilled(Resolution::Value(value))), on_rejected);
        Ok(())
    }
}

/// Bookkeeping for adopting one thenable.
struct Adoption<T, E> {
    called: Cell<bool>,
    subscribing: Cell<bool>,
    handed_back: RefCell<Option<Resolution<T, E>>>,
}

/// Settles `next` from `resolution`.
///
/// Values fulfill directly; `next` itself is a cycle; anything else is
/// subscribed to. A fulfillment delivered while `subscribe` is still on the
/// stack is handed back to this loop rather than recursing, so synchronous
/// thenable chains of any depth run in constant stack.
pub(crate) fn resolve_promise<T, E>(next: &Promise<T, E>, resolution: Resolution<T, E>)
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    let mut current = resolution;
    loop {
        let thenable: Box<dyn Thenable<T, E>> = match current {
            Resolution::Value(value) => {
                next.settle_fulfilled(value);
                return;
            }
            Resolution::Promise(promise) if promise.ptr_eq(next) => {
                tracing::debug!("promise resolved with itself");
                next.settle_rejected(Error::CyclicChain.into());
                return;
            }
            Resolution::Promise(promise) => Box::new(promise),
            Resolution::Thenable(thenable) => thenable,
        };

        let adoption = Rc::new(Adoption {
            called: Cell::new(false),
            subscribing: Cell::new(true),
            handed_back: RefCell::new(None),
        });
        let on_fulfilled: OnFulfilled<T, E> = {
            let (adoption, next) = (adoption.clone(), next.clone());
            Box::new(move |inner| {
                if adoption.called.replace(true) {
                    return;
                }
                if adoption.subscribing.get() {
                    *adoption.handed_back.borrow_mut() = Some(inner);
                } else {
                    resolve_promise(&next, inner);
                }
            })
        };
        let on_rejected: OnRejected<E> = {
            let (adoption, next) = (adoption.clone(), next.clone());
            Box::new(move |reason| {
                if adoption.called.replace(true) {
                    return;
                }
                next.settle_rejected(reason);
            })
        };

        let subscribed = thenable.subscribe(on_fulfilled, on_rejected);
        adoption.subscribing.set(false);
        if let Err(reason) = subscribed {
            if adoption.called.replace(true) {
                tracing::debug!("thenable failed after settling, ignoring");
            } else {
                next.settle_rejected(reason);
                return;
            }
        }

        let handed_back = adoption.handed_back.borrow_mut().take();
        match handed_back {
            Some(inner) => current = inner,
            None => return,
        }
    }
}
