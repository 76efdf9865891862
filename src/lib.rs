//! Single-threaded deferred values in the Promise/A+ style.
//!
//! A [`Promise`] settles exactly once, to a value or to a reason. Consumers
//! register continuations before or after that happens; continuation bodies
//! always run later, from a [`Schedule`]r, in the order they were registered.
//! What a continuation returns is run through the resolution procedure, which
//! adopts the outcome of any promise or foreign [`Thenable`] it is handed.
//!
//! # Examples
//!
//! ```
//! use promise_chain::{event_loop, Error, Promise, Resolution};
//!
//! let (source, resolver) = Promise::<i32>::deferred();
//! let chained = source
//!     .then(|v| Ok(Resolution::Value(v * 4)))
//!     .then(|v| Ok(Resolution::Promise(Promise::fulfilled(v + 1))))
//!     .then(|v| -> Result<Resolution<i32>, Error> { Err(Error::Rejected(v.to_string())) })
//!     .catch(|e| Ok(Resolution::Value(e.to_string().len() as i32)));
//!
//! event_loop::current().set_timeout(100, move || {
//!     resolver.fulfill(3);
//! });
//! event_loop::current().run_until_idle();
//!
//! assert_eq!(chained.outcome(), Some(Ok(2)));
//! ```

pub mod event_loop;

mod combinators;
mod promise;
mod resolution;

pub use event_loop::{EventLoop, Schedule, Task};
pub use promise::{Promise, Resolver, Status};
pub use resolution::{OnFulfilled, OnRejected, Resolution, Thenable};

/// Failures the library itself produces.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A continuation resolved the promise it feeds with that same promise.
    #[error("chaining cycle detected for promise")]
    CyclicChain,
    /// A combinator was given a sequence it cannot bound.
    #[error("argument is not iterable")]
    NotIterable,
    /// A reason supplied by user code, carried as its message.
    #[error("{0}")]
    Rejected(String),
}
