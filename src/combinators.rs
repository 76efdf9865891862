//! `resolve`, `reject`, `all`, `race` and `finally`, composed from the
//! settlement core and the resolution procedure.
//!
use crate::{
    event_loop::{self, Schedule},
    resolution::{resolve_promise, Resolution},
    Error, Promise,
};
use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

impl<T, E> Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    /// Turns a [`Resolution`] into a promise.
    ///
    /// A promise is returned as is, a value gives a promise that is already
    /// fulfilled, and a foreign thenable is adopted.
    pub fn resolve(value: Resolution<T, E>) -> Self {
        Self::resolve_in(event_loop::current(), value)
    }

    /// A promise already fulfilled with `value`.
    pub fn fulfilled(value: T) -> Self {
        Self::resolve(Resolution::Value(value))
    }

    /// A promise already rejected with `reason`.
    pub fn reject(reason: E) -> Self {
        let promise = Self::pending_in(event_loop::current());
        promise.settle_rejected(reason);
        promise
    }

    pub(crate) fn resolve_in(scheduler: Rc<dyn Schedule>, value: Resolution<T, E>) -> Self {
        match value {
            Resolution::Promise(promise) => promise,
            Resolution::Value(value) => {
                let promise = Self::pending_in(scheduler);
                promise.settle_fulfilled(value);
                promise
            }
            thenable @ Resolution::Thenable(_) => {
                let promise = Self::pending_in(scheduler);
                resolve_promise(&promise, thenable);
                promise
            }
        }
    }

    /// Fulfills with every element's value, in input order, once all of them
    /// have fulfilled. The first rejection rejects the aggregate.
    ///
    /// Fails with [`Error::NotIterable`] when `items` reports at least
    /// `usize::MAX` elements, as endless iterators like `repeat` or `0..` do.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_chain::{event_loop, Promise, Resolution};
    ///
    /// let items: Vec<Resolution<i32>> = vec![
    ///     Resolution::Value(1),
    ///     Resolution::Promise(Promise::fulfilled(2)),
    /// ];
    /// let all: Promise<Vec<i32>> = Promise::all(items).unwrap();
    /// event_loop::current().run_until_idle();
    /// assert_eq!(all.outcome(), Some(Ok(vec![1, 2])));
    /// ```
    pub fn all<I>(items: I) -> Result<Promise<Vec<T>, E>, Error>
    where
        I: IntoIterator,
        I::Item: Into<Resolution<T, E>>,
    {
        let items = collect_finite(items)?;
        let scheduler = event_loop::current();
        let aggregate = Promise::pending_in(scheduler.clone());
        if items.is_empty() {
            aggregate.settle_fulfilled(vec![]);
            return Ok(aggregate);
        }

        let slots: Rc<RefCell<Vec<Option<T>>>> = Rc::new(RefCell::new(vec![None; items.len()]));
        let remaining = Rc::new(Cell::new(items.len()));
        for (index, item) in items.into_iter().enumerate() {
            let element = Self::resolve_in(scheduler.clone(), item.into());
            let (slots, remaining) = (slots.clone(), remaining.clone());
            let (fulfilled_target, rejected_target) = (aggregate.clone(), aggregate.clone());
            element.register(
                Box::new(move |value| {
                    slots.borrow_mut()[index] = Some(value);
                    remaining.set(remaining.get() - 1);
                    if remaining.get() == 0 {
                        let values: Option<Vec<T>> = slots.borrow_mut().drain(..).collect();
                        if let Some(values) = values {
                            fulfilled_target.settle_fulfilled(values);
                        }
                    }
                }),
                Box::new(move |reason| {
                    rejected_target.settle_rejected(reason);
                }),
            );
        }
        Ok(aggregate)
    }

    /// Settles like whichever element settles first. An empty input never
    /// settles.
    ///
    /// Fails with [`Error::NotIterable`] under the same rule as
    /// [`Promise::all`].
    pub fn race<I>(items: I) -> Result<Promise<T, E>, Error>
    where
        I: IntoIterator,
        I::Item: Into<Resolution<T, E>>,
    {
        let items = collect_finite(items)?;
        let scheduler = event_loop::current();
        let aggregate = Promise::pending_in(scheduler.clone());
        for item in items {
            let element = Self::resolve_in(scheduler.clone(), item.into());
            let (fulfilled_target, rejected_target) = (aggregate.clone(), aggregate.clone());
            element.register(
                Box::new(move |value| {
                    fulfilled_target.settle_fulfilled(value);
                }),
                Box::new(move |reason| {
                    rejected_target.settle_rejected(reason);
                }),
            );
        }
        Ok(aggregate)
    }

    /// Runs `callback` whatever the outcome, waits for whatever it returns to
    /// settle, then reproduces this promise's value or reason.
    ///
    /// If `callback` fails, or what it returns rejects, that reason replaces
    /// the original outcome.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_chain::{event_loop, Promise, Resolution};
    ///
    /// let kept = Promise::<i32>::fulfilled(7).finally(|| Ok(Resolution::Value("ignored")));
    /// event_loop::current().run_until_idle();
    /// assert_eq!(kept.outcome(), Some(Ok(7)));
    /// ```
    pub fn finally<V, F>(&self, callback: F) -> Promise<T, E>
    where
        V: Clone + 'static,
        F: FnOnce() -> Result<Resolution<V, E>, E> + 'static,
    {
        let callback = Rc::new(Cell::new(Some(callback)));
        let on_rejected_callback = callback.clone();
        let (fulfilled_scheduler, rejected_scheduler) = (self.scheduler(), self.scheduler());
        self.then_else(
            move |value| {
                let Some(callback) = callback.take() else {
                    return Ok(Resolution::Value(value));
                };
                let waited = Promise::resolve_in(fulfilled_scheduler, callback()?);
                Ok(Resolution::Promise(waited.then(move |_| Ok(Resolution::Value(value)))))
            },
            move |reason| {
                let Some(callback) = on_rejected_callback.take() else {
                    return Err(reason);
                };
                let waited = Promise::resolve_in(rejected_scheduler, callback()?);
                Ok(Resolution::Promise(waited.then(move |_| Err(reason))))
            },
        )
    }
}

fn collect_finite<I>(items: I) -> Result<Vec<I::Item>, Error>
where
    I: IntoIterator,
{
    let iter = items.into_iter();
    if iter.size_hint().0 == usize::MAX {
        tracing::debug!("refusing an endless iterator");
        return Err(Error::NotIterable);
    }
    Ok(iter.collect())
}
