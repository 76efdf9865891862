#[cfg(test)]
mod tests {
    use promise_chain::{event_loop, Error, OnFulfilled, OnRejected, Promise, Resolution, Thenable};
    use std::{cell::Cell, rc::Rc};

    fn after<T: Clone + 'static>(delay: u64, outcome: Result<T, Error>) -> Promise<T> {
        Promise::new(move |resolver| {
            event_loop::current().set_timeout(delay, move || match outcome {
                Ok(value) => {
                    resolver.fulfill(value);
                }
                Err(reason) => {
                    resolver.reject(reason);
                }
            });
            Ok(())
        })
    }

    /// A foreign deferred value that settles from a timer.
    struct Delayed {
        delay: u64,
        outcome: Result<i32, Error>,
    }

    impl Thenable<i32, Error> for Delayed {
        fn subscribe(
            &self,
            on_fulfilled: OnFulfilled<i32, Error>,
            on_rejected: OnRejected<Error>,
        ) -> Result<(), Error> {
            let outcome = self.outcome.clone();
            event_loop::current().set_timeout(self.delay, move || match outcome {
                Ok(value) => on_fulfilled(Resolution::Value(value)),
                Err(reason) => on_rejected(reason),
            });
            Ok(())
        }
    }

    fn rejected(msg: &str) -> Error {
        Error::Rejected(msg.into())
    }

    fn run() {
        event_loop::current().run_until_idle();
    }

    #[test]
    fn test_resolve_of_promise_fulfilling_with_promise_unwraps() {
        let inner = after(10, Ok(5));
        let outer: Promise<Promise<i32>> = Promise::fulfilled(inner);
        let unwrapped: Promise<i32> = Promise::resolve(Resolution::Promise(outer))
            .then(|inner| Ok(Resolution::Promise(inner)));
        run();
        assert_eq!(unwrapped.outcome(), Some(Ok(5)));
    }

    #[test]
    fn test_resolve_adopts_thenable_settling_later() {
        let fulfilled = Promise::<i32>::resolve(Resolution::Thenable(Box::new(Delayed {
            delay: 20,
            outcome: Ok(4),
        })));
        let rejected_later = Promise::<i32>::resolve(Resolution::Thenable(Box::new(Delayed {
            delay: 40,
            outcome: Err(rejected("late")),
        })));
        event_loop::current().run_microtasks();
        assert!(fulfilled.is_pending());
        assert!(rejected_later.is_pending());

        event_loop::current().advance_by(25);
        assert_eq!(fulfilled.outcome(), Some(Ok(4)));
        assert!(rejected_later.is_pending());

        run();
        assert_eq!(rejected_later.outcome(), Some(Err(rejected("late"))));
    }

    #[test]
    fn test_all_rejects_with_first_failure() {
        let all =
            Promise::<i32>::all(vec![after(50, Err(rejected("fast"))), after(200, Ok(1))]).unwrap();
        event_loop::current().advance_by(60);
        assert_eq!(all.outcome(), Some(Err(rejected("fast"))));
        run();
        assert_eq!(all.outcome(), Some(Err(rejected("fast"))));
    }

    #[test]
    fn test_all_keeps_input_order() {
        let all = Promise::<&str>::all(vec![after(200, Ok("B")), after(50, Ok("A"))]).unwrap();
        run();
        assert_eq!(all.outcome(), Some(Ok(vec!["B", "A"])));
    }

    #[test]
    fn test_all_accepts_plain_values() {
        let items: Vec<Resolution<i32>> = vec![
            Resolution::Value(1),
            Resolution::Promise(after(5, Ok(2))),
            Resolution::Value(3),
        ];
        let all = Promise::all(items).unwrap();
        run();
        assert_eq!(all.outcome(), Some(Ok(vec![1, 2, 3])));
    }

    #[test]
    fn test_all_empty_is_fulfilled_without_waiting() {
        let all = Promise::<u8>::all(Vec::<Promise<u8>>::new()).unwrap();
        assert_eq!(all.outcome(), Some(Ok(vec![])));
    }

    #[test]
    fn test_all_of_endless_iterator_fails() {
        let items = (1..).map(Resolution::<i32>::Value);
        assert_eq!(Promise::<i32>::all(items).err(), Some(Error::NotIterable));
    }

    #[test]
    fn test_all_and_race_accept_finite_iterators_without_upper_bound() {
        let nested = vec![vec![after(10, Ok(1)), after(5, Ok(2))], vec![after(1, Ok(3))]];
        let all = Promise::<i32>::all(nested.into_iter().flat_map(|group| group)).unwrap();

        let mut delays = vec![30, 10].into_iter();
        let generated = std::iter::from_fn(move || delays.next().map(|d| after(d, Ok(d as i32))));
        let race = Promise::<i32>::race(generated).unwrap();

        run();
        assert_eq!(all.outcome(), Some(Ok(vec![1, 2, 3])));
        assert_eq!(race.outcome(), Some(Ok(10)));
    }

    #[test]
    fn test_race_takes_earliest_settlement() {
        let race = Promise::<i32>::race(vec![after(100, Ok(1)), after(10, Ok(2))]).unwrap();
        run();
        assert_eq!(race.outcome(), Some(Ok(2)));
    }

    #[test]
    fn test_race_takes_earliest_rejection() {
        let race =
            Promise::<i32>::race(vec![after(100, Ok(1)), after(10, Err(rejected("early")))])
                .unwrap();
        run();
        assert_eq!(race.outcome(), Some(Err(rejected("early"))));
    }

    #[test]
    fn test_race_tie_goes_to_first_in_input() {
        let race =
            Promise::<&str>::race(vec![Promise::fulfilled("first"), Promise::fulfilled("second")])
                .unwrap();
        run();
        assert_eq!(race.outcome(), Some(Ok("first")));
    }

    #[test]
    fn test_race_empty_stays_pending() {
        let race = Promise::<i32>::race(Vec::<Promise<i32>>::new()).unwrap();
        run();
        assert!(race.is_pending());
    }

    #[test]
    fn test_finally_keeps_fulfillment() {
        let kept: Promise<i32> = Promise::fulfilled(7)
            .finally(|| Ok(Resolution::Value("done")))
            .then(|v| Ok(Resolution::Value(v)));
        run();
        assert_eq!(kept.outcome(), Some(Ok(7)));
    }

    #[test]
    fn test_finally_keeps_rejection() {
        let ran = Rc::new(Cell::new(false));
        let r = ran.clone();
        let caught: Promise<String> = Promise::reject(rejected("x"))
            .finally(move || {
                r.set(true);
                Ok(Resolution::Value(()))
            })
            .catch(|e| Ok(Resolution::Value(e.to_string())));
        assert!(!ran.get());
        run();
        assert!(ran.get());
        assert_eq!(caught.outcome(), Some(Ok("x".to_string())));
    }

    #[test]
    fn test_finally_waits_for_returned_promise() {
        let kept: Promise<i32> =
            Promise::fulfilled(7).finally(|| Ok(Resolution::Promise(after(100, Ok(())))));
        event_loop::current().advance_by(50);
        assert!(kept.is_pending());
        event_loop::current().advance_by(60);
        assert_eq!(kept.outcome(), Some(Ok(7)));
    }

    #[test]
    fn test_finally_error_replaces_outcome() {
        let failed: Promise<i32> = Promise::fulfilled(7)
            .finally(|| -> Result<Resolution<()>, Error> { Err(rejected("cleanup")) });
        let replaced: Promise<i32> = Promise::reject(rejected("original")).finally(|| {
            let later = after(5, Err::<(), _>(rejected("later")));
            Ok(Resolution::Promise(later))
        });
        run();
        assert_eq!(failed.outcome(), Some(Err(rejected("cleanup"))));
        assert_eq!(replaced.outcome(), Some(Err(rejected("later"))));
    }
}
