use crate::{
    event_loop::{EventLoop, Handle},
    resolution::{settle, IntoResolution, Resolution},
    Promise, Settle,
};
use log::trace;
use std::{cell::RefCell, rc::Rc};

/// Results of `all`, kept in input order.
struct Gather<T> {
    slots: Vec<Option<T>>,
    remaining: usize,
}

impl<T> Gather<T> {
    fn new(len: usize) -> Self {
        Gather {
            slots: (0..len).map(|_| None).collect(),
            remaining: len,
        }
    }

    /// Store the value for `index`. Returns every value once the last slot is
    /// filled. A slot reported twice counts once.
    fn fill(&mut self, index: usize, value: T) -> Option<Vec<T>> {
        let slot = self.slots.get_mut(index)?;
        if slot.is_some() {
            return None;
        }
        *slot = Some(value);
        self.remaining -= 1;
        if self.remaining > 0 {
            return None;
        }
        self.slots.iter_mut().map(Option::take).collect()
    }
}

impl<T: Clone + 'static, E: Clone + 'static> Promise<T, E> {
    /// A promise for every input's value, in input order.
    ///
    /// Rejects with the reason of the first input to reject. An empty input
    /// fulfils with an empty `Vec`.
    ///
    /// # Examples
    ///
    /// ```
    /// use thenable::{EventLoop, Promise};
    ///
    /// let (slow, resolve_slow, _) = Promise::<i32, String>::with_resolvers();
    /// let all = Promise::all(vec![slow, Promise::resolve(2)]);
    /// resolve_slow(1);
    /// EventLoop::current().run().unwrap();
    /// assert_eq!(all.outcome(), Some(Ok(vec![1, 2])));
    /// ```
    pub fn all<I>(promises: I) -> Promise<Vec<T>, E>
    where
        I: IntoIterator,
        I::Item: IntoResolution<T, E>,
    {
        Self::all_in(EventLoop::current().handle(), promises)
    }

    pub fn all_in<I>(scheduler: Handle, promises: I) -> Promise<Vec<T>, E>
    where
        I: IntoIterator,
        I::Item: IntoResolution<T, E>,
    {
        let inputs: Vec<Resolution<T, E>> = promises
            .into_iter()
            .map(IntoResolution::into_resolution)
            .collect();
        Promise::new_in(scheduler, move |resolve, reject| {
            trace!("all: waiting on {} inputs", inputs.len());
            if inputs.is_empty() {
                resolve(Vec::new());
                return;
            }
            let gather = Rc::new(RefCell::new(Gather::new(inputs.len())));
            for (index, input) in inputs.into_iter().enumerate() {
                let gather = gather.clone();
                let resolve = resolve.clone();
                let on_fulfilled: Settle<T> = Rc::new(move |value: T| {
                    let done = gather.borrow_mut().fill(index, value);
                    if let Some(values) = done {
                        resolve(values);
                    }
                });
                settle(input, on_fulfilled, reject.clone());
            }
        })
    }

    /// A promise settling the same way as whichever input settles first.
    ///
    /// With no inputs the result never settles.
    pub fn race<I>(promises: I) -> Promise<T, E>
    where
        I: IntoIterator,
        I::Item: IntoResolution<T, E>,
    {
        Self::race_in(EventLoop::current().handle(), promises)
    }

    pub fn race_in<I>(scheduler: Handle, promises: I) -> Promise<T, E>
    where
        I: IntoIterator,
        I::Item: IntoResolution<T, E>,
    {
        Promise::new_in(scheduler, move |resolve, reject| {
            for input in promises {
                settle(input.into_resolution(), resolve.clone(), reject.clone());
            }
        })
    }
}
