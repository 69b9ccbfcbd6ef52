use crate::{
    event_loop::{EventLoop, Handle},
    resolution::{settle, IntoResolution, Resolution, Thenable},
    settled::Settled,
    Error,
};
use log::{debug, trace, warn};
use std::{
    any::Any,
    cell::{Cell, RefCell},
    collections::VecDeque,
    fmt,
    future::IntoFuture,
    mem,
    rc::Rc,
    sync::atomic::{AtomicU64, Ordering},
    task::{Poll, Waker},
};

/// A settlement capability: `resolve` or `reject` for one promise.
///
/// Capabilities can be cloned and called any number of times; only the
/// first call made for a promise takes effect.
pub type Settle<V> = Rc<dyn Fn(V)>;

type Callback<V> = Box<dyn FnOnce(V)>;

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromiseState {
    Pending,
    Fulfilled,
    Rejected,
}

impl PromiseState {
    pub fn is_pending(self) -> bool {
        self == PromiseState::Pending
    }

    pub fn is_settled(self) -> bool {
        !self.is_pending()
    }

    pub fn is_fulfilled(self) -> bool {
        self == PromiseState::Fulfilled
    }

    pub fn is_rejected(self) -> bool {
        self == PromiseState::Rejected
    }
}

impl fmt::Display for PromiseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PromiseState::Pending => "pending",
            PromiseState::Fulfilled => "fulfilled",
            PromiseState::Rejected => "rejected",
        })
    }
}

/// The queues only exist while pending; settling replaces them with the
/// payload.
enum Slot<T, E> {
    Pending {
        on_fulfill: Vec<Callback<T>>,
        on_reject: Vec<Callback<E>>,
    },
    Fulfilled(T),
    Rejected(E),
}

struct State<T, E> {
    slot: Slot<T, E>,
    wakers: Vec<Waker>,
    abandoned: bool,
}

impl<T: Clone, E: Clone> State<T, E> {
    fn outcome(&self) -> Option<Result<T, E>> {
        match &self.slot {
            Slot::Pending { .. } => None,
            Slot::Fulfilled(value) => Some(Ok(value.clone())),
            Slot::Rejected(reason) => Some(Err(reason.clone())),
        }
    }
}

pub(crate) struct Shared<T, E> {
    id: u64,
    scheduler: Handle,
    state: RefCell<State<T, E>>,
}

impl<T, E> Shared<T, E> {
    fn new(scheduler: Handle) -> Rc<Self> {
        Rc::new(Shared {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            scheduler,
            state: RefCell::new(State {
                slot: Slot::Pending {
                    on_fulfill: Vec::new(),
                    on_reject: Vec::new(),
                },
                wakers: Vec::new(),
                abandoned: false,
            }),
        })
    }

    fn status(&self) -> PromiseState {
        match self.state.borrow().slot {
            Slot::Pending { .. } => PromiseState::Pending,
            Slot::Fulfilled(_) => PromiseState::Fulfilled,
            Slot::Rejected(_) => PromiseState::Rejected,
        }
    }

    fn queued(&self) -> usize {
        match &self.state.borrow().slot {
            Slot::Pending { on_fulfill, .. } => on_fulfill.len(),
            _ => 0,
        }
    }
}

impl<T: 'static, E: 'static> Shared<T, E> {
    /// Called once no settlement capability is left. A promise still pending
    /// at that point can never settle.
    fn abandon(&self) {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        let Slot::Pending { on_fulfill, on_reject } = &mut state.slot else {
            return;
        };
        state.abandoned = true;
        let released = (mem::take(on_fulfill), mem::take(on_reject));
        let wakers = mem::take(&mut state.wakers);
        drop(guard);

        if released.0.is_empty() {
            debug!("Promise({}) abandoned while pending", self.id);
        } else {
            warn!(
                "Promise({}) abandoned while pending; releasing {} queued callbacks",
                self.id,
                released.0.len()
            );
        }
        // Dropping the callbacks drops the capabilities of dependent
        // promises, which cascades the abandonment down the chain.
        release(Box::new(released));
        for waker in wakers {
            waker.wake();
        }
    }
}

thread_local! {
    /// Callbacks released by abandoned promises, waiting to be dropped.
    /// `None` while no release is in progress on this thread.
    static RELEASED: RefCell<Option<VecDeque<Box<dyn Any>>>> = const { RefCell::new(None) };
}

/// Drop `released` without recursing into dependants.
///
/// Dropping released callbacks can abandon dependent promises, which release
/// their own callbacks in turn. Nested calls only enqueue; the outermost
/// call drains the queue, so a chain of any length uses constant stack.
fn release(released: Box<dyn Any>) {
    let draining = RELEASED.with(|queue| {
        let mut queue = queue.borrow_mut();
        match queue.as_mut() {
            Some(pending) => {
                pending.push_back(released);
                None
            }
            None => {
                *queue = Some(VecDeque::new());
                Some(released)
            }
        }
    });
    let Some(first) = draining else {
        return;
    };

    let _reset = ReleaseGuard;
    drop(first);
    while let Some(next) = RELEASED.with(|queue| queue.borrow_mut().as_mut()?.pop_front()) {
        drop(next);
    }
}

/// Ends a release pass even when a drop unwinds. Anything still queued is
/// dropped after the pass is closed, starting a fresh one.
struct ReleaseGuard;

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        let rest = RELEASED.with(|queue| queue.borrow_mut().take());
        drop(rest);
    }
}

impl<T: Clone, E: Clone> Shared<T, E> {
    /// Queue a callback pair, or run the matching one right away if this
    /// promise has already settled.
    fn register(&self, on_fulfill: Callback<T>, on_reject: Callback<E>) {
        let mut state = self.state.borrow_mut();
        match state.outcome() {
            Some(Ok(value)) => {
                drop(state);
                on_fulfill(value);
            }
            Some(Err(reason)) => {
                drop(state);
                on_reject(reason);
            }
            None if state.abandoned => {
                drop(state);
                trace!("Promise({}) is abandoned; dropping registration", self.id);
            }
            None => {
                if let Slot::Pending {
                    on_fulfill: fulfill_queue,
                    on_reject: reject_queue,
                } = &mut state.slot
                {
                    fulfill_queue.push(on_fulfill);
                    reject_queue.push(on_reject);
                    trace!(
                        "Promise({}) queued callbacks; {} registered",
                        self.id,
                        fulfill_queue.len()
                    );
                }
            }
        }
    }

    /// The settlement routine. Runs on a scheduler turn, never inline with
    /// the capability call that requested it.
    fn transition(&self, outcome: Result<T, E>) {
        let (on_fulfill, on_reject, wakers) = {
            let mut state = self.state.borrow_mut();
            if !matches!(state.slot, Slot::Pending { .. }) {
                debug!("Promise({}) already settled; ignoring", self.id);
                return;
            }
            let settled = match &outcome {
                Ok(value) => Slot::Fulfilled(value.clone()),
                Err(reason) => Slot::Rejected(reason.clone()),
            };
            match mem::replace(&mut state.slot, settled) {
                Slot::Pending {
                    on_fulfill,
                    on_reject,
                } => (on_fulfill, on_reject, mem::take(&mut state.wakers)),
                _ => return,
            }
        };

        match outcome {
            Ok(value) => {
                trace!(
                    "Promise({}) fulfilled; flushing {} callbacks",
                    self.id,
                    on_fulfill.len()
                );
                drop(on_reject);
                for callback in on_fulfill {
                    callback(value.clone());
                }
            }
            Err(reason) => {
                trace!(
                    "Promise({}) rejected; flushing {} callbacks",
                    self.id,
                    on_reject.len()
                );
                drop(on_fulfill);
                for callback in on_reject {
                    callback(reason.clone());
                }
            }
        }
        for waker in wakers {
            waker.wake();
        }
    }

    pub(crate) fn poll_outcome(&self, waker: &Waker) -> Poll<Result<Result<T, E>, Error>> {
        let mut state = self.state.borrow_mut();
        if let Some(outcome) = state.outcome() {
            return Poll::Ready(Ok(outcome));
        }
        if state.abandoned {
            return Poll::Ready(Err(Error::Abandoned));
        }
        if !state.wakers.iter().any(|w| w.will_wake(waker)) {
            state.wakers.push(waker.clone());
        }
        Poll::Pending
    }
}

/// Owned by every `resolve`/`reject` clone of one promise. When the last one
/// goes away the promise is checked for abandonment.
struct Capability<T: 'static, E: 'static> {
    shared: Rc<Shared<T, E>>,
}

impl<T: 'static, E: 'static> Drop for Capability<T, E> {
    fn drop(&mut self) {
        self.shared.abandon();
    }
}

impl<T: Clone + 'static, E: Clone + 'static> Capability<T, E> {
    fn issue(shared: &Rc<Shared<T, E>>) -> (Settle<T>, Settle<E>) {
        let capability = Rc::new(Capability {
            shared: shared.clone(),
        });
        let fulfiller = capability.clone();
        let resolve: Settle<T> =
            Rc::new(move |value: T| Capability::schedule(&fulfiller, Ok(value)));
        let reject: Settle<E> =
            Rc::new(move |reason: E| Capability::schedule(&capability, Err(reason)));
        (resolve, reject)
    }

    fn schedule(this: &Rc<Self>, outcome: Result<T, E>) {
        // The task keeps the capability alive until the transition has run.
        let capability = this.clone();
        trace!("Promise({}) settlement scheduled", this.shared.id);
        this.shared
            .scheduler
            .schedule(Box::new(move || capability.shared.transition(outcome)));
    }
}

/// A value that settles exactly once, either fulfilled with a `T` or
/// rejected with an `E`.
///
/// `Promise` is a handle: clones observe the same settlement. Handlers are
/// attached with [`then`](Promise::then), [`and_then`](Promise::and_then),
/// [`catch`](Promise::catch) and [`finally`](Promise::finally), each of
/// which returns a new promise for the handler's result.
///
/// # Examples
///
/// ```
/// use thenable::{EventLoop, Promise};
///
/// let promise = Promise::<&str, String>::new(|resolve, _reject| resolve("🍓"));
/// let shouted = promise.and_then(|fruit| Ok(format!("{}!", fruit)));
/// EventLoop::current().run().unwrap();
/// assert_eq!(shouted.outcome(), Some(Ok("🍓!".to_string())));
/// ```
pub struct Promise<T, E> {
    shared: Rc<Shared<T, E>>,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T, E> Promise<T, E> {
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn state(&self) -> PromiseState {
        self.shared.status()
    }

    pub fn is_pending(&self) -> bool {
        self.state().is_pending()
    }

    /// Whether this promise was left pending with no way to settle it.
    pub fn is_abandoned(&self) -> bool {
        self.shared.state.borrow().abandoned
    }

    /// Number of callback pairs waiting for this promise to settle.
    pub fn pending_callbacks(&self) -> usize {
        self.shared.queued()
    }

    /// The scheduler this promise, and everything chained from it, settles
    /// through.
    pub fn scheduler(&self) -> Handle {
        self.shared.scheduler.clone()
    }
}

impl<T: Clone + 'static, E: Clone + 'static> Promise<T, E> {
    /// Create a promise on the current thread's [`EventLoop`], calling
    /// `executor` synchronously with its `resolve` and `reject` capabilities.
    pub fn new<F>(executor: F) -> Self
    where
        F: FnOnce(Settle<T>, Settle<E>),
    {
        Self::new_in(EventLoop::current().handle(), executor)
    }

    pub fn new_in<F>(scheduler: Handle, executor: F) -> Self
    where
        F: FnOnce(Settle<T>, Settle<E>),
    {
        let (promise, resolve, reject) = Self::with_resolvers_in(scheduler);
        executor(resolve, reject);
        promise
    }

    /// A pending promise along with its `resolve` and `reject` capabilities.
    ///
    /// # Examples
    ///
    /// ```
    /// use thenable::{EventLoop, Promise};
    ///
    /// let (promise, resolve, reject) = Promise::<i32, String>::with_resolvers();
    /// resolve(1);
    /// reject("too late".into());
    /// EventLoop::current().run().unwrap();
    /// assert_eq!(promise.outcome(), Some(Ok(1)));
    /// ```
    pub fn with_resolvers() -> (Self, Settle<T>, Settle<E>) {
        Self::with_resolvers_in(EventLoop::current().handle())
    }

    pub fn with_resolvers_in(scheduler: Handle) -> (Self, Settle<T>, Settle<E>) {
        let shared = Shared::new(scheduler);
        let (resolve, reject) = Capability::issue(&shared);
        trace!("Promise({}) created", shared.id);
        (Promise { shared }, resolve, reject)
    }

    /// A promise that fulfils with `value` on a later turn.
    pub fn resolve(value: T) -> Self {
        Self::resolve_in(EventLoop::current().handle(), value)
    }

    pub fn resolve_in(scheduler: Handle, value: T) -> Self {
        Self::new_in(scheduler, move |resolve, _| resolve(value))
    }

    /// A promise that rejects with `reason` on a later turn.
    pub fn reject(reason: E) -> Self {
        Self::reject_in(EventLoop::current().handle(), reason)
    }

    pub fn reject_in(scheduler: Handle, reason: E) -> Self {
        Self::new_in(scheduler, move |_, reject| reject(reason))
    }

    /// A promise for `value`: returned unchanged if it already is a
    /// `Promise`, otherwise a new promise settling the way `value` resolves.
    pub fn adopt<R>(value: R) -> Self
    where
        R: IntoResolution<T, E>,
    {
        Self::adopt_in(EventLoop::current().handle(), value)
    }

    pub fn adopt_in<R>(scheduler: Handle, value: R) -> Self
    where
        R: IntoResolution<T, E>,
    {
        value.into_promise(scheduler)
    }

    /// A clone of the settled value or reason, if there is one yet.
    pub fn outcome(&self) -> Option<Result<T, E>> {
        self.shared.state.borrow().outcome()
    }

    /// A `std::future::Future` that completes once this promise settles.
    pub fn settled(&self) -> Settled<T, E> {
        Settled::new(self.shared.clone())
    }

    /// Attach a handler for each outcome and get a promise for whichever of
    /// them runs.
    ///
    /// Handlers return anything [`IntoResolution`]: `Ok(value)` fulfils the
    /// new promise, `Err(reason)` rejects it, and a returned promise or
    /// [`Thenable`] is adopted. If this promise has already settled the
    /// matching handler runs immediately; the new promise still settles on a
    /// later turn.
    ///
    /// Returning `Ok(value)` from `on_rejected` recovers and fulfils the new
    /// promise. Return `Err(reason)` to keep it rejected.
    pub fn then<U, E2, F, G, R1, R2>(&self, on_fulfilled: F, on_rejected: G) -> Promise<U, E2>
    where
        U: Clone + 'static,
        E2: Clone + 'static,
        F: FnOnce(T) -> R1 + 'static,
        G: FnOnce(E) -> R2 + 'static,
        R1: IntoResolution<U, E2>,
        R2: IntoResolution<U, E2>,
    {
        let parent = self.shared.clone();
        Promise::new_in(self.scheduler(), move |resolve, reject| {
            let fulfilled: Callback<T> = {
                let (resolve, reject) = (resolve.clone(), reject.clone());
                Box::new(move |value| settle(on_fulfilled(value).into_resolution(), resolve, reject))
            };
            let rejected: Callback<E> = Box::new(move |reason| {
                settle(on_rejected(reason).into_resolution(), resolve, reject)
            });
            parent.register(fulfilled, rejected);
        })
    }

    /// [`then`](Promise::then) with only a fulfilment handler; rejections
    /// pass through unchanged.
    pub fn and_then<U, F, R>(&self, on_fulfilled: F) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> R + 'static,
        R: IntoResolution<U, E>,
    {
        self.then(on_fulfilled, |reason: E| -> Result<U, E> { Err(reason) })
    }

    /// [`then`](Promise::then) with only a rejection handler; values pass
    /// through unchanged.
    ///
    /// The handler's `Ok(value)` recovers and fulfils the new promise, while
    /// `Err(reason)` keeps it rejected.
    pub fn catch<E2, G, R>(&self, on_rejected: G) -> Promise<T, E2>
    where
        E2: Clone + 'static,
        G: FnOnce(E) -> R + 'static,
        R: IntoResolution<T, E2>,
    {
        self.then(|value: T| -> Result<T, E2> { Ok(value) }, on_rejected)
    }

    /// Run `on_finally` once this promise settles either way, then settle
    /// with the original value or reason.
    ///
    /// If `on_finally` returns a promise or thenable it is waited on first.
    /// A failure from `on_finally` replaces the original outcome.
    ///
    /// # Examples
    ///
    /// ```
    /// use thenable::{EventLoop, Promise};
    ///
    /// let value = Promise::<i32, String>::resolve(7)
    ///     .finally(|| Promise::<&str, String>::resolve("ignored"));
    /// EventLoop::current().run().unwrap();
    /// assert_eq!(value.outcome(), Some(Ok(7)));
    /// ```
    pub fn finally<F, R, X>(&self, on_finally: F) -> Promise<T, E>
    where
        F: FnOnce() -> R + 'static,
        R: IntoResolution<X, E>,
        X: Clone + 'static,
    {
        // Exactly one of the two handlers below ever runs.
        let callback = Rc::new(Cell::new(Some(on_finally)));
        let on_reject = callback.clone();
        let (scheduler, reject_scheduler) = (self.scheduler(), self.scheduler());
        self.then(
            move |value: T| -> Resolution<T, E> {
                match callback.take() {
                    Some(on_finally) => {
                        let waited = on_finally().into_promise(scheduler);
                        Resolution::adopt(waited.then(
                            move |_: X| -> Result<T, E> { Ok(value) },
                            |failure: E| -> Result<T, E> { Err(failure) },
                        ))
                    }
                    None => Resolution::Fulfill(value),
                }
            },
            move |reason: E| -> Resolution<T, E> {
                match on_reject.take() {
                    Some(on_finally) => {
                        let waited = on_finally().into_promise(reject_scheduler);
                        Resolution::adopt(waited.then(
                            move |_: X| -> Result<T, E> { Err(reason) },
                            |failure: E| -> Result<T, E> { Err(failure) },
                        ))
                    }
                    None => Resolution::Reject(reason),
                }
            },
        )
    }
}

impl<T: Clone + 'static, E: Clone + 'static> Thenable<T, E> for Promise<T, E> {
    fn subscribe(self: Box<Self>, on_fulfilled: Settle<T>, on_rejected: Settle<E>) {
        self.shared.register(
            Box::new(move |value| on_fulfilled(value)),
            Box::new(move |reason| on_rejected(reason)),
        );
    }
}

impl<T: Clone + 'static, E: Clone + 'static> IntoResolution<T, E> for Promise<T, E> {
    fn into_resolution(self) -> Resolution<T, E> {
        Resolution::adopt(self)
    }

    fn into_promise(self, _scheduler: Handle) -> Promise<T, E> {
        self
    }
}

impl<T: Clone + 'static, E: Clone + 'static> IntoFuture for Promise<T, E> {
    type Output = Result<Result<T, E>, Error>;
    type IntoFuture = Settled<T, E>;

    fn into_future(self) -> Self::IntoFuture {
        Settled::new(self.shared)
    }
}

impl<T, E> fmt::Display for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Promise({})", self.shared.id)
    }
}

impl<T, E> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .field("pending_callbacks", &self.pending_callbacks())
            .field("abandoned", &self.is_abandoned())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{Promise, PromiseState};
    use crate::{EventLoop, Handle, Schedule, Task};
    use std::{cell::RefCell, collections::VecDeque, rc::Rc};

    /// A scheduler that only runs tasks when told to.
    #[derive(Default)]
    struct Manual {
        queue: RefCell<VecDeque<Task>>,
    }

    impl Schedule for Manual {
        fn schedule(&self, task: Task) {
            self.queue.borrow_mut().push_back(task);
        }
    }

    impl Manual {
        fn run(&self) -> usize {
            let mut ran = 0;
            loop {
                let next = self.queue.borrow_mut().pop_front();
                match next {
                    Some(task) => task(),
                    None => return ran,
                }
                ran += 1;
            }
        }
    }

    fn manual() -> (Rc<Manual>, Handle) {
        let manual = Rc::new(Manual::default());
        let handle: Handle = manual.clone();
        (manual, handle)
    }

    #[test]
    fn test_settlement_goes_through_the_scheduler() {
        let (manual, handle) = manual();
        let promise = Promise::<i32, String>::resolve_in(handle, 1);
        assert_eq!(promise.state(), PromiseState::Pending);
        assert_eq!(manual.queue.borrow().len(), 1);
        assert_eq!(manual.run(), 1);
        assert_eq!(promise.state(), PromiseState::Fulfilled);
        assert_eq!(promise.outcome(), Some(Ok(1)));
    }

    #[test]
    fn test_first_settlement_wins() {
        let (manual, handle) = manual();
        let promise = Promise::<i32, String>::new_in(handle, |resolve, reject| {
            resolve(1);
            reject("late".into());
            resolve(2);
        });
        manual.run();
        assert_eq!(promise.outcome(), Some(Ok(1)));
    }

    #[test]
    fn test_registered_callbacks_wait_in_the_queue() {
        let (manual, handle) = manual();
        let (promise, resolve, _reject) = Promise::<i32, String>::with_resolvers_in(handle);
        let _a = promise.and_then(|v| Ok(v));
        let _b = promise.catch(|e: String| Err(e));
        assert_eq!(promise.pending_callbacks(), 2);
        resolve(3);
        manual.run();
        assert_eq!(promise.pending_callbacks(), 0);
    }

    #[test]
    fn test_then_on_settled_promise_runs_handler_immediately() {
        let (manual, handle) = manual();
        let promise = Promise::<i32, String>::resolve_in(handle, 4);
        manual.run();

        let seen = Rc::new(RefCell::new(None));
        let record = seen.clone();
        let next = promise.and_then(move |v| {
            *record.borrow_mut() = Some(v);
            Ok(v + 1)
        });
        assert_eq!(*seen.borrow(), Some(4));
        // The derived promise still settles on a later turn.
        assert!(next.is_pending());
        manual.run();
        assert_eq!(next.outcome(), Some(Ok(5)));
    }

    #[test]
    fn test_catch_on_rejected_promise_runs_handler_immediately() {
        let (manual, handle) = manual();
        let promise = Promise::<i32, String>::reject_in(handle, "💥".into());
        manual.run();
        assert_eq!(promise.state(), PromiseState::Rejected);

        let seen = Rc::new(RefCell::new(None));
        let record = seen.clone();
        let next = promise.catch(move |reason: String| {
            *record.borrow_mut() = Some(reason.clone());
            Err::<i32, _>(reason.len())
        });
        assert_eq!(*seen.borrow(), Some("💥".to_string()));
        // The derived promise still settles on a later turn.
        assert!(next.is_pending());
        assert_eq!(manual.run(), 1);
        assert_eq!(next.outcome(), Some(Err(4)));
    }

    #[test]
    fn test_chained_promises_inherit_the_scheduler() {
        let (manual, handle) = manual();
        let promise = Promise::<i32, String>::resolve_in(handle, 1)
            .and_then(|v| Ok(v + 1))
            .and_then(|v| Ok(v * 10));
        assert_eq!(manual.run(), 3);
        assert_eq!(promise.outcome(), Some(Ok(20)));
    }

    #[test]
    fn test_dropped_capabilities_abandon_a_pending_promise() {
        let promise = Promise::<i32, String>::new(|_resolve, _reject| {});
        assert!(promise.is_abandoned());
        assert_eq!(promise.state(), PromiseState::Pending);
    }

    #[test]
    fn test_abandonment_cascades_to_dependants() {
        let (promise, resolve, reject) = Promise::<i32, String>::with_resolvers();
        let child = promise.and_then(|v| Ok(v + 1));
        let grandchild = child.and_then(|v| Ok(v + 1));
        assert!(!child.is_abandoned());
        drop((resolve, reject));
        assert!(promise.is_abandoned());
        assert!(child.is_abandoned());
        assert!(grandchild.is_abandoned());
        assert_eq!(promise.pending_callbacks(), 0);
    }

    #[test]
    fn test_abandoning_a_long_chain_does_not_recurse() {
        let (root, resolve, reject) = Promise::<u32, String>::with_resolvers();
        let mut tail = root.clone();
        for _ in 0..100_000 {
            tail = tail.and_then(|v| Ok(v + 1));
        }
        assert!(!tail.is_abandoned());
        drop((resolve, reject));
        assert!(root.is_abandoned());
        assert!(tail.is_abandoned());
        assert_eq!(tail.state(), PromiseState::Pending);

        // A later abandonment on the same thread still cascades.
        let (again, resolve, reject) = Promise::<u32, String>::with_resolvers();
        let child = again.and_then(|v| Ok(v));
        drop((resolve, reject));
        assert!(child.is_abandoned());
    }

    #[test]
    fn test_scheduled_settlement_is_not_abandonment() {
        let (manual, handle) = manual();
        let promise = Promise::<i32, String>::new_in(handle, |resolve, _| resolve(1));
        assert!(!promise.is_abandoned());
        manual.run();
        assert!(!promise.is_abandoned());
        assert_eq!(promise.outcome(), Some(Ok(1)));
    }

    #[test]
    fn test_dropping_the_scheduled_task_abandons() {
        let (manual, handle) = manual();
        let promise = Promise::<i32, String>::new_in(handle, |resolve, _| resolve(1));
        manual.queue.borrow_mut().clear();
        assert!(promise.is_abandoned());
    }

    #[test]
    fn test_registration_on_abandoned_promise_is_dropped() {
        let promise = Promise::<i32, String>::new(|_, _| {});
        let child = promise.and_then(|v| Ok(v));
        assert_eq!(promise.pending_callbacks(), 0);
        assert!(child.is_abandoned());
    }

    #[test]
    fn test_display_and_debug() {
        let promise = Promise::<i32, String>::resolve(1);
        assert_eq!(promise.to_string(), format!("Promise({})", promise.id()));
        let debug = format!("{:?}", promise);
        assert!(debug.contains("state: Pending"));
        assert_eq!(PromiseState::Pending.to_string(), "pending");
        assert_eq!(PromiseState::Fulfilled.to_string(), "fulfilled");
        assert_eq!(PromiseState::Rejected.to_string(), "rejected");
    }

    #[test]
    fn test_state_predicates() {
        assert!(PromiseState::Pending.is_pending());
        assert!(!PromiseState::Pending.is_settled());
        assert!(PromiseState::Fulfilled.is_settled());
        assert!(PromiseState::Fulfilled.is_fulfilled());
        assert!(PromiseState::Rejected.is_rejected());
        assert!(!PromiseState::Rejected.is_fulfilled());
    }

    #[test]
    fn test_clones_share_settlement() {
        let promise = Promise::<i32, String>::reject("no".into());
        let other = promise.clone();
        assert_eq!(promise.id(), other.id());
        EventLoop::current().run().unwrap();
        assert_eq!(other.outcome(), Some(Err("no".to_string())));
    }
}
