//! The deferred-execution facility promises settle through.
//!
//! A promise never runs its settlement synchronously. It hands a [`Task`] to
//! whatever [`Schedule`] implementation it was created with, and the host runs
//! that task on a later turn. [`EventLoop`] is the FIFO implementation this
//! crate ships with; hosts that already own a task queue can implement
//! [`Schedule`] themselves.
use crate::Error;
use log::{debug, trace, warn};
use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    fmt,
    rc::{Rc, Weak},
};

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce()>;

/// Shared handle to a scheduler, cloned into every promise of a chain.
pub type Handle = Rc<dyn Schedule>;

/// Queue `task` to run later, after the current synchronous execution has
/// unwound, in FIFO order relative to every other scheduled task.
pub trait Schedule {
    fn schedule(&self, task: Task);
}

/// Event loop settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Maximum number of tasks a single [`EventLoop::run`] may execute.
    pub turn_limit: Option<usize>,
    /// Capacity reserved for the task queue up front.
    pub initial_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            turn_limit: None,
            initial_capacity: 64,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make [`EventLoop::run`] give up with [`Error::TurnLimit`] once it has
    /// executed `limit` tasks and work is still queued.
    pub fn turn_limit(mut self, limit: usize) -> Self {
        self.turn_limit = Some(limit);
        self
    }

    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }
}

struct Inner {
    config: Config,
    queue: RefCell<VecDeque<Task>>,
    running: Cell<bool>,
    executed: Cell<u64>,
}

/// A single-threaded FIFO task queue.
///
/// Cloning an `EventLoop` yields another handle to the same queue.
///
/// # Examples
///
/// ```
/// use thenable::{EventLoop, Schedule};
/// use std::{cell::RefCell, rc::Rc};
///
/// let event_loop = EventLoop::new();
/// let seen = Rc::new(RefCell::new(Vec::new()));
/// for n in 0..3 {
///     let seen = seen.clone();
///     event_loop.schedule(Box::new(move || seen.borrow_mut().push(n)));
/// }
/// assert!(seen.borrow().is_empty());
/// assert_eq!(event_loop.run(), Ok(3));
/// assert_eq!(*seen.borrow(), vec![0, 1, 2]);
/// ```
#[derive(Clone)]
pub struct EventLoop {
    inner: Rc<Inner>,
}

thread_local! {
    static CURRENT: EventLoop = EventLoop::new();
}

/// Clears the running flag even when a task unwinds.
struct Running<'a>(&'a Cell<bool>);

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl EventLoop {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let queue = VecDeque::with_capacity(config.initial_capacity);
        Self {
            inner: Rc::new(Inner {
                config,
                queue: RefCell::new(queue),
                running: Cell::new(false),
                executed: Cell::new(0),
            }),
        }
    }

    /// The loop used by constructors that are not given a scheduler
    /// explicitly. There is one per thread.
    pub fn current() -> Self {
        CURRENT.with(Clone::clone)
    }

    /// A scheduler handle that does not keep the loop alive. Tasks scheduled
    /// after the loop is gone are dropped.
    pub fn handle(&self) -> Handle {
        Rc::new(LoopHandle(Rc::downgrade(&self.inner)))
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn pending_tasks(&self) -> usize {
        self.inner.queue.borrow().len()
    }

    pub fn is_idle(&self) -> bool {
        self.inner.queue.borrow().is_empty()
    }

    /// Total number of tasks this loop has executed.
    pub fn executed_tasks(&self) -> u64 {
        self.inner.executed.get()
    }

    /// Run queued tasks, including the ones they schedule, until the queue is
    /// empty. Returns how many tasks ran.
    pub fn run(&self) -> Result<usize, Error> {
        let _running = self.enter()?;
        let mut ran = 0;
        loop {
            if let Some(limit) = self.inner.config.turn_limit {
                if ran >= limit && !self.is_idle() {
                    warn!(
                        "event loop gave up after {} tasks with {} still queued",
                        ran,
                        self.pending_tasks()
                    );
                    return Err(Error::TurnLimit(limit));
                }
            }
            let next = self.inner.queue.borrow_mut().pop_front();
            match next {
                Some(task) => {
                    self.execute(task);
                    ran += 1;
                }
                None => break,
            }
        }
        debug!("event loop drained after {} tasks", ran);
        Ok(ran)
    }

    /// Run exactly one queued task. Returns `false` when there was nothing to
    /// run.
    pub fn turn(&self) -> Result<bool, Error> {
        let _running = self.enter()?;
        let next = self.inner.queue.borrow_mut().pop_front();
        Ok(match next {
            Some(task) => {
                self.execute(task);
                true
            }
            None => false,
        })
    }

    fn enter(&self) -> Result<Running<'_>, Error> {
        if self.inner.running.replace(true) {
            return Err(Error::Reentrant);
        }
        Ok(Running(&self.inner.running))
    }

    fn execute(&self, task: Task) {
        task();
        self.inner.executed.set(self.inner.executed.get() + 1);
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("pending_tasks", &self.pending_tasks())
            .field("executed_tasks", &self.executed_tasks())
            .field("running", &self.inner.running.get())
            .finish()
    }
}

impl Schedule for EventLoop {
    fn schedule(&self, task: Task) {
        let mut queue = self.inner.queue.borrow_mut();
        queue.push_back(task);
        trace!("task scheduled; {} queued", queue.len());
    }
}

struct LoopHandle(Weak<Inner>);

impl Schedule for LoopHandle {
    fn schedule(&self, task: Task) {
        match self.0.upgrade() {
            Some(inner) => EventLoop { inner }.schedule(task),
            None => warn!("event loop dropped; discarding scheduled task"),
        }
    }
}
