use std::collections::VecDeque;
use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::Waker;

use tracing::{debug, trace, warn};

use crate::executor::{panic_message, Builder, Reject, Resolve};
use crate::{Error, Promiseable, Settled};

type OnResolved<T> = Box<dyn FnOnce(T) -> Result<(), Error> + Send>;
type OnRejected = Box<dyn FnOnce(Error) -> Result<(), Error> + Send>;

/// A child promise paired with the outcome its continuation produced.
type Propagation = (Promise<()>, Result<(), Error>);

/// Handle to one asynchronous outcome.
///
/// Clones share the same state. The outcome is settled at most once; the
/// first `resolve` or `reject` wins and later calls are ignored.
pub struct Promise<T> {
    pub(crate) promise: Arc<Mutex<Inner<T>>>,
}

pub(crate) struct Inner<T> {
    resolved: Vec<Resolver<T>>,
    rejected: Vec<Rejecter>,
    pub(crate) outcome: Option<Result<T, Error>>,
    pub(crate) wakers: Vec<(usize, Waker)>,
    pub(crate) next_waker: usize,
}

/// A success continuation and the child promise carrying its outcome.
struct Resolver<T> {
    on_resolved: OnResolved<T>,
    promise: Promise<()>,
}

/// A failure continuation and the child promise carrying its outcome.
struct Rejecter {
    on_rejected: OnRejected,
    promise: Promise<()>,
}

impl<T> Resolver<T> {
    fn fire(self, value: T) -> Propagation {
        (self.promise, run(self.on_resolved, value))
    }
}

impl Rejecter {
    fn fire(self, err: Error) -> Propagation {
        (self.promise, run(self.on_rejected, err))
    }
}

/// Runs a user continuation; a panic becomes the child's rejection.
fn run<A>(callback: Box<dyn FnOnce(A) -> Result<(), Error> + Send>, arg: A) -> Result<(), Error> {
    panic::catch_unwind(AssertUnwindSafe(|| callback(arg))).unwrap_or_else(|payload| {
        let message = panic_message(&*payload);
        warn!(%message, "promise continuation panicked");
        Err(Error::ContinuationPanicked(message.into()))
    })
}

/// Settles children level by level from a queue, so chain depth never
/// grows the stack.
fn cascade(mut queue: VecDeque<Propagation>) {
    while let Some((promise, outcome)) = queue.pop_front() {
        if let Some(next) = promise.complete(outcome) {
            queue.extend(next);
        }
    }
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        let state = match inner.outcome {
            None => "pending",
            Some(Ok(_)) => "resolved",
            Some(Err(_)) => "rejected",
        };
        f.debug_struct("Promise")
            .field("state", &state)
            .field("resolved", &inner.resolved.len())
            .field("rejected", &inner.rejected.len())
            .finish()
    }
}

impl<T> Promise<T>
where
    T: Clone + Send + 'static,
{
    /// Starts `executor` on its own thread and returns the promise it
    /// settles.
    ///
    /// # Panics
    ///
    /// Panics if the OS fails to create a thread, like `std::thread::spawn`.
    /// Use [`Builder::spawn`] to handle that case.
    pub fn new<F>(executor: F) -> Self
    where
        F: FnOnce(Resolve<T>, Reject<T>) + Send + 'static,
    {
        Builder::new()
            .spawn(executor)
            .expect("failed to spawn promise executor thread")
    }

    /// A promise with no executor, settled only through propagation.
    pub(crate) fn pending() -> Self {
        Self {
            promise: Arc::new(Mutex::new(Inner {
                resolved: vec![],
                rejected: vec![],
                outcome: None,
                wakers: vec![],
                next_waker: 0,
            })),
        }
    }

    /// Future that completes with this promise's outcome.
    pub fn settled(&self) -> Settled<T> {
        Settled::new(self.clone())
    }

    pub(crate) fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    pub(crate) fn reject(&self, err: Error) -> bool {
        self.settle(Err(err))
    }

    fn settle(&self, outcome: Result<T, Error>) -> bool {
        match self.complete(outcome) {
            Some(next) => {
                cascade(next.into());
                true
            }
            None => false,
        }
    }

    /// Records `outcome` and runs the continuations it selects. Returns the
    /// children they settle, or `None` if this promise was already settled.
    fn complete(&self, outcome: Result<T, Error>) -> Option<Vec<Propagation>> {
        let (resolved, rejected, wakers) = {
            let mut inner = self.lock();
            if inner.outcome.is_some() {
                trace!(ok = outcome.is_ok(), "ignoring settlement of settled promise");
                return None;
            }
            inner.outcome = Some(outcome.clone());
            (
                mem::take(&mut inner.resolved),
                mem::take(&mut inner.rejected),
                mem::take(&mut inner.wakers),
            )
        };
        for (_, waker) in wakers {
            waker.wake();
        }
        // Bindings are dropped outside the guard; captured handles may touch
        // this promise on drop.
        let next = match outcome {
            Ok(value) => {
                drop(rejected);
                debug!(continuations = resolved.len(), "promise resolved");
                resolved
                    .into_iter()
                    .map(|resolver| resolver.fire(value.clone()))
                    .collect()
            }
            Err(err) => {
                drop(resolved);
                debug!(continuations = rejected.len(), %err, "promise rejected");
                rejected
                    .into_iter()
                    .map(|rejecter| rejecter.fire(err.clone()))
                    .collect()
            }
        };
        Some(next)
    }
}

impl<T> Promise<T> {
    // Callbacks never run under the guard, so a poisoned lock still holds
    // consistent state.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.promise.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Promiseable<T> for Promise<T>
where
    T: Clone + Send + 'static,
{
    fn then<F>(&self, on_resolved: F) -> Promise<()>
    where
        F: FnOnce(T) -> Result<(), Error> + Send + 'static,
    {
        let child = Promise::pending();
        let resolver = Resolver {
            on_resolved: Box::new(on_resolved),
            promise: child.clone(),
        };
        let replay = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            match &inner.outcome {
                None => {
                    inner.resolved.push(resolver);
                    trace!(position = inner.resolved.len(), "registered then");
                    None
                }
                Some(Ok(value)) => Some((resolver, value.clone())),
                Some(Err(_)) => None,
            }
        };
        if let Some((resolver, value)) = replay {
            trace!("replaying resolved value to late then");
            cascade(VecDeque::from([resolver.fire(value)]));
        }
        child
    }

    fn catch<F>(&self, on_rejected: F) -> Promise<()>
    where
        F: FnOnce(Error) -> Result<(), Error> + Send + 'static,
    {
        let child = Promise::pending();
        let rejecter = Rejecter {
            on_rejected: Box::new(on_rejected),
            promise: child.clone(),
        };
        let replay = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            match &inner.outcome {
                None => {
                    inner.rejected.push(rejecter);
                    trace!(position = inner.rejected.len(), "registered catch");
                    None
                }
                Some(Err(err)) => Some((rejecter, err.clone())),
                Some(Ok(_)) => None,
            }
        };
        if let Some((rejecter, err)) = replay {
            trace!("replaying rejection to late catch");
            cascade(VecDeque::from([rejecter.fire(err)]));
        }
        child
    }
}
