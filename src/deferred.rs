//! Deferred responses.
//!
//! A handler returning a [`Deferred`] detaches the request: the dispatch loop
//! stops driving the chain and waits for the deferred to be resolved or
//! rejected, from any thread. Only the first completion counts.
//!
//! ```rust
//! # use topaz::prelude::*;
//! // Work is handed to the router's default executor, the handler returns
//! // right away
//! fn slow() -> Deferred {
//!     Deferred::run(|| Ok::<_, TopazError>("done"))
//! }
//! ```

use crate::{
    error::{BoxError, TopazError},
    responder::{DynResponder, Responder},
};
use futures::Future;
use parking_lot::Mutex;
use std::{
    fmt::{Debug, Formatter},
    sync::Arc,
};
use tokio::runtime::Handle;

/// Value a deferred completes with
pub type Completion = Result<Box<dyn DynResponder + Send>, TopazError>;

type Callback = Box<dyn FnOnce(Completion) + Send>;
type Work = Box<dyn FnOnce(Deferred) + Send>;

/// Something able to run a blocking task
pub trait Executor: Send + Sync {
    fn execute(&self, task: Box<dyn FnOnce() + Send>);
}

/// Runs tasks on the blocking pool of the tokio runtime
impl Executor for Handle {
    fn execute(&self, task: Box<dyn FnOnce() + Send>) {
        self.spawn_blocking(task);
    }
}

/// Runs tasks on the blocking pool of the runtime driving the current
/// dispatch
#[derive(Debug, Default, Clone, Copy)]
pub struct BlockingExecutor;

impl Executor for BlockingExecutor {
    fn execute(&self, task: Box<dyn FnOnce() + Send>) {
        tokio::task::spawn_blocking(task);
    }
}

/// Runs tasks inline, on the thread handing them off
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectExecutor;

impl Executor for DirectExecutor {
    fn execute(&self, task: Box<dyn FnOnce() + Send>) {
        task()
    }
}

/// Which executor a deferred task should be handed to
#[derive(Clone)]
pub enum ExecutorRef {
    /// The router's default executor
    Default,
    /// An executor registered on the router under this name
    Named(String),
    Instance(Arc<dyn Executor>),
}

impl Debug for ExecutorRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutorRef::Default => f.write_str("Default"),
            ExecutorRef::Named(n) => f.debug_tuple("Named").field(n).finish(),
            ExecutorRef::Instance(_) => f.write_str("Instance(..)"),
        }
    }
}

enum State {
    /// Not completed yet, maybe with someone waiting for the completion
    Pending(Option<Callback>),
    /// Completed before anyone started waiting
    Resolved(Completion),
    /// Completion was handed to the callback
    Done,
}

struct Shared {
    state: Mutex<State>,
    task: Mutex<Option<(ExecutorRef, Work)>>,
}

/// Handle on a response that will be completed later. Clones share the same
/// completion.
#[derive(Clone)]
pub struct Deferred {
    shared: Arc<Shared>,
}

impl Deferred {
    /// A deferred without any task. Something holding a clone is expected to
    /// resolve or reject it.
    pub fn new() -> Self {
        Deferred {
            shared: Arc::new(Shared {
                state: Mutex::new(State::Pending(None)),
                task: Mutex::new(None),
            }),
        }
    }

    /// Run `f` on the router's default executor and complete with its result
    pub fn run<F, R, E>(f: F) -> Self
    where
        F: FnOnce() -> Result<R, E> + Send + 'static,
        R: Responder + Send + 'static,
        E: Into<BoxError>,
    {
        Self::with_task(ExecutorRef::Default, f)
    }

    /// Run `f` on the executor registered on the router under `name`
    pub fn run_named<F, R, E>(name: &str, f: F) -> Self
    where
        F: FnOnce() -> Result<R, E> + Send + 'static,
        R: Responder + Send + 'static,
        E: Into<BoxError>,
    {
        Self::with_task(ExecutorRef::Named(name.to_string()), f)
    }

    pub fn run_on<F, R, E>(executor: Arc<dyn Executor>, f: F) -> Self
    where
        F: FnOnce() -> Result<R, E> + Send + 'static,
        R: Responder + Send + 'static,
        E: Into<BoxError>,
    {
        Self::with_task(ExecutorRef::Instance(executor), f)
    }

    /// Complete with the output of `fut`, spawned on the tokio runtime once
    /// the request is detached
    pub fn spawn<Fut, R, E>(fut: Fut) -> Self
    where
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        R: Responder + Send + 'static,
        E: Into<BoxError>,
    {
        let deferred = Deferred::new();
        let work: Work = Box::new(move |d: Deferred| {
            tokio::spawn(async move {
                match fut.await {
                    Ok(r) => d.resolve(r),
                    Err(e) => d.reject(e),
                };
            });
        });
        *deferred.shared.task.lock() = Some((ExecutorRef::Instance(Arc::new(DirectExecutor)), work));
        deferred
    }

    fn with_task<F, R, E>(executor: ExecutorRef, f: F) -> Self
    where
        F: FnOnce() -> Result<R, E> + Send + 'static,
        R: Responder + Send + 'static,
        E: Into<BoxError>,
    {
        let deferred = Deferred::new();
        let work: Work = Box::new(move |d: Deferred| {
            match f() {
                Ok(r) => d.resolve(r),
                Err(e) => d.reject(e),
            };
        });
        *deferred.shared.task.lock() = Some((executor, work));
        deferred
    }

    /// Complete with a value. Returns `false` if the deferred was already
    /// completed, in which case `value` is dropped.
    pub fn resolve<R: Responder + Send + 'static>(&self, value: R) -> bool {
        self.complete(Ok(Box::new(Some(value))))
    }

    /// Complete with an error. Returns `false` if the deferred was already
    /// completed.
    pub fn reject<E: Into<BoxError>>(&self, error: E) -> bool {
        self.complete(Err(TopazError::handler(error)))
    }

    pub fn is_completed(&self) -> bool {
        !matches!(&*self.shared.state.lock(), State::Pending(_))
    }

    fn complete(&self, completion: Completion) -> bool {
        let mut state = self.shared.state.lock();
        match std::mem::replace(&mut *state, State::Done) {
            State::Pending(Some(callback)) => {
                drop(state);
                callback(completion);
                true
            }
            State::Pending(None) => {
                *state = State::Resolved(completion);
                true
            }
            previous => {
                *state = previous;
                warn!("Deferred was already completed, ignoring the new completion");
                false
            }
        }
    }

    /// Register the callback receiving the completion. It runs on the thread
    /// completing the deferred, or right away if it already was.
    pub(crate) fn on_complete<F>(&self, f: F)
    where
        F: FnOnce(Completion) + Send + 'static,
    {
        let mut state = self.shared.state.lock();
        match std::mem::replace(&mut *state, State::Done) {
            State::Pending(None) => *state = State::Pending(Some(Box::new(f))),
            State::Resolved(completion) => {
                drop(state);
                f(completion);
            }
            previous => {
                *state = previous;
                warn!("Deferred already has a completion callback");
            }
        }
    }

    pub(crate) fn take_task(&self) -> Option<(ExecutorRef, Work)> {
        self.shared.task.lock().take()
    }
}

impl Default for Deferred {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for Deferred {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deferred").field("completed", &self.is_completed()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(deferred: &Deferred) -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let ok = Arc::new(AtomicUsize::new(0));
        let err = Arc::new(AtomicUsize::new(0));
        let (ok_c, err_c) = (ok.clone(), err.clone());
        deferred.on_complete(move |c| {
            match c {
                Ok(_) => ok_c.fetch_add(1, Ordering::SeqCst),
                Err(_) => err_c.fetch_add(1, Ordering::SeqCst),
            };
        });
        (ok, err)
    }

    #[test]
    fn first_completion_wins() {
        let deferred = Deferred::new();
        let (ok, err) = counting(&deferred);
        assert!(deferred.resolve("first"));
        assert!(!deferred.resolve("second"));
        assert!(!deferred.reject(TopazError::Other("late".to_string())));
        assert!(deferred.is_completed());
        assert_eq!(ok.load(Ordering::SeqCst), 1);
        assert_eq!(err.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn completion_before_callback_is_kept() {
        let deferred = Deferred::new();
        assert!(deferred.clone().reject(TopazError::Other("nope".to_string())));
        let (ok, err) = counting(&deferred);
        assert_eq!(ok.load(Ordering::SeqCst), 0);
        assert_eq!(err.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn task_runs_on_executor() {
        let deferred = Deferred::run_on(Arc::new(DirectExecutor), || Ok::<_, TopazError>("x"));
        let (ok, _) = counting(&deferred);
        let (executor, work) = deferred.take_task().unwrap();
        assert!(matches!(executor, ExecutorRef::Instance(_)));
        assert!(deferred.take_task().is_none());
        work(deferred.clone());
        assert_eq!(ok.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_every_handle_drops_the_callback() {
        let (tx, mut rx) = tokio::sync::oneshot::channel::<()>();
        let deferred = Deferred::new();
        deferred.on_complete(move |_| {
            let _ = tx.send(());
        });
        drop(deferred);
        assert!(matches!(rx.try_recv(), Err(tokio::sync::oneshot::error::TryRecvError::Closed)));
    }
}
