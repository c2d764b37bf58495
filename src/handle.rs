use crate::group::{Managed, WorkGroup};
use crate::stop_token::StopSource;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

type Listener = Box<dyn FnOnce() + Send>;

struct CompletionState {
    done: bool,
    /// Set once every listener has run.
    settled: bool,
    listeners: Vec<Listener>,
}

/// One-shot completion latch, with listeners.
pub(crate) struct Completion {
    state: Mutex<CompletionState>,
    settled_cv: Condvar,
}

impl Default for Completion {
    fn default() -> Self {
        Self {
            state: Mutex::new(CompletionState {
                done: false,
                settled: false,
                listeners: Vec::new(),
            }),
            settled_cv: Condvar::new(),
        }
    }
}

impl Completion {
    fn lock(&self) -> MutexGuard<'_, CompletionState> {
        self.state.lock().unwrap()
    }

    pub(crate) fn is_done(&self) -> bool {
        self.lock().done
    }

    /// Mark complete. Only the first call has an effect.
    pub(crate) fn complete(&self) {
        let listeners = {
            let mut state = self.lock();
            if state.done {
                return;
            }
            state.done = true;
            std::mem::take(&mut state.listeners)
        };

        for listener in listeners {
            listener();
        }

        self.lock().settled = true;
        self.settled_cv.notify_all();
    }

    /// Run `f` once complete. If already complete, `f` runs immediately.
    pub(crate) fn on_complete<F>(&self, f: F)
    where
        F: 'static + Send + FnOnce(),
    {
        let mut state = self.lock();
        if state.done {
            drop(state);
            f();
        } else {
            state.listeners.push(Box::new(f));
        }
    }

    pub(crate) fn wait(&self) {
        let mut state = self.lock();
        while !state.settled {
            state = self.settled_cv.wait(state).unwrap();
        }
    }

    pub(crate) fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if state.settled {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self.settled_cv.wait_timeout(state, deadline - now).unwrap().0;
        }
    }
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) struct HandleState {
    id: u64,
    source: StopSource,
    completion: Completion,
}

impl HandleState {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            source: StopSource::default(),
            completion: Completion::default(),
        })
    }

    pub(crate) fn source(&self) -> &StopSource {
        &self.source
    }

    pub(crate) fn completion(&self) -> &Completion {
        &self.completion
    }
}

/// Completes the handle when dropped, which includes unwinding out of a panicking chain.
pub(crate) struct CompleteOnDrop(pub(crate) Arc<HandleState>);

impl Drop for CompleteOnDrop {
    fn drop(&mut self) {
        self.0.completion.complete();
    }
}

/// Handle to a started chain.
///
/// The handle is cheap to clone; all clones observe the same chain.
/// A chain is either active, or completed. Cancellation completes the chain as soon as
/// its running stage reaches a liveness check.
///
/// ```
/// use chainwork::{Chain, Runtime};
/// use std::time::Duration;
///
/// let runtime = Runtime::new();
/// let handle = runtime
///     .task(|| Ok(42))
///     .start_delay(Duration::from_secs(60))
///     .start();
///
/// assert!(handle.is_active());
/// assert!(handle.cancel());
/// assert!(!handle.cancel()); // Cancellation only happens once.
/// handle.wait();
/// assert!(handle.is_completed());
/// ```
#[derive(Clone)]
pub struct WorkHandle {
    state: Arc<HandleState>,
}

impl WorkHandle {
    pub(crate) fn new(state: Arc<HandleState>) -> Self {
        Self { state }
    }

    /// Identifier of this handle, unique within the process.
    pub fn id(&self) -> u64 {
        self.state.id
    }

    /// Indicate if the chain is still running, and has not been cancelled.
    pub fn is_active(&self) -> bool {
        !self.state.completion.is_done() && !self.state.source.token().stop_requested()
    }

    /// Indicate if the chain has finished running.
    pub fn is_completed(&self) -> bool {
        self.state.completion.is_done()
    }

    /// Cancel the chain.
    ///
    /// Returns `true` only for the call that transitions an active chain to cancelled.
    pub fn cancel(&self) -> bool {
        if self.state.completion.is_done() {
            return false;
        }
        let cancelled = self.state.source.request_stop();
        if cancelled {
            debug!(id = self.state.id, "work cancelled");
        }
        cancelled
    }

    /// Block until the chain has completed, and its completion has been fully processed.
    pub fn wait(&self) {
        self.state.completion.wait()
    }

    /// Block until the chain has completed, or the timeout expires.
    ///
    /// Returns `true` if the chain completed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.state.completion.wait_timeout(timeout)
    }

    /// Register this handle with a [WorkGroup].
    ///
    /// The handle is removed from the group once it completes.
    pub fn manage_by(self, group: &WorkGroup) -> Self {
        group.manage(Arc::new(self.clone()));
        self
    }
}

impl Managed for WorkHandle {
    fn cancel(&self) -> bool {
        WorkHandle::cancel(self)
    }

    fn is_active(&self) -> bool {
        WorkHandle::is_active(self)
    }

    fn on_complete(&self, f: Box<dyn FnOnce() + Send>) {
        self.state.completion.on_complete(f)
    }
}

impl fmt::Debug for WorkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkHandle")
            .field("id", &self.id())
            .field("active", &self.is_active())
            .field("completed", &self.is_completed())
            .finish()
    }
}
