//! Stop-tokens are used to signal a chain to stop processing early.
//!
//! If you come from a `go` background, this would be comparable to [Context](https://pkg.go.dev/context#Context).
//!
//! You can create a [StopSource], and then test when it's stopped:
//! ```
//! use chainwork::stop_token::*;
//!
//! let source = StopSource::default(); // A source can be stopped.
//!
//! let token = source.token();
//! assert!(!token.stop_requested()); // The token is used to observe the source.
//!
//! // Once the source is stopped, the token will reflect this:
//! assert!(source.request_stop());
//! assert!(token.stop_requested());
//! ```
//!
//! Sources can be nested.
//! Stopping a parent stops every child, but a child can be stopped on its own:
//! ```
//! use chainwork::stop_token::*;
//!
//! let parent = StopSource::default();
//! let first = StopSource::child(&parent.token());
//! let second = StopSource::child(&parent.token());
//!
//! first.request_stop();
//! assert!(!parent.token().stop_requested());
//! assert!(!second.token().stop_requested());
//!
//! parent.request_stop();
//! assert!(second.token().stop_requested());
//! ```

use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

/// A source for a [StopToken].
///
/// The source is shared between stop-tokens.
#[derive(Clone)]
pub struct StopSource {
    state: Arc<StopState>,
}

impl Default for StopSource {
    fn default() -> Self {
        Self {
            state: Arc::new(StopState::default()),
        }
    }
}

impl StopSource {
    /// Create a source that is stopped whenever `parent` is stopped.
    ///
    /// If the parent is already stopped, the returned source starts out stopped.
    pub fn child(parent: &StopToken) -> Self {
        let child = Self::default();
        let weak_child: Weak<StopState> = Arc::downgrade(&child.state);
        match parent.callback(move || {
            if let Some(state) = weak_child.upgrade() {
                state.request_stop();
            }
        }) {
            Ok(link) => *child.state.parent.lock().unwrap() = Some(link),
            Err(_) => {
                child.request_stop();
            }
        }
        child
    }

    /// Request that any chains observing this source be canceled.
    ///
    /// Returns `true` if this call transitioned the source to stopped.
    pub fn request_stop(&self) -> bool {
        self.state.request_stop()
    }

    /// Get the [StopToken] for this.
    pub fn token(&self) -> StopToken {
        StopToken {
            state: self.state.clone(),
        }
    }
}

impl fmt::Debug for StopSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopSource")
            .field("stopped", &self.state.stop_requested())
            .finish()
    }
}

/// A stop-token keeps track of if a chain has been requested to stop.
///
/// Stop-tokens allow three ways of checking if an operation has been canceled:
/// - by inspecting the [StopToken::stop_requested] method
/// - by installing a callback that'll be invoked once a stop is requested
/// - by waiting for the stop with [StopToken::wait_timeout]
#[derive(Clone)]
pub struct StopToken {
    state: Arc<StopState>,
}

impl StopToken {
    /// Indicate if a stop has been requested.
    pub fn stop_requested(&self) -> bool {
        self.state.stop_requested()
    }

    /// Create and register a new callback.
    ///
    /// The callback is invoked when the source transitions from not-stopped, to stopped.
    /// Dropping the returned [StopCallback] will deregister it, but if a cancelation is requested on a different thread,
    /// the callback invocation may happen anyway.
    ///
    /// If the source has already been stopped, the function is handed back as an error.
    pub fn callback<F>(&self, f: F) -> Result<StopCallback, F>
    where
        F: 'static + Send + FnOnce(),
    {
        self.state.register(f).map(|slot| StopCallback {
            state: self.state.clone(),
            slot,
        })
    }

    /// Block until a stop is requested, or the timeout expires.
    ///
    /// Returns `true` if a stop was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.state.wait_timeout(timeout)
    }
}

impl fmt::Debug for StopToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopToken")
            .field("stopped", &self.state.stop_requested())
            .finish()
    }
}

/// Registration of a callback on a [StopToken].
///
/// Dropping it deregisters the callback.
pub struct StopCallback {
    state: Arc<StopState>,
    slot: usize,
}

impl Drop for StopCallback {
    fn drop(&mut self) {
        self.state.deregister(self.slot);
    }
}

type Callback = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Callbacks {
    next_slot: usize,
    registered: HashMap<usize, Callback>,
}

#[derive(Default)]
struct StopState {
    stopped: AtomicBool,
    callbacks: Mutex<Callbacks>,
    stopped_cv: Condvar,
    /// Keeps the registration on the parent source alive.
    parent: Mutex<Option<StopCallback>>,
}

impl StopState {
    fn lock(&self) -> MutexGuard<'_, Callbacks> {
        self.callbacks.lock().unwrap()
    }

    fn request_stop(&self) -> bool {
        let callbacks = {
            let mut callbacks = self.lock();
            if self.stopped.swap(true, Ordering::AcqRel) {
                return false;
            }
            mem::take(&mut callbacks.registered)
        };
        self.stopped_cv.notify_all();

        // Invoke outside the lock: callbacks may stop other sources.
        for callback in callbacks.into_values() {
            callback();
        }
        true
    }

    fn stop_requested(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn register<F>(&self, f: F) -> Result<usize, F>
    where
        F: 'static + Send + FnOnce(),
    {
        let mut callbacks = self.lock();
        if self.stop_requested() {
            return Err(f);
        }

        let slot = callbacks.next_slot;
        callbacks.next_slot += 1;
        callbacks.registered.insert(slot, Box::new(f));
        Ok(slot)
    }

    fn deregister(&self, slot: usize) {
        let removed = self.lock().registered.remove(&slot);
        drop(removed);
    }

    fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut callbacks = self.lock();
        loop {
            if self.stop_requested() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            callbacks = self
                .stopped_cv
                .wait_timeout(callbacks, deadline - now)
                .unwrap()
                .0;
        }
    }
}
