use crate::dispatcher::{Dispatcher, ExecutionContext};
use crate::errors::{Error, Result};
use crate::stop_token::{StopSource, StopToken};
use std::sync::Arc;
use std::time::Duration;

/// The scope a chain runs in.
///
/// Ties together the cancellation token governing the chain, and the [Dispatcher] it runs on.
#[derive(Clone, Debug)]
pub struct Scope {
    token: StopToken,
    dispatcher: Arc<Dispatcher>,
}

impl Scope {
    pub(crate) fn new(token: StopToken, dispatcher: Arc<Dispatcher>) -> Self {
        Self { token, dispatcher }
    }

    /// Indicate if the owning work is still wanted.
    pub fn is_active(&self) -> bool {
        !self.token.stop_requested()
    }

    /// Fail with [Error::Cancelled] if cancellation applies and the scope is no longer active.
    pub fn ensure_active(&self, cancellable: bool) -> Result<()> {
        if cancellable && !self.is_active() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `delay`, waking early if the scope is cancelled.
    ///
    /// Returns `true` if the full delay elapsed while the scope stayed active.
    pub fn sleep(&self, delay: Duration) -> bool {
        !self.token.wait_timeout(delay)
    }

    /// Run `f` in `context`, and return its outcome.
    pub(crate) fn dispatch<R, F>(&self, context: ExecutionContext, f: F) -> Result<R>
    where
        F: 'static + Send + FnOnce() -> Result<R>,
        R: 'static + Send,
    {
        self.dispatcher.run_on(context, f)?
    }

    /// Create a nested scope, that can be cancelled on its own.
    pub(crate) fn child(&self) -> (StopSource, Scope) {
        let source = StopSource::child(&self.token);
        let scope = Scope::new(source.token(), self.dispatcher.clone());
        (source, scope)
    }

    pub(crate) fn token(&self) -> &StopToken {
        &self.token
    }

    pub(crate) fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }
}
