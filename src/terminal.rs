use crate::chain::{Chain, Out};
use crate::dispatcher::ExecutionContext;
use crate::errors::{CallbackKind, Error, Result};
use crate::group::WorkGroup;
use crate::scope::Scope;
use crate::work::Work;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

type Callback<T> = Arc<dyn Fn(T) + Send + Sync>;

/// A callback slot. Transitions from unset to set at most once.
enum Slot<T> {
    Unset,
    Set(T),
}

impl<T> Slot<T> {
    fn set(&mut self, value: T, kind: CallbackKind) -> Result<()> {
        match self {
            Slot::Unset => {
                *self = Slot::Set(value);
                Ok(())
            }
            Slot::Set(_) => Err(Error::DuplicateCallback(kind)),
        }
    }

    fn get(&self) -> Option<&T> {
        match self {
            Slot::Unset => None,
            Slot::Set(value) => Some(value),
        }
    }
}

/// What happens around a chain: its callbacks, its start delay, and the group managing it.
pub struct Settings<T> {
    success: Slot<Callback<T>>,
    error: Slot<Callback<Error>>,
    delay: Duration,
    group: Option<WorkGroup>,
}

impl<T> Default for Settings<T> {
    fn default() -> Self {
        Self {
            success: Slot::Unset,
            error: Slot::Unset,
            delay: Duration::ZERO,
            group: None,
        }
    }
}

impl<T> Settings<T> {
    /// Remove the managing group, so that long-lived settings hold no reference to it.
    pub(crate) fn take_group(&mut self) -> Option<WorkGroup> {
        self.group.take()
    }
}

impl<T> fmt::Debug for Settings<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("on_success", &self.success.get().is_some())
            .field("on_error", &self.error.get().is_some())
            .field("delay", &self.delay)
            .field("managed", &self.group.is_some())
            .finish()
    }
}

/// A chain with its terminal settings attached.
///
/// No more stages can be added; only callbacks, the start delay and the managing group.
///
/// ```
/// use chainwork::{CallbackKind, Chain, Error, Runtime};
///
/// let runtime = Runtime::new();
/// let twice = runtime
///     .task(|| Ok(1))
///     .on_success(|_| ())
///     .on_success(|_| ());
///
/// assert!(matches!(twice, Err(Error::DuplicateCallback(CallbackKind::Success))));
/// ```
pub struct Terminal<C>
where
    C: Chain,
{
    chain: C,
    settings: Settings<Out<C>>,
}

impl<C> Terminal<C>
where
    C: Chain,
{
    pub(crate) fn new(chain: C) -> Self {
        Self {
            chain,
            settings: Settings::default(),
        }
    }

    pub(crate) fn with_success(mut self, f: Callback<Out<C>>) -> Self {
        self.settings.success = Slot::Set(f);
        self
    }

    pub(crate) fn with_error(mut self, f: Callback<Error>) -> Self {
        self.settings.error = Slot::Set(f);
        self
    }

    /// Invoke `f` on the UI executor with the value, once the chain succeeds.
    ///
    /// Fails with [Error::DuplicateCallback] if a success callback is already registered.
    pub fn on_success<F>(mut self, f: F) -> Result<Self>
    where
        F: 'static + Send + Sync + Fn(Out<C>),
    {
        self.settings
            .success
            .set(Arc::new(f), CallbackKind::Success)?;
        Ok(self)
    }

    /// Invoke `f` on the UI executor with the error, once the chain fails.
    ///
    /// Fails with [Error::DuplicateCallback] if an error callback is already registered.
    pub fn on_error<F>(mut self, f: F) -> Result<Self>
    where
        F: 'static + Send + Sync + Fn(Error),
    {
        self.settings.error.set(Arc::new(f), CallbackKind::Error)?;
        Ok(self)
    }

    /// Wait `delay` before running the chain.
    pub fn start_delay(mut self, delay: Duration) -> Self {
        self.settings.delay = delay;
        self
    }

    /// Register the started chain with `group`.
    pub fn manage_by(mut self, group: &WorkGroup) -> Self {
        self.settings.group = Some(group.clone());
        self
    }

    /// Start the chain.
    pub fn start(self) -> C::Handle {
        self.chain.launch(self.settings)
    }
}

/// Run `work` on the calling thread, and deliver its outcome.
pub(crate) fn execute<In, W>(work: &W, input: In, scope: &Scope, settings: &Settings<W::Output>)
where
    W: Work<In>,
{
    if !settings.delay.is_zero() && !scope.sleep(settings.delay) {
        trace!("cancelled during start delay");
        return;
    }

    deliver(work.perform(input, scope), scope, settings);
}

fn deliver<T>(outcome: Result<T>, scope: &Scope, settings: &Settings<T>)
where
    T: 'static + Send,
{
    match outcome {
        Err(error) if error.is_suppressed() => trace!(%error, "outcome suppressed"),
        Ok(value) => {
            if let Some(callback) = settings.success.get() {
                let callback = callback.clone();
                invoke_on_ui(scope, move || callback(value));
            }
        }
        Err(error) => match settings.error.get() {
            Some(callback) => {
                let callback = callback.clone();
                invoke_on_ui(scope, move || callback(error));
            }
            None => debug!(%error, "work failed without an error callback"),
        },
    }
}

/// Posts the callback to the UI, which invokes it only if the scope is still active by then.
fn invoke_on_ui<F>(scope: &Scope, f: F)
where
    F: 'static + Send + FnOnce(),
{
    let token = scope.token().clone();
    let delivered = scope.dispatcher().run_on(ExecutionContext::Ui, move || {
        if token.stop_requested() {
            trace!("callback suppressed, work is no longer active");
        } else {
            f();
        }
    });
    if let Err(error) = delivered {
        warn!(%error, "callback dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::{execute, Settings, Slot};
    use crate::dispatcher::Dispatcher;
    use crate::errors::{discontinue, new_error, CallbackKind, Error};
    use crate::scope::Scope;
    use crate::stop_token::StopSource;
    use crate::ui::Inline;
    use crate::work::Source;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};
    use threadpool::ThreadPool;

    fn scope_for(source: &StopSource) -> Scope {
        Scope::new(
            source.token(),
            Arc::new(Dispatcher::new(ThreadPool::new(1), Inline)),
        )
    }

    fn recording_settings<T>(successes: &Arc<Mutex<Vec<T>>>, errors: &Arc<AtomicUsize>) -> Settings<T>
    where
        T: 'static + Send,
    {
        let successes = successes.clone();
        let errors = errors.clone();
        Settings {
            success: Slot::Set(Arc::new(move |value: T| successes.lock().unwrap().push(value))),
            error: Slot::Set(Arc::new(move |_: Error| {
                errors.fetch_add(1, Ordering::SeqCst);
            })),
            delay: Duration::ZERO,
            group: None,
        }
    }

    #[test]
    fn slot_is_set_once() {
        let mut slot = Slot::Unset;
        assert!(slot.set(1, CallbackKind::Success).is_ok());
        assert!(matches!(
            slot.set(2, CallbackKind::Success),
            Err(Error::DuplicateCallback(CallbackKind::Success))
        ));
        assert_eq!(Some(&1), slot.get());
    }

    #[test]
    fn exactly_one_callback_fires() {
        let source = StopSource::default();
        let successes = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::new(AtomicUsize::new(0));
        let settings = recording_settings(&successes, &errors);

        execute(&Source::new(|| Ok(5)), (), &scope_for(&source), &settings);
        execute(
            &Source::new(|| Err::<i32, _>(new_error("broken"))),
            (),
            &scope_for(&source),
            &settings,
        );

        assert_eq!(vec![5], *successes.lock().unwrap());
        assert_eq!(1, errors.load(Ordering::SeqCst));
    }

    #[test]
    fn suppressed_outcomes_fire_nothing() {
        let source = StopSource::default();
        let successes = Arc::new(Mutex::new(Vec::<i32>::new()));
        let errors = Arc::new(AtomicUsize::new(0));
        let settings = recording_settings(&successes, &errors);

        execute(
            &Source::new(|| Err::<i32, _>(discontinue())),
            (),
            &scope_for(&source),
            &settings,
        );
        source.request_stop();
        execute(&Source::new(|| Ok(1)), (), &scope_for(&source), &settings);

        assert!(successes.lock().unwrap().is_empty());
        assert_eq!(0, errors.load(Ordering::SeqCst));
    }

    #[test]
    fn cancelled_delay_skips_body() {
        let source = StopSource::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let work = {
            let calls = calls.clone();
            Source::new(move || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        };
        let mut settings = Settings::default();
        settings.delay = Duration::from_secs(30);

        source.request_stop();
        let begin = Instant::now();
        execute(&work, (), &scope_for(&source), &settings);
        assert!(begin.elapsed() < Duration::from_secs(5));
        assert_eq!(0, calls.load(Ordering::SeqCst));
    }

    #[test]
    fn pinned_work_runs_but_does_not_deliver() {
        let source = StopSource::default();
        let successes = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::new(AtomicUsize::new(0));
        let settings = recording_settings(&successes, &errors);
        let calls = Arc::new(AtomicUsize::new(0));
        let work = {
            let calls = calls.clone();
            Source::new(move || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            })
        };
        crate::work::Work::link(&work).pin();

        source.request_stop();
        execute(&work, (), &scope_for(&source), &settings);
        assert_eq!(1, calls.load(Ordering::SeqCst));
        assert!(successes.lock().unwrap().is_empty());
    }
}
