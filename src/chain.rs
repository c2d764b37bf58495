use crate::dispatcher::ExecutionContext;
use crate::errors::{BoxError, Error};
use crate::group::WorkGroup;
use crate::stage::{Effect, Filter, Stage, Transform, TryTransform};
use crate::terminal::{Settings, Terminal};
use crate::work::Work;
use std::sync::Arc;
use std::time::Duration;

/// The value a [Chain] produces.
pub type Out<C> = <<C as Chain>::Tail as Work<<C as Chain>::Input>>::Output;

/// Type of a chain after appending a stage.
pub type Then<C, K> = <C as Chain>::Rebound<Stage<<C as Chain>::Tail, K>>;

/// Builder of a chain of work.
///
/// Every operator consumes the builder, and returns a new builder with one more stage.
/// The plain operators run on [ExecutionContext::Background]; the `_on` forms take the context explicitly.
///
/// ```
/// use chainwork::{Chain, Config, Runtime};
/// use chainwork::ui::Inline;
/// use std::sync::mpsc;
///
/// let runtime = Runtime::with_config(Config::default().ui(Inline));
/// let (tx, rx) = mpsc::channel();
/// runtime
///     .task(|| Ok(20))
///     .transform(|i| i + 1)
///     .filter(|i| i % 2 == 1)
///     .transform(|i| i * 2)
///     .on_success(move |i| tx.send(i).unwrap())
///     .start();
///
/// assert_eq!(42, rx.recv().unwrap());
/// ```
pub trait Chain: Sized {
    /// The value fed into the root of the chain.
    type Input: 'static + Send;
    /// The chain built so far.
    type Tail: Work<Self::Input>;
    /// The same kind of builder, around a different chain.
    type Rebound<X: Work<Self::Input>>: Chain<Input = Self::Input, Tail = X, Handle = Self::Handle>;
    /// What [Chain::start] returns.
    type Handle;

    /// Replace the chain.
    fn map_work<X, F>(self, f: F) -> Self::Rebound<X>
    where
        X: Work<Self::Input>,
        F: Fn(Self::Tail) -> X;

    /// Mark the tail stage, and every stage before it, non-cancellable.
    ///
    /// The chain runs to completion after a cancel, but the callbacks are still suppressed.
    fn non_cancellable(self) -> Self;

    /// Start the chain with the given terminal settings.
    fn launch(self, settings: Settings<Out<Self>>) -> Self::Handle;

    /// Map the value on the background pool.
    fn transform<U, F>(self, f: F) -> Then<Self, Transform<F>>
    where
        F: 'static + Send + Sync + Fn(Out<Self>) -> U,
        U: 'static + Send,
    {
        self.transform_on(ExecutionContext::Background, f)
    }

    /// Map the value in the given context.
    fn transform_on<U, F>(self, context: ExecutionContext, f: F) -> Then<Self, Transform<F>>
    where
        F: 'static + Send + Sync + Fn(Out<Self>) -> U,
        U: 'static + Send,
    {
        let kind = Arc::new(Transform::new(f));
        self.map_work(move |upstream| Stage::new::<Self::Input>(upstream, kind.clone(), context))
    }

    /// Map the value on the background pool, with a function that may fail.
    fn try_transform<U, F>(self, f: F) -> Then<Self, TryTransform<F>>
    where
        F: 'static + Send + Sync + Fn(Out<Self>) -> Result<U, BoxError>,
        U: 'static + Send,
    {
        self.try_transform_on(ExecutionContext::Background, f)
    }

    /// Map the value in the given context, with a function that may fail.
    fn try_transform_on<U, F>(self, context: ExecutionContext, f: F) -> Then<Self, TryTransform<F>>
    where
        F: 'static + Send + Sync + Fn(Out<Self>) -> Result<U, BoxError>,
        U: 'static + Send,
    {
        let kind = Arc::new(TryTransform::new(f));
        self.map_work(move |upstream| Stage::new::<Self::Input>(upstream, kind.clone(), context))
    }

    /// Observe the value on the background pool.
    fn effect<F>(self, f: F) -> Then<Self, Effect<F>>
    where
        F: 'static + Send + Sync + Fn(&Out<Self>),
    {
        self.effect_on(ExecutionContext::Background, f)
    }

    /// Observe the value in the given context.
    fn effect_on<F>(self, context: ExecutionContext, f: F) -> Then<Self, Effect<F>>
    where
        F: 'static + Send + Sync + Fn(&Out<Self>),
    {
        let kind = Arc::new(Effect::new(f));
        self.map_work(move |upstream| Stage::new::<Self::Input>(upstream, kind.clone(), context))
    }

    /// Discontinue the chain on the background pool, unless the predicate holds.
    ///
    /// A discontinued chain invokes neither callback.
    fn filter<F>(self, f: F) -> Then<Self, Filter<F>>
    where
        F: 'static + Send + Sync + Fn(&Out<Self>) -> bool,
    {
        self.filter_on(ExecutionContext::Background, f)
    }

    /// Discontinue the chain in the given context, unless the predicate holds.
    fn filter_on<F>(self, context: ExecutionContext, f: F) -> Then<Self, Filter<F>>
    where
        F: 'static + Send + Sync + Fn(&Out<Self>) -> bool,
    {
        let kind = Arc::new(Filter::new(f));
        self.map_work(move |upstream| Stage::new::<Self::Input>(upstream, kind.clone(), context))
    }

    /// Invoke `f` on the UI executor with the value, once the chain succeeds.
    fn on_success<F>(self, f: F) -> Terminal<Self>
    where
        F: 'static + Send + Sync + Fn(Out<Self>),
    {
        Terminal::new(self).with_success(Arc::new(f))
    }

    /// Invoke `f` on the UI executor with the error, once the chain fails.
    fn on_error<F>(self, f: F) -> Terminal<Self>
    where
        F: 'static + Send + Sync + Fn(Error),
    {
        Terminal::new(self).with_error(Arc::new(f))
    }

    /// Wait `delay` before running the chain.
    ///
    /// Cancelling during the delay skips the chain entirely.
    fn start_delay(self, delay: Duration) -> Terminal<Self> {
        Terminal::new(self).start_delay(delay)
    }

    /// Register the started chain with `group`.
    fn manage_by(self, group: &WorkGroup) -> Terminal<Self> {
        Terminal::new(self).manage_by(group)
    }

    /// Start the chain, without callbacks.
    fn start(self) -> Self::Handle {
        self.launch(Settings::default())
    }
}
