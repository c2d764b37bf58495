use crate::dispatcher::ExecutionContext;
use crate::errors::{BoxError, Error, Result};
use crate::link::Link;
use crate::scope::Scope;
use crate::work::Work;
use std::sync::Arc;

/// The operation a [Stage] applies to the value of its upstream.
pub trait Operation<In>: Send + Sync + 'static {
    /// The value handed to the next stage.
    type Output: 'static + Send;

    /// Apply the operation.
    fn apply(&self, input: In) -> Result<Self::Output>;
}

/// A stage that runs its upstream, and then applies an [Operation] to the upstream value.
///
/// The operation runs on the resource for its [ExecutionContext].
pub struct Stage<Up, K> {
    upstream: Up,
    kind: Arc<K>,
    context: ExecutionContext,
    link: Link,
}

impl<Up, K> Stage<Up, K> {
    pub(crate) fn new<In>(upstream: Up, kind: Arc<K>, context: ExecutionContext) -> Self
    where
        Up: Work<In>,
    {
        let link = <Up as Work<In>>::link(&upstream).next();
        if context == ExecutionContext::NonCancellable {
            link.pin();
        }
        Self {
            upstream,
            kind,
            context,
            link,
        }
    }
}

impl<Up, K> Clone for Stage<Up, K>
where
    Up: Clone,
{
    fn clone(&self) -> Self {
        Self {
            upstream: self.upstream.clone(),
            kind: self.kind.clone(),
            context: self.context,
            link: self.link.clone(),
        }
    }
}

impl<In, Up, K> Work<In> for Stage<Up, K>
where
    Up: Work<In>,
    K: Operation<Up::Output>,
{
    type Output = K::Output;

    fn perform(&self, input: In, scope: &Scope) -> Result<K::Output> {
        let value = self.upstream.perform(input, scope)?;
        scope.ensure_active(self.link.is_cancellable())?;

        let kind = self.kind.clone();
        scope.dispatch(self.context, move || kind.apply(value))
    }

    fn link(&self) -> &Link {
        &self.link
    }
}

/// Operation that maps the value.
pub struct Transform<F>(F);

impl<F> Transform<F> {
    pub(crate) fn new(f: F) -> Self {
        Self(f)
    }
}

impl<In, U, F> Operation<In> for Transform<F>
where
    F: 'static + Send + Sync + Fn(In) -> U,
    U: 'static + Send,
{
    type Output = U;

    fn apply(&self, input: In) -> Result<U> {
        Ok((self.0)(input))
    }
}

/// Operation that maps the value, or fails.
pub struct TryTransform<F>(F);

impl<F> TryTransform<F> {
    pub(crate) fn new<In, U>(f: F) -> Self
    where
        F: Fn(In) -> std::result::Result<U, BoxError>,
    {
        Self(f)
    }
}

impl<In, U, F> Operation<In> for TryTransform<F>
where
    F: 'static + Send + Sync + Fn(In) -> std::result::Result<U, BoxError>,
    U: 'static + Send,
{
    type Output = U;

    fn apply(&self, input: In) -> Result<U> {
        Ok((self.0)(input)?)
    }
}

/// Operation that observes the value, and passes it on unchanged.
pub struct Effect<F>(F);

impl<F> Effect<F> {
    pub(crate) fn new(f: F) -> Self {
        Self(f)
    }
}

impl<In, F> Operation<In> for Effect<F>
where
    F: 'static + Send + Sync + Fn(&In),
    In: 'static + Send,
{
    type Output = In;

    fn apply(&self, input: In) -> Result<In> {
        (self.0)(&input);
        Ok(input)
    }
}

/// Operation that discontinues the chain, unless the predicate holds.
pub struct Filter<F>(F);

impl<F> Filter<F> {
    pub(crate) fn new(f: F) -> Self {
        Self(f)
    }
}

impl<In, F> Operation<In> for Filter<F>
where
    F: 'static + Send + Sync + Fn(&In) -> bool,
    In: 'static + Send,
{
    type Output = In;

    fn apply(&self, input: In) -> Result<In> {
        if (self.0)(&input) {
            Ok(input)
        } else {
            Err(Error::Ignore)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Effect, Filter, Stage, Transform, TryTransform};
    use crate::dispatcher::{Dispatcher, ExecutionContext};
    use crate::errors::{new_error, Error};
    use crate::scope::Scope;
    use crate::stop_token::StopSource;
    use crate::ui::{Inline, UiThread};
    use crate::work::{Source, Work};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use threadpool::ThreadPool;

    fn scope_for(source: &StopSource) -> Scope {
        Scope::new(
            source.token(),
            Arc::new(Dispatcher::new(ThreadPool::new(1), Inline)),
        )
    }

    #[test]
    fn stages_run_in_order() {
        let source = StopSource::default();
        let root = Source::new(|| Ok(2));
        let doubled = Stage::new::<()>(
            root,
            Arc::new(Transform::new(|i: i32| i * 2)),
            ExecutionContext::Background,
        );
        let text = Stage::new::<()>(
            doubled,
            Arc::new(Transform::new(|i: i32| format!("{}!", i))),
            ExecutionContext::Ui,
        );

        assert_eq!(
            String::from("4!"),
            text.perform((), &scope_for(&source)).unwrap()
        );
    }

    #[test]
    fn effect_passes_value_through() {
        let source = StopSource::default();
        let seen = Arc::new(AtomicUsize::new(0));
        let stage = {
            let seen = seen.clone();
            Stage::new::<()>(
                Source::new(|| Ok(7_usize)),
                Arc::new(Effect::new(move |i: &usize| {
                    seen.store(*i, Ordering::SeqCst);
                })),
                ExecutionContext::Background,
            )
        };

        assert_eq!(7, stage.perform((), &scope_for(&source)).unwrap());
        assert_eq!(7, seen.load(Ordering::SeqCst));
    }

    #[test]
    fn failed_filter_skips_downstream() {
        let source = StopSource::default();
        let downstream_calls = Arc::new(AtomicUsize::new(0));
        let filtered = Stage::new::<()>(
            Source::new(|| Ok(1)),
            Arc::new(Filter::new(|i: &i32| *i > 1)),
            ExecutionContext::Background,
        );
        let tail = {
            let downstream_calls = downstream_calls.clone();
            Stage::new::<()>(
                filtered,
                Arc::new(Transform::new(move |i: i32| {
                    downstream_calls.fetch_add(1, Ordering::SeqCst);
                    i
                })),
                ExecutionContext::Background,
            )
        };

        assert!(matches!(
            tail.perform((), &scope_for(&source)),
            Err(Error::Ignore)
        ));
        assert_eq!(0, downstream_calls.load(Ordering::SeqCst));
    }

    #[test]
    fn try_transform_surfaces_errors() {
        let source = StopSource::default();
        let stage = Stage::new::<()>(
            Source::new(|| Ok(1)),
            Arc::new(TryTransform::new(|_: i32| -> Result<i32, _> {
                Err(new_error("no good"))
            })),
            ExecutionContext::Background,
        );

        match stage.perform((), &scope_for(&source)) {
            Err(Error::User(error)) => assert_eq!("no good", error.to_string()),
            other => panic!("expected a user error, got {:?}", other),
        }
    }

    #[test]
    fn non_cancellable_context_pins_upstream() {
        let source = StopSource::default();
        let root = Source::new(|| Ok(1));
        let pinned = Stage::new::<()>(
            root.clone(),
            Arc::new(Transform::new(|i: i32| i + 1)),
            ExecutionContext::NonCancellable,
        );
        let tail = Stage::new::<()>(
            pinned.clone(),
            Arc::new(Transform::new(|i: i32| i + 1)),
            ExecutionContext::Background,
        );

        assert!(!root.link().is_cancellable());
        assert!(!pinned.link().is_cancellable());
        assert!(tail.link().is_cancellable());

        source.request_stop();
        let scope = scope_for(&source);
        assert_eq!(2, pinned.perform((), &scope).unwrap());
        assert!(matches!(tail.perform((), &scope), Err(Error::Cancelled)));
    }

    #[test]
    fn ui_stage_runs_on_ui_thread() {
        let ui = UiThread::spawn("ui_stage_runs_on_ui_thread").unwrap();
        let ui_thread = ui.thread_id();
        let source = StopSource::default();
        let scope = Scope::new(
            source.token(),
            Arc::new(Dispatcher::new(ThreadPool::new(1), ui)),
        );

        let stage = Stage::new::<()>(
            Source::new(|| Ok(())),
            Arc::new(Transform::new(|()| thread::current().id())),
            ExecutionContext::Ui,
        );
        assert_eq!(ui_thread, stage.perform((), &scope).unwrap());
    }
}
