use crate::errors::{BoxError, Result};
use crate::link::Link;
use crate::scope::Scope;
use std::sync::Arc;

/// A runnable chain of work.
///
/// A chain is built up from a root (a [Source], a [Consumer] or a merge), wrapped in zero or
/// more [Stages](crate::Stage).
/// Performing the chain runs every stage in dependency order, on the calling thread,
/// except for stages that are dispatched to the UI.
///
/// Chains are cloned when they're shared between consumer lanes, so clones must be cheap.
pub trait Work<In>: Clone + Send + Sync + 'static {
    /// The value produced by the chain.
    type Output: 'static + Send;

    /// Run the chain, with `input` fed to its root.
    fn perform(&self, input: In, scope: &Scope) -> Result<Self::Output>;

    /// The cancellation link of the tail stage.
    fn link(&self) -> &Link;
}

/// A user-supplied unit of work.
///
/// This is the extension point for reusable work: implement it on a type, and
/// start it with [Runtime::task_from](crate::Runtime::task_from).
///
/// ```
/// use chainwork::{Action, BoxError, Chain, Runtime};
/// use chainwork::ui::Inline;
/// use std::sync::mpsc;
///
/// struct Sum(Vec<u32>);
///
/// impl Action for Sum {
///     type Output = u32;
///
///     fn perform(&self) -> Result<u32, BoxError> {
///         Ok(self.0.iter().sum())
///     }
/// }
///
/// let runtime = Runtime::with_config(chainwork::Config::default().ui(Inline));
/// let (tx, rx) = mpsc::channel();
/// runtime
///     .task_from(Sum(vec![1, 2, 3]))
///     .on_success(move |sum| tx.send(sum).unwrap())
///     .start();
/// assert_eq!(6, rx.recv().unwrap());
/// ```
pub trait Action: Send + Sync + 'static {
    /// The value produced by the action.
    type Output: 'static + Send;

    /// Run the action.
    fn perform(&self) -> std::result::Result<Self::Output, BoxError>;
}

/// Root of a chain, that computes a value from nothing.
pub struct Source<F> {
    f: Arc<F>,
    link: Link,
}

impl<F> Source<F> {
    pub(crate) fn new<T>(f: F) -> Self
    where
        F: Fn() -> std::result::Result<T, BoxError>,
    {
        Self {
            f: Arc::new(f),
            link: Link::root(),
        }
    }
}

impl<F> Clone for Source<F> {
    fn clone(&self) -> Self {
        Self {
            f: self.f.clone(),
            link: self.link.clone(),
        }
    }
}

impl<T, F> Work<()> for Source<F>
where
    F: 'static + Send + Sync + Fn() -> std::result::Result<T, BoxError>,
    T: 'static + Send,
{
    type Output = T;

    fn perform(&self, _: (), scope: &Scope) -> Result<T> {
        scope.ensure_active(self.link.is_cancellable())?;
        Ok((self.f)()?)
    }

    fn link(&self) -> &Link {
        &self.link
    }
}

/// Root of a consumer chain, that computes a value from a produced item.
pub struct Consumer<F> {
    f: Arc<F>,
    link: Link,
}

impl<F> Consumer<F> {
    pub(crate) fn new<T, R>(f: F) -> Self
    where
        F: Fn(T) -> std::result::Result<R, BoxError>,
    {
        Self {
            f: Arc::new(f),
            link: Link::root(),
        }
    }
}

impl<F> Clone for Consumer<F> {
    fn clone(&self) -> Self {
        Self {
            f: self.f.clone(),
            link: self.link.clone(),
        }
    }
}

impl<T, R, F> Work<T> for Consumer<F>
where
    F: 'static + Send + Sync + Fn(T) -> std::result::Result<R, BoxError>,
    R: 'static + Send,
{
    type Output = R;

    fn perform(&self, item: T, scope: &Scope) -> Result<R> {
        scope.ensure_active(self.link.is_cancellable())?;
        Ok((self.f)(item)?)
    }

    fn link(&self) -> &Link {
        &self.link
    }
}
