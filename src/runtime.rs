use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::errors::{BoxError, Error, Result};
use crate::merge::{MergeAll, Merger2, Merger3, Merger4};
use crate::pipeline::Pipeline;
use crate::producer::{ConsumerPipeline, PoolPipeline};
use crate::work::{Action, Consumer, Source};
use std::fmt;
use std::sync::{Arc, OnceLock};

#[derive(Default)]
struct RuntimeInner {
    config: OnceLock<Config>,
    dispatcher: OnceLock<Arc<Dispatcher>>,
}

/// The entry point: every chain is built from a runtime.
///
/// A runtime owns the [Dispatcher] its chains run on.
/// The dispatcher is created on first use, from the [Config] the runtime was given,
/// or from the default configuration.
/// Clones of a runtime share the dispatcher.
///
/// ```
/// use chainwork::{Chain, Config, Runtime};
/// use chainwork::ui::Inline;
/// use std::sync::mpsc;
///
/// let runtime = Runtime::with_config(Config::default().ui(Inline));
/// let (tx, rx) = mpsc::channel();
/// let handle = runtime
///     .task_with(String::from("chain"), |s| Ok(s.to_uppercase()))
///     .on_success(move |s| tx.send(s).unwrap())
///     .start();
///
/// assert_eq!("CHAIN", rx.recv().unwrap());
/// handle.wait();
/// ```
#[derive(Clone, Default)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Create a runtime with the default configuration.
    ///
    /// The configuration can still be replaced with [Runtime::configure], until the runtime is first used.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a runtime with the given configuration.
    pub fn with_config(config: Config) -> Self {
        let runtime = Self::default();
        // A fresh runtime has no configuration yet.
        let _ = runtime.inner.config.set(config);
        runtime
    }

    /// Set the configuration.
    ///
    /// Fails with [Error::AlreadyConfigured] if the runtime was configured before,
    /// or if it was already used with the default configuration.
    pub fn configure(&self, config: Config) -> Result<()> {
        self.inner
            .config
            .set(config)
            .map_err(|_| Error::AlreadyConfigured)
    }

    /// The dispatcher of this runtime.
    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.inner
            .dispatcher
            .get_or_init(|| {
                let config = self.inner.config.get_or_init(Config::default);
                Arc::new(Dispatcher::from_config(config))
            })
            .clone()
    }

    /// Start building a chain from a computation.
    pub fn task<T, F>(&self, f: F) -> Pipeline<Source<F>>
    where
        F: 'static + Send + Sync + Fn() -> std::result::Result<T, BoxError>,
        T: 'static + Send,
    {
        Pipeline::new(self.dispatcher(), Source::new(f))
    }

    /// Start building a chain from a computation, that receives a clone of `arg` each time it runs.
    pub fn task_with<A, T, F>(
        &self,
        arg: A,
        f: F,
    ) -> Pipeline<Source<impl 'static + Send + Sync + Fn() -> std::result::Result<T, BoxError>>>
    where
        A: 'static + Send + Sync + Clone,
        F: 'static + Send + Sync + Fn(A) -> std::result::Result<T, BoxError>,
        T: 'static + Send,
    {
        self.task(move || f(arg.clone()))
    }

    /// Start building a chain from an [Action].
    pub fn task_from<A>(
        &self,
        action: A,
    ) -> Pipeline<Source<impl 'static + Send + Sync + Fn() -> std::result::Result<A::Output, BoxError>>>
    where
        A: Action,
    {
        self.task(move || action.perform())
    }

    /// Run two computations side by side.
    pub fn merge2<T1, T2, F1, F2>(&self, first: F1, second: F2) -> Merger2<F1, F2>
    where
        F1: 'static + Send + Sync + Fn() -> std::result::Result<T1, BoxError>,
        F2: 'static + Send + Sync + Fn() -> std::result::Result<T2, BoxError>,
    {
        Merger2::new(self.dispatcher(), first, second)
    }

    /// Run three computations side by side.
    pub fn merge3<T1, T2, T3, F1, F2, F3>(
        &self,
        first: F1,
        second: F2,
        third: F3,
    ) -> Merger3<F1, F2, F3>
    where
        F1: 'static + Send + Sync + Fn() -> std::result::Result<T1, BoxError>,
        F2: 'static + Send + Sync + Fn() -> std::result::Result<T2, BoxError>,
        F3: 'static + Send + Sync + Fn() -> std::result::Result<T3, BoxError>,
    {
        Merger3::new(self.dispatcher(), first, second, third)
    }

    /// Run four computations side by side.
    pub fn merge4<T1, T2, T3, T4, F1, F2, F3, F4>(
        &self,
        first: F1,
        second: F2,
        third: F3,
        fourth: F4,
    ) -> Merger4<F1, F2, F3, F4>
    where
        F1: 'static + Send + Sync + Fn() -> std::result::Result<T1, BoxError>,
        F2: 'static + Send + Sync + Fn() -> std::result::Result<T2, BoxError>,
        F3: 'static + Send + Sync + Fn() -> std::result::Result<T3, BoxError>,
        F4: 'static + Send + Sync + Fn() -> std::result::Result<T4, BoxError>,
    {
        Merger4::new(self.dispatcher(), first, second, third, fourth)
    }

    /// Run any number of computations side by side, and collect their values in order.
    pub fn merge_all<T, F>(&self, actions: Vec<F>) -> Pipeline<MergeAll<F>>
    where
        F: 'static + Send + Sync + Fn() -> std::result::Result<T, BoxError>,
        T: 'static + Send,
    {
        Pipeline::new(self.dispatcher(), MergeAll::new(actions))
    }

    /// Start building a coalescing consumer chain.
    ///
    /// Only the newest produced item is guaranteed to complete; see [Producer](crate::Producer).
    pub fn consume_by<T, R, F>(&self, f: F) -> ConsumerPipeline<T, Consumer<F>>
    where
        F: 'static + Send + Sync + Fn(T) -> std::result::Result<R, BoxError>,
        T: 'static + Send,
        R: 'static + Send,
    {
        ConsumerPipeline::new(self.dispatcher(), Consumer::new(f))
    }

    /// Start building a consumer chain with one lane per background thread.
    ///
    /// Every produced item is consumed exactly once.
    pub fn consume_by_pool<T, R, F>(&self, f: F) -> PoolPipeline<T, Consumer<F>>
    where
        F: 'static + Send + Sync + Fn(T) -> std::result::Result<R, BoxError>,
        T: 'static + Send,
        R: 'static + Send,
    {
        let lanes = self.dispatcher().workers();
        self.consume_by(f).into_pool(lanes)
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.inner.config.get())
            .field("dispatcher", &self.inner.dispatcher.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::Runtime;
    use crate::config::Config;
    use crate::errors::Error;
    use crate::ui::Inline;
    use std::sync::Arc;
    use threadpool::ThreadPool;

    #[test]
    fn configure_once() {
        let runtime = Runtime::new();
        assert!(runtime.configure(Config::default().workers(2)).is_ok());
        assert!(matches!(
            runtime.configure(Config::default()),
            Err(Error::AlreadyConfigured)
        ));
        assert_eq!(2, runtime.dispatcher().workers());
    }

    #[test]
    fn configure_after_use_fails() {
        let runtime = Runtime::new();
        let _ = runtime.task(|| Ok(()));
        assert!(matches!(
            runtime.configure(Config::default().workers(2)),
            Err(Error::AlreadyConfigured)
        ));
    }

    #[test]
    fn with_config_is_final() {
        let runtime = Runtime::with_config(Config::default().ui(Inline));
        assert!(runtime.configure(Config::default()).is_err());
    }

    #[test]
    fn clones_share_dispatcher() {
        let runtime = Runtime::with_config(
            Config::default()
                .executor(ThreadPool::new(3))
                .ui(Inline),
        );
        let other = runtime.clone();
        assert!(Arc::ptr_eq(&runtime.dispatcher(), &other.dispatcher()));
        assert_eq!(3, other.dispatcher().workers());
    }

    #[test]
    fn pool_has_a_lane_per_worker() {
        let runtime = Runtime::with_config(Config::default().workers(3).ui(Inline));
        assert_eq!(3, runtime.consume_by_pool(|i: i32| Ok(i)).lanes());
    }
}
