use crate::ui::UiExecutor;
use std::fmt;
use std::sync::Arc;
use threadpool::ThreadPool;

/// Configuration of a [Runtime](crate::Runtime).
///
/// Every setting is optional; unset settings fall back to:
/// - a fresh background pool, sized by [worker_count_for](crate::worker_count_for),
///   with threads named `chainwork-background`
/// - a dedicated [UiThread](crate::ui::UiThread) for the UI context
///
/// ```
/// use chainwork::{Config, Runtime};
/// use chainwork::ui::Inline;
///
/// let runtime = Runtime::with_config(Config::default().workers(2).ui(Inline));
/// assert_eq!(2, runtime.dispatcher().workers());
/// ```
#[derive(Clone)]
pub struct Config {
    executor: Option<ThreadPool>,
    workers: Option<usize>,
    thread_name: String,
    ui: Option<Arc<dyn UiExecutor>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            executor: None,
            workers: None,
            thread_name: String::from("chainwork-background"),
            ui: None,
        }
    }
}

impl Config {
    /// Use an existing pool for background work.
    ///
    /// Overrides [Config::workers] and [Config::thread_name].
    pub fn executor(mut self, pool: ThreadPool) -> Self {
        self.executor = Some(pool);
        self
    }

    /// Number of background threads. Values below 1 are raised to 1.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers.max(1));
        self
    }

    /// Name of the background threads.
    pub fn thread_name<S>(mut self, name: S) -> Self
    where
        S: Into<String>,
    {
        self.thread_name = name.into();
        self
    }

    /// Executor for the UI context, and for delivering callbacks.
    pub fn ui<U>(mut self, ui: U) -> Self
    where
        U: UiExecutor,
    {
        self.ui = Some(Arc::new(ui));
        self
    }

    pub(crate) fn executor_ref(&self) -> Option<&ThreadPool> {
        self.executor.as_ref()
    }

    pub(crate) fn worker_count(&self) -> Option<usize> {
        self.workers
    }

    pub(crate) fn name(&self) -> &str {
        &self.thread_name
    }

    pub(crate) fn ui_executor(&self) -> Option<&Arc<dyn UiExecutor>> {
        self.ui.as_ref()
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("executor", &self.executor.as_ref().map(ThreadPool::max_count))
            .field("workers", &self.workers)
            .field("thread_name", &self.thread_name)
            .field("custom_ui", &self.ui.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::Config;
    use threadpool::ThreadPool;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert!(config.executor_ref().is_none());
        assert_eq!(None, config.worker_count());
        assert_eq!("chainwork-background", config.name());
        assert!(config.ui_executor().is_none());
    }

    #[test]
    fn at_least_one_worker() {
        assert_eq!(Some(1), Config::default().workers(0).worker_count());
    }

    #[test]
    fn explicit_executor_is_kept() {
        let config = Config::default().executor(ThreadPool::new(3));
        assert_eq!(Some(3), config.executor_ref().map(ThreadPool::max_count));
    }
}
