use crate::config::Config;
use crate::errors::{Error, Result};
use crate::ui::{Inline, Job, UiExecutor, UiThread};
use std::fmt;
use std::sync::{mpsc, Arc};
use std::thread;
use threadpool::ThreadPool;
use tracing::{info, warn};

/// Logical execution context of a stage.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum ExecutionContext {
    /// Run on the shared background pool.
    #[default]
    Background,
    /// Run on the UI executor.
    Ui,
    /// Run on the background pool, ignoring cancellation for this stage and every stage before it.
    NonCancellable,
}

/// Size of the background pool, for a host with `available` hardware threads.
///
/// Stays one below the hardware concurrency, but never fewer than 2 or more than 6 threads.
pub fn worker_count_for(available: usize) -> usize {
    available.saturating_sub(1).clamp(2, 6)
}

fn default_worker_count() -> usize {
    worker_count_for(thread::available_parallelism().map_or(1, |n| n.get()))
}

/// Maps an [ExecutionContext] to the resource that runs it.
///
/// Owns the background [ThreadPool] and the [UiExecutor].
pub struct Dispatcher {
    pool: ThreadPool,
    ui: Arc<dyn UiExecutor>,
}

impl Dispatcher {
    /// Create a dispatcher from an existing pool and UI executor.
    pub fn new<U>(pool: ThreadPool, ui: U) -> Self
    where
        U: UiExecutor,
    {
        Self {
            pool,
            ui: Arc::new(ui),
        }
    }

    pub(crate) fn from_config(config: &Config) -> Self {
        let pool = match config.executor_ref() {
            Some(pool) => pool.clone(),
            None => {
                let workers = config.worker_count().unwrap_or_else(default_worker_count);
                info!(workers, name = config.name(), "starting background pool");
                threadpool::Builder::new()
                    .num_threads(workers)
                    .thread_name(config.name().to_string())
                    .build()
            }
        };

        let ui: Arc<dyn UiExecutor> = match config.ui_executor() {
            Some(ui) => ui.clone(),
            None => match UiThread::spawn("chainwork-ui") {
                Ok(ui) => Arc::new(ui),
                Err(error) => {
                    warn!(%error, "unable to spawn ui thread, callbacks run inline");
                    Arc::new(Inline)
                }
            },
        };

        Self { pool, ui }
    }

    /// Number of threads in the background pool.
    pub fn workers(&self) -> usize {
        self.pool.max_count()
    }

    /// Run `f` on the background pool.
    pub fn spawn<F>(&self, f: F)
    where
        F: 'static + Send + FnOnce(),
    {
        self.pool.execute(f)
    }

    /// Run `f` in the given context, blocking until it has completed.
    ///
    /// Background contexts run `f` in place: the caller is already on the pool.
    /// The UI context runs `f` in place if the caller is the UI thread, and otherwise posts it
    /// and waits for the result.
    pub fn run_on<R, F>(&self, context: ExecutionContext, f: F) -> Result<R>
    where
        F: 'static + Send + FnOnce() -> R,
        R: 'static + Send,
    {
        match context {
            ExecutionContext::Background | ExecutionContext::NonCancellable => Ok(f()),
            ExecutionContext::Ui if self.ui.is_current() => Ok(f()),
            ExecutionContext::Ui => {
                let (tx, rx) = mpsc::sync_channel(1);
                self.post_ui(Box::new(move || {
                    // The receiver only goes away if the waiting thread does.
                    let _ = tx.send(f());
                }))?;
                rx.recv().map_err(|_| Error::UiUnavailable)
            }
        }
    }

    pub(crate) fn post_ui(&self, job: Job) -> Result<()> {
        self.ui.post(job).map_err(|_| Error::UiUnavailable)
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("workers", &self.workers())
            .finish()
    }
}
