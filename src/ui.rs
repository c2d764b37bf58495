//! Executors for the UI-affinity context.
//!
//! Callbacks, and stages declared with [ExecutionContext::Ui](crate::ExecutionContext::Ui),
//! are posted to a [UiExecutor].
//! The UI executor is supplied by the host; this module offers three ready-made ones:
//! - [UiThread] spawns a dedicated thread that runs posted jobs in order. This is the default.
//! - [UiLoop] queues posted jobs, until the host drives them with [UiLoop::run_one] or [UiLoop::run_pending].
//!   It can wake a [mio] event loop when a job is posted.
//! - [Inline] runs posted jobs immediately, on the posting thread.

mod ui_loop;
mod ui_thread;

pub use ui_loop::{UiHandle, UiLoop};
pub use ui_thread::UiThread;

/// A job posted to a [UiExecutor].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// An execution resource with UI affinity.
///
/// Jobs posted to the executor must run in posting order, on a single thread.
pub trait UiExecutor: Send + Sync + 'static {
    /// Post a job.
    ///
    /// If the executor no longer accepts jobs, the job is handed back as an error.
    fn post(&self, job: Job) -> Result<(), Job>;

    /// Indicate if the calling thread is the thread the executor runs jobs on.
    ///
    /// When this returns `true`, work destined for this executor runs in place.
    fn is_current(&self) -> bool {
        false
    }
}

/// This executor runs every job immediately, on the thread that posts it.
///
/// Useful for headless hosts, that have no UI thread of their own.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Inline;

impl UiExecutor for Inline {
    fn post(&self, job: Job) -> Result<(), Job> {
        job();
        Ok(())
    }

    fn is_current(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::{Inline, UiExecutor};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn inline_runs_in_place() {
        let counter = Arc::new(AtomicUsize::new(0));
        let job_counter = counter.clone();
        Inline
            .post(Box::new(move || {
                job_counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap_or_else(|_| panic!("inline executor accepts jobs"));

        assert_eq!(1, counter.load(Ordering::SeqCst));
        assert!(Inline.is_current());
    }
}
