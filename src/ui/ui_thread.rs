use crate::ui::{Job, UiExecutor};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread;
use tracing::{debug, error};

/// A [UiExecutor] backed by a dedicated thread.
///
/// The thread runs posted jobs in order, and exits once the last handle to it is dropped.
/// A panicking job is logged, and the thread goes on with the next job.
pub struct UiThread {
    thread_id: thread::ThreadId,
    sender: mpsc::Sender<Job>,
}

impl UiThread {
    /// Spawn a new UI thread with the given name.
    pub fn spawn(name: &str) -> Result<Self, io::Error> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let join_handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Ok(job) = receiver.recv() {
                    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!("ui job panicked");
                    }
                }
                debug!("ui thread exiting");
            })?;

        Ok(Self {
            thread_id: join_handle.thread().id(),
            sender,
        })
    }

    /// Return the [ThreadId](thread::ThreadId) of the UI thread.
    pub fn thread_id(&self) -> thread::ThreadId {
        self.thread_id
    }
}

impl UiExecutor for UiThread {
    fn post(&self, job: Job) -> Result<(), Job> {
        self.sender.send(job).map_err(|mpsc::SendError(job)| job)
    }

    fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }
}
