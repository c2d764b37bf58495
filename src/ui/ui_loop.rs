use crate::ui::{Job, UiExecutor};
use mio::{Registry, Token, Waker};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use tracing::debug;

/// A UI event queue, driven by the host.
///
/// Jobs posted through a [UiHandle] are queued, and run when the host calls [UiLoop::run_one],
/// [UiLoop::run_pending] or [UiLoop::run].
/// The thread that drives the loop is the UI thread.
///
/// ```
/// use chainwork::ui::{UiExecutor, UiLoop};
///
/// let ui = UiLoop::new();
/// let handle = ui.handle();
/// handle.post(Box::new(|| println!("runs on the ui thread"))).ok();
///
/// assert_eq!(1, ui.run_pending());
/// ```
pub struct UiLoop {
    shared: Arc<Shared>,
}

/// Handle that posts jobs to a [UiLoop].
///
/// The handle can be moved across threads.
pub struct UiHandle {
    shared: Arc<Shared>,
}

/// Internal queue object.
struct Queue {
    /// Track if the loop is still around.
    has_loop: bool,
    /// Track how many handles the loop has.
    cnt_handles: usize,
    /// The thread that most recently drove the loop.
    driver: Option<thread::ThreadId>,
    /// Queue of jobs.
    jobs: VecDeque<Job>,
}

struct Shared {
    queue: Mutex<Queue>,
    available: Condvar,
    /// Waker to wake up the host event loop.
    waker: Option<Waker>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().expect("mutex should lock just fine")
    }

    fn wake(&self) -> io::Result<()> {
        match &self.waker {
            Some(waker) => waker.wake(),
            None => Ok(()),
        }
    }
}

impl Default for UiLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl UiLoop {
    /// Create a new loop, without event loop integration.
    pub fn new() -> Self {
        Self::with_optional_waker(None)
    }

    /// Create a new loop, that wakes `registry` with `token` whenever a job is posted.
    ///
    /// This allows a [mio::Poll] based host to drive the loop when it wakes up.
    pub fn with_waker(registry: &Registry, token: Token) -> Result<Self, io::Error> {
        Ok(Self::with_optional_waker(Some(Waker::new(registry, token)?)))
    }

    fn with_optional_waker(waker: Option<Waker>) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(Queue {
                    has_loop: true,
                    cnt_handles: 0,
                    driver: None,
                    jobs: VecDeque::new(),
                }),
                available: Condvar::new(),
                waker,
            }),
        }
    }

    /// Create a handle that posts jobs to this loop.
    pub fn handle(&self) -> UiHandle {
        self.shared.lock().cnt_handles += 1;
        UiHandle {
            shared: self.shared.clone(),
        }
    }

    /// Progress the loop.
    ///
    /// Runs at most one job.
    /// If `block` is `true`, then the call will block until a job becomes available,
    /// or the last [UiHandle] has gone away.
    ///
    /// Returns `true` if a job was run, `false` otherwise.
    pub fn run_one(&self, block: bool) -> bool {
        let mut queue = self.shared.lock();
        queue.driver = Some(thread::current().id());
        loop {
            if let Some(job) = queue.jobs.pop_front() {
                drop(queue);
                job();
                return true;
            }
            if !block || queue.cnt_handles == 0 {
                return false;
            }
            queue = self
                .shared
                .available
                .wait(queue)
                .expect("mutex should lock just fine");
        }
    }

    /// Run every queued job, including jobs posted while doing so.
    ///
    /// Returns the number of jobs that ran.
    pub fn run_pending(&self) -> usize {
        let mut count = 0;
        while self.run_one(false) {
            count += 1;
        }
        count
    }

    /// Run the loop.
    ///
    /// Returns only once all jobs have been executed, and no more can be added.
    /// Note that if the calling thread holds a [UiHandle] of this loop, this function will never terminate.
    pub fn run(&self) {
        while self.run_one(true) {}
    }
}

impl Drop for UiLoop {
    fn drop(&mut self) {
        let abandoned = {
            let mut queue = self.shared.lock();
            queue.has_loop = false;
            std::mem::take(&mut queue.jobs)
        };
        if !abandoned.is_empty() {
            debug!(count = abandoned.len(), "ui loop dropped with queued jobs");
        }
    }
}

impl UiExecutor for UiHandle {
    fn post(&self, job: Job) -> Result<(), Job> {
        if self.shared.wake().is_err() {
            return Err(job);
        }

        let mut queue = self.shared.lock();
        if !queue.has_loop {
            return Err(job);
        }
        queue.jobs.push_back(job);
        drop(queue);
        self.shared.available.notify_one();
        Ok(())
    }

    fn is_current(&self) -> bool {
        self.shared.lock().driver == Some(thread::current().id())
    }
}

impl Clone for UiHandle {
    fn clone(&self) -> Self {
        self.shared.lock().cnt_handles += 1;
        UiHandle {
            shared: self.shared.clone(),
        }
    }
}

impl Drop for UiHandle {
    fn drop(&mut self) {
        let last = {
            let mut queue = self.shared.lock();
            assert!(queue.cnt_handles > 0);
            queue.cnt_handles -= 1;
            queue.cnt_handles == 0
        };
        if last {
            self.shared.available.notify_all();
            // We can't process the error.
            let _ = self.shared.wake();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::UiLoop;
    use crate::ui::UiExecutor;
    use mio::{Events, Poll, Token};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    const WAKEUP_TOKEN: Token = Token(0);

    fn received_wakup_token(poll: &mut Poll) -> bool {
        let mut events = Events::with_capacity(10);

        poll.poll(&mut events, Some(Duration::from_secs(0)))
            .unwrap();
        for event in &events {
            if event.token() == WAKEUP_TOKEN {
                return true;
            }
        }
        false
    }

    fn counting_job(counter: &Arc<AtomicUsize>) -> Box<dyn FnOnce() + Send> {
        let counter = counter.clone();
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn it_works() {
        let mut poll = Poll::new().unwrap();
        let ui = UiLoop::with_waker(poll.registry(), WAKEUP_TOKEN).unwrap();
        let handle = ui.handle();
        let counter = Arc::new(AtomicUsize::new(0));

        assert!(handle.post(counting_job(&counter)).is_ok());
        assert!(received_wakup_token(&mut poll));
        assert_eq!(0, counter.load(Ordering::SeqCst), "jobs wait for the host");

        assert_eq!(1, ui.run_pending());
        assert_eq!(1, counter.load(Ordering::SeqCst));
    }

    #[test]
    fn empty_loop_runs_nothing() {
        let mut poll = Poll::new().unwrap();
        let ui = UiLoop::with_waker(poll.registry(), WAKEUP_TOKEN).unwrap();
        let handle = ui.handle();

        assert!(!ui.run_one(false));
        // We expect no wakeup event to be set.
        assert!(!received_wakup_token(&mut poll));

        drop(handle);
    }

    #[test]
    fn blocking_run_returns_once_handles_are_gone() {
        let ui = UiLoop::new();
        let handle = ui.handle();
        let counter = Arc::new(AtomicUsize::new(0));

        let poster = {
            let counter = counter.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                assert!(handle.post(counting_job(&counter)).is_ok());
                assert!(handle.post(counting_job(&counter)).is_ok());
            })
        };

        ui.run();
        poster.join().unwrap();
        assert_eq!(2, counter.load(Ordering::SeqCst));
    }

    #[test]
    fn handle_reports_driving_thread() {
        let ui = UiLoop::new();
        let handle = ui.handle();
        let observed = Arc::new(AtomicUsize::new(0));

        let job_handle = handle.clone();
        let job_observed = observed.clone();
        assert!(handle
            .post(Box::new(move || {
                if job_handle.is_current() {
                    job_observed.fetch_add(1, Ordering::SeqCst);
                }
            }))
            .is_ok());

        assert!(ui.run_one(true));
        assert_eq!(1, observed.load(Ordering::SeqCst));
        assert!(thread::spawn(move || !handle.is_current()).join().unwrap());
    }

    #[test]
    fn dropped_loop_rejects_jobs() {
        let ui = UiLoop::new();
        let handle = ui.handle();
        drop(ui);

        let counter = Arc::new(AtomicUsize::new(0));
        assert!(handle.post(counting_job(&counter)).is_err());
    }
}
