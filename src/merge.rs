//! Run independent computations side by side, and join their values.
//!
//! A merger is built in two phases: the runtime collects the computations in a merger,
//! and [merge](Merger2::merge) supplies the join function, which turns it into a [Pipeline].
//!
//! When a computation fails, the computations that haven't started yet are skipped,
//! the ones already running are left to finish, and the merge fails with the first failure.
//! A panicking computation counts as a failure, with [Error::Panicked].

use crate::dispatcher::Dispatcher;
use crate::errors::{BoxError, Error, Result};
use crate::link::Link;
use crate::pipeline::Pipeline;
use crate::scope::Scope;
use crate::stop_token::StopSource;
use crate::work::Work;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};

type Job<T> = Box<dyn FnOnce() -> Result<T> + Send>;

/// The branches of one merge.
struct Siblings {
    source: StopSource,
    scope: Scope,
    first_error: Mutex<Option<Error>>,
}

impl Siblings {
    fn new(scope: &Scope) -> Arc<Self> {
        let (source, scope) = scope.child();
        Arc::new(Self {
            source,
            scope,
            first_error: Mutex::new(None),
        })
    }

    /// Submit `f` to the background pool.
    fn fork<T, F>(self: &Arc<Self>, f: Arc<F>, cancellable: bool) -> Branch<T>
    where
        F: 'static + Send + Sync + Fn() -> std::result::Result<T, BoxError>,
        T: 'static + Send,
    {
        let siblings = self.clone();
        let job: Job<T> = Box::new(move || {
            siblings.scope.ensure_active(cancellable)?;
            // A panicking branch fails the merge, instead of leaving the joiner waiting.
            let outcome = match panic::catch_unwind(AssertUnwindSafe(|| f())) {
                Ok(outcome) => outcome.map_err(Error::from),
                Err(payload) => Err(Error::from_panic(payload)),
            };
            outcome.map_err(|error| {
                siblings.fail(error);
                Error::Cancelled
            })
        });

        let branch = Branch {
            state: Arc::new(BranchState {
                job: Mutex::new(Some(job)),
                outcome: Mutex::new(None),
                done: Condvar::new(),
            }),
        };
        let state = branch.state.clone();
        self.scope.dispatcher().spawn(move || state.run());
        branch
    }

    /// Record the failure, and stop the other branches.
    fn fail(&self, error: Error) {
        {
            let mut first_error = self.first_error.lock().unwrap();
            if first_error.is_none() {
                *first_error = Some(error);
            }
        }
        self.source.request_stop();
    }

    /// The first failure of any branch.
    fn finish(&self) -> Result<()> {
        match self.first_error.lock().unwrap().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

struct BranchState<T> {
    job: Mutex<Option<Job<T>>>,
    outcome: Mutex<Option<Result<T>>>,
    done: Condvar,
}

impl<T> BranchState<T> {
    /// Run the job, unless another thread already took it.
    fn run(&self) {
        let job = self.job.lock().unwrap().take();
        if let Some(job) = job {
            let outcome = job();
            *self.outcome.lock().unwrap() = Some(outcome);
            self.done.notify_all();
        }
    }
}

/// A forked computation.
struct Branch<T> {
    state: Arc<BranchState<T>>,
}

impl<T> Branch<T> {
    /// Wait for the outcome.
    ///
    /// If no pool thread picked up the job yet, it runs on the joining thread instead,
    /// so a merge never waits on a pool that is busy with the merge itself.
    fn join(self) -> Result<T> {
        self.state.run();

        let mut outcome = self.state.outcome.lock().unwrap();
        loop {
            match outcome.take() {
                Some(outcome) => return outcome,
                None => outcome = self.state.done.wait(outcome).unwrap(),
            }
        }
    }
}

macro_rules! merger {
    ($count:literal, $merger:ident, $merge:ident; $($f:ident: $t:ident => $field:ident),+) => {
        #[doc = concat!("Collects ", $count, " computations. Call [merge](Self::merge) to join their values.")]
        pub struct $merger<$($f),+> {
            dispatcher: Arc<Dispatcher>,
            $($field: Arc<$f>,)+
        }

        impl<$($f),+> $merger<$($f),+> {
            pub(crate) fn new(dispatcher: Arc<Dispatcher>, $($field: $f),+) -> Self {
                Self {
                    dispatcher,
                    $($field: Arc::new($field),)+
                }
            }

            /// Supply the function that joins the values, in argument order.
            pub fn merge<$($t,)+ R, M>(self, merge: M) -> Pipeline<$merge<$($f,)+ M>>
            where
                $(
                    $f: 'static + Send + Sync + Fn() -> std::result::Result<$t, BoxError>,
                    $t: 'static + Send,
                )+
                M: 'static + Send + Sync + Fn($($t),+) -> R,
                R: 'static + Send,
            {
                Pipeline::new(
                    self.dispatcher,
                    $merge {
                        $($field: self.$field,)+
                        merge: Arc::new(merge),
                        link: Link::root(),
                    },
                )
            }
        }

        #[doc = concat!("Root of a chain, that runs ", $count, " computations side by side and joins their values.")]
        pub struct $merge<$($f,)+ M> {
            $($field: Arc<$f>,)+
            merge: Arc<M>,
            link: Link,
        }

        impl<$($f,)+ M> Clone for $merge<$($f,)+ M> {
            fn clone(&self) -> Self {
                Self {
                    $($field: self.$field.clone(),)+
                    merge: self.merge.clone(),
                    link: self.link.clone(),
                }
            }
        }

        impl<$($f, $t,)+ M, R> Work<()> for $merge<$($f,)+ M>
        where
            $(
                $f: 'static + Send + Sync + Fn() -> std::result::Result<$t, BoxError>,
                $t: 'static + Send,
            )+
            M: 'static + Send + Sync + Fn($($t),+) -> R,
            R: 'static + Send,
        {
            type Output = R;

            fn perform(&self, _: (), scope: &Scope) -> Result<R> {
                let cancellable = self.link.is_cancellable();
                scope.ensure_active(cancellable)?;

                let siblings = Siblings::new(scope);
                $(let $field = siblings.fork(self.$field.clone(), cancellable);)+
                $(let $field = $field.join();)+
                siblings.finish()?;
                scope.ensure_active(cancellable)?;

                Ok((self.merge)($($field?),+))
            }

            fn link(&self) -> &Link {
                &self.link
            }
        }
    };
}

merger!("two", Merger2, Merge2; F1: T1 => first, F2: T2 => second);
merger!("three", Merger3, Merge3; F1: T1 => first, F2: T2 => second, F3: T3 => third);
merger!("four", Merger4, Merge4; F1: T1 => first, F2: T2 => second, F3: T3 => third, F4: T4 => fourth);

/// Root of a chain, that runs any number of computations side by side and collects their values.
pub struct MergeAll<F> {
    actions: Arc<[Arc<F>]>,
    link: Link,
}

impl<F> MergeAll<F> {
    pub(crate) fn new<T>(actions: Vec<F>) -> Self
    where
        F: Fn() -> std::result::Result<T, BoxError>,
    {
        Self {
            actions: actions.into_iter().map(Arc::new).collect(),
            link: Link::root(),
        }
    }
}

impl<F> Clone for MergeAll<F> {
    fn clone(&self) -> Self {
        Self {
            actions: self.actions.clone(),
            link: self.link.clone(),
        }
    }
}

impl<T, F> Work<()> for MergeAll<F>
where
    F: 'static + Send + Sync + Fn() -> std::result::Result<T, BoxError>,
    T: 'static + Send,
{
    type Output = Vec<T>;

    fn perform(&self, _: (), scope: &Scope) -> Result<Vec<T>> {
        let cancellable = self.link.is_cancellable();
        scope.ensure_active(cancellable)?;

        let siblings = Siblings::new(scope);
        let branches: Vec<Branch<T>> = self
            .actions
            .iter()
            .map(|action| siblings.fork(action.clone(), cancellable))
            .collect();
        let outcomes: Vec<Result<T>> = branches.into_iter().map(Branch::join).collect();
        siblings.finish()?;
        scope.ensure_active(cancellable)?;

        outcomes.into_iter().collect()
    }

    fn link(&self) -> &Link {
        &self.link
    }
}

#[cfg(test)]
mod tests {
    use super::Siblings;
    use crate::chain::Chain;
    use crate::config::Config;
    use crate::dispatcher::Dispatcher;
    use crate::errors::{discontinue, new_error, Error, ErrorForTesting};
    use crate::runtime::Runtime;
    use crate::scope::Scope;
    use crate::stop_token::StopSource;
    use crate::ui::Inline;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc};
    use std::thread;
    use std::time::Duration;
    use threadpool::ThreadPool;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn runtime(workers: usize) -> Runtime {
        Runtime::with_config(Config::default().workers(workers).ui(Inline))
    }

    #[test]
    fn merge_keeps_argument_order() {
        let (tx, rx) = mpsc::channel();
        runtime(2)
            .merge2(
                || {
                    thread::sleep(Duration::from_millis(300));
                    Ok("a")
                },
                || {
                    thread::sleep(Duration::from_millis(100));
                    Ok(1)
                },
            )
            .merge(|s, i| format!("{}{}", s, i))
            .on_success(move |merged| tx.send(merged).unwrap())
            .start();

        assert_eq!("a1", rx.recv_timeout(TIMEOUT).unwrap());
    }

    #[test]
    fn merge4_on_single_thread_pool() {
        let (tx, rx) = mpsc::channel();
        runtime(1)
            .merge4(|| Ok(1), || Ok(2), || Ok(3), || Ok(4))
            .merge(|a, b, c, d| a * 1000 + b * 100 + c * 10 + d)
            .on_success(move |merged| tx.send(merged).unwrap())
            .start();

        assert_eq!(1234, rx.recv_timeout(TIMEOUT).unwrap());
    }

    #[test]
    fn merge_fails_with_first_error() {
        let (tx, rx) = mpsc::channel();
        runtime(2)
            .merge2(
                || Err::<i32, _>(new_error(ErrorForTesting::from("left broke"))),
                || Ok(2),
            )
            .merge(|a, b| a + b)
            .on_success(|_| panic!("merge should not succeed"))
            .on_error(move |error| tx.send(error.to_string()).unwrap())
            .unwrap()
            .start();

        assert_eq!("left broke", rx.recv_timeout(TIMEOUT).unwrap());
    }

    #[test]
    fn panicking_branch_fails_merge() {
        let (tx, rx) = mpsc::channel();
        let handle = runtime(3)
            .merge2(
                || {
                    thread::sleep(Duration::from_millis(100));
                    Ok(1)
                },
                || -> Result<i32, _> { panic!("branch panics on purpose") },
            )
            .merge(|a, b| a + b)
            .on_error(move |error| tx.send(error.to_string()).unwrap())
            .start();

        assert_eq!(
            "work panicked: branch panics on purpose",
            rx.recv_timeout(TIMEOUT).unwrap()
        );
        assert!(handle.wait_timeout(TIMEOUT));
    }

    #[test]
    fn discontinued_branch_discontinues_merge() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = {
            let on_success = calls.clone();
            let on_error = calls.clone();
            runtime(2)
                .merge2(|| Err::<i32, _>(discontinue()), || Ok(2))
                .merge(|a, b| a + b)
                .on_success(move |_| {
                    on_success.fetch_add(1, Ordering::SeqCst);
                })
                .on_error(move |_| {
                    on_error.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap()
                .start()
        };

        assert!(handle.wait_timeout(TIMEOUT));
        assert_eq!(0, calls.load(Ordering::SeqCst));
    }

    #[test]
    fn non_cancellable_merge_runs_every_branch() {
        let (tx, rx) = mpsc::channel();
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = {
            let calls = calls.clone();
            runtime(1)
                .merge2(
                    || Err::<i32, _>(new_error(ErrorForTesting::from("left broke"))),
                    move || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(2)
                    },
                )
                .merge(|a, b| a + b)
                .non_cancellable()
                .on_error(move |error| tx.send(error.to_string()).unwrap())
                .start()
        };

        assert_eq!("left broke", rx.recv_timeout(TIMEOUT).unwrap());
        assert!(handle.wait_timeout(TIMEOUT));
        assert_eq!(1, calls.load(Ordering::SeqCst));
    }

    #[test]
    fn merge_all_collects_in_order() {
        let (tx, rx) = mpsc::channel();
        let actions: Vec<_> = (0..8_u64)
            .map(|i| {
                move || {
                    thread::sleep(Duration::from_millis(8 - i));
                    Ok(i)
                }
            })
            .collect();
        runtime(3)
            .merge_all(actions)
            .on_success(move |values| tx.send(values).unwrap())
            .start();

        assert_eq!(
            (0..8_u64).collect::<Vec<_>>(),
            rx.recv_timeout(TIMEOUT).unwrap()
        );
    }

    #[test]
    fn failure_skips_unstarted_siblings() {
        let dispatcher = Arc::new(Dispatcher::new(ThreadPool::new(1), Inline));
        // Occupy the only pool thread, so that both branches are left to the joining thread.
        let (release_tx, release_rx) = mpsc::channel::<()>();
        dispatcher.spawn(move || {
            release_rx.recv_timeout(TIMEOUT).ok();
        });

        let source = StopSource::default();
        let scope = Scope::new(source.token(), dispatcher);
        let siblings = Siblings::new(&scope);
        let calls = Arc::new(AtomicUsize::new(0));

        let failing = siblings.fork(
            Arc::new(|| Err::<(), _>(new_error(ErrorForTesting::from("first")))),
            true,
        );
        let skipped = {
            let calls = calls.clone();
            siblings.fork(
                Arc::new(move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
                true,
            )
        };

        assert!(matches!(failing.join(), Err(Error::Cancelled)));
        assert!(matches!(skipped.join(), Err(Error::Cancelled)));
        assert_eq!(0, calls.load(Ordering::SeqCst));
        match siblings.finish() {
            Err(Error::User(error)) => assert_eq!("first", error.to_string()),
            other => panic!("expected the first failure, got {:?}", other),
        }
        // The parent scope is unaffected.
        assert!(scope.is_active());

        release_tx.send(()).unwrap();
    }

    #[test]
    fn non_cancellable_siblings_survive_failure() {
        let dispatcher = Arc::new(Dispatcher::new(ThreadPool::new(1), Inline));
        let (release_tx, release_rx) = mpsc::channel::<()>();
        dispatcher.spawn(move || {
            release_rx.recv_timeout(TIMEOUT).ok();
        });

        let source = StopSource::default();
        let scope = Scope::new(source.token(), dispatcher);
        let siblings = Siblings::new(&scope);
        let calls = Arc::new(AtomicUsize::new(0));

        let failing = siblings.fork(
            Arc::new(|| Err::<(), _>(new_error(ErrorForTesting::from("first")))),
            false,
        );
        let survivor = {
            let calls = calls.clone();
            siblings.fork(
                Arc::new(move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
                false,
            )
        };

        assert!(matches!(failing.join(), Err(Error::Cancelled)));
        assert!(survivor.join().is_ok());
        assert_eq!(1, calls.load(Ordering::SeqCst));
        assert!(siblings.finish().is_err());

        release_tx.send(()).unwrap();
    }
}
