//! Long-lived chains, fed by a [Producer].
//!
//! A consumer chain is started once, and then runs for every item handed to its producer.
//! Two policies decide what happens to items that arrive while earlier ones are still running:
//! - A single consumer coalesces: the newest item cancels the one in flight, and starts right away.
//!   Only the newest item is guaranteed to reach the callbacks.
//! - A pool of consumers drains a shared queue: every item runs exactly once, on one of the lanes.
//!   The stages are shared between lanes, so they must be stateless.

use crate::chain::{Chain, Out};
use crate::dispatcher::Dispatcher;
use crate::errors::{Error, Result};
use crate::group::{Managed, WorkGroup};
use crate::handle::Completion;
use crate::scope::Scope;
use crate::stop_token::StopSource;
use crate::terminal::{execute, Settings};
use crate::work::Work;
use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, trace};

/// Runs a started chain for one item.
trait Consume<T>: Send + Sync + 'static {
    fn consume(&self, item: T, scope: &Scope);
}

struct Runner<In, W>
where
    W: Work<In>,
{
    work: W,
    settings: Arc<Settings<W::Output>>,
    _input: PhantomData<fn(In)>,
}

impl<In, W> Runner<In, W>
where
    W: Work<In>,
{
    fn new(work: W, settings: Arc<Settings<W::Output>>) -> Self {
        Self {
            work,
            settings,
            _input: PhantomData,
        }
    }
}

impl<In, W> Consume<In> for Runner<In, W>
where
    W: Work<In>,
    In: 'static,
{
    fn consume(&self, item: In, scope: &Scope) {
        execute(&self.work, item, scope, &self.settings)
    }
}

type Lane<T> = Arc<dyn Consume<T>>;

enum Mailbox<T> {
    /// Not started yet.
    Pending,
    /// Coalescing: only the newest item runs.
    Latest {
        consumer: Lane<T>,
        in_flight: Option<StopSource>,
    },
    /// Each item runs once, on whichever lane is idle.
    Queue {
        items: VecDeque<T>,
        idle: Vec<Lane<T>>,
    },
}

struct ChannelState<T> {
    closed: bool,
    mailbox: Mailbox<T>,
}

pub(crate) struct Channel<T> {
    /// Stopped on close, which cancels every item still running.
    source: StopSource,
    dispatcher: Arc<Dispatcher>,
    state: Mutex<ChannelState<T>>,
    completion: Completion,
}

impl<T> Channel<T>
where
    T: 'static + Send,
{
    fn new(dispatcher: Arc<Dispatcher>) -> Arc<Self> {
        Arc::new(Self {
            source: StopSource::default(),
            dispatcher,
            state: Mutex::new(ChannelState {
                closed: false,
                mailbox: Mailbox::Pending,
            }),
            completion: Completion::default(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ChannelState<T>> {
        self.state.lock().unwrap()
    }

    fn start_latest(&self, consumer: Lane<T>) {
        self.lock().mailbox = Mailbox::Latest {
            consumer,
            in_flight: None,
        };
    }

    fn start_queue(&self, lanes: Vec<Lane<T>>) {
        self.lock().mailbox = Mailbox::Queue {
            items: VecDeque::new(),
            idle: lanes,
        };
    }

    fn is_active(&self) -> bool {
        !self.lock().closed
    }

    fn produce(self: &Arc<Self>, item: T) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }

        match &mut state.mailbox {
            Mailbox::Pending => false,
            Mailbox::Latest {
                consumer,
                in_flight,
            } => {
                let child = StopSource::child(&self.source.token());
                let superseded = mem::replace(in_flight, Some(child.clone()));
                let consumer = consumer.clone();
                drop(state);

                if let Some(superseded) = superseded {
                    if superseded.request_stop() {
                        trace!("superseded in-flight item");
                    }
                }
                let scope = Scope::new(child.token(), self.dispatcher.clone());
                self.dispatcher
                    .spawn(move || consumer.consume(item, &scope));
                true
            }
            Mailbox::Queue { items, idle } => {
                items.push_back(item);
                let lane = idle.pop();
                drop(state);

                if let Some(lane) = lane {
                    let channel = self.clone();
                    self.dispatcher.spawn(move || channel.drain(lane));
                }
                true
            }
        }
    }

    /// Run queued items on `lane`, until the queue is empty.
    fn drain(&self, lane: Lane<T>) {
        let scope = Scope::new(self.source.token(), self.dispatcher.clone());
        loop {
            let item = {
                let mut state = self.lock();
                if state.closed {
                    return;
                }
                match &mut state.mailbox {
                    Mailbox::Queue { items, idle } => match items.pop_front() {
                        Some(item) => item,
                        None => {
                            idle.push(lane);
                            return;
                        }
                    },
                    _ => return,
                }
            };
            // The lane outlives a panicking item, and goes on with the queue.
            if panic::catch_unwind(AssertUnwindSafe(|| lane.consume(item, &scope))).is_err() {
                error!("pooled consumer panicked, item dropped");
            }
        }
    }

    /// Close the channel. Returns `true` if this call closed it.
    fn close(&self) -> bool {
        let dropped = {
            let mut state = self.lock();
            if state.closed {
                return false;
            }
            state.closed = true;
            mem::replace(&mut state.mailbox, Mailbox::Pending)
        };

        self.source.request_stop();
        if let Mailbox::Queue { items, .. } = &dropped {
            if !items.is_empty() {
                debug!(dropped = items.len(), "producer closed with queued items");
            }
        }
        drop(dropped);
        self.completion.complete();
        debug!("producer closed");
        true
    }
}

/// Feeds items to a started consumer chain.
///
/// The producer is cheap to clone; all clones feed the same chain.
///
/// ```
/// use chainwork::{Chain, Config, Runtime};
/// use chainwork::ui::Inline;
/// use std::sync::mpsc;
///
/// let runtime = Runtime::with_config(Config::default().ui(Inline));
/// let (tx, rx) = mpsc::channel();
/// let producer = runtime
///     .consume_by_pool(|i: u32| Ok(i * i))
///     .on_success(move |square| tx.send(square).unwrap())
///     .start()
///     .expect("lanes share one channel");
///
/// for i in 1..=3 {
///     assert!(producer.produce(i));
/// }
/// let mut squares: Vec<u32> = rx.iter().take(3).collect();
/// squares.sort();
/// assert_eq!(vec![1, 4, 9], squares);
///
/// producer.close();
/// assert!(!producer.produce(4));
/// ```
pub struct Producer<T>
where
    T: 'static + Send,
{
    channel: Arc<Channel<T>>,
}

impl<T> Producer<T>
where
    T: 'static + Send,
{
    fn new(channel: Arc<Channel<T>>) -> Self {
        Self { channel }
    }

    /// Hand an item to the consumers.
    ///
    /// Never blocks. Returns `false` if the producer is closed.
    pub fn produce(&self, item: T) -> bool {
        self.channel.produce(item)
    }

    /// Close the producer. Items still running are cancelled, queued items are dropped.
    pub fn close(&self) {
        self.channel.close();
    }

    /// Indicate if the producer still accepts items.
    pub fn is_active(&self) -> bool {
        self.channel.is_active()
    }

    /// Register the producer with a [WorkGroup], which closes it on [WorkGroup::cancel_all_works].
    pub fn manage_by(self, group: &WorkGroup) -> Self {
        group.manage(Arc::new(self.clone()));
        self
    }
}

impl<T> Clone for Producer<T>
where
    T: 'static + Send,
{
    fn clone(&self) -> Self {
        Self {
            channel: self.channel.clone(),
        }
    }
}

impl<T> Managed for Producer<T>
where
    T: 'static + Send,
{
    fn cancel(&self) -> bool {
        self.channel.close()
    }

    fn is_active(&self) -> bool {
        Producer::is_active(self)
    }

    fn on_complete(&self, f: Box<dyn FnOnce() + Send>) {
        self.channel.completion.on_complete(f)
    }
}

impl<T> fmt::Debug for Producer<T>
where
    T: 'static + Send,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Builder of a single consumer chain, that coalesces items.
pub struct ConsumerPipeline<T, W>
where
    T: 'static + Send,
{
    channel: Arc<Channel<T>>,
    work: W,
}

impl<T, W> ConsumerPipeline<T, W>
where
    T: 'static + Send,
    W: Work<T>,
{
    pub(crate) fn new(dispatcher: Arc<Dispatcher>, work: W) -> Self {
        Self {
            channel: Channel::new(dispatcher),
            work,
        }
    }

    /// Consume with `lanes` parallel copies of this chain, each item exactly once.
    pub fn into_pool(self, lanes: usize) -> PoolPipeline<T, W> {
        let lanes = (0..lanes.max(1))
            .map(|_| PoolLane {
                channel: self.channel.clone(),
                work: self.work.clone(),
            })
            .collect();
        PoolPipeline { lanes }
    }
}

impl<T, W> Chain for ConsumerPipeline<T, W>
where
    T: 'static + Send,
    W: Work<T>,
{
    type Input = T;
    type Tail = W;
    type Rebound<X: Work<T>> = ConsumerPipeline<T, X>;
    type Handle = Producer<T>;

    fn map_work<X, F>(self, f: F) -> ConsumerPipeline<T, X>
    where
        X: Work<T>,
        F: Fn(W) -> X,
    {
        ConsumerPipeline {
            channel: self.channel,
            work: f(self.work),
        }
    }

    fn non_cancellable(self) -> Self {
        self.work.link().pin();
        self
    }

    fn launch(self, mut settings: Settings<Out<Self>>) -> Producer<T> {
        let producer = Producer::new(self.channel.clone());
        // The lanes must not keep the group alive: the group holds the producer.
        if let Some(group) = settings.take_group() {
            producer.clone().manage_by(&group);
        }

        self.channel
            .start_latest(Arc::new(Runner::new(self.work, Arc::new(settings))));
        debug!("consumer started");
        producer
    }
}

struct PoolLane<T, W>
where
    T: 'static + Send,
{
    channel: Arc<Channel<T>>,
    work: W,
}

/// Builder of a pool of consumer chains, that consume each item exactly once.
///
/// All lanes must feed from one producer; starting a pool assembled from different
/// consumers fails with [Error::ProducerConflict].
pub struct PoolPipeline<T, W>
where
    T: 'static + Send,
{
    lanes: Vec<PoolLane<T, W>>,
}

impl<T, W> PoolPipeline<T, W>
where
    T: 'static + Send,
    W: Work<T>,
{
    /// Add the lane of another consumer.
    pub fn with_lane(mut self, other: ConsumerPipeline<T, W>) -> Self {
        self.lanes.push(PoolLane {
            channel: other.channel,
            work: other.work,
        });
        self
    }

    /// Number of lanes.
    pub fn lanes(&self) -> usize {
        self.lanes.len()
    }
}

impl<T, W> Chain for PoolPipeline<T, W>
where
    T: 'static + Send,
    W: Work<T>,
{
    type Input = T;
    type Tail = W;
    type Rebound<X: Work<T>> = PoolPipeline<T, X>;
    type Handle = Result<Producer<T>>;

    fn map_work<X, F>(self, f: F) -> PoolPipeline<T, X>
    where
        X: Work<T>,
        F: Fn(W) -> X,
    {
        PoolPipeline {
            lanes: self
                .lanes
                .into_iter()
                .map(|lane| PoolLane {
                    channel: lane.channel,
                    work: f(lane.work),
                })
                .collect(),
        }
    }

    fn non_cancellable(self) -> Self {
        for lane in &self.lanes {
            lane.work.link().pin();
        }
        self
    }

    fn launch(self, mut settings: Settings<Out<Self>>) -> Result<Producer<T>> {
        let channel = match self.lanes.first() {
            Some(lane) => lane.channel.clone(),
            None => return Err(Error::ProducerConflict),
        };
        let producer = Producer::new(channel.clone());
        if self
            .lanes
            .iter()
            .any(|lane| !Arc::ptr_eq(&lane.channel, &channel))
        {
            producer.close();
            error!(lanes = self.lanes.len(), "{}", Error::ProducerConflict);
            return Err(Error::ProducerConflict);
        }

        if let Some(group) = settings.take_group() {
            producer.clone().manage_by(&group);
        }
        let settings = Arc::new(settings);
        let lanes: Vec<Lane<T>> = self
            .lanes
            .into_iter()
            .map(|lane| Arc::new(Runner::new(lane.work, settings.clone())) as Lane<T>)
            .collect();
        debug!(lanes = lanes.len(), "consumer pool started");
        channel.start_queue(lanes);
        Ok(producer)
    }
}
