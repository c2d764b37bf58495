use crate::chain::{Chain, Out};
use crate::dispatcher::Dispatcher;
use crate::handle::{CompleteOnDrop, HandleState, WorkHandle};
use crate::scope::Scope;
use crate::terminal::{execute, Settings};
use crate::work::Work;
use std::sync::Arc;
use tracing::debug;

/// Builder of a one-shot chain.
///
/// Starting it runs the chain once on the background pool, and returns a [WorkHandle].
pub struct Pipeline<W> {
    dispatcher: Arc<Dispatcher>,
    work: W,
}

impl<W> Pipeline<W> {
    pub(crate) fn new(dispatcher: Arc<Dispatcher>, work: W) -> Self {
        Self { dispatcher, work }
    }
}

impl<W> Chain for Pipeline<W>
where
    W: Work<()>,
{
    type Input = ();
    type Tail = W;
    type Rebound<X: Work<()>> = Pipeline<X>;
    type Handle = WorkHandle;

    fn map_work<X, F>(self, f: F) -> Pipeline<X>
    where
        X: Work<()>,
        F: Fn(W) -> X,
    {
        Pipeline {
            dispatcher: self.dispatcher,
            work: f(self.work),
        }
    }

    fn non_cancellable(self) -> Self {
        self.work.link().pin();
        self
    }

    fn launch(self, mut settings: Settings<Out<Self>>) -> WorkHandle {
        let state = HandleState::new();
        let handle = WorkHandle::new(state.clone());
        if let Some(group) = settings.take_group() {
            handle.clone().manage_by(&group);
        }

        let scope = Scope::new(state.source().token(), self.dispatcher.clone());
        let work = self.work;
        debug!(id = handle.id(), "work started");
        self.dispatcher.spawn(move || {
            let _complete = CompleteOnDrop(state);
            execute(&work, (), &scope, &settings);
        });
        handle
    }
}
