use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::debug;

/// Something a [WorkGroup] can keep track of.
pub(crate) trait Managed: Send + Sync + 'static {
    /// Cancel the member. Returns `true` if the member transitioned to cancelled.
    fn cancel(&self) -> bool;
    /// Indicate if the member is still doing work.
    fn is_active(&self) -> bool;
    /// Run `f` once the member completes.
    fn on_complete(&self, f: Box<dyn FnOnce() + Send>);
}

#[derive(Default)]
struct Members {
    next_id: u64,
    registered: HashMap<u64, Arc<dyn Managed>>,
}

#[derive(Default)]
struct GroupInner {
    members: Mutex<Members>,
}

impl GroupInner {
    fn lock(&self) -> MutexGuard<'_, Members> {
        self.members.lock().unwrap()
    }
}

/// A self-pruning collection of started work.
///
/// [WorkHandles](crate::WorkHandle) and [Producers](crate::Producer) are registered with
/// `manage_by`, and removed again once they complete.
/// The group can then cancel everything that is still running at once.
///
/// ```
/// use chainwork::{Chain, Runtime, WorkGroup};
/// use std::time::Duration;
///
/// let runtime = Runtime::new();
/// let group = WorkGroup::new();
/// for i in 0..3 {
///     runtime
///         .task(move || Ok(i))
///         .start_delay(Duration::from_secs(60))
///         .manage_by(&group)
///         .start();
/// }
///
/// assert!(group.has_active_works());
/// assert_eq!(3, group.cancel_all_works());
/// assert!(!group.has_active_works());
/// ```
#[derive(Clone, Default)]
pub struct WorkGroup {
    inner: Arc<GroupInner>,
}

impl WorkGroup {
    /// Create a new, empty group.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn manage(&self, member: Arc<dyn Managed>) {
        let id = {
            let mut members = self.inner.lock();
            let id = members.next_id;
            members.next_id += 1;
            members.registered.insert(id, member.clone());
            id
        };

        // Registered after insertion: a member that already completed removes itself right away.
        let group: Weak<GroupInner> = Arc::downgrade(&self.inner);
        member.on_complete(Box::new(move || {
            if let Some(group) = group.upgrade() {
                let removed = group.lock().registered.remove(&id);
                drop(removed);
            }
        }));
    }

    /// Cancel every registered member.
    ///
    /// Returns the number of members that transitioned to cancelled.
    /// Members that already completed are unaffected.
    pub fn cancel_all_works(&self) -> usize {
        let snapshot: Vec<Arc<dyn Managed>> =
            self.inner.lock().registered.values().cloned().collect();

        let cancelled = snapshot.iter().filter(|member| member.cancel()).count();
        debug!(members = snapshot.len(), cancelled, "cancelled work group");
        cancelled
    }

    /// Indicate if any registered member is still active.
    pub fn has_active_works(&self) -> bool {
        let snapshot: Vec<Arc<dyn Managed>> =
            self.inner.lock().registered.values().cloned().collect();
        snapshot.iter().any(|member| member.is_active())
    }

    /// Number of registered members, that have not completed yet.
    pub fn len(&self) -> usize {
        self.inner.lock().registered.len()
    }

    /// Indicate if the group has no uncompleted members.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for WorkGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkGroup")
            .field("members", &self.len())
            .finish()
    }
}
