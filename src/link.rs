use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Cancellation link, shared by every stage of a chain.
///
/// Each stage sits at a depth along the chain (the root is at depth 0).
/// Pinning a stage marks it and everything upstream of it non-cancellable;
/// the link records only the deepest pin, so pinned-ness is read with a single atomic load.
#[derive(Clone)]
pub struct Link {
    depth: usize,
    pinned: Arc<AtomicUsize>,
}

impl Link {
    /// Link for the first stage of a new chain.
    pub fn root() -> Self {
        Self {
            depth: 0,
            pinned: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Link for a stage appended downstream of this one.
    pub fn next(&self) -> Self {
        Self {
            depth: self.depth + 1,
            pinned: self.pinned.clone(),
        }
    }

    /// Mark this stage, and every upstream stage, non-cancellable.
    pub fn pin(&self) {
        self.pinned.fetch_max(self.depth + 1, Ordering::AcqRel);
    }

    /// Indicate if this stage still honors cancellation.
    pub fn is_cancellable(&self) -> bool {
        self.depth >= self.pinned.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("depth", &self.depth)
            .field("cancellable", &self.is_cancellable())
            .finish()
    }
}
