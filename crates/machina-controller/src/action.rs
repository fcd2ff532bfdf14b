//! Reconcile outcomes

use std::time::Duration;

/// What the scheduler should do after a successful reconcile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Action {
    /// `None` waits for the next change to the resource.
    pub requeue_after: Option<Duration>,
}

impl Action {
    pub fn requeue(after: Duration) -> Self {
        Self {
            requeue_after: Some(after),
        }
    }

    pub fn requeue_now() -> Self {
        Self::requeue(Duration::ZERO)
    }

    pub fn await_change() -> Self {
        Self { requeue_after: None }
    }

    pub fn is_requeue(&self) -> bool {
        self.requeue_after.is_some()
    }
}
