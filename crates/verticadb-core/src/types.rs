use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// ObjectKey uniquely identifies a namespaced object
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    /// Namespace of the object
    pub namespace: String,
    /// Object name
    pub name: String,
}

impl ObjectKey {
    /// Create a new ObjectKey
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Result of one reconcile step.
///
/// `Continue` lets the actor chain move on. `Stop` ends the chain cleanly
/// for this pass. The requeue variants end the chain and ask for another
/// pass later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Outcome {
    #[default]
    Continue,
    Stop,
    Requeue,
    RequeueAfter(Duration),
}

impl Outcome {
    /// True when the remaining actors in a chain must not run
    pub fn aborts_chain(&self) -> bool {
        !matches!(self, Outcome::Continue)
    }

    /// True when another pass is requested
    pub fn is_requeue(&self) -> bool {
        matches!(self, Outcome::Requeue | Outcome::RequeueAfter(_))
    }

    /// Combine two outcomes, keeping the one that asks for the soonest retry
    pub fn merge(self, other: Outcome) -> Outcome {
        match (self, other) {
            (Outcome::Requeue, _) | (_, Outcome::Requeue) => Outcome::Requeue,
            (Outcome::RequeueAfter(a), Outcome::RequeueAfter(b)) => {
                Outcome::RequeueAfter(a.min(b))
            }
            (r @ Outcome::RequeueAfter(_), _) | (_, r @ Outcome::RequeueAfter(_)) => r,
            (Outcome::Stop, _) | (_, Outcome::Stop) => Outcome::Stop,
            _ => Outcome::Continue,
        }
    }
}
