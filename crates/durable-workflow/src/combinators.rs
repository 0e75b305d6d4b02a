//! Concurrency Primitives (spec §4.F): the policies `Context::gather_raw`
//! resolves a batch of children against, and the cooperative cancellation
//! scope a coroutine runs inside.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// How a batch of children resolves into a single outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GatherPolicy {
    /// Wait for every child; the first failure (in submission order) wins.
    All,
    /// Wait for the first success; aggregate failures if none succeed.
    Any,
    /// Resolve with whichever child completes first, success or failure.
    Race,
    /// Same shape as `Race`; kept distinct because the two name different
    /// intents in the public API (race implies "the others are abandoned",
    /// first_completed implies "I only wanted the earliest regardless").
    FirstCompleted,
    /// Wait for at least `n` of the batch to complete.
    NOfM(u32),
}

impl GatherPolicy {
    /// The minimum number of results the engine must gather before this
    /// combinator may resume (spec §4.G step 5).
    pub fn min_results(&self, n: usize) -> u32 {
        match self {
            GatherPolicy::All => n as u32,
            GatherPolicy::Any | GatherPolicy::Race | GatherPolicy::FirstCompleted => {
                if n == 0 {
                    0
                } else {
                    1
                }
            }
            GatherPolicy::NOfM(k) => (*k).min(n as u32),
        }
    }

    pub fn max_results(&self, n: usize) -> u32 {
        n as u32
    }
}

/// A cooperative cancellation scope. Coroutines run inside an implicit root
/// scope (spec §5); it becomes cancelled when the coroutine's deadline
/// elapses, the scheduler signals a poll-level error, or user code cancels a
/// child scope explicitly. Cancellation is monotonic: once set, a scope
/// never un-cancels.
#[derive(Clone, Default)]
pub struct CancelScope {
    cancelled: Arc<AtomicBool>,
}

impl CancelScope {
    pub fn new(cancelled: bool) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(cancelled)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
