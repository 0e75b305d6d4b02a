//! Durable Coroutine machinery (spec §4.D, §4.E, §4.F): an `async fn`
//! written against [`Context`] that can suspend waiting on children and be
//! snapshotted/restored across process boundaries via deterministic replay
//! over a journal, plus the concurrency primitives (`gather`/`any`/`race`/
//! `all_completed`) and cancellation scope it awaits through.

pub mod combinators;
pub mod context;
pub mod coroutine;
pub mod journal;

pub use combinators::{CancelScope, GatherPolicy};
pub use context::{Context, PendingCall, Resumption};
pub use coroutine::{Directive, DurableCoroutine, EntryFn, Outcome, StepError};
pub use journal::{CoroutineSnapshot, Segment, SnapshotError};
