//! Ties `Context`'s replay-aware suspension points to the
//! `coroutines::Coroutine` primitive, producing the unit `durable-runtime`
//! drives one `RunRequest` at a time.

use crate::combinators::GatherPolicy;
use crate::context::{Context, PendingPoll, Replay, Resumption};
use crate::journal::{CoroutineSnapshot, SnapshotError};
use coroutines::{coroutine, Coroutine as RawCoroutine, ResumeResult};
use durable_proto::{Call, ErrorEnvelope, TypedEnvelope};
use futures::future::BoxFuture;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// A workflow body's terminal result: a value, an error, or a request to be
/// replaced by another function invocation (spec §4.D's `Directive::TailCall`).
#[derive(Clone, Debug)]
pub enum Outcome {
    Value(TypedEnvelope),
    Error(ErrorEnvelope),
    TailCall(Call),
}

impl From<Result<TypedEnvelope, ErrorEnvelope>> for Outcome {
    fn from(result: Result<TypedEnvelope, ErrorEnvelope>) -> Self {
        match result {
            Ok(value) => Outcome::Value(value),
            Err(error) => Outcome::Error(error),
        }
    }
}

/// A durable coroutine's entry function: given a fresh `Context` and its
/// original input, runs to completion or to its first live suspension.
pub type EntryFn = dyn Fn(Context, TypedEnvelope) -> BoxFuture<'static, Outcome> + Send + Sync;

/// What a single `step`/`resume` call on a `DurableCoroutine` produces: a
/// batch of children to poll, or a terminal outcome.
#[derive(Clone, Debug)]
pub enum Directive {
    Poll {
        calls: Vec<Call>,
        policy: GatherPolicy,
        min_results: u32,
        max_results: u32,
        coroutine_state: Vec<u8>,
    },
    Exit(Outcome),
}

#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

/// A live, in-memory durable coroutine instance: the thing `durable-runtime`
/// constructs (via `create` or `revive`), advances exactly once per
/// `RunRequest`, and then snapshots or discards.
pub struct DurableCoroutine {
    function: String,
    version: String,
    input: TypedEnvelope,
    replay: Arc<Mutex<Replay>>,
    inner: Pin<Box<RawCoroutine<BoxFuture<'static, Outcome>, PendingPoll, Resumption>>>,
    trace: bool,
}

impl DurableCoroutine {
    /// Begins a brand-new execution: no prior journal, no prior input. When
    /// `trace` is set (spec §6's `trace` config option), every snapshot this
    /// coroutine produces is also dumped to stderr as it's taken.
    pub fn create(
        function: impl Into<String>,
        version: impl Into<String>,
        entry: Arc<EntryFn>,
        input: TypedEnvelope,
        trace: bool,
    ) -> Self {
        Self::build(function.into(), version.into(), entry, input, Vec::new(), false, trace)
    }

    /// Reconstructs a suspended execution from its last snapshot. The
    /// returned coroutine has already been driven back up to (but not past)
    /// the suspension the snapshot was taken at; callers must immediately
    /// call `resume` with the new `PollResult` to continue driving it.
    pub fn revive(
        function: impl Into<String>,
        version: impl Into<String>,
        entry: Arc<EntryFn>,
        snapshot: CoroutineSnapshot,
        trace: bool,
    ) -> Result<Self, StepError> {
        let version = version.into();
        snapshot.check_version(&version)?;
        let mut coroutine = Self::build(
            function.into(),
            version,
            entry,
            snapshot.input,
            snapshot.segments,
            snapshot.cancelled,
            trace,
        );
        // Replays through every cached segment, arriving at the suspension
        // that matches the PollResult the caller is about to deliver.
        coroutine.advance(None);
        Ok(coroutine)
    }

    fn build(
        function: String,
        version: String,
        entry: Arc<EntryFn>,
        input: TypedEnvelope,
        cached_segments: Vec<crate::journal::Segment>,
        cancelled: bool,
        trace: bool,
    ) -> Self {
        let replay = Arc::new(Mutex::new(Replay::new(cached_segments, cancelled)));
        let replay_for_ctx = replay.clone();
        let entry_input = input.clone();
        let raw = coroutine(move |suspend| {
            let ctx = Context::new(suspend, replay_for_ctx);
            entry(ctx, entry_input)
        });
        Self {
            function,
            version,
            input,
            replay,
            inner: Box::pin(raw),
            trace,
        }
    }

    /// Drives a freshly created coroutine to its first suspension or
    /// completion.
    pub fn start(&mut self) -> Directive {
        self.advance(None)
    }

    /// Resumes a suspended coroutine with the batch of results (or
    /// poll-level error) the scheduler just delivered, driving it to its
    /// next suspension or completion.
    pub fn resume(&mut self, resumption: Resumption) -> Directive {
        self.advance(Some(resumption))
    }

    #[tracing::instrument(level = "debug", skip_all, fields(function = %self.function, version = %self.version))]
    fn advance(&mut self, resumption: Option<Resumption>) -> Directive {
        // The coroutine primitive is itself async (it suspends by returning
        // Poll::Pending), but our driving is synchronous from the caller's
        // perspective: replaying cached segments and reaching the next live
        // suspension never actually awaits anything external, so a
        // single-threaded, no-op-waker block_on is sufficient and avoids
        // making every crate downstream of this one async-runtime-agnostic.
        let mut as_mut = self.inner.as_mut();
        let result = futures::executor::block_on(async {
            match resumption {
                Some(value) => as_mut.resume(value).await,
                None => as_mut.start().await,
            }
        });

        match result {
            ResumeResult::Done(outcome) => {
                tracing::debug!("coroutine reached exit");
                Directive::Exit(outcome)
            }
            ResumeResult::Yielded(pending) => {
                let replay = self.replay.lock().expect("replay mutex poisoned");
                let min_results = pending.policy.min_results(pending.calls.len());
                let max_results = pending.policy.max_results(pending.calls.len());
                let snapshot = CoroutineSnapshot {
                    function: self.function.clone(),
                    version: self.version.clone(),
                    input: self.input.clone(),
                    cancelled: replay.cancelled,
                    segments: replay.produced.clone(),
                };
                if self.trace {
                    dump_snapshot(&snapshot);
                }
                Directive::Poll {
                    calls: pending.calls,
                    policy: pending.policy,
                    min_results,
                    max_results,
                    coroutine_state: snapshot.encode(),
                }
            }
        }
    }
}

/// Dumps a snapshot to stderr as canonical JSON, best-effort (spec §6's
/// `trace` option: "dumps coroutine/frame state to stderr before each
/// snapshot for debugging").
fn dump_snapshot(snapshot: &CoroutineSnapshot) {
    if let Ok(mut buf) = serde_json::to_vec(snapshot) {
        buf.push(b'\n');
        _ = std::io::Write::write_all(&mut std::io::stderr(), &buf);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::context::PendingCall;
    use durable_proto::CallResult;

    fn envelope(bytes: &[u8]) -> TypedEnvelope {
        TypedEnvelope::new("durable.sdk/raw", bytes.to_vec())
    }

    fn echo_entry() -> Arc<EntryFn> {
        Arc::new(|mut ctx: Context, input: TypedEnvelope| {
            Box::pin(async move {
                let result = ctx.call("child", input).await;
                Outcome::from(result)
            })
        })
    }

    #[test]
    fn fresh_coroutine_yields_a_poll_then_resumes_to_completion() {
        let mut coro = DurableCoroutine::create("pipeline", "v1", echo_entry(), envelope(b"in"), false);
        let directive = coro.start();
        let Directive::Poll {
            calls,
            coroutine_state,
            ..
        } = directive
        else {
            panic!("expected a poll directive");
        };
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function, "child");

        let directive = coro.resume(Resumption::Results(vec![CallResult::ok(
            calls[0].correlation_id,
            envelope(b"out"),
        )]));
        match directive {
            Directive::Exit(Outcome::Value(value)) => assert_eq!(value.bytes, b"out".to_vec()),
            other => panic!("expected an exit value, got {other:?}"),
        }
        assert!(!coroutine_state.is_empty());
    }

    #[test]
    fn revived_coroutine_replays_prior_segments_then_continues() {
        // First run: drive up to its single suspension and snapshot there.
        let mut coro = DurableCoroutine::create("pipeline", "v1", echo_entry(), envelope(b"in"), false);
        let Directive::Poll { calls, .. } = coro.start() else {
            panic!("expected a poll directive");
        };
        let correlation_id = calls[0].correlation_id;

        // Simulate persisting the Poll and later restoring from its state,
        // without yet knowing the child's result.
        let snapshot = CoroutineSnapshot {
            function: "pipeline".into(),
            version: "v1".into(),
            input: envelope(b"in"),
            cancelled: false,
            segments: vec![],
        };
        let mut revived =
            DurableCoroutine::revive("pipeline", "v1", echo_entry(), snapshot, false).unwrap();
        let directive = revived.resume(Resumption::Results(vec![CallResult::ok(
            correlation_id,
            envelope(b"out"),
        )]));
        match directive {
            Directive::Exit(Outcome::Value(value)) => assert_eq!(value.bytes, b"out".to_vec()),
            other => panic!("expected an exit value, got {other:?}"),
        }
    }

    #[test]
    fn version_mismatch_on_revive_is_rejected() {
        let snapshot = CoroutineSnapshot {
            function: "pipeline".into(),
            version: "v1".into(),
            input: envelope(b"in"),
            cancelled: false,
            segments: vec![],
        };
        let result = DurableCoroutine::revive("pipeline", "v2", echo_entry(), snapshot, false);
        assert!(matches!(
            result,
            Err(StepError::Snapshot(SnapshotError::IncompatibleVersion { .. }))
        ));
    }

    #[test]
    fn gather_fails_fast_on_first_error_in_submission_order() {
        let entry: Arc<EntryFn> = Arc::new(|mut ctx: Context, input: TypedEnvelope| {
            Box::pin(async move {
                let result = ctx
                    .gather(vec![
                        PendingCall::new("a", input.clone()),
                        PendingCall::new("b", input),
                    ])
                    .await;
                Outcome::from(result.map(|_| TypedEnvelope::new("durable.sdk/raw", vec![])))
            })
        });
        let mut coro = DurableCoroutine::create("pipeline", "v1", entry, envelope(b"in"), false);
        let Directive::Poll { calls, .. } = coro.start() else {
            panic!("expected a poll directive");
        };
        let results = vec![
            CallResult::ok(calls[0].correlation_id, envelope(b"ok")),
            CallResult::err(calls[1].correlation_id, ErrorEnvelope::new("E", "bad", vec![])),
        ];
        match coro.resume(Resumption::Results(results)) {
            Directive::Exit(Outcome::Error(error)) => assert_eq!(error.type_, "E"),
            other => panic!("expected an exit error, got {other:?}"),
        }
    }

    #[test]
    fn gather_reassembles_out_of_order_call_results_by_correlation_id() {
        let entry: Arc<EntryFn> = Arc::new(|mut ctx: Context, input: TypedEnvelope| {
            Box::pin(async move {
                let result = ctx
                    .gather(vec![
                        PendingCall::new("a", input.clone()),
                        PendingCall::new("b", input),
                    ])
                    .await;
                Outcome::from(result.map(|values| {
                    let bytes: Vec<Vec<u8>> = values.into_iter().map(|v| v.bytes).collect();
                    TypedEnvelope::new("durable.sdk/raw", serde_json::to_vec(&bytes).unwrap())
                }))
            })
        });
        let mut coro = DurableCoroutine::create("pipeline", "v1", entry, envelope(b"in"), false);
        let Directive::Poll { calls, .. } = coro.start() else {
            panic!("expected a poll directive");
        };
        // Deliver the batch's results in the reverse of submission order.
        let results = vec![
            CallResult::ok(calls[1].correlation_id, envelope(b"out-b")),
            CallResult::ok(calls[0].correlation_id, envelope(b"out-a")),
        ];
        match coro.resume(Resumption::Results(results)) {
            Directive::Exit(Outcome::Value(value)) => {
                let bytes: Vec<Vec<u8>> = serde_json::from_slice(&value.bytes).unwrap();
                assert_eq!(bytes, vec![b"out-a".to_vec(), b"out-b".to_vec()]);
            }
            other => panic!("expected an exit value, got {other:?}"),
        }
    }

    #[test]
    fn any_succeeds_once_one_child_of_a_failing_batch_comes_back_ok() {
        let entry: Arc<EntryFn> = Arc::new(|mut ctx: Context, input: TypedEnvelope| {
            Box::pin(async move {
                let result = ctx
                    .any(vec![
                        PendingCall::new("a", input.clone()),
                        PendingCall::new("b", input),
                    ])
                    .await;
                Outcome::from(result)
            })
        });
        let mut coro = DurableCoroutine::create("pipeline", "v1", entry, envelope(b"in"), false);
        let Directive::Poll { calls, .. } = coro.start() else {
            panic!("expected a poll directive");
        };
        let results = vec![
            CallResult::err(calls[0].correlation_id, ErrorEnvelope::new("E", "bad", vec![])),
            CallResult::ok(calls[1].correlation_id, envelope(b"out-b")),
        ];
        match coro.resume(Resumption::Results(results)) {
            Directive::Exit(Outcome::Value(value)) => assert_eq!(value.bytes, b"out-b".to_vec()),
            other => panic!("expected an exit value, got {other:?}"),
        }
    }

    #[test]
    fn any_aggregates_every_failure_when_the_whole_batch_fails() {
        let entry: Arc<EntryFn> = Arc::new(|mut ctx: Context, input: TypedEnvelope| {
            Box::pin(async move {
                let result = ctx
                    .any(vec![
                        PendingCall::new("a", input.clone()),
                        PendingCall::new("b", input),
                    ])
                    .await;
                Outcome::from(result)
            })
        });
        let mut coro = DurableCoroutine::create("pipeline", "v1", entry, envelope(b"in"), false);
        let Directive::Poll { calls, .. } = coro.start() else {
            panic!("expected a poll directive");
        };
        let results = vec![
            CallResult::err(calls[0].correlation_id, ErrorEnvelope::new("E1", "first", vec![])),
            CallResult::err(calls[1].correlation_id, ErrorEnvelope::new("E2", "second", vec![])),
        ];
        match coro.resume(Resumption::Results(results)) {
            Directive::Exit(Outcome::Error(error)) => {
                assert_eq!(error.type_, "AggregateError");
                assert!(error.message.contains("first") && error.message.contains("second"));
            }
            other => panic!("expected an exit error, got {other:?}"),
        }
    }

    #[test]
    fn race_returns_whichever_child_the_driver_resolved_even_if_submitted_second() {
        let entry: Arc<EntryFn> = Arc::new(|mut ctx: Context, input: TypedEnvelope| {
            Box::pin(async move {
                let result = ctx
                    .race(vec![
                        PendingCall::new("a", input.clone()),
                        PendingCall::new("b", input),
                    ])
                    .await;
                Outcome::from(result)
            })
        });
        let mut coro = DurableCoroutine::create("pipeline", "v1", entry, envelope(b"in"), false);
        let Directive::Poll { calls, .. } = coro.start() else {
            panic!("expected a poll directive");
        };
        // Only "b" has come back; "a" is still outstanding.
        let results = vec![CallResult::ok(calls[1].correlation_id, envelope(b"out-b"))];
        match coro.resume(Resumption::Results(results)) {
            Directive::Exit(Outcome::Value(value)) => assert_eq!(value.bytes, b"out-b".to_vec()),
            other => panic!("expected an exit value, got {other:?}"),
        }
    }

    #[test]
    fn race_can_resolve_to_a_failure() {
        let entry: Arc<EntryFn> = Arc::new(|mut ctx: Context, input: TypedEnvelope| {
            Box::pin(async move {
                let result = ctx
                    .race(vec![
                        PendingCall::new("a", input.clone()),
                        PendingCall::new("b", input),
                    ])
                    .await;
                Outcome::from(result)
            })
        });
        let mut coro = DurableCoroutine::create("pipeline", "v1", entry, envelope(b"in"), false);
        let Directive::Poll { calls, .. } = coro.start() else {
            panic!("expected a poll directive");
        };
        let results = vec![CallResult::err(
            calls[0].correlation_id,
            ErrorEnvelope::new("E", "bad", vec![]),
        )];
        match coro.resume(Resumption::Results(results)) {
            Directive::Exit(Outcome::Error(error)) => assert_eq!(error.type_, "E"),
            other => panic!("expected an exit error, got {other:?}"),
        }
    }

    #[test]
    fn first_completed_resolves_as_soon_as_any_child_lands() {
        let entry: Arc<EntryFn> = Arc::new(|mut ctx: Context, input: TypedEnvelope| {
            Box::pin(async move {
                let result = ctx
                    .first_completed(vec![
                        PendingCall::new("a", input.clone()),
                        PendingCall::new("b", input),
                    ])
                    .await;
                Outcome::from(result)
            })
        });
        let mut coro = DurableCoroutine::create("pipeline", "v1", entry, envelope(b"in"), false);
        let Directive::Poll { calls, .. } = coro.start() else {
            panic!("expected a poll directive");
        };
        let results = vec![CallResult::ok(calls[0].correlation_id, envelope(b"out-a"))];
        match coro.resume(Resumption::Results(results)) {
            Directive::Exit(Outcome::Value(value)) => assert_eq!(value.bytes, b"out-a".to_vec()),
            other => panic!("expected an exit value, got {other:?}"),
        }
    }

    fn ok_flags(result: Result<Vec<Result<TypedEnvelope, ErrorEnvelope>>, ErrorEnvelope>) -> Outcome {
        Outcome::from(result.map(|outcomes| {
            let flags: Vec<bool> = outcomes.iter().map(|outcome| outcome.is_ok()).collect();
            TypedEnvelope::new("durable.sdk/raw", serde_json::to_vec(&flags).unwrap())
        }))
    }

    fn flags_of(outcome: Outcome) -> Vec<bool> {
        match outcome {
            Outcome::Value(value) => serde_json::from_slice(&value.bytes).unwrap(),
            other => panic!("expected an exit value, got {other:?}"),
        }
    }

    #[test]
    fn n_of_m_returns_as_soon_as_enough_children_complete() {
        let entry: Arc<EntryFn> = Arc::new(|mut ctx: Context, input: TypedEnvelope| {
            Box::pin(async move {
                let result = ctx
                    .n_of_m(
                        vec![
                            PendingCall::new("a", input.clone()),
                            PendingCall::new("b", input.clone()),
                            PendingCall::new("c", input),
                        ],
                        2,
                    )
                    .await;
                ok_flags(result)
            })
        });
        let mut coro = DurableCoroutine::create("pipeline", "v1", entry, envelope(b"in"), false);
        let Directive::Poll { calls, .. } = coro.start() else {
            panic!("expected a poll directive");
        };
        // "c" never answers; "a" and "b" are enough to satisfy n = 2.
        let results = vec![
            CallResult::ok(calls[0].correlation_id, envelope(b"out-a")),
            CallResult::ok(calls[1].correlation_id, envelope(b"out-b")),
        ];
        let outcome = match coro.resume(Resumption::Results(results)) {
            Directive::Exit(outcome) => outcome,
            other => panic!("expected an exit, got {other:?}"),
        };
        assert_eq!(flags_of(outcome), vec![true, true]);
    }

    #[test]
    fn n_of_m_counts_a_failure_as_one_of_its_partial_results() {
        let entry: Arc<EntryFn> = Arc::new(|mut ctx: Context, input: TypedEnvelope| {
            Box::pin(async move {
                let result = ctx
                    .n_of_m(
                        vec![
                            PendingCall::new("a", input.clone()),
                            PendingCall::new("b", input.clone()),
                            PendingCall::new("c", input),
                        ],
                        2,
                    )
                    .await;
                ok_flags(result)
            })
        });
        let mut coro = DurableCoroutine::create("pipeline", "v1", entry, envelope(b"in"), false);
        let Directive::Poll { calls, .. } = coro.start() else {
            panic!("expected a poll directive");
        };
        let results = vec![
            CallResult::err(calls[0].correlation_id, ErrorEnvelope::new("E", "bad", vec![])),
            CallResult::ok(calls[1].correlation_id, envelope(b"out-b")),
        ];
        let outcome = match coro.resume(Resumption::Results(results)) {
            Directive::Exit(outcome) => outcome,
            other => panic!("expected an exit, got {other:?}"),
        };
        assert_eq!(flags_of(outcome), vec![false, true]);
    }

    #[test]
    fn all_completed_surfaces_every_child_result_without_short_circuiting() {
        let entry: Arc<EntryFn> = Arc::new(|mut ctx: Context, input: TypedEnvelope| {
            Box::pin(async move {
                let result = ctx
                    .all_completed(vec![
                        PendingCall::new("a", input.clone()),
                        PendingCall::new("b", input),
                    ])
                    .await;
                ok_flags(result)
            })
        });
        let mut coro = DurableCoroutine::create("pipeline", "v1", entry, envelope(b"in"), false);
        let Directive::Poll { calls, .. } = coro.start() else {
            panic!("expected a poll directive");
        };
        let results = vec![
            CallResult::ok(calls[0].correlation_id, envelope(b"out-a")),
            CallResult::err(calls[1].correlation_id, ErrorEnvelope::new("E", "bad", vec![])),
        ];
        let outcome = match coro.resume(Resumption::Results(results)) {
            Directive::Exit(outcome) => outcome,
            other => panic!("expected an exit, got {other:?}"),
        };
        assert_eq!(flags_of(outcome), vec![true, false]);
    }

    #[test]
    fn all_completed_returns_every_success_when_nothing_fails() {
        let entry: Arc<EntryFn> = Arc::new(|mut ctx: Context, input: TypedEnvelope| {
            Box::pin(async move {
                let result = ctx
                    .all_completed(vec![
                        PendingCall::new("a", input.clone()),
                        PendingCall::new("b", input),
                    ])
                    .await;
                ok_flags(result)
            })
        });
        let mut coro = DurableCoroutine::create("pipeline", "v1", entry, envelope(b"in"), false);
        let Directive::Poll { calls, .. } = coro.start() else {
            panic!("expected a poll directive");
        };
        let results = vec![
            CallResult::ok(calls[0].correlation_id, envelope(b"out-a")),
            CallResult::ok(calls[1].correlation_id, envelope(b"out-b")),
        ];
        let outcome = match coro.resume(Resumption::Results(results)) {
            Directive::Exit(outcome) => outcome,
            other => panic!("expected an exit, got {other:?}"),
        };
        assert_eq!(flags_of(outcome), vec![true, true]);
    }
}
