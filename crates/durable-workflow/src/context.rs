//! Durable Coroutine (spec §4.D): the `Context` a workflow body awaits
//! against. Every suspension a workflow performs — a single call, a gather,
//! a race — funnels through [`Context::gather_raw`], which is the only place
//! the coroutine actually yields to its driver. That keeps the replay model
//! in `journal.rs` simple: one journal [`Segment`](crate::journal::Segment)
//! per suspension, in program order, regardless of which combinator caused
//! it.

use crate::combinators::{CancelScope, GatherPolicy};
use crate::journal::Segment;
use coroutines::Suspend;
use durable_proto::{Call, CallResult, CorrelationId, ErrorEnvelope, TypedEnvelope};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What a coroutine yields at its single suspension point.
#[derive(Clone, Debug)]
pub struct PendingPoll {
    pub calls: Vec<Call>,
    pub policy: GatherPolicy,
}

/// What the driver resumes a suspended coroutine with.
#[derive(Clone, Debug)]
pub enum Resumption {
    Results(Vec<CallResult>),
    Cancel(ErrorEnvelope),
}

/// A child call awaiting submission, built up before handing it to one of
/// `Context`'s combinators.
#[derive(Clone, Debug)]
pub struct PendingCall {
    pub function: String,
    pub input: TypedEnvelope,
    pub expiration: Option<Duration>,
    pub version: Option<String>,
}

impl PendingCall {
    pub fn new(function: impl Into<String>, input: TypedEnvelope) -> Self {
        Self {
            function: function.into(),
            input,
            expiration: None,
            version: None,
        }
    }

    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = Some(expiration);
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

fn cancelled_error() -> ErrorEnvelope {
    ErrorEnvelope::new(
        "Cancelled",
        "the enclosing cancellation scope has already fired",
        Vec::new(),
    )
}

fn aggregate_error(messages: Vec<String>) -> ErrorEnvelope {
    let value = serde_json::to_vec(&messages).unwrap_or_default();
    ErrorEnvelope::new("AggregateError", messages.join("; "), value)
}

/// Replay cursor and bookkeeping shared between `Context` and the
/// `DurableCoroutine` that drives it from the outside.
pub(crate) struct Replay {
    pub(crate) cached: VecDeque<Segment>,
    pub(crate) produced: Vec<Segment>,
    pub(crate) cancelled: bool,
    next_correlation_id: CorrelationId,
}

impl Replay {
    pub(crate) fn new(cached: Vec<Segment>, cancelled: bool) -> Self {
        Self {
            cached: cached.into(),
            produced: Vec::new(),
            cancelled,
            next_correlation_id: 1,
        }
    }
}

pub type ReplayHandle = Arc<Mutex<Replay>>;

/// The handle passed into a durable coroutine's entry function. Awaiting any
/// of its methods is the only durable suspension point; awaiting anything
/// else inside a workflow body is a programmer error (spec §5).
pub struct Context {
    suspend: Suspend<PendingPoll, Resumption>,
    replay: ReplayHandle,
}

impl Context {
    pub(crate) fn new(suspend: Suspend<PendingPoll, Resumption>, replay: ReplayHandle) -> Self {
        Self { suspend, replay }
    }

    /// True once this coroutine's cancellation scope has fired. User code
    /// may poll this between calls to decide whether to keep going.
    pub fn is_cancelled(&self) -> bool {
        self.replay.lock().expect("replay mutex poisoned").cancelled
    }

    /// Marks this coroutine's scope cancelled from the inside (e.g. in
    /// response to an application-level condition). Monotonic like every
    /// other cancellation path (spec §8: cancellation monotonicity).
    pub fn cancel(&self) {
        self.replay.lock().expect("replay mutex poisoned").cancelled = true;
    }

    /// A handle mirroring the coroutine's own cancellation state; cancelling
    /// it has the same effect as `Context::cancel`.
    pub fn cancel_scope(&self) -> CancelScope {
        CancelScope::new(self.is_cancelled())
    }

    fn next_correlation_id(&self) -> CorrelationId {
        let mut replay = self.replay.lock().expect("replay mutex poisoned");
        let id = replay.next_correlation_id;
        replay.next_correlation_id += 1;
        id
    }

    /// The core combinator every other awaitable method builds on: submits
    /// `calls` as a single batch under `policy` and returns one outcome per
    /// call, in submission order. `None` in a position means that child had
    /// no result in the batch the driver resolved with (possible under
    /// `Any`/`Race`/`NOfM` policies, which may resolve before every child
    /// finishes).
    pub async fn gather_raw(
        &mut self,
        calls: Vec<PendingCall>,
        policy: GatherPolicy,
    ) -> Result<Vec<Option<Result<TypedEnvelope, ErrorEnvelope>>>, ErrorEnvelope> {
        if self.is_cancelled() {
            return Err(cancelled_error());
        }

        let cached = {
            let mut replay = self.replay.lock().expect("replay mutex poisoned");
            replay.cached.pop_front()
        };

        // Re-derive the same correlation ids this call site was assigned the
        // first time through, whether or not we end up using a cached
        // result for them: replay must advance the counter identically on
        // every run so later, un-cached call sites still land on the ids
        // they were first recorded under.
        let ids: Vec<CorrelationId> = calls.iter().map(|_| self.next_correlation_id()).collect();

        if let Some(segment) = cached {
            let mut replay = self.replay.lock().expect("replay mutex poisoned");
            replay.produced.push(segment.clone());
            if let Some(error) = segment.error {
                replay.cancelled = true;
                return Err(error);
            }
            drop(replay);
            return Ok(reassemble_by_id(&ids, &segment.results));
        }

        if calls.is_empty() {
            return Ok(Vec::new());
        }
        let wire_calls: Vec<Call> = calls
            .iter()
            .zip(ids.iter())
            .map(|(call, id)| Call {
                correlation_id: *id,
                endpoint: String::new(),
                function: call.function.clone(),
                input: call.input.clone(),
                expiration: call.expiration,
                version: call.version.clone(),
                extra: Default::default(),
            })
            .collect();

        let resumption = self.suspend.yield_(PendingPoll { calls: wire_calls, policy }).await;

        let mut replay = self.replay.lock().expect("replay mutex poisoned");
        match resumption {
            Resumption::Cancel(error) => {
                replay.cancelled = true;
                replay.produced.push(Segment {
                    results: Vec::new(),
                    error: Some(error.clone()),
                });
                Err(error)
            }
            Resumption::Results(results) => {
                replay.produced.push(Segment {
                    results: results.clone(),
                    error: None,
                });
                drop(replay);
                Ok(reassemble_by_id(&ids, &results))
            }
        }
    }

    /// Awaits a single child call.
    pub async fn call(
        &mut self,
        function: &str,
        input: TypedEnvelope,
    ) -> Result<TypedEnvelope, ErrorEnvelope> {
        let outcomes = self
            .gather_raw(vec![PendingCall::new(function, input)], GatherPolicy::All)
            .await?;
        outcomes
            .into_iter()
            .next()
            .flatten()
            .unwrap_or_else(|| Err(cancelled_error()))
    }

    /// Awaits every call in the batch; the first failure in submission
    /// order is returned as the overall error, matching `gather`'s
    /// fail-fast semantics.
    pub async fn gather(
        &mut self,
        calls: Vec<PendingCall>,
    ) -> Result<Vec<TypedEnvelope>, ErrorEnvelope> {
        let outcomes = self.gather_raw(calls, GatherPolicy::All).await?;
        let mut out = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome {
                Some(Ok(value)) => out.push(value),
                Some(Err(error)) => return Err(error),
                None => return Err(cancelled_error()),
            }
        }
        Ok(out)
    }

    /// Awaits the batch for the first success; if none succeed, aggregates
    /// every failure the driver delivered into one `ErrorEnvelope`.
    pub async fn any(&mut self, calls: Vec<PendingCall>) -> Result<TypedEnvelope, ErrorEnvelope> {
        let outcomes = self.gather_raw(calls, GatherPolicy::Any).await?;
        if let Some(value) = outcomes
            .iter()
            .flatten()
            .find_map(|outcome| outcome.as_ref().ok().cloned())
        {
            return Ok(value);
        }
        let messages = outcomes
            .iter()
            .flatten()
            .filter_map(|outcome| outcome.as_ref().err().map(ErrorEnvelope::to_string))
            .collect();
        Err(aggregate_error(messages))
    }

    /// Awaits the batch for whichever child the driver resolves first,
    /// success or failure.
    pub async fn race(&mut self, calls: Vec<PendingCall>) -> Result<TypedEnvelope, ErrorEnvelope> {
        let outcomes = self.gather_raw(calls, GatherPolicy::Race).await?;
        outcomes
            .into_iter()
            .flatten()
            .next()
            .unwrap_or_else(|| Err(cancelled_error()))
    }

    /// `race`'s twin under a distinct name for call sites that mean "return
    /// as soon as anything finishes" rather than "and abandon the rest".
    pub async fn first_completed(
        &mut self,
        calls: Vec<PendingCall>,
    ) -> Result<TypedEnvelope, ErrorEnvelope> {
        self.race(calls).await
    }

    /// Waits for at least `n` of the batch to complete.
    pub async fn n_of_m(
        &mut self,
        calls: Vec<PendingCall>,
        n: u32,
    ) -> Result<Vec<Result<TypedEnvelope, ErrorEnvelope>>, ErrorEnvelope> {
        let outcomes = self.gather_raw(calls, GatherPolicy::NOfM(n)).await?;
        Ok(outcomes.into_iter().flatten().collect())
    }

    /// Awaits every call in the batch, surfacing each child's own
    /// success/failure inline instead of short-circuiting on the first
    /// error (unlike `gather`). A simplified port of the original's
    /// incremental-arrival `all_completed`: this port still waits for the
    /// whole batch before returning, rather than yielding results one at a
    /// time as they land, since that would require multiple suspensions per
    /// call site.
    pub async fn all_completed(
        &mut self,
        calls: Vec<PendingCall>,
    ) -> Result<Vec<Result<TypedEnvelope, ErrorEnvelope>>, ErrorEnvelope> {
        let outcomes = self.gather_raw(calls, GatherPolicy::All).await?;
        Ok(outcomes
            .into_iter()
            .map(|outcome| outcome.unwrap_or_else(|| Err(cancelled_error())))
            .collect())
    }

    /// Builds the `Call` a tail call replaces this execution with. Unlike
    /// every other `Context` method, this does not suspend: a tail call is a
    /// terminal directive (spec §4.D), so the workflow's entry function
    /// should return `Outcome::TailCall(ctx.tail_call(...))` directly.
    pub fn tail_call(&self, function: &str, input: TypedEnvelope) -> Call {
        Call::new(0, function, input)
    }
}

fn reassemble_by_id(
    ids: &[CorrelationId],
    results: &[CallResult],
) -> Vec<Option<Result<TypedEnvelope, ErrorEnvelope>>> {
    ids.iter()
        .map(|id| {
            results
                .iter()
                .find(|result| result.correlation_id == *id)
                .map(outcome_of)
        })
        .collect()
}

fn outcome_of(result: &CallResult) -> Result<TypedEnvelope, ErrorEnvelope> {
    if let Some(output) = &result.output {
        Ok(output.clone())
    } else if let Some(error) = &result.error {
        Err(error.clone())
    } else {
        Err(ErrorEnvelope::new(
            "InvalidResponse",
            "CallResult set neither output nor error",
            Vec::new(),
        ))
    }
}
