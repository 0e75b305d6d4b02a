//! An in-process mock scheduler (test tooling): drives a registered
//! function end-to-end against a real [`Engine`], synthesizing CallResults
//! for every Poll by recursively invoking the same Engine against the
//! polled child calls. Intentionally dumb — single-threaded, synchronous,
//! no persistence — so it can't be mistaken for a production scheduler;
//! spec.md §1 carries the scheduler itself as a Non-goal, but the core
//! still needs *something* to exercise it against in tests.

use durable_proto::{Call, CallResult, ErrorEnvelope, PollResult, RunRequest, TypedEnvelope};
use durable_runtime::Engine;
use futures::future::BoxFuture;

/// Runs `function(input)` to completion, following every Poll/tail-call the
/// engine emits until a terminal result is reached.
pub async fn run(engine: &Engine, function: &str, input: TypedEnvelope) -> Result<TypedEnvelope, ErrorEnvelope> {
    run_call(engine, Call::new(0, function, input)).await
}

fn run_call<'a>(engine: &'a Engine, call: Call) -> BoxFuture<'a, Result<TypedEnvelope, ErrorEnvelope>> {
    Box::pin(async move {
        let mut response = engine.handle(RunRequest::initial(call.function.clone(), call.input)).await;

        loop {
            if let Some(exit) = response.exit {
                if let Some(result) = exit.result {
                    return match result.error {
                        Some(error) => Err(error),
                        None => Ok(result.output.expect("CallResult must carry output or error")),
                    };
                }
                let tail_call = exit.tail_call.expect("Exit carries exactly one of result or tail_call");
                return run_call(engine, tail_call).await;
            }

            let poll = response.poll.expect("RunResponse carries exactly one of exit or poll");
            let mut results = Vec::with_capacity(poll.calls.len());
            for child in poll.calls {
                let correlation_id = child.correlation_id;
                results.push(match run_call(engine, child).await {
                    Ok(output) => CallResult::ok(correlation_id, output),
                    Err(error) => CallResult::err(correlation_id, error),
                });
            }

            response = engine
                .handle(RunRequest::resuming(
                    call.function.clone(),
                    PollResult {
                        coroutine_state: poll.coroutine_state,
                        results,
                        error: None,
                        status: None,
                        extra: Default::default(),
                    },
                ))
                .await;
        }
    })
}
