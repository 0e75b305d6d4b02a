//! Run-Loop Engine (spec §4.G): the state machine that turns one
//! `RunRequest` into one `RunResponse`, driving either a plain one-shot
//! function or a durable coroutine (spec §4.D) exactly one advance forward.

mod classify;

pub use classify::classify;

use durable_proto::{Call, CallResult, Exit, Poll, RunRequest, RunResponse, Status};
use durable_registry::{FunctionKind, Implementation, Registry, RegistryError};
use durable_workflow::{CoroutineSnapshot, Directive, DurableCoroutine, Outcome, Resumption, StepError};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

/// The Run-Loop Engine: stateless apart from the process-wide [`Registry`]
/// it was built with. Safe to share across worker threads/tasks — handling
/// one `RunRequest` never touches state another concurrent `handle` call
/// could observe (spec §5's "no two logical flows share a coroutine
/// snapshot").
pub struct Engine {
    registry: Arc<Registry>,
    trace: bool,
}

impl Engine {
    /// `trace` mirrors spec §6's `trace` config option: when set, every
    /// coroutine snapshot this engine produces is dumped to stderr as it's
    /// taken.
    pub fn new(registry: Arc<Registry>, trace: bool) -> Self {
        Self { registry, trace }
    }

    #[tracing::instrument(skip_all, fields(function = %request.function))]
    pub async fn handle(&self, request: RunRequest) -> RunResponse {
        if let Err(err) = request.validate() {
            return invalid_argument(err.to_string());
        }

        let (descriptor, implementation) = match self.registry.get(&request.function) {
            Ok(found) => found,
            Err(RegistryError::NotFound(name)) => return not_found(name),
            Err(err) => return invalid_argument(err.to_string()),
        };

        match (descriptor.kind, implementation) {
            (FunctionKind::OneShot, Implementation::OneShot(implementation)) => {
                if request.poll_result.is_some() {
                    return invalid_argument(format!(
                        "{:?} is a one-shot function and cannot be resumed with a poll_result",
                        descriptor.name
                    ));
                }
                let input = request
                    .input
                    .expect("validate() guarantees exactly one of input/poll_result");

                match AssertUnwindSafe(implementation.call(input)).catch_unwind().await {
                    Ok(Ok(output)) => RunResponse::exit(Status::Ok, Exit::result(CallResult::ok(0, output))),
                    Ok(Err(error)) => {
                        let status = classify(&error);
                        RunResponse::exit(status, Exit::result(CallResult::err(0, error)))
                    }
                    Err(panic) => panic_response(panic.as_ref()),
                }
            }
            (FunctionKind::Coroutine, Implementation::Coroutine(entry)) => {
                let name = descriptor.name.clone();
                let version = descriptor.version.clone();
                let entry = entry.clone();

                let outcome = if let Some(poll_result) = request.poll_result {
                    let snapshot = match CoroutineSnapshot::decode(&poll_result.coroutine_state) {
                        Ok(snapshot) => snapshot,
                        Err(err) => return incompatible_state(err.to_string()),
                    };
                    let resumption = match poll_result.error {
                        Some(error) => Resumption::Cancel(error),
                        None => Resumption::Results(poll_result.results),
                    };
                    match DurableCoroutine::revive(name, version, entry, snapshot, self.trace) {
                        Ok(mut coroutine) => {
                            std::panic::catch_unwind(AssertUnwindSafe(move || coroutine.resume(resumption)))
                        }
                        Err(StepError::Snapshot(err)) => return incompatible_state(err.to_string()),
                    }
                } else {
                    let input = request
                        .input
                        .expect("validate() guarantees exactly one of input/poll_result");
                    let mut coroutine = DurableCoroutine::create(name, version, entry, input, self.trace);
                    std::panic::catch_unwind(AssertUnwindSafe(move || coroutine.start()))
                };

                match outcome {
                    Ok(directive) => translate(directive),
                    Err(panic) => panic_response(panic.as_ref()),
                }
            }
            // The registry only ever pairs a descriptor with its matching
            // Implementation variant (see durable_registry::RegistryBuilder).
            _ => unreachable!("registry descriptor/implementation kind mismatch"),
        }
    }
}

fn translate(directive: Directive) -> RunResponse {
    match directive {
        Directive::Exit(Outcome::Value(value)) => {
            RunResponse::exit(Status::Ok, Exit::result(CallResult::ok(0, value)))
        }
        Directive::Exit(Outcome::Error(error)) => {
            let status = classify(&error);
            RunResponse::exit(status, Exit::result(CallResult::err(0, error)))
        }
        Directive::Exit(Outcome::TailCall(call)) => RunResponse::exit(Status::Ok, Exit::tail_call(call)),
        Directive::Poll {
            calls,
            min_results,
            max_results,
            coroutine_state,
            ..
        } => RunResponse::poll(Poll {
            coroutine_state,
            max_wait: nearest_expiration(&calls),
            calls,
            min_results,
            max_results,
        }),
    }
}

/// `max_wait` is specified as "the scope's remaining time or an infinity
/// sentinel" (spec §5). The wire's `RunRequest` carries no field for an
/// execution-level deadline, so this port takes the only deadline data it
/// actually has: the soonest `expiration` among the batch's own children.
fn nearest_expiration(calls: &[Call]) -> Option<Duration> {
    calls.iter().filter_map(|call| call.expiration).min()
}

fn not_found(name: String) -> RunResponse {
    RunResponse::exit(
        Status::NotFound,
        Exit::result(CallResult::err(
            0,
            durable_proto::ErrorEnvelope::new("NotFound", format!("function {name:?} is not registered"), vec![]),
        )),
    )
}

fn invalid_argument(message: String) -> RunResponse {
    RunResponse::exit(
        Status::InvalidArgument,
        Exit::result(CallResult::err(
            0,
            durable_proto::ErrorEnvelope::new("InvalidArgument", message, vec![]),
        )),
    )
}

fn incompatible_state(message: String) -> RunResponse {
    RunResponse::exit(
        Status::IncompatibleState,
        Exit::result(CallResult::err(
            0,
            durable_proto::ErrorEnvelope::new("IncompatibleState", message, vec![]),
        )),
    )
}

fn panic_response(payload: &(dyn std::any::Any + Send)) -> RunResponse {
    let error = durable_value::box_panic(payload);
    RunResponse::exit(Status::PermanentError, Exit::result(CallResult::err(0, error)))
}
