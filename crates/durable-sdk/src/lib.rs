//! Developer-facing facade over the durable execution SDK: the axum HTTP
//! adapter that answers the scheduler's RunRequests, the CLI bootstrap that
//! serves it, and an in-process mock scheduler for exercising a registered
//! function without a real one.

mod auth;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod server;

pub use auth::Verification;
pub use durable_client::{Client, ClientError};
pub use durable_config::{Config, Secret};
pub use durable_proto::{
    Call, CallResult, ErrorEnvelope, Exit, Poll, PollResult, RunRequest, RunResponse, Status, TypedEnvelope,
};
pub use durable_registry::{FunctionDescriptor, FunctionHandle, FunctionKind, Implementation, OneShotFn, Registry, RegistryBuilder, RegistryError};
pub use durable_runtime::{classify, Engine};
pub use durable_workflow::{CancelScope, Context, EntryFn, GatherPolicy, Outcome, Resumption};
