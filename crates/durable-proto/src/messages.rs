use crate::envelope::{ErrorEnvelope, TypedEnvelope};
use crate::status::Status;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// A scalar identifier, scoped to a single Poll, pairing a Call with its eventual CallResult.
pub type CorrelationId = u64;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{0}")]
    Message(String),
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

/// Unknown fields a newer scheduler sends that this SDK version doesn't
/// interpret are kept here and re-emitted verbatim on the next encode,
/// rather than silently dropped (spec §4.A).
pub type Extra = serde_json::Map<String, serde_json::Value>;

/// Call is produced by the runtime when a durable coroutine awaits a child.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Call {
    pub correlation_id: CorrelationId,
    pub endpoint: String,
    pub function: String,
    pub input: TypedEnvelope,
    #[serde(default, with = "humantime_serde::option")]
    #[schemars(with = "Option<String>")]
    pub expiration: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(flatten, default, skip_serializing_if = "Extra::is_empty")]
    #[schemars(skip)]
    pub extra: Extra,
}

impl Call {
    pub fn new(correlation_id: CorrelationId, function: impl Into<String>, input: TypedEnvelope) -> Self {
        Self {
            correlation_id,
            endpoint: String::new(),
            function: function.into(),
            input,
            expiration: None,
            version: None,
            extra: Extra::default(),
        }
    }
}

/// CallResult is delivered via PollResult in a subsequent RunRequest.
/// Exactly one of `output`/`error` is set if the call completed.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CallResult {
    pub correlation_id: CorrelationId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<TypedEnvelope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorEnvelope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatch_id: Option<String>,
    #[serde(flatten, default, skip_serializing_if = "Extra::is_empty")]
    #[schemars(skip)]
    pub extra: Extra,
}

impl CallResult {
    pub fn ok(correlation_id: CorrelationId, output: TypedEnvelope) -> Self {
        Self {
            correlation_id,
            output: Some(output),
            error: None,
            dispatch_id: None,
            extra: Extra::default(),
        }
    }

    pub fn err(correlation_id: CorrelationId, error: ErrorEnvelope) -> Self {
        Self {
            correlation_id,
            output: None,
            error: Some(error),
            dispatch_id: None,
            extra: Extra::default(),
        }
    }

    /// Validates the "exactly one of output/error" oneof constraint.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match (&self.output, &self.error) {
            (Some(_), Some(_)) => Err(ValidationError::new(
                "CallResult must not set both output and error",
            )),
            _ => Ok(()),
        }
    }
}

/// The directive a durable coroutine yields when it must wait on children.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Poll {
    #[serde(with = "crate::codec::base64_bytes")]
    #[schemars(with = "String")]
    pub coroutine_state: Vec<u8>,
    pub calls: Vec<Call>,
    pub min_results: u32,
    pub max_results: u32,
    #[serde(default, with = "humantime_serde::option")]
    #[schemars(with = "Option<String>")]
    pub max_wait: Option<Duration>,
    #[serde(flatten, default, skip_serializing_if = "Extra::is_empty")]
    #[schemars(skip)]
    pub extra: Extra,
}

/// The directive a durable coroutine yields when it completes execution,
/// either terminally (a result) or by replacing itself (a tail call).
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Exit {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<CallResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tail_call: Option<Call>,
    #[serde(flatten, default, skip_serializing_if = "Extra::is_empty")]
    #[schemars(skip)]
    pub extra: Extra,
}

impl Exit {
    pub fn result(result: CallResult) -> Self {
        Self {
            result: Some(result),
            tail_call: None,
            extra: Extra::default(),
        }
    }

    pub fn tail_call(call: Call) -> Self {
        Self {
            result: None,
            tail_call: Some(call),
            extra: Extra::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match (&self.result, &self.tail_call) {
            (Some(_), Some(_)) => Err(ValidationError::new(
                "Exit must not set both result and tail_call",
            )),
            (None, None) => Err(ValidationError::new(
                "Exit must set exactly one of result or tail_call",
            )),
            _ => Ok(()),
        }
    }
}

/// PollResult delivers child results back to an execution on its next RunRequest.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PollResult {
    #[serde(with = "crate::codec::base64_bytes")]
    #[schemars(with = "String")]
    pub coroutine_state: Vec<u8>,
    #[serde(default)]
    pub results: Vec<CallResult>,
    /// Set by the scheduler to signal a poll-level failure (e.g. TIMEOUT),
    /// which the engine injects into the outermost await (spec §4.G step 3).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorEnvelope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(flatten, default, skip_serializing_if = "Extra::is_empty")]
    #[schemars(skip)]
    pub extra: Extra,
}

/// RunRequest carries either an initial `input` or a `poll_result`, never both.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub function: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<TypedEnvelope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_result: Option<PollResult>,
    #[serde(flatten, default, skip_serializing_if = "Extra::is_empty")]
    #[schemars(skip)]
    pub extra: Extra,
}

impl RunRequest {
    pub fn initial(function: impl Into<String>, input: TypedEnvelope) -> Self {
        Self {
            function: function.into(),
            input: Some(input),
            poll_result: None,
            extra: Extra::default(),
        }
    }

    pub fn resuming(function: impl Into<String>, poll_result: PollResult) -> Self {
        Self {
            function: function.into(),
            input: None,
            poll_result: Some(poll_result),
            extra: Extra::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match (&self.input, &self.poll_result) {
            (Some(_), Some(_)) => Err(ValidationError::new(
                "RunRequest must not set both input and poll_result",
            )),
            (None, None) => Err(ValidationError::new(
                "RunRequest must set exactly one of input or poll_result",
            )),
            _ => Ok(()),
        }
    }
}

/// RunResponse carries exactly one of `exit` or `poll`, plus a Status.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunResponse {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit: Option<Exit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll: Option<Poll>,
    #[serde(flatten, default, skip_serializing_if = "Extra::is_empty")]
    #[schemars(skip)]
    pub extra: Extra,
}

impl RunResponse {
    pub fn exit(status: Status, exit: Exit) -> Self {
        Self {
            status,
            exit: Some(exit),
            poll: None,
            extra: Extra::default(),
        }
    }

    pub fn poll(poll: Poll) -> Self {
        Self {
            status: Status::Ok,
            exit: None,
            poll: Some(poll),
            extra: Extra::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match (&self.exit, &self.poll) {
            (Some(_), Some(_)) => Err(ValidationError::new(
                "RunResponse must not set both exit and poll",
            )),
            (None, None) => Err(ValidationError::new(
                "RunResponse must set exactly one of exit or poll",
            )),
            _ => Ok(()),
        }
    }
}

/// DispatchRequest is a batch of Calls originating from non-durable code (§4.H).
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest {
    pub calls: Vec<Call>,
}

/// DispatchResponse carries one dispatch id per dispatched Call, in order.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResponse {
    pub dispatch_ids: Vec<String>,
}
