use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Status is attached to every RunResponse and classifies retryability.
///
/// See spec §7 for the authoritative taxonomy. [`Status::is_transient`]
/// and [`Status::is_permanent`] are the two halves of that taxonomy that
/// callers (and the scheduler) use to decide whether to retry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Ok,
    Timeout,
    Throttled,
    InvalidArgument,
    InvalidResponse,
    TemporaryError,
    PermanentError,
    IncompatibleState,
    DnsError,
    TcpError,
    TlsError,
    HttpError,
    Unauthenticated,
    PermissionDenied,
    NotFound,
}

impl Status {
    /// The scheduler is expected to retry calls/executions with this status.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Status::Timeout
                | Status::Throttled
                | Status::TemporaryError
                | Status::DnsError
                | Status::TcpError
                | Status::TlsError
                | Status::HttpError
        )
    }

    /// Delivered to the caller as final; never retried by the scheduler.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Status::PermanentError
                | Status::InvalidArgument
                | Status::InvalidResponse
                | Status::NotFound
                | Status::Unauthenticated
                | Status::PermissionDenied
                | Status::IncompatibleState
        )
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "UNKNOWN".to_string());
        f.write_str(&name)
    }
}
