//! Coroutine Serializer (spec §4.E), resolved as deterministic replay over a
//! journal rather than raw frame capture (see Open Question (1) in
//! SPEC_FULL.md). A [`CoroutineSnapshot`] records the original input plus one
//! [`Segment`] per suspension the coroutine has already passed through;
//! restoring re-invokes the entry function and replays those segments in
//! order until reaching the first suspension with no recorded segment yet.

use durable_proto::{CallResult, ErrorEnvelope, TypedEnvelope};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The outcome delivered to a single suspension point on a prior run: either
/// the batch of child results it resolved with, or a poll-level error that
/// was injected into it (spec §4.G step 3).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Segment {
    #[serde(default)]
    pub results: Vec<CallResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorEnvelope>,
}

/// The full state needed to resume a durable coroutine: which function it
/// is, the version it was registered under when suspended, the original
/// input it was invoked with, whether its cancellation scope has already
/// fired, and the ordered history of suspensions it has passed through.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoroutineSnapshot {
    pub function: String,
    pub version: String,
    pub input: TypedEnvelope,
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default)]
    pub segments: Vec<Segment>,
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to decode coroutine snapshot: {0}")]
    Decode(#[source] serde_json::Error),
    #[error(
        "snapshot was taken under function version {snapshot:?}, but {expected:?} is now registered"
    )]
    IncompatibleVersion { snapshot: String, expected: String },
}

impl CoroutineSnapshot {
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("CoroutineSnapshot is always serializable")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, SnapshotError> {
        serde_json::from_slice(bytes).map_err(SnapshotError::Decode)
    }

    /// Checks the function-version invariant (spec §3: "A CoroutineSnapshot
    /// restored against a different function version than it was taken
    /// under yields INCOMPATIBLE_STATE").
    pub fn check_version(&self, expected_version: &str) -> Result<(), SnapshotError> {
        if self.version != expected_version {
            return Err(SnapshotError::IncompatibleVersion {
                snapshot: self.version.clone(),
                expected: expected_version.to_string(),
            });
        }
        Ok(())
    }
}
