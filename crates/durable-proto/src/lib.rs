//! Wire message records and codec for the durable execution protocol
//! (spec §4.A). These types are the in-memory shape of data the external
//! schema defines on the wire; the byte layout of that schema is out of
//! scope here (spec §1), so these are hand-written, schema-annotated
//! structs in the style of `connector-protocol`, not protoc-generated code.

pub mod codec;
pub mod envelope;
pub mod messages;
pub mod status;

pub use codec::{Codec, CodecError, JsonCodec};
pub use envelope::{ErrorEnvelope, TypedEnvelope};
pub use messages::{
    Call, CallResult, CorrelationId, DispatchRequest, DispatchResponse, Exit, Poll, PollResult,
    RunRequest, RunResponse, ValidationError,
};
pub use status::Status;
