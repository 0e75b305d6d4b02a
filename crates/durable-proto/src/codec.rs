use crate::status::Status;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("message violated a oneof constraint: {0}")]
    Invalid(#[from] crate::messages::ValidationError),
}

impl CodecError {
    /// Maps a codec failure onto the protocol Status taxonomy (spec §4.A).
    pub fn status(&self) -> Status {
        match self {
            CodecError::Decode(_) | CodecError::Invalid(_) => Status::InvalidArgument,
            CodecError::Encode(_) => Status::InvalidResponse,
        }
    }
}

/// Codec translates between in-memory message records and the external
/// schema's byte form. Encoding is deterministic; decoding rejects
/// messages violating "exactly one of" oneof constraints.
pub trait Codec {
    fn encode<T: Serialize>(&self, message: &T) -> Result<Vec<u8>, CodecError>;
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// JsonCodec is the reference Codec: deterministic (BTreeMap-free structs
/// serialize their fields in declaration order) JSON encoding.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, message: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(message).map_err(CodecError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(CodecError::Decode)
    }
}

/// Decodes a RunRequest and checks its oneof constraint in one step.
pub fn decode_run_request(
    codec: &impl Codec,
    bytes: &[u8],
) -> Result<crate::messages::RunRequest, CodecError> {
    let request: crate::messages::RunRequest = codec.decode(bytes)?;
    request.validate()?;
    Ok(request)
}

/// Encodes a RunResponse, asserting its oneof invariant holds before doing so
/// (a violation here is a bug in the engine, not an input error, but we still
/// refuse to emit a malformed message).
pub fn encode_run_response(
    codec: &impl Codec,
    response: &crate::messages::RunResponse,
) -> Result<Vec<u8>, CodecError> {
    response.validate()?;
    codec.encode(response)
}

/// Base64-text transport for opaque byte blobs, shared by every wire message
/// that carries a byte payload (`Poll::coroutine_state`, `PollResult::coroutine_state`).
pub(crate) mod base64_bytes {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        base64::encode(bytes).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        base64::decode(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::envelope::TypedEnvelope;
    use crate::messages::RunRequest;

    #[test]
    fn json_codec_round_trips() {
        let codec = JsonCodec;
        let req = RunRequest::initial("f", TypedEnvelope::new("t", vec![9]));
        let bytes = codec.encode(&req).unwrap();
        let back: RunRequest = codec.decode(&bytes).unwrap();
        assert_eq!(req.function, back.function);
    }

    #[test]
    fn decode_run_request_rejects_malformed_oneof() {
        let codec = JsonCodec;
        let bytes = br#"{"function":"f"}"#;
        let err = decode_run_request(&codec, bytes).unwrap_err();
        assert_eq!(err.status(), Status::InvalidArgument);
    }
}
