use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// TypedEnvelope is an opaque payload that carries an application-level value
/// (or, via [`ErrorEnvelope`], an exception) across the wire.
///
/// `type_url` names the envelope family so the receiving boxer knows how to
/// interpret `bytes` (see `durable-value`'s raw and pickled-value families);
/// the core never interprets `bytes` itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TypedEnvelope {
    pub type_url: String,
    #[serde(with = "base64_bytes")]
    #[schemars(with = "String")]
    pub bytes: Vec<u8>,
}

impl TypedEnvelope {
    pub fn new(type_url: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            type_url: type_url.into(),
            bytes,
        }
    }
}

/// ErrorEnvelope carries an application-level exception/panic across the wire,
/// preserving its type name, message, a re-raisable serialized value, and an
/// optional traceback whose byte framing is schema-defined and never
/// interpreted by this crate (spec §9, Open Question 2).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    #[serde(rename = "type")]
    pub type_: String,
    pub message: String,
    #[serde(with = "base64_bytes")]
    #[schemars(with = "String")]
    pub value: Vec<u8>,
    #[serde(default, with = "base64_bytes_opt")]
    #[schemars(with = "Option<String>")]
    pub traceback: Option<Vec<u8>>,
}

impl ErrorEnvelope {
    pub fn new(type_: impl Into<String>, message: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            type_: type_.into(),
            message: message.into(),
            value,
            traceback: None,
        }
    }

    pub fn with_traceback(mut self, traceback: Vec<u8>) -> Self {
        self.traceback = Some(traceback);
        self
    }
}

impl std::fmt::Display for ErrorEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.type_, self.message)
    }
}

/// Wire transport for byte blobs is base64 text, matching how the rest of
/// the stack (e.g. `connector-protocol`'s `RawValue`) keeps opaque payloads
/// legible in JSON rather than emitting raw bytes.
mod base64_bytes {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        base64::encode(bytes).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        base64::decode(&text).map_err(serde::de::Error::custom)
    }
}

mod base64_bytes_opt {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        bytes.as_ref().map(base64::encode).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let text: Option<String> = Option::deserialize(d)?;
        text.map(|t| base64::decode(&t).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn typed_envelope_round_trips_through_json() {
        let envelope = TypedEnvelope::new("dispatch.sdk.v1.pickled", vec![1, 2, 3, 0, 255]);
        let json = serde_json::to_string(&envelope).unwrap();
        let back: TypedEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(envelope, back);
    }

    #[test]
    fn error_envelope_round_trips_without_traceback() {
        let err = ErrorEnvelope::new("ValueError", "bad input", b"payload".to_vec());
        let json = serde_json::to_string(&err).unwrap();
        let back: ErrorEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(err, back);
        assert!(back.traceback.is_none());
    }

    #[test]
    fn error_envelope_round_trips_with_traceback() {
        let err = ErrorEnvelope::new("ValueError", "bad input", b"payload".to_vec())
            .with_traceback(b"frame1\nframe2".to_vec());
        let json = serde_json::to_string(&err).unwrap();
        let back: ErrorEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(err, back);
    }
}
