//! Arg/Result Boxing (spec §4.B): packages arbitrary language values into
//! the opaque [`TypedEnvelope`] the scheduler understands, and unboxes them
//! back. Preserves exceptions/panics as structured [`ErrorEnvelope`]s with
//! an optional traceback.

use durable_proto::{ErrorEnvelope, TypedEnvelope};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// The raw byte family carries integral protocol messages verbatim: its
/// `bytes` already are the wire-ready payload and boxing/unboxing is the
/// identity function.
pub const FAMILY_RAW: &str = "durable.sdk/raw";

/// The pickled-value family carries arbitrary application objects, encoded
/// as JSON. A real deployment might additionally support a language-native
/// pickle format; JSON is the portable baseline every client understands.
pub const FAMILY_PICKLE: &str = "durable.sdk/pickle+json";

#[derive(Debug, Error)]
pub enum BoxError {
    #[error("failed to box value: {0}")]
    Encode(#[source] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum UnboxError {
    #[error("failed to unbox value: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("envelope type_url {0:?} is not a recognized value family")]
    UnknownFamily(String),
}

/// Packages a serializable application value into a pickled-value envelope.
pub fn box_value<T: Serialize>(value: &T) -> Result<TypedEnvelope, BoxError> {
    let bytes = serde_json::to_vec(value).map_err(BoxError::Encode)?;
    Ok(TypedEnvelope::new(FAMILY_PICKLE, bytes))
}

/// Unboxes a pickled-value (or raw) envelope back into `T`.
pub fn unbox_value<T: DeserializeOwned>(envelope: &TypedEnvelope) -> Result<T, UnboxError> {
    match envelope.type_url.as_str() {
        FAMILY_PICKLE | FAMILY_RAW => {
            serde_json::from_slice(&envelope.bytes).map_err(UnboxError::Decode)
        }
        other => Err(UnboxError::UnknownFamily(other.to_string())),
    }
}

/// Wraps an opaque byte blob (e.g. an already-encoded protocol message)
/// as a raw-family envelope, with no further encoding.
pub fn box_raw(bytes: Vec<u8>) -> TypedEnvelope {
    TypedEnvelope::new(FAMILY_RAW, bytes)
}

/// Unwraps a raw-family envelope back to its bytes, verbatim.
pub fn unbox_raw(envelope: &TypedEnvelope) -> Result<Vec<u8>, UnboxError> {
    if envelope.type_url != FAMILY_RAW {
        return Err(UnboxError::UnknownFamily(envelope.type_url.clone()));
    }
    Ok(envelope.bytes.clone())
}

/// A user-raised or captured error, ahead of being boxed onto the wire.
///
/// `transient` lets user code override the default permanent classification
/// spec §7 assigns to user errors ("classified as permanent unless the user
/// explicitly tags it transient").
#[derive(Clone, Debug)]
pub struct UserError {
    pub type_name: String,
    pub message: String,
    pub value: serde_json::Value,
    pub transient: bool,
    pub traceback: Option<Vec<u8>>,
}

impl UserError {
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            type_name: type_name.into(),
            value: serde_json::Value::String(message.clone()),
            message,
            transient: false,
            traceback: None,
        }
    }

    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    pub fn with_traceback(mut self, traceback: impl Into<Vec<u8>>) -> Self {
        self.traceback = Some(traceback.into());
        self
    }
}

impl std::fmt::Display for UserError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)
    }
}

impl std::error::Error for UserError {}

/// Boxes a [`UserError`] into the wire's [`ErrorEnvelope`].
pub fn box_error(err: &UserError) -> Result<ErrorEnvelope, BoxError> {
    let value = serde_json::to_vec(&err.value).map_err(BoxError::Encode)?;
    let mut envelope = ErrorEnvelope::new(err.type_name.clone(), err.message.clone(), value);
    if let Some(traceback) = &err.traceback {
        envelope = envelope.with_traceback(traceback.clone());
    }
    Ok(envelope)
}

/// Boxes a caught Rust panic payload (as produced by `std::panic::catch_unwind`)
/// into an [`ErrorEnvelope`] with type name `"panic"`.
pub fn box_panic(payload: &(dyn std::any::Any + Send)) -> ErrorEnvelope {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    };
    let value = serde_json::to_vec(&message).unwrap_or_default();
    ErrorEnvelope::new("panic", message, value)
}

/// Unboxes an [`ErrorEnvelope`] back into a [`UserError`] for local
/// re-raising (used by the client-facing surface to reconstruct the
/// original exception shape).
pub fn unbox_error(envelope: &ErrorEnvelope) -> UserError {
    let value: serde_json::Value =
        serde_json::from_slice(&envelope.value).unwrap_or(serde_json::Value::Null);
    UserError {
        type_name: envelope.type_.clone(),
        message: envelope.message.clone(),
        value,
        transient: false,
        traceback: envelope.traceback.clone(),
    }
}
