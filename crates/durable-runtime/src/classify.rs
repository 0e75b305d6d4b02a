//! Error classification (spec §7): maps a terminal `ErrorEnvelope` to the
//! `Status` the scheduler uses to decide whether to retry.
//!
//! The wire's `ErrorEnvelope` (spec §3) carries a type name, message, value
//! and traceback — no explicit transience bit. Spec §7 says a user error is
//! "classified as permanent unless the user explicitly tags it transient";
//! since there's no dedicated wire field for that tag, this port treats the
//! envelope's `type` as the tag: a small set of recognized type names (the
//! ones a user raises to ask for a retry) map to their matching transient
//! `Status`, and every other type name — including `"panic"` — is permanent.
//! This mirrors how real durable-execution SDKs ask for a retry by raising
//! a well-known exception type rather than setting a side channel.

use durable_proto::{ErrorEnvelope, Status};

pub fn classify(error: &ErrorEnvelope) -> Status {
    match error.type_.as_str() {
        "Timeout" => Status::Timeout,
        "Throttled" => Status::Throttled,
        "TemporaryError" => Status::TemporaryError,
        "DnsError" => Status::DnsError,
        "TcpError" => Status::TcpError,
        "TlsError" => Status::TlsError,
        "HttpError" => Status::HttpError,
        "InvalidArgument" => Status::InvalidArgument,
        "InvalidResponse" => Status::InvalidResponse,
        "Unauthenticated" => Status::Unauthenticated,
        "PermissionDenied" => Status::PermissionDenied,
        "NotFound" => Status::NotFound,
        _ => Status::PermanentError,
    }
}
