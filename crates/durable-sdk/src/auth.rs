//! Inbound signature verification (spec §6's `verification_key` option):
//! when a scheduler's public key is configured, every RunRequest must
//! carry a valid signature over its method, path, headers, and body, or
//! it is rejected with UNAUTHENTICATED. Modeled on `agent::api::authorize`'s
//! `axum::middleware::from_fn_with_state` shape, swapping its JWT bearer
//! check for an RSA/SHA-256 request signature.

use axum::body::{to_bytes, Body};
use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use durable_proto::{CallResult, ErrorEnvelope, Exit, RunResponse, Status};
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::signature::Verifier;
use rsa::RsaPublicKey;
use sha2::Sha256;
use std::sync::Arc;

/// Header carrying the base64-encoded PKCS#1v1.5/SHA-256 signature.
pub const SIGNATURE_HEADER: &str = "x-signature";

/// A parsed `verification_key`, ready to check inbound signatures against.
#[derive(Clone)]
pub struct Verification {
    key: Arc<VerifyingKey<Sha256>>,
}

impl Verification {
    pub fn from_pem(pem: &str) -> Result<Self, rsa::pkcs8::spki::Error> {
        let public_key = RsaPublicKey::from_public_key_pem(pem)?;
        Ok(Self {
            key: Arc::new(VerifyingKey::new(public_key)),
        })
    }
}

/// Middleware rejecting any request that doesn't carry a valid signature.
/// A no-op when `verification` is `None` (spec §6: "when unset, signature
/// verification is skipped").
pub async fn verify_signature(
    State(verification): State<Option<Verification>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(verification) = verification else {
        return next.run(request).await;
    };

    let (parts, body) = request.into_parts();
    let body_bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => return unauthenticated("failed to read request body"),
    };

    let signed = parts
        .headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|header| {
            verify(&verification, parts.method.as_str(), &parts.uri.to_string(), &parts.headers, &body_bytes, header)
        });

    if !signed {
        return unauthenticated("missing or invalid request signature");
    }

    next.run(Request::from_parts(parts, Body::from(body_bytes))).await
}

fn verify(verification: &Verification, method: &str, path: &str, headers: &HeaderMap, body: &[u8], signature_header: &str) -> bool {
    let Ok(signature_bytes) = base64::decode(signature_header) else {
        return false;
    };
    let Ok(signature) = Signature::try_from(signature_bytes.as_slice()) else {
        return false;
    };
    let message = canonical_message(method, path, headers, body);
    verification.key.verify(&message, &signature).is_ok()
}

/// Builds the bytes a signer must have signed: method, path, every header
/// other than the signature itself (sorted for a deterministic order), and
/// the raw body, each separated by a newline.
pub(crate) fn canonical_message(method: &str, path: &str, headers: &HeaderMap, body: &[u8]) -> Vec<u8> {
    let mut lines: Vec<String> = headers
        .iter()
        .filter(|(name, _)| name.as_str() != SIGNATURE_HEADER)
        .filter_map(|(name, value)| value.to_str().ok().map(|v| format!("{}:{v}", name.as_str())))
        .collect();
    lines.sort();

    let mut message = format!("{method}\n{path}\n{}\n", lines.join("\n")).into_bytes();
    message.extend_from_slice(body);
    message
}

fn unauthenticated(message: &str) -> Response {
    let response = RunResponse::exit(
        Status::Unauthenticated,
        Exit::result(CallResult::err(0, ErrorEnvelope::new("Unauthenticated", message, vec![]))),
    );
    (StatusCode::OK, Json(response)).into_response()
}
