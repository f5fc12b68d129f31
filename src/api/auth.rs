use axum::http::{header::AUTHORIZATION, HeaderMap};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{ExecutorError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Fixed message both sides are tagged over
const AUTH_CONTEXT: &[u8] = b"spot-executor/execute";

fn extract_bearer_token(raw: &str) -> Option<&str> {
    raw.strip_prefix("Bearer ")
        .or_else(|| raw.strip_prefix("bearer "))
        .map(str::trim)
}

fn tag(key: &str) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes()).ok()?;
    mac.update(AUTH_CONTEXT);
    Some(mac)
}

/// Compare a presented secret against the configured one in constant time.
pub fn secrets_match(provided: &str, expected: &str) -> bool {
    if expected.is_empty() || provided.is_empty() {
        return false;
    }
    let (Some(expected_mac), Some(provided_mac)) = (tag(expected), tag(provided)) else {
        return false;
    };
    let expected_tag = expected_mac.finalize().into_bytes();
    provided_mac.verify_slice(&expected_tag).is_ok()
}

/// Accept `Authorization: Bearer <secret>`, falling back to a body-level `secret`.
///
/// An unset configured secret rejects every request.
pub fn ensure_authorized(
    headers: &HeaderMap,
    body_secret: Option<&str>,
    expected: &str,
) -> Result<()> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(extract_bearer_token)
        .filter(|t| !t.is_empty())
        .or(body_secret.map(str::trim));

    match token {
        Some(token) if secrets_match(token, expected) => Ok(()),
        _ => Err(ExecutorError::Unauthorized("unauthorized".to_string())),
    }
}
