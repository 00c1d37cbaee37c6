//! Failure classification for key rotation
//!
//! Decides whether a failed provider call was the key's fault (quota spent,
//! rate limited, key revoked or invalid) or something a different key would
//! not fix (network, malformed request, provider outage). Structured signals
//! are consulted first; the message heuristic only runs when the error
//! carries no status code, canonical code or reason.

use crate::ProviderError;

/// Whether a failure should trigger key rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationClass {
    /// Quota, rate limit or credential problem: mark the key exhausted and retry
    Rotatable,
    /// Anything else: surface to the caller immediately
    NonRotatable,
}

/// HTTP statuses that point at the key itself.
const ROTATABLE_STATUSES: &[u16] = &[401, 403, 429];

/// Canonical status strings meaning quota exhaustion or credential rejection.
const ROTATABLE_CODES: &[&str] = &["RESOURCE_EXHAUSTED", "PERMISSION_DENIED", "UNAUTHENTICATED"];

/// Error-detail reasons meaning the key is unusable.
const ROTATABLE_REASONS: &[&str] = &["API_KEY_INVALID", "RATE_LIMIT_EXCEEDED", "API_KEY_EXPIRED"];

/// Message fragments checked when no structured signal exists (lowercase).
const ROTATABLE_MESSAGE_PATTERNS: &[&str] =
    &["429", "quota", "resource has been exhausted", "api key", "403"];

/// Classify a provider error.
pub fn classify(error: &ProviderError) -> RotationClass {
    match error {
        ProviderError::Upstream {
            status,
            code,
            reason,
            message,
        } => {
            if ROTATABLE_STATUSES.contains(status) {
                return RotationClass::Rotatable;
            }
            if let Some(code) = code
                && ROTATABLE_CODES.iter().any(|c| c.eq_ignore_ascii_case(code))
            {
                return RotationClass::Rotatable;
            }
            if let Some(reason) = reason
                && ROTATABLE_REASONS.iter().any(|r| r.eq_ignore_ascii_case(reason))
            {
                return RotationClass::Rotatable;
            }
            if code.is_some() || reason.is_some() {
                return RotationClass::NonRotatable;
            }
            classify_message(message)
        }
        ProviderError::Transport(_)
        | ProviderError::Timeout(_)
        | ProviderError::InvalidResponse(_) => RotationClass::NonRotatable,
        ProviderError::Other(message) => classify_message(message),
    }
}

/// Fallback heuristic over a free-text error message.
pub fn classify_message(message: &str) -> RotationClass {
    let lower = message.to_lowercase();
    if ROTATABLE_MESSAGE_PATTERNS
        .iter()
        .any(|pattern| lower.contains(pattern))
    {
        RotationClass::Rotatable
    } else {
        RotationClass::NonRotatable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn upstream(status: u16, code: Option<&str>, reason: Option<&str>, message: &str) -> ProviderError {
        ProviderError::Upstream {
            status,
            code: code.map(str::to_string),
            reason: reason.map(str::to_string),
            message: message.to_string(),
        }
    }

    #[test]
    fn status_429_rotates() {
        let err = upstream(429, Some("RESOURCE_EXHAUSTED"), None, "quota");
        assert_eq!(classify(&err), RotationClass::Rotatable);
    }

    #[test]
    fn status_403_rotates_without_code() {
        assert_eq!(classify(&upstream(403, None, None, "")), RotationClass::Rotatable);
    }

    #[test]
    fn status_401_rotates() {
        assert_eq!(
            classify(&upstream(401, Some("UNAUTHENTICATED"), None, "")),
            RotationClass::Rotatable
        );
    }

    #[test]
    fn invalid_key_reason_rotates_on_400() {
        let err = upstream(
            400,
            Some("INVALID_ARGUMENT"),
            Some("API_KEY_INVALID"),
            "API key not valid. Please pass a valid API key.",
        );
        assert_eq!(classify(&err), RotationClass::Rotatable);
    }

    #[test]
    fn resource_exhausted_code_rotates_regardless_of_status() {
        let err = upstream(400, Some("resource_exhausted"), None, "");
        assert_eq!(classify(&err), RotationClass::Rotatable);
    }

    #[test]
    fn structured_internal_error_does_not_consult_message() {
        // Message mentions a quota but the structured code says otherwise
        let err = upstream(500, Some("INTERNAL"), None, "quota service unavailable");
        assert_eq!(classify(&err), RotationClass::NonRotatable);
    }

    #[test]
    fn malformed_request_is_not_rotatable() {
        let err = upstream(400, Some("INVALID_ARGUMENT"), None, "contents is required");
        assert_eq!(classify(&err), RotationClass::NonRotatable);
    }

    #[test]
    fn unstructured_upstream_falls_back_to_message() {
        assert_eq!(
            classify(&upstream(400, None, None, "Quota exceeded for project")),
            RotationClass::Rotatable
        );
        assert_eq!(
            classify(&upstream(503, None, None, "overloaded")),
            RotationClass::NonRotatable
        );
    }

    #[test]
    fn transport_and_timeout_never_rotate() {
        assert_eq!(
            classify(&ProviderError::Transport("connection reset after 429 bytes".into())),
            RotationClass::NonRotatable
        );
        assert_eq!(
            classify(&ProviderError::Timeout(Duration::from_secs(1))),
            RotationClass::NonRotatable
        );
        assert_eq!(
            classify(&ProviderError::InvalidResponse("api key field missing".into())),
            RotationClass::NonRotatable
        );
    }

    #[test]
    fn message_fallback_patterns() {
        for message in [
            "got status 429 from upstream",
            "You exceeded your current QUOTA",
            "Resource has been exhausted (e.g. check quota).",
            "API key expired. Please renew the API key.",
            "HTTP 403 Forbidden",
        ] {
            assert_eq!(
                classify(&ProviderError::Other(message.into())),
                RotationClass::Rotatable,
                "message: {message}"
            );
        }
    }

    #[test]
    fn message_fallback_rejects_unrelated() {
        for message in ["fetch failed", "Internal error encountered.", ""] {
            assert_eq!(
                classify_message(message),
                RotationClass::NonRotatable,
                "message: {message}"
            );
        }
    }
}
