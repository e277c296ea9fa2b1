//! Shared-secret guard for the worker callback routes.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use brickyard_core::error::CoreError;
use subtle::ConstantTimeEq;

use crate::error::AppError;
use crate::state::AppState;

pub const INTERNAL_TOKEN_HEADER: &str = "x-internal-token";

/// A caller allowed to use the `/internal` routes.
///
/// Extraction succeeds when no token is configured, or when the
/// `X-Internal-Token` header matches the configured one.
#[derive(Debug, Clone, Copy)]
pub struct InternalCaller;

impl FromRequestParts<AppState> for InternalCaller {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.config.internal_api_token.as_deref() else {
            return Ok(InternalCaller);
        };

        let provided = parts
            .headers
            .get(INTERNAL_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AppError::Core(CoreError::Unauthorized(
                    "Missing X-Internal-Token header".into(),
                ))
            })?;

        if !tokens_match(provided.as_bytes(), expected.as_bytes()) {
            return Err(AppError::Core(CoreError::Unauthorized(
                "Invalid internal token".into(),
            )));
        }

        Ok(InternalCaller)
    }
}

/// Constant-time comparison of the full token bytes. Only the length
/// mismatch short-circuits.
fn tokens_match(provided: &[u8], expected: &[u8]) -> bool {
    bool::from(provided.ct_eq(expected))
}

#[cfg(test)]
mod tests {
    use super::tokens_match;

    #[test]
    fn token_comparison() {
        assert!(tokens_match(b"secret", b"secret"));
        assert!(!tokens_match(b"secret", b"secreT"));
        assert!(!tokens_match(b"secret", b"secret2"));
        assert!(!tokens_match(b"", b"secret"));
    }
}
