use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fixed issuer/audience the verifier insists on.
pub const TOKEN_ISSUER: &str = "tether";
pub const TOKEN_AUDIENCE: &str = "tether-clients";

pub const ACCESS_TOKEN_TTL_SECS: u64 = 15 * 60;
pub const REFRESH_TOKEN_TTL_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum AuthError {
    /// Malformed, expired, wrong-signature, wrong-issuer/audience, or
    /// wrong-class token. Deliberately a single variant: callers (and
    /// clients) must not learn which check failed.
    #[error("invalid token")]
    InvalidToken,
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub iss: String,
    pub aud: String,
    pub kind: TokenKind,
    pub exp: usize,
    pub iat: usize,
}

fn issue(
    user_id: &str,
    role: &str,
    kind: TokenKind,
    ttl_secs: u64,
    secret: &str,
) -> Result<String, AuthError> {
    let now = chrono::Utc::now().timestamp() as usize;
    let claims = Claims {
        sub: user_id.to_string(),
        role: role.to_string(),
        iss: TOKEN_ISSUER.to_string(),
        aud: TOKEN_AUDIENCE.to_string(),
        kind,
        iat: now,
        exp: now + ttl_secs as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AuthError::Internal(e.to_string()))
}

/// Short-lived credential presented at gateway handshake time.
pub fn issue_access(user_id: &str, role: &str, secret: &str) -> Result<String, AuthError> {
    issue(user_id, role, TokenKind::Access, ACCESS_TOKEN_TTL_SECS, secret)
}

/// Long-lived credential used solely to mint new access tokens.
pub fn issue_refresh(user_id: &str, role: &str, secret: &str) -> Result<String, AuthError> {
    issue(user_id, role, TokenKind::Refresh, REFRESH_TOKEN_TTL_SECS, secret)
}

fn verify(token: &str, kind: TokenKind, secret: &str) -> Result<Claims, AuthError> {
    let mut validation = Validation::default();
    validation.set_issuer(&[TOKEN_ISSUER]);
    validation.set_audience(&[TOKEN_AUDIENCE]);

    let claims = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|_| AuthError::InvalidToken)?;

    if claims.kind != kind {
        return Err(AuthError::InvalidToken);
    }
    Ok(claims)
}

pub fn verify_access(token: &str, secret: &str) -> Result<Claims, AuthError> {
    verify(token, TokenKind::Access, secret)
}

pub fn verify_refresh(token: &str, secret: &str) -> Result<Claims, AuthError> {
    verify(token, TokenKind::Refresh, secret)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn access_token_round_trips() {
        let token = issue_access("alice", "member", SECRET).expect("issue");
        let claims = verify_access(&token, SECRET).expect("verify");
        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.role, "member");
        assert_eq!(claims.iss, TOKEN_ISSUER);
        assert_eq!(claims.kind, TokenKind::Access);
    }

    #[test]
    fn refresh_token_never_verifies_as_access() {
        let token = issue_refresh("alice", "member", SECRET).expect("issue");
        assert!(matches!(
            verify_access(&token, SECRET),
            Err(AuthError::InvalidToken)
        ));
        assert!(verify_refresh(&token, SECRET).is_ok());
    }

    #[test]
    fn failures_collapse_to_a_single_error() {
        // Garbage, wrong secret, truncated: all the same opaque error.
        for bad in ["not-a-jwt", "", "a.b.c"] {
            assert!(matches!(
                verify_access(bad, SECRET),
                Err(AuthError::InvalidToken)
            ));
        }
        let token = issue_access("alice", "member", SECRET).unwrap();
        assert!(matches!(
            verify_access(&token, "other-secret"),
            Err(AuthError::InvalidToken)
        ));
    }
}
