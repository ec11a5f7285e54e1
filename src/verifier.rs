//! TokenVerifier (C3): parse JWT, select key, verify signature + standard
//! claims.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{decode, Algorithm, Validation};
use serde::Deserialize;

use crate::clock::unix_now;
use crate::error::AuthError;
use crate::keys::JwkSource;
use crate::token::{classify, RawClaims, Token, TokenKindSerde};

/// Algorithms the verifier will accept regardless of what the source claims
/// to use — an explicit allowlist, not a trust-the-header decision.
const PERMITTED_ALGORITHMS: &[Algorithm] =
    &[Algorithm::RS256, Algorithm::RS384, Algorithm::RS512, Algorithm::ES256, Algorithm::ES384];

/// All fields optional: `jsonwebtoken::decode` only fails this struct on a
/// bad signature or unparseable JSON, never on an absent claim. Absence is
/// then classified explicitly as `BadClaims`/`BadAudience` below, instead of
/// collapsing into `BadSignature`.
#[derive(Deserialize)]
struct VerifiedClaims {
    aud: Option<String>,
    email: Option<String>,
    iat: Option<i64>,
    exp: Option<i64>,
}

pub struct TokenVerifier {
    jwk_source: Arc<JwkSource>,
    leeway_seconds: i64,
}

impl TokenVerifier {
    pub fn new(jwk_source: Arc<JwkSource>, leeway_seconds: i64) -> Self {
        Self { jwk_source, leeway_seconds }
    }

    pub fn verify(&self, raw_token: &str, expected_audience: &str) -> Result<Token, AuthError> {
        let header = jsonwebtoken::decode_header(raw_token)
            .map_err(|e| AuthError::MalformedToken { reason: e.to_string() })?;

        let claims = parse_claims_unverified(raw_token)?;
        let issuer = claims.iss.clone().ok_or_else(|| AuthError::BadClaims {
            reason: "missing iss claim".to_string(),
        })?;

        let kind = classify(&issuer);
        let key_id = header.kid.clone().ok_or_else(|| AuthError::UnverifiableToken {
            kid: None,
            source: issuer.clone(),
        })?;

        let public_key = self.jwk_source.key(kind.key_source_kind(), &issuer, &key_id)?;

        if !PERMITTED_ALGORITHMS.contains(&public_key.algorithm)
            || header.alg != public_key.algorithm
        {
            return Err(AuthError::BadSignature);
        }

        let mut validation = Validation::new(public_key.algorithm);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let decoded = decode::<VerifiedClaims>(raw_token, &public_key.decoding_key, &validation)
            .map_err(|_| AuthError::BadSignature)?;

        let now = unix_now();
        let claims = decoded.claims;

        let iat = claims
            .iat
            .ok_or_else(|| AuthError::BadClaims { reason: "missing iat claim".to_string() })?;
        let exp = claims
            .exp
            .ok_or_else(|| AuthError::BadClaims { reason: "missing exp claim".to_string() })?;
        let aud = claims
            .aud
            .ok_or_else(|| AuthError::BadClaims { reason: "missing aud claim".to_string() })?;
        let email = claims
            .email
            .ok_or_else(|| AuthError::BadClaims { reason: "missing email claim".to_string() })?;

        if iat > now + self.leeway_seconds {
            return Err(AuthError::BadClaims {
                reason: format!("iat {iat} is in the future beyond leeway"),
            });
        }
        if exp + self.leeway_seconds <= now {
            return Err(AuthError::ExpiredToken { exp, now });
        }
        if aud != expected_audience {
            return Err(AuthError::BadAudience {
                expected: expected_audience.to_string(),
                got: aud,
            });
        }
        if email.is_empty() {
            return Err(AuthError::BadClaims { reason: "empty email claim".to_string() });
        }

        Ok(Token {
            email,
            issuer,
            audience: aud,
            issued_at: iat,
            exp,
            key_id,
            kind: TokenKindSerde::from(kind),
        })
    }
}

/// Decodes the JWT payload segment without verifying the signature, to
/// classify the token and select a key source. Malformed shapes are rejected
/// here, before any cryptographic work is attempted.
fn parse_claims_unverified(raw_token: &str) -> Result<RawClaims, AuthError> {
    let mut parts = raw_token.split('.');
    let _header = parts.next().ok_or_else(|| AuthError::MalformedToken {
        reason: "missing header segment".to_string(),
    })?;
    let payload = parts.next().ok_or_else(|| AuthError::MalformedToken {
        reason: "missing payload segment".to_string(),
    })?;
    if parts.next().is_none() {
        return Err(AuthError::MalformedToken { reason: "missing signature segment".to_string() });
    }

    let decoded = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| AuthError::MalformedToken { reason: e.to_string() })?;
    serde_json::from_slice(&decoded)
        .map_err(|e| AuthError::MalformedToken { reason: e.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_token_without_three_segments_is_rejected() {
        let err = parse_claims_unverified("only.two").unwrap_err();
        assert!(matches!(err, AuthError::MalformedToken { .. }));
    }
}
