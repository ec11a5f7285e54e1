//! AuthDecision (C6): per-request orchestration — cache lookup, verify,
//! authorize, evaluate.

use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::cache::{CacheEntry, ExpiryCache};
use crate::clock::unix_now;
use crate::error::AuthError;
use crate::expr::{ExpressionEvaluator, Params};
use crate::policy::PolicyProjection;
use crate::token::Token;
use crate::verifier::TokenVerifier;

pub struct AuthDecision {
    jwt_cache: Arc<ExpiryCache<Token>>,
    verifier: Arc<TokenVerifier>,
    policy: Arc<PolicyProjection>,
    evaluator: Arc<ExpressionEvaluator>,
}

impl AuthDecision {
    pub fn new(
        jwt_cache: Arc<ExpiryCache<Token>>,
        verifier: Arc<TokenVerifier>,
        policy: Arc<PolicyProjection>,
        evaluator: Arc<ExpressionEvaluator>,
    ) -> Self {
        Self { jwt_cache, verifier, policy, evaluator }
    }

    /// Runs the full state machine for one request. `Ok(())` is ALLOW;
    /// `Err(AuthError)` is DENY (the caller logs and maps to `407`).
    pub fn decide(&self, bearer_token: &str, original_url: &str) -> Result<(), AuthError> {
        let parsed = url::Url::parse(original_url)
            .map_err(|e| AuthError::BadRequest { reason: e.to_string() })?;
        let host = parsed
            .host_str()
            .ok_or_else(|| AuthError::BadRequest { reason: "missing host in URL".to_string() })?
            .to_string();
        let audience = format!("{}://{}", parsed.scheme(), host);
        let path = parsed.path().to_string();

        let cache_key = cache_key_for(bearer_token, &audience);

        let token = self.identify(bearer_token, &audience, &cache_key)?;

        let bindings = self.policy.bindings_for(&token.email)?;

        let params = Params { path, host, time: unix_now() };
        evaluate_bindings(&self.evaluator, &bindings, &params)
    }

    fn identify(
        &self,
        bearer_token: &str,
        audience: &str,
        cache_key: &str,
    ) -> Result<Token, AuthError> {
        let now = unix_now();
        if let Some(entry) = self.jwt_cache.get(cache_key) {
            // Cache liveness caveat: only `exp > now` (strict) is accepted.
            if entry.exp > now {
                return Ok(entry.value);
            }
        }

        let token = self.verifier.verify(bearer_token, audience)?;

        // Schedule the cache write without blocking the response path.
        let cache = self.jwt_cache.clone();
        let key = cache_key.to_string();
        let exp = token.exp;
        let value = token.clone();
        std::thread::spawn(move || {
            cache.set(key, CacheEntry { value, exp });
        });

        Ok(token)
    }
}

fn cache_key_for(bearer_token: &str, audience: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bearer_token.as_bytes());
    hasher.update(b":");
    hasher.update(audience.as_bytes());
    hex::encode(hasher.finalize())
}

/// If exactly one binding is present with no expression, ALLOW. Otherwise,
/// per the documented AND-over-conditional-bindings semantics: unconditional
/// bindings among multiple do not short-circuit ALLOW; every conditional
/// binding present must evaluate to true, or the request is denied.
fn evaluate_bindings(
    evaluator: &ExpressionEvaluator,
    bindings: &[crate::policy::RoleBinding],
    params: &Params,
) -> Result<(), AuthError> {
    if bindings.is_empty() {
        return Err(AuthError::NotAuthorized { principal: String::new() });
    }

    if bindings.len() == 1 && bindings[0].expression.is_none() {
        return Ok(());
    }

    for binding in bindings {
        let Some(expression) = binding.expression.as_deref() else {
            continue;
        };
        let holds = evaluator.evaluate(expression, params, Some(binding.title.as_str()))?;
        if !holds {
            return Err(AuthError::ExpressionError {
                title: Some(binding.title.clone()),
                reason: "condition evaluated to false".to_string(),
            });
        }
    }

    Ok(())
}

/// Minimal hex encoding to avoid pulling in a dedicated crate for a
/// one-line operation already implied by `sha2`'s output type.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        use std::fmt::Write;
        let mut s = String::with_capacity(bytes.as_ref().len() * 2);
        for b in bytes.as_ref() {
            let _ = write!(s, "{b:02x}");
        }
        s
    }
}
