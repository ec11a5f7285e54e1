use thiserror::Error;

/// Internal error taxonomy for the decision pipeline. Never serialized into a
/// response body; `http::respond` collapses every variant to `407`.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("malformed token: {reason}")]
    MalformedToken { reason: String },

    #[error("unverifiable token: no key for kid={kid:?} in source {source}")]
    UnverifiableToken { kid: Option<String>, source: String },

    #[error("bad signature")]
    BadSignature,

    #[error("token expired: exp={exp} now={now}")]
    ExpiredToken { exp: i64, now: i64 },

    #[error("audience mismatch: expected={expected} got={got}")]
    BadAudience { expected: String, got: String },

    #[error("bad claims: {reason}")]
    BadClaims { reason: String },

    #[error("policy projection unavailable")]
    PolicyUnavailable,

    #[error("principal {principal} has no bindings for the required role")]
    NotAuthorized { principal: String },

    #[error("bad expression in binding {title:?}: {reason}")]
    BadExpression { title: Option<String>, reason: String },

    #[error("expression evaluation error in binding {title:?}: {reason}")]
    ExpressionError { title: Option<String>, reason: String },

    #[error("key source unavailable: {source}")]
    KeySourceUnavailable { source: String },

    #[error("malformed request: {reason}")]
    BadRequest { reason: String },
}

impl AuthError {
    /// Correlation fields logged alongside every denial, per the documented
    /// error-handling design: principal (when known), audience, and binding
    /// title on expression failures.
    pub fn log(&self, principal: Option<&str>, audience: Option<&str>) {
        match self {
            AuthError::MalformedToken { reason } => {
                tracing::debug!(principal, audience, reason, "malformed token");
            }
            AuthError::UnverifiableToken { kid, source } => {
                tracing::debug!(principal, audience, ?kid, source, "unverifiable token");
            }
            AuthError::BadSignature => {
                tracing::debug!(principal, audience, "bad signature");
            }
            AuthError::ExpiredToken { exp, now } => {
                tracing::debug!(principal, audience, exp, now, "expired token");
            }
            AuthError::BadAudience { expected, got } => {
                tracing::debug!(principal, audience, expected, got, "audience mismatch");
            }
            AuthError::BadClaims { reason } => {
                tracing::debug!(principal, audience, reason, "bad claims");
            }
            AuthError::PolicyUnavailable => {
                tracing::warn!(principal, audience, "policy projection unavailable");
            }
            AuthError::NotAuthorized { principal } => {
                tracing::warn!(principal, audience, "no bindings for principal");
            }
            AuthError::BadExpression { title, reason } => {
                tracing::warn!(principal, audience, ?title, reason, "bad expression");
            }
            AuthError::ExpressionError { title, reason } => {
                tracing::warn!(principal, audience, ?title, reason, "expression evaluation error");
            }
            AuthError::KeySourceUnavailable { source } => {
                tracing::warn!(principal, audience, source, "key source unavailable");
            }
            AuthError::BadRequest { reason } => {
                tracing::debug!(principal, audience, reason, "bad request");
            }
        }
    }
}

/// Background-refresh failures never propagate to the request path; they are
/// logged and the previous snapshot/key-set is retained. `Clone` so a single
/// fetch result can be broadcast to every caller waiting on the same
/// single-flight key.
#[derive(Debug, Clone, Error)]
pub enum TransientFetchError {
    #[error("fetch of {url} failed: {reason}")]
    Fetch { url: String, reason: String },
}
