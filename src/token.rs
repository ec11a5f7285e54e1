//! The semantic projection of a validated JWT (C3's output type).

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::keys::KeySourceKind;

/// Matches an `iss` shaped like an email-style service-account identity
/// (`local-part@domain`), as opposed to a URL-shaped cloud issuer.
static SERVICE_ACCOUNT_ISSUER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static pattern is valid"));

/// Which kind of token this was classified as, which in turn selected the
/// key source used to verify it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    CloudIssuedIdToken,
    SelfSignedServiceAccount,
}

impl TokenKind {
    pub fn key_source_kind(self) -> KeySourceKind {
        match self {
            TokenKind::CloudIssuedIdToken => KeySourceKind::StaticCerts,
            TokenKind::SelfSignedServiceAccount => KeySourceKind::JwksPerIssuer,
        }
    }
}

/// Verified token: subject email, issuer, audience, issued-at, expiry,
/// key-id, and the source-kind tag.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Token {
    pub email: String,
    pub issuer: String,
    pub audience: String,
    pub issued_at: i64,
    pub exp: i64,
    pub key_id: String,
    pub kind: TokenKindSerde,
}

/// `TokenKind` is not itself (de)serializable without extra ceremony; this
/// mirrors it 1:1 for the cache-entry representation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenKindSerde {
    CloudIssuedIdToken,
    SelfSignedServiceAccount,
}

impl From<TokenKind> for TokenKindSerde {
    fn from(k: TokenKind) -> Self {
        match k {
            TokenKind::CloudIssuedIdToken => TokenKindSerde::CloudIssuedIdToken,
            TokenKind::SelfSignedServiceAccount => TokenKindSerde::SelfSignedServiceAccount,
        }
    }
}

/// Unverified claims, read only to classify the token and select a key —
/// never trusted before signature verification.
#[derive(Clone, Debug, Deserialize)]
pub struct RawClaims {
    pub iss: Option<String>,
    pub aud: Option<String>,
    pub email: Option<String>,
    pub iat: Option<i64>,
    pub exp: Option<i64>,
}

/// An `iss` shaped like a service-account identity (`...@...iam.gserviceaccount.com`
/// or any `local@domain` email) selects the per-issuer JWKS source; anything
/// else (e.g. `https://accounts.google.com`) is treated as a cloud-issued ID
/// token and selects the static certs source.
pub fn classify(issuer: &str) -> TokenKind {
    if SERVICE_ACCOUNT_ISSUER.is_match(issuer) {
        TokenKind::SelfSignedServiceAccount
    } else {
        TokenKind::CloudIssuedIdToken
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_account_email_classifies_as_self_signed() {
        assert_eq!(
            classify("svc@my-project.iam.gserviceaccount.com"),
            TokenKind::SelfSignedServiceAccount
        );
    }

    #[test]
    fn url_issuer_classifies_as_cloud_issued() {
        assert_eq!(classify("https://accounts.google.com"), TokenKind::CloudIssuedIdToken);
    }

    #[test]
    fn bare_at_sign_without_a_domain_is_not_a_service_account() {
        assert_eq!(classify("weird@issuer"), TokenKind::CloudIssuedIdToken);
    }
}
