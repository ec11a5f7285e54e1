//! JWKSource (C2): fetch, parse and rotate signing keys from two distinct
//! source kinds — a fixed static-certs endpoint and per-issuer JWKS URLs
//! derived from the token's issuer claim.

mod jwks_issuer;
mod static_certs;

pub use jwks_issuer::GoogleJwksUrlConvention;
pub use static_certs::parse_static_certs;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use jsonwebtoken::{Algorithm, DecodingKey};

use crate::cache::{CacheEntry, ExpiryCache};
use crate::clock::unix_now;
use crate::error::{AuthError, TransientFetchError};
use crate::singleflight::SingleFlight;

/// `(keyID, algorithm, keyMaterial)`. Keys are immutable once stored;
/// rotation replaces the whole map for a source, never mutates an entry.
#[derive(Clone)]
pub struct PublicKey {
    pub key_id: String,
    pub algorithm: Algorithm,
    pub decoding_key: DecodingKey,
}

/// Tagged variant over key-source kinds, avoiding an inheritance hierarchy
/// per the documented design notes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeySourceKind {
    StaticCerts,
    JwksPerIssuer,
}

/// Fetches raw key material for a source. Implemented by `ReqwestKeyFetcher`
/// in production; test doubles substitute a fixed map.
pub trait KeyFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<HashMap<String, PublicKey>, TransientFetchError>;

    /// Same as `fetch`, but also returns a cache lifetime derived from
    /// transport `Cache-Control: max-age=`, when the transport exposes one.
    /// Defaults to `None`, meaning "use the configured default TTL".
    fn fetch_with_ttl(
        &self,
        url: &str,
    ) -> Result<(HashMap<String, PublicKey>, Option<i64>), TransientFetchError> {
        Ok((self.fetch(url)?, None))
    }
}

/// Default `KeyFetcher` wired over `reqwest::blocking`, matching the
/// teacher's outbound-HTTP stack. Understands both the PEM-certificate-map
/// shape used by `static-certs-endpoint` sources and the standard JWKS JSON
/// shape used by `jwks-per-issuer` sources.
pub struct ReqwestKeyFetcher {
    client: reqwest::blocking::Client,
}

impl Default for ReqwestKeyFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ReqwestKeyFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_else(|_| reqwest::blocking::Client::new()),
        }
    }

}

impl KeyFetcher for ReqwestKeyFetcher {
    fn fetch(&self, url: &str) -> Result<HashMap<String, PublicKey>, TransientFetchError> {
        self.fetch_with_ttl(url).map(|(keys, _ttl)| keys)
    }

    fn fetch_with_ttl(
        &self,
        url: &str,
    ) -> Result<(HashMap<String, PublicKey>, Option<i64>), TransientFetchError> {
        let resp = self.client.get(url).send().and_then(|r| r.error_for_status()).map_err(|e| {
            TransientFetchError::Fetch { url: url.to_string(), reason: e.to_string() }
        })?;
        let ttl = max_age_from_cache_control(resp.headers());
        let body = resp
            .text()
            .map_err(|e| TransientFetchError::Fetch { url: url.to_string(), reason: e.to_string() })?;

        // Try the standard JWKS shape first; fall back to the PEM-cert-map
        // shape used by the GCP-style static certs endpoint.
        let keys = match jwks_issuer::parse_jwks(&body) {
            Ok(keys) => keys,
            Err(_) => static_certs::parse_static_certs(&body).map_err(|reason| {
                TransientFetchError::Fetch { url: url.to_string(), reason }
            })?,
        };
        Ok((keys, ttl))
    }
}

fn max_age_from_cache_control(headers: &reqwest::header::HeaderMap) -> Option<i64> {
    let value = headers.get(reqwest::header::CACHE_CONTROL)?.to_str().ok()?;
    value.split(',').find_map(|directive| {
        let directive = directive.trim();
        directive.strip_prefix("max-age=").and_then(|n| n.parse::<i64>().ok())
    })
}

/// Orchestrates both source kinds behind one capability: `Key(identifier, keyID)`.
pub struct JwkSource {
    static_certs_url: String,
    static_keys: ArcSwap<HashMap<String, PublicKey>>,
    per_issuer_cache: Arc<ExpiryCache<HashMap<String, PublicKey>>>,
    per_issuer_default_ttl: i64,
    fetcher: Arc<dyn KeyFetcher>,
    issuer_url_convention: GoogleJwksUrlConvention,
    single_flight: SingleFlight<Result<(HashMap<String, PublicKey>, Option<i64>), TransientFetchError>>,
}

impl JwkSource {
    pub fn new(
        static_certs_url: String,
        fetcher: Arc<dyn KeyFetcher>,
        per_issuer_default_ttl: i64,
    ) -> Self {
        Self {
            static_certs_url,
            static_keys: ArcSwap::from_pointee(HashMap::new()),
            per_issuer_cache: ExpiryCache::new(),
            per_issuer_default_ttl,
            fetcher,
            issuer_url_convention: GoogleJwksUrlConvention,
            single_flight: SingleFlight::new(),
        }
    }

    /// Re-fetches the static-certs endpoint and atomically swaps the key map.
    /// On fetch failure, the previous map is retained and the failure logged
    /// — it never propagates to the request path.
    pub fn refresh_static(&self) {
        match self.fetcher.fetch(&self.static_certs_url) {
            Ok(keys) => {
                tracing::debug!(count = keys.len(), "static certs refreshed");
                self.static_keys.store(Arc::new(keys));
            }
            Err(err) => {
                tracing::warn!(error = %err, "static certs refresh failed, retaining previous set");
            }
        }
    }

    /// `Keys(StaticCerts, _)`: return the current set (refreshed by the
    /// background task, not on this path).
    pub fn static_keys(&self) -> Arc<HashMap<String, PublicKey>> {
        self.static_keys.load_full()
    }

    /// `Keys(JwksPerIssuer, issuer)`: return the current set, fetching on a
    /// cold/stale cache. Concurrent misses for the same issuer collapse to a
    /// single in-flight fetch; every caller — leader and waiters alike —
    /// receives the same fetched result from `SingleFlight::run` and writes
    /// it to the cache itself, so nobody can observe a woken waiter racing
    /// ahead of the cache write.
    pub fn issuer_keys(&self, issuer: &str) -> Result<HashMap<String, PublicKey>, AuthError> {
        let now = unix_now();
        if let Some(entry) = self.per_issuer_cache.get(issuer) {
            if entry.exp > now {
                return Ok(entry.value);
            }
        }

        let url = self.issuer_url_convention.jwks_url_for(issuer);
        let fetched = self.single_flight.run(issuer, || self.fetcher.fetch_with_ttl(&url));

        match fetched {
            Some(Ok((keys, ttl))) => {
                let exp = now + ttl.unwrap_or(self.per_issuer_default_ttl);
                self.per_issuer_cache
                    .set(issuer.to_string(), CacheEntry { value: keys.clone(), exp });
                Ok(keys)
            }
            Some(Err(err)) => {
                tracing::warn!(issuer, error = %err, "jwks fetch failed for issuer");
                Err(AuthError::KeySourceUnavailable { source: issuer.to_string() })
            }
            None => {
                // The flight timed out without a result ever being published
                // (the leader is still stuck fetching). Fall back to
                // whatever the cache holds, stale or not; there is nothing
                // fresher to report.
                match self.per_issuer_cache.get(issuer) {
                    Some(entry) if entry.exp > now => Ok(entry.value),
                    _ => Err(AuthError::KeySourceUnavailable { source: issuer.to_string() }),
                }
            }
        }
    }

    pub fn key(
        &self,
        kind: KeySourceKind,
        identifier: &str,
        key_id: &str,
    ) -> Result<PublicKey, AuthError> {
        let keys = match kind {
            KeySourceKind::StaticCerts => (*self.static_keys()).clone(),
            KeySourceKind::JwksPerIssuer => self.issuer_keys(identifier)?,
        };
        keys.get(key_id).cloned().ok_or_else(|| AuthError::UnverifiableToken {
            kid: Some(key_id.to_string()),
            source: identifier.to_string(),
        })
    }

    pub fn sweep_issuer_cache(&self, now: i64) {
        self.per_issuer_cache.sweep(now);
    }
}
