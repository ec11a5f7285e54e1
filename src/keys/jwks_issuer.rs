//! Per-issuer JWKS parsing and URL convention.
//!
//! Self-signed service-account JWTs carry an `iss` claim that is the service
//! account's email address; the JWKS URL is derived from it by a documented
//! convention (mirrors the GCP IAM service-account JWKS endpoint shape).

use std::collections::HashMap;

use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;

use super::PublicKey;

pub struct GoogleJwksUrlConvention;

impl GoogleJwksUrlConvention {
    pub fn jwks_url_for(&self, issuer: &str) -> String {
        format!("https://www.googleapis.com/service_accounts/v1/jwk/{issuer}")
    }
}

#[derive(Deserialize)]
struct Jwks {
    keys: Vec<Jwk>,
}

#[derive(Deserialize)]
struct Jwk {
    kid: String,
    kty: String,
    alg: Option<String>,
    #[serde(rename = "n")]
    rsa_n: Option<String>,
    #[serde(rename = "e")]
    rsa_e: Option<String>,
    crv: Option<String>,
    x: Option<String>,
    y: Option<String>,
}

pub fn parse_jwks(body: &str) -> Result<HashMap<String, PublicKey>, String> {
    let jwks: Jwks = serde_json::from_str(body).map_err(|e| e.to_string())?;
    let mut out = HashMap::with_capacity(jwks.keys.len());
    for jwk in jwks.keys {
        let public_key = match jwk.kty.as_str() {
            "RSA" => {
                let n = jwk.rsa_n.as_deref().ok_or("missing RSA modulus")?;
                let e = jwk.rsa_e.as_deref().ok_or("missing RSA exponent")?;
                let decoding_key =
                    DecodingKey::from_rsa_components(n, e).map_err(|e| e.to_string())?;
                let algorithm = match jwk.alg.as_deref() {
                    Some("RS384") => Algorithm::RS384,
                    Some("RS512") => Algorithm::RS512,
                    _ => Algorithm::RS256,
                };
                PublicKey { key_id: jwk.kid.clone(), algorithm, decoding_key }
            }
            "EC" => {
                let x = jwk.x.as_deref().ok_or("missing EC x")?;
                let y = jwk.y.as_deref().ok_or("missing EC y")?;
                let decoding_key = DecodingKey::from_ec_components(x, y).map_err(|e| e.to_string())?;
                let algorithm = match jwk.crv.as_deref() {
                    Some("P-384") => Algorithm::ES384,
                    _ => Algorithm::ES256,
                };
                PublicKey { key_id: jwk.kid.clone(), algorithm, decoding_key }
            }
            other => return Err(format!("unsupported key type: {other}")),
        };
        out.insert(jwk.kid, public_key);
    }
    Ok(out)
}
