//! Static certs endpoint parsing: `{keyID -> PEM certificate}`, the shape
//! used by cloud-issued ID token certificate endpoints (as distinct from the
//! standard JWKS shape used for per-issuer JWKS URLs).

use std::collections::HashMap;

use jsonwebtoken::{Algorithm, DecodingKey};

use super::PublicKey;

pub fn parse_static_certs(body: &str) -> Result<HashMap<String, PublicKey>, String> {
    let raw: HashMap<String, String> = serde_json::from_str(body).map_err(|e| e.to_string())?;
    let mut out = HashMap::with_capacity(raw.len());
    for (kid, pem) in raw {
        let decoding_key =
            DecodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| e.to_string())?;
        out.insert(
            kid.clone(),
            PublicKey { key_id: kid, algorithm: Algorithm::RS256, decoding_key },
        );
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_object_body() {
        assert!(parse_static_certs("not json").is_err());
    }
}
