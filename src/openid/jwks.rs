use jsonwebtoken::{jwk, jwk::AlgorithmParameters, DecodingKey};
use std::collections::HashMap;

use super::OidcError;

/// Provider signing keys by `kid`.
pub type Keys = HashMap<String, DecodingKey>;

pub async fn decoding_keys(http: &reqwest::Client, jwks_uri: &str) -> Result<Keys, OidcError> {
    let jwks = http
        .get(jwks_uri)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(OidcError::Jwks)?
        .json::<jwk::JwkSet>()
        .await
        .map_err(OidcError::Jwks)?;
    Ok(jwks_to_decoding_keys(&jwks))
}

fn jwks_to_decoding_keys(jwks: &jwk::JwkSet) -> Keys {
    let mut hm = HashMap::new();
    for jwk in &jwks.keys {
        let decoding_key = match jwk.algorithm {
            AlgorithmParameters::RSA(ref rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e),
            AlgorithmParameters::EllipticCurve(ref ec) => {
                DecodingKey::from_ec_components(&ec.x, &ec.y)
            }
            _ => continue,
        };
        if let (Ok(decoding_key), Some(kid)) = (decoding_key, jwk.common.key_id.clone()) {
            hm.insert(kid, decoding_key);
        }
    }
    hm
}
