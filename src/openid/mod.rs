//! Minimal OpenID Connect relying party: authorization code login against
//! one discovered provider.

use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::{header, StatusCode};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::Value;
use std::{
    sync::{Arc, RwLock},
    time::{SystemTime, UNIX_EPOCH},
};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use crate::{
    auth::{AccessToken, AuthRequest, OidcSession, ReturnTo, TokenSet, UserProfile},
    config::Config,
};

mod jwks;

const WELL_KNOWN: &str = ".well-known/openid-configuration";

#[derive(Debug, Error)]
pub enum OidcError {
    #[error("OpenID configuration not available: {0}")]
    Discovery(#[source] reqwest::Error),

    #[error("JWKS not available: {0}")]
    Jwks(#[source] reqwest::Error),

    #[error("signing key cache is poisoned")]
    KeyStore,

    #[error("token request failed: {0}")]
    TokenRequest(#[source] reqwest::Error),

    #[error("token endpoint returned {status}: {body}")]
    TokenEndpoint { status: StatusCode, body: String },

    #[error("token response has no id_token")]
    MissingIdToken,

    #[error("ID token signed with unknown key {0:?}")]
    UnknownKey(Option<String>),

    #[error("invalid ID token: {0}")]
    InvalidIdToken(#[from] jsonwebtoken::errors::Error),

    #[error("ID token nonce does not match the login request")]
    NonceMismatch,

    #[error("invalid provider endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    pub end_session_endpoint: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "bearer")]
    token_type: String,
    expires_in: Option<u64>,
    id_token: Option<String>,
    refresh_token: Option<String>,
}

fn bearer() -> String {
    "Bearer".to_string()
}

pub struct IdentityProvider {
    http: reqwest::Client,
    config: Arc<Config>,
    metadata: ProviderMetadata,
    keys: RwLock<jwks::Keys>,
}

impl IdentityProvider {
    /// Loads the provider metadata and signing keys of `config.issuer_base_url`.
    pub async fn discover(http: reqwest::Client, config: Arc<Config>) -> Result<Self, OidcError> {
        let uri = format!("{}/{WELL_KNOWN}", config.issuer_base_url);
        let metadata = http
            .get(&uri)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(OidcError::Discovery)?
            .json::<ProviderMetadata>()
            .await
            .map_err(OidcError::Discovery)?;
        let keys = jwks::decoding_keys(&http, &metadata.jwks_uri).await?;
        tracing::info!(
            "OpenID provider {} discovered, {} signing keys",
            metadata.issuer,
            keys.len()
        );

        Ok(Self {
            http,
            config,
            metadata,
            keys: RwLock::new(keys),
        })
    }

    /// URL of the provider's login page and the request to remember until the callback.
    pub fn authorization_request(
        &self,
        return_to: ReturnTo,
    ) -> Result<(String, AuthRequest), OidcError> {
        let request = AuthRequest {
            state: random_token(),
            nonce: random_token(),
            return_to,
        };

        let mut url = Url::parse(&self.metadata.authorization_endpoint)?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.config.client_id)
                .append_pair("redirect_uri", &self.config.callback_url())
                .append_pair("scope", &self.config.scope)
                .append_pair("state", &request.state)
                .append_pair("nonce", &request.nonce);
            if let Some(audience) = &self.config.audience {
                query.append_pair("audience", audience);
            }
        }

        Ok((url.to_string(), request))
    }

    /// Exchanges the authorization code and verifies the ID token.
    pub async fn complete_login(&self, code: &str, nonce: &str) -> Result<OidcSession, OidcError> {
        let tokens = self.exchange_code(code).await?;
        let id_token = tokens.id_token.ok_or(OidcError::MissingIdToken)?;
        let user = self.verify_id_token(&id_token, nonce).await?;

        Ok(OidcSession {
            user: Some(user),
            tokens: Some(TokenSet {
                access_token: AccessToken {
                    access_token: tokens.access_token,
                    token_type: tokens.token_type,
                    expires_at: tokens.expires_in.map(|seconds| unix_now() + seconds),
                },
                id_token,
                refresh_token: tokens.refresh_token,
            }),
        })
    }

    /// Where to send the browser after the local session is gone.
    pub fn logout_url(&self, id_token: Option<&str>) -> Result<String, OidcError> {
        let Some(endpoint) = &self.metadata.end_session_endpoint else {
            return Ok("/".to_string());
        };

        let mut url = Url::parse(endpoint)?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.config.client_id)
                .append_pair("post_logout_redirect_uri", &self.config.base_url);
            if let Some(id_token) = id_token {
                query.append_pair("id_token_hint", id_token);
            }
        }
        Ok(url.to_string())
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenResponse, OidcError> {
        let redirect_uri = self.config.callback_url();
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.expose_secret()),
        ];

        let response = self
            .http
            .post(&self.metadata.token_endpoint)
            .header(header::ACCEPT, "application/json")
            .form(&params)
            .send()
            .await
            .map_err(OidcError::TokenRequest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OidcError::TokenEndpoint { status, body });
        }
        response.json().await.map_err(OidcError::TokenRequest)
    }

    async fn verify_id_token(&self, id_token: &str, nonce: &str) -> Result<UserProfile, OidcError> {
        let header = decode_header(id_token)?;
        let key = match header.alg {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
                DecodingKey::from_secret(self.config.client_secret.expose_secret().as_bytes())
            }
            _ => self.signing_key(header.kid.as_deref()).await?,
        };

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[&self.metadata.issuer]);
        validation.set_audience(&[&self.config.client_id]);
        let claims = decode::<UserProfile>(id_token, &key, &validation)
            .map_err(|e| {
                tracing::debug!("{:?}", e);
                e
            })?
            .claims;

        if claims.get("nonce").and_then(Value::as_str) != Some(nonce) {
            return Err(OidcError::NonceMismatch);
        }
        Ok(claims)
    }

    /// Key for `kid`, refreshing the JWKS once when the key is not known yet.
    async fn signing_key(&self, kid: Option<&str>) -> Result<DecodingKey, OidcError> {
        let kid = kid.ok_or(OidcError::UnknownKey(None))?;
        if let Some(key) = self.cached_key(kid)? {
            return Ok(key);
        }

        self.update_jwks().await?;
        self.cached_key(kid)?
            .ok_or_else(|| OidcError::UnknownKey(Some(kid.to_string())))
    }

    fn cached_key(&self, kid: &str) -> Result<Option<DecodingKey>, OidcError> {
        let keys = self.keys.read().map_err(|_| OidcError::KeyStore)?;
        Ok(keys.get(kid).cloned())
    }

    async fn update_jwks(&self) -> Result<(), OidcError> {
        let new_keys = jwks::decoding_keys(&self.http, &self.metadata.jwks_uri).await?;
        let mut keys = self.keys.write().map_err(|_| OidcError::KeyStore)?;
        *keys = new_keys;
        tracing::debug!("jwks updated");
        Ok(())
    }
}

fn random_token() -> String {
    Uuid::new_v4().simple().to_string()
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}
