//! Startup configuration.
//!
//! Everything is read once, from flags or the environment, into an immutable
//! [`Config`] that is shared with the rest of the app through `Arc`.

use clap::Parser;
use secrecy::SecretString;
use thiserror::Error;
use url::Url;

pub const DEFAULT_SCOPE: &str = "openid profile email offline_access read:current_user_expenses";

/// Minimum length of the session secret, the cookie signing key is derived from it.
pub const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Parser)]
#[command(
    name = "acme",
    version,
    about = "Expenses web app signing users in with OpenID Connect"
)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Public URL of this app, derived from the port when unset
    #[arg(long, env = "BASE_URL")]
    pub base_url: Option<String>,

    /// Base URL of the expenses API
    #[arg(long, env = "BACKEND_URL")]
    pub backend_url: String,

    /// OpenID Connect issuer, example: https://tenant.eu.auth0.com
    #[arg(long, env = "ISSUER_BASE_URL")]
    pub issuer_base_url: String,

    #[arg(long, env = "CLIENT_ID")]
    pub client_id: String,

    #[arg(long, env = "CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: String,

    /// Secret used to sign the session cookie
    #[arg(long, env = "SECRET", hide_env_values = true)]
    pub secret: String,

    /// Audience of the access token requested for the expenses API
    #[arg(long, env = "BACKEND_AUDIENCE")]
    pub audience: Option<String>,

    #[arg(long, env = "SCOPE", default_value = DEFAULT_SCOPE)]
    pub scope: String,

    #[arg(long, env = "CODESPACE_NAME", hide = true)]
    pub codespace_name: Option<String>,

    #[arg(long, env = "GITHUB_CODESPACES_PORT_FORWARDING_DOMAIN", hide = true)]
    pub codespaces_domain: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} is not a valid URL: {source}")]
    InvalidUrl {
        name: &'static str,
        #[source]
        source: url::ParseError,
    },

    #[error("{name} must use http or https, got {scheme}")]
    UnsupportedScheme { name: &'static str, scheme: String },

    #[error("SECRET must be at least {} bytes long", MIN_SECRET_LEN)]
    ShortSecret,

    #[error("CLIENT_ID must not be empty")]
    MissingClientId,
}

/// URLs are stored without a trailing slash.
#[derive(Debug)]
pub struct Config {
    pub port: u16,
    pub base_url: String,
    pub backend_url: String,
    pub issuer_base_url: String,
    pub client_id: String,
    pub client_secret: SecretString,
    pub secret: SecretString,
    pub audience: Option<String>,
    pub scope: String,
}

impl Config {
    pub fn expenses_url(&self) -> String {
        format!("{}/expenses", self.backend_url)
    }

    pub fn userinfo_url(&self) -> String {
        format!("{}/userinfo", self.issuer_base_url)
    }

    pub fn callback_url(&self) -> String {
        format!("{}/callback", self.base_url)
    }

    /// Whether cookies should be flagged `Secure`.
    pub fn is_https(&self) -> bool {
        self.base_url.starts_with("https://")
    }
}

impl TryFrom<Args> for Config {
    type Error = ConfigError;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        if args.secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::ShortSecret);
        }
        if args.client_id.trim().is_empty() {
            return Err(ConfigError::MissingClientId);
        }

        let base_url = match args.base_url.as_deref() {
            Some(url) if !url.trim().is_empty() => normalize_url("BASE_URL", url)?,
            _ => default_base_url(
                args.port,
                args.codespace_name.as_deref(),
                args.codespaces_domain.as_deref(),
            ),
        };

        Ok(Self {
            port: args.port,
            base_url,
            backend_url: normalize_url("BACKEND_URL", &args.backend_url)?,
            issuer_base_url: normalize_url("ISSUER_BASE_URL", &args.issuer_base_url)?,
            client_id: args.client_id,
            client_secret: SecretString::from(args.client_secret),
            secret: SecretString::from(args.secret),
            audience: args.audience.filter(|audience| !audience.is_empty()),
            scope: args.scope,
        })
    }
}

/// Local URL, or the forwarded URL when running inside a GitHub codespace.
fn default_base_url(port: u16, codespace: Option<&str>, domain: Option<&str>) -> String {
    match (codespace, domain) {
        (Some(name), Some(domain)) if !name.is_empty() && !domain.is_empty() => {
            format!("https://{name}-{port}.{domain}")
        }
        _ => format!("http://localhost:{port}"),
    }
}

fn normalize_url(name: &'static str, raw: &str) -> Result<String, ConfigError> {
    let url = Url::parse(raw.trim()).map_err(|source| ConfigError::InvalidUrl { name, source })?;
    match url.scheme() {
        "http" | "https" => Ok(raw.trim().trim_end_matches('/').to_string()),
        scheme => Err(ConfigError::UnsupportedScheme {
            name,
            scheme: scheme.to_string(),
        }),
    }
}
