//! Google OAuth2 credentials for Earth Engine.
//!
//! A service account key is exchanged for a short-lived access token with
//! the JWT bearer grant (RFC 7523). The token is cached and exchanged again
//! shortly before it expires. A fixed token read from a file overrides the
//! service account when configured.

use std::path::Path;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{
    EarthEngineConfig, EarthEngineError,
    retry::{self, RetryPolicy},
};

/// Scopes requested for Earth Engine access.
pub const EARTH_ENGINE_SCOPES: &str =
    "https://www.googleapis.com/auth/earthengine https://www.googleapis.com/auth/cloud-platform";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime requested for each signed assertion. Google caps it at an hour.
const ASSERTION_LIFETIME_SECS: u64 = 3600;

/// Tokens are exchanged again once they are this close to expiring.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// The parts of a Google service account JSON key used for the JWT grant.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    /// Account the assertion is issued by.
    pub client_email: String,
    /// PEM-encoded RSA private key.
    pub private_key: String,
    /// OAuth2 token endpoint.
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

impl ServiceAccountKey {
    /// Reads a service account JSON key file.
    ///
    /// # Errors
    ///
    /// Returns [`EarthEngineError::Auth`] if the file cannot be read and
    /// [`EarthEngineError::Json`] if it is not a service account key.
    pub fn from_file(path: &Path) -> Result<Self, EarthEngineError> {
        let text = std::fs::read_to_string(path).map_err(|e| EarthEngineError::Auth {
            message: format!("cannot read service account key {}: {e}", path.display()),
        })?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

const fn default_expires_in() -> u64 {
    ASSERTION_LIFETIME_SECS
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Access tokens for a service account, exchanged on demand and cached.
pub struct ServiceAccountAuth {
    key: ServiceAccountKey,
    signing_key: EncodingKey,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountAuth {
    /// Prepares the signing key of `key`.
    ///
    /// # Errors
    ///
    /// Returns [`EarthEngineError::Auth`] if the private key is not a valid
    /// RSA PEM key.
    pub fn new(key: ServiceAccountKey) -> Result<Self, EarthEngineError> {
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes()).map_err(|e| {
            EarthEngineError::Auth {
                message: format!("invalid private key for {}: {e}", key.client_email),
            }
        })?;
        Ok(Self {
            key,
            signing_key,
            cached: Mutex::new(None),
        })
    }

    /// Returns a cached token, or exchanges a new assertion when there is
    /// none or it is about to expire.
    ///
    /// Concurrent callers wait for a single exchange.
    ///
    /// # Errors
    ///
    /// Returns [`EarthEngineError`] if signing or the token exchange fails.
    pub async fn access_token(
        &self,
        http: &reqwest::Client,
        policy: RetryPolicy,
    ) -> Result<String, EarthEngineError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| Instant::now() < t.refresh_at) {
            return Ok(token.value.clone());
        }

        log::debug!(
            "Exchanging service account assertion for {} at {}",
            self.key.client_email,
            self.key.token_uri
        );
        let assertion = self.assertion()?;
        let params = [
            ("grant_type", JWT_BEARER_GRANT),
            ("assertion", assertion.as_str()),
        ];
        let body =
            retry::send_json(|| http.post(&self.key.token_uri).form(&params), policy).await?;
        let response: TokenResponse = serde_json::from_value(body)?;

        let lifetime = Duration::from_secs(response.expires_in);
        log::debug!("Obtained access token valid for {lifetime:?}");
        let token = CachedToken {
            refresh_at: Instant::now() + lifetime.saturating_sub(REFRESH_MARGIN),
            value: response.access_token,
        };
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    fn assertion(&self) -> Result<String, EarthEngineError> {
        let iat = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| EarthEngineError::Auth {
                message: format!("system clock is before the Unix epoch: {e}"),
            })?
            .as_secs();
        let claims = Claims {
            iss: &self.key.client_email,
            scope: EARTH_ENGINE_SCOPES,
            aud: &self.key.token_uri,
            iat,
            exp: iat + ASSERTION_LIFETIME_SECS,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key).map_err(
            |e| EarthEngineError::Auth {
                message: format!("cannot sign assertion: {e}"),
            },
        )
    }
}

/// How requests to Earth Engine are authorized.
pub enum Credentials {
    /// A fixed bearer token. Not refreshed.
    AccessToken(String),
    /// A service account whose tokens are exchanged and refreshed.
    ServiceAccount(ServiceAccountAuth),
}

impl Credentials {
    /// Picks credentials from `config`: the access token file when set,
    /// otherwise the service account key file.
    ///
    /// # Errors
    ///
    /// Returns [`EarthEngineError`] if neither is configured or the chosen
    /// file cannot be used.
    pub fn from_config(config: &EarthEngineConfig) -> Result<Self, EarthEngineError> {
        if let Some(path) = &config.access_token_file {
            log::info!("Using access token from {}", path.display());
            return Ok(Self::AccessToken(read_access_token(path)?));
        }

        let Some(path) = &config.service_account_key_file else {
            return Err(EarthEngineError::Config {
                message: "neither service_account_key_file nor access_token_file is set"
                    .to_string(),
            });
        };
        let key = ServiceAccountKey::from_file(path)?;
        log::info!("Authenticating as service account {}", key.client_email);
        Ok(Self::ServiceAccount(ServiceAccountAuth::new(key)?))
    }

    /// Bearer token for the next request.
    ///
    /// # Errors
    ///
    /// Returns [`EarthEngineError`] if a service account token cannot be
    /// obtained.
    pub async fn access_token(
        &self,
        http: &reqwest::Client,
        policy: RetryPolicy,
    ) -> Result<String, EarthEngineError> {
        match self {
            Self::AccessToken(token) => Ok(token.clone()),
            Self::ServiceAccount(auth) => auth.access_token(http, policy).await,
        }
    }
}

/// Reads a bearer token from `path`, trimming surrounding whitespace.
///
/// # Errors
///
/// Returns [`EarthEngineError::Auth`] if the file cannot be read or is
/// empty.
pub fn read_access_token(path: &Path) -> Result<String, EarthEngineError> {
    let token = std::fs::read_to_string(path)
        .map_err(|e| EarthEngineError::Auth {
            message: format!("cannot read access token from {}: {e}", path.display()),
        })?
        .trim()
        .to_string();
    if token.is_empty() {
        return Err(EarthEngineError::Auth {
            message: format!("access token file {} is empty", path.display()),
        });
    }
    Ok(token)
}
