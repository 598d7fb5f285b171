//! Service account authentication for the Drive API.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{ServiceAccountCredentials, TokenResponse};

/// Default Google OAuth2 token endpoint.
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Read-only Drive scope; the job never writes to the source folder.
pub const DRIVE_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/drive.readonly";

/// Lifetime requested for each JWT assertion.
const ASSERTION_LIFETIME_SECS: u64 = 3600;

/// JWT claims for service account authentication.
#[derive(Debug, Serialize)]
struct Claims {
    iss: String,
    scope: String,
    aud: String,
    exp: u64,
    iat: u64,
}

#[derive(Clone)]
struct CachedToken {
    access_token: String,
    expires_at: SystemTime,
}

/// Signing material parsed from a service account key file.
struct Signer {
    client_email: String,
    token_uri: String,
    key: EncodingKey,
}

/// Authenticator for Google APIs using service account credentials.
#[derive(Clone)]
pub struct Authenticator {
    signer: Option<Arc<Signer>>,
    scope: String,
    client: Client,
    cached_token: Arc<RwLock<Option<CachedToken>>>,
}

impl Authenticator {
    /// Load a service account JSON key file.
    ///
    /// The private key is parsed up front so a broken credential is reported
    /// before any request is made.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Authentication(format!("cannot read {}: {}", path.display(), e))
        })?;
        let credentials: ServiceAccountCredentials = serde_json::from_str(&content)
            .map_err(|e| Error::Authentication(format!("invalid key file {}: {}", path.display(), e)))?;
        Self::new(credentials)
    }

    /// Create an authenticator from parsed credentials.
    pub fn new(credentials: ServiceAccountCredentials) -> Result<Self> {
        let key = EncodingKey::from_rsa_pem(credentials.private_key.as_bytes())
            .map_err(|e| Error::Authentication(format!("invalid private key: {}", e)))?;
        let signer = Signer {
            client_email: credentials.client_email,
            token_uri: credentials
                .token_uri
                .unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string()),
            key,
        };
        Ok(Self {
            signer: Some(Arc::new(signer)),
            scope: DRIVE_READONLY_SCOPE.to_string(),
            client: Client::new(),
            cached_token: Arc::new(RwLock::new(None)),
        })
    }

    /// Use an already minted access token. It is never refreshed.
    pub fn from_access_token(access_token: impl Into<String>) -> Self {
        let token = CachedToken {
            access_token: access_token.into(),
            expires_at: SystemTime::now() + Duration::from_secs(365 * 24 * 3600),
        };
        Self {
            signer: None,
            scope: DRIVE_READONLY_SCOPE.to_string(),
            client: Client::new(),
            cached_token: Arc::new(RwLock::new(Some(token))),
        }
    }

    /// Override the OAuth scope requested in the assertion.
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Get a valid access token, refreshing if necessary.
    pub async fn get_access_token(&self) -> Result<String> {
        {
            let cached = self.cached_token.read().await;
            if let Some(token) = cached.as_ref() {
                // 60 second buffer before expiration
                if token.expires_at > SystemTime::now() + Duration::from_secs(60) {
                    return Ok(token.access_token.clone());
                }
            }
        }

        let new_token = self.refresh_token().await?;
        let access_token = new_token.access_token.clone();
        *self.cached_token.write().await = Some(new_token);
        Ok(access_token)
    }

    /// Exchange a signed JWT assertion for an access token.
    async fn refresh_token(&self) -> Result<CachedToken> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| Error::Authentication("access token expired".to_string()))?;

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| Error::Authentication(format!("system clock before epoch: {}", e)))?
            .as_secs();

        let claims = Claims {
            iss: signer.client_email.clone(),
            scope: self.scope.clone(),
            aud: signer.token_uri.clone(),
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };
        let jwt = encode(&Header::new(Algorithm::RS256), &claims, &signer.key)?;

        debug!(issuer = %signer.client_email, "requesting Drive access token");
        let params = [
            ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
            ("assertion", jwt.as_str()),
        ];
        let response = self
            .client
            .post(&signer.token_uri)
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::TokenRefresh(format!("Status {}: {}", status, body)));
        }

        let token_response: TokenResponse = response.json().await?;
        Ok(CachedToken {
            access_token: token_response.access_token,
            expires_at: SystemTime::now() + Duration::from_secs(token_response.expires_in),
        })
    }
}
