//! Bearer tokens for the upstream inference endpoint.
//!
//! [`TokenCredential`] implementations know how to obtain a fresh
//! [`AccessToken`]; [`CachedTokenProvider`] sits in front of one and hands out
//! the cached token until it is about to expire. The upstream client only
//! sees the [`TokenProvider`] trait and calls it before every request.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::CredentialConfig;

pub mod developer_cli;
pub mod managed_identity;

pub use developer_cli::DeveloperCliCredential;
pub use managed_identity::ManagedIdentityCredential;

/// Scope requested for Azure AI inference tokens.
pub const COGNITIVE_SERVICES_SCOPE: &str = "https://cognitiveservices.azure.com/.default";

/// A cached token is refreshed once it expires within this many seconds.
pub const REFRESH_MARGIN_SECS: i64 = 60;

fn refresh_margin() -> TimeDelta {
    TimeDelta::seconds(REFRESH_MARGIN_SECS)
}

/// Errors raised while acquiring a token.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("token request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("token endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    Command {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("malformed token response: {0}")]
    Parse(String),
}

/// A bearer token and the instant it stops being valid.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_on: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_on: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            expires_on,
        }
    }

    /// `true` if the token expires within `margin` of `now` (or already has).
    pub fn expires_within(&self, margin: TimeDelta, now: DateTime<Utc>) -> bool {
        self.expires_on - now <= margin
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

/// Something that can mint a fresh token for a scope.
#[async_trait]
pub trait TokenCredential: Send + Sync {
    async fn get_token(&self, scope: &str) -> Result<AccessToken, CredentialError>;
}

/// Supplies the bearer token to attach to an outbound request.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Result<String, CredentialError>;
}

/// A static API key sent as the bearer token. It never expires.
pub struct ApiKeyCredential {
    key: String,
}

impl ApiKeyCredential {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

#[async_trait]
impl TokenProvider for ApiKeyCredential {
    async fn token(&self) -> Result<String, CredentialError> {
        Ok(self.key.clone())
    }
}

/// Caches the token of an inner [`TokenCredential`].
///
/// The lock is held while refreshing, so concurrent requests that find the
/// token stale wait for a single refresh instead of each starting their own.
pub struct CachedTokenProvider<C> {
    credential: C,
    scope: String,
    cached: Mutex<Option<AccessToken>>,
}

impl<C: TokenCredential> CachedTokenProvider<C> {
    pub fn new(credential: C, scope: impl Into<String>) -> Self {
        Self {
            credential,
            scope: scope.into(),
            cached: Mutex::new(None),
        }
    }

    async fn token_at(&self, now: DateTime<Utc>) -> Result<String, CredentialError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref()
            && !token.expires_within(refresh_margin(), now)
        {
            return Ok(token.token.clone());
        }

        debug!(scope = %self.scope, "refreshing access token");
        let fresh = self.credential.get_token(&self.scope).await?;
        debug!(expires_on = %fresh.expires_on, "access token refreshed");
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }
}

#[async_trait]
impl<C: TokenCredential> TokenProvider for CachedTokenProvider<C> {
    async fn token(&self) -> Result<String, CredentialError> {
        self.token_at(Utc::now()).await
    }
}

/// Builds the token provider selected by configuration.
pub fn provider_for(config: &CredentialConfig, http: reqwest::Client) -> Arc<dyn TokenProvider> {
    match config {
        CredentialConfig::ApiKey(key) => {
            info!("using API key credential");
            Arc::new(ApiKeyCredential::new(key.clone()))
        }
        CredentialConfig::ManagedIdentity {
            client_id,
            endpoint,
        } => {
            let credential = match endpoint {
                Some(endpoint) => {
                    info!(client_id = %client_id, url = %endpoint.url, "using managed identity credential");
                    ManagedIdentityCredential::app_service(
                        http,
                        client_id.clone(),
                        endpoint.url.clone(),
                        endpoint.secret.clone(),
                    )
                }
                None => {
                    info!(client_id = %client_id, "using managed identity credential (IMDS)");
                    ManagedIdentityCredential::new(http, client_id.clone())
                }
            };
            Arc::new(CachedTokenProvider::new(credential, COGNITIVE_SERVICES_SCOPE))
        }
        CredentialConfig::DeveloperCli { tenant_id } => {
            info!(tenant_id = %tenant_id, "using developer CLI credential");
            Arc::new(CachedTokenProvider::new(
                DeveloperCliCredential::new(Some(tenant_id.clone())),
                COGNITIVE_SERVICES_SCOPE,
            ))
        }
    }
}
