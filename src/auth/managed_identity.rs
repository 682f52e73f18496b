//! Managed identity tokens.
//!
//! Virtual machines get them from the Instance Metadata Service. App Service
//! and Container Apps expose a local endpoint through `IDENTITY_ENDPOINT` and
//! guard it with the secret in `IDENTITY_HEADER`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{AccessToken, CredentialError, TokenCredential};

/// Token endpoint reachable from Azure compute.
pub const IMDS_TOKEN_URL: &str = "http://169.254.169.254/metadata/identity/oauth2/token";

const IMDS_API_VERSION: &str = "2018-02-01";

const APP_SERVICE_API_VERSION: &str = "2019-08-01";

/// Where the token is requested from.
enum Source {
    Imds { endpoint: String },
    AppService { endpoint: String, secret: String },
}

/// User-assigned managed identity, selected by client id.
pub struct ManagedIdentityCredential {
    http: reqwest::Client,
    client_id: String,
    source: Source,
}

#[derive(Deserialize)]
struct IdentityToken {
    access_token: String,
    expires_on: ExpiresOn,
}

/// Unix seconds. IMDS sends a string, some hosts a number.
#[derive(Deserialize)]
#[serde(untagged)]
enum ExpiresOn {
    Text(String),
    Secs(i64),
}

impl ExpiresOn {
    fn to_datetime(&self) -> Result<DateTime<Utc>, CredentialError> {
        let secs = match self {
            ExpiresOn::Secs(secs) => *secs,
            ExpiresOn::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| CredentialError::Parse(format!("expires_on `{text}`")))?,
        };
        DateTime::from_timestamp(secs, 0)
            .ok_or_else(|| CredentialError::Parse(format!("expires_on `{secs}` out of range")))
    }
}

impl ManagedIdentityCredential {
    pub fn new(http: reqwest::Client, client_id: impl Into<String>) -> Self {
        Self {
            http,
            client_id: client_id.into(),
            source: Source::Imds {
                endpoint: IMDS_TOKEN_URL.to_owned(),
            },
        }
    }

    /// Uses the App Service / Container Apps identity endpoint.
    pub fn app_service(
        http: reqwest::Client,
        client_id: impl Into<String>,
        endpoint: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            http,
            client_id: client_id.into(),
            source: Source::AppService {
                endpoint: endpoint.into(),
                secret: secret.into(),
            },
        }
    }

    /// Points an IMDS credential at a different token endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        if let Source::Imds { endpoint: current } = &mut self.source {
            *current = endpoint.into();
        }
        self
    }
}

/// IMDS wants a resource, not a `/.default` scope.
fn scope_to_resource(scope: &str) -> &str {
    scope.strip_suffix("/.default").unwrap_or(scope)
}

#[async_trait]
impl TokenCredential for ManagedIdentityCredential {
    async fn get_token(&self, scope: &str) -> Result<AccessToken, CredentialError> {
        let (request, api_version) = match &self.source {
            Source::Imds { endpoint } => (
                self.http.get(endpoint).header("Metadata", "true"),
                IMDS_API_VERSION,
            ),
            Source::AppService { endpoint, secret } => (
                self.http.get(endpoint).header("X-IDENTITY-HEADER", secret.as_str()),
                APP_SERVICE_API_VERSION,
            ),
        };
        let response = request
            .query(&[
                ("api-version", api_version),
                ("resource", scope_to_resource(scope)),
                ("client_id", self.client_id.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CredentialError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let token: IdentityToken = response.json().await?;
        let expires_on = token.expires_on.to_datetime()?;
        Ok(AccessToken::new(token.access_token, expires_on))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::COGNITIVE_SERVICES_SCOPE;
    use mockito::Matcher;

    #[test]
    fn default_suffix_is_stripped() {
        assert_eq!(
            scope_to_resource(COGNITIVE_SERVICES_SCOPE),
            "https://cognitiveservices.azure.com"
        );
        assert_eq!(scope_to_resource("api://custom"), "api://custom");
    }

    #[tokio::test]
    async fn fetches_token_with_metadata_header() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/token")
            .match_header("metadata", "true")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("api-version".into(), "2018-02-01".into()),
                Matcher::UrlEncoded("resource".into(), "https://cognitiveservices.azure.com".into()),
                Matcher::UrlEncoded("client_id".into(), "client-1".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"mi-token","expires_on":"1703462735","token_type":"Bearer"}"#)
            .create_async()
            .await;

        let credential = ManagedIdentityCredential::new(reqwest::Client::new(), "client-1")
            .with_endpoint(format!("{}/token", server.url()));
        let token = credential.get_token(COGNITIVE_SERVICES_SCOPE).await.unwrap();

        mock.assert_async().await;
        assert_eq!(token.token, "mi-token");
        assert_eq!(token.expires_on.timestamp(), 1_703_462_735);
    }

    #[tokio::test]
    async fn app_service_endpoint_sends_identity_header() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/msi/token")
            .match_header("x-identity-header", "s3cret")
            .match_header("metadata", Matcher::Missing)
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("api-version".into(), "2019-08-01".into()),
                Matcher::UrlEncoded("resource".into(), "https://cognitiveservices.azure.com".into()),
                Matcher::UrlEncoded("client_id".into(), "client-2".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"aca-token","expires_on":1703462735,"token_type":"Bearer"}"#)
            .create_async()
            .await;

        let credential = ManagedIdentityCredential::app_service(
            reqwest::Client::new(),
            "client-2",
            format!("{}/msi/token", server.url()),
            "s3cret",
        );
        let token = credential.get_token(COGNITIVE_SERVICES_SCOPE).await.unwrap();

        mock.assert_async().await;
        assert_eq!(token.token, "aca-token");
        assert_eq!(token.expires_on.timestamp(), 1_703_462_735);
    }

    #[test]
    fn bad_expiry_is_a_parse_error() {
        let expiry = ExpiresOn::Text("soon".into());
        assert!(matches!(expiry.to_datetime(), Err(CredentialError::Parse(_))));
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", Matcher::Any)
            .with_status(400)
            .with_body("identity not found")
            .create_async()
            .await;

        let credential = ManagedIdentityCredential::new(reqwest::Client::new(), "nope")
            .with_endpoint(format!("{}/token", server.url()));
        let err = credential.get_token(COGNITIVE_SERVICES_SCOPE).await.unwrap_err();
        assert!(matches!(err, CredentialError::Status { status: 400, ref body } if body == "identity not found"));
    }
}
