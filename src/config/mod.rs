//! Process configuration read from environment variables at startup.

use std::fmt;

use thiserror::Error;

pub const DEFAULT_BIND: &str = "127.0.0.1:50505";
pub const DEFAULT_DEPLOYMENT: &str = "DeepSeek-R1";
pub const DEFAULT_API_VERSION: &str = "preview";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {var}")]
    Missing { var: &'static str },
}

/// Local managed identity endpoint of App Service and Container Apps.
#[derive(Clone, PartialEq, Eq)]
pub struct IdentityEndpoint {
    pub url: String,
    pub secret: String,
}

impl fmt::Debug for IdentityEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityEndpoint")
            .field("url", &self.url)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// How the relay authenticates upstream.
#[derive(Clone, PartialEq, Eq)]
pub enum CredentialConfig {
    ApiKey(String),
    ManagedIdentity {
        client_id: String,
        /// `None` means the Instance Metadata Service.
        endpoint: Option<IdentityEndpoint>,
    },
    DeveloperCli { tenant_id: String },
}

impl fmt::Debug for CredentialConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApiKey(_) => f.write_str("ApiKey(<redacted>)"),
            Self::ManagedIdentity {
                client_id,
                endpoint,
            } => f
                .debug_struct("ManagedIdentity")
                .field("client_id", client_id)
                .field("endpoint", endpoint)
                .finish(),
            Self::DeveloperCli { tenant_id } => f
                .debug_struct("DeveloperCli")
                .field("tenant_id", tenant_id)
                .finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind_addr: String,
    /// Base URL of the inference endpoint, without `/chat/completions`.
    pub endpoint: String,
    pub deployment: String,
    pub api_version: String,
    pub system_prompt: String,
    pub credential: CredentialConfig,
}

impl Config {
    /// Reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    ///
    /// Empty values count as unset. The credential is picked in order: API
    /// key, managed identity when `RUNNING_IN_PRODUCTION` is set, developer
    /// CLI otherwise. Managed identity goes through `IDENTITY_ENDPOINT` when
    /// both it and `IDENTITY_HEADER` are set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let require = |name: &'static str| get(name).ok_or(ConfigError::Missing { var: name });

        let credential = if let Some(key) = get("AZURE_OPENAI_API_KEY_FOR_APP") {
            CredentialConfig::ApiKey(key)
        } else if get("RUNNING_IN_PRODUCTION").is_some() {
            let endpoint = match (get("IDENTITY_ENDPOINT"), get("IDENTITY_HEADER")) {
                (Some(url), Some(secret)) => Some(IdentityEndpoint { url, secret }),
                _ => None,
            };
            CredentialConfig::ManagedIdentity {
                client_id: require("AZURE_CLIENT_ID")?,
                endpoint,
            }
        } else {
            CredentialConfig::DeveloperCli {
                tenant_id: require("AZURE_TENANT_ID")?,
            }
        };

        Ok(Self {
            bind_addr: get("CHATRELAY_BIND").unwrap_or_else(|| DEFAULT_BIND.to_owned()),
            endpoint: require("AZURE_INFERENCE_ENDPOINT")?,
            deployment: get("AZURE_DEEPSEEK_DEPLOYMENT")
                .unwrap_or_else(|| DEFAULT_DEPLOYMENT.to_owned()),
            api_version: get("AZURE_INFERENCE_API_VERSION")
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_owned()),
            system_prompt: get("CHATRELAY_SYSTEM_PROMPT")
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_owned()),
            credential,
        })
    }
}
