//! Tokens from a developer's `azd auth login` session.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::process::Command;

use super::{AccessToken, CredentialError, TokenCredential};

/// Shells out to the Azure Developer CLI for a token.
pub struct DeveloperCliCredential {
    program: String,
    tenant_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliToken {
    token: String,
    expires_on: DateTime<Utc>,
}

impl DeveloperCliCredential {
    pub fn new(tenant_id: Option<String>) -> Self {
        Self {
            program: "azd".to_owned(),
            tenant_id,
        }
    }

    /// Runs `program` instead of `azd`.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn args(&self, scope: &str) -> Vec<String> {
        let mut args = vec![
            "auth".to_owned(),
            "token".to_owned(),
            "--output".to_owned(),
            "json".to_owned(),
            "--scope".to_owned(),
            scope.to_owned(),
        ];
        if let Some(tenant) = &self.tenant_id {
            args.push("--tenant-id".to_owned());
            args.push(tenant.clone());
        }
        args
    }
}

fn parse_cli_token(stdout: &[u8]) -> Result<AccessToken, CredentialError> {
    let parsed: CliToken =
        serde_json::from_slice(stdout).map_err(|e| CredentialError::Parse(e.to_string()))?;
    Ok(AccessToken::new(parsed.token, parsed.expires_on))
}

#[async_trait]
impl TokenCredential for DeveloperCliCredential {
    async fn get_token(&self, scope: &str) -> Result<AccessToken, CredentialError> {
        let args = self.args(scope);
        let output = Command::new(&self.program)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| CredentialError::Spawn {
                command: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(CredentialError::Command {
                command: format!("{} {}", self.program, args.join(" ")),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }

        parse_cli_token(&output.stdout)
    }
}
