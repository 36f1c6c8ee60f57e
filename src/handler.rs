//! Request/response adapter between the outer API layer and the
//! credentials manager.

use std::sync::Arc;

use anyhow::Result;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::credentials::{CredentialsManager, Domain};
use crate::dotenv::DotenvFile;
use crate::env::{keys, EnvSource};

/// Username recorded with a HuggingFace token when none is stored yet.
pub const DEFAULT_HUGGINGFACE_USERNAME: &str = "homework_user";

/// Name reported for the GitHub token in summaries.
pub const GITHUB_DOMAIN: &str = "github_token";

/// Response envelope shared by every configuration endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn failed(message: impl Into<String>, data: Option<T>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data,
        }
    }
}

/// Configuration update; every field is independently optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateRequest {
    pub huggingface_token: Option<String>,
    pub github_token: Option<String>,
    pub openai_api_key: Option<String>,
    pub neo4j_uri: Option<String>,
    pub neo4j_username: Option<String>,
    pub neo4j_password: Option<String>,
}

fn provided(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|v| !v.is_empty())
}

impl UpdateRequest {
    /// The Neo4j triple, only when all three fields are provided.
    fn neo4j(&self) -> Option<(&str, &str, &str)> {
        Some((
            provided(&self.neo4j_uri)?,
            provided(&self.neo4j_username)?,
            provided(&self.neo4j_password)?,
        ))
    }
}

/// Which domains an update touched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateSummary {
    pub updated: Vec<String>,
    pub failed: Vec<String>,
}

/// Presence of each credential. Never carries the values themselves.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigurationStatus {
    pub huggingface_configured: bool,
    pub github_configured: bool,
    pub openai_configured: bool,
    pub neo4j_configured: bool,
    pub missing_configs: Vec<String>,
}

pub struct ConfigurationHandler {
    credentials: Arc<CredentialsManager>,
    env: Arc<dyn EnvSource>,
    dotenv: DotenvFile,
}

impl ConfigurationHandler {
    /// `dotenv` is the file the GitHub token is written to and read back from.
    pub fn new(
        credentials: Arc<CredentialsManager>,
        env: Arc<dyn EnvSource>,
        dotenv: DotenvFile,
    ) -> Self {
        Self {
            credentials,
            env,
            dotenv,
        }
    }

    pub fn credentials(&self) -> &Arc<CredentialsManager> {
        &self.credentials
    }

    /// Save every provided, non-empty field.
    ///
    /// A Neo4j triple is saved only when complete; a partial triple is
    /// ignored. The GitHub token goes to the `.env` file and the process
    /// environment.
    pub fn update_configuration(&self, request: &UpdateRequest) -> ApiResponse<UpdateSummary> {
        let mut summary = UpdateSummary::default();
        let mut record = |name: &str, saved: bool| {
            if saved {
                summary.updated.push(name.to_string());
            } else {
                summary.failed.push(name.to_string());
            }
        };

        if let Some(token) = provided(&request.huggingface_token) {
            let username = self.credentials.get_huggingface_username();
            let username = if username.is_empty() {
                DEFAULT_HUGGINGFACE_USERNAME.to_string()
            } else {
                username
            };
            let saved = self
                .credentials
                .save_huggingface_credentials(&username, SecretString::from(token.to_string()));
            record(Domain::HuggingFace.name(), saved);
        }

        if let Some(key) = provided(&request.openai_api_key) {
            let saved = self
                .credentials
                .save_openai_key(SecretString::from(key.to_string()));
            record(Domain::OpenAi.name(), saved);
        }

        if let Some((uri, username, password)) = request.neo4j() {
            let saved = self.credentials.save_neo4j_credentials(
                uri,
                username,
                SecretString::from(password.to_string()),
            );
            record(Domain::Neo4j.name(), saved);
        }

        if let Some(token) = provided(&request.github_token) {
            let saved = match self.save_github_token(token) {
                Ok(()) => true,
                Err(err) => {
                    tracing::error!(error = %format!("{err:#}"), "Failed to save GitHub token");
                    false
                }
            };
            record(GITHUB_DOMAIN, saved);
        }

        if summary.failed.is_empty() {
            ApiResponse::ok("Configuration updated successfully", summary)
        } else {
            ApiResponse::failed("Some configuration values could not be saved", Some(summary))
        }
    }

    fn save_github_token(&self, token: &str) -> Result<()> {
        self.dotenv.upsert(keys::GITHUB_TOKEN, token)?;
        self.env.set_var(keys::GITHUB_TOKEN, token);
        tracing::info!(path = %self.dotenv.path().display(), "Saved GitHub token to dotenv file");
        Ok(())
    }

    fn github_configured(&self) -> Result<bool> {
        if self.env.non_empty(keys::GITHUB_TOKEN).is_some() {
            return Ok(true);
        }
        Ok(self.dotenv.get(keys::GITHUB_TOKEN)?.is_some())
    }

    /// Presence of every credential, plus the required ones that are missing.
    pub fn get_configuration_status(&self) -> ApiResponse<ConfigurationStatus> {
        let huggingface = check("huggingface", || {
            Ok(self.credentials.get_huggingface_credentials().1.is_some())
        });
        let openai = check("openai", || Ok(self.credentials.is_configured(Domain::OpenAi)));
        let neo4j = check("neo4j", || Ok(self.credentials.get_neo4j_credentials().is_some()));
        let github = check("github", || self.github_configured());

        let mut missing_configs = Vec::new();
        if !huggingface {
            missing_configs.push(Domain::HuggingFace.name().to_string());
        }

        ApiResponse::ok(
            "Configuration status retrieved",
            ConfigurationStatus {
                huggingface_configured: huggingface,
                github_configured: github,
                openai_configured: openai,
                neo4j_configured: neo4j,
                missing_configs,
            },
        )
    }
}

/// Run one presence check; an error counts as "not configured".
fn check(name: &str, f: impl FnOnce() -> Result<bool>) -> bool {
    match f() {
        Ok(present) => present,
        Err(err) => {
            tracing::error!(domain = name, error = %format!("{err:#}"), "Error checking configuration");
            false
        }
    }
}
