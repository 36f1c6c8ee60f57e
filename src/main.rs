use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use homework::config::HomeworkPaths;
use homework::credentials::{CredentialsManager, SecretStoreAdapter};
use homework::dotenv::DotenvFile;
use homework::env::{EnvSource, ProcessEnv};
use homework::handler::{ConfigurationHandler, UpdateRequest};
use homework::llm::LlmClient;
use secrecy::SecretString;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "homework")]
#[command(about = "Credential and configuration management for the homework assistant")]
struct Cli {
    /// Directory holding config.json (defaults to the platform config dir)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show which credentials are configured
    Status,

    /// Update credentials
    Set {
        #[arg(long)]
        huggingface_token: Option<String>,
        #[arg(long)]
        github_token: Option<String>,
        #[arg(long)]
        openai_api_key: Option<String>,
        #[arg(long)]
        neo4j_uri: Option<String>,
        #[arg(long)]
        neo4j_username: Option<String>,
        #[arg(long)]
        neo4j_password: Option<String>,
    },

    /// Save the OpenAPI key
    OpenapiKey {
        key: String,
    },

    /// Show non-secret settings, saving any that are given
    Settings {
        #[arg(long)]
        server_port: Option<u16>,
        #[arg(long)]
        temp_dir: Option<PathBuf>,
    },

    /// Show file locations
    Config,

    /// Send a message to the chat model
    Chat {
        message: String,
        #[arg(long)]
        model: Option<String>,
    },
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_level(true)
                .json(),
        )
        .init();

    let cli = Cli::parse();

    let paths = HomeworkPaths::discover(cli.config_dir.as_deref())
        .context("Failed to resolve configuration paths")?;
    let env: Arc<dyn EnvSource> = Arc::new(ProcessEnv);
    let secrets = Arc::new(SecretStoreAdapter::probe(&paths.plaintext_secrets_file));
    let credentials = Arc::new(CredentialsManager::new(&paths, secrets, env.clone()));
    let handler = ConfigurationHandler::new(
        credentials.clone(),
        env,
        DotenvFile::new(&paths.dotenv_file),
    );

    match cli.command {
        Command::Status => {
            let status = handler.get_configuration_status();
            print_json(&serde_json::json!({
                "status": status,
                "secret_backend": credentials.secret_backend().as_str(),
            }))?;
        }
        Command::Set {
            huggingface_token,
            github_token,
            openai_api_key,
            neo4j_uri,
            neo4j_username,
            neo4j_password,
        } => {
            let request = UpdateRequest {
                huggingface_token,
                github_token,
                openai_api_key,
                neo4j_uri,
                neo4j_username,
                neo4j_password,
            };
            let response = handler.update_configuration(&request);
            print_json(&response)?;
            if !response.success {
                std::process::exit(1);
            }
        }
        Command::OpenapiKey { key } => {
            if !credentials.save_openapi_key(SecretString::from(key)) {
                anyhow::bail!("Failed to save OpenAPI key");
            }
            print_json(&serde_json::json!({ "openapi_configured": true }))?;
        }
        Command::Settings {
            server_port,
            temp_dir,
        } => {
            if let Some(port) = server_port {
                if !credentials.save_server_port(port) {
                    anyhow::bail!("Failed to save server port");
                }
            }
            if let Some(dir) = temp_dir {
                if !credentials.save_temp_dir(&dir) {
                    anyhow::bail!("Failed to save temporary directory: {}", dir.display());
                }
            }
            print_json(&serde_json::json!({
                "huggingface_username": credentials.get_huggingface_username(),
                "server_port": credentials.get_server_port(),
                "temp_dir": credentials.get_temp_dir(),
            }))?;
        }
        Command::Config => {
            print_json(&serde_json::json!({
                "config_file": paths.config_file.display().to_string(),
                "dotenv_file": paths.dotenv_file.display().to_string(),
                "plaintext_keystore": paths.plaintext_secrets_file.display().to_string(),
                "dotenv_search": paths
                    .dotenv_search
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>(),
                "secret_backend": credentials.secret_backend().as_str(),
            }))?;
        }
        Command::Chat { message, model } => {
            let mut client = LlmClient::new(credentials.get_openai_key());
            if let Some(model) = model {
                client = client.with_model(model);
            }
            println!("{}", client.generate_response(&message).await);
        }
    }

    Ok(())
}
