use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use homework::config::HomeworkPaths;
use homework::credentials::{CredentialsManager, SecretStoreAdapter};
use homework::dotenv::DotenvFile;
use homework::env::{EnvSource, ProcessEnv};
use homework::handler::ConfigurationHandler;
use homework::llm::OPENAI_BASE_URL;
use homework_server::{router, AppState};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "homework-server")]
#[command(about = "HTTP API for homework configuration and chat")]
struct Cli {
    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind (defaults to server_port from config.json)
    #[arg(long)]
    port: Option<u16>,

    /// Directory holding config.json (defaults to the platform config dir)
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Base URL of the OpenAI-compatible API
    #[arg(long, default_value = OPENAI_BASE_URL)]
    openai_base_url: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,tower_http=debug")
        }))
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
    let port = cli.port.unwrap_or_else(|| credentials.get_server_port());

    let handler = ConfigurationHandler::new(credentials, env, DotenvFile::new(&paths.dotenv_file));
    let state = Arc::new(AppState::new(handler).with_llm_base_url(cli.openai_base_url));
    let app = router(state);

    let addr = format!("{}:{}", cli.host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("Server error")?;

    Ok(())
}
