use std::sync::Arc;

use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use homework::config::HomeworkPaths;
use homework::credentials::{CredentialsManager, SecretStoreAdapter};
use homework::dotenv::DotenvFile;
use homework::env::{EnvSource, MemoryEnv};
use homework::handler::ConfigurationHandler;
use homework_server::{router, AppState};
use tempfile::TempDir;
use tower::ServiceExt as _;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn state(dir: &TempDir, llm_base_url: Option<String>) -> Arc<AppState> {
    let paths = HomeworkPaths::rooted_at(dir.path().join("config"), dir.path());
    let env: Arc<dyn EnvSource> = Arc::new(MemoryEnv::new());
    let credentials = Arc::new(CredentialsManager::new(
        &paths,
        Arc::new(SecretStoreAdapter::unavailable()),
        env.clone(),
    ));
    let handler = ConfigurationHandler::new(credentials, env, DotenvFile::new(&paths.dotenv_file));
    let mut state = AppState::new(handler);
    if let Some(url) = llm_base_url {
        state = state.with_llm_base_url(url);
    }
    Arc::new(state)
}

async fn send(
    state: Arc<AppState>,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> Result<(StatusCode, serde_json::Value)> {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))?,
        None => builder.body(Body::empty())?,
    };

    let response = router(state).oneshot(request).await?;
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    Ok((status, serde_json::from_slice(&bytes)?))
}

#[tokio::test]
async fn health_reports_ok() -> Result<()> {
    let dir = TempDir::new()?;
    let (status, body) = send(state(&dir, None), "GET", "/api/health", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    Ok(())
}

#[tokio::test]
async fn status_starts_unconfigured() -> Result<()> {
    let dir = TempDir::new()?;
    let (status, body) = send(state(&dir, None), "GET", "/api/configuration", None).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["huggingface_configured"], false);
    assert_eq!(body["data"]["github_configured"], false);
    assert_eq!(
        body["data"]["missing_configs"],
        serde_json::json!(["huggingface_token"])
    );
    Ok(())
}

#[tokio::test]
async fn update_then_status_hides_values() -> Result<()> {
    let dir = TempDir::new()?;
    let state = state(&dir, None);

    let (status, body) = send(
        state.clone(),
        "POST",
        "/api/configuration",
        Some(serde_json::json!({
            "huggingface_token": "hf_route_secret",
            "openai_api_key": "sk-route-secret",
            "neo4j_uri": "bolt://db:7687",
            "neo4j_username": "neo4j"
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(
        body["data"]["updated"],
        serde_json::json!(["huggingface_token", "openai_api_key"])
    );

    let (_, body) = send(state, "GET", "/api/configuration", None).await?;
    assert_eq!(body["data"]["huggingface_configured"], true);
    assert_eq!(body["data"]["openai_configured"], true);
    assert_eq!(body["data"]["neo4j_configured"], false);
    assert_eq!(body["data"]["missing_configs"], serde_json::json!([]));

    let rendered = body.to_string();
    assert!(!rendered.contains("hf_route_secret"));
    assert!(!rendered.contains("sk-route-secret"));
    Ok(())
}

#[tokio::test]
async fn chat_without_key_returns_guidance() -> Result<()> {
    let dir = TempDir::new()?;
    let (status, body) = send(
        state(&dir, None),
        "POST",
        "/api/chat",
        Some(serde_json::json!({ "message": "hello" })),
    )
    .await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert!(body["message"]
        .as_str()
        .unwrap_or_default()
        .contains("OpenAI API key"));
    Ok(())
}

#[tokio::test]
async fn chat_uses_saved_openai_key() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-saved"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "Hi there" } }]
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new()?;
    let state = state(&dir, Some(server.uri()));

    send(
        state.clone(),
        "POST",
        "/api/configuration",
        Some(serde_json::json!({ "openai_api_key": "sk-saved" })),
    )
    .await?;

    let (_, body) = send(
        state,
        "POST",
        "/api/chat",
        Some(serde_json::json!({ "message": "hello", "model": "gpt-4o-mini" })),
    )
    .await?;

    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["response"], "Hi there");
    assert_eq!(body["data"]["model"], "gpt-4o-mini");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_updates_are_serialized() -> Result<()> {
    let dir = TempDir::new()?;
    let state = state(&dir, None);

    let mut tasks = Vec::new();
    for i in 0..8 {
        let state = state.clone();
        tasks.push(tokio::spawn(async move {
            send(
                state,
                "POST",
                "/api/configuration",
                Some(serde_json::json!({
                    "github_token": format!("ghp_{i}"),
                    "openai_api_key": format!("sk-{i}")
                })),
            )
            .await
        }));
    }
    for task in tasks {
        let (status, body) = task.await??;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
    }

    let dotenv = std::fs::read_to_string(dir.path().join(".env"))?;
    assert_eq!(dotenv.matches("GITHUB_TOKEN=").count(), 1);

    let (_, body) = send(state, "GET", "/api/configuration", None).await?;
    assert_eq!(body["data"]["github_configured"], true);
    assert_eq!(body["data"]["openai_configured"], true);
    Ok(())
}
