//! Process environment access and the environment snapshot.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::dotenv::read_dotenv;

/// Environment variable names recognized by the credential layer.
pub mod keys {
    pub const GITHUB_TOKEN: &str = "GITHUB_TOKEN";
    pub const GITHUB_USERNAME: &str = "GITHUB_USERNAME";
    pub const HUGGINGFACE_TOKEN: &str = "HUGGINGFACE_TOKEN";
    pub const HUGGINGFACE_USERNAME: &str = "HUGGINGFACE_USERNAME";
    pub const OPENAPI_KEY: &str = "OPENAPI_KEY";
    pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
    pub const NEO4J_URI: &str = "NEO4J_URI";
    pub const NEO4J_USER: &str = "NEO4J_USER";
    pub const NEO4J_PASSWORD: &str = "NEO4J_PASSWORD";
}

/// Abstraction over the process environment to make behavior deterministic in tests.
pub trait EnvSource: Send + Sync {
    /// Raw value of `key`, if set (possibly empty).
    fn var(&self, key: &str) -> Option<String>;

    fn set_var(&self, key: &str, value: &str);

    /// Value of `key` if set and non-empty.
    fn non_empty(&self, key: &str) -> Option<String> {
        self.var(key).filter(|v| !v.is_empty())
    }
}

/// The real process environment.
#[derive(Debug, Clone, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn set_var(&self, key: &str, value: &str) {
        std::env::set_var(key, value);
    }
}

/// In-memory environment for tests.
#[derive(Debug, Default)]
pub struct MemoryEnv {
    vars: Mutex<HashMap<String, String>>,
}

impl MemoryEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_var(self, key: &str, value: &str) -> Self {
        self.set_var(key, value);
        self
    }
}

impl EnvSource for MemoryEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.vars
            .lock()
            .expect("env lock poisoned")
            .get(key)
            .cloned()
    }

    fn set_var(&self, key: &str, value: &str) {
        self.vars
            .lock()
            .expect("env lock poisoned")
            .insert(key.to_string(), value.to_string());
    }
}

/// Recognized environment values captured at one point in time.
///
/// Unset variables are empty strings.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct EnvSnapshot {
    pub github_token: String,
    pub github_username: String,
    pub huggingface_token: String,
    pub huggingface_username: String,
    pub openai_api_key: String,
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
}

impl EnvSnapshot {
    /// Capture the recognized variables from `env`.
    pub fn capture(env: &dyn EnvSource) -> Self {
        let get = |key: &str| env.var(key).unwrap_or_default();
        Self {
            github_token: get(keys::GITHUB_TOKEN),
            github_username: get(keys::GITHUB_USERNAME),
            huggingface_token: get(keys::HUGGINGFACE_TOKEN),
            huggingface_username: get(keys::HUGGINGFACE_USERNAME),
            openai_api_key: get(keys::OPENAI_API_KEY),
            neo4j_uri: get(keys::NEO4J_URI),
            neo4j_user: get(keys::NEO4J_USER),
            neo4j_password: get(keys::NEO4J_PASSWORD),
        }
    }

    fn entries(&self) -> [(&'static str, &str); 8] {
        [
            ("github_token", &self.github_token),
            ("github_username", &self.github_username),
            ("huggingface_token", &self.huggingface_token),
            ("huggingface_username", &self.huggingface_username),
            ("openai_api_key", &self.openai_api_key),
            ("neo4j_uri", &self.neo4j_uri),
            ("neo4j_user", &self.neo4j_user),
            ("neo4j_password", &self.neo4j_password),
        ]
    }

    /// Names of the logical keys that have a value.
    pub fn present_keys(&self) -> Vec<&'static str> {
        self.entries()
            .into_iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(name, _)| name)
            .collect()
    }
}

// Values are secrets; only report which ones are set.
impl std::fmt::Debug for EnvSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvSnapshot")
            .field("present", &self.present_keys())
            .finish()
    }
}

/// Merge dotenv files into `env` and capture a snapshot.
///
/// Files are applied in order. A variable that is already set, by the
/// process or by an earlier file, is never overwritten. Missing files are
/// skipped silently.
pub fn load_environment(search_paths: &[PathBuf], env: &dyn EnvSource) -> EnvSnapshot {
    for path in search_paths {
        let pairs = match read_dotenv(path) {
            Ok(Some(pairs)) => pairs,
            Ok(None) => continue,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %format!("{err:#}"), "Failed to read dotenv file");
                continue;
            }
        };

        tracing::info!(path = %path.display(), "Loading environment variables from dotenv file");
        for (key, value) in pairs {
            if env.var(&key).is_none() {
                env.set_var(&key, &value);
            }
        }
    }

    let snapshot = EnvSnapshot::capture(env);
    let present = snapshot.present_keys();
    if present.is_empty() {
        tracing::info!("Present environment variables: none");
    } else {
        tracing::info!(present = %present.join(", "), "Present environment variables");
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_snapshot_defaults_to_empty() {
        let env = MemoryEnv::new();
        let snapshot = load_environment(&[], &env);
        assert_eq!(snapshot, EnvSnapshot::default());
        assert!(snapshot.present_keys().is_empty());
    }

    #[test]
    fn test_first_loaded_wins() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let first = dir.path().join("first.env");
        let second = dir.path().join("second.env");
        std::fs::write(&first, "HUGGINGFACE_TOKEN=hf_first\nNEO4J_URI=bolt://first\n")?;
        std::fs::write(&second, "HUGGINGFACE_TOKEN=hf_second\nNEO4J_USER=neo4j\n")?;

        let env = MemoryEnv::new().with_var(keys::NEO4J_URI, "bolt://process");
        let snapshot = load_environment(&[first, dir.path().join("missing.env"), second], &env);

        assert_eq!(snapshot.huggingface_token, "hf_first");
        assert_eq!(snapshot.neo4j_uri, "bolt://process");
        assert_eq!(snapshot.neo4j_user, "neo4j");
        assert_eq!(env.var(keys::HUGGINGFACE_TOKEN).as_deref(), Some("hf_first"));
        Ok(())
    }

    #[test]
    fn test_malformed_lines_are_skipped() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join(".env");
        std::fs::write(&path, "OPENAI_API_KEY=sk-good\nthis line is not valid\nGITHUB_TOKEN=ghp\n")?;

        let env = MemoryEnv::new();
        let snapshot = load_environment(&[path], &env);
        assert_eq!(snapshot.openai_api_key, "sk-good");
        Ok(())
    }

    #[test]
    fn test_debug_hides_values() {
        let env = MemoryEnv::new().with_var(keys::OPENAI_API_KEY, "sk-secret");
        let snapshot = EnvSnapshot::capture(&env);
        let rendered = format!("{snapshot:?}");
        assert!(rendered.contains("openai_api_key"));
        assert!(!rendered.contains("sk-secret"));
    }
}
