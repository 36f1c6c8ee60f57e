//! Credential resolution and persistence across every storage tier.

use std::path::Path;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};

use super::tier::resolve_first;
use super::{Resolved, SecretBackend, SecretStoreAdapter, Tier, SERVICE_NAME};
use crate::config::{AppConfig, ConfigFile, HomeworkPaths};
use crate::dotenv::scan_dotenv;
use crate::env::{keys, load_environment, EnvSnapshot, EnvSource};

/// Tiers consulted for single-token domains. The raw process environment is
/// not consulted directly; it reaches these domains through the snapshot.
const TOKEN_TIERS: &[Tier] = &[
    Tier::SecretStore,
    Tier::ConfigFile,
    Tier::EnvSnapshot,
    Tier::DotenvFile,
];

/// Tiers consulted for the database domain. An operator override in the
/// process environment beats everything stored on disk.
const NEO4J_TIERS: &[Tier] = &[
    Tier::ProcessEnv,
    Tier::SecretStore,
    Tier::ConfigFile,
    Tier::EnvSnapshot,
    Tier::DotenvFile,
];

/// A logical credential unit, resolved and persisted independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    /// HuggingFace access token.
    HuggingFace,
    /// OpenAPI key.
    OpenApi,
    /// OpenAI API key.
    OpenAi,
    /// Neo4j URI, username and password, always together.
    Neo4j,
}

impl Domain {
    pub const ALL: [Domain; 4] = [
        Domain::HuggingFace,
        Domain::OpenApi,
        Domain::OpenAi,
        Domain::Neo4j,
    ];

    /// Name used in API responses.
    pub fn name(&self) -> &'static str {
        match self {
            Domain::HuggingFace => "huggingface_token",
            Domain::OpenApi => "openapi_key",
            Domain::OpenAi => "openai_api_key",
            Domain::Neo4j => "neo4j",
        }
    }

    pub fn tiers(&self) -> &'static [Tier] {
        match self {
            Domain::Neo4j => NEO4J_TIERS,
            _ => TOKEN_TIERS,
        }
    }

    /// Keystore keys (also the config document field names) for this domain.
    fn secret_keys(&self) -> &'static [&'static str] {
        match self {
            Domain::HuggingFace => &["huggingface_token"],
            Domain::OpenApi => &["openapi_key"],
            Domain::OpenAi => &["openai_key"],
            Domain::Neo4j => &["neo4j_uri", "neo4j_username", "neo4j_password"],
        }
    }

    /// Environment variable names, parallel to [`Domain::secret_keys`].
    fn env_vars(&self) -> &'static [&'static str] {
        match self {
            Domain::HuggingFace => &[keys::HUGGINGFACE_TOKEN],
            Domain::OpenApi => &[keys::OPENAPI_KEY],
            Domain::OpenAi => &[keys::OPENAI_API_KEY],
            Domain::Neo4j => &[keys::NEO4J_URI, keys::NEO4J_USER, keys::NEO4J_PASSWORD],
        }
    }

    /// Snapshot values, parallel to [`Domain::secret_keys`].
    fn snapshot_values<'a>(&self, snapshot: &'a EnvSnapshot) -> Option<Vec<&'a str>> {
        match self {
            Domain::HuggingFace => Some(vec![snapshot.huggingface_token.as_str()]),
            Domain::OpenApi => None,
            Domain::OpenAi => Some(vec![snapshot.openai_api_key.as_str()]),
            Domain::Neo4j => Some(vec![
                snapshot.neo4j_uri.as_str(),
                snapshot.neo4j_user.as_str(),
                snapshot.neo4j_password.as_str(),
            ]),
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Neo4j connection credentials.
#[derive(Debug)]
pub struct Neo4jCredentials {
    pub uri: String,
    pub username: String,
    pub password: SecretString,
}

impl Neo4jCredentials {
    fn from_fields(mut fields: Vec<String>) -> Option<Self> {
        if fields.len() != 3 || fields.iter().any(|f| f.is_empty()) {
            return None;
        }
        let password = fields.pop()?;
        let username = fields.pop()?;
        let uri = fields.pop()?;
        Some(Self {
            uri,
            username,
            password: SecretString::from(password),
        })
    }
}

/// Resolves and persists credentials.
///
/// Nothing read from disk is cached: every call reopens the config document
/// and `.env` file. The environment snapshot is taken once, at construction.
pub struct CredentialsManager {
    config: ConfigFile,
    dotenv_path: std::path::PathBuf,
    secrets: Arc<SecretStoreAdapter>,
    env: Arc<dyn EnvSource>,
    snapshot: EnvSnapshot,
}

impl CredentialsManager {
    /// Build a manager, initializing the config document if needed.
    ///
    /// Dotenv files from `paths.dotenv_search` are merged into `env` before
    /// the snapshot is taken.
    pub fn new(
        paths: &HomeworkPaths,
        secrets: Arc<SecretStoreAdapter>,
        env: Arc<dyn EnvSource>,
    ) -> Self {
        let config = ConfigFile::new(&paths.config_file);
        if let Err(err) = config.ensure_initialized() {
            tracing::error!(error = %format!("{err:#}"), "Failed to create default configuration file");
        }

        let snapshot = load_environment(&paths.dotenv_search, env.as_ref());

        let manager = Self {
            config,
            dotenv_path: paths.dotenv_file.clone(),
            secrets,
            env,
            snapshot,
        };
        manager.backfill_username();
        manager
    }

    /// Copy the HuggingFace username from the environment when the
    /// environment has a token and the document has no username yet.
    fn backfill_username(&self) {
        if self.snapshot.huggingface_token.is_empty() || self.snapshot.huggingface_username.is_empty()
        {
            return;
        }
        if !self.config.load().huggingface_username.is_empty() {
            return;
        }

        let username = self.snapshot.huggingface_username.clone();
        match self
            .config
            .update(|config| config.huggingface_username = username)
        {
            Ok(()) => tracing::info!("Set HuggingFace username from environment"),
            Err(err) => {
                tracing::error!(error = %format!("{err:#}"), "Error extracting usernames from env")
            }
        }
    }

    pub fn config_path(&self) -> &Path {
        self.config.path()
    }

    pub fn snapshot(&self) -> &EnvSnapshot {
        &self.snapshot
    }

    pub fn secret_backend(&self) -> SecretBackend {
        self.secrets.backend()
    }

    /// The current config document.
    pub fn load_config(&self) -> AppConfig {
        self.config.load()
    }

    // Persistence

    pub fn save_huggingface_credentials(&self, username: &str, token: SecretString) -> bool {
        let username = username.to_string();
        self.persist(
            Domain::HuggingFace,
            &[token.expose_secret()],
            move |config| config.huggingface_username = username,
        )
    }

    pub fn save_openapi_key(&self, key: SecretString) -> bool {
        self.persist(Domain::OpenApi, &[key.expose_secret()], |_| {})
    }

    pub fn save_openai_key(&self, key: SecretString) -> bool {
        self.persist(Domain::OpenAi, &[key.expose_secret()], |_| {})
    }

    pub fn save_neo4j_credentials(&self, uri: &str, username: &str, password: SecretString) -> bool {
        let saved = self.persist(
            Domain::Neo4j,
            &[uri, username, password.expose_secret()],
            |_| {},
        );
        if saved {
            tracing::info!(uri, username, "Saved Neo4j credentials");
        }
        saved
    }

    /// Write `values` (parallel to the domain's secret keys) to the keystore,
    /// or to the config document when the keystore is unavailable or fails.
    ///
    /// `extra` applies non-secret changes to the document in the same write.
    fn persist(&self, domain: Domain, values: &[&str], extra: impl FnOnce(&mut AppConfig)) -> bool {
        let keys = domain.secret_keys();
        debug_assert_eq!(keys.len(), values.len());

        let in_keystore = self.store_in_keystore(domain, keys, values);

        let written = self.config.update(|config| {
            for (key, value) in keys.iter().zip(values) {
                // A keystore copy makes the plaintext one stale; drop it.
                let plaintext = (!in_keystore).then(|| value.to_string());
                config.set_plaintext_secret(key, plaintext);
            }
            extra(config);
        });

        let destination = if in_keystore {
            self.secrets.backend().as_str()
        } else {
            Tier::ConfigFile.as_str()
        };

        match written {
            Ok(()) => {
                tracing::info!(domain = %domain, destination, "Saved credentials");
                true
            }
            Err(err) if in_keystore => {
                tracing::warn!(domain = %domain, error = %format!("{err:#}"), "Saved credentials to keystore but failed to update config file");
                true
            }
            Err(err) => {
                tracing::error!(domain = %domain, error = %format!("{err:#}"), "Failed to save credentials");
                false
            }
        }
    }

    /// Write every field of `domain` to the keystore.
    ///
    /// A failed write removes all of the domain's keystore entries, so
    /// neither an older value nor a half-written set can shadow the copy
    /// that goes to the config file instead.
    fn store_in_keystore(&self, domain: Domain, keys: &[&str], values: &[&str]) -> bool {
        if !self.secrets.is_available() {
            return false;
        }
        for (key, value) in keys.iter().zip(values) {
            let secret = SecretString::from(value.to_string());
            if let Err(err) = self.secrets.set(SERVICE_NAME, key, secret) {
                tracing::warn!(domain = %domain, error = %format!("{err:#}"), "Keystore save failed, storing in config file");
                self.clear_keystore(domain, keys);
                return false;
            }
        }
        true
    }

    /// Remove `keys` from the keystore. If that fails the keystore is
    /// disabled, since its entries can no longer be trusted.
    fn clear_keystore(&self, domain: Domain, keys: &[&str]) {
        for key in keys {
            if let Err(err) = self.secrets.delete(SERVICE_NAME, key) {
                tracing::error!(domain = %domain, error = %format!("{err:#}"), "Could not remove keystore entries after failed save");
                self.secrets.disable();
                return;
            }
        }
    }

    // Resolution

    /// Resolve a domain's field values and report where they came from.
    ///
    /// A domain resolves only when every one of its fields is non-empty in
    /// the same tier.
    pub fn resolve(&self, domain: Domain) -> Option<Resolved<Vec<String>>> {
        let config = self.config.load();

        let resolved = resolve_first(domain.tiers(), |tier| {
            let values = self.lookup(domain, tier, &config)?;
            values.iter().all(|v| !v.is_empty()).then_some(values)
        });

        match &resolved {
            Some(resolved) => {
                tracing::debug!(domain = %domain, source = %resolved.source, "Resolved credentials");
                if resolved.source == Tier::DotenvFile {
                    self.export(domain, &resolved.value);
                }
            }
            None => tracing::debug!(domain = %domain, "Credentials not found in any location"),
        }
        resolved
    }

    fn lookup(&self, domain: Domain, tier: Tier, config: &AppConfig) -> Option<Vec<String>> {
        match tier {
            Tier::ProcessEnv => domain
                .env_vars()
                .iter()
                .map(|key| self.env.non_empty(key))
                .collect(),
            Tier::SecretStore => {
                if !self.secrets.is_available() {
                    return None;
                }
                domain
                    .secret_keys()
                    .iter()
                    .map(|key| {
                        self.secrets
                            .get(SERVICE_NAME, key)
                            .map(|v| v.expose_secret().to_string())
                    })
                    .collect()
            }
            Tier::ConfigFile => domain
                .secret_keys()
                .iter()
                .map(|key| config.plaintext_secret(key).map(str::to_string))
                .collect(),
            Tier::EnvSnapshot => domain
                .snapshot_values(&self.snapshot)
                .map(|values| values.into_iter().map(str::to_string).collect()),
            Tier::DotenvFile => {
                let wanted = domain.env_vars();
                let mut found = match scan_dotenv(&self.dotenv_path, wanted) {
                    Ok(found) => found,
                    Err(err) => {
                        tracing::warn!(error = %format!("{err:#}"), "Error reading .env file directly");
                        return None;
                    }
                };
                wanted.iter().map(|key| found.remove(*key)).collect()
            }
        }
    }

    /// Put values found only in the `.env` file into the process environment
    /// so later lookups (and child processes) see them.
    fn export(&self, domain: Domain, values: &[String]) {
        for (key, value) in domain.env_vars().iter().zip(values) {
            if self.env.non_empty(key).is_none() {
                self.env.set_var(key, value);
            }
        }
        tracing::info!(domain = %domain, "Exported credentials found in .env file to the environment");
    }

    fn resolve_token(&self, domain: Domain) -> Option<SecretString> {
        self.resolve(domain)
            .and_then(|resolved| resolved.value.into_iter().next())
            .map(SecretString::from)
    }

    /// HuggingFace username (possibly empty) and token.
    pub fn get_huggingface_credentials(&self) -> (String, Option<SecretString>) {
        let username = self.get_huggingface_username();
        (username, self.resolve_token(Domain::HuggingFace))
    }

    pub fn get_huggingface_username(&self) -> String {
        self.config.load().huggingface_username
    }

    pub fn get_openapi_key(&self) -> Option<SecretString> {
        self.resolve_token(Domain::OpenApi)
    }

    pub fn get_openai_key(&self) -> Option<SecretString> {
        self.resolve_token(Domain::OpenAi)
    }

    pub fn get_neo4j_credentials(&self) -> Option<Neo4jCredentials> {
        let resolved = self.resolve(Domain::Neo4j)?;
        Neo4jCredentials::from_fields(resolved.value)
    }

    /// Whether `domain` resolves from any tier.
    pub fn is_configured(&self, domain: Domain) -> bool {
        self.resolve(domain).is_some()
    }

    // Settings

    pub fn get_server_port(&self) -> u16 {
        self.config.load().server_port
    }

    pub fn save_server_port(&self, port: u16) -> bool {
        match self.config.update(|config| config.server_port = port) {
            Ok(()) => {
                tracing::info!(port, "Saved server port");
                true
            }
            Err(err) => {
                tracing::error!(error = %format!("{err:#}"), "Failed to save server port");
                false
            }
        }
    }

    pub fn get_temp_dir(&self) -> String {
        self.config.load().temp_dir
    }

    /// Create `dir` and record it as the temp directory.
    pub fn save_temp_dir(&self, dir: &Path) -> bool {
        let result = std::fs::create_dir_all(dir)
            .map_err(anyhow::Error::from)
            .and_then(|()| {
                let dir = dir.display().to_string();
                self.config.update(|config| config.temp_dir = dir)
            });
        match result {
            Ok(()) => {
                tracing::info!(dir = %dir.display(), "Saved temporary directory");
                true
            }
            Err(err) => {
                tracing::error!(error = %format!("{err:#}"), "Failed to save temporary directory");
                false
            }
        }
    }
}

impl std::fmt::Debug for CredentialsManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsManager")
            .field("config", &self.config)
            .field("dotenv_path", &self.dotenv_path)
            .field("secrets", &self.secrets)
            .field("snapshot", &self.snapshot)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::MemorySecretStore;
    use crate::env::MemoryEnv;
    use tempfile::TempDir;

    fn secret(value: &str) -> SecretString {
        SecretString::from(value.to_string())
    }

    fn manager(dir: &TempDir, secrets: SecretStoreAdapter, env: MemoryEnv) -> CredentialsManager {
        let paths = HomeworkPaths::rooted_at(dir.path().join("config"), dir.path());
        CredentialsManager::new(&paths, Arc::new(secrets), Arc::new(env))
    }

    #[test]
    fn test_construction_creates_config() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, SecretStoreAdapter::unavailable(), MemoryEnv::new());
        assert!(manager.config_path().exists());
        assert_eq!(manager.get_server_port(), 8080);
    }

    #[test]
    fn test_backfills_username_from_env() {
        let dir = TempDir::new().unwrap();
        let env = MemoryEnv::new()
            .with_var(keys::HUGGINGFACE_TOKEN, "hf_env")
            .with_var(keys::HUGGINGFACE_USERNAME, "env-user");
        let manager = manager(&dir, SecretStoreAdapter::unavailable(), env);
        assert_eq!(manager.get_huggingface_username(), "env-user");
    }

    #[test]
    fn test_username_not_backfilled_without_token() {
        let dir = TempDir::new().unwrap();
        let env = MemoryEnv::new().with_var(keys::HUGGINGFACE_USERNAME, "env-user");
        let manager = manager(&dir, SecretStoreAdapter::unavailable(), env);
        assert_eq!(manager.get_huggingface_username(), "");
    }

    #[test]
    fn test_keystore_save_skips_config_plaintext() {
        let dir = TempDir::new().unwrap();
        let secrets = SecretStoreAdapter::with_store(
            Box::new(MemorySecretStore::new()),
            SecretBackend::Plaintext,
        );
        let manager = manager(&dir, secrets, MemoryEnv::new());

        assert!(manager.save_openai_key(secret("sk-keystore")));
        assert!(manager.load_config().openai_key.is_none());

        let resolved = manager.resolve(Domain::OpenAi).expect("resolved");
        assert_eq!(resolved.source, Tier::SecretStore);
        assert_eq!(resolved.value, vec!["sk-keystore".to_string()]);
    }

    #[test]
    fn test_neo4j_requires_all_fields_in_one_tier() {
        let dir = TempDir::new().unwrap();
        let env = MemoryEnv::new()
            .with_var(keys::NEO4J_URI, "bolt://env")
            .with_var(keys::NEO4J_USER, "env-user");
        let manager = manager(&dir, SecretStoreAdapter::unavailable(), env);

        assert!(manager.get_neo4j_credentials().is_none());
    }

    #[test]
    fn test_openapi_skips_snapshot_tier() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".env"), "OPENAPI_KEY=from-dotenv\n").unwrap();
        let manager = manager(&dir, SecretStoreAdapter::unavailable(), MemoryEnv::new());

        let resolved = manager.resolve(Domain::OpenApi).expect("resolved");
        assert_eq!(resolved.source, Tier::DotenvFile);
    }

    #[test]
    fn test_save_temp_dir_creates_directory() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, SecretStoreAdapter::unavailable(), MemoryEnv::new());
        let temp = dir.path().join("scratch").join("tmp");

        assert!(manager.save_temp_dir(&temp));
        assert!(temp.is_dir());
        assert_eq!(manager.get_temp_dir(), temp.display().to_string());
    }

    #[test]
    fn test_save_server_port() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, SecretStoreAdapter::unavailable(), MemoryEnv::new());
        assert!(manager.save_server_port(9090));
        assert_eq!(manager.get_server_port(), 9090);
    }
}
