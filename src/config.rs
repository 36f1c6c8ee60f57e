use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Directory name used under the platform config dir (or `~/.<name>`).
pub const APP_DIR_NAME: &str = "othertales_homework";

/// Fixed dotenv location used by container deployments.
pub const CONTAINER_DOTENV_PATH: &str = "/app/.env";

/// Keys of the config document that hold plaintext secrets.
pub const SECRET_FIELDS: [&str; 6] = [
    "huggingface_token",
    "openapi_key",
    "openai_key",
    "neo4j_uri",
    "neo4j_username",
    "neo4j_password",
];

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8080;

fn default_server_port() -> u16 {
    DEFAULT_SERVER_PORT
}

/// Default temp directory (`~/.othertales_homework/temp`).
pub fn default_temp_dir() -> String {
    let dir = match dirs::home_dir() {
        Some(home) => home.join(format!(".{APP_DIR_NAME}")).join("temp"),
        None => std::env::temp_dir().join(APP_DIR_NAME),
    };
    dir.display().to_string()
}

/// The JSON config document.
///
/// Holds non-secret settings and, when no keystore took them, plaintext
/// copies of secrets. Keys this version doesn't know about are kept in
/// `extra` so a read-modify-write never drops them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub huggingface_username: String,

    #[serde(default = "default_server_port")]
    pub server_port: u16,

    #[serde(default = "default_temp_dir")]
    pub temp_dir: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub huggingface_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openapi_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neo4j_uri: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neo4j_username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neo4j_password: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            huggingface_username: String::new(),
            server_port: default_server_port(),
            temp_dir: default_temp_dir(),
            huggingface_token: None,
            openapi_key: None,
            openai_key: None,
            neo4j_uri: None,
            neo4j_username: None,
            neo4j_password: None,
            extra: serde_json::Map::new(),
        }
    }
}

impl AppConfig {
    /// Plaintext secret stored under `key`, if any and non-empty.
    pub fn plaintext_secret(&self, key: &str) -> Option<&str> {
        let value = match key {
            "huggingface_token" => self.huggingface_token.as_deref(),
            "openapi_key" => self.openapi_key.as_deref(),
            "openai_key" => self.openai_key.as_deref(),
            "neo4j_uri" => self.neo4j_uri.as_deref(),
            "neo4j_username" => self.neo4j_username.as_deref(),
            "neo4j_password" => self.neo4j_password.as_deref(),
            other => self.extra.get(other).and_then(|v| v.as_str()),
        };
        value.filter(|v| !v.is_empty())
    }

    /// Set (or clear, with `None`) the plaintext secret stored under `key`.
    pub fn set_plaintext_secret(&mut self, key: &str, value: Option<String>) {
        let slot = match key {
            "huggingface_token" => &mut self.huggingface_token,
            "openapi_key" => &mut self.openapi_key,
            "openai_key" => &mut self.openai_key,
            "neo4j_uri" => &mut self.neo4j_uri,
            "neo4j_username" => &mut self.neo4j_username,
            "neo4j_password" => &mut self.neo4j_password,
            other => {
                match value {
                    Some(value) => {
                        self.extra
                            .insert(other.to_string(), serde_json::Value::String(value));
                    }
                    None => {
                        self.extra.remove(other);
                    }
                }
                return;
            }
        };
        *slot = value;
    }

    /// JSON rendering with every secret field masked, for logging.
    pub fn redacted(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(map) = value.as_object_mut() {
            for key in SECRET_FIELDS {
                if let Some(field) = map.get_mut(key) {
                    *field = serde_json::Value::String("*****".to_string());
                }
            }
        }
        value
    }
}

/// File locations used by the credential layer.
#[derive(Debug, Clone)]
pub struct HomeworkPaths {
    /// Directory holding the config document and the plaintext keystore.
    pub config_dir: PathBuf,

    /// The JSON config document.
    pub config_file: PathBuf,

    /// File used by the plaintext keystore fallback.
    pub plaintext_secrets_file: PathBuf,

    /// The working-directory `.env` file (direct scans and handler writes).
    pub dotenv_file: PathBuf,

    /// Dotenv files merged into the environment, in load order.
    pub dotenv_search: Vec<PathBuf>,
}

impl HomeworkPaths {
    /// Paths rooted at explicit directories.
    ///
    /// The dotenv search list is just `<working_dir>/.env`; use
    /// [`HomeworkPaths::discover`] for the full search list.
    pub fn rooted_at(config_dir: impl AsRef<Path>, working_dir: impl AsRef<Path>) -> Self {
        let config_dir = config_dir.as_ref().to_path_buf();
        let dotenv_file = working_dir.as_ref().join(".env");
        Self {
            config_file: config_dir.join("config.json"),
            plaintext_secrets_file: config_dir.join("plaintext_keyring.json"),
            dotenv_search: vec![dotenv_file.clone()],
            dotenv_file,
            config_dir,
        }
    }

    /// Resolve paths for the current process.
    ///
    /// Config directory resolution order:
    /// 1. `config_dir_override` if given
    /// 2. `<platform config dir>/othertales_homework`
    /// 3. `~/.othertales_homework`
    ///
    /// Dotenv files are searched in the current directory, its parent, the
    /// home directory, then `/app/.env`.
    pub fn discover(config_dir_override: Option<&Path>) -> Result<Self> {
        let working_dir = std::env::current_dir().context("Failed to get current directory")?;

        let config_dir = match config_dir_override {
            Some(dir) => dir.to_path_buf(),
            None => default_config_dir().context("Could not find a config directory")?,
        };

        let mut paths = Self::rooted_at(&config_dir, &working_dir);
        paths.dotenv_search = default_dotenv_search(&working_dir);
        Ok(paths)
    }
}

/// Returns the default config directory.
pub fn default_config_dir() -> Option<PathBuf> {
    if let Some(config_dir) = dirs::config_dir() {
        return Some(config_dir.join(APP_DIR_NAME));
    }
    dirs::home_dir().map(|home| home.join(format!(".{APP_DIR_NAME}")))
}

/// Candidate dotenv files, in load order.
pub fn default_dotenv_search(working_dir: &Path) -> Vec<PathBuf> {
    let mut candidates = vec![working_dir.join(".env")];
    if let Some(parent) = working_dir.parent() {
        candidates.push(parent.join(".env"));
    }
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".env"));
    }
    candidates.push(PathBuf::from(CONTAINER_DOTENV_PATH));
    candidates
}

/// Restrict a file to owner read/write.
///
/// A no-op error on platforms without Unix permissions.
pub fn restrict_to_owner(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(path)
            .with_context(|| format!("Failed to stat {}", path.display()))?
            .permissions();
        perms.set_mode(0o600);
        std::fs::set_permissions(path, perms)
            .with_context(|| format!("Failed to set permissions on {}", path.display()))?;
        Ok(())
    }

    #[cfg(not(unix))]
    {
        anyhow::bail!(
            "Owner-only permissions are not supported on this platform: {}",
            path.display()
        )
    }
}

/// The on-disk config document.
///
/// Every call reopens the file; nothing is cached between calls.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    path: PathBuf,
}

impl ConfigFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the document with defaults if it doesn't exist.
    ///
    /// Returns `true` when a new file was written.
    pub fn ensure_initialized(&self) -> Result<bool> {
        if self.path.exists() {
            return Ok(false);
        }
        self.save(&AppConfig::default())?;
        tracing::info!(path = %self.path.display(), "Created default configuration file");
        Ok(true)
    }

    /// Load the document strictly, returning `None` if the file doesn't exist.
    pub fn try_load(&self) -> Result<Option<AppConfig>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read config file: {}", self.path.display()))
            }
        };

        let config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", self.path.display()))?;
        Ok(Some(config))
    }

    /// Load the document, falling back to defaults on any error.
    pub fn load(&self) -> AppConfig {
        match self.try_load() {
            Ok(Some(config)) => config,
            Ok(None) => AppConfig::default(),
            Err(err) => {
                tracing::error!(error = %format!("{err:#}"), "Failed to load config; using defaults");
                AppConfig::default()
            }
        }
    }

    /// Write the whole document, then restrict it to the owner.
    pub fn save(&self, config: &AppConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config dir: {}", parent.display()))?;
        }

        tracing::debug!(config = %config.redacted(), "Saving configuration");

        let content =
            serde_json::to_string_pretty(config).context("Failed to serialize config")?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write config file: {}", self.path.display()))?;

        if let Err(err) = restrict_to_owner(&self.path) {
            tracing::warn!(error = %format!("{err:#}"), "Could not set secure permissions on config file");
        }

        Ok(())
    }

    /// Read-modify-write the document.
    pub fn update<T>(&self, f: impl FnOnce(&mut AppConfig) -> T) -> Result<T> {
        let mut config = self.load();
        let out = f(&mut config);
        self.save(&config)?;
        Ok(out)
    }
}
