//! Plaintext file keystore.
//!
//! Fallback used when the OS keystore isn't usable. Secrets are kept
//! unencrypted in a JSON file restricted to the owner:
//!
//! ```json
//! {
//!   "othertales_homework": {
//!     "openai_key": "sk-..."
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};

use super::SecretStore;
use crate::config::restrict_to_owner;

type Entries = BTreeMap<String, BTreeMap<String, String>>;

/// Keystore backed by a plaintext JSON file.
#[derive(Debug, Clone)]
pub struct PlaintextSecretStore {
    path: PathBuf,
}

impl PlaintextSecretStore {
    /// Open the store, creating its parent directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create keystore dir: {}", parent.display()))?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Entries> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Entries::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read keystore file: {}", self.path.display()))
            }
        };
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse keystore file: {}", self.path.display()))
    }

    fn write(&self, entries: &Entries) -> Result<()> {
        let content =
            serde_json::to_string_pretty(entries).context("Failed to serialize keystore")?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write keystore file: {}", self.path.display()))?;
        if let Err(err) = restrict_to_owner(&self.path) {
            tracing::warn!(error = %format!("{err:#}"), "Could not set secure permissions on keystore file");
        }
        Ok(())
    }
}

impl SecretStore for PlaintextSecretStore {
    fn get(&self, service: &str, key: &str) -> Result<Option<SecretString>> {
        let entries = self.read()?;
        Ok(entries
            .get(service)
            .and_then(|fields| fields.get(key))
            .map(|v| SecretString::from(v.clone())))
    }

    fn set(&self, service: &str, key: &str, value: SecretString) -> Result<()> {
        let mut entries = self.read()?;
        entries
            .entry(service.to_string())
            .or_default()
            .insert(key.to_string(), value.expose_secret().to_string());
        self.write(&entries)
    }

    fn delete(&self, service: &str, key: &str) -> Result<()> {
        let mut entries = self.read()?;
        let Some(fields) = entries.get_mut(service) else {
            return Ok(());
        };
        if fields.remove(key).is_none() {
            return Ok(());
        }
        if fields.is_empty() {
            entries.remove(service);
        }
        self.write(&entries)
    }

    fn check(&self) -> Result<()> {
        self.read().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_set_then_get() -> Result<()> {
        let dir = TempDir::new()?;
        let store = PlaintextSecretStore::open(dir.path().join("sub").join("keys.json"))?;

        assert!(store.get("svc", "token")?.is_none());
        store.set("svc", "token", SecretString::from("abc".to_string()))?;
        store.set("svc", "other", SecretString::from("def".to_string()))?;

        let token = store.get("svc", "token")?.expect("token stored");
        assert_eq!(token.expose_secret(), "abc");
        assert!(store.get("other-svc", "token")?.is_none());
        Ok(())
    }

    #[test]
    fn test_delete_removes_only_that_key() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("keys.json");
        let store = PlaintextSecretStore::open(&path)?;
        store.set("svc", "a", SecretString::from("1".to_string()))?;
        store.set("svc", "b", SecretString::from("2".to_string()))?;

        store.delete("svc", "a")?;
        store.delete("svc", "missing")?;
        store.delete("other-svc", "a")?;

        assert!(store.get("svc", "a")?.is_none());
        assert_eq!(store.get("svc", "b")?.expect("kept").expose_secret(), "2");

        store.delete("svc", "b")?;
        let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(raw, serde_json::json!({}));
        Ok(())
    }

    #[test]
    fn test_check_rejects_corrupt_file() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("keys.json");
        let store = PlaintextSecretStore::open(&path)?;
        store.check()?;

        std::fs::write(&path, "garbage")?;
        assert!(store.check().is_err());
        Ok(())
    }
}
