#![allow(dead_code)]

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use homework::config::HomeworkPaths;
use homework::credentials::{
    CredentialsManager, MemorySecretStore, SecretStore, SecretStoreAdapter,
};
use homework::dotenv::DotenvFile;
use homework::env::{EnvSource, MemoryEnv};
use homework::handler::ConfigurationHandler;
use secrecy::SecretString;
use tempfile::TempDir;

/// A config directory and working directory inside one temp dir.
pub struct Sandbox {
    pub dir: TempDir,
    pub paths: HomeworkPaths,
}

impl Sandbox {
    pub fn new() -> Result<Self> {
        let dir = TempDir::new()?;
        let paths = HomeworkPaths::rooted_at(dir.path().join("config"), dir.path());
        Ok(Self { dir, paths })
    }

    pub fn write_dotenv(&self, contents: &str) -> Result<()> {
        fs::write(&self.paths.dotenv_file, contents)?;
        Ok(())
    }

    pub fn read_dotenv(&self) -> Result<String> {
        Ok(fs::read_to_string(&self.paths.dotenv_file)?)
    }

    pub fn read_config(&self) -> Result<serde_json::Value> {
        let raw = fs::read_to_string(&self.paths.config_file)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn manager(
        &self,
        secrets: Arc<SecretStoreAdapter>,
        env: Arc<dyn EnvSource>,
    ) -> CredentialsManager {
        CredentialsManager::new(&self.paths, secrets, env)
    }

    /// Manager with no keystore and an empty environment.
    pub fn plain_manager(&self) -> CredentialsManager {
        self.manager(
            Arc::new(SecretStoreAdapter::unavailable()),
            Arc::new(MemoryEnv::new()),
        )
    }

    pub fn handler(
        &self,
        secrets: Arc<SecretStoreAdapter>,
        env: Arc<dyn EnvSource>,
    ) -> ConfigurationHandler {
        let credentials = Arc::new(self.manager(secrets, env.clone()));
        ConfigurationHandler::new(credentials, env, DotenvFile::new(&self.paths.dotenv_file))
    }
}

pub fn secret(value: &str) -> SecretString {
    SecretString::from(value.to_string())
}

/// A keystore whose reads and writes always fail, counting each attempt.
#[derive(Default)]
pub struct FailingStore {
    pub calls: Arc<AtomicUsize>,
}

impl FailingStore {
    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl SecretStore for FailingStore {
    fn get(&self, _service: &str, _key: &str) -> Result<Option<SecretString>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("keystore locked")
    }

    fn set(&self, _service: &str, _key: &str, _value: SecretString) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("keystore locked")
    }

    fn delete(&self, _service: &str, _key: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("keystore locked")
    }

    fn check(&self) -> Result<()> {
        anyhow::bail!("keystore locked")
    }
}

/// A shared in-memory keystore whose `fail_on`-th write (counting from 1)
/// fails. Every other call goes through.
pub struct FlakyStore {
    inner: Arc<MemorySecretStore>,
    sets: AtomicUsize,
    fail_on: usize,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemorySecretStore>, fail_on: usize) -> Self {
        Self {
            inner,
            sets: AtomicUsize::new(0),
            fail_on,
        }
    }
}

impl SecretStore for FlakyStore {
    fn get(&self, service: &str, key: &str) -> Result<Option<SecretString>> {
        self.inner.get(service, key)
    }

    fn set(&self, service: &str, key: &str, value: SecretString) -> Result<()> {
        let n = self.sets.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_on {
            anyhow::bail!("write {n} rejected");
        }
        self.inner.set(service, key, value)
    }

    fn delete(&self, service: &str, key: &str) -> Result<()> {
        self.inner.delete(service, key)
    }

    fn check(&self) -> Result<()> {
        Ok(())
    }
}
