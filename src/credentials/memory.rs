//! In-memory keystore for testing.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use secrecy::{ExposeSecret, SecretString};

use super::SecretStore;

#[derive(Debug, Default)]
pub struct MemorySecretStore {
    entries: Mutex<HashMap<(String, String), String>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("keystore lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SecretStore for MemorySecretStore {
    fn get(&self, service: &str, key: &str) -> Result<Option<SecretString>> {
        let entries = self.entries.lock().expect("keystore lock poisoned");
        Ok(entries
            .get(&(service.to_string(), key.to_string()))
            .map(|v| SecretString::from(v.clone())))
    }

    fn set(&self, service: &str, key: &str, value: SecretString) -> Result<()> {
        let mut entries = self.entries.lock().expect("keystore lock poisoned");
        entries.insert(
            (service.to_string(), key.to_string()),
            value.expose_secret().to_string(),
        );
        Ok(())
    }

    fn delete(&self, service: &str, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().expect("keystore lock poisoned");
        entries.remove(&(service.to_string(), key.to_string()));
        Ok(())
    }

    fn check(&self) -> Result<()> {
        Ok(())
    }
}
