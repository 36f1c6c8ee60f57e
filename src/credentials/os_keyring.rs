//! OS keystore backend (macOS Keychain, Windows Credential Manager, Linux
//! kernel keyring) via the `keyring` crate.

use anyhow::{Context, Result};
use keyring::Entry;
use secrecy::{ExposeSecret, SecretString};

use super::{SecretStore, SERVICE_NAME};

/// Account name used for the probe entry. It is never written.
const PROBE_KEY: &str = "__homework_probe__";

#[derive(Debug, Clone, Default)]
pub struct KeyringSecretStore;

impl KeyringSecretStore {
    pub fn new() -> Self {
        Self
    }

    fn entry(service: &str, key: &str) -> Result<Entry> {
        Entry::new(service, key)
            .with_context(|| format!("Failed to open keyring entry {service}/{key}"))
    }
}

impl SecretStore for KeyringSecretStore {
    fn get(&self, service: &str, key: &str) -> Result<Option<SecretString>> {
        match Self::entry(service, key)?.get_password() {
            Ok(value) => Ok(Some(SecretString::from(value))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read keyring entry {service}/{key}")),
        }
    }

    fn set(&self, service: &str, key: &str, value: SecretString) -> Result<()> {
        Self::entry(service, key)?
            .set_password(value.expose_secret())
            .with_context(|| format!("Failed to write keyring entry {service}/{key}"))
    }

    fn delete(&self, service: &str, key: &str) -> Result<()> {
        match Self::entry(service, key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete keyring entry {service}/{key}")),
        }
    }

    fn check(&self) -> Result<()> {
        // A missing entry proves the backend answered.
        match Self::entry(SERVICE_NAME, PROBE_KEY)?.get_password() {
            Ok(_) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Keyring backend is not usable"),
        }
    }
}
