//! Keystore selection and availability tracking.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use secrecy::SecretString;

use super::{PlaintextSecretStore, SecretStore};

/// Which keystore implementation the probe activated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretBackend {
    /// The OS credential facility.
    Keyring,
    /// The plaintext JSON file fallback.
    Plaintext,
    /// No keystore; secrets go to the config document.
    Unavailable,
}

impl SecretBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecretBackend::Keyring => "keyring",
            SecretBackend::Plaintext => "plaintext",
            SecretBackend::Unavailable => "unavailable",
        }
    }
}

impl std::fmt::Display for SecretBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keystore that holds nothing and accepts nothing.
#[derive(Debug, Clone, Default)]
pub struct NoopSecretStore;

impl SecretStore for NoopSecretStore {
    fn get(&self, _service: &str, _key: &str) -> Result<Option<SecretString>> {
        Ok(None)
    }

    fn set(&self, _service: &str, _key: &str, _value: SecretString) -> Result<()> {
        Ok(())
    }

    fn delete(&self, _service: &str, _key: &str) -> Result<()> {
        Ok(())
    }

    fn check(&self) -> Result<()> {
        Ok(())
    }
}

/// A keystore the probe may activate, with its constructor.
pub struct StoreCandidate {
    pub backend: SecretBackend,
    pub open: Box<dyn FnOnce() -> Result<Box<dyn SecretStore>>>,
}

impl StoreCandidate {
    pub fn new(
        backend: SecretBackend,
        open: impl FnOnce() -> Result<Box<dyn SecretStore>> + 'static,
    ) -> Self {
        Self {
            backend,
            open: Box::new(open),
        }
    }
}

/// The keystore capability shared by every consumer in the process.
///
/// Build it once at startup (usually with [`SecretStoreAdapter::probe`]) and
/// hand out `Arc` clones. Availability starts as whatever the probe found
/// and can only ever go from available to unavailable: a keystore error
/// during a lookup disables it for the rest of the process.
pub struct SecretStoreAdapter {
    store: Box<dyn SecretStore>,
    backend: SecretBackend,
    available: AtomicBool,
}

impl SecretStoreAdapter {
    /// Probe the OS keystore, then the plaintext file fallback at `plaintext_path`.
    pub fn probe(plaintext_path: &Path) -> Self {
        let mut candidates = Vec::new();

        #[cfg(feature = "keystore")]
        candidates.push(StoreCandidate::new(SecretBackend::Keyring, || {
            Ok(Box::new(super::KeyringSecretStore::new()) as Box<dyn SecretStore>)
        }));

        let plaintext_path = plaintext_path.to_path_buf();
        candidates.push(StoreCandidate::new(SecretBackend::Plaintext, move || {
            Ok(Box::new(PlaintextSecretStore::open(plaintext_path)?) as Box<dyn SecretStore>)
        }));

        Self::probe_candidates(candidates)
    }

    /// Activate the first candidate that opens and answers [`SecretStore::check`].
    pub fn probe_candidates(candidates: Vec<StoreCandidate>) -> Self {
        for candidate in candidates {
            let backend = candidate.backend;
            let store = (candidate.open)().and_then(|store| store.check().map(|()| store));
            match store {
                Ok(store) => {
                    tracing::info!(backend = %backend, "Keystore is available and will be used for storing credentials");
                    return Self::with_store(store, backend);
                }
                Err(err) => {
                    tracing::warn!(backend = %backend, error = %format!("{err:#}"), "Keystore backend not usable");
                }
            }
        }

        tracing::warn!("No usable keystore; credentials will be stored in the config file (less secure)");
        Self::unavailable()
    }

    /// Wrap an already-working store.
    pub fn with_store(store: Box<dyn SecretStore>, backend: SecretBackend) -> Self {
        Self {
            store,
            backend,
            available: AtomicBool::new(backend != SecretBackend::Unavailable),
        }
    }

    /// An adapter with no keystore.
    pub fn unavailable() -> Self {
        Self::with_store(Box::new(NoopSecretStore), SecretBackend::Unavailable)
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// The active backend, or `Unavailable` once disabled.
    pub fn backend(&self) -> SecretBackend {
        if self.is_available() {
            self.backend
        } else {
            SecretBackend::Unavailable
        }
    }

    /// Stop using the keystore for the rest of the process.
    pub fn disable(&self) {
        if self.available.swap(false, Ordering::AcqRel) {
            tracing::warn!(backend = %self.backend, "Keystore disabled for this session");
        }
    }

    /// Look up a secret.
    ///
    /// Reports absent when unavailable. Any backend error disables the
    /// keystore and reports absent.
    pub fn get(&self, service: &str, key: &str) -> Option<SecretString> {
        if !self.is_available() {
            return None;
        }
        match self.store.get(service, key) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(key, error = %format!("{err:#}"), "Error accessing keystore");
                self.disable();
                None
            }
        }
    }

    /// Store a secret. A no-op when unavailable.
    pub fn set(&self, service: &str, key: &str, value: SecretString) -> Result<()> {
        if !self.is_available() {
            tracing::debug!(key, "Keystore unavailable; skipping write");
            return Ok(());
        }
        self.store.set(service, key, value)
    }

    /// Remove a secret. A no-op when unavailable.
    pub fn delete(&self, service: &str, key: &str) -> Result<()> {
        if !self.is_available() {
            return Ok(());
        }
        self.store.delete(service, key)
    }
}

impl std::fmt::Debug for SecretStoreAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretStoreAdapter")
            .field("backend", &self.backend)
            .field("available", &self.is_available())
            .finish()
    }
}
