//! Credential storage and resolution.
//!
//! Secrets live in up to four places: the process environment, `.env`
//! files, the JSON config document, and a keystore. The keystore is the OS
//! credential facility when it works, a plaintext JSON file otherwise, or
//! nothing at all. [`SecretStoreAdapter::probe`] picks one once per process;
//! [`CredentialsManager`] resolves each credential domain across all tiers
//! in a fixed order.

mod adapter;
#[cfg(feature = "keystore")]
mod os_keyring;
mod manager;
mod memory;
mod plaintext;
mod tier;

pub use adapter::{NoopSecretStore, SecretBackend, SecretStoreAdapter, StoreCandidate};
#[cfg(feature = "keystore")]
pub use os_keyring::KeyringSecretStore;
pub use manager::{CredentialsManager, Domain, Neo4jCredentials};
pub use memory::MemorySecretStore;
pub use plaintext::PlaintextSecretStore;
pub use tier::{Resolved, Tier};

use anyhow::Result;
use secrecy::SecretString;

/// Keystore service name all credentials are filed under.
pub const SERVICE_NAME: &str = "othertales_homework";

/// A keystore holding secrets by `(service, key)`.
///
/// Implementations are synchronous; every backend here is either a local
/// file or a blocking OS call.
pub trait SecretStore: Send + Sync {
    /// Retrieve a secret.
    ///
    /// Returns `Ok(None)` if the key doesn't exist.
    /// Returns `Err` if there was an error accessing the backend.
    fn get(&self, service: &str, key: &str) -> Result<Option<SecretString>>;

    /// Store a secret, replacing any previous value.
    fn set(&self, service: &str, key: &str, value: SecretString) -> Result<()>;

    /// Remove a secret. Removing a missing key is not an error.
    fn delete(&self, service: &str, key: &str) -> Result<()>;

    /// Make a trivial call proving the backend actually responds.
    fn check(&self) -> Result<()>;
}
