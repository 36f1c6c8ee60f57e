/// A storage backend in the resolution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// A variable set in the process environment at lookup time.
    ProcessEnv,
    /// The keystore picked by the probe.
    SecretStore,
    /// A plaintext field in the JSON config document.
    ConfigFile,
    /// The environment snapshot taken when the manager was built.
    EnvSnapshot,
    /// A direct scan of the working-directory `.env` file.
    DotenvFile,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::ProcessEnv => "process environment",
            Tier::SecretStore => "keystore",
            Tier::ConfigFile => "config file",
            Tier::EnvSnapshot => "environment snapshot",
            Tier::DotenvFile => ".env file",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value together with the tier that supplied it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved<T> {
    pub value: T,
    pub source: Tier,
}

/// Try `tiers` in order; the first lookup that yields a value wins.
pub(crate) fn resolve_first<T>(
    tiers: &[Tier],
    mut lookup: impl FnMut(Tier) -> Option<T>,
) -> Option<Resolved<T>> {
    tiers
        .iter()
        .find_map(|&tier| lookup(tier).map(|value| Resolved { value, source: tier }))
}
