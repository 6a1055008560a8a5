//! Configuration source wrangling
// (c) 2024 Ross Younger

use std::fmt::Write as _;

use figment::{Figment, Provider, providers::Env};
use serde::Deserialize;

use super::{Configuration, ConfigFileError, SystemDefault};

/// Prefix of environment variables that set configuration fields, e.g. `TRICKLE_RECV_TIMEOUT`
pub const ENV_PREFIX: &str = "TRICKLE_";

/// Processes and merges all configuration sources.
///
/// In increasing order of priority:
/// 1. System defaults
/// 2. Environment variables
/// 3. Command line
#[derive(Debug, Clone)]
pub struct Manager {
    data: Figment,
}

impl Manager {
    fn new(apply_env: bool) -> Self {
        let mut new1 = Self {
            data: Figment::new(),
        };
        if apply_env {
            new1.merge_provider(Env::prefixed(ENV_PREFIX));
        }
        new1
    }

    /// General constructor for production use. Reads the environment, but does not apply system defaults.
    #[must_use]
    pub fn standard() -> Self {
        Self::new(true)
    }

    /// Testing constructor: does not read the environment; DOES apply system default
    #[must_use]
    #[cfg(test)]
    pub(crate) fn without_env() -> Self {
        let mut new1 = Self::new(false);
        new1.apply_system_default();
        new1
    }

    /// Testing constructor: neither reads the environment nor applies system default
    #[must_use]
    #[cfg(test)]
    pub(crate) fn without_default() -> Self {
        Self::new(false)
    }

    /// Merges in a data set, which is some sort of [figment::Provider](https://docs.rs/figment/latest/figment/trait.Provider.html).
    /// This uses figment's `merge` operation, which prefers to _replace_ existing items.
    pub fn merge_provider<T>(&mut self, provider: T)
    where
        T: Provider,
    {
        let f = std::mem::take(&mut self.data);
        self.data = f.merge(provider);
    }

    /// Applies the system default settings, at a lower priority than everything else
    pub fn apply_system_default(&mut self) {
        let f = std::mem::take(&mut self.data);
        self.data = f.join(SystemDefault {});
    }

    /// Attempts to extract a particular struct from the data
    pub fn get<'de, T>(&self) -> Result<T, ConfigFileError>
    where
        T: Deserialize<'de>,
    {
        self.data.extract_lossy::<T>().map_err(ConfigFileError::from)
    }

    /// Extracts and checks the working configuration
    pub fn validate_configuration(&self) -> anyhow::Result<Configuration> {
        let config = self.get::<Configuration>()?;
        config.validate()?;
        Ok(config)
    }

    /// Names the source that supplied a given field
    fn source_of(&self, field: &str) -> String {
        self.data
            .find_metadata(field)
            .map_or_else(|| "unknown".to_string(), |md| md.name.to_string())
    }

    /// Renders the working configuration as a table, showing where each value came from
    pub fn to_display(&self) -> anyhow::Result<String> {
        let config = self.get::<Configuration>()?;
        let mut out = String::new();
        writeln!(out, "{:<16} {:<10} SOURCE", "FIELD", "VALUE")?;
        for (name, value) in config.fields() {
            writeln!(out, "{name:<16} {value:<10} {}", self.source_of(name))?;
        }
        Ok(out)
    }
}
