//! System default configuration provider
// (c) 2024 Ross Younger

use super::Configuration;
use figment::{Metadata, Provider, providers::Serialized};

/// A [`figment::Provider`](https://docs.rs/figment/latest/figment/trait.Provider.html) that holds
/// the set of system default options
pub(super) struct SystemDefault {}

impl SystemDefault {
    const META_NAME: &'static str = "default";
}

impl Provider for SystemDefault {
    fn metadata(&self) -> Metadata {
        figment::Metadata::named(Self::META_NAME)
    }

    fn data(
        &self,
    ) -> std::result::Result<
        figment::value::Map<figment::Profile, figment::value::Dict>,
        figment::Error,
    > {
        Serialized::defaults(Configuration::system_default()).data()
    }
}
