// (c) 2024 Ross Younger
//! # Configuration management
//!
//! trickle obtains its run-time configuration from the following sources, in order of priority:
//! 1. Command-line options
//! 2. Environment variables, named `TRICKLE_` followed by the field name in any case
//!    (for example `TRICKLE_RECV_TIMEOUT=1000`)
//! 3. Hard-wired defaults
//!
//! The available fields are those of [`Configuration`].
//! Run `trickle --show-config` or `trickled --show-config` to see the working configuration
//! and where each value came from.

mod errors;
pub use errors::ConfigFileError;

mod manager;
pub use manager::{ENV_PREFIX, Manager};

mod structure;
pub use structure::{
    ClientConfigurationOverrides, Configuration, ConfigurationOverrides,
    ServerConfigurationOverrides,
};

mod sysdefault;
use sysdefault::SystemDefault;
