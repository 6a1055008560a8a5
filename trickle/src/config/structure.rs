//! Configuration structure
// (c) 2024 Ross Younger

use std::time::Duration;

use clap::Args;
use figment::{Metadata, Profile, Provider, providers::Serialized, value::Dict, value::Map};
use serde::{Deserialize, Serialize};

use crate::{transfer::Throttle, transport::ReceivePolicy, util::TimeFormat};

/// Tuning parameters shared by the client and the server.
///
/// Every field has a system default; see [`Configuration::system_default`].
/// Values may be overridden by environment variables (`TRICKLE_<FIELD NAME>`) and on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Configuration {
    /// Delay between data chunks, in milliseconds (server).
    ///
    /// Together with the speed limit this determines the chunk size.
    pub interval: u64,
    /// Connection timeout, in seconds (client)
    pub timeout: u16,
    /// Wait per receive attempt, in milliseconds
    pub recv_timeout: u64,
    /// Number of receive attempts before a peer is considered to have gone quiet
    pub recv_attempts: u32,
    /// Wait per receive attempt while draining a burst of packets, in microseconds
    pub burst_timeout: u64,
    /// Number of consecutive empty waits that ends a burst
    pub burst_attempts: u32,
    /// How often the server checks for shutdown while waiting for connections, in milliseconds
    pub accept_poll: u64,
    /// Maximum number of concurrent sessions (server). 0 means unlimited.
    pub max_sessions: u32,
    /// How long the server waits for sessions in progress at shutdown before cancelling them, in seconds
    pub shutdown_grace: u64,
    /// Format of timestamps in log output
    pub time_format: TimeFormat,
}

static SYSTEM_DEFAULT_CONFIG: Configuration = Configuration {
    interval: 10,
    timeout: 5,
    recv_timeout: 3000,
    recv_attempts: 50,
    burst_timeout: 500,
    burst_attempts: 20,
    accept_poll: 500,
    max_sessions: 0,
    shutdown_grace: 5,
    time_format: TimeFormat::Local,
};

impl Configuration {
    /// Hard-wired defaults
    #[must_use]
    pub fn system_default() -> &'static Self {
        &SYSTEM_DEFAULT_CONFIG
    }

    /// Inter-chunk delay
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval)
    }

    /// Connection timeout
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.into())
    }

    /// Accept loop poll interval
    #[must_use]
    pub fn accept_poll(&self) -> Duration {
        Duration::from_millis(self.accept_poll)
    }

    /// Shutdown grace period
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace)
    }

    /// Receive timing, as used by [`Connection`](crate::transport::Connection)
    #[must_use]
    pub fn receive_policy(&self) -> ReceivePolicy {
        ReceivePolicy {
            idle_timeout: Duration::from_millis(self.recv_timeout),
            idle_attempts: self.recv_attempts,
            burst_timeout: Duration::from_micros(self.burst_timeout),
            burst_attempts: self.burst_attempts,
        }
    }

    /// Pacing for a given speed limit (kilobytes per second)
    #[must_use]
    pub fn throttle(&self, speed_limit: u64) -> Throttle {
        Throttle::new(speed_limit, self.interval())
    }

    /// Checks the configuration for values that cannot work
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.interval > 0, "interval must be greater than zero");
        anyhow::ensure!(self.timeout > 0, "timeout must be greater than zero");
        anyhow::ensure!(self.recv_timeout > 0, "recv_timeout must be greater than zero");
        anyhow::ensure!(self.recv_attempts > 0, "recv_attempts must be greater than zero");
        anyhow::ensure!(self.burst_timeout > 0, "burst_timeout must be greater than zero");
        anyhow::ensure!(self.burst_attempts > 0, "burst_attempts must be greater than zero");
        anyhow::ensure!(self.accept_poll > 0, "accept_poll must be greater than zero");
        Ok(())
    }

    /// Field names and values, in declaration order, for display
    #[must_use]
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("interval", self.interval.to_string()),
            ("timeout", self.timeout.to_string()),
            ("recv_timeout", self.recv_timeout.to_string()),
            ("recv_attempts", self.recv_attempts.to_string()),
            ("burst_timeout", self.burst_timeout.to_string()),
            ("burst_attempts", self.burst_attempts.to_string()),
            ("accept_poll", self.accept_poll.to_string()),
            ("max_sessions", self.max_sessions.to_string()),
            ("shutdown_grace", self.shutdown_grace.to_string()),
            ("time_format", self.time_format.to_string()),
        ]
    }
}

/// Command-line overrides for [`Configuration`] that apply to both client and server.
///
/// Only the options actually given take part in the configuration merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Args, Serialize)]
pub struct ConfigurationOverrides {
    /// Wait per receive attempt, in milliseconds [default: 3000]
    #[arg(long, value_name = "MS", help_heading("Tuning"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recv_timeout: Option<u64>,

    /// Receive attempts before the peer is considered gone [default: 50]
    #[arg(long, value_name = "N", help_heading("Tuning"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recv_attempts: Option<u32>,

    /// Wait per receive attempt while draining a burst, in microseconds [default: 500]
    #[arg(long, value_name = "US", help_heading("Tuning"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub burst_timeout: Option<u64>,

    /// Consecutive empty waits that end a burst [default: 20]
    #[arg(long, value_name = "N", help_heading("Tuning"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub burst_attempts: Option<u32>,

    /// Format of timestamps in log output [default: local]
    #[arg(long, value_name = "FORMAT", help_heading("Output"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_format: Option<TimeFormat>,
}

/// Client-only command-line overrides for [`Configuration`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Args, Serialize)]
pub struct ClientConfigurationOverrides {
    /// Connection timeout, in seconds [default: 5]
    #[arg(long, value_name = "SECS", help_heading("Tuning"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u16>,
}

/// Server-only command-line overrides for [`Configuration`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Args, Serialize)]
pub struct ServerConfigurationOverrides {
    /// Delay between data chunks, in milliseconds [default: 10]
    #[arg(long, value_name = "MS", help_heading("Server"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,

    /// How often to check for shutdown while waiting for connections, in milliseconds [default: 500]
    #[arg(long, value_name = "MS", help_heading("Server"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accept_poll: Option<u64>,

    /// Maximum number of concurrent sessions; 0 means unlimited [default: 0]
    #[arg(long, value_name = "N", help_heading("Server"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_sessions: Option<u32>,

    /// Seconds to wait for sessions in progress at shutdown [default: 5]
    #[arg(long, value_name = "SECS", help_heading("Server"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shutdown_grace: Option<u64>,
}

/// Implements [`Provider`] for structs of command-line overrides
macro_rules! command_line_provider {
    ($($t:ty),+) => {
        $(
            impl Provider for $t {
                fn metadata(&self) -> Metadata {
                    Metadata::named("command line")
                }

                fn data(&self) -> Result<Map<Profile, Dict>, figment::Error> {
                    Serialized::defaults(self).data()
                }
            }
        )+
    };
}

command_line_provider!(
    ConfigurationOverrides,
    ClientConfigurationOverrides,
    ServerConfigurationOverrides
);
