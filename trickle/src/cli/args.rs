//! Command-line argument definitions
// (c) 2024 Ross Younger

use clap::{Args, Parser};

use crate::Parameters;
use crate::config::{
    ClientConfigurationOverrides, ConfigurationOverrides, ServerConfigurationOverrides,
};
use crate::server::ServerParameters;

/// Logging options shared by both binaries
#[derive(Debug, Args, Clone, Default, PartialEq, Eq)]
pub struct LoggingOptions {
    /// Enable detailed debug output
    ///
    /// This has the same effect as setting `RUST_LOG=trickle=debug` in the environment.
    /// If present, `RUST_LOG` overrides this option.
    #[arg(long, action, help_heading("Output"), display_order(0))]
    pub debug: bool,

    /// Quiet mode
    ///
    /// Switches off progress display and statistics; reports only errors
    #[arg(short, long, action, conflicts_with("debug"), help_heading("Output"))]
    pub quiet: bool,

    /// Log to a file
    ///
    /// By default the log receives everything printed to stderr.
    /// To override this behaviour, set the environment variable `RUST_LOG_FILE_DETAIL` (same semantics as `RUST_LOG`).
    #[arg(
        short('l'),
        long,
        action,
        value_name("FILE"),
        help_heading("Output"),
        next_line_help(true)
    )]
    pub log_file: Option<String>,
}

/// Downloads a file from a trickled server
#[derive(Debug, Parser)]
#[command(
    name = "trickle",
    author,
    version,
    about,
    infer_long_args(true),
    arg_required_else_help(true)
)]
pub(crate) struct ClientArgs {
    #[command(flatten)]
    pub(crate) params: Parameters,

    #[command(flatten)]
    pub(crate) config: ConfigurationOverrides,

    #[command(flatten)]
    pub(crate) client_config: ClientConfigurationOverrides,

    /// Outputs the configuration, then exits.
    ///
    /// The output shows where each setting came from.
    #[arg(long, help_heading("Configuration"))]
    pub(crate) show_config: bool,
}

/// Serves files at a limited rate
#[derive(Debug, Parser)]
#[command(name = "trickled", author, version, about, infer_long_args(true))]
pub(crate) struct ServerArgs {
    #[command(flatten)]
    pub(crate) params: ServerParameters,

    #[command(flatten)]
    pub(crate) config: ConfigurationOverrides,

    #[command(flatten)]
    pub(crate) server_config: ServerConfigurationOverrides,

    /// Outputs the configuration, then exits.
    ///
    /// The output shows where each setting came from.
    #[arg(long, help_heading("Configuration"))]
    pub(crate) show_config: bool,
}
