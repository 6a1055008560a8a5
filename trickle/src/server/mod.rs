//! server-side event loop
// (c) 2024 Ross Younger

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use anyhow::Context as _;
use clap::Args;
use tracing::{info, warn};

use crate::cli::LoggingOptions;
use crate::config::Configuration;
use crate::util::{LogSink, setup_tracing, trace_level};

mod connection;
mod manager;
pub use manager::{ConnectionManager, ServerSettings, SessionStats, ShutdownHandle};

/// Server options which may be provided on the command line, but are not persistent configuration options.
#[derive(Debug, Args, Clone, Default)]
pub struct ServerParameters {
    /// TCP port to listen on
    #[arg(short, long, required_unless_present("show_config"), help_heading("Server"))]
    pub port: Option<u16>,

    /// Speed limit per session, in kilobytes (1000 bytes) per second
    #[arg(
        short('d'),
        long,
        value_name("KBPS"),
        required_unless_present("show_config"),
        help_heading("Server")
    )]
    pub speed_limit: Option<u64>,

    /// Directory to serve files from. Requested paths are resolved against it;
    /// absolute paths and `..` components are refused.
    #[arg(long, value_name("DIR"), default_value("."), help_heading("Server"))]
    pub root: PathBuf,

    #[command(flatten)]
    #[allow(missing_docs)]
    pub logging: LoggingOptions,
}

/// Server event loop
///
/// Listens on all IPv4 interfaces until interrupted (ctrl-c), then shuts down gracefully.
#[allow(clippy::module_name_repetitions)]
pub(crate) async fn server_main(
    config: Configuration,
    parameters: ServerParameters,
) -> anyhow::Result<()> {
    let port = parameters.port.context("a port is required")?;
    let speed_limit = parameters
        .speed_limit
        .context("a speed limit is required")?;
    let throttle = config.throttle(speed_limit);
    throttle.validate()?;
    anyhow::ensure!(
        parameters.root.is_dir(),
        "{} is not a directory",
        parameters.root.display()
    );

    setup_tracing(
        trace_level(&parameters.logging),
        LogSink::Stderr,
        parameters.logging.log_file.as_ref(),
        config.time_format,
        console::colors_enabled_stderr(),
    )?;

    let settings = ServerSettings::from_config(&config, parameters.root, throttle);
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let manager = ConnectionManager::bind(addr, settings)
        .await
        .with_context(|| format!("failed to bind port {port}"))?;
    info!(
        "listening on {}; {} bytes every {:?} ({speed_limit} kB/s)",
        manager.local_addr()?,
        throttle.chunk_bytes(),
        throttle.interval()
    );

    let handle = manager.shutdown_handle();
    let _ = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown requested");
                handle.shutdown();
            }
            Err(e) => warn!("cannot listen for ctrl-c: {e}"),
        }
    });

    let stats = manager.run().await;
    info!(
        "served {} session(s), {} failed",
        stats.started, stats.failed
    );
    Ok(())
}
