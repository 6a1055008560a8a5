//! Main client loop
// (c) 2024 Ross Younger

use std::path::Path;

use anyhow::Context as _;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::net::TcpStream;
use tracing::{Instrument as _, debug, info, trace_span, warn};

use super::{Locator, MAX_UPDATE_FPS, Parameters, progress::style_for};
use crate::config::Configuration;
use crate::protocol::common::TcpStreamPair;
use crate::session::{ClientSession, DownloadOutcome};
use crate::transport::Connection;
use crate::util::{LogSink, setup_tracing, stats::summary, trace_level};

/// Main client mode event loop
///
/// # Return
/// true if the session completed, false if it failed in a way that has already been reported.
pub(crate) async fn client_main(
    config: Configuration,
    parameters: Parameters,
) -> anyhow::Result<bool> {
    let locator = parameters
        .locator
        .as_ref()
        .context("a file to download is required (HOST:PORT/PATH)")?;
    let destination = parameters.destination(locator)?;

    let display = if parameters.logging.quiet {
        MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
    } else {
        MultiProgress::with_draw_target(ProgressDrawTarget::stderr_with_hz(MAX_UPDATE_FPS))
    };
    setup_tracing(
        trace_level(&parameters.logging),
        LogSink::Progress(display.clone()),
        parameters.logging.log_file.as_ref(),
        config.time_format,
        console::colors_enabled_stderr(),
    )?;

    let span = trace_span!("CLIENT");
    download(&config, locator, &destination, &display, parameters.logging.quiet)
        .instrument(span)
        .await
}

async fn download(
    config: &Configuration,
    locator: &Locator,
    destination: &Path,
    display: &MultiProgress,
    quiet: bool,
) -> anyhow::Result<bool> {
    debug!("connecting to {}", locator.authority());
    let stream = tokio::time::timeout(
        config.timeout(),
        TcpStream::connect((locator.host.as_str(), locator.port)),
    )
    .await
    .with_context(|| format!("timed out connecting to {}", locator.authority()))?
    .with_context(|| format!("failed to connect to {}", locator.authority()))?;
    stream.set_nodelay(true)?;
    debug!("connected to {}", stream.peer_addr()?);

    let connection = Connection::new(TcpStreamPair::from(stream), config.receive_policy());
    let progress = if quiet {
        ProgressBar::hidden()
    } else {
        let name = locator.path.clone();
        let style = ProgressStyle::with_template(style_for(name.len()))?;
        display.add(ProgressBar::new(0).with_style(style).with_message(name))
    };

    let outcome = ClientSession::new(connection)
        .with_progress(progress)
        .download(&locator.path, destination)
        .await
        .with_context(|| format!("download of {locator} failed"))?;

    match outcome {
        DownloadOutcome::NotAvailable => {
            warn!("{} is not available on {}", locator.path, locator.authority());
        }
        DownloadOutcome::Complete(stats) => {
            if !quiet {
                info!("{}: {}", destination.display(), summary(&stats));
            }
        }
    }
    Ok(true)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use pretty_assertions::assert_eq;

    use super::client_main;
    use crate::{Parameters, config::Configuration};

    #[tokio::test]
    async fn locator_is_required() {
        let e = client_main(*Configuration::system_default(), Parameters::default())
            .await
            .unwrap_err();
        assert_eq!(
            e.to_string(),
            "a file to download is required (HOST:PORT/PATH)"
        );
    }
}
