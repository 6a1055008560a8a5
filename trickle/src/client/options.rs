//! Options specific to trickle client-mode
// (c) 2024 Ross Younger

use std::path::PathBuf;

use clap::Parser;

use super::Locator;
use crate::cli::LoggingOptions;

#[derive(Debug, Parser, Clone, Default)]
/// Client-side options which may be provided on the command line, but are not persistent configuration options.
pub struct Parameters {
    #[command(flatten)]
    #[allow(missing_docs)]
    pub logging: LoggingOptions,

    /// Where to write the downloaded file.
    ///
    /// By default the file is written to the current directory, with the final component of the remote path as its name.
    #[arg(short, long, value_name("FILE"), help_heading("Output"))]
    pub output: Option<PathBuf>,

    // (POSITIONAL ARGUMENT)
    /// The file to download, as HOST:PORT/PATH.
    ///
    /// PATH is relative to the directory the server is serving. IPv6 hosts go in square brackets: [::1]:4000/file
    #[arg(value_name = "HOST:PORT/PATH")]
    pub locator: Option<Locator>,
}

impl Parameters {
    /// The local file to write, taking `--output` into account
    pub(crate) fn destination(&self, locator: &Locator) -> anyhow::Result<PathBuf> {
        match &self.output {
            Some(p) => Ok(p.clone()),
            None => Ok(locator.default_destination()?),
        }
    }
}
