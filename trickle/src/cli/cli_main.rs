//! Main CLI entrypoints for trickle and trickled
// (c) 2024 Ross Younger

use std::process::ExitCode;
use std::{ffi::OsString, io::Write as _};

use anyhow::{Context as _, Result};
use clap::Parser;

use super::args::{ClientArgs, ServerArgs};
use crate::{
    Parameters,
    config::{Configuration, Manager},
    server::ServerParameters,
};

/// Client CLI entrypoint
///
/// Call this from `main`, passing the arguments to use.
/// Normally you will call `client_cli(std::env::args_os())` but you can pass in alternate arguments for CLI testing.
///
/// This function may start a tokio runtime and perform work in it.
#[must_use]
pub fn client_cli<I, T>(args: I) -> ExitCode
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    exit_code(client_inner(args))
}

/// Server CLI entrypoint
///
/// As [`client_cli`], for the server binary.
#[must_use]
pub fn server_cli<I, T>(args: I) -> ExitCode
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    exit_code(server_inner(args))
}

#[allow(clippy::match_bool)] // improved readability
fn exit_code(result: Result<bool>) -> ExitCode {
    result
        .inspect_err(|e| {
            if crate::util::tracing_is_initialised() {
                tracing::error!("{e:#}");
            } else {
                let _ = writeln!(std::io::stderr(), "Error: {e:#}");
            }
        })
        .map_or(ExitCode::FAILURE, |success| match success {
            true => ExitCode::SUCCESS,
            false => ExitCode::FAILURE,
        })
}

/// Parses arguments.
///
/// Help and version requests are printed here, returning `None`.
fn parse_args<P, I, T>(args: I) -> Result<Option<P>>
where
    P: Parser,
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    use clap::error::ErrorKind::{DisplayHelp, DisplayVersion};
    match P::try_parse_from(args) {
        Ok(args) => Ok(Some(args)),
        Err(e) if matches!(e.kind(), DisplayHelp | DisplayVersion) => {
            let _ = e.print();
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Inner client logic
///
/// # Return
/// true indicates success. false indicates a failure where the callee has output to stderr.
fn client_inner<I, T>(args: I) -> Result<bool>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let Some(args) = parse_args::<ClientArgs, _, _>(args)? else {
        return Ok(true); // help/version shown; exit
    };
    let mut manager = Manager::standard();
    manager.merge_provider(args.config);
    manager.merge_provider(args.client_config);
    manager.apply_system_default();
    if args.show_config {
        return show_config(&manager, "Client");
    }
    let config = manager.validate_configuration()?;
    run_client(config, args.params)
}

fn server_inner<I, T>(args: I) -> Result<bool>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let Some(args) = parse_args::<ServerArgs, _, _>(args)? else {
        return Ok(true);
    };
    let mut manager = Manager::standard();
    manager.merge_provider(args.config);
    manager.merge_provider(args.server_config);
    manager.apply_system_default();
    if args.show_config {
        return show_config(&manager, "Server");
    }
    let config = manager.validate_configuration()?;
    run_server(config, args.params)
}

fn show_config(manager: &Manager, role: &str) -> Result<bool> {
    let _ = writeln!(
        std::io::stdout(),
        "{role} configuration:\n{}",
        manager.to_display()?
    );
    let _ = manager.validate_configuration()?;
    Ok(true)
}

// MODE HANDLERS ///////////////////////////////////////////////////////////

#[tokio::main(flavor = "current_thread")]
async fn run_client(config: Configuration, params: Parameters) -> Result<bool> {
    crate::client_main(config, params).await
}

#[tokio::main]
async fn run_server(config: Configuration, params: ServerParameters) -> Result<bool> {
    crate::server_main(config, params)
        .await
        .context("[Server] failed")?;
    Ok(true)
}
