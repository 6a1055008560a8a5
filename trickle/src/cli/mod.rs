//! Command Line Interface for trickle and trickled
// (c) 2024 Ross Younger
mod args;
pub(crate) use args::{ClientArgs, ServerArgs};
pub use args::LoggingOptions;
mod cli_main;
pub use cli_main::{client_cli, server_cli};
