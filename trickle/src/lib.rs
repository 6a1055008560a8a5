// (c) 2024 Ross Younger

//! `trickle` is a rate-limited file transfer tool.
//!
//! A server (`trickled`) serves the files in one directory over TCP, pacing each
//! download to a fixed speed. The client (`trickle`) fetches one file per session.
//!
//! ## Overview
//!
//! - A small length-prefixed binary [protocol], carried over plain TCP
//! - The server sends a fixed-size chunk of the file, then sleeps for a fixed interval
//!   ([`transfer`]), so each session runs at close to the configured speed
//! - Many concurrent sessions, each on its own task, with graceful shutdown
//! - Tunable timeouts; see [`Configuration`]
//!
//! #### What trickle is not
//!
//! * Secure. There is no authentication and no encryption.
//! * Resumable. A failed download has to start again.
//! * A way to move directory trees; one session fetches one file.
//!
//! ## 🧰 Getting Started
//!
//! ```text
//! trickled --port 4000 --speed-limit 100 --root /srv/files
//! trickle localhost:4000/some/file.bin
//! ```
//!
//! The server's speed limit is in kilobytes (1000 bytes) per second. Chunks are sent every
//! `interval` milliseconds (default 10), so the chunk size is `speed × interval`.
//!
//! ## Configuration
//!
//! Every tuning option has a default, may be set in the environment (`TRICKLE_<NAME>`),
//! and may be given on the command line. Use `--show-config` to see the result. See [config].
//!
//! ## Crate layout
//!
//! From the bottom up: [protocol] (packets, reassembly), [transport] (connections and the
//! receive policy), [transfer] (paced sending), [session] (the handshake/download/farewell
//! state machine), then the client and server front ends.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub(crate) mod cli;
pub use cli::{LoggingOptions, client_cli, server_cli};

pub(crate) mod client;
pub(crate) use client::client_main;
pub use client::{Locator, LocatorError, MAX_UPDATE_FPS, Parameters};

pub mod config;
pub use config::Configuration;

pub mod protocol;

pub(crate) mod server;
pub(crate) use server::server_main;
pub use server::{
    ConnectionManager, ServerParameters, ServerSettings, SessionStats, ShutdownHandle,
};

pub mod session;
pub mod transfer;
pub mod transport;
pub mod util;
