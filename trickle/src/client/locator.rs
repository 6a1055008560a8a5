//! Download locators (`HOST:PORT/PATH`)
// (c) 2024 Ross Younger

use std::{fmt::Display, path::PathBuf, str::FromStr};

use thiserror::Error;

/// Reasons a locator string may be rejected
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum LocatorError {
    /// There was no `/PATH` part
    #[error("no file path given (expected HOST:PORT/PATH)")]
    MissingPath,
    /// There was no `:PORT` part
    #[error("no port given (expected HOST:PORT/PATH)")]
    MissingPort,
    /// The port was not a number from 1 to 65535
    #[error("invalid port number")]
    BadPort,
    /// The host part was empty
    #[error("no host given (expected HOST:PORT/PATH)")]
    EmptyHost,
    /// An IPv6 address was given without square brackets, or a bracket was not closed
    #[error("IPv6 addresses must be written in square brackets, e.g. [::1]:4000/file")]
    Brackets,
    /// The path does not end in a file name, so no local destination can be inferred
    #[error("cannot infer a local file name; use --output")]
    NoFileName,
}

/// A file to download: which server, and which file on it.
///
/// The string form is `HOST:PORT/PATH`, where `PATH` is relative to the server's root.
/// IPv6 hosts are written in brackets: `[::1]:4000/file`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    /// Host name or address (without brackets)
    pub host: String,
    /// Server port
    pub port: u16,
    /// Path to request
    pub path: String,
}

impl Locator {
    /// The `HOST:PORT` part, formatted for display
    #[must_use]
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Where to put the file when no destination was given: the final component of the path,
    /// in the current directory.
    pub fn default_destination(&self) -> Result<PathBuf, LocatorError> {
        std::path::Path::new(&self.path)
            .file_name()
            .map(PathBuf::from)
            .ok_or(LocatorError::NoFileName)
    }
}

impl FromStr for Locator {
    type Err = LocatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (authority, path) = s.split_once('/').ok_or(LocatorError::MissingPath)?;
        if path.is_empty() {
            return Err(LocatorError::MissingPath);
        }
        let (host, port) = if let Some(rest) = authority.strip_prefix('[') {
            let (host, after) = rest.split_once(']').ok_or(LocatorError::Brackets)?;
            let port = after.strip_prefix(':').ok_or(LocatorError::MissingPort)?;
            (host, port)
        } else {
            let (host, port) = authority
                .rsplit_once(':')
                .ok_or(LocatorError::MissingPort)?;
            if host.contains(':') {
                return Err(LocatorError::Brackets);
            }
            (host, port)
        };
        if host.is_empty() {
            return Err(LocatorError::EmptyHost);
        }
        let port = match port.parse::<u16>() {
            Ok(0) | Err(_) => return Err(LocatorError::BadPort),
            Ok(p) => p,
        };
        Ok(Self {
            host: host.to_owned(),
            port,
            path: path.to_owned(),
        })
    }
}

impl Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.authority(), self.path)
    }
}
